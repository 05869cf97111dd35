use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Tunekit - fine-tuning pipeline control server
///
/// Serves start/status/health over HTTP and runs at most one
/// prepare/train/export/import pipeline at a time.
#[derive(Parser, Debug)]
#[command(name = "tunekit", author, version, about = "Tunekit - fine-tuning pipeline control server")]
pub struct Args {
    /// Pipeline config file (TOML). Missing file means built-in defaults.
    #[arg(short, long, env = "TUNEKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address (overrides config and TUNEKIT_BIND)
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Validate the configuration and exit
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([
            "tunekit",
            "--config",
            "/etc/tunekit.toml",
            "--bind",
            "127.0.0.1:9000",
            "--log-format",
            "json",
            "--check",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/tunekit.toml")));
        assert_eq!(args.bind, Some("127.0.0.1:9000".parse().unwrap()));
        assert_eq!(args.log_format, LogFormat::Json);
        assert!(args.check);
        assert_eq!(args.log_level, None);
    }

    #[test]
    fn test_invalid_bind_is_rejected() {
        assert!(Args::try_parse_from(["tunekit", "--bind", "nowhere"]).is_err());
    }
}
