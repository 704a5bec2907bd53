//! Server Configuration
//!
//! Settings are fixed at startup from command-line flags and shared read-only
//! afterwards. `dir` and `dbfilename` locate the snapshot file and are the
//! values CONFIG GET reports.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default bind host (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// Default snapshot directory
pub const DEFAULT_DIR: &str = "/tmp/redis-files";

/// Default snapshot file name
pub const DEFAULT_DBFILENAME: &str = "dump.rdb";

/// Default per-connection read/write deadline
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default time in-flight connections get to finish on shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Errors produced while parsing command-line arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// What the command line asked the process to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    Run(ServerConfig),
    Help,
    Version,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Directory holding the snapshot file
    pub dir: String,
    /// Snapshot file name inside `dir`
    pub dbfilename: String,
    /// Read/write deadline per connection (None = wait forever)
    pub idle_timeout: Option<Duration>,
    /// How long shutdown waits for in-flight connections
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dir: DEFAULT_DIR.to_string(),
            dbfilename: DEFAULT_DBFILENAME.to_string(),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl ServerConfig {
    /// Parses command-line arguments (without the program name).
    ///
    /// # Example
    ///
    /// ```
    /// use snapkv::config::{CliAction, ServerConfig};
    ///
    /// let action = ServerConfig::from_args(["--dir", "/data", "--dbfilename", "snap.rdb"]).unwrap();
    /// let CliAction::Run(config) = action else { panic!("expected a run action") };
    /// assert_eq!(config.snapshot_path(), std::path::Path::new("/data/snap.rdb"));
    /// ```
    pub fn from_args<I, S>(args: I) -> Result<CliAction, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = ServerConfig::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => config.host = required(&arg, args.next())?,
                "--port" | "-p" => {
                    let value = required(&arg, args.next())?;
                    config.port = parse_value(&arg, &value)?;
                }
                "--dir" => config.dir = required(&arg, args.next())?,
                "--dbfilename" => config.dbfilename = required(&arg, args.next())?,
                "--idle-timeout" => {
                    let value = required(&arg, args.next())?;
                    let secs: u64 = parse_value(&arg, &value)?;
                    config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "--shutdown-grace" => {
                    let value = required(&arg, args.next())?;
                    config.shutdown_grace = Duration::from_secs(parse_value(&arg, &value)?);
                }
                "--help" => return Ok(CliAction::Help),
                "--version" | "-v" => return Ok(CliAction::Version),
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(CliAction::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }

    /// Looks up a parameter for CONFIG GET (ASCII case-insensitive).
    pub fn get(&self, parameter: &[u8]) -> Option<&str> {
        if parameter.eq_ignore_ascii_case(b"dir") {
            Some(&self.dir)
        } else if parameter.eq_ignore_ascii_case(b"dbfilename") {
            Some(&self.dbfilename)
        } else {
            None
        }
    }
}

fn required(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
    })
}

/// Usage text for `--help`.
pub const USAGE: &str = r#"
snapkv - In-memory key-value server with snapshot key listing

USAGE:
    snapkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>            Host to bind to (default: 0.0.0.0)
    -p, --port <PORT>            Port to listen on (default: 6379)
        --dir <DIR>              Snapshot directory (default: /tmp/redis-files)
        --dbfilename <NAME>      Snapshot file name (default: dump.rdb)
        --idle-timeout <SECS>    Per-connection read/write deadline, 0 disables (default: 300)
        --shutdown-grace <SECS>  Time given to open connections on shutdown (default: 5)
    -v, --version                Print version information
        --help                   Print this help message

LOGGING:
    Set RUST_LOG (e.g. RUST_LOG=snapkv=debug) to change the log level.
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn run_config(args: &[&str]) -> ServerConfig {
        match ServerConfig::from_args(args.iter().copied()).unwrap() {
            CliAction::Run(config) => config,
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config = run_config(&[]);
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_address(), "0.0.0.0:6379");
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/tmp/redis-files/dump.rdb")
        );
    }

    #[test]
    fn test_all_flags() {
        let config = run_config(&[
            "--host",
            "127.0.0.1",
            "-p",
            "6380",
            "--dir",
            "/var/lib/snapkv",
            "--dbfilename",
            "snap.rdb",
            "--idle-timeout",
            "10",
            "--shutdown-grace",
            "2",
        ]);

        assert_eq!(config.bind_address(), "127.0.0.1:6380");
        assert_eq!(config.dir, "/var/lib/snapkv");
        assert_eq!(config.dbfilename, "snap.rdb");
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
    }

    #[test]
    fn test_zero_idle_timeout_disables_deadline() {
        assert_eq!(run_config(&["--idle-timeout", "0"]).idle_timeout, None);
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(ServerConfig::from_args(["--help"]), Ok(CliAction::Help));
        assert_eq!(ServerConfig::from_args(["-v"]), Ok(CliAction::Version));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            ServerConfig::from_args(["--port"]),
            Err(ConfigError::MissingValue("--port".to_string()))
        );
        assert_eq!(
            ServerConfig::from_args(["--port", "http"]),
            Err(ConfigError::InvalidValue {
                flag: "--port".to_string(),
                value: "http".to_string(),
            })
        );
        assert_eq!(
            ServerConfig::from_args(["--bogus"]),
            Err(ConfigError::UnknownArgument("--bogus".to_string()))
        );
    }

    #[test]
    fn test_get_parameter() {
        let config = run_config(&["--dir", "/data", "--dbfilename", "x.rdb"]);
        assert_eq!(config.get(b"dir"), Some("/data"));
        assert_eq!(config.get(b"DbFileName"), Some("x.rdb"));
        assert_eq!(config.get(b"maxmemory"), None);
    }
}
