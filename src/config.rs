//! Command line and environment configuration.

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

use crate::connection::ConnectOptions;

/// Prometheus exporter for Microsoft SQL Server.
///
/// Every option can also be given through the environment variable named
/// next to it.
#[derive(Parser, Clone)]
#[command(name = "mssql-exporter", version, about)]
pub struct Config {
    /// SQL Server host name or address.
    #[arg(long, env = "SERVER", value_parser = non_empty)]
    pub server: String,

    /// SQL Server port.
    #[arg(long, env = "PORT", default_value_t = 1433)]
    pub port: u16,

    /// SQL authentication user.
    #[arg(long, env = "USERNAME", value_parser = non_empty)]
    pub username: String,

    /// SQL authentication password.
    #[arg(long, env = "PASSWORD", hide_env_values = true, value_parser = non_empty)]
    pub password: String,

    /// Initial database context. Defaults to the login's default database.
    #[arg(long, env = "DATABASE")]
    pub database: Option<String>,

    /// Encrypt the whole session. With `false` only the login is encrypted.
    #[arg(long, env = "ENCRYPT", default_value_t = true, action = clap::ArgAction::Set)]
    pub encrypt: bool,

    /// Accept any server certificate.
    #[arg(
        long,
        env = "TRUST_SERVER_CERTIFICATE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub trust_server_certificate: bool,

    /// Port to serve metrics on.
    #[arg(long, env = "EXPOSE", default_value_t = 4000)]
    pub expose: u16,

    /// Address to serve metrics on.
    #[arg(long, env = "LISTEN_ADDRESS", default_value = "0.0.0.0")]
    pub listen_address: IpAddr,

    /// Seconds to wait for a connection to be established.
    #[arg(long, env = "CONNECT_TIMEOUT", default_value = "15", value_parser = parse_seconds)]
    pub connect_timeout: Duration,

    /// Seconds to wait for each collector query.
    #[arg(long, env = "QUERY_TIMEOUT", default_value = "15", value_parser = parse_seconds)]
    pub query_timeout: Duration,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Config {
    /// The connection settings handed to the connector.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            host: self.server.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            encrypt: self.encrypt,
            trust_server_certificate: self.trust_server_certificate,
            connect_timeout: self.connect_timeout,
            query_timeout: self.query_timeout,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("connect", &self.connect_options())
            .field("expose", &self.expose)
            .field("listen_address", &self.listen_address)
            .field("verbose", &self.verbose)
            .field("quiet", &self.quiet)
            .finish()
    }
}

fn non_empty(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    Ok(s.to_string())
}

/// Parses a whole number of seconds, e.g. `15`.
fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: u64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid number of seconds '{}': {}", s, e))?;
    if secs == 0 {
        return Err("must be at least one second".to_string());
    }
    Ok(Duration::from_secs(secs))
}
