use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Shared with the identity service that issues the tokens.
    pub jwt_secret: String,
    pub cache_ttl: Duration,
    /// Per-connection outbound queue; the oldest events are dropped past it.
    pub send_buffer: usize,
    pub cache_sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("SHOPIET_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("SHOPIET_JWT_SECRET is unset or still a placeholder");
        }

        let host = lookup("SHOPIET_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&lookup, "SHOPIET_PORT", 8000)?;
        let db_path = lookup("SHOPIET_DB_PATH")
            .unwrap_or_else(|| "shopiet.db".into())
            .into();
        let cache_ttl = Duration::from_secs(parse_or(&lookup, "SHOPIET_CACHE_TTL_SECS", 300)?);
        let send_buffer: usize = parse_or(&lookup, "SHOPIET_SEND_BUFFER", 64)?;
        if send_buffer == 0 {
            bail!("SHOPIET_SEND_BUFFER must be at least 1");
        }
        let sweep_secs: u64 = parse_or(&lookup, "SHOPIET_CACHE_SWEEP_SECS", 60)?;
        if sweep_secs == 0 {
            bail!("SHOPIET_CACHE_SWEEP_SECS must be at least 1");
        }

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            cache_ttl,
            send_buffer,
            cache_sweep_interval: Duration::from_secs(sweep_secs),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
