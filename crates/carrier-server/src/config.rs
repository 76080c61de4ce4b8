use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use carrier_hub::HubConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub outbound_buffer: usize,
    pub payment_delay: Duration,
    pub keys_require_auth: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("CARRIER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = var_or("CARRIER_PORT", "8080")
            .parse()
            .context("CARRIER_PORT must be a port number")?;
        let db_path = PathBuf::from(var_or("CARRIER_DB_PATH", "carrier.db"));
        let outbound_buffer: usize = var_or("CARRIER_OUTBOUND_BUFFER", "256")
            .parse()
            .context("CARRIER_OUTBOUND_BUFFER must be a positive integer")?;
        if outbound_buffer == 0 {
            anyhow::bail!("CARRIER_OUTBOUND_BUFFER must be at least 1");
        }
        let payment_delay_ms: u64 = var_or("CARRIER_PAYMENT_DELAY_MS", "2000")
            .parse()
            .context("CARRIER_PAYMENT_DELAY_MS must be milliseconds")?;
        let keys_require_auth = parse_bool(&var_or("CARRIER_KEYS_REQUIRE_AUTH", "false"))
            .context("CARRIER_KEYS_REQUIRE_AUTH must be true or false")?;

        Ok(Self {
            host,
            port,
            db_path,
            outbound_buffer,
            payment_delay: Duration::from_millis(payment_delay_ms),
            keys_require_auth,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_capacity: self.outbound_buffer,
            payment_delay: self.payment_delay,
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
