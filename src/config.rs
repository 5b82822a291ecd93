use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_MERCHANT_ID: &str = "demo-merchant-001";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_base_url: String,
    pub merchant_id: String,
    pub port: u16,
    pub poll_interval_ms: u64,
    /// A status poller with no viewer for this long stops fetching.
    pub status_idle_ms: u64,
    pub simulated_delay_ms: u64,
    pub signature_delay_ms: u64,
    pub session_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            api_base_url: std::env::var("FULL_REVENUE_API_URL")
                .or_else(|_| std::env::var("NEXT_PUBLIC_API_URL"))
                .map_err(|_| {
                    anyhow::anyhow!(
                        "FULL_REVENUE_API_URL or NEXT_PUBLIC_API_URL environment variable required"
                    )
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("FULL_REVENUE_API_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("FULL_REVENUE_API_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })?,
            merchant_id: std::env::var("MERCHANT_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MERCHANT_ID.to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            poll_interval_ms: parse_u64("POLL_INTERVAL_MS", 5000)?,
            status_idle_ms: parse_u64("STATUS_IDLE_MS", 30_000)?,
            simulated_delay_ms: parse_u64("SIMULATED_DELAY_MS", 800)?,
            signature_delay_ms: parse_u64("SIGNATURE_DELAY_MS", 600)?,
            session_ttl_secs: parse_u64("SESSION_TTL_SECS", 3600)?,
        };
        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Full Revenue API URL: {}", config.api_base_url);
        tracing::debug!("Merchant: {}", config.merchant_id);
        tracing::debug!("Poll interval: {}ms", config.poll_interval_ms);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Configuration for tests and local tooling: no cosmetic delays.
    pub fn for_base_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            merchant_id: DEFAULT_MERCHANT_ID.to_string(),
            port: 3000,
            poll_interval_ms: 5000,
            status_idle_ms: 30_000,
            simulated_delay_ms: 0,
            signature_delay_ms: 0,
            session_ttl_secs: 3600,
        }
    }

    /// Rejects values that would stall the status poller.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("POLL_INTERVAL_MS must be greater than zero");
        }
        if self.status_idle_ms == 0 {
            anyhow::bail!("STATUS_IDLE_MS must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_idle(&self) -> Duration {
        Duration::from_millis(self.status_idle_ms)
    }

    pub fn simulated_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_delay_ms)
    }

    pub fn signature_delay(&self) -> Duration {
        Duration::from_millis(self.signature_delay_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

fn parse_u64(var: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer", var)),
        _ => Ok(default),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::for_base_url("http://localhost:8080").validate().is_ok());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = Config::for_base_url("http://localhost:8080");
        config.poll_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("POLL_INTERVAL_MS"));

        let mut config = Config::for_base_url("http://localhost:8080");
        config.status_idle_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("STATUS_IDLE_MS"));
    }
}
