use crate::engine::EngineSettings;
use crate::upstream::{Endpoints, HttpDataSource};
use anyhow::{bail, Context, Result};
use clap::Args;
use std::time::Duration;

pub const DEFAULT_LABEL_URL: &str = "https://api.fda.gov/drug/label.json";
pub const DEFAULT_EVENT_URL: &str = "https://api.fda.gov/drug/event.json";
/// A single page of the Part D spending-by-drug dataset. The API orders rows
/// by brand name, not by exposure, so the top list only ranks what this page
/// holds; raise `size` or point `PARTD_DATA_URL` at a pre-sorted extract for
/// full coverage.
pub const DEFAULT_EXPOSURE_URL: &str =
    "https://data.cms.gov/data-api/v1/dataset/7e0b4365-fd63-4a29-8f5e-e0ac9f66a81b/data?size=5000";

/// Roughly a century.
pub const MAX_EVENT_LOOKBACK_DAYS: i64 = 36_500;

/// Service configuration, from flags or environment.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "RXSIGNALS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind
    #[arg(long, env = "RXSIGNALS_PORT", default_value_t = 8080)]
    pub port: u16,

    /// openFDA drug label endpoint
    #[arg(long, env = "OPENFDA_LABEL_URL", default_value = DEFAULT_LABEL_URL)]
    pub label_url: String,

    /// openFDA adverse event endpoint
    #[arg(long, env = "OPENFDA_EVENT_URL", default_value = DEFAULT_EVENT_URL)]
    pub event_url: String,

    /// openFDA API key, raises the rate limit
    #[arg(long, env = "OPENFDA_API_KEY")]
    pub openfda_api_key: Option<String>,

    /// CMS Part D spending-by-drug rows
    #[arg(long, env = "PARTD_DATA_URL", default_value = DEFAULT_EXPOSURE_URL)]
    pub exposure_url: String,

    /// Timeout for each upstream request, in milliseconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", default_value_t = 12_000)]
    pub upstream_timeout_ms: u64,

    /// Time to live of cached results, in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value_t = 6 * 60 * 60)]
    pub cache_ttl_secs: u64,

    /// Labels fetched per analysis
    #[arg(long, env = "LABEL_LIMIT", default_value_t = 100)]
    pub label_limit: usize,

    /// Terms returned by the word cloud
    #[arg(long, env = "TOP_TERMS", default_value_t = 80)]
    pub top_terms: usize,

    /// Days of adverse-event reports counted
    #[arg(long, env = "EVENT_LOOKBACK_DAYS", default_value_t = 365)]
    pub event_lookback_days: i64,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(1..=60_000).contains(&self.upstream_timeout_ms) {
            bail!("upstream timeout must be between 1 and 60000 ms, got {}", self.upstream_timeout_ms);
        }
        if self.cache_ttl_secs == 0 {
            bail!("cache TTL must be positive");
        }
        // openFDA rejects larger pages
        if !(1..=1000).contains(&self.label_limit) {
            bail!("label limit must be between 1 and 1000, got {}", self.label_limit);
        }
        if self.top_terms == 0 {
            bail!("top terms must be positive");
        }
        if !(1..=MAX_EVENT_LOOKBACK_DAYS).contains(&self.event_lookback_days) {
            bail!(
                "event lookback must be between 1 and {} days, got {}",
                MAX_EVENT_LOOKBACK_DAYS,
                self.event_lookback_days
            );
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            label_limit: self.label_limit,
            top_terms: self.top_terms,
            event_lookback_days: self.event_lookback_days,
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            label_url: self.label_url.clone(),
            event_url: self.event_url.clone(),
            exposure_url: self.exposure_url.clone(),
            api_key: self.openfda_api_key.clone().filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn http_source(&self) -> Result<HttpDataSource> {
        HttpDataSource::new(self.endpoints(), self.upstream_timeout()).context("Failed to build HTTP client")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    fn parse(args: &[&str]) -> Config {
        TestCli::try_parse_from(std::iter::once("rxsignals").chain(args.iter().copied()))
            .unwrap()
            .config
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&["--port", "9000", "--label-limit", "25", "--openfda-api-key", "abc"]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.label_limit, 25);
        assert_eq!(config.endpoints().api_key.as_deref(), Some("abc"));
        assert_eq!(config.settings().label_limit, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = parse(&["--label-limit", "5000"]);
        assert!(config.validate().is_err());

        let config = parse(&["--upstream-timeout-ms", "0"]);
        assert!(config.validate().is_err());

        let config = parse(&["--event-lookback-days", "100000000"]);
        assert!(config.validate().is_err());

        let config = parse(&["--event-lookback-days", "36500"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let config = parse(&["--openfda-api-key", "  "]);
        assert_eq!(config.endpoints().api_key, None);
    }
}
