use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

pub const CLOUD_API_URL: &str = "https://api.ntuity.io/v1";

pub const DEFAULT_SCAN_INTERVAL_CLOUD: Duration = Duration::from_secs(300);
pub const DEFAULT_SCAN_INTERVAL_LOCAL: Duration = Duration::from_secs(30);

pub const ENV_CLOUD_TOKEN: &str = "NEOOM_CLOUD_TOKEN";
pub const ENV_SITE_ID: &str = "NEOOM_SITE_ID";
pub const ENV_BEAAM_IP: &str = "BEAAM_IP";
pub const ENV_BEAAM_KEY: &str = "BEAAM_KEY";
pub const ENV_CLOUD_URL: &str = "NEOOM_CLOUD_URL";
pub const ENV_CLOUD_SCAN_INTERVAL: &str = "NEOOM_CLOUD_SCAN_INTERVAL";
pub const ENV_LOCAL_SCAN_INTERVAL: &str = "NEOOM_LOCAL_SCAN_INTERVAL";

/// Per-call deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Covers both cloud calls of one cycle
    pub cloud: Duration,
    pub configuration: Duration,
    pub site_state: Duration,
    /// Applied to each thing independently
    pub device_state: Duration,
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            cloud: Duration::from_secs(10),
            configuration: Duration::from_secs(10),
            site_state: Duration::from_secs(5),
            device_state: Duration::from_secs(3),
            command: Duration::from_secs(10),
        }
    }
}

/// Everything needed to talk to one neoom installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub cloud_token: String,
    pub site_id: String,
    pub gateway_ip: String,
    pub gateway_key: String,
    pub cloud_base_url: String,
    pub cloud_scan_interval: Duration,
    pub local_scan_interval: Duration,
    pub timeouts: Timeouts,
}

impl ConnectionConfig {
    /// Creates a config with default endpoints and intervals. All four values are required.
    pub fn new(
        cloud_token: impl Into<String>,
        site_id: impl Into<String>,
        gateway_ip: impl Into<String>,
        gateway_key: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            cloud_token: cloud_token.into(),
            site_id: site_id.into(),
            gateway_ip: gateway_ip.into(),
            gateway_key: gateway_key.into(),
            cloud_base_url: CLOUD_API_URL.to_string(),
            cloud_scan_interval: DEFAULT_SCAN_INTERVAL_CLOUD,
            local_scan_interval: DEFAULT_SCAN_INTERVAL_LOCAL,
            timeouts: Timeouts::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads the config from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the config through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{name} must be set")))
        };

        let mut config = Self::new(
            required(ENV_CLOUD_TOKEN)?,
            required(ENV_SITE_ID)?,
            required(ENV_BEAAM_IP)?,
            required(ENV_BEAAM_KEY)?,
        )?;

        if let Some(url) = lookup(ENV_CLOUD_URL).filter(|url| !url.trim().is_empty()) {
            config.cloud_base_url = url.trim_end_matches('/').to_string();
        }
        config.cloud_scan_interval =
            parse_secs_or(lookup(ENV_CLOUD_SCAN_INTERVAL), DEFAULT_SCAN_INTERVAL_CLOUD);
        config.local_scan_interval =
            parse_secs_or(lookup(ENV_LOCAL_SCAN_INTERVAL), DEFAULT_SCAN_INTERVAL_LOCAL);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cloud token", &self.cloud_token),
            ("site id", &self.site_id),
            ("gateway IP", &self.gateway_ip),
            ("gateway key", &self.gateway_key),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{name} must not be empty")));
            }
        }
        for (name, interval) in [
            ("cloud scan interval", self.cloud_scan_interval),
            ("local scan interval", self.local_scan_interval),
        ] {
            if interval.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Base URL of the gateway. A bare IP or host gets `http://` prepended.
    pub fn gateway_url(&self) -> String {
        let ip = self.gateway_ip.trim().trim_end_matches('/');
        if ip.starts_with("http://") || ip.starts_with("https://") {
            ip.to_string()
        } else {
            format!("http://{ip}")
        }
    }
}

/// Parses a whole number of seconds, falling back to `default` when unset, invalid or zero
fn parse_secs_or(val: Option<String>, default: Duration) -> Duration {
    val.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}
