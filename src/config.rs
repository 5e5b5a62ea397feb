//! Configuration for the proxy rotator.

use crate::error::Error;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default number of failures that bans a proxy.
pub const DEFAULT_BAN_THRESHOLD: u32 = 3;
/// Default ban duration.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);
/// Longest ban the smart strategy imposes; longer cooldowns are shortened to it.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);
/// Default timeout for requests routed by the reqwest middleware.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials and address of one proxy provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyProvider {
    /// Provider name, for logging only.
    pub name: String,
    /// Optional user name.
    pub user: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Host name or IP address.
    pub host: String,
    /// Port, kept as text the way providers hand it out.
    pub port: String,
}

impl ProxyProvider {
    /// Create a provider without credentials.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: impl ToString) -> Self {
        Self {
            name: name.into(),
            user: None,
            password: None,
            host: host.into(),
            port: port.to_string(),
        }
    }

    /// Attach credentials to the provider.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }
}

/// How the smart strategy picks among proxies that are not banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationMode {
    /// Walk the pool in order, skipping banned proxies.
    RoundRobin,
    /// Pick uniformly among non-banned proxies.
    #[default]
    Random,
}

impl FromStr for RotationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" | "round-robin" | "roundrobin" => Ok(RotationMode::RoundRobin),
            "random" => Ok(RotationMode::Random),
            other => Err(Error::Misconfigured(format!(
                "unknown rotation mode '{}', expected 'round_robin' or 'random'",
                other
            ))),
        }
    }
}

impl fmt::Display for RotationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationMode::RoundRobin => write!(f, "round_robin"),
            RotationMode::Random => write!(f, "random"),
        }
    }
}

/// Configuration for the proxy rotator.
#[derive(Debug, Clone)]
pub struct RotatorConfig {
    /// Proxy providers, in rotation order.
    pub providers: Vec<ProxyProvider>,
    /// Failures (since the last ban) that trigger a ban. Smart strategy only.
    pub ban_threshold: u32,
    /// How long a ban lasts. Smart strategy only.
    pub cooldown: Duration,
    /// Selection among non-banned proxies. Smart strategy only.
    pub rotation_mode: RotationMode,
    /// Timeout for requests sent through the reqwest middleware.
    pub request_timeout: Duration,
}

impl RotatorConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RotatorConfigBuilder {
        RotatorConfigBuilder::new()
    }
}

/// Builder for `RotatorConfig`.
pub struct RotatorConfigBuilder {
    providers: Vec<ProxyProvider>,
    ban_threshold: Option<u32>,
    cooldown: Option<Duration>,
    rotation_mode: Option<RotationMode>,
    request_timeout: Option<Duration>,
}

impl RotatorConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            ban_threshold: None,
            cooldown: None,
            rotation_mode: None,
            request_timeout: None,
        }
    }

    /// Replace the provider list.
    pub fn providers(mut self, providers: Vec<ProxyProvider>) -> Self {
        self.providers = providers;
        self
    }

    /// Append one provider.
    pub fn provider(mut self, provider: ProxyProvider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Set the number of failures that bans a proxy.
    pub fn ban_threshold(mut self, threshold: u32) -> Self {
        self.ban_threshold = Some(threshold);
        self
    }

    /// Set the ban duration.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Set the ban duration in whole seconds.
    pub fn cooldown_seconds(self, seconds: u64) -> Self {
        self.cooldown(Duration::from_secs(seconds))
    }

    /// Set the rotation mode.
    pub fn rotation_mode(mut self, mode: RotationMode) -> Self {
        self.rotation_mode = Some(mode);
        self
    }

    /// Set the timeout for requests routed by the middleware.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RotatorConfig {
        RotatorConfig {
            providers: self.providers,
            ban_threshold: self.ban_threshold.unwrap_or(DEFAULT_BAN_THRESHOLD),
            cooldown: self.cooldown.unwrap_or(DEFAULT_COOLDOWN),
            rotation_mode: self.rotation_mode.unwrap_or_default(),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl Default for RotatorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
