//! Runtime CLI configuration loaded from the environment (.env supported).

use std::time::Duration;

use niimbot::SessionConfig;

use super::validation::validate_setting;

/// Printer settings resolved from `NIIMBOT_*` variables, then command-line flags.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub address: String,
    pub model: String,
    pub density: u8,
    /// Luma fraction below which a pixel prints black.
    pub black_point: f32,
    pub connect_timeout_secs: u64,
    pub completion_timeout_secs: u64,
    pub scan_timeout_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            model: "b1".into(),
            density: 3,
            black_point: 0.5,
            connect_timeout_secs: 10,
            completion_timeout_secs: 10,
            scan_timeout_secs: 5,
        }
    }
}

/// Variables read by [`CliConfig::load`].
const KEYS: [&str; 7] = [
    "NIIMBOT_ADDRESS",
    "NIIMBOT_MODEL",
    "NIIMBOT_DENSITY",
    "NIIMBOT_BLACK_POINT",
    "NIIMBOT_CONNECT_TIMEOUT_SECS",
    "NIIMBOT_COMPLETION_TIMEOUT_SECS",
    "NIIMBOT_SCAN_TIMEOUT_SECS",
];

impl CliConfig {
    /// Load configuration from process environment variables.
    pub fn load() -> Result<Self, anyhow::Error> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, rejecting invalid values.
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        for key in KEYS {
            if let Some(value) = lookup(key) {
                validate_setting(key, value.trim())
                    .map_err(|msg| anyhow::anyhow!("{key}={value}: {msg}"))?;
            }
        }

        let g = |key: &str| -> String { lookup(key).map(|v| v.trim().to_string()).unwrap_or_default() };
        let defaults = Self::default();

        Ok(Self {
            address: g("NIIMBOT_ADDRESS"),
            model: {
                let m = g("NIIMBOT_MODEL");
                if m.is_empty() { defaults.model } else { m.to_ascii_lowercase() }
            },
            density: parse_or(&g("NIIMBOT_DENSITY"), defaults.density),
            black_point: parse_or(&g("NIIMBOT_BLACK_POINT"), defaults.black_point),
            connect_timeout_secs: parse_or(
                &g("NIIMBOT_CONNECT_TIMEOUT_SECS"),
                defaults.connect_timeout_secs,
            ),
            completion_timeout_secs: parse_or(
                &g("NIIMBOT_COMPLETION_TIMEOUT_SECS"),
                defaults.completion_timeout_secs,
            ),
            scan_timeout_secs: parse_or(&g("NIIMBOT_SCAN_TIMEOUT_SECS"), defaults.scan_timeout_secs),
        })
    }

    /// Apply command-line overrides, validating them like environment values.
    pub fn apply_overrides(
        &mut self,
        address: Option<String>,
        model: Option<String>,
        density: Option<u8>,
        black_point: Option<f32>,
    ) -> Result<(), anyhow::Error> {
        if let Some(address) = address {
            check("NIIMBOT_ADDRESS", &address)?;
            self.address = address;
        }
        if let Some(model) = model {
            check("NIIMBOT_MODEL", &model)?;
            self.model = model.trim().to_ascii_lowercase();
        }
        if let Some(density) = density {
            check("NIIMBOT_DENSITY", &density.to_string())?;
            self.density = density;
        }
        if let Some(black_point) = black_point {
            check("NIIMBOT_BLACK_POINT", &black_point.to_string())?;
            self.black_point = black_point;
        }
        Ok(())
    }

    /// Address to print to, or an error telling the user how to set one.
    pub fn require_address(&self) -> Result<&str, anyhow::Error> {
        if self.address.is_empty() {
            anyhow::bail!("no printer address: pass --address or set NIIMBOT_ADDRESS");
        }
        Ok(&self.address)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    /// Library session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_completion_timeout(Duration::from_secs(self.completion_timeout_secs))
    }
}

fn check(key: &str, value: &str) -> Result<(), anyhow::Error> {
    validate_setting(key, value).map_err(|msg| anyhow::anyhow!("{value}: {msg}"))
}

fn parse_or<T: std::str::FromStr>(s: &str, default: T) -> T {
    if s.is_empty() {
        return default;
    }
    s.parse().unwrap_or(default)
}
