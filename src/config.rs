use crate::error::{BroadcastError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

/// Load environment variables from a `.env` file in the working directory.
///
/// Missing files are ignored. Read failures are logged and otherwise ignored,
/// since configuration falls back to defaults.
pub fn load_dotenv() {
    if let Err(e) = load_dotenv_from(Path::new(".env")) {
        log::warn!("Failed to read .env: {}", e);
    }
}

/// Load environment variables from `path` with robust parsing.
/// Handles values with spaces without requiring quotes.
///
/// Returns the number of variables set. Variables already present in the
/// environment are left untouched.
pub fn load_dotenv_from(path: &Path) -> Result<usize> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut applied = 0;
    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: called once at startup, before the async runtime spawns threads
            unsafe { std::env::set_var(key, value) };
            applied += 1;
        }
    }
    Ok(applied)
}

/// Split `.env` content into key/value pairs.
fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            if !key.is_empty() {
                pairs.push((key, value));
            }
        }
    }
    pairs
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Sampling period of each simulated source, in milliseconds.
    pub sample_interval_ms: u64,
    /// Latency of the simulated permission prompt, in milliseconds.
    pub permission_delay_ms: u64,
    /// Names of the simulated sources to create.
    pub sources: Vec<String>,
    /// Sources whose permission prompt is answered with a denial.
    pub denied_sources: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            permission_delay_ms: 250,
            sources: vec![
                "motion".to_string(),
                "location".to_string(),
                "screen".to_string(),
            ],
            denied_sources: vec![],
        }
    }
}

impl SimulationConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn permission_delay(&self) -> Duration {
        Duration::from_millis(self.permission_delay_ms)
    }

    /// Whether the named source should be refused permission.
    pub fn is_denied(&self, name: &str) -> bool {
        self.denied_sources.iter().any(|denied| denied == name)
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Override defaults with values from `lookup` (environment-style keys).
    ///
    /// Unparseable numbers are ignored, keeping the previous value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(interval) = lookup("BROADCAST_SAMPLE_INTERVAL_MS")
            && let Ok(ms) = interval.parse()
        {
            self.simulation.sample_interval_ms = ms;
        }
        if let Some(delay) = lookup("BROADCAST_PERMISSION_DELAY_MS")
            && let Ok(ms) = delay.parse()
        {
            self.simulation.permission_delay_ms = ms;
        }
        if let Some(sources) = lookup("BROADCAST_SOURCES") {
            self.simulation.sources = parse_list(&sources);
        }
        if let Some(denied) = lookup("BROADCAST_DENIED_SOURCES") {
            self.simulation.denied_sources = parse_list(&denied);
        }
    }

    /// Reject configurations the simulation cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.simulation.sample_interval_ms == 0 {
            return Err(BroadcastError::InvalidConfig(
                "sample interval must be greater than zero".to_string(),
            ));
        }
        if self.simulation.sources.is_empty() {
            return Err(BroadcastError::InvalidConfig(
                "at least one source is required".to_string(),
            ));
        }
        Ok(())
    }
}
