//! Scan configuration loading and validation

use anyhow::{Context, Result};
use chrono::Duration;
use rolewalk_creds::SessionSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Longest access log window, the retention of the event history
pub const MAX_CLOUDTRAIL_HOURS: u64 = 90 * 24;

/// Everything a scan needs besides its starting identities
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    /// Region used for every service client
    #[serde(default = "default_region")]
    pub region: String,

    /// Accounts candidates must belong to; empty means unscoped
    #[serde(default)]
    pub scope: Vec<String>,

    /// Identity chains of this length are not expanded further
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Size of the worker pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// RoleSessionName sent with every AssumeRole call
    #[serde(default = "default_session_name")]
    pub session_name: String,

    /// Run discovery only
    #[serde(default)]
    pub no_assume: bool,

    /// Newline separated role ARNs to try
    #[serde(default)]
    pub role_file: Option<PathBuf>,

    /// Hours of access logs to search, 0 disables the search
    #[serde(default)]
    pub cloudtrail_hours: u64,

    #[serde(default = "default_slice_minutes")]
    pub cloudtrail_slice_minutes: u64,

    /// Refresh every accessible identity this often, 0 disables
    #[serde(default)]
    pub refresh_seconds: u64,

    /// Queue receiving session revocation events
    #[serde(default)]
    pub revocation_queue: Option<String>,

    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

// Default value functions
fn default_region() -> String { "us-east-1".to_string() }
fn default_max_depth() -> usize { 50 }
fn default_workers() -> usize { num_cpus::get().max(1) * 4 }
fn default_session_name() -> String { "rolewalk".to_string() }
fn default_slice_minutes() -> u64 { 20 }
fn default_jitter_fraction() -> f64 { 0.7 }

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            scope: Vec::new(),
            max_depth: default_max_depth(),
            workers: default_workers(),
            session_name: default_session_name(),
            no_assume: false,
            role_file: None,
            cloudtrail_hours: 0,
            cloudtrail_slice_minutes: default_slice_minutes(),
            refresh_seconds: 0,
            revocation_queue: None,
            jitter_fraction: default_jitter_fraction(),
        }
    }
}

impl ScanConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read configuration file {}", path.as_ref().display()))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse configuration file")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            anyhow::bail!("Region must not be empty");
        }

        if self.max_depth == 0 {
            anyhow::bail!("max_depth must be at least 1");
        }

        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }

        // RoleSessionName: 2-64 characters of [\w+=,.@-]
        let name_ok = (2..=64).contains(&self.session_name.len())
            && self
                .session_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "_+=,.@-".contains(c));
        if !name_ok {
            anyhow::bail!("Invalid session_name '{}'", self.session_name);
        }

        for account in self.scope.iter().flat_map(|entry| entry.split(',')).map(str::trim) {
            if account.is_empty() {
                continue;
            }
            if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                anyhow::bail!("Scope entry '{}' is not a 12 digit account id", account);
            }
        }

        if self.cloudtrail_hours > MAX_CLOUDTRAIL_HOURS {
            anyhow::bail!(
                "cloudtrail_hours must be at most {} (90 days), got {}",
                MAX_CLOUDTRAIL_HOURS,
                self.cloudtrail_hours
            );
        }

        if self.cloudtrail_hours > 0 && self.cloudtrail_slice_minutes == 0 {
            anyhow::bail!("cloudtrail_slice_minutes must be at least 1");
        }

        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            anyhow::bail!("jitter_fraction must be between 0.0 and 1.0");
        }

        if let Some(queue) = &self.revocation_queue {
            if queue.trim().is_empty() {
                anyhow::bail!("revocation_queue must not be empty when set");
            }
        }

        Ok(())
    }

    /// Credential settings for starting identities
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            region: self.region.clone(),
            session_name: self.session_name.clone(),
            jitter_fraction: self.jitter_fraction,
            ..SessionSettings::default()
        }
    }

    pub fn cloudtrail_window(&self) -> Duration {
        Duration::hours(self.cloudtrail_hours.min(MAX_CLOUDTRAIL_HOURS) as i64)
    }
}
