//! Discovery and revocation plugins
//!
//! A plugin gets one `start` call when the scan begins and one `run` call for
//! every identity that becomes accessible. Neither may block: slow work goes
//! to the worker pool through [`Discovery::submit`], long-lived loops through
//! [`Discovery::spawn_background`].

mod cloudtrail;
mod file;
mod list;
mod refresh;
mod revocation;

pub use cloudtrail::{time_slices, CloudTrailPlugin, TimeSlice};
pub use file::{parse_role_file, FilePlugin};
pub use list::ListPlugin;
pub use refresh::RefreshPlugin;
pub use revocation::{consume, handle_message, RevocationEvent, RevocationPlugin, REVOKE_POLICY_NAME};

use crate::config::ScanConfig;
use crate::scheduler::Discovery;
use rolewalk_core::{AccessLogSearch, MessageQueue};
use rolewalk_creds::CredentialContext;
use std::sync::Arc;

/// A source of candidate roles or credential refreshes
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the plugin should run, with a reason for the log
    fn enabled(&self) -> (bool, String);

    /// Called once before any identity is registered
    fn start(self: Arc<Self>, _discovery: &Arc<Discovery>) {}

    /// Called for every accessible identity, including ones registered
    /// before the plugin subscribed
    fn run(self: Arc<Self>, _discovery: &Arc<Discovery>, _context: Arc<CredentialContext>) {}
}

/// Every plugin, configured from `config`
///
/// Plugins needing a client that was not supplied report themselves
/// disabled.
pub fn default_plugins(
    config: &ScanConfig,
    access_log: Option<Arc<dyn AccessLogSearch>>,
    queue: Option<Arc<dyn MessageQueue>>,
) -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(ListPlugin::new()),
        Arc::new(FilePlugin::new(config.role_file.clone())),
        Arc::new(CloudTrailPlugin::new(
            access_log,
            config.cloudtrail_hours,
            config.cloudtrail_slice_minutes,
        )),
        Arc::new(RefreshPlugin::new(config.refresh_seconds)),
        Arc::new(RevocationPlugin::new(queue, config.revocation_queue.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plugins_enablement() {
        let plugins = default_plugins(&ScanConfig::default(), None, None);
        let enabled: Vec<&str> = plugins
            .iter()
            .filter(|p| p.enabled().0)
            .map(|p| p.name())
            .collect();
        assert_eq!(enabled, vec!["list"]);

        let names: Vec<&str> = plugins.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["list", "file", "cloudtrail", "refresh", "revocation"]);
    }
}
