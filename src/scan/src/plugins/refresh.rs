use super::Plugin;
use crate::scheduler::Discovery;
use rolewalk_creds::CredentialContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Periodically re-derives the credentials of every accessible identity
///
/// A short period keeps sessions alive through revocations when no
/// revocation queue is available.
pub struct RefreshPlugin {
    period: Duration,
}

impl RefreshPlugin {
    pub fn new(seconds: u64) -> Self {
        Self {
            period: Duration::from_secs(seconds),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Plugin for RefreshPlugin {
    fn name(&self) -> &'static str {
        "refresh"
    }

    fn enabled(&self) -> (bool, String) {
        if self.period.is_zero() {
            (false, "refresh_seconds is not set".to_string())
        } else {
            (
                true,
                format!("will refresh credentials every {} seconds", self.period.as_secs()),
            )
        }
    }

    fn run(self: Arc<Self>, discovery: &Arc<Discovery>, context: Arc<CredentialContext>) {
        if self.period.is_zero() {
            return;
        }
        let cancel = discovery.cancel_token().clone();
        let period = self.period;

        discovery.spawn_background(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match context.refresh().await {
                    Ok(credentials) => info!("refresh: {} -- {}", context.id(), credentials.access_key_id),
                    Err(e) => error!("refresh of {} failed: {}", context.id(), e),
                }
            }
        });
    }
}
