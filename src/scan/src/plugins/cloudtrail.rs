use super::Plugin;
use crate::config::MAX_CLOUDTRAIL_HOURS;
use crate::scheduler::Discovery;
use chrono::{DateTime, Duration, DurationRound, Utc};
use dashmap::DashSet;
use regex::Regex;
use rolewalk_core::{canonical_id, AccessLogSearch, Role};
use rolewalk_creds::CredentialContext;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};

const ROLE_ARN_PATTERN: &str = r"arn:aws:iam::[0-9]{12}:(role|assumed-role)/[-a-zA-Z_0-9+=,.@_/]+";

fn role_arn_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ROLE_ARN_PATTERN).ok()).as_ref()
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlice {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Split the `hours` before `end` into slices of `slice_minutes`
///
/// The range start is truncated to the minute. A trailing remainder shorter
/// than one slice is dropped. Windows longer than [`MAX_CLOUDTRAIL_HOURS`]
/// are cut to that length.
pub fn time_slices(end: DateTime<Utc>, hours: u64, slice_minutes: u64) -> Vec<TimeSlice> {
    let hours = hours.min(MAX_CLOUDTRAIL_HOURS);
    if hours == 0 || slice_minutes == 0 || slice_minutes > hours * 60 {
        return Vec::new();
    }
    let total = Duration::hours(hours as i64);
    let start = end - total;
    let start = start.duration_trunc(Duration::minutes(1)).unwrap_or(start);
    let period = Duration::minutes(slice_minutes as i64);

    (0..(total.num_minutes() / slice_minutes as i64))
        .map(|i| TimeSlice {
            start: start + period * i as i32,
            end: start + period * (i as i32 + 1),
        })
        .collect()
}

/// Every role ARN mentioned in a raw event
fn role_arns_in(event: &str) -> Vec<String> {
    let Some(re) = role_arn_re() else {
        return Vec::new();
    };
    re.find_iter(event)
        .filter_map(|m| canonical_id(m.as_str()).ok())
        .collect()
}

/// Searches AssumeRole events in the access logs of every account
pub struct CloudTrailPlugin {
    search: Option<Arc<dyn AccessLogSearch>>,
    hours: u64,
    slice_minutes: u64,
    covered: DashSet<String>,
}

impl CloudTrailPlugin {
    pub fn new(search: Option<Arc<dyn AccessLogSearch>>, hours: u64, slice_minutes: u64) -> Self {
        Self {
            search,
            hours,
            slice_minutes,
            covered: DashSet::new(),
        }
    }

    pub fn is_covered(&self, account: &str) -> bool {
        self.covered.contains(account)
    }

    async fn search_slice(
        &self,
        search: &dyn AccessLogSearch,
        discovery: &Discovery,
        context: &CredentialContext,
        account: &str,
        slice: TimeSlice,
    ) {
        if discovery.is_cancelled() {
            return;
        }
        let result = match context.credentials().await {
            Ok(credentials) => search.lookup_assume_role_events(&credentials, slice.start, slice.end).await,
            Err(e) => Err(e),
        };
        let events = match result {
            Ok(events) => events,
            Err(e) => {
                error!(
                    "error searching access logs of {} from {} to {}: {}",
                    account, slice.start, slice.end, e
                );
                // let another identity in the account retry
                self.covered.remove(account);
                return;
            }
        };

        for event in &events {
            for arn in role_arns_in(event) {
                if !discovery.in_scope(&arn) {
                    continue;
                }
                if discovery.add_role(Role::new(arn.clone())) {
                    debug!("cloudtrail: found role {}", arn);
                }
            }
        }
    }
}

impl Plugin for CloudTrailPlugin {
    fn name(&self) -> &'static str {
        "cloudtrail"
    }

    fn enabled(&self) -> (bool, String) {
        if self.hours == 0 {
            return (false, "set cloudtrail_hours to search access logs".to_string());
        }
        if self.search.is_none() {
            return (false, "no access log client available".to_string());
        }
        (
            true,
            format!("searching the last {} hours of access logs for additional roles", self.hours),
        )
    }

    fn run(self: Arc<Self>, discovery: &Arc<Discovery>, context: Arc<CredentialContext>) {
        let Some(search) = self.search.clone() else {
            return;
        };
        let account = match context.account() {
            Ok(account) => account.to_string(),
            Err(e) => {
                debug!("not searching access logs for {}: {}", context.id(), e);
                return;
            }
        };
        if !self.covered.insert(account.clone()) {
            return;
        }

        let slices = time_slices(Utc::now(), self.hours, self.slice_minutes);
        info!("searching {} access log slices in {} as {}", slices.len(), account, context.id());
        for slice in slices {
            let plugin = self.clone();
            let search = search.clone();
            let task_discovery = discovery.clone();
            let context = context.clone();
            let account = account.clone();
            discovery.submit(async move {
                plugin
                    .search_slice(search.as_ref(), &task_discovery, &context, &account, slice)
                    .await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_slices_cover_window() {
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap();
        let slices = time_slices(end, 2, 20);
        assert_eq!(slices.len(), 6);
        assert_eq!(slices[0].start, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(slices[5].end, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        for pair in slices.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_time_slices_drop_remainder() {
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(time_slices(end, 1, 25).len(), 2);
        assert!(time_slices(end, 0, 20).is_empty());
        assert!(time_slices(end, 1, 0).is_empty());
        assert!(time_slices(end, 1, 61).is_empty());
    }

    #[test]
    fn test_time_slices_capped_window() {
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let slices = time_slices(end, u64::MAX, 24 * 60);
        assert_eq!(slices.len(), 90);
        assert_eq!(slices[0].start, end - Duration::days(90));
        assert!(time_slices(end, 1, u64::MAX).is_empty());
    }

    #[test]
    fn test_role_arns_in_event() {
        let event = r#"{"eventName":"AssumeRole","userIdentity":{"arn":"arn:aws:sts::111111111111:assumed-role/ops/session"},
            "requestParameters":{"roleArn":"arn:aws:iam::222222222222:role/deploy","roleSessionName":"ci"},
            "resources":[{"ARN":"arn:aws:iam::333333333333:role/path/to/app"},
                {"ARN":"arn:aws:iam::444444444444:assumed-role/admin/alice"}]}"#;
        assert_eq!(
            role_arns_in(event),
            vec![
                "arn:aws:iam::222222222222:role/deploy".to_string(),
                "arn:aws:iam::333333333333:role/path/to/app".to_string(),
                "arn:aws:iam::444444444444:role/admin".to_string(),
            ]
        );
    }

    #[test]
    fn test_enabled_needs_hours_and_client() {
        assert!(!CloudTrailPlugin::new(None, 24, 20).enabled().0);
        let search: Arc<dyn AccessLogSearch> = Arc::new(rolewalk_creds::mocks::MockAccessLog::new());
        assert!(!CloudTrailPlugin::new(Some(search.clone()), 0, 20).enabled().0);
        assert!(CloudTrailPlugin::new(Some(search), 24, 20).enabled().0);
    }
}
