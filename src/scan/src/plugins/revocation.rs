use super::Plugin;
use crate::scheduler::Discovery;
use rolewalk_core::{Credentials, MessageQueue, Result, RolewalkError};
use rolewalk_creds::ContextGraph;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Inline policy the console attaches when revoking active sessions
pub const REVOKE_POLICY_NAME: &str = "AWSRevokeOlderSessions";

const MAX_MESSAGES: u32 = 1;
const WAIT_SECONDS: u32 = 20;
const VISIBILITY_TIMEOUT: u32 = 5;
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// CloudTrail event delivered through EventBridge
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevocationEvent {
    #[serde(rename = "detail-type", default)]
    pub detail_type: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub detail: EventDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub request_parameters: RequestParameters,
    #[serde(default)]
    pub recipient_account_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    pub user_name: Option<String>,
    pub role_name: Option<String>,
    pub policy_name: Option<String>,
}

impl RevocationEvent {
    pub fn parse(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// ARN of the role whose sessions were revoked, if this is a revocation
    pub fn revoked_role(&self) -> Option<String> {
        let detail = &self.detail;
        let params = &detail.request_parameters;
        if detail.event_name != "PutRolePolicy" || params.policy_name.as_deref() != Some(REVOKE_POLICY_NAME) {
            return None;
        }
        let role = params.role_name.as_deref()?;
        Some(format!("arn:aws:iam::{}:role/{}", detail.recipient_account_id, role))
    }
}

/// Refresh the identity a revocation event names
///
/// Returns `Ok(None)` for events that are not revocations.
pub async fn handle_message(graph: &ContextGraph, body: &str) -> Result<Option<Credentials>> {
    let event = RevocationEvent::parse(body)?;
    let Some(arn) = event.revoked_role() else {
        debug!("ignoring {} event", event.detail.event_name);
        return Ok(None);
    };

    let context = graph
        .get(&arn)
        .ok_or_else(|| RolewalkError::node_not_found(arn.clone()))?;
    warn!("sessions of {} were revoked, refreshing", arn);
    let credentials = context.refresh().await?;
    info!("refreshed {} -- {}", arn, credentials.access_key_id);
    Ok(Some(credentials))
}

/// Consume `queue_url` until `cancel` fires
pub async fn consume(
    queue: Arc<dyn MessageQueue>,
    queue_url: String,
    graph: Arc<ContextGraph>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = queue.receive(&queue_url, MAX_MESSAGES, WAIT_SECONDS, VISIBILITY_TIMEOUT) => received,
        };
        let messages = match received {
            Ok(messages) => messages,
            Err(e) => {
                error!("failed receiving message from {}: {}", queue_url, e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_RETRY_DELAY) => continue,
                }
            }
        };

        for message in messages {
            if let Err(e) = queue.delete(&queue_url, &message.receipt_handle).await {
                error!("failed deleting message from {}: {}", queue_url, e);
            }
            if let Err(e) = handle_message(&graph, &message.body).await {
                error!("failed to handle revocation message: {}", e);
            }
        }
    }
    debug!("stopped consuming {}", queue_url);
}

/// Refreshes identities as soon as their sessions are revoked
pub struct RevocationPlugin {
    queue: Option<Arc<dyn MessageQueue>>,
    queue_url: Option<String>,
}

impl RevocationPlugin {
    pub fn new(queue: Option<Arc<dyn MessageQueue>>, queue_url: Option<String>) -> Self {
        Self { queue, queue_url }
    }
}

impl Plugin for RevocationPlugin {
    fn name(&self) -> &'static str {
        "revocation"
    }

    fn enabled(&self) -> (bool, String) {
        match (&self.queue, &self.queue_url) {
            (Some(_), Some(url)) => (true, format!("will refresh on revocation events from {}", url)),
            (None, Some(_)) => (false, "no message queue client available".to_string()),
            _ => (false, "revocation_queue is not set".to_string()),
        }
    }

    fn start(self: Arc<Self>, discovery: &Arc<Discovery>) {
        let (Some(queue), Some(queue_url)) = (self.queue.clone(), self.queue_url.clone()) else {
            return;
        };
        discovery.spawn_background(consume(
            queue,
            queue_url,
            discovery.graph().clone(),
            discovery.cancel_token().clone(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revocation_body(account: &str, role: &str) -> String {
        serde_json::json!({
            "version": "0",
            "detail-type": "AWS API Call via CloudTrail",
            "source": "aws.iam",
            "account": account,
            "detail": {
                "eventName": "PutRolePolicy",
                "requestParameters": {
                    "roleName": role,
                    "policyName": REVOKE_POLICY_NAME,
                    "policyDocument": "{}"
                },
                "recipientAccountId": account
            }
        })
        .to_string()
    }

    #[test]
    fn test_revoked_role() {
        let event = RevocationEvent::parse(&revocation_body("111111111111", "admin")).unwrap();
        assert_eq!(event.detail_type, "AWS API Call via CloudTrail");
        assert_eq!(
            event.revoked_role().as_deref(),
            Some("arn:aws:iam::111111111111:role/admin")
        );
    }

    #[test]
    fn test_other_events_ignored() {
        let other_policy = r#"{"detail":{"eventName":"PutRolePolicy","requestParameters":{"roleName":"admin","policyName":"inline"},"recipientAccountId":"111111111111"}}"#;
        assert!(RevocationEvent::parse(other_policy).unwrap().revoked_role().is_none());

        let other_event = r#"{"detail":{"eventName":"CreateRole","requestParameters":{"roleName":"admin"}}}"#;
        assert!(RevocationEvent::parse(other_event).unwrap().revoked_role().is_none());

        assert!(RevocationEvent::parse("not json").is_err());
    }

    #[tokio::test]
    async fn test_unknown_role_is_an_error() {
        let graph = ContextGraph::new();
        let err = handle_message(&graph, &revocation_body("111111111111", "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, RolewalkError::NodeNotFound(ref id) if id == "arn:aws:iam::111111111111:role/ghost"));

        let ignored = r#"{"detail":{"eventName":"CreateRole"}}"#;
        assert!(handle_message(&graph, ignored).await.unwrap().is_none());
    }

    #[test]
    fn test_enabled_needs_queue_and_client() {
        assert!(!RevocationPlugin::new(None, None).enabled().0);
        assert!(!RevocationPlugin::new(None, Some("q".to_string())).enabled().0);
        let queue: Arc<dyn MessageQueue> = Arc::new(rolewalk_creds::mocks::MockMessageQueue::new());
        assert!(RevocationPlugin::new(Some(queue), Some("q".to_string())).enabled().0);
    }
}
