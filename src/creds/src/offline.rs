//! Identity service used when inspecting a saved graph without network access

use async_trait::async_trait;
use rolewalk_core::{AssumeRoleRequest, Credentials, IdentityService, Result, Role, RolewalkError};

/// Refuses every call
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineService;

#[async_trait]
impl IdentityService for OfflineService {
    async fn assume_role(&self, request: AssumeRoleRequest) -> Result<Credentials> {
        Err(RolewalkError::service(format!(
            "offline: cannot assume {} as {}",
            request.role_arn, request.caller_arn
        )))
    }

    async fn get_caller_identity(&self, _credentials: &Credentials) -> Result<String> {
        Err(RolewalkError::service("offline: cannot call GetCallerIdentity"))
    }

    async fn list_roles(&self, _credentials: &Credentials, account: &str) -> Result<Vec<Role>> {
        Err(RolewalkError::service(format!("offline: cannot list roles in {}", account)))
    }
}
