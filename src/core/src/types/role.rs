//! Discovered roles and trust-policy external IDs

use crate::worklist::Identifiable;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A candidate role produced by a discovery source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role ARN
    pub arn: String,

    /// URL-encoded trust policy as returned by role listing, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_policy: Option<String>,

    /// External ID set explicitly, overriding the trust policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl Role {
    pub fn new(arn: impl Into<String>) -> Self {
        Self {
            arn: arn.into(),
            trust_policy: None,
            external_id: None,
        }
    }

    pub fn with_trust_policy(mut self, document: impl Into<String>) -> Self {
        self.trust_policy = Some(document.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// External ID `caller_arn` must present to assume this role
    ///
    /// `None` means no external ID condition applies to the caller, including
    /// when no statement names the caller at all. Empty IDs count as none.
    pub fn external_id_for(&self, caller_arn: &str) -> Option<String> {
        if let Some(explicit) = self.external_id.as_deref().filter(|id| !id.is_empty()) {
            return Some(explicit.to_string());
        }
        let document = self.trust_policy.as_deref()?;
        find_external_id(document, caller_arn)
    }
}

impl Identifiable for Role {
    fn id(&self) -> String {
        self.arn.clone()
    }
}

fn find_external_id(document: &str, caller_arn: &str) -> Option<String> {
    let decoded = match percent_decode_str(document).decode_utf8() {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("error url decoding role trust policy: {}", e);
            return None;
        }
    };

    let trust: Value = match serde_json::from_str(&decoded) {
        Ok(trust) => trust,
        Err(e) => {
            warn!("error parsing role trust policy: {}", e);
            return None;
        }
    };

    let statements = match &trust["Statement"] {
        Value::Array(statements) => statements.clone(),
        single @ Value::Object(_) => vec![single.clone()],
        _ => Vec::new(),
    };

    for statement in &statements {
        let principal = &statement["Principal"]["AWS"];
        let names_caller = match principal {
            Value::String(p) => p.contains(caller_arn),
            Value::Array(ps) => ps.iter().filter_map(Value::as_str).any(|p| p.contains(caller_arn)),
            _ => false,
        };
        if !names_caller {
            continue;
        }
        return statement["Condition"]["StringEquals"]["sts:ExternalId"]
            .as_str()
            .filter(|id| !id.is_empty())
            .map(str::to_string);
    }

    None
}
