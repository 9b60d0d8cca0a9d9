//! ARN parsing and identity provenance
//!
//! Every graph node is keyed by the canonical ID of its identity: the
//! underlying role ARN for assumed-role sessions, and the ARN unchanged for
//! everything else.

use crate::error::{Result, RolewalkError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Number of colon-delimited fields in a well formed ARN
const ARN_FIELDS: usize = 6;

/// Length of an account ID
const ACCOUNT_ID_LEN: usize = 12;

/// Splits an ARN into its six fields, keeping any colons in the resource part
fn split_arn(arn: &str) -> Result<Vec<&str>> {
    let fields: Vec<&str> = arn.splitn(ARN_FIELDS, ':').collect();
    if fields.len() < ARN_FIELDS {
        return Err(RolewalkError::invalid_identity(format!(
            "expected {} colon-delimited fields: {}",
            ARN_FIELDS, arn
        )));
    }
    if fields[4].len() != ACCOUNT_ID_LEN {
        return Err(RolewalkError::invalid_identity(format!(
            "invalid account id '{}' in {}",
            fields[4], arn
        )));
    }
    Ok(fields)
}

/// Returns the account ID of an ARN
pub fn account_of(arn: &str) -> Result<&str> {
    Ok(split_arn(arn)?[4])
}

/// Normalizes an ARN to the key used for graph nodes
///
/// `arn:aws:sts::111111111111:assumed-role/Foo/sess1` becomes
/// `arn:aws:iam::111111111111:role/Foo`. Other ARNs are returned unchanged.
pub fn canonical_id(arn: &str) -> Result<String> {
    let fields = split_arn(arn)?;
    let mut resource = fields[5].split('/');

    match resource.next() {
        Some("assumed-role") => {
            let name = resource.next().filter(|n| !n.is_empty()).ok_or_else(|| {
                RolewalkError::invalid_identity(format!("assumed-role without a role name: {}", arn))
            })?;
            Ok(format!("arn:{}:iam::{}:role/{}", fields[1], fields[4], name))
        }
        _ => Ok(arn.to_string()),
    }
}

/// Whether `arn` belongs to one of the accounts in `scope`
///
/// An empty scope allows everything. Malformed ARNs are never in scope.
pub fn arn_in_scope(scope: &[String], arn: &str) -> bool {
    if scope.is_empty() {
        return true;
    }
    match account_of(arn) {
        Ok(account) => scope.iter().any(|s| s == account),
        Err(_) => false,
    }
}

/// How an identity was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityKind {
    /// Loaded from a configured starting profile
    Profile,
    /// Obtained through an AssumeRole call
    AssumedRole,
}

/// A principal and the chain of principals used to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Identity {
    #[serde(rename = "Type")]
    pub kind: IdentityKind,
    pub name: String,
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<Identity>>,
}

impl Identity {
    /// Create a root identity, validating the ARN
    pub fn new(kind: IdentityKind, name: impl Into<String>, arn: impl Into<String>) -> Result<Self> {
        let identity = Self {
            kind,
            name: name.into(),
            arn: arn.into(),
            source: None,
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Create an assumed-role identity reached from `parent`
    pub fn assumed_from(parent: &Identity, arn: impl Into<String>) -> Result<Self> {
        let arn = arn.into();
        let mut identity = Self::new(IdentityKind::AssumedRole, arn.clone(), arn)?;
        identity.source = Some(Box::new(parent.clone()));
        Ok(identity)
    }

    /// Check the ARN of this identity and every identity in its chain
    pub fn validate(&self) -> Result<()> {
        split_arn(&self.arn)?;
        if let Some(source) = &self.source {
            source.validate()?;
        }
        Ok(())
    }

    /// Canonical ID used as the graph key
    pub fn id(&self) -> Result<String> {
        canonical_id(&self.arn)
    }

    /// Account this identity lives in
    pub fn account(&self) -> Result<&str> {
        account_of(&self.arn)
    }

    /// Resource type part of the ARN (`role`, `user`, `assumed-role`, ...)
    pub fn resource_type(&self) -> &str {
        self.arn
            .splitn(ARN_FIELDS, ':')
            .nth(5)
            .and_then(|resource| resource.split('/').next())
            .unwrap_or_default()
    }

    /// Role or user name without its path
    pub fn short_name(&self) -> &str {
        let id_tail = self.arn.rsplit('/').next().unwrap_or(&self.arn);
        if self.resource_type() == "assumed-role" {
            // assumed-role/Name/session
            return self.arn.split('/').nth(1).unwrap_or(id_tail);
        }
        id_tail
    }

    /// Canonical IDs from the root identity down to this one
    pub fn path(&self) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = Some(self);
        while let Some(identity) = current {
            path.push(canonical_id(&identity.arn).unwrap_or_else(|_| identity.arn.clone()));
            current = identity.source.as_deref();
        }
        path.reverse();
        path
    }

    /// Number of hops in the provenance chain, counting this identity
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = Some(self);
        while let Some(identity) = current {
            depth += 1;
            current = identity.source.as_deref();
        }
        depth
    }

    /// Whether the provenance chain visits the same identity twice
    pub fn is_recursive(&self) -> bool {
        let mut seen = HashSet::new();
        self.path().into_iter().any(|id| !seen.insert(id))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().join(" -> "))
    }
}
