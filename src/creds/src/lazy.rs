//! On-demand credential resolution through the identity graph

use crate::context::{ContextGraph, CredentialContext};
use crate::provider::{CredentialProvider, ResolveChain};
use async_trait::async_trait;
use parking_lot::Mutex;
use rolewalk_core::{Credentials, ParentFailure, Result, RolewalkError};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Re-derives credentials for one identity by assuming it from whichever
/// inbound parent currently works
///
/// Parents are tried most-recently-successful first, then by ascending ID.
/// Parents already on the resolution chain are skipped, which keeps mutual
/// edges finite.
pub struct LazyAssumeProvider {
    graph: Weak<ContextGraph>,
    target: String,
    external_id: Option<String>,
    last_good: Mutex<Option<String>>,
}

impl LazyAssumeProvider {
    /// Provider for the identity stored under canonical ID `target`
    pub fn new(graph: Weak<ContextGraph>, target: impl Into<String>, external_id: Option<String>) -> Self {
        Self {
            graph,
            target: target.into(),
            external_id,
            last_good: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Parent that produced the most recent successful resolution
    pub fn last_good(&self) -> Option<String> {
        self.last_good.lock().clone()
    }

    fn order(&self, mut parents: Vec<Arc<CredentialContext>>) -> Vec<Arc<CredentialContext>> {
        parents.sort_by(|a, b| a.id().cmp(b.id()));
        if let Some(preferred) = self.last_good() {
            if let Some(pos) = parents.iter().position(|p| p.id() == preferred) {
                let parent = parents.remove(pos);
                parents.insert(0, parent);
            }
        }
        parents
    }
}

#[async_trait]
impl CredentialProvider for LazyAssumeProvider {
    async fn retrieve(&self, chain: &ResolveChain) -> Result<Credentials> {
        let graph = self.graph.upgrade().ok_or(RolewalkError::GraphDropped)?;
        let parents = self.order(graph.parents(&self.target)?);
        drop(graph);

        let mut attempts = Vec::new();
        for parent in parents {
            if chain.contains(parent.id()) {
                debug!("skipping {} for {}: already being resolved", parent.id(), self.target);
                attempts.push(ParentFailure {
                    parent: parent.id().to_string(),
                    error: "already being resolved".to_string(),
                });
                continue;
            }

            match parent
                .assume_credentials(&self.target, self.external_id.clone(), chain)
                .await
            {
                Ok(credentials) => {
                    *self.last_good.lock() = Some(parent.id().to_string());
                    info!("resolved {} through {}", self.target, parent.id());
                    return Ok(credentials);
                }
                Err(e) => {
                    debug!("failed to assume {} from {}: {}", self.target, parent.id(), e);
                    attempts.push(ParentFailure {
                        parent: parent.id().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(RolewalkError::NoWorkingParent {
            target: self.target.clone(),
            attempts,
        })
    }

    fn kind(&self) -> &'static str {
        "assume"
    }
}
