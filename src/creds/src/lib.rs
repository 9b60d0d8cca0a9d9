//! # rolewalk creds
//!
//! Credential handling for identities stored in the access graph.
//!
//! Every node holds a [`CredentialContext`]. Starting profiles are backed by
//! static credentials; every assumed identity is backed by a
//! [`LazyAssumeProvider`] that re-derives its session through whichever
//! inbound parent currently works, so a revoked or expired path does not cut
//! off an identity that is still reachable another way.
//!
//! ## Example
//!
//! ```ignore
//! let graph = Arc::new(ContextGraph::new());
//! let start = start_identity(service, "default", creds, SessionSettings::default(), &graph).await?;
//! let outcome = start.assume("arn:aws:iam::111111111111:role/admin", None).await?;
//! let fresh = outcome.context.refresh().await?;
//! ```

pub mod context;
pub mod lazy;
pub mod offline;
pub mod profile;
pub mod provider;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use context::{AssumeOutcome, ContextGraph, ContextState, CredentialContext, PersistedContext, SessionSettings};
pub use lazy::LazyAssumeProvider;
pub use offline::OfflineService;
pub use profile::{load_graph, parse_scope, start_identity};
pub use provider::{CredentialProvider, CredentialsCache, ResolveChain, StaticProvider};
