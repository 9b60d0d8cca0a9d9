//! Shared types for rolewalk

pub mod arn;
pub mod credentials;
pub mod role;

// Re-export commonly used types
pub use arn::{account_of, arn_in_scope, canonical_id, Identity, IdentityKind};
pub use credentials::Credentials;
pub use role::Role;
