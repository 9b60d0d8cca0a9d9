//! # rolewalk graph
//!
//! Concurrent, cycle-tolerant directed graph of identities and the
//! "can assume" edges between them.
//!
//! ## Module Structure
//!
//! ```text
//! graph/
//! ├── graph/    - node table, edges and depth-first traversal
//! ├── persist/  - two-phase JSON load and save
//! └── report/   - text tree and Graphviz DOT rendering
//! ```
//!
//! The graph owns every value in a single table keyed by canonical ID. Edges
//! are ID sets resolved against that table, so mutual edges never form an
//! ownership cycle and serialization only has to write plain strings.

pub mod graph;
pub mod persist;
pub mod report;

pub use graph::{GraphValue, IdentityGraph, Node, TraversalStep};
pub use persist::PersistedNode;
pub use report::{render_dot, render_tree};
