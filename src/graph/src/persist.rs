//! Graph persistence
//!
//! Edges are written as plain ID lists, which breaks reference cycles in the
//! wire format. Loading is two-phase: every node is constructed first, then
//! the ID lists are resolved against the fully populated table. Nothing is
//! applied unless both phases succeed.

use crate::graph::{Entry, GraphValue, IdentityGraph};
use rolewalk_core::error::{Result, RolewalkError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Wire form of one node
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PersistedNode<P> {
    pub value: P,
    #[serde(default)]
    pub outbound: Vec<String>,
    #[serde(default)]
    pub inbound: Vec<String>,
}

impl<T: GraphValue> IdentityGraph<T> {
    /// JSON object keyed by canonical ID
    pub fn serialize(&self) -> Result<String> {
        let document: BTreeMap<String, PersistedNode<T::Persisted>> = {
            let nodes = self.nodes.lock();
            nodes
                .iter()
                .map(|(id, entry)| {
                    (
                        id.clone(),
                        PersistedNode {
                            value: entry.value.persist(),
                            outbound: entry.outbound.iter().cloned().collect(),
                            inbound: entry.inbound.iter().cloned().collect(),
                        },
                    )
                })
                .collect()
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Replace the graph contents with a serialized graph
    ///
    /// `restore` rebuilds a value from its persisted form and may fail. Any
    /// failure, including a dangling edge reference or a value whose ID does
    /// not match its key, leaves the current contents untouched.
    pub fn deserialize<F>(&self, blob: &str, mut restore: F) -> Result<()>
    where
        F: FnMut(T::Persisted) -> Result<T>,
    {
        let document: BTreeMap<String, PersistedNode<T::Persisted>> = serde_json::from_str(blob)?;

        // Phase 1: every node, no edges.
        let mut table: HashMap<String, Entry<T>> = HashMap::with_capacity(document.len());
        let mut edges = Vec::with_capacity(document.len());
        for (id, node) in document {
            let value = restore(node.value)?;
            if value.id() != id {
                return Err(RolewalkError::serialization(format!(
                    "node stored under '{}' has id '{}'",
                    id,
                    value.id()
                )));
            }
            table.insert(id.clone(), Entry::new(Arc::new(value)));
            edges.push((id, node.outbound, node.inbound));
        }

        // Phase 2: resolve edge references against the complete table.
        for (id, outbound, inbound) in edges {
            for target in outbound {
                link(&mut table, &id, &target)?;
            }
            for source in inbound {
                link(&mut table, &source, &id)?;
            }
        }

        let count = table.len();
        *self.nodes.lock() = table;
        info!("loaded identity graph with {} nodes", count);
        Ok(())
    }

    /// Write the serialized graph to `path`, readable by the owner only
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let blob = self.serialize()?;
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path.as_ref())?;
        file.write_all(blob.as_bytes())?;
        info!("saved identity graph to {}", path.as_ref().display());
        Ok(())
    }

    /// Replace the graph contents with the graph stored at `path`
    pub fn load<P, F>(&self, path: P, restore: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: FnMut(T::Persisted) -> Result<T>,
    {
        let blob = fs::read_to_string(path.as_ref())?;
        self.deserialize(&blob, restore)
    }
}

fn link<T>(table: &mut HashMap<String, Entry<T>>, from: &str, to: &str) -> Result<()> {
    if from == to {
        return Err(RolewalkError::serialization(format!("self edge on '{}'", from)));
    }
    if !table.contains_key(to) {
        return Err(RolewalkError::serialization(format!(
            "edge {} -> {} references a missing node '{}'",
            from, to, to
        )));
    }
    let from_entry = table.get_mut(from).ok_or_else(|| {
        RolewalkError::serialization(format!(
            "edge {} -> {} references a missing node '{}'",
            from, to, from
        ))
    })?;
    from_entry.outbound.insert(to.to_string());
    if let Some(to_entry) = table.get_mut(to) {
        to_entry.inbound.insert(from.to_string());
    }
    Ok(())
}
