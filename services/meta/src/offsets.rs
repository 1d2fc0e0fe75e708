//! Node offset lookup.
//!
//! The offset source is shared process-wide; the in-memory store is fed by
//! node heartbeats and read by the condition cron.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use zp_reconcile::{Node, NodeOffset};

/// Errors returned by offset lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OffsetError {
    /// No offset has been reported for this node and partition.
    #[error("offset not found for {node} {table}/{partition_id}")]
    NotFound {
        node: Node,
        table: String,
        partition_id: u32,
    },
}

/// Source of node replication offsets.
#[async_trait]
pub trait OffsetSource: Send + Sync {
    /// Get the current offset of `node` for one partition.
    async fn get_node_offset(
        &self,
        node: &Node,
        table: &str,
        partition_id: u32,
    ) -> Result<NodeOffset, OffsetError>;
}

type OffsetKey = (Node, String, u32);

/// In-memory offset store keyed by node, table and partition.
#[derive(Debug, Default)]
pub struct InMemoryOffsetStore {
    offsets: RwLock<HashMap<OffsetKey, NodeOffset>>,
}

impl InMemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest offset reported by a node.
    pub fn update_offset(&self, node: &Node, table: &str, partition_id: u32, offset: NodeOffset) {
        let mut offsets = self.offsets.write().unwrap_or_else(|e| e.into_inner());
        offsets.insert((node.clone(), table.to_string(), partition_id), offset);
    }

    /// Forget every offset reported by a node.
    ///
    /// Returns the number of entries removed.
    pub fn remove_node(&self, node: &Node) -> usize {
        let mut offsets = self.offsets.write().unwrap_or_else(|e| e.into_inner());
        let before = offsets.len();
        offsets.retain(|(n, _, _), _| n != node);
        let removed = before - offsets.len();
        debug!(node = %node, removed, "Removed node offsets");
        removed
    }

    pub fn len(&self) -> usize {
        self.offsets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OffsetSource for InMemoryOffsetStore {
    async fn get_node_offset(
        &self,
        node: &Node,
        table: &str,
        partition_id: u32,
    ) -> Result<NodeOffset, OffsetError> {
        let offsets = self.offsets.read().unwrap_or_else(|e| e.into_inner());
        offsets
            .get(&(node.clone(), table.to_string(), partition_id))
            .copied()
            .ok_or_else(|| OffsetError::NotFound {
                node: node.clone(),
                table: table.to_string(),
                partition_id,
            })
    }
}
