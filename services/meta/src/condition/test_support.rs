//! Shared fixtures for condition tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use zp_reconcile::{ConditionType, ErrorRecoveryTag, Node, NodeOffset, OffsetCondition};

use super::evaluator::ConditionEvaluator;
use crate::migrate::MigrateRegister;
use crate::offsets::{InMemoryOffsetStore, OffsetError, OffsetSource};
use crate::update::{UpdateQueue, UpdateTask};

pub fn condition(kind: ConditionType, error_tag: ErrorRecoveryTag) -> OffsetCondition {
    OffsetCondition {
        left: Node::new("10.0.0.1", 9221),
        right: Node::new("10.0.0.2", 9221),
        table: "T".to_string(),
        partition_id: 3,
        kind,
        error_tag,
    }
}

/// Offset source that answers from a store after a fixed delay.
pub struct SlowOffsets {
    inner: Arc<InMemoryOffsetStore>,
    delay: Duration,
    lookups: AtomicUsize,
}

impl SlowOffsets {
    pub fn new(inner: Arc<InMemoryOffsetStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of lookups that have completed.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OffsetSource for SlowOffsets {
    async fn get_node_offset(
        &self,
        node: &Node,
        table: &str,
        partition_id: u32,
    ) -> Result<NodeOffset, OffsetError> {
        tokio::time::sleep(self.delay).await;
        let offset = self.inner.get_node_offset(node, table, partition_id).await;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        offset
    }
}

pub struct Harness {
    pub evaluator: ConditionEvaluator,
    pub offsets: Arc<InMemoryOffsetStore>,
    pub credits: Arc<MigrateRegister>,
    pub queue: Arc<UpdateQueue>,
    pub rx: mpsc::Receiver<UpdateTask>,
}

impl Harness {
    pub fn new(stuck_offset_dist: u64, update_capacity: usize) -> Self {
        let offsets = Arc::new(InMemoryOffsetStore::new());
        let credits = Arc::new(MigrateRegister::new(4));
        let (queue, rx) = UpdateQueue::new(update_capacity);
        let queue = Arc::new(queue);
        let evaluator = ConditionEvaluator::new(
            offsets.clone(),
            credits.clone(),
            queue.clone(),
            stuck_offset_dist,
        );
        Self {
            evaluator,
            offsets,
            credits,
            queue,
            rx,
        }
    }

    pub fn set_offsets(&self, cond: &OffsetCondition, left: NodeOffset, right: NodeOffset) {
        self.offsets
            .update_offset(&cond.left, &cond.table, cond.partition_id, left);
        self.offsets
            .update_offset(&cond.right, &cond.table, cond.partition_id, right);
    }

    /// Occupy one migration slot, as a migration in flight would.
    pub fn take_credit(&self) {
        assert!(self.credits.get_n(1));
    }

    /// Take every update dispatched so far.
    pub fn drain(&mut self) -> Vec<UpdateTask> {
        let mut applied = Vec::new();
        while let Ok(task) = self.rx.try_recv() {
            applied.push(task);
        }
        applied
    }
}
