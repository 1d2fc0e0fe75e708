//! Metadata update tasks and their dispatch queue.
//!
//! Updates are handed to a bounded queue and applied asynchronously by
//! the update applier. Submission never blocks: a full queue or a
//! controller that lost leadership rejects the task.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Metadata operation carried by an update task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateOp {
    UpNode,
    DownNode,
    AddSlave,
    RemoveSlave,
    SetMaster,
    SetActive,
    SetStuck,
    SetSlowdown,
    Handover,
}

impl fmt::Display for UpdateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UpNode => "UpNode",
            Self::DownNode => "DownNode",
            Self::AddSlave => "AddSlave",
            Self::RemoveSlave => "RemoveSlave",
            Self::SetMaster => "SetMaster",
            Self::SetActive => "SetActive",
            Self::SetStuck => "SetStuck",
            Self::SetSlowdown => "SetSlowdown",
            Self::Handover => "Handover",
        };
        f.write_str(name)
    }
}

/// Lazily built human readable summary of a task.
pub type DescribeFn = Arc<dyn Fn() -> String + Send + Sync>;

/// A single metadata state transition.
///
/// String and integer arguments live in fixed ordered slots whose meaning
/// depends on `op`.
#[derive(Clone)]
pub struct UpdateTask {
    pub op: UpdateOp,
    pub sargs: [String; 2],
    pub iargs: [i64; 2],
    description: Option<DescribeFn>,
}

impl UpdateTask {
    pub fn new(op: UpdateOp) -> Self {
        Self {
            op,
            sargs: Default::default(),
            iargs: [0; 2],
            description: None,
        }
    }

    /// Attach a lazily evaluated description.
    pub fn with_description<F>(mut self, describe: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.description = Some(Arc::new(describe));
        self
    }

    /// Partition level task: `sargs[0]` is the table, `iargs[0]` the partition.
    pub fn for_partition(op: UpdateOp, table: &str, partition_id: u32) -> Self {
        let mut task = Self::new(op);
        task.sargs[0] = table.to_string();
        task.iargs[0] = i64::from(partition_id);
        task
    }

    /// Mark a partition active again.
    pub fn set_active(table: &str, partition_id: u32) -> Self {
        let table_name = table.to_string();
        Self::for_partition(UpdateOp::SetActive, table, partition_id).with_description(move || {
            format!(
                "task: SetActive, table: {}, partition: {}",
                table_name, partition_id
            )
        })
    }

    /// Freeze a partition while its replicas converge.
    pub fn set_stuck(table: &str, partition_id: u32) -> Self {
        Self::for_partition(UpdateOp::SetStuck, table, partition_id)
    }

    /// Move the master role of a partition to `node` (`ip:port` in `sargs[1]`).
    pub fn set_master(table: &str, partition_id: u32, node: &zp_reconcile::Node) -> Self {
        let mut task = Self::for_partition(UpdateOp::SetMaster, table, partition_id);
        task.sargs[1] = node.ip.clone();
        task.iargs[1] = i64::from(node.port);
        task
    }

    /// Human readable summary, built on demand.
    pub fn describe(&self) -> String {
        match &self.description {
            Some(describe) => describe(),
            None => format!(
                "task: {}, sargs: [{}, {}], iargs: [{}, {}]",
                self.op, self.sargs[0], self.sargs[1], self.iargs[0], self.iargs[1]
            ),
        }
    }
}

impl fmt::Debug for UpdateTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateTask")
            .field("op", &self.op)
            .field("sargs", &self.sargs)
            .field("iargs", &self.iargs)
            .finish_non_exhaustive()
    }
}

/// Reasons an update submission is rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// The pending update queue is full.
    #[error("update queue full")]
    QueueFull,

    /// This controller is not the leader and may not change metadata.
    #[error("not leader")]
    NotLeader,

    /// The update applier has stopped.
    #[error("update queue closed")]
    Closed,
}

/// Accepts metadata updates for asynchronous application.
#[async_trait]
pub trait UpdateDispatcher: Send + Sync {
    /// Enqueue `task` for application.
    async fn pending_update(&self, task: UpdateTask) -> Result<(), UpdateError>;
}

/// Bounded queue of pending updates.
#[derive(Debug)]
pub struct UpdateQueue {
    tx: mpsc::Sender<UpdateTask>,
    leader: AtomicBool,
}

impl UpdateQueue {
    /// Create a queue holding at most `capacity` pending updates.
    ///
    /// The receiver is handed to the update applier.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<UpdateTask>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                leader: AtomicBool::new(true),
            },
            rx,
        )
    }

    /// Toggle whether this controller currently holds leadership.
    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdateDispatcher for UpdateQueue {
    async fn pending_update(&self, task: UpdateTask) -> Result<(), UpdateError> {
        if !self.is_leader() {
            return Err(UpdateError::NotLeader);
        }
        self.tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => UpdateError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => UpdateError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_active_task() {
        let task = UpdateTask::set_active("users", 3);
        assert_eq!(task.op, UpdateOp::SetActive);
        assert_eq!(task.sargs[0], "users");
        assert_eq!(task.iargs[0], 3);
        assert_eq!(task.describe(), "task: SetActive, table: users, partition: 3");
    }

    #[test]
    fn test_default_description() {
        let task = UpdateTask::set_master("users", 2, &zp_reconcile::Node::new("10.0.0.2", 9221));
        assert_eq!(
            task.describe(),
            "task: SetMaster, sargs: [users, 10.0.0.2], iargs: [2, 9221]"
        );
    }

    #[tokio::test]
    async fn test_queue_rejects_when_full() {
        let (queue, mut rx) = UpdateQueue::new(1);
        queue
            .pending_update(UpdateTask::set_stuck("t", 1))
            .await
            .unwrap();
        assert_eq!(
            queue.pending_update(UpdateTask::set_stuck("t", 2)).await,
            Err(UpdateError::QueueFull)
        );

        let applied = rx.recv().await.unwrap();
        assert_eq!(applied.iargs[0], 1);
        assert!(queue.pending_update(UpdateTask::set_stuck("t", 2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_queue_rejects_when_not_leader_or_closed() {
        let (queue, rx) = UpdateQueue::new(4);
        queue.set_leader(false);
        assert_eq!(
            queue.pending_update(UpdateTask::set_active("t", 1)).await,
            Err(UpdateError::NotLeader)
        );

        queue.set_leader(true);
        drop(rx);
        assert_eq!(
            queue.pending_update(UpdateTask::set_active("t", 1)).await,
            Err(UpdateError::Closed)
        );
    }
}
