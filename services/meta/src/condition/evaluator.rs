//! One evaluation pass of an offset condition.
//!
//! A pass fetches both offsets fresh, classifies them, and either
//! dispatches the condition's update batch, routes the condition through
//! recovery, or asks to be tried again later.

use std::sync::Arc;

use tracing::{debug, warn};
use zp_reconcile::{classify, OffsetCondition, Verdict};

use crate::migrate::CreditRegister;
use crate::offsets::OffsetSource;
use crate::update::{UpdateDispatcher, UpdateTask};

/// A condition together with the updates it gates.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub condition: OffsetCondition,
    pub updates: Vec<UpdateTask>,
}

impl EvaluationContext {
    pub fn new(condition: OffsetCondition, updates: Vec<UpdateTask>) -> Self {
        Self { condition, updates }
    }
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Terminal; the context is released.
    Done,

    /// Evaluate again on the next tick.
    Retry,
}

impl From<bool> for Outcome {
    fn from(handled: bool) -> Self {
        if handled {
            Self::Done
        } else {
            Self::Retry
        }
    }
}

/// Evaluates offset conditions against the shared collaborators.
#[derive(Clone)]
pub struct ConditionEvaluator {
    pub(super) offsets: Arc<dyn OffsetSource>,
    pub(super) credits: Arc<dyn CreditRegister>,
    pub(super) dispatcher: Arc<dyn UpdateDispatcher>,
    pub(super) stuck_offset_dist: u64,
}

impl ConditionEvaluator {
    pub fn new(
        offsets: Arc<dyn OffsetSource>,
        credits: Arc<dyn CreditRegister>,
        dispatcher: Arc<dyn UpdateDispatcher>,
        stuck_offset_dist: u64,
    ) -> Self {
        Self {
            offsets,
            credits,
            dispatcher,
            stuck_offset_dist,
        }
    }

    pub fn stuck_offset_dist(&self) -> u64 {
        self.stuck_offset_dist
    }

    /// Run one pass over `ctx`.
    pub async fn evaluate(&self, ctx: &EvaluationContext) -> Outcome {
        let condition = &ctx.condition;

        let left = match self
            .offsets
            .get_node_offset(&condition.left, &condition.table, condition.partition_id)
            .await
        {
            Ok(offset) => offset,
            Err(e) => {
                warn!(
                    table = %condition.table,
                    partition = condition.partition_id,
                    left = %condition.left,
                    error = %e,
                    "Condition left offset lookup failed"
                );
                return self.recover(condition).await.into();
            }
        };

        let right = match self
            .offsets
            .get_node_offset(&condition.right, &condition.table, condition.partition_id)
            .await
        {
            Ok(offset) => offset,
            Err(e) => {
                warn!(
                    table = %condition.table,
                    partition = condition.partition_id,
                    right = %condition.right,
                    error = %e,
                    "Condition right offset lookup failed"
                );
                return self.recover(condition).await.into();
            }
        };

        match classify(condition.kind, left, right, self.stuck_offset_dist) {
            Verdict::Met => {}
            Verdict::NotYet => {
                debug!(
                    table = %condition.table,
                    partition = condition.partition_id,
                    kind = %condition.kind,
                    left_offset = %left,
                    right_offset = %right,
                    "Condition not met yet"
                );
                return Outcome::Retry;
            }
            Verdict::Missed => {
                warn!(
                    table = %condition.table,
                    partition = condition.partition_id,
                    left = %condition.left,
                    right = %condition.right,
                    left_offset = %left,
                    right_offset = %right,
                    "Condition missed, recovering"
                );
                return self.recover(condition).await.into();
            }
            Verdict::Unrecognized => {
                warn!(
                    kind = condition.kind.code(),
                    table = %condition.table,
                    partition = condition.partition_id,
                    right = %condition.right,
                    "Unknown condition type"
                );
                return self.recover(condition).await.into();
            }
        }

        self.dispatch_all(condition, &ctx.updates).await
    }

    /// Dispatch the batch in order, stopping at the first rejection.
    async fn dispatch_all(&self, condition: &OffsetCondition, updates: &[UpdateTask]) -> Outcome {
        for update in updates {
            if let Err(e) = self.dispatcher.pending_update(update.clone()).await {
                warn!(
                    error = %e,
                    task = %update.describe(),
                    table = %condition.table,
                    partition = condition.partition_id,
                    left = %condition.left,
                    right = %condition.right,
                    "Pending update on met condition failed"
                );
                return Outcome::Retry;
            }
        }

        debug!(
            table = %condition.table,
            partition = condition.partition_id,
            updates = updates.len(),
            "Condition met, updates dispatched"
        );
        Outcome::Done
    }
}
