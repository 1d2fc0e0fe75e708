//! Condition cron.
//!
//! Registered conditions are checked on the delay executor every
//! `interval` until they reach a terminal outcome or the cron is
//! abandoned. There is no backoff and no attempt limit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use zp_reconcile::OffsetCondition;

use super::evaluator::{ConditionEvaluator, EvaluationContext, Outcome};
use super::executor::{DelayExecutor, DelayedHandler, Disposition, ExecutorError};
use crate::migrate::CreditRegister;
use crate::offsets::OffsetSource;
use crate::update::{UpdateDispatcher, UpdateTask};

/// Default delay between two checks of the same condition.
pub const DEFAULT_CONDITION_CRON_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of conditions that may wait in the cron queue.
pub const DEFAULT_CRON_QUEUE_CAPACITY: usize = 65_536;

/// Errors raised by the condition cron lifecycle.
#[derive(Debug, Error)]
pub enum CronError {
    #[error("failed to start condition cron: {0}")]
    Start(#[from] ExecutorError),
}

#[derive(Debug, Clone)]
pub struct ConditionCronConfig {
    /// Delay before the first check and between retries.
    pub interval: Duration,

    /// Maximum offset gap for close-to-not-equal conditions.
    pub stuck_offset_dist: u64,

    /// Maximum number of pending conditions.
    pub queue_capacity: usize,
}

impl Default for ConditionCronConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CONDITION_CRON_INTERVAL,
            stuck_offset_dist: zp_reconcile::DEFAULT_STUCK_OFFSET_DIST,
            queue_capacity: DEFAULT_CRON_QUEUE_CAPACITY,
        }
    }
}

struct CronHandler {
    evaluator: ConditionEvaluator,
    interval: Duration,
}

#[async_trait]
impl DelayedHandler<EvaluationContext> for CronHandler {
    async fn handle(&self, ctx: EvaluationContext) -> Disposition<EvaluationContext> {
        match self.evaluator.evaluate(&ctx).await {
            Outcome::Done => {
                debug!(
                    table = %ctx.condition.table,
                    partition = ctx.condition.partition_id,
                    "Condition cron task finished"
                );
                Disposition::Finished
            }
            Outcome::Retry => Disposition::Reschedule(self.interval, ctx),
        }
    }
}

/// Schedules offset conditions and fires their updates once met.
pub struct ConditionCron {
    executor: DelayExecutor<EvaluationContext, CronHandler>,
    interval: Duration,
}

impl ConditionCron {
    pub fn new(
        config: ConditionCronConfig,
        offsets: Arc<dyn OffsetSource>,
        credits: Arc<dyn CreditRegister>,
        dispatcher: Arc<dyn UpdateDispatcher>,
    ) -> Self {
        let evaluator =
            ConditionEvaluator::new(offsets, credits, dispatcher, config.stuck_offset_dist);
        let handler = CronHandler {
            evaluator,
            interval: config.interval,
        };
        Self {
            executor: DelayExecutor::new("meta-condition", config.queue_capacity, handler),
            interval: config.interval,
        }
    }

    /// Start checking conditions.
    pub fn activate(&self) -> Result<(), CronError> {
        if let Err(e) = self.executor.start() {
            error!(error = %e, "Failed to start meta condition cron");
            return Err(e.into());
        }
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Meta condition cron started"
        );
        Ok(())
    }

    /// Stop checking conditions and drop every pending one.
    ///
    /// A check already in progress finishes first.
    #[instrument(skip(self))]
    pub async fn abandon(&self) {
        self.executor.stop().await;
        let dropped = self.executor.clear();
        info!(dropped, "Meta condition cron abandoned");
    }

    /// Register a condition gating `updates`.
    ///
    /// The first check runs one interval from now.
    pub fn add_cron_task(&self, condition: OffsetCondition, updates: Vec<UpdateTask>) {
        let ctx = EvaluationContext::new(condition, updates);
        if let Err(full) = self.executor.schedule(self.interval, ctx) {
            warn!(
                capacity = full.capacity,
                table = %full.item.condition.table,
                partition = full.item.condition.partition_id,
                left = %full.item.condition.left,
                right = %full.item.condition.right,
                "Condition cron queue full, dropping condition"
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.executor.is_running()
    }

    /// Number of conditions waiting for their next check.
    pub fn pending(&self) -> usize {
        self.executor.pending()
    }
}
