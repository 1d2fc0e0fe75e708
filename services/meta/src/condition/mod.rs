//! Offset condition cron.
//!
//! The condition cron gates metadata updates on replication progress:
//! - Conditions compare two nodes' offsets for one partition
//! - Each registered condition is re-checked on a fixed interval
//! - Met conditions dispatch their update batch
//! - Unmeetable conditions are routed through recovery
//!
//! All checks run sequentially on a single delay executor worker.

mod cron;
mod delay_queue;
mod evaluator;
mod executor;
mod recovery;

#[cfg(test)]
mod test_support;

pub use cron::{
    ConditionCron, ConditionCronConfig, CronError, DEFAULT_CONDITION_CRON_INTERVAL,
    DEFAULT_CRON_QUEUE_CAPACITY,
};
pub use delay_queue::{DelayQueue, QueueFull};
pub use evaluator::{ConditionEvaluator, EvaluationContext, Outcome};
pub use executor::{DelayExecutor, DelayedHandler, Disposition, ExecutorError};
pub use recovery::RecoveryAction;
