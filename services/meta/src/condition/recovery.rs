//! Compensating actions for conditions that cannot be met.

use tracing::{debug, warn};
use zp_reconcile::{ErrorRecoveryTag, OffsetCondition};

use super::evaluator::ConditionEvaluator;
use crate::update::UpdateTask;

/// What recovery does for a given error tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Nothing to undo.
    Discard,

    /// Set the partition active again.
    Reactivate,

    /// Release one migration credit, then set the partition active again.
    ReleaseAndReactivate,
}

impl RecoveryAction {
    pub fn for_tag(tag: ErrorRecoveryTag) -> Self {
        match tag {
            ErrorRecoveryTag::None => Self::Discard,
            ErrorRecoveryTag::RecoverActive => Self::Reactivate,
            ErrorRecoveryTag::RecoverMigrate => Self::ReleaseAndReactivate,
        }
    }
}

impl ConditionEvaluator {
    /// Recover from an unsatisfiable condition.
    ///
    /// Returns true once the condition is handled; false if the
    /// reactivation update was rejected and the pass should be retried.
    pub async fn recover(&self, condition: &OffsetCondition) -> bool {
        match RecoveryAction::for_tag(condition.error_tag) {
            RecoveryAction::Discard => {
                debug!(
                    table = %condition.table,
                    partition = condition.partition_id,
                    "Discarding condition without recovery"
                );
                true
            }
            RecoveryAction::Reactivate => self.reactivate(condition).await,
            RecoveryAction::ReleaseAndReactivate => {
                self.credits.put_n(1);
                self.reactivate(condition).await
            }
        }
    }

    async fn reactivate(&self, condition: &OffsetCondition) -> bool {
        let task = UpdateTask::set_active(&condition.table, condition.partition_id);
        match self.dispatcher.pending_update(task).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    error = %e,
                    table = %condition.table,
                    partition = condition.partition_id,
                    left = %condition.left,
                    right = %condition.right,
                    "Condition recovery failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use zp_reconcile::ConditionType;

    use super::super::test_support::{condition, Harness};
    use super::*;
    use crate::update::UpdateOp;

    #[test]
    fn test_action_for_tag() {
        assert_eq!(
            RecoveryAction::for_tag(ErrorRecoveryTag::None),
            RecoveryAction::Discard
        );
        assert_eq!(
            RecoveryAction::for_tag(ErrorRecoveryTag::RecoverActive),
            RecoveryAction::Reactivate
        );
        assert_eq!(
            RecoveryAction::for_tag(ErrorRecoveryTag::RecoverMigrate),
            RecoveryAction::ReleaseAndReactivate
        );
    }

    #[tokio::test]
    async fn test_recover_none_is_noop() {
        let mut h = Harness::new(50, 8);
        h.take_credit();
        let cond = condition(ConditionType::Equal, ErrorRecoveryTag::None);

        assert!(h.evaluator.recover(&cond).await);
        assert!(h.drain().is_empty());
        assert_eq!(h.credits.available(), h.credits.limit() - 1);
    }

    #[tokio::test]
    async fn test_recover_active() {
        let mut h = Harness::new(50, 8);
        h.take_credit();
        let cond = condition(ConditionType::Equal, ErrorRecoveryTag::RecoverActive);

        assert!(h.evaluator.recover(&cond).await);
        let applied = h.drain();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].op, UpdateOp::SetActive);
        assert_eq!(applied[0].sargs[0], cond.table);
        assert_eq!(applied[0].iargs[0], i64::from(cond.partition_id));
        assert_eq!(h.credits.available(), h.credits.limit() - 1);
    }

    #[tokio::test]
    async fn test_recover_migrate_releases_one_credit() {
        let mut h = Harness::new(50, 8);
        h.take_credit();
        h.take_credit();
        let cond = condition(ConditionType::CloseToNotEqual, ErrorRecoveryTag::RecoverMigrate);

        assert!(h.evaluator.recover(&cond).await);
        assert_eq!(h.credits.available(), h.credits.limit() - 1);
        assert_eq!(h.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_recover_migrate_releases_even_when_dispatch_fails() {
        let mut h = Harness::new(50, 8);
        h.take_credit();
        h.queue.set_leader(false);
        let cond = condition(ConditionType::CloseToNotEqual, ErrorRecoveryTag::RecoverMigrate);

        assert!(!h.evaluator.recover(&cond).await);
        assert_eq!(h.credits.available(), h.credits.limit());
        assert!(h.drain().is_empty());
    }
}
