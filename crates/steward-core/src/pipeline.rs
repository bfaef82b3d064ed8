//! Write pipeline stages
//!
//! Every write moves `New -> Authorized -> Validated -> Persisted`, or ends
//! in `Rejected` from any non-terminal stage. Loading the stored entity for
//! an update or delete happens while still `New`.

use steward_model::{EntityKind, WriteAction, WriteError, WriteResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteStage {
    New,
    Authorized,
    Validated,
    Persisted,
    Rejected,
}

impl WriteStage {
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Persisted | Self::Rejected)
    }
}

impl std::fmt::Display for WriteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "New",
            Self::Authorized => "Authorized",
            Self::Validated => "Validated",
            Self::Persisted => "Persisted",
            Self::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

pub fn validate_transition(from: WriteStage, to: WriteStage) -> WriteResult<()> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(WriteError::Internal(format!(
            "illegal write stage transition {from} -> {to}"
        )))
    }
}

#[must_use]
pub fn allowed_transitions(from: WriteStage) -> Vec<WriteStage> {
    use WriteStage::{Authorized, New, Persisted, Rejected, Validated};
    match from {
        New => vec![Authorized, Rejected],
        Authorized => vec![Validated, Rejected],
        Validated => vec![Persisted, Rejected],
        Persisted | Rejected => vec![],
    }
}

/// Current stage of one write
#[derive(Debug)]
pub struct StageTracker {
    kind: EntityKind,
    action: WriteAction,
    stage: WriteStage,
}

impl StageTracker {
    #[must_use]
    pub fn new(kind: EntityKind, action: WriteAction) -> Self {
        Self {
            kind,
            action,
            stage: WriteStage::New,
        }
    }

    #[inline]
    #[must_use]
    pub fn stage(&self) -> WriteStage {
        self.stage
    }

    pub fn advance(&mut self, to: WriteStage) -> WriteResult<()> {
        validate_transition(self.stage, to)?;
        tracing::debug!(kind = %self.kind, action = %self.action, from = %self.stage, to = %to, "write stage");
        self.stage = to;
        Ok(())
    }

    /// Record the failure that ended the write
    pub fn reject(&mut self, error: &WriteError) {
        if self.stage.is_terminal() {
            return;
        }
        if error.is_conflict() {
            tracing::debug!(kind = %self.kind, action = %self.action, stage = %self.stage, %error, "write conflict");
        } else {
            tracing::debug!(kind = %self.kind, action = %self.action, stage = %self.stage, %error, "write rejected");
        }
        self.stage = WriteStage::Rejected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stage() -> impl Strategy<Value = WriteStage> {
        prop_oneof![
            Just(WriteStage::New),
            Just(WriteStage::Authorized),
            Just(WriteStage::Validated),
            Just(WriteStage::Persisted),
            Just(WriteStage::Rejected),
        ]
    }

    #[test]
    fn happy_path() {
        let mut tracker = StageTracker::new(EntityKind::DataOwner, WriteAction::Create);
        tracker.advance(WriteStage::Authorized).unwrap();
        tracker.advance(WriteStage::Validated).unwrap();
        tracker.advance(WriteStage::Persisted).unwrap();
        assert!(tracker.stage().is_terminal());
    }

    #[test]
    fn cannot_persist_without_validation() {
        let mut tracker = StageTracker::new(EntityKind::DeleteAgent, WriteAction::Update);
        tracker.advance(WriteStage::Authorized).unwrap();
        assert!(tracker.advance(WriteStage::Persisted).is_err());
        assert_eq!(tracker.stage(), WriteStage::Authorized);
    }

    #[test]
    fn reject_after_persist_is_ignored() {
        let mut tracker = StageTracker::new(EntityKind::AssetGroup, WriteAction::Create);
        tracker.advance(WriteStage::Authorized).unwrap();
        tracker.advance(WriteStage::Validated).unwrap();
        tracker.advance(WriteStage::Persisted).unwrap();
        tracker.reject(&WriteError::Internal("late".into()));
        assert_eq!(tracker.stage(), WriteStage::Persisted);
    }

    proptest! {
        #[test]
        fn terminal_stages_have_no_exits(from in stage(), to in stage()) {
            if from.is_terminal() {
                prop_assert!(validate_transition(from, to).is_err());
            }
        }

        #[test]
        fn every_live_stage_can_reject(from in stage()) {
            prop_assert_eq!(
                validate_transition(from, WriteStage::Rejected).is_ok(),
                !from.is_terminal()
            );
        }

        #[test]
        fn no_stage_is_skipped_or_revisited(from in stage(), to in stage()) {
            if to != WriteStage::Rejected && validate_transition(from, to).is_ok() {
                let order = |s: WriteStage| s as u8;
                prop_assert_eq!(order(to), order(from) + 1);
            }
        }
    }
}
