//! Charge lifecycle as plain data.
//!
//! A charge walks `Authorizing → BalanceChecked → Debited → Recorded →
//! Aggregated → Completed`. Each side effect taken before the settlement
//! record exists registers its [`Compensation`]; if a later step fails the
//! compensations are replayed newest-first and the charge ends `Failed`.
//! Once the record is written the charge is committed and nothing is undone.

use crate::Amount;
use crate::model::{Period, PromoterId, SettlementId, SubjectId, VenueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    Authorizing,
    BalanceChecked,
    Debited,
    Recorded,
    Aggregated,
    Completed,
    Compensating,
    Failed,
}

impl ChargeState {
    /// The happy path, in order.
    pub const FORWARD: [ChargeState; 6] = [
        ChargeState::Authorizing,
        ChargeState::BalanceChecked,
        ChargeState::Debited,
        ChargeState::Recorded,
        ChargeState::Aggregated,
        ChargeState::Completed,
    ];

    /// Funds have left the subject's balance.
    pub fn is_past_debit(self) -> bool {
        matches!(
            self,
            ChargeState::Debited | ChargeState::Recorded | ChargeState::Aggregated
        )
    }

    pub fn can_transition_to(self, next: ChargeState) -> bool {
        use ChargeState::*;
        match (self, next) {
            (Authorizing, BalanceChecked)
            | (BalanceChecked, BalanceChecked)
            | (BalanceChecked, Debited)
            | (Debited, Recorded)
            | (Recorded, Aggregated)
            | (Aggregated, Completed)
            | (Compensating, Failed)
            | (Authorizing, Failed)
            | (BalanceChecked, Failed) => true,
            (from, Compensating) => from.is_past_debit(),
            _ => false,
        }
    }
}

/// Undo action for a side effect taken before the charge committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Return a consumed fee-waiver credit to the venue.
    RestoreWaiver { venue: VenueId },
    /// Credit back a debit.
    Credit { subject: SubjectId, amount: Amount },
}

/// Reporting update applied after the settlement record exists.
///
/// These never compensate; a failed one is queued and replayed later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivedUpdate {
    Volume {
        venue: VenueId,
        period: Period,
        surcharge: Amount,
    },
    Earnings {
        promoter: PromoterId,
        amount: Amount,
        settlement: SettlementId,
    },
}

/// Progress of a single charge.
#[derive(Debug, Clone)]
pub struct Saga {
    state: ChargeState,
    history: Vec<ChargeState>,
    compensations: Vec<Compensation>,
}

impl Default for Saga {
    fn default() -> Self {
        Self::new()
    }
}

impl Saga {
    pub fn new() -> Self {
        Self {
            state: ChargeState::Authorizing,
            history: vec![ChargeState::Authorizing],
            compensations: Vec::new(),
        }
    }

    pub fn state(&self) -> ChargeState {
        self.state
    }

    /// Every state visited, including repeats from conflict retries.
    pub fn history(&self) -> &[ChargeState] {
        &self.history
    }

    pub fn pending_compensations(&self) -> &[Compensation] {
        &self.compensations
    }

    pub fn advance(&mut self, next: ChargeState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal charge transition {:?} -> {next:?}",
            self.state
        );
        self.state = next;
        self.history.push(next);
    }

    pub fn register(&mut self, compensation: Compensation) {
        self.compensations.push(compensation);
    }

    /// The settlement is durable; drop every pending compensation.
    pub fn commit(&mut self) {
        self.compensations.clear();
    }

    /// Take the pending compensations, newest first.
    ///
    /// Moves to `Compensating` if funds were already debited.
    pub fn unwind(&mut self) -> Vec<Compensation> {
        if self.state.is_past_debit() {
            self.advance(ChargeState::Compensating);
        }
        let mut steps = std::mem::take(&mut self.compensations);
        steps.reverse();
        steps
    }

    pub fn fail(&mut self) {
        self.advance(ChargeState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(amount: i64) -> Compensation {
        Compensation::Credit {
            subject: "c1".into(),
            amount: Amount::from_minor(amount),
        }
    }

    #[test]
    fn forward_path_is_legal() {
        for pair in ChargeState::FORWARD.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn compensation_only_reachable_after_debit() {
        assert!(!ChargeState::Authorizing.can_transition_to(ChargeState::Compensating));
        assert!(!ChargeState::BalanceChecked.can_transition_to(ChargeState::Compensating));
        assert!(ChargeState::Debited.can_transition_to(ChargeState::Compensating));
        assert!(ChargeState::Recorded.can_transition_to(ChargeState::Compensating));
        assert!(!ChargeState::Completed.can_transition_to(ChargeState::Compensating));
    }

    #[test]
    fn states_cannot_be_skipped() {
        assert!(!ChargeState::Authorizing.can_transition_to(ChargeState::Debited));
        assert!(!ChargeState::Debited.can_transition_to(ChargeState::Completed));
        assert!(!ChargeState::Failed.can_transition_to(ChargeState::Authorizing));
    }

    #[test]
    fn unwind_after_debit_replays_newest_first() {
        let mut saga = Saga::new();
        saga.advance(ChargeState::BalanceChecked);
        saga.register(Compensation::RestoreWaiver { venue: "v1".into() });
        saga.advance(ChargeState::Debited);
        saga.register(credit(2_000));

        let steps = saga.unwind();
        assert_eq!(
            steps,
            vec![
                credit(2_000),
                Compensation::RestoreWaiver { venue: "v1".into() }
            ]
        );
        assert_eq!(saga.state(), ChargeState::Compensating);
        assert!(saga.pending_compensations().is_empty());

        saga.fail();
        assert_eq!(
            saga.history(),
            &[
                ChargeState::Authorizing,
                ChargeState::BalanceChecked,
                ChargeState::Debited,
                ChargeState::Compensating,
                ChargeState::Failed,
            ]
        );
    }

    #[test]
    fn unwind_before_debit_skips_compensating_state() {
        let mut saga = Saga::new();
        saga.advance(ChargeState::BalanceChecked);
        saga.register(Compensation::RestoreWaiver { venue: "v1".into() });

        let steps = saga.unwind();
        assert_eq!(steps.len(), 1);
        assert_eq!(saga.state(), ChargeState::BalanceChecked);
        saga.fail();
        assert_eq!(saga.state(), ChargeState::Failed);
    }

    #[test]
    fn commit_clears_compensations() {
        let mut saga = Saga::new();
        saga.advance(ChargeState::BalanceChecked);
        saga.advance(ChargeState::Debited);
        saga.register(credit(500));
        saga.advance(ChargeState::Recorded);
        saga.commit();
        assert!(saga.pending_compensations().is_empty());
    }
}
