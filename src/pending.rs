use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Spawn,
    Move,
    Swap,
    Merge,
    Mission,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionPhase {
    OptimisticallyApplied,
    AwaitingRemoteAck,
    /// A snapshot older than the action's own write replaced local state.
    Superseded,
    Reconciled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAction {
    pub id: u64,
    pub kind: ActionKind,
    pub phase: ActionPhase,
    pub acked_revision: Option<u64>,
    /// Revision of the first snapshot applied while the write was unacknowledged.
    overwritten_at: Option<u64>,
}

/// Tracks optimistic actions from local apply until a snapshot confirms them.
///
/// Settled actions leave the ledger and only show up in the counters.
#[derive(Debug, Default)]
pub struct PendingLedger {
    actions: BTreeMap<u64, PendingAction>,
    next_id: u64,
    latest_revision: Option<u64>,
    reconciled: u64,
    superseded: u64,
    failed: u64,
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, kind: ActionKind) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.actions.insert(
            id,
            PendingAction {
                id,
                kind,
                phase: ActionPhase::OptimisticallyApplied,
                acked_revision: None,
                overwritten_at: None,
            },
        );
        id
    }

    pub fn mark_in_flight(&mut self, id: u64) {
        if let Some(action) = self.actions.get_mut(&id) {
            action.phase = ActionPhase::AwaitingRemoteAck;
        }
    }

    /// Records the store's acknowledgement. Returns the terminal phase if the
    /// action settled immediately because a covering snapshot was already seen.
    pub fn acknowledge(&mut self, id: u64, revision: u64) -> Option<ActionPhase> {
        let action = self.actions.get_mut(&id)?;
        action.acked_revision = Some(revision);
        if self.latest_revision.is_some_and(|latest| latest >= revision) {
            return self.settle(id);
        }
        None
    }

    /// Drops an action whose write the store refused.
    pub fn fail(&mut self, id: u64) -> Option<PendingAction> {
        let action = self.actions.remove(&id)?;
        self.failed += 1;
        Some(action)
    }

    /// Applies a snapshot revision and settles every action it covers.
    pub fn observe_snapshot(&mut self, revision: u64) -> Vec<(u64, ActionPhase)> {
        self.latest_revision = Some(self.latest_revision.map_or(revision, |r| r.max(revision)));
        let mut covered = Vec::new();
        for action in self.actions.values_mut() {
            match action.acked_revision {
                Some(acked) if acked <= revision => covered.push(action.id),
                Some(_) => {}
                None => {
                    action.overwritten_at.get_or_insert(revision);
                }
            }
        }
        covered
            .into_iter()
            .filter_map(|id| self.settle(id).map(|phase| (id, phase)))
            .collect()
    }

    fn settle(&mut self, id: u64) -> Option<ActionPhase> {
        let action = self.actions.remove(&id)?;
        let acked = action.acked_revision?;
        // The first snapshot after the write may already contain it.
        let clobbered = action.overwritten_at.is_some_and(|seen| seen < acked);
        if clobbered {
            self.superseded += 1;
            Some(ActionPhase::Superseded)
        } else {
            self.reconciled += 1;
            Some(ActionPhase::Reconciled)
        }
    }

    pub fn get(&self, id: u64) -> Option<&PendingAction> {
        self.actions.get(&id)
    }

    pub fn actions(&self) -> impl Iterator<Item = &PendingAction> {
        self.actions.values()
    }

    pub fn in_flight(&self) -> usize {
        self.actions.len()
    }

    pub fn is_idle(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn latest_revision(&self) -> Option<u64> {
        self.latest_revision
    }

    pub fn reconciled(&self) -> u64 {
        self.reconciled
    }

    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_before_ack_covering_own_write_reconciles() {
        let mut ledger = PendingLedger::new();
        let id = ledger.begin(ActionKind::Merge);
        ledger.mark_in_flight(id);
        assert_eq!(
            ledger.get(id).map(|action| action.phase),
            Some(ActionPhase::AwaitingRemoteAck)
        );
        assert!(ledger.observe_snapshot(3).is_empty());
        assert_eq!(ledger.acknowledge(id, 3), Some(ActionPhase::Reconciled));
        assert!(ledger.is_idle());
        assert_eq!(ledger.reconciled(), 1);
        assert_eq!(ledger.superseded(), 0);
    }

    #[test]
    fn ack_waits_for_covering_snapshot() {
        let mut ledger = PendingLedger::new();
        let id = ledger.begin(ActionKind::Spawn);
        ledger.mark_in_flight(id);
        assert_eq!(ledger.acknowledge(id, 7), None);
        assert_eq!(ledger.in_flight(), 1);
        assert!(ledger.observe_snapshot(6).is_empty());
        assert_eq!(ledger.observe_snapshot(7), vec![(id, ActionPhase::Reconciled)]);
    }

    #[test]
    fn older_snapshot_marks_action_superseded() {
        let mut ledger = PendingLedger::new();
        let id = ledger.begin(ActionKind::Merge);
        ledger.mark_in_flight(id);
        ledger.observe_snapshot(5);
        ledger.observe_snapshot(6);
        assert_eq!(ledger.acknowledge(id, 6), Some(ActionPhase::Superseded));
        assert_eq!(ledger.superseded(), 1);
        assert_eq!(ledger.reconciled(), 0);
    }

    #[test]
    fn failed_writes_leave_the_ledger() {
        let mut ledger = PendingLedger::new();
        let first = ledger.begin(ActionKind::Mission);
        let second = ledger.begin(ActionKind::Move);
        assert!(ledger.fail(first).is_some());
        assert!(ledger.fail(first).is_none());
        assert_eq!(ledger.failed(), 1);
        assert_eq!(ledger.actions().map(|action| action.id).collect::<Vec<_>>(), vec![second]);
    }
}
