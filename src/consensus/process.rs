//! Per-process round/tick behaviour.
//!
//! A process alternates two phases per tick. In the start phase of a tick
//! that opens its delay period it samples the local view and stages a
//! pending message; in the end phase of the tick that closes the period it
//! releases that message for broadcast. The pending slot is owned
//! exclusively by its process, and a staged message is immutable until
//! released.

use std::collections::BTreeSet;
use std::fmt;

use crate::consensus::adversary::{AdversaryContext, AdversaryOracle};
use crate::consensus::chains::{accepted, heaviest_consistent_chain, strict_majority, Chain};
use crate::consensus::dag::{Dag, Message, MessageError, MessageId, ProcessId};

/// Behavioural role of a process.
pub enum Role {
    WellBehaved,
    Byzantine(Box<dyn AdversaryOracle>),
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::WellBehaved => write!(f, "WellBehaved"),
            Role::Byzantine(_) => write!(f, "Byzantine"),
        }
    }
}

/// Counters for locally-absorbed anomalies. Recoverable conditions never
/// escalate past the process; these record that they happened.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessStats {
    /// Delay-period starts skipped because the view was not ready.
    pub deferred: u64,
    /// Messages released to broadcast.
    pub released: u64,
}

/// One consensus participant: local view, pending slot, and the VDF-paced
/// production loop.
pub struct Process {
    id: ProcessId,
    role: Role,
    period: u64,
    view: Dag,
    pending: Option<Message>,
    counter: u64,
    stats: ProcessStats,
}

impl Process {
    pub fn well_behaved(id: ProcessId, period: u64) -> Self {
        Self::with_role(id, Role::WellBehaved, period)
    }

    pub fn byzantine(id: ProcessId, period: u64, oracle: Box<dyn AdversaryOracle>) -> Self {
        Self::with_role(id, Role::Byzantine(oracle), period)
    }

    fn with_role(id: ProcessId, role: Role, period: u64) -> Self {
        Process {
            id,
            role,
            period,
            view: Dag::new(),
            pending: None,
            counter: 0,
            stats: ProcessStats::default(),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn is_byzantine(&self) -> bool {
        matches!(self.role, Role::Byzantine(_))
    }

    pub fn stats(&self) -> ProcessStats {
        self.stats
    }

    /// Malformed inbound messages dropped at the view boundary.
    pub fn dropped(&self) -> u64 {
        self.view.dropped()
    }

    pub fn view(&self) -> &Dag {
        &self.view
    }

    pub fn pending(&self) -> Option<&Message> {
        self.pending.as_ref()
    }

    /// Record an inbound broadcast in the local view. Malformed messages
    /// are dropped and counted; the error is returned for observability
    /// but is never fatal.
    pub fn submit_received(&mut self, msg: Message) -> Result<(), MessageError> {
        self.view.insert(msg).inspect_err(|e| {
            tracing::warn!(process = %self.id, error = %e, "dropped malformed message");
        })
    }

    /// Start-phase step. On a tick that opens this process's delay period,
    /// sample the view and stage a pending message.
    ///
    /// `known_well_behaved` is the embedding's knowledge of every message
    /// released by a well-behaved process; a well-behaved view must contain
    /// all of them before producing (eventual delivery is assumed to beat
    /// the delay). A view that is incomplete or missing one defers
    /// production to the next period boundary.
    pub fn tick_start(&mut self, tick: u64, known_well_behaved: &BTreeSet<MessageId>) {
        if tick % self.period != 0 || self.pending.is_some() {
            return;
        }
        let staged = match &mut self.role {
            Role::WellBehaved => {
                stage_well_behaved(&self.view, self.id, self.counter, self.period, tick, known_well_behaved)
            }
            Role::Byzantine(oracle) => Some(stage_byzantine(
                &self.view,
                self.id,
                self.counter,
                tick,
                oracle.as_mut(),
            )),
        };
        match staged {
            Some(msg) => {
                tracing::debug!(process = %self.id, id = %msg.id, round = msg.round, tick, "staged pending message");
                self.pending = Some(msg);
                self.counter += 1;
            }
            None => {
                self.stats.deferred += 1;
                tracing::debug!(process = %self.id, tick, "view not ready, deferring production");
            }
        }
    }

    /// End-phase step. On the tick that closes the delay period, release
    /// the pending message for broadcast and clear the slot.
    pub fn tick_end(&mut self, tick: u64) -> Option<Message> {
        if tick % self.period != self.period - 1 {
            return None;
        }
        let msg = self.pending.take()?;
        self.stats.released += 1;
        tracing::debug!(process = %self.id, id = %msg.id, round = msg.round, tick, "releasing message");
        Some(msg)
    }

    // ── Read-only queries ───────────────────────────────────────────────

    /// The accepted subset of the local view.
    pub fn accepted_view(&self) -> BTreeSet<MessageId> {
        accepted(&self.view)
    }

    /// Deterministic heaviest consistent chain of the local view.
    pub fn heaviest_chain(&self) -> Option<Chain> {
        heaviest_consistent_chain(&self.view)
    }

    /// The production safety obligation: a well-behaved pending message
    /// above round 0 must name every well-behaved message of the previous
    /// round, and those must be a strict majority of its coffer. Vacuous
    /// for Byzantine processes and empty pending slots.
    pub fn is_safe(&self, well_behaved_prev: &BTreeSet<MessageId>) -> bool {
        if self.is_byzantine() {
            return true;
        }
        let Some(m) = &self.pending else {
            return true;
        };
        if m.round == 0 {
            return true;
        }
        well_behaved_prev.iter().all(|id| m.coffer.contains(id))
            && strict_majority(well_behaved_prev.len(), m.coffer.len())
    }
}

/// Build the next well-behaved message, or `None` when the view is not
/// ready. The view is restricted to declared rounds at most the current
/// round, must be complete, and must contain every known well-behaved
/// message; the coffer is the accepted previous-round tip.
fn stage_well_behaved(
    view: &Dag,
    id: ProcessId,
    counter: u64,
    period: u64,
    tick: u64,
    known_well_behaved: &BTreeSet<MessageId>,
) -> Option<Message> {
    let current_round = tick / period;
    let visible = view.up_to_round(current_round);
    if !visible.is_complete() || !known_well_behaved.iter().all(|m| visible.contains(m)) {
        return None;
    }
    let fresh = MessageId::new(id, counter);
    if current_round == 0 {
        return Some(Message::genesis(fresh));
    }
    let accepted_ids = accepted(&visible);
    let tip: BTreeSet<MessageId> = visible
        .round_ids(current_round - 1)
        .into_iter()
        .filter(|m| accepted_ids.contains(m))
        .collect();
    if tip.is_empty() {
        return None;
    }
    Some(Message::new(fresh, current_round, tip))
}

/// Build the next Byzantine message from the oracle's choice, clamped to
/// the legal envelope: a round no further than one past the highest
/// observed, and a coffer drawn from that round's predecessor layer.
fn stage_byzantine(
    view: &Dag,
    id: ProcessId,
    counter: u64,
    tick: u64,
    oracle: &mut dyn AdversaryOracle,
) -> Message {
    let max_seen = view.max_round().unwrap_or(0);
    let choice = oracle.choose(&AdversaryContext {
        tick,
        max_seen_round: max_seen,
        view,
    });
    let round = choice.round.clamp(max_seen, max_seen + 1);
    let coffer: BTreeSet<MessageId> = if round == 0 {
        BTreeSet::new()
    } else {
        choice
            .coffer
            .into_iter()
            .filter(|m| view.get(m).is_some_and(|pred| pred.round + 1 == round))
            .collect()
    };
    Message::new(MessageId::new(id, counter), round, coffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::adversary::{AdversaryChoice, EagerAdversary};

    fn mid(process: u32, counter: u64) -> MessageId {
        MessageId::new(ProcessId(process), counter)
    }

    fn deliver_round(p: &mut Process, round: u64, msgs: &[(u32, u64, &[MessageId])]) {
        for (proc, counter, preds) in msgs {
            p.submit_received(Message::new(
                mid(*proc, *counter),
                round,
                preds.iter().copied().collect(),
            ))
            .unwrap();
        }
    }

    #[test]
    fn well_behaved_round_zero_production() {
        let mut p = Process::well_behaved(ProcessId(1), 3);
        p.tick_start(0, &BTreeSet::new());
        let pending = p.pending().expect("round-0 message staged");
        assert_eq!(pending.round, 0);
        assert!(pending.coffer.is_empty());

        // Released only on the period's closing tick.
        assert!(p.tick_end(0).is_none());
        assert!(p.tick_end(1).is_none());
        let released = p.tick_end(2).expect("released at period end");
        assert_eq!(released.id, mid(1, 0));
        assert!(p.pending().is_none());
        assert_eq!(p.stats().released, 1);
    }

    #[test]
    fn well_behaved_names_accepted_tip() {
        let mut p = Process::well_behaved(ProcessId(1), 3);
        deliver_round(&mut p, 0, &[(1, 0, &[]), (2, 0, &[]), (3, 0, &[])]);

        p.tick_start(3, &[mid(2, 0), mid(3, 0)].into_iter().collect());
        let pending = p.pending().expect("round-1 message staged");
        assert_eq!(pending.round, 1);
        assert_eq!(
            pending.coffer,
            [mid(1, 0), mid(2, 0), mid(3, 0)].into_iter().collect()
        );
        assert!(p.is_safe(&[mid(2, 0), mid(3, 0)].into_iter().collect()));
    }

    #[test]
    fn missing_well_behaved_message_defers() {
        let mut p = Process::well_behaved(ProcessId(1), 3);
        deliver_round(&mut p, 0, &[(1, 0, &[])]);

        // The embedding knows of a well-behaved message this view lacks.
        p.tick_start(3, &[mid(2, 0)].into_iter().collect());
        assert!(p.pending().is_none());
        assert_eq!(p.stats().deferred, 1);
    }

    #[test]
    fn incomplete_view_defers() {
        let mut p = Process::well_behaved(ProcessId(1), 3);
        let dangling = mid(9, 9);
        deliver_round(&mut p, 0, &[(1, 0, &[])]);
        p.submit_received(Message::new(mid(2, 0), 1, [dangling].into_iter().collect()))
            .unwrap();

        p.tick_start(6, &BTreeSet::new());
        assert!(p.pending().is_none());
        assert_eq!(p.stats().deferred, 1);
    }

    #[test]
    fn future_round_tags_are_refused() {
        let mut p = Process::well_behaved(ProcessId(1), 3);
        deliver_round(&mut p, 0, &[(1, 0, &[]), (2, 0, &[])]);
        // A round-9 message is beyond current round 1 and must not block
        // production (its dangling coffer would otherwise fail the
        // completeness check).
        p.submit_received(Message::new(mid(3, 0), 9, [mid(8, 8)].into_iter().collect()))
            .unwrap();

        p.tick_start(3, &BTreeSet::new());
        let pending = p.pending().expect("production ignores future tags");
        assert_eq!(pending.round, 1);
        assert!(!pending.coffer.contains(&mid(3, 0)));
    }

    #[test]
    fn byzantine_choice_is_clamped() {
        struct Outlaw;
        impl AdversaryOracle for Outlaw {
            fn choose(&mut self, ctx: &AdversaryContext<'_>) -> AdversaryChoice {
                AdversaryChoice {
                    round: ctx.max_seen_round + 10,
                    coffer: [mid(9, 9)].into_iter().collect(),
                }
            }
        }

        let mut p = Process::byzantine(ProcessId(4), 2, Box::new(Outlaw));
        deliver_round(&mut p, 0, &[(1, 0, &[])]);
        p.tick_start(0, &BTreeSet::new());
        let pending = p.pending().expect("byzantine always stages");
        // Round clamped to max seen + 1, junk coffer entries filtered.
        assert_eq!(pending.round, 1);
        assert!(pending.coffer.is_empty());
    }

    #[test]
    fn byzantine_is_exempt_from_the_safety_query() {
        let mut p = Process::byzantine(ProcessId(4), 2, Box::new(EagerAdversary));
        deliver_round(&mut p, 0, &[(1, 0, &[]), (2, 0, &[])]);
        p.tick_start(0, &BTreeSet::new());
        assert!(p.is_safe(&[mid(1, 0), mid(2, 0)].into_iter().collect()));
    }

    #[test]
    fn safety_query_detects_missing_predecessor() {
        let mut p = Process::well_behaved(ProcessId(1), 3);
        deliver_round(&mut p, 0, &[(1, 0, &[]), (2, 0, &[])]);
        p.tick_start(3, &BTreeSet::new());
        assert!(p.pending().is_some());

        // A well-behaved round-0 message the coffer does not name.
        let unseen: BTreeSet<MessageId> = [mid(1, 0), mid(2, 0), mid(7, 0)].into_iter().collect();
        assert!(!p.is_safe(&unseen));
    }
}
