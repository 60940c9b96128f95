//! Message model and DAG store for the clepsydra ledger.
//!
//! Messages carry a self-declared round tag and a "coffer" naming their
//! predecessors at the previous round. The store is append-only and keeps a
//! per-round index. A store may be *incomplete*: coffer entries are allowed
//! to dangle (name messages not yet delivered), because the chain algebra
//! must work on partial views. Structural violations that can be detected
//! locally are rejected at insert and counted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a participating process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Unique message identifier: the producing process plus that process's
/// emission counter. The algebra depends only on equality and ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub process: ProcessId,
    pub counter: u64,
}

impl MessageId {
    pub fn new(process: ProcessId, counter: u64) -> Self {
        MessageId { process, counter }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.process, self.counter)
    }
}

/// A message in the DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: MessageId,
    /// Self-declared round tag. Not trusted as true causal depth.
    pub round: u64,
    /// Declared predecessor message ids (the coffer)
    pub coffer: BTreeSet<MessageId>,
}

impl Message {
    pub fn new(id: MessageId, round: u64, coffer: BTreeSet<MessageId>) -> Self {
        Message { id, round, coffer }
    }

    /// A round-0 message: no predecessors by definition.
    pub fn genesis(id: MessageId) -> Self {
        Message {
            id,
            round: 0,
            coffer: BTreeSet::new(),
        }
    }
}

/// Append-only set of messages with a per-round index.
///
/// Messages are immutable once inserted and never removed; a process's
/// local view and the global ledger are both instances of this store.
#[derive(Clone, Debug, Default)]
pub struct Dag {
    messages: BTreeMap<MessageId, Message>,
    by_round: BTreeMap<u64, BTreeSet<MessageId>>,
    dropped: u64,
}

impl Dag {
    pub fn new() -> Self {
        Dag::default()
    }

    /// Insert a message, rejecting structural violations.
    ///
    /// Rejected (and counted as dropped): duplicate ids, round-0 messages
    /// declaring predecessors, and coffer entries whose referenced message
    /// is already present at a round other than `round - 1`. Dangling
    /// coffer entries are tolerated; see [`Dag::is_complete`].
    pub fn insert(&mut self, msg: Message) -> Result<(), MessageError> {
        if let Err(e) = self.validate(&msg) {
            self.dropped += 1;
            return Err(e);
        }
        self.by_round.entry(msg.round).or_default().insert(msg.id);
        self.messages.insert(msg.id, msg);
        Ok(())
    }

    fn validate(&self, msg: &Message) -> Result<(), MessageError> {
        if self.messages.contains_key(&msg.id) {
            return Err(MessageError::DuplicateId(msg.id));
        }
        if msg.round == 0 && !msg.coffer.is_empty() {
            return Err(MessageError::GenesisWithPredecessors(msg.id));
        }
        for pred_id in &msg.coffer {
            if let Some(pred) = self.messages.get(pred_id) {
                if pred.round + 1 != msg.round {
                    return Err(MessageError::PredecessorRoundMismatch {
                        id: msg.id,
                        predecessor: *pred_id,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages rejected at insert since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Highest round tag present, if any.
    pub fn max_round(&self) -> Option<u64> {
        self.by_round.keys().next_back().copied()
    }

    /// Ids of the messages at a round.
    pub fn round_ids(&self, round: u64) -> BTreeSet<MessageId> {
        self.by_round.get(&round).cloned().unwrap_or_default()
    }

    /// All message ids in the store.
    pub fn ids(&self) -> BTreeSet<MessageId> {
        self.messages.keys().copied().collect()
    }

    /// Iterate over all messages in id order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// Whether every coffer entry resolves to a present message at the
    /// previous round. Chain predicates tolerate incomplete views; the
    /// round/tick state machine requires completeness before producing.
    pub fn is_complete(&self) -> bool {
        self.messages.values().all(|m| {
            m.coffer
                .iter()
                .all(|p| self.messages.get(p).is_some_and(|pred| pred.round + 1 == m.round))
        })
    }

    /// A filtered copy containing only messages with round tags up to
    /// `round` inclusive. Used by well-behaved processes to refuse
    /// future-round messages when forming their next message.
    pub fn up_to_round(&self, round: u64) -> Dag {
        let mut out = Dag::new();
        for (r, ids) in self.by_round.range(..=round) {
            out.by_round.insert(*r, ids.clone());
            for id in ids {
                if let Some(m) = self.messages.get(id) {
                    out.messages.insert(*id, m.clone());
                }
            }
        }
        out
    }
}

/// Errors related to DAG messages.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("duplicate message id {0}")]
    DuplicateId(MessageId),
    #[error("round-0 message {0} declares predecessors")]
    GenesisWithPredecessors(MessageId),
    #[error("message {id} names predecessor {predecessor} outside the previous round")]
    PredecessorRoundMismatch {
        id: MessageId,
        predecessor: MessageId,
    },
}
