//! # VDF-Paced DAG Consensus
//!
//! A consensus core for a fixed process set, some of it Byzantine, that
//! builds a single DAG of messages organized into rounds.
//!
//! ## Design Principles
//!
//! 1. **Rate-limited production**: Every message costs a verifiable delay:
//!    `t_wb` ticks for a well-behaved process, `t_adv` for a Byzantine one.
//!    Consensus power is production rate, nothing else; there are no votes,
//!    no stake, no leader.
//!
//! 2. **Collective outpacing**: The boot-time rate invariant
//!    `|W| * t_adv > |B| * t_wb` guarantees that well-behaved processes
//!    together emit messages faster than the adversary can, so the honest
//!    side of any fork accumulates weight faster.
//!
//! 3. **Chain selection over the DAG**: Agreement is read off the DAG by a
//!    pure algebra over message predecessor sets ("coffers"): consistency
//!    predicates, enumeration of chains anchored at the top round, and a
//!    weight comparison across forked (disjoint) chains.
//!
//! 4. **Acceptance without finality votes**: A message is accepted when it
//!    never sits on the strictly lighter side of a fork between
//!    strongly-consistent chains. Well-behaved processes only ever extend
//!    accepted messages, which keeps their output accepted in turn.
//!
//! ## How It Works
//!
//! ```text
//! Each tick, two phases under a global barrier:
//!   start: processes whose delay period begins sample their local view,
//!          compute the accepted subset, pick the previous-round tip, and
//!          stage a new message (round r, coffer = tip ids)
//!   end:   processes whose delay period ends release the staged message
//!          to broadcast; it is visible to everyone at the next start
//!
//! Well-behaved round r = tick / t_wb. A Byzantine process is free to tag
//! any round in {max seen, max seen + 1} and name any predecessor subset,
//! but it cannot beat the delay.
//! ```
//!
//! ## Module layout
//!
//! - [`dag`] — message model and the append-only DAG store
//! - [`chains`] — the chain-selection algebra and the acceptance rule
//! - [`process`] — the per-process round/tick state machine
//! - [`adversary`] — injectable Byzantine choice oracles for testing

pub mod adversary;
pub mod chains;
pub mod dag;
pub mod process;
