//! Injectable Byzantine choice oracles.
//!
//! At each of its delay-period starts a Byzantine process is free to
//! declare any round in `{max seen, max seen + 1}` and to name any subset
//! of the known messages at the chosen round's predecessor layer. That
//! existential freedom is exposed as an oracle so tests and the simulator
//! can drive worst-case schedules; the owning process clamps whatever the
//! oracle returns to the legal envelope.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::consensus::dag::{Dag, MessageId};

/// What a Byzantine process knows when its delay period begins.
pub struct AdversaryContext<'a> {
    /// Current global tick.
    pub tick: u64,
    /// Highest round tag observed in the local view (0 for an empty view).
    pub max_seen_round: u64,
    /// The local view of delivered messages.
    pub view: &'a Dag,
}

/// The adversary's declared round and predecessor set.
#[derive(Clone, Debug)]
pub struct AdversaryChoice {
    pub round: u64,
    pub coffer: BTreeSet<MessageId>,
}

/// A Byzantine production schedule.
pub trait AdversaryOracle {
    fn choose(&mut self, ctx: &AdversaryContext<'_>) -> AdversaryChoice;
}

/// Advances the round tag as fast as the delay allows and names the whole
/// predecessor layer: the rate-probe schedule that tries to outrun the
/// well-behaved round counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct EagerAdversary;

impl AdversaryOracle for EagerAdversary {
    fn choose(&mut self, ctx: &AdversaryContext<'_>) -> AdversaryChoice {
        if ctx.view.is_empty() {
            return AdversaryChoice {
                round: 0,
                coffer: BTreeSet::new(),
            };
        }
        let round = ctx.max_seen_round + 1;
        AdversaryChoice {
            coffer: ctx.view.round_ids(round - 1),
            round,
        }
    }
}

/// Stays at the highest observed round and names a single predecessor,
/// alternating ends of the layer across calls: manufactures light forks
/// that the acceptance rule must reject.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForkAdversary {
    flip: bool,
}

impl AdversaryOracle for ForkAdversary {
    fn choose(&mut self, ctx: &AdversaryContext<'_>) -> AdversaryChoice {
        self.flip = !self.flip;
        let round = ctx.max_seen_round;
        if round == 0 {
            return AdversaryChoice {
                round: 0,
                coffer: BTreeSet::new(),
            };
        }
        let layer = ctx.view.round_ids(round - 1);
        let pick = if self.flip {
            layer.iter().next()
        } else {
            layer.iter().next_back()
        };
        AdversaryChoice {
            round,
            coffer: pick.into_iter().copied().collect(),
        }
    }
}

/// Uniformly random legal choices from a seeded generator, for randomized
/// schedule sweeps.
#[derive(Clone, Debug)]
pub struct RandomAdversary {
    rng: StdRng,
}

impl RandomAdversary {
    pub fn seeded(seed: u64) -> Self {
        RandomAdversary {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl AdversaryOracle for RandomAdversary {
    fn choose(&mut self, ctx: &AdversaryContext<'_>) -> AdversaryChoice {
        if ctx.view.is_empty() {
            return AdversaryChoice {
                round: 0,
                coffer: BTreeSet::new(),
            };
        }
        let round = ctx.max_seen_round + u64::from(self.rng.random::<bool>());
        let coffer = if round == 0 {
            BTreeSet::new()
        } else {
            ctx.view
                .round_ids(round - 1)
                .into_iter()
                .filter(|_| self.rng.random_bool(0.6))
                .collect()
        };
        AdversaryChoice { round, coffer }
    }
}
