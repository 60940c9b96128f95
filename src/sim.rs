//! Tick-synchronous simulation of the full process set.
//!
//! The design is globally synchronous: a clock alternates start and end
//! phases and refuses to advance until every process has acknowledged the
//! current phase. This embedding steps processes cooperatively in a single
//! thread, which keeps runs deterministic and keeps the barrier honest:
//! a process that fails to acknowledge surfaces as an error rather than
//! being silently skipped.
//!
//! Messages released in a tick's end phase are delivered to every local
//! view before the next tick's start phase, so all tips are computed from
//! the previous tick's snapshot and broadcast order within a tick is
//! immaterial.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{ClepsydraConfig, ConfigError};
use crate::consensus::adversary::AdversaryOracle;
use crate::consensus::chains::accepted;
use crate::consensus::dag::{Dag, Message, MessageId, ProcessId};
use crate::consensus::process::Process;

/// Phase of the global clock within one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Start,
    End,
}

/// Global tick/phase state with a per-process acknowledgement barrier.
#[derive(Clone, Debug)]
pub struct Clock {
    tick: u64,
    phase: Phase,
    done: BTreeMap<ProcessId, Option<Phase>>,
}

impl Clock {
    pub fn new<I: IntoIterator<Item = ProcessId>>(processes: I) -> Self {
        Clock {
            tick: 0,
            phase: Phase::Start,
            done: processes.into_iter().map(|p| (p, None)).collect(),
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Record that a process finished the current phase.
    pub fn acknowledge(&mut self, process: ProcessId) {
        if let Some(slot) = self.done.get_mut(&process) {
            *slot = Some(self.phase);
        }
    }

    /// Advance to the next phase once every process has acknowledged the
    /// current one; the tick counter bumps on the end-to-start edge.
    /// Returns false, without advancing, while an acknowledgement is
    /// missing.
    pub fn advance(&mut self) -> bool {
        if self.done.values().any(|d| *d != Some(self.phase)) {
            return false;
        }
        self.phase = match self.phase {
            Phase::Start => Phase::End,
            Phase::End => {
                self.tick += 1;
                Phase::Start
            }
        };
        true
    }
}

/// Halting failures surfaced to the host. Everything else stays local as
/// per-process counters.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SimulationError {
    /// The production safety obligation failed for a well-behaved pending
    /// message: either the implementation or the rate assumption is wrong.
    #[error("safety violation at tick {tick}: {process} pending message breaks the predecessor obligation")]
    SafetyViolation { process: ProcessId, tick: u64 },
    /// A process failed to acknowledge a phase; the barrier refuses to
    /// advance.
    #[error("barrier stalled at tick {tick} in {phase:?} phase")]
    BarrierStall { tick: u64, phase: Phase },
}

/// Summary of a completed run.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimReport {
    pub ticks: u64,
    pub total_messages: usize,
    pub well_behaved_messages: usize,
    pub byzantine_messages: usize,
    pub accepted_messages: usize,
    pub deferred_starts: u64,
    pub dropped_messages: u64,
}

/// The full process set under one clock, with an append-only global
/// ledger standing in for the broadcast medium.
pub struct Simulation {
    processes: Vec<Process>,
    clock: Clock,
    ledger: Dag,
    well_behaved_ids: BTreeSet<MessageId>,
}

impl Simulation {
    /// Build a simulation from a validated configuration. Each Byzantine
    /// process draws its choices from the oracle the factory returns for
    /// its id.
    pub fn new<F>(config: &ClepsydraConfig, mut make_oracle: F) -> Result<Self, ConfigError>
    where
        F: FnMut(ProcessId) -> Box<dyn AdversaryOracle>,
    {
        config.validate()?;
        let byzantine = config.byzantine_set();
        let processes: Vec<Process> = config
            .process_set()
            .into_iter()
            .map(|p| {
                if byzantine.contains(&p) {
                    Process::byzantine(p, config.t_adv, make_oracle(p))
                } else {
                    Process::well_behaved(p, config.t_wb)
                }
            })
            .collect();
        let clock = Clock::new(processes.iter().map(Process::id));
        Ok(Simulation {
            processes,
            clock,
            ledger: Dag::new(),
            well_behaved_ids: BTreeSet::new(),
        })
    }

    pub fn tick(&self) -> u64 {
        self.clock.tick()
    }

    /// The global append-only ledger of released messages.
    pub fn ledger(&self) -> &Dag {
        &self.ledger
    }

    /// Ids of every message released by a well-behaved process.
    pub fn well_behaved_ids(&self) -> &BTreeSet<MessageId> {
        &self.well_behaved_ids
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.iter().find(|p| p.id() == id)
    }

    /// The accepted subset of the global ledger.
    pub fn accepted_ledger(&self) -> BTreeSet<MessageId> {
        accepted(&self.ledger)
    }

    /// Advance one full tick: start phase, safety check, end phase, then
    /// delivery of everything released.
    pub fn step_tick(&mut self) -> Result<(), SimulationError> {
        let tick = self.clock.tick();

        for p in &mut self.processes {
            p.tick_start(tick, &self.well_behaved_ids);
            self.clock.acknowledge(p.id());
        }
        if !self.clock.advance() {
            return Err(SimulationError::BarrierStall {
                tick,
                phase: Phase::Start,
            });
        }

        self.check_safety(tick)?;

        let mut released: Vec<(bool, Message)> = Vec::new();
        for p in &mut self.processes {
            let well_behaved = !p.is_byzantine();
            if let Some(msg) = p.tick_end(tick) {
                released.push((well_behaved, msg));
            }
            self.clock.acknowledge(p.id());
        }
        if !self.clock.advance() {
            return Err(SimulationError::BarrierStall {
                tick,
                phase: Phase::End,
            });
        }

        // Broadcast: visible to every view from the next start phase.
        for (well_behaved, msg) in released {
            if self.ledger.insert(msg.clone()).is_ok() && well_behaved {
                self.well_behaved_ids.insert(msg.id);
            }
            for p in &mut self.processes {
                let _ = p.submit_received(msg.clone());
            }
        }
        Ok(())
    }

    /// The production safety obligation, checked at every tick for every
    /// well-behaved pending message.
    fn check_safety(&self, tick: u64) -> Result<(), SimulationError> {
        for p in &self.processes {
            if p.is_byzantine() {
                continue;
            }
            let Some(pending) = p.pending() else {
                continue;
            };
            if pending.round == 0 {
                continue;
            }
            let prev_round = pending.round - 1;
            let well_behaved_prev: BTreeSet<MessageId> = self
                .well_behaved_ids
                .iter()
                .filter(|id| self.ledger.get(id).map(|m| m.round) == Some(prev_round))
                .copied()
                .collect();
            if !p.is_safe(&well_behaved_prev) {
                return Err(SimulationError::SafetyViolation {
                    process: p.id(),
                    tick,
                });
            }
        }
        Ok(())
    }

    /// Run to the tick bound, halting on the first safety failure.
    pub fn run(&mut self, max_tick: u64) -> Result<SimReport, SimulationError> {
        while self.clock.tick() < max_tick {
            self.step_tick()?;
        }
        Ok(self.report())
    }

    pub fn report(&self) -> SimReport {
        let well_behaved = self.well_behaved_ids.len();
        let total = self.ledger.len();
        SimReport {
            ticks: self.clock.tick(),
            total_messages: total,
            well_behaved_messages: well_behaved,
            byzantine_messages: total - well_behaved,
            accepted_messages: self.accepted_ledger().len(),
            deferred_starts: self.processes.iter().map(|p| p.stats().deferred).sum(),
            dropped_messages: self.ledger.dropped()
                + self.processes.iter().map(Process::dropped).sum::<u64>(),
        }
    }
}
