//! # Clepsydra
//!
//! A Byzantine-fault-tolerant DAG consensus core in which message production
//! is paced by verifiable delay functions:
//! - **VDF-paced production** — every process must burn a fixed number of
//!   real-time ticks between messages, bounding the adversary's output rate
//! - **Chain-selection algebra** — consistency predicates, heaviest-chain
//!   and component selection over the message DAG
//! - **Quorum by rate, not by vote** — well-behaved processes collectively
//!   outpace the adversary, and acceptance falls out of chain weights
//! - **Deterministic simulation** — a barrier-synchronized two-phase tick
//!   loop with injectable Byzantine schedules
//!
//! The VDF primitive, network transport, signing and persistence are
//! external collaborators: the core models the delay as a tick period and
//! treats broadcast as an eventually-delivering sink.

pub mod config;
pub mod consensus;
pub mod sim;

/// Protocol constants
pub mod constants {
    /// Default delay ticks per well-behaved message.
    pub const DEFAULT_T_WB: u64 = 3;
    /// Default delay ticks per Byzantine message.
    pub const DEFAULT_T_ADV: u64 = 5;
    /// Default tick bound for simulation runs (`max_tick / t_wb` rounds).
    pub const DEFAULT_MAX_TICK: u64 = 60;
    /// Anchor-layer width above which chain enumeration logs a warning
    /// (enumeration is exponential in the width of the top round).
    pub const ENUMERATION_WARN_WIDTH: usize = 16;
    /// Config file name looked up by `ClepsydraConfig::load`.
    pub const CONFIG_FILE: &str = "clepsydra.toml";
}

pub use config::{ClepsydraConfig, ConfigError};
pub use consensus::dag::{Dag, Message, MessageError, MessageId, ProcessId};
