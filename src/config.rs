//! Boot configuration for a clepsydra process set.
//!
//! Loads an optional `clepsydra.toml` from a directory; callers override
//! fields afterwards (CLI flags win). If no config file exists, defaults
//! are used. Validation is separate and fatal: a configuration that
//! violates the production-rate invariant must not boot.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use crate::consensus::dag::ProcessId;
use crate::constants;

/// Top-level configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClepsydraConfig {
    /// Participating process ids.
    pub processes: Vec<u32>,
    /// Subset of `processes` under adversarial control.
    pub byzantine: Vec<u32>,
    /// Delay ticks per well-behaved message.
    pub t_wb: u64,
    /// Delay ticks per Byzantine message.
    pub t_adv: u64,
    /// Tick bound for simulation runs.
    pub max_tick: u64,
}

impl Default for ClepsydraConfig {
    fn default() -> Self {
        ClepsydraConfig {
            processes: vec![0, 1, 2, 3],
            byzantine: vec![3],
            t_wb: constants::DEFAULT_T_WB,
            t_adv: constants::DEFAULT_T_ADV,
            max_tick: constants::DEFAULT_MAX_TICK,
        }
    }
}

impl ClepsydraConfig {
    /// Load configuration from `clepsydra.toml` in the given directory.
    /// Returns `Default` if the file doesn't exist.
    pub fn load(dir: &Path) -> Self {
        let config_path = dir.join(constants::CONFIG_FILE);
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {}, using defaults",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn process_set(&self) -> BTreeSet<ProcessId> {
        self.processes.iter().map(|&p| ProcessId(p)).collect()
    }

    pub fn byzantine_set(&self) -> BTreeSet<ProcessId> {
        self.byzantine.iter().map(|&p| ProcessId(p)).collect()
    }

    pub fn well_behaved_set(&self) -> BTreeSet<ProcessId> {
        self.process_set()
            .difference(&self.byzantine_set())
            .copied()
            .collect()
    }

    /// Fatal boot-time checks, including the production-rate invariant
    /// `|W| * t_adv > |B| * t_wb`: well-behaved collective production must
    /// strictly outpace the adversary, or chain weights mean nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processes.is_empty() {
            return Err(ConfigError::EmptyProcessSet);
        }
        let processes = self.process_set();
        if processes.len() != self.processes.len() {
            return Err(ConfigError::DuplicateProcess);
        }
        if let Some(stray) = self.byzantine.iter().find(|b| !self.processes.contains(b)) {
            return Err(ConfigError::ByzantineNotAProcess(*stray));
        }
        if self.t_wb == 0 || self.t_adv == 0 {
            return Err(ConfigError::NonPositivePeriod);
        }
        let well_behaved = self.well_behaved_set().len() as u64;
        let byzantine = self.byzantine_set().len() as u64;
        if well_behaved == 0 {
            return Err(ConfigError::NoWellBehavedProcess);
        }
        if well_behaved * self.t_adv <= byzantine * self.t_wb {
            return Err(ConfigError::RateInvariant {
                well_behaved,
                byzantine,
                t_wb: self.t_wb,
                t_adv: self.t_adv,
            });
        }
        // TODO(rate-bound): the safe bound may really be
        // |W| * t_adv > 2 * |B| * t_wb; tighten once the analysis settles.
        if well_behaved * self.t_adv <= 2 * byzantine * self.t_wb {
            tracing::warn!(
                well_behaved,
                byzantine,
                t_wb = self.t_wb,
                t_adv = self.t_adv,
                "only the weak rate inequality holds; safety margin is unproven"
            );
        }
        Ok(())
    }
}

/// Fatal configuration errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("process set is empty")]
    EmptyProcessSet,
    #[error("process ids are not unique")]
    DuplicateProcess,
    #[error("byzantine id {0} is not in the process set")]
    ByzantineNotAProcess(u32),
    #[error("every process is byzantine; at least one well-behaved process is required")]
    NoWellBehavedProcess,
    #[error("delay periods must be positive")]
    NonPositivePeriod,
    #[error(
        "rate invariant violated: {well_behaved} well-behaved * t_adv {t_adv} \
         must exceed {byzantine} byzantine * t_wb {t_wb}"
    )]
    RateInvariant {
        well_behaved: u64,
        byzantine: u64,
        t_wb: u64,
        t_adv: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = ClepsydraConfig::default();
        assert_eq!(config.t_wb, constants::DEFAULT_T_WB);
        assert_eq!(config.t_adv, constants::DEFAULT_T_ADV);
        assert!(config.validate().is_ok());
        assert_eq!(config.well_behaved_set().len(), 3);
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
processes = [1, 2, 3]
byzantine = [1]
t_wb = 3
t_adv = 2
max_tick = 40
"#;
        let config: ClepsydraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.processes, vec![1, 2, 3]);
        assert_eq!(config.byzantine, vec![1]);
        assert_eq!(config.t_adv, 2);
        assert_eq!(config.max_tick, 40);
        // 2 * 2 > 1 * 3: the weak inequality holds (with a warning).
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClepsydraConfig::load(dir.path());
        assert_eq!(config.processes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn rate_invariant_rejected() {
        let config = ClepsydraConfig {
            processes: vec![1, 2],
            byzantine: vec![1],
            t_wb: 4,
            t_adv: 2,
            max_tick: 10,
        };
        // 1 * 2 <= 1 * 4: the adversary keeps pace.
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RateInvariant { .. })
        ));
    }

    #[test]
    fn structural_errors_rejected() {
        let mut config = ClepsydraConfig::default();
        config.byzantine = vec![9];
        assert_eq!(config.validate(), Err(ConfigError::ByzantineNotAProcess(9)));

        let mut config = ClepsydraConfig::default();
        config.processes = vec![];
        config.byzantine = vec![];
        assert_eq!(config.validate(), Err(ConfigError::EmptyProcessSet));

        let mut config = ClepsydraConfig::default();
        config.processes = vec![1, 1];
        assert_eq!(config.validate(), Err(ConfigError::DuplicateProcess));

        let mut config = ClepsydraConfig::default();
        config.t_wb = 0;
        assert_eq!(config.validate(), Err(ConfigError::NonPositivePeriod));

        let mut config = ClepsydraConfig::default();
        config.processes = vec![1];
        config.byzantine = vec![1];
        assert_eq!(config.validate(), Err(ConfigError::NoWellBehavedProcess));
    }
}
