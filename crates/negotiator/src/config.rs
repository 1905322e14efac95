use std::path::Path;
use std::time::Duration;

use matchmaker::ledger::LedgerConfig;
use matchmaker::negotiation::{NegotiatorConfig, Reconfiguration};
use matchmaker::quota::{GroupConfig, QuotaTreeConfig};
use serde::Deserialize;

use crate::common::error::NegotiatorError;
use crate::server::evaluator::EvaluatorConfig;

pub const INTERVAL_ENV: &str = "NEGOTIATOR_INTERVAL_MS";
pub const CYCLE_DELAY_ENV: &str = "NEGOTIATOR_CYCLE_DELAY_MS";

/// Fully resolved configuration of the daemon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaemonConfig {
    pub negotiator: NegotiatorConfig,
    pub ledger: LedgerConfig,
    pub quota: QuotaTreeConfig,
    pub evaluator: EvaluatorConfig,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    negotiator: NegotiatorSection,
    #[serde(default)]
    accountant: LedgerConfig,
    #[serde(default)]
    quota: QuotaSection,
    #[serde(default, rename = "group")]
    groups: Vec<GroupConfig>,
    #[serde(default)]
    evaluator: EvaluatorConfig,
}

/// Durations are written in humantime form, e.g. `"90s"` or `"1h 30m"`.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NegotiatorSection {
    interval: Option<String>,
    cycle_delay: Option<String>,
    max_time_per_cycle: Option<String>,
    max_time_per_submitter: Option<String>,
    max_time_per_spin: Option<String>,
    max_pie_spins: Option<u32>,
    max_allocation_rounds: Option<u32>,
    consider_preemption: Option<bool>,
    preemption_priority_delta: Option<f64>,
    use_slot_weights: Option<bool>,
    use_job_priority_in_sort: Option<bool>,
    match_list_cache: Option<bool>,
    allow_quota_oversubscription: Option<bool>,
    round_robin_remainders: Option<bool>,
    floor_round: Option<bool>,
    history_size: Option<usize>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct QuotaSection {
    #[serde(default)]
    allow_oversubscription: bool,
    #[serde(default)]
    accept_surplus: bool,
    #[serde(default)]
    autoregroup: bool,
}

fn parse_duration(field: &str, value: &str) -> crate::Result<Duration> {
    humantime::parse_duration(value).map_err(|error| {
        NegotiatorError::ConfigError(format!("Invalid duration '{value}' of {field}: {error}"))
    })
}

fn parse_millis(name: &str, value: &str) -> crate::Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| {
            NegotiatorError::ConfigError(format!(
                "Environment variable {name} must be a number of milliseconds, got '{value}'"
            ))
        })
}

impl NegotiatorSection {
    fn resolve(self) -> crate::Result<NegotiatorConfig> {
        let mut config = NegotiatorConfig::default();
        let durations = [
            ("interval", self.interval, &mut config.interval),
            ("cycle_delay", self.cycle_delay, &mut config.cycle_delay),
            (
                "max_time_per_cycle",
                self.max_time_per_cycle,
                &mut config.max_time_per_cycle,
            ),
            (
                "max_time_per_submitter",
                self.max_time_per_submitter,
                &mut config.max_time_per_submitter,
            ),
            (
                "max_time_per_spin",
                self.max_time_per_spin,
                &mut config.max_time_per_spin,
            ),
        ];
        for (field, value, target) in durations {
            if let Some(value) = value {
                *target = parse_duration(field, &value)?;
            }
        }
        if let Some(value) = self.max_pie_spins {
            config.max_pie_spins = value;
        }
        if let Some(value) = self.max_allocation_rounds {
            config.max_allocation_rounds = value;
        }
        if let Some(value) = self.consider_preemption {
            config.consider_preemption = value;
        }
        if let Some(value) = self.preemption_priority_delta {
            config.preemption_priority_delta = value;
        }
        if let Some(value) = self.use_slot_weights {
            config.use_slot_weights = value;
        }
        if let Some(value) = self.use_job_priority_in_sort {
            config.use_job_priority_in_sort = value;
        }
        if let Some(value) = self.match_list_cache {
            config.match_list_cache = value;
        }
        if let Some(value) = self.allow_quota_oversubscription {
            config.allow_quota_oversubscription = value;
        }
        if let Some(value) = self.round_robin_remainders {
            config.round_robin_remainders = value;
        }
        if let Some(value) = self.floor_round {
            config.floor_round = value;
        }
        if let Some(value) = self.history_size {
            config.history_size = value;
        }
        Ok(config)
    }
}

/// Applies `NEGOTIATOR_INTERVAL_MS` and `NEGOTIATOR_CYCLE_DELAY_MS`.
pub fn apply_env_overrides(
    config: &mut NegotiatorConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> crate::Result<()> {
    if let Some(value) = lookup(INTERVAL_ENV) {
        config.interval = parse_millis(INTERVAL_ENV, &value)?;
        log::debug!("Negotiator interval overridden to {:?}", config.interval);
    }
    if let Some(value) = lookup(CYCLE_DELAY_ENV) {
        config.cycle_delay = parse_millis(CYCLE_DELAY_ENV, &value)?;
        log::debug!("Cycle delay overridden to {:?}", config.cycle_delay);
    }
    Ok(())
}

fn validate(config: &DaemonConfig) -> crate::Result<()> {
    let negotiator = &config.negotiator;
    if negotiator.max_pie_spins == 0 {
        return Err(NegotiatorError::ConfigError(
            "max_pie_spins has to be at least 1".to_string(),
        ));
    }
    if negotiator.preemption_priority_delta.is_nan() || negotiator.preemption_priority_delta < 0.0 {
        return Err(NegotiatorError::ConfigError(format!(
            "preemption_priority_delta has to be non-negative, got {}",
            negotiator.preemption_priority_delta
        )));
    }
    let ledger = &config.ledger;
    if ledger.priority_half_life.is_nan() || ledger.priority_half_life <= 0.0 {
        return Err(NegotiatorError::ConfigError(format!(
            "priority_half_life has to be positive, got {}",
            ledger.priority_half_life
        )));
    }
    if ledger.min_priority.is_nan() || ledger.min_priority <= 0.0 {
        return Err(NegotiatorError::ConfigError(format!(
            "min_priority has to be positive, got {}",
            ledger.min_priority
        )));
    }
    Ok(())
}

impl DaemonConfig {
    pub fn from_toml(text: &str) -> crate::Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        let config = DaemonConfig {
            negotiator: file.negotiator.resolve()?,
            ledger: file.accountant,
            quota: QuotaTreeConfig {
                groups: file.groups,
                allow_oversubscription: file.quota.allow_oversubscription,
                accept_surplus: file.quota.accept_surplus,
                autoregroup: file.quota.autoregroup,
            },
            evaluator: file.evaluator,
        };
        validate(&config)?;
        Ok(config)
    }

    /// Reads the configuration file and applies environment overrides.
    /// Without a file, defaults are used.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut config = match path {
            Some(path) => {
                log::debug!("Loading configuration from {}", path.display());
                let text = std::fs::read_to_string(path).map_err(|error| {
                    NegotiatorError::ConfigError(format!(
                        "Cannot read configuration file {}: {error}",
                        path.display()
                    ))
                })?;
                Self::from_toml(&text)?
            }
            None => DaemonConfig::default(),
        };
        apply_env_overrides(&mut config.negotiator, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn reconfiguration(&self) -> Reconfiguration {
        Reconfiguration {
            negotiator: Some(self.negotiator.clone()),
            ledger: Some(self.ledger.clone()),
            quota: Some(self.quota.clone()),
        }
    }
}
