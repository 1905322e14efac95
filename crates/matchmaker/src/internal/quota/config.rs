use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum QuotaSpec {
    /// Absolute amount of the pool.
    Static(f64),
    /// Fraction of whatever the static siblings leave over.
    Dynamic(f64),
}

impl QuotaSpec {
    pub fn value(&self) -> f64 {
        match self {
            QuotaSpec::Static(v) | QuotaSpec::Dynamic(v) => *v,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, QuotaSpec::Static(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupConfig {
    /// Full dotted name, e.g. `physics.hep`.
    pub name: String,
    pub quota: QuotaSpec,
    #[serde(default)]
    pub accept_surplus: Option<bool>,
    #[serde(default)]
    pub autoregroup: Option<bool>,
    /// Zero means "not configured".
    #[serde(default)]
    pub priority_factor: f64,
}

impl GroupConfig {
    pub fn new(name: &str, quota: QuotaSpec) -> Self {
        GroupConfig {
            name: name.to_string(),
            quota,
            accept_surplus: None,
            autoregroup: None,
            priority_factor: 0.0,
        }
    }

    pub fn accept_surplus(mut self, value: bool) -> Self {
        self.accept_surplus = Some(value);
        self
    }

    pub fn autoregroup(mut self, value: bool) -> Self {
        self.autoregroup = Some(value);
        self
    }

    pub fn priority_factor(mut self, value: f64) -> Self {
        self.priority_factor = value;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuotaTreeConfig {
    pub groups: Vec<GroupConfig>,
    pub allow_oversubscription: bool,
    /// Used for groups that do not set `accept_surplus`.
    pub accept_surplus: bool,
    /// Used for groups that do not set `autoregroup`.
    pub autoregroup: bool,
}
