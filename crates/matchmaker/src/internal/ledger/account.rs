use crate::internal::ledger::Timestamp;
use crate::internal::ledger::journal::AttrValue;

const ATTR_IS_GROUP: &str = "IsAccountingGroup";
const ATTR_PRIORITY: &str = "Priority";
const ATTR_PRIORITY_FACTOR: &str = "PriorityFactor";
const ATTR_FACTOR_OVERRIDE: &str = "PriorityFactorOverride";
const ATTR_CEILING: &str = "Ceiling";
const ATTR_FLOOR: &str = "Floor";
const ATTR_RESOURCES_USED: &str = "ResourcesUsed";
const ATTR_WEIGHTED_RESOURCES_USED: &str = "WeightedResourcesUsed";
const ATTR_HIER_WEIGHTED_RESOURCES_USED: &str = "HierWeightedResourcesUsed";
const ATTR_UNCHARGED_TIME: &str = "UnchargedTime";
const ATTR_WEIGHTED_UNCHARGED_TIME: &str = "WeightedUnchargedTime";
const ATTR_ACCUMULATED_USAGE: &str = "AccumulatedUsage";
const ATTR_WEIGHTED_ACCUMULATED_USAGE: &str = "WeightedAccumulatedUsage";
const ATTR_BEGIN_USAGE_TIME: &str = "BeginUsageTime";
const ATTR_LAST_USAGE_TIME: &str = "LastUsageTime";

/// Fair-share state of one consumer (or of one accounting group).
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerAccount {
    pub(crate) is_group: bool,
    pub(crate) priority: f64,
    /// Zero until computed.
    pub(crate) priority_factor: f64,
    pub(crate) factor_override: bool,
    pub(crate) ceiling: Option<f64>,
    pub(crate) floor: f64,
    pub(crate) resources_used: u32,
    pub(crate) weighted_resources_used: f64,
    pub(crate) hier_weighted_resources_used: f64,
    pub(crate) uncharged_time: f64,
    pub(crate) weighted_uncharged_time: f64,
    pub(crate) accumulated_usage: f64,
    pub(crate) weighted_accumulated_usage: f64,
    pub(crate) begin_usage_time: Timestamp,
    pub(crate) last_usage_time: Timestamp,
}

impl ConsumerAccount {
    pub(crate) fn new(priority: f64, is_group: bool) -> Self {
        ConsumerAccount {
            is_group,
            priority,
            priority_factor: 0.0,
            factor_override: false,
            ceiling: None,
            floor: 0.0,
            resources_used: 0,
            weighted_resources_used: 0.0,
            hier_weighted_resources_used: 0.0,
            uncharged_time: 0.0,
            weighted_uncharged_time: 0.0,
            accumulated_usage: 0.0,
            weighted_accumulated_usage: 0.0,
            begin_usage_time: 0,
            last_usage_time: 0,
        }
    }

    pub fn is_group(&self) -> bool {
        self.is_group
    }

    /// Stored priority, without the priority factor.
    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn priority_factor(&self) -> f64 {
        self.priority_factor
    }

    pub fn has_factor_override(&self) -> bool {
        self.factor_override
    }

    pub fn ceiling(&self) -> Option<f64> {
        self.ceiling
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    pub fn resources_used(&self) -> u32 {
        self.resources_used
    }

    pub fn weighted_resources_used(&self) -> f64 {
        self.weighted_resources_used
    }

    pub fn hier_weighted_resources_used(&self) -> f64 {
        self.hier_weighted_resources_used
    }

    pub fn uncharged_time(&self) -> f64 {
        self.uncharged_time
    }

    pub fn weighted_uncharged_time(&self) -> f64 {
        self.weighted_uncharged_time
    }

    pub fn accumulated_usage(&self) -> f64 {
        self.accumulated_usage
    }

    pub fn weighted_accumulated_usage(&self) -> f64 {
        self.weighted_accumulated_usage
    }

    pub fn begin_usage_time(&self) -> Timestamp {
        self.begin_usage_time
    }

    pub fn last_usage_time(&self) -> Timestamp {
        self.last_usage_time
    }

    pub(crate) fn attributes(&self) -> Vec<(&'static str, AttrValue)> {
        vec![
            (ATTR_IS_GROUP, AttrValue::Bool(self.is_group)),
            (ATTR_PRIORITY, AttrValue::Float(self.priority)),
            (ATTR_PRIORITY_FACTOR, AttrValue::Float(self.priority_factor)),
            (ATTR_FACTOR_OVERRIDE, AttrValue::Bool(self.factor_override)),
            (ATTR_CEILING, AttrValue::Float(self.ceiling.unwrap_or(-1.0))),
            (ATTR_FLOOR, AttrValue::Float(self.floor)),
            (
                ATTR_RESOURCES_USED,
                AttrValue::Int(self.resources_used as i64),
            ),
            (
                ATTR_WEIGHTED_RESOURCES_USED,
                AttrValue::Float(self.weighted_resources_used),
            ),
            (
                ATTR_HIER_WEIGHTED_RESOURCES_USED,
                AttrValue::Float(self.hier_weighted_resources_used),
            ),
            (ATTR_UNCHARGED_TIME, AttrValue::Float(self.uncharged_time)),
            (
                ATTR_WEIGHTED_UNCHARGED_TIME,
                AttrValue::Float(self.weighted_uncharged_time),
            ),
            (
                ATTR_ACCUMULATED_USAGE,
                AttrValue::Float(self.accumulated_usage),
            ),
            (
                ATTR_WEIGHTED_ACCUMULATED_USAGE,
                AttrValue::Float(self.weighted_accumulated_usage),
            ),
            (ATTR_BEGIN_USAGE_TIME, AttrValue::Int(self.begin_usage_time)),
            (ATTR_LAST_USAGE_TIME, AttrValue::Int(self.last_usage_time)),
        ]
    }

    /// Attributes whose value differs from `before`.
    pub(crate) fn changed_attributes(&self, before: &ConsumerAccount) -> Vec<(&'static str, AttrValue)> {
        self.attributes()
            .into_iter()
            .zip(before.attributes())
            .filter(|((_, new), (_, old))| new != old)
            .map(|(new, _)| new)
            .collect()
    }

    /// Applies one replayed attribute. Unknown attributes are ignored.
    pub(crate) fn apply_attribute(&mut self, name: &str, value: &AttrValue) {
        let float = || value.as_f64().unwrap_or(0.0);
        let int = || value.as_i64().unwrap_or(0);
        match name {
            ATTR_IS_GROUP => self.is_group = value.as_bool().unwrap_or(false),
            ATTR_PRIORITY => self.priority = float(),
            ATTR_PRIORITY_FACTOR => self.priority_factor = float(),
            ATTR_FACTOR_OVERRIDE => self.factor_override = value.as_bool().unwrap_or(false),
            ATTR_CEILING => {
                let ceiling = float();
                self.ceiling = (ceiling >= 0.0).then_some(ceiling);
            }
            ATTR_FLOOR => self.floor = float(),
            ATTR_RESOURCES_USED => self.resources_used = int().max(0) as u32,
            ATTR_WEIGHTED_RESOURCES_USED => self.weighted_resources_used = float(),
            ATTR_HIER_WEIGHTED_RESOURCES_USED => self.hier_weighted_resources_used = float(),
            ATTR_UNCHARGED_TIME => self.uncharged_time = float(),
            ATTR_WEIGHTED_UNCHARGED_TIME => self.weighted_uncharged_time = float(),
            ATTR_ACCUMULATED_USAGE => self.accumulated_usage = float(),
            ATTR_WEIGHTED_ACCUMULATED_USAGE => self.weighted_accumulated_usage = float(),
            ATTR_BEGIN_USAGE_TIME => self.begin_usage_time = int(),
            ATTR_LAST_USAGE_TIME => self.last_usage_time = int(),
            _ => log::debug!("Ignoring unknown account attribute {name}"),
        }
    }
}
