use crate::internal::ledger::Timestamp;
use crate::internal::ledger::journal::AttrValue;

const ATTR_REMOTE_USER: &str = "RemoteUser";
const ATTR_START_TIME: &str = "StartTime";
const ATTR_SLOT_WEIGHT: &str = "SlotWeight";
const ATTR_CONCURRENCY_LIMITS: &str = "MatchedConcurrencyLimits";

/// An active assignment of one resource to one consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceClaim {
    pub(crate) consumer: String,
    pub(crate) start_time: Timestamp,
    pub(crate) slot_weight: f64,
    pub(crate) concurrency_limits: Option<String>,
}

impl ResourceClaim {
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    pub fn slot_weight(&self) -> f64 {
        self.slot_weight
    }

    pub fn concurrency_limits(&self) -> Option<&str> {
        self.concurrency_limits.as_deref()
    }

    pub(crate) fn attributes(&self) -> Vec<(&'static str, AttrValue)> {
        let mut attributes = vec![
            (ATTR_REMOTE_USER, AttrValue::Text(self.consumer.clone())),
            (ATTR_START_TIME, AttrValue::Int(self.start_time)),
            (ATTR_SLOT_WEIGHT, AttrValue::Float(self.slot_weight)),
        ];
        if let Some(limits) = &self.concurrency_limits {
            attributes.push((ATTR_CONCURRENCY_LIMITS, AttrValue::Text(limits.clone())));
        }
        attributes
    }

    pub(crate) fn apply_attribute(&mut self, name: &str, value: &AttrValue) {
        match name {
            ATTR_REMOTE_USER => {
                self.consumer = value.as_text().unwrap_or_default().to_string();
            }
            ATTR_START_TIME => self.start_time = value.as_i64().unwrap_or(0),
            ATTR_SLOT_WEIGHT => self.slot_weight = value.as_f64().unwrap_or(1.0),
            ATTR_CONCURRENCY_LIMITS => {
                self.concurrency_limits = value.as_text().map(|s| s.to_string());
            }
            _ => log::debug!("Ignoring unknown claim attribute {name}"),
        }
    }
}

impl Default for ResourceClaim {
    fn default() -> Self {
        ResourceClaim {
            consumer: String::new(),
            start_time: 0,
            slot_weight: 1.0,
            concurrency_limits: None,
        }
    }
}
