use crate::Map;
use crate::internal::common::error::MatchmakerError;
use crate::internal::ledger::config::LimitsConfig;
use smallvec::SmallVec;

/// Parsed concurrency-limit specification: `(name, amount)` pairs.
pub type LimitRequest = SmallVec<[(String, f64); 2]>;

/// Parses a comma-separated `name[:amount]` list. Names are lowercased and
/// the amount defaults to one.
pub fn parse_limits(spec: &str) -> crate::Result<LimitRequest> {
    let mut result = LimitRequest::new();
    for item in spec.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (name, amount) = match item.split_once(':') {
            Some((name, amount)) => {
                let amount: f64 = amount.trim().parse().map_err(|_| {
                    MatchmakerError::Evaluation(format!(
                        "Invalid amount in concurrency limit '{item}'"
                    ))
                })?;
                if !amount.is_finite() || amount < 0.0 {
                    return Err(MatchmakerError::Evaluation(format!(
                        "Invalid amount in concurrency limit '{item}'"
                    )));
                }
                (name.trim(), amount)
            }
            None => (item, 1.0),
        };
        if name.is_empty() {
            return Err(MatchmakerError::Evaluation(format!(
                "Empty concurrency limit name in '{spec}'"
            )));
        }
        result.push((name.to_lowercase(), amount));
    }
    Ok(result)
}

/// Current usage of every named concurrency limit.
#[derive(Debug, Default)]
pub struct ConcurrencyLimits {
    config: LimitsConfig,
    counts: Map<String, f64>,
}

impl ConcurrencyLimits {
    pub fn new(config: LimitsConfig) -> Self {
        ConcurrencyLimits {
            config,
            counts: Default::default(),
        }
    }

    pub fn set_config(&mut self, config: LimitsConfig) {
        self.config = config;
    }

    pub fn count(&self, name: &str) -> f64 {
        self.counts.get(name).copied().unwrap_or(0.0)
    }

    /// Maximum of a limit: its own value, then the default of its scope
    /// (text before the last `.`), then the global default.
    pub fn maximum(&self, name: &str) -> f64 {
        if let Some(max) = self.config.maxima.get(name) {
            return *max;
        }
        if let Some((scope, _)) = name.rsplit_once('.') {
            if let Some(max) = self.config.scope_defaults.get(scope) {
                return *max;
            }
        }
        self.config.default_limit
    }

    /// Returns the first limit that would be exceeded by `request`.
    ///
    /// `released` is discounted from the current counts; it holds the limits
    /// of a claim that would be preempted by the request.
    pub fn exceeded_by<'a>(
        &self,
        request: &'a LimitRequest,
        released: Option<&LimitRequest>,
    ) -> Option<&'a str> {
        for (name, amount) in request {
            let mut count = self.count(name);
            if let Some(released) = released {
                count -= released
                    .iter()
                    .filter(|(n, _)| n == name)
                    .map(|(_, a)| *a)
                    .sum::<f64>();
            }
            if count < 0.0 {
                log::warn!("Concurrency limit {name} has negative count {count}");
            }
            let max = self.maximum(name);
            if count + amount > max || count < 0.0 {
                log::debug!("Concurrency limit {name} reached: {count} + {amount} > {max}");
                return Some(name.as_str());
            }
        }
        None
    }

    pub(crate) fn increment(&mut self, request: &LimitRequest) {
        for (name, amount) in request {
            *self.counts.entry(name.clone()).or_insert(0.0) += amount;
        }
    }

    pub(crate) fn decrement(&mut self, request: &LimitRequest) {
        for (name, amount) in request {
            if let Some(count) = self.counts.get_mut(name) {
                *count = (*count - amount).max(0.0);
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.counts.iter().map(|(name, count)| (name.as_str(), *count))
    }
}
