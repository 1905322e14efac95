use crate::internal::quota::ROOT_GROUP_NAME;
use crate::{Map, Set};
use std::cell::RefCell;

/// Maps consumer names onto accounting groups.
///
/// A consumer `group.sub.user@domain` belongs to `group.sub` when that group
/// (and all of its ancestors) exist; otherwise it belongs to the root group.
/// Results are cached until the resolver is rebuilt.
#[derive(Debug, Default)]
pub struct GroupResolver {
    factors: Map<String, f64>,
    cache: RefCell<Map<String, String>>,
}

impl GroupResolver {
    /// `groups` lists every configured group with its priority factor
    /// (zero when unset).
    pub fn new(groups: impl IntoIterator<Item = (String, f64)>) -> Self {
        GroupResolver {
            factors: groups.into_iter().collect(),
            cache: Default::default(),
        }
    }

    pub fn is_group(&self, name: &str) -> bool {
        name == ROOT_GROUP_NAME || self.factors.contains_key(name)
    }

    pub fn group_names(&self) -> Set<&str> {
        self.factors.keys().map(|name| name.as_str()).collect()
    }

    /// Configured priority factor of a group, if nonzero.
    pub fn group_factor(&self, group: &str) -> Option<f64> {
        self.factors.get(group).copied().filter(|f| *f > 0.0)
    }

    pub fn resolve(&self, consumer: &str) -> String {
        if let Some(group) = self.cache.borrow().get(consumer) {
            return group.clone();
        }
        let group = self.lookup(consumer);
        self.cache
            .borrow_mut()
            .insert(consumer.to_string(), group.clone());
        group
    }

    fn lookup(&self, consumer: &str) -> String {
        if self.is_group(consumer) {
            return consumer.to_string();
        }
        let user = consumer.split_once('@').map_or(consumer, |(user, _)| user);
        let Some((path, _)) = user.rsplit_once('.') else {
            return ROOT_GROUP_NAME.to_string();
        };
        let mut current = String::new();
        for segment in path.split('.') {
            if !current.is_empty() {
                current.push('.');
            }
            current.push_str(segment);
            if !self.factors.contains_key(&current) {
                log::warn!(
                    "Consumer {consumer} references unknown accounting group {current}, using {ROOT_GROUP_NAME}"
                );
                return ROOT_GROUP_NAME.to_string();
            }
        }
        current
    }
}

/// The group itself followed by all of its dotted ancestors.
pub(crate) fn group_path(group: &str) -> impl Iterator<Item = &str> {
    let mut next = Some(group);
    std::iter::from_fn(move || {
        let current = next?;
        next = current.rsplit_once('.').map(|(parent, _)| parent);
        Some(current)
    })
}
