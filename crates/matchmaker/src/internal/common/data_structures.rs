use fxhash::FxBuildHasher;

/// Hash map used for all string- and id-keyed tables.
pub type Map<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;
pub type Set<T> = hashbrown::HashSet<T, FxBuildHasher>;

