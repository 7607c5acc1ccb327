//! Mixin descriptors and their ordering.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PRIORITY: i32 = 1000;

/// Environment phase. Bundles declared for a phase only become active once
/// the environment reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    PreInit,
    Init,
    #[default]
    Default,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::PreInit => "PREINIT",
            Phase::Init => "INIT",
            Phase::Default => "DEFAULT",
        })
    }
}

/// Sort key for descriptors: phase, then priority, then declaration sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MixinOrderKey {
    pub phase: Phase,
    pub priority: i32,
    pub sequence: u64,
}

/// One declared mixin class, resolved against its bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixinInfo {
    pub bundle: Arc<str>,
    pub required: bool,
    /// Fully-qualified, dot-separated.
    pub class_name: String,
    pub targets: Vec<String>,
    pub phase: Phase,
    pub priority: i32,
    pub sequence: u64,
}

impl MixinInfo {
    pub fn order_key(&self) -> MixinOrderKey {
        MixinOrderKey { phase: self.phase, priority: self.priority, sequence: self.sequence }
    }

    pub fn targets(&self, class: &str) -> bool {
        self.targets.iter().any(|t| t == class)
    }

    /// Class name without the package.
    pub fn simple_name(&self) -> &str {
        self.class_name.rsplit('.').next().unwrap_or(&self.class_name)
    }
}

impl fmt::Display for MixinInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bundle, self.class_name)
    }
}

/// A set kept sorted by an explicit key function.
///
/// Inserting a value whose key is already present replaces it, so the key
/// must identify values uniquely.
#[derive(Clone)]
pub struct OrderedSet<T, K> {
    key: fn(&T) -> K,
    entries: BTreeMap<K, T>,
}

impl<T, K: Ord> OrderedSet<T, K> {
    pub fn new(key: fn(&T) -> K) -> Self {
        Self { key, entries: BTreeMap::new() }
    }

    /// Returns the value previously stored under the same key.
    pub fn insert(&mut self, value: T) -> Option<T> {
        let k = (self.key)(&value);
        self.entries.insert(k, value)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&T> {
        self.entries.values().next()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.entries.into_values().collect()
    }
}

impl<T, K: Ord> Extend<T> for OrderedSet<T, K> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<T: fmt::Debug, K> fmt::Debug for OrderedSet<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.values()).finish()
    }
}

/// The mixins to apply to one target, in application order.
pub type MixinSet = OrderedSet<Arc<MixinInfo>, MixinOrderKey>;

fn mixin_key(info: &Arc<MixinInfo>) -> MixinOrderKey {
    info.order_key()
}

impl MixinSet {
    pub fn empty() -> Self {
        OrderedSet::new(mixin_key)
    }
}

impl Default for MixinSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromIterator<Arc<MixinInfo>> for MixinSet {
    fn from_iter<I: IntoIterator<Item = Arc<MixinInfo>>>(iter: I) -> Self {
        let mut set = Self::empty();
        set.extend(iter);
        set
    }
}
