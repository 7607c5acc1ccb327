//! Mixin bundles: the declared form and the initialised runtime form.
//!
//! A [`BundleDeclaration`] is what a bundle source hands over, usually
//! deserialised from JSON. The registry turns it into a [`MixinBundle`] and
//! walks it through [`MixinBundle::initialise`] and
//! [`MixinBundle::post_initialise`] before the selector ever sees it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::mixin::error::ConfigError;
use crate::mixin::info::{MixinInfo, Phase, DEFAULT_PRIORITY};
use crate::mixin::select::Relation;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Selection plugin attached to a bundle.
///
/// Plugins are consulted during registry initialisation only. They may keep
/// their own state (behind interior mutability) but cannot touch other
/// bundles.
pub trait ConfigPlugin: Send + Sync {
    /// Called once the bundle's mixins are resolved.
    fn on_load(&self, _package: &str) {}

    /// Called once with this bundle's targets and the union of every other
    /// surviving bundle's targets.
    fn accept_targets(&self, _own: &BTreeSet<String>, _others: &BTreeSet<String>) {}

    /// Final say on whether `mixin` is indexed for `target`.
    fn should_apply_mixin(&self, _target: &str, _mixin: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixinDeclaration {
    /// Relative to the bundle package, or fully qualified.
    pub class: String,
    #[serde(default)]
    pub targets: Vec<String>,
    /// Overrides the bundle priority for this mixin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BundleDeclaration {
    pub name: String,
    pub package: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub mixins: Vec<MixinDeclaration>,
    #[serde(default, rename = "passThrough")]
    pub pass_through: Vec<String>,
    #[serde(skip)]
    pub plugin: Option<Arc<dyn ConfigPlugin>>,
}

impl fmt::Debug for BundleDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleDeclaration")
            .field("name", &self.name)
            .field("package", &self.package)
            .field("priority", &self.priority)
            .field("required", &self.required)
            .field("phase", &self.phase)
            .field("mixins", &self.mixins)
            .field("pass_through", &self.pass_through)
            .field("plugin", &self.plugin.is_some())
            .finish()
    }
}

impl BundleDeclaration {
    pub fn new(name: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: package.into(),
            priority: DEFAULT_PRIORITY,
            required: false,
            phase: Phase::Default,
            mixins: Vec::new(),
            pass_through: Vec::new(),
            plugin: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn mixin<I, S>(mut self, class: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mixins.push(MixinDeclaration {
            class: class.into(),
            targets: targets.into_iter().map(Into::into).collect(),
            priority: None,
        });
        self
    }

    pub fn mixin_with_priority<I, S>(mut self, class: impl Into<String>, targets: I, priority: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self = self.mixin(class, targets);
        if let Some(last) = self.mixins.last_mut() {
            last.priority = Some(priority);
        }
        self
    }

    pub fn pass_through(mut self, class: impl Into<String>) -> Self {
        self.pass_through.push(class.into());
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn ConfigPlugin>) -> Self {
        self.plugin = Some(plugin);
        self
    }
}

/// Runtime form of a bundle.
pub struct MixinBundle {
    name: Arc<str>,
    package: String,
    priority: i32,
    required: bool,
    phase: Phase,
    declared: Vec<MixinDeclaration>,
    pass_through: BTreeSet<String>,
    plugin: Option<Arc<dyn ConfigPlugin>>,
    mixins: Vec<Arc<MixinInfo>>,
    by_target: BTreeMap<String, Vec<Arc<MixinInfo>>>,
}

impl fmt::Debug for MixinBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixinBundle")
            .field("name", &self.name)
            .field("package", &self.package)
            .field("priority", &self.priority)
            .field("required", &self.required)
            .field("phase", &self.phase)
            .field("mixins", &self.mixins.len())
            .finish()
    }
}

impl fmt::Display for MixinBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// `com.example.mixin` and `com.example.mixin.` both become `com.example.mixin.`.
fn normalise_package(package: &str) -> String {
    let trimmed = package.trim().trim_end_matches('.');
    format!("{trimmed}.")
}

impl MixinBundle {
    pub fn from_declaration(declaration: BundleDeclaration) -> Self {
        let package = normalise_package(&declaration.package);
        let pass_through = declaration
            .pass_through
            .iter()
            .map(|class| qualify(&package, class))
            .collect();
        Self {
            name: Arc::from(declaration.name.as_str()),
            package,
            priority: declaration.priority,
            required: declaration.required,
            phase: declaration.phase,
            declared: declaration.mixins,
            pass_through,
            plugin: declaration.plugin,
            mixins: Vec::new(),
            by_target: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn plugin(&self) -> Option<&Arc<dyn ConfigPlugin>> {
        self.plugin.as_ref()
    }

    pub fn mixins(&self) -> &[Arc<MixinInfo>] {
        &self.mixins
    }

    pub(crate) fn order_key(&self) -> (i32, &str) {
        (self.priority, &self.name)
    }

    fn invalid(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidBundle { bundle: self.name.to_string(), reason: reason.into() }
    }

    /// Resolves declared mixins into descriptors, numbering them from
    /// `sequence`, then notifies the plugin.
    pub fn initialise(&mut self, sequence: &mut u64) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(self.invalid("bundle name is empty"));
        }
        if self.package == "." {
            return Err(self.invalid("mixin package is empty"));
        }

        let mut seen = BTreeSet::new();
        let mut mixins = Vec::with_capacity(self.declared.len());
        for declared in &self.declared {
            let class_name = qualify(&self.package, &declared.class);
            if !seen.insert(class_name.clone()) {
                return Err(ConfigError::DuplicateMixin { bundle: self.name.to_string(), mixin: class_name });
            }
            if declared.targets.is_empty() {
                return Err(self.invalid(format!("mixin {class_name} declares no targets")));
            }
            let info = MixinInfo {
                bundle: Arc::clone(&self.name),
                required: self.required,
                class_name,
                targets: declared.targets.iter().map(|t| t.trim().to_string()).collect(),
                phase: self.phase,
                priority: declared.priority.unwrap_or(self.priority),
                sequence: *sequence,
            };
            *sequence += 1;
            mixins.push(Arc::new(info));
        }
        self.mixins = mixins;

        if let Some(plugin) = &self.plugin {
            plugin.on_load(&self.package);
        }
        Ok(())
    }

    /// Builds the per-target index.
    pub fn post_initialise(&mut self) -> Result<(), ConfigError> {
        let mut by_target: BTreeMap<String, Vec<Arc<MixinInfo>>> = BTreeMap::new();
        for mixin in &self.mixins {
            for target in &mixin.targets {
                if self.package_match(target) {
                    return Err(ConfigError::TargetInMixinPackage {
                        bundle: self.name.to_string(),
                        mixin: mixin.class_name.clone(),
                        target: target.clone(),
                    });
                }
                let accepted = self
                    .plugin
                    .as_ref()
                    .map_or(true, |plugin| plugin.should_apply_mixin(target, &mixin.class_name));
                if accepted {
                    by_target.entry(target.clone()).or_default().push(Arc::clone(mixin));
                }
            }
        }
        self.by_target = by_target;
        Ok(())
    }

    /// Every target any declared mixin names.
    pub fn targets(&self) -> BTreeSet<String> {
        self.mixins.iter().flat_map(|m| m.targets.iter().cloned()).collect()
    }

    /// Targets that survived plugin filtering.
    pub fn indexed_targets(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_target.keys().map(String::as_str)
    }

    /// Whether `class` lives inside this bundle's mixin package.
    pub fn package_match(&self, class: &str) -> bool {
        class.starts_with(&self.package)
    }

    pub fn can_pass_through(&self, class: &str) -> bool {
        self.pass_through.contains(class)
    }

    pub fn mixins_for(&self, class: &str) -> &[Arc<MixinInfo>] {
        self.by_target.get(class).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn relation(&self, class: &str) -> Relation<'_> {
        if self.package_match(class) {
            if self.can_pass_through(class) {
                Relation::PassThrough
            } else {
                Relation::Forbidden
            }
        } else {
            match self.mixins_for(class) {
                [] => Relation::OutOfScope,
                mixins => Relation::Contributing(mixins),
            }
        }
    }
}

fn qualify(package: &str, class: &str) -> String {
    let class = class.trim();
    if class.starts_with(package) {
        class.to_string()
    } else {
        format!("{package}{}", class.trim_start_matches('.'))
    }
}
