//! Runtime options and the bundle sources an environment draws from.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::mixin::config::BundleDeclaration;
use crate::mixin::error::{ConfigError, OptionsError};
use crate::mixin::info::Phase;

pub const DEFAULT_EXPORT_DIR: &str = ".mixin.out";
pub const EXPORT_DIR_VAR: &str = "MIXIN_EXPORT_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MixinOption {
    /// Log routine decisions at info instead of debug.
    DebugVerbose,
    /// Verify the merged class structurally.
    DebugVerify,
    /// Warn about abstract methods left on concrete classes.
    CheckImplements,
    /// Write the pre-merge bytes when a merge fails.
    DumpTargetOnFailure,
    /// Write the post-merge bytes of every rewritten class.
    DebugExport,
}

impl MixinOption {
    pub const ALL: [MixinOption; 5] = [
        MixinOption::DebugVerbose,
        MixinOption::DebugVerify,
        MixinOption::CheckImplements,
        MixinOption::DumpTargetOnFailure,
        MixinOption::DebugExport,
    ];

    pub fn agent_key(self) -> &'static str {
        match self {
            MixinOption::DebugVerbose => "verbose",
            MixinOption::DebugVerify => "verify",
            MixinOption::CheckImplements => "check-interfaces",
            MixinOption::DumpTargetOnFailure => "dump-target",
            MixinOption::DebugExport => "export",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            MixinOption::DebugVerbose => "MIXIN_DEBUG_VERBOSE",
            MixinOption::DebugVerify => "MIXIN_DEBUG_VERIFY",
            MixinOption::CheckImplements => "MIXIN_CHECK_IMPLEMENTS",
            MixinOption::DumpTargetOnFailure => "MIXIN_DUMP_TARGET_ON_FAILURE",
            MixinOption::DebugExport => "MIXIN_DEBUG_EXPORT",
        }
    }

    pub fn from_agent_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.agent_key() == key)
    }
}

impl fmt::Display for MixinOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.agent_key())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, OptionsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(OptionsError::InvalidValue { key: key.to_string(), value: value.to_string() }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    enabled: BTreeSet<MixinOption>,
    export_dir: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self { enabled: BTreeSet::new(), export_dir: PathBuf::from(DEFAULT_EXPORT_DIR) }
    }
}

impl Options {
    pub fn is_enabled(&self, option: MixinOption) -> bool {
        self.enabled.contains(&option)
    }

    pub fn set(&mut self, option: MixinOption, enabled: bool) -> &mut Self {
        if enabled {
            self.enabled.insert(option);
        } else {
            self.enabled.remove(&option);
        }
        self
    }

    pub fn with(mut self, option: MixinOption) -> Self {
        self.set(option, true);
        self
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn set_export_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.export_dir = dir.into();
        self
    }

    /// Applies one `key[=value]` pair. Returns `Ok(false)` for keys that are
    /// not mixin options so callers can layer their own keys on top.
    pub fn apply_key(&mut self, key: &str, value: Option<&str>) -> Result<bool, OptionsError> {
        if key == "export-dir" {
            let dir = value
                .filter(|v| !v.is_empty())
                .ok_or_else(|| OptionsError::MissingValue { key: key.to_string() })?;
            self.set_export_dir(dir);
            return Ok(true);
        }
        let Some(option) = MixinOption::from_agent_key(key) else { return Ok(false) };
        let enabled = match value {
            None => true,
            Some(v) => parse_bool(key, v)?,
        };
        self.set(option, enabled);
        Ok(true)
    }

    /// Parses a comma-separated option string such as
    /// `verbose,verify,export-dir=/tmp/out`. Unknown keys are rejected.
    pub fn parse(options: &str) -> Result<Self, OptionsError> {
        let mut parsed = Self::default();
        for (key, value) in split_options(options) {
            if !parsed.apply_key(key, value)? {
                return Err(OptionsError::Unknown(key.to_string()));
            }
        }
        Ok(parsed)
    }

    /// Overlays the process environment (`MIXIN_DEBUG_VERBOSE=true`, ...).
    pub fn overlay_env(&mut self) -> Result<(), OptionsError> {
        self.overlay_from(|var| std::env::var(var).ok())
    }

    pub fn overlay_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), OptionsError> {
        for option in MixinOption::ALL {
            if let Some(value) = lookup(option.env_var()) {
                let enabled = parse_bool(option.env_var(), &value)?;
                self.set(option, enabled);
            }
        }
        if let Some(dir) = lookup(EXPORT_DIR_VAR).filter(|d| !d.is_empty()) {
            self.set_export_dir(dir);
        }
        Ok(())
    }
}

/// Splits `a,b=c, d` into `(key, value)` pairs, skipping empty items.
pub fn split_options(options: &str) -> impl Iterator<Item = (&str, Option<&str>)> {
    options.split(',').map(str::trim).filter(|item| !item.is_empty()).map(|item| match item.split_once('=') {
        Some((key, value)) => (key.trim(), Some(value.trim())),
        None => (item, None),
    })
}

/// Where bundle declarations come from.
pub trait BundleSource: Send + Sync {
    /// Declarations belonging to `phase`.
    fn declarations(&self, phase: Phase) -> Result<Vec<BundleDeclaration>, ConfigError>;
}

/// In-memory declarations.
#[derive(Debug, Clone, Default)]
pub struct StaticBundles(pub Vec<BundleDeclaration>);

impl BundleSource for StaticBundles {
    fn declarations(&self, phase: Phase) -> Result<Vec<BundleDeclaration>, ConfigError> {
        Ok(self.0.iter().filter(|d| d.phase == phase).cloned().collect())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<BundleDeclaration>),
    One(Box<BundleDeclaration>),
}

/// A JSON file holding one bundle object or an array of them. Read on every
/// call so a phase change sees edits made since startup.
#[derive(Debug, Clone)]
pub struct JsonBundleFile {
    path: PathBuf,
}

impl JsonBundleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<BundleDeclaration>, ConfigError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|source| ConfigError::Read { path: self.path.clone(), source })?;
        let parsed: OneOrMany = serde_json::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: self.path.clone(), source })?;
        Ok(match parsed {
            OneOrMany::Many(all) => all,
            OneOrMany::One(one) => vec![*one],
        })
    }
}

impl BundleSource for JsonBundleFile {
    fn declarations(&self, phase: Phase) -> Result<Vec<BundleDeclaration>, ConfigError> {
        Ok(self.load()?.into_iter().filter(|d| d.phase == phase).collect())
    }
}

/// Several sources, concatenated in order.
///
/// A member that fails is logged and skipped so the others still load. The
/// composite itself never fails.
#[derive(Clone, Default)]
pub struct CompositeSource(pub Vec<Arc<dyn BundleSource>>);

impl BundleSource for CompositeSource {
    fn declarations(&self, phase: Phase) -> Result<Vec<BundleDeclaration>, ConfigError> {
        let mut all = Vec::new();
        for (index, source) in self.0.iter().enumerate() {
            match source.declarations(phase) {
                Ok(declarations) => all.extend(declarations),
                Err(err) => warn!(source = index, %phase, "skipping bundle source: {err}"),
            }
        }
        Ok(all)
    }
}

/// A phase plus the options and bundles that go with it.
///
/// The transformer compares environments by identity: handing it a new
/// `Arc<MixinEnvironment>` is what triggers re-initialisation.
#[derive(Clone)]
pub struct MixinEnvironment {
    phase: Phase,
    options: Options,
    source: Arc<dyn BundleSource>,
}

impl fmt::Debug for MixinEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixinEnvironment")
            .field("phase", &self.phase)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl MixinEnvironment {
    pub fn new(phase: Phase, options: Options, source: Arc<dyn BundleSource>) -> Self {
        Self { phase, options, source }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn option(&self, option: MixinOption) -> bool {
        self.options.is_enabled(option)
    }

    pub fn source(&self) -> &Arc<dyn BundleSource> {
        &self.source
    }

    /// Same options and source, different phase.
    pub fn with_phase(&self, phase: Phase) -> Self {
        Self { phase, options: self.options.clone(), source: Arc::clone(&self.source) }
    }
}
