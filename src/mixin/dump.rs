//! Debug snapshots of class bytes.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Input bytes of a class whose merge failed or skipped a mixin.
    PreMerge,
    /// Final bytes of a rewritten class.
    PostMerge,
}

impl SnapshotKind {
    pub fn suffix(self) -> &'static str {
        match self {
            SnapshotKind::PreMerge => ".target",
            SnapshotKind::PostMerge => "",
        }
    }
}

/// Side channel for snapshots. Implementations swallow their own failures.
pub trait SnapshotSink: Send + Sync {
    fn write(&self, class: &str, kind: SnapshotKind, bytes: &[u8]);
}

/// Writes `<dir>/<class as path><suffix>.class`.
#[derive(Debug, Clone)]
pub struct FileSnapshotSink {
    dir: PathBuf,
}

impl FileSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, class: &str, kind: SnapshotKind) -> PathBuf {
        let relative = class.replace('.', "/");
        self.dir.join(format!("{relative}{}.class", kind.suffix()))
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn write(&self, class: &str, kind: SnapshotKind, bytes: &[u8]) {
        let path = self.path_for(class, kind);
        let result = match path.parent() {
            Some(parent) => fs::create_dir_all(parent),
            None => Ok(()),
        }
        .and_then(|()| fs::write(&path, bytes));
        if let Err(err) = result {
            debug!(path = %path.display(), error = %err, "could not write class snapshot");
        }
    }
}
