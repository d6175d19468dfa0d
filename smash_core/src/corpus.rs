use crate::oracle::{CrashRecord, FailureKind};
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extension of every crash artifact file.
pub const ARTIFACT_EXTENSION: &str = "bin";

/// Defines errors that can arise while persisting crash records.
///
/// Any of these is a harness fault: the campaign cannot guarantee that a
/// finding survives, so it must stop.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The configured crash directory exists but is a regular file or similar.
    #[error("Crash directory path {0:?} exists but is not a directory")]
    NotADirectory(PathBuf),

    /// An artifact for this iteration is already stored. Iteration indices are
    /// used at most once, so this points at a stale directory from another run.
    #[error("Artifact {0:?} already exists, refusing to overwrite")]
    AlreadyExists(PathBuf),

    /// An I/O error occurred creating the directory or writing an artifact.
    #[error("Crash corpus I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CorpusError {
    fn io(path: &Path, source: io::Error) -> Self {
        CorpusError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File name of a crash artifact: `<kind>_<iteration>.bin`.
///
/// The failure kind and iteration are recoverable from the name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactName {
    pub iteration: u64,
    pub kind: FailureKind,
}

impl ArtifactName {
    pub fn new(kind: FailureKind, iteration: u64) -> Self {
        Self { iteration, kind }
    }

    pub fn for_record(record: &CrashRecord) -> Self {
        Self::new(record.kind(), record.iteration())
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.{}",
            self.kind.prefix(),
            self.iteration,
            ARTIFACT_EXTENSION
        )
    }

    /// Parses `crash_<i>.bin` / `timeout_<i>.bin`. Anything else is `None`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(ARTIFACT_EXTENSION)?.strip_suffix('.')?;
        let (prefix, index) = stem.split_once('_')?;
        let kind = FailureKind::from_prefix(prefix)?;
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let iteration = index.parse().ok()?;
        Some(Self::new(kind, iteration))
    }
}

/// Durable home for crash records.
///
/// `save` must not return until the record is fully persisted, so an
/// interrupt right after it can never leave a truncated artifact behind.
pub trait CrashStore {
    /// Persists `record`, returning where it was stored.
    fn save(&mut self, record: &CrashRecord) -> Result<PathBuf, CorpusError>;
}

/// Stores each record as `<dir>/<kind>_<iteration>.bin` holding the raw
/// payload bytes.
///
/// The directory is created on first save. Files are opened with
/// `create_new`, so nothing is ever overwritten; distinct file names per
/// iteration also make concurrent writers safe without locking.
#[derive(Debug)]
pub struct CrashDirectory {
    dir: PathBuf,
    prepared: bool,
}

impl CrashDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prepared: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, name: &ArtifactName) -> PathBuf {
        self.dir.join(name.file_name())
    }

    fn ensure_dir(&mut self) -> Result<(), CorpusError> {
        if self.prepared {
            return Ok(());
        }
        if self.dir.exists() && !self.dir.is_dir() {
            return Err(CorpusError::NotADirectory(self.dir.clone()));
        }
        fs::create_dir_all(&self.dir).map_err(|e| CorpusError::io(&self.dir, e))?;
        self.prepared = true;
        Ok(())
    }

    /// Lists stored artifacts sorted by iteration. Files that do not follow
    /// the artifact naming scheme are skipped. A missing directory is empty.
    pub fn artifacts(&self) -> Result<Vec<ArtifactName>, CorpusError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CorpusError::io(&self.dir, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CorpusError::io(&self.dir, e))?;
            if let Some(name) = entry.file_name().to_str().and_then(ArtifactName::parse) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

impl CrashStore for CrashDirectory {
    fn save(&mut self, record: &CrashRecord) -> Result<PathBuf, CorpusError> {
        self.ensure_dir()?;
        let path = self.artifact_path(&ArtifactName::for_record(record));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => CorpusError::AlreadyExists(path.clone()),
                _ => CorpusError::io(&path, e),
            })?;
        file.write_all(record.payload().as_bytes())
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_all())
            .map_err(|e| CorpusError::io(&path, e))?;

        debug!(
            "Saved {} bytes for iteration {} to {:?}",
            record.payload().len(),
            record.iteration(),
            path
        );
        Ok(path)
    }
}

/// Keeps records in memory. Useful for tests and dry runs; nothing survives
/// the process.
#[derive(Debug, Default)]
pub struct InMemoryCrashStore {
    records: Vec<CrashRecord>,
}

impl InMemoryCrashStore {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[CrashRecord] {
        &self.records
    }
}

impl CrashStore for InMemoryCrashStore {
    fn save(&mut self, record: &CrashRecord) -> Result<PathBuf, CorpusError> {
        let path = PathBuf::from(ArtifactName::for_record(record).file_name());
        if self
            .records
            .iter()
            .any(|existing| existing.iteration() == record.iteration())
        {
            return Err(CorpusError::AlreadyExists(path));
        }
        self.records.push(record.clone());
        Ok(path)
    }
}
