//! Project layout, file selection and the sync lock.
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::GlobSet;
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

pub const PROJECT_DIR: &str = ".codemem";
pub const IGNORE_FILE: &str = ".codememignore";

const CONFIG_FILE: &str = "config.json";
const MEMORY_DIR: &str = "memory";
const INDEX_DIR: &str = "index";
const FILE_HASHES_FILE: &str = "file_hashes.json";
const LAST_SYNC_FILE: &str = "last_sync.json";
const LOCK_FILE: &str = "sync.lock";

#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    config: Config,
}

impl Project {
    /// Create `.codemem/` under `root` (idempotent) and open the project.
    pub fn init(root: &Path) -> Result<Self> {
        let root = fs::canonicalize(root)?;
        let dir = root.join(PROJECT_DIR);
        fs::create_dir_all(dir.join(MEMORY_DIR))?;
        fs::create_dir_all(dir.join(INDEX_DIR))?;

        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            let config = Config {
                name: root.file_name().map(|n| n.to_string_lossy().into_owned()),
                ..Config::default()
            };
            config.save(&config_path).map_err(config_error)?;
            info!("Initialized project at {}", root.display());
        }
        Self::open(&root)
    }

    /// Open an initialized project. Fails with `ProjectNotFound` when
    /// `root` has no `.codemem/` directory.
    pub fn open(root: &Path) -> Result<Self> {
        let root = fs::canonicalize(root).map_err(|_| Error::ProjectNotFound(root.to_path_buf()))?;
        if !root.join(PROJECT_DIR).is_dir() {
            return Err(Error::ProjectNotFound(root));
        }
        let config = Config::load(&root.join(PROJECT_DIR).join(CONFIG_FILE)).map_err(config_error)?;
        config.validate().map_err(config_error)?;
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn name(&self) -> String {
        match &self.config.name {
            Some(name) => name.clone(),
            None => self
                .root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    // ── Layout ───────────────────────────────────────────────────────

    pub fn dir(&self) -> PathBuf {
        self.root.join(PROJECT_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir().join(CONFIG_FILE)
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.dir().join(MEMORY_DIR)
    }

    pub fn fingerprints_path(&self) -> PathBuf {
        self.dir().join(INDEX_DIR).join(FILE_HASHES_FILE)
    }

    pub fn sync_times_path(&self) -> PathBuf {
        self.dir().join(INDEX_DIR).join(LAST_SYNC_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir().join(LOCK_FILE)
    }

    pub fn lock(&self) -> Result<SyncLock> {
        SyncLock::acquire(self.lock_path())
    }

    // ── File selection ───────────────────────────────────────────────

    /// Path relative to the root with `/` separators, or `None` when the
    /// path lies outside the project.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.root).ok()?
        } else {
            path
        };
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    /// Every includable file under the root as a sorted list of relative
    /// paths. `.gitignore`, `.codememignore` and the configured excludes
    /// prune the walk; includes and the size limit filter files.
    pub fn iter_files(&self) -> Result<Vec<String>> {
        let matcher = self.matcher()?;
        let excludes = matcher.excludes.clone();
        let root = self.root.clone();

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .add_custom_ignore_filename(IGNORE_FILE)
            .follow_links(false)
            .filter_entry(move |entry| {
                if !entry.file_type().is_some_and(|t| t.is_dir()) {
                    return true;
                }
                match entry.path().strip_prefix(&root) {
                    Ok(rel) if !rel.as_os_str().is_empty() => {
                        let inside = format!("{}/_", rel.to_string_lossy().replace('\\', "/"));
                        !excludes.is_match(inside)
                    }
                    _ => true,
                }
            })
            .build();

        let mut files = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Some(rel) = self.relative_path(entry.path()) else {
                continue;
            };
            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("Skipping {rel}: {e}");
                    continue;
                }
            };
            if matcher.accepts(&rel, size) {
                files.push(rel);
            } else {
                debug!("Filtered out {rel}");
            }
        }

        files.sort();
        Ok(files)
    }

    /// Whether a single relative path would be selected by `iter_files`,
    /// ignoring `.gitignore` files.
    pub fn is_indexable(&self, rel_path: &str) -> Result<bool> {
        let full = self.root.join(rel_path);
        let Ok(meta) = fs::metadata(&full) else {
            return Ok(false);
        };
        Ok(meta.is_file() && self.matcher()?.accepts(rel_path, meta.len()))
    }

    fn matcher(&self) -> Result<FileMatcher> {
        let indexing = &self.config.indexing;
        Ok(FileMatcher {
            includes: indexing.include_set().map_err(config_error)?,
            excludes: indexing.exclude_set().map_err(config_error)?,
            max_bytes: indexing.max_file_size_bytes(),
        })
    }
}

struct FileMatcher {
    includes: GlobSet,
    excludes: GlobSet,
    max_bytes: u64,
}

impl FileMatcher {
    fn accepts(&self, rel_path: &str, size: u64) -> bool {
        !self.excludes.is_match(rel_path) && self.includes.is_match(rel_path) && size <= self.max_bytes
    }
}

fn config_error(e: anyhow::Error) -> Error {
    Error::Config(format!("{e:#}"))
}

// ── Sync lock ────────────────────────────────────────────────────────

/// How long a lock file with no readable pid is honoured.
const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(60);

/// Advisory per-project lock held for the duration of a sync. The lock
/// file is created exclusively, holds the owner's pid and is removed on
/// drop. A lock whose owner is no longer running is taken over.
#[derive(Debug)]
pub struct SyncLock {
    path: PathBuf,
}

impl SyncLock {
    pub fn acquire(path: PathBuf) -> Result<Self> {
        match Self::create(path) {
            Err(Error::Locked(path)) if is_stale(&path) => {
                warn!("Taking over stale sync lock {}", path.display());
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Self::create(path)
            }
            other => other,
        }
    }

    fn create(path: PathBuf) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                debug!("Acquired sync lock {}", path.display());
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(Error::Locked(path)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release sync lock {}: {e}", self.path.display());
        }
    }
}

/// Whether the lock file at `path` was left behind by a process that is
/// gone. A file without a pid counts as stale once it is older than
/// [`UNREADABLE_LOCK_GRACE`].
fn is_stale(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(text) => match text.trim().parse::<u32>() {
            Ok(pid) => !process_alive(pid),
            Err(_) => fs::metadata(path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|at| at.elapsed().ok())
                .is_some_and(|age| age > UNREADABLE_LOCK_GRACE),
        },
        // Released in the meantime.
        Err(e) => e.kind() == ErrorKind::NotFound,
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks that the process exists.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
