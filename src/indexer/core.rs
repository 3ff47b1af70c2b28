use std::collections::{BTreeSet, HashSet};
use std::fs;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::embedder;
use crate::error::{Error, Result};
use crate::fingerprint::{FileStatus, FingerprintTable, SyncTimes, hash_content};
use crate::indexer::ParserRegistry;
use crate::models::{Decision, Relationship};
use crate::project::Project;
use crate::store::{HybridStore, Statistics};

/// Counts reported by one sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub total_chunks: usize,
    pub total_relationships: usize,
    pub deleted_files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub project: String,
    pub root: String,
    pub tracked_files: usize,
    pub last_full_sync: Option<DateTime<Utc>>,
    pub last_incremental_sync: Option<DateTime<Utc>>,
    pub statistics: Statistics,
}

/// Keeps the hybrid store in step with the files of one project.
///
/// Files are handled one at a time: a file's old chunks and edges are
/// removed and its new ones written before the next file starts.
///
/// A file's fingerprint is dropped from the saved table before its stored
/// data is touched, and recorded again only after the new data is written.
/// A storage failure part way through therefore leaves that file looking
/// new on the next run, which re-indexes it.
pub struct Indexer {
    project: Project,
    store: HybridStore,
    parsers: ParserRegistry,
    fingerprints: FingerprintTable,
    times: SyncTimes,
}

impl Indexer {
    /// Open the project's persisted store with the configured embedder.
    pub fn open(project: Project) -> Result<Self> {
        let embedder = embedder::from_config(&project.config().embedding, project.root())?;
        let store = HybridStore::open(&project.memory_dir(), embedder)?;
        Self::new(project, store)
    }

    /// When the store was emptied for a new embedder, every fingerprint
    /// is dropped first so the next sync re-indexes all files.
    pub fn new(project: Project, mut store: HybridStore) -> Result<Self> {
        let parsers = ParserRegistry::new(project.config().indexing.max_chunk_chars)?;
        let mut fingerprints = FingerprintTable::load(&project.fingerprints_path())?;
        let times = SyncTimes::load(&project.sync_times_path())?;
        if store.embedder_changed() {
            warn!("Embedding backend changed; the next sync re-indexes every file");
            fingerprints.clear();
            fingerprints.save(&project.fingerprints_path())?;
            store.commit_embedder()?;
        }
        Ok(Self {
            project,
            store,
            parsers,
            fingerprints,
            times,
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn store(&self) -> &HybridStore {
        &self.store
    }

    pub fn fingerprints(&self) -> &FingerprintTable {
        &self.fingerprints
    }

    pub fn sync_times(&self) -> &SyncTimes {
        &self.times
    }

    pub fn full_sync(&mut self) -> Result<SyncStats> {
        self.sync(true)
    }

    pub fn incremental_sync(&mut self) -> Result<SyncStats> {
        self.sync(false)
    }

    /// Run one sync under the project lock.
    pub fn sync(&mut self, full: bool) -> Result<SyncStats> {
        let _lock = self.project.lock()?;
        let started = Utc::now();
        info!(
            "Starting {} sync of {}",
            if full { "full" } else { "incremental" },
            self.project.root().display()
        );

        let stats = if full {
            self.run_full()?
        } else {
            self.run_incremental()?
        };

        self.times.mark(full, started);
        self.save_state()?;
        info!(
            "Sync done: {} indexed, {} skipped, {} failed, {} deleted ({} chunks, {} relationships)",
            stats.files_indexed,
            stats.files_skipped,
            stats.files_failed,
            stats.deleted_files,
            stats.total_chunks,
            stats.total_relationships
        );
        Ok(stats)
    }

    /// Reindex a single project-relative path. A path that no longer
    /// exists, or is no longer selected, is removed instead.
    pub fn index_file(&mut self, rel_path: &str) -> Result<SyncStats> {
        let _lock = self.project.lock()?;
        let mut stats = SyncStats::default();

        if !self.project.is_indexable(rel_path)? {
            if self.fingerprints.get(rel_path).is_some()
                || self.store.stored_files()?.contains(rel_path)
            {
                self.drop_file(rel_path, &mut stats)?;
            }
        } else if let Some(bytes) = self.read(rel_path, &mut stats) {
            let hash = hash_content(&bytes);
            if self.index_content(rel_path, &bytes, &mut stats)? {
                self.fingerprints.record(rel_path, hash);
            }
        }

        self.save_fingerprints()?;
        Ok(stats)
    }

    /// Store a decision under the project lock, marking `supersedes` (an
    /// earlier decision id) superseded first.
    pub fn record_decision(&mut self, decision: &Decision, supersedes: Option<&str>) -> Result<()> {
        let _lock = self.project.lock()?;
        if let Some(old) = supersedes {
            if !self.store.supersede_decision(old)? {
                warn!("No decision {old} to supersede");
            }
        }
        self.store.add_decision(decision)?;
        info!("Recorded decision {}: {}", decision.id, decision.title);
        Ok(())
    }

    pub fn status(&self) -> Result<IndexStatus> {
        Ok(IndexStatus {
            project: self.project.name(),
            root: self.project.root().display().to_string(),
            tracked_files: self.fingerprints.len(),
            last_full_sync: self.times.last_full_sync,
            last_incremental_sync: self.times.last_incremental_sync,
            statistics: self.store.get_statistics()?,
        })
    }

    // ── Sync modes ───────────────────────────────────────────────────

    fn run_full(&mut self) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        self.fingerprints.clear();
        self.save_fingerprints()?;
        self.store.clear()?;

        for rel in self.project.iter_files()? {
            let Some(bytes) = self.read(&rel, &mut stats) else { continue };
            let hash = hash_content(&bytes);
            if self.index_content(&rel, &bytes, &mut stats)? {
                self.fingerprints.record(rel, hash);
            }
        }
        Ok(stats)
    }

    fn run_incremental(&mut self) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let files = self.project.iter_files()?;

        for rel in &files {
            let Some(bytes) = self.read(rel, &mut stats) else { continue };
            let hash = hash_content(&bytes);
            match self.fingerprints.status(rel, &hash) {
                FileStatus::Unchanged => {
                    stats.files_skipped += 1;
                    continue;
                }
                status => debug!("{rel} is {status:?}"),
            }
            if self.index_content(rel, &bytes, &mut stats)? {
                self.fingerprints.record(rel.as_str(), hash);
            }
        }

        // Tracked files that are gone or no longer selected, plus anything
        // left in the store by an interrupted sync.
        let live: HashSet<String> = files.into_iter().collect();
        let mut deleted: BTreeSet<String> = self
            .fingerprints
            .find_deleted(&live)
            .into_iter()
            .map(str::to_string)
            .collect();
        deleted.extend(
            self.store
                .stored_files()?
                .into_iter()
                .filter(|f| !live.contains(f)),
        );
        for rel in deleted {
            self.drop_file(&rel, &mut stats)?;
        }
        Ok(stats)
    }

    // ── Per-file steps ───────────────────────────────────────────────

    fn read(&self, rel_path: &str, stats: &mut SyncStats) -> Option<Vec<u8>> {
        match fs::read(self.project.root().join(rel_path)) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Skipping {rel_path}: {e}");
                stats.files_failed += 1;
                None
            }
        }
    }

    /// Replace everything stored for `rel_path` with a fresh parse of
    /// `bytes`. Returns `false` when the file could not be parsed; storage
    /// failures are returned as errors.
    fn index_content(&mut self, rel_path: &str, bytes: &[u8], stats: &mut SyncStats) -> Result<bool> {
        let parsed = std::str::from_utf8(bytes)
            .map_err(|e| Error::parse(rel_path, e))
            .and_then(|content| self.parsers.parse_file(rel_path, content));
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) if e.is_storage() => return Err(e),
            Err(e) => {
                warn!("{e}");
                stats.files_failed += 1;
                return Ok(false);
            }
        };

        let graph_config = &self.project.config().graph;
        let relationships: Vec<Relationship> = parsed
            .relationships
            .into_iter()
            .filter(|r| graph_config.tracks(r.relation_type))
            .collect();

        self.forget(rel_path)?;
        self.store.remove_file(rel_path)?;
        self.store.index_chunks(&parsed.chunks, &relationships)?;
        debug!(
            "Indexed {rel_path}: {} chunks, {} relationships",
            parsed.chunks.len(),
            relationships.len()
        );

        stats.files_indexed += 1;
        stats.total_chunks += parsed.chunks.len();
        stats.total_relationships += relationships.len();
        Ok(true)
    }

    fn drop_file(&mut self, rel_path: &str, stats: &mut SyncStats) -> Result<()> {
        self.forget(rel_path)?;
        self.store.remove_file(rel_path)?;
        stats.deleted_files += 1;
        info!("Removed {rel_path} from the index");
        Ok(())
    }

    /// Drop `rel_path` from the fingerprint table on disk.
    fn forget(&mut self, rel_path: &str) -> Result<()> {
        if self.fingerprints.remove(rel_path).is_some() {
            self.save_fingerprints()?;
        }
        Ok(())
    }

    fn save_fingerprints(&self) -> Result<()> {
        self.fingerprints.save(&self.project.fingerprints_path())
    }

    fn save_state(&self) -> Result<()> {
        self.save_fingerprints()?;
        self.times.save(&self.project.sync_times_path())
    }
}
