//! Partitioned persistence
//!
//! `PartitionStore` is the only persistence interface the engine sees. A store
//! holds two kinds of immutable objects:
//!
//! - **Partition generations**: one file per `(partition, generation)`. A new
//!   generation is written whenever a partition is spilled or checkpointed;
//!   existing generations are never rewritten.
//! - **Manifests**: one per checkpoint, naming the codebook, all cluster
//!   metadata and the partition generation each partition resolves to.
//!
//! A checkpoint becomes visible only when its manifest is committed, and the
//! manifest is written last, so a reader never sees a half-written checkpoint.
//!
//! ## On-disk layout (`FsStore`)
//!
//! ```text
//! root/
//!   partitions/p00000003-g000000000042.part
//!   checkpoints/ckpt-000000000007.ckpt
//!   LATEST                     <- "ckpt-000000000007.ckpt"
//! ```

use crate::codec;
use crate::error::{Error, Result};
use crate::snapshot::{EngineSnapshot, Manifest, PartitionData, PartitionId, PartitionRef};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const PARTITIONS_DIR: &str = "partitions";
const CHECKPOINTS_DIR: &str = "checkpoints";
const LATEST_FILE: &str = "LATEST";

/// The single persistence interface
pub trait PartitionStore: Send + Sync {
    /// Reserve a fresh, never-used partition generation
    fn allocate_generation(&self) -> u64;

    /// Reserve a fresh checkpoint sequence number
    fn allocate_sequence(&self) -> u64;

    /// Atomically write one partition generation
    fn write_partition(&self, data: &PartitionData, generation: u64) -> Result<()>;

    /// Read one partition generation
    fn read_partition(&self, id: PartitionId, generation: u64) -> Result<PartitionData>;

    /// Atomically write a manifest and point the latest marker at it
    fn commit_manifest(&self, manifest: &Manifest) -> Result<()>;

    /// Read the manifest with this sequence number
    fn read_manifest(&self, sequence: u64) -> Result<Manifest>;

    /// Sequence the latest marker points at, if any
    fn latest_sequence(&self) -> Result<Option<u64>>;

    /// All stored manifest sequences, ascending
    fn list_manifests(&self) -> Result<Vec<u64>>;

    /// All stored partition generations
    fn list_partitions(&self) -> Result<Vec<PartitionRef>>;

    fn delete_manifest(&self, sequence: u64) -> Result<()>;

    fn delete_partition(&self, part: PartitionRef) -> Result<()>;

    /// Load a partition for the lazy-load path.
    ///
    /// A partition that was never written, is missing or fails to decode is
    /// treated as empty. This never fails.
    fn load_partition(&self, id: PartitionId, generation: Option<u64>) -> PartitionData {
        let Some(generation) = generation else {
            return PartitionData::empty(id);
        };
        match self.read_partition(id, generation) {
            Ok(data) if data.id == id => data,
            Ok(data) => {
                tracing::warn!(partition = id, generation, found = data.id, "partition id mismatch, treating as empty");
                PartitionData::empty(id)
            }
            Err(e) => {
                tracing::warn!(partition = id, generation, error = %e, "partition unreadable, treating as empty");
                PartitionData::empty(id)
            }
        }
    }

    /// The most recent readable manifest.
    ///
    /// Tries the latest marker first, then older manifests newest first.
    /// Returns None (fresh start) if nothing is readable.
    fn load_latest(&self) -> Option<Manifest> {
        let mut candidates = Vec::new();
        match self.latest_sequence() {
            Ok(Some(seq)) => candidates.push(seq),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "latest checkpoint marker unreadable"),
        }
        match self.list_manifests() {
            Ok(list) => candidates.extend(list.into_iter().rev()),
            Err(e) => tracing::warn!(error = %e, "cannot list checkpoints"),
        }

        let mut seen = Vec::new();
        for seq in candidates {
            if seen.contains(&seq) {
                continue;
            }
            seen.push(seq);
            match self.read_manifest(seq) {
                Ok(manifest) => {
                    if seen.len() > 1 {
                        tracing::warn!(sequence = seq, "recovered from an older checkpoint");
                    }
                    return Some(manifest);
                }
                Err(e) => tracing::warn!(sequence = seq, error = %e, "checkpoint unreadable, trying older"),
            }
        }
        None
    }

    /// Drop manifests beyond the newest `keep` and partition generations no
    /// retained manifest or live pointer can reach.
    ///
    /// `live` maps each partition to the generation the running engine reads
    /// from; nothing at or above it is removed.
    fn collect_garbage(&self, keep: usize, live: &BTreeMap<PartitionId, u64>) -> Result<GcReport> {
        let keep = keep.max(1);
        let sequences = self.list_manifests()?;
        let split = sequences.len().saturating_sub(keep);
        let (expired, retained) = sequences.split_at(split);

        let mut report = GcReport::default();
        for &seq in expired {
            self.delete_manifest(seq)?;
            report.manifests_deleted += 1;
        }

        // Oldest generation each partition needs, counted only for partitions
        // every retained manifest references
        let mut floor: BTreeMap<PartitionId, (u64, usize)> = BTreeMap::new();
        for &seq in retained {
            let manifest = match self.read_manifest(seq) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(sequence = seq, error = %e, "skipping partition collection");
                    return Ok(report);
                }
            };
            for part in &manifest.partitions {
                let entry = floor.entry(part.id).or_insert((part.generation, 0));
                entry.0 = entry.0.min(part.generation);
                entry.1 += 1;
            }
        }

        for part in self.list_partitions()? {
            let Some(&(min_gen, seen)) = floor.get(&part.id) else {
                continue;
            };
            if seen != retained.len() {
                continue;
            }
            let threshold = live.get(&part.id).map_or(min_gen, |&g| g.min(min_gen));
            if part.generation < threshold {
                self.delete_partition(part)?;
                report.partitions_deleted += 1;
            }
        }

        if report.manifests_deleted > 0 || report.partitions_deleted > 0 {
            tracing::debug!(
                manifests = report.manifests_deleted,
                partitions = report.partitions_deleted,
                "collected old checkpoint data"
            );
        }
        Ok(report)
    }
}

/// What a garbage collection pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub manifests_deleted: usize,
    pub partitions_deleted: usize,
}

/// A partition generation written by a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenPartition {
    pub id: PartitionId,
    /// Generation the snapshot was taken against
    pub base_generation: Option<u64>,
    pub generation: u64,
}

/// Result of a successful `save_snapshot`
#[derive(Debug, Clone)]
pub struct SavedCheckpoint {
    pub manifest: Manifest,
    pub written: Vec<WrittenPartition>,
}

/// Write a snapshot: dirty partitions first, then the manifest.
///
/// Records of non-resident clusters in a dirty partition are carried over
/// from the generation the snapshot was taken against.
pub fn save_snapshot(store: &dyn PartitionStore, snapshot: &EngineSnapshot) -> Result<SavedCheckpoint> {
    let mut refs = snapshot.clean.clone();
    let mut written = Vec::with_capacity(snapshot.dirty.len());

    for dirty in &snapshot.dirty {
        let mut data = PartitionData::empty(dirty.id);
        if !dirty.carried.is_empty() {
            let base = store.load_partition(dirty.id, dirty.base_generation);
            data.neurons
                .extend(base.neurons.into_iter().filter(|r| dirty.carried.contains(&r.cluster())));
        }
        for (_, _, records) in &dirty.resident {
            data.neurons.extend(records.iter().cloned());
        }
        data.sanitize();

        let generation = store.allocate_generation();
        store.write_partition(&data, generation)?;
        refs.push(PartitionRef {
            id: dirty.id,
            generation,
        });
        written.push(WrittenPartition {
            id: dirty.id,
            base_generation: dirty.base_generation,
            generation,
        });
    }

    let mut manifest = Manifest {
        sequence: store.allocate_sequence(),
        engine_id: snapshot.engine_id,
        created_at: Utc::now(),
        step: snapshot.step,
        next_cluster_id: snapshot.next_cluster_id,
        codebook: snapshot.codebook.clone(),
        clusters: snapshot.clusters.clone(),
        partitions: refs,
    };
    manifest.sanitize();
    store.commit_manifest(&manifest)?;

    Ok(SavedCheckpoint { manifest, written })
}

// ── Filesystem store ───────────────────────────────────────────────

/// Directory-backed store. Every write goes to a temp file that is synced
/// and then renamed into place.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    next_generation: AtomicU64,
    next_sequence: AtomicU64,
}

impl FsStore {
    /// Open or create a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(PARTITIONS_DIR))?;
        fs::create_dir_all(root.join(CHECKPOINTS_DIR))?;

        let store = Self {
            root,
            next_generation: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
        };
        store.remove_temp_files()?;

        let max_gen = store.list_partitions()?.iter().map(|p| p.generation).max().unwrap_or(0);
        let max_seq = store.list_manifests()?.last().copied().unwrap_or(0);
        store.next_generation.store(max_gen + 1, Ordering::SeqCst);
        store.next_sequence.store(max_seq + 1, Ordering::SeqCst);

        tracing::info!(root = %store.root.display(), next_generation = max_gen + 1, next_sequence = max_seq + 1, "opened store");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, id: PartitionId, generation: u64) -> PathBuf {
        self.root
            .join(PARTITIONS_DIR)
            .join(format!("p{:08}-g{:012}.part", id, generation))
    }

    pub fn manifest_path(&self, sequence: u64) -> PathBuf {
        self.root.join(CHECKPOINTS_DIR).join(manifest_file_name(sequence))
    }

    /// Leftovers of interrupted writes are never valid data
    fn remove_temp_files(&self) -> Result<()> {
        for dir in [self.root.clone(), self.root.join(PARTITIONS_DIR), self.root.join(CHECKPOINTS_DIR)] {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().map_or(false, |e| e == "tmp") {
                    tracing::debug!(path = %path.display(), "removing interrupted write");
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }
}

fn manifest_file_name(sequence: u64) -> String {
    format!("ckpt-{:012}.ckpt", sequence)
}

fn parse_manifest_name(name: &str) -> Option<u64> {
    name.strip_prefix("ckpt-")?.strip_suffix(".ckpt")?.parse().ok()
}

fn parse_partition_name(name: &str) -> Option<PartitionRef> {
    let stem = name.strip_prefix('p')?.strip_suffix(".part")?;
    let (id, generation) = stem.split_once("-g")?;
    Some(PartitionRef {
        id: id.parse().ok()?,
        generation: generation.parse().ok()?,
    })
}

/// Write `bytes` to `path` via a synced temp file and a rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidState(format!("not a file path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    // Persist the rename itself where the platform allows it
    if let Some(dir) = path.parent() {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    Ok(())
}

impl PartitionStore for FsStore {
    fn allocate_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    fn allocate_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn write_partition(&self, data: &PartitionData, generation: u64) -> Result<()> {
        let bytes = codec::encode_partition(data)?;
        write_atomic(&self.partition_path(data.id, generation), &bytes)
    }

    fn read_partition(&self, id: PartitionId, generation: u64) -> Result<PartitionData> {
        let bytes = fs::read(self.partition_path(id, generation))?;
        codec::decode_partition(&bytes)
    }

    fn commit_manifest(&self, manifest: &Manifest) -> Result<()> {
        let bytes = codec::encode_manifest(manifest)?;
        write_atomic(&self.manifest_path(manifest.sequence), &bytes)?;
        write_atomic(
            &self.root.join(LATEST_FILE),
            manifest_file_name(manifest.sequence).as_bytes(),
        )?;
        tracing::info!(
            sequence = manifest.sequence,
            clusters = manifest.clusters.len(),
            partitions = manifest.partitions.len(),
            "committed checkpoint"
        );
        Ok(())
    }

    fn read_manifest(&self, sequence: u64) -> Result<Manifest> {
        let bytes = fs::read(self.manifest_path(sequence))?;
        let manifest = codec::decode_manifest(&bytes)?;
        if manifest.sequence != sequence {
            return Err(Error::Deserialization(format!(
                "manifest {} claims sequence {}",
                sequence, manifest.sequence
            )));
        }
        Ok(manifest)
    }

    fn latest_sequence(&self) -> Result<Option<u64>> {
        let path = self.root.join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        parse_manifest_name(text.trim())
            .map(Some)
            .ok_or_else(|| Error::Deserialization(format!("invalid latest marker: {:?}", text.trim())))
    }

    fn list_manifests(&self) -> Result<Vec<u64>> {
        let mut sequences = Vec::new();
        for entry in fs::read_dir(self.root.join(CHECKPOINTS_DIR))? {
            let entry = entry?;
            if let Some(seq) = entry.file_name().to_str().and_then(parse_manifest_name) {
                sequences.push(seq);
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    fn list_partitions(&self) -> Result<Vec<PartitionRef>> {
        let mut parts = Vec::new();
        for entry in fs::read_dir(self.root.join(PARTITIONS_DIR))? {
            let entry = entry?;
            if let Some(part) = entry.file_name().to_str().and_then(parse_partition_name) {
                parts.push(part);
            }
        }
        parts.sort_unstable();
        Ok(parts)
    }

    fn delete_manifest(&self, sequence: u64) -> Result<()> {
        fs::remove_file(self.manifest_path(sequence))?;
        Ok(())
    }

    fn delete_partition(&self, part: PartitionRef) -> Result<()> {
        fs::remove_file(self.partition_path(part.id, part.generation))?;
        Ok(())
    }
}

// ── In-memory store ────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryInner {
    partitions: BTreeMap<PartitionRef, Vec<u8>>,
    manifests: BTreeMap<u64, Vec<u8>>,
    latest: Option<u64>,
}

/// Volatile store holding encoded bytes, for tests and ephemeral engines.
///
/// Writes can be made to fail on demand to exercise retry paths.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    next_generation: AtomicU64,
    next_sequence: AtomicU64,
    failing_writes: AtomicU32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            next_generation: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
            failing_writes: AtomicU32::new(0),
        }
    }

    /// Make the next `n` writes fail with an I/O error
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Flip a byte inside a stored partition generation
    pub fn corrupt_partition(&self, part: PartitionRef) -> bool {
        let mut inner = self.inner.lock();
        match inner.partitions.get_mut(&part) {
            Some(bytes) if !bytes.is_empty() => {
                let last = bytes.len() - 1;
                bytes[last] ^= 0xFF;
                true
            }
            _ => false,
        }
    }

    fn check_write(&self) -> Result<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "injected write failure")));
        }
        Ok(())
    }
}

impl PartitionStore for MemoryStore {
    fn allocate_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    fn allocate_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn write_partition(&self, data: &PartitionData, generation: u64) -> Result<()> {
        self.check_write()?;
        let bytes = codec::encode_partition(data)?;
        self.inner.lock().partitions.insert(
            PartitionRef {
                id: data.id,
                generation,
            },
            bytes,
        );
        Ok(())
    }

    fn read_partition(&self, id: PartitionId, generation: u64) -> Result<PartitionData> {
        let inner = self.inner.lock();
        let bytes = inner
            .partitions
            .get(&PartitionRef { id, generation })
            .ok_or_else(|| Error::InvalidState(format!("no partition {} generation {}", id, generation)))?;
        codec::decode_partition(bytes)
    }

    fn commit_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.check_write()?;
        let bytes = codec::encode_manifest(manifest)?;
        let mut inner = self.inner.lock();
        inner.manifests.insert(manifest.sequence, bytes);
        inner.latest = Some(manifest.sequence);
        Ok(())
    }

    fn read_manifest(&self, sequence: u64) -> Result<Manifest> {
        let inner = self.inner.lock();
        let bytes = inner
            .manifests
            .get(&sequence)
            .ok_or_else(|| Error::InvalidState(format!("no manifest {}", sequence)))?;
        codec::decode_manifest(bytes)
    }

    fn latest_sequence(&self) -> Result<Option<u64>> {
        Ok(self.inner.lock().latest)
    }

    fn list_manifests(&self) -> Result<Vec<u64>> {
        Ok(self.inner.lock().manifests.keys().copied().collect())
    }

    fn list_partitions(&self) -> Result<Vec<PartitionRef>> {
        Ok(self.inner.lock().partitions.keys().copied().collect())
    }

    fn delete_manifest(&self, sequence: u64) -> Result<()> {
        self.inner.lock().manifests.remove(&sequence);
        Ok(())
    }

    fn delete_partition(&self, part: PartitionRef) -> Result<()> {
        self.inner.lock().partitions.remove(&part);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neuron::{ClusterId, NeuronId, NeuronRecord};
    use crate::quantizer::Codebook;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn partition(id: PartitionId, neurons: u32) -> PartitionData {
        PartitionData {
            id,
            neurons: (0..neurons)
                .map(|i| NeuronRecord {
                    id: NeuronId::new(ClusterId(id * 4), i),
                    region: 0,
                    importance: 0.5,
                    usage: 1,
                    created_at: Utc::now(),
                    last_activated: None,
                    synapses: Vec::new(),
                })
                .collect(),
        }
    }

    fn manifest(store: &dyn PartitionStore, partitions: Vec<PartitionRef>) -> Manifest {
        Manifest {
            sequence: store.allocate_sequence(),
            engine_id: Uuid::new_v4(),
            created_at: Utc::now(),
            step: 0,
            next_cluster_id: 0,
            codebook: Codebook::new(4, 4, 0.95),
            clusters: Vec::new(),
            partitions,
        }
    }

    #[test]
    fn test_fs_partition_round_trip() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let data = partition(3, 5);
        let generation = store.allocate_generation();
        store.write_partition(&data, generation).unwrap();

        assert!(store.partition_path(3, generation).exists());
        assert_eq!(store.read_partition(3, generation).unwrap(), data);
        assert_eq!(store.load_partition(3, Some(generation)), data);
    }

    #[test]
    fn test_missing_and_corrupt_partitions_load_empty() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(store.load_partition(1, Some(99)).neurons.is_empty());
        assert!(store.load_partition(1, None).neurons.is_empty());

        let generation = store.allocate_generation();
        store.write_partition(&partition(1, 3), generation).unwrap();
        fs::write(store.partition_path(1, generation), b"garbage").unwrap();
        assert!(store.load_partition(1, Some(generation)).neurons.is_empty());
    }

    #[test]
    fn test_latest_falls_back_to_older_manifest() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let first = manifest(&store, Vec::new());
        store.commit_manifest(&first).unwrap();
        let second = manifest(&store, Vec::new());
        store.commit_manifest(&second).unwrap();
        assert_eq!(store.load_latest().map(|m| m.sequence), Some(second.sequence));

        fs::write(store.manifest_path(second.sequence), b"torn").unwrap();
        assert_eq!(store.load_latest().map(|m| m.sequence), Some(first.sequence));

        fs::write(store.manifest_path(first.sequence), b"torn").unwrap();
        assert!(store.load_latest().is_none());
    }

    #[test]
    fn test_reopen_continues_counters() {
        let dir = tempdir().unwrap();
        let (generation, sequence) = {
            let store = FsStore::open(dir.path()).unwrap();
            let generation = store.allocate_generation();
            store.write_partition(&partition(0, 1), generation).unwrap();
            let m = manifest(&store, vec![PartitionRef { id: 0, generation }]);
            store.commit_manifest(&m).unwrap();
            (generation, m.sequence)
        };

        fs::write(dir.path().join(PARTITIONS_DIR).join("p00000000-g000000000009.part.tmp"), b"x").unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(store.allocate_generation() > generation);
        assert!(store.allocate_sequence() > sequence);
        assert_eq!(store.list_partitions().unwrap().len(), 1);
    }

    #[test]
    fn test_gc_keeps_reachable_generations() {
        let store = MemoryStore::new();
        let mut refs = Vec::new();
        for _ in 0..4 {
            let generation = store.allocate_generation();
            store.write_partition(&partition(0, 1), generation).unwrap();
            let part = PartitionRef { id: 0, generation };
            store.commit_manifest(&manifest(&store, vec![part])).unwrap();
            refs.push(part);
        }
        // Partition 1 only appears in a spill, never in a manifest
        let spilled = PartitionRef {
            id: 1,
            generation: store.allocate_generation(),
        };
        store.write_partition(&partition(1, 1), spilled.generation).unwrap();

        let report = store.collect_garbage(2, &BTreeMap::new()).unwrap();
        assert_eq!(report.manifests_deleted, 2);
        assert_eq!(report.partitions_deleted, 2);

        let remaining = store.list_partitions().unwrap();
        assert_eq!(remaining, vec![refs[2], refs[3], spilled]);
        assert!(store.load_latest().is_some());
    }

    #[test]
    fn test_gc_respects_live_generation() {
        let store = MemoryStore::new();
        let old = PartitionRef {
            id: 0,
            generation: store.allocate_generation(),
        };
        store.write_partition(&partition(0, 1), old.generation).unwrap();
        let new = PartitionRef {
            id: 0,
            generation: store.allocate_generation(),
        };
        store.write_partition(&partition(0, 2), new.generation).unwrap();
        store.commit_manifest(&manifest(&store, vec![new])).unwrap();

        let live = BTreeMap::from([(0, old.generation)]);
        store.collect_garbage(1, &live).unwrap();
        assert_eq!(store.list_partitions().unwrap().len(), 2);
    }

    #[test]
    fn test_injected_write_failures() {
        let store = MemoryStore::new();
        store.fail_next_writes(1);
        assert!(store.write_partition(&partition(0, 1), 1).is_err());
        assert!(store.write_partition(&partition(0, 1), 1).is_ok());
    }
}
