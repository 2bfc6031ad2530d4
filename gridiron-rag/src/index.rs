//! In-memory vector index using exact cosine similarity.
//!
//! [`VectorIndex`] is append-only. Writers are serialised by an internal
//! mutex and publish each batch by swapping in a new snapshot, so a reader
//! always searches a consistent prior state and never sees half of a batch.
//! The index round-trips through a compact binary stream (see
//! [`VectorIndex::write_to`]) with vectors stored bit-exactly.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::{IndexEntry, ScoredSegment, Segment};
use crate::error::{RagError, Result};

const MAGIC: [u8; 4] = *b"GRDX";
const FORMAT_VERSION: u16 = 1;
/// Upper bound on allocations sized from an untrusted stream header.
const MAX_PREALLOC: usize = 4096;

/// What [`VectorIndex::add`] does with an entry whose segment id is already indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Ignore an entry whose segment is already indexed with the same text;
    /// the first copy keeps its insertion position. The same id with
    /// different text is rejected.
    #[default]
    Skip,
    /// Store the entry again; searches may return both copies.
    Append,
}

impl DuplicatePolicy {
    fn to_byte(self) -> u8 {
        match self {
            DuplicatePolicy::Skip => 0,
            DuplicatePolicy::Append => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(DuplicatePolicy::Skip),
            1 => Ok(DuplicatePolicy::Append),
            other => Err(RagError::Persistence(format!("unknown duplicate policy {other}"))),
        }
    }
}

#[derive(Debug)]
struct StoredEntry {
    embedding: Vec<f32>,
    norm: f32,
    segment: Segment,
}

#[derive(Debug, Default)]
struct Snapshot {
    dimensions: Option<usize>,
    entries: Vec<Arc<StoredEntry>>,
    /// Segment id to the position of its first stored entry.
    ids: HashMap<String, usize>,
}

impl Snapshot {
    fn push(&mut self, embedding: Vec<f32>, segment: Segment) {
        self.ids.entry(segment.id.clone()).or_insert(self.entries.len());
        let norm = l2_norm(&embedding);
        self.entries.push(Arc::new(StoredEntry { embedding, norm, segment }));
    }
}

/// Append-only vector index with exact top-k cosine search.
///
/// # Example
///
/// ```rust,ignore
/// use gridiron_rag::VectorIndex;
///
/// let index = VectorIndex::new();
/// index.add(entries)?;
/// let top = index.search(&query_vector, 10)?;
/// ```
#[derive(Debug, Default)]
pub struct VectorIndex {
    policy: DuplicatePolicy,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

/// L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity given precomputed norms. Returns 0.0 for zero vectors.
fn cosine(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

fn check_vector(vector: &[f32], expected: usize, what: &str) -> Result<()> {
    if vector.len() != expected {
        return Err(RagError::InvalidConfig(format!(
            "{what} has {} dimensions, index expects {expected}",
            vector.len()
        )));
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(RagError::InvalidConfig(format!("{what} contains a non-finite component")));
    }
    Ok(())
}

impl VectorIndex {
    /// Create an empty index that skips duplicate segment ids.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty index with an explicit re-add policy.
    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self { policy, ..Self::default() }
    }

    /// The re-add policy of this index.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    fn load(&self) -> Arc<Snapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.load().entries.len()
    }

    /// Whether nothing has been added yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimensionality, fixed by the first added entry.
    pub fn dimensions(&self) -> Option<usize> {
        self.load().dimensions
    }

    /// Append a batch of entries.
    ///
    /// The batch is validated as a whole and published atomically: either
    /// every accepted entry becomes visible to searches at once, or (on error)
    /// none does. Returns the number of entries actually stored, which is
    /// lower than the batch size when [`DuplicatePolicy::Skip`] drops repeats.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if vectors are empty, non-finite,
    /// or disagree on dimensionality with each other or with the index, and
    /// [`RagError::ConflictingSegment`] if under [`DuplicatePolicy::Skip`] a
    /// segment id is already indexed with different text.
    pub fn add(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.load();

        let dimensions = current.dimensions.unwrap_or(entries[0].embedding.len());
        if dimensions == 0 {
            return Err(RagError::InvalidConfig("embeddings must not be empty".to_string()));
        }
        for entry in &entries {
            check_vector(&entry.embedding, dimensions, &format!("segment '{}'", entry.segment.id))?;
        }

        let mut next = Snapshot {
            dimensions: Some(dimensions),
            entries: current.entries.clone(),
            ids: current.ids.clone(),
        };
        let mut added = 0;
        for IndexEntry { embedding, segment } in entries {
            let known = match self.policy {
                DuplicatePolicy::Skip => next.ids.get(&segment.id).copied(),
                DuplicatePolicy::Append => None,
            };
            if let Some(position) = known {
                if next.entries[position].segment.text != segment.text {
                    return Err(RagError::ConflictingSegment(segment.id));
                }
                debug!(segment.id = %segment.id, "skipping already indexed segment");
                continue;
            }
            next.push(embedding, segment);
            added += 1;
        }

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        debug!(added, total = current.entries.len() + added, "index batch committed");
        Ok(added)
    }

    /// Return the `k` entries most similar to `query`, best first.
    ///
    /// `k` larger than the index is clamped to the index size. Equal scores
    /// keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyIndex`] if nothing has been added, and
    /// [`RagError::InvalidConfig`] if the query has the wrong dimensionality
    /// or non-finite components.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredSegment>> {
        let snapshot = self.load();
        let Some(dimensions) = snapshot.dimensions.filter(|_| !snapshot.entries.is_empty()) else {
            return Err(RagError::EmptyIndex);
        };
        check_vector(query, dimensions, "query")?;

        let query_norm = l2_norm(query);
        let mut scored: Vec<(f32, &StoredEntry)> = snapshot
            .entries
            .iter()
            .map(|entry| (cosine(&entry.embedding, entry.norm, query, query_norm), entry.as_ref()))
            .collect();

        // sort_by is stable, so ties stay in insertion order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k.min(snapshot.entries.len()));

        Ok(scored
            .into_iter()
            .map(|(score, entry)| ScoredSegment { segment: entry.segment.clone(), score })
            .collect())
    }

    /// Serialise the index into a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(buffer)
    }

    /// Restore an index from bytes produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Persistence`] for a bad header, truncated data or
    /// trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let index = Self::read_from(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(RagError::Persistence(format!(
                "{} trailing bytes after index",
                cursor.len()
            )));
        }
        Ok(index)
    }

    /// Write the index as a binary stream.
    ///
    /// Layout (little-endian): magic `GRDX`, `u16` version, `u8` duplicate
    /// policy, `u32` dimensions, `u32` entry count, then per entry the raw
    /// `f32` vector followed by a `u32`-length-prefixed JSON segment.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let snapshot = self.load();
        let count = u32::try_from(snapshot.entries.len())
            .map_err(|_| RagError::Persistence("too many entries to persist".to_string()))?;
        let dimensions = u32::try_from(snapshot.dimensions.unwrap_or(0))
            .map_err(|_| RagError::Persistence("dimensions too large to persist".to_string()))?;

        writer.write_all(&MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&[self.policy.to_byte()])?;
        writer.write_all(&dimensions.to_le_bytes())?;
        writer.write_all(&count.to_le_bytes())?;

        for entry in &snapshot.entries {
            for value in &entry.embedding {
                writer.write_all(&value.to_le_bytes())?;
            }
            let segment = serde_json::to_vec(&entry.segment)
                .map_err(|e| RagError::Persistence(format!("failed to encode segment: {e}")))?;
            let len = u32::try_from(segment.len())
                .map_err(|_| RagError::Persistence("segment too large to persist".to_string()))?;
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(&segment)?;
        }
        Ok(())
    }

    /// Read an index written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic: [u8; 4] = read_array(reader, "magic")?;
        if magic != MAGIC {
            return Err(RagError::Persistence("invalid magic".to_string()));
        }
        let version = u16::from_le_bytes(read_array(reader, "version")?);
        if version != FORMAT_VERSION {
            return Err(RagError::Persistence(format!("unsupported format version {version}")));
        }
        let policy: [u8; 1] = read_array(reader, "duplicate policy")?;
        let policy = DuplicatePolicy::from_byte(policy[0])?;
        let dimensions = u32::from_le_bytes(read_array(reader, "dimensions")?) as usize;
        let count = u32::from_le_bytes(read_array(reader, "entry count")?) as usize;
        if count > 0 && dimensions == 0 {
            return Err(RagError::Persistence("entries present but dimensions is zero".to_string()));
        }

        // header sizes are untrusted: grow as data actually arrives
        let mut snapshot = Snapshot {
            dimensions: (count > 0).then_some(dimensions),
            entries: Vec::with_capacity(count.min(MAX_PREALLOC)),
            ids: HashMap::with_capacity(count.min(MAX_PREALLOC)),
        };
        for _ in 0..count {
            let mut embedding = Vec::with_capacity(dimensions.min(MAX_PREALLOC));
            for _ in 0..dimensions {
                embedding.push(f32::from_le_bytes(read_array(reader, "vector")?));
            }
            let len = u32::from_le_bytes(read_array(reader, "segment length")?) as usize;
            let mut raw = Vec::with_capacity(len.min(MAX_PREALLOC));
            reader.by_ref().take(len as u64).read_to_end(&mut raw)?;
            if raw.len() != len {
                return Err(RagError::Persistence(
                    "unexpected end of stream reading segment".to_string(),
                ));
            }
            let segment: Segment = serde_json::from_slice(&raw)
                .map_err(|e| RagError::Persistence(format!("failed to decode segment: {e}")))?;
            snapshot.push(embedding, segment);
        }

        info!(entries = count, dimensions, "loaded vector index");
        Ok(Self { policy, snapshot: RwLock::new(Arc::new(snapshot)), writer: Mutex::new(()) })
    }

    /// Persist the index to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Load an index from a file written by [`save`](Self::save).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            RagError::Persistence(format!("unexpected end of stream reading {what}"))
        }
        _ => RagError::Io(e),
    })
}

fn read_array<const N: usize, R: Read>(reader: &mut R, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    read_exact(reader, &mut buf, what)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            embedding,
            segment: Segment {
                id: id.to_string(),
                text: format!("text of {id}"),
                source_id: "https://example.com/doc".to_string(),
                start_offset: 0,
                sequence: 0,
            },
        }
    }

    fn ids(results: &[ScoredSegment]) -> Vec<&str> {
        results.iter().map(|r| r.segment.id.as_str()).collect()
    }

    #[test]
    fn search_on_empty_index_fails() {
        let index = VectorIndex::new();
        assert!(matches!(index.search(&[1.0, 0.0], 3), Err(RagError::EmptyIndex)));
    }

    #[test]
    fn search_orders_by_cosine_not_magnitude() {
        let index = VectorIndex::new();
        index
            .add(vec![
                entry("far", vec![0.0, 10.0]),
                entry("near", vec![0.1, 0.0]),
                entry("mid", vec![5.0, 5.0]),
            ])
            .unwrap();
        let results = index.search(&[3.0, 0.0], 3).unwrap();
        assert_eq!(ids(&results), vec!["near", "mid", "far"]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn k_is_clamped_and_ties_keep_insertion_order() {
        let index = VectorIndex::new();
        index
            .add(vec![
                entry("a", vec![1.0, 0.0]),
                entry("b", vec![2.0, 0.0]),
                entry("c", vec![0.0, 1.0]),
                entry("d", vec![3.0, 0.0]),
            ])
            .unwrap();
        let results = index.search(&[1.0, 0.0], 50).unwrap();
        assert_eq!(ids(&results), vec!["a", "b", "d", "c"]);
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected_atomically() {
        let index = VectorIndex::new();
        index.add(vec![entry("a", vec![1.0, 0.0])]).unwrap();
        let err = index.add(vec![entry("b", vec![1.0, 0.0]), entry("c", vec![1.0, 0.0, 0.0])]);
        assert!(matches!(err, Err(RagError::InvalidConfig(_))));
        assert_eq!(index.len(), 1);
        assert!(index.search(&[1.0, 0.0, 0.0], 1).is_err());
    }

    #[test]
    fn non_finite_vectors_are_rejected() {
        let index = VectorIndex::new();
        assert!(index.add(vec![entry("a", vec![f32::NAN, 0.0])]).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn zero_vectors_score_zero() {
        let index = VectorIndex::new();
        index.add(vec![entry("zero", vec![0.0, 0.0]), entry("x", vec![1.0, 0.0])]).unwrap();
        let results = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(ids(&results), vec!["x", "zero"]);
        assert_eq!(results[1].score, 0.0);
    }

    #[test]
    fn skip_policy_ignores_re_added_segments() {
        let index = VectorIndex::new();
        let batch = vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])];
        assert_eq!(index.add(batch.clone()).unwrap(), 2);
        assert_eq!(index.add(batch).unwrap(), 0);
        let results = index.search(&[1.0, 1.0], 10).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn skip_policy_rejects_changed_text_under_a_known_id() {
        let index = VectorIndex::new();
        let mut old = entry("u#0", vec![1.0, 0.0]);
        old.segment.text = "old text".to_string();
        index.add(vec![old]).unwrap();

        let mut fresh = entry("u#1", vec![0.0, 1.0]);
        fresh.segment.text = "tail of the new version".to_string();
        let mut changed = entry("u#0", vec![1.0, 0.0]);
        changed.segment.text = "NEW text".to_string();

        let err = index.add(vec![fresh, changed]).unwrap_err();
        assert!(matches!(err, RagError::ConflictingSegment(ref id) if id == "u#0"));
        // nothing from the rejected batch is visible
        assert_eq!(index.len(), 1);
        let texts: Vec<_> = index
            .search(&[1.0, 1.0], 10)
            .unwrap()
            .into_iter()
            .map(|r| r.segment.text)
            .collect();
        assert_eq!(texts, vec!["old text"]);
    }

    #[test]
    fn skip_policy_rejects_conflicts_within_one_batch() {
        let index = VectorIndex::new();
        let first = entry("a", vec![1.0, 0.0]);
        let mut second = entry("a", vec![1.0, 0.0]);
        second.segment.text = "different".to_string();
        assert!(matches!(index.add(vec![first, second]), Err(RagError::ConflictingSegment(_))));
        assert!(index.is_empty());
    }

    #[test]
    fn append_policy_keeps_duplicates() {
        let index = VectorIndex::with_policy(DuplicatePolicy::Append);
        let batch = vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])];
        index.add(batch.clone()).unwrap();
        index.add(batch).unwrap();
        let results = index.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(ids(&results), vec!["a", "a", "b", "b"]);
    }

    #[test]
    fn round_trip_preserves_search_results() {
        let index = VectorIndex::with_policy(DuplicatePolicy::Append);
        index
            .add(vec![
                entry("a", vec![0.3, 0.1, -0.7]),
                entry("b", vec![0.123_456_79, 0.5, 0.0]),
                entry("c", vec![-1.0, 2.5, 1e-7]),
            ])
            .unwrap();
        let restored = VectorIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.policy(), DuplicatePolicy::Append);
        for query in [[1.0, 0.0, 0.0], [0.2, -0.4, 0.9], [0.0, 1.0, 1.0]] {
            assert_eq!(index.search(&query, 3).unwrap(), restored.search(&query, 3).unwrap());
        }
    }

    #[test]
    fn empty_index_round_trips() {
        let restored = VectorIndex::from_bytes(&VectorIndex::new().to_bytes().unwrap()).unwrap();
        assert!(restored.is_empty());
        assert_eq!(restored.dimensions(), None);
    }

    #[test]
    fn corrupt_streams_are_rejected() {
        let index = VectorIndex::new();
        index.add(vec![entry("a", vec![1.0, 0.0])]).unwrap();
        let bytes = index.to_bytes().unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = 0;
        assert!(matches!(VectorIndex::from_bytes(&bad_magic), Err(RagError::Persistence(_))));

        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(VectorIndex::from_bytes(truncated), Err(RagError::Persistence(_))));

        let mut trailing = bytes;
        trailing.push(0);
        assert!(matches!(VectorIndex::from_bytes(&trailing), Err(RagError::Persistence(_))));
    }

    #[test]
    fn oversized_header_fails_without_allocating() {
        let mut header = MAGIC.to_vec();
        header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        header.push(DuplicatePolicy::Skip.to_byte());
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(VectorIndex::from_bytes(&header), Err(RagError::Persistence(_))));

        // one real vector, then a segment length far beyond the data
        let mut huge_segment = MAGIC.to_vec();
        huge_segment.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        huge_segment.push(DuplicatePolicy::Skip.to_byte());
        huge_segment.extend_from_slice(&1u32.to_le_bytes());
        huge_segment.extend_from_slice(&1u32.to_le_bytes());
        huge_segment.extend_from_slice(&1.0f32.to_le_bytes());
        huge_segment.extend_from_slice(&u32::MAX.to_le_bytes());
        huge_segment.extend_from_slice(b"{}");
        assert!(matches!(VectorIndex::from_bytes(&huge_segment), Err(RagError::Persistence(_))));
    }

    #[test]
    fn readers_never_see_partial_batches() {
        let index = Arc::new(VectorIndex::new());
        let seed = (0..4).map(|i| entry(&format!("seed{i}"), vec![1.0, i as f32])).collect();
        index.add(seed).unwrap();

        let writer = {
            let index = index.clone();
            std::thread::spawn(move || {
                for batch in 0..50 {
                    let entries = (0..4)
                        .map(|i| entry(&format!("b{batch}-{i}"), vec![1.0, i as f32]))
                        .collect();
                    index.add(entries).unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let n = index.search(&[1.0, 0.5], usize::MAX).unwrap().len();
                        assert_eq!(n % 4, 0, "observed a partial batch of {n} entries");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(index.len(), 204);
    }
}
