//! On-disk persistence of a [`VectorIndex`] and its chunk metadata.
//!
//! Layout inside the index directory:
//!
//! - `vectors.bin`: `DCVX` magic, format version (`u32`), metric (`u8`),
//!   dimensions (`u32`), count (`u64`), then `count * dimensions`
//!   little-endian `f32`. A vector's id is its position.
//! - `chunks.json`: the metadata table, one row per id in the same order,
//!   plus the embedder name and a SHA-256 of `vectors.bin`.
//!
//! Both files are required and must agree; anything else is a
//! [`RagError::CorruptIndex`].

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::{DistanceMetric, IndexEntry, VectorIndex};
use crate::persistence;
use crate::types::Chunk;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const METADATA_FILE: &str = "chunks.json";

const MAGIC: &[u8; 4] = b"DCVX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 1 + 4 + 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataTable {
    format_version: u32,
    metric: DistanceMetric,
    dimensions: usize,
    embedder: String,
    created_at: DateTime<Utc>,
    vectors_sha256: String,
    entries: Vec<MetadataRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataRow {
    id: usize,
    chunk_id: String,
    text: String,
    source_document_id: String,
    source_name: String,
    sequence_index: usize,
}

/// Facts recorded about a persisted index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub embedder: String,
    pub metric: DistanceMetric,
    pub dimensions: usize,
    pub count: usize,
    pub created_at: DateTime<Utc>,
}

/// How [`IndexStore::prepare`] obtained its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Reused the persisted index; no embedding calls were made.
    Loaded,
    /// Embedded the chunks and saved a fresh index.
    Built { reason: String },
}

/// A ready index plus how it was obtained.
#[derive(Debug, Clone)]
pub struct PreparedIndex {
    pub index: VectorIndex,
    pub outcome: PrepareOutcome,
}

/// Saves and loads an index in one directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Whether both artifacts are present. Says nothing about their validity.
    pub fn exists(&self) -> bool {
        self.vectors_path().is_file() && self.metadata_path().is_file()
    }

    /// Write both artifacts atomically.
    pub fn save(&self, index: &VectorIndex, embedder: &str) -> Result<()> {
        let vectors = encode_vectors(index);
        let table = MetadataTable {
            format_version: FORMAT_VERSION,
            metric: index.metric(),
            dimensions: index.dimensions(),
            embedder: embedder.to_string(),
            created_at: Utc::now(),
            vectors_sha256: sha256_hex(&vectors),
            entries: index
                .entries()
                .iter()
                .enumerate()
                .map(|(id, entry)| {
                    let chunk = entry.chunk();
                    MetadataRow {
                        id,
                        chunk_id: chunk.id.clone(),
                        text: chunk.text.clone(),
                        source_document_id: chunk.source_document_id.clone(),
                        source_name: chunk.source_name.clone(),
                        sequence_index: chunk.sequence_index,
                    }
                })
                .collect(),
        };
        let metadata = serde_json::to_vec_pretty(&table)?;

        let vectors_path = self.vectors_path();
        let metadata_path = self.metadata_path();
        persistence::atomic_write_all(&[
            (vectors_path.as_path(), vectors.as_slice()),
            (metadata_path.as_path(), metadata.as_slice()),
        ])?;

        info!(
            path = %self.dir.display(),
            entries = index.len(),
            dimensions = index.dimensions(),
            metric = %index.metric(),
            "Saved vector index"
        );
        Ok(())
    }

    /// Load the persisted index.
    pub fn load(&self) -> Result<VectorIndex> {
        self.load_with_info().map(|(index, _)| index)
    }

    /// Load the persisted index together with its recorded facts.
    pub fn load_with_info(&self) -> Result<(VectorIndex, IndexInfo)> {
        let vectors_path = self.vectors_path();
        let metadata_path = self.metadata_path();
        for path in [&vectors_path, &metadata_path] {
            if !path.is_file() {
                return Err(RagError::MissingFile { path: path.clone() });
            }
        }

        let vector_bytes = std::fs::read(&vectors_path)?;
        let (metric, dimensions, vectors) = decode_vectors(&vector_bytes, &vectors_path)?;

        let table: MetadataTable = serde_json::from_slice(&std::fs::read(&metadata_path)?)
            .map_err(|e| RagError::corrupt(&metadata_path, format!("unreadable metadata: {e}")))?;

        if table.entries.len() != vectors.len() {
            return Err(RagError::corrupt(
                &self.dir,
                format!(
                    "{} vectors but {} metadata rows",
                    vectors.len(),
                    table.entries.len()
                ),
            ));
        }
        if table.vectors_sha256 != sha256_hex(&vector_bytes) {
            return Err(RagError::corrupt(
                &vectors_path,
                "vector blob does not match the checksum in the metadata table",
            ));
        }
        if table.metric != metric || table.dimensions != dimensions {
            return Err(RagError::corrupt(
                &self.dir,
                format!(
                    "metadata describes {}/{} but vectors are {}/{}",
                    table.metric, table.dimensions, metric, dimensions
                ),
            ));
        }

        let mut entries = Vec::with_capacity(vectors.len());
        for (position, (row, embedding)) in table.entries.into_iter().zip(vectors).enumerate() {
            if row.id != position {
                return Err(RagError::corrupt(
                    &metadata_path,
                    format!("row {position} carries id {}", row.id),
                ));
            }
            let chunk = Chunk {
                id: row.chunk_id,
                text: row.text,
                source_document_id: row.source_document_id,
                source_name: row.source_name,
                sequence_index: row.sequence_index,
            };
            entries.push(IndexEntry::new(chunk, embedding));
        }

        let info = IndexInfo {
            embedder: table.embedder,
            metric,
            dimensions,
            count: entries.len(),
            created_at: table.created_at,
        };
        info!(path = %self.dir.display(), entries = info.count, "Loaded vector index");
        Ok((
            VectorIndex::from_persisted(metric, dimensions, entries),
            info,
        ))
    }

    /// Reuse the persisted index when possible, otherwise embed `chunks`,
    /// build, and save.
    ///
    /// A missing, corrupt or stale index (different embedder, dimension or
    /// metric) is rebuilt. Other load failures are surfaced.
    pub async fn prepare(
        &self,
        chunks: &[Chunk],
        embedder: &dyn EmbeddingProvider,
        metric: DistanceMetric,
        force_rebuild: bool,
        batch_size: usize,
    ) -> Result<PreparedIndex> {
        let reason = if force_rebuild {
            "rebuild requested".to_string()
        } else {
            match self.load_with_info() {
                Ok((index, info)) => match stale_reason(&info, embedder, metric) {
                    None => {
                        return Ok(PreparedIndex {
                            index,
                            outcome: PrepareOutcome::Loaded,
                        });
                    }
                    Some(reason) => reason,
                },
                Err(e) if e.is_recoverable_index_error() => {
                    if !matches!(e, RagError::MissingFile { .. }) {
                        warn!(path = %self.dir.display(), error = %e, "Persisted index unusable, rebuilding");
                    }
                    e.to_string()
                }
                Err(e) => return Err(e),
            }
        };

        info!(path = %self.dir.display(), reason = %reason, chunks = chunks.len(), "Building vector index");
        let index = build_index(chunks, embedder, metric, batch_size).await?;
        self.save(&index, embedder.name())?;
        Ok(PreparedIndex {
            index,
            outcome: PrepareOutcome::Built { reason },
        })
    }
}

fn stale_reason(
    info: &IndexInfo,
    embedder: &dyn EmbeddingProvider,
    metric: DistanceMetric,
) -> Option<String> {
    if info.embedder != embedder.name() {
        Some(format!(
            "index was built with {} but the embedder is {}",
            info.embedder,
            embedder.name()
        ))
    } else if info.dimensions != embedder.dimensions() {
        Some(format!(
            "index has {} dimensions but the embedder produces {}",
            info.dimensions,
            embedder.dimensions()
        ))
    } else if info.metric != metric {
        Some(format!(
            "index uses {} distance but {} is configured",
            info.metric, metric
        ))
    } else {
        None
    }
}

/// Embed `chunks` in batches and build an index from them.
pub async fn build_index(
    chunks: &[Chunk],
    embedder: &dyn EmbeddingProvider,
    metric: DistanceMetric,
    batch_size: usize,
) -> Result<VectorIndex> {
    if chunks.is_empty() {
        return Err(RagError::empty_input("build_index"));
    }
    let started = Instant::now();
    let mut entries = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(RagError::embedding(format!(
                "{} returned {} vectors for {} texts",
                embedder.name(),
                vectors.len(),
                batch.len()
            )));
        }
        for (chunk, vector) in batch.iter().zip(vectors) {
            if vector.len() != embedder.dimensions() {
                return Err(RagError::DimensionMismatch {
                    expected: embedder.dimensions(),
                    actual: vector.len(),
                });
            }
            entries.push(IndexEntry::new(chunk.clone(), vector));
        }
    }
    let index = VectorIndex::build(entries, metric)?;
    info!(
        entries = index.len(),
        embedder = embedder.name(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Embedded chunks"
    );
    Ok(index)
}

fn encode_vectors(index: &VectorIndex) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + index.len() * index.dimensions() * 4);
    buf.put_slice(MAGIC);
    buf.put_u32_le(FORMAT_VERSION);
    buf.put_u8(index.metric().to_byte());
    buf.put_u32_le(index.dimensions() as u32);
    buf.put_u64_le(index.len() as u64);
    for entry in index.entries() {
        for &x in entry.embedding() {
            buf.put_f32_le(x);
        }
    }
    buf.to_vec()
}

fn decode_vectors(data: &[u8], path: &Path) -> Result<(DistanceMetric, usize, Vec<Vec<f32>>)> {
    if data.len() < HEADER_LEN {
        return Err(RagError::corrupt(path, "file shorter than header"));
    }
    let mut buf = data;
    if &buf[..4] != MAGIC {
        return Err(RagError::corrupt(path, "bad magic bytes"));
    }
    buf.advance(4);
    let version = buf.get_u32_le();
    if version != FORMAT_VERSION {
        return Err(RagError::corrupt(
            path,
            format!("unsupported format version {version}"),
        ));
    }
    let metric = DistanceMetric::from_byte(buf.get_u8())
        .ok_or_else(|| RagError::corrupt(path, "unknown distance metric"))?;
    let dimensions = buf.get_u32_le() as usize;
    let count = buf.get_u64_le() as usize;

    let expected = count
        .checked_mul(dimensions)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| RagError::corrupt(path, "header sizes overflow"))?;
    if buf.remaining() != expected {
        return Err(RagError::corrupt(
            path,
            format!(
                "header promises {count} x {dimensions} floats but {} bytes follow",
                buf.remaining()
            ),
        ));
    }

    let mut vectors = Vec::with_capacity(count);
    for _ in 0..count {
        vectors.push((0..dimensions).map(|_| buf.get_f32_le()).collect());
    }
    Ok((metric, dimensions, vectors))
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::LocalEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            text: text.into(),
            source_document_id: "doc".into(),
            source_name: "doc.txt".into(),
            sequence_index: 0,
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            chunk("c0", "rust ownership and borrowing"),
            chunk("c1", "python data science notebooks"),
            chunk("c2", "the borrow checker enforces ownership"),
        ]
    }

    /// Counts embedding calls so cache hits can be asserted.
    struct CountingEmbedder {
        inner: LocalEmbedder,
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                inner: LocalEmbedder::new(32),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn name(&self) -> &str {
            self.inner.name()
        }
    }

    async fn built(metric: DistanceMetric) -> VectorIndex {
        build_index(&sample_chunks(), &LocalEmbedder::new(32), metric, 2)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_load_roundtrip_preserves_search() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        let index = built(DistanceMetric::Cosine).await;
        store.save(&index, "local-tf-32").unwrap();

        let (loaded, info) = store.load_with_info().unwrap();
        assert_eq!(info.count, 3);
        assert_eq!(info.embedder, "local-tf-32");

        let query = LocalEmbedder::new(32).embed("ownership").await.unwrap();
        assert_eq!(
            index.search(&query, 3).unwrap(),
            loaded.search(&query, 3).unwrap()
        );
        assert!(!dir.path().join("vectors.bin.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&built(DistanceMetric::L2).await, "e").unwrap();
        std::fs::remove_file(store.metadata_path()).unwrap();

        match store.load() {
            Err(RagError::MissingFile { path }) => assert_eq!(path, store.metadata_path()),
            other => panic!("expected MissingFile, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_count_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&built(DistanceMetric::L2).await, "e").unwrap();

        let mut table: MetadataTable =
            serde_json::from_slice(&std::fs::read(store.metadata_path()).unwrap()).unwrap();
        table.entries.pop();
        std::fs::write(store.metadata_path(), serde_json::to_vec(&table).unwrap()).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, RagError::CorruptIndex { .. }), "{err}");
        assert!(err.to_string().contains("3 vectors but 2 metadata rows"));
    }

    #[tokio::test]
    async fn test_load_detects_vectors_from_another_save() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&built(DistanceMetric::L2).await, "e").unwrap();
        let old_metadata = std::fs::read(store.metadata_path()).unwrap();

        let other = build_index(
            &[chunk("x", "a"), chunk("y", "b"), chunk("z", "c")],
            &LocalEmbedder::new(32),
            DistanceMetric::L2,
            8,
        )
        .await
        .unwrap();
        store.save(&other, "e").unwrap();
        std::fs::write(store.metadata_path(), old_metadata).unwrap();

        assert!(matches!(store.load(), Err(RagError::CorruptIndex { .. })));
    }

    #[test]
    fn test_decode_rejects_truncated_blob() {
        let path = Path::new("vectors.bin");
        assert!(decode_vectors(b"DCV", path).is_err());

        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        data.push(0);
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&1u64.to_le_bytes());
        data.extend_from_slice(&1.0f32.to_le_bytes());
        let err = decode_vectors(&data, path).unwrap_err();
        assert!(err.to_string().contains("header promises 1 x 2 floats"));
    }

    #[tokio::test]
    async fn test_prepare_builds_then_loads() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path().join("index"));
        let embedder = CountingEmbedder::new();
        let chunks = sample_chunks();

        let first = store
            .prepare(&chunks, &embedder, DistanceMetric::Cosine, false, 8)
            .await
            .unwrap();
        assert!(matches!(first.outcome, PrepareOutcome::Built { .. }));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);

        let second = store
            .prepare(&chunks, &embedder, DistanceMetric::Cosine, false, 8)
            .await
            .unwrap();
        assert_eq!(second.outcome, PrepareOutcome::Loaded);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(second.index.len(), 3);
    }

    #[tokio::test]
    async fn test_prepare_force_rebuild_embeds_again() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        let embedder = CountingEmbedder::new();
        let chunks = sample_chunks();
        store
            .prepare(&chunks, &embedder, DistanceMetric::L2, false, 8)
            .await
            .unwrap();

        let rebuilt = store
            .prepare(&chunks[..1], &embedder, DistanceMetric::L2, true, 8)
            .await
            .unwrap();
        assert!(matches!(rebuilt.outcome, PrepareOutcome::Built { .. }));
        assert_eq!(rebuilt.index.len(), 1);
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_rebuilds_corrupt_index() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&built(DistanceMetric::L2).await, "local-tf-32").unwrap();
        std::fs::write(store.vectors_path(), b"garbage").unwrap();

        let prepared = store
            .prepare(
                &sample_chunks(),
                &LocalEmbedder::new(32),
                DistanceMetric::L2,
                false,
                8,
            )
            .await
            .unwrap();
        assert!(matches!(prepared.outcome, PrepareOutcome::Built { .. }));
        assert!(store.load().is_ok());
    }

    #[tokio::test]
    async fn test_prepare_rebuilds_when_metric_changes() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        let embedder = LocalEmbedder::new(32);
        store
            .prepare(&sample_chunks(), &embedder, DistanceMetric::L2, false, 8)
            .await
            .unwrap();

        let prepared = store
            .prepare(&sample_chunks(), &embedder, DistanceMetric::Cosine, false, 8)
            .await
            .unwrap();
        match prepared.outcome {
            PrepareOutcome::Built { reason } => assert!(reason.contains("cosine")),
            PrepareOutcome::Loaded => panic!("expected a rebuild"),
        }
        assert_eq!(prepared.index.metric(), DistanceMetric::Cosine);
    }

    #[tokio::test]
    async fn test_prepare_with_no_chunks_and_no_index_is_empty_input() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        let err = store
            .prepare(&[], &LocalEmbedder::new(8), DistanceMetric::L2, false, 8)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmptyInput { .. }));
    }
}
