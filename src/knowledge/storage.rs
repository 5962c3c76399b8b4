//! On-disk index layout.
//!
//! An index directory holds three co-located artifacts:
//!
//! - `vectors.bin` — binary vector rows with a versioned header:
//!   - version: u8 (1)
//!   - model_id: [u8; 32] (SHA256 hash of the model name)
//!   - dimensions: u16 (little-endian)
//!   - row_count: u64 (little-endian)
//!   - checksum: u32 (CRC32 of the header fields before the checksum)
//!   followed by row_count rows of dimensions f32 (little-endian); row *i*
//!   belongs to term *i* of terms.json.
//! - `terms.json` — the ordered term list (text + category)
//! - `metadata.json` — term text -> free-form metadata map
//!
//! Reloading must restore exact positional correspondence between the term
//! list and the vector rows; every consistency check here exists to catch a
//! violation of that contract before an index is installed.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::knowledge::index::{Term, TermIndex, UNCATEGORIZED};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + row_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

const VECTORS_FILE: &str = "vectors.bin";
const TERMS_FILE: &str = "terms.json";
const METADATA_FILE: &str = "metadata.json";

/// Errors from index persistence.
///
/// `Io` is surfaced to the caller and never retried here; everything else is
/// a flavor of "the artifacts are mutually inconsistent" and aborts the load
/// without installing an index.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {file}, supported version {supported}")]
    VersionMismatch { file: u8, supported: u8 },

    #[error("Model mismatch: index was built with a different embedding model")]
    ModelMismatch,

    #[error("Checksum mismatch: vector file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Vector file is truncated")]
    Truncated,

    #[error("Artifact mismatch: {terms} terms but {vectors} vector rows")]
    LengthMismatch { terms: usize, vectors: usize },
}

/// Serialized form of a term in terms.json; metadata lives in metadata.json.
#[derive(Debug, Serialize, Deserialize)]
struct TermRecord {
    text: String,
    #[serde(default = "uncategorized")]
    category: String,
}

fn uncategorized() -> String {
    UNCATEGORIZED.to_string()
}

/// Storage manager for one index directory.
pub struct IndexStorage {
    dir: PathBuf,
}

impl IndexStorage {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Check whether an index has been persisted at this location.
    pub fn exists(&self) -> bool {
        self.dir.join(VECTORS_FILE).exists()
    }

    /// Save the index. Each artifact is written atomically (temp file, then
    /// rename), so a crash mid-save leaves the previous generation intact.
    pub fn save(&self, index: &TermIndex, model_id: &[u8; 32]) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;

        self.write_vectors(index, model_id)?;

        let records: Vec<TermRecord> = index
            .terms()
            .iter()
            .map(|t| TermRecord {
                text: t.text.clone(),
                category: t.category.clone(),
            })
            .collect();
        let terms_json = serde_json::to_vec_pretty(&records)
            .map_err(|e| StorageError::InvalidFormat(e.to_string()))?;
        self.write_atomic(TERMS_FILE, &terms_json)?;

        let metadata: BTreeMap<&str, &BTreeMap<String, serde_json::Value>> = index
            .terms()
            .iter()
            .filter(|t| !t.metadata.is_empty())
            .map(|t| (t.text.as_str(), &t.metadata))
            .collect();
        let metadata_json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| StorageError::InvalidFormat(e.to_string()))?;
        self.write_atomic(METADATA_FILE, &metadata_json)?;

        log::info!("saved index ({} terms) to {}", index.len(), self.dir.display());
        Ok(())
    }

    /// Load the index, re-checking every invariant the artifacts are supposed
    /// to uphold. Any inconsistency fails the load; nothing is installed.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<TermIndex, StorageError> {
        let (vectors, dimensions) = self.read_vectors(expected_model_id, expected_dimensions)?;

        let terms_file = File::open(self.dir.join(TERMS_FILE))?;
        let records: Vec<TermRecord> = serde_json::from_reader(BufReader::new(terms_file))
            .map_err(|e| StorageError::InvalidFormat(format!("terms.json: {}", e)))?;

        if records.len() != vectors.len() {
            return Err(StorageError::LengthMismatch {
                terms: records.len(),
                vectors: vectors.len(),
            });
        }

        let metadata_path = self.dir.join(METADATA_FILE);
        let mut metadata: BTreeMap<String, BTreeMap<String, serde_json::Value>> =
            if metadata_path.exists() {
                let file = File::open(metadata_path)?;
                serde_json::from_reader(BufReader::new(file))
                    .map_err(|e| StorageError::InvalidFormat(format!("metadata.json: {}", e)))?
            } else {
                BTreeMap::new()
            };

        let terms: Vec<Term> = records
            .into_iter()
            .map(|r| {
                let meta = metadata.remove(&r.text).unwrap_or_default();
                Term {
                    text: r.text,
                    category: r.category,
                    metadata: meta,
                }
            })
            .collect();

        let index = TermIndex::from_parts(terms, vectors, dimensions)
            .map_err(|e| StorageError::InvalidFormat(e.to_string()))?;

        log::info!("loaded index ({} terms) from {}", index.len(), self.dir.display());
        Ok(index)
    }

    /// Delete all index artifacts if present.
    pub fn delete(&self) -> Result<(), StorageError> {
        for name in [VECTORS_FILE, TERMS_FILE, METADATA_FILE] {
            let path = self.dir.join(name);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn write_vectors(&self, index: &TermIndex, model_id: &[u8; 32]) -> Result<(), StorageError> {
        let path = self.dir.join(VECTORS_FILE);
        let temp_path = path.with_extension("tmp");

        let result = self.write_vectors_to(&temp_path, index, model_id);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn write_vectors_to(
        &self,
        path: &Path,
        index: &TermIndex,
        model_id: &[u8; 32],
    ) -> Result<(), StorageError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let mut header = [0u8; HEADER_SIZE];
        header[0] = FORMAT_VERSION;
        header[1..33].copy_from_slice(model_id);
        header[33..35].copy_from_slice(&(index.dimensions() as u16).to_le_bytes());
        header[35..43].copy_from_slice(&(index.len() as u64).to_le_bytes());
        let checksum = crc32fast::hash(&header[0..43]);
        header[43..47].copy_from_slice(&checksum.to_le_bytes());
        writer.write_all(&header)?;

        for row in index.vectors() {
            for &value in row {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_vectors(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(Vec<Vec<f32>>, usize), StorageError> {
        let file = File::open(self.dir.join(VECTORS_FILE))?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_SIZE];
        read_fully(&mut reader, &mut header)?;

        let version = header[0];
        if version > FORMAT_VERSION {
            return Err(StorageError::VersionMismatch {
                file: version,
                supported: FORMAT_VERSION,
            });
        }

        let stored_checksum = u32::from_le_bytes([header[43], header[44], header[45], header[46]]);
        if stored_checksum != crc32fast::hash(&header[0..43]) {
            return Err(StorageError::ChecksumMismatch);
        }

        if header[1..33] != expected_model_id[..] {
            return Err(StorageError::ModelMismatch);
        }

        let dimensions = u16::from_le_bytes([header[33], header[34]]) as usize;
        if dimensions != expected_dimensions {
            return Err(StorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: dimensions,
            });
        }

        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header[35..43]);
        let row_count = u64::from_le_bytes(count_bytes);

        let mut vectors = Vec::with_capacity(row_count as usize);
        let mut float_bytes = [0u8; 4];
        for _ in 0..row_count {
            let mut row = Vec::with_capacity(dimensions);
            for _ in 0..dimensions {
                read_fully(&mut reader, &mut float_bytes)?;
                row.push(f32::from_le_bytes(float_bytes));
            }
            vectors.push(row);
        }

        Ok((vectors, dimensions))
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.dir.join(name);
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

/// read_exact, but a short read means the file lied about its length and is
/// reported as corruption rather than a bare I/O error.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), StorageError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            StorageError::Truncated
        } else {
            StorageError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::embeddings::EmbeddingProvider;
    use crate::knowledge::testing::StubProvider;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir() -> PathBuf {
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "termbase-storage-test-{}-{}",
            std::process::id(),
            counter
        ))
    }

    fn sample_provider() -> StubProvider {
        StubProvider::new(3)
            .insert("RC造", vec![1.0, 0.0, 0.0])
            .insert("鉄筋コンクリート", vec![0.8, 0.6, 0.0])
            .insert("基礎工事", vec![0.0, 0.0, 1.0])
            .insert("コンクリート", vec![0.9, 0.4, 0.1])
    }

    fn sample_index(provider: &StubProvider) -> TermIndex {
        let mut rc = Term::with_category("RC造", "構造");
        rc.metadata
            .insert("source".to_string(), serde_json::json!("仕様書.pdf"));
        TermIndex::build(
            provider,
            vec![
                rc,
                Term::with_category("鉄筋コンクリート", "構造"),
                Term::with_category("基礎工事", "工事"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_preserves_alignment_and_queries() {
        let dir = temp_dir();
        let provider = sample_provider();
        let index = sample_index(&provider);
        let model_id = provider.model_id_hash();

        let storage = IndexStorage::new(dir.clone());
        storage.save(&index, &model_id).unwrap();
        assert!(storage.exists());

        let loaded = storage.load(&model_id, 3).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.terms().len(), loaded.vectors().len());

        // Same term at the same row, same metadata.
        for (a, b) in index.terms().iter().zip(loaded.terms()) {
            assert_eq!(a, b);
        }

        // Query results must be reproduced within floating-point tolerance.
        let before = index.query(&provider, "コンクリート", 3).unwrap();
        let after = loaded.query(&provider, "コンクリート", 3).unwrap();
        assert_eq!(before.len(), after.len());
        for (x, y) in before.iter().zip(after.iter()) {
            assert_eq!(x.term, y.term);
            assert!((x.score - y.score).abs() < 1e-6);
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_and_load_empty_index() {
        let dir = temp_dir();
        let provider = sample_provider();
        let index = TermIndex::build(&provider, vec![]).unwrap();
        let model_id = provider.model_id_hash();

        let storage = IndexStorage::new(dir.clone());
        storage.save(&index, &model_id).unwrap();

        let loaded = storage.load(&model_id, 3).unwrap();
        assert_eq!(loaded.len(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_model_mismatch() {
        let dir = temp_dir();
        let provider = sample_provider();
        let index = sample_index(&provider);

        let storage = IndexStorage::new(dir.clone());
        storage.save(&index, &provider.model_id_hash()).unwrap();

        let mut wrong = [0u8; 32];
        wrong[0] = 0xFF;
        let result = storage.load(&wrong, 3);
        assert!(matches!(result, Err(StorageError::ModelMismatch)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = temp_dir();
        let provider = sample_provider();
        let index = sample_index(&provider);
        let model_id = provider.model_id_hash();

        let storage = IndexStorage::new(dir.clone());
        storage.save(&index, &model_id).unwrap();

        let result = storage.load(&model_id, 384);
        assert!(matches!(result, Err(StorageError::DimensionMismatch { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = temp_dir();
        let provider = sample_provider();
        let index = sample_index(&provider);
        let model_id = provider.model_id_hash();

        let storage = IndexStorage::new(dir.clone());
        storage.save(&index, &model_id).unwrap();

        let path = dir.join("vectors.bin");
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let result = storage.load(&model_id, 3);
        assert!(matches!(result, Err(StorageError::ChecksumMismatch)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_truncated_vector_file_is_corrupt_not_partial() {
        let dir = temp_dir();
        let provider = sample_provider();
        let index = sample_index(&provider);
        let model_id = provider.model_id_hash();

        let storage = IndexStorage::new(dir.clone());
        storage.save(&index, &model_id).unwrap();

        let path = dir.join("vectors.bin");
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();

        let result = storage.load(&model_id, 3);
        assert!(matches!(result, Err(StorageError::Truncated)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_term_list_vector_count_mismatch() {
        let dir = temp_dir();
        let provider = sample_provider();
        let index = sample_index(&provider);
        let model_id = provider.model_id_hash();

        let storage = IndexStorage::new(dir.clone());
        storage.save(&index, &model_id).unwrap();

        // Rewrite terms.json with a term missing.
        std::fs::write(
            dir.join("terms.json"),
            r#"[{"text":"RC造","category":"構造"},{"text":"基礎工事","category":"工事"}]"#,
        )
        .unwrap();

        let result = storage.load(&model_id, 3);
        assert!(matches!(result, Err(StorageError::LengthMismatch { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_metadata_file_is_tolerated() {
        let dir = temp_dir();
        let provider = sample_provider();
        let index = sample_index(&provider);
        let model_id = provider.model_id_hash();

        let storage = IndexStorage::new(dir.clone());
        storage.save(&index, &model_id).unwrap();
        std::fs::remove_file(dir.join("metadata.json")).unwrap();

        let loaded = storage.load(&model_id, 3).unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded.term_info("RC造").unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_fails_cleanly_when_dir_is_a_file() {
        // A plain file sits where the index directory should be.
        let dir = temp_dir();
        std::fs::write(&dir, b"not a directory").unwrap();

        let provider = sample_provider();
        let index = sample_index(&provider);

        let storage = IndexStorage::new(dir.clone());
        let result = storage.save(&index, &provider.model_id_hash());
        assert!(matches!(result, Err(StorageError::Io(_))));

        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn test_delete() {
        let dir = temp_dir();
        let provider = sample_provider();
        let index = sample_index(&provider);
        let model_id = provider.model_id_hash();

        let storage = IndexStorage::new(dir.clone());
        storage.save(&index, &model_id).unwrap();
        assert!(storage.exists());

        storage.delete().unwrap();
        assert!(!storage.exists());
        assert!(!dir.join("terms.json").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
