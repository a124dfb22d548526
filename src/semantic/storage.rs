//! On-disk snapshot of the vector index.
//!
//! A snapshot is a directory holding two files:
//!
//! `vectors.bin`
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, in index order):
//! - embedding: [f32; dimensions] (little-endian)
//!
//! `entries.json`
//!
//! Manifest with the model name, save time and the per-entry metadata
//! (id, tag, image reference) in the same order as the vectors.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::eid::Eid;
use crate::semantic::embeddings::model_id_hash;
use crate::semantic::index::{IndexEntry, IndexError, VectorIndex};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const ENTRIES_FILE: &str = "entries.json";

/// Errors that can occur during snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Index snapshot not found at '{0}'")]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed entries manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: snapshot was built with '{found}', current model is '{expected}'")]
    ModelMismatch { expected: String, found: String },

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Snapshot holds {vectors} vectors but {entries} entries")]
    EntryCountMismatch { vectors: u64, entries: usize },

    #[error("Snapshot entry rejected: {0}")]
    Entry(#[from] IndexError),
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u8,
    model: String,
    dimensions: usize,
    saved_at: String,
    entries: Vec<EntryMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    id: Eid,
    tag: String,
    image_ref: PathBuf,
}

/// Storage manager for index snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStorage {
    dir: PathBuf,
}

impl SnapshotStorage {
    /// Create a new storage manager for the given snapshot directory.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Get the snapshot directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Check if a snapshot exists.
    pub fn exists(&self) -> bool {
        self.dir.join(VECTORS_FILE).is_file() && self.dir.join(ENTRIES_FILE).is_file()
    }

    /// Load the vector index from the snapshot.
    ///
    /// # Arguments
    /// * `expected_model` - Name of the embedding model in use
    /// * `expected_dimensions` - Expected embedding dimensions
    ///
    /// # Returns
    /// A populated VectorIndex, or an error if the snapshot is absent,
    /// invalid or built with a different model.
    pub fn load(
        &self,
        expected_model: &str,
        expected_dimensions: usize,
    ) -> Result<VectorIndex, SnapshotError> {
        let vectors_path = self.dir.join(VECTORS_FILE);
        let entries_path = self.dir.join(ENTRIES_FILE);

        match (vectors_path.is_file(), entries_path.is_file()) {
            (true, true) => {}
            (false, false) => return Err(SnapshotError::NotFound(self.dir.clone())),
            // The surviving half is all that is left of the index, never treat it as absent
            (vectors, _) => {
                let missing = if vectors { ENTRIES_FILE } else { VECTORS_FILE };
                return Err(SnapshotError::InvalidFormat(format!(
                    "snapshot at '{}' is incomplete, {missing} is missing",
                    self.dir.display()
                )));
            }
        }

        let manifest: Manifest =
            serde_json::from_reader(BufReader::new(File::open(&entries_path)?))?;

        if manifest.version > FORMAT_VERSION {
            return Err(SnapshotError::VersionMismatch(manifest.version, FORMAT_VERSION));
        }
        if manifest.model != expected_model {
            return Err(SnapshotError::ModelMismatch {
                expected: expected_model.to_string(),
                found: manifest.model,
            });
        }

        let mut reader = BufReader::new(File::open(&vectors_path)?);

        let header = Self::read_header(&mut reader)?;
        Self::validate_header(&header, expected_model, expected_dimensions)?;

        if header.entry_count != manifest.entries.len() as u64 {
            return Err(SnapshotError::EntryCountMismatch {
                vectors: header.entry_count,
                entries: manifest.entries.len(),
            });
        }

        let dimensions = header.dimensions as usize;
        let mut entries = Vec::with_capacity(manifest.entries.len());

        for meta in manifest.entries {
            let embedding = Self::read_embedding(&mut reader, dimensions)?;
            entries.push(IndexEntry {
                id: meta.id,
                tag: meta.tag,
                image_ref: meta.image_ref,
                embedding,
            });
        }

        let mut index = VectorIndex::new(dimensions);
        index.bulk_load(entries)?;

        // Trailing bytes mean the vectors file and manifest disagree
        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(SnapshotError::InvalidFormat(
                "trailing data after last vector".to_string(),
            ));
        }

        Ok(index)
    }

    /// Save the vector index as a snapshot.
    ///
    /// Each file is written to a temp sibling, synced, then renamed over the
    /// previous one. A crash between the two renames can leave a mixed
    /// snapshot, which `load` detects in most cases.
    pub fn save(&self, index: &VectorIndex, model_name: &str) -> Result<(), SnapshotError> {
        if index.dimensions() > u16::MAX as usize {
            return Err(SnapshotError::InvalidFormat(format!(
                "{} dimensions do not fit the header",
                index.dimensions()
            )));
        }

        std::fs::create_dir_all(&self.dir)?;

        let vectors_path = self.dir.join(VECTORS_FILE);
        let entries_path = self.dir.join(ENTRIES_FILE);
        let vectors_tmp = vectors_path.with_extension("tmp");
        let entries_tmp = entries_path.with_extension("tmp");

        let result = self
            .write_vectors(&vectors_tmp, index, model_name)
            .and_then(|_| self.write_manifest(&entries_tmp, index, model_name));

        if result.is_err() {
            // Clean up temp files on error
            let _ = std::fs::remove_file(&vectors_tmp);
            let _ = std::fs::remove_file(&entries_tmp);
            return result;
        }

        std::fs::rename(&vectors_tmp, &vectors_path)?;
        std::fs::rename(&entries_tmp, &entries_path)?;

        Ok(())
    }

    fn write_vectors(
        &self,
        path: &Path,
        index: &VectorIndex,
        model_name: &str,
    ) -> Result<(), SnapshotError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: model_id_hash(model_name),
            dimensions: index.dimensions() as u16,
            entry_count: index.len() as u64,
        };
        Self::write_header(&mut writer, &header)?;

        for entry in index.iter() {
            for &value in &entry.embedding {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        Self::finish(writer)
    }

    fn write_manifest(
        &self,
        path: &Path,
        index: &VectorIndex,
        model_name: &str,
    ) -> Result<(), SnapshotError> {
        let manifest = Manifest {
            version: FORMAT_VERSION,
            model: model_name.to_string(),
            dimensions: index.dimensions(),
            saved_at: chrono::Utc::now().to_rfc3339(),
            entries: index
                .iter()
                .map(|entry| EntryMeta {
                    id: entry.id.clone(),
                    tag: entry.tag.clone(),
                    image_ref: entry.image_ref.clone(),
                })
                .collect(),
        };

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &manifest)?;

        Self::finish(writer)
    }

    /// Flush and sync
    fn finish(mut writer: BufWriter<File>) -> Result<(), SnapshotError> {
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;
        Ok(())
    }

    /// Read header from file.
    fn read_header(reader: &mut BufReader<File>) -> Result<Header, SnapshotError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                SnapshotError::InvalidFormat("vectors file shorter than header".to_string())
            }
            _ => SnapshotError::Io(e),
        })?;

        let version = header_bytes[0];

        // Version check first
        if version > FORMAT_VERSION {
            return Err(SnapshotError::VersionMismatch(version, FORMAT_VERSION));
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);

        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header_bytes[35..43]);
        let entry_count = u64::from_le_bytes(count_bytes);

        let stored_checksum = u32::from_le_bytes([
            header_bytes[43],
            header_bytes[44],
            header_bytes[45],
            header_bytes[46],
        ]);

        // Verify checksum (computed over header without checksum field)
        if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
            return Err(SnapshotError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            model_id,
            dimensions,
            entry_count,
        })
    }

    /// Validate header against expected values.
    fn validate_header(
        header: &Header,
        expected_model: &str,
        expected_dimensions: usize,
    ) -> Result<(), SnapshotError> {
        if header.model_id != model_id_hash(expected_model) {
            return Err(SnapshotError::ModelMismatch {
                expected: expected_model.to_string(),
                found: "<unknown model>".to_string(),
            });
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(SnapshotError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        Ok(())
    }

    /// Write header to file.
    fn write_header(writer: &mut BufWriter<File>, header: &Header) -> Result<(), SnapshotError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    /// Read a single embedding from file.
    fn read_embedding(
        reader: &mut BufReader<File>,
        dimensions: usize,
    ) -> Result<Vec<f32>, SnapshotError> {
        let mut embedding = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            let mut float_bytes = [0u8; 4];
            reader.read_exact(&mut float_bytes).map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    SnapshotError::InvalidFormat("vectors file truncated".to_string())
                }
                _ => SnapshotError::Io(e),
            })?;
            embedding.push(f32::from_le_bytes(float_bytes));
        }

        Ok(embedding)
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}
