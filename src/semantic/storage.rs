//! Binary storage for the product vector index.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (2)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id_len: u16, id: [u8; id_len] (UTF-8)
//! - metadata_len: u32, metadata: [u8; metadata_len] (JSON)
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::catalog::ProductMetadata;
use crate::semantic::index::{VectorEntry, VectorIndex};

/// Current file format version
const FORMAT_VERSION: u8 = 2;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the index, rejecting files written by another model or dimension.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.version != FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(header.version, FORMAT_VERSION));
        }
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let mut index =
            VectorIndex::with_capacity(header.dimensions as usize, header.entry_count as usize);

        for _ in 0..header.entry_count {
            let (id, metadata, embedding) = read_entry(&mut reader, header.dimensions as usize)?;
            if let Err(e) = index.insert(id.clone(), embedding, metadata) {
                log::warn!("skipping stored vector '{id}': {e}");
            }
        }

        Ok(index)
    }

    /// Save the index. Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("tmp");

        if let Err(e) = write_to_file(&temp_path, index, model_id) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn write_to_file(
    path: &Path,
    index: &VectorIndex,
    model_id: &[u8; 32],
) -> Result<(), VectorStorageError> {
    let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
        VectorStorageError::InvalidFormat(format!("{} dimensions exceed u16", index.dimensions()))
    })?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write_header(
        &mut writer,
        &Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions,
            entry_count: index.len() as u64,
        },
    )?;

    for (id, entry) in index.iter() {
        write_entry(&mut writer, id, entry)?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    Ok(())
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn read_header<R: Read>(reader: &mut R) -> Result<Header, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let stored_checksum = u32::from_le_bytes(slice_array(&header_bytes[43..47]));
    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    Ok(Header {
        version: header_bytes[0],
        model_id,
        dimensions: u16::from_le_bytes(slice_array(&header_bytes[33..35])),
        entry_count: u64::from_le_bytes(slice_array(&header_bytes[35..43])),
    })
}

fn write_header<W: Write>(writer: &mut W, header: &Header) -> Result<(), VectorStorageError> {
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

fn read_entry<R: Read>(
    reader: &mut R,
    dimensions: usize,
) -> Result<(String, ProductMetadata, Vec<f32>), VectorStorageError> {
    let mut len2 = [0u8; 2];
    reader.read_exact(&mut len2)?;
    let mut id_bytes = vec![0u8; u16::from_le_bytes(len2) as usize];
    reader.read_exact(&mut id_bytes)?;
    let id = String::from_utf8(id_bytes)
        .map_err(|e| VectorStorageError::InvalidFormat(format!("id is not utf8: {e}")))?;

    let mut len4 = [0u8; 4];
    reader.read_exact(&mut len4)?;
    let mut meta_bytes = vec![0u8; u32::from_le_bytes(len4) as usize];
    reader.read_exact(&mut meta_bytes)?;
    let metadata: ProductMetadata = serde_json::from_slice(&meta_bytes)
        .map_err(|e| VectorStorageError::InvalidFormat(format!("metadata for '{id}': {e}")))?;

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut float_bytes = [0u8; 4];
        reader.read_exact(&mut float_bytes)?;
        embedding.push(f32::from_le_bytes(float_bytes));
    }

    Ok((id, metadata, embedding))
}

fn write_entry<W: Write>(
    writer: &mut W,
    id: &str,
    entry: &VectorEntry,
) -> Result<(), VectorStorageError> {
    let id_len = u16::try_from(id.len())
        .map_err(|_| VectorStorageError::InvalidFormat(format!("id too long: {id}")))?;
    let meta = serde_json::to_vec(&entry.metadata)
        .map_err(|e| VectorStorageError::InvalidFormat(e.to_string()))?;
    let meta_len = u32::try_from(meta.len())
        .map_err(|_| VectorStorageError::InvalidFormat(format!("metadata too large for '{id}'")))?;

    writer.write_all(&id_len.to_le_bytes())?;
    writer.write_all(id.as_bytes())?;
    writer.write_all(&meta_len.to_le_bytes())?;
    writer.write_all(&meta)?;

    for &value in &entry.embedding {
        writer.write_all(&value.to_le_bytes())?;
    }

    Ok(())
}

fn slice_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
