//! Binary storage for corpus vectors.
//!
//! One file per (representer identity, corpus fingerprint) pair:
//! `vectors-<hex16>.bin` inside the cache directory.
//!
//! Header (82 bytes):
//! - version: u8 (2)
//! - kind: u8 (0 = dense, 1 = sparse)
//! - config_id: [u8; 32] (SHA256 of representer identity)
//! - corpus_fingerprint: [u8; 32]
//! - dimensions: u32 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, corpus order):
//! - dense: embedding: [f32; dimensions]
//! - sparse: nnz: u32, indices: [u32; nnz], values: [f32; nnz]
//!
//! Trailer (4 bytes):
//! - data_checksum: u32 (CRC32 of every entry byte)
//!
//! Nothing may follow the trailer.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::representer::{SparseVector, Vector, VectorKind};

/// Current file format version
const FORMAT_VERSION: u8 = 2;

/// Header size in bytes: version(1) + kind(1) + config_id(32) + fingerprint(32)
/// + dimensions(4) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 82;

/// Bytes covered by the header checksum
const CHECKSUMMED: usize = HEADER_SIZE - 4;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorCacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Config mismatch: file was built by a different representer")]
    ConfigMismatch,

    #[error("Corpus mismatch: file was built from different records")]
    CorpusMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Data checksum mismatch: vector data is corrupted")]
    DataChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Count mismatch: expected {expected} vectors, file has {got}")]
    CountMismatch { expected: usize, got: usize },
}

/// Address of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    config_id: [u8; 32],
    corpus_fingerprint: [u8; 32],
}

impl CacheKey {
    pub fn new(identity: &str, corpus_fingerprint: &[u8; 32]) -> Self {
        Self {
            config_id: Sha256::digest(identity.as_bytes()).into(),
            corpus_fingerprint: *corpus_fingerprint,
        }
    }

    pub fn file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config_id);
        hasher.update(self.corpus_fingerprint);
        let digest = hasher.finalize();

        let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        format!("vectors-{}.bin", hex)
    }
}

/// Cache manager for corpus vectors.
#[derive(Debug, Clone)]
pub struct VectorCache {
    dir: PathBuf,
}

impl VectorCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Load cached vectors for `key`.
    ///
    /// # Returns
    /// `Ok(None)` if no entry exists; an error if the entry exists but does not
    /// match the key, the expected dimension or the expected count.
    pub fn load(
        &self,
        key: &CacheKey,
        expected_dimensions: usize,
        expected_count: usize,
    ) -> Result<Option<Vec<Vector>>, VectorCacheError> {
        let file = match File::open(self.path_for(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        validate_header(&header, key, expected_dimensions, expected_count)?;

        let dimensions = header.dimensions as usize;
        let mut vectors = Vec::with_capacity(expected_count);
        let mut data = Checksummed::new(&mut reader);
        for _ in 0..header.entry_count {
            let vector = match header.kind {
                VectorKind::Dense => Vector::Dense(read_f32s(&mut data, dimensions)?),
                VectorKind::Sparse => Vector::Sparse(read_sparse(&mut data, dimensions)?),
            };
            vectors.push(vector);
        }
        let data_checksum = data.finalize();

        if read_u32(&mut reader)? != data_checksum {
            return Err(VectorCacheError::DataChecksumMismatch);
        }

        let mut rest = [0u8; 1];
        if reader.read(&mut rest)? != 0 {
            return Err(VectorCacheError::InvalidFormat(
                "unexpected bytes after vector data".to_string(),
            ));
        }

        Ok(Some(vectors))
    }

    /// Persist vectors under `key`, replacing any previous entry.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(
        &self,
        key: &CacheKey,
        dimensions: usize,
        vectors: &[Vector],
    ) -> Result<(), VectorCacheError> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path_for(key);
        let temp_path = path.with_extension("tmp");

        let result = write_to_file(&temp_path, key, dimensions, vectors);
        if result.is_err() {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &path)?;

        Ok(())
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    kind: VectorKind,
    config_id: [u8; 32],
    corpus_fingerprint: [u8; 32],
    dimensions: u32,
    entry_count: u64,
}

fn write_to_file(
    path: &Path,
    key: &CacheKey,
    dimensions: usize,
    vectors: &[Vector],
) -> Result<(), VectorCacheError> {
    let kind = vectors.first().map_or(VectorKind::Dense, Vector::kind);
    if let Some(bad) = vectors
        .iter()
        .find(|v| v.kind() != kind || v.dimension() != dimensions)
    {
        return Err(VectorCacheError::InvalidFormat(format!(
            "refusing to write inconsistent vector ({:?}, {} dimensions)",
            bad.kind(),
            bad.dimension()
        )));
    }

    let dimensions = u32::try_from(dimensions).map_err(|_| {
        VectorCacheError::InvalidFormat(format!("{} dimensions exceed u32", dimensions))
    })?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write_header(
        &mut writer,
        &Header {
            version: FORMAT_VERSION,
            kind,
            config_id: key.config_id,
            corpus_fingerprint: key.corpus_fingerprint,
            dimensions,
            entry_count: vectors.len() as u64,
        },
    )?;

    let mut data = Checksummed::new(&mut writer);
    for vector in vectors {
        match vector {
            Vector::Dense(values) => write_f32s(&mut data, values)?,
            Vector::Sparse(sparse) => {
                data.write_all(&(sparse.nnz() as u32).to_le_bytes())?;
                for idx in sparse.indices() {
                    data.write_all(&idx.to_le_bytes())?;
                }
                write_f32s(&mut data, sparse.values())?;
            }
        }
    }
    let data_checksum = data.finalize();
    writer.write_all(&data_checksum.to_le_bytes())?;

    // Flush and sync
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e))?;
    file.sync_all()?;

    Ok(())
}

/// Passes bytes through while feeding them to a CRC32 hasher.
struct Checksummed<T> {
    inner: T,
    hasher: crc32fast::Hasher,
}

impl<T> Checksummed<T> {
    fn new(inner: T) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for Checksummed<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

impl<W: Write> Write for Checksummed<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorCacheError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = header.version;
    header_bytes[1] = match header.kind {
        VectorKind::Dense => 0,
        VectorKind::Sparse => 1,
    };
    header_bytes[2..34].copy_from_slice(&header.config_id);
    header_bytes[34..66].copy_from_slice(&header.corpus_fingerprint);
    header_bytes[66..70].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[70..78].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[..CHECKSUMMED]);
    header_bytes[CHECKSUMMED..].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorCacheError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(VectorCacheError::VersionMismatch(version, FORMAT_VERSION));
    }

    let mut checksum_bytes = [0u8; 4];
    checksum_bytes.copy_from_slice(&header_bytes[CHECKSUMMED..]);
    if u32::from_le_bytes(checksum_bytes) != crc32fast::hash(&header_bytes[..CHECKSUMMED]) {
        return Err(VectorCacheError::ChecksumMismatch);
    }

    let kind = match header_bytes[1] {
        0 => VectorKind::Dense,
        1 => VectorKind::Sparse,
        other => {
            return Err(VectorCacheError::InvalidFormat(format!(
                "unknown vector kind {}",
                other
            )))
        }
    };

    let mut config_id = [0u8; 32];
    config_id.copy_from_slice(&header_bytes[2..34]);
    let mut corpus_fingerprint = [0u8; 32];
    corpus_fingerprint.copy_from_slice(&header_bytes[34..66]);

    let mut dimensions = [0u8; 4];
    dimensions.copy_from_slice(&header_bytes[66..70]);
    let mut entry_count = [0u8; 8];
    entry_count.copy_from_slice(&header_bytes[70..78]);

    Ok(Header {
        version,
        kind,
        config_id,
        corpus_fingerprint,
        dimensions: u32::from_le_bytes(dimensions),
        entry_count: u64::from_le_bytes(entry_count),
    })
}

fn validate_header(
    header: &Header,
    key: &CacheKey,
    expected_dimensions: usize,
    expected_count: usize,
) -> Result<(), VectorCacheError> {
    debug_assert_eq!(header.version, FORMAT_VERSION);

    if header.config_id != key.config_id {
        return Err(VectorCacheError::ConfigMismatch);
    }

    if header.corpus_fingerprint != key.corpus_fingerprint {
        return Err(VectorCacheError::CorpusMismatch);
    }

    if header.dimensions as usize != expected_dimensions {
        return Err(VectorCacheError::DimensionMismatch {
            expected: expected_dimensions,
            got: header.dimensions as usize,
        });
    }

    if header.entry_count != expected_count as u64 {
        return Err(VectorCacheError::CountMismatch {
            expected: expected_count,
            got: header.entry_count as usize,
        });
    }

    Ok(())
}

fn write_f32s(writer: &mut impl Write, values: &[f32]) -> Result<(), VectorCacheError> {
    for &value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn read_u32(reader: &mut impl Read) -> Result<u32, VectorCacheError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_f32s(reader: &mut impl Read, count: usize) -> Result<Vec<f32>, VectorCacheError> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let mut bytes = [0u8; 4];
        reader.read_exact(&mut bytes)?;
        values.push(f32::from_le_bytes(bytes));
    }
    Ok(values)
}

fn read_sparse(reader: &mut impl Read, dimensions: usize) -> Result<SparseVector, VectorCacheError> {
    let nnz = read_u32(reader)? as usize;
    if nnz > dimensions {
        return Err(VectorCacheError::InvalidFormat(format!(
            "sparse entry has {} values for {} dimensions",
            nnz, dimensions
        )));
    }

    let indices = (0..nnz)
        .map(|_| read_u32(reader))
        .collect::<Result<Vec<_>, _>>()?;
    let values = read_f32s(reader, nnz)?;

    SparseVector::from_parts(dimensions, indices, values).ok_or_else(|| {
        VectorCacheError::InvalidFormat("sparse indices out of order or range".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FINGERPRINT: [u8; 32] = [7u8; 32];

    fn dense_vectors() -> Vec<Vector> {
        vec![
            Vector::Dense(vec![1.0, 0.0, 0.0]),
            Vector::Dense(vec![0.0, 1.0, 0.0]),
            Vector::Dense(vec![0.0, 0.0, 1.0]),
        ]
    }

    fn sparse_vectors() -> Vec<Vector> {
        vec![
            Vector::Sparse(SparseVector::from_entries(6, vec![(0, 0.5), (5, 0.25)])),
            Vector::Sparse(SparseVector::from_entries(6, vec![])),
            Vector::Sparse(SparseVector::from_entries(6, vec![(3, 1.0)])),
        ]
    }

    #[test]
    fn test_missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("dense:v1:test", &FINGERPRINT);

        assert!(cache.load(&key, 3, 3).unwrap().is_none());
    }

    #[test]
    fn test_dense_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().join("cache"));
        let key = CacheKey::new("dense:v1:test", &FINGERPRINT);

        cache.save(&key, 3, &dense_vectors()).unwrap();
        let loaded = cache.load(&key, 3, 3).unwrap().unwrap();

        assert_eq!(loaded, dense_vectors());
    }

    #[test]
    fn test_sparse_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("tfidf:v1", &FINGERPRINT);

        cache.save(&key, 6, &sparse_vectors()).unwrap();
        let loaded = cache.load(&key, 6, 3).unwrap().unwrap();

        assert_eq!(loaded, sparse_vectors());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("dense:v1:test", &FINGERPRINT);

        cache.save(&key, 3, &dense_vectors()).unwrap();
        let result = cache.load(&key, 384, 3);

        assert!(matches!(
            result,
            Err(VectorCacheError::DimensionMismatch { expected: 384, got: 3 })
        ));
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("dense:v1:test", &FINGERPRINT);

        cache.save(&key, 3, &dense_vectors()).unwrap();
        let result = cache.load(&key, 3, 4);

        assert!(matches!(
            result,
            Err(VectorCacheError::CountMismatch { expected: 4, got: 3 })
        ));
    }

    #[test]
    fn test_keys_differ_by_config_and_corpus() {
        let a = CacheKey::new("dense:v1:a", &FINGERPRINT);
        let b = CacheKey::new("dense:v1:b", &FINGERPRINT);
        let c = CacheKey::new("dense:v1:a", &[8u8; 32]);

        assert_ne!(a.file_name(), b.file_name());
        assert_ne!(a.file_name(), c.file_name());
        assert_eq!(a.file_name(), CacheKey::new("dense:v1:a", &FINGERPRINT).file_name());
        assert!(a.file_name().starts_with("vectors-"));
    }

    #[test]
    fn test_foreign_file_at_key_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("dense:v1:a", &FINGERPRINT);
        let other = CacheKey::new("dense:v1:b", &FINGERPRINT);

        // write another config's vectors, then move them under this key's name
        cache.save(&other, 3, &dense_vectors()).unwrap();
        std::fs::rename(cache.path_for(&other), cache.path_for(&key)).unwrap();

        assert!(matches!(
            cache.load(&key, 3, 3),
            Err(VectorCacheError::ConfigMismatch)
        ));
    }

    #[test]
    fn test_corrupted_header_detected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("dense:v1:test", &FINGERPRINT);

        cache.save(&key, 3, &dense_vectors()).unwrap();

        let path = cache.path_for(&key);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[67] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            cache.load(&key, 3, 3),
            Err(VectorCacheError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_truncated_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("dense:v1:test", &FINGERPRINT);

        cache.save(&key, 3, &dense_vectors()).unwrap();

        let path = cache.path_for(&key);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        assert!(matches!(cache.load(&key, 3, 3), Err(VectorCacheError::Io(_))));
    }

    #[test]
    fn test_inconsistent_vectors_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("dense:v1:test", &FINGERPRINT);

        let mut vectors = dense_vectors();
        vectors.push(Vector::Dense(vec![1.0]));

        assert!(matches!(
            cache.save(&key, 3, &vectors),
            Err(VectorCacheError::InvalidFormat(_))
        ));
        assert!(!cache.path_for(&key).exists());
        assert!(!cache.path_for(&key).with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupted_vector_data_detected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("dense:v1:test", &FINGERPRINT);

        cache.save(&key, 3, &dense_vectors()).unwrap();

        // flip the exponent of the first stored value
        let path = cache.path_for(&key);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 3] ^= 0x7F;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            cache.load(&key, 3, 3),
            Err(VectorCacheError::DataChecksumMismatch)
        ));
    }

    #[test]
    fn test_sparse_data_corruption_detected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("tfidf:v1", &FINGERPRINT);

        cache.save(&key, 6, &sparse_vectors()).unwrap();

        // last value of the last entry, just before the trailer
        let path = cache.path_for(&key);
        let mut bytes = std::fs::read(&path).unwrap();
        let last_value = bytes.len() - 4 - 2;
        bytes[last_value] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            cache.load(&key, 6, 3),
            Err(VectorCacheError::DataChecksumMismatch)
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("dense:v1:test", &FINGERPRINT);

        cache.save(&key, 3, &dense_vectors()).unwrap();

        let path = cache.path_for(&key);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(b"trailing garbage");
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            cache.load(&key, 3, 3),
            Err(VectorCacheError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_file_size_matches_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorCache::new(dir.path().to_path_buf());
        let key = CacheKey::new("dense:v1:test", &FINGERPRINT);

        cache.save(&key, 3, &dense_vectors()).unwrap();

        let len = std::fs::metadata(cache.path_for(&key)).unwrap().len() as usize;
        assert_eq!(len, HEADER_SIZE + 3 * 3 * 4 + 4);
    }
}
