//! On-disk sequence cache: one binary shard plus a JSON manifest.
//!
//! Layout under the cache root:
//!
//! ```text
//! sequence_cache/<version>/manifest.json
//! sequence_cache/<version>/shard.bin
//! ```
//!
//! `shard.bin` starts with a 40-byte header (`SEQ1`, shard version, sequence
//! length, image size, channels, meta dim, target count as little-endian u32,
//! then the sample count as u64) followed by one fixed-size block per sample:
//! metadata, targets, images, all little-endian f32.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use memmap2::{Mmap, MmapOptions};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::source::SampleSource;
use crate::types::{DatasetError, DatasetResult, SampleShape, SequenceSample};

pub const SHARD_MAGIC: &[u8; 4] = b"SEQ1";
pub const SHARD_VERSION: u32 = 1;
const HEADER_BYTES: usize = 40;
const WRITE_CHUNK: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Hex SHA-256 of the source fingerprint, shape and code version.
    pub version: String,
    pub source: String,
    pub stations: Vec<String>,
    pub shape: SampleShape,
    pub samples: usize,
    pub shard_version: u32,
    /// Hex SHA-256 of the full `shard.bin`.
    pub checksum_sha256: String,
    pub created_at_ms: u64,
    pub code_version: String,
}

impl CacheManifest {
    /// Crate version, overridable through `CODE_VERSION` (e.g. a git hash).
    pub fn resolve_code_version() -> String {
        match std::env::var("CODE_VERSION") {
            Ok(val) if !val.trim().is_empty() => val,
            _ => env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn save(&self, path: &Path) -> DatasetResult<()> {
        let data =
            serde_json::to_vec_pretty(self).map_err(|e| DatasetError::Other(e.to_string()))?;
        fs::write(path, data).map_err(|e| DatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> DatasetResult<Self> {
        let raw = fs::read(path).map_err(|e| DatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&raw).map_err(|e| DatasetError::Json {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Cache location for one (source, stations, shape, code version) tuple.
#[derive(Debug, Clone)]
pub struct SequenceCache {
    dir: PathBuf,
    version: String,
    source: String,
    stations: Vec<String>,
    code_version: String,
}

impl SequenceCache {
    /// Cache for a dataframe file. The file's size and modification time are
    /// part of the version, so editing the dataframe invalidates the cache.
    pub fn for_dataframe(
        cache_root: &Path,
        dataframe: &Path,
        stations: &[String],
        shape: &SampleShape,
    ) -> DatasetResult<Self> {
        let meta = fs::metadata(dataframe).map_err(|e| DatasetError::Io {
            path: dataframe.to_path_buf(),
            source: e,
        })?;
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let fingerprint = format!("{}|{}|{}", dataframe.display(), meta.len(), modified_ms);
        Ok(Self::new(
            cache_root,
            &fingerprint,
            stations,
            shape,
            &CacheManifest::resolve_code_version(),
        ))
    }

    pub fn new(
        cache_root: &Path,
        source: &str,
        stations: &[String],
        shape: &SampleShape,
        code_version: &str,
    ) -> Self {
        let version = compute_version(source, stations, shape, code_version);
        Self {
            dir: cache_root.join("sequence_cache").join(&version),
            version,
            source: source.to_string(),
            stations: stations.to_vec(),
            code_version: code_version.to_string(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn shard_path(&self) -> PathBuf {
        self.dir.join("shard.bin")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }

    /// Reuse a valid cache for `source`, otherwise (re)build it.
    pub fn open_or_build(&self, source: &dyn SampleSource) -> DatasetResult<ShardSource> {
        match self.open(&source.shape())? {
            Some(shard) if shard.len() == source.len() => {
                log::info!(
                    "[cache] reusing {} ({} samples)",
                    self.dir.display(),
                    shard.len()
                );
                Ok(shard)
            }
            Some(shard) => {
                log::warn!(
                    "[cache] {} holds {} samples, source has {}; rebuilding",
                    self.dir.display(),
                    shard.len(),
                    source.len()
                );
                drop(shard);
                self.build(source)
            }
            None => self.build(source),
        }
    }

    /// Open the cache if its manifest and shard are present and consistent.
    ///
    /// A missing cache, an unreadable shard, or one whose manifest or checksum
    /// disagrees yields `Ok(None)`. A shard that passes its checksum but
    /// contradicts its manifest is an error.
    pub fn open(&self, shape: &SampleShape) -> DatasetResult<Option<ShardSource>> {
        let manifest_path = self.manifest_path();
        let shard_path = self.shard_path();
        if !manifest_path.is_file() || !shard_path.is_file() {
            return Ok(None);
        }
        let manifest = match CacheManifest::load(&manifest_path) {
            Ok(m) => m,
            Err(err) => {
                log::warn!("[cache] unreadable manifest: {err}");
                return Ok(None);
            }
        };
        if manifest.version != self.version
            || manifest.shape != *shape
            || manifest.shard_version != SHARD_VERSION
        {
            log::warn!("[cache] manifest at {} is stale", manifest_path.display());
            return Ok(None);
        }
        let shard = match ShardSource::open(&shard_path) {
            Ok(shard) => shard,
            Err(err) => {
                log::warn!("[cache] {err}");
                return Ok(None);
            }
        };
        let checksum = shard.checksum();
        if checksum != manifest.checksum_sha256 {
            log::warn!(
                "[cache] checksum mismatch for {} (manifest {}, file {})",
                shard_path.display(),
                manifest.checksum_sha256,
                checksum
            );
            return Ok(None);
        }
        if shard.shape() != *shape || shard.len() != manifest.samples {
            return Err(DatasetError::CorruptShard {
                path: shard_path,
                msg: "header disagrees with manifest".into(),
            });
        }
        Ok(Some(shard))
    }

    /// Materialise every sample of `source` into a fresh shard.
    pub fn build(&self, source: &dyn SampleSource) -> DatasetResult<ShardSource> {
        let start = Instant::now();
        fs::create_dir_all(&self.dir).map_err(|e| DatasetError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let shape = source.shape();
        let shard_path = self.shard_path();
        let tmp_path = self.dir.join("shard.bin.tmp");

        let checksum = match write_shard(&tmp_path, source, &shape) {
            Ok(checksum) => checksum,
            Err(err) => {
                if let Err(rm) = fs::remove_file(&tmp_path) {
                    log::debug!("[cache] could not remove {}: {rm}", tmp_path.display());
                }
                return Err(err);
            }
        };
        fs::rename(&tmp_path, &shard_path).map_err(|e| DatasetError::Io {
            path: shard_path.clone(),
            source: e,
        })?;

        let manifest = CacheManifest {
            version: self.version.clone(),
            source: self.source.clone(),
            stations: self.stations.clone(),
            shape,
            samples: source.len(),
            shard_version: SHARD_VERSION,
            checksum_sha256: checksum,
            created_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            code_version: self.code_version.clone(),
        };
        manifest.save(&self.manifest_path())?;
        log::info!(
            "[cache] wrote {} samples to {} in {} ms",
            source.len(),
            shard_path.display(),
            start.elapsed().as_millis()
        );
        ShardSource::open(&shard_path)
    }
}

/// Canonical cache version key (hex SHA-256).
pub fn compute_version(
    source: &str,
    stations: &[String],
    shape: &SampleShape,
    code_version: &str,
) -> String {
    #[derive(Serialize)]
    struct VersionTuple<'a> {
        source: &'a str,
        stations: &'a [String],
        shape: &'a SampleShape,
        shard_version: u32,
        code_version: &'a str,
    }
    let tuple = VersionTuple {
        source,
        stations,
        shape,
        shard_version: SHARD_VERSION,
        code_version,
    };
    let bytes = serde_json::to_vec(&tuple).unwrap_or_default();
    format!("{:x}", Sha256::digest(bytes))
}

/// Memory-mapped cache shard.
#[derive(Debug, Clone)]
pub struct ShardSource {
    path: PathBuf,
    mmap: Arc<Mmap>,
    shape: SampleShape,
    samples: usize,
}

impl ShardSource {
    pub fn open(path: &Path) -> DatasetResult<Self> {
        let file = File::open(path).map_err(|e| DatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        // The shard is written once and only replaced through rename.
        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| DatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let corrupt = |msg: String| DatasetError::CorruptShard {
            path: path.to_path_buf(),
            msg,
        };

        let data = &mmap[..];
        if data.len() < HEADER_BYTES {
            return Err(corrupt(format!("{} bytes is shorter than the header", data.len())));
        }
        if &data[0..4] != SHARD_MAGIC {
            return Err(corrupt("bad magic".into()));
        }
        let version = read_u32_le(&data[4..8]);
        if version != SHARD_VERSION {
            return Err(corrupt(format!(
                "shard version {version}, expected {SHARD_VERSION}"
            )));
        }
        let shape = SampleShape {
            sequence_length: read_u32_le(&data[8..12]) as usize,
            image_size: read_u32_le(&data[12..16]) as usize,
            channels: read_u32_le(&data[16..20]) as usize,
            meta_dim: read_u32_le(&data[20..24]) as usize,
            target_count: read_u32_le(&data[24..28]) as usize,
        };
        let samples = read_u64_le(&data[28..36]) as usize;

        let expected = samples
            .checked_mul(shape.sample_elems())
            .and_then(|v| v.checked_mul(4))
            .and_then(|v| v.checked_add(HEADER_BYTES))
            .ok_or_else(|| corrupt("overflow computing shard size".into()))?;
        if data.len() != expected {
            return Err(corrupt(format!(
                "{} bytes on disk, header implies {expected}",
                data.len()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            mmap: Arc::new(mmap),
            shape,
            samples,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hex SHA-256 of the mapped file.
    pub fn checksum(&self) -> String {
        format!("{:x}", Sha256::digest(&self.mmap[..]))
    }
}

impl SampleSource for ShardSource {
    fn len(&self) -> usize {
        self.samples
    }

    fn shape(&self) -> SampleShape {
        self.shape
    }

    fn load(&self, index: usize) -> DatasetResult<SequenceSample> {
        if index >= self.samples {
            return Err(DatasetError::OutOfRange {
                index,
                len: self.samples,
            });
        }
        let block = self.shape.sample_elems() * 4;
        let start = HEADER_BYTES + index * block;
        let bytes = &self.mmap[start..start + block];

        let meta_end = self.shape.meta_dim * 4;
        let targets_end = meta_end + self.shape.target_count * 4;
        Ok(SequenceSample {
            metadata: read_floats(&bytes[..meta_end]),
            targets: read_floats(&bytes[meta_end..targets_end]),
            images: read_floats(&bytes[targets_end..]),
        })
    }
}

/// Stream every sample of `source` into `path`, returning the hex SHA-256.
fn write_shard(path: &Path, source: &dyn SampleSource, shape: &SampleShape) -> DatasetResult<String> {
    let io_err = |e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = HashingWriter::new(BufWriter::new(file));
    writer
        .write_all(&encode_header(shape, source.len()))
        .map_err(io_err)?;
    let indices: Vec<usize> = (0..source.len()).collect();
    for chunk in indices.chunks(WRITE_CHUNK) {
        let samples = chunk
            .par_iter()
            .map(|&idx| {
                let sample = source.load(idx)?;
                sample.check_shape(shape)?;
                Ok(sample)
            })
            .collect::<DatasetResult<Vec<SequenceSample>>>()?;
        for sample in &samples {
            write_floats(&mut writer, &sample.metadata).map_err(io_err)?;
            write_floats(&mut writer, &sample.targets).map_err(io_err)?;
            write_floats(&mut writer, &sample.images).map_err(io_err)?;
        }
    }
    writer.finish().map_err(io_err)
}

fn encode_header(shape: &SampleShape, samples: usize) -> [u8; HEADER_BYTES] {
    let mut header = [0u8; HEADER_BYTES];
    header[0..4].copy_from_slice(SHARD_MAGIC);
    let fields = [
        SHARD_VERSION,
        shape.sequence_length as u32,
        shape.image_size as u32,
        shape.channels as u32,
        shape.meta_dim as u32,
        shape.target_count as u32,
    ];
    for (i, field) in fields.iter().enumerate() {
        let at = 4 + i * 4;
        header[at..at + 4].copy_from_slice(&field.to_le_bytes());
    }
    header[28..36].copy_from_slice(&(samples as u64).to_le_bytes());
    header
}

fn write_floats<W: Write>(writer: &mut W, values: &[f32]) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    writer.write_all(&buf)
}

fn read_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Writer that hashes everything passing through it.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(mut self) -> std::io::Result<String> {
        self.inner.flush()?;
        Ok(format!("{:x}", self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticSource;

    fn shape() -> SampleShape {
        SampleShape::new(2, 4, 3, 2)
    }

    #[test]
    fn round_trips_samples_through_the_shard() {
        let dir = tempfile::tempdir().unwrap();
        let source = SyntheticSource::new(shape(), 7, 1).unwrap();
        let cache = SequenceCache::new(dir.path(), "synthetic", &["BND".to_string()], &shape(), "test");
        let shard = cache.open_or_build(&source).unwrap();
        assert_eq!(shard.len(), 7);
        assert_eq!(shard.shape(), shape());
        for idx in 0..7 {
            assert_eq!(shard.load(idx).unwrap(), source.load(idx).unwrap());
        }
        assert!(cache.manifest_path().is_file());
        assert_eq!(shard.path(), cache.shard_path().as_path());
        assert!(cache.dir().starts_with(dir.path().join("sequence_cache")));
    }

    #[test]
    fn version_changes_with_inputs() {
        let a = compute_version("df", &["BND".to_string()], &shape(), "1");
        assert_eq!(a, compute_version("df", &["BND".to_string()], &shape(), "1"));
        assert_ne!(a, compute_version("df", &["TBL".to_string()], &shape(), "1"));
        assert_ne!(a, compute_version("df", &["BND".to_string()], &shape(), "2"));
        assert_ne!(
            a,
            compute_version("df", &["BND".to_string()], &SampleShape::new(3, 4, 3, 2), "1")
        );
    }

    #[test]
    fn corrupted_shard_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let source = SyntheticSource::new(shape(), 3, 2).unwrap();
        let cache = SequenceCache::new(dir.path(), "synthetic", &[], &shape(), "test");
        drop(cache.build(&source).unwrap());

        let mut bytes = fs::read(cache.shard_path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(cache.shard_path(), bytes).unwrap();
        assert!(cache.open(&shape()).unwrap().is_none());

        let shard = cache.open_or_build(&source).unwrap();
        assert_eq!(shard.load(2).unwrap(), source.load(2).unwrap());
    }

    /// Serves sample 0, fails on every later index.
    struct FailsAfterFirst(SyntheticSource);

    impl SampleSource for FailsAfterFirst {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn shape(&self) -> SampleShape {
            self.0.shape()
        }

        fn load(&self, index: usize) -> DatasetResult<SequenceSample> {
            if index >= 1 {
                return Err(DatasetError::Other(format!("unreadable sample {index}")));
            }
            self.0.load(index)
        }
    }

    #[test]
    fn failed_build_leaves_no_partial_shard() {
        let dir = tempfile::tempdir().unwrap();
        let source = FailsAfterFirst(SyntheticSource::new(shape(), 4, 3).unwrap());
        let cache = SequenceCache::new(dir.path(), "synthetic", &[], &shape(), "test");
        let err = cache.build(&source).unwrap_err();
        assert!(matches!(err, DatasetError::Other(_)));
        assert!(!cache.dir().join("shard.bin.tmp").exists());
        assert!(!cache.shard_path().exists());
        assert!(!cache.manifest_path().exists());
    }

    #[test]
    fn bad_magic_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.bin");
        fs::write(&path, [0u8; HEADER_BYTES]).unwrap();
        let err = ShardSource::open(&path).unwrap_err();
        assert!(matches!(err, DatasetError::CorruptShard { .. }));
    }
}
