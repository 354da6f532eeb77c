//! Atomic-at-the-file-level persistence (write to a temp file then rename)
//! plus optional gzip, shared by the vector store, the
//! clustered store's companion file, partition configs, and the HNSW
//! serialized index.

use nbase_common::{NbaseError, Result};
use std::io::{Read, Write};
use std::path::Path;

pub const GZ_SUFFIX: &str = ".gz";

/// Write `bytes` to `path` atomically: a sibling temp file is written and
/// fsynced, then renamed over `path`. A reader can never observe a partial
/// write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| NbaseError::Io(e.error))?;
    Ok(())
}

pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(NbaseError::from)
}

pub fn gzip_encode(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

pub fn gzip_decode(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    let mut dec = GzDecoder::new(data);
    let mut out = Vec::new();
    dec.read_to_end(&mut out)?;
    Ok(out)
}

/// Serialize `value` as (optionally gzipped) JSON and write it atomically.
/// When `compress` is set, `path` gains a `.gz` suffix.
pub fn save_json<T: serde::Serialize>(path: &Path, value: &T, compress: bool) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| NbaseError::Serialization(e.to_string()))?;
    if compress {
        let gz_path = append_suffix(path, GZ_SUFFIX);
        write_atomic(&gz_path, &gzip_encode(&json)?)
    } else {
        write_atomic(path, &json)
    }
}

/// Load JSON from `path`, trying the plain file first and then `path.gz`.
/// Returns `NbaseError::NotFound` if neither exists.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if path.exists() {
        let bytes = read_bytes(path)?;
        return serde_json::from_slice(&bytes)
            .map_err(|e| NbaseError::Serialization(e.to_string()));
    }
    let gz_path = append_suffix(path, GZ_SUFFIX);
    if gz_path.exists() {
        let raw = gzip_decode(&read_bytes(&gz_path)?)?;
        return serde_json::from_slice(&raw).map_err(|e| NbaseError::Serialization(e.to_string()));
    }
    Err(NbaseError::NotFound(format!(
        "no file at {} (or {})",
        path.display(),
        gz_path.display()
    )))
}

/// Write pre-encoded `bytes` atomically, gzipping first when `compress` is
/// set (in which case `path` gains a `.gz` suffix). Used by callers with
/// their own wire format (e.g. the HNSW index's bincode-serialized graph)
/// that still want the same atomic-write-plus-optional-gzip contract as
/// [`save_json`].
pub fn save_bytes(path: &Path, bytes: &[u8], compress: bool) -> Result<()> {
    if compress {
        let gz_path = append_suffix(path, GZ_SUFFIX);
        write_atomic(&gz_path, &gzip_encode(bytes)?)
    } else {
        write_atomic(path, bytes)
    }
}

/// Load bytes previously written with [`save_bytes`], trying the plain path
/// then the `.gz` path.
pub fn load_bytes(path: &Path) -> Result<Vec<u8>> {
    if path.exists() {
        return read_bytes(path);
    }
    let gz_path = append_suffix(path, GZ_SUFFIX);
    if gz_path.exists() {
        return gzip_decode(&read_bytes(&gz_path)?);
    }
    Err(NbaseError::NotFound(format!(
        "no file at {} (or {})",
        path.display(),
        gz_path.display()
    )))
}

fn append_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    std::path::PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn write_then_read_back_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(read_bytes(&path).unwrap(), b"hello");
    }

    #[test]
    fn json_round_trip_uncompressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.json");
        let value = Sample {
            a: 1,
            b: "x".into(),
        };
        save_json(&path, &value, false).unwrap();
        let back: Sample = load_json(&path).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn json_round_trip_compressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.json");
        let value = Sample {
            a: 2,
            b: "y".into(),
        };
        save_json(&path, &value, true).unwrap();
        assert!(!path.exists());
        assert!(append_suffix(&path, GZ_SUFFIX).exists());
        let back: Sample = load_json(&path).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = load_json::<Sample>(&path).unwrap_err();
        assert!(matches!(err, NbaseError::NotFound(_)));
    }

    #[test]
    fn raw_bytes_round_trip_compressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        save_bytes(&path, b"opaque-payload", true).unwrap();
        assert!(!path.exists());
        let back = load_bytes(&path).unwrap();
        assert_eq!(back, b"opaque-payload");
    }
}
