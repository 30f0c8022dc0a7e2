//! On-disk index format.
//!
//! An index directory holds three files:
//!
//! - `index.bin`: the primary file, holding magic, version, dims, count (each `u32`
//!   LE), then `count * dims` little-endian `f32` values
//! - `chunks.jsonl`: one JSON [`Chunk`] per line, in sequence order
//! - `meta.json`: the [`IndexMeta`]
//!
//! [`write_index`] writes all three into a sibling temp directory and renames
//! it onto the target, so the primary file only becomes visible once every
//! file is complete. [`read_index`] treats any inconsistency as corruption.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::document::Chunk;
use crate::error::{RagError, Result};
use tracing::warn;

use crate::index::{FlatIndex, INDEX_VERSION, Index, IndexMeta, SimilarityIndex, is_finite};

/// Name of the primary index file; its presence means "index exists".
pub const INDEX_FILE: &str = "index.bin";
pub const CHUNKS_FILE: &str = "chunks.jsonl";
pub const META_FILE: &str = "meta.json";

const INDEX_MAGIC: u32 = 0x4453_5256; // "DSRV"
const HEADER_LEN: usize = 16;
const TEMP_INFIX: &str = ".tmp-";

/// Whether a complete index is present at `location`.
pub fn index_exists(location: &Path) -> bool {
    location.join(INDEX_FILE).is_file()
}

/// Directory `location` lives in, used for temp dirs and the lock file.
pub(crate) fn parent_dir(location: &Path) -> PathBuf {
    match location.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Sibling path of `location` with `suffix` appended to its file name.
pub(crate) fn sibling(location: &Path, suffix: &str) -> PathBuf {
    let name = location.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    parent_dir(location).join(format!("{name}{suffix}"))
}

/// Fail unless `location` is absent or an empty directory (which is removed).
///
/// A non-empty directory without the primary file was not written by
/// [`write_index`] and is never overwritten.
pub(crate) fn ensure_vacant(location: &Path) -> Result<()> {
    if !location.exists() {
        return Ok(());
    }
    if !location.is_dir() {
        return Err(RagError::corrupt(location, "index location exists and is not a directory"));
    }
    let mut entries = fs::read_dir(location).map_err(|e| RagError::io(location, e))?;
    if entries.next().is_some() {
        return Err(RagError::corrupt(
            location,
            format!("directory exists without {INDEX_FILE}; refusing to overwrite"),
        ));
    }
    fs::remove_dir(location).map_err(|e| RagError::io(location, e))
}

/// Remove temp directories left next to `location` by interrupted writes.
///
/// The caller must hold the build lock for `location`, so no live write owns them.
pub(crate) fn remove_stale_temp_dirs(location: &Path) -> Result<usize> {
    let parent = parent_dir(location);
    let Some(name) = location.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(0);
    };
    let prefix = format!("{name}{TEMP_INFIX}");

    let entries = match fs::read_dir(&parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(RagError::io(&parent, e)),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| RagError::io(&parent, e))?;
        let path = entry.path();
        if !entry.file_name().to_string_lossy().starts_with(&prefix) || !path.is_dir() {
            continue;
        }
        fs::remove_dir_all(&path).map_err(|e| RagError::io(&path, e))?;
        warn!(path = %path.display(), "removed stale temp directory from an interrupted build");
        removed += 1;
    }
    Ok(removed)
}

/// Atomically persist `index` at `location`.
///
/// The caller must hold the build lock for `location`.
pub fn write_index(location: &Path, index: &Index) -> Result<()> {
    let parent = parent_dir(location);
    fs::create_dir_all(&parent).map_err(|e| RagError::io(&parent, e))?;
    ensure_vacant(location)?;

    let temp_dir = sibling(location, &format!("{TEMP_INFIX}{}", uuid::Uuid::new_v4()));
    fs::create_dir(&temp_dir).map_err(|e| RagError::io(&temp_dir, e))?;

    let written = write_files(&temp_dir, index)
        .and_then(|()| fs::rename(&temp_dir, location).map_err(|e| RagError::io(location, e)));
    if written.is_err() {
        let _ = fs::remove_dir_all(&temp_dir);
    }
    written
}

fn write_files(dir: &Path, index: &Index) -> Result<()> {
    // meta.json
    let meta_path = dir.join(META_FILE);
    let meta_json = serde_json::to_vec_pretty(index.meta())
        .map_err(|e| RagError::corrupt(&meta_path, format!("failed to serialize meta: {e}")))?;
    write_synced(&meta_path, |w| w.write_all(&meta_json))?;

    // chunks.jsonl
    let chunks_path = dir.join(CHUNKS_FILE);
    let mut lines = Vec::new();
    for chunk in index.chunks() {
        serde_json::to_writer(&mut lines, chunk)
            .map_err(|e| RagError::corrupt(&chunks_path, format!("failed to serialize chunk: {e}")))?;
        lines.push(b'\n');
    }
    write_synced(&chunks_path, |w| w.write_all(&lines))?;

    // index.bin
    let vectors = index.vectors();
    let dims = to_u32(vectors.dimensions(), "dimensions")?;
    let count = to_u32(vectors.len(), "vector count")?;
    write_synced(&dir.join(INDEX_FILE), |w| {
        w.write_all(&INDEX_MAGIC.to_le_bytes())?;
        w.write_all(&INDEX_VERSION.to_le_bytes())?;
        w.write_all(&dims.to_le_bytes())?;
        w.write_all(&count.to_le_bytes())?;
        for value in vectors.raw() {
            w.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    })
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| RagError::InvalidParameter(format!("{what} {value} exceeds u32")))
}

fn write_synced(
    path: &Path,
    body: impl FnOnce(&mut BufWriter<&File>) -> std::io::Result<()>,
) -> Result<()> {
    let file = File::create(path).map_err(|e| RagError::io(path, e))?;
    let mut writer = BufWriter::new(&file);
    body(&mut writer).and_then(|()| writer.flush()).map_err(|e| RagError::io(path, e))?;
    drop(writer);
    file.sync_all().map_err(|e| RagError::io(path, e))
}

/// Load a persisted index from `location`.
///
/// # Errors
///
/// Returns [`RagError::IndexCorrupt`] if any file is missing, unreadable, or
/// inconsistent with the others.
pub fn read_index(location: &Path) -> Result<Index> {
    let meta_path = location.join(META_FILE);
    let meta_bytes = read_file(&meta_path)?;
    let meta: IndexMeta = serde_json::from_slice(&meta_bytes)
        .map_err(|e| RagError::corrupt(&meta_path, format!("failed to parse meta: {e}")))?;
    if meta.version != INDEX_VERSION {
        return Err(RagError::corrupt(&meta_path, format!("unsupported version {}", meta.version)));
    }

    let vectors = read_vectors(&location.join(INDEX_FILE))?;
    let chunks = read_chunks(&location.join(CHUNKS_FILE))?;

    if chunks.len() != vectors.len() {
        return Err(RagError::corrupt(
            location,
            format!("{} chunks but {} vectors", chunks.len(), vectors.len()),
        ));
    }
    Index::new(meta, chunks, vectors).map_err(|e| RagError::corrupt(location, e.to_string()))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| RagError::corrupt(path, format!("failed to read: {e}")))
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn read_vectors(path: &Path) -> Result<FlatIndex> {
    let bytes = read_file(path)?;
    if bytes.len() < HEADER_LEN {
        return Err(RagError::corrupt(path, "file too small for header"));
    }

    let magic = read_u32(&bytes, 0);
    let version = read_u32(&bytes, 4);
    let dims = read_u32(&bytes, 8) as usize;
    let count = read_u32(&bytes, 12) as usize;

    if magic != INDEX_MAGIC {
        return Err(RagError::corrupt(
            path,
            format!("bad magic {magic:#X} (expected {INDEX_MAGIC:#X})"),
        ));
    }
    if version != INDEX_VERSION {
        return Err(RagError::corrupt(path, format!("unsupported version {version}")));
    }
    if dims == 0 {
        return Err(RagError::corrupt(path, "zero dimensions"));
    }

    let expected_len = dims
        .checked_mul(count)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(HEADER_LEN));
    if expected_len != Some(bytes.len()) {
        return Err(RagError::corrupt(
            path,
            format!("size mismatch: got {}, expected {expected_len:?} (dims={dims}, count={count})", bytes.len()),
        ));
    }

    let data: Vec<f32> = bytes[HEADER_LEN..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if !is_finite(&data) {
        return Err(RagError::corrupt(path, "non-finite vector component"));
    }
    Ok(FlatIndex::from_normalized(dims, data))
}

fn read_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let bytes = read_file(path)?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|e| RagError::corrupt(path, format!("invalid UTF-8: {e}")))?;

    let mut chunks = Vec::new();
    for (line_no, line) in text.lines().enumerate().filter(|(_, l)| !l.is_empty()) {
        let chunk: Chunk = serde_json::from_str(line).map_err(|e| {
            RagError::corrupt(path, format!("line {}: failed to parse chunk: {e}", line_no + 1))
        })?;
        if chunk.sequence_index != chunks.len() {
            return Err(RagError::corrupt(
                path,
                format!("line {}: sequence_index {} out of order", line_no + 1, chunk.sequence_index),
            ));
        }
        chunks.push(chunk);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn sample_index(count: usize) -> Index {
        let chunks: Vec<Chunk> = (0..count)
            .map(|i| Chunk {
                text: format!("chunk {i}\nwith a newline"),
                source_page: i / 2,
                sequence_index: i,
                start_offset: i * 30,
            })
            .collect();
        let vectors = (0..count).map(|i| vec![i as f32 + 1.0, 1.0, 0.5]).collect();
        let meta = IndexMeta {
            version: INDEX_VERSION,
            embedding_model: "test-model".into(),
            dimensions: 3,
            chunk_size: 100,
            chunk_overlap: 10,
            chunk_count: count,
            source: PathBuf::from("guide.pdf"),
            created_at: Utc::now(),
        };
        Index::new(meta, chunks, FlatIndex::new(3, vectors).unwrap()).unwrap()
    }

    #[test]
    fn write_then_read_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("idx");
        let index = sample_index(4);

        write_index(&location, &index).unwrap();
        assert!(index_exists(&location));
        assert_eq!(read_index(&location).unwrap(), index);
    }

    #[test]
    fn no_temp_dirs_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        write_index(&dir.path().join("idx"), &sample_index(2)).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["idx".to_string()]);
    }

    #[test]
    fn empty_target_directory_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("idx");
        fs::create_dir(&location).unwrap();
        write_index(&location, &sample_index(1)).unwrap();
        assert!(index_exists(&location));
    }

    #[test]
    fn foreign_directory_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("idx");
        fs::create_dir(&location).unwrap();
        fs::write(location.join("notes.txt"), "keep me").unwrap();

        let err = write_index(&location, &sample_index(1)).unwrap_err();
        assert!(matches!(err, RagError::IndexCorrupt { .. }));
        assert!(location.join("notes.txt").exists());
    }

    #[test]
    fn truncated_vectors_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("idx");
        write_index(&location, &sample_index(3)).unwrap();

        let path = location.join(INDEX_FILE);
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&path, bytes).unwrap();

        assert!(matches!(read_index(&location), Err(RagError::IndexCorrupt { .. })));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("idx");
        write_index(&location, &sample_index(1)).unwrap();

        let path = location.join(INDEX_FILE);
        let mut bytes = fs::read(&path).unwrap();
        bytes[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        fs::write(&path, bytes).unwrap();

        let err = read_index(&location).unwrap_err();
        assert!(err.to_string().contains("bad magic"), "{err}");
    }

    #[test]
    fn missing_chunks_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("idx");
        write_index(&location, &sample_index(2)).unwrap();
        fs::remove_file(location.join(CHUNKS_FILE)).unwrap();
        assert!(matches!(read_index(&location), Err(RagError::IndexCorrupt { .. })));
    }

    #[test]
    fn dropped_chunk_line_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("idx");
        write_index(&location, &sample_index(3)).unwrap();

        let path = location.join(CHUNKS_FILE);
        let content = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().take(2).collect();
        fs::write(&path, kept.join("\n")).unwrap();

        assert!(matches!(read_index(&location), Err(RagError::IndexCorrupt { .. })));
    }

    #[test]
    fn stale_temp_dirs_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("idx");
        let stale = dir.path().join("idx.tmp-1234");
        fs::create_dir(&stale).unwrap();
        fs::write(stale.join(INDEX_FILE), b"partial").unwrap();
        let neighbour = dir.path().join("idx2.tmp-5678");
        fs::create_dir(&neighbour).unwrap();

        assert_eq!(remove_stale_temp_dirs(&location).unwrap(), 1);
        assert!(!stale.exists());
        assert!(neighbour.exists());
        assert_eq!(remove_stale_temp_dirs(&dir.path().join("absent").join("idx")).unwrap(), 0);
    }

    #[test]
    fn non_finite_vectors_on_disk_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("idx");
        write_index(&location, &sample_index(2)).unwrap();

        let path = location.join(INDEX_FILE);
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(&f32::NAN.to_le_bytes());
        fs::write(&path, bytes).unwrap();

        let err = read_index(&location).unwrap_err();
        assert!(err.to_string().contains("non-finite"), "{err}");
    }

    #[test]
    fn sibling_paths() {
        assert_eq!(sibling(Path::new("faiss_index"), ".lock"), PathBuf::from("./faiss_index.lock"));
        assert_eq!(sibling(Path::new("/a/b/idx"), ".lock"), PathBuf::from("/a/b/idx.lock"));
    }
}
