//! Blocking file I/O shared by the v1 and v2 codecs.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{InitrdError, Result};

/// Fill `buf` exactly, mapping a short read to `Truncated`.
pub(crate) fn read_exact_or(f: &mut File, buf: &mut [u8], what: &'static str) -> Result<()> {
    f.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => InitrdError::Truncated(what),
        _ => InitrdError::Io(e),
    })
}

/// Read `len` bytes at `offset` from an image file.
pub(crate) fn read_blob(path: &Path, offset: u64, len: usize, what: &'static str) -> Result<Vec<u8>> {
    let mut f = File::open(path)?;
    f.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    read_exact_or(&mut f, &mut buf, what)?;
    Ok(buf)
}

/// Commit a fully built image: write to a temp file in the target
/// directory, then rename over the destination. A failed save never
/// leaves a half-written image at `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| InitrdError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_then_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.bin");

        write_atomic(&path, b"hello image").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello image");

        // Overwrite replaces the old content wholesale.
        write_atomic(&path, b"v2").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"v2");
    }

    #[test]
    fn test_read_blob_short_file_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"abc").unwrap();

        let err = read_blob(&path, 0, 16, "file data").unwrap_err();
        assert!(matches!(err, InitrdError::Truncated("file data")));
    }
}
