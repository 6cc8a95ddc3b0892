//! Version-dispatching facade over the v1 and v2 codecs.
//!
//! [`Image::load`] sniffs the 6-byte signature and delegates to the
//! matching codec; queries go through a codec-independent [`Entry`]
//! representation. The two concrete image types stay reachable for
//! callers that need version-specific fields.

use std::fs::File;
use std::path::Path;

use tempfile::TempPath;

use crate::directive::Directive;
use crate::error::{InitrdError, Result};
use crate::format::{EntryKind, V1_SIGNATURE, V2_SIGNATURE};
use crate::io::{read_blob, read_exact_or};
use crate::v1::V1Image;
use crate::v2::V2Image;

/// Which format to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2,
}

/// Codec-independent view of one decoded entry. For v1 images the
/// metadata fields hold defaults and `checksum` is 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub path: String,
    /// Offset relative to the data section start, both versions
    /// (v1's on-disk absolute offsets are normalized on conversion).
    pub data_offset: u32,
    pub data_size: u32,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u32,
    pub checksum: u32,
}

/// Directives decoded back out of an image, together with the temporary
/// files holding materialized file payloads. The payloads live exactly
/// as long as this value: dropping it removes every temp file, on error
/// paths included.
#[derive(Debug)]
pub struct Extracted {
    pub directives: Vec<Directive>,
    temp_files: Vec<TempPath>,
}

impl Extracted {
    pub(crate) fn new() -> Self {
        Extracted { directives: Vec::new(), temp_files: Vec::new() }
    }

    pub(crate) fn push(&mut self, directive: Directive) {
        self.directives.push(directive);
    }

    pub(crate) fn push_file(&mut self, directive: Directive, payload: TempPath) {
        self.directives.push(directive);
        self.temp_files.push(payload);
    }

    /// Number of materialized payload files held alive.
    pub fn temp_file_count(&self) -> usize {
        self.temp_files.len()
    }
}

/// An initrd image of either format version.
#[derive(Debug)]
pub enum Image {
    V1(V1Image),
    V2(V2Image),
}

impl Image {
    /// Load an image, detecting the version from its signature.
    /// Checksum verification (v2) defaults to on.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, true)
    }

    /// Load with explicit control over v2 checksum verification.
    pub fn load_with(path: &Path, verify_checksum: bool) -> Result<Self> {
        let mut f = File::open(path)?;
        let mut signature = [0u8; 6];
        read_exact_or(&mut f, &mut signature, "image signature")?;
        drop(f);

        if &signature == V1_SIGNATURE {
            Ok(Image::V1(V1Image::load(path)?))
        } else if &signature == V2_SIGNATURE {
            Ok(Image::V2(V2Image::load(path, verify_checksum)?))
        } else {
            Err(InitrdError::UnknownFormat(signature))
        }
    }

    /// Lay out `directives` and write a complete image to `path` in the
    /// requested format, in one atomic pass.
    pub fn build(path: &Path, version: Version, directives: &[Directive]) -> Result<Self> {
        match version {
            Version::V1 => Ok(Image::V1(V1Image::build(path, directives)?)),
            Version::V2 => Ok(Image::V2(V2Image::build(path, directives)?)),
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Image::V1(_) => Version::V1,
            Image::V2(_) => Version::V2,
        }
    }

    pub fn signature(&self) -> &'static str {
        match self {
            Image::V1(_) => "INITv1",
            Image::V2(_) => "INITv2",
        }
    }

    pub fn flags(&self) -> u16 {
        match self {
            Image::V1(img) => img.flags,
            Image::V2(img) => img.flags,
        }
    }

    pub fn total_size(&self) -> u32 {
        match self {
            Image::V1(img) => img.total_size,
            Image::V2(img) => img.total_size,
        }
    }

    /// Absolute offset of the data section.
    pub fn data_offset(&self) -> u32 {
        match self {
            Image::V1(img) => img.data_offset,
            Image::V2(img) => img.data_offset,
        }
    }

    pub fn entry_count(&self) -> usize {
        match self {
            Image::V1(img) => img.entry_count(),
            Image::V2(img) => img.entry_count(),
        }
    }

    /// Header plus entry records, before data-section padding.
    pub fn metadata_size(&self) -> u32 {
        match self {
            Image::V1(img) => img.metadata_size(),
            Image::V2(img) => img.total_metadata_size(),
        }
    }

    pub fn data_size(&self) -> u32 {
        self.total_size() - self.data_offset()
    }

    /// All entries in on-disk order, as the unified representation.
    pub fn entries(&self) -> Vec<Entry> {
        match self {
            Image::V1(img) => img
                .entries
                .iter()
                .map(|e| Entry {
                    kind: e.kind,
                    path: e.path.clone(),
                    // v1 stores absolute offsets.
                    data_offset: e.data_offset.saturating_sub(img.data_offset),
                    data_size: e.data_size,
                    mode: e.kind.default_mode(),
                    uid: 0,
                    gid: 0,
                    mtime: 0,
                    checksum: 0,
                })
                .collect(),
            Image::V2(img) => img
                .entries
                .iter()
                .map(|e| Entry {
                    kind: e.kind,
                    path: e.path.clone(),
                    data_offset: e.data_offset,
                    data_size: e.data_size,
                    mode: e.mode,
                    uid: e.uid,
                    gid: e.gid,
                    mtime: e.mtime,
                    checksum: e.checksum,
                })
                .collect(),
        }
    }

    /// Exact path match against the decoded entries.
    pub fn find_entry(&self, path: &str) -> Option<Entry> {
        self.entries().into_iter().find(|e| e.path == path)
    }

    /// Read one entry's payload, verifying its checksum when requested
    /// (v2 entries only carry one).
    pub fn read_file_data(&self, image_path: &Path, entry: &Entry, verify_checksum: bool) -> Result<Vec<u8>> {
        if entry.data_size == 0 {
            return Ok(Vec::new());
        }
        let data = read_blob(
            image_path,
            u64::from(self.data_offset()) + u64::from(entry.data_offset),
            entry.data_size as usize,
            "file data",
        )?;

        if verify_checksum && entry.checksum != 0 {
            let actual = crc32fast::hash(&data);
            if actual != entry.checksum {
                return Err(InitrdError::ChecksumMismatch { expected: entry.checksum, actual });
            }
        }
        Ok(data)
    }

    /// Decode every entry back into a directive; the inverse of
    /// [`Image::build`]. See [`Extracted`] for payload ownership.
    pub fn to_directives(&self, image_path: &Path) -> Result<Extracted> {
        match self {
            Image::V1(img) => img.to_directives(image_path),
            Image::V2(img) => img.to_directives(image_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn tmp_source(dir: &TempDir, name: &str, content: &[u8]) -> String {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_load_dispatches_on_signature() {
        let dir = TempDir::new().unwrap();
        let src = tmp_source(&dir, "f", b"x");
        let directives = vec![Directive::file(&src, "/f").unwrap()];

        let v1_path = dir.path().join("v1.img");
        Image::build(&v1_path, Version::V1, &directives).unwrap();
        let v1 = Image::load(&v1_path).unwrap();
        assert_eq!(v1.version(), Version::V1);
        assert_eq!(v1.signature(), "INITv1");

        let v2_path = dir.path().join("v2.img");
        Image::build(&v2_path, Version::V2, &directives).unwrap();
        let v2 = Image::load(&v2_path).unwrap();
        assert_eq!(v2.version(), Version::V2);
        assert_eq!(v2.signature(), "INITv2");
    }

    #[test]
    fn test_unknown_signature_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weird.img");
        fs::write(&path, b"GZIP\x1f\x8b and then some").unwrap();

        assert!(matches!(
            Image::load(&path),
            Err(InitrdError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_tiny_file_is_truncated_not_unknown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny.img");
        fs::write(&path, b"INI").unwrap();

        assert!(matches!(
            Image::load(&path),
            Err(InitrdError::Truncated("image signature"))
        ));
    }

    #[test]
    fn test_unified_offsets_are_data_relative() {
        let dir = TempDir::new().unwrap();
        let src = tmp_source(&dir, "f", b"abc");
        let directives = vec![Directive::file(&src, "/f").unwrap()];

        for version in [Version::V1, Version::V2] {
            let path = dir.path().join("cur.img");
            let img = Image::build(&path, version, &directives).unwrap();

            let entry = img.find_entry("/f").unwrap();
            assert_eq!(entry.data_offset, 0);
            assert_eq!(img.read_file_data(&path, &entry, true).unwrap(), b"abc");
        }
    }

    #[test]
    fn test_find_entry_is_exact_match() {
        let dir = TempDir::new().unwrap();
        let src = tmp_source(&dir, "f", b"x");
        let path = dir.path().join("img");
        let img = Image::build(&path, Version::V2, &[Directive::file(&src, "/etc/motd").unwrap()])
            .unwrap();

        assert!(img.find_entry("/etc/motd").is_some());
        assert!(img.find_entry("/etc/").is_some());
        assert!(img.find_entry("/etc").is_none()); // no prefix matching
        assert!(img.find_entry("/etc/mot").is_none());
    }

    #[test]
    fn test_accessors_are_consistent() {
        let dir = TempDir::new().unwrap();
        let src = tmp_source(&dir, "f", b"hello world");
        let path = dir.path().join("img");
        let img = Image::build(&path, Version::V2, &[Directive::file(&src, "/hello").unwrap()])
            .unwrap();

        assert_eq!(img.flags(), 0);
        assert_eq!(img.entry_count(), 1);
        assert_eq!(img.data_size(), 4096);
        assert_eq!(img.total_size(), img.data_offset() + img.data_size());
        assert!(u64::from(img.metadata_size()) <= u64::from(img.data_offset()));
        assert_eq!(fs::metadata(&path).unwrap().len(), u64::from(img.total_size()));
    }

    #[test]
    fn test_extracted_releases_payloads_on_drop() {
        let dir = TempDir::new().unwrap();
        let src = tmp_source(&dir, "f", b"payload");
        let path = dir.path().join("img");
        let img = Image::build(&path, Version::V2, &[Directive::file(&src, "/f").unwrap()])
            .unwrap();

        let payload_path;
        {
            let extracted = img.to_directives(&path).unwrap();
            assert_eq!(extracted.temp_file_count(), 1);
            let f = extracted.directives.iter().find(|d| d.is_file()).unwrap();
            payload_path = f.operand.clone().unwrap();
            assert!(Path::new(&payload_path).exists());
        }
        assert!(!Path::new(&payload_path).exists());
    }

    #[test]
    fn test_full_round_trip_both_versions() {
        let dir = TempDir::new().unwrap();
        let src = tmp_source(&dir, "motd", b"hi there\n");
        let directives = vec![
            Directive::file(&src, "/etc/motd").unwrap(),
            Directive::symlink("/etc/motd", "/motd").unwrap(),
            Directive::dir("/var/run").unwrap(),
        ];

        for version in [Version::V1, Version::V2] {
            let path = dir.path().join("rt.img");
            let img = Image::build(&path, version, &directives).unwrap();
            let extracted = img.to_directives(&path).unwrap();

            let rebuilt = dir.path().join("rt2.img");
            let img2 = Image::build(&rebuilt, version, &extracted.directives).unwrap();

            assert_eq!(img2.entry_count(), img.entry_count());
            let motd = img2.find_entry("/etc/motd").unwrap();
            assert_eq!(img2.read_file_data(&rebuilt, &motd, true).unwrap(), b"hi there\n");
            let link = img2.find_entry("/motd").unwrap();
            assert_eq!(
                img2.read_file_data(&rebuilt, &link, true).unwrap(),
                b"/etc/motd\0"
            );
        }
    }
}
