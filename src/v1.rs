//! The v1 initrd format.
//!
//! The minimal format: a flat list of entries with no per-entry
//! metadata and no checksums.
//!
//! ```text
//! +--------------+ 0x00
//! |    Header    |        32 bytes
//! +--------------+ 0x20
//! |   Metadata   |        entry records + null-terminated paths
//! +--------------+ data_offset (page aligned)
//! |     Data     |        page-aligned file contents / link targets
//! +--------------+ total_size
//! ```
//!
//! Header: `char signature[6]` (`INITv1`), `u16 flags`, `u32 total_size`,
//! `u32 data_offset`, `u16 entry_count`, 14 reserved bytes (zero).
//!
//! Entry record: `u8 entry_type` (`'f'|'d'|'l'`), 1 reserved byte,
//! `u16 path_len`, `u32 data_offset` (absolute from the image start),
//! `u32 data_size`, then `path_len+1` bytes of null-terminated ASCII path.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::directive::Directive;
use crate::error::{InitrdError, Result};
use crate::format::{align_up, to_u16, to_u32, EntryKind, PAGE_SIZE, V1_SIGNATURE};
use crate::image::Extracted;
use crate::io::{read_blob, read_exact_or, write_atomic};
use crate::layout::{self, Segment};

pub const V1_HEADER_SIZE: usize = 32;
pub const V1_ENTRY_SIZE: usize = 12;

/// A decoded v1 entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V1Entry {
    pub kind: EntryKind,
    pub path: String,
    /// Absolute offset from the start of the image (v1 stores absolute
    /// offsets; directories point at the data section start with size 0).
    pub data_offset: u32,
    pub data_size: u32,
}

/// A decoded or freshly built v1 image.
#[derive(Debug, Clone)]
pub struct V1Image {
    pub flags: u16,
    pub total_size: u32,
    pub data_offset: u32,
    pub entries: Vec<V1Entry>,
}

impl V1Image {
    /// Parse a v1 image file. The whole metadata section is materialized;
    /// data is read on demand by [`V1Image::read_file_data`].
    pub fn load(path: &Path) -> Result<Self> {
        let mut f = fs::File::open(path)?;
        let mut header = [0u8; V1_HEADER_SIZE];
        read_exact_or(&mut f, &mut header, "v1 header")?;

        if &header[..6] != V1_SIGNATURE {
            return Err(InitrdError::BadSignature {
                expected: "INITv1",
                found: [header[0], header[1], header[2], header[3], header[4], header[5]],
            });
        }

        let flags = u16::from_le_bytes([header[6], header[7]]);
        let total_size = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let data_offset = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
        let entry_count = u16::from_le_bytes([header[16], header[17]]);

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let mut record = [0u8; V1_ENTRY_SIZE];
            read_exact_or(&mut f, &mut record, "v1 entry record")?;

            let kind = EntryKind::from_byte(record[0])?;
            let path_len = u16::from_le_bytes([record[2], record[3]]) as usize;
            let entry_offset = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            let entry_size = u32::from_le_bytes([record[8], record[9], record[10], record[11]]);

            let mut path_buf = vec![0u8; path_len + 1];
            read_exact_or(&mut f, &mut path_buf, "v1 path string")?;
            let path = decode_path(&path_buf[..path_len])?;

            entries.push(V1Entry { kind, path, data_offset: entry_offset, data_size: entry_size });
        }

        tracing::debug!(entries = entries.len(), total_size, "loaded v1 image");

        Ok(V1Image { flags, total_size, data_offset, entries })
    }

    /// Lay out `directives` and write a complete v1 image to `path`
    /// atomically (temp file then rename).
    pub fn build(path: &Path, directives: &[Directive]) -> Result<Self> {
        let layout = layout::plan(directives)?;

        let entry_count = to_u16("entry count", layout.entries.len() as u64)?;
        let mut metadata_size: u64 = 0;
        for e in &layout.entries {
            metadata_size += V1_ENTRY_SIZE as u64 + e.directive.path.len() as u64 + 1;
        }
        let data_start = to_u32(
            "data offset",
            align_up(V1_HEADER_SIZE as u64 + metadata_size, PAGE_SIZE),
        )?;
        let total_size = to_u32("total size", u64::from(data_start) + u64::from(layout.data_size))?;

        let mut buf = Vec::with_capacity(total_size as usize);
        buf.extend_from_slice(V1_SIGNATURE);
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&total_size.to_le_bytes());
        buf.extend_from_slice(&data_start.to_le_bytes());
        buf.extend_from_slice(&entry_count.to_le_bytes());
        buf.resize(V1_HEADER_SIZE, 0); // reserved

        let mut entries = Vec::with_capacity(layout.entries.len());
        for e in &layout.entries {
            let path = &e.directive.path;
            let path_len = encode_path_len(path)?;
            let abs_offset = data_start + e.data_offset;

            buf.push(e.directive.kind.as_byte());
            buf.push(0); // reserved
            buf.extend_from_slice(&path_len.to_le_bytes());
            buf.extend_from_slice(&abs_offset.to_le_bytes());
            buf.extend_from_slice(&e.directive.size.to_le_bytes());
            buf.extend_from_slice(path.as_bytes());
            buf.push(0);

            entries.push(V1Entry {
                kind: e.directive.kind,
                path: path.clone(),
                data_offset: abs_offset,
                data_size: e.directive.size,
            });
        }
        buf.resize(data_start as usize, 0);

        for segment in &layout.segments {
            append_segment(&mut buf, segment)?;
        }
        debug_assert_eq!(buf.len(), total_size as usize);

        write_atomic(path, &buf)?;
        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            total_size,
            "wrote v1 image"
        );

        Ok(V1Image { flags: 0, total_size, data_offset: data_start, entries })
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Header + entry records + path strings, before data-section padding.
    pub fn metadata_size(&self) -> u32 {
        let mut size = V1_HEADER_SIZE as u32;
        for e in &self.entries {
            size += V1_ENTRY_SIZE as u32 + e.path.len() as u32 + 1;
        }
        size
    }

    pub fn data_size(&self) -> u32 {
        self.total_size - self.data_offset
    }

    /// Exact path match against the decoded entries.
    pub fn find_entry(&self, path: &str) -> Option<&V1Entry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Read one entry's payload from the image file.
    pub fn read_file_data(image_path: &Path, entry: &V1Entry) -> Result<Vec<u8>> {
        if entry.data_size == 0 {
            return Ok(Vec::new());
        }
        read_blob(
            image_path,
            u64::from(entry.data_offset),
            entry.data_size as usize,
            "v1 file data",
        )
    }

    /// Decode every entry back into a directive. File payloads are
    /// materialized into temp files owned by the returned [`Extracted`].
    pub fn to_directives(&self, image_path: &Path) -> Result<Extracted> {
        let mut out = Extracted::new();

        for entry in &self.entries {
            match entry.kind {
                EntryKind::Dir => out.push(Directive {
                    kind: EntryKind::Dir,
                    path: entry.path.clone(),
                    operand: None,
                    size: 0,
                    mode: EntryKind::Dir.default_mode(),
                    uid: 0,
                    gid: 0,
                    mtime: 0,
                }),
                EntryKind::File => {
                    let data = Self::read_file_data(image_path, entry)?;
                    let tmp = materialize(&data)?;
                    let directive = Directive {
                        kind: EntryKind::File,
                        path: entry.path.clone(),
                        operand: Some(tmp.to_string_lossy().into_owned()),
                        size: entry.data_size,
                        mode: EntryKind::File.default_mode(),
                        uid: 0,
                        gid: 0,
                        mtime: 0,
                    };
                    out.push_file(directive, tmp);
                }
                EntryKind::Symlink => {
                    let data = Self::read_file_data(image_path, entry)?;
                    let target = decode_link_target(&data)?;
                    let size = to_u32("symlink target size", target.len() as u64 + 1)?;
                    out.push(Directive {
                        kind: EntryKind::Symlink,
                        path: entry.path.clone(),
                        operand: Some(target),
                        size,
                        mode: EntryKind::Symlink.default_mode(),
                        uid: 0,
                        gid: 0,
                        mtime: 0,
                    });
                }
            }
        }

        Ok(out)
    }
}

/// Append a payload segment padded with zeros to a page boundary.
pub(crate) fn append_segment(buf: &mut Vec<u8>, segment: &Segment) -> Result<()> {
    let start = buf.len();
    match segment {
        Segment::File { source, size } => {
            let data = fs::read(source)?;
            // The source must not have changed size since layout.
            if data.len() as u64 != u64::from(*size) {
                return Err(InitrdError::InvalidSource(source.clone()));
            }
            buf.extend_from_slice(&data);
        }
        Segment::Link { target, .. } => {
            buf.extend_from_slice(target.as_bytes());
            buf.push(0);
        }
    }
    let padded = align_up((buf.len() - start) as u64, PAGE_SIZE) as usize;
    buf.resize(start + padded, 0);
    Ok(())
}

pub(crate) fn encode_path_len(path: &str) -> Result<u16> {
    if !path.is_ascii() {
        return Err(InitrdError::NonAsciiPath(path.to_string()));
    }
    to_u16("path length", path.len() as u64)
}

pub(crate) fn decode_path(bytes: &[u8]) -> Result<String> {
    if !bytes.is_ascii() {
        return Err(InitrdError::NonAsciiPath(
            String::from_utf8_lossy(bytes).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

pub(crate) fn decode_link_target(data: &[u8]) -> Result<String> {
    let trimmed: &[u8] = match data.iter().rposition(|&b| b != 0) {
        Some(last) => &data[..=last],
        None => &[],
    };
    decode_path(trimmed)
}

/// Write one extracted payload to a caller-owned temp file.
pub(crate) fn materialize(data: &[u8]) -> Result<tempfile::TempPath> {
    let mut tmp = NamedTempFile::new()?;
    tmp.write_all(data)?;
    tmp.flush()?;
    Ok(tmp.into_temp_path())
}
