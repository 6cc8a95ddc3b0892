//! The v2 initrd format.
//!
//! Same image layout as v1 (header, metadata, page-aligned data section)
//! with two additions: per-entry Unix metadata (mode/uid/gid/mtime) and
//! CRC32 checksums, one over each entry's payload and one over the whole
//! data section.
//!
//! Header (48 bytes): `char signature[6]` (`INITv2`), `u16 flags`,
//! `u32 total_size`, `u32 data_offset`, `u16 entry_count`, 2 pad bytes,
//! `u32 metadata_size`, `u32 data_size`, `u32 checksum` (CRC32 of the
//! entire data section, 0 = none), 4 reserved `u32` words.
//!
//! Entry record (36 bytes): `u8 entry_type`, 1 reserved byte,
//! `u16 path_len`, `u16 mode`, 2 reserved bytes, `u32 uid`, `u32 gid`,
//! `u32 mtime`, `u32 data_offset` (relative to the data section start),
//! `u32 data_size`, `u32 checksum` (CRC32 of this entry's payload,
//! 0 = none), `u32` reserved, then the null-terminated path.
//!
//! The whole-section checksum is verified on load (unless disabled);
//! per-entry checksums are verified lazily, only when a payload is read.

use std::fs;
use std::path::Path;

use crate::directive::Directive;
use crate::error::{InitrdError, Result};
use crate::format::{align_up, to_u16, to_u32, EntryKind, PAGE_SIZE, V2_SIGNATURE};
use crate::image::Extracted;
use crate::io::{read_blob, read_exact_or, write_atomic};
use crate::layout;
use crate::v1::{append_segment, decode_link_target, decode_path, encode_path_len, materialize};

pub const V2_HEADER_SIZE: usize = 48;
pub const V2_ENTRY_SIZE: usize = 36;

/// A decoded v2 entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Entry {
    pub kind: EntryKind,
    pub path: String,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u32,
    /// Offset relative to the data section start.
    pub data_offset: u32,
    pub data_size: u32,
    /// CRC32 of this entry's payload (0 = no checksum).
    pub checksum: u32,
}

/// A decoded or freshly built v2 image.
#[derive(Debug, Clone)]
pub struct V2Image {
    pub flags: u16,
    pub total_size: u32,
    pub data_offset: u32,
    pub metadata_size: u32,
    pub data_size: u32,
    /// CRC32 of the entire data section (0 = no checksum).
    pub checksum: u32,
    pub entries: Vec<V2Entry>,
}

impl V2Image {
    /// Parse a v2 image file. When `verify_checksum` is set and the
    /// header carries a non-zero checksum, the whole data section is
    /// read back and verified.
    pub fn load(path: &Path, verify_checksum: bool) -> Result<Self> {
        let mut f = fs::File::open(path)?;
        let mut header = [0u8; V2_HEADER_SIZE];
        read_exact_or(&mut f, &mut header, "v2 header")?;

        if &header[..6] != V2_SIGNATURE {
            return Err(InitrdError::BadSignature {
                expected: "INITv2",
                found: [header[0], header[1], header[2], header[3], header[4], header[5]],
            });
        }

        let flags = u16::from_le_bytes([header[6], header[7]]);
        let total_size = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let data_offset = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
        let entry_count = u16::from_le_bytes([header[16], header[17]]);
        // header[18..20] is padding
        let metadata_size = u32::from_le_bytes([header[20], header[21], header[22], header[23]]);
        let data_size = u32::from_le_bytes([header[24], header[25], header[26], header[27]]);
        let checksum = u32::from_le_bytes([header[28], header[29], header[30], header[31]]);

        let blob_len = if metadata_size > 0 {
            metadata_size as usize
        } else {
            (data_offset as usize).saturating_sub(V2_HEADER_SIZE)
        };
        let mut metadata = vec![0u8; blob_len];
        read_exact_or(&mut f, &mut metadata, "v2 metadata")?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut offset = 0usize;
        for _ in 0..entry_count {
            if offset + V2_ENTRY_SIZE > metadata.len() {
                return Err(InitrdError::Truncated("v2 entry record"));
            }
            let r = &metadata[offset..offset + V2_ENTRY_SIZE];
            offset += V2_ENTRY_SIZE;

            let kind = EntryKind::from_byte(r[0])?;
            let path_len = u16::from_le_bytes([r[2], r[3]]) as usize;
            let mode = u16::from_le_bytes([r[4], r[5]]);
            // r[6..8] reserved
            let uid = u32::from_le_bytes([r[8], r[9], r[10], r[11]]);
            let gid = u32::from_le_bytes([r[12], r[13], r[14], r[15]]);
            let mtime = u32::from_le_bytes([r[16], r[17], r[18], r[19]]);
            let entry_offset = u32::from_le_bytes([r[20], r[21], r[22], r[23]]);
            let entry_size = u32::from_le_bytes([r[24], r[25], r[26], r[27]]);
            let entry_checksum = u32::from_le_bytes([r[28], r[29], r[30], r[31]]);
            // r[32..36] reserved

            if offset + path_len + 1 > metadata.len() {
                return Err(InitrdError::Truncated("v2 path string"));
            }
            let path = decode_path(&metadata[offset..offset + path_len])?;
            offset += path_len + 1;

            entries.push(V2Entry {
                kind,
                path,
                mode,
                uid,
                gid,
                mtime,
                data_offset: entry_offset,
                data_size: entry_size,
                checksum: entry_checksum,
            });
        }

        if verify_checksum && checksum != 0 {
            let data = read_blob(path, u64::from(data_offset), data_size as usize, "v2 data section")?;
            let actual = crc32fast::hash(&data);
            if actual != checksum {
                return Err(InitrdError::ChecksumMismatch { expected: checksum, actual });
            }
        }

        tracing::debug!(entries = entries.len(), total_size, "loaded v2 image");

        Ok(V2Image {
            flags,
            total_size,
            data_offset,
            metadata_size,
            data_size,
            checksum,
            entries,
        })
    }

    /// Lay out `directives` and write a complete v2 image to `path`
    /// atomically. The data section is built fully in memory first: the
    /// header checksum covers every byte of it.
    pub fn build(path: &Path, directives: &[Directive]) -> Result<Self> {
        let layout = layout::plan(directives)?;
        let entry_count = to_u16("entry count", layout.entries.len() as u64)?;

        // Data section + per-segment checksums first, so entry records
        // can carry their payload checksums.
        let mut data = Vec::with_capacity(layout.data_size as usize);
        let mut segment_checksums = Vec::with_capacity(layout.segments.len());
        for segment in &layout.segments {
            let start = data.len();
            append_segment(&mut data, segment)?;
            segment_checksums.push(crc32fast::hash(&data[start..start + segment.size() as usize]));
        }
        let data_checksum = crc32fast::hash(&data);

        let mut metadata = Vec::new();
        let mut entries = Vec::with_capacity(layout.entries.len());
        for e in &layout.entries {
            let d = &e.directive;
            let path_len = encode_path_len(&d.path)?;
            let entry_checksum = e.segment.map(|i| segment_checksums[i]).unwrap_or(0);

            metadata.push(d.kind.as_byte());
            metadata.push(0); // reserved
            metadata.extend_from_slice(&path_len.to_le_bytes());
            metadata.extend_from_slice(&d.mode.to_le_bytes());
            metadata.extend_from_slice(&0u16.to_le_bytes()); // reserved
            metadata.extend_from_slice(&d.uid.to_le_bytes());
            metadata.extend_from_slice(&d.gid.to_le_bytes());
            metadata.extend_from_slice(&d.mtime.to_le_bytes());
            metadata.extend_from_slice(&e.data_offset.to_le_bytes());
            metadata.extend_from_slice(&d.size.to_le_bytes());
            metadata.extend_from_slice(&entry_checksum.to_le_bytes());
            metadata.extend_from_slice(&0u32.to_le_bytes()); // reserved
            metadata.extend_from_slice(d.path.as_bytes());
            metadata.push(0);

            entries.push(V2Entry {
                kind: d.kind,
                path: d.path.clone(),
                mode: d.mode,
                uid: d.uid,
                gid: d.gid,
                mtime: d.mtime,
                data_offset: e.data_offset,
                data_size: d.size,
                checksum: entry_checksum,
            });
        }

        let metadata_size = to_u32("metadata size", metadata.len() as u64)?;
        let data_start = to_u32(
            "data offset",
            align_up(V2_HEADER_SIZE as u64 + u64::from(metadata_size), PAGE_SIZE),
        )?;
        let total_size = to_u32("total size", u64::from(data_start) + data.len() as u64)?;

        let mut buf = Vec::with_capacity(total_size as usize);
        buf.extend_from_slice(V2_SIGNATURE);
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&total_size.to_le_bytes());
        buf.extend_from_slice(&data_start.to_le_bytes());
        buf.extend_from_slice(&entry_count.to_le_bytes());
        buf.extend_from_slice(&[0u8; 2]); // padding
        buf.extend_from_slice(&metadata_size.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&data_checksum.to_le_bytes());
        buf.resize(V2_HEADER_SIZE, 0); // 4 reserved u32 words

        buf.extend_from_slice(&metadata);
        buf.resize(data_start as usize, 0);
        buf.extend_from_slice(&data);
        debug_assert_eq!(buf.len(), total_size as usize);

        write_atomic(path, &buf)?;
        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            total_size,
            "wrote v2 image"
        );

        Ok(V2Image {
            flags: 0,
            total_size,
            data_offset: data_start,
            metadata_size,
            data_size: data.len() as u32,
            checksum: data_checksum,
            entries,
        })
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Header + entry records + path strings, before data-section padding.
    pub fn total_metadata_size(&self) -> u32 {
        if self.metadata_size > 0 {
            V2_HEADER_SIZE as u32 + self.metadata_size
        } else {
            self.data_offset
        }
    }

    /// Exact path match against the decoded entries.
    pub fn find_entry(&self, path: &str) -> Option<&V2Entry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Read one entry's payload, verifying its checksum lazily when
    /// requested and the entry carries one.
    pub fn read_file_data(
        &self,
        image_path: &Path,
        entry: &V2Entry,
        verify_checksum: bool,
    ) -> Result<Vec<u8>> {
        if entry.data_size == 0 {
            return Ok(Vec::new());
        }
        let data = read_blob(
            image_path,
            u64::from(self.data_offset) + u64::from(entry.data_offset),
            entry.data_size as usize,
            "v2 file data",
        )?;

        if verify_checksum && entry.checksum != 0 {
            let actual = crc32fast::hash(&data);
            if actual != entry.checksum {
                return Err(InitrdError::ChecksumMismatch { expected: entry.checksum, actual });
            }
        }
        Ok(data)
    }

    /// Decode every entry back into a directive, preserving metadata.
    /// File payloads are materialized into temp files owned by the
    /// returned [`Extracted`].
    pub fn to_directives(&self, image_path: &Path) -> Result<Extracted> {
        let mut out = Extracted::new();

        for entry in &self.entries {
            match entry.kind {
                EntryKind::Dir => out.push(self.entry_directive(entry, None, 0)),
                EntryKind::File => {
                    let data = self.read_file_data(image_path, entry, true)?;
                    let tmp = materialize(&data)?;
                    let operand = tmp.to_string_lossy().into_owned();
                    let directive = self.entry_directive(entry, Some(operand), entry.data_size);
                    out.push_file(directive, tmp);
                }
                EntryKind::Symlink => {
                    let data = self.read_file_data(image_path, entry, true)?;
                    let target = decode_link_target(&data)?;
                    let size = to_u32("symlink target size", target.len() as u64 + 1)?;
                    out.push(self.entry_directive(entry, Some(target), size));
                }
            }
        }

        Ok(out)
    }

    fn entry_directive(&self, entry: &V2Entry, operand: Option<String>, size: u32) -> Directive {
        Directive {
            kind: entry.kind,
            path: entry.path.clone(),
            operand,
            size,
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            mtime: entry.mtime,
        }
    }
}
