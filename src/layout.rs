//! Canonical entry ordering and data-section layout.
//!
//! [`plan`] is the single choke point both codecs go through on save: it
//! injects missing intermediate directories, orders every entry, and
//! assigns page-aligned, deduplicated data offsets. It is a pure function
//! of its input directives; it never touches payload contents.

use std::collections::HashMap;

use crate::directive::{intermediate_paths, Directive};
use crate::error::{InitrdError, Result};
use crate::format::{align_up, to_u32, EntryKind, PAGE_SIZE};

/// One payload blob in the data section. Segments appear exactly once,
/// in offset order; deduplicated files share a single segment.
#[derive(Debug, Clone)]
pub enum Segment {
    File { source: String, size: u32 },
    Link { target: String, size: u32 },
}

impl Segment {
    pub fn size(&self) -> u32 {
        match self {
            Segment::File { size, .. } | Segment::Link { size, .. } => *size,
        }
    }
}

/// A directive placed in the canonical order with its payload location.
#[derive(Debug, Clone)]
pub struct LaidOutEntry {
    pub directive: Directive,
    /// Payload offset relative to the data section start (0 for dirs).
    pub data_offset: u32,
    /// Index into [`Layout::segments`]; `None` for directories.
    pub segment: Option<usize>,
}

/// The complete on-disk plan for a set of directives.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Entries in canonical order: depth ascending, then dir < file <
    /// symlink, then case-insensitive path.
    pub entries: Vec<LaidOutEntry>,
    /// Unique payload blobs in offset order.
    pub segments: Vec<Segment>,
    /// Data section size, every blob rounded up to a page.
    pub data_size: u32,
}

/// Compute the layout for `directives`.
///
/// Duplicate destination paths are rejected with `DuplicatePath`; an
/// explicit directory directive does however take precedence over a
/// synthetic intermediate one.
pub fn plan(directives: &[Directive]) -> Result<Layout> {
    // Pass 1: collect explicit directives, then inject missing parents.
    // Parents inherit the owning directive's mode/uid/gid/mtime.
    let mut by_path: HashMap<String, Directive> = HashMap::with_capacity(directives.len());
    for d in directives {
        if by_path.insert(d.path.clone(), d.clone()).is_some() {
            return Err(InitrdError::DuplicatePath(d.path.clone()));
        }
    }
    for d in directives {
        for parent in intermediate_paths(&d.path) {
            by_path
                .entry(parent.clone())
                .or_insert_with(|| Directive::synthetic_dir(&parent, d));
        }
    }

    // Sort by (depth, type priority, lowercase path).
    let mut keys: Vec<(usize, u8, String, String)> = by_path
        .keys()
        .map(|path| {
            let d = &by_path[path];
            (depth(path), d.kind.priority(), path.to_lowercase(), path.clone())
        })
        .collect();
    keys.sort();

    // Pass 2: walk the final order once, assigning sequential offsets.
    // Files dedup by source path; symlink targets never dedup.
    let mut entries = Vec::with_capacity(keys.len());
    let mut segments = Vec::new();
    let mut by_source: HashMap<String, (u32, usize)> = HashMap::new();
    let mut cursor: u64 = 0;

    for (_, _, _, path) in keys {
        let d = by_path
            .remove(&path)
            .ok_or_else(|| InitrdError::DuplicatePath(path.clone()))?;

        let (data_offset, segment) = match d.kind {
            EntryKind::Dir => (0, None),
            EntryKind::File => {
                let source = d
                    .operand
                    .clone()
                    .ok_or_else(|| InitrdError::InvalidSource(d.path.clone()))?;
                match by_source.get(&source) {
                    Some(&(offset, index)) => (offset, Some(index)),
                    None => {
                        let offset = to_u32("data offset", cursor)?;
                        let index = segments.len();
                        segments.push(Segment::File { source: source.clone(), size: d.size });
                        by_source.insert(source, (offset, index));
                        cursor += align_up(u64::from(d.size), PAGE_SIZE);
                        (offset, Some(index))
                    }
                }
            }
            EntryKind::Symlink => {
                let target = d
                    .operand
                    .clone()
                    .ok_or_else(|| InitrdError::EmptyLinkTarget(d.path.clone()))?;
                let offset = to_u32("data offset", cursor)?;
                let index = segments.len();
                segments.push(Segment::Link { target, size: d.size });
                cursor += align_up(u64::from(d.size), PAGE_SIZE);
                (offset, Some(index))
            }
        };

        entries.push(LaidOutEntry { directive: d, data_offset, segment });
    }

    Ok(Layout {
        entries,
        segments,
        data_size: to_u32("data section size", cursor)?,
    })
}

/// Path depth: separator count of the trailing-slash-stripped path.
fn depth(path: &str) -> usize {
    path.trim_end_matches('/').matches('/').count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn tmp_source(content: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    fn paths(layout: &Layout) -> Vec<&str> {
        layout.entries.iter().map(|e| e.directive.path.as_str()).collect()
    }

    #[test]
    fn test_intermediate_dirs_injected() {
        let src = tmp_source(b"hi\n");
        let d = Directive::file(&src.path().display().to_string(), "/usr/bin/sh").unwrap();

        let layout = plan(&[d]).unwrap();
        assert_eq!(paths(&layout), vec!["/usr/", "/usr/bin/", "/usr/bin/sh"]);
        assert!(layout.entries[0].directive.is_dir());
        assert!(layout.entries[1].directive.is_dir());
    }

    #[test]
    fn test_synthetic_dirs_inherit_metadata() {
        let src = tmp_source(b"x");
        let spec = format!("{}:/srv/www/index@(uid=33,gid=33,mtime=1700000000)", src.path().display());
        let d = crate::directive::parse_directive(&spec).unwrap();

        let layout = plan(&[d]).unwrap();
        let parent = &layout.entries[0].directive;
        assert_eq!(parent.path, "/srv/");
        assert_eq!(parent.uid, 33);
        assert_eq!(parent.gid, 33);
        assert_eq!(parent.mtime, 1_700_000_000);
    }

    #[test]
    fn test_ordering_depth_then_type_then_name() {
        let src = tmp_source(b"data");
        let src_path = src.path().display().to_string();
        let directives = vec![
            Directive::symlink("/bin/sh", "/sh").unwrap(),
            Directive::file(&src_path, "/zebra").unwrap(),
            Directive::dir("/Apps").unwrap(),
            Directive::file(&src_path, "/apps/one").unwrap(),
        ];

        let layout = plan(&directives).unwrap();
        // Depth 1: dirs first (case-insensitive name order), then files, then links.
        assert_eq!(
            paths(&layout),
            vec!["/Apps/", "/apps/", "/zebra", "/sh", "/apps/one"]
        );
    }

    #[test]
    fn test_file_dedup_by_source_path() {
        let src = tmp_source(b"shared");
        let src_path = src.path().display().to_string();
        let directives = vec![
            Directive::file(&src_path, "/x").unwrap(),
            Directive::file(&src_path, "/y").unwrap(),
        ];

        let layout = plan(&directives).unwrap();
        assert_eq!(layout.segments.len(), 1);
        assert_eq!(layout.data_size, 4096);

        let offsets: Vec<u32> = layout
            .entries
            .iter()
            .filter(|e| e.directive.is_file())
            .map(|e| e.data_offset)
            .collect();
        assert_eq!(offsets, vec![0, 0]);
    }

    #[test]
    fn test_symlink_targets_not_deduped() {
        let directives = vec![
            Directive::symlink("/bin/sh", "/a").unwrap(),
            Directive::symlink("/bin/sh", "/b").unwrap(),
        ];

        let layout = plan(&directives).unwrap();
        assert_eq!(layout.segments.len(), 2);
        assert_eq!(layout.data_size, 8192);
    }

    #[test]
    fn test_offsets_page_aligned() {
        let big = tmp_source(&vec![7u8; 5000]);
        let small = tmp_source(b"s");
        let directives = vec![
            Directive::file(&big.path().display().to_string(), "/big").unwrap(),
            Directive::file(&small.path().display().to_string(), "/small").unwrap(),
        ];

        let layout = plan(&directives).unwrap();
        for e in &layout.entries {
            assert_eq!(u64::from(e.data_offset) % PAGE_SIZE, 0);
        }
        // 5000 bytes round up to two pages.
        assert_eq!(layout.data_size, 3 * 4096);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let directives = vec![
            Directive::dir("/etc").unwrap(),
            Directive::dir("/etc/").unwrap(),
        ];
        assert!(matches!(
            plan(&directives),
            Err(InitrdError::DuplicatePath(_))
        ));
    }

    #[test]
    fn test_explicit_dir_overrides_synthetic() {
        let src = tmp_source(b"hi");
        let directives = vec![
            Directive::file(&src.path().display().to_string(), "/etc/motd").unwrap(),
            Directive::new(
                EntryKind::Dir,
                "/etc/",
                None,
                crate::directive::Attrs { mode: Some(0o700), ..Default::default() },
            )
            .unwrap(),
        ];

        let layout = plan(&directives).unwrap();
        let etc = layout
            .entries
            .iter()
            .find(|e| e.directive.path == "/etc/")
            .unwrap();
        assert_eq!(etc.directive.mode, 0o700);
    }

    #[test]
    fn test_dirs_consume_no_data_space() {
        let directives = vec![Directive::dir("/a").unwrap(), Directive::dir("/a/b").unwrap()];
        let layout = plan(&directives).unwrap();
        assert_eq!(layout.data_size, 0);
        assert!(layout.segments.is_empty());
    }
}
