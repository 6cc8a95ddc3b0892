//! Directives: declarative requests to place one file, directory, or
//! symlink at a given path in an initrd image.
//!
//! Directives come from two places: programmatic construction
//! ([`Directive::file`] and friends) and the textual grammar consumed by
//! build tooling:
//!
//! ```text
//! <srcfile>:<path>              regular file
//! :<path>/                      directory
//! l<target>:<path>              symlink
//! ```
//!
//! Any form may carry a trailing attribute list `@(mode=0755,uid=0,...)`;
//! the attributes are only encoded by v2 images.

use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{InitrdError, Result};
use crate::format::{to_u32, EntryKind, DEFAULT_GID, DEFAULT_UID};

/// Optional per-entry metadata overrides parsed from `@(...)` attribute
/// lists. Unset fields fall back to the per-kind defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attrs {
    pub mode: Option<u16>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mtime: Option<u32>,
}

/// A request to place one entry in an image.
///
/// Invariants held after construction: `path` is absolute (directory
/// paths keep a trailing `/`), file directives name an existing regular
/// source file, and symlink sizes include the terminating null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: EntryKind,
    /// Absolute destination path inside the image.
    pub path: String,
    /// Source file path for files, link target for symlinks.
    pub operand: Option<String>,
    /// Payload size in bytes: file size, `len(target)+1` for symlinks, 0 for dirs.
    pub size: u32,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u32,
}

impl Directive {
    /// Construct a directive, validating the per-kind invariants.
    pub fn new(kind: EntryKind, path: &str, operand: Option<&str>, attrs: Attrs) -> Result<Self> {
        let path = match kind {
            EntryKind::Dir => normalize_dir_path(path),
            _ => path.to_string(),
        };
        if !path.starts_with('/') {
            return Err(InitrdError::PathNotAbsolute(path));
        }

        let mut size = 0u32;
        let mut source_mtime = None;
        let operand = match (kind, operand) {
            (EntryKind::Dir, _) => None,
            (EntryKind::File, Some(src)) => {
                let meta =
                    fs::metadata(src).map_err(|_| InitrdError::InvalidSource(src.to_string()))?;
                if !meta.is_file() {
                    return Err(InitrdError::InvalidSource(src.to_string()));
                }
                size = to_u32("file size", meta.len())?;
                source_mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as u32);
                Some(src.to_string())
            }
            (EntryKind::File, None) => {
                return Err(InitrdError::InvalidSource(path));
            }
            (EntryKind::Symlink, Some(target)) => {
                if target.is_empty() {
                    return Err(InitrdError::EmptyLinkTarget(path));
                }
                size = to_u32("symlink target size", target.len() as u64 + 1)?;
                Some(target.to_string())
            }
            (EntryKind::Symlink, None) => {
                return Err(InitrdError::EmptyLinkTarget(path));
            }
        };

        Ok(Directive {
            kind,
            path,
            operand,
            size,
            mode: attrs.mode.unwrap_or_else(|| kind.default_mode()),
            uid: attrs.uid.unwrap_or(DEFAULT_UID),
            gid: attrs.gid.unwrap_or(DEFAULT_GID),
            mtime: attrs.mtime.or(source_mtime).unwrap_or_else(unix_now),
        })
    }

    /// A regular file at `path`, with contents read from `source` at save time.
    pub fn file(source: &str, path: &str) -> Result<Self> {
        Self::new(EntryKind::File, path, Some(source), Attrs::default())
    }

    /// A directory at `path`.
    pub fn dir(path: &str) -> Result<Self> {
        Self::new(EntryKind::Dir, path, None, Attrs::default())
    }

    /// A symlink at `path` pointing at `target`.
    pub fn symlink(target: &str, path: &str) -> Result<Self> {
        Self::new(EntryKind::Symlink, path, Some(target), Attrs::default())
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// Synthetic directory injected for a missing intermediate path.
    /// Inherits the owning directive's metadata.
    pub(crate) fn synthetic_dir(path: &str, owner: &Directive) -> Directive {
        Directive {
            kind: EntryKind::Dir,
            path: path.to_string(),
            operand: None,
            size: 0,
            mode: owner.mode,
            uid: owner.uid,
            gid: owner.gid,
            mtime: owner.mtime,
        }
    }
}

/// Parse one textual directive.
pub fn parse_directive(s: &str) -> Result<Directive> {
    if !s.contains(':') {
        return Err(InitrdError::MissingColon(s.to_string()));
    }

    let (main, attrs) = match s.find("@(") {
        Some(pos) => {
            let attr_part = &s[pos + 2..];
            let inner = attr_part
                .strip_suffix(')')
                .ok_or_else(|| InitrdError::UnclosedAttributeList(s.to_string()))?;
            (&s[..pos], parse_attrs(inner)?)
        }
        None => (s, Attrs::default()),
    };

    if let Some(path) = main.strip_prefix(':') {
        return Directive::new(EntryKind::Dir, path, None, attrs);
    }

    if let Some(rest) = main.strip_prefix('l') {
        let colon = rest.find(':').ok_or_else(|| InitrdError::MissingColon(s.to_string()))?;
        return Directive::new(EntryKind::Symlink, &rest[colon + 1..], Some(&rest[..colon]), attrs);
    }

    let colon = main.find(':').ok_or_else(|| InitrdError::MissingColon(s.to_string()))?;
    Directive::new(EntryKind::File, &main[colon + 1..], Some(&main[..colon]), attrs)
}

/// Parse a directives file: one directive per line, blank lines and
/// `#` comment lines ignored.
pub fn parse_directive_lines(input: &str) -> Result<Vec<Directive>> {
    let mut out = Vec::new();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        out.push(parse_directive(line)?);
    }
    Ok(out)
}

fn parse_attrs(inner: &str) -> Result<Attrs> {
    let mut attrs = Attrs::default();
    for attr in inner.split(',') {
        let attr = attr.trim();
        let (key, value) = attr
            .split_once('=')
            .ok_or_else(|| InitrdError::InvalidAttribute(attr.to_string()))?;
        let (key, value) = (key.trim(), value.trim());

        match key {
            "mode" => {
                // Octal with a leading 0, decimal otherwise.
                let parsed = if value.starts_with('0') {
                    u16::from_str_radix(value, 8)
                } else {
                    value.parse::<u16>()
                };
                attrs.mode = Some(parsed.map_err(|_| {
                    InitrdError::InvalidAttribute(format!("invalid mode value: {value}"))
                })?);
            }
            "uid" => {
                attrs.uid = Some(value.parse().map_err(|_| {
                    InitrdError::InvalidAttribute(format!("invalid uid value: {value}"))
                })?);
            }
            "gid" => {
                attrs.gid = Some(value.parse().map_err(|_| {
                    InitrdError::InvalidAttribute(format!("invalid gid value: {value}"))
                })?);
            }
            "mtime" => {
                attrs.mtime = Some(value.parse().map_err(|_| {
                    InitrdError::InvalidAttribute(format!("invalid mtime value: {value}"))
                })?);
            }
            other => return Err(InitrdError::UnknownAttribute(other.to_string())),
        }
    }
    Ok(attrs)
}

/// Directory paths carry exactly one trailing slash; root stays `/`.
fn normalize_dir_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Every intermediate directory path of `path`, shallowest first, each
/// with a trailing slash. `/usr/bin/sh` yields `/usr/`, `/usr/bin/`.
pub(crate) fn intermediate_paths(path: &str) -> Vec<String> {
    let trimmed = path.trim_end_matches('/');
    let mut out = Vec::new();
    for (i, b) in trimmed.bytes().enumerate().skip(1) {
        if b == b'/' {
            out.push(format!("{}/", &trimmed[..i]));
        }
    }
    out
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{DEFAULT_DIR_MODE, DEFAULT_LINK_MODE};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_symlink_directive() {
        let d = parse_directive("l/bin/sh:/bin/bash").unwrap();
        assert_eq!(d.kind, EntryKind::Symlink);
        assert_eq!(d.operand.as_deref(), Some("/bin/sh"));
        assert_eq!(d.path, "/bin/bash");
        assert_eq!(d.size as usize, "/bin/sh".len() + 1);
        assert_eq!(d.mode, DEFAULT_LINK_MODE);
    }

    #[test]
    fn test_parse_dir_directive() {
        let d = parse_directive(":/var/log/").unwrap();
        assert_eq!(d.kind, EntryKind::Dir);
        assert_eq!(d.path, "/var/log/");
        assert_eq!(d.operand, None);
        assert_eq!(d.size, 0);
        assert_eq!(d.mode, DEFAULT_DIR_MODE);
    }

    #[test]
    fn test_parse_file_directive() {
        let mut src = NamedTempFile::new().unwrap();
        src.write_all(b"hi\n").unwrap();
        src.flush().unwrap();

        let spec = format!("{}:/etc/motd", src.path().display());
        let d = parse_directive(&spec).unwrap();
        assert_eq!(d.kind, EntryKind::File);
        assert_eq!(d.path, "/etc/motd");
        assert_eq!(d.size, 3);
    }

    #[test]
    fn test_parse_attribute_list() {
        let d = parse_directive(":/opt/@(mode=0750,uid=1000,gid=100,mtime=1700000000)").unwrap();
        assert_eq!(d.mode, 0o750);
        assert_eq!(d.uid, 1000);
        assert_eq!(d.gid, 100);
        assert_eq!(d.mtime, 1_700_000_000);
    }

    #[test]
    fn test_parse_decimal_mode() {
        let d = parse_directive(":/opt/@(mode=493)").unwrap();
        assert_eq!(d.mode, 493); // 0o755
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_directive("/no/colon/here"),
            Err(InitrdError::MissingColon(_))
        ));
        assert!(matches!(
            parse_directive(":relative/"),
            Err(InitrdError::PathNotAbsolute(_))
        ));
        assert!(matches!(
            parse_directive(":/opt/@(mode=0755"),
            Err(InitrdError::UnclosedAttributeList(_))
        ));
        assert!(matches!(
            parse_directive(":/opt/@(color=red)"),
            Err(InitrdError::UnknownAttribute(_))
        ));
        assert!(matches!(
            parse_directive(":/opt/@(mode=banana)"),
            Err(InitrdError::InvalidAttribute(_))
        ));
        assert!(matches!(
            parse_directive(":/opt/@(mode)"),
            Err(InitrdError::InvalidAttribute(_))
        ));
    }

    #[test]
    fn test_file_requires_existing_source() {
        assert!(matches!(
            Directive::file("/nonexistent/source/file", "/etc/motd"),
            Err(InitrdError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_symlink_requires_target() {
        assert!(matches!(
            Directive::symlink("", "/bin/sh"),
            Err(InitrdError::EmptyLinkTarget(_))
        ));
        assert!(matches!(
            parse_directive("l:/bin/sh"),
            Err(InitrdError::EmptyLinkTarget(_))
        ));
    }

    #[test]
    fn test_dir_path_normalization() {
        assert_eq!(Directive::dir("/usr/share").unwrap().path, "/usr/share/");
        assert_eq!(Directive::dir("/usr/share///").unwrap().path, "/usr/share/");
        assert_eq!(Directive::dir("/").unwrap().path, "/");
    }

    #[test]
    fn test_intermediate_paths() {
        assert_eq!(
            intermediate_paths("/usr/bin/sh"),
            vec!["/usr/".to_string(), "/usr/bin/".to_string()]
        );
        assert_eq!(intermediate_paths("/usr/bin/"), vec!["/usr/".to_string()]);
        assert_eq!(intermediate_paths("/etc/motd"), vec!["/etc/".to_string()]);
        assert!(intermediate_paths("/motd").is_empty());
        assert!(intermediate_paths("/").is_empty());
    }

    #[test]
    fn test_parse_directive_lines() {
        let input = "\
# image manifest
:/etc/

l/bin/sh:/bin/bash
";
        let directives = parse_directive_lines(input).unwrap();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].path, "/etc/");
        assert_eq!(directives[1].path, "/bin/bash");
    }
}
