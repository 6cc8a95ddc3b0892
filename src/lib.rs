//! Initrd Image Format
//!
//! Builds and inspects initrd images: flat, read-only archives bundling a
//! directory tree (files, directories, symlinks) for early-boot
//! consumption by a kernel.
//!
//! ## Image layout
//!
//! ```text
//! +--------------+ 0x00
//! |    Header    |   32 bytes (v1) / 48 bytes (v2)
//! +--------------+
//! |   Metadata   |   fixed entry records + null-terminated paths
//! +--------------+ data_offset (4KB aligned)
//! |     Data     |   page-aligned file contents and link targets
//! +--------------+ total_size
//! ```
//!
//! There is no internal hierarchy: a single flat list of paths, ordered
//! by increasing depth so parents appear before their children, with
//! directories first, then files, then symlinks at each level. Data
//! blobs are deduplicated by source path and padded to 4KB pages.
//!
//! The v2 format adds per-entry Unix metadata (mode/uid/gid/mtime) and
//! CRC32 checksums, per payload and over the whole data section.
//!
//! ## Modules
//!
//! - [`directive`] - build requests and the textual directive grammar
//! - [`layout`] - entry ordering and data-section offset assignment
//! - [`v1`] / [`v2`] - the two binary codecs
//! - [`image`] - version-sniffing facade over both codecs
//! - [`error`] - error types for image operations
//!
//! ## Example
//!
//! ```rust,no_run
//! use initrd_rs::{Directive, Image, Version};
//!
//! let directives = vec![
//!     Directive::file("build/init", "/sbin/init")?,
//!     Directive::symlink("/sbin/init", "/init")?,
//!     Directive::dir("/dev")?,
//! ];
//! let image = Image::build("boot/initrd.img".as_ref(), Version::V2, &directives)?;
//! assert!(image.find_entry("/sbin/init").is_some());
//! # Ok::<(), initrd_rs::InitrdError>(())
//! ```

pub mod directive;
pub mod error;
pub mod format;
pub mod image;
pub mod layout;
pub mod v1;
pub mod v2;

mod io;

// Re-export commonly used types
pub use directive::{parse_directive, parse_directive_lines, Attrs, Directive};
pub use error::{InitrdError, Result};
pub use format::{align_up, EntryKind, PAGE_SIZE, V1_SIGNATURE, V2_SIGNATURE};
pub use image::{Entry, Extracted, Image, Version};
pub use v1::V1Image;
pub use v2::V2Image;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
