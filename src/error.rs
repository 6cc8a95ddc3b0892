use thiserror::Error;

#[derive(Error, Debug)]
pub enum InitrdError {
    #[error("bad signature: expected {expected}, found {found:?}")]
    BadSignature {
        expected: &'static str,
        found: [u8; 6],
    },

    #[error("unknown image format: signature {0:?}")]
    UnknownFormat([u8; 6]),

    #[error("truncated image: {0}")]
    Truncated(&'static str),

    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("source is not a regular file: {0}")]
    InvalidSource(String),

    #[error("path is not absolute: {0}")]
    PathNotAbsolute(String),

    #[error("directive has no ':' separator: {0}")]
    MissingColon(String),

    #[error("attribute list is missing its closing ')': {0}")]
    UnclosedAttributeList(String),

    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("duplicate destination path: {0}")]
    DuplicatePath(String),

    #[error("symlink target is empty: {0}")]
    EmptyLinkTarget(String),

    #[error("path contains non-ASCII bytes: {0}")]
    NonAsciiPath(String),

    #[error("invalid entry type byte: {0:#04x}")]
    InvalidEntryType(u8),

    #[error("{field} exceeds the format limit: {value}")]
    FieldOverflow { field: &'static str, value: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, InitrdError>;
