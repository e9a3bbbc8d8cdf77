use std::io;

/// Everything that can go wrong while turning a sample file into a point cloud.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("Not a .npy file: bad magic string")]
    BadMagic,

    #[error("Unsupported .npy format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("Invalid .npy header: {0}")]
    InvalidHeader(String),

    /// The array is a plain numeric array, not a pickled record.
    #[error("Expected an object array, found descr '{descr}'")]
    NotObjectArray { descr: String },

    #[error("Unexpected end of data at offset {offset}")]
    Truncated { offset: usize },

    #[error("Unknown pickle opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    /// Only the globals needed to rebuild arrays and dtypes are resolvable.
    #[error("Refusing to resolve global '{module}.{name}'")]
    UnsupportedGlobal { module: String, name: String },

    #[error("Invalid pickle stream: {0}")]
    InvalidPickle(String),

    #[error("Unsupported dtype '{0}'")]
    UnsupportedDtype(String),

    #[error("Expected a single record, found an array of {len} elements")]
    NotASingleRecord { len: usize },

    #[error("Sample record is not a mapping")]
    NotAMapping,

    #[error("Sample record has no '{0}' field")]
    MissingField(&'static str),

    #[error("Field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Field '{field}' row {row} has {found} components, expected {expected}")]
    Arity {
        field: &'static str,
        row: usize,
        expected: &'static str,
        found: usize,
    },

    #[error("Required column '{0}' is missing in the table header")]
    MissingColumn(&'static str),

    #[error("Failed to parse '{field}' on line {line}: {value}")]
    InvalidNumber {
        field: &'static str,
        line: u64,
        value: String,
    },
}
