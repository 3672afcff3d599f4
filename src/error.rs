use std::fmt;
use std::io;
use thiserror::Error;

/// Caller-visible outcome of a decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Session is usable and has not finished a stream yet.
    Ok,
    /// The stream ended cleanly and all output was flushed.
    StreamEnd,
    /// Input ran out early, or the host refused bytes on either side.
    BufferError,
    /// The compressed data is malformed.
    DataError,
    /// A table or window would not fit its fixed bound.
    MemoryError,
    /// The session or its parameters are unusable.
    StreamError,
}

/// Sub-code carried by the single Implode failure status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplodeCode {
    BadData,
    InsufficientData,
    Io,
}

impl fmt::Display for ExplodeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplodeCode::BadData => write!(f, "bad data"),
            ExplodeCode::InsufficientData => write!(f, "insufficient data"),
            ExplodeCode::Io => write!(f, "I/O failure"),
        }
    }
}

/// Which decode table hit its capacity bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    CodeLengths,
    LiteralLength,
    Distance,
    ImplodeLiteral,
    ImplodeLength,
    ImplodeDistance,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableKind::CodeLengths => "code length",
            TableKind::LiteralLength => "literal/length",
            TableKind::Distance => "distance",
            TableKind::ImplodeLiteral => "implode literal",
            TableKind::ImplodeLength => "implode length",
            TableKind::ImplodeDistance => "implode distance",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PkError {
    #[error("Data error: {0}")]
    Data(&'static str),

    #[error("Buffer error: compressed input ended early")]
    InputExhausted,

    #[error("Read error: {0}")]
    Read(#[source] io::Error),

    #[error("Write error: {0}")]
    Write(#[source] io::Error),

    #[error("Memory error: {table} table needs {needed} entries (capacity {capacity})")]
    Capacity {
        table: TableKind,
        needed: usize,
        capacity: usize,
    },

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Invalid parameter: {0}")]
    Parameter(String),

    #[error("Unsupported compression method: {0}")]
    UnsupportedMethod(u16),

    #[error("Implode decoding failed: {0}")]
    Explode(ExplodeCode),

    #[error("CRC-32 mismatch: expected {expected:08x}, got {actual:08x}")]
    Checksum { expected: u32, actual: u32 },
}

impl PkError {
    pub fn parameter<T: fmt::Display>(msg: T) -> Self {
        PkError::Parameter(msg.to_string())
    }

    pub fn memory<T: fmt::Display>(msg: T) -> Self {
        PkError::Memory(msg.to_string())
    }

    /// Map onto the status set a host sees.
    pub fn status(&self) -> Status {
        match self {
            PkError::Data(_) | PkError::Checksum { .. } => Status::DataError,
            PkError::InputExhausted | PkError::Read(_) | PkError::Write(_) => Status::BufferError,
            PkError::Capacity { .. } | PkError::Memory(_) => Status::MemoryError,
            PkError::Parameter(_) | PkError::UnsupportedMethod(_) => Status::StreamError,
            PkError::Explode(ExplodeCode::BadData) => Status::DataError,
            PkError::Explode(_) => Status::BufferError,
        }
    }

    /// True for errors caused by the compressed bytes themselves.
    pub fn is_corruption(&self) -> bool {
        self.status() == Status::DataError
    }
}

pub type PkResult<T> = Result<T, PkError>;
