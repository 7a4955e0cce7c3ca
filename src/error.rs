use serde::{de, Deserialize, Serialize};
use std::fmt;
use std::io;

/// Distinguishable failure classes. Each maps to a stable status code which
/// doubles as the CLI exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    InvalidConfig,
    CorruptCheckpoint,
    DuplicateKey,
    Decode,
}

impl ErrorKind {
    pub fn code(&self) -> u8 {
        match self {
            ErrorKind::Io => 1,
            ErrorKind::InvalidConfig => 2,
            ErrorKind::CorruptCheckpoint => 3,
            ErrorKind::DuplicateKey => 4,
            ErrorKind::Decode => 5,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "io error",
            ErrorKind::InvalidConfig => "invalid config",
            ErrorKind::CorruptCheckpoint => "corrupt checkpoint",
            ErrorKind::DuplicateKey => "duplicate key",
            ErrorKind::Decode => "decode error",
        };
        f.write_str(name)
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

struct ErrorKindVisitor;

impl<'de> de::Visitor<'de> for ErrorKindVisitor {
    type Value = ErrorKind;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("ErrorKind")
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            1 => Ok(ErrorKind::Io),
            2 => Ok(ErrorKind::InvalidConfig),
            3 => Ok(ErrorKind::CorruptCheckpoint),
            4 => Ok(ErrorKind::DuplicateKey),
            5 => Ok(ErrorKind::Decode),
            value => Err(de::Error::custom(value.to_string())),
        }
    }
}

impl<'de> de::Deserialize<'de> for ErrorKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u8(ErrorKindVisitor)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, thiserror::Error)]
#[error("{kind}: {msg}")]
pub struct DedupError {
    pub msg: String,
    pub kind: ErrorKind,
}

pub type Result<T> = std::result::Result<T, DedupError>;

impl DedupError {
    pub fn io<T: fmt::Display>(msg: T) -> DedupError {
        DedupError {
            msg: msg.to_string(),
            kind: ErrorKind::Io,
        }
    }

    pub fn invalid_config<T: fmt::Display>(msg: T) -> DedupError {
        DedupError {
            msg: msg.to_string(),
            kind: ErrorKind::InvalidConfig,
        }
    }

    pub fn corrupt_checkpoint<T: fmt::Display>(msg: T) -> DedupError {
        DedupError {
            msg: msg.to_string(),
            kind: ErrorKind::CorruptCheckpoint,
        }
    }

    pub fn duplicate_key<T: fmt::Display>(key: T) -> DedupError {
        DedupError {
            msg: format!("key '{}' already present in index", key),
            kind: ErrorKind::DuplicateKey,
        }
    }

    pub fn decode<T: fmt::Display>(msg: T) -> DedupError {
        DedupError {
            msg: msg.to_string(),
            kind: ErrorKind::Decode,
        }
    }

    /// Per-record failures are skipped by the driver; everything else aborts.
    pub fn is_recoverable(&self) -> bool {
        self.kind == ErrorKind::Decode
    }
}

impl From<io::Error> for DedupError {
    fn from(err: io::Error) -> Self {
        DedupError::io(err)
    }
}
