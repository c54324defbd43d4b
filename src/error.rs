//! Error types for AIS sentence decoding

use thiserror::Error;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Errors raised while framing, validating, reassembling or unpacking AIS data
///
/// The hot-path stage functions do not surface most of these: a malformed line
/// is skipped, a bad checksum drops the fragment and a broken fragment sequence
/// resets reassembly. They are returned from the `try_*` entry points and
/// escalated only for conditions the caller must act on (closed queues, an
/// exhausted pool, a bad configuration).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Sentence could not be framed or a header field was invalid
    #[error("Malformed sentence: {0}")]
    MalformedSentence(String),

    /// NMEA XOR checksum did not match the transmitted value
    #[error("Checksum mismatch: expected {expected:#04X}, computed {computed:#04X}")]
    ChecksumMismatch {
        /// Checksum carried by the sentence
        expected: u8,
        /// Checksum computed over the sentence body
        computed: u8,
    },

    /// Fragment arrived out of order or did not belong to the open set
    #[error("Fragment sequence violation: {0}")]
    FragmentSequence(String),

    /// De-armouring produced no payload bits
    #[error("Empty payload")]
    EmptyPayload,

    /// A bit read reached past the end of the payload
    #[error("Read of {requested} bits at offset {offset} exceeds {available} available bits")]
    OutOfBounds {
        /// Bit offset the read started at
        offset: usize,
        /// Number of bits requested
        requested: usize,
        /// Number of valid payload bits
        available: usize,
    },

    /// Payload carries a different message type than the decoder expects
    #[error("Unexpected message type {0}")]
    UnexpectedType(u8),

    /// A length or width argument was outside the supported range
    #[error("Invalid length: {0}")]
    InvalidLength(String),

    /// The queue was closed by its producer side
    #[error("Queue closed")]
    QueueClosed,

    /// The buffer pool reached its allocation limit
    #[error("Buffer pool exhausted: {0} buffers in use")]
    PoolExhausted(usize),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input source failed
    #[error("I/O error: {0}")]
    Io(String),

    /// A stage worker thread panicked
    #[error("Pipeline worker failed: {0}")]
    Worker(String),
}

impl DecodeError {
    /// Create a new MalformedSentence error
    pub fn malformed(msg: impl Into<String>) -> Self {
        DecodeError::MalformedSentence(msg.into())
    }

    /// Create a new FragmentSequence error
    pub fn fragment_sequence(msg: impl Into<String>) -> Self {
        DecodeError::FragmentSequence(msg.into())
    }

    /// Create a new InvalidLength error
    pub fn invalid_length(msg: impl Into<String>) -> Self {
        DecodeError::InvalidLength(msg.into())
    }

    /// Create a new InvalidConfig error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        DecodeError::InvalidConfig(msg.into())
    }

    /// Create a new OutOfBounds error
    pub fn out_of_bounds(offset: usize, requested: usize, available: usize) -> Self {
        DecodeError::OutOfBounds {
            offset,
            requested,
            available,
        }
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        DecodeError::Io(err.to_string())
    }
}
