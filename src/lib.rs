//! # AIS NMEA Decode Pipeline
//!
//! A Rust library for decoding AIS (Automatic Identification System) traffic
//! carried in NMEA 0183 `!AIVDM`/`!AIVDO` sentences into bit-packed payloads.
//!
//! Decoding runs as independent stages joined by bounded, backpressured
//! queues of fixed-capacity batches:
//!
//! - Sentence framing and header parsing without copying the payload
//! - NMEA XOR checksum validation
//! - Multi-sentence message reassembly
//! - 6-bit ASCII armour decoding into a dense bitstream
//! - Bounds-checked typed field extraction with [`BitCursor`]
//!
//! Batches are recycled through a [`BufferPool`], so steady-state decoding
//! does not allocate per message.
//!
//! ## Features
//!
//! - `serde`: Enable serialization/deserialization of configuration, counters
//!   and decoded reports
//!
//! ## Example
//!
//! ```
//! use ais_pipeline::{
//!     Fragment, Message, PackedPayload, PayloadDeArmourer, Reassembler, ReassemblyOutcome,
//!     SentenceParser,
//! };
//!
//! let line = b"AIVDM,1,1,,B,15M67FC000G?ufbE`FepT@3n00Sa,0*5C\r\n";
//! let mut fragment = Fragment::default();
//! assert!(SentenceParser::default().parse_into(&mut fragment, line) > 0);
//!
//! let mut message = Message::default();
//! let outcome = Reassembler::new().process(&mut message, &fragment);
//! assert_eq!(outcome, ReassemblyOutcome::Complete);
//!
//! let mut payload = PackedPayload::new();
//! assert_eq!(PayloadDeArmourer::dearmour_message(&message, &mut payload), 168);
//!
//! let mut cursor = payload.cursor();
//! assert_eq!(cursor.read_unsigned(6)?, 1); // message type
//! cursor.skip(2);
//! assert_eq!(cursor.read_unsigned(30)?, 366053209); // MMSI
//! # Ok::<(), ais_pipeline::DecodeError>(())
//! ```

pub mod armour;
pub mod batch;
pub mod bits;
pub mod checksum;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod reassembly;
pub mod report;
pub mod sentence;
pub mod stats;

pub use armour::{PackedPayload, PayloadDeArmourer};
pub use batch::Chunk;
pub use bits::BitCursor;
pub use checksum::ChecksumValidator;
pub use crate::core::{ByteString, RawSpan};
pub use error::{DecodeError, Result};
pub use pipeline::{
    dearmour_batch, ingest_bytes, reassemble_and_validate, Pipeline, PipelineConfig,
    PipelineConfigBuilder,
};
pub use pool::{BufferPool, Pooled, Recycle};
pub use queue::{spsc, BatchSink, BatchSource, BlockingQueue, PopError, PushError};
pub use reassembly::{Message, MultiLineFragmentSet, Reassembler, ReassemblyOutcome};
pub use report::{decode_report, PositionReport, RadioStatus, Report, StaticVoyageData};
pub use sentence::{Fragment, SentenceParser, TalkerMode};
pub use stats::{DecodeStats, StatsSnapshot};

/// Size limits of the fixed-capacity records
pub mod limits {
    /// Longest sentence a fragment stores, start delimiter excluded
    pub const MAX_CHARS_PER_FRAGMENT: usize = 82;

    /// Most sentences in one message (the count field is one digit)
    pub const MAX_FRAGMENTS: usize = 9;

    /// Largest fill-bit count
    pub const MAX_FILL_BITS: u8 = 5;

    /// Longest armoured payload of a reassembled message
    pub const MAX_PAYLOAD_CHARS: usize = MAX_FRAGMENTS * MAX_CHARS_PER_FRAGMENT;

    /// Room for every sentence of a message plus newline separators
    pub const MAX_CHARS_PER_MESSAGE: usize = MAX_FRAGMENTS * (MAX_CHARS_PER_FRAGMENT + 1);

    /// Packed size of the longest payload
    pub const MAX_PAYLOAD_BYTES: usize = MAX_PAYLOAD_CHARS * 6 / 8 + 1;

    /// Reassembly slots, one per single-digit message id
    pub const MESSAGE_ID_SLOTS: usize = 10;

    /// Records per batch
    pub const BATCH_SIZE: usize = 512;

    /// Batches per inter-stage queue
    pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
}
