//! Decode counters shared by the pipeline stages

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters, updated with relaxed atomics from any stage thread
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct DecodeStats {
    bytes_consumed: AtomicU64,
    sentences: AtomicU64,
    malformed: AtomicU64,
    checksum_failures: AtomicU64,
    fragments_discarded: AtomicU64,
    messages: AtomicU64,
    payloads: AtomicU64,
    empty_payloads: AtomicU64,
}

impl DecodeStats {
    /// All counters at zero
    pub const fn new() -> Self {
        DecodeStats {
            bytes_consumed: AtomicU64::new(0),
            sentences: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            fragments_discarded: AtomicU64::new(0),
            messages: AtomicU64::new(0),
            payloads: AtomicU64::new(0),
            empty_payloads: AtomicU64::new(0),
        }
    }

    /// Add `n` input bytes consumed by ingestion
    pub fn record_bytes(&self, n: usize) {
        self.bytes_consumed.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Count a sentence that parsed
    pub fn record_sentence(&self) {
        self.sentences.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a line skipped as malformed
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a sentence rejected by its checksum
    pub fn record_checksum_failure(&self) {
        self.checksum_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count fragments lost to a broken sequence
    pub fn record_discarded(&self, fragments: u8) {
        self.fragments_discarded
            .fetch_add(fragments as u64, Ordering::Relaxed);
    }

    /// Count a fully reassembled message
    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a de-armoured payload
    pub fn record_payload(&self) {
        self.payloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a message that de-armoured to no bits
    pub fn record_empty_payload(&self) {
        self.empty_payloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters
    ///
    /// Counters are read one at a time, so a snapshot taken while stages run
    /// may mix values from slightly different instants.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            sentences: self.sentences.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            fragments_discarded: self.fragments_discarded.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            payloads: self.payloads.load(Ordering::Relaxed),
            empty_payloads: self.empty_payloads.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DecodeStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsSnapshot {
    /// Input bytes fully consumed by ingestion
    pub bytes_consumed: u64,
    /// Sentences framed successfully
    pub sentences: u64,
    /// Lines skipped as malformed
    pub malformed: u64,
    /// Fragments dropped for a bad checksum
    pub checksum_failures: u64,
    /// Fragments lost to out-of-order or missing sentences
    pub fragments_discarded: u64,
    /// Complete messages produced by reassembly
    pub messages: u64,
    /// Payloads produced by de-armouring
    pub payloads: u64,
    /// Messages whose payload decoded to nothing
    pub empty_payloads: u64,
}

impl StatsSnapshot {
    /// Sentences that never became part of a message
    pub fn dropped_sentences(&self) -> u64 {
        self.checksum_failures + self.fragments_discarded
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} bytes, {} sentences ({} malformed, {} bad checksum, {} discarded), \
             {} messages, {} payloads ({} empty)",
            self.bytes_consumed,
            self.sentences,
            self.malformed,
            self.checksum_failures,
            self.fragments_discarded,
            self.messages,
            self.payloads,
            self.empty_payloads
        )
    }
}
