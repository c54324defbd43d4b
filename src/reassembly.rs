//! Multi-sentence message reassembly
//!
//! Each message id (`0`-`9`) owns one [`MultiLineFragmentSet`]. Fragments must
//! arrive in order; anything else resets the slot and the partial message is
//! lost. This trades completeness for never stalling on a dropped sentence.

use crate::checksum::ChecksumValidator;
use crate::core::ByteString;
use crate::error::{DecodeError, Result};
use crate::limits::{MAX_CHARS_PER_MESSAGE, MAX_FRAGMENTS, MAX_PAYLOAD_CHARS, MESSAGE_ID_SLOTS};
use crate::sentence::Fragment;
use tracing::debug;

/// A complete logical AIS message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// All sentences of the message, newline separated
    pub sentences: ByteString<MAX_CHARS_PER_MESSAGE>,
    /// Armoured payload of all sentences, in fragment order
    pub payload: ByteString<MAX_PAYLOAD_CHARS>,
    /// Radio channel of the first sentence
    pub channel: Option<u8>,
    /// Fill bits of the last sentence
    pub fill_bits: u8,
}

impl Message {
    /// Fill from a single-sentence fragment
    pub fn assign_single(&mut self, fragment: &Fragment) -> Result<()> {
        self.sentences.assign(fragment.sentence.as_bytes())?;
        self.payload.assign(fragment.payload_bytes())?;
        self.channel = fragment.channel;
        self.fill_bits = fragment.fill_bits;
        Ok(())
    }

    /// Fill by concatenating `fragments` in order
    pub fn assign_fragments(&mut self, fragments: &[Fragment]) -> Result<()> {
        self.sentences.clear();
        self.payload.clear();
        for (i, frg) in fragments.iter().enumerate() {
            if i > 0 {
                self.sentences.push(b'\n')?;
            }
            self.sentences.push_slice(frg.sentence.as_bytes())?;
            self.payload.push_slice(frg.payload_bytes())?;
        }
        self.channel = fragments.first().and_then(|f| f.channel);
        self.fill_bits = fragments.last().map_or(0, |f| f.fill_bits);
        Ok(())
    }
}

/// Reassembly state of a single message id
#[derive(Debug, Clone, Default)]
pub struct MultiLineFragmentSet {
    fragments: [Fragment; MAX_FRAGMENTS],
    index: u8,
    count: u8,
}

impl MultiLineFragmentSet {
    /// Number of fragments accumulated so far
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Number of fragments the open message expects
    pub fn count(&self) -> u8 {
        self.count
    }

    /// Check if no message is being accumulated
    pub fn is_idle(&self) -> bool {
        self.index == 0
    }

    /// Drop any partial accumulation
    pub fn reset(&mut self) {
        self.index = 0;
        self.count = 0;
    }

    fn accepts(&self, fragment: &Fragment) -> bool {
        fragment.fragment_num == self.index + 1
            && (self.index == 0 || fragment.fragment_count == self.count)
    }

    fn store(&mut self, fragment: &Fragment) {
        if self.index == 0 {
            self.count = fragment.fragment_count;
        }
        self.fragments[self.index as usize].clone_from(fragment);
        self.index += 1;
    }

    fn is_complete(&self) -> bool {
        self.index > 0 && self.index == self.count
    }

    fn stored(&self) -> &[Fragment] {
        &self.fragments[..self.index as usize]
    }
}

/// What happened to a fragment handed to the [`Reassembler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// The output message was filled and is ready to emit
    Complete,
    /// The fragment was stored; more are needed
    Pending,
    /// The fragment failed its own checksum and was dropped
    ChecksumFailed,
    /// Fragments were thrown away because the sequence broke
    ///
    /// `dropped` counts the partial accumulation plus the incoming fragment if
    /// it could not start a fresh sequence.
    Discarded {
        /// Number of fragments lost
        dropped: u8,
    },
}

impl ReassemblyOutcome {
    /// Check if a message was produced
    pub fn is_complete(&self) -> bool {
        matches!(self, ReassemblyOutcome::Complete)
    }
}

/// Per-thread fragment reassembly table
///
/// The table is plain owned state. One instance belongs to one stage worker;
/// it is never shared between threads.
#[derive(Debug, Default)]
pub struct Reassembler {
    slots: [MultiLineFragmentSet; MESSAGE_ID_SLOTS],
}

impl Reassembler {
    /// Create a table with every slot idle
    pub fn new() -> Self {
        Self::default()
    }

    /// State of the slot for `message_id`
    pub fn slot(&self, message_id: u8) -> Option<&MultiLineFragmentSet> {
        self.slots.get(message_id as usize)
    }

    /// Number of slots currently accumulating a message
    pub fn open_slots(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_idle()).count()
    }

    /// Reset every slot
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(MultiLineFragmentSet::reset);
    }

    /// Validate `fragment` and feed it into the table
    ///
    /// On [`ReassemblyOutcome::Complete`] the full message has been written to
    /// `message`; for any other outcome `message` holds unspecified contents.
    pub fn process(&mut self, message: &mut Message, fragment: &Fragment) -> ReassemblyOutcome {
        if let Err(err) = ChecksumValidator::validate(fragment) {
            debug!(%err, "dropping fragment");
            return ReassemblyOutcome::ChecksumFailed;
        }

        if fragment.is_single() {
            return match message.assign_single(fragment) {
                Ok(()) => ReassemblyOutcome::Complete,
                Err(err) => {
                    debug!(%err, "single sentence does not fit a message");
                    ReassemblyOutcome::Discarded { dropped: 1 }
                }
            };
        }

        let Some(slot) = self.slots.get_mut(fragment.slot()) else {
            return ReassemblyOutcome::Discarded { dropped: 1 };
        };

        let mut dropped = 0;
        if !slot.accepts(fragment) {
            dropped = slot.index;
            if dropped > 0 {
                debug!(
                    message_id = fragment.slot(),
                    expected = slot.index + 1,
                    got = fragment.fragment_num,
                    dropped,
                    "fragment sequence broken, discarding partial message"
                );
            }
            slot.reset();
        }

        if !slot.accepts(fragment) {
            return ReassemblyOutcome::Discarded {
                dropped: dropped + 1,
            };
        }
        slot.store(fragment);

        if !slot.is_complete() {
            return if dropped > 0 {
                ReassemblyOutcome::Discarded { dropped }
            } else {
                ReassemblyOutcome::Pending
            };
        }

        let result = message.assign_fragments(slot.stored());
        let count = slot.index;
        slot.reset();
        match result {
            Ok(()) => ReassemblyOutcome::Complete,
            Err(err) => {
                debug!(%err, "reassembled message does not fit");
                ReassemblyOutcome::Discarded { dropped: count }
            }
        }
    }

    /// Like [`Reassembler::process`], reporting lost fragments as errors
    ///
    /// Returns `Ok(true)` once `message` is complete and `Ok(false)` while more
    /// fragments are needed.
    pub fn try_process(&mut self, message: &mut Message, fragment: &Fragment) -> Result<bool> {
        match self.process(message, fragment) {
            ReassemblyOutcome::Complete => Ok(true),
            ReassemblyOutcome::Pending => Ok(false),
            ReassemblyOutcome::ChecksumFailed => Err(DecodeError::ChecksumMismatch {
                expected: fragment.checksum,
                computed: ChecksumValidator::checksum_of(fragment),
            }),
            ReassemblyOutcome::Discarded { dropped } => Err(DecodeError::fragment_sequence(
                format!(
                    "{} fragment(s) of message id {} discarded at fragment {}/{}",
                    dropped,
                    fragment.slot(),
                    fragment.fragment_num,
                    fragment.fragment_count
                ),
            )),
        }
    }
}
