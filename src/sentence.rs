//! NMEA `VDM`/`VDO` sentence framing
//!
//! Wire format (start delimiter already stripped by the caller):
//!
//! ```text
//! AIVDM,<count>,<num>,[<msg id>],[<channel>],<payload>,<fill bits>*<XX>
//! ```
//!
//! Parsing never copies the payload out of the sentence; the [`Fragment`]
//! owns one copy of the sentence bytes and records the payload as a span.

use crate::checksum::CHECKSUM_SUFFIX_LEN;
use crate::core::{ByteString, RawSpan};
use crate::error::{DecodeError, Result};
use crate::limits::{MAX_CHARS_PER_FRAGMENT, MAX_FILL_BITS, MAX_FRAGMENTS};

/// Which talker/sentence prefixes are accepted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TalkerMode {
    /// Only the literal `AIVDM`
    Strict,
    /// `AI` or `BS` talkers with `VDM` or `VDO` sentences
    #[default]
    Any,
}

impl TalkerMode {
    /// Check the five-byte talker and sentence prefix
    pub fn accepts(&self, prefix: &[u8]) -> bool {
        match self {
            TalkerMode::Strict => prefix == b"AIVDM",
            TalkerMode::Any => {
                prefix.len() == 5
                    && matches!(&prefix[2..5], b"VDM" | b"VDO")
                    && matches!(&prefix[..2], b"AI" | b"BS")
            }
        }
    }
}

impl std::fmt::Display for TalkerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TalkerMode::Strict => write!(f, "AIVDM only"),
            TalkerMode::Any => write!(f, "AI/BS VDM/VDO"),
        }
    }
}

/// One physical sentence, possibly part of a multi-sentence message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    /// The sentence without its start delimiter, through the checksum digits
    pub sentence: ByteString<MAX_CHARS_PER_FRAGMENT>,
    /// Location of the armoured payload within `sentence`
    pub payload: RawSpan,
    /// Total sentences in the message (1-9)
    pub fragment_count: u8,
    /// 1-based position of this sentence
    pub fragment_num: u8,
    /// Sequential message id tying fragments together (0-9)
    pub message_id: Option<u8>,
    /// Radio channel character, usually `A` or `B`
    pub channel: Option<u8>,
    /// Padding bits at the end of the payload (0-5)
    pub fill_bits: u8,
    /// Checksum transmitted with the sentence
    pub checksum: u8,
}

impl Fragment {
    /// The armoured payload characters
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.resolve(self.sentence.as_bytes()).unwrap_or(&[])
    }

    /// Check if the sentence forms a message on its own
    pub fn is_single(&self) -> bool {
        self.fragment_count == 1
    }

    /// Slot key for reassembly; sentences without an id share slot 0
    pub fn slot(&self) -> usize {
        self.message_id.unwrap_or(0) as usize
    }

    /// Channel as a character, if present
    pub fn channel_char(&self) -> Option<char> {
        self.channel.map(char::from)
    }

    fn reset(&mut self) {
        self.sentence.clear();
        self.payload = RawSpan::default();
        self.fragment_count = 0;
        self.fragment_num = 0;
        self.message_id = None;
        self.channel = None;
        self.fill_bits = 0;
        self.checksum = 0;
    }
}

/// Parses sentence headers into [`Fragment`] records
#[derive(Debug, Clone, Copy, Default)]
pub struct SentenceParser {
    mode: TalkerMode,
}

impl SentenceParser {
    /// Create a parser accepting the given prefixes
    pub fn new(mode: TalkerMode) -> Self {
        SentenceParser { mode }
    }

    /// The accepted prefixes
    pub fn mode(&self) -> TalkerMode {
        self.mode
    }

    /// Parse one sentence from the start of `input` into `fragment`
    ///
    /// `input` begins right after the `!`/`$` delimiter. Returns the number of
    /// bytes consumed, excluding the line terminator, or 0 if no sentence could
    /// be parsed; the caller then skips to the next line.
    pub fn parse_into(&self, fragment: &mut Fragment, input: &[u8]) -> usize {
        self.try_parse_into(fragment, input).unwrap_or(0)
    }

    /// Like [`SentenceParser::parse_into`], reporting why parsing failed
    ///
    /// The checksum must be followed by at least one byte (the line
    /// terminator), so a sentence cut off at the end of a read is reported as
    /// malformed and left for the next read.
    pub fn try_parse_into(&self, fragment: &mut Fragment, input: &[u8]) -> Result<usize> {
        fragment.reset();

        let prefix = input
            .get(..5)
            .ok_or_else(|| DecodeError::malformed("sentence shorter than its prefix"))?;
        if !self.mode.accepts(prefix) {
            return Err(DecodeError::malformed(format!(
                "unsupported prefix {:?}",
                String::from_utf8_lossy(prefix)
            )));
        }
        let mut pos = 5;
        expect(input, pos, b',')?;
        pos += 1;

        let count = digit(input, pos)?;
        if count == 0 || count as usize > MAX_FRAGMENTS {
            return Err(DecodeError::malformed(format!("fragment count {}", count)));
        }
        expect(input, pos + 1, b',')?;
        pos += 2;

        let num = digit(input, pos)?;
        if num == 0 || num > count {
            return Err(DecodeError::malformed(format!(
                "fragment {} of {}",
                num, count
            )));
        }
        expect(input, pos + 1, b',')?;
        pos += 2;

        let message_id = if byte_at(input, pos)? == b',' {
            pos += 1;
            None
        } else {
            let id = digit(input, pos)?;
            expect(input, pos + 1, b',')?;
            pos += 2;
            Some(id)
        };

        let channel = if byte_at(input, pos)? == b',' {
            pos += 1;
            None
        } else {
            let ch = byte_at(input, pos)?;
            expect(input, pos + 1, b',')?;
            pos += 2;
            Some(ch)
        };

        let payload_start = pos;
        let payload_len = input[pos..]
            .iter()
            .position(|&b| matches!(b, b',' | b'*' | b'\r' | b'\n'))
            .filter(|&n| input[pos + n] == b',')
            .ok_or_else(|| DecodeError::malformed("no delimiter after payload"))?;
        pos += payload_len + 1;

        let fill_bits = digit(input, pos)?;
        if fill_bits > MAX_FILL_BITS {
            return Err(DecodeError::malformed(format!("{} fill bits", fill_bits)));
        }
        pos += 1;

        expect(input, pos, b'*')?;
        let checksum = hex_byte(input, pos + 1)?;
        pos += CHECKSUM_SUFFIX_LEN;
        if pos >= input.len() {
            return Err(DecodeError::malformed("sentence not terminated"));
        }

        fragment.sentence.assign(&input[..pos]).map_err(|_| {
            DecodeError::malformed(format!(
                "sentence of {} bytes exceeds {}",
                pos, MAX_CHARS_PER_FRAGMENT
            ))
        })?;
        fragment.payload = RawSpan::new(payload_start, payload_len);
        fragment.fragment_count = count;
        fragment.fragment_num = num;
        fragment.message_id = message_id;
        fragment.channel = channel;
        fragment.fill_bits = fill_bits;
        fragment.checksum = checksum;

        Ok(pos)
    }
}

fn byte_at(input: &[u8], pos: usize) -> Result<u8> {
    input
        .get(pos)
        .copied()
        .ok_or_else(|| DecodeError::malformed("sentence truncated"))
}

fn expect(input: &[u8], pos: usize, want: u8) -> Result<()> {
    let got = byte_at(input, pos)?;
    if got != want {
        return Err(DecodeError::malformed(format!(
            "expected '{}' at {}, found '{}'",
            want as char, pos, got as char
        )));
    }
    Ok(())
}

fn digit(input: &[u8], pos: usize) -> Result<u8> {
    let b = byte_at(input, pos)?;
    if !b.is_ascii_digit() {
        return Err(DecodeError::malformed(format!(
            "expected digit at {}, found '{}'",
            pos, b as char
        )));
    }
    Ok(b - b'0')
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

fn hex_byte(input: &[u8], pos: usize) -> Result<u8> {
    let hi = hex_nibble(byte_at(input, pos)?);
    let lo = hex_nibble(byte_at(input, pos + 1)?);
    match (hi, lo) {
        (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
        _ => Err(DecodeError::malformed("checksum is not hexadecimal")),
    }
}
