//! ASCII armour decoding into a packed bitstream
//!
//! Every armoured character carries six bits. Characters `0`..`W` map to
//! 0..39 and `` ` ``..`w` map to 40..63; every other byte decodes to 0.
//! The bits are packed most-significant first into [`PackedPayload`].

use crate::bits::BitCursor;
use crate::error::{DecodeError, Result};
use crate::limits::{MAX_FILL_BITS, MAX_PAYLOAD_BYTES, MAX_PAYLOAD_CHARS};
use crate::reassembly::Message;

const fn build_armour_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut c = b'0' as usize;
    while c <= b'W' as usize {
        table[c] = (c - b'0' as usize) as u8;
        c += 1;
    }
    c = b'`' as usize;
    while c <= b'w' as usize {
        table[c] = (c - b'0' as usize - 8) as u8;
        c += 1;
    }
    table
}

/// Armour character to 6-bit value
pub static ARMOUR_TABLE: [u8; 256] = build_armour_table();

/// Encode a 6-bit value as its armour character
pub fn armour_char(value: u8) -> u8 {
    let value = value & 0x3F;
    if value < 40 {
        b'0' + value
    } else {
        b'0' + value + 8
    }
}

/// A de-armoured message payload
///
/// The payload bytes hold `bits_used` valid bits; trailing fill bits and any
/// bytes past them are zero padding and never part of a field.
#[derive(Clone, PartialEq, Eq)]
pub struct PackedPayload {
    bytes: [u8; MAX_PAYLOAD_BYTES],
    len: usize,
    bits_used: usize,
    /// Radio channel of the originating message
    pub channel: Option<u8>,
}

impl PackedPayload {
    /// Create an empty payload
    pub fn new() -> Self {
        PackedPayload {
            bytes: [0; MAX_PAYLOAD_BYTES],
            len: 0,
            bits_used: 0,
            channel: None,
        }
    }

    /// Packed bytes, including the zero padding of the final byte
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Number of valid bits
    pub fn bits_used(&self) -> usize {
        self.bits_used
    }

    /// Check if the payload carries no bits
    pub fn is_empty(&self) -> bool {
        self.bits_used == 0
    }

    /// Start a field cursor at bit 0
    pub fn cursor(&self) -> BitCursor<'_> {
        BitCursor::new(self)
    }

    /// The AIS message type in the first six bits
    pub fn message_type(&self) -> Result<u8> {
        self.cursor().read_unsigned(6).map(|t| t as u8)
    }

    fn clear(&mut self) {
        self.len = 0;
        self.bits_used = 0;
        self.channel = None;
    }
}

impl Default for PackedPayload {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PackedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedPayload")
            .field("bits_used", &self.bits_used)
            .field("channel", &self.channel.map(char::from))
            .field("bytes", &self.as_bytes())
            .finish()
    }
}

/// 64-bit accumulator flushing big-endian words into the output
struct BitPacker<'a> {
    out: &'a mut [u8],
    pos: usize,
    acc: u64,
    acc_bits: u32,
}

impl<'a> BitPacker<'a> {
    fn new(out: &'a mut [u8]) -> Self {
        BitPacker {
            out,
            pos: 0,
            acc: 0,
            acc_bits: 0,
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let dst = self
            .out
            .get_mut(self.pos..self.pos + bytes.len())
            .ok_or_else(|| DecodeError::invalid_length("payload exceeds packed capacity"))?;
        dst.copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Append the low `width` bits of `value`
    fn push(&mut self, value: u64, width: u32) -> Result<()> {
        let room = 64 - self.acc_bits;
        if width < room {
            self.acc |= value << (room - width);
            self.acc_bits += width;
            return Ok(());
        }

        let overflow = width - room;
        self.acc |= value >> overflow;
        let word = self.acc.to_be_bytes();
        self.write(&word)?;
        self.acc = if overflow == 0 {
            0
        } else {
            value << (64 - overflow)
        };
        self.acc_bits = overflow;
        Ok(())
    }

    /// Flush the partial word, zero padded to a byte boundary
    fn finish(mut self) -> Result<usize> {
        let tail = self.acc_bits.div_ceil(8) as usize;
        let word = self.acc.to_be_bytes();
        self.write(&word[..tail])?;
        Ok(self.pos)
    }
}

/// Decodes armoured payload text into [`PackedPayload`] records
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadDeArmourer;

impl PayloadDeArmourer {
    /// De-armour `armoured` into `out`, returning the number of valid bits
    ///
    /// Returns 0 when nothing could be decoded; the caller must then drop the
    /// record rather than emit an empty payload.
    pub fn dearmour(armoured: &[u8], fill_bits: u8, out: &mut PackedPayload) -> usize {
        Self::try_dearmour(armoured, fill_bits, out).unwrap_or(0)
    }

    /// De-armour a reassembled message
    pub fn dearmour_message(message: &Message, out: &mut PackedPayload) -> usize {
        let bits = Self::dearmour(message.payload.as_bytes(), message.fill_bits, out);
        out.channel = message.channel;
        bits
    }

    /// Like [`PayloadDeArmourer::dearmour`], reporting why decoding failed
    pub fn try_dearmour(armoured: &[u8], fill_bits: u8, out: &mut PackedPayload) -> Result<usize> {
        out.clear();

        if armoured.len() > MAX_PAYLOAD_CHARS {
            return Err(DecodeError::invalid_length(format!(
                "{} armoured characters exceed {}",
                armoured.len(),
                MAX_PAYLOAD_CHARS
            )));
        }
        if fill_bits > MAX_FILL_BITS {
            return Err(DecodeError::invalid_length(format!("{} fill bits", fill_bits)));
        }

        let total_bits = armoured.len() * 6;
        if total_bits <= fill_bits as usize {
            return Err(DecodeError::EmptyPayload);
        }

        let mut packer = BitPacker::new(&mut out.bytes);
        let quads = armoured.chunks_exact(4);
        let rest = quads.remainder();
        for q in quads {
            let value = ((ARMOUR_TABLE[q[0] as usize] as u64) << 18)
                | ((ARMOUR_TABLE[q[1] as usize] as u64) << 12)
                | ((ARMOUR_TABLE[q[2] as usize] as u64) << 6)
                | (ARMOUR_TABLE[q[3] as usize] as u64);
            packer.push(value, 24)?;
        }
        for &c in rest {
            packer.push(ARMOUR_TABLE[c as usize] as u64, 6)?;
        }
        out.len = packer.finish()?;
        out.bits_used = total_bits - fill_bits as usize;
        Ok(out.bits_used)
    }
}
