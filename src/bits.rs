//! Typed field extraction from a packed payload
//!
//! A [`BitCursor`] walks a [`PackedPayload`] most-significant bit first. Every
//! read advances the cursor by exactly the requested width, whether or not it
//! succeeds, so the fields after a failed read stay aligned. Reads that reach
//! past `bits_used` fail with [`DecodeError::OutOfBounds`].

use crate::armour::PackedPayload;
use crate::error::{DecodeError, Result};

/// The AIS 6-bit text alphabet
pub const SIXBIT_ALPHABET: &[u8; 64] =
    b"@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_ !\"#$%&'()*+,-./0123456789:;<=>?";

/// Widest integer field a single read can return
pub const MAX_FIELD_BITS: usize = 32;

/// Sequential reader over the valid bits of a payload
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    bytes: &'a [u8],
    bits_used: usize,
    offset: usize,
}

impl<'a> BitCursor<'a> {
    /// Start reading `payload` at bit 0
    pub fn new(payload: &'a PackedPayload) -> Self {
        Self::at(payload, 0)
    }

    /// Start reading `payload` at `offset`
    pub fn at(payload: &'a PackedPayload, offset: usize) -> Self {
        BitCursor {
            bytes: payload.as_bytes(),
            bits_used: payload.bits_used(),
            offset,
        }
    }

    /// Current bit offset
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move to an absolute bit offset
    pub fn seek(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// Skip `bits` without reading them
    pub fn skip(&mut self, bits: usize) {
        self.offset = self.offset.saturating_add(bits);
    }

    /// Valid bits left after the cursor
    pub fn remaining(&self) -> usize {
        self.bits_used.saturating_sub(self.offset)
    }

    fn claim(&mut self, bits: usize) -> Result<usize> {
        let start = self.offset;
        self.skip(bits);
        match start.checked_add(bits) {
            Some(end) if end <= self.bits_used => Ok(start),
            _ => Err(DecodeError::out_of_bounds(start, bits, self.bits_used)),
        }
    }

    /// Big-endian window holding the bits at `start`, left-aligned at bit 47
    ///
    /// Two bytes cover any field up to 9 bits at any sub-byte offset, six
    /// bytes cover 32 bits. Bytes past the payload read as zero.
    fn window(&self, start: usize, bits: usize) -> u64 {
        let first = start >> 3;
        let span = if bits > 9 { 6 } else { 2 };
        let mut window = 0u64;
        for i in 0..span {
            let byte = self.bytes.get(first + i).copied().unwrap_or(0) as u64;
            window |= byte << (40 - 8 * i);
        }
        window << (16 + (start & 7))
    }

    fn check_width(bits: usize) -> Result<()> {
        if bits == 0 || bits > MAX_FIELD_BITS {
            return Err(DecodeError::invalid_length(format!(
                "field width {} outside 1..={}",
                bits, MAX_FIELD_BITS
            )));
        }
        Ok(())
    }

    /// Read `bits` (1-32) as an unsigned big-endian integer
    pub fn read_unsigned(&mut self, bits: usize) -> Result<u32> {
        if let Err(err) = Self::check_width(bits) {
            self.skip(bits);
            return Err(err);
        }
        let start = self.claim(bits)?;
        Ok((self.window(start, bits) >> (64 - bits)) as u32)
    }

    /// Read `bits` (1-32) as a two's complement integer
    pub fn read_signed(&mut self, bits: usize) -> Result<i32> {
        if let Err(err) = Self::check_width(bits) {
            self.skip(bits);
            return Err(err);
        }
        let start = self.claim(bits)?;
        Ok(((self.window(start, bits) as i64) >> (64 - bits)) as i32)
    }

    /// Read a single bit
    pub fn read_bool(&mut self) -> Result<bool> {
        self.read_unsigned(1).map(|b| b != 0)
    }

    /// Read a 6-bit text field of `max_bits` bits
    ///
    /// Decoding stops at the first `@` padding character and trailing
    /// whitespace is removed. The cursor always ends up `max_bits` past where
    /// it started.
    pub fn read_string(&mut self, max_bits: usize) -> Result<String> {
        let start = self.claim(max_bits)?;
        let mut text = String::with_capacity(max_bits / 6);
        for i in 0..max_bits / 6 {
            let pos = start + i * 6;
            let value = (self.window(pos, 6) >> 58) as usize;
            if value == 0 {
                break;
            }
            text.push(SIXBIT_ALPHABET[value] as char);
        }
        let trimmed = text.trim_end_matches(|c: char| c.is_ascii_whitespace()).len();
        text.truncate(trimmed);
        Ok(text)
    }
}
