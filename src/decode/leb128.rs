// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! LEB128 decoding.

use super::{Boundary, Error as DecodeError};

// A LEB128-encodable integral type.
pub(super) trait Leb128: Sized {
    const MAX_BITS: u32;

    fn read<F, E>(read_byte: F) -> Result<Self, E>
    where
        F: FnMut() -> Result<u8, E>,
        E: Error;
}

impl Leb128 for u32 {
    const MAX_BITS: u32 = 32;

    fn read<F, E>(read_byte: F) -> Result<Self, E>
    where
        F: FnMut() -> Result<u8, E>,
        E: Error,
    {
        read_unsigned(Self::MAX_BITS, read_byte).map(|value| value as u32)
    }
}

impl Leb128 for i32 {
    const MAX_BITS: u32 = 32;

    fn read<F, E>(read_byte: F) -> Result<Self, E>
    where
        F: FnMut() -> Result<u8, E>,
        E: Error,
    {
        read_signed(Self::MAX_BITS, read_byte).map(|value| value as i32)
    }
}

impl Leb128 for i64 {
    const MAX_BITS: u32 = 64;

    fn read<F, E>(read_byte: F) -> Result<Self, E>
    where
        F: FnMut() -> Result<u8, E>,
        E: Error,
    {
        read_signed(Self::MAX_BITS, read_byte)
    }
}

// Error trait for LEB128 parsing failures.
pub(super) trait Error {
    fn overflow() -> Self;
}

const CONTENT_MASK: u8 = 0x7f;
const LAST_CHUNK_MASK: u8 = 0x80;
const SIGN_EXTEND_MASK: u8 = 0x40;

// Read an unsigned LEB128-encoded value of at most `max_bits` bits using the
// provided byte source function.
//
// The encoding may not be longer than ceil(max_bits / 7) bytes, and the unused
// bits of the final byte must be zero. Non-minimal encodings are otherwise
// accepted.
pub(super) fn read_unsigned<F, E>(max_bits: u32, mut read_byte: F) -> Result<u64, E>
where
    F: FnMut() -> Result<u8, E>,
    E: Error,
{
    if !(1..=64).contains(&max_bits) {
        return Err(E::overflow());
    }

    let mut result = 0u64;
    let mut shift = 0;
    loop {
        if shift >= max_bits {
            return Err(E::overflow());
        }

        let byte = read_byte()?;
        let content = byte & CONTENT_MASK;

        // Validate that the final byte doesn't overflow the remaining bits.
        let remaining_bits = max_bits - shift;
        if remaining_bits < 7 && content >= (1u8 << remaining_bits) {
            return Err(E::overflow());
        }

        result |= u64::from(content) << shift;
        shift += 7;

        if byte & LAST_CHUNK_MASK == 0 {
            return Ok(result);
        }
    }
}

// Read a signed LEB128-encoded value of at most `max_bits` bits, sign-extended
// to 64 bits.
//
// As with read_unsigned(), but the unused bits of the final byte must be
// consistent with the sign bit.
pub(super) fn read_signed<F, E>(max_bits: u32, mut read_byte: F) -> Result<i64, E>
where
    F: FnMut() -> Result<u8, E>,
    E: Error,
{
    if !(1..=64).contains(&max_bits) {
        return Err(E::overflow());
    }

    let mut result = 0i64;
    let mut shift = 0;
    let mut byte;
    loop {
        if shift >= max_bits {
            return Err(E::overflow());
        }

        byte = read_byte()?;
        let content = byte & CONTENT_MASK;

        let remaining_bits = max_bits - shift;
        if remaining_bits < 7 {
            let mask = ((!0u8) << (remaining_bits - 1)) & CONTENT_MASK;
            let masked = content & mask;
            if masked != 0 && masked != mask {
                return Err(E::overflow());
            }
        }

        result |= i64::from(content) << shift;
        shift += 7;

        if byte & LAST_CHUNK_MASK == 0 {
            break;
        }
    }

    // Sign extend if the sign bit is set.
    if shift < 64 && (byte & SIGN_EXTEND_MASK) != 0 {
        result |= !0i64 << shift;
    }
    Ok(result)
}

/// Decodes an unsigned LEB128 value of at most `max_bits` bits (1 to 64) from
/// the front of `bytes`, returning the value and the number of bytes consumed.
/// Widths outside that range give `Error::Overflow`.
pub fn decode_unsigned(bytes: &[u8], max_bits: u32) -> Result<(u64, usize), DecodeError> {
    let mut consumed = 0;
    let value = read_unsigned(max_bits, || next_byte(bytes, &mut consumed))?;
    Ok((value, consumed))
}

/// Decodes a signed LEB128 value of at most `max_bits` bits (1 to 64) from the
/// front of `bytes`, returning the sign-extended value and the number of bytes
/// consumed. Widths outside that range give `Error::Overflow`.
pub fn decode_signed(bytes: &[u8], max_bits: u32) -> Result<(i64, usize), DecodeError> {
    let mut consumed = 0;
    let value = read_signed(max_bits, || next_byte(bytes, &mut consumed))?;
    Ok((value, consumed))
}

fn next_byte(bytes: &[u8], consumed: &mut usize) -> Result<u8, DecodeError> {
    let byte = bytes.get(*consumed).copied().ok_or(DecodeError::Truncated {
        boundary: Boundary::Module,
        needed: 1,
    })?;
    *consumed += 1;
    Ok(byte)
}
