//-
// Copyright (c) 2026, Mailstead developers
//
// This file is part of Mailstead.
//
// Mailstead is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailstead is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailstead. If not, see <http://www.gnu.org/licenses/>.

//! The varint and offset-marker codec used by the index and cache files.
//!
//! Both formats are load-bearing for on-disk compatibility and must
//! round-trip byte-for-byte with existing files:
//!
//! - Packed integers are base-128 varints in little-endian chunk order,
//!   low 7 bits per byte, continuation flagged by the high bit. They are
//!   self-terminating and carry no length prefix.
//! - Offset markers squeeze a 4-byte-aligned offset below 2^30 into a
//!   4-byte token whose every byte has the high bit set. A fixed-size
//!   slot in the index can therefore hold either raw data or a forwarding
//!   offset with no extra type tag: if any of the four high bits is
//!   missing, the slot is raw data and the marker decodes to 0 ("no
//!   offset").

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before the terminating byte of a varint.
    #[error("Truncated packed integer")]
    Truncated,
    /// The varint would need 32 or more bits of magnitude. Rejected
    /// outright so that corruption cannot be silently truncated into a
    /// plausible value.
    #[error("Packed integer overflows 32 bits")]
    Overflow,
}

/// Append `value` to `sink` as a packed integer.
pub fn pack_uint(sink: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        sink.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    sink.push(value as u8);
}

/// Decode a packed integer from the front of `cursor`, advancing it past
/// the value.
///
/// On error the cursor is left untouched.
pub fn unpack_uint(cursor: &mut &[u8]) -> Result<u32, DecodeError> {
    let mut rest = *cursor;
    let mut value = 0u32;
    let mut bits = 0u32;

    loop {
        let (&byte, tail) =
            rest.split_first().ok_or(DecodeError::Truncated)?;
        rest = tail;

        if bits > 28 || (28 == bits && 0 != byte & !0x0f) {
            // A sixth payload byte, or a fifth byte carrying payload or
            // continuation beyond bit 31.
            return Err(DecodeError::Overflow);
        }

        value |= u32::from(byte & 0x7f) << bits;
        if byte < 0x80 {
            break;
        }
        bits += 7;
    }

    *cursor = rest;
    Ok(value)
}

/// Encode a record offset as a 4-byte marker.
///
/// `offset` must be a multiple of 4 and below 2^30; violating either is a
/// programming error. The 28 usable bits are spread 7 per byte in
/// big-endian order, with the high bit of every byte set.
pub fn offset_to_marker(offset: u32) -> [u8; 4] {
    assert!(offset < 1 << 30, "offset {} out of marker range", offset);
    assert!(0 == offset & 3, "offset {} not 4-byte aligned", offset);

    let v = offset >> 2;
    [
        0x80 | ((v >> 21) & 0x7f) as u8,
        0x80 | ((v >> 14) & 0x7f) as u8,
        0x80 | ((v >> 7) & 0x7f) as u8,
        0x80 | (v & 0x7f) as u8,
    ]
}

/// Decode a 4-byte marker back into an offset.
///
/// Returns 0 if the token is not a valid marker (some byte is missing its
/// high bit). 0 is never a valid record offset, so callers treat it as
/// "absent". This is deliberately not an error: fixed slots legitimately
/// hold non-marker data.
pub fn marker_to_offset(marker: [u8; 4]) -> u32 {
    if marker.iter().any(|&b| 0 == b & 0x80) {
        return 0;
    }

    let v = u32::from(marker[0] & 0x7f) << 21
        | u32::from(marker[1] & 0x7f) << 14
        | u32::from(marker[2] & 0x7f) << 7
        | u32::from(marker[3] & 0x7f);
    v << 2
}
