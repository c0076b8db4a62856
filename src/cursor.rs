// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A bounds-checked cursor over the module buffer.

use crate::decode::{Boundary, Error};
use crate::types::ByteRange;

/// The window and boundary that were active before a scope was entered.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Scope {
    end: usize,
    boundary: Boundary,
}

/// A read position within a borrowed module buffer, limited to a window
/// ending at the active boundary.
///
/// Reads never run past the window: any read that would do so fails with
/// [`Error::Truncated`], naming the boundary and the number of missing bytes.
#[derive(Clone, Debug)]
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
    boundary: Boundary,
}

impl<'a> Cursor<'a> {
    /// A cursor over the whole module.
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            end: bytes.len(),
            boundary: Boundary::Module,
        }
    }

    /// A cursor over the given range of the module. The range must lie
    /// within the buffer.
    pub(crate) fn with_range(bytes: &'a [u8], range: ByteRange, boundary: Boundary) -> Self {
        debug_assert!(range.end <= bytes.len());
        Self {
            bytes,
            pos: range.start,
            end: range.end,
            boundary,
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.end - self.pos
    }

    /// Whether the active boundary has been reached.
    pub(crate) fn at_end(&self) -> bool {
        self.pos == self.end
    }

    /// Whether the end of the module has been reached.
    pub(crate) fn at_module_end(&self) -> bool {
        self.pos == self.bytes.len()
    }

    pub(crate) fn require_bytes(&self, count: usize) -> Result<(), Error> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(Error::Truncated {
                boundary: self.boundary,
                needed: count - remaining,
            });
        }
        Ok(())
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8, Error> {
        self.require_bytes(1)?;
        let byte = self.bytes[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_slice(N)?);
        Ok(buf)
    }

    pub(crate) fn read_slice(&mut self, count: usize) -> Result<&'a [u8], Error> {
        self.require_bytes(count)?;
        let bytes = self.bytes;
        let slice = &bytes[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, count: usize) -> Result<(), Error> {
        self.require_bytes(count)?;
        self.pos += count;
        Ok(())
    }

    /// Moves forward to the given offset within the current window.
    pub(crate) fn seek(&mut self, offset: usize) -> Result<(), Error> {
        debug_assert!(offset >= self.pos, "{offset:#x} < {:#x}", self.pos);
        self.skip(offset.saturating_sub(self.pos))
    }

    /// Narrows the window to end at `end`, making `boundary` the active one.
    /// The previous window is restored by [`Cursor::exit`].
    pub(crate) fn enter(&mut self, end: usize, boundary: Boundary) -> Result<Scope, Error> {
        self.require_bytes(end.saturating_sub(self.pos))?;
        let scope = Scope {
            end: self.end,
            boundary: self.boundary,
        };
        self.end = end;
        self.boundary = boundary;
        Ok(scope)
    }

    pub(crate) fn exit(&mut self, scope: Scope) {
        self.end = scope.end;
        self.boundary = scope.boundary;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BYTES: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

    #[test]
    fn test_reads_advance() {
        let mut cursor = Cursor::new(&BYTES);
        assert_eq!(cursor.read_byte(), Ok(0));
        assert_eq!(cursor.read_array::<2>(), Ok([1, 2]));
        assert_eq!(cursor.read_slice(3), Ok(&BYTES[3..6]));
        assert_eq!(cursor.offset(), 6);
        assert_eq!(cursor.remaining(), 2);
        cursor.skip(2).unwrap();
        assert!(cursor.at_end());
        assert!(cursor.at_module_end());
    }

    #[test]
    fn test_truncation_reports_missing_bytes() {
        let mut cursor = Cursor::new(&BYTES);
        cursor.skip(6).unwrap();
        assert_eq!(
            cursor.read_slice(5),
            Err(Error::Truncated {
                boundary: Boundary::Module,
                needed: 3
            })
        );
        // A failed read consumes nothing.
        assert_eq!(cursor.offset(), 6);
    }

    #[test]
    fn test_scopes_narrow_and_restore() {
        let mut cursor = Cursor::new(&BYTES);
        cursor.skip(2).unwrap();
        let scope = cursor.enter(4, Boundary::Section).unwrap();
        assert_eq!(cursor.remaining(), 2);
        assert_eq!(
            cursor.read_array::<3>(),
            Err(Error::Truncated {
                boundary: Boundary::Section,
                needed: 1
            })
        );
        cursor.skip(2).unwrap();
        assert!(cursor.at_end());
        assert!(!cursor.at_module_end());

        cursor.exit(scope);
        assert_eq!(cursor.read_byte(), Ok(4));
    }

    #[test]
    fn test_scope_past_window() {
        let mut cursor = Cursor::new(&BYTES);
        cursor.skip(4).unwrap();
        assert_eq!(
            cursor.enter(10, Boundary::Section).err(),
            Some(Error::Truncated {
                boundary: Boundary::Module,
                needed: 2
            })
        );
    }

    #[test]
    fn test_range_cursor() {
        let mut cursor = Cursor::with_range(&BYTES, ByteRange::new(5, 7), Boundary::Function);
        assert_eq!(cursor.read_array::<2>(), Ok([5, 6]));
        assert!(cursor.at_end());
        assert_eq!(
            cursor.read_byte(),
            Err(Error::Truncated {
                boundary: Boundary::Function,
                needed: 1
            })
        );
    }
}
