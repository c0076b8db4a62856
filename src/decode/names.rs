// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Decoding of the `name` custom section.

use log::warn;

use crate::Allocator;
use crate::arena::Vec;
use crate::types::{FuncIdx, FunctionName, NameSection};

use super::{ContextId, Decoder, Error};

/// The name of the custom section carrying debug names.
pub const NAME_SECTION: &str = "name";

// Decodes as much of a `name` section as is well-formed.
//
// The section is a vector with an entry per function, in function index order:
// the function's name followed by a vector of local names. Debug names are
// never load-bearing, so malformed content is logged and the remainder of the
// section is dropped rather than failing the module.
pub(crate) fn decode_name_section<'a, A: Allocator>(
    decoder: &mut Decoder<'a>,
    alloc: &A,
) -> NameSection<'a, A> {
    let depth = decoder.context.depth();
    let mut entries = Vec::new_in(alloc.clone());
    let result = decoder.with_context(ContextId::NameSec, |decoder| {
        let count: u32 = decoder.read_bounded()?;
        decoder.cursor.require_bytes(count as usize)?;
        entries.try_reserve_exact(count as usize)?;
        for i in 0..count {
            let entry = decoder.with_context(ContextId::FuncName, |decoder| {
                decode_function_name(decoder, FuncIdx::new(i), alloc)
            })?;
            entries.push(entry); // No allocation with previous reservation.
        }
        Ok(())
    });
    if let Err(error) = result {
        warn!(
            "ignoring malformed name section past {:#x} ({} entries kept): {error}",
            decoder.offset(),
            entries.len()
        );
        decoder.context.truncate(depth);
    }
    NameSection::new(entries)
}

fn decode_function_name<'a, A: Allocator>(
    decoder: &mut Decoder<'a>,
    index: FuncIdx,
    alloc: &A,
) -> Result<FunctionName<'a, A>, Error> {
    let name = decoder.read_name()?;
    let count: u32 = decoder.read_bounded()?;
    decoder.cursor.require_bytes(count as usize)?;
    let mut locals = Vec::new_in(alloc.clone());
    locals.try_reserve_exact(count as usize)?;
    for _ in 0..count {
        locals.push(decoder.read_name()?);
    }
    Ok(FunctionName {
        index,
        name,
        locals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Global;
    use crate::config::ReaderConfig;
    use crate::cursor::Cursor;

    #[test]
    fn test_names() {
        let bytes = [
            0x02, // two functions
            0x04, b'm', b'a', b'i', b'n', 0x02, 0x01, b'x', 0x01, b'y', // main(x, y)
            0x03, b'a', b'd', b'd', 0x00, // add
        ];
        let mut decoder = Decoder::new(Cursor::new(&bytes), ReaderConfig::default());
        let names = decode_name_section(&mut decoder, &Global);
        assert_eq!(names.len(), 2);
        assert_eq!(*names[0].name, "main");
        assert_eq!(names[0].locals.iter().map(|n| **n).collect::<std::vec::Vec<_>>(), ["x", "y"]);
        assert_eq!(names.function_name(FuncIdx::new(1)).map(|n| *n), Some("add"));
        assert!(names.function_name(FuncIdx::new(2)).is_none());
        assert!(decoder.cursor.at_end());
    }

    #[test]
    fn test_malformed_names_are_partial() {
        let bytes = [
            0x02, // two functions
            0x01, b'f', 0x00, // f
            0x05, b'g', // truncated name
        ];
        let mut decoder = Decoder::new(Cursor::new(&bytes), ReaderConfig::default());
        let names = decode_name_section(&mut decoder, &Global);
        assert_eq!(names.len(), 1);
        assert_eq!(names.function_name(FuncIdx::new(0)).map(|n| *n), Some("f"));
        assert_eq!(decoder.context.depth(), 0);
    }
}
