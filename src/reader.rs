// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The section-by-section reader.
//!
//! A [`Reader`] walks a module in two phases driven by the caller. The first
//! is structural: the header is validated, then each section is framed with
//! [`Reader::advance_to_next_section`] and decoded with
//! [`Reader::process_current_section`]. The code section only yields a table
//! of contents. The second phase decodes function bodies on demand: after
//! [`Reader::seek_to_function_body`], [`Reader::read_next`] is pulled until
//! [`Reader::is_function_complete`]. Bodies may be decoded between sections,
//! in any order, and as many times as wanted.
//!
//! Any error is terminal: the reader moves to [`Phase::Failed`] and every
//! later operation fails with [`Error::InvalidState`].

use log::{debug, trace};

use crate::arena::{LabelRange, NodeArena, NodeId};
use crate::config::ReaderConfig;
use crate::cursor::Cursor;
use crate::decode::{
    Boundary, ContextId, Decoder, Error, ErrorWithContext, FunctionState, NAME_SECTION, decode_header,
    decode_name_section, decode_section, decode_section_header, decode_unsigned,
};
use crate::observe::{NoOpcodeObserver, OpcodeObserver};
use crate::types::{
    CustomSection, FuncIdx, FunctionBodyInfo, LabelIdx, Node, SectionHeader, SectionId, Version,
};
use crate::{Allocator, Module};

/// Where a [`Reader`] is in its walk over the module's sections.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// The header has not yet been read.
    Uninitialized,
    /// The header is valid and no section has been framed.
    HeaderValidated,
    /// A section has been framed but its contents not yet processed.
    ReadingSection(SectionHeader),
    /// The last framed section has been processed.
    SectionProcessed,
    /// All sections have been read.
    Done,
    /// An error was encountered.
    Failed,
}

/// The extent of the current section: how many entries it declares and how
/// many bytes it spans.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReaderState {
    /// The number of entries declared by the section.
    pub count: u32,
    /// The size of the section's contents in bytes.
    pub size: usize,
}

/// A lazy reader over a module buffer.
pub struct Reader<'a, A: Allocator, O: OpcodeObserver = NoOpcodeObserver> {
    bytes: &'a [u8],
    // Positioned at section granularity.
    decoder: Decoder<'a>,
    phase: Phase,
    last_id: Option<SectionId>,
    custom: Option<CustomSection<'a>>,
    module: Module<'a, A>,
    // The body being decoded, if any.
    function: Option<FunctionState<'a, A>>,
    arena: NodeArena<A>,
    observer: O,
    alloc: A,
}

impl<'a, A: Allocator> Reader<'a, A> {
    /// Creates a reader over the given module buffer with the default
    /// configuration.
    pub fn new(bytes: &'a [u8], alloc: A) -> Self {
        Self::with_config(bytes, ReaderConfig::default(), alloc)
    }

    /// Creates a reader with the given configuration.
    pub fn with_config(bytes: &'a [u8], config: ReaderConfig, alloc: A) -> Self {
        Self::with_observer(bytes, config, NoOpcodeObserver, alloc)
    }
}

impl<'a, A: Allocator, O: OpcodeObserver> Reader<'a, A, O> {
    /// Creates a reader that reports every opcode decoded from a function
    /// body to `observer`.
    pub fn with_observer(bytes: &'a [u8], config: ReaderConfig, observer: O, alloc: A) -> Self {
        Self {
            bytes,
            decoder: Decoder::new(Cursor::new(bytes), config),
            phase: Phase::Uninitialized,
            last_id: None,
            custom: None,
            module: Module::new_in(&alloc),
            function: None,
            arena: NodeArena::new_in(alloc.clone()),
            observer,
            alloc,
        }
    }

    /// The reader's current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The configuration the reader was created with.
    pub fn config(&self) -> &ReaderConfig {
        &self.decoder.config
    }

    /// The opcode observer, as updated by decoding so far.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    // Moves to the failed phase, packaging the error with the section
    // cursor's offset and context.
    fn fail(&mut self, error: Error) -> ErrorWithContext {
        self.phase = Phase::Failed;
        self.decoder.error(error)
    }

    fn invalid_state(&mut self, operation: &'static str) -> ErrorWithContext {
        self.fail(Error::InvalidState { operation })
    }

    /// Validates the module header.
    pub fn initialize(&mut self) -> Result<Version, ErrorWithContext> {
        if self.phase != Phase::Uninitialized {
            return Err(self.invalid_state("initialize"));
        }
        let version = decode_header(&mut self.decoder).map_err(|error| self.fail(error))?;
        debug!("validated module header (version {version:?})");
        self.module.version = version;
        self.phase = Phase::HeaderValidated;
        Ok(version)
    }

    /// Frames the next section, returning its header, or `None` once the end
    /// of the module is reached.
    ///
    /// A custom section that was not processed is skipped; any other section
    /// must be processed before advancing past it.
    pub fn advance_to_next_section(&mut self) -> Result<Option<SectionHeader>, ErrorWithContext> {
        match self.phase {
            Phase::HeaderValidated | Phase::SectionProcessed => {}
            Phase::ReadingSection(header) if header.id == SectionId::Custom => {
                trace!("skipping unprocessed custom section at {:#x}", header.range.start);
                self.decoder
                    .cursor
                    .seek(header.range.end)
                    .map_err(|error| self.fail(error))?;
            }
            Phase::Done => return Ok(None),
            _ => return Err(self.invalid_state("advance_to_next_section")),
        }
        self.custom = None;

        if self.decoder.cursor.at_module_end() {
            let declared = self.module.funcsec.len() as u32;
            let bodies = self.module.codesec.len() as u32;
            if declared != bodies {
                return Err(self.fail(Error::FunctionCountMismatch { declared, bodies }));
            }
            debug!("finished reading module sections ({bodies} function bodies)");
            self.phase = Phase::Done;
            return Ok(None);
        }

        let header = decode_section_header(&mut self.decoder).map_err(|error| self.fail(error))?;

        if header.id == SectionId::Custom {
            let bytes = self.bytes;
            let custom = self
                .decoder
                .within(header.range.end, Boundary::Section, |decoder| {
                    decoder.with_context(ContextId::CustomSec, |decoder| {
                        let name = decoder.read_name()?;
                        Ok(CustomSection {
                            name,
                            bytes: &bytes[decoder.offset()..header.range.end],
                        })
                    })
                })
                .map_err(|error| section_error(&header, self.decoder.offset(), error))
                .map_err(|error| self.fail(error))?;
            trace!("custom section {:?}", *custom.name);
            self.custom = Some(custom);
        } else {
            // Apart from custom sections, which can appear anywhere, sections
            // must appear at most once and in order.
            if let Some(last_id) = self.last_id {
                if header.id == last_id {
                    return Err(self.fail(Error::DuplicateSection(header.id)));
                }
                if header.id < last_id {
                    return Err(self.fail(Error::OutOfOrderSection {
                        before: last_id,
                        after: header.id,
                    }));
                }
            }
            self.last_id = Some(header.id);
        }

        trace!(
            "framed {:?} section at {:#x} ({} bytes)",
            header.id,
            header.range.start,
            header.range.len()
        );
        self.phase = Phase::ReadingSection(header);
        Ok(Some(header))
    }

    /// The current custom section, if one is framed.
    pub fn custom_section(&self) -> Option<CustomSection<'a>> {
        self.custom
    }

    /// The entry count and size of the current section. Custom sections have
    /// no entry count.
    pub fn section_state(&self) -> Option<ReaderState> {
        let header = self.current_header()?;
        let count = match header.id {
            SectionId::Custom => return None,
            SectionId::Start => 1,
            _ => {
                let contents = &self.bytes[header.range.start..header.range.end];
                decode_unsigned(contents, 32).ok()?.0 as u32
            }
        };
        Some(ReaderState {
            count,
            size: header.range.len(),
        })
    }

    fn current_header(&self) -> Option<SectionHeader> {
        match self.phase {
            Phase::ReadingSection(header) => Some(header),
            _ => None,
        }
    }

    /// Decodes the contents of the current section into the module.
    ///
    /// The section's contents must end exactly at its declared length. Custom
    /// sections other than `name` are skipped.
    pub fn process_current_section(&mut self) -> Result<(), ErrorWithContext> {
        let Phase::ReadingSection(header) = self.phase else {
            return Err(self.invalid_state("process_current_section"));
        };

        let Self {
            decoder,
            module,
            custom,
            alloc,
            ..
        } = self;
        let result = decoder.within(header.range.end, Boundary::Section, |decoder| {
            if let Some(custom) = custom {
                if *custom.name == NAME_SECTION && decoder.config.decode_names {
                    module.names = Some(decode_name_section(decoder, alloc));
                }
                // Whatever was left of the section is of no interest.
                return decoder.cursor.seek(header.range.end);
            }
            decode_section(decoder, header.id, module, alloc)?;
            if decoder.cursor.at_end() {
                Ok(())
            } else {
                Err(Error::SectionLengthMismatch {
                    id: header.id,
                    expected: header.range.len() as u32,
                    actual: (decoder.offset() - header.range.start) as u32,
                })
            }
        });
        let offset = self.decoder.offset();
        result
            .map_err(|error| section_error(&header, offset, error))
            .map_err(|error| self.fail(error))?;

        self.phase = Phase::SectionProcessed;
        Ok(())
    }

    /// Positions the reader at the start of the given function body, ready
    /// for [`Reader::read_next`]. Any body being decoded is abandoned.
    pub fn seek_to_function_body(&mut self, info: FunctionBodyInfo) -> Result<(), ErrorWithContext> {
        if matches!(self.phase, Phase::Uninitialized | Phase::Failed) {
            return Err(self.invalid_state("seek_to_function_body"));
        }
        if !self.module.codesec.iter().any(|function| function.body == info) {
            return Err(self.fail(Error::UnknownFunction(*info.index)));
        }

        self.function = None;
        let config = self.decoder.config;
        match FunctionState::new(
            self.bytes,
            info,
            config,
            self.alloc.clone(),
            &mut self.observer,
        ) {
            Ok(state) => {
                debug!(
                    "seeking to body of function {} at {:#x}",
                    *info.index, info.range.start
                );
                self.function = Some(state);
                Ok(())
            }
            Err(error) => {
                self.phase = Phase::Failed;
                Err(ErrorWithContext::new(error, info.range.start))
            }
        }
    }

    /// Looks up the body of the given module-defined function and seeks to it.
    pub fn seek_to_function(&mut self, index: FuncIdx) -> Result<(), ErrorWithContext> {
        let Some(info) = self.module.function(index).map(|function| function.body) else {
            return Err(self.fail(Error::UnknownFunction(*index)));
        };
        self.seek_to_function_body(info)
    }

    /// The body currently being decoded, if any.
    pub fn current_function(&self) -> Option<FunctionBodyInfo> {
        self.function.as_ref().map(FunctionState::info)
    }

    /// Whether the whole of the current function body has been decoded.
    pub fn is_function_complete(&self) -> bool {
        self.function.as_ref().is_some_and(FunctionState::is_complete)
    }

    /// The number of constructs open at the current point in the body.
    pub fn function_depth(&self) -> usize {
        self.function.as_ref().map_or(0, FunctionState::depth)
    }

    /// Decodes the next instruction of the current function body, returning
    /// the handle of its node.
    pub fn read_next(&mut self) -> Result<NodeId, ErrorWithContext> {
        if self.phase == Phase::Failed {
            return Err(self.invalid_state("read_next"));
        }
        let Some(function) = self.function.as_mut() else {
            return Err(self.invalid_state("read_next"));
        };
        match function.read_node(&mut self.arena, &mut self.observer) {
            Ok(id) => Ok(id),
            Err(error) => {
                let error = function.error(error);
                self.phase = Phase::Failed;
                Err(error)
            }
        }
    }

    /// Decodes the remainder of the current function body, returning the
    /// number of nodes decoded.
    pub fn read_function(&mut self) -> Result<usize, ErrorWithContext> {
        let mut count = 0;
        while !self.is_function_complete() {
            self.read_next()?;
            count += 1;
        }
        Ok(count)
    }

    /// The decoded node with the given handle.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
    }

    /// The targets of a `br_table`.
    pub fn labels(&self, range: LabelRange) -> Option<&[LabelIdx]> {
        self.arena.labels(range)
    }

    /// All nodes decoded so far, across all function bodies.
    pub fn arena(&self) -> &NodeArena<A> {
        &self.arena
    }

    /// The offset of the next byte to be read: within the current function
    /// body while one is being decoded, and at section granularity otherwise.
    pub fn current_offset(&self) -> usize {
        match &self.function {
            Some(function) if !function.is_complete() => function.offset(),
            _ => self.decoder.offset(),
        }
    }

    /// The module as decoded so far.
    pub fn module(&self) -> &Module<'a, A> {
        &self.module
    }

    /// Consumes the reader, returning the module once all sections have
    /// been read.
    pub fn into_module(mut self) -> Result<Module<'a, A>, ErrorWithContext> {
        if self.phase != Phase::Done {
            return Err(self.invalid_state("into_module"));
        }
        Ok(self.module)
    }

    /// Consumes the reader, returning the module and every node decoded, once
    /// all sections have been read.
    pub fn into_parts(mut self) -> Result<(Module<'a, A>, NodeArena<A>), ErrorWithContext> {
        if self.phase != Phase::Done {
            return Err(self.invalid_state("into_parts"));
        }
        Ok((self.module, self.arena))
    }
}

// A read that ran past the end of a section means the section's declared
// length was too short for its contents.
fn section_error(header: &SectionHeader, offset: usize, error: Error) -> Error {
    match error {
        Error::Truncated {
            boundary: Boundary::Section,
            needed,
        } => Error::SectionLengthMismatch {
            id: header.id,
            expected: header.range.len() as u32,
            actual: (offset - header.range.start + needed) as u32,
        },
        error => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Global;
    use crate::types::{BranchTarget, NodeKind, Opcode};

    // (func (result i32) (block (br 0)) i32.const 7)
    const MODULE: [u8; 30] = [
        0x00, 0x61, 0x73, 0x6d, 0x0d, 0x00, 0x00, 0x00, // header
        0x01, 0x05, 0x01, 0x60, 0x00, 0x01, 0x7f, // type section
        0x03, 0x02, 0x01, 0x00, // function section
        0x0a, 0x0b, 0x01, 0x09, 0x00, 0x02, 0x40, 0x0c, 0x00, 0x0b, 0x41, // code section...
    ];

    fn module_bytes() -> std::vec::Vec<u8> {
        let mut bytes = MODULE.to_vec();
        bytes.extend_from_slice(&[0x07, 0x0b]); // ...i32.const 7; end
        bytes
    }

    #[test]
    fn test_phases() {
        let bytes = module_bytes();
        let mut reader = Reader::new(&bytes, Global);
        assert_eq!(reader.phase(), Phase::Uninitialized);
        assert_eq!(reader.initialize().unwrap(), Version::Experimental);
        assert_eq!(reader.phase(), Phase::HeaderValidated);

        let header = reader.advance_to_next_section().unwrap().unwrap();
        assert_eq!(header.id, SectionId::Type);
        assert_eq!(reader.phase(), Phase::ReadingSection(header));
        assert_eq!(
            reader.section_state(),
            Some(ReaderState { count: 1, size: 5 })
        );
        reader.process_current_section().unwrap();
        assert_eq!(reader.phase(), Phase::SectionProcessed);

        while reader.advance_to_next_section().unwrap().is_some() {
            reader.process_current_section().unwrap();
        }
        assert_eq!(reader.phase(), Phase::Done);
        assert_eq!(reader.advance_to_next_section().unwrap(), None);
        assert_eq!(reader.module().codesec.len(), 1);
        assert!(reader.arena().is_empty());
    }

    #[test]
    fn test_function_body() {
        let bytes = module_bytes();
        let mut reader = Reader::new(&bytes, Global);
        reader.initialize().unwrap();
        while reader.advance_to_next_section().unwrap().is_some() {
            reader.process_current_section().unwrap();
        }

        reader.seek_to_function(FuncIdx::new(0)).unwrap();
        assert!(!reader.is_function_complete());
        let block = reader.read_next().unwrap();
        assert_eq!(reader.function_depth(), 1);
        let br = reader.read_next().unwrap();
        assert_eq!(
            reader.node(br).unwrap().kind,
            NodeKind::Branch {
                depth: LabelIdx::new(0),
                target: BranchTarget::Construct(block)
            }
        );
        assert_eq!(reader.read_function().unwrap(), 2);
        assert!(reader.is_function_complete());
        // Back at section granularity, which is the end of the module.
        assert_eq!(reader.current_offset(), bytes.len());
        assert_eq!(reader.arena().len(), 4);

        // Bodies can be decoded again.
        reader.seek_to_function(FuncIdx::new(0)).unwrap();
        assert_eq!(reader.read_function().unwrap(), 4);
        assert_eq!(reader.arena().len(), 8);

        let (module, arena) = reader.into_parts().unwrap();
        assert_eq!(module.codesec.len(), 1);
        assert_eq!(arena.iter().filter(|(_, n)| n.opcode == Opcode::Block).count(), 2);
    }

    #[test]
    fn test_failure_is_terminal() {
        let bytes = module_bytes();
        let mut reader = Reader::new(&bytes, Global);
        let err = reader.advance_to_next_section().unwrap_err();
        assert_eq!(
            err.error,
            Error::InvalidState {
                operation: "advance_to_next_section"
            }
        );
        assert_eq!(reader.phase(), Phase::Failed);
        assert_eq!(
            reader.initialize().unwrap_err().error,
            Error::InvalidState {
                operation: "initialize"
            }
        );
    }

    #[test]
    fn test_unprocessed_section() {
        let bytes = module_bytes();
        let mut reader = Reader::new(&bytes, Global);
        reader.initialize().unwrap();
        reader.advance_to_next_section().unwrap();
        assert_eq!(
            reader.advance_to_next_section().unwrap_err().error,
            Error::InvalidState {
                operation: "advance_to_next_section"
            }
        );
    }

    #[test]
    fn test_read_next_requires_a_function() {
        let bytes = module_bytes();
        let mut reader = Reader::new(&bytes, Global);
        reader.initialize().unwrap();
        assert_eq!(
            reader.read_next().unwrap_err().error,
            Error::InvalidState {
                operation: "read_next"
            }
        );
    }
}
