// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! WebAssembly binary format decoding.

mod expr;
mod leb128;
mod names;
mod sections;

pub(crate) use expr::FunctionState;
pub use leb128::{decode_signed, decode_unsigned};
pub(crate) use names::decode_name_section;
pub use names::NAME_SECTION;
pub(crate) use sections::{decode_header, decode_section, decode_section_header};

use core::fmt;

use leb128::Leb128;

use crate::arena::{TryReserveError, Vec};
use crate::config::ReaderConfig;
use crate::cursor::Cursor;
use crate::types::{CustomSection, SectionId};
use crate::Allocator;

// The maximum context depth of this implementation. The deepest nesting is
// that of an import's table limits: section, import, descriptor, table type,
// limits, and finally the LEB128-encoded integer itself.
const MAX_DEPTH: usize = 8;

// Represents decoding context.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub(crate) enum ContextId {
    #[default]
    Invalid,
    BlockType,
    BrTableOperands,
    Byte,
    CodeSec,
    CustomSec,
    Data,
    DataSec,
    Elem,
    ElemSec,
    Export,
    ExportDesc,
    ExportSec,
    F32,
    F64,
    Func,
    FuncBody,
    FuncIdx,
    FuncName,
    FuncSec,
    FuncType,
    Global,
    GlobalIdx,
    GlobalSec,
    GlobalType,
    I32,
    I64,
    Import,
    ImportDesc,
    ImportSec,
    InitExpr,
    LabelIdx,
    Limits,
    LocalIdx,
    Locals,
    Magic,
    MemArg,
    MemIdx,
    MemType,
    MemorySec,
    Mut,
    Name,
    NameSec,
    Opcode,
    ReadingBytes,
    ResultType,
    SectionId,
    SkippingBytes,
    StartSec,
    TableIdx,
    TableSec,
    TableType,
    TypeIdx,
    TypeSec,
    U32,
    ValType,
    VecFuncIdx,
    VecValType,
    Version,
}

impl From<ContextId> for &'static str {
    fn from(id: ContextId) -> Self {
        match id {
            ContextId::Invalid => "invalid",
            ContextId::BlockType => "blocktype",
            ContextId::BrTableOperands => "br_table operands",
            ContextId::Byte => "byte",
            ContextId::CodeSec => "codesec",
            ContextId::CustomSec => "customsec",
            ContextId::Data => "data",
            ContextId::DataSec => "datasec",
            ContextId::Elem => "elem",
            ContextId::ElemSec => "elemsec",
            ContextId::Export => "export",
            ContextId::ExportDesc => "exportdesc",
            ContextId::ExportSec => "exportsec",
            ContextId::F32 => "f32",
            ContextId::F64 => "f64",
            ContextId::Func => "func",
            ContextId::FuncBody => "func body",
            ContextId::FuncIdx => "funcidx",
            ContextId::FuncName => "func name",
            ContextId::FuncSec => "funcsec",
            ContextId::FuncType => "functype",
            ContextId::Global => "global",
            ContextId::GlobalIdx => "globalidx",
            ContextId::GlobalSec => "globalsec",
            ContextId::GlobalType => "globaltype",
            ContextId::I32 => "i32",
            ContextId::I64 => "i64",
            ContextId::Import => "import",
            ContextId::ImportDesc => "importdesc",
            ContextId::ImportSec => "importsec",
            ContextId::InitExpr => "init expr",
            ContextId::LabelIdx => "labelidx",
            ContextId::Limits => "limits",
            ContextId::LocalIdx => "localidx",
            ContextId::Locals => "locals",
            ContextId::Magic => "magic",
            ContextId::MemArg => "memarg",
            ContextId::MemIdx => "memidx",
            ContextId::MemType => "memtype",
            ContextId::MemorySec => "memsec",
            ContextId::Mut => "mut",
            ContextId::Name => "name",
            ContextId::NameSec => "namesec",
            ContextId::Opcode => "opcode",
            ContextId::ReadingBytes => "reading bytes",
            ContextId::ResultType => "resulttype",
            ContextId::SectionId => "section ID",
            ContextId::SkippingBytes => "skipping bytes",
            ContextId::StartSec => "startsec",
            ContextId::TableIdx => "tableidx",
            ContextId::TableSec => "tablesec",
            ContextId::TableType => "tabletype",
            ContextId::TypeIdx => "typeidx",
            ContextId::TypeSec => "typesec",
            ContextId::U32 => "u32",
            ContextId::ValType => "valtype",
            ContextId::VecFuncIdx => "vec(funcidx)",
            ContextId::VecValType => "vec(valtype)",
            ContextId::Version => "version",
        }
    }
}

trait Contextual {
    const ID: ContextId;
}

/// A frame of decoding context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContextFrame {
    /// A description of what was being decoded.
    pub context: &'static str,
    /// Byte offset in the module where this context was entered.
    pub offset: usize,
}

/// Stack for tracking decoding context during error reporting.
#[derive(Clone, Debug, Default)]
pub(crate) struct ContextStack {
    offsets: [usize; MAX_DEPTH],
    ids: [ContextId; MAX_DEPTH],
    depth: u8,
}

impl ContextStack {
    // Pushes a new context frame, returning true if successful.
    fn push(&mut self, id: ContextId, offset: usize) -> bool {
        let depth = self.depth as usize;
        if depth >= MAX_DEPTH {
            return false;
        }
        self.offsets[depth] = offset;
        self.ids[depth] = id;
        self.depth += 1;
        true
    }

    // Pop the top context frame.
    fn pop(&mut self) {
        debug_assert!(self.depth > 0, "{self:#?}");
        self.depth -= 1;
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth as usize
    }

    // Discards the frames above the given depth, left behind by a failed
    // decode that was recovered from.
    pub(crate) fn truncate(&mut self, depth: usize) {
        debug_assert!(depth <= self.depth());
        self.depth = self.depth.min(depth as u8);
    }

    // Returns an iterator over frames in "pushed" order (outermost to
    // innermost).
    fn iter(&self) -> impl Iterator<Item = ContextFrame> + '_ {
        self.offsets
            .iter()
            .zip(&self.ids)
            .take(self.depth as usize)
            .map(|(&offset, &id)| ContextFrame {
                context: id.into(),
                offset,
            })
    }
}

/// The limit that a read ran into.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Boundary {
    /// The end of the module buffer.
    Module,
    /// The declared end of the current section.
    Section,
    /// The declared end of the current function body.
    Function,
}

/// A decoding error with additional context around what hierarchy of things
/// were being decoded at the time.
#[derive(Clone)]
pub struct ErrorWithContext {
    /// The underlying decoding error.
    pub error: Error,
    /// The offset in the module at which the error was detected.
    pub offset: usize,
    pub(crate) context: ContextStack,
}

impl ErrorWithContext {
    pub(crate) fn new(error: Error, offset: usize) -> Self {
        Self {
            error,
            offset,
            context: ContextStack::default(),
        }
    }

    /// The frames of context, outermost first.
    pub fn context(&self) -> impl Iterator<Item = ContextFrame> + '_ {
        self.context.iter()
    }
}

impl fmt::Debug for ErrorWithContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (at {:#x})", self.error, self.offset)?;
        for (i, frame) in self.context.iter().enumerate() {
            write!(f, "\n{:#x}: ", frame.offset)?;
            for _ in 0..i {
                write!(f, "  ")?;
            }
            write!(f, "{}", frame.context)?;
        }
        Ok(())
    }
}

impl fmt::Display for ErrorWithContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {:#x})", self.error, self.offset)
    }
}

impl core::error::Error for ErrorWithContext {}

/// Represents errors that can arise during module decoding.
#[derive(Clone, Copy, Eq, PartialEq)]
pub enum Error {
    /// Failed memory allocation.
    AllocError,
    /// The module does not start with the `\0asm` magic number.
    BadMagic(u32),
    /// A given section appears more than once in the module.
    DuplicateSection(SectionId),
    /// Decoder context stack exceeded maximum depth to prevent stack overflow.
    ExcessiveParsingDepth {
        context: &'static str,
        offset: usize,
    },
    /// Structured constructs within a function body are nested more deeply
    /// than the configured limit.
    ExcessiveNesting { limit: usize },
    /// The number of function bodies differs from the number of functions
    /// declared in the function section.
    FunctionCountMismatch { declared: u32, bodies: u32 },
    /// A branch targets a construct beyond the enclosing nesting.
    InvalidBranchDepth { depth: u32, nesting: u32 },
    /// An opcode that is unknown, or not allowed in its position.
    InvalidOpcode(u8),
    /// A reader operation was called in a state that does not permit it.
    InvalidState { operation: &'static str },
    /// Invalid byte token (a flag, kind or reserved byte) encountered.
    InvalidToken(u8),
    /// Invalid type tag, or a type tag not allowed in its position.
    InvalidTypeTag(u8),
    /// Invalid UTF-8 encoding in a name.
    InvalidUtf8,
    /// (Non-custom) sections appear in the wrong order.
    OutOfOrderSection { before: SectionId, after: SectionId },
    /// A LEB128-encoded integer exceeds its bit width, either in value or in
    /// encoding length.
    Overflow,
    /// A section's contents do not end exactly at its declared length.
    SectionLengthMismatch {
        id: SectionId,
        expected: u32,
        actual: u32,
    },
    /// An `end` or `else` outside of any construct, a body ending within an
    /// open construct, or a body whose last byte is not `end`.
    StructuralImbalance { depth: usize },
    /// Function declares too many local variables (exceeding the configured
    /// limit).
    TooManyLocals(usize),
    /// A `br_table` has more targets than the configured limit.
    TooManyBranchTargets(u32),
    /// A read ran past the given boundary, missing `needed` bytes.
    Truncated { boundary: Boundary, needed: usize },
    /// No function body with the given index exists.
    UnknownFunction(u32),
    /// A section ID outside of the known range.
    UnknownSectionCode(u8),
    /// A function signature with more than one result.
    UnsupportedResultCount(u32),
    /// A module version other than the experimental one.
    UnsupportedVersion(u32),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AllocError => write!(f, "allocation failure"),
            Error::BadMagic(magic) => write!(f, "invalid magic ({magic:#x})"),
            Error::DuplicateSection(id) => write!(f, "duplicate of section ({id:?})"),
            Error::ExcessiveParsingDepth { context, offset } => {
                write!(f, "unexpected frame at {offset:#x}: {context}")
            }
            Error::ExcessiveNesting { limit } => {
                write!(f, "constructs nested more than {limit} deep")
            }
            Error::FunctionCountMismatch { declared, bodies } => write!(
                f,
                "function count mismatch: {declared} declared; {bodies} bodies"
            ),
            Error::InvalidBranchDepth { depth, nesting } => write!(
                f,
                "invalid branch depth {depth} at nesting depth {nesting}"
            ),
            Error::InvalidOpcode(op) => write!(f, "invalid opcode ({op:#x})"),
            Error::InvalidState { operation } => {
                write!(f, "{operation}() called in an invalid reader state")
            }
            Error::InvalidToken(token) => write!(f, "invalid byte token ({token:#x})"),
            Error::InvalidTypeTag(tag) => write!(f, "invalid type tag ({tag:#x})"),
            Error::InvalidUtf8 => write!(f, "invalid UTF-8"),
            Error::OutOfOrderSection { before, after } => {
                write!(f, "out-of-order sections: {before:?} before {after:?}")
            }
            Error::Overflow => write!(f, "LEB128-encoded integer overflows its width"),
            Error::SectionLengthMismatch {
                id,
                expected,
                actual,
            } => write!(
                f,
                "invalid section length for {id:?}: expected {expected:#x}; got {actual:#x}"
            ),
            Error::StructuralImbalance { depth } => {
                write!(f, "unbalanced structured control (depth {depth})")
            }
            Error::TooManyLocals(count) => {
                write!(f, "too many locals: at least {count} were specified")
            }
            Error::TooManyBranchTargets(count) => {
                write!(f, "too many br_table targets: {count}")
            }
            Error::Truncated { boundary, needed } => {
                write!(f, "truncated: {needed} more byte(s) needed past {boundary:?} end")
            }
            Error::UnknownFunction(index) => write!(f, "unknown function ({index})"),
            Error::UnknownSectionCode(id) => write!(f, "unknown section code ({id:#x})"),
            Error::UnsupportedResultCount(count) => {
                write!(f, "unsupported result count ({count})")
            }
            Error::UnsupportedVersion(version) => {
                write!(f, "unsupported version ({version:#x})")
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl core::error::Error for Error {}

impl leb128::Error for Error {
    fn overflow() -> Self {
        Error::Overflow
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::AllocError
    }
}

pub(crate) struct Decoder<'a> {
    pub(crate) cursor: Cursor<'a>,
    pub(crate) context: ContextStack,
    pub(crate) config: ReaderConfig,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(cursor: Cursor<'a>, config: ReaderConfig) -> Self {
        Self {
            cursor,
            context: ContextStack::default(),
            config,
        }
    }

    // Pushes a context frame before a call, popping it if successful.
    pub(crate) fn with_context<F, R>(&mut self, id: ContextId, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Self) -> Result<R, Error>,
    {
        let offset = self.offset();
        if !self.context.push(id, offset) {
            return Err(Error::ExcessiveParsingDepth {
                context: id.into(),
                offset,
            });
        }
        let val = f(self)?;
        self.context.pop();
        Ok(val)
    }

    // Runs `f` with reads limited to end at `end`, restoring the previous
    // limit afterward.
    pub(crate) fn within<F, R>(&mut self, end: usize, boundary: Boundary, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Self) -> Result<R, Error>,
    {
        let scope = self.cursor.enter(end, boundary)?;
        let result = f(self);
        self.cursor.exit(scope);
        result
    }

    // Packages an error with the current offset and context.
    pub(crate) fn error(&self, error: Error) -> ErrorWithContext {
        ErrorWithContext {
            error,
            offset: self.offset(),
            context: self.context.clone(),
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.cursor.offset()
    }

    fn read_byte_raw(&mut self) -> Result<u8, Error> {
        self.cursor.read_byte()
    }

    fn read_leb128_raw<T: Leb128>(&mut self) -> Result<T, Error> {
        T::read(|| self.cursor.read_byte())
    }

    pub(crate) fn read_zero_byte(&mut self) -> Result<(), Error> {
        self.with_context(ContextId::Byte, |decoder| {
            let byte = decoder.read_byte_raw()?;
            if byte == 0 {
                Ok(())
            } else {
                Err(Error::InvalidToken(byte))
            }
        })
    }

    // Borrows the next `count` bytes from the module buffer.
    pub(crate) fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], Error> {
        self.with_context(ContextId::ReadingBytes, |decoder| {
            decoder.cursor.read_slice(count)
        })
    }

    pub(crate) fn skip_bytes(&mut self, count: usize) -> Result<(), Error> {
        self.with_context(ContextId::SkippingBytes, |decoder| {
            decoder.cursor.skip(count)
        })
    }

    pub(crate) fn read<A: Allocator, T: Decodable<'a, A> + Contextual>(
        &mut self,
        alloc: &A,
    ) -> Result<T, Error> {
        self.with_context(T::ID, |decoder| T::decode(decoder, alloc))
    }

    pub(crate) fn read_bounded<T: BoundedDecodable + Contextual>(&mut self) -> Result<T, Error> {
        self.with_context(T::ID, |decoder| T::decode(decoder))
    }
}

// Types that can be decoded from the module buffer, possibly with allocation
// and possibly borrowing from the buffer.
trait Decodable<'a, A>: Sized
where
    A: Allocator,
{
    fn decode(decoder: &mut Decoder<'a>, alloc: &A) -> Result<Self, Error>;
}

// Types that can be decoded without allocation.
trait BoundedDecodable: Sized + Copy {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error>;
}

impl<'a, Bounded: BoundedDecodable, A: Allocator> Decodable<'a, A> for Bounded {
    fn decode(decoder: &mut Decoder<'a>, _: &A) -> Result<Self, Error> {
        <Self as BoundedDecodable>::decode(decoder)
    }
}

impl<'a, T, A> Decodable<'a, A> for Vec<T, A>
where
    T: Decodable<'a, A> + Contextual,
    A: Allocator,
{
    fn decode(decoder: &mut Decoder<'a>, alloc: &A) -> Result<Self, Error> {
        let len: u32 = decoder.read_bounded()?;

        // Each element occupies at least a byte, so a count exceeding what is
        // left is already known to be truncated. This also keeps a corrupt
        // count from driving a huge reservation.
        decoder.cursor.require_bytes(len as usize)?;

        let mut vec = Vec::new_in(alloc.clone());
        vec.try_reserve_exact(len as usize)?;
        for _ in 0..len {
            vec.push(decoder.read(alloc)?); // No allocation with previous reservation.
        }
        Ok(vec)
    }
}

/// Visitor pattern for processing custom sections during module decoding.
pub trait CustomSectionVisitor<'a> {
    /// Returns whether this visitor wants to process the custom section with
    /// the given name.
    fn should_visit(&self, name: &str) -> bool;
    /// Process a custom section. Only called if `should_visit` returned true.
    fn visit(&mut self, custom: CustomSection<'a>);
}

/// No-op implementation of `CustomSectionVisitor` that skips all custom
/// sections.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCustomSectionVisitor;

impl<'a> CustomSectionVisitor<'a> for NoCustomSectionVisitor {
    fn should_visit(&self, _: &str) -> bool {
        false
    }

    fn visit(&mut self, _: CustomSection<'a>) {}
}
