// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Module-level type definitions.
//!
//! Everything the reader produces while walking the sections of a module:
//! value types, signatures, import/export descriptors, segments, and the
//! table of contents of function bodies awaiting lazy decoding. Strings and
//! byte blobs borrow directly from the source buffer.

mod instr;
pub use instr::*;

use num_enum::TryFromPrimitive;

use crate::Allocator;
use crate::arena::Vec;

// Defines a public newtype without public mutable access to the underlying
// type, along with some convenience trait implementations like Deref and AsRef.
macro_rules! newtype {
    (
        $(#[$meta:meta])*
        pub struct $type:ident<$($lifetime:lifetime, )? A: Allocator>($underlying:ty);
    ) => {
        $(#[$meta])*
        pub struct $type<$($lifetime, )? A: Allocator>($underlying);

        newtype!(@impl [$($lifetime, )? A: Allocator], $type<$($lifetime, )? A>, $underlying);
    };
    (
        $(#[$meta:meta])*
        pub struct $type:ident($underlying:ty);
    ) => {
        $(#[$meta])*
        pub struct $type($underlying);

        newtype!(@impl [], $type, $underlying);
    };
    (
        $(#[$meta:meta])*
        pub struct $type:ident<$lifetime:lifetime>($underlying:ty);
    ) => {
        $(#[$meta])*
        pub struct $type<$lifetime>($underlying);

        newtype!(@impl [$lifetime], $type<$lifetime>, $underlying);
    };
    (@impl [$($generic_params:tt)*], $qualified_type:ty, $underlying:ty) => {
        impl<$($generic_params)*> $qualified_type {
            pub fn new(value: $underlying) -> Self {
                Self(value)
            }
        }

        impl<$($generic_params)*> ::core::ops::Deref for $qualified_type {
            type Target = $underlying;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<$($generic_params)*> AsRef<$underlying> for $qualified_type {
            fn as_ref(&self) -> &$underlying {
                &self.0
            }
        }
    };
}

/// Module version.
///
/// Only the experimental pre-standard encoding is understood. Its section
/// layout, type tags and opcode table are the ones later frozen for 1.0, but
/// the version field itself differs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum Version {
    Experimental = 0x0d,
}

/// A half-open range of byte offsets into the module buffer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub const fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

newtype!(
    /// A UTF-8 name (of a module, field, function or local), borrowed from the
    /// module buffer.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Name<'a>(&'a str);
);

/// Value and signature type tags, encoded as single-byte signed varint7
/// values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(i8)]
pub enum ValueType {
    /// 32-bit integer (0x7f).
    I32 = -0x01,
    /// 64-bit integer (0x7e).
    I64 = -0x02,
    /// 32-bit floating point number (0x7d).
    F32 = -0x03,
    /// 64-bit floating point number (0x7c).
    F64 = -0x04,
    /// Untyped function reference, the only table element type (0x70).
    FuncRef = -0x10,
    /// Marks a function signature in the type section (0x60).
    Func = -0x20,
    /// Marks a block signature without a result (0x40).
    EmptyBlock = -0x40,
}

impl ValueType {
    /// Whether this is a type a value on the operand stack can have.
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::I32 | Self::I64 | Self::F32 | Self::F64)
    }

    /// The single-byte encoding of the tag.
    pub const fn to_byte(self) -> u8 {
        (self as i8 as u8) & 0x7f
    }
}

/// The signature of a function, mapping parameters to results.
#[derive(Clone, Debug)]
pub struct FunctionType<A: Allocator> {
    pub parameters: Vec<ValueType, A>,
    /// At most one result type.
    pub results: Vec<ValueType, A>,
}

/// The size range of a memory (# of pages) or table (# of elements).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limits {
    /// Minimum size.
    pub min: u32,
    /// Maximum size, with None indicating that there is no upper limit.
    pub max: Option<u32>,
}

newtype!(
    /// A linear memory type with its size limits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct MemType(Limits);
);

/// Table type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TableType {
    /// Type of the table's elements; always [`ValueType::FuncRef`].
    pub element: ValueType,
    /// Table size limits.
    pub limits: Limits,
}

/// The mutability of a global variable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum GlobalTypeMutability {
    /// Immutable.
    Const = 0x00,
    /// Mutable.
    Var = 0x01,
}

/// The type of a global variable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GlobalType {
    /// The (numeric) type of the global.
    pub value: ValueType,
    /// The mutability of the global.
    pub mutability: GlobalTypeMutability,
}

newtype!(
    /// An index into the type section.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
    pub struct TypeIdx(u32);
);

newtype!(
    /// An index into the function index space (imports first).
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
    pub struct FuncIdx(u32);
);

newtype!(
    /// An index into the table index space.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
    pub struct TableIdx(u32);
);

newtype!(
    /// An index into the memory index space.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
    pub struct MemIdx(u32);
);

newtype!(
    /// An index into the global index space.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
    pub struct GlobalIdx(u32);
);

newtype!(
    /// An index into a function's parameters and locals.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
    pub struct LocalIdx(u32);
);

newtype!(
    /// A relative branch depth: the number of enclosing structured constructs
    /// to exit, innermost being 0.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
    pub struct LabelIdx(u32);
);

/// A constant initializer expression, as used by globals and as segment
/// offsets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InitExpr {
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    GlobalGet(GlobalIdx),
}

/// Section identifier within a module.
///
/// The derived ordering of the non-custom IDs is the order in which the
/// sections must appear.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, TryFromPrimitive)]
#[repr(u8)]
pub enum SectionId {
    /// Custom section; the `name` section is the only one interpreted.
    Custom = 0,
    /// Function signature declarations.
    Type = 1,
    /// Import declarations.
    Import = 2,
    /// Signature indices for module-defined functions.
    Function = 3,
    /// Table declarations.
    Table = 4,
    /// Memory declarations.
    Memory = 5,
    /// Global declarations.
    Global = 6,
    /// Export declarations.
    Export = 7,
    /// Start function index.
    Start = 8,
    /// Element segments for table initialization.
    Element = 9,
    /// Function bodies.
    Code = 10,
    /// Data segments for memory initialization.
    Data = 11,
}

/// A framed section: its ID and the byte range of its contents (excluding
/// the ID and length prefix).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SectionHeader {
    pub id: SectionId,
    pub range: ByteRange,
}

/// A custom section, borrowed from the module buffer.
#[derive(Clone, Copy, Debug)]
pub struct CustomSection<'a> {
    /// Section name.
    pub name: Name<'a>,
    /// Section content following the name.
    pub bytes: &'a [u8],
}

newtype!(
    /// Section containing function signature declarations.
    #[derive(Clone, Debug)]
    pub struct TypeSection<A: Allocator>(Vec<FunctionType<A>, A>);
);

/// Import descriptor types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImportDescriptor {
    /// Import a function with the given signature index.
    Function(TypeIdx),
    /// Import a table with the given type.
    Table(TableType),
    /// Import a memory with the given type.
    Memory(MemType),
    /// Import a global with the given type.
    Global(GlobalType),
}

/// An import declaration.
#[derive(Clone, Copy, Debug)]
pub struct Import<'a> {
    /// Name of the module to import from.
    pub module: Name<'a>,
    /// Name of the imported entity.
    pub field: Name<'a>,
    /// Kind and type of the imported entity.
    pub descriptor: ImportDescriptor,
}

newtype!(
    /// Section containing import declarations.
    #[derive(Debug)]
    pub struct ImportSection<'a, A: Allocator>(Vec<Import<'a>, A>);
);

impl<A: Allocator> ImportSection<'_, A> {
    /// The number of imported functions, which precede module-defined
    /// functions in the function index space.
    pub fn function_count(&self) -> u32 {
        self.0
            .iter()
            .filter(|import| matches!(import.descriptor, ImportDescriptor::Function(_)))
            .count() as u32
    }
}

newtype!(
    /// Section containing signature indices for module-defined functions.
    #[derive(Clone, Debug)]
    pub struct FunctionSection<A: Allocator>(Vec<TypeIdx, A>);
);

newtype!(
    /// Section containing table type declarations.
    #[derive(Clone, Debug)]
    pub struct TableSection<A: Allocator>(Vec<TableType, A>);
);

newtype!(
    /// Section containing linear memory type declarations.
    #[derive(Clone, Debug)]
    pub struct MemorySection<A: Allocator>(Vec<MemType, A>);
);

/// A global declaration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Global {
    /// Global type and mutability.
    pub ty: GlobalType,
    /// Initialization expression.
    pub init: InitExpr,
}

newtype!(
    /// Section containing global variable declarations.
    #[derive(Clone, Debug)]
    pub struct GlobalSection<A: Allocator>(Vec<Global, A>);
);

/// Describes what kind of entity is being exported.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExportDescriptor {
    /// Export a function with the given index.
    Function(FuncIdx),
    /// Export a table with the given index.
    Table(TableIdx),
    /// Export a memory with the given index.
    Memory(MemIdx),
    /// Export a global with the given index.
    Global(GlobalIdx),
}

/// An export declaration.
#[derive(Clone, Copy, Debug)]
pub struct Export<'a> {
    /// Name of the exported entity.
    pub field: Name<'a>,
    /// Kind and index of the exported entity.
    pub descriptor: ExportDescriptor,
}

newtype!(
    /// Section containing export declarations.
    #[derive(Debug)]
    pub struct ExportSection<'a, A: Allocator>(Vec<Export<'a>, A>);
);

newtype!(
    /// Holds the index of the start function.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct StartSection(FuncIdx);
);

/// An element segment, initializing a range of a table with function
/// indices.
#[derive(Clone, Debug)]
pub struct ElementSegment<A: Allocator> {
    /// Index of the table to initialize.
    pub table: TableIdx,
    /// Expression computing the offset within the table.
    pub offset: InitExpr,
    /// The functions to place in the table.
    pub functions: Vec<FuncIdx, A>,
}

newtype!(
    /// Section containing element segments.
    #[derive(Clone, Debug)]
    pub struct ElementSection<A: Allocator>(Vec<ElementSegment<A>, A>);
);

newtype!(
    /// The types of a function's declared locals, with run-length groups
    /// expanded. Parameters are not included.
    #[derive(Clone, Debug)]
    pub struct Locals<A: Allocator>(Vec<ValueType, A>);
);

/// Locates a function body awaiting decoding.
///
/// The range covers the body's instructions, starting after the local
/// declarations and ending just past the body's terminal `end`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FunctionBodyInfo {
    /// The function's index in the function index space.
    pub index: FuncIdx,
    /// The byte range of the body's instructions.
    pub range: ByteRange,
}

/// A module-defined function as recorded by the code section's table of
/// contents.
#[derive(Clone, Debug)]
pub struct Function<A: Allocator> {
    /// Where to find the function's body.
    pub body: FunctionBodyInfo,
    /// Local variable declarations.
    pub locals: Locals<A>,
}

newtype!(
    /// Section containing function bodies, not yet decoded.
    #[derive(Clone, Debug)]
    pub struct CodeSection<A: Allocator>(Vec<Function<A>, A>);
);

/// A data segment for initializing linear memory.
#[derive(Clone, Copy, Debug)]
pub struct DataSegment<'a> {
    /// Index of the memory to initialize.
    pub memory: MemIdx,
    /// Expression computing the offset within the memory.
    pub offset: InitExpr,
    /// The initial data bytes, borrowed from the module buffer.
    pub init: &'a [u8],
}

newtype!(
    /// Section containing data segments.
    #[derive(Debug)]
    pub struct DataSection<'a, A: Allocator>(Vec<DataSegment<'a>, A>);
);

/// Debug names for a function and its locals.
#[derive(Debug)]
pub struct FunctionName<'a, A: Allocator> {
    /// The named function.
    pub index: FuncIdx,
    /// The function's name.
    pub name: Name<'a>,
    /// Names of the function's locals (parameters included), in index order.
    pub locals: Vec<Name<'a>, A>,
}

newtype!(
    /// The contents of the `name` custom section, as far as it could be
    /// decoded.
    #[derive(Debug)]
    pub struct NameSection<'a, A: Allocator>(Vec<FunctionName<'a, A>, A>);
);

impl<'a, A: Allocator> NameSection<'a, A> {
    /// Looks up the name of the given function.
    pub fn function_name(&self, index: FuncIdx) -> Option<Name<'a>> {
        self.0
            .iter()
            .find(|entry| entry.index == index)
            .map(|entry| entry.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_tags() {
        assert_eq!(ValueType::try_from(-1i8).ok(), Some(ValueType::I32));
        assert_eq!(ValueType::try_from(-2i8).ok(), Some(ValueType::I64));
        assert_eq!(ValueType::try_from(-3i8).ok(), Some(ValueType::F32));
        assert_eq!(ValueType::try_from(-4i8).ok(), Some(ValueType::F64));
        assert_eq!(ValueType::try_from(-0x10i8).ok(), Some(ValueType::FuncRef));
        assert_eq!(ValueType::try_from(-0x20i8).ok(), Some(ValueType::Func));
        assert_eq!(ValueType::try_from(-0x40i8).ok(), Some(ValueType::EmptyBlock));
        assert!(ValueType::try_from(-5i8).is_err());
        assert!(ValueType::try_from(0i8).is_err());
    }

    #[test]
    fn test_value_type_bytes() {
        assert_eq!(ValueType::I32.to_byte(), 0x7f);
        assert_eq!(ValueType::I64.to_byte(), 0x7e);
        assert_eq!(ValueType::F32.to_byte(), 0x7d);
        assert_eq!(ValueType::F64.to_byte(), 0x7c);
        assert_eq!(ValueType::FuncRef.to_byte(), 0x70);
        assert_eq!(ValueType::Func.to_byte(), 0x60);
        assert_eq!(ValueType::EmptyBlock.to_byte(), 0x40);
    }

    #[test]
    fn test_numeric_types() {
        assert!(ValueType::I32.is_numeric());
        assert!(ValueType::F64.is_numeric());
        assert!(!ValueType::FuncRef.is_numeric());
        assert!(!ValueType::EmptyBlock.is_numeric());
    }

    #[test]
    fn test_section_order() {
        assert!(SectionId::Type < SectionId::Import);
        assert!(SectionId::Code < SectionId::Data);
        assert!(SectionId::Element < SectionId::Code);
    }

    #[test]
    fn test_byte_range() {
        let outer = ByteRange::new(8, 20);
        assert_eq!(outer.len(), 12);
        assert!(ByteRange::new(3, 3).is_empty());
    }
}
