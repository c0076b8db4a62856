// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Decodable trait implementations for module-level types and sections.

use core::{ops, str};

use num_enum::TryFromPrimitive;

use crate::{Allocator, Module};
use crate::arena::Vec;
use crate::types::*;

use super::{
    BoundedDecodable, Boundary, ContextId, Contextual, Decodable, Decoder, Error, leb128,
};

macro_rules! impl_contextual {
    ([$($generics:tt)*] $type:ty, $id:path) => {
        impl<$($generics)*> Contextual for $type {
            const ID: ContextId = $id;
        }
    };
    ($type:ty, $id:path) => {
        impl Contextual for $type {
            const ID: ContextId = $id;
        }
    };
}

macro_rules! impl_decodable_for_u8_enum {
    ($type:ty) => {
        impl BoundedDecodable for $type {
            fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
                let byte = decoder.read_byte_raw()?;
                Self::try_from(byte).map_err(|_| Error::InvalidToken(byte))
            }
        }
    };
}

macro_rules! impl_decodable_for_le_u32_enum {
    ($type:ty, $make_err:path) => {
        impl BoundedDecodable for $type {
            fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
                let val = u32::from_le_bytes(decoder.cursor.read_array()?);
                Self::try_from(val).map_err(|_| $make_err(val))
            }
        }
    };
}

macro_rules! impl_decodable_for_newtype {
    ([$lifetime:lifetime] $type:ty) => {
        impl<$lifetime, A: Allocator> Decodable<$lifetime, A> for $type {
            fn decode(decoder: &mut Decoder<$lifetime>, alloc: &A) -> Result<Self, Error> {
                Ok(Self::new(<Self as ops::Deref>::Target::decode(
                    decoder, alloc,
                )?))
            }
        }
    };
    ($type:ident) => {
        impl BoundedDecodable for $type {
            fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
                Ok(Self::new(
                    <<Self as ops::Deref>::Target as BoundedDecodable>::decode(decoder)?,
                ))
            }
        }
    };
}

// The `\0asm` magic number, represented as an enum with one value to leverage
// existing "decode this u32 enum" machinery.
#[derive(Clone, Copy, Debug, TryFromPrimitive)]
#[repr(u32)]
enum Magic {
    Value = 0x6d_73_61_00,
}

#[derive(Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
enum LimitsToken {
    WithoutMax = 0x00,
    WithMax = 0x01,
}

#[derive(Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
enum ExternalKindToken {
    Function = 0x0,
    Table = 0x1,
    Memory = 0x2,
    Global = 0x3,
}

impl_contextual!(u8, ContextId::Byte);
impl_contextual!(u32, ContextId::U32);
impl_contextual!(i32, ContextId::I32);
impl_contextual!(i64, ContextId::I64);
impl_contextual!(f32, ContextId::F32);
impl_contextual!(f64, ContextId::F64);
impl_contextual!(Magic, ContextId::Magic);
impl_contextual!(Version, ContextId::Version);
impl_contextual!(ValueType, ContextId::ValType);
impl_contextual!(LimitsToken, ContextId::Limits);
impl_contextual!(ExternalKindToken, ContextId::Byte);
impl_contextual!(TypeIdx, ContextId::TypeIdx);
impl_contextual!(FuncIdx, ContextId::FuncIdx);
impl_contextual!(TableIdx, ContextId::TableIdx);
impl_contextual!(MemIdx, ContextId::MemIdx);
impl_contextual!(GlobalIdx, ContextId::GlobalIdx);
impl_contextual!(LocalIdx, ContextId::LocalIdx);
impl_contextual!(LabelIdx, ContextId::LabelIdx);
impl_contextual!(Limits, ContextId::Limits);
impl_contextual!(MemType, ContextId::MemType);
impl_contextual!(TableType, ContextId::TableType);
impl_contextual!(GlobalType, ContextId::GlobalType);
impl_contextual!(GlobalTypeMutability, ContextId::Mut);
impl_contextual!(InitExpr, ContextId::InitExpr);
impl_contextual!(BlockType, ContextId::BlockType);
impl_contextual!(MemArg, ContextId::MemArg);
impl_contextual!([A: Allocator] FunctionType<A>, ContextId::FuncType);
impl_contextual!(ImportDescriptor, ContextId::ImportDesc);
impl_contextual!(['a] Import<'a>, ContextId::Import);
impl_contextual!(Global, ContextId::Global);
impl_contextual!(ExportDescriptor, ContextId::ExportDesc);
impl_contextual!(['a] Export<'a>, ContextId::Export);
impl_contextual!(StartSection, ContextId::StartSec);
impl_contextual!([A: Allocator] ElementSegment<A>, ContextId::Elem);
impl_contextual!(['a] DataSegment<'a>, ContextId::Data);
impl_contextual!([A: Allocator] Locals<A>, ContextId::Locals);
impl_contextual!([A: Allocator] Vec<FuncIdx, A>, ContextId::VecFuncIdx);
impl_contextual!([A: Allocator] Vec<TypeIdx, A>, ContextId::FuncSec);
impl_contextual!([A: Allocator] Vec<FunctionType<A>, A>, ContextId::TypeSec);
impl_contextual!(['a, A: Allocator] Vec<Import<'a>, A>, ContextId::ImportSec);
impl_contextual!([A: Allocator] Vec<TableType, A>, ContextId::TableSec);
impl_contextual!([A: Allocator] Vec<MemType, A>, ContextId::MemorySec);
impl_contextual!([A: Allocator] Vec<Global, A>, ContextId::GlobalSec);
impl_contextual!(['a, A: Allocator] Vec<Export<'a>, A>, ContextId::ExportSec);
impl_contextual!([A: Allocator] Vec<ElementSegment<A>, A>, ContextId::ElemSec);
impl_contextual!(['a, A: Allocator] Vec<DataSegment<'a>, A>, ContextId::DataSec);
impl_contextual!([A: Allocator] TypeSection<A>, ContextId::TypeSec);
impl_contextual!(['a, A: Allocator] ImportSection<'a, A>, ContextId::ImportSec);
impl_contextual!([A: Allocator] FunctionSection<A>, ContextId::FuncSec);
impl_contextual!([A: Allocator] TableSection<A>, ContextId::TableSec);
impl_contextual!([A: Allocator] MemorySection<A>, ContextId::MemorySec);
impl_contextual!([A: Allocator] GlobalSection<A>, ContextId::GlobalSec);
impl_contextual!(['a, A: Allocator] ExportSection<'a, A>, ContextId::ExportSec);
impl_contextual!([A: Allocator] ElementSection<A>, ContextId::ElemSec);
impl_contextual!(['a, A: Allocator] DataSection<'a, A>, ContextId::DataSec);

impl_decodable_for_u8_enum!(LimitsToken);
impl_decodable_for_u8_enum!(ExternalKindToken);
impl_decodable_for_u8_enum!(GlobalTypeMutability);

impl_decodable_for_le_u32_enum!(Magic, Error::BadMagic);
impl_decodable_for_le_u32_enum!(Version, Error::UnsupportedVersion);

impl_decodable_for_newtype!(TypeIdx);
impl_decodable_for_newtype!(FuncIdx);
impl_decodable_for_newtype!(TableIdx);
impl_decodable_for_newtype!(MemIdx);
impl_decodable_for_newtype!(GlobalIdx);
impl_decodable_for_newtype!(LocalIdx);
impl_decodable_for_newtype!(LabelIdx);
impl_decodable_for_newtype!(MemType);
impl_decodable_for_newtype!(StartSection);
impl_decodable_for_newtype!(['a] TypeSection<A>);
impl_decodable_for_newtype!(['a] ImportSection<'a, A>);
impl_decodable_for_newtype!(['a] FunctionSection<A>);
impl_decodable_for_newtype!(['a] TableSection<A>);
impl_decodable_for_newtype!(['a] MemorySection<A>);
impl_decodable_for_newtype!(['a] GlobalSection<A>);
impl_decodable_for_newtype!(['a] ExportSection<'a, A>);
impl_decodable_for_newtype!(['a] ElementSection<A>);
impl_decodable_for_newtype!(['a] DataSection<'a, A>);

impl BoundedDecodable for u8 {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        decoder.read_byte_raw()
    }
}

impl BoundedDecodable for u32 {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        decoder.read_leb128_raw()
    }
}

impl BoundedDecodable for i32 {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        decoder.read_leb128_raw()
    }
}

impl BoundedDecodable for i64 {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        decoder.read_leb128_raw()
    }
}

impl BoundedDecodable for f32 {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        Ok(f32::from_le_bytes(decoder.cursor.read_array()?))
    }
}

impl BoundedDecodable for f64 {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        Ok(f64::from_le_bytes(decoder.cursor.read_array()?))
    }
}

// Type tags are single-byte signed varint7 values.
impl BoundedDecodable for ValueType {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        let value = leb128::read_signed(7, || decoder.cursor.read_byte())?;
        let tag = value as i8;
        Self::try_from(tag).map_err(|_| Error::InvalidTypeTag((tag as u8) & 0x7f))
    }
}

// Reads a type tag that must denote a value type.
fn read_numeric_type(decoder: &mut Decoder<'_>) -> Result<ValueType, Error> {
    let ty: ValueType = decoder.read_bounded()?;
    if ty.is_numeric() {
        Ok(ty)
    } else {
        Err(Error::InvalidTypeTag(ty.to_byte()))
    }
}

fn read_numeric_types<A: Allocator>(
    decoder: &mut Decoder<'_>,
    count: u32,
    alloc: &A,
) -> Result<Vec<ValueType, A>, Error> {
    decoder.cursor.require_bytes(count as usize)?;
    let mut types = Vec::new_in(alloc.clone());
    types.try_reserve_exact(count as usize)?;
    for _ in 0..count {
        types.push(read_numeric_type(decoder)?);
    }
    Ok(types)
}

impl<'a> Decoder<'a> {
    // Reads a length-prefixed UTF-8 name, borrowed from the module buffer.
    pub(crate) fn read_name(&mut self) -> Result<Name<'a>, Error> {
        self.with_context(ContextId::Name, |decoder| {
            let len: u32 = decoder.read_bounded()?;
            let bytes = decoder.read_bytes(len as usize)?;
            let name = str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)?;
            Ok(Name::new(name))
        })
    }
}

impl<'a, A: Allocator> Decodable<'a, A> for FunctionType<A> {
    fn decode(decoder: &mut Decoder<'a>, alloc: &A) -> Result<Self, Error> {
        let form: ValueType = decoder.read_bounded()?;
        if form != ValueType::Func {
            return Err(Error::InvalidTypeTag(form.to_byte()));
        }
        let parameters = decoder.with_context(ContextId::VecValType, |decoder| {
            let count: u32 = decoder.read_bounded()?;
            read_numeric_types(decoder, count, alloc)
        })?;
        let results = decoder.with_context(ContextId::ResultType, |decoder| {
            let count: u32 = decoder.read_bounded()?;
            if count > 1 {
                return Err(Error::UnsupportedResultCount(count));
            }
            read_numeric_types(decoder, count, alloc)
        })?;
        Ok(Self {
            parameters,
            results,
        })
    }
}

impl BoundedDecodable for Limits {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        let token: LimitsToken = decoder.read_bounded()?;
        let min: u32 = decoder.read_bounded()?;
        let max = match token {
            LimitsToken::WithoutMax => None,
            LimitsToken::WithMax => Some(decoder.read_bounded()?),
        };
        Ok(Self { min, max })
    }
}

impl BoundedDecodable for TableType {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        let element: ValueType = decoder.read_bounded()?;
        if element != ValueType::FuncRef {
            return Err(Error::InvalidTypeTag(element.to_byte()));
        }
        Ok(Self {
            element,
            limits: decoder.read_bounded()?,
        })
    }
}

impl BoundedDecodable for GlobalType {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        Ok(Self {
            value: read_numeric_type(decoder)?,
            mutability: decoder.read_bounded()?,
        })
    }
}

// A constant expression: a single constant or global read, then `end`.
impl BoundedDecodable for InitExpr {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        let byte = decoder.read_byte_raw()?;
        let expr = match Opcode::try_from(byte) {
            Ok(Opcode::I32Const) => InitExpr::I32Const(decoder.read_bounded()?),
            Ok(Opcode::I64Const) => InitExpr::I64Const(decoder.read_bounded()?),
            Ok(Opcode::F32Const) => InitExpr::F32Const(decoder.read_bounded()?),
            Ok(Opcode::F64Const) => InitExpr::F64Const(decoder.read_bounded()?),
            Ok(Opcode::GlobalGet) => InitExpr::GlobalGet(decoder.read_bounded()?),
            _ => return Err(Error::InvalidOpcode(byte)),
        };
        let end = decoder.read_byte_raw()?;
        if end != Opcode::End as u8 {
            return Err(Error::InvalidOpcode(end));
        }
        Ok(expr)
    }
}

impl BoundedDecodable for BlockType {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        match decoder.read_bounded()? {
            ValueType::EmptyBlock => Ok(BlockType::Empty),
            ty if ty.is_numeric() => Ok(BlockType::Result(ty)),
            ty => Err(Error::InvalidTypeTag(ty.to_byte())),
        }
    }
}

impl BoundedDecodable for MemArg {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        Ok(Self {
            align: decoder.read_bounded()?,
            offset: decoder.read_bounded()?,
        })
    }
}

impl BoundedDecodable for ImportDescriptor {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        type Token = ExternalKindToken;

        match decoder.read_bounded()? {
            Token::Function => Ok(ImportDescriptor::Function(decoder.read_bounded()?)),
            Token::Table => Ok(ImportDescriptor::Table(decoder.read_bounded()?)),
            Token::Memory => Ok(ImportDescriptor::Memory(decoder.read_bounded()?)),
            Token::Global => Ok(ImportDescriptor::Global(decoder.read_bounded()?)),
        }
    }
}

impl<'a, A: Allocator> Decodable<'a, A> for Import<'a> {
    fn decode(decoder: &mut Decoder<'a>, _: &A) -> Result<Self, Error> {
        Ok(Self {
            module: decoder.read_name()?,
            field: decoder.read_name()?,
            descriptor: decoder.read_bounded()?,
        })
    }
}

impl BoundedDecodable for Global {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        Ok(Self {
            ty: decoder.read_bounded()?,
            init: decoder.read_bounded()?,
        })
    }
}

impl BoundedDecodable for ExportDescriptor {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        type Token = ExternalKindToken;

        match decoder.read_bounded()? {
            Token::Function => Ok(ExportDescriptor::Function(decoder.read_bounded()?)),
            Token::Table => Ok(ExportDescriptor::Table(decoder.read_bounded()?)),
            Token::Memory => Ok(ExportDescriptor::Memory(decoder.read_bounded()?)),
            Token::Global => Ok(ExportDescriptor::Global(decoder.read_bounded()?)),
        }
    }
}

impl<'a, A: Allocator> Decodable<'a, A> for Export<'a> {
    fn decode(decoder: &mut Decoder<'a>, _: &A) -> Result<Self, Error> {
        Ok(Self {
            field: decoder.read_name()?,
            descriptor: decoder.read_bounded()?,
        })
    }
}

impl<'a, A: Allocator> Decodable<'a, A> for ElementSegment<A> {
    fn decode(decoder: &mut Decoder<'a>, alloc: &A) -> Result<Self, Error> {
        Ok(Self {
            table: decoder.read_bounded()?,
            offset: decoder.read_bounded()?,
            functions: decoder.read(alloc)?,
        })
    }
}

impl<'a, A: Allocator> Decodable<'a, A> for DataSegment<'a> {
    fn decode(decoder: &mut Decoder<'a>, _: &A) -> Result<Self, Error> {
        let memory = decoder.read_bounded()?;
        let offset = decoder.read_bounded()?;
        let len: u32 = decoder.read_bounded()?;
        Ok(Self {
            memory,
            offset,
            init: decoder.read_bytes(len as usize)?,
        })
    }
}

impl<'a, A: Allocator> Decodable<'a, A> for Locals<A> {
    fn decode(decoder: &mut Decoder<'a>, alloc: &A) -> Result<Self, Error> {
        let max_locals = decoder.config.max_locals_per_function;
        let num_groups: u32 = decoder.read_bounded()?;
        let mut locals = Vec::new_in(alloc.clone());
        for _ in 0..num_groups {
            let count: u32 = decoder.read_bounded()?;
            let local = read_numeric_type(decoder)?;
            let subtotal = locals.len() + (count as usize);
            if subtotal > max_locals {
                return Err(Error::TooManyLocals(subtotal));
            }
            locals.try_reserve_exact(count as usize)?;
            locals.resize(subtotal, local); // No allocation with previous reservation.
        }
        Ok(Locals::new(locals))
    }
}

// Validates the module header, returning the version.
pub(crate) fn decode_header(decoder: &mut Decoder<'_>) -> Result<Version, Error> {
    decoder.read_bounded::<Magic>()?;
    decoder.read_bounded()
}

// Frames the next section, leaving the cursor at the start of its contents.
pub(crate) fn decode_section_header(decoder: &mut Decoder<'_>) -> Result<SectionHeader, Error> {
    decoder.with_context(ContextId::SectionId, |decoder| {
        let byte: u8 = decoder.read_bounded()?;
        let id = SectionId::try_from(byte).map_err(|_| Error::UnknownSectionCode(byte))?;
        let len: u32 = decoder.read_bounded()?;
        decoder.cursor.require_bytes(len as usize)?;
        let start = decoder.offset();
        Ok(SectionHeader {
            id,
            range: ByteRange::new(start, start + len as usize),
        })
    })
}

// Decodes the contents of a known section into the module. Custom sections
// are left to the caller.
pub(crate) fn decode_section<'a, A: Allocator>(
    decoder: &mut Decoder<'a>,
    id: SectionId,
    module: &mut Module<'a, A>,
    alloc: &A,
) -> Result<(), Error> {
    match id {
        SectionId::Custom => {}
        SectionId::Type => module.typesec = decoder.read(alloc)?,
        SectionId::Import => module.importsec = decoder.read(alloc)?,
        SectionId::Function => module.funcsec = decoder.read(alloc)?,
        SectionId::Table => module.tablesec = decoder.read(alloc)?,
        SectionId::Memory => module.memsec = decoder.read(alloc)?,
        SectionId::Global => module.globalsec = decoder.read(alloc)?,
        SectionId::Export => module.exportsec = decoder.read(alloc)?,
        SectionId::Start => module.startsec = Some(decoder.read_bounded()?),
        SectionId::Element => module.elemsec = decoder.read(alloc)?,
        SectionId::Code => {
            let declared = module.funcsec.len() as u32;
            let imported = module.importsec.function_count();
            module.codesec = decode_code_section(decoder, declared, imported, alloc)?;
        }
        SectionId::Data => module.datasec = decoder.read(alloc)?,
    }
    Ok(())
}

// Decodes the code section into its table of contents: the byte range and
// locals of each body. The expressions themselves are left for lazy decoding.
//
// The function index space starts with the imported functions, so the body at
// position i is function `imported + i`.
pub(crate) fn decode_code_section<A: Allocator>(
    decoder: &mut Decoder<'_>,
    declared: u32,
    imported: u32,
    alloc: &A,
) -> Result<CodeSection<A>, Error> {
    decoder.with_context(ContextId::CodeSec, |decoder| {
        let count: u32 = decoder.read_bounded()?;
        if count != declared {
            return Err(Error::FunctionCountMismatch {
                declared,
                bodies: count,
            });
        }
        decoder.cursor.require_bytes(count as usize)?;

        let mut functions = Vec::new_in(alloc.clone());
        functions.try_reserve_exact(count as usize)?;
        for i in 0..count {
            let index = imported.checked_add(i).ok_or(Error::Overflow)?;
            let function = decoder.with_context(ContextId::Func, |decoder| {
                decode_function_entry(decoder, FuncIdx::new(index), alloc)
            })?;
            functions.push(function); // No allocation with previous reservation.
        }
        Ok(CodeSection::new(functions))
    })
}

fn decode_function_entry<A: Allocator>(
    decoder: &mut Decoder<'_>,
    index: FuncIdx,
    alloc: &A,
) -> Result<Function<A>, Error> {
    let size: u32 = decoder.read_bounded()?;
    let end = decoder.offset().saturating_add(size as usize);
    decoder.within(end, Boundary::Function, |decoder| {
        let locals = decoder.read(alloc)?;
        let range = ByteRange::new(decoder.offset(), end);
        decoder.cursor.seek(end)?;
        Ok(Function {
            body: FunctionBodyInfo { index, range },
            locals,
        })
    })
}
