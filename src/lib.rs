// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A lazy reader for experimental (version 0xd) WebAssembly binary modules.
//!
//! Sections are decoded as they are reached, while function bodies are only
//! recorded as byte ranges and decoded on demand, one instruction at a time,
//! by a [`Reader`](reader::Reader). [`Module::decode`] runs the structural
//! pass over a whole module.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(nightly, feature(allocator_api))]

#[cfg(nightly)]
extern crate alloc;

pub mod arena;
pub mod config;
pub mod decode;
pub mod observe;
pub mod reader;
pub mod types;

mod cursor;

use core::fmt;

use arena::Vec;
use decode::{CustomSectionVisitor, ErrorWithContext, NAME_SECTION};
use reader::Reader;
use types::{
    CodeSection, DataSection, ElementSection, ExportSection, FuncIdx, Function, FunctionSection,
    FunctionType, GlobalSection, ImportDescriptor, ImportSection, MemorySection, NameSection,
    SectionId, StartSection, TableSection, TypeSection, Version,
};

/// A convenience trait that captures the required allocation-related trait
/// bounds.
pub trait Allocator: arena::Allocator + fmt::Debug + Clone {}

impl<A> Allocator for A where A: arena::Allocator + fmt::Debug + Clone {}

/// A WebAssembly module, with function bodies left undecoded.
///
/// Names and data segments borrow from the module buffer.
#[derive(Debug)]
pub struct Module<'a, A: Allocator> {
    /// Module version.
    pub version: Version,
    /// Function type declarations.
    pub typesec: TypeSection<A>,
    /// Import declarations.
    pub importsec: ImportSection<'a, A>,
    /// Function type indices.
    pub funcsec: FunctionSection<A>,
    /// Table declarations.
    pub tablesec: TableSection<A>,
    /// Memory declarations.
    pub memsec: MemorySection<A>,
    /// Global variable declarations.
    pub globalsec: GlobalSection<A>,
    /// Export declarations.
    pub exportsec: ExportSection<'a, A>,
    /// Start function index.
    pub startsec: Option<StartSection>,
    /// Element segments.
    pub elemsec: ElementSection<A>,
    /// Function body locations and locals.
    pub codesec: CodeSection<A>,
    /// Data segments.
    pub datasec: DataSection<'a, A>,
    /// Debug names, if a `name` section was present and decoded.
    pub names: Option<NameSection<'a, A>>,
}

impl<'a, A: Allocator> Module<'a, A> {
    // A module with every section empty.
    pub(crate) fn new_in(alloc: &A) -> Self {
        Self {
            version: Version::Experimental,
            typesec: TypeSection::new(Vec::new_in(alloc.clone())),
            importsec: ImportSection::new(Vec::new_in(alloc.clone())),
            funcsec: FunctionSection::new(Vec::new_in(alloc.clone())),
            tablesec: TableSection::new(Vec::new_in(alloc.clone())),
            memsec: MemorySection::new(Vec::new_in(alloc.clone())),
            globalsec: GlobalSection::new(Vec::new_in(alloc.clone())),
            exportsec: ExportSection::new(Vec::new_in(alloc.clone())),
            startsec: None,
            elemsec: ElementSection::new(Vec::new_in(alloc.clone())),
            codesec: CodeSection::new(Vec::new_in(alloc.clone())),
            datasec: DataSection::new(Vec::new_in(alloc.clone())),
            names: None,
        }
    }

    /// Decodes the module's sections, with a given allocator and a custom
    /// section visitor. Function bodies are located but not decoded; use a
    /// [`Reader`] to decode them.
    ///
    /// The `name` section is decoded into [`Module::names`] rather than handed
    /// to the visitor.
    pub fn decode<CustomSecVisitor: CustomSectionVisitor<'a>>(
        bytes: &'a [u8],
        customsec_visitor: &mut CustomSecVisitor,
        alloc: A,
    ) -> Result<Self, ErrorWithContext> {
        let mut reader = Reader::new(bytes, alloc);
        reader.initialize()?;
        while let Some(header) = reader.advance_to_next_section()? {
            if header.id == SectionId::Custom
                && let Some(custom) = reader.custom_section()
                && *custom.name != NAME_SECTION
                && customsec_visitor.should_visit(&custom.name)
            {
                customsec_visitor.visit(custom);
            }
            reader.process_current_section()?;
        }
        reader.into_module()
    }

    /// The module-defined function with the given index, if any. Imported
    /// functions have no body.
    pub fn function(&self, index: FuncIdx) -> Option<&Function<A>> {
        self.codesec.iter().find(|function| function.body.index == index)
    }

    /// The signature of the given function, imported or module-defined.
    pub fn function_type(&self, index: FuncIdx) -> Option<&FunctionType<A>> {
        let mut imported = self.importsec.iter().filter_map(|import| match import.descriptor {
            ImportDescriptor::Function(ty) => Some(ty),
            _ => None,
        });
        let imported_count = self.importsec.function_count();
        let ty = if *index < imported_count {
            imported.nth(*index as usize)?
        } else {
            *self.funcsec.get((*index - imported_count) as usize)?
        };
        self.typesec.get(*ty as usize)
    }
}
