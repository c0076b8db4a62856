// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Helpers for assembling binary modules by hand.

#![allow(dead_code, unreachable_pub)]

pub const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x0d, 0x00, 0x00, 0x00];

pub const I32: u8 = 0x7f;
pub const I64: u8 = 0x7e;
pub const FUNC: u8 = 0x60;
pub const EMPTY: u8 = 0x40;

pub fn uleb(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub fn sleb(mut value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub fn name(s: &str) -> Vec<u8> {
    let mut out = uleb(s.len() as u64);
    out.extend_from_slice(s.as_bytes());
    out
}

// A vector: its count followed by the concatenated entries.
pub fn vec(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut out = uleb(entries.len() as u64);
    for entry in entries {
        out.extend_from_slice(entry);
    }
    out
}

pub fn functype(params: &[u8], results: &[u8]) -> Vec<u8> {
    let mut out = vec![FUNC];
    out.extend(uleb(params.len() as u64));
    out.extend_from_slice(params);
    out.extend(uleb(results.len() as u64));
    out.extend_from_slice(results);
    out
}

// A function body: its size, the local groups, then the instructions (which
// must include the terminal `end`).
pub fn body(locals: &[(u32, u8)], code: &[u8]) -> Vec<u8> {
    let mut contents = uleb(locals.len() as u64);
    for &(count, ty) in locals {
        contents.extend(uleb(count.into()));
        contents.push(ty);
    }
    contents.extend_from_slice(code);
    let mut out = uleb(contents.len() as u64);
    out.extend(contents);
    out
}

/// Assembles a module section by section.
#[derive(Default)]
pub struct ModuleBuilder {
    sections: Vec<(u8, Vec<u8>)>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, id: u8, contents: Vec<u8>) -> Self {
        self.sections.push((id, contents));
        self
    }

    pub fn custom(self, section_name: &str, payload: &[u8]) -> Self {
        let mut contents = name(section_name);
        contents.extend_from_slice(payload);
        self.section(0, contents)
    }

    pub fn types(self, types: &[Vec<u8>]) -> Self {
        self.section(1, vec(types))
    }

    pub fn functions(self, type_indices: &[u32]) -> Self {
        let entries: Vec<_> = type_indices.iter().map(|&i| uleb(i.into())).collect();
        self.section(3, vec(&entries))
    }

    pub fn code(self, bodies: &[Vec<u8>]) -> Self {
        self.section(10, vec(bodies))
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = HEADER.to_vec();
        for (id, contents) in &self.sections {
            out.push(*id);
            out.extend(uleb(contents.len() as u64));
            out.extend_from_slice(contents);
        }
        out
    }

    // Builds the module with the declared length of the `index`-th section
    // adjusted by `delta`.
    pub fn build_with_length_delta(&self, index: usize, delta: i64) -> Vec<u8> {
        let mut out = HEADER.to_vec();
        for (i, (id, contents)) in self.sections.iter().enumerate() {
            out.push(*id);
            let len = contents.len() as i64 + if i == index { delta } else { 0 };
            out.extend(uleb(len as u64));
            out.extend_from_slice(contents);
        }
        out
    }
}

/// A module with a single `() -> i32` function with the given body code.
pub fn single_function(code: &[u8]) -> Vec<u8> {
    ModuleBuilder::new()
        .types(&[functype(&[], &[I32])])
        .functions(&[0])
        .code(&[body(&[], code)])
        .build()
}
