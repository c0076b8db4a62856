// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Reader configuration.

/// Implementation limits and options for a [`Reader`](crate::reader::Reader).
///
/// The format itself only bounds these quantities by 2^32 - 1, which is
/// unrealistically large; these are the limits actually enforced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReaderConfig {
    /// Maximum number of declared locals per function, summed across all
    /// local groups. Locals are expanded eagerly, so this also bounds the
    /// allocation a single body can demand.
    pub max_locals_per_function: usize,
    /// Maximum number of simultaneously open `block`, `loop` and `if`
    /// constructs within a function body.
    pub max_nesting_depth: usize,
    /// Maximum number of targets (excluding the default) in a `br_table`.
    pub max_br_table_targets: u32,
    /// Whether to decode the `name` custom section, when present.
    pub decode_names: bool,
}

impl ReaderConfig {
    pub const DEFAULT: Self = Self {
        max_locals_per_function: 50_000,
        max_nesting_depth: 1024,
        max_br_table_targets: 65_520,
        decode_names: true,
    };
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
