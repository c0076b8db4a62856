// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Hooks for observing function body decoding.

use crate::types::Opcode;

/// Called once for every opcode decoded from a function body, in decode
/// order. The terminal `end` of a body is reported too.
pub trait OpcodeObserver {
    fn observe(&mut self, opcode: Opcode, offset: usize);
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpcodeObserver;

impl OpcodeObserver for NoOpcodeObserver {
    #[inline]
    fn observe(&mut self, _: Opcode, _: usize) {}
}

impl<O: OpcodeObserver + ?Sized> OpcodeObserver for &mut O {
    fn observe(&mut self, opcode: Opcode, offset: usize) {
        (**self).observe(opcode, offset);
    }
}

/// Counts decoded opcodes.
#[derive(Clone, Debug)]
pub struct OpcodeHistogram {
    counts: [u64; 256],
}

impl Default for OpcodeHistogram {
    fn default() -> Self {
        Self { counts: [0; 256] }
    }
}

impl OpcodeHistogram {
    /// How many times the given opcode was decoded.
    pub fn count(&self, opcode: Opcode) -> u64 {
        self.counts[opcode as usize]
    }

    /// The total number of opcodes decoded.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// The opcodes decoded at least once, with their counts, in opcode
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (Opcode, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .filter_map(|(byte, &count)| {
                Opcode::try_from(byte as u8)
                    .ok()
                    .map(|opcode| (opcode, count))
            })
    }
}

impl OpcodeObserver for OpcodeHistogram {
    fn observe(&mut self, opcode: Opcode, _: usize) {
        self.counts[opcode as usize] += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let mut histogram = OpcodeHistogram::default();
        for opcode in [Opcode::I32Const, Opcode::I32Const, Opcode::I32Add, Opcode::End] {
            histogram.observe(opcode, 0);
        }
        assert_eq!(histogram.count(Opcode::I32Const), 2);
        assert_eq!(histogram.count(Opcode::Nop), 0);
        assert_eq!(histogram.total(), 4);

        let seen: Vec<_> = histogram.iter().collect();
        assert_eq!(
            seen,
            [
                (Opcode::End, 1),
                (Opcode::I32Const, 2),
                (Opcode::I32Add, 1)
            ]
        );
    }

    #[test]
    fn test_observer_by_reference() {
        fn feed<O: OpcodeObserver>(mut observer: O) {
            observer.observe(Opcode::Nop, 3);
        }

        let mut histogram = OpcodeHistogram::default();
        feed(&mut histogram);
        feed(&mut histogram);
        assert_eq!(histogram.count(Opcode::Nop), 2);
    }
}
