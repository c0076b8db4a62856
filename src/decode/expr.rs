// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Lazy, pull-based decoding of function bodies.
//!
//! A body is decoded one instruction at a time into a [`NodeArena`]. Nesting
//! of structured constructs is tracked as instructions are pulled, so that
//! every `else` and `end` is matched with the construct it belongs to and
//! every branch is resolved to the construct it targets.

use num_enum::TryFromPrimitive;

use crate::Allocator;
use crate::arena::{NodeArena, NodeId, Vec};
use crate::config::ReaderConfig;
use crate::cursor::Cursor;
use crate::observe::OpcodeObserver;
use crate::types::{
    BrTableTargets, BranchTarget, ByteRange, Constant, FunctionBodyInfo, LabelIdx, Node, NodeKind,
    Opcode, OperandType,
};

use super::{Boundary, ContextId, Decoder, Error, ErrorWithContext};

// Decoding state of the function body currently being read.
pub(crate) struct FunctionState<'a, A: Allocator> {
    info: FunctionBodyInfo,
    decoder: Decoder<'a>,
    // Offset of the body's terminal `end`.
    code_end: usize,
    // The open `block`, `loop` and `if` nodes, innermost last.
    constructs: Vec<NodeId, A>,
    complete: bool,
}

impl<'a, A: Allocator> FunctionState<'a, A> {
    pub(crate) fn new(
        bytes: &'a [u8],
        info: FunctionBodyInfo,
        config: ReaderConfig,
        alloc: A,
        observer: &mut impl OpcodeObserver,
    ) -> Result<Self, Error> {
        let ByteRange { start, end } = info.range;
        if end > bytes.len() {
            return Err(Error::Truncated {
                boundary: Boundary::Module,
                needed: end - bytes.len(),
            });
        }
        if start >= end || bytes[end - 1] != Opcode::End as u8 {
            return Err(Error::StructuralImbalance { depth: 0 });
        }

        let cursor = Cursor::with_range(bytes, info.range, Boundary::Function);
        let mut state = Self {
            info,
            decoder: Decoder::new(cursor, config),
            code_end: end - 1,
            constructs: Vec::new_in(alloc),
            complete: false,
        };

        // A body consisting only of its terminal `end` is complete from the
        // outset.
        state.consume_terminal_end(observer)?;
        Ok(state)
    }

    pub(crate) fn info(&self) -> FunctionBodyInfo {
        self.info
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    pub(crate) fn offset(&self) -> usize {
        self.decoder.offset()
    }

    // The number of currently open constructs.
    pub(crate) fn depth(&self) -> usize {
        self.constructs.len()
    }

    pub(crate) fn error(&self, error: Error) -> ErrorWithContext {
        self.decoder.error(error)
    }

    // Decodes the next instruction into the arena.
    pub(crate) fn read_node<O: OpcodeObserver>(
        &mut self,
        arena: &mut NodeArena<A>,
        observer: &mut O,
    ) -> Result<NodeId, Error> {
        if self.complete {
            return Err(Error::InvalidState {
                operation: "read_next",
            });
        }
        if self.decoder.offset() == self.code_end {
            return Err(Error::StructuralImbalance {
                depth: self.depth(),
            });
        }

        let Self {
            decoder,
            constructs,
            ..
        } = self;
        let id = decoder.with_context(ContextId::FuncBody, |decoder| {
            decoder.with_context(ContextId::Opcode, |decoder| {
                read_instruction(decoder, constructs, arena, &mut *observer)
            })
        })?;

        let offset = self.decoder.offset();
        if offset > self.code_end {
            // An operand ran into the terminal `end`.
            return Err(Error::Truncated {
                boundary: Boundary::Function,
                needed: offset - self.code_end,
            });
        }
        self.consume_terminal_end(observer)?;
        Ok(id)
    }

    // The terminal `end` is consumed along with the instruction preceding it,
    // once all constructs are closed.
    fn consume_terminal_end(&mut self, observer: &mut impl OpcodeObserver) -> Result<(), Error> {
        let offset = self.decoder.offset();
        if offset == self.code_end && self.constructs.is_empty() {
            self.decoder.skip_bytes(1)?;
            observer.observe(Opcode::End, offset);
            self.complete = true;
        }
        Ok(())
    }
}

fn read_instruction<A: Allocator, O: OpcodeObserver>(
    decoder: &mut Decoder<'_>,
    constructs: &mut Vec<NodeId, A>,
    arena: &mut NodeArena<A>,
    observer: &mut O,
) -> Result<NodeId, Error> {
    let offset = decoder.offset();
    let byte = decoder.read_byte_raw()?;
    let opcode = Opcode::try_from_primitive(byte).map_err(|_| Error::InvalidOpcode(byte))?;
    observer.observe(opcode, offset);

    let kind = match opcode.operand_type() {
        OperandType::None => match opcode {
            Opcode::Else => NodeKind::Else {
                construct: *constructs
                    .last()
                    .ok_or(Error::StructuralImbalance { depth: 0 })?,
            },
            Opcode::End => NodeKind::End {
                construct: constructs
                    .pop()
                    .ok_or(Error::StructuralImbalance { depth: 0 })?,
            },
            _ => NodeKind::Plain,
        },
        OperandType::BlockType => {
            let limit = decoder.config.max_nesting_depth;
            if constructs.len() >= limit {
                return Err(Error::ExcessiveNesting { limit });
            }
            NodeKind::Block(decoder.read_bounded()?)
        }
        OperandType::Label => {
            let depth: LabelIdx = decoder.read_bounded()?;
            NodeKind::Branch {
                depth,
                target: resolve_branch(constructs, depth)?,
            }
        }
        OperandType::BrTable => NodeKind::BrTable(read_br_table(decoder, constructs, arena)?),
        OperandType::FuncIdx => NodeKind::Call(decoder.read_bounded()?),
        OperandType::CallIndirect => {
            let ty = decoder.read_bounded()?;
            decoder.read_zero_byte()?;
            NodeKind::CallIndirect(ty)
        }
        OperandType::LocalIdx => NodeKind::Local(decoder.read_bounded()?),
        OperandType::GlobalIdx => NodeKind::Global(decoder.read_bounded()?),
        OperandType::MemArg => NodeKind::Memory(decoder.read_bounded()?),
        OperandType::Reserved => {
            decoder.read_zero_byte()?;
            NodeKind::Plain
        }
        OperandType::I32 => NodeKind::Const(Constant::I32(decoder.read_bounded()?)),
        OperandType::I64 => NodeKind::Const(Constant::I64(decoder.read_bounded()?)),
        OperandType::F32 => NodeKind::Const(Constant::F32(decoder.read_bounded()?)),
        OperandType::F64 => NodeKind::Const(Constant::F64(decoder.read_bounded()?)),
    };

    let id = arena.push_node(Node {
        opcode,
        offset,
        kind,
    })?;
    if opcode.opens_construct() {
        constructs.try_reserve(1)?;
        constructs.push(id);
    }
    Ok(id)
}

// Resolves a relative branch depth against the open constructs. A depth equal
// to the nesting targets the function body itself.
fn resolve_branch(constructs: &[NodeId], depth: LabelIdx) -> Result<BranchTarget, Error> {
    let nesting = constructs.len();
    let relative = *depth as usize;
    if relative < nesting {
        Ok(BranchTarget::Construct(constructs[nesting - 1 - relative]))
    } else if relative == nesting {
        Ok(BranchTarget::Function)
    } else {
        Err(Error::InvalidBranchDepth {
            depth: *depth,
            nesting: nesting as u32,
        })
    }
}

fn read_br_table<A: Allocator>(
    decoder: &mut Decoder<'_>,
    constructs: &[NodeId],
    arena: &mut NodeArena<A>,
) -> Result<BrTableTargets, Error> {
    decoder.with_context(ContextId::BrTableOperands, |decoder| {
        let count: u32 = decoder.read_bounded()?;
        if count > decoder.config.max_br_table_targets {
            return Err(Error::TooManyBranchTargets(count));
        }
        // Each target and the default take at least a byte.
        decoder.cursor.require_bytes(count as usize + 1)?;

        arena.reserve_labels(count as usize)?;
        let start = arena.label_count();
        for _ in 0..count {
            let depth: LabelIdx = decoder.read_bounded()?;
            resolve_branch(constructs, depth)?;
            arena.push_label(depth)?;
        }
        let default: LabelIdx = decoder.read_bounded()?;
        resolve_branch(constructs, default)?;
        Ok(BrTableTargets {
            targets: arena.labels_since(start),
            default,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Global;
    use crate::observe::{NoOpcodeObserver, OpcodeHistogram};
    use crate::types::{BlockType, FuncIdx, MemArg, TypeIdx, ValueType};

    struct Body<'a> {
        state: FunctionState<'a, Global>,
        arena: NodeArena<Global>,
    }

    impl<'a> Body<'a> {
        fn new(bytes: &'a [u8]) -> Result<Self, Error> {
            Self::with_config(bytes, ReaderConfig::default())
        }

        fn with_config(bytes: &'a [u8], config: ReaderConfig) -> Result<Self, Error> {
            let info = FunctionBodyInfo {
                index: FuncIdx::new(0),
                range: ByteRange::new(0, bytes.len()),
            };
            Ok(Self {
                state: FunctionState::new(bytes, info, config, Global, &mut NoOpcodeObserver)?,
                arena: NodeArena::new_in(Global),
            })
        }

        // The handle of the node decoded `index`-th.
        fn id(&self, index: usize) -> NodeId {
            self.arena.iter().nth(index).unwrap().0
        }

        fn next(&mut self) -> Result<Node, Error> {
            let id = self.state.read_node(&mut self.arena, &mut NoOpcodeObserver)?;
            Ok(*self.arena.get(id).unwrap())
        }

        // Reads until completion, returning the node kinds.
        fn read_all(&mut self) -> Result<std::vec::Vec<NodeKind>, Error> {
            let mut kinds = std::vec::Vec::new();
            while !self.state.is_complete() {
                kinds.push(self.next()?.kind);
            }
            Ok(kinds)
        }
    }

    #[test]
    fn test_single_constant() {
        let bytes = [0x41, 0x2a, 0x0b]; // i32.const 42; end
        let mut body = Body::new(&bytes).unwrap();
        assert!(!body.state.is_complete());

        let node = body.next().unwrap();
        assert_eq!(node.opcode, Opcode::I32Const);
        assert_eq!(node.offset, 0);
        assert_eq!(node.kind, NodeKind::Const(Constant::I32(42)));
        assert_eq!(Constant::I32(42).value_type(), ValueType::I32);

        assert!(body.state.is_complete());
        assert_eq!(body.state.offset(), 3);
        assert_eq!(body.arena.len(), 1);
        assert_eq!(
            body.next(),
            Err(Error::InvalidState {
                operation: "read_next"
            })
        );
    }

    #[test]
    fn test_empty_body_is_complete() {
        let body = Body::new(&[0x0b]).unwrap();
        assert!(body.state.is_complete());
        assert!(body.arena.is_empty());
    }

    #[test]
    fn test_missing_terminal_end() {
        assert_eq!(
            Body::new(&[0x41, 0x00]).err(),
            Some(Error::StructuralImbalance { depth: 0 })
        );
        assert_eq!(
            Body::new(&[]).err(),
            Some(Error::StructuralImbalance { depth: 0 })
        );
    }

    #[test]
    fn test_block_nesting() {
        // block (result i32); loop; nop; end; i32.const 1; end; drop; end
        let bytes = [
            0x02, 0x7f, 0x03, 0x40, 0x01, 0x0b, 0x41, 0x01, 0x0b, 0x1a, 0x0b,
        ];
        let mut body = Body::new(&bytes).unwrap();

        let block = body.next().unwrap();
        assert_eq!(block.kind, NodeKind::Block(BlockType::Result(ValueType::I32)));
        let lp = body.next().unwrap();
        assert_eq!(lp.kind, NodeKind::Block(BlockType::Empty));
        assert_eq!(body.state.depth(), 2);

        assert_eq!(body.next().unwrap().kind, NodeKind::Plain);
        assert_eq!(
            body.next().unwrap().kind,
            NodeKind::End {
                construct: body.id(1)
            }
        );
        assert_eq!(body.state.depth(), 1);
        body.next().unwrap();
        assert_eq!(
            body.next().unwrap().kind,
            NodeKind::End {
                construct: body.id(0)
            }
        );
        assert_eq!(body.state.depth(), 0);
        assert!(!body.state.is_complete());
        assert_eq!(body.next().unwrap().opcode, Opcode::Drop);
        assert!(body.state.is_complete());
    }

    #[test]
    fn test_unclosed_construct() {
        // block; nop; end (terminal)
        let mut body = Body::new(&[0x02, 0x40, 0x01, 0x0b]).unwrap();
        body.next().unwrap();
        body.next().unwrap();
        assert!(!body.state.is_complete());
        assert_eq!(
            body.next(),
            Err(Error::StructuralImbalance { depth: 1 })
        );
    }

    #[test]
    fn test_stray_end_and_else() {
        // nop; end; end
        let mut body = Body::new(&[0x01, 0x0b, 0x0b]).unwrap();
        body.next().unwrap();
        assert_eq!(
            body.next(),
            Err(Error::StructuralImbalance { depth: 0 })
        );

        // else; end
        let mut body = Body::new(&[0x05, 0x0b]).unwrap();
        assert_eq!(
            body.next(),
            Err(Error::StructuralImbalance { depth: 0 })
        );
    }

    #[test]
    fn test_if_else() {
        // get_local 0; if (result i32); i32.const 1; else; i32.const 2; end; end
        let bytes = [
            0x20, 0x00, 0x04, 0x7f, 0x41, 0x01, 0x05, 0x41, 0x02, 0x0b, 0x0b,
        ];
        let mut body = Body::new(&bytes).unwrap();
        let kinds = body.read_all().unwrap();
        // The terminal `end` is not a node.
        assert_eq!(kinds.len(), 6);
        let if_id = body.id(1);
        assert_eq!(kinds[3], NodeKind::Else { construct: if_id });
        assert_eq!(kinds[5], NodeKind::End { construct: if_id });
    }

    #[test]
    fn test_branch_resolution() {
        // block; loop; br 1; br_if 0; br 2; end; end; end
        let bytes = [
            0x02, 0x40, 0x03, 0x40, 0x0c, 0x01, 0x0d, 0x00, 0x0c, 0x02, 0x0b, 0x0b, 0x0b,
        ];
        let mut body = Body::new(&bytes).unwrap();
        let kinds = body.read_all().unwrap();
        let block = body.id(0);
        let lp = body.id(1);
        assert_eq!(
            kinds[2],
            NodeKind::Branch {
                depth: LabelIdx::new(1),
                target: BranchTarget::Construct(block)
            }
        );
        assert_eq!(
            kinds[3],
            NodeKind::Branch {
                depth: LabelIdx::new(0),
                target: BranchTarget::Construct(lp)
            }
        );
        assert_eq!(
            kinds[4],
            NodeKind::Branch {
                depth: LabelIdx::new(2),
                target: BranchTarget::Function
            }
        );
    }

    #[test]
    fn test_branch_too_deep() {
        // block; br 2; end; end
        let mut body = Body::new(&[0x02, 0x40, 0x0c, 0x02, 0x0b, 0x0b]).unwrap();
        body.next().unwrap();
        assert_eq!(
            body.next(),
            Err(Error::InvalidBranchDepth {
                depth: 2,
                nesting: 1
            })
        );
    }

    #[test]
    fn test_br_table() {
        // block; block; block; get_local 0; br_table [0, 1] 3; end; end; end; end
        let bytes = [
            0x02, 0x40, 0x02, 0x40, 0x02, 0x40, 0x20, 0x00, 0x0e, 0x02, 0x00, 0x01, 0x03, 0x0b,
            0x0b, 0x0b, 0x0b,
        ];
        let mut body = Body::new(&bytes).unwrap();
        let kinds = body.read_all().unwrap();
        let NodeKind::BrTable(table) = kinds[4] else {
            panic!("expected br_table; got {:?}", kinds[4]);
        };
        assert_eq!(table.default, LabelIdx::new(3));
        let targets = body.arena.labels(table.targets).unwrap();
        assert_eq!(targets, [LabelIdx::new(0), LabelIdx::new(1)]);
    }

    #[test]
    fn test_br_table_limits() {
        let config = ReaderConfig {
            max_br_table_targets: 1,
            ..ReaderConfig::default()
        };
        // br_table [0, 0] 0; end
        let mut body = Body::with_config(&[0x0e, 0x02, 0x00, 0x00, 0x00, 0x0b], config).unwrap();
        assert_eq!(body.next(), Err(Error::TooManyBranchTargets(2)));

        // br_table [1] 0; end
        let mut body = Body::new(&[0x0e, 0x01, 0x01, 0x00, 0x0b]).unwrap();
        assert_eq!(
            body.next(),
            Err(Error::InvalidBranchDepth {
                depth: 1,
                nesting: 0
            })
        );
    }

    #[test]
    fn test_memory_and_calls() {
        let bytes = [
            0x28, 0x02, 0x10, // i32.load align=2 offset=16
            0x10, 0x05, // call 5
            0x11, 0x01, 0x00, // call_indirect type 1
            0x3f, 0x00, // current_memory
            0x1a, 0x0b,
        ];
        let mut body = Body::new(&bytes).unwrap();
        let kinds = body.read_all().unwrap();
        assert_eq!(
            kinds[..4],
            [
                NodeKind::Memory(MemArg {
                    align: 2,
                    offset: 16
                }),
                NodeKind::Call(FuncIdx::new(5)),
                NodeKind::CallIndirect(TypeIdx::new(1)),
                NodeKind::Plain,
            ]
        );
    }

    #[test]
    fn test_reserved_bytes_must_be_zero() {
        let mut body = Body::new(&[0x11, 0x00, 0x01, 0x0b]).unwrap();
        assert_eq!(body.next(), Err(Error::InvalidToken(1)));

        let mut body = Body::new(&[0x40, 0x02, 0x0b]).unwrap();
        assert_eq!(body.next(), Err(Error::InvalidToken(2)));
    }

    #[test]
    fn test_float_constants() {
        let mut bytes = std::vec![0x43];
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        bytes.push(0x44);
        bytes.extend_from_slice(&(-2.25f64).to_le_bytes());
        bytes.extend_from_slice(&[0x1a, 0x1a, 0x0b]);
        let mut body = Body::new(&bytes).unwrap();
        let kinds = body.read_all().unwrap();
        assert_eq!(kinds[0], NodeKind::Const(Constant::F32(1.5)));
        assert_eq!(kinds[1], NodeKind::Const(Constant::F64(-2.25)));
    }

    #[test]
    fn test_invalid_opcode() {
        let mut body = Body::new(&[0xc0, 0x0b]).unwrap();
        assert_eq!(body.next(), Err(Error::InvalidOpcode(0xc0)));
    }

    #[test]
    fn test_operand_running_into_terminal_end() {
        // i32.const whose LEB128 continuation swallows the terminal end.
        let mut body = Body::new(&[0x41, 0x80, 0x0b]).unwrap();
        assert_eq!(
            body.next(),
            Err(Error::Truncated {
                boundary: Boundary::Function,
                needed: 1
            })
        );
    }

    #[test]
    fn test_excessive_nesting() {
        let config = ReaderConfig {
            max_nesting_depth: 2,
            ..ReaderConfig::default()
        };
        let bytes = [0x02, 0x40, 0x02, 0x40, 0x02, 0x40, 0x0b, 0x0b, 0x0b, 0x0b];
        let mut body = Body::with_config(&bytes, config).unwrap();
        body.next().unwrap();
        body.next().unwrap();
        assert_eq!(body.next(), Err(Error::ExcessiveNesting { limit: 2 }));
    }

    #[test]
    fn test_observer_sees_every_opcode() {
        let bytes = [0x41, 0x01, 0x41, 0x02, 0x6a, 0x1a, 0x0b];
        let info = FunctionBodyInfo {
            index: FuncIdx::new(0),
            range: ByteRange::new(0, bytes.len()),
        };
        let mut histogram = OpcodeHistogram::default();
        let mut state =
            FunctionState::new(&bytes, info, ReaderConfig::default(), Global, &mut histogram)
                .unwrap();
        let mut arena = NodeArena::new_in(Global);
        while !state.is_complete() {
            state.read_node(&mut arena, &mut histogram).unwrap();
        }
        assert_eq!(histogram.count(Opcode::I32Const), 2);
        assert_eq!(histogram.count(Opcode::I32Add), 1);
        assert_eq!(histogram.count(Opcode::End), 1);
        assert_eq!(histogram.total(), 5);
        assert_eq!(arena.len(), 4);
    }

    #[test]
    fn test_observer_sees_terminal_end_of_empty_body() {
        let bytes = [0x0b];
        let info = FunctionBodyInfo {
            index: FuncIdx::new(0),
            range: ByteRange::new(0, bytes.len()),
        };
        let mut histogram = OpcodeHistogram::default();
        let state =
            FunctionState::new(&bytes, info, ReaderConfig::default(), Global, &mut histogram)
                .unwrap();
        assert!(state.is_complete());
        assert_eq!(histogram.count(Opcode::End), 1);
        assert_eq!(histogram.total(), 1);
    }

    #[test]
    fn test_error_context() {
        // block; br_table [5] 0; end; end
        let mut body = Body::new(&[0x02, 0x40, 0x0e, 0x01, 0x05, 0x00, 0x0b, 0x0b]).unwrap();
        body.next().unwrap();
        let error = body.next().unwrap_err();
        assert_eq!(
            error,
            Error::InvalidBranchDepth {
                depth: 5,
                nesting: 1
            }
        );
        let err = body.state.error(error);
        let frames: std::vec::Vec<_> = err.context().map(|frame| frame.context).collect();
        assert_eq!(frames, ["func body", "opcode", "br_table operands"]);
    }
}
