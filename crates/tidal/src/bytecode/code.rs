//! Compiled code objects: constants, blocks, programs and the persistable
//! wire form.

use std::sync::Arc;

use crate::bytecode::op::{self, Instructions, Opcode};
use crate::error::{Error, ErrorKind, Result};

/// Dispatch token for `EXECBLOCK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum TagDispatch {
    Include,
    Render,
}

/// A self-contained instruction sequence with its own stack frame shape.
///
/// Loop bodies compile into blocks; the top-level template is itself a block
/// with no parameters. Blocks are immutable once built.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct CompiledBlock {
    pub instructions: Instructions,
    /// Stack slots reserved above the base pointer.
    pub num_locals: u8,
    /// Arguments consumed from the stack at invocation.
    pub num_parameters: u8,
    /// Captured free variables bundled into the frame.
    pub num_free: u8,
    /// True for `for` loop bodies; `break`/`continue` unwind to the nearest
    /// block with this flag set.
    pub is_loop: bool,
}

/// An entry in the constant pool.
///
/// Constants are everything the VM might need at runtime: literal strings,
/// numbers, compiled blocks for nested bodies, and tag-name tokens used for
/// `EXECBLOCK` dispatch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(Box<str>),
    /// A range literal with static bounds, folded at compile time.
    Range { start: i64, stop: i64 },
    Block(Arc<CompiledBlock>),
    Tag(TagDispatch),
}

/// A compiled template: the top-level block, the constant pool and the
/// local slot names.
///
/// Programs are immutable and freely shareable across concurrent renders.
/// `local_names` maps template-scope slot indices back to source names; the
/// VM resolves `SETLOCAL`/`GETLOCAL` through it so that separately compiled
/// partials can share one name-keyed namespace.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Program {
    pub main: Arc<CompiledBlock>,
    pub constants: Vec<Constant>,
    pub local_names: Vec<Box<str>>,
}

/// Magic bytes of the persisted program form.
const MAGIC: [u8; 4] = *b"TDLB";
/// Version of the persisted program form.
const FORMAT_VERSION: u16 = 1;

impl Program {
    /// Formats the program and every nested block for debugging.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::from("main:\n");
        out.push_str(&op::disassemble(&self.main.instructions));
        for (idx, constant) in self.constants.iter().enumerate() {
            if let Constant::Block(block) = constant {
                out.push_str(&format!("block {idx} (locals={}):\n", block.num_locals));
                out.push_str(&op::disassemble(&block.instructions));
            }
        }
        out
    }

    /// Serializes the program: a versioned header followed by a postcard
    /// payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        let payload = postcard::to_allocvec(self)
            .map_err(|err| Error::new(ErrorKind::Type, format!("cannot serialize program: {err}")))?;
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Deserializes a program written by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 || bytes[..4] != MAGIC {
            return Err(Error::new(ErrorKind::Type, "not a compiled template"));
        }
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(Error::new(
                ErrorKind::Type,
                format!("unsupported program version {version}"),
            ));
        }
        postcard::from_bytes(&bytes[6..])
            .map_err(|err| Error::new(ErrorKind::Type, format!("corrupt compiled template: {err}")))
    }
}

/// Byte offset of a loop block's body entry point: just past the leading
/// `JUMPIFEMPTY` instruction. `CONTINUE` re-enters here.
#[must_use]
pub fn loop_body_entry() -> usize {
    Opcode::JumpIfEmpty.instruction_len()
}
