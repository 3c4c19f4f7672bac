//! Bytecode types: the opcode set, registers, and the compiled-script
//! builder with its fixup machinery.

mod opcode;
mod script;

pub use opcode::{Opcode, Register};
pub use script::{
    CompiledScript, Export, Fixup, FixupType, FunctionInfo, RestorePoint, CODE_CELL_PLACEHOLDER,
};

/// One 32-bit signed slot of the code vector.
pub type CodeCell = i32;

/// An index into the code vector.
pub type CodeLoc = usize;
