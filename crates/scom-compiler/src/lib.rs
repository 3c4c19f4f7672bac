//! The SCOM script compiler.
//!
//! A two-pass compiler for a C-like scripting language, producing a
//! portable stack-based bytecode image for the companion virtual machine.
//!
//! ## Architecture
//!
//! - **Pass 1 (pre-analyse)**: run quickly over the token stream, collect
//!   the headers of the local functions and the global-vs-import intent of
//!   variables, skipping function bodies.
//! - **Pass 2 (main)**: parse declarations and function bodies, generate
//!   relocatable bytecode, resolve the forward references recorded in
//!   pass 1.
//!
//! The input is a pre-scanned token sequence: the scanner interns symbols
//! into the [`SymbolTable`], appends them (with section/line metadata) to a
//! [`SrcList`], and stores string literals in the script's string pool.
//! [`parse`] then fills the [`CompiledScript`] image.
//!
//! ## Modules
//!
//! - [`bytecode`]: the opcode set and the compiled-script builder
//! - [`source`]: the random-access token cursor
//! - [`symtable`]: interned symbols with typed role records
//! - [`parser`]: the two-pass parser/emitter

pub mod bytecode;
pub mod callpoints;
pub mod emit;
pub mod memloc;
pub mod nesting;
pub mod parser;
pub mod source;
pub mod symtable;

pub use bytecode::{CompiledScript, Export, FixupType, FunctionInfo, Opcode, Register};
pub use parser::Parser;
pub use scom_core::{CompileError, Diagnostic, Diagnostics, Options, Severity};
pub use source::{SrcList, SrcWindow};
pub use symtable::{Symbol, SymbolTable};

/// Compile a pre-scanned token sequence into `scrip`.
///
/// Diagnostics (the fatal error, if any, plus warnings) are collected in
/// `diag`. Returns whether compilation succeeded; on failure the partial
/// image in `scrip` must not be consumed.
pub fn parse(
    src: &mut SrcList,
    options: Options,
    scrip: &mut CompiledScript,
    sym: &mut SymbolTable,
    diag: &mut Diagnostics,
) -> bool {
    Parser::new(src, options, scrip, sym, diag).parse()
}
