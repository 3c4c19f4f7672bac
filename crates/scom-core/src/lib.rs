//! Shared vocabulary for the SCOM script compiler.
//!
//! This crate holds the types that the compiler and any host embedding it
//! agree on: the compile-error shape, the diagnostics sink, the constants
//! that must match the virtual machine, and the qualifier/flag/option
//! bitsets.
//!
//! The compiler itself lives in `scom-compiler`.

mod consts;
mod diagnostics;
mod error;
mod types;

pub use consts::*;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::CompileError;
pub use types::{Options, ScopeType, TypeQualifiers, VartypeFlags};
