//! Scope types and the bitset vocabulary.

use bitflags::bitflags;

/// Where a variable's storage lives, and hence how it is addressed.
///
/// Global and local variables resolve to `(scope, byte offset)`; import
/// variables resolve to `(scope, index into the import table)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeType {
    /// Not a memory-resident value (or not decided yet).
    #[default]
    None,
    /// Lives in the global-data block.
    Global,
    /// Lives on the stack, addressed relative to the frame.
    Local,
    /// Resolved by the runtime linker through the import table.
    Import,
}

bitflags! {
    /// Qualifier keywords collected in front of a declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeQualifiers: u16 {
        const ATTRIBUTE      = 1 << 0;
        const AUTOPTR        = 1 << 1;
        const BUILTIN        = 1 << 2;
        const CONST          = 1 << 3;
        const IMPORT         = 1 << 4;
        const MANAGED        = 1 << 5;
        const PROTECTED      = 1 << 6;
        const READONLY       = 1 << 7;
        const STATIC         = 1 << 8;
        const STRINGSTRUCT   = 1 << 9;
        const WRITEPROTECTED = 1 << 10;
    }
}

bitflags! {
    /// Properties of a vartype entry in the symbol table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VartypeFlags: u8 {
        /// Forward-declared, not completely defined yet.
        const UNDEFINED = 1 << 0;
        const STRUCT    = 1 << 1;
        const MANAGED   = 1 << 2;
        const BUILTIN   = 1 << 3;
        const AUTOPTR   = 1 << 4;
        const ENUM      = 1 << 5;
    }
}

bitflags! {
    /// Compile options recognised by the driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Options: u8 {
        /// Export every defined function regardless of `export` clauses.
        const EXPORT_ALL = 1 << 0;
        /// Disallow a body for a function already declared `import`.
        const NO_IMPORT_OVERRIDE = 1 << 1;
        /// Permit the legacy `string` buffer type as a variable type.
        const OLD_STRINGS = 1 << 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifier_sets_compare_by_value() {
        let mut a = TypeQualifiers::MANAGED | TypeQualifiers::IMPORT;
        let b = TypeQualifiers::MANAGED;
        assert_ne!(a, b);
        a.remove(TypeQualifiers::IMPORT);
        assert_eq!(a, b);
    }

    #[test]
    fn default_scope_is_none() {
        assert_eq!(ScopeType::default(), ScopeType::None);
    }
}
