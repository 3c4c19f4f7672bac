//! Constants shared with the virtual machine.
//!
//! These values are part of the bytecode image contract. Changing any of
//! them desynchronises the compiler from the VM and the runtime linker.

/// Size in bytes of one stack cell. Every push/pop moves SP by this much.
pub const SIZE_OF_STACK_CELL: usize = 4;

/// Size in bytes of `int` (and of one code cell's worth of data).
pub const SIZE_OF_INT: usize = 4;

/// Size in bytes of a dynamic pointer slot.
pub const SIZE_OF_DYNPOINTER: usize = 4;

/// Capacity of an old-style `string` buffer, terminator included.
pub const STRINGBUFFER_LENGTH: usize = 200;

/// Struct sizes are padded up to a multiple of this.
pub const STRUCT_ALIGNTO: usize = 4;

/// Hard limit on function parameters; the highest legal count is one less.
pub const MAX_FUNCTION_PARAMETERS: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_cell_holds_a_pointer() {
        // The VM pushes dynpointers as plain values before the callee
        // re-materialises them, so the sizes must agree.
        assert_eq!(SIZE_OF_STACK_CELL, SIZE_OF_DYNPOINTER);
    }
}
