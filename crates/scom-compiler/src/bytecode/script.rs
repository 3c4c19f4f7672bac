//! The compiled-script builder.
//!
//! `CompiledScript` owns the append-only buffers that make up the bytecode
//! image: code, fixups, the global-data image, the string pool, the import
//! and export tables, and per-function metadata. It also tracks
//! `offset_to_local_var_block` — the logical distance from SP down to the
//! start of the local-variable block — which changes with every push and pop
//! but is always known at compile time.

use scom_core::SIZE_OF_STACK_CELL;

use super::{CodeCell, CodeLoc, Opcode, Register};

/// Placeholder written into jump operands whose destination isn't known
/// yet. Nothing may depend on the value; it is only easy to spot in
/// listings.
pub const CODE_CELL_PLACEHOLDER: CodeCell = -77;

/// What a code cell must be relocated against at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupType {
    /// Cell holds an offset into the global-data block.
    GlobalData,
    /// Cell holds a code address of a local function.
    Code,
    /// Cell holds an offset into the string pool.
    String,
    /// Cell holds an index into the import table.
    Import,
}

/// One relocation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    /// Index into `code[]` of the cell holding the unrelocated value.
    pub code_index: CodeLoc,
    pub kind: FixupType,
}

/// One export-table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    /// Code offset for functions, global-data offset for variables.
    pub offset: CodeCell,
    /// `arity + 100 * variadic` for functions, `None` for data exports.
    pub args: Option<u32>,
}

/// Per-function metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub code_offset: CodeLoc,
    pub num_params: usize,
}

/// The bytecode image under construction.
#[derive(Debug, Default)]
pub struct CompiledScript {
    pub code: Vec<CodeCell>,
    pub fixups: Vec<Fixup>,
    pub globaldata: Vec<u8>,
    /// Contiguous pool of NUL-terminated string literals.
    pub strings: Vec<u8>,
    /// Import names; an empty string marks a pruned entry whose index must
    /// stay allocated (fixups refer to imports by index).
    pub imports: Vec<String>,
    pub exports: Vec<Export>,
    pub functions: Vec<FunctionInfo>,
    /// `(section name, code offset)` markers, in emission order.
    pub sections: Vec<(String, CodeLoc)>,

    /// Logical stack depth from SP down to the local-variable block base.
    pub offset_to_local_var_block: usize,

    last_emitted_lineno: Option<usize>,
}

impl CompiledScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current length of the code vector.
    #[inline]
    pub fn len(&self) -> CodeLoc {
        self.code.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    // ==========================================================================
    // Code emission
    // ==========================================================================

    /// Append a raw code cell.
    #[inline]
    pub fn write_cell(&mut self, cell: CodeCell) {
        self.code.push(cell);
    }

    pub fn write_cmd(&mut self, op: Opcode) {
        debug_assert_eq!(op.operand_count(), 0);
        self.write_cell(op as CodeCell);
    }

    pub fn write_cmd1(&mut self, op: Opcode, arg: CodeCell) {
        debug_assert_eq!(op.operand_count(), 1);
        self.write_cell(op as CodeCell);
        self.write_cell(arg);
    }

    pub fn write_cmd2(&mut self, op: Opcode, arg1: CodeCell, arg2: CodeCell) {
        debug_assert_eq!(op.operand_count(), 2);
        self.write_cell(op as CodeCell);
        self.write_cell(arg1);
        self.write_cell(arg2);
    }

    pub fn write_cmd3(&mut self, op: Opcode, arg1: CodeCell, arg2: CodeCell, arg3: CodeCell) {
        debug_assert_eq!(op.operand_count(), 3);
        self.write_cell(op as CodeCell);
        self.write_cell(arg1);
        self.write_cell(arg2);
        self.write_cell(arg3);
    }

    /// Emit a `LINENUM` marker and remember it.
    pub fn write_lineno(&mut self, lineno: usize) {
        self.write_cmd1(Opcode::LineNum, lineno as CodeCell);
        self.last_emitted_lineno = Some(lineno);
    }

    /// Emit a `LINENUM` marker only when the line has changed since the
    /// last marker.
    pub fn refresh_lineno(&mut self, lineno: usize) {
        if self.last_emitted_lineno != Some(lineno) {
            self.write_lineno(lineno);
        }
    }

    /// Force the next `refresh_lineno` to emit, e.g. after re-emitting a
    /// yanked chunk at a new location.
    pub fn invalidate_last_lineno(&mut self) {
        self.last_emitted_lineno = None;
    }

    /// Push a register; the local-variable block base moves down one cell.
    pub fn push_reg(&mut self, reg: Register) {
        self.write_cmd1(Opcode::PushReg, reg.cell());
        self.offset_to_local_var_block += SIZE_OF_STACK_CELL;
    }

    /// Pop into a register, undoing one `push_reg`'s stack effect.
    pub fn pop_reg(&mut self, reg: Register) {
        self.write_cmd1(Opcode::PopReg, reg.cell());
        self.offset_to_local_var_block -= SIZE_OF_STACK_CELL;
    }

    /// Remove the immediately preceding `push_reg` from the code stream.
    pub fn undo_push_reg(&mut self) {
        debug_assert_eq!(
            self.code.get(self.code.len().wrapping_sub(2)),
            Some(&(Opcode::PushReg as CodeCell))
        );
        self.code.truncate(self.code.len() - 2);
        self.offset_to_local_var_block -= SIZE_OF_STACK_CELL;
    }

    // ==========================================================================
    // Fixups
    // ==========================================================================

    pub fn add_fixup(&mut self, code_index: CodeLoc, kind: FixupType) {
        self.fixups.push(Fixup { code_index, kind });
    }

    /// Mark the most recently written cell for relocation.
    pub fn fixup_previous(&mut self, kind: FixupType) {
        debug_assert!(!self.code.is_empty());
        self.add_fixup(self.code.len() - 1, kind);
    }

    // ==========================================================================
    // Data, strings, imports, exports, functions
    // ==========================================================================

    /// Reserve `size` bytes of global data, optionally initialised, and
    /// return the byte offset of the new block.
    pub fn add_global(&mut self, size: usize, init: Option<&[u8]>) -> usize {
        let offset = self.globaldata.len();
        match init {
            Some(bytes) => {
                debug_assert!(bytes.len() >= size);
                self.globaldata.extend_from_slice(&bytes[..size]);
            }
            None => self.globaldata.resize(offset + size, 0),
        }
        offset
    }

    /// Intern a string literal into the pool; returns its first-byte offset.
    pub fn add_string(&mut self, text: &str) -> usize {
        let offset = self.strings.len();
        self.strings.extend_from_slice(text.as_bytes());
        self.strings.push(0);
        offset
    }

    /// Read a NUL-terminated string back out of the pool.
    pub fn string_at(&self, offset: usize) -> &str {
        let tail = &self.strings[offset..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        std::str::from_utf8(&tail[..end]).unwrap_or("")
    }

    /// Find an import by name or append it; returns its table index.
    pub fn find_or_add_import(&mut self, name: &str) -> usize {
        if let Some(idx) = self.imports.iter().position(|i| i == name) {
            return idx;
        }
        self.imports.push(name.to_string());
        self.imports.len() - 1
    }

    /// Whether a non-pruned import of this name exists. Function imports
    /// carry an `^N` arity suffix in the table; the comparison ignores it.
    pub fn is_import(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        self.imports.iter().any(|entry| {
            entry == name
                || (entry.starts_with(name) && entry[name.len()..].starts_with('^'))
        })
    }

    pub fn add_export(&mut self, name: &str, offset: CodeCell, args: Option<u32>) {
        self.exports.push(Export {
            name: name.to_string(),
            offset,
            args,
        });
    }

    /// Register a function whose body starts at the current code position;
    /// returns that code offset.
    pub fn add_new_function(&mut self, name: &str, num_params: usize) -> CodeLoc {
        let code_offset = self.len();
        self.functions.push(FunctionInfo {
            name: name.to_string(),
            code_offset,
            num_params,
        });
        code_offset
    }

    /// Record that emission has moved into a new source section.
    pub fn start_new_section(&mut self, name: &str) {
        self.sections.push((name.to_string(), self.len()));
    }

    // ==========================================================================
    // Test support
    // ==========================================================================

    /// Decode the code vector into `(opcode, operands)` pairs. Decoding
    /// stops at the first cell that isn't a valid opcode.
    pub fn decoded(&self) -> Vec<(Opcode, Vec<CodeCell>)> {
        let mut out = Vec::new();
        let mut idx = 0;
        while idx < self.code.len() {
            let op = match Opcode::from_cell(self.code[idx]) {
                Some(op) => op,
                None => break,
            };
            let n = op.operand_count();
            let args = self.code[idx + 1..idx + 1 + n].to_vec();
            out.push((op, args));
            idx += 1 + n;
        }
        out
    }

    /// The opcodes of the whole image, operands dropped.
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.decoded().into_iter().map(|(op, _)| op).collect()
    }
}

/// A snapshot of `(code length, fixup count)` for rolling back speculative
/// emission. Taking a restore point before any emission a caller might
/// discard keeps fixup indices consistent with code indices.
#[derive(Debug, Clone, Copy)]
pub struct RestorePoint {
    code_len: CodeLoc,
    fixups_len: usize,
    offset_to_local_var_block: usize,
}

impl RestorePoint {
    pub fn new(scrip: &CompiledScript) -> Self {
        Self {
            code_len: scrip.len(),
            fixups_len: scrip.fixups.len(),
            offset_to_local_var_block: scrip.offset_to_local_var_block,
        }
    }

    /// The code length at snapshot time.
    pub fn code_location(&self) -> CodeLoc {
        self.code_len
    }

    /// Whether nothing has been emitted since the snapshot.
    pub fn is_empty(&self, scrip: &CompiledScript) -> bool {
        scrip.len() == self.code_len
    }

    /// Throw away everything emitted since the snapshot.
    pub fn restore(&self, scrip: &mut CompiledScript) {
        scrip.code.truncate(self.code_len);
        scrip.fixups.truncate(self.fixups_len);
        scrip.offset_to_local_var_block = self.offset_to_local_var_block;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_decode() {
        let mut scrip = CompiledScript::new();
        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 42);
        scrip.write_cmd(Opcode::Ret);

        assert_eq!(
            scrip.decoded(),
            vec![
                (Opcode::LitToReg, vec![3, 42]),
                (Opcode::Ret, vec![]),
            ]
        );
    }

    #[test]
    fn push_pop_track_the_local_var_block() {
        let mut scrip = CompiledScript::new();
        scrip.push_reg(Register::Ax);
        assert_eq!(scrip.offset_to_local_var_block, SIZE_OF_STACK_CELL);
        scrip.pop_reg(Register::Bx);
        assert_eq!(scrip.offset_to_local_var_block, 0);
    }

    #[test]
    fn undo_push_reg_truncates() {
        let mut scrip = CompiledScript::new();
        scrip.push_reg(Register::Mar);
        scrip.undo_push_reg();
        assert!(scrip.is_empty());
        assert_eq!(scrip.offset_to_local_var_block, 0);
    }

    #[test]
    fn fixup_previous_points_at_last_cell() {
        let mut scrip = CompiledScript::new();
        scrip.write_cmd2(Opcode::LitToReg, Register::Mar.cell(), 16);
        scrip.fixup_previous(FixupType::GlobalData);
        assert_eq!(scrip.fixups.len(), 1);
        assert_eq!(scrip.fixups[0].code_index, 2);
        assert_eq!(scrip.fixups[0].kind, FixupType::GlobalData);
    }

    #[test]
    fn refresh_lineno_elides_duplicates() {
        let mut scrip = CompiledScript::new();
        scrip.refresh_lineno(10);
        scrip.refresh_lineno(10);
        assert_eq!(scrip.opcodes(), vec![Opcode::LineNum]);
        scrip.refresh_lineno(11);
        assert_eq!(scrip.opcodes(), vec![Opcode::LineNum, Opcode::LineNum]);
    }

    #[test]
    fn string_pool_round_trip() {
        let mut scrip = CompiledScript::new();
        let a = scrip.add_string("hello");
        let b = scrip.add_string("");
        let c = scrip.add_string("world");
        assert_eq!(scrip.string_at(a), "hello");
        assert_eq!(scrip.string_at(b), "");
        assert_eq!(scrip.string_at(c), "world");
        assert_eq!(b, 6);
        assert_eq!(c, 7);
    }

    #[test]
    fn imports_are_deduplicated() {
        let mut scrip = CompiledScript::new();
        let a = scrip.find_or_add_import("GetTime");
        let b = scrip.find_or_add_import("GetTime");
        assert_eq!(a, b);
        assert_eq!(scrip.imports.len(), 1);
    }

    #[test]
    fn is_import_ignores_the_arity_suffix() {
        let mut scrip = CompiledScript::new();
        let idx = scrip.find_or_add_import("Obj::Frob");
        scrip.imports[idx].push_str("^2");
        assert!(scrip.is_import("Obj::Frob"));
        assert!(!scrip.is_import("Obj::Fro"));
        assert!(!scrip.is_import(""));
    }

    #[test]
    fn restore_point_rolls_back_code_and_fixups() {
        let mut scrip = CompiledScript::new();
        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 1);

        let rp = RestorePoint::new(&scrip);
        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 2);
        scrip.fixup_previous(FixupType::String);
        scrip.push_reg(Register::Ax);
        assert!(!rp.is_empty(&scrip));

        rp.restore(&mut scrip);
        assert_eq!(scrip.len(), 3);
        assert!(scrip.fixups.is_empty());
        assert_eq!(scrip.offset_to_local_var_block, 0);
        assert!(rp.is_empty(&scrip));
    }

    #[test]
    fn add_global_zero_fills() {
        let mut scrip = CompiledScript::new();
        let first = scrip.add_global(8, None);
        let second = scrip.add_global(4, Some(&[1, 2, 3, 4]));
        assert_eq!(first, 0);
        assert_eq!(second, 8);
        assert_eq!(&scrip.globaldata[..8], &[0; 8]);
        assert_eq!(&scrip.globaldata[8..], &[1, 2, 3, 4]);
    }
}
