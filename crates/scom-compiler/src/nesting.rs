//! The nesting stack: one frame per open construct.
//!
//! A frame owns the transient state of its construct: the backward-jump
//! target of a loop head, the forward jumps that exit the construct, the
//! symbol definitions it shadows, switch metadata, and "yanked" bytecode
//! chunks — code that was emitted in source order but belongs elsewhere
//! (the `for` increment, `case` tests) and is re-emitted later.

use rustc_hash::FxHashMap;

use crate::bytecode::{CodeLoc, CompiledScript, Fixup, Opcode};
use crate::emit::{BackwardJumpDest, ForwardJump};
use crate::symtable::{Symbol, SymbolEntry};

/// Sentinel for "no jump has left this frame".
pub const NO_JUMP_OUT: usize = usize::MAX;

/// What kind of construct a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestingType {
    /// The bottom-of-stack frame; code here is global scope.
    None,
    /// A function's parameter list.
    Parameters,
    /// A function body.
    Function,
    /// A free-standing `{ ... }` block.
    Braces,
    If,
    Else,
    Do,
    While,
    /// The outer frame of a `for` (owns the init-clause declarations).
    For,
    Switch,
}

/// A snapshot of emitted code (plus its fixups, made chunk-relative) that
/// has been ripped out of the code vector for later re-emission.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Workspace-unique id; call-point managers track patches by it.
    pub id: u32,
    /// Source line of the chunk, for the re-emitted line marker.
    pub src_line: usize,
    pub code: Vec<crate::bytecode::CodeCell>,
    /// Fixups with `code_index` relative to the chunk start.
    pub fixups: Vec<Fixup>,
}

/// One level of nesting.
#[derive(Debug)]
pub struct NestingFrame {
    pub ntype: NestingType,
    /// Backward-jump target (loop head, case body).
    pub start: BackwardJumpDest,
    /// Forward jumps that exit this construct.
    pub jump_out: ForwardJump,
    /// Shallowest level any `break`/`continue`/`return` inside this frame
    /// escaped to; `NO_JUMP_OUT` when control can reach the frame's end.
    pub jump_out_level: usize,
    /// Like `jump_out_level`, collected over completed sibling branches
    /// (the `then` arm of an `if`, earlier `case` arms).
    pub branch_jump_out_level: usize,
    /// Whether the one dead-code warning for this frame has been issued.
    pub dead_end_warned: bool,
    /// Vartype of the switch expression.
    pub switch_expr_vartype: Symbol,
    /// Per-case backward-jump targets into the case bodies.
    pub switch_case_start: Vec<BackwardJumpDest>,
    /// Index into `switch_case_start` of the `default:` label.
    pub switch_default: Option<usize>,
    /// The forward jump from the switch head to the jump table.
    pub switch_jumptable: ForwardJump,
    /// Yanked bytecode chunks owned by this frame.
    pub chunks: Vec<Chunk>,
    /// Shadowed symbol definitions, restored when the frame pops.
    pub old_definitions: FxHashMap<Symbol, SymbolEntry>,
}

impl NestingFrame {
    fn new(ntype: NestingType) -> Self {
        Self {
            ntype,
            start: BackwardJumpDest::new(),
            jump_out: ForwardJump::new(),
            jump_out_level: NO_JUMP_OUT,
            branch_jump_out_level: 0,
            dead_end_warned: false,
            switch_expr_vartype: Symbol::NONE,
            switch_case_start: Vec::new(),
            switch_default: None,
            switch_jumptable: ForwardJump::new(),
            chunks: Vec::new(),
            old_definitions: FxHashMap::default(),
        }
    }
}

/// The stack of open nesting frames.
#[derive(Debug)]
pub struct NestingStack {
    stack: Vec<NestingFrame>,
    chunk_id_ctr: u32,
}

impl NestingStack {
    /// A new stack with the always-present global frame.
    pub fn new() -> Self {
        Self {
            stack: vec![NestingFrame::new(NestingType::None)],
            chunk_id_ctr: 0,
        }
    }

    pub fn push(&mut self, ntype: NestingType) {
        self.stack.push(NestingFrame::new(ntype));
    }

    pub fn pop(&mut self) -> NestingFrame {
        debug_assert!(self.stack.len() > 1, "the global frame never pops");
        self.stack.pop().expect("nesting stack underflow")
    }

    /// The level of the innermost frame; the global frame is level 0.
    pub fn top_level(&self) -> usize {
        self.stack.len() - 1
    }

    pub fn top(&self) -> &NestingFrame {
        self.stack.last().expect("nesting stack is never empty")
    }

    pub fn top_mut(&mut self) -> &mut NestingFrame {
        self.stack.last_mut().expect("nesting stack is never empty")
    }

    pub fn frame(&self, level: usize) -> &NestingFrame {
        &self.stack[level]
    }

    pub fn frame_mut(&mut self, level: usize) -> &mut NestingFrame {
        &mut self.stack[level]
    }

    pub fn nesting_type(&self) -> NestingType {
        self.top().ntype
    }

    pub fn nesting_type_at(&self, level: usize) -> NestingType {
        self.stack[level].ntype
    }

    pub fn set_nesting_type(&mut self, ntype: NestingType) {
        self.top_mut().ntype = ntype;
    }

    // ==========================================================================
    // Shadowed definitions
    // ==========================================================================

    /// Stash the prior definition of `sym` in the top frame. Returns true
    /// when the name was already stashed at this level (a double
    /// declaration).
    pub fn add_old_definition(&mut self, sym: Symbol, entry: SymbolEntry) -> bool {
        let defs = &mut self.top_mut().old_definitions;
        if defs.contains_key(&sym) {
            return true;
        }
        defs.insert(sym, entry);
        false
    }

    pub fn old_definitions(&self, level: usize) -> &FxHashMap<Symbol, SymbolEntry> {
        &self.stack[level].old_definitions
    }

    // ==========================================================================
    // Yanked chunks
    // ==========================================================================

    /// Whether the frame at `level` owns any chunks.
    pub fn chunks_exist_at(&self, level: usize) -> bool {
        !self.stack[level].chunks.is_empty()
    }

    pub fn chunks_exist(&self) -> bool {
        self.chunks_exist_at(self.top_level())
    }

    pub fn clear_chunks(&mut self) {
        self.top_mut().chunks.clear();
    }

    /// Cut `code[code_start..]` and the fixups from `fixups_start` on out
    /// of the script and store them as a chunk of the top frame. Returns
    /// the fresh chunk id.
    pub fn yank_chunk(
        &mut self,
        scrip: &mut CompiledScript,
        src_line: usize,
        code_start: CodeLoc,
        fixups_start: usize,
    ) -> u32 {
        self.chunk_id_ctr += 1;
        let id = self.chunk_id_ctr;

        let code = scrip.code.split_off(code_start);
        let fixups = scrip
            .fixups
            .split_off(fixups_start)
            .into_iter()
            .map(|f| Fixup {
                code_index: f.code_index - code_start,
                kind: f.kind,
            })
            .collect();

        self.top_mut().chunks.push(Chunk {
            id,
            src_line,
            code,
            fixups,
        });
        id
    }

    /// Copy the chunk back to the tail of the code vector, shifting its
    /// fixups to the insertion point. Returns the chunk's id. The chunk
    /// stays owned by its frame and may be written again.
    pub fn write_chunk(
        &mut self,
        scrip: &mut CompiledScript,
        level: usize,
        chunk_idx: usize,
    ) -> u32 {
        let chunk = &self.stack[level].chunks[chunk_idx];
        let id = chunk.id;

        // Re-establish the source line so runtime errors inside the
        // re-emitted code report the original line.
        if !chunk.code.is_empty()
            && chunk.code[0] != Opcode::LineNum as crate::bytecode::CodeCell
            && chunk.src_line > 0
        {
            scrip.write_lineno(chunk.src_line);
        }

        let start_of_insert = scrip.len();
        scrip.code.extend_from_slice(&chunk.code);
        for f in &chunk.fixups {
            scrip.add_fixup(f.code_index + start_of_insert, f.kind);
        }

        // Whatever line marker was last emitted no longer matches the
        // source position that follows.
        scrip.invalidate_last_lineno();
        id
    }
}

impl Default for NestingStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{FixupType, Opcode, Register};

    #[test]
    fn push_pop_keeps_the_global_frame() {
        let mut nest = NestingStack::new();
        assert_eq!(nest.top_level(), 0);
        nest.push(NestingType::Braces);
        nest.push(NestingType::While);
        assert_eq!(nest.top_level(), 2);
        assert_eq!(nest.nesting_type(), NestingType::While);
        nest.pop();
        assert_eq!(nest.nesting_type(), NestingType::Braces);
        nest.pop();
        assert_eq!(nest.nesting_type(), NestingType::None);
    }

    #[test]
    fn double_definition_is_detected() {
        let mut nest = NestingStack::new();
        nest.push(NestingType::Braces);
        let sym = Symbol(100);
        assert!(!nest.add_old_definition(sym, SymbolEntry::named("x")));
        assert!(nest.add_old_definition(sym, SymbolEntry::named("x")));
    }

    #[test]
    fn yank_then_write_is_byte_identical() {
        let mut nest = NestingStack::new();
        let mut scrip = CompiledScript::new();

        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 5);
        let code_start = scrip.len();
        let fixups_start = scrip.fixups.len();

        scrip.write_cmd2(Opcode::LitToReg, Register::Mar.cell(), 64);
        scrip.fixup_previous(FixupType::GlobalData);
        scrip.write_cmd1(Opcode::MemRead, Register::Ax.cell());

        let tail = scrip.code[code_start..].to_vec();
        let id = nest.yank_chunk(&mut scrip, 0, code_start, fixups_start);
        assert_eq!(scrip.len(), code_start);
        assert!(scrip.fixups.is_empty());
        assert!(nest.chunks_exist());

        let id2 = nest.write_chunk(&mut scrip, nest.top_level(), 0);
        assert_eq!(id, id2);
        // Re-writing at the original location reproduces the bytes and the
        // fixup effect exactly (src_line 0 suppresses the line marker).
        assert_eq!(&scrip.code[code_start..], &tail[..]);
        assert_eq!(scrip.fixups.len(), 1);
        // The fixup covers the operand value cell of the LITTOREG.
        assert_eq!(scrip.fixups[0].code_index, code_start + 2);
        assert_eq!(scrip.fixups[0].kind, FixupType::GlobalData);
    }

    #[test]
    fn chunks_can_be_written_more_than_once() {
        let mut nest = NestingStack::new();
        let mut scrip = CompiledScript::new();

        scrip.write_cmd2(Opcode::Add, Register::Ax.cell(), 1);
        nest.yank_chunk(&mut scrip, 0, 0, 0);
        assert!(scrip.is_empty());

        nest.write_chunk(&mut scrip, nest.top_level(), 0);
        nest.write_chunk(&mut scrip, nest.top_level(), 0);
        assert_eq!(scrip.len(), 6);
    }

    #[test]
    fn chunk_ids_are_unique() {
        let mut nest = NestingStack::new();
        let mut scrip = CompiledScript::new();
        scrip.write_cmd(Opcode::Ret);
        let a = nest.yank_chunk(&mut scrip, 0, 0, 0);
        scrip.write_cmd(Opcode::Ret);
        let b = nest.yank_chunk(&mut scrip, 0, 0, 0);
        assert_ne!(a, b);
    }
}
