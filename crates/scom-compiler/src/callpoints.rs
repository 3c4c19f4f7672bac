//! Call-point management for forward-declared functions.
//!
//! When a call is emitted before the callee's address (or import index) is
//! known, the cell that should hold the address is recorded as a pending
//! patch. Patches are tagged with the chunk they live in: most sit in the
//! code base, but a patch inside a yanked chunk moves with the chunk and is
//! mirrored back into the code base each time the chunk is re-emitted.
//!
//! Two instances exist side by side: one for local-function calls (code
//! addresses), one for imported calls (import-table indices).

use rustc_hash::FxHashMap;

use crate::bytecode::{CodeCell, CodeLoc, CompiledScript};
use crate::symtable::Symbol;

/// Tag for patches that live in the code base rather than a chunk.
const CODE_BASE_ID: u32 = 0;
/// Tag for patches that have been applied and are kept only as tombstones.
const PATCHED_ID: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct PatchInfo {
    /// `CODE_BASE_ID`, a chunk id, or `PATCHED_ID`.
    chunk_id: u32,
    /// Cell to patch; chunk-relative when `chunk_id` names a chunk.
    offset: CodeLoc,
    /// Source cursor of the call, for unresolved-reference reporting.
    in_source: usize,
}

#[derive(Debug, Default)]
struct CallpointInfo {
    /// The callee's resolved address, once known.
    callpoint: Option<CodeCell>,
    patches: Vec<PatchInfo>,
}

/// Records unresolved call sites per function and patches them when the
/// callee's address becomes known.
#[derive(Debug, Default)]
pub struct CallpointManager {
    map: FxHashMap<Symbol, CallpointInfo>,
}

impl CallpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.map.clear();
    }

    /// Note a call to `func` whose address cell sits at `loc`. Patches
    /// inline when the callpoint is already known.
    pub fn track(&mut self, scrip: &mut CompiledScript, func: Symbol, loc: CodeLoc, in_source: usize) {
        let info = self.map.entry(func).or_default();
        if let Some(callpoint) = info.callpoint {
            scrip.code[loc] = callpoint;
            return;
        }
        info.patches.push(PatchInfo {
            chunk_id: CODE_BASE_ID,
            offset: loc,
            in_source,
        });
    }

    /// The callee's address is now known: patch every code-base call site.
    /// Chunk-scoped patches stay pending; their chunks may be written
    /// (again) later. Call sites that were rolled back out of the code
    /// vector are dropped silently.
    pub fn set_callpoint(&mut self, scrip: &mut CompiledScript, func: Symbol, dest: CodeCell) {
        let info = self.map.entry(func).or_default();
        info.callpoint = Some(dest);
        let mut chunk_patches_remain = false;
        for patch in &mut info.patches {
            match patch.chunk_id {
                CODE_BASE_ID => {
                    if patch.offset < scrip.code.len() {
                        scrip.code[patch.offset] = dest;
                    }
                    patch.chunk_id = PATCHED_ID;
                }
                PATCHED_ID => {}
                _ => chunk_patches_remain = true,
            }
        }
        if !chunk_patches_remain {
            info.patches.clear();
        }
    }

    /// Code `[chunk_start, chunk_start + chunk_len)` has been yanked into
    /// the chunk `id`: retarget the code-base patches it contained.
    pub fn update_on_yanking(&mut self, chunk_start: CodeLoc, chunk_len: usize, id: u32) {
        let chunk_end = chunk_start + chunk_len;
        for info in self.map.values_mut() {
            for patch in &mut info.patches {
                if patch.chunk_id != CODE_BASE_ID {
                    continue;
                }
                if patch.offset < chunk_start || patch.offset >= chunk_end {
                    continue;
                }
                patch.chunk_id = id;
                patch.offset -= chunk_start;
            }
        }
    }

    /// Chunk `id` has been re-emitted at `start`: mirror each of its
    /// patches back into the code base. The chunk-scoped originals persist
    /// because a chunk may be written more than once.
    pub fn update_on_writing(&mut self, start: CodeLoc, id: u32) {
        for info in self.map.values_mut() {
            let mirrored: Vec<PatchInfo> = info
                .patches
                .iter()
                .filter(|p| p.chunk_id == id)
                .map(|p| PatchInfo {
                    chunk_id: CODE_BASE_ID,
                    offset: p.offset + start,
                    in_source: p.in_source,
                })
                .collect();
            info.patches.extend(mirrored);
        }
    }

    /// The first still-unresolved code-base call, as
    /// `(callee, source cursor of the call)`.
    pub fn first_unresolved(&self) -> Option<(Symbol, usize)> {
        for (&func, info) in &self.map {
            for patch in &info.patches {
                if patch.chunk_id == CODE_BASE_ID {
                    return Some((func, patch.in_source));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Opcode, Register, CODE_CELL_PLACEHOLDER};

    fn emit_call_site(scrip: &mut CompiledScript) -> CodeLoc {
        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), CODE_CELL_PLACEHOLDER);
        scrip.len() - 1
    }

    #[test]
    fn forward_call_is_patched_when_resolved() {
        let mut scrip = CompiledScript::new();
        let mut mgr = CallpointManager::new();
        let func = Symbol(200);

        let loc = emit_call_site(&mut scrip);
        mgr.track(&mut scrip, func, loc, 17);
        assert_eq!(scrip.code[loc], CODE_CELL_PLACEHOLDER);
        assert!(mgr.first_unresolved().is_some());

        mgr.set_callpoint(&mut scrip, func, 99);
        assert_eq!(scrip.code[loc], 99);
        assert_eq!(mgr.first_unresolved(), None);
    }

    #[test]
    fn calls_after_resolution_patch_inline() {
        let mut scrip = CompiledScript::new();
        let mut mgr = CallpointManager::new();
        let func = Symbol(200);

        mgr.set_callpoint(&mut scrip, func, 7);
        let loc = emit_call_site(&mut scrip);
        mgr.track(&mut scrip, func, loc, 3);
        assert_eq!(scrip.code[loc], 7);
    }

    #[test]
    fn unresolved_calls_are_reported_with_their_source() {
        let mut scrip = CompiledScript::new();
        let mut mgr = CallpointManager::new();
        let func = Symbol(201);
        let loc = emit_call_site(&mut scrip);
        mgr.track(&mut scrip, func, loc, 42);
        assert_eq!(mgr.first_unresolved(), Some((func, 42)));
    }

    #[test]
    fn patches_migrate_with_yanked_chunks() {
        let mut scrip = CompiledScript::new();
        let mut mgr = CallpointManager::new();
        let func = Symbol(202);

        // A call site at cells [0..3); the address cell is at 2.
        let loc = emit_call_site(&mut scrip);
        mgr.track(&mut scrip, func, loc, 1);

        // Yank [0..3) into chunk 5, then write it twice, at 10 and at 20.
        mgr.update_on_yanking(0, 3, 5);
        mgr.update_on_writing(10, 5);
        mgr.update_on_writing(20, 5);

        // Give the script enough room for the mirrored patch offsets.
        while scrip.len() < 24 {
            scrip.write_cell(0);
        }
        mgr.set_callpoint(&mut scrip, func, 77);

        assert_eq!(scrip.code[12], 77);
        assert_eq!(scrip.code[22], 77);
        // The chunk-scoped original survives, so a later write still works.
        mgr.update_on_writing(0, 5);
        mgr.set_callpoint(&mut scrip, func, 77);
        assert_eq!(scrip.code[2], 77);
    }

    #[test]
    fn yanking_leaves_unrelated_patches_alone() {
        let mut scrip = CompiledScript::new();
        let mut mgr = CallpointManager::new();
        let func = Symbol(203);
        let loc = emit_call_site(&mut scrip);
        mgr.track(&mut scrip, func, loc, 9);

        mgr.update_on_yanking(10, 5, 3); // does not cover `loc`
        assert_eq!(mgr.first_unresolved(), Some((func, 9)));
        mgr.set_callpoint(&mut scrip, func, 1);
        assert_eq!(scrip.code[loc], 1);
    }
}
