//! Emission helpers: jump labels and register liveness tracking.
//!
//! Jump operands are relative: the cell holds `dest - operand_loc - 1`, the
//! distance from the cell after the operand to the destination. Backward
//! jumps know their destination up front; forward jumps collect operand
//! locations and are patched when the destination is reached.

use crate::bytecode::{
    CodeCell, CodeLoc, CompiledScript, Opcode, Register, CODE_CELL_PLACEHOLDER,
};

/// Relative distance stored in a jump operand at `operand_loc` targeting
/// `dest`.
#[inline]
pub fn relative_jump_dist(operand_loc: CodeLoc, dest: CodeLoc) -> CodeCell {
    dest as CodeCell - operand_loc as CodeCell - 1
}

/// A jump target that lies at or before the jump instruction (loop heads,
/// switch case bodies).
#[derive(Debug, Clone, Copy, Default)]
pub struct BackwardJumpDest {
    dest: Option<CodeLoc>,
}

impl BackwardJumpDest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the current end of code as the destination.
    pub fn set_to_current(&mut self, scrip: &CompiledScript) {
        self.dest = Some(scrip.len());
    }

    pub fn set(&mut self, dest: CodeLoc) {
        self.dest = Some(dest);
    }

    pub fn get(&self) -> CodeLoc {
        self.dest.unwrap_or(0)
    }

    pub fn is_set(&self) -> bool {
        self.dest.is_some()
    }

    /// Emit `jump_op` targeting the recorded destination.
    pub fn write_jump(&self, scrip: &mut CompiledScript, jump_op: Opcode, lineno: usize) {
        let dest = self.get();
        scrip.refresh_lineno(lineno);
        let operand_loc = scrip.len() + 1;
        scrip.write_cmd1(jump_op, relative_jump_dist(operand_loc, dest));
    }
}

/// A set of forward jumps waiting for their common destination.
#[derive(Debug, Clone, Default)]
pub struct ForwardJump {
    operand_locs: Vec<CodeLoc>,
}

impl ForwardJump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the most recently written cell as a jump operand to patch.
    pub fn add_param(&mut self, scrip: &CompiledScript) {
        debug_assert_eq!(
            scrip.code.last().copied(),
            Some(CODE_CELL_PLACEHOLDER),
            "forward jumps are recorded right after their placeholder operand"
        );
        self.operand_locs.push(scrip.len() - 1);
    }

    /// Record an explicitly given operand cell to patch. Used when other
    /// emission (e.g. a line marker) may follow the jump before it is
    /// registered.
    pub fn add_param_at(&mut self, operand_loc: CodeLoc) {
        self.operand_locs.push(operand_loc);
    }

    pub fn is_empty(&self) -> bool {
        self.operand_locs.is_empty()
    }

    /// Point all recorded jumps at the current end of code.
    ///
    /// Jumps whose operands have been rolled back out of the code vector
    /// (a restore point ripped out the emission they sat in) are dropped.
    pub fn patch(&mut self, scrip: &mut CompiledScript, lineno: usize) {
        if !self.operand_locs.is_empty() {
            // The bytecode arriving at this spot originates from elsewhere,
            // so its line marker must be re-established.
            scrip.refresh_lineno(lineno);
        }
        let dest = scrip.len();
        for &loc in &self.operand_locs {
            if loc < scrip.code.len() {
                scrip.code[loc] = relative_jump_dist(loc, dest);
            }
        }
        self.operand_locs.clear();
    }
}

// ============================================================================
// Register tracking
// ============================================================================

/// Registers whose liveness the tracker follows. `Mar` is tracked but never
/// handed out as a scratch register.
const TRACKED: [Register; 5] = [
    Register::Ax,
    Register::Bx,
    Register::Cx,
    Register::Dx,
    Register::Mar,
];

/// Per-register monotonic "last written at code length" stamps.
///
/// `is_valid(reg, loc)` answers whether the register still holds whatever
/// it held when the code was `loc` cells long; emission sites use it to
/// elide redundant reloads and the register guard uses it to detect
/// clobbering.
#[derive(Debug, Default)]
pub struct RegisterTracker {
    set_points: [CodeLoc; 8],
}

impl RegisterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `reg` was written when the code had length `loc`.
    pub fn set_register(&mut self, reg: Register, loc: CodeLoc) {
        self.set_points[reg.cell() as usize] = loc;
    }

    /// Record a write to every tracked register (e.g. after a call).
    pub fn set_all_registers(&mut self, loc: CodeLoc) {
        for reg in TRACKED {
            self.set_register(reg, loc);
        }
    }

    /// The stamp of the last write to `reg`.
    pub fn get_register(&self, reg: Register) -> CodeLoc {
        self.set_points[reg.cell() as usize]
    }

    /// Whether `reg` has not been written since the code was `loc` long.
    pub fn is_valid(&self, reg: Register, loc: CodeLoc) -> bool {
        self.set_points[reg.cell() as usize] <= loc
    }

    /// The general-purpose register that was set longest ago (never MAR).
    pub fn general_purpose_register(&self) -> Register {
        let mut oldest = Register::Ax;
        let mut oldest_loc = CodeLoc::MAX;
        for reg in TRACKED {
            if reg == Register::Mar {
                continue;
            }
            let loc = self.get_register(reg);
            if loc < oldest_loc {
                oldest = reg;
                oldest_loc = loc;
            }
        }
        oldest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backward_jump_encodes_relative_distance() {
        let mut scrip = CompiledScript::new();
        let mut dest = BackwardJumpDest::new();
        dest.set_to_current(&scrip); // dest = 0
        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 1);
        dest.write_jump(&mut scrip, Opcode::Jnz, 1);

        // LINENUM a b; LITTOREG r v; JNZ rel — operand of JNZ is last.
        let rel = *scrip.code.last().unwrap();
        let operand_loc = scrip.len() - 1;
        assert_eq!(rel, relative_jump_dist(operand_loc, 0));
        assert_eq!(operand_loc as CodeCell + 1 + rel, 0);
    }

    #[test]
    fn forward_jump_patches_all_params() {
        let mut scrip = CompiledScript::new();
        let mut out = ForwardJump::new();

        scrip.write_cmd1(Opcode::Jz, CODE_CELL_PLACEHOLDER);
        out.add_param(&scrip);
        scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 9);
        scrip.write_cmd1(Opcode::Jmp, CODE_CELL_PLACEHOLDER);
        out.add_param(&scrip);

        out.patch(&mut scrip, 1);
        assert!(out.is_empty());

        // Both jumps land on the (same) current end of code, which lies
        // past the line marker the patch emitted.
        let end = scrip.len() as CodeCell;
        assert_eq!(scrip.code[1] + 1 + 1, end);
        let jmp_operand = 6; // JZ(2 cells) + LITTOREG(3 cells) + JMP opcode
        assert_eq!(
            scrip.code[jmp_operand] + jmp_operand as CodeCell + 1,
            end
        );
    }

    #[test]
    fn tracker_reports_clobbering() {
        let mut track = RegisterTracker::new();
        track.set_register(Register::Ax, 10);
        assert!(track.is_valid(Register::Ax, 10));
        assert!(track.is_valid(Register::Ax, 15));
        assert!(!track.is_valid(Register::Ax, 5));
    }

    #[test]
    fn general_purpose_register_is_the_oldest() {
        let mut track = RegisterTracker::new();
        track.set_register(Register::Ax, 30);
        track.set_register(Register::Bx, 10);
        track.set_register(Register::Cx, 20);
        track.set_register(Register::Dx, 40);
        // MAR is older than all of them but is never handed out.
        track.set_register(Register::Mar, 1);
        assert_eq!(track.general_purpose_register(), Register::Bx);
    }

    #[test]
    fn set_all_registers_touches_mar() {
        let mut track = RegisterTracker::new();
        track.set_all_registers(7);
        assert!(!track.is_valid(Register::Mar, 3));
        assert!(!track.is_valid(Register::Dx, 3));
        assert!(track.is_valid(Register::Dx, 7));
    }
}
