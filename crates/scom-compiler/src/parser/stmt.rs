//! Statement parsing and function bodies.
//!
//! Statements emit their bytecode directly and leave their transient state
//! in the nesting stack. Compound statements without braces are closed by
//! `handle_end_of_compound_stmts` after the statement that forms their
//! body. Scope exits (block ends, `break`, `continue`, `return`) release
//! the dynamic pointers of the locals that die and shrink the stack.

use scom_core::{
    CompileError, ScopeType, TypeQualifiers, SIZE_OF_DYNPOINTER, SIZE_OF_STACK_CELL,
};

use crate::bytecode::{CodeCell, Opcode, Register, RestorePoint, CODE_CELL_PLACEHOLDER};
use crate::emit::BackwardJumpDest;
use crate::nesting::{NestingType, NO_JUMP_OUT};
use crate::symtable::{kw, Symbol, SymbolEntry, FUNCTION_SCOPE, PARAMETER_SCOPE};

use super::{Parser, Phase};

impl<'a> Parser<'a> {
    // ==========================================================================
    // Local-variable bookkeeping
    // ==========================================================================

    /// Total byte size of the locals declared at `from_level` and deeper.
    fn stacksize_of_locals(&self, from_level: usize) -> usize {
        let mut total_size = 0;
        for level in from_level..=self.nest.top_level() {
            // Only the keys matter: they name the locals declared at this
            // level. The current definitions are consulted, not the
            // stashed ones.
            for &sym in self.nest.old_definitions(level).keys() {
                if self.sym.is_variable(sym) {
                    total_size += self.sym.get_size(sym);
                }
            }
        }
        total_size
    }

    /// Pop the locals at `nesting_level` and deeper off the stack.
    fn remove_locals_from_stack(&mut self, nesting_level: usize) {
        let size_of_local_vars = self.stacksize_of_locals(nesting_level);
        if size_of_local_vars > 0 {
            self.scrip.offset_to_local_var_block -= size_of_local_vars;
            self.scrip.write_cmd2(
                Opcode::Sub,
                Register::Sp.cell(),
                size_of_local_vars as CodeCell,
            );
        }
    }

    /// Bring the definitions shadowed at `from_level` and deeper back.
    fn restore_locals_from_symtable(&mut self, from_level: usize) {
        for level in from_level..=self.nest.top_level() {
            let restores: Vec<(Symbol, SymbolEntry)> = self
                .nest
                .old_definitions(level)
                .iter()
                .map(|(&sym, entry)| (sym, entry.snapshot()))
                .collect();
            for (sym, snapshot) in restores {
                self.sym.entry_mut(sym).restore(snapshot);
            }
        }
    }

    // ==========================================================================
    // Releasing dynamic pointers
    // ==========================================================================

    /// Whether values of this vartype hold releasable pointers anywhere.
    fn contains_releasable_dynpointers(&self, vartype: Symbol) -> bool {
        if self.sym.is_dyn_vartype(vartype) {
            return true;
        }
        if self.sym.is_array_vartype(vartype) {
            return self.contains_releasable_dynpointers(self.sym.base_vartype(vartype));
        }
        if !self.sym.is_struct_vartype(vartype) {
            return false; // Atomic non-structs cannot hold pointers
        }
        for component in self.sym.components_of_struct(vartype) {
            if !self.sym.is_variable(component) {
                continue;
            }
            if self.contains_releasable_dynpointers(self.sym.get_vartype(component)) {
                return true;
            }
        }
        false
    }

    /// MAR points to an array of dynpointers; release each element.
    fn free_dynpointers_of_std_array_of_dynpointer(&mut self, num_of_elements: usize) {
        if 0 == num_of_elements {
            return;
        }

        if num_of_elements < 4 {
            self.scrip.write_cmd(Opcode::MemZeroPtr);
            for _ in 1..num_of_elements {
                self.scrip.write_cmd2(
                    Opcode::Add,
                    Register::Mar.cell(),
                    SIZE_OF_DYNPOINTER as CodeCell,
                );
                self.set_reg(Register::Mar);
                self.scrip.write_cmd(Opcode::MemZeroPtr);
            }
            return;
        }

        self.scrip.write_cmd2(
            Opcode::LitToReg,
            Register::Ax.cell(),
            num_of_elements as CodeCell,
        );
        self.set_reg(Register::Ax);

        let mut loop_start = BackwardJumpDest::new();
        loop_start.set_to_current(self.scrip);
        self.scrip.write_cmd(Opcode::MemZeroPtr);
        self.scrip.write_cmd2(
            Opcode::Add,
            Register::Mar.cell(),
            SIZE_OF_DYNPOINTER as CodeCell,
        );
        self.set_reg(Register::Mar);
        self.scrip.write_cmd2(Opcode::Sub, Register::Ax.cell(), 1);
        self.set_reg(Register::Ax);
        let line = self.src.line();
        loop_start.write_jump(self.scrip, Opcode::Jnz, line);
    }

    /// MAR points to a struct; release every pointer it contains.
    fn free_dynpointers_of_struct(&mut self, struct_vtype: Symbol) -> Result<(), CompileError> {
        let compo_list: Vec<Symbol> = self
            .sym
            .components_of_struct(struct_vtype)
            .into_iter()
            .filter(|&component| {
                self.sym.is_variable(component)
                    && self.contains_releasable_dynpointers(self.sym.get_vartype(component))
            })
            .collect();

        let mut offset_so_far: i64 = 0;
        for (idx, &component) in compo_list.iter().enumerate() {
            let offset = self
                .sym
                .entry(component)
                .component
                .as_ref()
                .map(|c| c.offset)
                .unwrap_or(0) as i64;
            let vartype = self.sym.get_vartype(component);

            // Point MAR at the component.
            let diff = offset - offset_so_far;
            if diff != 0 {
                self.scrip
                    .write_cmd2(Opcode::Add, Register::Mar.cell(), diff as CodeCell);
                self.set_reg(Register::Mar);
            }
            offset_so_far = offset;

            if self.sym.is_dyn_vartype(vartype) {
                self.scrip.write_cmd(Opcode::MemZeroPtr);
                continue;
            }

            let is_last = idx + 1 == compo_list.len();
            if !is_last {
                self.push_reg(Register::Mar);
            }
            if self.sym.is_array_vartype(vartype) {
                self.free_dynpointers_of_std_array(vartype)?;
            } else if self.sym.is_struct_vartype(vartype) {
                self.free_dynpointers_of_struct(vartype)?;
            }
            if !is_last {
                self.pop_reg(Register::Mar);
            }
        }
        Ok(())
    }

    /// MAR points to an array of structs; release the pointers of each
    /// element.
    fn free_dynpointers_of_std_array_of_struct(
        &mut self,
        element_vtype: Symbol,
        num_of_elements: usize,
    ) -> Result<(), CompileError> {
        // AX counts the elements still to do.
        self.scrip.write_cmd2(
            Opcode::LitToReg,
            Register::Ax.cell(),
            num_of_elements as CodeCell,
        );

        let mut loop_start = BackwardJumpDest::new();
        loop_start.set_to_current(self.scrip);
        self.register_guard(&[Register::Ax, Register::Mar], |p| {
            p.free_dynpointers_of_struct(element_vtype)
        })?;

        let element_size = self.sym.get_size(element_vtype);
        self.scrip
            .write_cmd2(Opcode::Add, Register::Mar.cell(), element_size as CodeCell);
        self.set_reg(Register::Mar);
        self.scrip.write_cmd2(Opcode::Sub, Register::Ax.cell(), 1);
        self.set_reg(Register::Ax);
        let line = self.src.line();
        loop_start.write_jump(self.scrip, Opcode::Jnz, line);
        Ok(())
    }

    /// MAR points to the start of a static array; release the pointers the
    /// array contains. `the_array` may be a variable or a vartype.
    fn free_dynpointers_of_std_array(&mut self, the_array: Symbol) -> Result<(), CompileError> {
        let array_vartype = if self.sym.is_vartype(the_array) {
            the_array
        } else {
            self.sym.get_vartype(the_array)
        };
        let num_of_elements = self.sym.num_array_elements(array_vartype);
        if num_of_elements < 1 {
            return Ok(());
        }
        let element_vartype = self.sym.base_vartype(array_vartype);
        if self.sym.is_dynpointer_vartype(element_vartype) {
            self.free_dynpointers_of_std_array_of_dynpointer(num_of_elements);
            return Ok(());
        }
        if self.sym.is_struct_vartype(element_vartype) {
            self.free_dynpointers_of_std_array_of_struct(element_vartype, num_of_elements)?;
        }
        Ok(())
    }

    // The pointed-to objects cannot contain pointers in their turn (the
    // struct rules forbid it), so this compile-time walk reaches every
    // releasable pointer.

    /// Release the dynpointers of all locals at `from_level` and deeper.
    fn free_dynpointers_of_locals(&mut self, from_level: usize) -> Result<(), CompileError> {
        for level in from_level..=self.nest.top_level() {
            let locals: Vec<Symbol> = self.nest.old_definitions(level).keys().copied().collect();
            for s in locals {
                if !self.sym.is_variable(s) {
                    continue;
                }
                let s_vartype = self.sym.get_vartype(s);
                if !self.contains_releasable_dynpointers(s_vartype) {
                    continue;
                }

                // Point MAR at the construct holding releasable pointers.
                // Parameter offsets wrap around zero; the difference is
                // small again.
                let var_offset = self
                    .sym
                    .entry(s)
                    .variable
                    .as_ref()
                    .map(|v| v.offset)
                    .unwrap_or(0);
                let sp_offset = self.scrip.offset_to_local_var_block.wrapping_sub(var_offset);
                self.scrip
                    .write_cmd1(Opcode::LoadSpOffs, sp_offset as CodeCell);
                self.set_reg(Register::Mar);
                if self.sym.is_dyn_vartype(s_vartype) {
                    self.scrip.write_cmd(Opcode::MemZeroPtr);
                } else if self.sym.is_array_vartype(s_vartype) {
                    self.free_dynpointers_of_std_array(s)?;
                } else if self.sym.is_struct_vartype(s_vartype) {
                    self.free_dynpointers_of_struct(s_vartype)?;
                }
            }
        }
        Ok(())
    }

    /// Free all local dynpointers while a managed return value sits in AX.
    ///
    /// Freeing could drop the last reference to the object AX points to,
    /// leaving AX dangling. A temporary local pointer keeps the object
    /// alive, and is released with the no-deallocation variant so the
    /// reference survives in AX.
    fn free_dynpointers_of_all_locals_dyn_result(&mut self) -> Result<(), CompileError> {
        let rp_before_precautions = RestorePoint::new(self.scrip);

        // A stack slot to hold the return value.
        self.push_reg(Register::Ax);
        self.scrip
            .write_cmd1(Opcode::LoadSpOffs, SIZE_OF_DYNPOINTER as CodeCell);
        self.set_reg(Register::Mar);
        self.scrip.write_cmd1(Opcode::MemInitPtr, Register::Ax.cell());
        self.set_reg(Register::Ax);

        let rp_before_freeing = RestorePoint::new(self.scrip);
        self.free_dynpointers_of_locals(0)?;
        let mar_clobbered = !self
            .reg_track
            .is_valid(Register::Mar, rp_before_freeing.code_location());
        let no_precautions_were_necessary = rp_before_freeing.is_empty(self.scrip);

        if mar_clobbered {
            self.scrip
                .write_cmd1(Opcode::LoadSpOffs, SIZE_OF_DYNPOINTER as CodeCell);
            self.set_reg(Register::Mar);
        }
        self.scrip.write_cmd1(Opcode::MemReadPtr, Register::Ax.cell());
        self.set_reg(Register::Ax);
        self.scrip.write_cmd(Opcode::MemZeroPtrNd);
        self.pop_reg(Register::Bx); // do NOT pop into AX

        if no_precautions_were_necessary {
            rp_before_precautions.restore(self.scrip);
        }
        Ok(())
    }

    /// Free all local dynpointers without clobbering AX.
    fn free_dynpointers_of_all_locals_keep_ax(&mut self) -> Result<(), CompileError> {
        self.register_guard(&[Register::Ax], |p| p.free_dynpointers_of_locals(0))
    }

    // ==========================================================================
    // Statement dispatch
    // ==========================================================================

    pub(crate) fn parse_command(
        &mut self,
        leading_sym: Symbol,
        struct_of_current_func: &mut Symbol,
        name_of_current_func: &mut Symbol,
    ) -> Result<(), CompileError> {
        if kw::CLOSE_BRACE != leading_sym
            && kw::CASE != leading_sym
            && kw::DEFAULT != leading_sym
            && !self.nest.top().dead_end_warned
            && self.nest.top().jump_out_level < self.nest.top_level()
        {
            self.warn("Code execution cannot reach this point");
            self.nest.top_mut().dead_end_warned = true;
        }

        // Some branches close the whole function; the rest fall through to
        // the compound-statement epilogue below.
        match leading_sym {
            kw::BREAK => self.parse_break()?,
            kw::CASE => self.parse_switch_label(leading_sym)?,
            kw::CLOSE_BRACE => {
                // The scanner guarantees that every '}' has its '{'.
                if FUNCTION_SCOPE >= self.nest.top_level() {
                    return self
                        .handle_end_of_func_body(struct_of_current_func, name_of_current_func);
                }
                if NestingType::Switch == self.nest.nesting_type() {
                    self.handle_end_of_switch()?;
                } else {
                    self.handle_end_of_brace_command()?;
                }
            }
            kw::CONTINUE => self.parse_continue()?,
            kw::DEFAULT => self.parse_switch_label(leading_sym)?,
            kw::DO => return self.parse_do(),
            kw::ELSE => {
                return Err(self.user_error("Cannot find any 'if' clause that matches this 'else'"))
            }
            kw::FALLTHROUGH => self.parse_switch_fallthrough()?,
            kw::FOR => return self.parse_for(),
            kw::IF => return self.parse_if(),
            kw::OPEN_BRACE => {
                if Phase::PreAnalyze == self.phase {
                    *struct_of_current_func = Symbol::NONE;
                    *name_of_current_func = Symbol::NONE;
                    return self.skip_to_close(kw::CLOSE_BRACE);
                }
                return self.parse_open_brace(*struct_of_current_func, *name_of_current_func);
            }
            kw::RETURN => self.parse_return(*name_of_current_func)?,
            kw::SWITCH => self.parse_switch()?,
            kw::WHILE => {
                // This cannot end a do...while(): that 'while' is consumed
                // by the do-handling.
                return self.parse_while();
            }
            _ => {
                // No keyword: an assignment or an isolated expression.
                self.parse_assignment_or_expression()?;
                let next = self.src.get_next();
                self.expect(kw::SEMICOLON, next)?;
            }
        }

        // This statement may close unbraced compound statements, e.g.
        // "while (...) if (...) i++;".
        self.handle_end_of_compound_stmts(struct_of_current_func, name_of_current_func)
    }

    fn handle_end_of_compound_stmts(
        &mut self,
        _struct_of_current_func: &mut Symbol,
        _name_of_current_func: &mut Symbol,
    ) -> Result<(), CompileError> {
        while self.nest.top_level() > FUNCTION_SCOPE {
            match self.nest.nesting_type() {
                // Brace-delimited bodies are only closed by an explicit
                // '}', so there is nothing further to close here.
                NestingType::Braces | NestingType::Switch => return Ok(()),
                NestingType::Do => self.handle_end_of_do()?,
                NestingType::Else => self.handle_end_of_else()?,
                NestingType::If => {
                    let else_follows = self.handle_end_of_if()?;
                    if else_follows {
                        return Ok(());
                    }
                }
                NestingType::While => self.handle_end_of_while()?,
                _ => return Err(self.internal_error("Nesting of unknown type ends")),
            }
        }
        Ok(())
    }

    // ==========================================================================
    // Braces and function bodies
    // ==========================================================================

    fn parse_open_brace(
        &mut self,
        struct_of_current_func: Symbol,
        name_of_current_func: Symbol,
    ) -> Result<(), CompileError> {
        if PARAMETER_SCOPE == self.nest.top_level() {
            return self.parse_func_body_start(struct_of_current_func, name_of_current_func);
        }
        self.nest.push(NestingType::Braces);
        Ok(())
    }

    fn parse_func_body_start(
        &mut self,
        struct_of_func: Symbol,
        name_of_func: Symbol,
    ) -> Result<(), CompileError> {
        self.nest.push(NestingType::Function);

        // The base address for relocations within this function.
        let codesize = self.scrip.len();
        self.scrip.write_cmd1(Opcode::ThisBase, codesize as CodeCell);
        let (no_loop_check, num_params, func_is_static) = {
            let data = self
                .sym
                .entry(name_of_func)
                .function
                .as_ref()
                .ok_or_else(|| self.internal_error("Function record missing"))?;
            (
                data.no_loop_check,
                data.parameters.len() - 1,
                data.qualifiers.contains(TypeQualifiers::STATIC),
            )
        };
        if no_loop_check {
            self.scrip.write_cmd(Opcode::LoopCheckOff);
        }

        // The caller pushed dynpointer parameters as plain values. Catch
        // up: read each one back and re-write it through MEMINITPTR so the
        // cell is a managed reference from here on.
        for param_idx in 1..=num_params {
            let param_vartype = self
                .sym
                .entry(name_of_func)
                .function
                .as_ref()
                .and_then(|f| f.parameters.get(param_idx))
                .map(|p| p.vartype)
                .unwrap_or(Symbol::NONE);
            if !self.sym.is_dyn_vartype(param_vartype) {
                continue;
            }

            // The return address sits on top, so the nth parameter is at
            // the (n+1)th cell.
            self.scrip.write_cmd1(
                Opcode::LoadSpOffs,
                (SIZE_OF_STACK_CELL * (param_idx + 1)) as CodeCell,
            );
            self.set_reg(Register::Mar);
            self.scrip.write_cmd1(Opcode::MemRead, Register::Ax.cell());
            self.set_reg(Register::Ax);
            self.scrip.write_cmd1(Opcode::MemInitPtr, Register::Ax.cell());
        }

        // Declare 'this' when the function is a non-static method. No
        // memory is allocated for it.
        {
            let this_entry = self.sym.entry_mut(kw::THIS);
            let var = this_entry.variable.as_mut().expect("'this' is predefined");
            var.vartype = Symbol::NONE;
            if Symbol::NONE != struct_of_func && !func_is_static {
                this_entry.scope = 0;
                this_entry.accessed = true;
                let var = this_entry.variable.as_mut().expect("'this' is predefined");
                var.vartype = struct_of_func; // not a dynpointer
                var.qualifiers = TypeQualifiers::READONLY;
                var.offset = 0;
            }
        }
        Ok(())
    }

    fn handle_end_of_func_body(
        &mut self,
        struct_of_current_func: &mut Symbol,
        name_of_current_func: &mut Symbol,
    ) -> Result<(), CompileError> {
        let dead_end = self.nest.top().jump_out_level <= PARAMETER_SCOPE;
        if !dead_end {
            // Free the dynpointers of parameters and locals alike.
            self.free_dynpointers_of_locals(1)?;
            // Pop the locals proper but leave the parameters: the return
            // address sits directly above them and RET needs it. (The
            // caller pops the parameters.)
            self.remove_locals_from_stack(FUNCTION_SCOPE);
        }
        // All function variables, parameters included, become invalid.
        self.restore_locals_from_symtable(PARAMETER_SCOPE);

        if !dead_end {
            let return_vartype = self.sym.func_return_vartype(*name_of_current_func);
            if kw::VOID != return_vartype {
                self.scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 0);
                self.set_reg(Register::Ax);
            }
            if kw::VOID != return_vartype && !self.sym.is_any_integer_vartype(return_vartype) {
                self.warn(
                    "Code execution may reach this point and the default '0' return isn't suitable (did you forget a 'return' statement?)",
                );
            }
            self.scrip.write_cmd(Opcode::Ret);
        }

        *name_of_current_func = Symbol::NONE;
        *struct_of_current_func = Symbol::NONE;
        self.sym
            .entry_mut(kw::THIS)
            .variable
            .as_mut()
            .expect("'this' is predefined")
            .vartype = Symbol::NONE;

        self.nest.pop(); // the function-variables frame
        self.nest.pop(); // the parameters frame

        // The return address has been popped; the offset moves back to
        // the start of the parameters.
        self.scrip.offset_to_local_var_block -= SIZE_OF_STACK_CELL;
        Ok(())
    }

    fn handle_end_of_brace_command(&mut self) -> Result<(), CompileError> {
        let depth = self.nest.top_level();
        self.free_dynpointers_of_locals(depth)?;
        self.remove_locals_from_stack(depth);
        self.restore_locals_from_symtable(depth);
        let jumpout_level = self.nest.top().jump_out_level;
        self.nest.pop();
        if self.nest.top().jump_out_level > jumpout_level {
            self.nest.top_mut().jump_out_level = jumpout_level;
        }
        Ok(())
    }

    // ==========================================================================
    // if / else
    // ==========================================================================

    fn parse_if(&mut self) -> Result<(), CompileError> {
        self.parse_delimited_expression(kw::OPEN_PAREN)?;

        self.nest.push(NestingType::If);

        // The check result is in AX: "if (AX == 0) jump past the branch".
        self.scrip.write_cmd1(Opcode::Jz, CODE_CELL_PLACEHOLDER);
        let operand_loc = self.scrip.len() - 1;
        self.nest.top_mut().jump_out.add_param_at(operand_loc);
        Ok(())
    }

    fn handle_end_of_if(&mut self) -> Result<bool, CompileError> {
        if kw::ELSE != self.src.peek_next() {
            let line = self.src.line();
            let mut jump_out = std::mem::take(&mut self.nest.top_mut().jump_out);
            jump_out.patch(self.scrip, line);
            self.nest.pop();
            return Ok(false);
        }

        self.src.get_next(); // Eat 'else'
        {
            let top = self.nest.top_mut();
            top.branch_jump_out_level = top.jump_out_level;
            top.jump_out_level = NO_JUMP_OUT;
        }

        // End of the 'then' branch: jump out over the 'else' branch.
        self.scrip.write_cmd1(Opcode::Jmp, CODE_CELL_PLACEHOLDER);
        let jmp_operand = self.scrip.len() - 1;
        // The jump after the condition lands here, at the 'else' start.
        let line = self.src.line();
        let mut jump_out = std::mem::take(&mut self.nest.top_mut().jump_out);
        jump_out.patch(self.scrip, line);
        jump_out.add_param_at(jmp_operand);
        self.nest.top_mut().jump_out = jump_out;
        // Prevent matching several 'else' clauses to one 'if'.
        self.nest.set_nesting_type(NestingType::Else);
        Ok(true)
    }

    fn handle_end_of_else(&mut self) -> Result<(), CompileError> {
        let line = self.src.line();
        let mut jump_out = std::mem::take(&mut self.nest.top_mut().jump_out);
        jump_out.patch(self.scrip, line);
        let jumpout_level = self
            .nest
            .top()
            .branch_jump_out_level
            .max(self.nest.top().jump_out_level);
        self.nest.pop();
        if self.nest.top().jump_out_level > jumpout_level {
            self.nest.top_mut().jump_out_level = jumpout_level;
        }
        Ok(())
    }

    // ==========================================================================
    // while / do
    // ==========================================================================

    fn parse_while(&mut self) -> Result<(), CompileError> {
        // Where the condition evaluation starts.
        let condition_eval_loc = self.scrip.len();

        self.parse_delimited_expression(kw::OPEN_PAREN)?;

        self.nest.push(NestingType::While);

        self.scrip.write_cmd1(Opcode::Jz, CODE_CELL_PLACEHOLDER);
        let operand_loc = self.scrip.len() - 1;
        let top = self.nest.top_mut();
        top.jump_out.add_param_at(operand_loc);
        top.start.set(condition_eval_loc);
        Ok(())
    }

    fn handle_end_of_while(&mut self) -> Result<(), CompileError> {
        // The inner level of a 'for' loop: drop the yanked increment
        // chunk back in.
        if self.nest.chunks_exist() {
            let write_start = self.scrip.len();
            let top_level = self.nest.top_level();
            let id = self.nest.write_chunk(self.scrip, top_level, 0);
            self.fcm.update_on_writing(write_start, id);
            self.fim.update_on_writing(write_start, id);
            self.nest.clear_chunks();
        }

        // Jump back to the condition.
        let line = self.src.line();
        let start = self.nest.top().start;
        start.write_jump(self.scrip, Opcode::Jmp, line);

        let mut jump_out = std::mem::take(&mut self.nest.top_mut().jump_out);
        jump_out.patch(self.scrip, line);
        self.nest.pop();

        if NestingType::For != self.nest.nesting_type() {
            return Ok(());
        }

        // The outer level of the 'for': it can hold definitions from the
        // init clause, e.g. "for (int i = 0; ...)". Free them like a
        // brace-delimited block's.
        self.handle_end_of_brace_command()
    }

    fn parse_do(&mut self) -> Result<(), CompileError> {
        self.nest.push(NestingType::Do);
        self.nest.top_mut().start.set(self.scrip.len());
        Ok(())
    }

    fn handle_end_of_do(&mut self) -> Result<(), CompileError> {
        let next = self.src.get_next();
        self.expect_msg(
            kw::WHILE,
            next,
            "Expected the 'while' of a 'do ... while(...)' statement",
        )?;
        self.parse_delimited_expression(kw::OPEN_PAREN)?;
        let next = self.src.get_next();
        self.expect(kw::SEMICOLON, next)?;

        // Jump back to the loop start while the condition holds.
        let line = self.src.line();
        let start = self.nest.top().start;
        start.write_jump(self.scrip, Opcode::Jnz, line);
        // Jumps out of the loop land here.
        let mut jump_out = std::mem::take(&mut self.nest.top_mut().jump_out);
        jump_out.patch(self.scrip, line);

        let jumpout_level = self.nest.top().jump_out_level;
        self.nest.pop();
        if self.nest.top().jump_out_level > jumpout_level {
            self.nest.top_mut().jump_out_level = jumpout_level;
        }
        Ok(())
    }

    // ==========================================================================
    // for
    // ==========================================================================

    fn parse_for_init_clause_vardecl(&mut self) -> Result<(), CompileError> {
        let mut vartype = self.src.get_next();
        self.set_dynpointer_in_managed_vartype(&mut vartype);
        self.eat_dynpointer_symbol_if_present(vartype)?;

        loop {
            let varname = self.src.get_next();
            let nextsym = self.src.peek_next();
            if kw::SCOPE_RES == nextsym || kw::OPEN_PAREN == nextsym {
                return Err(
                    self.user_error("Function definition not allowed in 'for' loop initialiser")
                );
            }
            self.parse_vardecl(
                TypeQualifiers::default(),
                vartype,
                varname,
                ScopeType::Local,
            )?;

            let punctuation = self.src.peek_next();
            self.expect_one_of(&[kw::COMMA, kw::SEMICOLON], punctuation, None)?;
            if kw::COMMA == punctuation {
                self.src.get_next(); // Eat ','
            }
            if kw::SEMICOLON == punctuation {
                return Ok(());
            }
        }
    }

    fn parse_for(&mut self) -> Result<(), CompileError> {
        // "for (I; E; C) BODY" is equivalent to "{ I; while (E) { BODY; C } }"
        // and uses two levels of the nesting stack: the outer one holds I,
        // the inner one the while loop.

        self.nest.push(NestingType::For);

        let next = self.src.get_next();
        self.expect(kw::OPEN_PAREN, next)?;

        let peeksym = self.src.peek_next();
        if kw::CLOSE_PAREN == peeksym {
            return Err(self.user_error(
                "Empty parentheses '()' aren't allowed after 'for' (write 'for(;;)' instead)",
            ));
        }

        // Initialization clause (I).
        if kw::SEMICOLON == peeksym {
            // Empty init clause.
        } else if self.sym.is_vartype(peeksym) {
            self.parse_for_init_clause_vardecl()?;
        } else {
            self.src.get_next();
            self.parse_assignment_or_expression()?;
        }
        let next = self.src.get_next();
        self.expect_msg(
            kw::SEMICOLON,
            next,
            "Expected ';' after for loop initializer clause",
        )?;

        // Where the condition code starts.
        let while_cond_loc = self.scrip.len();

        // While clause (E). A line marker must be re-emitted here: the
        // loop jumps back to this spot from below.
        self.scrip.invalidate_last_lineno();
        if kw::SEMICOLON == self.src.peek_next() {
            // No while clause means "true".
            self.scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 1);
            self.set_reg(Register::Ax);
        } else {
            self.parse_expression_to_ax()?;
        }
        let next = self.src.get_next();
        self.expect_msg(kw::SEMICOLON, next, "Expected ';' after for loop while clause")?;

        // Where the iterate-clause code starts.
        let iterate_clause_loc = self.scrip.len();
        let iterate_clause_fixups_start = self.scrip.fixups.len();
        let iterate_clause_lineno = self.src.line();

        // Iterate clause (C).
        if kw::CLOSE_PAREN != self.src.peek_next() {
            self.src.get_next();
            self.parse_assignment_or_expression()?;
        }
        let next = self.src.get_next();
        self.expect_msg(
            kw::CLOSE_PAREN,
            next,
            "Expected ')' after for loop iterate clause",
        )?;

        // Inner nesting level.
        self.nest.push(NestingType::While);
        self.nest.top_mut().start.set(while_cond_loc);

        // The iterate code was just emitted, but it belongs at the bottom
        // of the loop: rip it out and stash it in the nesting frame.
        let yank_size = self.scrip.len() - iterate_clause_loc;
        let id = self.nest.yank_chunk(
            self.scrip,
            iterate_clause_lineno,
            iterate_clause_loc,
            iterate_clause_fixups_start,
        );
        self.fcm.update_on_yanking(iterate_clause_loc, yank_size, id);
        self.fim.update_on_yanking(iterate_clause_loc, yank_size, id);

        // "If the condition is false, jump over the loop body."
        self.scrip.write_cmd1(Opcode::Jz, CODE_CELL_PLACEHOLDER);
        let operand_loc = self.scrip.len() - 1;
        self.nest.top_mut().jump_out.add_param_at(operand_loc);
        Ok(())
    }

    // ==========================================================================
    // switch
    // ==========================================================================

    fn parse_switch(&mut self) -> Result<(), CompileError> {
        let rp = RestorePoint::new(self.scrip);

        let switch_expr = self.parse_delimited_expression(kw::OPEN_PAREN)?;

        let next = self.src.get_next();
        self.expect(kw::OPEN_BRACE, next)?;

        if kw::CLOSE_BRACE == self.src.peek_next() {
            // A switch without any clauses is a no-op.
            rp.restore(self.scrip);
            self.src.get_next(); // Eat '}'
            return Ok(());
        }

        // BX holds the switch value for the case comparisons.
        self.scrip
            .write_cmd2(Opcode::RegToReg, Register::Ax.cell(), Register::Bx.cell());
        self.set_reg(Register::Bx);

        self.nest.push(NestingType::Switch);
        self.nest.top_mut().switch_expr_vartype = switch_expr.vartype;

        // Jump ahead to the jump table.
        self.scrip.write_cmd1(Opcode::Jmp, CODE_CELL_PLACEHOLDER);
        let operand_loc = self.scrip.len() - 1;
        self.nest.top_mut().switch_jumptable.add_param_at(operand_loc);

        let next = self.src.peek_next();
        self.expect_one_of(&[kw::CASE, kw::DEFAULT], next, None)
    }

    fn parse_switch_fallthrough(&mut self) -> Result<(), CompileError> {
        if NestingType::Switch != self.nest.nesting_type() {
            return Err(self.user_error(
                "'fallthrough' is only allowed directly within a 'switch' block",
            ));
        }
        let next = self.src.get_next();
        self.expect(kw::SEMICOLON, next)?;
        let next = self.src.peek_next();
        self.expect_one_of(&[kw::CASE, kw::DEFAULT], next, None)
    }

    fn parse_switch_label(&mut self, case_or_default: Symbol) -> Result<(), CompileError> {
        let start_of_code_loc = self.scrip.len();
        let start_of_fixups = self.scrip.fixups.len();
        let start_of_code_lineno = self.src.line();

        if NestingType::Switch != self.nest.nesting_type() {
            return Err(self.user_error(format!(
                "'{}' is only allowed directly within a 'switch' block",
                self.sym.name(case_or_default)
            )));
        }

        if !self.nest.top().switch_case_start.is_empty() {
            let last_case_start = self
                .nest
                .top()
                .switch_case_start
                .last()
                .expect("non-empty")
                .get();
            if last_case_start != start_of_code_loc
                && self.nest.top().jump_out_level > self.nest.top_level()
            {
                // Don't warn when 'fallthrough;' immediately precedes.
                let codeloc = self.src.get_cursor();
                let preceded_by_fallthrough = codeloc >= 3
                    && kw::SEMICOLON == self.src.token_at(codeloc - 2)
                    && kw::FALLTHROUGH == self.src.token_at(codeloc - 3);
                if !preceded_by_fallthrough {
                    self.warn(
                        "Code execution may fall through to the next case (did you forget a 'break;'?)",
                    );
                }
            }

            let top = self.nest.top_mut();
            top.branch_jump_out_level = top.branch_jump_out_level.max(top.jump_out_level);
        }
        self.nest.top_mut().jump_out_level = NO_JUMP_OUT;

        let mut case_code_start = BackwardJumpDest::new();
        case_code_start.set_to_current(self.scrip);
        self.nest.top_mut().switch_case_start.push(case_code_start);

        if kw::DEFAULT == case_or_default {
            if self.nest.top().switch_default.is_some() {
                return Err(self.user_error("This switch block already has a 'default:' label"));
            }
            let idx = self.nest.top().switch_case_start.len() - 1;
            self.nest.top_mut().switch_default = Some(idx);
        } else {
            // Compare the switch value (in BX) with the case expression.
            let mut case_vartype = Symbol::NONE;
            self.register_guard(&[Register::Bx], |p| {
                let expr = p.parse_expression_to_ax()?;
                case_vartype = expr.vartype;
                Ok(())
            })?;

            // The 'case' and 'switch' vartypes must match.
            let switch_vartype = self.nest.top().switch_expr_vartype;
            self.check_vartype_mismatch(case_vartype, switch_vartype, false, "")?;
        }

        // Rip the case-expression code out; the jump table re-emits it.
        let yank_size = self.scrip.len() - start_of_code_loc;
        let id = self.nest.yank_chunk(
            self.scrip,
            start_of_code_lineno,
            start_of_code_loc,
            start_of_fixups,
        );
        self.fcm.update_on_yanking(start_of_code_loc, yank_size, id);
        self.fim.update_on_yanking(start_of_code_loc, yank_size, id);

        let next = self.src.get_next();
        self.expect(kw::COLON, next)
    }

    fn handle_end_of_switch(&mut self) -> Result<(), CompileError> {
        // The last branch has ended.
        {
            let top = self.nest.top_mut();
            top.branch_jump_out_level = top.branch_jump_out_level.max(top.jump_out_level);
        }

        // Unless execution cannot reach this point, jump to the exit so
        // control doesn't fall into the jump table.
        if self.nest.top().jump_out_level > self.nest.top_level() {
            self.scrip.write_cmd1(Opcode::Jmp, CODE_CELL_PLACEHOLDER);
            let operand_loc = self.scrip.len() - 1;
            self.nest.top_mut().jump_out.add_param_at(operand_loc);
        }

        // The jump table starts here.
        let line = self.src.line();
        let mut jumptable = std::mem::take(&mut self.nest.top_mut().switch_jumptable);
        jumptable.patch(self.scrip, line);

        // Strings compare as strings, not as pointers.
        let eq_opcode = if self
            .sym
            .is_any_string_vartype(self.nest.top().switch_expr_vartype)
        {
            Opcode::StringsEqual
        } else {
            Opcode::IsEqual
        };

        let number_of_cases = self.nest.top().chunks.len();
        let default_idx = self.nest.top().switch_default;
        let top_level = self.nest.top_level();
        for cases_idx in 0..number_of_cases {
            if Some(cases_idx) == default_idx {
                continue;
            }

            // Re-emit the case expression; its result lands in AX.
            let codesize = self.scrip.len();
            let id = self.nest.write_chunk(self.scrip, top_level, cases_idx);
            self.fcm.update_on_writing(codesize, id);
            self.fim.update_on_writing(codesize, id);

            // "When the switch value equals the case value, jump to the
            // case body."
            self.scrip
                .write_cmd2(eq_opcode, Register::Ax.cell(), Register::Bx.cell());
            let line = self.src.line();
            let case_start = self.nest.top().switch_case_start[cases_idx];
            case_start.write_jump(self.scrip, Opcode::Jnz, line);
        }

        if let Some(default_idx) = default_idx {
            let line = self.src.line();
            let default_start = self.nest.top().switch_case_start[default_idx];
            default_start.write_jump(self.scrip, Opcode::Jmp, line);
        }

        let line = self.src.line();
        let mut jump_out = std::mem::take(&mut self.nest.top_mut().jump_out);
        jump_out.patch(self.scrip, line);

        // Without a 'default:', control may continue after the switch.
        let overall_jumpout_level = if default_idx.is_none() {
            self.nest.top_level()
        } else {
            self.nest.top().branch_jump_out_level
        };

        self.nest.pop();
        if self.nest.top().jump_out_level > overall_jumpout_level {
            self.nest.top_mut().jump_out_level = overall_jumpout_level;
        }
        Ok(())
    }

    // ==========================================================================
    // break / continue / return
    // ==========================================================================

    fn parse_break(&mut self) -> Result<(), CompileError> {
        let next = self.src.get_next();
        self.expect(kw::SEMICOLON, next)?;

        // Find the construct the break applies to. (Similar to, but
        // different from, 'continue': a switch counts here.)
        let mut nesting_level = self.nest.top_level();
        while nesting_level > 0 {
            let ltype = self.nest.nesting_type_at(nesting_level);
            if NestingType::Do == ltype
                || NestingType::Switch == ltype
                || NestingType::While == ltype
            {
                break;
            }
            nesting_level -= 1;
        }
        if 0 == nesting_level {
            return Err(
                self.user_error("Can only use 'break' inside a loop or a 'switch' statement block")
            );
        }

        {
            let top = self.nest.top_mut();
            top.jump_out_level = top.jump_out_level.min(nesting_level);
        }

        let save_offset = self.scrip.offset_to_local_var_block;
        self.free_dynpointers_of_locals(nesting_level + 1)?;
        self.remove_locals_from_stack(nesting_level + 1);

        // Jump out of the loop or switch.
        self.scrip.write_cmd1(Opcode::Jmp, CODE_CELL_PLACEHOLDER);
        let operand_loc = self.scrip.len() - 1;
        self.nest
            .frame_mut(nesting_level)
            .jump_out
            .add_param_at(operand_loc);

        // The locals only die when control actually takes the break; on
        // the code paths below the statement they are still alive.
        self.scrip.offset_to_local_var_block = save_offset;
        Ok(())
    }

    fn parse_continue(&mut self) -> Result<(), CompileError> {
        let next = self.src.get_next();
        self.expect(kw::SEMICOLON, next)?;

        // Find the loop the continue applies to.
        let mut nesting_level = self.nest.top_level();
        while nesting_level > 0 {
            let ltype = self.nest.nesting_type_at(nesting_level);
            if NestingType::Do == ltype || NestingType::While == ltype {
                break;
            }
            nesting_level -= 1;
        }
        if 0 == nesting_level {
            return Err(self.user_error("Can only use 'continue' inside a loop"));
        }

        {
            let top = self.nest.top_mut();
            top.jump_out_level = top.jump_out_level.min(nesting_level);
        }

        let save_offset = self.scrip.offset_to_local_var_block;
        self.free_dynpointers_of_locals(nesting_level + 1)?;
        self.remove_locals_from_stack(nesting_level + 1);

        // In a 'for' loop, execute the yanked increment first.
        if self.nest.chunks_exist_at(nesting_level) {
            let write_start = self.scrip.len();
            let id = self.nest.write_chunk(self.scrip, nesting_level, 0);
            self.fcm.update_on_writing(write_start, id);
            self.fim.update_on_writing(write_start, id);
        }

        // Jump back to the loop start.
        let line = self.src.line();
        let start = self.nest.frame(nesting_level).start;
        start.write_jump(self.scrip, Opcode::Jmp, line);

        // As with break: the locals survive on the paths below.
        self.scrip.offset_to_local_var_block = save_offset;
        Ok(())
    }

    fn parse_return(&mut self, name_of_current_func: Symbol) -> Result<(), CompileError> {
        let function_return_type = self.sym.func_return_vartype(name_of_current_func);

        if kw::SEMICOLON != self.src.peek_next() {
            if kw::VOID == function_return_type {
                return Err(self.user_error("Cannot return a value from a 'void' function"));
            }

            // Parse what is being returned.
            let expr = self.parse_expression_to_ax()?;
            let mut vartype = expr.vartype;
            self.convert_ax_string_to_string_object(function_return_type, &mut vartype);

            self.check_vartype_mismatch(vartype, function_return_type, true, "")?;

            if self.sym.is_oldstring(vartype) && ScopeType::Local == expr.scope {
                return Err(self.user_error("Cannot return a local 'string' from a function"));
            }
        } else if self.sym.is_any_integer_vartype(function_return_type) {
            self.scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 0);
            self.set_reg(Register::Ax);
        } else if kw::VOID != function_return_type {
            return Err(self.user_error(format!(
                "Must return a '{}' value from function",
                self.sym.name(function_return_type)
            )));
        }

        let next = self.src.get_next();
        self.expect(kw::SEMICOLON, next)?;

        {
            let top = self.nest.top_mut();
            top.jump_out_level = top.jump_out_level.min(PARAMETER_SCOPE);
        }

        // Free local pointers, protecting a managed return value.
        if self.sym.is_dyn_vartype(function_return_type) {
            self.free_dynpointers_of_all_locals_dyn_result()?;
        } else if kw::VOID != function_return_type {
            self.free_dynpointers_of_all_locals_keep_ax()?;
        } else {
            self.free_dynpointers_of_locals(0)?;
        }

        let save_offset = self.scrip.offset_to_local_var_block;
        // Pop the locals but leave the parameters: the return address sits
        // directly above them and RET needs it.
        self.remove_locals_from_stack(FUNCTION_SCOPE);

        self.scrip.write_cmd(Opcode::Ret);

        // The locals only disappear when control takes the 'return'; below
        // the statement they are still on the stack.
        self.scrip.offset_to_local_var_block = save_offset;
        Ok(())
    }
}
