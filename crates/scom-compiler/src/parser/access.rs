//! The access-data subsystem.
//!
//! Walks `obj.field[index].field…` chains and emits the read or write
//! sequence: dynamic-pointer dereferences with null checks, compile-time
//! offset accumulation through the memory-location tracker, array bounds
//! checks, function and attribute calls. Writing walks the same chain; the
//! last clause then becomes the store (or the setter call).

use scom_core::{CompileError, ScopeType, TypeQualifiers, SIZE_OF_STACK_CELL, STRINGBUFFER_LENGTH};

use crate::bytecode::{CodeCell, Opcode, Register, RestorePoint, CODE_CELL_PLACEHOLDER};
use crate::emit::{BackwardJumpDest, ForwardJump};
use crate::memloc::MemoryLocation;
use crate::source::SrcWindow;
use crate::symtable::{kw, Symbol, VartypeShape};

use super::expr::{write_cmd_for_size, Expr, ValueLocation};
use super::{Parser, VariableAccess};

/// Name of the synthesised import that yields a dynarray's length.
const DYNARRAY_LENGTH_FUNC: &str = "__Builtin_DynamicArrayLength";

impl<'a> Parser<'a> {
    // ==========================================================================
    // The clause walker
    // ==========================================================================

    /// Access a variable, constant, literal, function call, or
    /// `struct.component…` cascade for reading or writing.
    ///
    /// On return the value is in AX, pointed to by MAR, a compile-time
    /// literal, or — when writing resolved to an attribute — the attribute
    /// symbol for the caller to invoke the setter on.
    pub(crate) fn access_data(
        &mut self,
        access_type: VariableAccess,
        w: SrcWindow,
    ) -> Result<(Expr, bool), CompileError> {
        self.src.start_read(w);
        if w.is_empty() {
            return Err(self.internal_error("Empty expression"));
        }

        let mut func_was_called = false;

        // MAR is set lazily so that offsets accumulate at compile time.
        let mut mloc = MemoryLocation::new();

        let mut clause_is_last = self.access_data_is_clause_last(w);

        // When reading, every access is a read. When writing, every access
        // except the last is a read and the last is the write.
        let first_access = if clause_is_last {
            access_type
        } else {
            VariableAccess::Reading
        };
        let (mut expr, mut implied_this_dot, mut static_access) =
            self.access_data_first_clause(first_access, w, &mut mloc, &mut func_was_called)?;

        // When "this." was implied, no '.' is coming up but the clause
        // after it must be processed anyway.
        while kw::DOT == self.src.peek_next_in(w) || implied_this_dot {
            if !implied_this_dot {
                self.src.get_next_in(w); // Eat '.'
            }
            // Note: 'implied_this_dot' stays live into the clause below.

            let outer_vartype = expr.vartype;

            if self.sym.is_dynpointer_vartype(expr.vartype) {
                self.access_data_dereference(&mut expr.vloc, &mut mloc)?;
                expr.vartype = self
                    .sym
                    .vartype_without(VartypeShape::Dynpointer, expr.vartype);
            }

            if self.sym.is_dynarray_vartype(expr.vartype)
                && self.sym.find_or_add("Length") == self.src.peek_next_in(w)
            {
                // The pseudo-attribute 'Length' yields the dynarray length.
                self.src.get_next_in(w); // Eat 'Length'
                self.access_data_dynarray_length(&mut mloc, &mut expr)?;
                implied_this_dot = false;
                continue;
            }

            if !self.sym.is_struct_vartype(expr.vartype)
                || !self.sym.is_atomic_vartype(expr.vartype)
            {
                if self.sym.is_any_array_vartype(expr.vartype) {
                    return Err(self
                        .user_error("Expected a struct in front of '.' but found an array instead"));
                }
                return Err(self.user_error(format!(
                    "Expected a struct in front of '.' but found an expression of type '{}' instead",
                    self.sym.name(outer_vartype)
                )));
            }

            if self.src.reached_end(w) {
                return Err(self.user_error("Expected struct component after '.' but did not find it"));
            }

            clause_is_last = self.access_data_is_clause_last(w);
            let clause_access = if clause_is_last {
                access_type
            } else {
                VariableAccess::Reading
            };
            self.access_data_subsequent_clause(
                clause_access,
                implied_this_dot,
                static_access,
                w,
                &mut expr,
                &mut mloc,
                &mut func_was_called,
            )?;

            // The next clause, if any, depends on this access, no longer
            // on 'this', and can't be static.
            implied_this_dot = false;
            static_access = false;
        }

        if matches!(
            expr.vloc,
            ValueLocation::RuntimeInAx | ValueLocation::CompileTimeLiteral(_)
        ) {
            return Ok((expr, func_was_called));
        }

        self.set_reg(Register::Mar);
        let line = self.src.line();
        mloc.make_mar_current(self.scrip, line)
            .map_err(|msg| self.internal_error(msg))?;
        Ok((expr, func_was_called))
    }

    /// Whether the clause at the cursor is the last before any assignment.
    fn access_data_is_clause_last(&mut self, w: SrcWindow) -> bool {
        let cursor = self.src.get_cursor();
        self.skip_to_in(&[kw::DOT], w);
        let is_last = kw::DOT != self.src.peek_next_in(w);
        self.src.set_cursor(cursor);
        is_last
    }

    /// Dispatch on the first clause of the chain. Returns
    /// `(expr, implied_this_dot, static_access)`.
    fn access_data_first_clause(
        &mut self,
        access_type: VariableAccess,
        w: SrcWindow,
        mloc: &mut MemoryLocation,
        func_was_called: &mut bool,
    ) -> Result<(Expr, bool, bool), CompileError> {
        let first_sym = self.src.peek_next_in(w);

        if kw::THIS == first_sym {
            self.src.get_next_in(w);
            let vartype = self.sym.get_vartype(kw::THIS);
            if Symbol::NONE == vartype {
                return Err(self.user_error("'this' is only legal in non-static struct functions"));
            }

            self.scrip
                .write_cmd2(Opcode::RegToReg, Register::Op.cell(), Register::Mar.cell());
            self.set_reg(Register::Mar);
            self.scrip.write_cmd(Opcode::CheckNull);
            mloc.reset();

            let mut implied_this_dot = false;
            if kw::DOT == self.src.peek_next_in(w) {
                self.src.get_next_in(w);
                // Going forward, "this." is implied: it has been gobbled.
                implied_this_dot = true;
            }
            let expr = Expr {
                vloc: ValueLocation::MarPointsToValue,
                scope: ScopeType::Global,
                vartype,
            };
            return Ok((expr, implied_this_dot, false));
        }

        if kw::NULL == first_sym || self.sym.is_constant(first_sym) || self.sym.is_literal(first_sym)
        {
            if VariableAccess::Reading != access_type {
                return Err(self.user_error(format!(
                    "Cannot assign a value to '{}'",
                    self.sym.name(self.src.at(w, 0))
                )));
            }
            self.src.get_next_in(w); // Eat the literal
            let mut lit = first_sym;
            while self.sym.is_constant(lit) {
                lit = self.sym.entry(lit).constant.map(|c| c.value_sym).unwrap_or(Symbol::NONE);
            }
            let expr = self.set_compile_time_literal(lit)?;
            return Ok((expr, false, false));
        }

        if self.sym.is_function(first_sym) {
            *func_was_called = true;
            let call_w = SrcWindow::new(self.src.get_cursor(), w.end() - self.src.get_cursor());
            let vartype = self.access_data_function_call(first_sym, call_w, mloc)?;
            let mut expr = Expr {
                vloc: ValueLocation::RuntimeInAx,
                scope: ScopeType::Global,
                vartype,
            };
            if self.sym.is_dynarray_vartype(expr.vartype) {
                let mut vloc = expr.vloc;
                let mut vartype = expr.vartype;
                self.access_data_process_any_array_index(w, &mut vloc, mloc, &mut vartype)?;
                expr.vloc = vloc;
                expr.vartype = vartype;
            }
            return Ok((expr, false, false));
        }

        if self.sym.is_variable(first_sym) {
            let scope_type = self.sym.get_scope_type(first_sym);
            // Parameters may be 'return'ed although they are local: their
            // memory lies outside the function's own frame.
            let return_scope = if self.sym.is_parameter(first_sym) {
                ScopeType::Global
            } else {
                scope_type
            };
            let mut vloc = ValueLocation::MarPointsToValue;
            let vartype =
                self.access_data_variable(scope_type, access_type, w, mloc, &mut vloc)?;
            let expr = Expr {
                vloc,
                scope: return_scope,
                vartype,
            };
            return Ok((expr, false, false));
        }

        if self.sym.is_vartype(first_sym) {
            // Static access; the next clause must be a static member.
            let vartype = self.src.get_next_in(w);
            mloc.reset();
            let expr = Expr {
                vloc: ValueLocation::MarPointsToValue,
                scope: ScopeType::Global,
                vartype,
            };
            return Ok((expr, false, true));
        }

        // An unknown symbol that resolves as a component of 'this' is an
        // implicit "this.<symbol>".
        let vartype_of_this = self.sym.get_vartype(kw::THIS);
        if self.sym.is_vartype(vartype_of_this)
            && self.sym.has_own_component(vartype_of_this, first_sym)
        {
            self.scrip
                .write_cmd2(Opcode::RegToReg, Register::Op.cell(), Register::Mar.cell());
            self.set_reg(Register::Mar);
            self.scrip.write_cmd(Opcode::CheckNull);
            mloc.reset();

            let expr = Expr {
                vloc: ValueLocation::MarPointsToValue,
                scope: ScopeType::Global,
                vartype: vartype_of_this,
            };
            // The component must be read again by the subsequent clause.
            return Ok((expr, true, false));
        }

        Err(self.user_error(format!("Unexpected '{}'", self.sym.name(first_sym))))
    }

    /// Process a component clause on the current vartype.
    #[allow(clippy::too_many_arguments)]
    fn access_data_subsequent_clause(
        &mut self,
        access_type: VariableAccess,
        access_via_this: bool,
        static_access: bool,
        w: SrcWindow,
        expr: &mut Expr,
        mloc: &mut MemoryLocation,
        func_was_called: &mut bool,
    ) -> Result<(), CompileError> {
        let unqualified = self.src.peek_next_in(w);
        let qualified = self.sym.find_component_in_struct(expr.vartype, unqualified);

        if Symbol::NONE == qualified {
            return Err(self.user_error(format!(
                "Expected a component of '{}', found '{}' instead",
                self.sym.name(expr.vartype),
                self.sym.name(unqualified)
            )));
        }

        if self.sym.is_function(qualified) {
            *func_was_called = true;
            let func_is_static = self
                .sym
                .entry(qualified)
                .function
                .as_ref()
                .map(|f| f.qualifiers.contains(TypeQualifiers::STATIC))
                .unwrap_or(false);
            if static_access && !func_is_static {
                return Err(self.user_error(format!(
                    "Must specify a specific object for non-static function {}",
                    self.sym.name(qualified)
                )));
            }

            expr.vloc = ValueLocation::RuntimeInAx;
            expr.scope = ScopeType::Local;
            let call_w = SrcWindow::new(self.src.get_cursor(), w.end() - self.src.get_cursor());
            expr.vartype = self.access_data_function_call(qualified, call_w, mloc)?;
            if self.sym.is_dynarray_vartype(expr.vartype) {
                let mut vloc = expr.vloc;
                let mut vartype = expr.vartype;
                self.access_data_process_any_array_index(w, &mut vloc, mloc, &mut vartype)?;
                expr.vloc = vloc;
                expr.vartype = vartype;
            }
            return Ok(());
        }

        if self.sym.is_constant(qualified) {
            self.src.get_next_in(w); // Eat the constant symbol
            let value_sym = self
                .sym
                .entry(qualified)
                .constant
                .map(|c| c.value_sym)
                .unwrap_or(Symbol::NONE);
            expr.vloc = ValueLocation::CompileTimeLiteral(value_sym);
            expr.vartype = self.sym.literal_vartype(value_sym);
            return Ok(());
        }

        if !self.sym.is_variable(qualified) {
            return Err(self.user_error(format!(
                "Expected an attribute, constant, function, or variable component of '{}', found '{}' instead",
                self.sym.name(expr.vartype),
                self.sym.name(unqualified)
            )));
        }
        let var_is_static = self
            .sym
            .entry(qualified)
            .variable
            .as_ref()
            .map(|v| v.qualifiers.contains(TypeQualifiers::STATIC))
            .unwrap_or(false);
        if static_access && !var_is_static {
            return Err(self.user_error(format!(
                "Must specify a specific object for non-static component {}",
                self.sym.name(qualified)
            )));
        }

        if self.sym.is_attribute(qualified) {
            *func_was_called = true;
            // Make MAR point to the struct of the attribute.
            let line = self.src.line();
            mloc.make_mar_current(self.scrip, line)
                .map_err(|msg| self.internal_error(msg))?;
            self.set_reg(Register::Mar);
            if VariableAccess::Writing == access_type {
                // The attribute can't be processed here; the assignment
                // this came from will invoke the setter.
                expr.vartype = self.sym.get_vartype(qualified);
                expr.vloc = ValueLocation::AttributeFunction(qualified);
                return Ok(());
            }
            expr.vloc = ValueLocation::RuntimeInAx;
            expr.scope = ScopeType::Local;
            let mut vartype = expr.vartype;
            self.access_data_call_attribute_func(false, w, &mut vartype)?;
            expr.vartype = vartype;
            return Ok(());
        }

        // A plain variable component.
        expr.vloc = ValueLocation::MarPointsToValue;
        expr.vartype =
            self.access_data_struct_member(qualified, access_type, access_via_this, w, mloc)?;
        let mut vloc = expr.vloc;
        let mut vartype = expr.vartype;
        self.access_data_process_any_array_index(w, &mut vloc, mloc, &mut vartype)?;
        expr.vloc = vloc;
        expr.vartype = vartype;
        Ok(())
    }

    fn access_data_variable(
        &mut self,
        scope_type: ScopeType,
        access_type: VariableAccess,
        w: SrcWindow,
        mloc: &mut MemoryLocation,
        vloc: &mut ValueLocation,
    ) -> Result<Symbol, CompileError> {
        let varname = self.src.get_next_in(w);
        if ScopeType::Import == scope_type {
            self.sym.mark_accessed(varname);
        }
        let var = self.sym.entry(varname).variable.as_ref().expect("variable role");
        let offset = var.offset;
        let qualifiers = var.qualifiers;

        if VariableAccess::Reading != access_type && qualifiers.contains(TypeQualifiers::READONLY) {
            return Err(self.user_error(format!(
                "Cannot write to readonly '{}'",
                self.sym.name(varname)
            )));
        }

        mloc.set_start(scope_type, offset)
            .map_err(|msg| self.internal_error(msg))?;
        let mut vartype = self.sym.get_vartype(varname);

        // Process an array index when one follows.
        self.access_data_process_any_array_index(w, vloc, mloc, &mut vartype)?;
        Ok(vartype)
    }

    fn access_data_struct_member(
        &mut self,
        component: Symbol,
        access_type: VariableAccess,
        access_via_this: bool,
        w: SrcWindow,
        mloc: &mut MemoryLocation,
    ) -> Result<Symbol, CompileError> {
        self.src.get_next_in(w); // Eat the component
        let entry = self.sym.entry(component);
        let compo_tqs = entry.variable.as_ref().map(|v| v.qualifiers).unwrap_or_default();
        let offset = entry.component.as_ref().map(|c| c.offset).unwrap_or(0);

        if VariableAccess::Reading != access_type
            && compo_tqs.contains(TypeQualifiers::WRITEPROTECTED)
            && !access_via_this
        {
            return Err(self.user_error(format!(
                "Writeprotected component '{}' must not be modified from outside",
                self.sym.name(component)
            )));
        }
        if compo_tqs.contains(TypeQualifiers::PROTECTED) && !access_via_this {
            return Err(self.user_error(format!(
                "Protected component '{}' must not be accessed from outside",
                self.sym.name(component)
            )));
        }

        mloc.add_component_offset(offset);
        Ok(self.sym.get_vartype(component))
    }

    // ==========================================================================
    // Dereferencing and array indexing
    // ==========================================================================

    /// The location holds a pointer; follow it (with a null check).
    pub(crate) fn access_data_dereference(
        &mut self,
        vloc: &mut ValueLocation,
        mloc: &mut MemoryLocation,
    ) -> Result<(), CompileError> {
        if ValueLocation::RuntimeInAx == *vloc {
            self.scrip
                .write_cmd2(Opcode::RegToReg, Register::Ax.cell(), Register::Mar.cell());
            self.set_reg(Register::Mar);
            self.scrip.write_cmd(Opcode::CheckNull);
            *vloc = ValueLocation::MarPointsToValue;
            mloc.reset();
        } else {
            let line = self.src.line();
            mloc.make_mar_current(self.scrip, line)
                .map_err(|msg| self.internal_error(msg))?;
            // CHECKNULL tests MAR itself, but the pointer lives in m[MAR],
            // so do MAR := m[MAR] first.
            self.scrip.write_cmd1(Opcode::MemReadPtr, Register::Mar.cell());
            self.set_reg(Register::Mar);
            self.scrip.write_cmd(Opcode::CheckNull);
        }
        Ok(())
    }

    fn access_data_process_array_index_constant(
        &mut self,
        idx: usize,
        lit: Symbol,
        num_array_elements: usize,
        element_stride: usize,
        mloc: &mut MemoryLocation,
    ) -> Result<(), CompileError> {
        let array_index = self.sym.literal_value(lit);
        if array_index < 0 {
            return Err(self.user_error(format!(
                "Array index #{} is {}, thus too low (minimum is 0)",
                idx + 1,
                array_index
            )));
        }
        if num_array_elements > 0 && array_index as usize >= num_array_elements {
            return Err(self.user_error(format!(
                "Array index #{} is {}, thus too high (maximum is {})",
                idx + 1,
                array_index,
                num_array_elements - 1
            )));
        }
        mloc.add_component_offset(array_index as usize * element_stride);
        Ok(())
    }

    fn access_data_process_current_array_index(
        &mut self,
        idx: usize,
        dim: usize,
        stride: usize,
        is_dynarray: bool,
        w: SrcWindow,
        mloc: &mut MemoryLocation,
    ) -> Result<(), CompileError> {
        // Find the extent of this index expression.
        let index_start = self.src.get_cursor();
        self.skip_to_in(&[kw::COMMA, kw::CLOSE_BRACKET], w);
        let index_end = self.src.get_cursor();
        let current_index = SrcWindow::new(index_start, index_end - index_start);
        if current_index.is_empty() {
            return Err(self.user_error("Empty array index is not supported here"));
        }

        // Parse on the off-chance that the index is a compile-time constant.
        let start_of_index = RestorePoint::new(self.scrip);
        self.src.start_read(current_index);
        let index_expr = self.parse_integer_expression()?;
        if let ValueLocation::CompileTimeLiteral(lit) = index_expr.vloc {
            return self.access_data_process_array_index_constant(idx, lit, dim, stride, mloc);
        }

        // It isn't. Redo the work with MAR saved out of the way first.
        start_of_index.restore(self.scrip);
        let line = self.src.line();
        mloc.make_mar_current(self.scrip, line)
            .map_err(|msg| self.internal_error(msg))?;
        self.set_reg(Register::Mar);
        self.push_reg(Register::Mar);
        self.src.start_read(current_index);
        let mut index_expr = self.parse_integer_expression()?;
        self.result_to_ax(&mut index_expr)?;
        self.pop_reg(Register::Mar);

        // DYNAMICBOUNDS compares the byte offset into the block, so it goes
        // after the multiplication; CHECKBOUNDS compares the index, so it
        // goes before.
        if !is_dynarray {
            self.scrip
                .write_cmd2(Opcode::CheckBounds, Register::Ax.cell(), dim as CodeCell);
        }
        if stride != 1 {
            self.scrip
                .write_cmd2(Opcode::Mul, Register::Ax.cell(), stride as CodeCell);
            self.set_reg(Register::Ax);
        }
        if is_dynarray {
            self.scrip
                .write_cmd1(Opcode::DynamicBounds, Register::Ax.cell());
        }
        self.scrip
            .write_cmd2(Opcode::AddReg, Register::Mar.cell(), Register::Ax.cell());
        self.set_reg(Register::Mar);
        Ok(())
    }

    /// When an array index follows at the cursor, parse and apply it.
    pub(crate) fn access_data_process_any_array_index(
        &mut self,
        w: SrcWindow,
        vloc: &mut ValueLocation,
        mloc: &mut MemoryLocation,
        vartype: &mut Symbol,
    ) -> Result<(), CompileError> {
        if kw::OPEN_BRACKET != self.src.peek_next_in(w) {
            return Ok(());
        }
        self.src.get_next_in(w); // Eat '['

        let is_dynarray = self.sym.is_dynarray_vartype(*vartype);
        let is_array = self.sym.is_array_vartype(*vartype);
        if !is_dynarray && !is_array {
            return Err(self.user_error("Array index is only legal after an array expression"));
        }

        let element_vartype = self.sym.base_vartype(*vartype);
        let element_size = self.sym.get_size(element_vartype);
        let dims: Vec<usize> = if is_dynarray {
            vec![0]
        } else {
            self.sym
                .entry(*vartype)
                .vartype
                .as_ref()
                .map(|d| d.dims.clone())
                .unwrap_or_default()
        };
        *vartype = element_vartype;

        if is_dynarray {
            self.access_data_dereference(vloc, mloc)?;
        }

        // Strides are computed right-to-left (row-major layout).
        let num_of_dims = dims.len();
        let mut dim_strides = vec![0usize; num_of_dims];
        let mut factor = element_size;
        for dim_idx in (0..num_of_dims).rev() {
            dim_strides[dim_idx] = factor;
            factor *= dims[dim_idx];
        }

        for dim_idx in 0..num_of_dims {
            self.access_data_process_current_array_index(
                dim_idx,
                dims[dim_idx],
                dim_strides[dim_idx],
                is_dynarray,
                w,
                mloc,
            )?;

            let mut divider = self.src.peek_next_in(w);
            self.expect_one_of(&[kw::CLOSE_BRACKET, kw::COMMA], divider, None)?;
            if kw::CLOSE_BRACKET == divider {
                self.src.get_next_in(w); // Eat ']'
                divider = self.src.peek_next_in(w);
            }
            if kw::COMMA == divider || kw::OPEN_BRACKET == divider {
                if num_of_dims == dim_idx + 1 {
                    return Err(self.user_error(format!(
                        "Expected {} indexes, found more",
                        num_of_dims
                    )));
                }
                self.src.get_next_in(w); // Eat ',' or '['
                continue;
            }
            if num_of_dims != dim_idx + 1 {
                return Err(self.user_error(format!(
                    "Expected {} indexes, but only found {}",
                    num_of_dims,
                    dim_idx + 1
                )));
            }
        }
        Ok(())
    }

    // ==========================================================================
    // The dynarray Length pseudo-attribute
    // ==========================================================================

    fn access_data_dynarray_length(
        &mut self,
        mloc: &mut MemoryLocation,
        expr: &mut Expr,
    ) -> Result<(), CompileError> {
        // Load MAR with the dynarray address; errors at runtime when null.
        let mut vloc = expr.vloc;
        self.access_data_dereference(&mut vloc, mloc)?;
        expr.vloc = vloc;

        // The length is fetched through an external function; make sure it
        // is declared as an import.
        let func = self.sym.find_or_add(DYNARRAY_LENGTH_FUNC);
        if !self.sym.is_function(func) {
            self.sym.make_entry_function(func);
            let import_idx = self.scrip.find_or_add_import(DYNARRAY_LENGTH_FUNC);
            self.scrip.imports[import_idx].push_str("^1");
            {
                let data = self.sym.entry_mut(func).function.as_mut().expect("just made");
                data.qualifiers |= TypeQualifiers::IMPORT;
                data.parameters.push(crate::symtable::FuncParam {
                    name: Symbol::NONE,
                    vartype: kw::INT,
                    default: Symbol::NONE,
                });
                data.parameters.push(crate::symtable::FuncParam {
                    name: Symbol::NONE,
                    vartype: expr.vartype,
                    default: Symbol::NONE,
                });
                data.offset = import_idx as CodeCell;
            }
            let cursor = self.src.get_cursor();
            self.sym.set_declared(func, cursor);
        }
        self.sym.mark_accessed(func);

        self.scrip
            .write_cmd1(Opcode::PushReal, Register::Mar.cell());
        self.access_data_generate_function_call(func, 1, true);

        expr.vloc = ValueLocation::RuntimeInAx;
        expr.scope = ScopeType::Global;
        expr.vartype = kw::INT;
        Ok(())
    }

    // ==========================================================================
    // Function calls
    // ==========================================================================

    /// Compile the call `name_of_func(...)`; `call_w` starts at the
    /// function name. Returns the return vartype.
    pub(crate) fn access_data_function_call(
        &mut self,
        name_of_func: Symbol,
        call_w: SrcWindow,
        mloc: &mut MemoryLocation,
    ) -> Result<Symbol, CompileError> {
        if kw::OPEN_PAREN != self.src.at(call_w, 1) {
            return Err(self.user_error("Expected '('"));
        }
        let mut params_w = call_w;
        params_w.eat_first(); // params_w[0] is the '('
        self.src.get_next(); // Eat the function name

        let function_tqs = self
            .sym
            .entry(name_of_func)
            .function
            .as_ref()
            .map(|f| f.qualifiers)
            .unwrap_or_default();
        let func_is_import = function_tqs.contains(TypeQualifiers::IMPORT);
        // Calls through the normal stack need stack arithmetic to reach
        // values pushed before the parameters.
        let func_uses_normal_stack = !func_is_import;
        let called_func_uses_this = self.sym.name(name_of_func).contains("::")
            && !function_tqs.contains(TypeQualifiers::STATIC);
        let calling_func_uses_this = Symbol::NONE != self.sym.get_vartype(kw::THIS);
        let mut mar_pushed = false;
        let mut op_pushed = false;

        if calling_func_uses_this {
            // Save OP for after the call. This is needed even when the
            // called function itself doesn't use 'this': it might call
            // something that does.
            self.push_reg(Register::Op);
            op_pushed = true;
        }

        if called_func_uses_this {
            // MAR holds the address of the object that becomes 'this' in
            // the callee.
            let line = self.src.line();
            mloc.make_mar_current(self.scrip, line)
                .map_err(|msg| self.internal_error(msg))?;
            self.set_reg(Register::Mar);

            // Parameter processing may call other functions and clobber
            // MAR, and CALLOBJ can't be emitted until the parameters are
            // done. Save MAR.
            self.push_reg(Register::Mar);
            mar_pushed = true;
        }

        let num_args =
            self.access_data_push_function_call_params(name_of_func, func_is_import, params_w)?;

        if called_func_uses_this {
            if 0 == num_args {
                // MAR is still current; undo the unneeded push.
                self.scrip.undo_push_reg();
                mar_pushed = false;
            } else {
                // Recover MAR from the stack; it sits in front of the
                // parameters.
                let depth = (1 + if func_uses_normal_stack { num_args } else { 0 })
                    * SIZE_OF_STACK_CELL;
                self.scrip
                    .write_cmd1(Opcode::LoadSpOffs, depth as CodeCell);
                self.scrip.write_cmd1(Opcode::MemRead, Register::Mar.cell());
                self.set_reg(Register::Mar);
            }
            self.scrip.write_cmd1(Opcode::CallObj, Register::Mar.cell());
        }

        self.access_data_generate_function_call(name_of_func, num_args, func_is_import);

        let rettype = self.sym.func_return_vartype(name_of_func);

        if mar_pushed {
            self.pop_reg(Register::Mar);
        }
        if op_pushed {
            self.pop_reg(Register::Op);
        }

        self.sym.mark_accessed(name_of_func);
        Ok(rettype)
    }

    /// Count the supplied arguments, check for empty ones, find the close
    /// paren. `params_w[0]` is the '('.
    fn access_data_function_call_count_args(
        &mut self,
        params_w: SrcWindow,
        name_of_func: Symbol,
    ) -> Result<(usize, usize), CompileError> {
        let mut paren_nesting_depth = 1usize;
        let mut num_supplied_args = 1usize;
        let mut found_param_symbol = false;
        let mut param_idx = 1;

        while param_idx < params_w.len {
            let sym = self.src.at(params_w, param_idx);
            if kw::OPEN_PAREN == sym {
                paren_nesting_depth += 1;
            }
            if kw::CLOSE_PAREN == sym {
                paren_nesting_depth -= 1;
                if 0 == paren_nesting_depth {
                    break;
                }
            }
            if 1 == paren_nesting_depth && kw::COMMA == sym {
                num_supplied_args += 1;
                if !found_param_symbol {
                    return Err(self.user_error(format!(
                        "Argument {} in function call is empty",
                        num_supplied_args - 1
                    )));
                }
                param_idx += 1;
                found_param_symbol = false;
                continue;
            }
            found_param_symbol = true;
            param_idx += 1;
        }

        // "()" supplies no arguments at all.
        if 1 == num_supplied_args
            && params_w.len > 1
            && kw::CLOSE_PAREN == self.src.at(params_w, 1)
        {
            num_supplied_args = 0;
        }

        let index_of_close_paren = param_idx;
        if kw::CLOSE_PAREN != self.src.at(params_w, index_of_close_paren) {
            return Err(self.internal_error("Missing ')' at the end of the parameter list"));
        }
        if index_of_close_paren > 0 && kw::COMMA == self.src.at(params_w, index_of_close_paren - 1)
        {
            return Err(self.user_error("Last argument in function call is empty"));
        }
        if paren_nesting_depth > 0 {
            return Err(self.internal_error(format!(
                "Parser confused near '{}'",
                self.sym.name(name_of_func)
            )));
        }
        Ok((index_of_close_paren, num_supplied_args))
    }

    /// Fill in trailing arguments from parameter defaults, pushing them
    /// deepest-first.
    fn access_data_function_call_provide_defaults(
        &mut self,
        num_func_args: usize,
        num_supplied_args: usize,
        func: Symbol,
        func_is_import: bool,
    ) -> Result<(), CompileError> {
        for arg_idx in ((num_supplied_args + 1)..=num_func_args).rev() {
            let param_default = self
                .sym
                .entry(func)
                .function
                .as_ref()
                .and_then(|f| f.parameters.get(arg_idx))
                .map(|p| p.default)
                .unwrap_or(Symbol::NONE);
            if Symbol::NONE == param_default {
                return Err(self.user_error(format!(
                    "Function call parameter #{} isn't provided and doesn't have any default value",
                    arg_idx
                )));
            }
            if !self.sym.is_literal(param_default) {
                return Err(self.internal_error("Parameter default symbol isn't literal"));
            }

            let value = self.sym.literal_value(param_default);
            self.scrip
                .write_cmd2(Opcode::LitToReg, Register::Ax.cell(), value);
            self.set_reg(Register::Ax);

            if func_is_import {
                self.scrip.write_cmd1(Opcode::PushReal, Register::Ax.cell());
            } else {
                self.push_reg(Register::Ax);
            }
        }
        Ok(())
    }

    /// Evaluate and push the supplied arguments, last argument first, so
    /// that argument #1 ends up deepest on the stack.
    fn access_data_function_call_push_args(
        &mut self,
        params_w: SrcWindow,
        closed_paren_idx: usize,
        num_func_args: usize,
        num_supplied_args: usize,
        func: Symbol,
        func_is_import: bool,
    ) -> Result<(), CompileError> {
        let mut param_num = num_supplied_args + 1;
        let mut start_of_current_param = 0usize;
        // Points one past the last symbol of the current argument.
        let mut end_of_current_param = closed_paren_idx as i64;

        loop {
            param_num -= 1;
            // Walk backwards to the start of this argument; going
            // backwards, ')' increases the nesting depth.
            let mut paren_nesting_depth = 0i64;
            let mut idx = end_of_current_param - 1;
            loop {
                let sym = self.src.at(params_w, idx as usize);
                if kw::CLOSE_PAREN == sym {
                    paren_nesting_depth += 1;
                }
                if kw::OPEN_PAREN == sym {
                    paren_nesting_depth -= 1;
                }
                if (0 == paren_nesting_depth && kw::COMMA == sym)
                    || (paren_nesting_depth < 0 && kw::OPEN_PAREN == sym)
                {
                    start_of_current_param = (idx + 1) as usize;
                    break;
                }
                if 0 == idx {
                    start_of_current_param = 0;
                    break;
                }
                idx -= 1;
            }

            if end_of_current_param < start_of_current_param as i64 {
                return Err(self.internal_error("Parameter length is negative"));
            }

            let current_param = params_w.sub(
                start_of_current_param,
                end_of_current_param as usize - start_of_current_param,
            );
            let mut expr = self.parse_expression_term(current_param)?;
            self.result_to_ax(&mut expr)?;

            if param_num <= num_func_args {
                // The parameter type is known.
                let param_vartype = self
                    .sym
                    .entry(func)
                    .function
                    .as_ref()
                    .and_then(|f| f.parameters.get(param_num))
                    .map(|p| p.vartype)
                    .unwrap_or(Symbol::NONE);
                self.convert_ax_string_to_string_object(param_vartype, &mut expr.vartype);
                // A String object passed for an old-style string must not
                // be null.
                let string_struct = self.sym.string_struct_sym();
                if string_struct != Symbol::NONE
                    && string_struct
                        == self.sym.vartype_without(VartypeShape::Dynpointer, expr.vartype)
                    && kw::STRING == self.sym.vartype_without(VartypeShape::Const, param_vartype)
                {
                    self.scrip
                        .write_cmd1(Opcode::CheckNullReg, Register::Ax.cell());
                }

                let msg = format!(
                    "Parameter #{} of call to function {}",
                    param_num,
                    self.sym.name(func)
                );
                self.check_vartype_mismatch(expr.vartype, param_vartype, true, &msg)?;
            }

            // Pushing writes the argument like MEMWRITE would. Managed
            // parameters would need MEMWRITEPTR; the callee compensates by
            // re-reading each pointer parameter and writing it back with
            // MEMINITPTR.
            if func_is_import {
                self.scrip.write_cmd1(Opcode::PushReal, Register::Ax.cell());
            } else {
                self.push_reg(Register::Ax);
            }

            end_of_current_param = start_of_current_param as i64 - 1;
            if end_of_current_param <= 0 {
                break;
            }
        }
        Ok(())
    }

    /// Gather and push all arguments of the call; returns how many the
    /// callee will see.
    fn access_data_push_function_call_params(
        &mut self,
        name_of_func: Symbol,
        func_is_import: bool,
        params_w: SrcWindow,
    ) -> Result<usize, CompileError> {
        let num_func_args = self.sym.num_func_params(name_of_func);

        let (closed_paren_idx, num_supplied_args) =
            self.access_data_function_call_count_args(params_w, name_of_func)?;

        if num_supplied_args < num_func_args {
            self.access_data_function_call_provide_defaults(
                num_func_args,
                num_supplied_args,
                name_of_func,
                func_is_import,
            )?;
        }
        if num_supplied_args > num_func_args && !self.sym.is_variadic_func(name_of_func) {
            return Err(self.user_error(format!(
                "Expected just {} parameters but found {}",
                num_func_args, num_supplied_args
            )));
        }

        if num_supplied_args > 0 {
            self.access_data_function_call_push_args(
                params_w,
                closed_paren_idx,
                num_func_args,
                num_supplied_args,
                name_of_func,
                func_is_import,
            )?;
        }

        self.src.set_cursor_in(params_w, closed_paren_idx + 1);
        Ok(num_supplied_args.max(num_func_args))
    }

    /// Emit the actual transfer of control, with its fixup and stack
    /// cleanup.
    pub(crate) fn access_data_generate_function_call(
        &mut self,
        name_of_func: Symbol,
        num_args: usize,
        func_is_import: bool,
    ) {
        if func_is_import {
            // Tell the engine how many arguments this call carries; nested
            // imported calls corrupt the far stack otherwise.
            self.scrip
                .write_cmd1(Opcode::NumFuncArgs, num_args as CodeCell);
        }

        // Load the callee's address (or import index) into AX.
        let offset = self
            .sym
            .entry(name_of_func)
            .function
            .as_ref()
            .map(|f| f.offset)
            .unwrap_or(CODE_CELL_PLACEHOLDER);
        self.scrip
            .write_cmd2(Opcode::LitToReg, Register::Ax.cell(), offset);
        self.set_reg(Register::Ax);

        if func_is_import {
            self.scrip.fixup_previous(crate::bytecode::FixupType::Import);
            if !self.scrip.is_import(self.sym.name(name_of_func)) {
                let loc = self.scrip.len() - 1;
                let cursor = self.src.get_cursor();
                self.fim.track(self.scrip, name_of_func, loc, cursor);
            }

            self.scrip.write_cmd1(Opcode::CallExt, Register::Ax.cell());
            self.set_all_regs();
            // Execution resumes here after the call: restore the far stack.
            if num_args > 0 {
                self.scrip
                    .write_cmd1(Opcode::SubRealStack, num_args as CodeCell);
            }
            return;
        }

        self.scrip.fixup_previous(crate::bytecode::FixupType::Code);
        if offset < 0 {
            let loc = self.scrip.len() - 1;
            let cursor = self.src.get_cursor();
            self.fcm.track(self.scrip, name_of_func, loc, cursor);
        }

        self.scrip.write_cmd1(Opcode::Call, Register::Ax.cell());
        self.set_all_regs();

        // Execution resumes here after the call: restore the stack.
        if num_args > 0 {
            let size_of_passed_args = num_args * SIZE_OF_STACK_CELL;
            self.scrip.write_cmd2(
                Opcode::Sub,
                Register::Sp.cell(),
                size_of_passed_args as CodeCell,
            );
            self.scrip.offset_to_local_var_block -= size_of_passed_args;
        }
    }

    // ==========================================================================
    // Attributes
    // ==========================================================================

    /// The symbol of the getter or setter belonging to an attribute.
    pub(crate) fn construct_attribute_func_name(
        &mut self,
        attribsym: Symbol,
        is_setter: bool,
        is_indexed: bool,
    ) -> Symbol {
        let full = self.sym.name(attribsym);
        let member = match full.rfind("::") {
            Some(pos) => &full[pos + 2..],
            None => full,
        };
        let stem = if is_setter { "set" } else { "get" };
        let indx = if is_indexed { "i_" } else { "_" };
        let func_name = format!("{}{}{}", stem, indx, member);
        self.sym.find_or_add(&func_name)
    }

    /// Call the getter or setter of the attribute at the cursor. On entry
    /// `vartype` holds the struct being accessed; on exit, the function's
    /// return vartype.
    pub(crate) fn access_data_call_attribute_func(
        &mut self,
        is_setter: bool,
        w: SrcWindow,
        vartype: &mut Symbol,
    ) -> Result<(), CompileError> {
        // The attribute might live in an ancestor of `vartype`.
        let unqualified_component = self.src.get_next_in(w);
        let struct_of_component = self
            .sym
            .find_struct_of_component(*vartype, unqualified_component);
        if Symbol::NONE == struct_of_component {
            return Err(self.user_error(format!(
                "Struct '{}' does not have an attribute named '{}'",
                self.sym.name(*vartype),
                self.sym.name(unqualified_component)
            )));
        }

        let name_of_attribute = self
            .sym
            .find_component_in_struct(struct_of_component, unqualified_component);

        let attrib_uses_this = !self
            .sym
            .entry(name_of_attribute)
            .variable
            .as_ref()
            .map(|v| v.qualifiers.contains(TypeQualifiers::STATIC))
            .unwrap_or(false);
        let call_is_indexed = kw::OPEN_BRACKET == self.src.peek_next_in(w);
        let attrib_is_indexed = self
            .sym
            .is_dynarray_vartype(self.sym.get_vartype(name_of_attribute));

        if call_is_indexed && !attrib_is_indexed {
            return Err(self.user_error(format!(
                "Unexpected '[' after non-indexed attribute {}",
                self.sym.name(name_of_attribute)
            )));
        }
        if !call_is_indexed && attrib_is_indexed {
            return Err(self.user_error(format!(
                "'[' expected after indexed attribute {} but not found",
                self.sym.name(name_of_attribute)
            )));
        }

        if is_setter
            && self
                .sym
                .entry(name_of_attribute)
                .variable
                .as_ref()
                .map(|v| v.qualifiers.contains(TypeQualifiers::READONLY))
                .unwrap_or(false)
        {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "Cannot assign a value to readonly attribute '{}'",
                    self.sym.name(name_of_attribute)
                ),
                name_of_attribute,
            )));
        }

        // Resolve the access function.
        let unqualified_func =
            self.construct_attribute_func_name(unqualified_component, is_setter, attrib_is_indexed);
        let qualified_func = self
            .sym
            .find_component_in_struct(struct_of_component, unqualified_func);
        if Symbol::NONE == qualified_func {
            return Err(self.internal_error(format!(
                "Attribute function '{}' not found in struct '{}'",
                self.sym.name(unqualified_func),
                self.sym.name(struct_of_component)
            )));
        }
        let func_is_import = self
            .sym
            .entry(qualified_func)
            .function
            .as_ref()
            .map(|f| f.qualifiers.contains(TypeQualifiers::IMPORT))
            .unwrap_or(false);

        if attrib_uses_this {
            // The current 'this' must survive the call.
            self.push_reg(Register::Op);
        }

        let mut num_of_args = 0usize;
        if is_setter {
            if func_is_import {
                self.scrip.write_cmd1(Opcode::PushReal, Register::Ax.cell());
            } else {
                self.push_reg(Register::Ax);
            }
            num_of_args += 1;
        }

        if call_is_indexed {
            // The index sits in the '[...]' clause; it becomes the first
            // argument.
            if attrib_uses_this {
                self.push_reg(Register::Mar); // must not be clobbered
            }
            let next = self.src.get_next();
            self.expect(kw::OPEN_BRACKET, next)?;
            let mut index_expr = self.parse_integer_expression()?;
            let next = self.src.get_next();
            self.expect(kw::CLOSE_BRACKET, next)?;
            self.result_to_ax(&mut index_expr)?;

            if attrib_uses_this {
                self.pop_reg(Register::Mar);
            }

            if func_is_import {
                self.scrip.write_cmd1(Opcode::PushReal, Register::Ax.cell());
            } else {
                self.push_reg(Register::Ax);
            }
            num_of_args += 1;
        }

        if attrib_uses_this {
            // MAR becomes the new 'this'.
            self.scrip.write_cmd1(Opcode::CallObj, Register::Mar.cell());
        }

        self.access_data_generate_function_call(qualified_func, num_of_args, func_is_import);

        if attrib_uses_this {
            self.pop_reg(Register::Op); // restore the old 'this'
        }

        *vartype = self.sym.func_return_vartype(qualified_func);
        self.sym.mark_accessed(qualified_func);
        Ok(())
    }

    // ==========================================================================
    // Assignment
    // ==========================================================================

    /// Copy at most `STRINGBUFFER_LENGTH - 1` bytes from m[MAR…] to
    /// m[AX…], stopping at the terminator, and force-terminate the copy.
    pub(crate) fn access_data_strcpy(&mut self) {
        let mut loop_start = BackwardJumpDest::new();
        let mut out_of_loop = ForwardJump::new();

        self.scrip
            .write_cmd2(Opcode::RegToReg, Register::Ax.cell(), Register::Cx.cell()); // CX = dest
        self.scrip
            .write_cmd2(Opcode::RegToReg, Register::Mar.cell(), Register::Bx.cell()); // BX = src
        self.scrip.write_cmd2(
            Opcode::LitToReg,
            Register::Dx.cell(),
            (STRINGBUFFER_LENGTH - 1) as CodeCell,
        ); // DX = count
        loop_start.set_to_current(self.scrip);
        self.scrip
            .write_cmd2(Opcode::RegToReg, Register::Bx.cell(), Register::Mar.cell());
        self.scrip.write_cmd1(Opcode::MemRead, Register::Ax.cell()); // AX = m[BX]
        self.scrip
            .write_cmd2(Opcode::RegToReg, Register::Cx.cell(), Register::Mar.cell());
        self.scrip.write_cmd1(Opcode::MemWrite, Register::Ax.cell()); // m[CX] = AX
        self.scrip.write_cmd1(Opcode::Jz, CODE_CELL_PLACEHOLDER); // if (AX == 0) done
        out_of_loop.add_param(self.scrip);
        self.scrip.write_cmd2(Opcode::Add, Register::Bx.cell(), 1);
        self.scrip.write_cmd2(Opcode::Add, Register::Cx.cell(), 1);
        self.scrip.write_cmd2(Opcode::Sub, Register::Dx.cell(), 1);
        self.scrip
            .write_cmd2(Opcode::RegToReg, Register::Dx.cell(), Register::Ax.cell());
        let line = self.src.line();
        loop_start.write_jump(self.scrip, Opcode::Jnz, line); // while (DX != 0)
        self.scrip.write_cmd2(Opcode::Add, Register::Cx.cell(), 1); // force 0-terminated dest
        self.scrip
            .write_cmd2(Opcode::RegToReg, Register::Cx.cell(), Register::Mar.cell());
        self.scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 0);
        self.scrip.write_cmd1(Opcode::MemWrite, Register::Ax.cell());
        let line = self.src.line();
        out_of_loop.patch(self.scrip, line);
        self.set_all_regs();
    }

    /// Store AX — the evaluated right-hand side — into the location the
    /// LHS expression denotes, or call the matching attribute setter.
    pub(crate) fn access_data_assign_to(
        &mut self,
        rhs_scope: ScopeType,
        rhs_vartype: Symbol,
        lhs_w: SrcWindow,
    ) -> Result<(), CompileError> {
        // Walking the LHS moves the cursor; it must come back to the end
        // of the RHS afterwards.
        let end_of_rhs_cursor = self.src.get_cursor();
        let _ = rhs_scope;

        let mut rhs_vartype = rhs_vartype;
        let mut lhs_slot: Option<Expr> = None;

        // AX holds the RHS result and mustn't be clobbered.
        self.register_guard(&[Register::Ax], |p| {
            let (mut lhs, _) = p.access_data(VariableAccess::Writing, lhs_w)?;

            if ValueLocation::RuntimeInAx == lhs.vloc {
                if !p.sym.is_managed_vartype(lhs.vartype) {
                    return Err(p.user_error("Cannot modify this value"));
                }
                p.scrip
                    .write_cmd2(Opcode::RegToReg, Register::Ax.cell(), Register::Mar.cell());
                p.set_reg(Register::Mar);
                p.scrip.write_cmd(Opcode::CheckNull);
                lhs.vloc = ValueLocation::MarPointsToValue;
            }
            lhs_slot = Some(lhs);
            Ok(())
        })?;
        let lhs = lhs_slot.expect("the guard block ran");

        if let ValueLocation::AttributeFunction(attribute) = lhs.vloc {
            self.convert_ax_string_to_string_object(lhs.vartype, &mut rhs_vartype);
            let element_vartype = self.sym.vartype_without(VartypeShape::Dynarray, lhs.vartype);
            if self.is_vartype_mismatch_oneway(rhs_vartype, element_vartype) {
                return Err(self.user_error(format!(
                    "Cannot assign a type '{}' value to a type '{}' attribute",
                    self.sym.name(rhs_vartype),
                    self.sym.name(lhs.vartype)
                )));
            }

            // Call the attribute setter; the cursor stands at the
            // attribute component again.
            let mut struct_of_attribute = self
                .sym
                .entry(attribute)
                .component
                .as_ref()
                .map(|c| c.parent)
                .unwrap_or(Symbol::NONE);
            self.access_data_call_attribute_func(true, lhs_w, &mut struct_of_attribute)?;
            self.src.set_cursor(end_of_rhs_cursor);
            return Ok(());
        }

        // MAR points to the destination.

        if kw::STRING == lhs.vartype
            && kw::STRING == self.sym.vartype_without(VartypeShape::Const, rhs_vartype)
        {
            // Copy the buffer contents over.
            self.access_data_strcpy();
            self.src.set_cursor(end_of_rhs_cursor);
            return Ok(());
        }

        self.convert_ax_string_to_string_object(lhs.vartype, &mut rhs_vartype);
        if self.is_vartype_mismatch_oneway(rhs_vartype, lhs.vartype) {
            return Err(self.user_error(format!(
                "Cannot assign a type '{}' value to a type '{}' variable",
                self.sym.name(rhs_vartype),
                self.sym.name(lhs.vartype)
            )));
        }

        let opcode = if self.sym.is_dyn_vartype(lhs.vartype) {
            Opcode::MemWritePtr
        } else {
            write_cmd_for_size(self.sym.get_size(lhs.vartype))
        };
        self.scrip.write_cmd1(opcode, Register::Ax.cell());
        self.set_reg(Register::Ax);
        self.src.set_cursor(end_of_rhs_cursor);
        Ok(())
    }

    /// Parse the LHS of `+=`-style statements and `++`/`--`: access for a
    /// later write-back, with the current value additionally moved to AX.
    pub(crate) fn read_lhs_for_modification(
        &mut self,
        lhs_w: SrcWindow,
    ) -> Result<Expr, CompileError> {
        let (expr, _) = self.access_data(VariableAccess::ReadingForLaterWriting, lhs_w)?;
        self.parse_expression_check_used_up(lhs_w)?;

        // Put the value into AX as well, keeping the location knowledge.
        let mut dummy = expr;
        self.result_to_ax(&mut dummy)?;
        Ok(expr)
    }

    // ==========================================================================
    // Statement-level expressions
    // ==========================================================================

    /// `var = expression`.
    pub(crate) fn parse_assignment_assign(&mut self, lhs_w: SrcWindow) -> Result<(), CompileError> {
        self.src.get_next(); // Eat '='
        let rhs = self.parse_expression_to_ax()?;
        self.access_data_assign_to(rhs.scope, rhs.vartype, lhs_w)
    }

    /// `var op= expression`.
    pub(crate) fn parse_assignment_massign(
        &mut self,
        ass_symbol: Symbol,
        lhs_w: SrcWindow,
    ) -> Result<(), CompileError> {
        self.src.get_next(); // Eat the assignment symbol

        let rhs = self.parse_expression_to_ax()?;
        self.push_reg(Register::Ax);
        let rhs_vartype = rhs.vartype;

        // Reading the LHS moves the cursor; save and restore it.
        let end_of_rhs_cursor = self.src.get_cursor();
        let lhs = self.read_lhs_for_modification(lhs_w)?;
        self.src.set_cursor(end_of_rhs_cursor);

        // Apply the operator: the LHS value is in AX, the RHS in BX.
        let opcode = self.get_opcode(ass_symbol, lhs.vartype, rhs_vartype)?;
        self.pop_reg(Register::Bx);
        self.scrip
            .write_cmd2(opcode, Register::Ax.cell(), Register::Bx.cell());
        self.set_reg(Register::Ax);

        let before_write = RestorePoint::new(self.scrip);
        self.access_data_assign_to(rhs.scope, rhs_vartype, lhs_w)?;

        if ValueLocation::MarPointsToValue == lhs.vloc {
            // Shortcut: write the result straight back to memory.
            before_write.restore(self.scrip);
            let memwrite = write_cmd_for_size(self.sym.get_size(lhs.vartype));
            self.scrip.write_cmd1(memwrite, Register::Ax.cell());
        }
        Ok(())
    }

    /// An expression in statement position: it must have a side effect
    /// (function call, `++`/`--`).
    pub(crate) fn parse_side_effect_expression(
        &mut self,
        w: SrcWindow,
    ) -> Result<(), CompileError> {
        if w.is_empty() {
            return Err(self.internal_error("Cannot parse empty subexpression"));
        }

        let least_binding = self.index_of_least_binding_operator(w)?;

        match least_binding {
            None => {
                if kw::OPEN_PAREN == self.src.at(w, 0) {
                    let mut inner = w;
                    inner.eat_first();
                    inner.eat_last();
                    return self.parse_side_effect_expression(inner);
                }
                let (_, func_was_called) = self.access_data(VariableAccess::Writing, w)?;
                if func_was_called {
                    return self.parse_expression_check_used_up(w);
                }
            }
            Some(0) => {
                let op_sym = self.src.at(w, 0);
                if kw::DECREMENT == op_sym || kw::INCREMENT == op_sym {
                    self.parse_expression_term(w)?;
                    return Ok(());
                }
            }
            Some(idx) if idx == w.len - 1 => {
                let op_sym = self.src.at(w, idx);
                if kw::DECREMENT == op_sym || kw::INCREMENT == op_sym {
                    // The prefix versions are more efficient.
                    let mut param = w;
                    param.eat_last();
                    self.parse_expr_prefix_modifier(op_sym, param)?;
                    self.parse_expression_check_used_up(param)?;
                    self.src.set_cursor_in(w, w.len); // Eat the operator
                    return Ok(());
                }
            }
            _ => {}
        }

        Err(self.user_error(
            "Unexpected expression (Is this an incomplete assignment or function call?)",
        ))
    }

    /// Statement-level dispatch: assignment, compound assignment, or a
    /// side-effect expression.
    pub(crate) fn parse_assignment_or_expression(&mut self) -> Result<(), CompileError> {
        // The leading symbol has been read; the expression starts there.
        self.src.back_up();
        let expr_start = self.src.get_cursor();
        self.skip_to_end_of_expression()?;
        let w = SrcWindow::new(expr_start, self.src.get_cursor() - expr_start);

        if w.is_empty() {
            let found = self.src.get_next();
            return Err(self.user_error(format!(
                "Unexpected symbol '{}'",
                self.sym.name(found)
            )));
        }

        let assignment_symbol = self.src.peek_next();
        match assignment_symbol {
            kw::ASSIGN => self.parse_assignment_assign(w),
            kw::ASSIGN_PLUS
            | kw::ASSIGN_MINUS
            | kw::ASSIGN_MULTIPLY
            | kw::ASSIGN_DIVIDE
            | kw::ASSIGN_BITAND
            | kw::ASSIGN_BITOR
            | kw::ASSIGN_BITXOR
            | kw::ASSIGN_SHIFTLEFT
            | kw::ASSIGN_SHIFTRIGHT => self.parse_assignment_massign(assignment_symbol, w),
            _ => {
                // No assignment: an isolated expression, e.g. a call.
                self.parse_side_effect_expression(w)
            }
        }
    }
}
