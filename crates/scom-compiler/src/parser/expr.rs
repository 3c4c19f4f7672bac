//! Expression evaluation.
//!
//! An expression is a sub-window of the token stream. The evaluator finds
//! the least-binding operator at nesting depth zero and recurses on the
//! operand windows; atoms and parenthesised groups fall through to the
//! access-data subsystem. Results land in AX (or stay compile-time
//! literals, or remain addressed by MAR for the caller to collapse).
//!
//! Compile-time folding works through restore points: the code for a
//! foldable sub-expression is emitted first and rolled back once both
//! operands turn out to be literals.

use scom_core::{CompileError, ScopeType};

use crate::bytecode::{CodeCell, Opcode, Register, RestorePoint, CODE_CELL_PLACEHOLDER};
use crate::emit::ForwardJump;
use crate::source::SrcWindow;
use crate::symtable::{kw, CtValue, Symbol, VartypeShape};

use super::{Parser, VariableAccess};

/// Where the value of an (partially) evaluated expression lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLocation {
    /// The value is in AX.
    RuntimeInAx,
    /// MAR points to the value in memory.
    MarPointsToValue,
    /// The value is the given literal symbol; no code was emitted.
    CompileTimeLiteral(Symbol),
    /// Writing resolved to an attribute; the setter must be called with
    /// the given (qualified) attribute symbol.
    AttributeFunction(Symbol),
}

impl ValueLocation {
    pub fn is_compile_time_literal(self) -> bool {
        matches!(self, ValueLocation::CompileTimeLiteral(_))
    }

    /// The literal symbol of a compile-time value.
    pub fn literal(self) -> Symbol {
        match self {
            ValueLocation::CompileTimeLiteral(lit) => lit,
            _ => Symbol::NONE,
        }
    }
}

/// Result of evaluating an expression (sub-)window.
#[derive(Debug, Clone, Copy)]
pub struct Expr {
    pub vloc: ValueLocation,
    pub scope: ScopeType,
    pub vartype: Symbol,
}

impl<'a> Parser<'a> {
    // ==========================================================================
    // Expression extent
    // ==========================================================================

    /// Advance the cursor to just past the last token that can belong to
    /// the expression starting at the cursor.
    pub(crate) fn skip_to_end_of_expression(&mut self) -> Result<(), CompileError> {
        let mut nesting_depth = 0i32;
        let vartype_of_this = self.sym.get_vartype(kw::THIS);

        // A ':' can end a ternary or a label; only ':' that match an open
        // '?' at the outer level belong to the expression.
        let mut tern_depth = 0i32;

        while !self.src.reached_eof() {
            let peeksym = self.src.peek_next();

            // Skip over anything enclosed in braces, brackets, or parens.
            match peeksym {
                kw::OPEN_PAREN | kw::OPEN_BRACKET | kw::OPEN_BRACE => nesting_depth += 1,
                kw::CLOSE_PAREN | kw::CLOSE_BRACKET | kw::CLOSE_BRACE => {
                    nesting_depth -= 1;
                    if nesting_depth < 0 {
                        break;
                    }
                }
                _ => {}
            }
            if nesting_depth > 0 {
                self.src.get_next();
                continue;
            }

            if kw::COLON == peeksym {
                tern_depth -= 1;
                if tern_depth < 0 {
                    break;
                }
                self.src.get_next();
                continue;
            }

            if kw::DOT == peeksym {
                self.src.get_next(); // Eat '.'
                self.src.get_next(); // Eat the following component name
                continue;
            }

            if kw::NEW == peeksym {
                // Only allowed when a type follows.
                self.src.get_next();
                let sym_after_new = self.src.peek_next();
                if self.sym.is_vartype(sym_after_new) {
                    self.src.get_next();
                    continue;
                }
                self.src.back_up();
                break;
            }

            if kw::NULL == peeksym {
                self.src.get_next();
                continue;
            }

            if kw::TERN == peeksym {
                tern_depth += 1;
                self.src.get_next();
                continue;
            }

            if self.sym.is_vartype(peeksym) {
                // Only allowed when a dot follows (static member access).
                self.src.get_next();
                if kw::DOT == self.src.peek_next() {
                    continue; // Do not eat the dot.
                }
                self.src.back_up();
                break;
            }

            // Let a symbol through when it can be a component of 'this'.
            if Symbol::NONE != vartype_of_this
                && self.sym.has_own_component(vartype_of_this, peeksym)
            {
                self.src.get_next();
                continue;
            }

            if !self.sym.can_be_part_of_expression(peeksym) {
                break;
            }
            self.src.get_next();
        }

        if nesting_depth > 0 {
            return Err(self.internal_error("Nesting corrupted"));
        }
        Ok(())
    }

    // ==========================================================================
    // Entry points
    // ==========================================================================

    /// Parse the expression at the cursor; the value may stay a literal or
    /// in memory.
    pub(crate) fn parse_expression_value(&mut self) -> Result<Expr, CompileError> {
        let expr_start = self.src.get_cursor();
        self.skip_to_end_of_expression()?;
        let len = self.src.get_cursor() - expr_start;
        if 0 == len {
            let found = self.src.get_next();
            return Err(self.user_error(format!(
                "Expected an expression, found '{}' instead",
                self.sym.name(found)
            )));
        }
        let expr_end = self.src.get_cursor();
        let result = self.parse_expression_term(SrcWindow::new(expr_start, len))?;
        self.src.set_cursor(expr_end);
        Ok(result)
    }

    /// Parse the expression at the cursor into AX.
    pub(crate) fn parse_expression_to_ax(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_expression_value()?;
        self.result_to_ax(&mut expr)?;
        Ok(expr)
    }

    /// `opener expr closer`, result in AX.
    pub(crate) fn parse_delimited_expression(
        &mut self,
        opener: Symbol,
    ) -> Result<Expr, CompileError> {
        let next = self.src.get_next();
        self.expect(opener, next)?;
        let expr = self.parse_expression_to_ax()?;
        let closer = self.sym.delimiter_partner(opener);
        let next = self.src.get_next();
        self.expect(closer, next)?;
        Ok(expr)
    }

    /// Parse an expression that must fold to a literal; returns the
    /// literal symbol.
    pub(crate) fn parse_constant_expression(&mut self, msg: &str) -> Result<Symbol, CompileError> {
        let first_sym = self.src.peek_next();
        let expr = self.parse_expression_value()?;
        if !expr.vloc.is_compile_time_literal() {
            return Err(self.user_error(format!(
                "{}Cannot evaluate the expression starting with '{}' at compile time",
                msg,
                self.sym.name(first_sym)
            )));
        }
        Ok(expr.vloc.literal())
    }

    /// Parse an expression that must be integer-typed.
    pub(crate) fn parse_integer_expression(&mut self) -> Result<Expr, CompileError> {
        let expr = self.parse_expression_value()?;
        self.check_vartype_mismatch(expr.vartype, kw::INT, true, "Expected an integer expression")?;
        Ok(expr)
    }

    // ==========================================================================
    // Term dispatch
    // ==========================================================================

    pub(crate) fn parse_expression_term(&mut self, w: SrcWindow) -> Result<Expr, CompileError> {
        if w.is_empty() {
            return Err(self.internal_error("Cannot parse empty subexpression"));
        }

        let least_binding = self.index_of_least_binding_operator(w)?;

        let mut expr = match least_binding {
            None => self.parse_expr_no_ops(w)?,
            Some(0) => self.parse_expr_prefix(w)?,
            Some(idx) if idx == w.len - 1 => self.parse_expr_postfix(w)?,
            Some(idx) if kw::TERN == self.src.at(w, idx) => self.parse_expr_ternary(idx, w)?,
            Some(idx) => self.parse_expr_binary(idx, w)?,
        };

        self.handle_struct_or_array_result(&mut expr)?;
        Ok(expr)
    }

    /// Find the index of the least-binding operator at nesting depth zero:
    /// the right-most occurrence of the largest priority. When the winner
    /// is a prefix operator that isn't in first position, it ends a chain
    /// of unary operators and position 0 is returned instead.
    pub(crate) fn index_of_least_binding_operator(
        &mut self,
        w: SrcWindow,
    ) -> Result<Option<usize>, CompileError> {
        let mut nesting_depth = 0usize;
        let mut largest_prio_found: Option<usize> = None;
        let mut largest_is_prefix = false;
        let mut index_of_largest: Option<usize> = None;

        // Whether the preceding token was an operand.
        let mut encountered_operand = false;

        self.src.start_read(w);
        while !self.src.reached_end(w) {
            let current_sym = self.src.get_next_in(w);

            if kw::CLOSE_BRACKET == current_sym || kw::CLOSE_PAREN == current_sym {
                encountered_operand = true;
                nesting_depth = nesting_depth.saturating_sub(1);
                continue;
            }
            if kw::OPEN_BRACKET == current_sym || kw::OPEN_PAREN == current_sym {
                nesting_depth += 1;
                continue;
            }
            if !self.sym.is_operator(current_sym) {
                encountered_operand = true;
                continue;
            }
            // Anything inside '()' or '[]' binds tighter.
            if nesting_depth > 0 {
                continue;
            }

            let is_prefix = !encountered_operand;
            encountered_operand = false;
            if kw::INCREMENT == current_sym || kw::DECREMENT == current_sym {
                // '++'/'--' can be postfix as well as prefix. Taken as
                // postfix, they act on a preceding operand, so the next
                // iteration has seen an operand.
                encountered_operand = true;
            }

            let current_prio = if is_prefix {
                self.sym.prefix_op_prio(current_sym)
            } else {
                self.sym.binary_or_postfix_op_prio(current_sym)
            };
            let Some(current_prio) = current_prio else {
                return Err(self.user_error(format!(
                    "Cannot use '{}' as a {} operator",
                    self.sym.name(current_sym),
                    if is_prefix { "prefix" } else { "binary or postfix" }
                )));
            };

            if let Some(largest) = largest_prio_found {
                if current_prio < largest {
                    continue;
                }
            }
            largest_prio_found = Some(current_prio);
            // The cursor has already moved past the symbol.
            index_of_largest = Some(self.src.cursor_in(w) - 1);
            largest_is_prefix = is_prefix;
        }

        if largest_is_prefix {
            index_of_largest = Some(0);
        }
        Ok(index_of_largest)
    }

    // ==========================================================================
    // Atoms and parens
    // ==========================================================================

    fn parse_expr_no_ops(&mut self, w: SrcWindow) -> Result<Expr, CompileError> {
        if kw::OPEN_PAREN == self.src.at(w, 0) {
            return self.parse_expr_in_parens(w);
        }
        let (expr, _func_was_called) = self.access_data(VariableAccess::Reading, w)?;
        self.parse_expression_check_used_up(w)?;
        Ok(expr)
    }

    fn parse_expr_in_parens(&mut self, w: SrcWindow) -> Result<Expr, CompileError> {
        // Check for spurious symbols after the closing paren.
        self.src.set_cursor_in(w, 1);
        self.skip_to_in(&[], w);
        self.src.get_next_in(w); // Eat the closing parenthesis
        self.parse_expression_check_used_up(w)?;

        let mut inner = w;
        self.strip_outermost_parens(&mut inner);
        self.parse_expression_term(inner)
    }

    /// Some sub-parsers don't promise to use up their whole window; what
    /// remains can only be operands following operands, i.e. a missing
    /// operator.
    pub(crate) fn parse_expression_check_used_up(
        &mut self,
        w: SrcWindow,
    ) -> Result<(), CompileError> {
        if self.src.reached_end(w) {
            return Ok(());
        }
        let found = self.src.get_next_in(w);
        Err(self.user_error(format!(
            "Expected an operator, found '{}' instead",
            self.sym.name(found)
        )))
    }

    pub(crate) fn strip_outermost_parens(&mut self, w: &mut SrcWindow) {
        while kw::OPEN_PAREN == self.src.at(*w, 0) {
            let last = w.len - 1;
            if kw::CLOSE_PAREN != self.src.at(*w, last) {
                return;
            }
            self.src.set_cursor_in(*w, 1);
            self.skip_to_in(&[], *w);
            if self.src.cursor_in(*w) != last {
                return;
            }
            w.eat_first();
            w.eat_last();
        }
    }

    // ==========================================================================
    // Prefix operators
    // ==========================================================================

    fn parse_expr_prefix(&mut self, mut w: SrcWindow) -> Result<Expr, CompileError> {
        let op_sym = self.src.at(w, 0);
        if w.len < 2 {
            return Err(self.user_error(format!(
                "Expected a term after '{}' but didn't find any",
                self.sym.name(op_sym)
            )));
        }
        w.eat_first();

        if kw::NEW == op_sym {
            return self.parse_expr_new(w);
        }
        if kw::DECREMENT == op_sym || kw::INCREMENT == op_sym {
            self.strip_outermost_parens(&mut w);
            return self.parse_expr_prefix_modifier(op_sym, w);
        }

        let expr = self.parse_expression_term(w)?;

        match op_sym {
            kw::BITNEG | kw::NOT => self.parse_expr_prefix_negate(op_sym, expr),
            kw::MINUS => self.parse_expr_prefix_minus(expr),
            kw::PLUS => self.parse_expr_prefix_plus(expr),
            _ => Err(self.internal_error(format!(
                "Illegal prefix op '{}'",
                self.sym.name(op_sym)
            ))),
        }
    }

    fn parse_expr_prefix_minus(&mut self, mut expr: Expr) -> Result<Expr, CompileError> {
        if let ValueLocation::CompileTimeLiteral(lit) = expr.vloc {
            // Fold as `0 - x` (or `0.0 - x`).
            let zero = if kw::FLOAT == self.sym.literal_vartype(lit) {
                self.sym.find_or_add_float_literal(0.0)
            } else {
                self.sym.find_or_add_int_literal(0)
            };
            if let Some(folded) = self.parse_expression_compile_time(kw::MINUS, zero, lit)? {
                expr.vloc = ValueLocation::CompileTimeLiteral(folded);
                return Ok(expr);
            }
        }

        self.result_to_ax(&mut expr)?;
        let opcode = self.get_opcode(kw::MINUS, expr.vartype, expr.vartype)?;

        // Calculate 0 - AX. The binary representation of 0.0 equals that
        // of 0, so this works for floats as well as ints.
        self.scrip.write_cmd2(Opcode::LitToReg, Register::Bx.cell(), 0);
        self.scrip
            .write_cmd2(opcode, Register::Bx.cell(), Register::Ax.cell());
        self.scrip
            .write_cmd2(Opcode::RegToReg, Register::Bx.cell(), Register::Ax.cell());
        self.set_reg(Register::Bx);
        self.set_reg(Register::Ax);
        expr.vloc = ValueLocation::RuntimeInAx;
        Ok(expr)
    }

    fn parse_expr_prefix_plus(&mut self, expr: Expr) -> Result<Expr, CompileError> {
        if self.sym.is_any_integer_vartype(expr.vartype) || kw::FLOAT == expr.vartype {
            return Ok(expr);
        }
        Err(self.user_error(format!(
            "Cannot apply unary '+' to an expression of type '{}'",
            self.sym.name(expr.vartype)
        )))
    }

    fn parse_expr_prefix_negate(
        &mut self,
        op_sym: Symbol,
        mut expr: Expr,
    ) -> Result<Expr, CompileError> {
        let bitwise_negation = kw::BITNEG == op_sym;

        let msg = format!("Argument of '{}'", self.sym.name(op_sym));
        self.check_vartype_mismatch(expr.vartype, kw::INT, true, &msg)?;

        if let ValueLocation::CompileTimeLiteral(lit) = expr.vloc {
            let zero = self.sym.find_or_add_int_literal(0);
            if let Some(folded) = self.parse_expression_compile_time(op_sym, zero, lit)? {
                expr.vloc = ValueLocation::CompileTimeLiteral(folded);
                expr.vartype = kw::INT;
                return Ok(expr);
            }
        }

        self.result_to_ax(&mut expr)?;

        if bitwise_negation {
            // There isn't an opcode for this; calculate -1 - AX.
            self.scrip.write_cmd2(Opcode::LitToReg, Register::Bx.cell(), -1);
            self.scrip
                .write_cmd2(Opcode::SubReg, Register::Bx.cell(), Register::Ax.cell());
            self.scrip
                .write_cmd2(Opcode::RegToReg, Register::Bx.cell(), Register::Ax.cell());
            self.set_reg(Register::Bx);
            self.set_reg(Register::Ax);
        } else {
            self.scrip.write_cmd1(Opcode::NotReg, Register::Ax.cell());
            self.set_reg(Register::Ax);
        }

        expr.vartype = kw::INT;
        expr.vloc = ValueLocation::RuntimeInAx;
        Ok(expr)
    }

    pub(crate) fn parse_expr_prefix_modifier(
        &mut self,
        op_sym: Symbol,
        w: SrcWindow,
    ) -> Result<Expr, CompileError> {
        let op_is_inc = kw::INCREMENT == op_sym;

        self.src.start_read(w);
        let expr = self.read_lhs_for_modification(w)?;

        let msg = format!("Argument of '{}'", self.sym.name(op_sym));
        self.check_vartype_mismatch(expr.vartype, kw::INT, true, &msg)?;

        self.scrip.write_cmd2(
            if op_is_inc { Opcode::Add } else { Opcode::Sub },
            Register::Ax.cell(),
            1,
        );
        self.set_reg(Register::Ax);

        // Do the assignment the long way so that all checks run; when the
        // memory location is known, roll back and write directly instead.
        let before_long_way = RestorePoint::new(self.scrip);
        self.access_data_assign_to(expr.scope, expr.vartype, w)?;

        if ValueLocation::MarPointsToValue == expr.vloc {
            before_long_way.restore(self.scrip);
            let memwrite = write_cmd_for_size(self.sym.get_size(expr.vartype));
            self.scrip.write_cmd1(memwrite, Register::Ax.cell());
            self.set_reg(Register::Ax);
        }
        Ok(expr)
    }

    // ==========================================================================
    // Postfix operators
    // ==========================================================================

    fn parse_expr_postfix(&mut self, mut w: SrcWindow) -> Result<Expr, CompileError> {
        let op_sym = self.src.at(w, w.len - 1);
        if 1 == w.len {
            return Err(self.user_error(format!(
                "'{}' must either precede or follow some term to be modified",
                self.sym.name(op_sym)
            )));
        }
        w.eat_last();

        match op_sym {
            kw::DECREMENT | kw::INCREMENT => self.parse_expr_postfix_modifier(op_sym, w),
            _ => Err(self.user_error(format!(
                "Expected a term following the '{}', didn't find it",
                self.sym.name(op_sym)
            ))),
        }
    }

    fn parse_expr_postfix_modifier(
        &mut self,
        op_sym: Symbol,
        mut w: SrcWindow,
    ) -> Result<Expr, CompileError> {
        let op_is_inc = kw::INCREMENT == op_sym;

        self.strip_outermost_parens(&mut w);
        self.src.start_read(w);

        let mut expr = self.read_lhs_for_modification(w)?;

        let msg = format!("Argument of '{}'", self.sym.name(op_sym));
        self.check_vartype_mismatch(expr.vartype, kw::INT, true, &msg)?;

        let (apply, unapply) = if op_is_inc {
            (Opcode::Add, Opcode::Sub)
        } else {
            (Opcode::Sub, Opcode::Add)
        };

        // The long way: the old value survives in AX across the store.
        let before_long_way = RestorePoint::new(self.scrip);
        self.push_reg(Register::Ax);
        self.scrip.write_cmd2(apply, Register::Ax.cell(), 1);
        self.access_data_assign_to(expr.scope, expr.vartype, w)?;
        self.pop_reg(Register::Ax);

        if ValueLocation::MarPointsToValue == expr.vloc {
            // The memory holding the variable is known: modify it directly.
            before_long_way.restore(self.scrip);
            self.scrip.write_cmd2(apply, Register::Ax.cell(), 1);
            let memwrite = write_cmd_for_size(self.sym.get_size(expr.vartype));
            self.scrip.write_cmd1(memwrite, Register::Ax.cell());
            self.scrip.write_cmd2(unapply, Register::Ax.cell(), 1);
            self.set_reg(Register::Ax);
        }
        expr.vloc = ValueLocation::RuntimeInAx;
        Ok(expr)
    }

    // ==========================================================================
    // Ternary
    // ==========================================================================

    fn parse_expr_ternary(
        &mut self,
        tern_idx: usize,
        w: SrcWindow,
    ) -> Result<Expr, CompileError> {
        let term1 = w.sub(0, tern_idx);
        let after_term1 = w.sub(tern_idx + 1, w.len - (tern_idx + 1));

        // Find the ':' that belongs to this '?'.
        self.src.start_read(after_term1);
        self.skip_to_in(&[kw::COLON], after_term1);
        if self.src.reached_end(after_term1) || kw::COLON != self.src.peek_next_in(after_term1) {
            self.src.set_cursor_in(w, tern_idx);
            return Err(self.user_error("Didn't find the matching ':' to '?'"));
        }
        let colon_pos = self.src.cursor_in(after_term1);
        let term3_start = colon_pos + 1;
        let term3 = after_term1.sub(term3_start, after_term1.len - term3_start);
        let term2 = after_term1.sub(0, colon_pos);
        if term3.is_empty() {
            self.src.set_cursor_in(w, tern_idx);
            return Err(self.user_error("The third expression of this ternary is empty"));
        }
        let second_term_exists = !term2.is_empty();

        // The jump at the end of term1 and the jump after term2 both leave
        // the ternary, but they must use separate collectors: when term2
        // is ripped out, its jump must be ripped out with it and must not
        // linger in a collector that is patched later.
        let mut jumpdest_out_of_ternary = ForwardJump::new();
        let mut jumpdest_after_term2 = ForwardJump::new();
        let mut jumpdest_to_term3 = ForwardJump::new();

        let start_of_term1 = RestorePoint::new(self.scrip);

        // First term (the test).
        let expr1 = self.parse_expression_term(term1)?;
        let term1_known = expr1.vloc.is_compile_time_literal()
            && (kw::FLOAT == expr1.vartype || self.sym.is_any_integer_vartype(expr1.vartype));
        let term1_value = if term1_known {
            self.sym.literal_value(expr1.vloc.literal())
        } else {
            0
        };
        let mut dummy = expr1;
        self.result_to_ax(&mut dummy)?; // don't clobber expr1
        if !self.src.reached_end(term1) {
            let sym = self.src.get_next_in(term1);
            return Err(self.internal_error(format!(
                "Unexpected '{}' after 1st term of ternary",
                self.sym.name(sym)
            )));
        }

        // Jump to the third term or out of the ternary.
        self.scrip.write_cmd1(
            if second_term_exists {
                Opcode::Jz
            } else {
                Opcode::Jnz
            },
            CODE_CELL_PLACEHOLDER,
        );
        if second_term_exists {
            jumpdest_to_term3.add_param(self.scrip);
        } else {
            jumpdest_out_of_ternary.add_param(self.scrip);
        }

        let mut term1_ripped_out = false;
        if term1_known {
            // The test needn't run at runtime.
            start_of_term1.restore(self.scrip);
            term1_ripped_out = true;
        }

        // Second term.
        let start_of_term2 = RestorePoint::new(self.scrip);
        let expr2 = self.parse_expr_ternary_term2(expr1, term1_ripped_out, term2)?;

        // Placed here so that the jump after term2 is ripped out whenever
        // term3 is, leaving nothing to jump over.
        let start_of_term3 = RestorePoint::new(self.scrip);
        if second_term_exists {
            self.scrip.write_cmd1(Opcode::Jmp, CODE_CELL_PLACEHOLDER);
            jumpdest_after_term2.add_param(self.scrip);
        }

        let mut term2_ripped_out = false;
        if term1_known && 0 == term1_value {
            start_of_term2.restore(self.scrip); // term2 never evaluates
            term2_ripped_out = true;
        }

        // Third term.
        let line = self.src.line();
        jumpdest_to_term3.patch(self.scrip, line);

        let mut expr3 = self.parse_expression_term(term3)?;
        let mut dummy = expr3;
        self.result_to_ax(&mut dummy)?; // don't clobber expr3
        let string_ptr = self.sym.string_struct_ptr_sym();
        self.convert_ax_string_to_string_object(string_ptr, &mut expr3.vartype);

        let mut term3_ripped_out = false;
        if term1_known && 0 != term1_value {
            start_of_term3.restore(self.scrip); // term3 never evaluates
            term3_ripped_out = true;
        }

        let line = self.src.line();
        if !term2_ripped_out && !term3_ripped_out {
            jumpdest_after_term2.patch(self.scrip, line);
        }
        jumpdest_out_of_ternary.patch(self.scrip, line);

        let scope = if ScopeType::Local == expr2.scope || ScopeType::Local == expr3.scope {
            ScopeType::Local
        } else {
            ScopeType::Global
        };

        // The result type is the common type of the branches.
        let mut vartype = expr2.vartype;
        if self.is_vartype_mismatch_oneway(expr3.vartype, expr2.vartype) {
            if self.is_vartype_mismatch_oneway(expr2.vartype, expr3.vartype) {
                self.src.set_cursor_in(w, tern_idx);
                return Err(self.user_error(format!(
                    "An expression of type '{}' is incompatible with an expression of type '{}'",
                    self.sym.name(expr2.vartype),
                    self.sym.name(expr3.vartype)
                )));
            }
            vartype = expr3.vartype;
        }

        if term1_known {
            if 0 != term1_value && expr2.vloc.is_compile_time_literal() {
                start_of_term1.restore(self.scrip); // the whole ternary folds
                return Ok(Expr {
                    vloc: expr2.vloc,
                    scope,
                    vartype,
                });
            }
            if 0 == term1_value && expr3.vloc.is_compile_time_literal() {
                start_of_term1.restore(self.scrip);
                return Ok(Expr {
                    vloc: expr3.vloc,
                    scope,
                    vartype,
                });
            }
        }

        // Each surviving branch has put its result into AX.
        Ok(Expr {
            vloc: ValueLocation::RuntimeInAx,
            scope,
            vartype,
        })
    }

    fn parse_expr_ternary_term2(
        &mut self,
        expr1: Expr,
        term1_ripped_out: bool,
        term2: SrcWindow,
    ) -> Result<Expr, CompileError> {
        let mut expr;
        if !term2.is_empty() {
            expr = self.parse_expression_term(term2)?;
            if !self.src.reached_end(term2) {
                let sym = self.src.get_next_in(term2);
                return Err(self.internal_error(format!(
                    "Unexpected '{}' after 1st term of ternary",
                    self.sym.name(sym)
                )));
            }
            let mut dummy = expr;
            self.result_to_ax(&mut dummy)?; // don't clobber expr
        } else {
            // `a ?: b` — the test doubles as the second term.
            expr = expr1;
            if term1_ripped_out {
                // Still needs to move into AX.
                let mut dummy = expr;
                self.result_to_ax(&mut dummy)?;
            }
        }

        // Whether term3 turns out string-typed isn't known yet and code
        // must be generated now, so play it safe and convert any 'string'
        // into 'String'.
        let string_ptr = self.sym.string_struct_ptr_sym();
        self.convert_ax_string_to_string_object(string_ptr, &mut expr.vartype);
        Ok(expr)
    }

    // ==========================================================================
    // Binary operators
    // ==========================================================================

    fn parse_expr_binary(&mut self, op_idx: usize, w: SrcWindow) -> Result<Expr, CompileError> {
        let start_of_term = RestorePoint::new(self.scrip);
        let operator_sym = self.src.at(w, op_idx);

        // Evaluate the left-hand side first so that errors appear in
        // left-to-right order.
        let lhs = w.sub(0, op_idx);
        let mut expr_lhs = self.parse_expression_term(lhs)?;
        let vloc_lhs = expr_lhs.vloc; // before the move into AX
        self.result_to_ax(&mut expr_lhs)?;

        let mut to_exit = ForwardJump::new();
        if kw::AND == operator_sym {
            // Lazy evaluation: AX == 0 settles the '&&', and AX is already
            // the result.
            self.scrip.write_cmd1(Opcode::Jz, CODE_CELL_PLACEHOLDER);
            to_exit.add_param(self.scrip);
        } else if kw::OR == operator_sym {
            // Lazy evaluation: AX != 0 settles the '||'.
            self.scrip.write_cmd1(Opcode::Jnz, CODE_CELL_PLACEHOLDER);
            to_exit.add_param(self.scrip);
        }

        self.push_reg(Register::Ax);
        let rhs = w.sub(op_idx + 1, w.len - (op_idx + 1));
        if rhs.is_empty() {
            return Err(self.user_error(format!(
                "Binary operator '{}' doesn't have a right hand side",
                self.sym.name(operator_sym)
            )));
        }

        let mut expr_rhs = self.parse_expression_term(rhs)?;
        let vloc_rhs = expr_rhs.vloc;
        self.result_to_ax(&mut expr_rhs)?;

        // The left result comes back in BX although it was pushed from AX.
        self.pop_reg(Register::Bx);

        let opcode = self.get_opcode(operator_sym, expr_lhs.vartype, expr_rhs.vartype)?;
        self.scrip
            .write_cmd2(opcode, Register::Bx.cell(), Register::Ax.cell());
        self.scrip
            .write_cmd2(Opcode::RegToReg, Register::Bx.cell(), Register::Ax.cell());
        self.set_reg(Register::Bx);
        self.set_reg(Register::Ax);

        let line = self.src.line();
        to_exit.patch(self.scrip, line);

        let mut vartype = expr_rhs.vartype;
        if opcode.is_boolean() {
            vartype = kw::INT;
        }
        let scope = expr_rhs.scope;

        let (ValueLocation::CompileTimeLiteral(lhs_lit), ValueLocation::CompileTimeLiteral(rhs_lit)) =
            (vloc_lhs, vloc_rhs)
        else {
            return Ok(Expr {
                vloc: ValueLocation::RuntimeInAx,
                scope,
                vartype,
            });
        };

        // Both operands are literals: attempt the operation now.

        if kw::AND == operator_sym || kw::OR == operator_sym {
            let left = 0 != self.sym.literal_value(lhs_lit);
            let mut chosen = if kw::AND == operator_sym {
                if left {
                    rhs_lit
                } else {
                    lhs_lit
                }
            } else if left {
                lhs_lit
            } else {
                rhs_lit
            };

            if !self
                .sym
                .is_any_integer_vartype(self.sym.literal_vartype(chosen))
            {
                // Swap an int literal in; don't touch the existing one.
                let truth = 0 != self.sym.literal_value(chosen);
                chosen = self.sym.find_or_add_int_literal(truth as CodeCell);
            }

            start_of_term.restore(self.scrip);
            return Ok(Expr {
                vloc: ValueLocation::CompileTimeLiteral(chosen),
                scope,
                vartype,
            });
        }

        if let Some(folded) = self.parse_expression_compile_time(operator_sym, lhs_lit, rhs_lit)? {
            start_of_term.restore(self.scrip);
            return Ok(Expr {
                vloc: ValueLocation::CompileTimeLiteral(folded),
                scope,
                vartype,
            });
        }

        Ok(Expr {
            vloc: ValueLocation::RuntimeInAx,
            scope,
            vartype,
        })
    }

    /// Try to evaluate `lhs op rhs` over literals. Returns the result
    /// literal, or `None` when no evaluator covers the operand types.
    fn parse_expression_compile_time(
        &mut self,
        op_sym: Symbol,
        lhs_lit: Symbol,
        rhs_lit: Symbol,
    ) -> Result<Option<Symbol>, CompileError> {
        let vartype_lhs = self.sym.literal_vartype(lhs_lit);
        let vartype_rhs = self.sym.literal_vartype(rhs_lit);

        let result = if kw::FLOAT == vartype_lhs {
            if kw::FLOAT != vartype_rhs {
                return Ok(None);
            }
            let Some(eval) = self.sym.operator(op_sym).and_then(|o| o.float_eval) else {
                return Ok(None);
            };
            let l = f32::from_bits(self.sym.literal_value(lhs_lit) as u32);
            let r = f32::from_bits(self.sym.literal_value(rhs_lit) as u32);
            eval(l, r)
        } else if self.sym.is_any_integer_vartype(vartype_lhs) {
            if !self.sym.is_any_integer_vartype(vartype_rhs) {
                return Ok(None);
            }
            let Some(eval) = self.sym.operator(op_sym).and_then(|o| o.int_eval) else {
                return Ok(None);
            };
            eval(
                self.sym.literal_value(lhs_lit),
                self.sym.literal_value(rhs_lit),
            )
        } else {
            return Ok(None);
        };

        match result {
            Ok(CtValue::Int(v)) => Ok(Some(self.sym.find_or_add_int_literal(v))),
            Ok(CtValue::Float(v)) => Ok(Some(self.sym.find_or_add_float_literal(v))),
            Err(msg) => Err(self.user_error(msg)),
        }
    }

    // ==========================================================================
    // `new`
    // ==========================================================================

    fn parse_expr_check_arg_of_new(&mut self, argument_vartype: Symbol) -> Result<(), CompileError> {
        if !self.sym.is_vartype(argument_vartype) {
            return Err(self.user_error(format!(
                "Expected a type after 'new', found '{}' instead",
                self.sym.name(argument_vartype)
            )));
        }
        if self.sym.is_undefined_vartype(argument_vartype) {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "The struct '{}' hasn't been completely defined yet",
                    self.sym.name(argument_vartype)
                ),
                argument_vartype,
            )));
        }
        if !self.sym.is_any_integer_vartype(argument_vartype)
            && kw::FLOAT != argument_vartype
            && !self.sym.is_managed_vartype(argument_vartype)
        {
            return Err(
                self.user_error("Can only use integer types or 'float' or managed types with 'new'")
            );
        }
        Ok(())
    }

    fn parse_expr_new(&mut self, w: SrcWindow) -> Result<Expr, CompileError> {
        self.src.start_read(w);
        if self.src.reached_end(w) {
            return Err(self.user_error("Expected a type after 'new' but didn't find any"));
        }
        let argument_vartype = self.src.get_next_in(w);
        self.parse_expr_check_arg_of_new(argument_vartype)?;

        let is_managed = self.sym.is_managed_vartype(argument_vartype);
        let with_bracket_expr = !self.src.reached_end(w); // "new FOO[BAR]"

        let element_vartype;
        let vartype;
        if with_bracket_expr {
            // "new Struct[...]" means "new Struct*[...]" for managed types.
            self.eat_dynpointer_symbol_if_present(argument_vartype)?;

            // A handcrafted message, so that the user isn't pushed towards
            // defining a dynamic array when that would be wrong.
            let open_bracket = self.src.get_next();
            if kw::OPEN_BRACKET != open_bracket {
                return Err(self.user_error(format!(
                    "Unexpected '{}'",
                    self.sym.name(open_bracket)
                )));
            }

            let mut bracketed = self.parse_integer_expression()?;
            self.result_to_ax(&mut bracketed)?;
            let next = self.src.get_next();
            self.expect(kw::CLOSE_BRACKET, next)?;

            element_vartype = if is_managed {
                self.sym
                    .vartype_with(VartypeShape::Dynpointer, argument_vartype)
            } else {
                argument_vartype
            };
            vartype = self.sym.vartype_with(VartypeShape::Dynarray, element_vartype);
        } else {
            if self.sym.is_builtin_vartype(argument_vartype) {
                return Err(self.user_error(format!(
                    "Expected '[' after the built-in type '{}'",
                    self.sym.name(argument_vartype)
                )));
            }
            if !is_managed {
                return Err(self.user_error(format!(
                    "Expected '[' after the integer type '{}'",
                    self.sym.name(argument_vartype)
                )));
            }
            if 0 == self.sym.get_size(argument_vartype) {
                return Err(self.user_error(self.reference_msg_sym(
                    format!(
                        "Struct '{}' doesn't contain any variables, cannot use 'new' with it",
                        self.sym.name(argument_vartype)
                    ),
                    argument_vartype,
                )));
            }
            element_vartype = argument_vartype;
            vartype = self.sym.vartype_with(VartypeShape::Dynpointer, argument_vartype);
        }

        let element_size = self.sym.get_size(element_vartype);
        if 0 == element_size {
            // The Engine divides by the element size.
            return Err(self.internal_error("Trying to emit allocation of zero dynamic memory"));
        }

        if with_bracket_expr {
            self.scrip.write_cmd3(
                Opcode::NewArray,
                Register::Ax.cell(),
                element_size as CodeCell,
                is_managed as CodeCell,
            );
        } else {
            self.scrip.write_cmd2(
                Opcode::NewUserObject,
                Register::Ax.cell(),
                element_size as CodeCell,
            );
        }
        self.set_reg(Register::Ax);

        Ok(Expr {
            vloc: ValueLocation::RuntimeInAx,
            scope: ScopeType::Global,
            vartype,
        })
    }

    // ==========================================================================
    // Value plumbing
    // ==========================================================================

    /// Make sure the expression's value is in AX.
    pub(crate) fn result_to_ax(&mut self, expr: &mut Expr) -> Result<(), CompileError> {
        if let ValueLocation::CompileTimeLiteral(lit) = expr.vloc {
            let value = self.sym.literal_value(lit);
            self.scrip
                .write_cmd2(Opcode::LitToReg, Register::Ax.cell(), value);
            self.set_reg(Register::Ax);
            if kw::STRING == self.sym.vartype_without(VartypeShape::Const, expr.vartype) {
                self.scrip
                    .fixup_previous(crate::bytecode::FixupType::String);
            }
            expr.vloc = ValueLocation::RuntimeInAx;
        }

        if ValueLocation::MarPointsToValue != expr.vloc {
            return Ok(()); // already in AX
        }

        if kw::STRING == self.sym.vartype_without(VartypeShape::Const, expr.vartype) {
            // Old-style strings are referenced by their first byte.
            self.scrip
                .write_cmd2(Opcode::RegToReg, Register::Mar.cell(), Register::Ax.cell());
        } else {
            let opcode = if self.sym.is_dyn_vartype(expr.vartype) {
                Opcode::MemReadPtr
            } else {
                read_cmd_for_size(self.sym.get_size(expr.vartype))
            };
            self.scrip.write_cmd1(opcode, Register::Ax.cell());
        }
        self.set_reg(Register::Ax);
        expr.vloc = ValueLocation::RuntimeInAx;
        Ok(())
    }

    /// Whole structs and arrays cannot be expression results; managed
    /// structs collapse into their address.
    pub(crate) fn handle_struct_or_array_result(
        &mut self,
        expr: &mut Expr,
    ) -> Result<(), CompileError> {
        if self.sym.is_array_vartype(expr.vartype) {
            return Err(
                self.user_error("Cannot access array as a whole (did you forget to add \"[0]\"?)")
            );
        }

        if self.sym.is_atomic_vartype(expr.vartype) && self.sym.is_struct_vartype(expr.vartype) {
            if self.sym.is_managed_vartype(expr.vartype) {
                // Interpret the memory address as the result.
                expr.vartype = self.sym.vartype_with(VartypeShape::Dynpointer, expr.vartype);
                self.scrip
                    .write_cmd2(Opcode::RegToReg, Register::Mar.cell(), Register::Ax.cell());
                self.set_reg(Register::Ax);
                expr.vloc = ValueLocation::RuntimeInAx;
                return Ok(());
            }
            return Err(self.user_error("Cannot access non-managed struct as a whole"));
        }
        Ok(())
    }

    /// Adopt a literal as the expression value. String literals cannot stay
    /// compile-time (they need their fixup) and go to AX at once.
    pub(crate) fn set_compile_time_literal(&mut self, lit: Symbol) -> Result<Expr, CompileError> {
        if !self.sym.is_literal(lit) {
            return Err(self.internal_error(format!("'{}' isn't literal", self.sym.name(lit))));
        }
        let mut expr = Expr {
            vloc: ValueLocation::CompileTimeLiteral(lit),
            scope: ScopeType::Global,
            vartype: self.sym.literal_vartype(lit),
        };
        if kw::STRING == self.sym.vartype_without(VartypeShape::Const, expr.vartype) {
            self.result_to_ax(&mut expr)?;
        }
        Ok(expr)
    }

    /// When a `String` is wanted but AX holds an old-style string, convert
    /// AX into a String object and adjust the tracked vartype.
    pub(crate) fn convert_ax_string_to_string_object(
        &mut self,
        wanted_vartype: Symbol,
        current_vartype: &mut Symbol,
    ) {
        let string_struct = self.sym.string_struct_sym();
        if string_struct == Symbol::NONE {
            return;
        }
        if kw::STRING == self.sym.vartype_without(VartypeShape::Const, *current_vartype)
            && string_struct == self.sym.vartype_without(VartypeShape::Dynpointer, wanted_vartype)
        {
            self.scrip
                .write_cmd1(Opcode::CreateString, Register::Ax.cell());
            *current_vartype = self.sym.vartype_with(VartypeShape::Dynpointer, string_struct);
        }
    }

    // ==========================================================================
    // Opcode selection and type compatibility
    // ==========================================================================

    /// Pick the opcode variant of `op_sym` that fits the operand vartypes.
    pub(crate) fn get_opcode(
        &mut self,
        op_sym: Symbol,
        vartype1: Symbol,
        vartype2: Symbol,
    ) -> Result<Opcode, CompileError> {
        let Some(op) = self.sym.operator(op_sym) else {
            return Err(self.internal_error(format!(
                "'{}' isn't an operator",
                self.sym.name(op_sym)
            )));
        };
        let op = op.clone();
        let op_name = self.sym.name(op_sym).to_string();

        if kw::FLOAT == vartype1 || kw::FLOAT == vartype2 {
            if vartype1 != kw::FLOAT {
                return Err(self.user_error(format!(
                    "Cannot apply the operator '{}' to a non-float and a float",
                    op_name
                )));
            }
            if vartype2 != kw::FLOAT {
                return Err(self.user_error(format!(
                    "Cannot apply the operator '{}' to a float and a non-float",
                    op_name
                )));
            }
            return op.float_opcode.ok_or_else(|| {
                self.user_error(format!(
                    "Cannot apply the operator '{}' to float values",
                    op_name
                ))
            });
        }

        let iatos1 = self.sym.is_any_string_vartype(vartype1);
        let iatos2 = self.sym.is_any_string_vartype(vartype2);

        if iatos1 || iatos2 {
            if kw::NULL == vartype1 || kw::NULL == vartype2 {
                // Don't compare strings against null as strings: that
                // provokes a runtime error. Compare as pointers.
                return op.dyn_opcode.ok_or_else(|| {
                    self.user_error(format!(
                        "Cannot apply the operator '{}' to managed types",
                        op_name
                    ))
                });
            }
            if !iatos1 {
                return Err(self.user_error("Can only compare 'null' or a string to another string"));
            }
            if !iatos2 {
                return Err(self.user_error("Can only compare a string to another string or 'null'"));
            }
            return op.string_opcode.ok_or_else(|| {
                self.user_error(format!(
                    "Cannot apply the operator '{}' to string values",
                    op_name
                ))
            });
        }

        let dyn1 = self.sym.is_dynpointer_vartype(vartype1) || kw::NULL == vartype1;
        let dyn2 = self.sym.is_dynpointer_vartype(vartype2) || kw::NULL == vartype2;
        let dynarr1 = self.sym.is_dynarray_vartype(vartype1) || kw::NULL == vartype1;
        let dynarr2 = self.sym.is_dynarray_vartype(vartype2) || kw::NULL == vartype2;
        if (dyn1 && dyn2) || (dynarr1 && dynarr2) {
            return op.dyn_opcode.ok_or_else(|| {
                self.user_error(format!(
                    "Cannot apply the operator '{}' to managed types",
                    op_name
                ))
            });
        }

        // Other combinations of managed types won't mingle.
        if self.sym.is_dynpointer_vartype(vartype1) || self.sym.is_dynpointer_vartype(vartype2) {
            return Err(self.user_error(format!(
                "Cannot apply the operator '{}' to a type '{}' and a type '{}'",
                op_name,
                self.sym.name(vartype1),
                self.sym.name(vartype2)
            )));
        }

        let opcode = op.int_opcode.ok_or_else(|| {
            self.user_error(format!(
                "Cannot apply the operator '{}' to integer values",
                op_name
            ))
        })?;

        let msg = format!("Left-hand side of '{}' term", op_name);
        self.check_vartype_mismatch(vartype1, kw::INT, true, &msg)?;
        let msg = format!("Right-hand side of '{}' term", op_name);
        self.check_vartype_mismatch(vartype2, kw::INT, true, &msg)?;
        Ok(opcode)
    }

    /// Whether `vartype_is` can NOT be converted to `vartype_wants_to_be`.
    pub(crate) fn is_vartype_mismatch_oneway(
        &self,
        vartype_is: Symbol,
        vartype_wants_to_be: Symbol,
    ) -> bool {
        let sym = &*self.sym;

        // 'void' converts to and from nothing.
        if kw::VOID == vartype_is || kw::VOID == vartype_wants_to_be {
            return true;
        }
        if vartype_is == vartype_wants_to_be {
            return false;
        }

        // 'null' converts to dynpointers and dynarrays.
        if kw::NULL == vartype_is {
            return !sym.is_dynpointer_vartype(vartype_wants_to_be)
                && !sym.is_dynarray_vartype(vartype_wants_to_be);
        }

        // Only dynarrays can be assigned to dynarrays.
        if sym.is_dynarray_vartype(vartype_is) != sym.is_dynarray_vartype(vartype_wants_to_be) {
            return true;
        }

        let string_struct = sym.string_struct_sym();
        if string_struct != Symbol::NONE {
            // `String *` converts to `const string`.
            if string_struct == sym.vartype_without(VartypeShape::Dynpointer, vartype_is)
                && kw::STRING == sym.vartype_without(VartypeShape::Const, vartype_wants_to_be)
            {
                return false;
            }
            // `string` / `const string` converts to `String *`.
            if kw::STRING == sym.vartype_without(VartypeShape::Const, vartype_is)
                && string_struct
                    == sym.vartype_without(VartypeShape::Dynpointer, vartype_wants_to_be)
            {
                return false;
            }
        }

        // NOTE: `String *` and `const string` can NOT convert to `string`:
        // a function with a `string` parameter may modify the buffer.

        if sym.is_oldstring(vartype_is) != sym.is_oldstring(vartype_wants_to_be) {
            return true;
        }

        // This test must stay between the string tests above and the const
        // stripping below.
        if sym.is_const_vartype(vartype_is) && !sym.is_const_vartype(vartype_wants_to_be) {
            return true;
        }

        if sym.is_oldstring(vartype_is) {
            return false;
        }

        // From here on, constness and dynarray-ness don't matter.
        let mut vartype_is = sym.vartype_without(VartypeShape::Const, vartype_is);
        vartype_is = sym.vartype_without(VartypeShape::Dynarray, vartype_is);
        let mut wants = sym.vartype_without(VartypeShape::Const, vartype_wants_to_be);
        wants = sym.vartype_without(VartypeShape::Dynarray, wants);

        // Floats don't mingle with other types.
        if (vartype_is == kw::FLOAT) != (wants == kw::FLOAT) {
            return true;
        }

        // char, short etc. convert into int.
        if sym.is_any_integer_vartype(vartype_is) && kw::INT == wants {
            return false;
        }

        // Dynpointers may convert along the inheritance chain.
        if sym.is_dynpointer_vartype(vartype_is) || sym.is_dynpointer_vartype(wants) {
            if sym.is_dynpointer_vartype(vartype_is) != sym.is_dynpointer_vartype(wants) {
                return true;
            }
            let target_core = sym.vartype_without(VartypeShape::Dynpointer, wants);
            let mut current_core = sym.vartype_without(VartypeShape::Dynpointer, vartype_is);
            while current_core != target_core {
                current_core = sym.parent_vartype(current_core);
                if current_core == Symbol::NONE {
                    return true;
                }
            }
            return false;
        }

        // Structs and arrays only convert to themselves.
        if sym.is_struct_vartype(vartype_is)
            || sym.is_struct_vartype(wants)
            || sym.is_array_vartype(vartype_is)
            || sym.is_array_vartype(wants)
        {
            return vartype_is != wants;
        }

        false
    }

    /// Error out when the vartypes don't fit (in one direction, or in both
    /// when order doesn't matter).
    pub(crate) fn check_vartype_mismatch(
        &mut self,
        vartype_is: Symbol,
        vartype_wants_to_be: Symbol,
        order_matters: bool,
        msg: &str,
    ) -> Result<(), CompileError> {
        if !self.is_vartype_mismatch_oneway(vartype_is, vartype_wants_to_be) {
            return Ok(());
        }
        if !order_matters && !self.is_vartype_mismatch_oneway(vartype_wants_to_be, vartype_is) {
            return Ok(());
        }

        let mut is_string = format!("'{}'", self.sym.name(vartype_is));
        let mut wtb_string = format!("'{}'", self.sym.name(vartype_wants_to_be));
        if self.sym.is_any_array_vartype(vartype_is) != self.sym.is_any_array_vartype(vartype_wants_to_be)
        {
            if self.sym.is_any_array_vartype(vartype_is) {
                is_string = "an array".to_string();
            }
            if self.sym.is_any_array_vartype(vartype_wants_to_be) {
                wtb_string = "an array".to_string();
            }
        }
        if self.sym.is_any_string_vartype(vartype_is)
            != self.sym.is_any_string_vartype(vartype_wants_to_be)
        {
            if self.sym.is_any_string_vartype(vartype_is) {
                is_string = "a kind of string".to_string();
            }
            if self.sym.is_any_string_vartype(vartype_wants_to_be) {
                wtb_string = "a kind of string".to_string();
            }
        }
        if self.sym.is_dynpointer_vartype(vartype_is)
            != self.sym.is_dynpointer_vartype(vartype_wants_to_be)
        {
            if self.sym.is_dynpointer_vartype(vartype_is) {
                is_string = "a pointer".to_string();
            }
            if self.sym.is_dynpointer_vartype(vartype_wants_to_be) {
                wtb_string = "a pointer".to_string();
            }
        }

        let prefix = if msg.is_empty() { "Type mismatch" } else { msg };
        Err(self.user_error(format!(
            "{}: Cannot convert {} to {}",
            prefix, is_string, wtb_string
        )))
    }
}

/// The memory-read opcode for a value of the given byte size.
pub(crate) fn read_cmd_for_size(size: usize) -> Opcode {
    match size {
        1 => Opcode::MemReadB,
        2 => Opcode::MemReadW,
        _ => Opcode::MemRead,
    }
}

/// The memory-write opcode for a value of the given byte size.
pub(crate) fn write_cmd_for_size(size: usize) -> Opcode {
    match size {
        1 => Opcode::MemWriteB,
        2 => Opcode::MemWriteW,
        _ => Opcode::MemWrite,
    }
}
