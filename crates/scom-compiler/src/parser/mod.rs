//! The parser/emitter.
//!
//! A single linear walker over the token stream, run twice: the
//! **pre-analyse** pass collects function headers and global-vs-import
//! intent and skips function bodies; the **main** pass generates code. In
//! between, the symbol table is reset with stable ids so that forward
//! references recorded in pass one resolve in pass two.
//!
//! Every parse function either returns normally or fails with a
//! [`CompileError`] that `?` propagates up to [`Parser::parse`], the single
//! catch point. Partial emission state is left as-is on failure; the caller
//! must not consume it.

mod access;
mod decl;
mod expr;
mod stmt;

use rustc_hash::FxHashMap;
use scom_core::{CompileError, Diagnostics, Options, TypeQualifiers};

use crate::bytecode::{CodeLoc, CompiledScript, FixupType, Register, RestorePoint};
use crate::callpoints::CallpointManager;
use crate::emit::RegisterTracker;
use crate::nesting::NestingStack;
use crate::source::{SrcList, SrcWindow};
use crate::symtable::{kw, Symbol, SymbolTable};

pub use expr::{Expr, ValueLocation};

/// Which pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreAnalyze,
    Main,
}

/// Whether a data access reads, writes, or reads in preparation of a
/// write-back (compound assignment, `++`/`--`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableAccess {
    Reading,
    Writing,
    ReadingForLaterWriting,
}

/// The compiler for one compilation unit.
pub struct Parser<'a> {
    pub(crate) src: &'a mut SrcList,
    pub(crate) sym: &'a mut SymbolTable,
    pub(crate) scrip: &'a mut CompiledScript,
    pub(crate) diag: &'a mut Diagnostics,
    pub(crate) options: Options,
    pub(crate) phase: Phase,
    pub(crate) nest: NestingStack,
    pub(crate) reg_track: RegisterTracker,
    /// Call points of local functions.
    pub(crate) fcm: CallpointManager,
    /// Call points of imported functions.
    pub(crate) fim: CallpointManager,
    /// Global-import-variable map: whether a name was declared as a global
    /// non-import (true) or as an import (false) during pre-analyse.
    pub(crate) givm: FxHashMap<Symbol, bool>,
    /// Still-incomplete struct vartypes and where they were first used.
    pub(crate) struct_refs: FxHashMap<Symbol, usize>,
    last_emitted_section: Option<usize>,
}

impl<'a> Parser<'a> {
    pub fn new(
        src: &'a mut SrcList,
        options: Options,
        scrip: &'a mut CompiledScript,
        sym: &'a mut SymbolTable,
        diag: &'a mut Diagnostics,
    ) -> Self {
        Self {
            src,
            sym,
            scrip,
            diag,
            options,
            phase: Phase::PreAnalyze,
            nest: NestingStack::new(),
            reg_track: RegisterTracker::new(),
            fcm: CallpointManager::new(),
            fim: CallpointManager::new(),
            givm: FxHashMap::default(),
            struct_refs: FxHashMap::default(),
            last_emitted_section: None,
        }
    }

    /// Run the whole compilation. Errors land in the diagnostics sink;
    /// returns whether the compile succeeded.
    pub fn parse(&mut self) -> bool {
        match self.run() {
            Ok(()) => true,
            Err(err) => {
                self.diag.push_error(&err);
                false
            }
        }
    }

    fn run(&mut self) -> Result<(), CompileError> {
        let start_of_input = self.src.get_cursor();

        self.phase = Phase::PreAnalyze;
        self.parse_input()?;
        self.fcm.reset();
        self.sym.reinit_for_main_pass();

        self.src.set_cursor(start_of_input);
        self.last_emitted_section = None;
        self.nest = NestingStack::new();
        self.phase = Phase::Main;
        self.parse_input()?;

        self.check_for_unresolved_funcs()?;
        self.check_for_unresolved_struct_forward_decls()?;
        if self.options.contains(Options::EXPORT_ALL) {
            self.export_all_functions();
        }
        self.blank_out_unused_imports();
        self.check_fixup_sanity()
    }

    // ==========================================================================
    // Top-level loop
    // ==========================================================================

    fn parse_input(&mut self) -> Result<(), CompileError> {
        // Non-zero only while a (struct member) function body is open.
        let mut struct_of_current_func = Symbol::NONE;
        let mut name_of_current_func = Symbol::NONE;

        while !self.src.reached_eof() {
            self.handle_src_section_change_at(self.src.get_cursor());

            let tqs = self.parse_qualifiers()?;
            let leading_sym = self.src.get_next();

            // Vartype clauses.

            if kw::ENUM == leading_sym {
                self.check_tq(tqs, name_of_current_func != Symbol::NONE, false)?;
                self.parse_enum(tqs, &mut struct_of_current_func, &mut name_of_current_func)?;
                continue;
            }

            if kw::EXPORT == leading_sym {
                self.check_tq_is_empty(tqs)?;
                self.parse_export()?;
                continue;
            }

            if kw::STRUCT == leading_sym {
                self.check_tq(tqs, name_of_current_func != Symbol::NONE, false)?;
                self.parse_struct(tqs, &mut struct_of_current_func, &mut name_of_current_func)?;
                continue;
            }

            if self.sym.is_vartype(leading_sym) && kw::DOT != self.src.peek_next() {
                // Whether the qualifiers are legal can only be checked once
                // the declared names are known.
                self.parse_vartype_clause(
                    leading_sym,
                    tqs,
                    &mut struct_of_current_func,
                    &mut name_of_current_func,
                )?;
                continue;
            }

            // Command clauses.

            if Symbol::NONE == name_of_current_func {
                return Err(self.user_error(format!(
                    "'{}' is illegal outside a function",
                    self.sym.name(leading_sym)
                )));
            }

            self.check_tq_is_empty(tqs)?;
            self.parse_command(
                leading_sym,
                &mut struct_of_current_func,
                &mut name_of_current_func,
            )?;
        }
        Ok(())
    }

    fn handle_src_section_change_at(&mut self, pos: usize) {
        let section_id = self.src.section_id_at(pos);
        if self.last_emitted_section == Some(section_id) {
            return;
        }
        if Phase::Main == self.phase {
            let name = self.src.section_name(section_id).to_string();
            self.scrip.start_new_section(&name);
        }
        self.last_emitted_section = Some(section_id);
    }

    // ==========================================================================
    // Qualifiers
    // ==========================================================================

    fn parse_qualifiers(&mut self) -> Result<TypeQualifiers, CompileError> {
        let mut tqs = TypeQualifiers::default();
        let mut import_std = false;
        let mut import_try = false;
        while !self.src.reached_eof() {
            let peeked = self.src.peek_next();
            let bit = match peeked {
                kw::ATTRIBUTE => TypeQualifiers::ATTRIBUTE,
                kw::AUTOPTR => TypeQualifiers::AUTOPTR,
                kw::BUILTIN => TypeQualifiers::BUILTIN,
                kw::CONST => TypeQualifiers::CONST,
                kw::IMPORT => {
                    import_std = true;
                    TypeQualifiers::IMPORT
                }
                kw::TRYIMPORT => {
                    import_try = true;
                    TypeQualifiers::IMPORT
                }
                kw::INTERNALSTRING => TypeQualifiers::STRINGSTRUCT,
                kw::MANAGED => TypeQualifiers::MANAGED,
                kw::PROTECTED => TypeQualifiers::PROTECTED,
                kw::READONLY => TypeQualifiers::READONLY,
                kw::STATIC => TypeQualifiers::STATIC,
                kw::WRITEPROTECTED => TypeQualifiers::WRITEPROTECTED,
                _ => return Ok(tqs),
            };
            tqs |= bit;
            self.src.get_next();
            if import_std && import_try {
                return Err(self.user_error("Cannot use both 'import' and '_tryimport'"));
            }
        }
        Ok(tqs)
    }

    /// Check that the accumulated qualifiers fit the declaration context.
    pub(crate) fn check_tq(
        &mut self,
        tqs: TypeQualifiers,
        in_func_body: bool,
        in_struct_decl: bool,
    ) -> Result<(), CompileError> {
        if in_struct_decl {
            for (bit, name) in [
                (TypeQualifiers::BUILTIN, "builtin"),
                (TypeQualifiers::STRINGSTRUCT, "internalstring"),
            ] {
                if tqs.contains(bit) {
                    return Err(
                        self.user_error(format!("'{}' is illegal in a struct declaration", name))
                    );
                }
            }
        } else {
            for (bit, name) in [
                (TypeQualifiers::PROTECTED, "protected"),
                (TypeQualifiers::WRITEPROTECTED, "writeprotected"),
            ] {
                if tqs.contains(bit) {
                    return Err(self
                        .user_error(format!("'{}' is only legal in a struct declaration", name)));
                }
            }
        }

        if in_func_body {
            for (bit, name) in [
                (TypeQualifiers::AUTOPTR, "autoptr"),
                (TypeQualifiers::BUILTIN, "builtin"),
                (TypeQualifiers::IMPORT, "import"),
                (TypeQualifiers::MANAGED, "managed"),
                (TypeQualifiers::STATIC, "static"),
                (TypeQualifiers::STRINGSTRUCT, "internalstring"),
            ] {
                if tqs.contains(bit) {
                    return Err(
                        self.user_error(format!("'{}' is illegal in a function body", name))
                    );
                }
            }
        }

        let protection_count = tqs.contains(TypeQualifiers::PROTECTED) as u8
            + tqs.contains(TypeQualifiers::WRITEPROTECTED) as u8
            + tqs.contains(TypeQualifiers::READONLY) as u8;
        if protection_count > 1 {
            return Err(self.user_error(
                "Can only use one out of 'protected', 'readonly', and 'writeprotected'",
            ));
        }

        if tqs.contains(TypeQualifiers::AUTOPTR)
            && !(tqs.contains(TypeQualifiers::BUILTIN) && tqs.contains(TypeQualifiers::MANAGED))
        {
            return Err(self.user_error("'autoptr' must be combined with 'builtin' and 'managed'"));
        }
        if tqs.contains(TypeQualifiers::STRINGSTRUCT) && !tqs.contains(TypeQualifiers::AUTOPTR) {
            return Err(self.user_error("'internalstring' must be combined with 'autoptr'"));
        }
        if tqs.contains(TypeQualifiers::IMPORT) && tqs.contains(TypeQualifiers::STRINGSTRUCT) {
            return Err(self.user_error("Cannot combine 'import' and 'internalstring'"));
        }
        Ok(())
    }

    pub(crate) fn check_tq_is_empty(&mut self, tqs: TypeQualifiers) -> Result<(), CompileError> {
        if tqs.is_empty() {
            return Ok(());
        }
        let name = qualifier_name(tqs);
        Err(self.user_error(format!("Unexpected '{}' before a command", name)))
    }

    // ==========================================================================
    // Diagnostics helpers
    // ==========================================================================

    pub(crate) fn cur_section(&self) -> String {
        self.src.section_name(self.src.section_id()).to_string()
    }

    pub(crate) fn user_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::User {
            section: self.cur_section(),
            line: self.src.line(),
            message: message.into(),
        }
    }

    pub(crate) fn internal_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Internal {
            section: self.cur_section(),
            line: self.src.line(),
            message: message.into(),
        }
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let section = self.cur_section();
        let line = self.src.line();
        self.diag.warn(section, line, message);
    }

    /// Append a "See line N" / "See <section> line N" suffix pointing at a
    /// prior declaration, when one is known and useful.
    pub(crate) fn reference_msg_loc(&self, msg: impl Into<String>, declared: Option<usize>) -> String {
        let msg = msg.into();
        let Some(pos) = declared else {
            return msg;
        };
        let section_id = self.src.section_id_at(pos);
        let section = self.src.section_name(section_id);
        let line = self.src.line_at(pos);
        if line == 0 || section.starts_with('_') {
            return msg;
        }
        if self.src.section_id() != section_id {
            format!("{}. See {} line {}", msg, section, line)
        } else if self.src.line() != line {
            format!("{}. See line {}", msg, line)
        } else {
            format!("{}. See the current line", msg)
        }
    }

    pub(crate) fn reference_msg_sym(&self, msg: impl Into<String>, sym: Symbol) -> String {
        self.reference_msg_loc(msg, self.sym.declared(sym))
    }

    // ==========================================================================
    // Token helpers
    // ==========================================================================

    pub(crate) fn expect(&mut self, expected: Symbol, actual: Symbol) -> Result<(), CompileError> {
        self.expect_one_of(&[expected], actual, None)
    }

    pub(crate) fn expect_msg(
        &mut self,
        expected: Symbol,
        actual: Symbol,
        custom_msg: &str,
    ) -> Result<(), CompileError> {
        self.expect_one_of(&[expected], actual, Some(custom_msg))
    }

    pub(crate) fn expect_one_of(
        &mut self,
        expected: &[Symbol],
        actual: Symbol,
        custom_msg: Option<&str>,
    ) -> Result<(), CompileError> {
        if expected.contains(&actual) {
            return Ok(());
        }
        let mut msg = match custom_msg {
            Some(m) => m.to_string(),
            None => {
                let mut m = String::from("Expected ");
                for (idx, sym) in expected.iter().enumerate() {
                    m.push_str(&format!("'{}'", self.sym.name(*sym)));
                    if idx + 2 < expected.len() {
                        m.push_str(", ");
                    } else if idx + 2 == expected.len() {
                        m.push_str(" or ");
                    }
                }
                m
            }
        };
        msg.push_str(&format!(", found '{}' instead", self.sym.name(actual)));
        Err(self.user_error(msg))
    }

    /// Advance the cursor, skipping balanced delimiter groups, until a
    /// symbol from `stoplist` or an unmatched closing delimiter is next.
    pub(crate) fn skip_to_in(&mut self, stoplist: &[Symbol], w: SrcWindow) {
        let mut depth = 0usize;
        while !self.src.reached_end(w) {
            let next = self.src.peek_next_in(w);
            match next {
                kw::OPEN_BRACE | kw::OPEN_BRACKET | kw::OPEN_PAREN => depth += 1,
                kw::CLOSE_BRACE | kw::CLOSE_BRACKET | kw::CLOSE_PAREN => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                _ => {
                    if depth == 0 && stoplist.contains(&next) {
                        return;
                    }
                }
            }
            self.src.get_next();
        }
    }

    pub(crate) fn skip_to(&mut self, stoplist: &[Symbol]) {
        let w = self.src.full_window();
        self.skip_to_in(stoplist, w);
    }

    /// Walk balanced delimiters to the matching close of the group the
    /// cursor is in and consume it; it must be `closer`.
    pub(crate) fn skip_to_close(&mut self, closer: Symbol) -> Result<(), CompileError> {
        self.skip_to(&[]);
        if closer != self.src.get_next() {
            return Err(self.internal_error("Unexpected closing symbol"));
        }
        Ok(())
    }

    /// Read an identifier, optionally qualified as `Struct::name`.
    /// Returns `(struct name or NONE, possibly mangled var name)`.
    pub(crate) fn parse_varname_ex(
        &mut self,
        accept_member_access: bool,
    ) -> Result<(Symbol, Symbol), CompileError> {
        let varname = self.src.get_next();
        if varname <= kw::LAST_PREDEFINED {
            return Err(self.user_error(format!(
                "Expected an identifier, found '{}' instead",
                self.sym.name(varname)
            )));
        }

        if kw::SCOPE_RES != self.src.peek_next() {
            return Ok((Symbol::NONE, varname));
        }

        self.src.get_next(); // Eat '::'
        if !accept_member_access {
            return Err(self.user_error("May not use '::' here"));
        }

        let structname = varname;
        let unqualified = self.src.get_next();
        if self.sym.is_vartype(structname) {
            let qualified = self.sym.find_component_in_struct(structname, unqualified);
            if Symbol::NONE == qualified {
                return Err(self.user_error(self.reference_msg_sym(
                    format!(
                        "'{}' isn't a component of '{}'",
                        self.sym.name(unqualified),
                        self.sym.name(structname)
                    ),
                    structname,
                )));
            }
            Ok((structname, qualified))
        } else {
            // Legal for struct component functions that are defined before
            // their struct is.
            let mangled = self.mangle_struct_and_component(structname, unqualified);
            Ok((structname, mangled))
        }
    }

    pub(crate) fn parse_varname(&mut self) -> Result<Symbol, CompileError> {
        let (_, varname) = self.parse_varname_ex(false)?;
        Ok(varname)
    }

    pub(crate) fn mangle_struct_and_component(
        &mut self,
        strct: Symbol,
        component: Symbol,
    ) -> Symbol {
        let name = format!("{}::{}", self.sym.name(strct), self.sym.name(component));
        self.sym.find_or_add(&name)
    }

    // ==========================================================================
    // Register bookkeeping
    // ==========================================================================

    pub(crate) fn set_reg(&mut self, reg: Register) {
        self.reg_track.set_register(reg, self.scrip.len());
    }

    pub(crate) fn set_all_regs(&mut self) {
        self.reg_track.set_all_registers(self.scrip.len());
    }

    pub(crate) fn push_reg(&mut self, reg: Register) {
        self.scrip.push_reg(reg);
    }

    pub(crate) fn pop_reg(&mut self, reg: Register) {
        self.scrip.pop_reg(reg);
        self.set_reg(reg);
    }

    /// Scoped register preservation. The block is evaluated tentatively;
    /// when it clobbers any guarded register, the emission is rolled back
    /// and redone between matching pushes and pops. The block must be
    /// re-runnable from the same source cursor.
    pub(crate) fn register_guard<F>(
        &mut self,
        guarded: &[Register],
        mut block: F,
    ) -> Result<(), CompileError>
    where
        F: FnMut(&mut Self) -> Result<(), CompileError>,
    {
        let rp = RestorePoint::new(self.scrip);
        let codesize_at_start = rp.code_location();
        let cursor_at_start = self.src.get_cursor();

        let set_points: Vec<(Register, CodeLoc)> = guarded
            .iter()
            .map(|&reg| (reg, self.reg_track.get_register(reg)))
            .collect();

        // Tentatively evaluate the block to find out what it clobbers.
        block(self)?;

        let pushes: Vec<(Register, CodeLoc)> = set_points
            .into_iter()
            .filter(|&(reg, _)| !self.reg_track.is_valid(reg, codesize_at_start))
            .collect();
        if pushes.is_empty() {
            return Ok(());
        }

        // Some guarded registers were clobbered. The code cannot simply be
        // shifted behind inserted pushes: the pushes alter the stack depth
        // the code may rely on. Re-run the block instead.
        rp.restore(self.scrip);
        for &(reg, set_point) in &pushes {
            self.scrip.push_reg(reg);
            self.reg_track.set_register(reg, set_point);
        }
        self.src.set_cursor(cursor_at_start);
        block(self)?;
        for &(reg, set_point) in pushes.iter().rev() {
            self.scrip.pop_reg(reg);
            // Popping restores the very value that was pushed, so the old
            // set point becomes valid again.
            self.reg_track.set_register(reg, set_point);
        }
        Ok(())
    }

    // ==========================================================================
    // Final checks
    // ==========================================================================

    fn check_for_unresolved_funcs(&mut self) -> Result<(), CompileError> {
        for mgr in [&self.fcm, &self.fim] {
            if let Some((func, in_source)) = mgr.first_unresolved() {
                self.src.set_cursor(in_source);
                return Err(self.user_error(self.reference_msg_sym(
                    format!(
                        "The called function '{}()' isn't defined with body nor imported",
                        self.sym.name(func)
                    ),
                    func,
                )));
            }
        }
        Ok(())
    }

    fn check_for_unresolved_struct_forward_decls(&mut self) -> Result<(), CompileError> {
        let refs: Vec<(Symbol, usize)> = self.struct_refs.iter().map(|(&s, &p)| (s, p)).collect();
        for (stname, src_location) in refs {
            if self.sym.is_undefined_vartype(stname) {
                self.src.set_cursor(src_location);
                return Err(self.user_error(self.reference_msg_sym(
                    format!(
                        "Struct '{}' is used but never completely defined",
                        self.sym.name(stname)
                    ),
                    stname,
                )));
            }
        }
        Ok(())
    }

    fn export_all_functions(&mut self) {
        for idx in 0..self.scrip.functions.len() {
            let func = self.scrip.functions[idx].clone();
            self.scrip.add_export(
                &func.name,
                func.code_offset as crate::bytecode::CodeCell,
                Some(func.num_params as u32),
            );
        }
    }

    /// Imports that were never accessed get their name slot blanked. The
    /// entries themselves must stay: fixups refer to them by index.
    fn blank_out_unused_imports(&mut self) {
        for idx in 0..self.sym.len() {
            let sym = Symbol(idx as u32);
            let entry = self.sym.entry(sym);
            if entry.accessed {
                continue;
            }
            if let Some(func) = entry.function.as_ref() {
                if func.qualifiers.contains(TypeQualifiers::IMPORT) {
                    let import_idx = func.offset as usize;
                    if import_idx < self.scrip.imports.len() {
                        self.scrip.imports[import_idx].clear();
                    }
                }
                continue;
            }
            if let Some(var) = entry.variable.as_ref() {
                // Attributes are shorthand for their getter/setter funcs;
                // those are pruned like any other function.
                if var.qualifiers.contains(TypeQualifiers::IMPORT)
                    && !var.qualifiers.contains(TypeQualifiers::ATTRIBUTE)
                {
                    let import_idx = var.offset;
                    if import_idx < self.scrip.imports.len() {
                        self.scrip.imports[import_idx].clear();
                    }
                }
            }
        }
    }

    fn check_fixup_sanity(&mut self) -> Result<(), CompileError> {
        for fixup_idx in 0..self.scrip.fixups.len() {
            let fixup = self.scrip.fixups[fixup_idx];
            if FixupType::Import != fixup.kind {
                continue;
            }
            if fixup.code_index >= self.scrip.len() {
                return Err(self.internal_error(format!(
                    "Fixup #{} references non-existent code offset #{}",
                    fixup_idx, fixup.code_index
                )));
            }
            let import_idx = self.scrip.code[fixup.code_index];
            let import = (import_idx >= 0)
                .then(|| self.scrip.imports.get(import_idx as usize))
                .flatten();
            match import {
                Some(name) if !name.is_empty() => {}
                _ => {
                    return Err(self.internal_error(format!(
                        "Fixup #{} references non-existent import #{}",
                        fixup_idx, import_idx
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Keyword spelling of the lowest set qualifier bit, for diagnostics.
fn qualifier_name(tqs: TypeQualifiers) -> &'static str {
    for (bit, name) in [
        (TypeQualifiers::ATTRIBUTE, "attribute"),
        (TypeQualifiers::AUTOPTR, "autoptr"),
        (TypeQualifiers::BUILTIN, "builtin"),
        (TypeQualifiers::CONST, "const"),
        (TypeQualifiers::IMPORT, "import"),
        (TypeQualifiers::MANAGED, "managed"),
        (TypeQualifiers::PROTECTED, "protected"),
        (TypeQualifiers::READONLY, "readonly"),
        (TypeQualifiers::STATIC, "static"),
        (TypeQualifiers::STRINGSTRUCT, "internalstring"),
        (TypeQualifiers::WRITEPROTECTED, "writeprotected"),
    ] {
        if tqs.contains(bit) {
            return name;
        }
    }
    ""
}
