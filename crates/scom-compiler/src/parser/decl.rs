//! Declaration parsing: enums, structs (with inheritance, attributes and
//! extenders), variables of all scope types, and function signatures.
//!
//! During the pre-analyse pass most declarations only leave their mark in
//! the symbol table (function headers, global-vs-import intent) and skip
//! their details; the main pass does the real work.

use scom_core::{
    CompileError, Options, ScopeType, TypeQualifiers, VartypeFlags, MAX_FUNCTION_PARAMETERS,
    SIZE_OF_INT, SIZE_OF_STACK_CELL, STRINGBUFFER_LENGTH, STRUCT_ALIGNTO,
};

use crate::bytecode::{CodeCell, Opcode, Register};
use crate::nesting::NestingType;
use crate::symtable::{
    kw, FuncParam, Symbol, VartypeShape, FT_IMPORT, FT_LOCAL_BODY, FT_PURE_FORWARD,
    PARAMETER_SCOPE,
};

use super::expr::{write_cmd_for_size, ValueLocation};
use super::{Parser, Phase};

impl<'a> Parser<'a> {
    // ==========================================================================
    // Vartype modifiers in declarations
    // ==========================================================================

    /// Managed vartypes are always used through a pointer.
    pub(crate) fn set_dynpointer_in_managed_vartype(&mut self, vartype: &mut Symbol) {
        if self.sym.is_managed_vartype(*vartype) {
            *vartype = self.sym.vartype_with(VartypeShape::Dynpointer, *vartype);
        }
    }

    /// Eat an optional `*`; only legal on managed types.
    pub(crate) fn eat_dynpointer_symbol_if_present(
        &mut self,
        vartype: Symbol,
    ) -> Result<(), CompileError> {
        if kw::DYNPOINTER != self.src.peek_next() {
            return Ok(());
        }
        if Phase::PreAnalyze == self.phase || self.sym.is_managed_vartype(vartype) {
            self.src.get_next(); // Eat '*'
            return Ok(());
        }
        Err(self.user_error(format!(
            "Cannot use '*' on the non-managed type '{}'",
            self.sym.name(vartype)
        )))
    }

    /// Eat a `[]` marker, turning the vartype into a dynarray.
    pub(crate) fn parse_dynarray_marker_if_present(
        &mut self,
        vartype: &mut Symbol,
    ) -> Result<(), CompileError> {
        if kw::OPEN_BRACKET != self.src.peek_next() {
            return Ok(());
        }
        self.src.get_next(); // Eat '['
        let next = self.src.get_next();
        self.expect(kw::CLOSE_BRACKET, next)?;
        *vartype = self.sym.vartype_with(VartypeShape::Dynarray, *vartype);
        Ok(())
    }

    // ==========================================================================
    // Enums
    // ==========================================================================

    fn parse_enum_assigned_value(&mut self, vname: Symbol) -> Result<CodeCell, CompileError> {
        self.src.get_next(); // Eat '='
        let msg = format!("In the assignment to {}: ", self.sym.name(vname));
        let lit = self.parse_constant_expression(&msg)?;
        Ok(self.sym.literal_value(lit))
    }

    fn parse_enum_item_to_symtable(
        &mut self,
        enum_name: Symbol,
        item_name: Symbol,
        value: CodeCell,
    ) {
        let value_sym = self.sym.find_or_add_int_literal(value);

        self.sym.make_entry_constant(item_name);
        {
            let entry = self.sym.entry_mut(item_name);
            entry.constant = Some(crate::symtable::ConstantData { value_sym });
            entry.scope = 0;
        }

        // C-style enums: the qualified name of an item equals the item.
        self.sym
            .entry_mut(enum_name)
            .vartype
            .as_mut()
            .expect("enum vartype role")
            .components
            .insert(item_name, item_name);

        let cursor = self.src.get_cursor();
        self.sym.set_declared(item_name, cursor);
    }

    fn parse_enum_name_to_symtable(&mut self, enum_name: Symbol) -> Result<(), CompileError> {
        if self.sym.is_predefined(enum_name) {
            return Err(self.user_error(format!(
                "Expected an identifier, found the predefined symbol '{}' instead",
                self.sym.name(enum_name)
            )));
        }
        if self.sym.is_function(enum_name) || self.sym.is_vartype(enum_name) {
            let declared = self.sym.declared(enum_name);
            return Err(self.user_error(self.reference_msg_loc(
                format!("'{}' is already defined", self.sym.name(enum_name)),
                declared,
            )));
        }
        self.sym.make_entry_vartype(enum_name);
        let data = self.sym.entry_mut(enum_name).vartype.as_mut().expect("just made");
        data.size = SIZE_OF_INT;
        data.base_vartype = kw::INT;
        data.flags |= VartypeFlags::ENUM;
        Ok(())
    }

    /// `enum E { a, b = expr, ... } [decl];`
    pub(crate) fn parse_enum(
        &mut self,
        tqs: TypeQualifiers,
        struct_of_current_func: &mut Symbol,
        name_of_current_func: &mut Symbol,
    ) -> Result<(), CompileError> {
        let start_of_enum_decl = self.src.get_cursor();
        if Symbol::NONE != *name_of_current_func {
            return Err(self.user_error("Cannot define an enum type within a function"));
        }
        if tqs.contains(TypeQualifiers::BUILTIN) {
            return Err(self.user_error("Can only use 'builtin' when declaring a struct"));
        }

        let enum_name = self.src.get_next();
        self.parse_enum_name_to_symtable(enum_name)?;

        let next = self.src.get_next();
        self.expect(kw::OPEN_BRACE, next)?;

        let mut current_constant_value: CodeCell = 0;

        loop {
            let item_name = self.src.get_next();
            if kw::CLOSE_BRACE == item_name {
                break; // Empty list, or a trailing ','
            }

            if Phase::Main == self.phase {
                if self.sym.is_constant(item_name) {
                    return Err(self.user_error(self.reference_msg_sym(
                        format!(
                            "'{}' is already defined as a constant or enum value",
                            self.sym.name(item_name)
                        ),
                        item_name,
                    )));
                }
                if self.sym.is_predefined(item_name)
                    || self.sym.is_variable(item_name)
                    || self.sym.is_function(item_name)
                {
                    return Err(self.user_error(format!(
                        "Expected '}}' or an unused identifier, found '{}' instead",
                        self.sym.name(item_name)
                    )));
                }
            }

            let punctuation = self.src.peek_next();
            self.expect_one_of(&[kw::COMMA, kw::ASSIGN, kw::CLOSE_BRACE], punctuation, None)?;

            if kw::ASSIGN == punctuation {
                current_constant_value = self.parse_enum_assigned_value(item_name)?;
            } else {
                if CodeCell::MAX == current_constant_value {
                    return Err(self.user_error(format!(
                        "Cannot assign an enum value higher than {} to {}",
                        CodeCell::MAX,
                        self.sym.name(item_name)
                    )));
                }
                current_constant_value += 1;
            }

            self.parse_enum_item_to_symtable(enum_name, item_name, current_constant_value);

            let comma_or_brace = self.src.get_next();
            self.expect_one_of(&[kw::COMMA, kw::CLOSE_BRACE], comma_or_brace, None)?;
            if kw::COMMA == comma_or_brace {
                continue;
            }
            break;
        }

        let nextsym = self.src.peek_next();
        if kw::SEMICOLON == nextsym {
            self.src.get_next(); // Eat ';'
            if tqs.contains(TypeQualifiers::READONLY) {
                // Only now is it known that no declaration follows, so
                // 'readonly' was wrong. Back up for the error message.
                self.src.set_cursor(start_of_enum_decl);
                return Err(
                    self.user_error("Can only use 'readonly' when declaring a variable or attribute")
                );
            }
            return Ok(());
        }

        if self.src.reached_eof() {
            return Err(self.user_error("Unexpected end of input (did you forget a ';'?)"));
        }
        if !(self.sym.is_identifier(nextsym) && !self.sym.is_vartype(nextsym))
            && kw::DYNPOINTER != nextsym
            && kw::NOLOOPCHECK != nextsym
            && kw::OPEN_BRACKET != nextsym
        {
            return Err(self.user_error(format!(
                "Unexpected '{}' (did you forget a ';'?)",
                self.sym.name(nextsym)
            )));
        }

        // The enum that was just defined is the vartype of a declaration.
        self.parse_vartype_clause(enum_name, tqs, struct_of_current_func, name_of_current_func)
    }

    // ==========================================================================
    // Structs
    // ==========================================================================

    fn parse_struct_check_forward_decls(
        &mut self,
        stname: Symbol,
        tqs: TypeQualifiers,
    ) -> Result<(), CompileError> {
        if !self.sym.is_vartype(stname) {
            return Ok(());
        }
        let flags = self
            .sym
            .entry(stname)
            .vartype
            .as_ref()
            .map(|d| d.flags)
            .unwrap_or_default();

        for (flag, bit, name) in [
            (VartypeFlags::AUTOPTR, TypeQualifiers::AUTOPTR, "autoptr"),
            (VartypeFlags::BUILTIN, TypeQualifiers::BUILTIN, "builtin"),
        ] {
            if flags.contains(flag) != tqs.contains(bit) {
                let msg = if tqs.contains(bit) {
                    format!(
                        "Struct '{}' is '{}' here, not '{}' in a declaration elsewhere",
                        self.sym.name(stname),
                        name,
                        name
                    )
                } else {
                    format!(
                        "Struct '{}' is not '{}' here, '{}' in a declaration elsewhere",
                        self.sym.name(stname),
                        name,
                        name
                    )
                };
                return Err(self.user_error(self.reference_msg_sym(msg, stname)));
            }
        }
        if !tqs.contains(TypeQualifiers::MANAGED) {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "The struct '{}' has been forward-declared, so it must be 'managed'",
                    self.sym.name(stname)
                ),
                stname,
            )));
        }
        Ok(())
    }

    fn parse_struct_set_type_in_symtable(&mut self, stname: Symbol, tqs: TypeQualifiers) {
        self.sym.make_entry_vartype(stname);
        let cursor = self.src.get_cursor();
        self.sym.set_declared(stname, cursor);

        let data = self.sym.entry_mut(stname).vartype.as_mut().expect("just made");
        data.parent = Symbol::NONE;
        data.size = 0;
        data.shape = VartypeShape::Atomic;
        // Not completely defined yet.
        data.flags = VartypeFlags::UNDEFINED | VartypeFlags::STRUCT;
        if tqs.contains(TypeQualifiers::MANAGED) {
            data.flags |= VartypeFlags::MANAGED;
        }
        if tqs.contains(TypeQualifiers::BUILTIN) {
            data.flags |= VartypeFlags::BUILTIN;
        }
        if tqs.contains(TypeQualifiers::AUTOPTR) {
            data.flags |= VartypeFlags::AUTOPTR;
        }
    }

    fn parse_struct_extends_clause(&mut self, stname: Symbol) -> Result<(), CompileError> {
        self.src.get_next(); // Eat 'extends'
        let parent = self.src.get_next();

        if Phase::PreAnalyze == self.phase {
            return Ok(()); // Nothing more to do in the first phase
        }

        if !self.sym.is_struct_vartype(parent) {
            return Err(self.user_error(self.reference_msg_sym(
                format!("Expected a struct type, found '{}' instead", self.sym.name(parent)),
                parent,
            )));
        }
        if !self.sym.is_managed_vartype(parent) && self.sym.is_managed_vartype(stname) {
            return Err(self.user_error(format!(
                "Managed struct cannot extend the unmanaged struct '{}'",
                self.sym.name(parent)
            )));
        }
        if self.sym.is_managed_vartype(parent) && !self.sym.is_managed_vartype(stname) {
            return Err(self.user_error(format!(
                "Unmanaged struct cannot extend the managed struct '{}'",
                self.sym.name(parent)
            )));
        }
        if self.sym.is_builtin_vartype(parent) && !self.sym.is_builtin_vartype(stname) {
            return Err(self.user_error(format!(
                "The built-in type '{}' cannot be extended by a concrete struct. Use extender methods instead",
                self.sym.name(parent)
            )));
        }
        let parent_size = self.sym.get_size(parent);
        let data = self.sym.entry_mut(stname).vartype.as_mut().expect("struct role");
        data.size = parent_size;
        data.parent = parent;
        Ok(())
    }

    fn parse_struct_check_component_vartype(
        &mut self,
        stname: Symbol,
        vartype: Symbol,
    ) -> Result<(), CompileError> {
        if vartype == stname && !self.sym.is_managed_vartype(vartype) {
            // "struct A { A value; }" would be infinitely large.
            return Err(self.user_error(format!(
                "Struct '{}' cannot be a member of itself",
                self.sym.name(vartype)
            )));
        }
        if !self.sym.is_vartype(vartype) {
            return Err(self.user_error(self.reference_msg_sym(
                format!("Expected a type, found '{}' instead", self.sym.name(vartype)),
                vartype,
            )));
        }
        Ok(())
    }

    fn parse_struct_funcdecl(
        &mut self,
        struct_of_func: Symbol,
        name_of_func: Symbol,
        tqs: TypeQualifiers,
        vartype: Symbol,
    ) -> Result<(), CompileError> {
        if tqs.contains(TypeQualifiers::WRITEPROTECTED) {
            return Err(self.user_error("Cannot apply 'writeprotected' to this function declaration"));
        }

        let declaration_start = self.src.get_cursor();
        self.src.get_next(); // Eat '('

        let _body_follows = self.parse_funcdecl(
            declaration_start,
            tqs,
            vartype,
            struct_of_func,
            name_of_func,
            false,
        )?;

        // A body can't follow here, so the next symbol must be ';'.
        let next = self.src.peek_next();
        self.expect(kw::SEMICOLON, next)
    }

    fn parse_struct_attribute_check_func(
        &mut self,
        name_of_func: Symbol,
        is_setter: bool,
        is_indexed: bool,
        vartype: Symbol,
    ) -> Result<(), CompileError> {
        let num_parameters_wanted = (is_indexed as usize) + (is_setter as usize);
        if num_parameters_wanted != self.sym.num_func_params(name_of_func) {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "The attribute function '{}' should have {} parameter(s) but is declared with {} parameter(s) instead",
                    self.sym.name(name_of_func),
                    num_parameters_wanted,
                    self.sym.num_func_params(name_of_func)
                ),
                name_of_func,
            )));
        }

        let ret_vartype = if is_setter { kw::VOID } else { vartype };
        if ret_vartype != self.sym.func_return_vartype(name_of_func) {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "The attribute function '{}' must return type '{}' but returns '{}' instead",
                    self.sym.name(name_of_func),
                    self.sym.name(ret_vartype),
                    self.sym.name(self.sym.func_return_vartype(name_of_func))
                ),
                name_of_func,
            )));
        }

        let param_vartype_at = |parser: &Self, idx: usize| {
            parser
                .sym
                .entry(name_of_func)
                .function
                .as_ref()
                .and_then(|f| f.parameters.get(idx))
                .map(|p| p.vartype)
                .unwrap_or(Symbol::NONE)
        };

        let mut p_idx = 1;
        if is_indexed {
            let actual = param_vartype_at(self, p_idx);
            if kw::INT != actual {
                return Err(self.user_error(self.reference_msg_sym(
                    format!(
                        "Parameter #{} of attribute function '{}' must have type 'int' but has type '{}' instead",
                        p_idx,
                        self.sym.name(name_of_func),
                        self.sym.name(actual)
                    ),
                    name_of_func,
                )));
            }
            p_idx += 1;
        }

        if !is_setter {
            return Ok(());
        }

        let actual = param_vartype_at(self, p_idx);
        if vartype != actual {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "Parameter #{} of attribute function '{}' must have type '{}' but has type '{}' instead",
                    p_idx,
                    self.sym.name(name_of_func),
                    self.sym.name(vartype),
                    self.sym.name(actual)
                ),
                name_of_func,
            )));
        }
        Ok(())
    }

    /// Declare one of the two access functions an attribute expands to.
    fn parse_struct_attribute_declare_func(
        &mut self,
        mut tqs: TypeQualifiers,
        strct: Symbol,
        qualified_name: Symbol,
        unqualified_name: Symbol,
        is_setter: bool,
        is_indexed: bool,
        vartype: Symbol,
    ) -> Result<(), CompileError> {
        if self.sym.is_in_use(qualified_name) && !self.sym.is_function(qualified_name) {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "Attribute uses '{}' as a function, this clashes with a declaration elsewhere",
                    self.sym.name(qualified_name)
                ),
                qualified_name,
            )));
        }
        if self.sym.is_function(qualified_name) {
            self.parse_struct_attribute_check_func(qualified_name, is_setter, is_indexed, vartype)?;
        }

        // Attribute functions are assumed to be imported, unless a local
        // body was (legally) provided.
        tqs |= TypeQualifiers::IMPORT;
        let known_is_local_func = self.sym.is_function(qualified_name)
            && !self
                .sym
                .entry(qualified_name)
                .function
                .as_ref()
                .map(|f| f.qualifiers.contains(TypeQualifiers::IMPORT))
                .unwrap_or(false);
        if known_is_local_func {
            if self.options.contains(Options::NO_IMPORT_OVERRIDE) {
                return Err(self.user_error(self.reference_msg_sym(
                    "In here, attribute functions may not be defined locally",
                    qualified_name,
                )));
            }
            tqs.remove(TypeQualifiers::IMPORT);
        }

        // The function counts as declared within the struct declaration.
        self.sym.make_entry_component(qualified_name);
        {
            let comp = self
                .sym
                .entry_mut(qualified_name)
                .component
                .as_mut()
                .expect("just made");
            comp.parent = strct;
            comp.component = unqualified_name;
            comp.is_function = true;
        }
        self.sym
            .entry_mut(strct)
            .vartype
            .as_mut()
            .expect("struct role")
            .components
            .insert(unqualified_name, qualified_name);

        let return_vartype = if is_setter { kw::VOID } else { vartype };
        self.parse_funcdecl_master_data_to_sym(tqs, return_vartype, strct, qualified_name, false);

        // The fixed parameter shape of attribute accessors.
        {
            let data = self
                .sym
                .entry_mut(qualified_name)
                .function
                .as_mut()
                .expect("just made");
            if is_indexed {
                data.parameters.push(FuncParam {
                    name: Symbol::NONE,
                    vartype: kw::INT,
                    default: Symbol::NONE,
                });
            }
            if is_setter {
                data.parameters.push(FuncParam {
                    name: Symbol::NONE,
                    vartype,
                    default: Symbol::NONE,
                });
            }
        }

        self.parse_funcdecl_handle_function_or_import_index(tqs, strct, qualified_name, false)
    }

    /// Expand an attribute declaration into its getter (and, unless
    /// readonly, its setter).
    fn parse_struct_attribute(
        &mut self,
        mut tqs: TypeQualifiers,
        stname: Symbol,
        vartype: Symbol,
        vname: Symbol,
        attrib_is_indexed: bool,
        declaration_start: usize,
    ) -> Result<(), CompileError> {
        // 'readonly' suppresses the setter; the vartypes themselves are
        // not readonly.
        let attrib_is_readonly = tqs.contains(TypeQualifiers::READONLY);
        tqs.remove(TypeQualifiers::ATTRIBUTE);
        tqs.remove(TypeQualifiers::READONLY);

        if Phase::Main == self.phase && attrib_is_indexed {
            let dynarray = self.sym.vartype_with(VartypeShape::Dynarray, vartype);
            self.sym
                .entry_mut(vname)
                .variable
                .as_mut()
                .expect("attribute variable role")
                .vartype = dynarray;
        }

        // Getter, e.g. get_ATTRIB().
        let unqualified_get = self.construct_attribute_func_name(vname, false, attrib_is_indexed);
        let get_func = self.mangle_struct_and_component(stname, unqualified_get);
        self.parse_struct_attribute_declare_func(
            tqs,
            stname,
            get_func,
            unqualified_get,
            false,
            attrib_is_indexed,
            vartype,
        )?;
        self.sym.set_declared(get_func, declaration_start);

        if attrib_is_readonly {
            return Ok(());
        }

        // Setter, e.g. set_ATTRIB(value).
        let unqualified_set = self.construct_attribute_func_name(vname, true, attrib_is_indexed);
        let set_func = self.mangle_struct_and_component(stname, unqualified_set);
        self.parse_struct_attribute_declare_func(
            tqs,
            stname,
            set_func,
            unqualified_set,
            true,
            attrib_is_indexed,
            vartype,
        )?;
        self.sym.set_declared(set_func, declaration_start);
        Ok(())
    }

    /// Parse `[dim, dim][dim]...` after a variable name.
    fn parse_array(&mut self, vname: Symbol, vartype: &mut Symbol) -> Result<(), CompileError> {
        self.src.get_next(); // Eat '['

        if Phase::PreAnalyze == self.phase {
            // Skip the whole sequence of "[...]".
            loop {
                self.skip_to_close(kw::CLOSE_BRACKET)?;
                if kw::OPEN_BRACKET != self.src.peek_next() {
                    return Ok(());
                }
                self.src.get_next(); // Eat '['
            }
        }

        if kw::CLOSE_BRACKET == self.src.peek_next() {
            // Dynamic array.
            self.src.get_next(); // Eat ']'
            if kw::STRING == *vartype {
                return Err(self.user_error("Dynamic arrays of old-style strings are not supported"));
            }
            if !self.sym.is_any_integer_vartype(*vartype)
                && !self.sym.is_managed_vartype(*vartype)
                && kw::FLOAT != *vartype
            {
                return Err(self.user_error(format!(
                    "Can only have dynamic arrays of integer types, 'float', or managed structs. '{}' isn't any of this",
                    self.sym.name(*vartype)
                )));
            }
            *vartype = self.sym.vartype_with(VartypeShape::Dynarray, *vartype);
            return Ok(());
        }

        let mut dims: Vec<usize> = Vec::new();

        // Static array.
        loop {
            let msg = format!(
                "For dimension #{} of array '{}': ",
                dims.len(),
                self.sym.name(vname)
            );
            let first_sym = self.src.peek_next();

            let index_expr = self.parse_integer_expression()?;
            let ValueLocation::CompileTimeLiteral(lit) = index_expr.vloc else {
                return Err(self.user_error(format!(
                    "{}Cannot evaluate the expression starting with '{}' at compile time",
                    msg,
                    self.sym.name(first_sym)
                )));
            };

            let dimension_as_int = self.sym.literal_value(lit);
            if dimension_as_int < 1 {
                return Err(self.user_error(format!(
                    "Array dimension #{} of array '{}' must be at least 1 but is {} instead",
                    dims.len(),
                    self.sym.name(vname),
                    dimension_as_int
                )));
            }
            dims.push(dimension_as_int as usize);

            let punctuation = self.src.get_next();
            self.expect_one_of(&[kw::COMMA, kw::CLOSE_BRACKET], punctuation, None)?;
            if kw::COMMA == punctuation {
                continue;
            }
            if kw::OPEN_BRACKET != self.src.peek_next() {
                break;
            }
            self.src.get_next(); // Eat '['
        }
        *vartype = self.sym.vartype_with_array(&dims, *vartype);
        Ok(())
    }

    fn parse_struct_variable_or_attribute_defn(
        &mut self,
        tqs: TypeQualifiers,
        vartype: Symbol,
        name_of_struct: Symbol,
        vname: Symbol,
    ) -> Result<(), CompileError> {
        if self.sym.is_dynarray_vartype(vartype) {
            // e.g. "int [] zonk;"
            return Err(self.user_error("Expected '('"));
        }
        if tqs.contains(TypeQualifiers::IMPORT) && !tqs.contains(TypeQualifiers::ATTRIBUTE) {
            return Err(self.user_error(
                "Cannot import struct component variables; import the whole struct instead",
            ));
        }

        if Phase::Main == self.phase {
            if self.sym.is_managed_vartype(vartype)
                && self.sym.is_managed_vartype(name_of_struct)
                && !tqs.contains(TypeQualifiers::ATTRIBUTE)
            {
                // An Engine restriction.
                return Err(self.user_error(
                    "Cannot currently have managed variable components in managed struct",
                ));
            }
            if self.sym.is_builtin_vartype(vartype) && !self.sym.is_managed_vartype(vartype) {
                return Err(self.user_error(format!(
                    "May not have a component variable of the non-managed built-in type '{}'",
                    self.sym.name(vartype)
                )));
            }

            if !tqs.contains(TypeQualifiers::ATTRIBUTE) {
                let struct_size = self
                    .sym
                    .entry(name_of_struct)
                    .vartype
                    .as_ref()
                    .map(|d| d.size)
                    .unwrap_or(0);
                self.sym
                    .entry_mut(vname)
                    .component
                    .as_mut()
                    .expect("component role")
                    .offset = struct_size;
            }

            self.sym.make_entry_variable(vname);
            let var = self.sym.entry_mut(vname).variable.as_mut().expect("just made");
            var.vartype = vartype;
            var.qualifiers = tqs;
            // autoptr/managed/builtin qualify the vartype, not the
            // variable having the vartype.
            var.qualifiers.remove(
                TypeQualifiers::AUTOPTR | TypeQualifiers::MANAGED | TypeQualifiers::BUILTIN,
            );
        }

        if tqs.contains(TypeQualifiers::ATTRIBUTE) {
            let is_indexed = kw::OPEN_BRACKET == self.src.peek_next();
            if is_indexed {
                self.src.get_next(); // Eat '['
                let next = self.src.get_next();
                self.expect(kw::CLOSE_BRACKET, next)?;
            }
            let declaration_start = self.src.get_cursor();
            return self.parse_struct_attribute(
                tqs,
                name_of_struct,
                vartype,
                vname,
                is_indexed,
                declaration_start,
            );
        }

        if Phase::Main != self.phase {
            self.skip_to(&[kw::COMMA, kw::SEMICOLON]);
            return Ok(());
        }

        if kw::OPEN_BRACKET == self.src.peek_next() {
            let mut array_vartype = self.sym.get_vartype(vname);
            self.parse_array(vname, &mut array_vartype)?;
            self.sym
                .entry_mut(vname)
                .variable
                .as_mut()
                .expect("variable role")
                .vartype = array_vartype;
        }

        let component_size = self.sym.get_size(vname);
        self.sym
            .entry_mut(name_of_struct)
            .vartype
            .as_mut()
            .expect("struct role")
            .size += component_size;
        Ok(())
    }

    fn parse_struct_constant_defn(
        &mut self,
        tqs: TypeQualifiers,
        vartype: Symbol,
        vname: Symbol,
    ) -> Result<(), CompileError> {
        if self.sym.is_dynarray_vartype(vartype) {
            return Err(self.user_error("Expected '('"));
        }
        if tqs.contains(TypeQualifiers::ATTRIBUTE) {
            return Err(self.user_error(
                "Cannot handle compile-time constant attributes (did you mean 'readonly' instead of 'const'?)",
            ));
        }
        if tqs.contains(TypeQualifiers::IMPORT) {
            return Err(self.user_error(
                "Cannot import a compile-time constant (did you mean 'readonly' instead of 'const'?)",
            ));
        }
        self.parse_constant_defn(tqs, vartype, vname)
    }

    fn parse_struct_member_defn(
        &mut self,
        name_of_struct: Symbol,
        tqs: TypeQualifiers,
        vartype: Symbol,
    ) -> Result<(), CompileError> {
        let declaration_start = self.src.get_cursor();

        let unqualified = self.parse_varname()?;
        let qualified = self.mangle_struct_and_component(name_of_struct, unqualified);

        let is_function = kw::OPEN_PAREN == self.src.peek_next();

        if Phase::Main == self.phase {
            if !is_function && self.sym.is_in_use(qualified) {
                return Err(self.user_error(self.reference_msg_sym(
                    format!("'{}' is already defined", self.sym.name(qualified)),
                    qualified,
                )));
            }

            // Mustn't exist in any ancestor either.
            let parent = self.sym.find_struct_of_component(name_of_struct, unqualified);
            if Symbol::NONE != parent {
                return Err(self.user_error(self.reference_msg_sym(
                    format!(
                        "The struct '{}' extends '{}', and '{}' is already defined",
                        self.sym.name(name_of_struct),
                        self.sym.name(parent),
                        self.sym.name(qualified)
                    ),
                    parent,
                )));
            }
        }

        self.sym.make_entry_component(qualified);
        {
            let comp = self.sym.entry_mut(qualified).component.as_mut().expect("just made");
            comp.component = unqualified;
            comp.parent = name_of_struct;
            comp.is_function = is_function;
        }
        self.sym
            .entry_mut(name_of_struct)
            .vartype
            .as_mut()
            .expect("struct role")
            .components
            .insert(unqualified, qualified);
        self.sym.set_declared(qualified, declaration_start);

        if is_function {
            return self.parse_struct_funcdecl(name_of_struct, qualified, tqs, vartype);
        }
        if tqs.contains(TypeQualifiers::CONST) && kw::STRING != vartype {
            return self.parse_struct_constant_defn(tqs, vartype, qualified);
        }
        self.parse_struct_variable_or_attribute_defn(tqs, vartype, name_of_struct, qualified)
    }

    fn parse_struct_vartype(
        &mut self,
        name_of_struct: Symbol,
        tqs: TypeQualifiers,
        mut vartype: Symbol,
    ) -> Result<(), CompileError> {
        if Phase::Main == self.phase {
            self.parse_struct_check_component_vartype(name_of_struct, vartype)?;
        }

        self.set_dynpointer_in_managed_vartype(&mut vartype);
        self.eat_dynpointer_symbol_if_present(vartype)?;

        // "int [] func(...)"
        self.parse_dynarray_marker_if_present(&mut vartype)?;

        if kw::NOLOOPCHECK == self.src.peek_next() {
            return Err(self.user_error("Cannot use 'noloopcheck' here"));
        }

        // Read the variables, or the one function, of this type.
        loop {
            self.parse_struct_member_defn(name_of_struct, tqs, vartype)?;

            let punctuation = self.src.get_next();
            self.expect_one_of(&[kw::COMMA, kw::SEMICOLON], punctuation, None)?;
            if kw::SEMICOLON == punctuation {
                return Ok(());
            }
        }
    }

    /// `struct S ...` — the keyword has been eaten.
    pub(crate) fn parse_struct(
        &mut self,
        tqs: TypeQualifiers,
        struct_of_current_func: &mut Symbol,
        name_of_current_func: &mut Symbol,
    ) -> Result<(), CompileError> {
        let start_of_struct_decl = self.src.get_cursor();

        let stname = self.src.get_next();

        let is_forward_decl = self.sym.is_vartype(stname) && self.sym.is_undefined_vartype(stname);
        if !is_forward_decl && self.sym.is_in_use(stname) {
            return Err(self.user_error(self.reference_msg_sym(
                format!("'{}' is already defined", self.sym.name(stname)),
                stname,
            )));
        }

        self.parse_struct_check_forward_decls(stname, tqs)?;

        if Symbol::NONE != *name_of_current_func {
            return Err(self.user_error("Cannot define a struct type within a function"));
        }

        self.parse_struct_set_type_in_symtable(stname, tqs);

        // The struct type that implements new strings.
        if tqs.contains(TypeQualifiers::STRINGSTRUCT) {
            let existing = self.sym.string_struct_sym();
            if existing != Symbol::NONE && stname != existing {
                return Err(self.user_error(format!(
                    "The stringstruct type is already defined to be {}",
                    self.sym.name(existing)
                )));
            }
            self.sym.set_string_struct_sym(stname);
        }

        if kw::EXTENDS == self.src.peek_next() {
            self.parse_struct_extends_clause(stname)?;
        }

        // Forward declaration.
        if kw::SEMICOLON == self.src.peek_next() {
            if !tqs.contains(TypeQualifiers::MANAGED) {
                return Err(self.user_error("Forward-declared 'struct's must be 'managed'"));
            }
            self.src.get_next(); // Eat ';'
            return Ok(());
        }

        let next = self.src.get_next();
        self.expect(kw::OPEN_BRACE, next)?;

        // Component declarations.
        while kw::CLOSE_BRACE != self.src.peek_next() {
            if self.src.reached_eof() {
                return Err(self.user_error("Unexpected end of input (did you forget a '}'?)"));
            }
            let member_tqs = self.parse_qualifiers()?;
            self.check_tq(member_tqs, false, true)?;
            let vartype = self.src.get_next();
            self.parse_struct_vartype(stname, member_tqs, vartype)?;
        }

        if Phase::Main == self.phase {
            // Round the size up to the alignment boundary.
            let data = self.sym.entry_mut(stname).vartype.as_mut().expect("struct role");
            if 0 != data.size % STRUCT_ALIGNTO {
                data.size += STRUCT_ALIGNTO - data.size % STRUCT_ALIGNTO;
            }
        }

        self.src.get_next(); // Eat '}'

        // The struct is now complete.
        self.sym
            .entry_mut(stname)
            .vartype
            .as_mut()
            .expect("struct role")
            .flags
            .remove(VartypeFlags::UNDEFINED);
        self.struct_refs.remove(&stname);

        let nextsym = self.src.peek_next();
        if kw::SEMICOLON == nextsym {
            if tqs.contains(TypeQualifiers::READONLY) {
                // No declaration follows after all, so 'readonly' was
                // wrong. Back up for the error message.
                self.src.set_cursor(start_of_struct_decl);
                return Err(self.user_error("'readonly' can only be used in a variable declaration"));
            }
            self.src.get_next(); // Eat ';'
            return Ok(());
        }

        if self.src.reached_eof() {
            return Err(self.user_error("Unexpected end of input (did you forget a ';'?)"));
        }
        if !(self.sym.is_identifier(nextsym) && !self.sym.is_vartype(nextsym))
            && kw::DYNPOINTER != nextsym
            && kw::NOLOOPCHECK != nextsym
            && kw::OPEN_BRACKET != nextsym
        {
            return Err(self.user_error(format!(
                "Unexpected '{}' (did you forget a ';'?)",
                self.sym.name(nextsym)
            )));
        }

        // The struct that was just defined is the vartype of a declaration.
        // The qualifiers that defined the type itself are used up.
        let mut vardecl_tqs = tqs;
        vardecl_tqs.remove(
            TypeQualifiers::AUTOPTR
                | TypeQualifiers::BUILTIN
                | TypeQualifiers::MANAGED
                | TypeQualifiers::STRINGSTRUCT,
        );
        self.parse_vartype_clause(stname, vardecl_tqs, struct_of_current_func, name_of_current_func)
    }

    // ==========================================================================
    // Constants
    // ==========================================================================

    fn parse_constant_defn(
        &mut self,
        tqs: TypeQualifiers,
        vartype: Symbol,
        vname: Symbol,
    ) -> Result<(), CompileError> {
        if tqs.contains(TypeQualifiers::READONLY) {
            return Err(self.user_error("Cannot use 'readonly' with compile-time constants"));
        }
        if kw::INT != vartype && kw::FLOAT != vartype {
            return Err(
                self.user_error("Can only handle compile-time constants of type 'int' or 'float'")
            );
        }
        if kw::OPEN_BRACKET == self.src.peek_next() {
            return Err(self.user_error(
                "Cannot handle arrays of compile-time constants (did you mean 'readonly' instead of 'const'?)",
            ));
        }

        if Phase::Main != self.phase {
            self.skip_to(&[kw::COMMA, kw::SEMICOLON]);
            return Ok(());
        }

        let next = self.src.get_next();
        self.expect(kw::ASSIGN, next)?;

        let lit = self.parse_constant_expression("")?;
        let lit_vartype = self.sym.literal_vartype(lit);
        self.check_vartype_mismatch(lit_vartype, vartype, true, "")?;

        self.sym.make_entry_constant(vname);
        self.sym.entry_mut(vname).constant = Some(crate::symtable::ConstantData { value_sym: lit });
        let cursor = self.src.get_cursor();
        self.sym.set_declared(vname, cursor);
        Ok(())
    }

    // ==========================================================================
    // Variable declarations
    // ==========================================================================

    fn parse_vardecl_check_illegal_combis(
        &mut self,
        vartype: Symbol,
        scope_type: ScopeType,
    ) -> Result<(), CompileError> {
        if kw::STRING == vartype && !self.options.contains(Options::OLD_STRINGS) {
            return Err(self.user_error(
                "Variables of type 'string' aren't supported any longer (use the type 'String' instead)",
            ));
        }
        if kw::STRING == vartype && ScopeType::Import == scope_type {
            // A string is really a char *; the pointer can't be resolved
            // by the linker.
            return Err(self.user_error("Cannot import a 'string' variable; use 'char[]' instead"));
        }
        if kw::VOID == vartype {
            return Err(self.user_error("'void' is not a valid type in this context"));
        }
        Ok(())
    }

    /// A prior (import) declaration exists: the new one must match.
    fn parse_vardecl_check_that_known_info_matches(
        &mut self,
        var_name: Symbol,
        known_function: bool,
        known_vartype_role: bool,
        known_variable: Option<(TypeQualifiers, Symbol)>,
        known_declared: Option<usize>,
    ) -> Result<(), CompileError> {
        if known_function {
            return Err(self.user_error(self.reference_msg_loc(
                format!(
                    "The name '{}' is declared as a function elsewhere, as a variable here",
                    self.sym.name(var_name)
                ),
                known_declared,
            )));
        }
        if known_vartype_role {
            return Err(self.user_error(self.reference_msg_loc(
                format!(
                    "The name '{}' is declared as a type elsewhere, as a variable here",
                    self.sym.name(var_name)
                ),
                known_declared,
            )));
        }
        let Some((known_tq_full, known_vartype)) = known_variable else {
            return Ok(()); // No known info
        };

        let this_entry = self.sym.entry(var_name).variable.as_ref().expect("variable role");
        let mut known_tq = known_tq_full;
        known_tq.remove(TypeQualifiers::IMPORT);
        let mut this_tq = this_entry.qualifiers;
        this_tq.remove(TypeQualifiers::IMPORT);
        if known_tq != this_tq {
            return Err(self.user_error(self.reference_msg_loc(
                format!(
                    "The variable '{}' has different qualifiers here than elsewhere",
                    self.sym.name(var_name)
                ),
                known_declared,
            )));
        }

        let this_vartype = this_entry.vartype;
        if known_vartype != this_vartype {
            // This catches differing array sizes as well: they make
            // different vartypes.
            return Err(self.user_error(self.reference_msg_loc(
                format!(
                    "This variable is declared as '{}' here, as '{}' elsewhere",
                    self.sym.name(this_vartype),
                    self.sym.name(known_vartype)
                ),
                known_declared,
            )));
        }
        Ok(())
    }

    fn parse_vardecl_var_to_symtable(
        &mut self,
        var_name: Symbol,
        vartype: Symbol,
        _scope_type: ScopeType,
    ) {
        self.sym.make_entry_variable(var_name);
        let top_level = self.nest.top_level();
        let entry = self.sym.entry_mut(var_name);
        entry.variable.as_mut().expect("just made").vartype = vartype;
        entry.scope = top_level;
        let cursor = self.src.get_cursor();
        self.sym.set_declared(var_name, cursor);
    }

    fn parse_vardecl_import(&mut self, var_name: Symbol) -> Result<(), CompileError> {
        if kw::ASSIGN == self.src.peek_next() {
            return Err(self.user_error("Imported variables cannot have any initial assignment"));
        }

        if self.givm.get(&var_name).copied().unwrap_or(false) {
            // Not really an import: the global non-import declaration wins.
            self.sym
                .entry_mut(var_name)
                .variable
                .as_mut()
                .expect("variable role")
                .qualifiers
                .remove(TypeQualifiers::IMPORT);
            return Ok(());
        }

        let import_offset = self.scrip.find_or_add_import(self.sym.name(var_name));
        let var = self
            .sym
            .entry_mut(var_name)
            .variable
            .as_mut()
            .expect("variable role");
        var.qualifiers |= TypeQualifiers::IMPORT;
        var.offset = import_offset;
        Ok(())
    }

    fn parse_vardecl_initial_val_int_or_float(
        &mut self,
        wanted_vartype: Symbol,
        initial_val: &mut [u8],
    ) -> Result<(), CompileError> {
        let expr = self.parse_expression_value()?;
        let ValueLocation::CompileTimeLiteral(lit) = expr.vloc else {
            return Err(self.user_error(
                "Cannot evaluate this expression at compile time, it cannot be used as initializer",
            ));
        };
        let litval = self.sym.literal_value(lit);

        if (kw::FLOAT == wanted_vartype) != (kw::FLOAT == expr.vartype) {
            return Err(self.user_error(format!(
                "Expected a '{}' value after '=' but found a '{}' value instead",
                self.sym.name(wanted_vartype),
                self.sym.name(expr.vartype)
            )));
        }

        let wanted_size = self.sym.get_size(wanted_vartype);
        match wanted_size {
            1 => initial_val[0] = litval as u8,
            2 => initial_val[..2].copy_from_slice(&(litval as i16).to_le_bytes()),
            4 => initial_val[..4].copy_from_slice(&litval.to_le_bytes()),
            _ => {
                return Err(self.user_error(format!(
                    "Cannot give an initial value to a variable of type '{}' here",
                    self.sym.name(wanted_vartype)
                )));
            }
        }
        Ok(())
    }

    fn parse_vardecl_initial_val_old_string(
        &mut self,
        initial_val: &mut [u8],
    ) -> Result<(), CompileError> {
        let mut string_lit = self.src.get_next();
        while self.sym.is_constant(string_lit) {
            string_lit = self
                .sym
                .entry(string_lit)
                .constant
                .map(|c| c.value_sym)
                .unwrap_or(Symbol::NONE);
        }

        let const_string = self.sym.vartype_with(VartypeShape::Const, kw::STRING);
        if !self.sym.is_literal(string_lit)
            || const_string != self.sym.literal_vartype(string_lit)
        {
            let found = self.src.peek_next();
            return Err(self.user_error(format!(
                "Expected a string literal after '=', found '{}' instead",
                self.sym.name(found)
            )));
        }

        // The scanner put the literal into the string pool; fetch it back.
        let offset = self.sym.literal_value(string_lit) as usize;
        let lit_value = self.scrip.string_at(offset).to_string();
        if lit_value.len() >= STRINGBUFFER_LENGTH {
            return Err(self.user_error(format!(
                "Initializer string is too long (max. chars allowed: {})",
                STRINGBUFFER_LENGTH - 1
            )));
        }

        initial_val[..lit_value.len()].copy_from_slice(lit_value.as_bytes());
        initial_val[lit_value.len()] = 0;
        Ok(())
    }

    fn parse_vardecl_initial_val(
        &mut self,
        varname: Symbol,
        initial_val: &mut [u8],
    ) -> Result<(), CompileError> {
        self.src.get_next(); // Eat '='

        let vartype = self.sym.get_vartype(varname);
        if self.sym.is_managed_vartype(vartype) {
            // Any value other than null would need a runtime computation.
            let next = self.src.get_next();
            return self.expect(kw::NULL, next);
        }

        if self.sym.is_struct_vartype(vartype) {
            return Err(self.user_error(format!(
                "'{}' is a struct and cannot be initialized here",
                self.sym.name(varname)
            )));
        }
        if self.sym.is_array_vartype(vartype) {
            return Err(self.user_error(format!(
                "'{}' is an array and cannot be initialized here",
                self.sym.name(varname)
            )));
        }

        if kw::STRING == vartype {
            return self.parse_vardecl_initial_val_old_string(initial_val);
        }
        if self.sym.is_any_integer_vartype(vartype) || kw::FLOAT == vartype {
            return self.parse_vardecl_initial_val_int_or_float(vartype, initial_val);
        }

        Err(self.user_error(format!(
            "Variable '{}' has type '{}' and cannot be initialized here",
            self.sym.name(varname),
            self.sym.name(vartype)
        )))
    }

    fn parse_vardecl_global(&mut self, var_name: Symbol, vartype: Symbol) -> Result<(), CompileError> {
        let vartype_size = self.sym.get_size(vartype);
        let mut initial_val = vec![0u8; vartype_size + 1];

        if kw::ASSIGN == self.src.peek_next() {
            self.parse_vardecl_initial_val(var_name, &mut initial_val)?;
        }

        let global_offset = self.scrip.add_global(vartype_size, Some(&initial_val));
        let var = self
            .sym
            .entry_mut(var_name)
            .variable
            .as_mut()
            .expect("variable role");
        var.vartype = vartype;
        var.offset = global_offset;
        Ok(())
    }

    fn parse_vardecl_local(&mut self, var_name: Symbol, vartype: Symbol) -> Result<(), CompileError> {
        if !self.nest.top().dead_end_warned
            && self.nest.top().jump_out_level < self.nest.top_level()
        {
            self.warn("Code execution cannot reach this point");
            self.nest.top_mut().dead_end_warned = true;
        }

        let var_size = self.sym.get_size(vartype);
        let is_dyn = self.sym.is_dyn_vartype(vartype);

        let offset = self.scrip.offset_to_local_var_block;
        self.sym
            .entry_mut(var_name)
            .variable
            .as_mut()
            .expect("variable role")
            .offset = offset;

        if kw::ASSIGN != self.src.peek_next() {
            if 0 == var_size {
                return Ok(());
            }

            // Zero-initialise the variable.
            if SIZE_OF_INT == var_size && !is_dyn {
                self.scrip.write_cmd2(Opcode::LitToReg, Register::Ax.cell(), 0);
                self.set_reg(Register::Ax);
                self.push_reg(Register::Ax);
                return Ok(());
            }

            self.scrip.write_cmd1(Opcode::LoadSpOffs, 0);
            self.set_reg(Register::Mar);
            if is_dyn {
                self.scrip.write_cmd(Opcode::MemZeroPtr);
            } else {
                self.scrip
                    .write_cmd1(Opcode::ZeroMemory, var_size as CodeCell);
            }
            self.scrip
                .write_cmd2(Opcode::Add, Register::Sp.cell(), var_size as CodeCell);
            self.scrip.offset_to_local_var_block += var_size;
            return Ok(());
        }

        // "readonly" locals get their one write here, so the standard
        // assignment path (which rejects readonly) can't be used.
        self.src.get_next(); // Eat '='
        let rhs = self.parse_expression_to_ax()?;
        let mut rhs_vartype = rhs.vartype;
        let lhs_vartype = vartype;

        // The vartypes must match even though the LHS is being
        // initialised; as a special case, a string accepts a const string
        // because the contents are copied, not referenced.
        let const_stripped_rhs = self.sym.vartype_without(VartypeShape::Const, rhs_vartype);
        let const_stripped_lhs = self.sym.vartype_without(VartypeShape::Const, lhs_vartype);
        if self.is_vartype_mismatch_oneway(rhs_vartype, lhs_vartype)
            && !(kw::STRING == const_stripped_rhs && kw::STRING == const_stripped_lhs)
        {
            return Err(self.user_error(format!(
                "Cannot assign a type '{}' value to a type '{}' variable",
                self.sym.name(rhs_vartype),
                self.sym.name(lhs_vartype)
            )));
        }

        if SIZE_OF_INT == var_size && !is_dyn {
            // This push both stores the initial value and reserves the
            // variable's stack space.
            self.push_reg(Register::Ax);
            return Ok(());
        }

        self.convert_ax_string_to_string_object(vartype, &mut rhs_vartype);
        self.scrip.write_cmd1(Opcode::LoadSpOffs, 0);
        self.set_reg(Register::Mar);
        if kw::STRING == const_stripped_lhs {
            self.access_data_strcpy();
        } else {
            let opcode = if is_dyn {
                Opcode::MemWritePtr
            } else {
                write_cmd_for_size(var_size)
            };
            self.scrip.write_cmd1(opcode, Register::Ax.cell());
        }
        self.scrip
            .write_cmd2(Opcode::Add, Register::Sp.cell(), var_size as CodeCell);
        self.scrip.offset_to_local_var_block += var_size;
        Ok(())
    }

    fn parse_vardecl0(
        &mut self,
        var_name: Symbol,
        mut vartype: Symbol,
        scope_type: ScopeType,
        tqs: TypeQualifiers,
    ) -> Result<(), CompileError> {
        if tqs.contains(TypeQualifiers::CONST) && kw::STRING != vartype {
            if ScopeType::Import == scope_type {
                return Err(self.user_error(
                    "Cannot import a compile-time constant (did you mean 'readonly' instead of 'const'?)",
                ));
            }
            return self.parse_constant_defn(tqs, vartype, var_name);
        }

        if kw::OPEN_BRACKET == self.src.peek_next() {
            self.parse_array(var_name, &mut vartype)?;
        }

        // Builtins and imports might be predefined with zero size.
        if !tqs.contains(TypeQualifiers::BUILTIN)
            && ScopeType::Import != scope_type
            && 0 == self.sym.get_size(vartype)
        {
            let msg = self.reference_msg_sym(
                format!("Variable '{}' has zero size", self.sym.name(var_name)),
                vartype,
            );
            self.warn(msg);
        }

        self.parse_vardecl_var_to_symtable(var_name, vartype, scope_type);
        {
            let var = self
                .sym
                .entry_mut(var_name)
                .variable
                .as_mut()
                .expect("variable role");
            var.qualifiers = tqs;
        }

        match scope_type {
            ScopeType::Global => self.parse_vardecl_global(var_name, vartype),
            ScopeType::Import => self.parse_vardecl_import(var_name),
            ScopeType::Local => self.parse_vardecl_local(var_name, vartype),
            ScopeType::None => Err(self.internal_error("Wrong scope type")),
        }
    }

    /// Check a local declaration for conflicts, then stash the shadowed
    /// definition in the current nesting frame.
    pub(crate) fn parse_vardecl_check_and_stash_old_defn(
        &mut self,
        var_name: Symbol,
    ) -> Result<(), CompileError> {
        'checks: {
            if self.sym.is_function(var_name) {
                let msg = self.reference_msg_sym(
                    format!("This hides the function '{}()'", self.sym.name(var_name)),
                    var_name,
                );
                self.warn(msg);
                break 'checks;
            }
            if self.sym.is_predefined(var_name) {
                return Err(self.user_error(format!(
                    "Cannot redefine the predefined '{}'",
                    self.sym.name(var_name)
                )));
            }
            if self.sym.is_variable(var_name) {
                break 'checks;
            }
            if self.sym.is_vartype(var_name) {
                return Err(self.user_error(self.reference_msg_sym(
                    format!("'{}' is in use as a type elsewhere", self.sym.name(var_name)),
                    var_name,
                )));
            }
            if !self.sym.is_in_use(var_name) {
                break 'checks;
            }
            return Err(self.user_error(self.reference_msg_sym(
                format!("'{}' is already in use elsewhere", self.sym.name(var_name)),
                var_name,
            )));
        }

        let var_scope = self.sym.entry(var_name).scope;
        if self.nest.top_level() == var_scope && self.sym.is_variable(var_name) {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "'{}' has already been defined in this scope",
                    self.sym.name(var_name)
                ),
                var_name,
            )));
        }
        if PARAMETER_SCOPE == var_scope
            && self.sym.is_variable(var_name)
            && crate::symtable::FUNCTION_SCOPE == self.nest.top_level()
        {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "'{}' has already been defined as a parameter",
                    self.sym.name(var_name)
                ),
                var_name,
            )));
        }

        let snapshot = self.sym.entry(var_name).snapshot();
        if self.nest.add_old_definition(var_name, snapshot) {
            return Err(self.internal_error("Old definition storage place occupied"));
        }
        self.sym.entry_mut(var_name).clear_roles();
        Ok(())
    }

    pub(crate) fn parse_vardecl(
        &mut self,
        tqs: TypeQualifiers,
        vartype: Symbol,
        var_name: Symbol,
        scope_type: ScopeType,
    ) -> Result<(), CompileError> {
        self.parse_vardecl_check_illegal_combis(vartype, scope_type)?;

        if ScopeType::Local == scope_type {
            self.parse_vardecl_check_and_stash_old_defn(var_name)?;
        }

        // Remember what is known about the name so far.
        let known_entry = self.sym.entry(var_name);
        let known_function = known_entry.function.is_some();
        let known_vartype_role = known_entry.vartype.is_some();
        let known_variable = known_entry
            .variable
            .as_ref()
            .map(|v| (v.qualifiers, v.vartype));
        let known_declared = known_entry.declared;

        self.parse_vardecl0(var_name, vartype, scope_type, tqs)?;

        if ScopeType::Local != scope_type {
            self.parse_vardecl_check_that_known_info_matches(
                var_name,
                known_function,
                known_vartype_role,
                known_variable,
                known_declared,
            )?;
        }
        Ok(())
    }

    // ==========================================================================
    // Function declarations
    // ==========================================================================

    fn parse_paramlist_param_default_value(
        &mut self,
        idx: usize,
        param_vartype: Symbol,
    ) -> Result<Symbol, CompileError> {
        if kw::ASSIGN != self.src.peek_next() {
            return Ok(Symbol::NONE); // No default given
        }

        let msg = format!("In parameter #{}: ", idx);
        self.src.get_next(); // Eat '='

        let default_symbol = self.parse_constant_expression(&msg)?;

        if self.sym.is_dyn_vartype(param_vartype) {
            if kw::NULL == default_symbol {
                return Ok(kw::NULL);
            }
            if self.sym.find("0") == Some(default_symbol) {
                if Phase::Main == self.phase {
                    self.warn("Found '0' as the default for a dynamic object (prefer 'null')");
                }
                return Ok(kw::NULL);
            }
            return Err(self.user_error(format!(
                "Expected the parameter default 'null', found '{}' instead",
                self.sym.name(default_symbol)
            )));
        }

        if self.sym.is_any_string_vartype(param_vartype) {
            if self.sym.find("0") == Some(default_symbol) {
                if Phase::Main == self.phase {
                    self.warn("Found '0' as the default for a string (prefer '\"\"')");
                }
                return Ok(default_symbol);
            }
            let const_string = self.sym.vartype_with(VartypeShape::Const, kw::STRING);
            if !self.sym.is_literal(default_symbol)
                || const_string != self.sym.literal_vartype(default_symbol)
            {
                return Err(self.user_error(format!(
                    "Expected a constant or literal string as a parameter default, found '{}' instead",
                    self.sym.name(default_symbol)
                )));
            }
            return Ok(default_symbol);
        }

        if self.sym.is_any_integer_vartype(param_vartype) {
            if !self.sym.is_literal(default_symbol)
                || kw::INT != self.sym.literal_vartype(default_symbol)
            {
                return Err(self.user_error(format!(
                    "Expected a constant integer expression as a parameter default, found '{}' instead",
                    self.sym.name(default_symbol)
                )));
            }
            return Ok(default_symbol);
        }

        if kw::FLOAT == param_vartype {
            if self.sym.find("0") == Some(default_symbol) {
                if Phase::Main == self.phase {
                    self.warn("Found '0' as the default for a float (prefer '0.0')");
                }
            } else if !self.sym.is_literal(default_symbol)
                || kw::FLOAT != self.sym.literal_vartype(default_symbol)
            {
                return Err(self.user_error(format!(
                    "Expected a constant float expression as a parameter default, found '{}' instead",
                    self.sym.name(default_symbol)
                )));
            }
            return Ok(default_symbol);
        }

        Err(self.user_error("Parameter cannot have any default value"))
    }

    fn parse_paramlist_param_type(&mut self, param_vartype: &mut Symbol) -> Result<(), CompileError> {
        if kw::VOID == *param_vartype {
            return Err(self.user_error("A function parameter must not have the type 'void'"));
        }
        self.set_dynpointer_in_managed_vartype(param_vartype);
        self.eat_dynpointer_symbol_if_present(*param_vartype)?;

        if Phase::Main == self.phase
            && !self.sym.is_managed_vartype(*param_vartype)
            && self.sym.is_struct_vartype(*param_vartype)
        {
            return Err(self.user_error(format!(
                "'{}' is non-managed; a non-managed struct cannot be passed as parameter",
                self.sym.name(*param_vartype)
            )));
        }
        Ok(())
    }

    /// Accept the parameter name, when one is given and needed.
    fn parse_paramlist_param_name(&mut self, body_follows: bool) -> Result<Symbol, CompileError> {
        if Phase::PreAnalyze == self.phase || !body_follows {
            // The name won't be used; ignore it when present.
            let nextsym = self.src.peek_next();
            if self.sym.is_identifier(nextsym) {
                self.src.get_next();
            }
            return Ok(Symbol::NONE);
        }

        let param_name = self.parse_varname()?;
        if self.sym.is_function(param_name) {
            let msg = self.reference_msg_sym(
                format!("This hides the function '{}()'", self.sym.name(param_name)),
                param_name,
            );
            self.warn(msg);
            return Ok(param_name);
        }
        if self.sym.is_variable(param_name) {
            if ScopeType::Local != self.sym.get_scope_type(param_name) {
                return Ok(param_name);
            }
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "The name '{}' is already in use as a parameter",
                    self.sym.name(param_name)
                ),
                param_name,
            )));
        }
        if self.sym.is_vartype(param_name) {
            let msg = self.reference_msg_sym(
                format!("This hides the type '{}'", self.sym.name(param_name)),
                param_name,
            );
            self.warn(msg);
        }
        Ok(param_name)
    }

    fn parse_paramlist_param(
        &mut self,
        name_of_func: Symbol,
        body_follows: bool,
        mut tqs: TypeQualifiers,
        mut param_vartype: Symbol,
        param_idx: usize,
    ) -> Result<(), CompileError> {
        self.parse_paramlist_param_type(&mut param_vartype)?;
        if tqs.contains(TypeQualifiers::CONST) {
            param_vartype = self.sym.vartype_with(VartypeShape::Const, param_vartype);
            tqs.remove(TypeQualifiers::CONST);
        }

        let param_name = self.parse_paramlist_param_name(body_follows)?;
        self.parse_dynarray_marker_if_present(&mut param_vartype)?;

        let param_default = self.parse_paramlist_param_default_value(param_idx, param_vartype)?;

        {
            let data = self
                .sym
                .entry(name_of_func)
                .function
                .as_ref()
                .expect("function role");
            if !body_follows
                && Symbol::NONE == param_default
                && data.parameters.len() > 1
                && Symbol::NONE != data.parameters.last().expect("non-empty").default
            {
                return Err(self.user_error(format!(
                    "Parameter #{} of function '{}' follows a default parameter and so must have a default, too",
                    param_idx,
                    self.sym.name(name_of_func)
                )));
            }
        }

        self.sym
            .entry_mut(name_of_func)
            .function
            .as_mut()
            .expect("function role")
            .parameters
            .push(FuncParam {
                name: param_name,
                vartype: param_vartype,
                default: param_default,
            });

        if Phase::Main != self.phase || !body_follows {
            return Ok(());
        }

        // A body follows: the parameter becomes a local variable.
        self.parse_vardecl_check_and_stash_old_defn(param_name)?;
        self.parse_vardecl_var_to_symtable(param_name, param_vartype, ScopeType::Local);

        let var = self
            .sym
            .entry_mut(param_name)
            .variable
            .as_mut()
            .expect("just made");
        if tqs.contains(TypeQualifiers::READONLY) {
            var.qualifiers |= TypeQualifiers::READONLY;
        }
        // Parameters are pushed back-to-front, so the first parameter is
        // nearest the frame top; the '+ 1' accounts for the return address
        // that the call pushes on top of them. Parameters sit below the
        // frame base, so this wraps around zero; every later use is a
        // difference against the (equally shifted) frame base.
        var.offset = self
            .scrip
            .offset_to_local_var_block
            .wrapping_sub((param_idx + 1) * SIZE_OF_STACK_CELL);
        Ok(())
    }

    fn parse_funcdecl_paramlist(
        &mut self,
        funcsym: Symbol,
        body_follows: bool,
    ) -> Result<(), CompileError> {
        {
            let data = self
                .sym
                .entry_mut(funcsym)
                .function
                .as_mut()
                .expect("function role");
            data.is_variadic = false;
            data.parameters.truncate(1); // [0] is the return type
        }

        let mut param_idx = 0usize;
        while !self.src.reached_eof() {
            let tqs = self.parse_qualifiers()?;

            // Only certain qualifiers are allowed here.
            let illegal = tqs
                & !(TypeQualifiers::CONST | TypeQualifiers::READONLY | TypeQualifiers::STATIC);
            if !illegal.is_empty() {
                return Err(self.user_error("Unexpected qualifier in parameter list"));
            }

            let leading_sym = self.src.get_next();
            if kw::CLOSE_PAREN == leading_sym {
                return Ok(()); // Empty parameter list
            }

            if self.sym.is_vartype(leading_sym) {
                if 0 == param_idx
                    && kw::VOID == leading_sym
                    && kw::CLOSE_PAREN == self.src.peek_next()
                    && tqs.is_empty()
                {
                    // Explicitly empty parameter list, "(void)".
                    self.src.get_next(); // Eat ')'
                    return Ok(());
                }

                param_idx += 1;
                if param_idx >= MAX_FUNCTION_PARAMETERS {
                    return Err(self.user_error(format!(
                        "Too many parameters defined for function (max. allowed: {})",
                        MAX_FUNCTION_PARAMETERS - 1
                    )));
                }

                let this_param = self.sym.num_func_params(funcsym) + 1;
                self.parse_paramlist_param(funcsym, body_follows, tqs, leading_sym, this_param)?;

                let nextsym = self.src.get_next();
                self.expect_one_of(&[kw::COMMA, kw::CLOSE_PAREN], nextsym, None)?;
                if kw::CLOSE_PAREN == nextsym {
                    return Ok(());
                }
                continue;
            }

            if kw::DOTDOTDOT == leading_sym {
                self.sym
                    .entry_mut(funcsym)
                    .function
                    .as_mut()
                    .expect("function role")
                    .is_variadic = true;
                let next = self.src.get_next();
                return self.expect_msg(kw::CLOSE_PAREN, next, "Expected ')' following the '...'");
            }

            return Err(self.user_error(format!(
                "Unexpected '{}' in parameter list",
                self.sym.name(leading_sym)
            )));
        }

        Err(self.internal_error("End of input when processing parameter list"))
    }

    /// Install the function-header master data in the symbol table.
    fn parse_funcdecl_master_data_to_sym(
        &mut self,
        tqs: TypeQualifiers,
        return_vartype: Symbol,
        _struct_of_function: Symbol,
        name_of_function: Symbol,
        body_follows: bool,
    ) {
        self.sym.make_entry_function(name_of_function);
        let data = self
            .sym
            .entry_mut(name_of_function)
            .function
            .as_mut()
            .expect("just made");
        data.parameters.clear();
        data.parameters.push(FuncParam {
            name: Symbol::NONE,
            vartype: return_vartype,
            default: Symbol::NONE,
        });
        data.qualifiers = tqs
            & (TypeQualifiers::CONST
                | TypeQualifiers::IMPORT
                | TypeQualifiers::PROTECTED
                | TypeQualifiers::READONLY
                | TypeQualifiers::STATIC
                | TypeQualifiers::WRITEPROTECTED);
        // The component flag isn't set here: it marks functions declared
        // in a struct definition or as extenders.

        if Phase::PreAnalyze == self.phase {
            // Encode the kind of declaration in the offset field.
            let ft = if body_follows {
                FT_LOCAL_BODY
            } else if tqs.contains(TypeQualifiers::IMPORT) {
                FT_IMPORT
            } else {
                FT_PURE_FORWARD
            };
            if data.offset < ft {
                data.offset = ft;
            }
        }
    }

    /// A forward declaration exists: the new declaration must match it.
    fn parse_funcdecl_check_that_known_info_matches(
        &mut self,
        name_of_func: Symbol,
        known_info: Option<&crate::symtable::FunctionData>,
        known_declared: Option<usize>,
        body_follows: bool,
    ) -> Result<(), CompileError> {
        let Some(known_info) = known_info else {
            return Ok(()); // No known info
        };
        let func_name = self.sym.name(name_of_func).to_string();
        let this_entry = self
            .sym
            .entry(name_of_func)
            .function
            .as_ref()
            .ok_or_else(|| self.internal_error("Function record missing"))?;

        let mut known_tq = known_info.qualifiers;
        known_tq.remove(TypeQualifiers::IMPORT);
        let mut this_tq = this_entry.qualifiers;
        this_tq.remove(TypeQualifiers::IMPORT);
        if known_tq != this_tq {
            return Err(self.user_error(self.reference_msg_loc(
                format!("'{}' has different qualifiers here than elsewhere", func_name),
                known_declared,
            )));
        }

        let known_num_parameters = known_info.parameters.len() - 1;
        let this_num_parameters = this_entry.parameters.len() - 1;
        if known_num_parameters != this_num_parameters {
            return Err(self.user_error(self.reference_msg_loc(
                format!(
                    "Function '{}' is declared with {} mandatory parameters here, {} mandatory parameters elsewhere",
                    func_name, this_num_parameters, known_num_parameters
                ),
                known_declared,
            )));
        }

        if known_info.is_variadic != this_entry.is_variadic {
            let te = if this_entry.is_variadic {
                "is declared to accept additional parameters here"
            } else {
                "is declared to not accept additional parameters here"
            };
            let ki = if known_info.is_variadic {
                "to accept additional parameters elsewhere"
            } else {
                "to not accept additional parameters elsewhere"
            };
            return Err(self.user_error(self.reference_msg_loc(
                format!("Function '{}' {}, {}", func_name, te, ki),
                known_declared,
            )));
        }

        let known_ret_type = known_info.parameters[0].vartype;
        let this_ret_type = this_entry.parameters[0].vartype;
        if known_ret_type != this_ret_type {
            return Err(self.user_error(self.reference_msg_loc(
                format!(
                    "Return type of '{}' is declared as '{}' here, as '{}' elsewhere",
                    func_name,
                    self.sym.name(this_ret_type),
                    self.sym.name(known_ret_type)
                ),
                known_declared,
            )));
        }

        for param_idx in 1..=this_num_parameters {
            let known_param_vartype = known_info.parameters[param_idx].vartype;
            let this_param_vartype = this_entry.parameters[param_idx].vartype;
            if known_param_vartype != this_param_vartype {
                return Err(self.user_error(self.reference_msg_loc(
                    format!(
                        "For function '{}': Type of parameter #{} is {} here, {} in a declaration elsewhere",
                        func_name,
                        param_idx,
                        self.sym.name(this_param_vartype),
                        self.sym.name(known_param_vartype)
                    ),
                    known_declared,
                )));
            }
        }

        if body_follows {
            // When no parameter repeats a default, the body inherits the
            // declared defaults.
            let has_default = this_entry
                .parameters
                .iter()
                .skip(1)
                .any(|p| Symbol::NONE != p.default);
            if !has_default {
                return Ok(());
            }
        }

        for param_idx in 1..this_entry.parameters.len() {
            let this_default = this_entry.parameters[param_idx].default;
            let known_default = known_info.parameters[param_idx].default;
            if this_default == known_default {
                continue;
            }

            let this_descr = if Symbol::NONE == this_default {
                "doesn't have a default value".to_string()
            } else {
                format!("has the default {}", self.sym.name(this_default))
            };
            let known_descr = if Symbol::NONE == known_default {
                "doesn't have a default value".to_string()
            } else {
                format!("has the default {}", self.sym.name(known_default))
            };
            return Err(self.user_error(self.reference_msg_loc(
                format!(
                    "In this declaration, parameter #{} {}; in a declaration elsewhere, that parameter {}",
                    param_idx, this_descr, known_descr
                ),
                known_declared,
            )));
        }
        Ok(())
    }

    /// Register the function in `functions[]` or `imports[]`.
    fn parse_funcdecl_enter_as_import_or_func(
        &mut self,
        name_of_func: Symbol,
        body_follows: bool,
        func_is_import: bool,
        num_of_parameters: usize,
    ) -> CodeCell {
        if body_follows {
            let code_offset = self
                .scrip
                .add_new_function(self.sym.name(name_of_func), num_of_parameters);
            self.fcm
                .set_callpoint(self.scrip, name_of_func, code_offset as CodeCell);
            return code_offset as CodeCell;
        }

        if !func_is_import {
            return -1; // Forward declaration; the callpoint is unknown yet
        }

        self.scrip.find_or_add_import(self.sym.name(name_of_func)) as CodeCell
    }

    fn parse_funcdecl_handle_function_or_import_index(
        &mut self,
        tqs: TypeQualifiers,
        struct_of_func: Symbol,
        name_of_func: Symbol,
        body_follows: bool,
    ) -> Result<(), CompileError> {
        if Phase::Main == self.phase {
            let num_params = self.sym.num_func_params(name_of_func);
            let func_startoffs = self.parse_funcdecl_enter_as_import_or_func(
                name_of_func,
                body_follows,
                tqs.contains(TypeQualifiers::IMPORT),
                num_params,
            );
            self.sym
                .entry_mut(name_of_func)
                .function
                .as_mut()
                .expect("function role")
                .offset = func_startoffs;
        }

        if !tqs.contains(TypeQualifiers::IMPORT) {
            return Ok(());
        }

        // Imported functions hold an imports[] index in lieu of an offset.
        self.sym
            .entry_mut(name_of_func)
            .function
            .as_mut()
            .expect("function role")
            .qualifiers |= TypeQualifiers::IMPORT;

        if Phase::PreAnalyze == self.phase {
            self.sym
                .entry_mut(name_of_func)
                .function
                .as_mut()
                .expect("function role")
                .offset = FT_IMPORT;
            return Ok(());
        }

        let imports_idx = self
            .sym
            .entry(name_of_func)
            .function
            .as_ref()
            .expect("function role")
            .offset;

        if Symbol::NONE != struct_of_func {
            let num_params = self.sym.num_func_params(name_of_func);
            let is_variadic = self.sym.is_variadic_func(name_of_func);
            let appendage = format!("^{}", num_params + 100 * is_variadic as usize);
            if let Some(import) = self.scrip.imports.get_mut(imports_idx as usize) {
                import.push_str(&appendage);
            }
        }

        self.fim.set_callpoint(self.scrip, name_of_func, imports_idx);
        Ok(())
    }

    /// Look past the parameter list: does a `{` (and hence a body) follow?
    fn parse_funcdecl_does_body_follow(&mut self) -> Result<bool, CompileError> {
        let cursor = self.src.get_cursor();
        self.skip_to_close(kw::CLOSE_PAREN)?;
        let body_follows = kw::OPEN_BRACE == self.src.peek_next();
        self.src.set_cursor(cursor);
        Ok(body_follows)
    }

    fn parse_funcdecl_checks(
        &mut self,
        tqs: TypeQualifiers,
        struct_of_func: Symbol,
        name_of_func: Symbol,
        return_vartype: Symbol,
        body_follows: bool,
        no_loop_check: bool,
    ) -> Result<(), CompileError> {
        if Symbol::NONE == struct_of_func && tqs.contains(TypeQualifiers::PROTECTED) {
            return Err(self.user_error(format!(
                "Function '{}' isn't a struct component and so cannot be 'protected'",
                self.sym.name(name_of_func)
            )));
        }
        if !body_follows && no_loop_check {
            return Err(
                self.user_error("Can only use 'noloopcheck' when a function body follows the definition")
            );
        }
        if !self.sym.is_function(name_of_func) && self.sym.is_in_use(name_of_func) {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "'{}' is defined elsewhere as a non-function",
                    self.sym.name(name_of_func)
                ),
                name_of_func,
            )));
        }
        if !self.sym.is_managed_vartype(return_vartype)
            && self.sym.is_struct_vartype(return_vartype)
        {
            return Err(self.user_error("Can only return a struct when it is 'managed'"));
        }
        if tqs.contains(TypeQualifiers::CONST) && kw::STRING != return_vartype {
            return Err(self.user_error("Can only return a 'const' type when it is 'const string'"));
        }

        if Phase::PreAnalyze == self.phase
            && body_follows
            && self.sym.is_function(name_of_func)
            && FT_LOCAL_BODY
                == self
                    .sym
                    .entry(name_of_func)
                    .function
                    .as_ref()
                    .expect("function role")
                    .offset
        {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "Function '{}' is already defined with body elsewhere",
                    self.sym.name(name_of_func)
                ),
                name_of_func,
            )));
        }

        if Phase::Main != self.phase || Symbol::NONE == struct_of_func {
            return Ok(());
        }

        let is_component_of_struct = self.sym.is_component(name_of_func)
            && struct_of_func
                == self
                    .sym
                    .entry(name_of_func)
                    .component
                    .as_ref()
                    .expect("component role")
                    .parent;
        if !is_component_of_struct {
            // Functions only become components by declaration in a struct
            // or by extender syntax.
            let full = self.sym.name(name_of_func);
            let component = full.rsplit(':').next().unwrap_or(full).to_string();
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "Function '{}' has not been declared within struct '{}' as a component",
                    component,
                    self.sym.name(struct_of_func)
                ),
                struct_of_func,
            )));
        }
        Ok(())
    }

    /// Rewrite an extender function (`func(this T *, ...)` or
    /// `func(static T, ...)`) as a component function of `T`.
    fn parse_funcdecl_extender_preparations(
        &mut self,
        is_static_extender: bool,
        tqs: &mut TypeQualifiers,
        unqualified_name: Symbol,
    ) -> Result<(Symbol, Symbol), CompileError> {
        if tqs.contains(TypeQualifiers::STATIC) {
            let next = self.src.peek_next();
            self.expect(kw::STATIC, next)?;
        }
        if is_static_extender {
            *tqs |= TypeQualifiers::STATIC;
        }

        self.src.get_next(); // Eat 'this' or 'static'
        let strct = self.src.get_next();
        if !self.sym.is_struct_vartype(strct) {
            return Err(self.user_error(format!(
                "Expected a struct type instead of '{}'",
                self.sym.name(strct)
            )));
        }

        let qualified_name = self.mangle_struct_and_component(strct, unqualified_name);

        if kw::DYNPOINTER == self.src.peek_next() {
            if is_static_extender {
                return Err(
                    self.user_error("Unexpected '*' after 'static' in static extender function")
                );
            }
            self.src.get_next(); // Eat '*'
        }

        // Extender functions need no declaration in the struct defn, so
        // pretend that declaration has happened.
        if !self.sym.has_own_component(strct, unqualified_name) {
            self.sym
                .entry_mut(strct)
                .vartype
                .as_mut()
                .expect("struct role")
                .components
                .insert(unqualified_name, qualified_name);
        }
        self.sym.make_entry_component(qualified_name);
        {
            let comp = self
                .sym
                .entry_mut(qualified_name)
                .component
                .as_mut()
                .expect("just made");
            comp.component = unqualified_name;
            comp.parent = strct;
            comp.is_function = true;
        }

        let punctuation = self.src.peek_next();
        self.expect_one_of(&[kw::COMMA, kw::CLOSE_PAREN], punctuation, None)?;
        if kw::COMMA == punctuation {
            self.src.get_next(); // Eat ','
        }

        Ok((strct, qualified_name))
    }

    /// Parse a function declaration; the cursor sits on the `(`. Returns
    /// whether a body follows.
    pub(crate) fn parse_funcdecl(
        &mut self,
        declaration_start: usize,
        mut tqs: TypeQualifiers,
        mut return_vartype: Symbol,
        struct_of_func: Symbol,
        name_of_func: Symbol,
        no_loop_check: bool,
    ) -> Result<bool, CompileError> {
        if self.sym.name(name_of_func).starts_with("__Builtin_") {
            return Err(self.user_error("Function names may not begin with '__Builtin_'"));
        }

        let body_follows = self.parse_funcdecl_does_body_follow()?;
        self.parse_funcdecl_checks(
            tqs,
            struct_of_func,
            name_of_func,
            return_vartype,
            body_follows,
            no_loop_check,
        )?;

        if tqs.contains(TypeQualifiers::CONST) {
            return_vartype = self.sym.vartype_with(VartypeShape::Const, return_vartype);
            tqs.remove(TypeQualifiers::CONST);
        }

        // A forward declaration may be written with 'import' (when the
        // options allow). That isn't an import proper, so drop the flag.
        if tqs.contains(TypeQualifiers::IMPORT)
            && self.sym.is_function(name_of_func)
            && !self
                .sym
                .entry(name_of_func)
                .function
                .as_ref()
                .expect("function role")
                .qualifiers
                .contains(TypeQualifiers::IMPORT)
        {
            if self.options.contains(Options::NO_IMPORT_OVERRIDE) {
                return Err(self.user_error(self.reference_msg_sym(
                    "In here, a function with a local body must not have an \"import\" declaration",
                    name_of_func,
                )));
            }
            tqs.remove(TypeQualifiers::IMPORT);
        }

        if Phase::Main == self.phase && body_follows {
            // The parameters become local variables on nesting level 1.
            self.nest.push(NestingType::Parameters);
            // The call pushes the parameters, then the return address, so
            // the first parameter sits one cell below the frame top.
            self.scrip.offset_to_local_var_block += SIZE_OF_STACK_CELL;
        }

        // Stash the known header so the new declaration can be checked
        // against it.
        let known_info = self.sym.entry_mut(name_of_func).function.take();
        let known_declared = self.sym.declared(name_of_func);

        self.parse_funcdecl_master_data_to_sym(
            tqs,
            return_vartype,
            struct_of_func,
            name_of_func,
            body_follows,
        );
        self.parse_funcdecl_paramlist(name_of_func, body_follows)?;

        self.parse_funcdecl_check_that_known_info_matches(
            name_of_func,
            known_info.as_ref(),
            known_declared,
            body_follows,
        )?;

        // Carry over the defaults recorded by the prototype.
        if let Some(known) = known_info.as_ref() {
            let data = self
                .sym
                .entry_mut(name_of_func)
                .function
                .as_mut()
                .expect("function role");
            for (param, known_param) in data.parameters.iter_mut().zip(known.parameters.iter()) {
                param.default = known_param.default;
            }
        }

        self.parse_funcdecl_handle_function_or_import_index(
            tqs,
            struct_of_func,
            name_of_func,
            body_follows,
        )?;

        self.sym.set_declared(name_of_func, declaration_start);
        Ok(body_follows)
    }

    // ==========================================================================
    // Vartype-led declarations
    // ==========================================================================

    fn parse_vartype_check_for_illegal_context(&mut self) -> Result<(), CompileError> {
        match self.nest.nesting_type() {
            NestingType::Switch => Err(self.user_error(
                "Cannot use declarations directly within a 'switch' body. (Put \"{ ... }\" around the 'case' statements)",
            )),
            NestingType::Braces | NestingType::Function | NestingType::None => Ok(()),
            _ => Err(self.user_error(
                "A declaration cannot be the sole body of an 'if', 'else' or loop clause",
            )),
        }
    }

    fn parse_vartype_check_illegal_combis(
        &mut self,
        is_function: bool,
        tqs: TypeQualifiers,
    ) -> Result<(), CompileError> {
        if tqs.contains(TypeQualifiers::STATIC) && tqs.contains(TypeQualifiers::ATTRIBUTE) {
            return Err(self.user_error(
                "Can only declare 'static attribute' within a 'struct' declaration (use extender syntax 'attribute ... (static STRUCT)')",
            ));
        }
        if tqs.contains(TypeQualifiers::STATIC) && !is_function {
            return Err(self.user_error(
                "Outside of a 'struct' declaration, 'static' can only be applied to functions",
            ));
        }
        // 'protected' can be legal: a struct function may be defined as
        // 'int strct::function() {}' or via extender syntax, and which of
        // those applies isn't known yet.
        if tqs.contains(TypeQualifiers::READONLY) && is_function {
            return Err(self.user_error("Cannot apply 'readonly' to a function"));
        }
        if tqs.contains(TypeQualifiers::WRITEPROTECTED) && is_function {
            return Err(self.user_error("Cannot apply 'writeprotected' to a function"));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_vartype_funcdecl(
        &mut self,
        mut tqs: TypeQualifiers,
        vartype: Symbol,
        mut struct_name: Symbol,
        mut func_name: Symbol,
        no_loop_check: bool,
        struct_of_current_func: &mut Symbol,
        name_of_current_func: &mut Symbol,
    ) -> Result<bool, CompileError> {
        let declaration_start = self.src.get_cursor();
        self.src.get_next(); // Eat '('

        let func_is_static_extender = kw::STATIC == self.src.peek_next();
        let func_is_extender = func_is_static_extender || kw::THIS == self.src.peek_next();

        if func_is_extender {
            if Symbol::NONE != struct_name {
                return Err(
                    self.user_error("Cannot use extender syntax with a function name that follows '::'")
                );
            }
            // Rewrite the extender as a component function of the struct.
            let (strct, qualified) = self.parse_funcdecl_extender_preparations(
                func_is_static_extender,
                &mut tqs,
                func_name,
            )?;
            struct_name = strct;
            func_name = qualified;
        }

        let body_follows = self.parse_funcdecl(
            declaration_start,
            tqs,
            vartype,
            struct_name,
            func_name,
            no_loop_check,
        )?;

        if !body_follows {
            return Ok(false);
        }

        if Symbol::NONE != *name_of_current_func {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "Function bodies cannot nest, but the body of function {} is still open. (Did you forget a '}}'?)",
                    self.sym.name(*name_of_current_func)
                ),
                func_name,
            )));
        }

        self.sym
            .entry_mut(func_name)
            .function
            .as_mut()
            .expect("function role")
            .no_loop_check = no_loop_check;

        // A function body has started.
        *name_of_current_func = func_name;
        *struct_of_current_func = struct_name;
        Ok(true)
    }

    fn parse_vartype_vardecl_pre_analyze(
        &mut self,
        var_name: Symbol,
        scope_type: ScopeType,
    ) -> Result<(), CompileError> {
        if let Some(&was_global) = self.givm.get(&var_name) {
            if was_global {
                return Err(self.user_error(format!(
                    "'{}' is already defined as a global non-import variable",
                    self.sym.name(var_name)
                )));
            }
            if ScopeType::Global == scope_type
                && self.options.contains(Options::NO_IMPORT_OVERRIDE)
            {
                return Err(self.user_error(format!(
                    "'{}' is defined as an import variable; that cannot be overridden here",
                    self.sym.name(var_name)
                )));
            }
        }
        self.givm.insert(var_name, ScopeType::Global == scope_type);

        // Nothing else is of interest at this stage.
        self.skip_to(&[kw::COMMA, kw::SEMICOLON]);
        Ok(())
    }

    /// Extender syntax for an attribute, outside of a struct declaration.
    fn parse_vartype_attribute(
        &mut self,
        mut tqs: TypeQualifiers,
        vartype: Symbol,
        attribute: Symbol,
        scope_type: ScopeType,
    ) -> Result<(), CompileError> {
        let declaration_start = self.src.get_cursor();

        if ScopeType::Global != scope_type && ScopeType::Import != scope_type {
            return Err(self.user_error("Cannot declare an attribute within a function body"));
        }

        let bracket_or_paren = self.src.get_next();
        self.expect_one_of(&[kw::OPEN_BRACKET, kw::OPEN_PAREN], bracket_or_paren, None)?;
        let is_indexed = kw::OPEN_BRACKET == bracket_or_paren;
        if is_indexed {
            let next = self.src.get_next();
            self.expect(kw::CLOSE_BRACKET, next)?;
            let next = self.src.get_next();
            self.expect(kw::OPEN_PAREN, next)?;
        }

        let static_or_this = self.src.get_next();
        self.expect_one_of(&[kw::STATIC, kw::THIS], static_or_this, None)?;
        let is_static = kw::STATIC == static_or_this;
        if is_static {
            tqs |= TypeQualifiers::STATIC;
        }
        let strct = self.src.get_next();
        if !self.sym.is_struct_vartype(strct) {
            return Err(self.user_error(format!(
                "Expected a struct type instead of '{}'",
                self.sym.name(strct)
            )));
        }
        if !is_static {
            if !self.sym.is_managed_vartype(strct) {
                return Err(self.user_error(self.reference_msg_sym(
                    format!(
                        "Cannot use 'this' with the unmanaged struct '{}'",
                        self.sym.name(strct)
                    ),
                    strct,
                )));
            }
            if kw::DYNPOINTER == self.src.peek_next() {
                self.src.get_next(); // Eat the optional '*'
            }
        }

        // Mustn't already be in the struct...
        let qualified = self.mangle_struct_and_component(strct, attribute);
        if self.sym.is_in_use(qualified) {
            return Err(self.user_error(self.reference_msg_sym(
                format!("'{}' is already defined", self.sym.name(qualified)),
                qualified,
            )));
        }
        // ...nor in any ancestor.
        let parent = self.sym.find_struct_of_component(strct, attribute);
        if Symbol::NONE != parent {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "The struct '{}' extends '{}', and '{}' is already defined",
                    self.sym.name(strct),
                    self.sym.name(parent),
                    self.sym.name(attribute)
                ),
                parent,
            )));
        }

        self.sym.make_entry_component(qualified);
        {
            let comp = self.sym.entry_mut(qualified).component.as_mut().expect("just made");
            comp.component = attribute;
            comp.parent = strct;
            comp.is_function = false;
        }
        self.sym
            .entry_mut(strct)
            .vartype
            .as_mut()
            .expect("struct role")
            .components
            .insert(attribute, qualified);
        self.sym.set_declared(qualified, declaration_start);

        self.sym.make_entry_variable(qualified);
        {
            let var = self.sym.entry_mut(qualified).variable.as_mut().expect("just made");
            var.vartype = vartype;
            var.qualifiers = tqs;
        }
        self.parse_struct_attribute(tqs, strct, vartype, qualified, is_indexed, declaration_start)?;

        let next = self.src.get_next();
        self.expect(kw::CLOSE_PAREN, next)
    }

    fn parse_vartype_variable_or_attribute_defn(
        &mut self,
        tqs: TypeQualifiers,
        vartype: Symbol,
        vname: Symbol,
        scope_type: ScopeType,
    ) -> Result<(), CompileError> {
        if Phase::PreAnalyze == self.phase && !tqs.contains(TypeQualifiers::ATTRIBUTE) {
            return self.parse_vartype_vardecl_pre_analyze(vname, scope_type);
        }

        let in_func_body = self.nest.top_level() > PARAMETER_SCOPE;
        self.check_tq(tqs, in_func_body, self.sym.is_component(vname))?;

        if tqs.contains(TypeQualifiers::ATTRIBUTE) {
            return self.parse_vartype_attribute(tqs, vartype, vname, scope_type);
        }

        // autoptr/managed/builtin qualify the vartype, not the variable.
        let mut variable_tqs = tqs;
        variable_tqs.remove(
            TypeQualifiers::AUTOPTR | TypeQualifiers::MANAGED | TypeQualifiers::BUILTIN,
        );

        self.parse_vardecl(variable_tqs, vartype, vname, scope_type)
    }

    /// A declaration led by a vartype: one function, or a list of
    /// variables/attributes.
    pub(crate) fn parse_vartype_clause(
        &mut self,
        mut vartype: Symbol,
        tqs: TypeQualifiers,
        struct_of_current_func: &mut Symbol,
        name_of_current_func: &mut Symbol,
    ) -> Result<(), CompileError> {
        if self.src.reached_eof() {
            return Err(self.user_error("Unexpected end of input (did you forget ';'?)"));
        }
        if tqs.contains(TypeQualifiers::BUILTIN) {
            return Err(self.user_error("Can only use 'builtin' when declaring a 'struct'"));
        }

        self.parse_vartype_check_for_illegal_context()?;

        if self.sym.is_undefined_vartype(vartype) {
            let cursor = self.src.get_cursor();
            self.struct_refs.entry(vartype).or_insert(cursor);
        }

        let scope_type = if Symbol::NONE != *name_of_current_func {
            ScopeType::Local
        } else if tqs.contains(TypeQualifiers::IMPORT) {
            ScopeType::Import
        } else {
            ScopeType::Global
        };

        // Managed vartypes imply a pointer — except in import statements,
        // where generated code like "import Object oFoo;" really does mean
        // the unpointered struct.
        if kw::DYNPOINTER == self.src.peek_next()
            || self.sym.is_autoptr_vartype(vartype)
            || (ScopeType::Import != scope_type && self.sym.is_managed_vartype(vartype))
        {
            vartype = self.sym.vartype_with(VartypeShape::Dynpointer, vartype);
        }

        self.eat_dynpointer_symbol_if_present(vartype)?;

        // "int [] func(...)"
        self.parse_dynarray_marker_if_present(&mut vartype)?;

        // "TYPE noloopcheck foo(...)"
        let no_loop_check = kw::NOLOOPCHECK == self.src.peek_next();
        if no_loop_check {
            self.src.get_next();
        }

        // Read the variables, or the one function, of this vartype.
        loop {
            let (struct_name, var_or_func_name) = self.parse_varname_ex(true)?;

            let is_function = !tqs.contains(TypeQualifiers::ATTRIBUTE)
                && kw::OPEN_PAREN == self.src.peek_next();

            // Some qualifiers only go with some kinds of definitions.
            self.parse_vartype_check_illegal_combis(is_function, tqs)?;

            if is_function {
                let body_follows = self.parse_vartype_funcdecl(
                    tqs,
                    vartype,
                    struct_name,
                    var_or_func_name,
                    no_loop_check,
                    struct_of_current_func,
                    name_of_current_func,
                )?;
                if body_follows {
                    return Ok(());
                }
            } else if self.sym.is_dynarray_vartype(vartype) || no_loop_check {
                // Only functions can carry these.
                return Err(self.user_error("Expected '('"));
            } else {
                if Symbol::NONE != struct_name {
                    return Err(self.user_error("Variable may not contain '::'"));
                }
                self.parse_vartype_variable_or_attribute_defn(
                    tqs,
                    vartype,
                    var_or_func_name,
                    scope_type,
                )?;
            }

            let punctuation = self.src.get_next();
            self.expect_one_of(&[kw::COMMA, kw::SEMICOLON], punctuation, None)?;
            if kw::SEMICOLON == punctuation {
                return Ok(());
            }
        }
    }

    // ==========================================================================
    // Exports
    // ==========================================================================

    fn parse_export_function(&mut self, func: Symbol) -> Result<(), CompileError> {
        // When everything is exported anyway, skip the table entry here.
        if self.options.contains(Options::EXPORT_ALL) {
            return Ok(());
        }

        let data = self
            .sym
            .entry(func)
            .function
            .as_ref()
            .expect("function role");
        if data.qualifiers.contains(TypeQualifiers::IMPORT) {
            return Err(self.user_error(self.reference_msg_sym(
                format!(
                    "Function '{}' is imported, so it cannot be exported",
                    self.sym.name(func)
                ),
                func,
            )));
        }

        let offset = data.offset;
        let args = self.sym.num_func_params(func) as u32
            + 100 * self.sym.is_variadic_func(func) as u32;
        let name = self.sym.name(func).to_string();
        self.scrip.add_export(&name, offset, Some(args));
        Ok(())
    }

    fn parse_export_variable(&mut self, var: Symbol) -> Result<(), CompileError> {
        let var_sct = self.sym.get_scope_type(var);
        if ScopeType::Import == var_sct {
            return Err(self.user_error(self.reference_msg_sym(
                format!("Cannot export the imported variable '{}'", self.sym.name(var)),
                var,
            )));
        }
        if ScopeType::Global != var_sct {
            return Err(self.user_error(self.reference_msg_sym(
                format!("Cannot export the non-global variable '{}'", self.sym.name(var)),
                var,
            )));
        }

        // Old-style strings are tracked by their first byte, which is
        // exportable like any other global.
        let offset = self
            .sym
            .entry(var)
            .variable
            .as_ref()
            .expect("variable role")
            .offset;
        let name = self.sym.name(var).to_string();
        self.scrip.add_export(&name, offset as CodeCell, None);
        Ok(())
    }

    /// `export name1, name2, ...;`
    pub(crate) fn parse_export(&mut self) -> Result<(), CompileError> {
        if Phase::PreAnalyze == self.phase {
            self.skip_to(&[kw::SEMICOLON]);
            self.src.get_next(); // Eat ';'
            return Ok(());
        }

        loop {
            let export_sym = self.src.get_next();
            if self.sym.is_function(export_sym) {
                self.parse_export_function(export_sym)?;
            } else if self.sym.is_variable(export_sym) {
                self.parse_export_variable(export_sym)?;
            } else {
                return Err(self.user_error(format!(
                    "Expected a function or global variable but found '{}' instead",
                    self.sym.name(export_sym)
                )));
            }

            let punctuation = self.src.get_next();
            self.expect_one_of(&[kw::COMMA, kw::SEMICOLON], punctuation, None)?;
            if kw::SEMICOLON == punctuation {
                return Ok(());
            }
        }
    }
}
