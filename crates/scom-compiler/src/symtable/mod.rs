//! The symbol table: interned names mapped to typed entries.
//!
//! All references between compiler data structures are `Symbol` ids into
//! this append-only arena. The predefined block (keywords, operators,
//! delimiters, primitive vartypes — see [`kw`]) is allocated first; user
//! identifiers follow. Between the pre-analyse and main passes user entries
//! are reset but never removed, so ids stay stable and forward references
//! recorded in pass one remain valid in pass two.

mod consteval;
pub mod entry;
pub mod kw;

use rustc_hash::FxHashMap;
use scom_core::{ScopeType, TypeQualifiers, VartypeFlags, SIZE_OF_DYNPOINTER, SIZE_OF_INT};

use crate::bytecode::{CodeCell, CODE_CELL_PLACEHOLDER};

pub use entry::{
    ComponentData, ConstantData, CtValue, DelimiterData, FuncParam, FunctionData, LiteralData,
    OperatorData, SymbolEntry, VariableData, VartypeData, VartypeShape, FUNCTION_SCOPE,
    PARAMETER_SCOPE,
};

/// An interned symbol: an index into the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Symbol(pub u32);

impl Symbol {
    /// The sentinel denoting absence (and end-of-input when read as a token).
    pub const NONE: Symbol = Symbol(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Function-declaration state codes held in `FunctionData::offset` during
/// the pre-analyse pass, ordered by strength.
pub const FT_PURE_FORWARD: CodeCell = 1;
pub const FT_IMPORT: CodeCell = 2;
pub const FT_LOCAL_BODY: CodeCell = 3;

// Operator priorities: a larger number binds less tightly. The expression
// splitter picks the largest priority found at nesting depth zero.
const PRIO_POSTFIX: usize = 2;
const PRIO_PREFIX: usize = 9;
const PRIO_MULTIPLICATIVE: usize = 10;
const PRIO_ADDITIVE: usize = 20;
const PRIO_SHIFT: usize = 30;
const PRIO_RELATIONAL: usize = 40;
const PRIO_EQUALITY: usize = 45;
const PRIO_BITAND: usize = 50;
const PRIO_BITXOR: usize = 55;
const PRIO_BITOR: usize = 60;
const PRIO_AND: usize = 65;
const PRIO_OR: usize = 70;
const PRIO_TERNARY: usize = 75;

/// The symbol table.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    lookup: FxHashMap<String, Symbol>,
    string_struct: Symbol,
    // Cached "String *" symbol; invalidated by the inter-pass reset.
    string_struct_ptr: Option<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = Self::default();
        table.seed_predefined();
        table
    }

    // ==========================================================================
    // Interning
    // ==========================================================================

    pub fn find(&self, name: &str) -> Option<Symbol> {
        self.lookup.get(name).copied()
    }

    pub fn add(&mut self, name: &str) -> Symbol {
        debug_assert!(!self.lookup.contains_key(name));
        let sym = Symbol(self.entries.len() as u32);
        self.entries.push(SymbolEntry::named(name));
        self.lookup.insert(name.to_string(), sym);
        sym
    }

    pub fn find_or_add(&mut self, name: &str) -> Symbol {
        match self.find(name) {
            Some(sym) => sym,
            None => self.add(name),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entry(&self, sym: Symbol) -> &SymbolEntry {
        &self.entries[sym.index()]
    }

    #[inline]
    pub fn entry_mut(&mut self, sym: Symbol) -> &mut SymbolEntry {
        &mut self.entries[sym.index()]
    }

    /// The symbol's name; the none-symbol reads as "end of input" so that
    /// it can be spliced into diagnostics directly.
    pub fn name(&self, sym: Symbol) -> &str {
        if sym == Symbol::NONE {
            return "end of input";
        }
        self.entries
            .get(sym.index())
            .map(|e| e.name.as_str())
            .unwrap_or("end of input")
    }

    // ==========================================================================
    // Role predicates
    // ==========================================================================

    pub fn is_predefined(&self, sym: Symbol) -> bool {
        sym <= kw::LAST_PREDEFINED
    }

    pub fn is_variable(&self, sym: Symbol) -> bool {
        self.entry(sym).variable.is_some()
    }

    pub fn is_function(&self, sym: Symbol) -> bool {
        self.entry(sym).function.is_some()
    }

    pub fn is_vartype(&self, sym: Symbol) -> bool {
        sym != Symbol::NONE && self.entry(sym).vartype.is_some()
    }

    pub fn is_literal(&self, sym: Symbol) -> bool {
        self.entry(sym).literal.is_some()
    }

    pub fn is_constant(&self, sym: Symbol) -> bool {
        self.entry(sym).constant.is_some()
    }

    pub fn is_component(&self, sym: Symbol) -> bool {
        self.entry(sym).component.is_some()
    }

    /// An attribute: a variable component that compiles to getter/setter
    /// calls.
    pub fn is_attribute(&self, sym: Symbol) -> bool {
        self.entry(sym)
            .variable
            .as_ref()
            .map(|v| v.qualifiers.contains(TypeQualifiers::ATTRIBUTE))
            .unwrap_or(false)
    }

    pub fn is_operator(&self, sym: Symbol) -> bool {
        self.entry(sym).operator.is_some()
    }

    /// A symbol is "in use" when a declaration (or the predefined block)
    /// has claimed it.
    pub fn is_in_use(&self, sym: Symbol) -> bool {
        self.is_predefined(sym) || self.entry(sym).is_in_use()
    }

    /// A plausible user identifier: above the predefined block and shaped
    /// like a name.
    pub fn is_identifier(&self, sym: Symbol) -> bool {
        if sym <= kw::LAST_PREDEFINED || sym.index() >= self.entries.len() {
            return false;
        }
        let name = &self.entry(sym).name;
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
    }

    /// Whether the expression skipper may swallow this symbol.
    pub fn can_be_part_of_expression(&self, sym: Symbol) -> bool {
        // Parens and brackets belong to expressions (closing ones arrive
        // here when they bring the nesting depth back to zero); braces
        // never do.
        if matches!(
            sym,
            kw::OPEN_PAREN | kw::CLOSE_PAREN | kw::OPEN_BRACKET | kw::CLOSE_BRACKET
        ) {
            return true;
        }
        let e = self.entry(sym);
        if let Some(op) = &e.operator {
            return op.prefix_prio.is_some() || op.binary_prio.is_some();
        }
        e.literal.is_some() || e.constant.is_some() || e.variable.is_some() || e.function.is_some()
    }

    // ==========================================================================
    // Role creation
    // ==========================================================================

    pub fn make_entry_variable(&mut self, sym: Symbol) {
        let e = self.entry_mut(sym);
        if e.variable.is_none() {
            e.variable = Some(VariableData::default());
        }
    }

    /// Install a fresh function record, discarding any previous one.
    pub fn make_entry_function(&mut self, sym: Symbol) {
        self.entry_mut(sym).function = Some(FunctionData::default());
    }

    pub fn make_entry_vartype(&mut self, sym: Symbol) {
        let e = self.entry_mut(sym);
        if e.vartype.is_none() {
            e.vartype = Some(VartypeData::default());
        }
    }

    pub fn make_entry_literal(&mut self, sym: Symbol) {
        let e = self.entry_mut(sym);
        if e.literal.is_none() {
            e.literal = Some(LiteralData::default());
        }
    }

    pub fn make_entry_constant(&mut self, sym: Symbol) {
        let e = self.entry_mut(sym);
        if e.constant.is_none() {
            e.constant = Some(ConstantData::default());
        }
    }

    pub fn make_entry_component(&mut self, sym: Symbol) {
        let e = self.entry_mut(sym);
        if e.component.is_none() {
            e.component = Some(ComponentData::default());
        }
    }

    // ==========================================================================
    // Declaration metadata
    // ==========================================================================

    pub fn set_declared(&mut self, sym: Symbol, src_pos: usize) {
        self.entry_mut(sym).declared = Some(src_pos);
    }

    pub fn declared(&self, sym: Symbol) -> Option<usize> {
        self.entry(sym).declared
    }

    pub fn mark_accessed(&mut self, sym: Symbol) {
        self.entry_mut(sym).accessed = true;
    }

    // ==========================================================================
    // Variables and functions
    // ==========================================================================

    /// The vartype of a variable, `NONE` for anything else.
    pub fn get_vartype(&self, sym: Symbol) -> Symbol {
        self.entry(sym)
            .variable
            .as_ref()
            .map(|v| v.vartype)
            .unwrap_or(Symbol::NONE)
    }

    /// How a variable is addressed.
    pub fn get_scope_type(&self, sym: Symbol) -> ScopeType {
        let Some(var) = self.entry(sym).variable.as_ref() else {
            return ScopeType::None;
        };
        if var.qualifiers.contains(TypeQualifiers::IMPORT) {
            ScopeType::Import
        } else if self.entry(sym).scope == 0 {
            ScopeType::Global
        } else {
            ScopeType::Local
        }
    }

    /// Parameters live at the dedicated parameter scope depth.
    pub fn is_parameter(&self, sym: Symbol) -> bool {
        self.is_variable(sym) && self.entry(sym).scope == PARAMETER_SCOPE
    }

    /// Number of declared parameters (excluding the return-type slot).
    pub fn num_func_params(&self, func: Symbol) -> usize {
        self.entry(func)
            .function
            .as_ref()
            .map(|f| f.parameters.len().saturating_sub(1))
            .unwrap_or(0)
    }

    pub fn func_return_vartype(&self, func: Symbol) -> Symbol {
        self.entry(func)
            .function
            .as_ref()
            .and_then(|f| f.parameters.first())
            .map(|p| p.vartype)
            .unwrap_or(Symbol::NONE)
    }

    pub fn is_variadic_func(&self, func: Symbol) -> bool {
        self.entry(func)
            .function
            .as_ref()
            .map(|f| f.is_variadic)
            .unwrap_or(false)
    }

    // ==========================================================================
    // Vartype queries
    // ==========================================================================

    fn vartype_data(&self, v: Symbol) -> Option<&VartypeData> {
        if v == Symbol::NONE {
            return None;
        }
        self.entry(v).vartype.as_ref()
    }

    fn shape_of(&self, v: Symbol) -> VartypeShape {
        self.vartype_data(v)
            .map(|d| d.shape)
            .unwrap_or(VartypeShape::Atomic)
    }

    /// Strip a `const` wrapper, if any.
    fn strip_const(&self, v: Symbol) -> Symbol {
        match self.vartype_data(v) {
            Some(d) if d.shape == VartypeShape::Const => d.base_vartype,
            _ => v,
        }
    }

    /// The atomic vartype carrying the flags of `v` (through const and one
    /// level of dynpointer).
    fn flag_carrier(&self, v: Symbol) -> Symbol {
        let v = self.strip_const(v);
        match self.vartype_data(v) {
            Some(d) if d.shape == VartypeShape::Dynpointer => d.base_vartype,
            _ => v,
        }
    }

    fn vartype_flags(&self, v: Symbol) -> VartypeFlags {
        self.vartype_data(self.flag_carrier(v))
            .map(|d| d.flags)
            .unwrap_or_default()
    }

    pub fn is_managed_vartype(&self, v: Symbol) -> bool {
        self.vartype_flags(v).contains(VartypeFlags::MANAGED)
    }

    pub fn is_builtin_vartype(&self, v: Symbol) -> bool {
        self.vartype_flags(v).contains(VartypeFlags::BUILTIN)
    }

    pub fn is_autoptr_vartype(&self, v: Symbol) -> bool {
        self.vartype_flags(v).contains(VartypeFlags::AUTOPTR)
    }

    pub fn is_struct_vartype(&self, v: Symbol) -> bool {
        self.vartype_flags(v).contains(VartypeFlags::STRUCT)
    }

    pub fn is_undefined_vartype(&self, v: Symbol) -> bool {
        self.vartype_flags(v).contains(VartypeFlags::UNDEFINED)
    }

    pub fn is_dynpointer_vartype(&self, v: Symbol) -> bool {
        self.shape_of(self.strip_const(v)) == VartypeShape::Dynpointer
    }

    pub fn is_dynarray_vartype(&self, v: Symbol) -> bool {
        self.shape_of(self.strip_const(v)) == VartypeShape::Dynarray
    }

    /// Dynamic-pointer or dynamic-array: a managed reference either way.
    pub fn is_dyn_vartype(&self, v: Symbol) -> bool {
        self.is_dynpointer_vartype(v) || self.is_dynarray_vartype(v)
    }

    pub fn is_array_vartype(&self, v: Symbol) -> bool {
        self.shape_of(self.strip_const(v)) == VartypeShape::Array
    }

    pub fn is_any_array_vartype(&self, v: Symbol) -> bool {
        self.is_array_vartype(v) || self.is_dynarray_vartype(v)
    }

    pub fn is_atomic_vartype(&self, v: Symbol) -> bool {
        self.shape_of(self.strip_const(v)) == VartypeShape::Atomic
    }

    pub fn is_const_vartype(&self, v: Symbol) -> bool {
        self.shape_of(v) == VartypeShape::Const
    }

    pub fn is_any_integer_vartype(&self, v: Symbol) -> bool {
        matches!(v, kw::CHAR | kw::SHORT | kw::INT | kw::LONG)
            || self
                .vartype_data(v)
                .map(|d| d.flags.contains(VartypeFlags::ENUM))
                .unwrap_or(false)
    }

    /// Old-style `string`, possibly behind `const`.
    pub fn is_oldstring(&self, v: Symbol) -> bool {
        self.strip_const(v) == kw::STRING
    }

    /// Old-style `string` or the registered string-struct pointer.
    pub fn is_any_string_vartype(&self, v: Symbol) -> bool {
        self.is_oldstring(v) || (self.string_struct_ptr == Some(v) && v != Symbol::NONE)
    }

    /// Size in bytes of a value of vartype `v`, or of a variable's vartype.
    pub fn get_size(&self, sym: Symbol) -> usize {
        if let Some(var) = self.entry(sym).variable.as_ref() {
            return self.get_size(var.vartype);
        }
        let Some(d) = self.vartype_data(sym) else {
            return 0;
        };
        match d.shape {
            VartypeShape::Atomic | VartypeShape::Array => d.size,
            VartypeShape::Const => self.get_size(d.base_vartype),
            VartypeShape::Dynpointer | VartypeShape::Dynarray => SIZE_OF_DYNPOINTER,
        }
    }

    /// Total element count of a static array vartype.
    pub fn num_array_elements(&self, v: Symbol) -> usize {
        match self.vartype_data(self.strip_const(v)) {
            Some(d) if d.shape == VartypeShape::Array => d.dims.iter().product(),
            _ => 0,
        }
    }

    /// Element type of an array/dynarray, base of const/dynpointer.
    pub fn base_vartype(&self, v: Symbol) -> Symbol {
        self.vartype_data(v)
            .map(|d| d.base_vartype)
            .unwrap_or(Symbol::NONE)
    }

    /// Parent struct of a struct vartype.
    pub fn parent_vartype(&self, v: Symbol) -> Symbol {
        self.vartype_data(v)
            .map(|d| d.parent)
            .unwrap_or(Symbol::NONE)
    }

    // ==========================================================================
    // Vartype algebra
    // ==========================================================================

    /// `const T` / `T *` / `T[]`. Idempotent: re-applying the modifier a
    /// vartype already carries returns it unchanged.
    pub fn vartype_with(&mut self, modifier: VartypeShape, v: Symbol) -> Symbol {
        debug_assert!(matches!(
            modifier,
            VartypeShape::Const | VartypeShape::Dynpointer | VartypeShape::Dynarray
        ));
        if v == Symbol::NONE || self.shape_of(v) == modifier {
            return v;
        }
        let name = match modifier {
            VartypeShape::Const => format!("const {}", self.name(v)),
            VartypeShape::Dynpointer => format!("{} *", self.name(v)),
            VartypeShape::Dynarray => format!("{}[]", self.name(v)),
            _ => unreachable!(),
        };
        let sym = self.find_or_add(&name);
        if self.entry(sym).vartype.is_none() {
            let size = match modifier {
                VartypeShape::Const => self.get_size(v),
                _ => SIZE_OF_DYNPOINTER,
            };
            self.entry_mut(sym).vartype = Some(VartypeData {
                shape: modifier,
                size,
                base_vartype: v,
                ..VartypeData::default()
            });
        }
        sym
    }

    /// Strip a modifier; total — a vartype without the modifier is returned
    /// unchanged.
    pub fn vartype_without(&self, modifier: VartypeShape, v: Symbol) -> Symbol {
        match self.vartype_data(v) {
            Some(d) if d.shape == modifier => d.base_vartype,
            _ => v,
        }
    }

    /// A static array of `v` with the given dimension vector.
    pub fn vartype_with_array(&mut self, dims: &[usize], v: Symbol) -> Symbol {
        let dims_str = dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let name = format!("{}[{}]", self.name(v), dims_str);
        let sym = self.find_or_add(&name);
        if self.entry(sym).vartype.is_none() {
            let size = dims.iter().product::<usize>() * self.get_size(v);
            self.entry_mut(sym).vartype = Some(VartypeData {
                shape: VartypeShape::Array,
                size,
                base_vartype: v,
                dims: dims.to_vec(),
                ..VartypeData::default()
            });
        }
        sym
    }

    // ==========================================================================
    // Struct components
    // ==========================================================================

    /// Whether `strct` itself (not an ancestor) declares `unqualified`.
    pub fn has_own_component(&self, strct: Symbol, unqualified: Symbol) -> bool {
        self.vartype_data(strct)
            .map(|d| d.components.contains_key(&unqualified))
            .unwrap_or(false)
    }

    /// Find the qualified component symbol for `unqualified` in `strct` or
    /// any of its ancestors.
    pub fn find_component_in_struct(&self, strct: Symbol, unqualified: Symbol) -> Symbol {
        let mut cur = strct;
        while let Some(d) = self.vartype_data(cur) {
            if let Some(&qualified) = d.components.get(&unqualified) {
                return qualified;
            }
            cur = d.parent;
        }
        Symbol::NONE
    }

    /// Find the struct (possibly an ancestor) that declares `unqualified`.
    pub fn find_struct_of_component(&self, strct: Symbol, unqualified: Symbol) -> Symbol {
        let mut cur = strct;
        while let Some(d) = self.vartype_data(cur) {
            if d.components.contains_key(&unqualified) {
                return cur;
            }
            cur = d.parent;
        }
        Symbol::NONE
    }

    /// All qualified component symbols of a struct, ancestors included.
    pub fn components_of_struct(&self, strct: Symbol) -> Vec<Symbol> {
        let mut out = Vec::new();
        let mut cur = strct;
        while let Some(d) = self.vartype_data(cur) {
            out.extend(d.components.values().copied());
            cur = d.parent;
        }
        out
    }

    // ==========================================================================
    // Literals
    // ==========================================================================

    pub fn literal_value(&self, lit: Symbol) -> CodeCell {
        self.entry(lit).literal.map(|l| l.value).unwrap_or(0)
    }

    pub fn literal_vartype(&self, lit: Symbol) -> Symbol {
        self.entry(lit)
            .literal
            .map(|l| l.vartype)
            .unwrap_or(Symbol::NONE)
    }

    /// Intern an int literal, e.g. for fold results and enum items.
    pub fn find_or_add_int_literal(&mut self, value: CodeCell) -> Symbol {
        let name = value.to_string();
        let sym = self.find_or_add(&name);
        if self.entry(sym).literal.is_none() {
            self.entry_mut(sym).literal = Some(LiteralData {
                vartype: kw::INT,
                value,
            });
        }
        sym
    }

    /// Intern a float literal; the stored value is the bit pattern.
    pub fn find_or_add_float_literal(&mut self, value: f32) -> Symbol {
        let mut name = format!("{}", value);
        if !name.contains(|c| matches!(c, '.' | 'e' | 'E' | 'n' | 'i')) {
            // Keep "1.0" distinct from the int literal "1".
            name.push_str(".0");
        }
        let sym = self.find_or_add(&name);
        if self.entry(sym).literal.is_none() {
            self.entry_mut(sym).literal = Some(LiteralData {
                vartype: kw::FLOAT,
                value: value.to_bits() as CodeCell,
            });
        }
        sym
    }

    // ==========================================================================
    // Operators
    // ==========================================================================

    /// Priority of a symbol used as a prefix operator, if legal.
    pub fn prefix_op_prio(&self, sym: Symbol) -> Option<usize> {
        self.entry(sym).operator.as_ref()?.prefix_prio
    }

    /// Priority of a symbol used as a binary or postfix operator, if legal.
    pub fn binary_or_postfix_op_prio(&self, sym: Symbol) -> Option<usize> {
        self.entry(sym).operator.as_ref()?.binary_prio
    }

    pub fn operator(&self, sym: Symbol) -> Option<&OperatorData> {
        self.entry(sym).operator.as_ref()
    }

    /// Closing partner of an opening delimiter.
    pub fn delimiter_partner(&self, sym: Symbol) -> Symbol {
        self.entry(sym)
            .delimiter
            .map(|d| d.partner)
            .unwrap_or(Symbol::NONE)
    }

    // ==========================================================================
    // The string struct
    // ==========================================================================

    pub fn set_string_struct_sym(&mut self, sym: Symbol) {
        self.string_struct = sym;
        self.string_struct_ptr = None;
    }

    pub fn string_struct_sym(&self) -> Symbol {
        self.string_struct
    }

    /// The `String *` vartype, interned on first use.
    pub fn string_struct_ptr_sym(&mut self) -> Symbol {
        if let Some(sym) = self.string_struct_ptr {
            return sym;
        }
        if self.string_struct == Symbol::NONE {
            return Symbol::NONE;
        }
        let sym = self.vartype_with(VartypeShape::Dynpointer, self.string_struct);
        self.string_struct_ptr = Some(sym);
        sym
    }

    // ==========================================================================
    // Inter-pass reset
    // ==========================================================================

    /// Reset user entries between the pre-analyse and the main pass.
    ///
    /// Function headers survive (their offsets turn into the placeholder,
    /// the import flag is recovered from the declaration-state code), and
    /// literals survive. Everything else is stripped back to a bare name so
    /// that the main pass re-declares it under the same id.
    pub fn reinit_for_main_pass(&mut self) {
        for idx in (kw::LAST_PREDEFINED.index() + 1)..self.entries.len() {
            let entry = &mut self.entries[idx];
            if let Some(func) = entry.function.as_mut() {
                func.qualifiers
                    .set(TypeQualifiers::IMPORT, func.offset == FT_IMPORT);
                func.offset = CODE_CELL_PLACEHOLDER;
                continue;
            }
            if entry.literal.is_some() {
                continue;
            }
            entry.clear_roles();
        }
        self.string_struct_ptr = None;
    }

    // ==========================================================================
    // Predefined block
    // ==========================================================================

    fn add_vartype(&mut self, name: &str, size: usize) -> Symbol {
        let sym = self.add(name);
        self.entry_mut(sym).vartype = Some(VartypeData {
            size,
            base_vartype: Symbol::NONE,
            ..VartypeData::default()
        });
        sym
    }

    fn add_delimiter(&mut self, name: &str, partner: Symbol, is_opener: bool) -> Symbol {
        let sym = self.add(name);
        self.entry_mut(sym).delimiter = Some(DelimiterData { partner, is_opener });
        sym
    }

    fn add_operator(&mut self, name: &str, op: OperatorData) -> Symbol {
        let sym = self.add(name);
        self.entry_mut(sym).operator = Some(op);
        sym
    }

    fn seed_predefined(&mut self) {
        use self::consteval as ce;
        use crate::bytecode::Opcode as Op;

        debug_assert!(self.entries.is_empty());
        self.add(""); // Symbol::NONE

        self.add_delimiter("{", kw::CLOSE_BRACE, true);
        self.add_delimiter("}", kw::OPEN_BRACE, false);
        self.add_delimiter("[", kw::CLOSE_BRACKET, true);
        self.add_delimiter("]", kw::OPEN_BRACKET, false);
        self.add_delimiter("(", kw::CLOSE_PAREN, true);
        self.add_delimiter(")", kw::OPEN_PAREN, false);

        for punct in [".", ",", ";", ":", "::"] {
            self.add(punct);
        }

        // Compound assignment symbols carry the opcode variants of their
        // underlying operator but no expression priority: they terminate
        // expressions instead of appearing inside them.
        let assign_op = |int_opcode, float_opcode| OperatorData {
            int_opcode,
            float_opcode,
            ..OperatorData::default()
        };
        self.add("=");
        self.add_operator("+=", assign_op(Some(Op::AddReg), Some(Op::FAddReg)));
        self.add_operator("-=", assign_op(Some(Op::SubReg), Some(Op::FSubReg)));
        self.add_operator("*=", assign_op(Some(Op::MulReg), Some(Op::FMulReg)));
        self.add_operator("/=", assign_op(Some(Op::DivReg), Some(Op::FDivReg)));
        self.add_operator("&=", assign_op(Some(Op::BitAnd), None));
        self.add_operator("|=", assign_op(Some(Op::BitOr), None));
        self.add_operator("^=", assign_op(Some(Op::XorReg), None));
        self.add_operator("<<=", assign_op(Some(Op::ShiftLeft), None));
        self.add_operator(">>=", assign_op(Some(Op::ShiftRight), None));

        self.add_operator(
            "!",
            OperatorData {
                prefix_prio: Some(PRIO_PREFIX),
                int_eval: Some(ce::int_not),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "~",
            OperatorData {
                prefix_prio: Some(PRIO_PREFIX),
                int_eval: Some(ce::int_bitneg),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "+",
            OperatorData {
                prefix_prio: Some(PRIO_PREFIX),
                binary_prio: Some(PRIO_ADDITIVE),
                int_opcode: Some(Op::AddReg),
                float_opcode: Some(Op::FAddReg),
                int_eval: Some(ce::int_add),
                float_eval: Some(ce::float_add),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "-",
            OperatorData {
                prefix_prio: Some(PRIO_PREFIX),
                binary_prio: Some(PRIO_ADDITIVE),
                int_opcode: Some(Op::SubReg),
                float_opcode: Some(Op::FSubReg),
                int_eval: Some(ce::int_sub),
                float_eval: Some(ce::float_sub),
                ..OperatorData::default()
            },
        );
        // '*' doubles as the dynpointer marker in type contexts.
        self.add_operator(
            "*",
            OperatorData {
                binary_prio: Some(PRIO_MULTIPLICATIVE),
                int_opcode: Some(Op::MulReg),
                float_opcode: Some(Op::FMulReg),
                int_eval: Some(ce::int_mul),
                float_eval: Some(ce::float_mul),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "/",
            OperatorData {
                binary_prio: Some(PRIO_MULTIPLICATIVE),
                int_opcode: Some(Op::DivReg),
                float_opcode: Some(Op::FDivReg),
                int_eval: Some(ce::int_div),
                float_eval: Some(ce::float_div),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "%",
            OperatorData {
                binary_prio: Some(PRIO_MULTIPLICATIVE),
                int_opcode: Some(Op::ModReg),
                int_eval: Some(ce::int_mod),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "<<",
            OperatorData {
                binary_prio: Some(PRIO_SHIFT),
                int_opcode: Some(Op::ShiftLeft),
                int_eval: Some(ce::int_shl),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            ">>",
            OperatorData {
                binary_prio: Some(PRIO_SHIFT),
                int_opcode: Some(Op::ShiftRight),
                int_eval: Some(ce::int_shr),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "<",
            OperatorData {
                binary_prio: Some(PRIO_RELATIONAL),
                int_opcode: Some(Op::LessThan),
                float_opcode: Some(Op::FLessThan),
                int_eval: Some(ce::int_lt),
                float_eval: Some(ce::float_lt),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            ">",
            OperatorData {
                binary_prio: Some(PRIO_RELATIONAL),
                int_opcode: Some(Op::Greater),
                float_opcode: Some(Op::FGreater),
                int_eval: Some(ce::int_gt),
                float_eval: Some(ce::float_gt),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "<=",
            OperatorData {
                binary_prio: Some(PRIO_RELATIONAL),
                int_opcode: Some(Op::Lte),
                float_opcode: Some(Op::FLte),
                int_eval: Some(ce::int_le),
                float_eval: Some(ce::float_le),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            ">=",
            OperatorData {
                binary_prio: Some(PRIO_RELATIONAL),
                int_opcode: Some(Op::Gte),
                float_opcode: Some(Op::FGte),
                int_eval: Some(ce::int_ge),
                float_eval: Some(ce::float_ge),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "==",
            OperatorData {
                binary_prio: Some(PRIO_EQUALITY),
                int_opcode: Some(Op::IsEqual),
                float_opcode: Some(Op::IsEqual),
                dyn_opcode: Some(Op::IsEqual),
                string_opcode: Some(Op::StringsEqual),
                int_eval: Some(ce::int_eq),
                float_eval: Some(ce::float_eq),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "!=",
            OperatorData {
                binary_prio: Some(PRIO_EQUALITY),
                int_opcode: Some(Op::NotEqual),
                float_opcode: Some(Op::NotEqual),
                dyn_opcode: Some(Op::NotEqual),
                string_opcode: Some(Op::StringsNotEq),
                int_eval: Some(ce::int_ne),
                float_eval: Some(ce::float_ne),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "&",
            OperatorData {
                binary_prio: Some(PRIO_BITAND),
                int_opcode: Some(Op::BitAnd),
                int_eval: Some(ce::int_bitand),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "^",
            OperatorData {
                binary_prio: Some(PRIO_BITXOR),
                int_opcode: Some(Op::XorReg),
                int_eval: Some(ce::int_bitxor),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "|",
            OperatorData {
                binary_prio: Some(PRIO_BITOR),
                int_opcode: Some(Op::BitOr),
                int_eval: Some(ce::int_bitor),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "&&",
            OperatorData {
                binary_prio: Some(PRIO_AND),
                int_opcode: Some(Op::And),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "||",
            OperatorData {
                binary_prio: Some(PRIO_OR),
                int_opcode: Some(Op::Or),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "?",
            OperatorData {
                binary_prio: Some(PRIO_TERNARY),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "++",
            OperatorData {
                prefix_prio: Some(PRIO_PREFIX),
                binary_prio: Some(PRIO_POSTFIX),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "--",
            OperatorData {
                prefix_prio: Some(PRIO_PREFIX),
                binary_prio: Some(PRIO_POSTFIX),
                ..OperatorData::default()
            },
        );
        self.add_operator(
            "new",
            OperatorData {
                prefix_prio: Some(PRIO_PREFIX),
                ..OperatorData::default()
            },
        );

        // 'this' is a variable whose vartype is set while a method body is
        // open and cleared afterwards.
        let this = self.add("this");
        self.entry_mut(this).variable = Some(VariableData::default());

        // 'null' is a literal whose vartype is the null symbol itself.
        let null = self.add("null");
        self.entry_mut(null).literal = Some(LiteralData {
            vartype: kw::NULL,
            value: 0,
        });

        for keyword in [
            "if",
            "else",
            "while",
            "do",
            "for",
            "switch",
            "case",
            "default",
            "fallthrough",
            "break",
            "continue",
            "return",
            "struct",
            "enum",
            "extends",
            "export",
            "attribute",
            "autoptr",
            "builtin",
            "const",
            "import",
            "_tryimport",
            "internalstring",
            "managed",
            "protected",
            "readonly",
            "static",
            "writeprotected",
            "noloopcheck",
            "...",
        ] {
            self.add(keyword);
        }

        self.add_vartype("void", 0);
        self.add_vartype("char", 1);
        self.add_vartype("short", 2);
        self.add_vartype("int", SIZE_OF_INT);
        self.add_vartype("long", SIZE_OF_INT);
        self.add_vartype("float", 4);
        self.add_vartype("string", scom_core::STRINGBUFFER_LENGTH);

        debug_assert_eq!(self.entries.len() - 1, kw::LAST_PREDEFINED.index());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_ids_match_their_constants() {
        let sym = SymbolTable::new();
        assert_eq!(sym.find("{"), Some(kw::OPEN_BRACE));
        assert_eq!(sym.find("::"), Some(kw::SCOPE_RES));
        assert_eq!(sym.find("*"), Some(kw::DYNPOINTER));
        assert_eq!(sym.find("?"), Some(kw::TERN));
        assert_eq!(sym.find("new"), Some(kw::NEW));
        assert_eq!(sym.find("this"), Some(kw::THIS));
        assert_eq!(sym.find("null"), Some(kw::NULL));
        assert_eq!(sym.find("fallthrough"), Some(kw::FALLTHROUGH));
        assert_eq!(sym.find("_tryimport"), Some(kw::TRYIMPORT));
        assert_eq!(sym.find("internalstring"), Some(kw::INTERNALSTRING));
        assert_eq!(sym.find("..."), Some(kw::DOTDOTDOT));
        assert_eq!(sym.find("string"), Some(kw::STRING));
    }

    #[test]
    fn user_symbols_follow_the_predefined_block() {
        let mut sym = SymbolTable::new();
        let foo = sym.find_or_add("foo");
        assert!(foo > kw::LAST_PREDEFINED);
        assert_eq!(sym.find_or_add("foo"), foo);
        assert!(sym.is_identifier(foo));
        assert!(!sym.is_identifier(kw::IF));
    }

    #[test]
    fn vartype_algebra_round_trips() {
        let mut sym = SymbolTable::new();
        for modifier in [
            VartypeShape::Const,
            VartypeShape::Dynpointer,
            VartypeShape::Dynarray,
        ] {
            let with = sym.vartype_with(modifier, kw::INT);
            assert_ne!(with, kw::INT);
            // Idempotent.
            assert_eq!(sym.vartype_with(modifier, with), with);
            // Total inverse on carriers of the modifier.
            let without = sym.vartype_without(modifier, with);
            assert_eq!(without, kw::INT);
            assert_eq!(sym.vartype_with(modifier, without), with);
        }
        // Stripping a modifier that isn't there is the identity.
        assert_eq!(sym.vartype_without(VartypeShape::Dynarray, kw::INT), kw::INT);
    }

    #[test]
    fn derived_vartype_sizes() {
        let mut sym = SymbolTable::new();
        let ptr = sym.vartype_with(VartypeShape::Dynpointer, kw::INT);
        let arr = sym.vartype_with_array(&[3, 5], kw::INT);
        let dynarr = sym.vartype_with(VartypeShape::Dynarray, kw::SHORT);
        assert_eq!(sym.get_size(ptr), SIZE_OF_DYNPOINTER);
        assert_eq!(sym.get_size(arr), 3 * 5 * 4);
        assert_eq!(sym.num_array_elements(arr), 15);
        assert_eq!(sym.get_size(dynarr), SIZE_OF_DYNPOINTER);
        assert!(sym.is_dyn_vartype(dynarr));
        assert!(sym.is_array_vartype(arr));
        assert!(!sym.is_dyn_vartype(arr));
    }

    #[test]
    fn component_lookup_walks_the_parent_chain() {
        let mut sym = SymbolTable::new();
        let base = sym.find_or_add("Base");
        let derived = sym.find_or_add("Derived");
        let x = sym.find_or_add("x");
        let base_x = sym.find_or_add("Base::x");
        for s in [base, derived] {
            sym.make_entry_vartype(s);
            sym.entry_mut(s).vartype.as_mut().unwrap().flags |=
                VartypeFlags::STRUCT;
        }
        sym.entry_mut(derived).vartype.as_mut().unwrap().parent = base;
        sym.entry_mut(base)
            .vartype
            .as_mut()
            .unwrap()
            .components
            .insert(x, base_x);

        assert_eq!(sym.find_component_in_struct(derived, x), base_x);
        assert_eq!(sym.find_struct_of_component(derived, x), base);
        let y = sym.find_or_add("y");
        assert_eq!(
            sym.find_component_in_struct(derived, y),
            Symbol::NONE
        );
    }

    #[test]
    fn int_and_float_literals_intern() {
        let mut sym = SymbolTable::new();
        let a = sym.find_or_add_int_literal(42);
        let b = sym.find_or_add_int_literal(42);
        assert_eq!(a, b);
        assert_eq!(sym.literal_value(a), 42);
        assert_eq!(sym.literal_vartype(a), kw::INT);

        let f = sym.find_or_add_float_literal(1.0);
        // "1.0" must not collide with the int literal "1".
        assert_ne!(f, sym.find_or_add_int_literal(1));
        assert_eq!(sym.literal_vartype(f), kw::FLOAT);
        assert_eq!(sym.literal_value(f), 1.0f32.to_bits() as CodeCell);
    }

    #[test]
    fn reinit_keeps_function_headers_and_literals() {
        let mut sym = SymbolTable::new();
        let f = sym.find_or_add("f");
        sym.make_entry_function(f);
        {
            let func = sym.entry_mut(f).function.as_mut().unwrap();
            func.parameters.push(FuncParam {
                vartype: kw::INT,
                ..FuncParam::default()
            });
            func.offset = FT_IMPORT;
        }
        let lit = sym.find_or_add_int_literal(7);
        let v = sym.find_or_add("v");
        sym.make_entry_variable(v);

        sym.reinit_for_main_pass();

        let func = sym.entry(f).function.as_ref().unwrap();
        assert!(func.qualifiers.contains(TypeQualifiers::IMPORT));
        assert_eq!(func.offset, CODE_CELL_PLACEHOLDER);
        assert_eq!(func.parameters.len(), 1);
        assert!(sym.is_literal(lit));
        assert!(!sym.is_variable(v));
        // Names and hence ids survive.
        assert_eq!(sym.find("v"), Some(v));
    }

    #[test]
    fn string_struct_registration() {
        let mut sym = SymbolTable::new();
        assert_eq!(sym.string_struct_ptr_sym(), Symbol::NONE);
        let strct = sym.find_or_add("String");
        sym.make_entry_vartype(strct);
        sym.entry_mut(strct).vartype.as_mut().unwrap().flags |=
            VartypeFlags::STRUCT | VartypeFlags::MANAGED;
        sym.set_string_struct_sym(strct);
        let ptr = sym.string_struct_ptr_sym();
        assert_eq!(sym.vartype_without(VartypeShape::Dynpointer, ptr), strct);
        assert!(sym.is_any_string_vartype(ptr));
        assert!(sym.is_any_string_vartype(kw::STRING));
        assert!(!sym.is_any_string_vartype(kw::INT));
    }

    #[test]
    fn assignment_symbols_stay_out_of_expressions() {
        let sym = SymbolTable::new();
        assert!(!sym.can_be_part_of_expression(kw::ASSIGN_PLUS));
        assert!(sym.can_be_part_of_expression(kw::PLUS));
        assert!(sym.can_be_part_of_expression(kw::NULL));
        assert!(sym.can_be_part_of_expression(kw::THIS));
        assert!(!sym.can_be_part_of_expression(kw::SEMICOLON));
    }

    #[test]
    fn enum_vartypes_count_as_integer() {
        let mut sym = SymbolTable::new();
        let e = sym.find_or_add("Fruit");
        sym.make_entry_vartype(e);
        {
            let d = sym.entry_mut(e).vartype.as_mut().unwrap();
            d.flags |= VartypeFlags::ENUM;
            d.size = SIZE_OF_INT;
            d.base_vartype = kw::INT;
        }
        assert!(sym.is_any_integer_vartype(e));
        assert!(sym.is_any_integer_vartype(kw::CHAR));
        assert!(!sym.is_any_integer_vartype(kw::FLOAT));
    }
}
