//! Symbol-table entries and their role records.
//!
//! An entry starts as a bare interned name and gains role records as
//! declarations come in. Roles can coexist: a struct component is a
//! component *and* a variable or function; an enum name is a vartype whose
//! items are constants. Between the two compiler passes the role records of
//! user symbols are dropped while names (and thus ids) stay put.

use rustc_hash::FxHashMap;
use scom_core::{TypeQualifiers, VartypeFlags};

use crate::bytecode::{CodeCell, Opcode};

use super::Symbol;

/// Scope depth reserved for function parameters.
pub const PARAMETER_SCOPE: usize = 1;
/// Scope depth of a function body's outermost block.
pub const FUNCTION_SCOPE: usize = 2;

/// Result of a compile-time operator evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CtValue {
    Int(CodeCell),
    Float(f32),
}

/// Compile-time evaluator over two int literals.
pub type IntEval = fn(CodeCell, CodeCell) -> Result<CtValue, String>;
/// Compile-time evaluator over two float literals.
pub type FloatEval = fn(f32, f32) -> Result<CtValue, String>;

/// Variable role: where the value lives and what it is.
#[derive(Debug, Clone, Default)]
pub struct VariableData {
    pub vartype: Symbol,
    /// Byte offset; meaning depends on the scope type (global-data offset,
    /// stack offset from the frame base, or import index).
    pub offset: usize,
    pub qualifiers: TypeQualifiers,
}

/// One function parameter; slot 0 of the parameter list is the return type.
#[derive(Debug, Clone, Default)]
pub struct FuncParam {
    pub name: Symbol,
    pub vartype: Symbol,
    /// Literal symbol of the default value, `Symbol::NONE` when absent.
    pub default: Symbol,
}

/// Function role.
#[derive(Debug, Clone, Default)]
pub struct FunctionData {
    /// `[0]` is the return type; real parameters follow.
    pub parameters: Vec<FuncParam>,
    pub is_variadic: bool,
    pub qualifiers: TypeQualifiers,
    /// Code offset for local functions, import index for imports. During
    /// the pre-analyse pass this holds a `FunctionType` code instead.
    pub offset: CodeCell,
    pub no_loop_check: bool,
}

/// How a vartype entry was constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VartypeShape {
    /// A primitive, struct, or enum type.
    #[default]
    Atomic,
    /// `const T`
    Const,
    /// `T *` — a managed reference.
    Dynpointer,
    /// `T[]` — a reference-counted dynamic array.
    Dynarray,
    /// `T[n,m,...]` — a static array with compile-time dimensions.
    Array,
}

/// Vartype role.
#[derive(Debug, Clone, Default)]
pub struct VartypeData {
    pub shape: VartypeShape,
    /// Size of one value of this type, in bytes.
    pub size: usize,
    /// Parent struct for inheritance, `Symbol::NONE` at the root.
    pub parent: Symbol,
    /// Element type for arrays/dynarrays, base type for const/dynpointer,
    /// `int` for enums.
    pub base_vartype: Symbol,
    /// Dimension vector for static arrays.
    pub dims: Vec<usize>,
    /// Unqualified component name -> qualified component symbol.
    pub components: FxHashMap<Symbol, Symbol>,
    pub flags: VartypeFlags,
}

/// Literal role. Floats are bit-reinterpreted into the int value; strings
/// carry their first-byte offset into the string pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralData {
    pub vartype: Symbol,
    pub value: CodeCell,
}

/// Compile-time constant role: an alias for a literal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantData {
    pub value_sym: Symbol,
}

/// Component role: membership of a struct.
#[derive(Debug, Clone, Default)]
pub struct ComponentData {
    /// The struct this is a component of.
    pub parent: Symbol,
    /// The unqualified name symbol.
    pub component: Symbol,
    pub is_function: bool,
    /// Byte offset of a data component within its struct.
    pub offset: usize,
}

/// Operator role: priorities and per-operand-type opcode variants.
///
/// Larger priority numbers bind less tightly; the expression splitter picks
/// the largest priority at nesting depth zero.
#[derive(Debug, Clone, Default)]
pub struct OperatorData {
    pub prefix_prio: Option<usize>,
    pub binary_prio: Option<usize>,
    pub int_opcode: Option<Opcode>,
    pub float_opcode: Option<Opcode>,
    pub dyn_opcode: Option<Opcode>,
    pub string_opcode: Option<Opcode>,
    pub int_eval: Option<IntEval>,
    pub float_eval: Option<FloatEval>,
}

/// Delimiter role: `{`<->`}`, `(`<->`)`, `[`<->`]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimiterData {
    pub partner: Symbol,
    pub is_opener: bool,
}

/// One symbol-table entry.
#[derive(Debug, Default)]
pub struct SymbolEntry {
    pub name: String,
    /// Source cursor position of the declaration, for "see line N" hints.
    pub declared: Option<usize>,
    /// Nesting level the symbol was declared at.
    pub scope: usize,
    /// Whether the program ever used the symbol (drives import pruning).
    pub accessed: bool,

    pub variable: Option<VariableData>,
    pub function: Option<FunctionData>,
    pub vartype: Option<VartypeData>,
    pub literal: Option<LiteralData>,
    pub constant: Option<ConstantData>,
    pub component: Option<ComponentData>,
    pub operator: Option<OperatorData>,
    pub delimiter: Option<DelimiterData>,
}

impl SymbolEntry {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Whether any declaration has claimed this name.
    pub fn is_in_use(&self) -> bool {
        self.variable.is_some()
            || self.function.is_some()
            || self.vartype.is_some()
            || self.literal.is_some()
            || self.constant.is_some()
            || self.component.is_some()
    }

    /// Drop all user-facing roles, keeping the name (and hence the id).
    pub fn clear_roles(&mut self) {
        self.declared = None;
        self.scope = 0;
        self.accessed = false;
        self.variable = None;
        self.function = None;
        self.vartype = None;
        self.literal = None;
        self.constant = None;
        self.component = None;
    }

    /// A deep copy used for shadow stashing; restoring it brings the old
    /// definition back verbatim.
    pub fn snapshot(&self) -> SymbolEntry {
        SymbolEntry {
            name: self.name.clone(),
            declared: self.declared,
            scope: self.scope,
            accessed: self.accessed,
            variable: self.variable.clone(),
            function: self.function.clone(),
            vartype: self.vartype.clone(),
            literal: self.literal,
            constant: self.constant,
            component: self.component.clone(),
            operator: self.operator.clone(),
            delimiter: self.delimiter,
        }
    }

    /// Overwrite this entry with a previously taken snapshot.
    pub fn restore(&mut self, snap: SymbolEntry) {
        *self = snap;
    }
}
