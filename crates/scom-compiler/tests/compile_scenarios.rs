//! End-to-end compilation scenarios.

mod common;

use common::{compile, compile_err, compile_ok, compile_with};
use scom_compiler::bytecode::{FixupType, Opcode, Register};
use scom_compiler::Options;

// ============================================================================
// Constant folding and dead-branch elimination
// ============================================================================

#[test]
fn constant_folding_eliminates_arithmetic_and_branches() {
    let compiled = compile_ok("int main() { return 2 + 3 * 4 > 10 ? 42 : 0; }");

    let ops = compiled.function_opcodes("main");
    // The whole expression folds: no arithmetic, no comparisons, no
    // conditional jumps survive.
    for op in [
        Opcode::AddReg,
        Opcode::MulReg,
        Opcode::Greater,
        Opcode::Jz,
        Opcode::Jnz,
        Opcode::Jmp,
    ] {
        assert!(!ops.contains(&op), "unexpected {} in {:?}", op.name(), ops);
    }

    // What remains loads 42 and returns.
    let code = compiled.function_code("main");
    assert!(
        code.contains(&(Opcode::LitToReg, vec![Register::Ax.cell(), 42])),
        "expected the folded 42 in {:?}",
        code
    );
    assert_eq!(code.last().map(|(op, _)| *op), Some(Opcode::Ret));

    assert_eq!(compiled.scrip.functions.len(), 1);
    assert_eq!(compiled.scrip.functions[0].name, "main");
    assert_eq!(compiled.scrip.functions[0].num_params, 0);
}

// ============================================================================
// Forward reference resolution
// ============================================================================

#[test]
fn forward_declared_function_call_is_patched() {
    let compiled = compile_ok("int b(); int a() { return b() + 1; } int b() { return 7; }");

    let b_offset = compiled
        .scrip
        .functions
        .iter()
        .find(|f| f.name == "b")
        .expect("function b")
        .code_offset;

    // The call in a() loads b's code offset, with a Code fixup on the cell.
    let a_code = compiled.function_code("a");
    let call_load = a_code
        .iter()
        .position(|(op, _)| *op == Opcode::Call)
        .and_then(|idx| a_code.get(idx - 1))
        .expect("CALL preceded by the address load");
    assert_eq!(call_load.0, Opcode::LitToReg);
    assert_eq!(call_load.1, vec![Register::Ax.cell(), b_offset as i32]);

    assert!(
        compiled
            .scrip
            .fixups
            .iter()
            .any(|f| f.kind == FixupType::Code && compiled.scrip.code[f.code_index] == b_offset as i32),
        "expected a Code fixup pointing at b's offset"
    );

    // No exports without an `export` clause.
    assert!(compiled.scrip.exports.is_empty());
}

#[test]
fn function_defined_after_use_resolves_without_forward_decl() {
    let compiled = compile_ok("int a() { return b(); } int b() { return 7; }");
    let b_offset = compiled
        .scrip
        .functions
        .iter()
        .find(|f| f.name == "b")
        .expect("function b")
        .code_offset;
    let a_code = compiled.function_code("a");
    assert!(a_code.contains(&(Opcode::LitToReg, vec![Register::Ax.cell(), b_offset as i32])));
}

#[test]
fn unresolved_forward_reference_is_reported() {
    let compiled = compile_err("int b(); int a() { return b(); }");
    let msg = compiled.error_message();
    assert!(
        msg.contains("b()") && msg.contains("defined"),
        "unexpected message: {}",
        msg
    );
}

// ============================================================================
// Dynamic-array Length via a synthesised import
// ============================================================================

#[test]
fn dynarray_length_uses_the_builtin_import() {
    let compiled = compile_ok("int sum(int[] xs) { return xs.Length; }");

    let import_idx = compiled
        .scrip
        .imports
        .iter()
        .position(|name| name == "__Builtin_DynamicArrayLength^1")
        .expect("the synthesised import");

    let ops = compiled.function_opcodes("sum");
    let pushreal = ops
        .iter()
        .position(|&op| op == Opcode::PushReal)
        .expect("PUSHREAL of the array address");
    let callext = ops
        .iter()
        .position(|&op| op == Opcode::CallExt)
        .expect("CALLEXT of the length function");
    assert!(pushreal < callext);
    assert!(
        compiled
            .function_code("sum")
            .contains(&(Opcode::SubRealStack, vec![1])),
        "the far stack shrinks by the one argument"
    );

    // The address load carries an Import fixup pointing at the entry.
    assert!(compiled.scrip.fixups.iter().any(|f| f.kind == FixupType::Import
        && compiled.scrip.code[f.code_index] == import_idx as i32));
}

// ============================================================================
// Yanked `for` increment
// ============================================================================

#[test]
fn for_increment_is_emitted_once_at_the_loop_bottom() {
    let compiled = compile_ok(
        "int f() { int s = 0; for (int i = 0; i < 3; i = i + 1) { s = s + i; } return s; }",
    );
    let code = compiled.function_code("f");
    let ops: Vec<Opcode> = code.iter().map(|(op, _)| *op).collect();

    // Both `s = s + i` and `i = i + 1` compile to one ADDREG each; the
    // increment exists exactly once in the whole body.
    let addreg_count = ops.iter().filter(|&&op| op == Opcode::AddReg).count();
    assert_eq!(addreg_count, 2, "body + increment, nothing duplicated");

    // The loop shape: the conditional exit jump comes first, the backward
    // jump last, and both additions lie between them. Were the increment
    // still between header and body, only one ADDREG would sit inside.
    let jz = ops.iter().position(|&op| op == Opcode::Jz).expect("loop exit");
    let jmp_back = ops.iter().rposition(|&op| op == Opcode::Jmp).expect("loop jump");
    let inside = ops[jz..jmp_back]
        .iter()
        .filter(|&&op| op == Opcode::AddReg)
        .count();
    assert_eq!(inside, 2, "the increment sits after the body, inside the loop");
}

// ============================================================================
// Readonly attributes
// ============================================================================

#[test]
fn assigning_to_a_readonly_attribute_is_rejected() {
    let compiled = compile_err(
        "managed struct Point { readonly attribute int X; };
         int bad(Point *p) { p.X = 1; return 0; }",
    );
    let msg = compiled.error_message();
    assert!(
        msg.contains("readonly attribute") && msg.contains("X"),
        "unexpected message: {}",
        msg
    );
    // No setter was ever synthesised.
    assert!(compiled.sym.find("set_X").is_none());
    assert!(compiled.sym.find("Point::set_X").is_none());
}

#[test]
fn reading_an_attribute_calls_the_getter() {
    let compiled = compile_ok(
        "managed struct Point { readonly attribute int X; };
         int good(Point *p) { return p.X; }",
    );
    assert!(
        compiled
            .scrip
            .imports
            .iter()
            .any(|name| name == "Point::get_X^0"),
        "imports: {:?}",
        compiled.scrip.imports
    );
    let ops = compiled.function_opcodes("good");
    assert!(ops.contains(&Opcode::CallExt));
}

// ============================================================================
// Shadowed locals
// ============================================================================

#[test]
fn shadowed_local_is_restored_on_block_exit() {
    let compiled = compile_ok("int f() { int x = 1; { int x = 2; } return x; }");

    let code = compiled.function_code("f");
    let ops: Vec<Opcode> = code.iter().map(|(op, _)| *op).collect();

    // x isn't managed, so no pointer release happens anywhere.
    assert!(!ops.contains(&Opcode::MemZeroPtr));

    // The inner block pops its x, and the return pops the outer x: two
    // separate one-cell stack shrinks.
    let shrinks = code
        .iter()
        .filter(|(op, args)| *op == Opcode::Sub && args == &vec![Register::Sp.cell(), 4])
        .count();
    assert_eq!(shrinks, 2);

    // The returned value is read from the outer x's slot: the same SP
    // offset that the initial store used.
    assert!(ops.contains(&Opcode::MemRead));
}

#[test]
fn redeclaring_in_the_same_scope_is_rejected() {
    let compiled = compile_err("int f() { int x = 1; int x = 2; return x; }");
    assert!(compiled.error_message().contains("already been defined"));
}

// ============================================================================
// Managed locals release their pointers
// ============================================================================

#[test]
fn managed_local_gets_memzeroptr_on_scope_exit() {
    let compiled = compile_ok(
        "managed struct Obj { int val; };
         int f() { Obj *o = new Obj; return 0; }",
    );
    let ops = compiled.function_opcodes("f");
    assert!(ops.contains(&Opcode::NewUserObject));
    assert!(
        ops.contains(&Opcode::MemZeroPtr),
        "the local pointer must be released before the stack shrinks: {:?}",
        ops
    );
}

#[test]
fn returning_a_managed_value_uses_the_no_dealloc_release() {
    let compiled = compile_ok(
        "managed struct Obj { int val; };
         Obj *make() { Obj *o = new Obj; return o; }",
    );
    let ops = compiled.function_opcodes("make");
    assert!(
        ops.contains(&Opcode::MemZeroPtrNd),
        "the returned reference must survive the local release: {:?}",
        ops
    );
}

// ============================================================================
// Imports, exports, pruning
// ============================================================================

#[test]
fn imported_function_calls_go_through_the_far_stack() {
    let compiled = compile_ok(
        "import int GetTime(int which);
         int f() { return GetTime(1); }",
    );
    assert!(compiled.scrip.imports.iter().any(|name| name == "GetTime"));
    let ops = compiled.function_opcodes("f");
    for op in [Opcode::NumFuncArgs, Opcode::PushReal, Opcode::CallExt, Opcode::SubRealStack] {
        assert!(ops.contains(&op), "missing {} in {:?}", op.name(), ops);
    }
}

#[test]
fn unused_imports_are_blanked_but_keep_their_slot() {
    let compiled = compile_ok(
        "import int GetTime(int which);
         import int GetTick();
         int f() { return GetTick(); }",
    );
    // GetTime was never accessed: its name slot is blanked, not removed.
    assert_eq!(compiled.scrip.imports[0], "");
    assert!(compiled.scrip.imports.iter().any(|name| name == "GetTick"));
}

#[test]
fn export_clause_fills_the_export_table() {
    let compiled = compile_ok("int f() { return 1; } export f;");
    assert_eq!(compiled.scrip.exports.len(), 1);
    assert_eq!(compiled.scrip.exports[0].name, "f");
    assert_eq!(compiled.scrip.exports[0].args, Some(0));
}

#[test]
fn export_all_exports_every_function() {
    let compiled = compile_with(
        "int f() { return 1; } int g() { return 2; }",
        Options::EXPORT_ALL,
    );
    assert!(compiled.ok);
    let names: Vec<&str> = compiled.scrip.exports.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["f", "g"]);
}

// ============================================================================
// Boundary behaviour
// ============================================================================

#[test]
fn parameter_count_boundary() {
    // 15 parameters compile...
    let params: Vec<String> = (0..15).map(|i| format!("int p{}", i)).collect();
    let source = format!("int f({}) {{ return 0; }}", params.join(", "));
    assert!(compile(&source).ok);

    // ...one more is rejected.
    let params: Vec<String> = (0..16).map(|i| format!("int p{}", i)).collect();
    let source = format!("int f({}) {{ return 0; }}", params.join(", "));
    let compiled = compile_err(&source);
    assert!(compiled.error_message().contains("Too many parameters"));
}

#[test]
fn string_initialiser_length_boundary() {
    let just_fits = "x".repeat(199);
    let source = format!("string s = \"{}\";", just_fits);
    assert!(compile_with(&source, Options::OLD_STRINGS).ok);

    let too_long = "x".repeat(200);
    let source = format!("string s = \"{}\";", too_long);
    let compiled = compile_with(&source, Options::OLD_STRINGS);
    assert!(!compiled.ok);
    assert!(compiled.error_message().contains("too long"));
}

#[test]
fn old_strings_require_the_option() {
    let compiled = compile_err("string s;");
    assert!(compiled.error_message().contains("'string'"));
}

#[test]
fn zero_or_negative_array_dimension_is_rejected() {
    let compiled = compile_err("int f() { int a[0]; return 0; }");
    assert!(compiled.error_message().contains("at least 1"));

    let compiled = compile_err("int f() { int a[0 - 3]; return 0; }");
    assert!(compiled.error_message().contains("at least 1"));
}

#[test]
fn switch_without_clauses_compiles_to_nothing() {
    let compiled = compile_ok("int f(int x) { switch (x) { } return 0; }");
    let ops = compiled.function_opcodes("f");
    // The expression was rolled back along with the switch head.
    assert!(!ops.contains(&Opcode::Jmp));
    assert!(!ops.contains(&Opcode::IsEqual));
}
