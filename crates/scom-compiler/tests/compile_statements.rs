//! Statement, struct, and declaration coverage.

mod common;

use common::{compile_err, compile_ok};
use scom_compiler::bytecode::{FixupType, Opcode, Register};

// ============================================================================
// Control flow
// ============================================================================

#[test]
fn if_else_chain_compiles() {
    let compiled = compile_ok(
        "int sign(int x) { if (x < 0) return 0 - 1; else if (x > 0) return 1; return 0; }",
    );
    let ops = compiled.function_opcodes("sign");
    assert!(ops.contains(&Opcode::Jz));
    assert!(ops.contains(&Opcode::LessThan));
    assert!(ops.contains(&Opcode::Greater));
}

#[test]
fn while_loop_with_break_and_continue() {
    let compiled = compile_ok(
        "int f() {
             int i = 0;
             int s = 0;
             while (i < 10) {
                 i = i + 1;
                 if (i == 5) continue;
                 if (i > 8) break;
                 s = s + i;
             }
             return s;
         }",
    );
    let ops = compiled.function_opcodes("f");
    assert!(ops.contains(&Opcode::Jz), "loop exit test");
    assert!(ops.contains(&Opcode::IsEqual));
    // Backward jumps: the loop itself plus the continue.
    let jmp_count = ops.iter().filter(|&&op| op == Opcode::Jmp).count();
    assert!(jmp_count >= 2, "loop and continue jumps in {:?}", ops);
}

#[test]
fn do_while_loops_back_on_jnz() {
    let compiled = compile_ok("int f() { int i = 0; do i = i + 1; while (i < 3); return i; }");
    let ops = compiled.function_opcodes("f");
    assert!(ops.contains(&Opcode::Jnz));
}

#[test]
fn switch_dispatches_through_a_jump_table() {
    let compiled = compile_ok(
        "int f(int x) {
             int r = 0;
             switch (x) {
                 case 1: r = 10; break;
                 case 2: r = 20; break;
                 default: r = 99;
             }
             return r;
         }",
    );
    let code = compiled.function_code("f");
    let ops: Vec<Opcode> = code.iter().map(|(op, _)| *op).collect();

    // The switch value moves to BX once.
    assert!(code.contains(&(
        Opcode::RegToReg,
        vec![Register::Ax.cell(), Register::Bx.cell()]
    )));
    // One equality test per non-default case, each followed by a JNZ back
    // into the case body.
    let eq_count = ops.iter().filter(|&&op| op == Opcode::IsEqual).count();
    assert_eq!(eq_count, 2);
    let jnz_count = ops.iter().filter(|&&op| op == Opcode::Jnz).count();
    assert_eq!(jnz_count, 2);
}

#[test]
fn fallthrough_suppresses_the_case_warning() {
    let with_fallthrough = compile_ok(
        "int f(int x) {
             int r = 0;
             switch (x) {
                 case 1: r = 1; fallthrough;
                 case 2: r = 2; break;
             }
             return r;
         }",
    );
    assert!(
        !with_fallthrough
            .diag
            .warnings()
            .any(|w| w.message.contains("fall through")),
        "no warning when fallthrough is explicit"
    );

    let without = compile_ok(
        "int f(int x) {
             int r = 0;
             switch (x) {
                 case 1: r = 1;
                 case 2: r = 2; break;
             }
             return r;
         }",
    );
    assert!(
        without
            .diag
            .warnings()
            .any(|w| w.message.contains("fall through")),
        "warnings: {:?}",
        without.diag.entries()
    );
}

#[test]
fn unreachable_code_is_warned_about() {
    let compiled = compile_ok("int f() { return 1; int x = 2; return x; }");
    assert!(compiled
        .diag
        .warnings()
        .any(|w| w.message.contains("cannot reach")));
}

#[test]
fn ternary_with_runtime_test_branches() {
    let compiled = compile_ok("int f(int x) { return x ? 1 : 2; }");
    let ops = compiled.function_opcodes("f");
    assert!(ops.contains(&Opcode::Jz));
    assert!(ops.contains(&Opcode::Jmp));
}

#[test]
fn logical_and_short_circuits() {
    let compiled = compile_ok("int f(int a, int b) { return a && b; }");
    let ops = compiled.function_opcodes("f");
    assert!(ops.contains(&Opcode::Jz), "short-circuit exit in {:?}", ops);
    assert!(ops.contains(&Opcode::And));
}

#[test]
fn break_outside_a_loop_is_rejected() {
    let compiled = compile_err("int f() { break; return 0; }");
    assert!(compiled.error_message().contains("'break'"));
}

// ============================================================================
// Declarations
// ============================================================================

#[test]
fn global_variable_with_initialiser() {
    let compiled = compile_ok("int counter = 7; int get() { return counter; }");
    assert_eq!(&compiled.scrip.globaldata[0..4], &7i32.to_le_bytes());
    assert!(compiled
        .scrip
        .fixups
        .iter()
        .any(|f| f.kind == FixupType::GlobalData));
    let ops = compiled.function_opcodes("get");
    assert!(ops.contains(&Opcode::MemRead));
}

#[test]
fn enum_items_are_compile_time_constants() {
    let compiled = compile_ok(
        "enum Fruit { Apple, Pear = 5, Plum };
         int f() { return Plum; }",
    );
    let code = compiled.function_code("f");
    assert!(
        code.contains(&(Opcode::LitToReg, vec![Register::Ax.cell(), 6])),
        "Plum follows Pear = 5: {:?}",
        code
    );
}

#[test]
fn const_defines_a_compile_time_constant() {
    let compiled = compile_ok(
        "const int LIMIT = 3 * 7;
         int f() { return LIMIT; }",
    );
    let code = compiled.function_code("f");
    assert!(code.contains(&(Opcode::LitToReg, vec![Register::Ax.cell(), 21])));
}

#[test]
fn float_arithmetic_folds_to_bit_patterns() {
    let compiled = compile_ok("float f() { return 1.5 + 2.5; }");
    let code = compiled.function_code("f");
    let expected = 4.0f32.to_bits() as i32;
    assert!(
        code.contains(&(Opcode::LitToReg, vec![Register::Ax.cell(), expected])),
        "folded float in {:?}",
        code
    );
}

#[test]
fn readonly_variables_reject_writes() {
    let compiled = compile_err("readonly int x = 5; int f() { x = 6; return x; }");
    assert!(compiled.error_message().contains("readonly"));
}

#[test]
fn imported_variable_resolves_through_the_import_table() {
    let compiled = compile_ok("import int health; int f() { return health; }");
    let idx = compiled
        .scrip
        .imports
        .iter()
        .position(|name| name == "health")
        .expect("import entry");
    assert!(compiled.scrip.fixups.iter().any(|f| f.kind == FixupType::Import
        && compiled.scrip.code[f.code_index] == idx as i32));
}

#[test]
fn noloopcheck_emits_the_opcode() {
    let compiled = compile_ok("int noloopcheck f() { return 1; }");
    let ops = compiled.function_opcodes("f");
    assert!(ops.contains(&Opcode::LoopCheckOff));
}

#[test]
fn default_parameters_fill_missing_arguments() {
    let compiled = compile_ok(
        "import int Foo(int a, int b = 5);
         int f() { return Foo(1); }",
    );
    let code = compiled.function_code("f");
    // Two values travel to the far stack, and the call declares two args.
    assert!(code.contains(&(Opcode::NumFuncArgs, vec![2])));
    assert!(code.contains(&(Opcode::SubRealStack, vec![2])));
    assert!(code.contains(&(Opcode::LitToReg, vec![Register::Ax.cell(), 5])));
}

#[test]
fn missing_argument_without_default_is_rejected() {
    let compiled = compile_err(
        "import int Foo(int a, int b);
         int f() { return Foo(1); }",
    );
    assert!(compiled.error_message().contains("default"));
}

#[test]
fn mismatching_forward_declaration_is_rejected() {
    let compiled = compile_err("int b(int x); int b() { return 7; }");
    assert!(compiled.error_message().contains("parameters"));
}

// ============================================================================
// Structs
// ============================================================================

#[test]
fn inherited_components_resolve_with_parent_offsets() {
    let compiled = compile_ok(
        "struct Base { int a; int b; };
         struct Derived extends Base { int c; };
         int f() { Derived d; d.c = 3; return d.b; }",
    );
    assert!(compiled.ok);
    // Derived is 12 bytes: two inherited ints plus its own.
    let derived = compiled.sym.find("Derived").expect("vartype");
    assert_eq!(compiled.sym.get_size(derived), 12);
}

#[test]
fn managed_struct_members_are_reached_through_the_pointer() {
    let compiled = compile_ok(
        "managed struct Obj { int val; };
         int f(Obj *o) { return o.val; }",
    );
    let ops = compiled.function_opcodes("f");
    assert!(ops.contains(&Opcode::MemReadPtr), "dereference in {:?}", ops);
    assert!(ops.contains(&Opcode::CheckNull));
}

#[test]
fn extender_function_becomes_a_method() {
    let compiled = compile_ok(
        "managed struct Obj { int val; };
         int GetVal(this Obj *) { return this.val; }
         int f(Obj *o) { return o.GetVal(); }",
    );
    let ops = compiled.function_opcodes("f");
    assert!(ops.contains(&Opcode::CallObj), "method dispatch in {:?}", ops);
    assert!(ops.contains(&Opcode::Call));
}

#[test]
fn unqualified_member_access_implies_this() {
    let compiled = compile_ok(
        "managed struct Obj { int val; };
         int GetVal(this Obj *) { return val; }",
    );
    let ops = compiled.function_opcodes("Obj::GetVal");
    // OP flows into MAR for the implicit this-access.
    assert!(compiled
        .function_code("Obj::GetVal")
        .contains(&(Opcode::RegToReg, vec![Register::Op.cell(), Register::Mar.cell()])));
    assert!(ops.contains(&Opcode::CheckNull));
}

#[test]
fn protected_components_are_sealed_from_outside() {
    let compiled = compile_err(
        "managed struct Obj { protected int val; };
         int f(Obj *o) { return o.val; }",
    );
    assert!(compiled.error_message().contains("Protected"));
}

#[test]
fn writeprotected_components_allow_reads_but_not_writes() {
    let read = compile_ok(
        "managed struct Obj { writeprotected int val; };
         int f(Obj *o) { return o.val; }",
    );
    assert!(read.ok);

    let write = compile_err(
        "managed struct Obj { writeprotected int val; };
         int f(Obj *o) { o.val = 1; return 0; }",
    );
    assert!(write.error_message().contains("Writeprotected"));
}

#[test]
fn nonmanaged_struct_cannot_hold_managed_pointers_in_managed_struct() {
    let compiled = compile_err(
        "managed struct Inner { int x; };
         managed struct Outer { Inner *child; };",
    );
    assert!(compiled
        .error_message()
        .contains("managed variable components"));
}

#[test]
fn struct_forward_declaration_must_be_completed() {
    let compiled = compile_err(
        "managed struct Ghost;
         Ghost *g;",
    );
    assert!(compiled.error_message().contains("never completely defined"));
}

#[test]
fn autoptr_requires_builtin_and_managed() {
    let compiled = compile_err("autoptr struct Bad { int x; };");
    assert!(compiled.error_message().contains("autoptr"));
}

// ============================================================================
// Arrays and new
// ============================================================================

#[test]
fn new_array_emits_newarray_and_releases_the_local() {
    let compiled = compile_ok("int f() { int[] a = new int[10]; return a.Length; }");
    let code = compiled.function_code("f");
    assert!(
        code.contains(&(Opcode::NewArray, vec![Register::Ax.cell(), 4, 0])),
        "NEWARRAY with element size and managed flag: {:?}",
        code
    );
    let ops = compiled.function_opcodes("f");
    assert!(ops.contains(&Opcode::MemZeroPtr), "local release in {:?}", ops);
}

#[test]
fn static_array_constant_index_folds_into_the_offset() {
    let compiled = compile_ok("int f() { int a[5]; a[2] = 9; return a[2]; }");
    let ops = compiled.function_opcodes("f");
    // Constant indices need no runtime bounds check.
    assert!(!ops.contains(&Opcode::CheckBounds));
}

#[test]
fn static_array_runtime_index_is_bounds_checked() {
    let compiled = compile_ok("int f(int i) { int a[5]; a[i] = 9; return a[i]; }");
    let code = compiled.function_code("f");
    assert!(code
        .iter()
        .any(|(op, args)| *op == Opcode::CheckBounds && args[1] == 5));
    // The stride multiplication for 4-byte elements.
    assert!(code.contains(&(Opcode::Mul, vec![Register::Ax.cell(), 4])));
}

#[test]
fn constant_index_out_of_bounds_is_rejected() {
    let compiled = compile_err("int f() { int a[5]; return a[5]; }");
    assert!(compiled.error_message().contains("too high"));
}

#[test]
fn dynamic_array_index_uses_dynamicbounds() {
    let compiled = compile_ok("int f(int[] xs, int i) { return xs[i]; }");
    let ops = compiled.function_opcodes("f");
    assert!(ops.contains(&Opcode::DynamicBounds));
    assert!(!ops.contains(&Opcode::CheckBounds));
}

// ============================================================================
// Compound assignment and increment
// ============================================================================

#[test]
fn compound_assignment_and_increments() {
    let compiled = compile_ok("int f() { int i = 1; i += 2; i++; ++i; i -= 1; return i; }");
    let ops = compiled.function_opcodes("f");
    let addreg = ops.iter().filter(|&&op| op == Opcode::AddReg).count();
    assert_eq!(addreg, 1, "one '+=' in {:?}", ops);
    // The in-place shortcut writes straight back to memory.
    assert!(ops.contains(&Opcode::MemWrite));
    assert!(ops.contains(&Opcode::SubReg));
}

#[test]
fn dead_branch_of_folded_ternary_disappears() {
    let compiled = compile_ok("int f() { return 1 ? 10 : 20; }");
    let code = compiled.function_code("f");
    assert!(code.contains(&(Opcode::LitToReg, vec![Register::Ax.cell(), 10])));
    assert!(!code.contains(&(Opcode::LitToReg, vec![Register::Ax.cell(), 20])));
}
