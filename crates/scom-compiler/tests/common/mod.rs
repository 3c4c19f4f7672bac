//! Test support: a minimal tokenizer and a compile harness.
//!
//! The production pipeline receives a pre-scanned token sequence from a
//! separate scanner. For the tests, this module provides just enough of a
//! scanner to turn source text into that shape: symbols interned into the
//! symbol table, tokens appended with line numbers, string literals placed
//! into the script's string pool.

use scom_compiler::bytecode::{CodeCell, CodeLoc, Opcode};
use scom_compiler::symtable::entry::LiteralData;
use scom_compiler::symtable::{kw, VartypeShape};
use scom_compiler::{CompiledScript, Diagnostics, Options, SrcList, SymbolTable};

/// Operators and punctuation, longest first so that scanning is
/// longest-match.
const MULTI_CHAR_TOKENS: &[&str] = &[
    "<<=", ">>=", "...", "==", "!=", "<=", ">=", "&&", "||", "<<", ">>", "++", "--", "+=", "-=",
    "*=", "/=", "&=", "|=", "^=", "::",
];

const SINGLE_CHAR_TOKENS: &str = "{}()[].,;:?*+-/%<>=!&|^~";

/// Tokenize `text` into `src`, interning through `sym` and pooling string
/// literals in `scrip`.
pub fn scan_into(
    text: &str,
    section: &str,
    src: &mut SrcList,
    sym: &mut SymbolTable,
    scrip: &mut CompiledScript,
) {
    src.new_section(section);
    let bytes: Vec<char> = text.chars().collect();
    let mut idx = 0;
    let mut line = 1usize;

    while idx < bytes.len() {
        let ch = bytes[idx];

        if ch == '\n' {
            line += 1;
            idx += 1;
            continue;
        }
        if ch.is_whitespace() {
            idx += 1;
            continue;
        }

        // Comments.
        if ch == '/' && idx + 1 < bytes.len() && bytes[idx + 1] == '/' {
            while idx < bytes.len() && bytes[idx] != '\n' {
                idx += 1;
            }
            continue;
        }
        if ch == '/' && idx + 1 < bytes.len() && bytes[idx + 1] == '*' {
            idx += 2;
            while idx + 1 < bytes.len() && !(bytes[idx] == '*' && bytes[idx + 1] == '/') {
                if bytes[idx] == '\n' {
                    line += 1;
                }
                idx += 1;
            }
            idx += 2;
            continue;
        }

        // String literals go into the pool; the token is a literal symbol
        // of vartype `const string` carrying the pool offset.
        if ch == '"' {
            idx += 1;
            let mut value = String::new();
            while idx < bytes.len() && bytes[idx] != '"' {
                if bytes[idx] == '\\' && idx + 1 < bytes.len() {
                    idx += 1;
                    match bytes[idx] {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        other => value.push(other),
                    }
                } else {
                    value.push(bytes[idx]);
                }
                idx += 1;
            }
            idx += 1; // closing quote
            let token_name = format!("\"{}\"", value);
            let token = sym.find_or_add(&token_name);
            if !sym.is_literal(token) {
                let offset = scrip.add_string(&value);
                let const_string = sym.vartype_with(VartypeShape::Const, kw::STRING);
                sym.entry_mut(token).literal = Some(LiteralData {
                    vartype: const_string,
                    value: offset as CodeCell,
                });
            }
            src.append(token, line);
            continue;
        }

        // Character literals become int literals.
        if ch == '\'' {
            idx += 1;
            let value = bytes[idx] as CodeCell;
            idx += 1;
            debug_assert_eq!(bytes[idx], '\'');
            idx += 1;
            let token = sym.find_or_add_int_literal(value);
            src.append(token, line);
            continue;
        }

        // Numbers: int, or float when a '.' is embedded.
        if ch.is_ascii_digit() {
            let start = idx;
            while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                idx += 1;
            }
            let mut is_float = false;
            if idx + 1 < bytes.len() && bytes[idx] == '.' && bytes[idx + 1].is_ascii_digit() {
                is_float = true;
                idx += 1;
                while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                    idx += 1;
                }
            }
            let token_name: String = bytes[start..idx].iter().collect();
            let token = sym.find_or_add(&token_name);
            if !sym.is_literal(token) {
                let data = if is_float {
                    let value: f32 = token_name.parse().expect("float literal");
                    LiteralData {
                        vartype: kw::FLOAT,
                        value: value.to_bits() as CodeCell,
                    }
                } else {
                    let value: i64 = token_name.parse().expect("int literal");
                    LiteralData {
                        vartype: kw::INT,
                        value: value as CodeCell,
                    }
                };
                sym.entry_mut(token).literal = Some(data);
            }
            src.append(token, line);
            continue;
        }

        // Identifiers and keywords.
        if ch.is_ascii_alphabetic() || ch == '_' {
            let start = idx;
            while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == '_') {
                idx += 1;
            }
            let token_name: String = bytes[start..idx].iter().collect();
            let token = sym.find_or_add(&token_name);
            src.append(token, line);
            continue;
        }

        // Multi-character operators, longest first.
        let rest: String = bytes[idx..bytes.len().min(idx + 3)].iter().collect();
        let mut matched = false;
        for op in MULTI_CHAR_TOKENS {
            if rest.starts_with(op) {
                let token = sym.find_or_add(op);
                src.append(token, line);
                idx += op.len();
                matched = true;
                break;
            }
        }
        if matched {
            continue;
        }

        if SINGLE_CHAR_TOKENS.contains(ch) {
            let token = sym.find_or_add(&ch.to_string());
            src.append(token, line);
            idx += 1;
            continue;
        }

        panic!("test scanner: unexpected character '{}' at line {}", ch, line);
    }
}

/// Everything a test needs to inspect after a compile.
pub struct Compiled {
    pub scrip: CompiledScript,
    pub diag: Diagnostics,
    pub sym: SymbolTable,
    pub ok: bool,
}

impl Compiled {
    /// The decoded code of the named function's body, up to the next
    /// function (or the end of the image).
    pub fn function_code(&self, name: &str) -> Vec<(Opcode, Vec<CodeCell>)> {
        let start = self
            .scrip
            .functions
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.code_offset)
            .unwrap_or_else(|| panic!("function '{}' not found", name));
        let end = self
            .scrip
            .functions
            .iter()
            .map(|f| f.code_offset)
            .filter(|&off| off > start)
            .min()
            .unwrap_or(self.scrip.len());
        decode_range(&self.scrip, start, end)
    }

    /// Opcodes of a function's body, operands dropped.
    pub fn function_opcodes(&self, name: &str) -> Vec<Opcode> {
        self.function_code(name).into_iter().map(|(op, _)| op).collect()
    }

    /// The first fatal error's message.
    pub fn error_message(&self) -> String {
        self.diag
            .entries()
            .iter()
            .find(|d| d.severity >= scom_compiler::Severity::UserError)
            .map(|d| d.message.clone())
            .unwrap_or_default()
    }
}

fn decode_range(
    scrip: &CompiledScript,
    start: CodeLoc,
    end: CodeLoc,
) -> Vec<(Opcode, Vec<CodeCell>)> {
    let mut out = Vec::new();
    let mut idx = start;
    while idx < end {
        let op = Opcode::from_cell(scrip.code[idx]).expect("valid opcode in function body");
        let n = op.operand_count();
        out.push((op, scrip.code[idx + 1..idx + 1 + n].to_vec()));
        idx += 1 + n;
    }
    out
}

pub fn compile_with(text: &str, options: Options) -> Compiled {
    let mut sym = SymbolTable::new();
    let mut scrip = CompiledScript::new();
    let mut src = SrcList::new();
    scan_into(text, "S", &mut src, &mut sym, &mut scrip);
    let mut diag = Diagnostics::new();
    let ok = scom_compiler::parse(&mut src, options, &mut scrip, &mut sym, &mut diag);
    Compiled {
        scrip,
        diag,
        sym,
        ok,
    }
}

pub fn compile(text: &str) -> Compiled {
    compile_with(text, Options::default())
}

/// Compile and require success.
#[track_caller]
pub fn compile_ok(text: &str) -> Compiled {
    let compiled = compile(text);
    assert!(
        compiled.ok,
        "expected successful compile, got: {:?}",
        compiled.diag.entries()
    );
    compiled
}

/// Compile and require a fatal error.
#[track_caller]
pub fn compile_err(text: &str) -> Compiled {
    let compiled = compile(text);
    assert!(!compiled.ok, "expected the compile to fail, but it succeeded");
    compiled
}
