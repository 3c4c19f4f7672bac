//! The predefined symbol block.
//!
//! Keywords, operators, delimiters and primitive vartypes are allocated
//! before any user symbol, in a fixed order, so that their ids can be
//! named as constants and survive the inter-pass symbol-table reset.

use super::Symbol;

pub const NONE: Symbol = Symbol(0);

pub const OPEN_BRACE: Symbol = Symbol(1);
pub const CLOSE_BRACE: Symbol = Symbol(2);
pub const OPEN_BRACKET: Symbol = Symbol(3);
pub const CLOSE_BRACKET: Symbol = Symbol(4);
pub const OPEN_PAREN: Symbol = Symbol(5);
pub const CLOSE_PAREN: Symbol = Symbol(6);
pub const DOT: Symbol = Symbol(7);
pub const COMMA: Symbol = Symbol(8);
pub const SEMICOLON: Symbol = Symbol(9);
pub const COLON: Symbol = Symbol(10);
pub const SCOPE_RES: Symbol = Symbol(11);

pub const ASSIGN: Symbol = Symbol(12);
pub const ASSIGN_PLUS: Symbol = Symbol(13);
pub const ASSIGN_MINUS: Symbol = Symbol(14);
pub const ASSIGN_MULTIPLY: Symbol = Symbol(15);
pub const ASSIGN_DIVIDE: Symbol = Symbol(16);
pub const ASSIGN_BITAND: Symbol = Symbol(17);
pub const ASSIGN_BITOR: Symbol = Symbol(18);
pub const ASSIGN_BITXOR: Symbol = Symbol(19);
pub const ASSIGN_SHIFTLEFT: Symbol = Symbol(20);
pub const ASSIGN_SHIFTRIGHT: Symbol = Symbol(21);

pub const NOT: Symbol = Symbol(22);
pub const BITNEG: Symbol = Symbol(23);
pub const PLUS: Symbol = Symbol(24);
pub const MINUS: Symbol = Symbol(25);
/// `*`: the multiplication operator, and the dynpointer marker in types.
pub const DYNPOINTER: Symbol = Symbol(26);
pub const DIVIDE: Symbol = Symbol(27);
pub const MODULO: Symbol = Symbol(28);
pub const SHIFT_LEFT: Symbol = Symbol(29);
pub const SHIFT_RIGHT: Symbol = Symbol(30);
pub const LESS: Symbol = Symbol(31);
pub const GREATER: Symbol = Symbol(32);
pub const LESS_EQUAL: Symbol = Symbol(33);
pub const GREATER_EQUAL: Symbol = Symbol(34);
pub const EQUAL: Symbol = Symbol(35);
pub const NOT_EQUAL: Symbol = Symbol(36);
pub const BITAND: Symbol = Symbol(37);
pub const BITXOR: Symbol = Symbol(38);
pub const BITOR: Symbol = Symbol(39);
pub const AND: Symbol = Symbol(40);
pub const OR: Symbol = Symbol(41);
pub const TERN: Symbol = Symbol(42);
pub const INCREMENT: Symbol = Symbol(43);
pub const DECREMENT: Symbol = Symbol(44);
pub const NEW: Symbol = Symbol(45);

pub const THIS: Symbol = Symbol(46);
pub const NULL: Symbol = Symbol(47);

pub const IF: Symbol = Symbol(48);
pub const ELSE: Symbol = Symbol(49);
pub const WHILE: Symbol = Symbol(50);
pub const DO: Symbol = Symbol(51);
pub const FOR: Symbol = Symbol(52);
pub const SWITCH: Symbol = Symbol(53);
pub const CASE: Symbol = Symbol(54);
pub const DEFAULT: Symbol = Symbol(55);
pub const FALLTHROUGH: Symbol = Symbol(56);
pub const BREAK: Symbol = Symbol(57);
pub const CONTINUE: Symbol = Symbol(58);
pub const RETURN: Symbol = Symbol(59);
pub const STRUCT: Symbol = Symbol(60);
pub const ENUM: Symbol = Symbol(61);
pub const EXTENDS: Symbol = Symbol(62);
pub const EXPORT: Symbol = Symbol(63);

pub const ATTRIBUTE: Symbol = Symbol(64);
pub const AUTOPTR: Symbol = Symbol(65);
pub const BUILTIN: Symbol = Symbol(66);
pub const CONST: Symbol = Symbol(67);
pub const IMPORT: Symbol = Symbol(68);
pub const TRYIMPORT: Symbol = Symbol(69);
pub const INTERNALSTRING: Symbol = Symbol(70);
pub const MANAGED: Symbol = Symbol(71);
pub const PROTECTED: Symbol = Symbol(72);
pub const READONLY: Symbol = Symbol(73);
pub const STATIC: Symbol = Symbol(74);
pub const WRITEPROTECTED: Symbol = Symbol(75);
pub const NOLOOPCHECK: Symbol = Symbol(76);
pub const DOTDOTDOT: Symbol = Symbol(77);

pub const VOID: Symbol = Symbol(78);
pub const CHAR: Symbol = Symbol(79);
pub const SHORT: Symbol = Symbol(80);
pub const INT: Symbol = Symbol(81);
pub const LONG: Symbol = Symbol(82);
pub const FLOAT: Symbol = Symbol(83);
pub const STRING: Symbol = Symbol(84);

/// The highest predefined symbol; user symbols start just above.
pub const LAST_PREDEFINED: Symbol = STRING;
