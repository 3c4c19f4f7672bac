//! Compile-time evaluators for literal operands.
//!
//! These are plain functions wired into the operator entries of the
//! predefined symbol block. Each mirrors the runtime opcode it stands in
//! for; failures (division by zero, overflow) become user errors at the
//! expression that folded.

use crate::bytecode::CodeCell;

use super::entry::CtValue;

fn int(v: CodeCell) -> Result<CtValue, String> {
    Ok(CtValue::Int(v))
}

fn float(v: f32) -> Result<CtValue, String> {
    Ok(CtValue::Float(v))
}

fn overflow(op: &str) -> String {
    format!("Overflow when calculating '{}'", op)
}

pub fn int_add(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    l.checked_add(r).map(CtValue::Int).ok_or_else(|| overflow("+"))
}

pub fn int_sub(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    l.checked_sub(r).map(CtValue::Int).ok_or_else(|| overflow("-"))
}

pub fn int_mul(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    l.checked_mul(r).map(CtValue::Int).ok_or_else(|| overflow("*"))
}

pub fn int_div(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    if r == 0 {
        return Err("Division by zero".to_string());
    }
    l.checked_div(r).map(CtValue::Int).ok_or_else(|| overflow("/"))
}

pub fn int_mod(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    if r == 0 {
        return Err("Modulo zero".to_string());
    }
    l.checked_rem(r).map(CtValue::Int).ok_or_else(|| overflow("%"))
}

pub fn int_shl(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    if r < 0 {
        return Err("Shift by a negative amount".to_string());
    }
    int(l.checked_shl(r as u32).unwrap_or(0))
}

pub fn int_shr(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    if r < 0 {
        return Err("Shift by a negative amount".to_string());
    }
    int(l >> r.min(31))
}

pub fn int_bitand(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int(l & r)
}

pub fn int_bitor(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int(l | r)
}

pub fn int_bitxor(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int(l ^ r)
}

pub fn int_eq(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int((l == r) as CodeCell)
}

pub fn int_ne(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int((l != r) as CodeCell)
}

pub fn int_lt(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int((l < r) as CodeCell)
}

pub fn int_le(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int((l <= r) as CodeCell)
}

pub fn int_gt(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int((l > r) as CodeCell)
}

pub fn int_ge(l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int((l >= r) as CodeCell)
}

/// Boolean NOT; the left operand is a dummy zero.
pub fn int_not(_l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int((r == 0) as CodeCell)
}

/// Bitwise negation; the left operand is a dummy zero.
pub fn int_bitneg(_l: CodeCell, r: CodeCell) -> Result<CtValue, String> {
    int(!r)
}

pub fn float_add(l: f32, r: f32) -> Result<CtValue, String> {
    float(l + r)
}

pub fn float_sub(l: f32, r: f32) -> Result<CtValue, String> {
    float(l - r)
}

pub fn float_mul(l: f32, r: f32) -> Result<CtValue, String> {
    float(l * r)
}

pub fn float_div(l: f32, r: f32) -> Result<CtValue, String> {
    if r == 0.0 {
        return Err("Division by zero".to_string());
    }
    float(l / r)
}

pub fn float_eq(l: f32, r: f32) -> Result<CtValue, String> {
    int((l == r) as CodeCell)
}

pub fn float_ne(l: f32, r: f32) -> Result<CtValue, String> {
    int((l != r) as CodeCell)
}

pub fn float_lt(l: f32, r: f32) -> Result<CtValue, String> {
    int((l < r) as CodeCell)
}

pub fn float_le(l: f32, r: f32) -> Result<CtValue, String> {
    int((l <= r) as CodeCell)
}

pub fn float_gt(l: f32, r: f32) -> Result<CtValue, String> {
    int((l > r) as CodeCell)
}

pub fn float_ge(l: f32, r: f32) -> Result<CtValue, String> {
    int((l >= r) as CodeCell)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_folds() {
        assert_eq!(int_add(2, 3), Ok(CtValue::Int(5)));
        assert_eq!(int_mul(3, 4), Ok(CtValue::Int(12)));
        assert_eq!(float_add(1.5, 2.5), Ok(CtValue::Float(4.0)));
    }

    #[test]
    fn division_by_zero_is_reported() {
        assert!(int_div(1, 0).is_err());
        assert!(int_mod(1, 0).is_err());
        assert!(float_div(1.0, 0.0).is_err());
    }

    #[test]
    fn overflow_is_reported() {
        assert!(int_add(CodeCell::MAX, 1).is_err());
        assert!(int_mul(CodeCell::MAX, 2).is_err());
        assert!(int_div(CodeCell::MIN, -1).is_err());
    }

    #[test]
    fn comparisons_yield_ints() {
        assert_eq!(int_lt(2, 3), Ok(CtValue::Int(1)));
        assert_eq!(float_gt(2.0, 3.0), Ok(CtValue::Int(0)));
    }

    #[test]
    fn negative_shift_is_reported() {
        assert!(int_shl(1, -1).is_err());
        assert_eq!(int_shl(1, 4), Ok(CtValue::Int(16)));
        assert_eq!(int_shr(-8, 1), Ok(CtValue::Int(-4)));
    }

    #[test]
    fn unary_folds() {
        assert_eq!(int_not(0, 0), Ok(CtValue::Int(1)));
        assert_eq!(int_not(0, 7), Ok(CtValue::Int(0)));
        assert_eq!(int_bitneg(0, 0), Ok(CtValue::Int(-1)));
    }
}
