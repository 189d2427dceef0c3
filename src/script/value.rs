//! Runtime values. Containers are copy-on-write behind `Rc`, so binding a
//! list to a second name never aliases it.

use std::fmt::{self, Write as _};
use std::rc::Rc;

use super::error::{ErrorKind, Resource, ScriptError};

/// Deepest list/dict nesting a script may build.
pub const MAX_DEPTH: usize = 200;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<Vec<Value>>),
    Dict(Rc<Vec<(String, Value)>>),
    Capability(Rc<str>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            (Value::Capability(a), Value::Capability(b)) => a == b,
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Rc::new(items))
    }
}

impl From<Vec<f64>> for Value {
    fn from(items: Vec<f64>) -> Self {
        Value::List(Rc::new(items.into_iter().map(Value::Float).collect()))
    }
}

impl Value {
    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Dict(Rc::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Capability(_) => "function",
        }
    }

    /// Numeric view of ints and floats; bools are not numbers here.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Dict(entries) => !entries.is_empty(),
            Value::Capability(_) => true,
        }
    }

    /// Container nesting depth; scalars are 0.
    pub fn depth(&self) -> usize {
        match self {
            Value::List(items) => 1 + items.iter().map(Value::depth).max().unwrap_or(0),
            Value::Dict(entries) => 1 + entries.iter().map(|(_, v)| v.depth()).max().unwrap_or(0),
            _ => 0,
        }
    }

    /// Convert to JSON. Non-finite floats have no JSON form and become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.to_string()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Dict(entries) => {
                Json::Object(entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            Value::Capability(name) => Json::String(format!("<function {name}>")),
        }
    }

    /// `repr()`-style rendering: strings quoted.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out);
        out
    }

    fn write_repr(&self, out: &mut String) {
        match self {
            Value::Str(s) => write_quoted(out, s),
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out);
                }
                out.push(']');
            }
            Value::Dict(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_quoted(out, key);
                    out.push_str(": ");
                    value.write_repr(out);
                }
                out.push('}');
            }
            other => {
                let _ = write!(out, "{other}");
            }
        }
    }
}

/// `str()`-style rendering: strings bare, containers as repr.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::Capability(name) => write!(f, "<function {name}>"),
            Value::List(_) | Value::Dict(_) => f.write_str(&self.repr()),
        }
    }
}

fn write_quoted(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

/// Shortest round-trip form with Python's conventions: `1.0`, `1e-07`,
/// `1e+16`, `inf`, `nan`.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let magnitude = x.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let text = format!("{x:e}");
        let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if x.fract() == 0.0 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

fn overflow() -> ScriptError {
    ScriptError::new(ErrorKind::Overflow, "integer result out of range")
}

fn zero_division(what: &str) -> ScriptError {
    ScriptError::new(ErrorKind::ZeroDivision, what)
}

fn unsupported(op: BinaryOp, left: &Value, right: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

/// Floor division and modulo with the sign of the divisor, as Python does.
fn int_floor_div(a: i64, b: i64) -> Result<i64, ScriptError> {
    if b == 0 {
        return Err(zero_division("integer division or modulo by zero"));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    Ok(if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q })
}

fn int_mod(a: i64, b: i64) -> Result<i64, ScriptError> {
    if b == 0 {
        return Err(zero_division("integer division or modulo by zero"));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    Ok(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
}

fn float_mod(a: f64, b: f64) -> Result<f64, ScriptError> {
    if b == 0.0 {
        return Err(zero_division("float modulo"));
    }
    let r = a % b;
    Ok(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r })
}

fn int_pow(base: i64, exp: i64) -> Result<Value, ScriptError> {
    if exp < 0 {
        if base == 0 {
            return Err(zero_division("0 cannot be raised to a negative power"));
        }
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    let exp = u32::try_from(exp).map_err(|_| overflow())?;
    base.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> Result<f64, ScriptError> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinaryOp::Mod => float_mod(a, b)?,
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
    })
}

/// Refuse containers nested past [`MAX_DEPTH`].
pub fn check_depth(depth: usize) -> Result<(), ScriptError> {
    if depth > MAX_DEPTH {
        return Err(ScriptError::new(
            ErrorKind::ResourceExceeded(Resource::Memory),
            format!("containers nested deeper than {MAX_DEPTH} levels"),
        ));
    }
    Ok(())
}

/// Apply an arithmetic operator. `max_len` bounds strings and lists built
/// by `+` and `*`.
pub fn binary(op: BinaryOp, left: &Value, right: &Value, max_len: usize) -> Result<Value, ScriptError> {
    use Value::*;
    let too_big = |len: usize| {
        if len > max_len {
            Err(ScriptError::resource(Resource::Memory))
        } else {
            Ok(())
        }
    };
    match (op, left, right) {
        (_, Int(a), Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinaryOp::Add => a.checked_add(b).map(Int).ok_or_else(overflow),
                BinaryOp::Sub => a.checked_sub(b).map(Int).ok_or_else(overflow),
                BinaryOp::Mul => a.checked_mul(b).map(Int).ok_or_else(overflow),
                BinaryOp::Div => float_arith(op, a as f64, b as f64).map(Float),
                BinaryOp::FloorDiv => int_floor_div(a, b).map(Int),
                BinaryOp::Mod => int_mod(a, b).map(Int),
                BinaryOp::Pow => int_pow(a, b),
            }
        }
        (_, Int(_) | Float(_), Int(_) | Float(_)) => {
            let (a, b) = (left.as_number().unwrap_or(0.0), right.as_number().unwrap_or(0.0));
            float_arith(op, a, b).map(Float)
        }
        (BinaryOp::Add, Str(a), Str(b)) => {
            too_big(a.len() + b.len())?;
            Ok(Str(format!("{a}{b}").into()))
        }
        (BinaryOp::Add, List(a), List(b)) => {
            too_big(a.len() + b.len())?;
            let mut items = Vec::with_capacity(a.len() + b.len());
            items.extend(a.iter().cloned());
            items.extend(b.iter().cloned());
            Ok(List(Rc::new(items)))
        }
        (BinaryOp::Mul, Str(s), Int(n)) | (BinaryOp::Mul, Int(n), Str(s)) => {
            let n = usize::try_from(*n).unwrap_or(0);
            too_big(s.len().saturating_mul(n))?;
            Ok(Str(s.repeat(n).into()))
        }
        (BinaryOp::Mul, List(items), Int(n)) | (BinaryOp::Mul, Int(n), List(items)) => {
            let n = usize::try_from(*n).unwrap_or(0);
            too_big(items.len().saturating_mul(n))?;
            let mut out = Vec::with_capacity(items.len() * n);
            for _ in 0..n {
                out.extend(items.iter().cloned());
            }
            Ok(List(Rc::new(out)))
        }
        _ => Err(unsupported(op, left, right)),
    }
}

pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ScriptError> {
    use std::cmp::Ordering;
    match op {
        CompareOp::Equal => return Ok(left == right),
        CompareOp::NotEqual => return Ok(left != right),
        _ => {}
    }
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                let symbol = match op {
                    CompareOp::Less => "<",
                    CompareOp::LessOrEqual => "<=",
                    CompareOp::Greater => ">",
                    _ => ">=",
                };
                return Err(ScriptError::type_error(format!(
                    "'{symbol}' not supported between instances of '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                )));
            }
        },
    };
    // NaN compares false everywhere
    let Some(ordering) = ordering else { return Ok(false) };
    Ok(match op {
        CompareOp::Less => ordering == Ordering::Less,
        CompareOp::LessOrEqual => ordering != Ordering::Greater,
        CompareOp::Greater => ordering == Ordering::Greater,
        CompareOp::GreaterOrEqual => ordering != Ordering::Less,
        CompareOp::Equal => ordering == Ordering::Equal,
        CompareOp::NotEqual => ordering != Ordering::Equal,
    })
}

/// Arguments of one call, as written at the call site.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1_000;

    #[test]
    fn float_formatting_matches_python() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(2.5e-7), "2.5e-07");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(123456.75), "123456.75");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn int_division_follows_floor_semantics() {
        let v = |a, b, op| binary(op, &Value::Int(a), &Value::Int(b), MAX).unwrap();
        assert_eq!(v(7, 2, BinaryOp::FloorDiv), Value::Int(3));
        assert_eq!(v(-7, 2, BinaryOp::FloorDiv), Value::Int(-4));
        assert_eq!(v(-7, 2, BinaryOp::Mod), Value::Int(1));
        assert_eq!(v(7, -2, BinaryOp::Mod), Value::Int(-1));
        assert_eq!(v(7, 2, BinaryOp::Div), Value::Float(3.5));
        assert_eq!(v(2, -1, BinaryOp::Pow), Value::Float(0.5));
    }

    #[test]
    fn division_by_zero_and_overflow_are_errors() {
        let err = binary(BinaryOp::Div, &Value::Int(1), &Value::Int(0), MAX).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        let err = binary(BinaryOp::Mul, &Value::Int(i64::MAX), &Value::Int(2), MAX).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
    }

    #[test]
    fn growth_past_the_ceiling_is_a_memory_fault() {
        let list = Value::from(vec![Value::Int(1); 10]);
        let err = binary(BinaryOp::Mul, &list, &Value::Int(200), MAX).unwrap_err();
        assert_eq!(err.resource_kind(), Some(Resource::Memory));
    }

    #[test]
    fn depth_counts_container_levels() {
        assert_eq!(Value::Int(1).depth(), 0);
        let nested = Value::from(vec![Value::Int(1), Value::dict([("xs", Value::from(vec![1.0]))])]);
        assert_eq!(nested.depth(), 3);
        assert!(check_depth(MAX_DEPTH).is_ok());
        let err = check_depth(MAX_DEPTH + 1).unwrap_err();
        assert_eq!(err.resource_kind(), Some(Resource::Memory));
        assert!(err.message.contains("nested deeper"), "{err}");
    }

    #[test]
    fn mixed_types_report_operand_names() {
        let err = binary(BinaryOp::Add, &Value::from("a"), &Value::Int(1), MAX).unwrap_err();
        assert_eq!(err.message, "unsupported operand type(s) for +: 'str' and 'int'");
    }

    #[test]
    fn repr_quotes_nested_strings() {
        let v = Value::dict([("name", Value::from("it's")), ("xs", Value::from(vec![1.0, 2.5]))]);
        assert_eq!(v.to_string(), r#"{'name': "it's", 'xs': [1.0, 2.5]}"#);
    }

    #[test]
    fn json_conversion_keeps_order_and_nulls_non_finite() {
        let v = Value::dict([("z", Value::Int(1)), ("a", Value::Float(f64::NAN))]);
        assert_eq!(v.to_json().to_string(), r#"{"z":1,"a":null}"#);
    }

    #[test]
    fn int_and_float_compare_equal() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert!(compare(CompareOp::Less, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CompareOp::Less, &Value::from("a"), &Value::Int(1)).is_err());
    }
}
