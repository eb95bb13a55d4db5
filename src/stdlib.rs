use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, NyxError, Result},
    runtime::Interpreter,
    value::{Builtin, BuiltinFn, Value, ValueKind},
};

const VARIADIC: usize = usize::MAX;

/// Registers the global built-ins and the `std/math` module.
pub fn install(interpreter: &mut Interpreter) {
    interpreter.register_builtin("print", VARIADIC, io_print);
    interpreter.register_builtin("len", 1, collections_len);
    interpreter.register_builtin("range", VARIADIC, collections_range);
    interpreter.register_builtin("min", VARIADIC, math_min);
    interpreter.register_builtin("max", VARIADIC, math_max);
    interpreter.register_builtin("sum", 1, math_sum);
    interpreter.register_builtin("abs", 1, math_abs);
    interpreter.register_builtin("round", 1, math_round);
    interpreter.register_builtin("str", 1, convert_str);
    interpreter.register_builtin("int", 1, convert_int);
    interpreter.register_builtin("float", 1, convert_float);
    interpreter.register_builtin("type", 1, convert_type);
    interpreter.register_module("std/math", math_module());
}

pub fn math_module() -> IndexMap<String, Value> {
    let mut math = IndexMap::new();
    math.insert("abs".into(), native("abs", 1, math_abs));
    math.insert("floor".into(), native("floor", 1, math_floor));
    math.insert("ceil".into(), native("ceil", 1, math_ceil));
    math.insert("sqrt".into(), native("sqrt", 1, math_sqrt));
    math.insert("round".into(), native("round", 1, math_round));
    math.insert("pow".into(), native("pow", 2, math_pow));
    math.insert("min".into(), native("min", VARIADIC, math_min));
    math.insert("max".into(), native("max", VARIADIC, math_max));
    math.insert("pi".into(), Value::float(std::f64::consts::PI));
    math.insert("e".into(), Value::float(std::f64::consts::E));
    math
}

fn native(name: &str, arity: usize, callback: BuiltinFn) -> Value {
    Value::new(ValueKind::Builtin(Builtin {
        name: name.to_string(),
        arity,
        callback,
    }))
}

fn error(message: impl Into<String>) -> NyxError {
    NyxError::from(Diagnostic::runtime(message))
}

fn expect_int(value: &Value, name: &str) -> Result<i64> {
    match value.kind() {
        ValueKind::Int(n) => Ok(*n),
        _ => Err(error(format!(
            "`{name}` expected INTEGER but found {}",
            value.type_name()
        ))),
    }
}

fn expect_number(value: &Value, name: &str) -> Result<f64> {
    value.as_number().ok_or_else(|| {
        error(format!(
            "`{name}` expected a number but found {}",
            value.type_name()
        ))
    })
}

fn float_to_int(number: f64, name: &str) -> Result<Value> {
    if !number.is_finite() || number < i64::MIN as f64 || number >= i64::MAX as f64 {
        return Err(error(format!("`{name}` result out of integer range")));
    }
    Ok(Value::int(number as i64))
}

fn io_print(args: &[Value]) -> Result<Value> {
    let line = args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    println!("{line}");
    Ok(Value::null())
}

fn collections_len(args: &[Value]) -> Result<Value> {
    let value = &args[0];
    let len = match value.kind() {
        ValueKind::String(s) => s.chars().count(),
        ValueKind::Array(values) => values.borrow().len(),
        ValueKind::Map(map) => map.borrow().len(),
        _ => {
            return Err(error(format!(
                "`len` not supported for {}",
                value.type_name()
            )));
        }
    };
    Ok(Value::int(len as i64))
}

/// Longest array `range` will materialize.
pub const MAX_RANGE_LEN: usize = 10_000_000;

/// `range(end)`, `range(start, end)` or `range(start, end, step)`.
fn collections_range(args: &[Value]) -> Result<Value> {
    let (start, end, step) = match args {
        [end] => (0, expect_int(end, "range")?, 1),
        [start, end] => (expect_int(start, "range")?, expect_int(end, "range")?, 1),
        [start, end, step] => (
            expect_int(start, "range")?,
            expect_int(end, "range")?,
            expect_int(step, "range")?,
        ),
        _ => {
            return Err(error(format!(
                "wrong number of arguments to `range`: expected 1 to 3, got {}",
                args.len()
            )));
        }
    };
    if step == 0 {
        return Err(error("range step must be non-zero"));
    }

    let span = if step > 0 {
        i128::from(end) - i128::from(start)
    } else {
        i128::from(start) - i128::from(end)
    };
    let stride = i128::from(step).abs();
    let len = if span > 0 { (span + stride - 1) / stride } else { 0 };
    if len > MAX_RANGE_LEN as i128 {
        return Err(error(format!(
            "range of {len} elements exceeds the limit of {MAX_RANGE_LEN}"
        )));
    }

    let mut values = Vec::with_capacity(len as usize);
    let mut current = start;
    while (step > 0 && current < end) || (step < 0 && current > end) {
        values.push(Value::int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(Value::array(values))
}

/// Arguments of `min`/`max`: a single array is unpacked.
fn candidates(args: &[Value], name: &str) -> Result<Vec<Value>> {
    let values = match args {
        [single] => match single.kind() {
            ValueKind::Array(values) => values.borrow().clone(),
            _ => vec![single.clone()],
        },
        _ => args.to_vec(),
    };
    if values.is_empty() {
        return Err(error(format!("`{name}` arg is an empty sequence")));
    }
    Ok(values)
}

fn order(left: &Value, right: &Value, name: &str) -> Result<Ordering> {
    match (left.kind(), right.kind()) {
        (ValueKind::Int(a), ValueKind::Int(b)) => Ok(a.cmp(b)),
        (ValueKind::String(a), ValueKind::String(b)) => Ok(a.cmp(b)),
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal)),
            _ => Err(error(format!(
                "`{name}` cannot compare {} with {}",
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

fn extreme(args: &[Value], name: &str, wanted: Ordering) -> Result<Value> {
    let mut values = candidates(args, name)?.into_iter();
    let mut best = values
        .next()
        .ok_or_else(|| error(format!("`{name}` arg is an empty sequence")))?;
    for value in values {
        if order(&value, &best, name)? == wanted {
            best = value;
        }
    }
    Ok(best)
}

fn math_min(args: &[Value]) -> Result<Value> {
    extreme(args, "min", Ordering::Less)
}

fn math_max(args: &[Value]) -> Result<Value> {
    extreme(args, "max", Ordering::Greater)
}

fn math_sum(args: &[Value]) -> Result<Value> {
    let ValueKind::Array(values) = args[0].kind() else {
        return Err(error(format!(
            "`sum` expected ARRAY but found {}",
            args[0].type_name()
        )));
    };
    let mut int_total: i64 = 0;
    let mut float_total: Option<f64> = None;
    for value in values.borrow().iter() {
        match (value.kind(), float_total.is_none()) {
            (ValueKind::Int(n), true) => {
                int_total = int_total
                    .checked_add(*n)
                    .ok_or_else(|| error("integer overflow in `sum`"))?;
            }
            _ => {
                let number = expect_number(value, "sum")?;
                *float_total.get_or_insert(int_total as f64) += number;
            }
        }
    }
    Ok(match float_total {
        Some(total) => Value::float(total),
        None => Value::int(int_total),
    })
}

fn math_abs(args: &[Value]) -> Result<Value> {
    match args[0].kind() {
        ValueKind::Int(n) => n
            .checked_abs()
            .map(Value::int)
            .ok_or_else(|| error("integer overflow in `abs`")),
        _ => Ok(Value::float(expect_number(&args[0], "abs")?.abs())),
    }
}

/// Rounds half to even and returns an integer.
fn math_round(args: &[Value]) -> Result<Value> {
    let number = match args[0].kind() {
        ValueKind::Int(n) => return Ok(Value::int(*n)),
        _ => expect_number(&args[0], "round")?,
    };
    let rounded = if (number - number.trunc()).abs() == 0.5 {
        2.0 * (number / 2.0).round()
    } else {
        number.round()
    };
    float_to_int(rounded, "round")
}

fn math_floor(args: &[Value]) -> Result<Value> {
    float_to_int(expect_number(&args[0], "floor")?.floor(), "floor")
}

fn math_ceil(args: &[Value]) -> Result<Value> {
    float_to_int(expect_number(&args[0], "ceil")?.ceil(), "ceil")
}

fn math_sqrt(args: &[Value]) -> Result<Value> {
    let number = expect_number(&args[0], "sqrt")?;
    if number < 0.0 {
        return Err(error("`sqrt` expects non-negative input"));
    }
    Ok(Value::float(number.sqrt()))
}

fn math_pow(args: &[Value]) -> Result<Value> {
    let base = expect_number(&args[0], "pow")?;
    let exponent = expect_number(&args[1], "pow")?;
    Ok(Value::float(base.powf(exponent)))
}

fn convert_str(args: &[Value]) -> Result<Value> {
    Ok(Value::string(args[0].to_string()))
}

fn convert_int(args: &[Value]) -> Result<Value> {
    let value = &args[0];
    match value.kind() {
        ValueKind::Int(_) => Ok(value.clone()),
        ValueKind::Bool(b) => Ok(Value::int(i64::from(*b))),
        ValueKind::Float(n) => float_to_int(n.trunc(), "int"),
        ValueKind::String(text) => text
            .trim()
            .parse::<i64>()
            .map(Value::int)
            .map_err(|_| error(format!("invalid literal for int(): {text:?}"))),
        _ => Err(error(format!(
            "`int` not supported for {}",
            value.type_name()
        ))),
    }
}

fn convert_float(args: &[Value]) -> Result<Value> {
    let value = &args[0];
    match value.kind() {
        ValueKind::Float(_) => Ok(value.clone()),
        ValueKind::Int(n) => Ok(Value::float(*n as f64)),
        ValueKind::Bool(b) => Ok(Value::float(if *b { 1.0 } else { 0.0 })),
        ValueKind::String(text) => text
            .trim()
            .parse::<f64>()
            .map(Value::float)
            .map_err(|_| error(format!("could not convert string to float: {text:?}"))),
        _ => Err(error(format!(
            "`float` not supported for {}",
            value.type_name()
        ))),
    }
}

fn convert_type(args: &[Value]) -> Result<Value> {
    Ok(Value::string(args[0].type_name()))
}
