//! `math`: floating point functions and constants.

use crate::capability::modules::{float_arg, int_arg};
use crate::capability::ProviderError;
use crate::interp::fault::{overflow_error, type_error, value_error, ExcKind, Fault};
use crate::interp::types::float_to_int;
use crate::interp::value::{Args, Module, Value};
use crate::interp::PyResult;
use std::rc::Rc;

fn domain_error() -> Fault {
    value_error("math domain error")
}

fn range_error() -> Fault {
    Fault::new(ExcKind::OverflowError, "math range error")
}

/// NaN out of a non-NaN input is a domain error, infinity out of a finite
/// input is a range error.
fn checked(x: f64, result: f64) -> PyResult<Value> {
    if result.is_nan() && !x.is_nan() {
        return Err(domain_error());
    }
    if result.is_infinite() && x.is_finite() {
        return Err(range_error());
    }
    Ok(Value::Float(result))
}

fn add_unary(module: &Module, name: &'static str, f: fn(f64) -> f64) {
    module.add_fn(name, move |_, args| {
        args.no_keywords(name)?;
        args.check(name, 1, 1)?;
        let x = float_arg(&args, 0, name)?;
        checked(x, f(x))
    });
}

fn add_predicate(module: &Module, name: &'static str, f: fn(f64) -> bool) {
    module.add_fn(name, move |_, args| {
        args.check(name, 1, 1)?;
        Ok(Value::Bool(f(float_arg(&args, 0, name)?)))
    });
}

/// `floor`/`ceil`/`trunc` keep ints as they are
fn add_rounding(module: &Module, name: &'static str, f: fn(f64) -> f64) {
    module.add_fn(name, move |_, args| {
        args.check(name, 1, 1)?;
        match &args.positional[0] {
            value @ (Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(value.as_int().unwrap_or(0))),
            Value::Float(x) => float_to_int(f(*x)).map(Value::Int),
            other => Err(type_error(format!(
                "must be real number, not {}",
                other.type_name()
            ))),
        }
    });
}

fn log(args: Args) -> PyResult<Value> {
    args.no_keywords("log")?;
    args.check("log", 1, 2)?;
    let x = float_arg(&args, 0, "log")?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    match args.get(1) {
        None => Ok(Value::Float(x.ln())),
        Some(base) => {
            let base = base.expect_float("log")?;
            if base <= 0.0 {
                return Err(domain_error());
            }
            let denominator = base.ln();
            if denominator == 0.0 {
                return Err(Fault::new(ExcKind::ZeroDivisionError, "float division by zero"));
            }
            Ok(Value::Float(x.ln() / denominator))
        }
    }
}

fn factorial(args: Args) -> PyResult<Value> {
    args.check("factorial", 1, 1)?;
    let n = int_arg(&args, 0, "factorial")?;
    if n < 0 {
        return Err(value_error("factorial() not defined for negative values"));
    }
    let mut acc: i64 = 1;
    for k in 2..=n {
        acc = acc.checked_mul(k).ok_or_else(overflow_error)?;
    }
    Ok(Value::Int(acc))
}

fn gcd(args: Args) -> PyResult<Value> {
    args.no_keywords("gcd")?;
    let mut acc: i64 = 0;
    for i in 0..args.len() {
        let mut a = acc.unsigned_abs();
        let mut b = int_arg(&args, i, "gcd")?.unsigned_abs();
        while b != 0 {
            let t = a % b;
            a = b;
            b = t;
        }
        acc = i64::try_from(a).map_err(|_| overflow_error())?;
    }
    Ok(Value::Int(acc))
}

fn isclose(mut args: Args) -> PyResult<Value> {
    let rel_tol = args.take_keyword("rel_tol");
    let abs_tol = args.take_keyword("abs_tol");
    args.reject_unknown_keywords("isclose")?;
    args.check("isclose", 2, 2)?;
    let a = float_arg(&args, 0, "isclose")?;
    let b = float_arg(&args, 1, "isclose")?;
    let rel_tol = rel_tol.map(|v| v.expect_float("isclose")).transpose()?.unwrap_or(1e-9);
    let abs_tol = abs_tol.map(|v| v.expect_float("isclose")).transpose()?.unwrap_or(0.0);
    if rel_tol < 0.0 || abs_tol < 0.0 {
        return Err(value_error("tolerances must be non-negative"));
    }
    if a == b {
        return Ok(Value::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Value::Bool(false));
    }
    let diff = (b - a).abs();
    Ok(Value::Bool(
        diff <= (rel_tol * b).abs() || diff <= (rel_tol * a).abs() || diff <= abs_tol,
    ))
}

pub fn provide() -> Result<Rc<Module>, ProviderError> {
    let module = Module::new(
        "math",
        Some("This module provides access to the mathematical functions defined by the C standard."),
    );

    module.set("pi", Value::Float(std::f64::consts::PI));
    module.set("e", Value::Float(std::f64::consts::E));
    module.set("tau", Value::Float(std::f64::consts::TAU));
    module.set("inf", Value::Float(f64::INFINITY));
    module.set("nan", Value::Float(f64::NAN));

    add_unary(&module, "sqrt", f64::sqrt);
    add_unary(&module, "exp", f64::exp);
    add_unary(&module, "log2", |x| if x <= 0.0 { f64::NAN } else { x.log2() });
    add_unary(&module, "log10", |x| if x <= 0.0 { f64::NAN } else { x.log10() });
    add_unary(&module, "sin", f64::sin);
    add_unary(&module, "cos", f64::cos);
    add_unary(&module, "tan", f64::tan);
    add_unary(&module, "asin", f64::asin);
    add_unary(&module, "acos", f64::acos);
    add_unary(&module, "atan", f64::atan);
    add_unary(&module, "fabs", f64::abs);
    add_unary(&module, "degrees", f64::to_degrees);
    add_unary(&module, "radians", f64::to_radians);

    add_predicate(&module, "isfinite", f64::is_finite);
    add_predicate(&module, "isinf", f64::is_infinite);
    add_predicate(&module, "isnan", f64::is_nan);

    add_rounding(&module, "floor", f64::floor);
    add_rounding(&module, "ceil", f64::ceil);
    add_rounding(&module, "trunc", f64::trunc);

    module.add_fn("pow", |_, args| {
        args.check("pow", 2, 2)?;
        let x = float_arg(&args, 0, "pow")?;
        let y = float_arg(&args, 1, "pow")?;
        if x == 0.0 && y < 0.0 {
            return Err(domain_error());
        }
        let result = x.powf(y);
        if result.is_infinite() && x.is_finite() && y.is_finite() {
            return Err(range_error());
        }
        if result.is_nan() && !x.is_nan() && !y.is_nan() {
            return Err(domain_error());
        }
        Ok(Value::Float(result))
    });
    module.add_fn("atan2", |_, args| {
        args.check("atan2", 2, 2)?;
        let y = float_arg(&args, 0, "atan2")?;
        let x = float_arg(&args, 1, "atan2")?;
        Ok(Value::Float(y.atan2(x)))
    });
    module.add_fn("hypot", |_, args| {
        args.no_keywords("hypot")?;
        let mut total = 0.0_f64;
        for i in 0..args.len() {
            total = total.hypot(float_arg(&args, i, "hypot")?);
        }
        Ok(Value::Float(total))
    });
    module.add_fn("log", |_, args| log(args));
    module.add_fn("factorial", |_, args| factorial(args));
    module.add_fn("gcd", |_, args| gcd(args));
    module.add_fn("isclose", |_, args| isclose(args));

    Ok(Rc::new(module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::exec::capture::CapturedStreams;
    use crate::interp::Interpreter;

    fn run(source: &str) -> (PyResult<()>, String) {
        let mut interp = Interpreter::new(CapturedStreams::default(), 1000);
        CapabilitySet::build(&[]).install(&mut interp);
        let result = interp.run(source);
        (result, interp.into_streams().stdout.into_string())
    }

    #[test]
    fn test_constants_and_formatting() {
        let (result, out) = run("print(f'Pi = {math.pi:.2f}')\nprint(math.floor(-2.5), math.ceil(2.1))");
        assert!(result.is_ok());
        assert_eq!(out, "Pi = 3.14\n-3 3\n");
    }

    #[test]
    fn test_domain_errors() {
        for source in ["math.sqrt(-1)", "math.log(0)", "math.acos(2)"] {
            let (result, _) = run(source);
            let fault = result.unwrap_err();
            assert_eq!(fault.kind(), ExcKind::ValueError, "{}", source);
            assert_eq!(fault.message(), "math domain error");
        }
        let (result, _) = run("math.exp(1000)");
        assert_eq!(result.unwrap_err().summary(), "OverflowError: math range error");
    }

    #[test]
    fn test_integer_functions() {
        let (result, out) = run("print(math.factorial(5), math.gcd(12, 18, -8), math.log(8, 2))");
        assert!(result.is_ok());
        assert_eq!(out, "120 2 3.0\n");
        let (result, _) = run("math.factorial(-1)");
        assert_eq!(
            result.unwrap_err().message(),
            "factorial() not defined for negative values"
        );
    }

    #[test]
    fn test_isclose() {
        let (_, out) = run("print(math.isclose(0.1 + 0.2, 0.3), math.isclose(1, 1.1), math.isclose(1, 1.05, abs_tol=0.1))");
        assert_eq!(out, "True False True\n");
    }
}
