//! `random`: pseudo-random numbers from a generator owned by one evaluation.

use crate::capability::modules::{float_arg, int_arg};
use crate::capability::ProviderError;
use crate::interp::fault::{index_error, type_error, value_error};
use crate::interp::value::{Args, Module, Value};
use crate::interp::{Interpreter, PyResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;

type SharedRng = Rc<RefCell<StdRng>>;

fn seed_value(value: Option<&Value>) -> PyResult<StdRng> {
    Ok(match value {
        None | Some(Value::None) => StdRng::from_entropy(),
        Some(Value::Int(n)) => StdRng::seed_from_u64(*n as u64),
        Some(Value::Bool(b)) => StdRng::seed_from_u64(*b as u64),
        Some(Value::Float(f)) => StdRng::seed_from_u64(f.to_bits()),
        Some(Value::Str(s)) => {
            // FNV-1a so a given string always seeds the same sequence
            let hash = s.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
            });
            StdRng::seed_from_u64(hash)
        }
        Some(_) => {
            return Err(type_error(
                "The only supported seed types are: None,\nint, float, str, bytes, and bytearray.",
            ))
        }
    })
}

fn randrange(rng: &SharedRng, args: &Args) -> PyResult<Value> {
    args.no_keywords("randrange")?;
    args.check("randrange", 1, 3)?;
    let (start, stop) = match args.len() {
        1 => (0, int_arg(args, 0, "randrange")?),
        _ => (int_arg(args, 0, "randrange")?, int_arg(args, 1, "randrange")?),
    };
    let step = if args.len() == 3 { int_arg(args, 2, "randrange")? } else { 1 };
    if step == 0 {
        return Err(value_error("zero step for randrange()"));
    }

    let width = stop as i128 - start as i128;
    let count = if step > 0 {
        (width + step as i128 - 1) / step as i128
    } else {
        (width + step as i128 + 1) / step as i128
    };
    if count <= 0 {
        return Err(value_error(if args.len() == 1 {
            "empty range for randrange()".to_string()
        } else {
            format!("empty range in randrange({}, {})", start, stop)
        }));
    }
    let pick = rng.borrow_mut().gen_range(0..count);
    Ok(Value::Int((start as i128 + pick * step as i128) as i64))
}

/// Items of a sequence argument; sets and dicts are not indexable
fn sequence(interp: &mut Interpreter, value: &Value) -> PyResult<Vec<Value>> {
    match value {
        Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(_) => interp.collect(value),
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn provide() -> Result<Rc<Module>, ProviderError> {
    let module = Module::new("random", Some("Random variable generators."));
    let rng: SharedRng = Rc::new(RefCell::new(StdRng::from_entropy()));

    let r = rng.clone();
    module.add_fn("seed", move |_, args| {
        args.no_keywords("seed")?;
        args.check("seed", 0, 1)?;
        *r.borrow_mut() = seed_value(args.get(0))?;
        Ok(Value::None)
    });

    let r = rng.clone();
    module.add_fn("random", move |_, args| {
        args.check("random", 0, 0)?;
        Ok(Value::Float(r.borrow_mut().gen::<f64>()))
    });

    let r = rng.clone();
    module.add_fn("uniform", move |_, args| {
        args.check("uniform", 2, 2)?;
        let a = float_arg(&args, 0, "uniform")?;
        let b = float_arg(&args, 1, "uniform")?;
        Ok(Value::Float(a + (b - a) * r.borrow_mut().gen::<f64>()))
    });

    let r = rng.clone();
    module.add_fn("randint", move |_, args| {
        args.no_keywords("randint")?;
        args.check("randint", 2, 2)?;
        let a = int_arg(&args, 0, "randint")?;
        let b = int_arg(&args, 1, "randint")?;
        if a > b {
            return Err(value_error(format!(
                "empty range in randrange({}, {})",
                a,
                b as i128 + 1
            )));
        }
        Ok(Value::Int(r.borrow_mut().gen_range(a..=b)))
    });

    let r = rng.clone();
    module.add_fn("randrange", move |_, args| randrange(&r, &args));

    let r = rng.clone();
    module.add_fn("choice", move |interp, args| {
        args.check("choice", 1, 1)?;
        let items = sequence(interp, &args.positional[0])?;
        items
            .choose(&mut *r.borrow_mut())
            .cloned()
            .ok_or_else(|| index_error("Cannot choose from an empty sequence"))
    });

    let r = rng.clone();
    module.add_fn("shuffle", move |_, args| {
        args.check("shuffle", 1, 1)?;
        match &args.positional[0] {
            Value::List(list) => {
                list.borrow_mut().shuffle(&mut *r.borrow_mut());
                Ok(Value::None)
            }
            other => Err(type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    });

    let r = rng;
    module.add_fn("sample", move |interp, mut args| {
        let k = args.take(1, "k");
        args.reject_unknown_keywords("sample")?;
        if args.is_empty() {
            return Err(type_error(
                "Random.sample() missing 1 required positional argument: 'population'",
            ));
        }
        let Some(k) = k else {
            return Err(type_error(
                "Random.sample() missing 1 required positional argument: 'k'",
            ));
        };
        let k = k.expect_int("")?;
        let items = sequence(interp, &args.positional[0])?;
        if k < 0 || k as usize > items.len() {
            return Err(value_error("Sample larger than population or is negative"));
        }
        let picked = rand::seq::index::sample(&mut *r.borrow_mut(), items.len(), k as usize);
        Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
    });

    Ok(Rc::new(module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::exec::capture::CapturedStreams;
    use crate::interp::ExcKind;

    fn run(source: &str) -> (PyResult<()>, String) {
        let mut interp = Interpreter::new(CapturedStreams::default(), 1000);
        CapabilitySet::build(&[]).install(&mut interp);
        let result = interp.run(source);
        (result, interp.into_streams().stdout.into_string())
    }

    #[test]
    fn test_seed_makes_sequence_repeatable() {
        let (result, out) = run(
            "random.seed(42)\na = [random.randint(1, 100) for _ in range(5)]\nrandom.seed(42)\nb = [random.randint(1, 100) for _ in range(5)]\nprint(a == b, len([x for x in a if 1 <= x <= 100]) == 5)",
        );
        assert!(result.is_ok());
        assert_eq!(out, "True True\n");
    }

    #[test]
    fn test_ranges_stay_in_bounds() {
        let (result, out) = run(
            "ok = True\nfor _ in range(200):\n    x = random.randrange(0, 10, 3)\n    y = random.random()\n    ok = ok and x in (0, 3, 6, 9) and 0.0 <= y < 1.0\nprint(ok)",
        );
        assert!(result.is_ok());
        assert_eq!(out, "True\n");
    }

    #[test]
    fn test_choice_shuffle_sample() {
        let (result, out) = run(
            "xs = [1, 2, 3, 4]\nrandom.shuffle(xs)\nprint(sorted(xs))\nprint(random.choice('a'), len(random.sample(range(10), 3)))",
        );
        assert!(result.is_ok());
        assert_eq!(out, "[1, 2, 3, 4]\na 3\n");
    }

    #[test]
    fn test_errors() {
        let (result, _) = run("random.choice([])");
        assert_eq!(result.unwrap_err().kind(), ExcKind::IndexError);
        let (result, _) = run("random.randint(5, 1)");
        assert_eq!(result.unwrap_err().message(), "empty range in randrange(5, 2)");
        let (result, _) = run("random.sample([1], 2)");
        assert_eq!(result.unwrap_err().kind(), ExcKind::ValueError);
    }
}
