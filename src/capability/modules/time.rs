//! `time`: wall clock, monotonic counters and a bounded sleep.

use crate::capability::modules::datetime::strftime;
use crate::capability::modules::{float_arg, str_arg};
use crate::capability::ProviderError;
use crate::interp::fault::value_error;
use crate::interp::value::{Module, Value};
use chrono::Local;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Upper bound on a single `sleep`; the host enforces the real deadline
const MAX_SLEEP_SECS: f64 = 30.0;

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn provide() -> Result<Rc<Module>, ProviderError> {
    let module = Module::new("time", Some("Time access and conversions."));
    let origin = Instant::now();

    module.add_fn("time", |_, args| {
        args.check("time", 0, 0)?;
        Ok(Value::Float(epoch_seconds()))
    });
    module.add_fn("perf_counter", move |_, args| {
        args.check("perf_counter", 0, 0)?;
        Ok(Value::Float(origin.elapsed().as_secs_f64()))
    });
    module.add_fn("monotonic", move |_, args| {
        args.check("monotonic", 0, 0)?;
        Ok(Value::Float(origin.elapsed().as_secs_f64()))
    });
    module.add_fn("sleep", |_, args| {
        args.no_keywords("sleep")?;
        args.check("sleep", 1, 1)?;
        let secs = float_arg(&args, 0, "sleep")?;
        if secs.is_nan() {
            return Err(value_error("Invalid value NaN (not a number)"));
        }
        if secs < 0.0 {
            return Err(value_error("sleep length must be non-negative"));
        }
        std::thread::sleep(Duration::from_secs_f64(secs.min(MAX_SLEEP_SECS)));
        Ok(Value::None)
    });
    module.add_fn("strftime", |_, args| {
        args.check("strftime", 1, 1)?;
        let format = str_arg(&args, 0, "strftime")?;
        strftime(&Local::now().naive_local(), &format).map(Value::string)
    });

    Ok(Rc::new(module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::exec::capture::CapturedStreams;
    use crate::interp::{Interpreter, PyResult};

    fn run(source: &str) -> (PyResult<()>, String) {
        let mut interp = Interpreter::new(CapturedStreams::default(), 1000);
        CapabilitySet::build(&[]).install(&mut interp);
        let result = interp.run(source);
        (result, interp.into_streams().stdout.into_string())
    }

    #[test]
    fn test_clocks_advance() {
        let (result, out) = run(
            "start = time.perf_counter()\ntime.sleep(0.01)\nelapsed = time.perf_counter() - start\nprint(elapsed >= 0.01, time.time() > 1600000000)",
        );
        assert!(result.is_ok());
        assert_eq!(out, "True True\n");
    }

    #[test]
    fn test_strftime_year() {
        let (result, out) = run("print(len(time.strftime('%Y')))");
        assert!(result.is_ok());
        assert_eq!(out, "4\n");
    }

    #[test]
    fn test_negative_sleep() {
        let (result, _) = run("time.sleep(-1)");
        assert_eq!(result.unwrap_err().message(), "sleep length must be non-negative");
    }
}
