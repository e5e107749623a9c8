//! End-to-end behavior of the public evaluator
//!
//! Each test goes through `Evaluator`/`evaluate` exactly as an embedding host would.

use pybox::{evaluate, EvaluatorConfig, ExecutionResult, Evaluator};
use std::io::Write;
use std::thread;

fn assert_clean(result: &ExecutionResult, output: &str) {
    assert!(result.success, "unexpected failure: {}", result.error);
    assert_eq!(result.output, output);
    assert_eq!(result.error, "");
}

#[test]
fn test_hello_world() {
    let result = evaluate("print(\"Hello, World!\")");
    assert_clean(&result, "Hello, World!\n");
    assert!(result.execution_time >= 0.0);
}

#[test]
fn test_sequential_calls_are_independent() {
    let evaluator = Evaluator::default();

    let first = evaluator.evaluate("leftover = 41\nprint('first')\nimport sys\nsys.stderr.write('warn')");
    assert!(!first.success);
    assert_eq!(first.output, "first\n");
    assert_eq!(first.error, "warn");

    let second = evaluator.evaluate("print('second')");
    assert_clean(&second, "second\n");

    let third = evaluator.evaluate("print(leftover)");
    assert!(!third.success);
    assert!(third.error.starts_with("NameError: name 'leftover' is not defined\n"));
}

#[test]
fn test_success_requires_no_fault_and_empty_stderr() {
    assert_clean(&evaluate("print('only stdout')"), "only stdout\n");

    let raised = evaluate("raise ValueError('bad input')");
    assert!(!raised.success);
    assert!(raised.error.starts_with("ValueError: bad input\nTraceback (most recent call last):\n"));

    let stderr_only = evaluate("import sys\nprint('x', file=sys.stderr)");
    assert!(!stderr_only.success);
    assert_eq!(stderr_only.output, "");
    assert_eq!(stderr_only.error, "x\n");
}

#[test]
fn test_names_outside_capability_set_fault() {
    for name in ["remove", "open", "eval", "exec", "compile"] {
        let result = evaluate(&format!("{}('x')", name));
        assert!(!result.success);
        assert!(
            result
                .error
                .starts_with(&format!("NameError: name '{}' is not defined\n", name)),
            "{}",
            result.error
        );
    }
}

#[test]
fn test_division_by_zero() {
    let result = evaluate("1/0");
    assert!(!result.success);
    assert!(result.error.contains("ZeroDivisionError"));
    assert!(result.error.contains("  File \"<string>\", line 1, in <module>\n"));
}

#[test]
fn test_trace_lists_each_frame() {
    let result = evaluate("def inner():\n    return {}['k']\n\ndef outer():\n    return inner()\n\nouter()");
    assert!(!result.success);
    assert_eq!(
        result.error,
        "KeyError: 'k'\nTraceback (most recent call last):\n  File \"<string>\", line 7, in <module>\n  File \"<string>\", line 5, in outer\n  File \"<string>\", line 2, in inner\nKeyError: 'k'\n"
    );
}

#[test]
fn test_unavailable_scientific_libraries() {
    let alias = evaluate("print(np.array([1, 2]))");
    assert!(!alias.success);
    assert!(alias.error.starts_with("NameError: name 'np' is not defined\n"));

    let imported = evaluate("import pandas");
    assert!(!imported.success);
    assert!(imported
        .error
        .starts_with("ModuleNotFoundError: No module named 'pandas'\n"));

    let plot = evaluate("plt.plot([1, 2, 3])");
    assert!(!plot.success);
    assert!(plot.error.starts_with("NameError: name 'plt' is not defined\n"));
}

#[test]
fn test_best_effort_modules_are_bound() {
    let result = evaluate(
        "print(math.sqrt(16))\nprint(json.dumps({'a': [1, 2]}))\nprint(re.sub(r'\\d', '#', 'a1b2'))\nprint(datetime.timedelta(days=1).total_seconds())",
    );
    assert_clean(&result, "4.0\n{\"a\": [1, 2]}\na#b#\n86400.0\n");
}

#[test]
fn test_system_exit_is_a_fault() {
    let result = evaluate("import sys\nprint('bye')\nsys.exit()");
    assert!(!result.success);
    assert_eq!(result.output, "bye\n");
    assert!(result.error.starts_with("SystemExit: \nTraceback (most recent call last):\n"));
}

#[test]
fn test_idempotent_on_pure_code() {
    let code = "total = 0\nfor i in range(10):\n    total += i * i\nprint(total, sorted([3, 1, 2]))";
    let a = evaluate(code);
    let b = evaluate(code);
    assert_eq!(a.success, b.success);
    assert_eq!(a.output, b.output);
    assert_eq!(a.error, b.error);
    assert_clean(&a, "285 [1, 2, 3]\n");
}

#[test]
fn test_concurrent_calls_do_not_mix_output() {
    let evaluator = Evaluator::default();
    let handles: Vec<_> = (0..8)
        .map(|n| {
            let evaluator = evaluator.clone();
            thread::spawn(move || {
                let code = format!("for i in range(50):\n    print({})", n);
                (n, evaluator.evaluate(&code))
            })
        })
        .collect();

    for handle in handles {
        let (n, result) = handle.join().unwrap();
        assert!(result.success);
        let expected = format!("{}\n", n).repeat(50);
        assert_eq!(result.output, expected);
    }
}

#[test]
fn test_config_file_drives_evaluator() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"denied_modules": ["random"], "recursion_limit": 100}}"#).unwrap();

    let config = EvaluatorConfig::load_from_file(file.path()).unwrap();
    let evaluator = Evaluator::new(config).unwrap();
    assert_eq!(evaluator.config().recursion_limit, 100);

    let result = evaluator.evaluate("random.random()");
    assert!(!result.success);
    assert!(result.error.starts_with("NameError: name 'random' is not defined\n"));
}

#[test]
fn test_result_json_contract() {
    let result = evaluate("print('hi')");
    let json = serde_json::to_value(&result).unwrap();
    let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys, ["success", "output", "error", "execution_time"]);
}

#[test]
fn test_deep_structures_raise_recursion_error() {
    let build = "a = []\nb = []\nfor _ in range(100000):\n    a = [a]\n    b = [b]\n";

    let compared = evaluate(&format!("{}print(a == b)", build));
    assert!(!compared.success);
    assert!(
        compared
            .error
            .starts_with("RecursionError: maximum recursion depth exceeded in comparison\n"),
        "{}",
        compared.error
    );
    assert!(compared.error.contains("line 6, in <module>"));

    let ordered = evaluate(&format!("{}print(a < b)", build));
    assert!(ordered.error.starts_with("RecursionError: "));

    let rendered = evaluate(&format!("{}print(a)", build));
    assert!(!rendered.success);
    assert_eq!(rendered.output, "");
    assert!(rendered
        .error
        .starts_with("RecursionError: maximum recursion depth exceeded while getting the repr of an object\n"));

    let hashed = evaluate("t = ()\nfor _ in range(100000):\n    t = (t,)\ns = {t}");
    assert!(hashed.error.starts_with("RecursionError: "));

    let shallow = evaluate("a = [[[1]]]\nb = [[[1]]]\nprint(a == b, a)");
    assert_clean(&shallow, "True [[[1]]]\n");
}

#[test]
fn test_self_referencing_containers() {
    let result = evaluate("a = [1]\na.append(a)\nd = {}\nd['self'] = d\nprint(a, d, a == a)");
    assert_clean(&result, "[1, [...]] {'self': {...}} True\n");
}

#[cfg(target_os = "linux")]
fn resident_bytes() -> u64 {
    let statm = std::fs::read_to_string("/proc/self/statm").unwrap();
    let pages: u64 = statm.split_whitespace().nth(1).unwrap().parse().unwrap();
    pages * 4096
}

#[test]
#[cfg(target_os = "linux")]
fn test_memory_flat_across_calls() {
    let evaluator = Evaluator::default();
    let code = "data = list(range(1000000))\ndef keep():\n    return data\ncycle = [keep]\ncycle.append(cycle)\nprint(len(keep()))";
    for _ in 0..3 {
        assert_clean(&evaluator.evaluate(code), "1000000\n");
    }

    let baseline = resident_bytes();
    for _ in 0..20 {
        assert_clean(&evaluator.evaluate(code), "1000000\n");
    }
    let growth = resident_bytes().saturating_sub(baseline);
    assert!(
        growth < 96 * 1024 * 1024,
        "resident memory grew by {} bytes over 20 calls",
        growth
    );
}

#[test]
fn test_range_at_integer_bounds() {
    let result = evaluate(
        "r = range(-9223372036854775808, 9223372036854775807)\nprint(r[0], r[-1], 0 in r, 9223372036854775807 in r)\nw = range(0, 9223372036854775807, 4611686018427387904)\nprint(len(w), w[-1], w[::-1])\nlen(r)",
    );
    assert!(!result.success);
    assert_eq!(
        result.output,
        "-9223372036854775808 9223372036854775806 True False\n2 4611686018427387904 range(4611686018427387904, -4611686018427387904, -4611686018427387904)\n"
    );
    assert!(result
        .error
        .starts_with("OverflowError: Python int too large to convert to C ssize_t\n"));
}

#[test]
fn test_most_negative_integer_literal() {
    let result = evaluate("x = -9223372036854775808\nprint(x, x + 1, -9223372036854775807 - 1 == x)");
    assert_clean(&result, "-9223372036854775808 -9223372036854775807 True\n");

    let too_big = evaluate("print(9223372036854775808)");
    assert!(too_big.error.starts_with("SyntaxError: "));
}

#[test]
fn test_evaluator_failure_surfaces_as_result() {
    let config = EvaluatorConfig {
        worker_stack_mb: usize::MAX,
        ..Default::default()
    };
    let result = Evaluator::new(config).unwrap().evaluate("print('never runs')");
    assert!(!result.success);
    assert_eq!(result.output, "");
    assert!(result.error.starts_with("Execution failed: "), "{}", result.error);
    assert!(result.execution_time >= 0.0);
}
