//! `os` and `os.path`: read-only process and filesystem queries.
//!
//! Nothing here creates, removes or rewrites files, spawns processes or
//! changes the environment.

use crate::capability::modules::str_arg;
use crate::capability::ProviderError;
use crate::interp::fault::{ExcKind, Fault};
use crate::interp::format::quote_str;
use crate::interp::value::{Args, Dict, Module, Value};
use crate::interp::{ops, PyResult};
use std::io::ErrorKind;
use std::path::Path;
use std::rc::Rc;

fn os_error(err: std::io::Error, path: &str) -> Fault {
    let (kind, errno) = match err.kind() {
        ErrorKind::NotFound => (ExcKind::FileNotFoundError, 2),
        ErrorKind::PermissionDenied => (ExcKind::OsError, 13),
        _ => (ExcKind::OsError, err.raw_os_error().unwrap_or(5)),
    };
    let reason = match err.kind() {
        ErrorKind::NotFound => "No such file or directory".to_string(),
        ErrorKind::PermissionDenied => "Permission denied".to_string(),
        _ => err.to_string(),
    };
    Fault::new(
        kind,
        format!("[Errno {}] {}: {}", errno, reason, quote_str(path)),
    )
}

fn current_dir() -> PyResult<String> {
    std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|e| os_error(e, "."))
}

fn path_join(parts: &[Rc<str>]) -> String {
    let mut joined = String::new();
    for part in parts {
        if part.starts_with('/') {
            joined = part.to_string();
        } else if joined.is_empty() || joined.ends_with('/') {
            joined.push_str(part);
        } else {
            joined.push('/');
            joined.push_str(part);
        }
    }
    joined
}

fn split_at_last_slash(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..=i], &path[i + 1..]),
        None => ("", path),
    }
}

fn dirname(path: &str) -> String {
    let (head, _) = split_at_last_slash(path);
    let trimmed = head.trim_end_matches('/');
    if trimmed.is_empty() {
        head.to_string()
    } else {
        trimmed.to_string()
    }
}

fn splitext(path: &str) -> (String, String) {
    let (_, base) = split_at_last_slash(path);
    let leading_dots = base.len() - base.trim_start_matches('.').len();
    match base.rfind('.') {
        Some(dot) if dot >= leading_dots && dot > 0 => {
            let cut = path.len() - base.len() + dot;
            (path[..cut].to_string(), path[cut..].to_string())
        }
        _ => (path.to_string(), String::new()),
    }
}

/// Collapse `.`, `..` and repeated separators
fn normpath(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." if parts.last().is_some_and(|p| *p != "..") => {
                parts.pop();
            }
            ".." if absolute => {}
            other => parts.push(other),
        }
    }
    let body = parts.join("/");
    match (absolute, body.is_empty()) {
        (true, _) => format!("/{}", body),
        (false, true) => ".".to_string(),
        (false, false) => body,
    }
}

fn path_module() -> Module {
    let module = Module::new("os.path", Some("Common operations on pathnames."));
    module.set("sep", Value::str("/"));

    module.add_fn("join", |_, args| {
        args.no_keywords("join")?;
        args.check("join", 1, usize::MAX)?;
        let parts = (0..args.len())
            .map(|i| str_arg(&args, i, "join"))
            .collect::<PyResult<Vec<_>>>()?;
        Ok(Value::string(path_join(&parts)))
    });
    module.add_fn("exists", |_, args| {
        args.check("exists", 1, 1)?;
        let path = str_arg(&args, 0, "exists")?;
        Ok(Value::Bool(Path::new(&*path).exists()))
    });
    module.add_fn("isfile", |_, args| {
        args.check("isfile", 1, 1)?;
        let path = str_arg(&args, 0, "isfile")?;
        Ok(Value::Bool(Path::new(&*path).is_file()))
    });
    module.add_fn("isdir", |_, args| {
        args.check("isdir", 1, 1)?;
        let path = str_arg(&args, 0, "isdir")?;
        Ok(Value::Bool(Path::new(&*path).is_dir()))
    });
    module.add_fn("basename", |_, args| {
        args.check("basename", 1, 1)?;
        let path = str_arg(&args, 0, "basename")?;
        Ok(Value::str(split_at_last_slash(&path).1))
    });
    module.add_fn("dirname", |_, args| {
        args.check("dirname", 1, 1)?;
        let path = str_arg(&args, 0, "dirname")?;
        Ok(Value::string(dirname(&path)))
    });
    module.add_fn("splitext", |_, args| {
        args.check("splitext", 1, 1)?;
        let path = str_arg(&args, 0, "splitext")?;
        let (root, ext) = splitext(&path);
        Ok(Value::tuple(vec![Value::string(root), Value::string(ext)]))
    });
    module.add_fn("normpath", |_, args| {
        args.check("normpath", 1, 1)?;
        let path = str_arg(&args, 0, "normpath")?;
        Ok(Value::string(normpath(&path)))
    });
    module.add_fn("abspath", |_, args| {
        args.check("abspath", 1, 1)?;
        let path = str_arg(&args, 0, "abspath")?;
        let full = if path.starts_with('/') {
            path.to_string()
        } else {
            path_join(&[Rc::from(current_dir()?), path])
        };
        Ok(Value::string(normpath(&full)))
    });
    module.add_fn("isabs", |_, args| {
        args.check("isabs", 1, 1)?;
        let path = str_arg(&args, 0, "isabs")?;
        Ok(Value::Bool(path.starts_with('/')))
    });
    module
}

fn environ_snapshot() -> PyResult<Value> {
    let mut vars: Vec<(String, String)> = std::env::vars_os()
        .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
        .collect();
    vars.sort();
    let mut dict = Dict::new();
    for (key, value) in vars {
        let key = Value::string(key);
        dict.insert(ops::hash_key(&key)?, key, Value::string(value));
    }
    Ok(Value::dict(dict))
}

fn getenv(mut args: Args) -> PyResult<Value> {
    let default = args.take(1, "default").unwrap_or(Value::None);
    args.reject_unknown_keywords("getenv")?;
    let key = match args.take_keyword("key") {
        Some(key) => key.expect_str("getenv")?,
        None => str_arg(&args, 0, "getenv")?,
    };
    Ok(std::env::var(&*key).map(Value::string).unwrap_or(default))
}

pub fn provide() -> Result<Rc<Module>, ProviderError> {
    let module = Module::new("os", Some("OS routines for the host, read-only."));
    let windows = cfg!(windows);

    module.set("name", Value::str(if windows { "nt" } else { "posix" }));
    module.set("sep", Value::str("/"));
    module.set("linesep", Value::str(if windows { "\r\n" } else { "\n" }));
    module.set("curdir", Value::str("."));
    module.set("pardir", Value::str(".."));
    module.set(
        "environ",
        environ_snapshot().map_err(|fault| ProviderError::Failed {
            module: "os".to_string(),
            reason: fault.summary(),
        })?,
    );
    module.set("path", Value::Module(Rc::new(path_module())));

    module.add_fn("getcwd", |_, args| {
        args.check("getcwd", 0, 0)?;
        current_dir().map(Value::string)
    });
    module.add_fn("getenv", |_, args| getenv(args));
    module.add_fn("getpid", |_, args| {
        args.check("getpid", 0, 0)?;
        Ok(Value::Int(std::process::id() as i64))
    });
    module.add_fn("cpu_count", |_, args| {
        args.check("cpu_count", 0, 0)?;
        Ok(std::thread::available_parallelism()
            .map(|n| Value::Int(n.get() as i64))
            .unwrap_or(Value::None))
    });
    module.add_fn("listdir", |_, args| {
        args.check("listdir", 0, 1)?;
        let path = match args.get(0) {
            Some(_) => str_arg(&args, 0, "listdir")?.to_string(),
            None => ".".to_string(),
        };
        let entries = std::fs::read_dir(&path).map_err(|e| os_error(e, &path))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| os_error(e, &path))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(Value::list(names.into_iter().map(Value::string).collect()))
    });

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
    fn test_path_helpers() {
        assert_eq!(path_join(&[Rc::from("a"), Rc::from("b/"), Rc::from("c")]), "a/b/c");
        assert_eq!(path_join(&[Rc::from("a"), Rc::from("/abs")]), "/abs");
        assert_eq!(dirname("/usr/lib/x.so"), "/usr/lib");
        assert_eq!(dirname("/x"), "/");
        assert_eq!(splitext("dir/archive.tar.gz"), ("dir/archive.tar".to_string(), ".gz".to_string()));
        assert_eq!(splitext(".bashrc"), (".bashrc".to_string(), String::new()));
        assert_eq!(normpath("/a/./b/../c//d"), "/a/c/d");
        assert_eq!(normpath("../x/.."), "..");
    }

    #[cfg(unix)]
    #[test]
    fn test_os_path_from_code() {
        let (result, out) = run(
            "import os.path\nprint(os.path.join('a', 'b'), os.path.basename('/tmp/f.txt'), os.path.splitext('f.txt'))\nprint(os.path.isabs(os.getcwd()), os.name)",
        );
        assert!(result.is_ok());
        assert_eq!(out, "a/b f.txt ('f', '.txt')\nTrue posix\n");
    }

    #[test]
    fn test_listdir_and_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b.txt"), "x").expect("write");
        std::fs::write(dir.path().join("a.txt"), "x").expect("write");
        let source = format!(
            "print(os.listdir({}))\nprint(os.getenv('PYBOX_SURELY_UNSET', 'fallback'))",
            quote_str(&dir.path().to_string_lossy())
        );
        let (result, out) = run(&source);
        assert!(result.is_ok());
        assert_eq!(out, "['a.txt', 'b.txt']\nfallback\n");
    }

    #[test]
    fn test_missing_directory() {
        let (result, _) = run("os.listdir('/definitely/not/here')");
        let fault = result.unwrap_err();
        assert_eq!(fault.kind(), ExcKind::FileNotFoundError);
        assert_eq!(
            fault.message(),
            "[Errno 2] No such file or directory: '/definitely/not/here'"
        );
    }
}
