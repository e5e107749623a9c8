//! Tree-walking evaluator.
//!
//! One [`Interpreter`] serves exactly one evaluation. Its name resolution
//! ends at the builtins table installed by the capability layer; there is
//! no fallback to anything outside it.

use crate::exec::capture::{CapturedStreams, Stream};
use crate::interp::ast::{
    Arg, BinOp, CmpOp, Comprehension, Const, Expr, FStringPart, FunctionDef, Handler, Stmt,
    StmtKind,
};
use crate::interp::fault::{
    self, attribute_error, name_error, type_error, value_error, ExcKind, ExceptionObj, Fault,
    PyResult,
};
use crate::interp::format;
use crate::interp::heap::{self, Heap};
use crate::interp::methods;
use crate::interp::ops;
use crate::interp::parser;
use crate::interp::types;
use crate::interp::value::{
    Args, BoundMethod, BuiltinType, Dict, Function, IterObj, IterState, Scope, ScopeKind, SliceObj,
    TypeObj, Value,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Default limit on nested calls of user functions.
pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

/// Outcome of executing a statement.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter {
    builtins: HashMap<String, Value>,
    modules: HashMap<String, Value>,
    globals: Rc<Scope>,
    streams: CapturedStreams,
    depth: usize,
    recursion_limit: usize,
    /// Faults whose handlers are running, for bare `raise`.
    handling: Vec<Fault>,
    heap: Heap,
}

impl Interpreter {
    pub fn new(streams: CapturedStreams, recursion_limit: usize) -> Self {
        let heap = Heap::open();
        fault::set_nesting_limit(recursion_limit);
        let globals = Scope::module();
        globals.set("__name__", Value::str("__main__"));
        Interpreter {
            builtins: HashMap::new(),
            modules: HashMap::new(),
            globals,
            streams,
            depth: 0,
            recursion_limit,
            handling: Vec::new(),
            heap,
        }
    }

    pub fn define_builtin(&mut self, name: &str, value: Value) {
        self.builtins.insert(name.to_string(), value);
    }

    pub fn builtin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builtins.keys().cloned().collect();
        names.sort();
        names
    }

    /// Make a module importable under its dotted name.
    pub fn register_module(&mut self, name: &str, module: Value) {
        self.modules.insert(name.to_string(), module);
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.set(name, value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    pub fn global_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.globals.vars.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    /// Append text to one of the captured streams.
    pub fn write(&mut self, stream: Stream, text: &str) {
        self.streams.sink_mut(stream).write(text);
    }

    pub fn streams(&self) -> &CapturedStreams {
        &self.streams
    }

    pub fn into_streams(mut self) -> CapturedStreams {
        std::mem::take(&mut self.streams)
    }

    /// Parse and execute a whole program in the global scope.
    pub fn run(&mut self, source: &str) -> PyResult<()> {
        let program = parser::parse(source).map_err(|fault| {
            let line = source
                .lines()
                .nth(fault.line().saturating_sub(1))
                .map(str::to_string);
            Fault::syntax(fault, line)
        })?;
        let globals = self.globals.clone();
        self.exec_block(&program, &globals)
            .map(|_| ())
            .map_err(|fault| fault.leave_frame("<module>"))
    }

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> PyResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, scope) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(fault) => return Err(fault.at_line(stmt.line)),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> PyResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, scope)?,
            StmtKind::AnnAssign { target, value } => {
                if let Some(value) = value {
                    let value = self.eval(value, scope)?;
                    self.assign(target, value, scope)?;
                }
            }
            StmtKind::If { test, body, orelse } => {
                let test = self.eval(test, scope)?;
                return if ops::truthy(&test) {
                    self.exec_block(body, scope)
                } else {
                    self.exec_block(orelse, scope)
                };
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    let test = self.eval(test, scope)?;
                    if !ops::truthy(&test) {
                        break;
                    }
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, scope)?;
                let mut cursor = self.iterate(&iterable)?;
                while let Some(item) = cursor.next(self)? {
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::FunctionDef(def) => {
                let mut decorators = Vec::with_capacity(def.decorators.len());
                for decorator in &def.decorators {
                    decorators.push(self.eval(decorator, scope)?);
                }
                let mut func = self.make_function(def, scope, &def.name)?;
                for decorator in decorators.iter().rev() {
                    func = self.call(decorator, Args::new(vec![func]))?;
                }
                self.store_name(&def.name, func, scope);
            }
            StmtKind::ClassDef { .. } => {
                // Class creation needs `__build_class__`, which the
                // capability table never grants.
                return Err(Fault::new(ExcKind::NameError, "__build_class__ not found"));
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody, scope),
            StmtKind::Raise { exc, cause } => return Err(self.raise(exc.as_ref(), cause.as_ref(), scope)?),
            StmtKind::Assert { test, msg } => {
                let test = self.eval(test, scope)?;
                if !ops::truthy(&test) {
                    let args = match msg {
                        Some(msg) => vec![self.eval(msg, scope)?],
                        None => Vec::new(),
                    };
                    let exc = ExceptionObj::new(ExcKind::AssertionError, args);
                    return Err(Fault::from_exception(Rc::new(exc)));
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
            }
            StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    match &alias.asname {
                        Some(asname) => {
                            let module = self.import_module(&alias.name)?;
                            self.store_name(asname, module, scope);
                        }
                        None => {
                            self.import_module(&alias.name)?;
                            let top = alias.name.split('.').next().unwrap_or(&alias.name);
                            let module = self.import_module(top)?;
                            self.store_name(top, module, scope);
                        }
                    }
                }
            }
            StmtKind::ImportFrom { module, names } => self.import_from(module, names, scope)?,
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        scope: &Rc<Scope>,
    ) -> PyResult<Flow> {
        let outcome = match self.exec_block(body, scope) {
            Ok(Flow::Normal) => self.exec_block(orelse, scope),
            Ok(flow) => Ok(flow),
            Err(fault) => self.handle(fault, handlers, scope),
        };
        if finalbody.is_empty() {
            return outcome;
        }
        match self.exec_block(finalbody, scope)? {
            Flow::Normal => outcome,
            // A jump out of `finally` discards the pending outcome.
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, fault: Fault, handlers: &[Handler], scope: &Rc<Scope>) -> PyResult<Flow> {
        for handler in handlers {
            let matched = match &handler.typ {
                None => true,
                Some(expr) => {
                    let filter = self.eval(expr, scope).map_err(|f| f.at_line(handler.line))?;
                    exception_matches(fault.kind(), &filter).map_err(|f| f.at_line(handler.line))?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store_name(name, Value::Exception(fault.exception().clone()), scope);
            }
            self.handling.push(fault);
            let result = self.exec_block(&handler.body, scope);
            self.handling.pop();
            if let Some(name) = &handler.name {
                self.unbind_name(name, scope);
            }
            return result;
        }
        Err(fault)
    }

    fn raise(&mut self, exc: Option<&Expr>, cause: Option<&Expr>, scope: &Rc<Scope>) -> PyResult<Fault> {
        let Some(expr) = exc else {
            return Ok(match self.handling.last() {
                Some(fault) => fault.clone(),
                None => Fault::new(ExcKind::RuntimeError, "No active exception to reraise"),
            });
        };
        let value = self.eval(expr, scope)?;
        if let Some(cause) = cause {
            let cause = self.eval(cause, scope)?;
            if !matches!(cause, Value::None | Value::Exception(_) | Value::Type(TypeObj::Exception(_))) {
                return Ok(type_error("exception causes must derive from BaseException"));
            }
        }
        Ok(match value {
            Value::Exception(obj) => Fault::from_exception(obj),
            Value::Type(TypeObj::Exception(kind)) => {
                Fault::from_exception(Rc::new(ExceptionObj::new(kind, Vec::new())))
            }
            _ => type_error("exceptions must derive from BaseException"),
        })
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr, scope: &Rc<Scope>) -> PyResult<()> {
        match target {
            Expr::Name(name) => {
                let current = self.load_name(name, scope)?;
                let rhs = self.eval(value, scope)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.store_name(name, result, scope);
            }
            Expr::Attribute(obj, name) => {
                let obj = self.eval(obj, scope)?;
                let current = self.get_attribute(&obj, name)?;
                let rhs = self.eval(value, scope)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.set_attribute(&obj, name, result)?;
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                let index = self.eval(index, scope)?;
                let current = ops::get_item(&obj, &index)?;
                let rhs = self.eval(value, scope)?;
                let result = self.inplace_op(op, current, rhs)?;
                ops::set_item(&obj, &index, result)?;
            }
            _ => return Err(Fault::new(ExcKind::SyntaxError, "illegal expression for augmented assignment")),
        }
        Ok(())
    }

    /// `a op= b`: lists, sets and dicts are updated in place.
    fn inplace_op(&mut self, op: BinOp, current: Value, rhs: Value) -> PyResult<Value> {
        match (&current, op) {
            (Value::List(list), BinOp::Add) => {
                let items = self.collect(&rhs)?;
                list.borrow_mut().extend(items);
                Ok(current)
            }
            (Value::Set(set), BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor) => {
                let Value::Set(other) = &rhs else {
                    return ops::binary_op(op, &current, &rhs);
                };
                let other = other.borrow().clone();
                let updated = ops::set_op(op, &set.borrow(), &other);
                *set.borrow_mut() = updated;
                Ok(current)
            }
            (Value::Dict(dict), BinOp::BitOr) => {
                methods::dict_update(self, dict, &rhs)?;
                Ok(current)
            }
            _ => ops::binary_op(op, &current, &rhs),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, scope: &Rc<Scope>) -> PyResult<()> {
        match target {
            Expr::Name(name) => {
                self.store_name(name, value, scope);
                Ok(())
            }
            Expr::Attribute(obj, name) => {
                let obj = self.eval(obj, scope)?;
                self.set_attribute(&obj, name, value)
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                let index = self.eval(index, scope)?;
                match &index {
                    Value::Slice(slice) => {
                        let items = self.collect(&value)?;
                        ops::set_slice(&obj, slice, items)
                    }
                    _ => ops::set_item(&obj, &index, value),
                }
            }
            Expr::Tuple(targets) | Expr::List(targets) => self.unpack(targets, value, scope),
            _ => Err(Fault::new(ExcKind::SyntaxError, "cannot assign to expression")),
        }
    }

    fn unpack(&mut self, targets: &[Expr], value: Value, scope: &Rc<Scope>) -> PyResult<()> {
        let items = match &value {
            Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Dict(_) | Value::Set(_)
            | Value::Range(_) | Value::Iterator(_) | Value::Native(_) => self.collect(&value)?,
            other => {
                return Err(type_error(format!(
                    "cannot unpack non-iterable {} object",
                    other.type_name()
                )))
            }
        };
        let star = targets.iter().position(|t| matches!(t, Expr::Starred(_)));
        match star {
            None => {
                if items.len() < targets.len() {
                    return Err(value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < targets.len() - 1 {
                    return Err(value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        targets.len() - 1,
                        items.len()
                    )));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                if let Expr::Starred(inner) = &targets[star] {
                    self.assign(inner, Value::list(middle), scope)?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign(target, item, scope)?;
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, target: &Expr, scope: &Rc<Scope>) -> PyResult<()> {
        match target {
            Expr::Name(name) => {
                if self.unbind_name(name, scope) {
                    Ok(())
                } else {
                    Err(name_error(name))
                }
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                let index = self.eval(index, scope)?;
                ops::del_item(&obj, &index)
            }
            Expr::Attribute(obj, name) => {
                let obj = self.eval(obj, scope)?;
                let removed = match &obj {
                    Value::Module(module) => module.attrs.borrow_mut().remove(name).is_some(),
                    Value::Function(func) => func.attrs.borrow_mut().remove(name).is_some(),
                    _ => false,
                };
                if removed {
                    Ok(())
                } else {
                    Err(no_attribute(&obj, name))
                }
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.delete(item, scope)?;
                }
                Ok(())
            }
            _ => Err(Fault::new(ExcKind::SyntaxError, "cannot delete expression")),
        }
    }

    // Name resolution

    fn load_name(&self, name: &str, scope: &Rc<Scope>) -> PyResult<Value> {
        let mut innermost = true;
        let mut current: Option<&Scope> = Some(&**scope);
        while let Some(frame) = current {
            match &frame.kind {
                ScopeKind::Module => {
                    if let Some(value) = frame.get(name) {
                        return Ok(value);
                    }
                    break;
                }
                ScopeKind::Function(def) => {
                    if def.globals.contains(name) {
                        break;
                    }
                    if let Some(value) = frame.get(name) {
                        return Ok(value);
                    }
                    if def.locals.contains(name) {
                        return Err(unbound(name, innermost));
                    }
                    innermost = false;
                }
                ScopeKind::Comprehension => {
                    if let Some(value) = frame.get(name) {
                        return Ok(value);
                    }
                }
            }
            current = frame.parent.as_deref();
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value);
        }
        self.builtins.get(name).cloned().ok_or_else(|| name_error(name))
    }

    fn store_name(&self, name: &str, value: Value, scope: &Rc<Scope>) {
        self.binding_scope(name, scope).set(name, value);
    }

    /// Remove a binding; false when it did not exist.
    fn unbind_name(&self, name: &str, scope: &Rc<Scope>) -> bool {
        self.binding_scope(name, scope).remove(name).is_some()
    }

    /// Scope that owns assignments to `name` from `scope`.
    fn binding_scope<'a>(&'a self, name: &str, scope: &'a Rc<Scope>) -> &'a Scope {
        let ScopeKind::Function(def) = &scope.kind else {
            return &**scope;
        };
        if def.globals.contains(name) {
            return &*self.globals;
        }
        if !def.nonlocals.contains(name) {
            return &**scope;
        }
        let mut current = scope.parent.as_deref();
        while let Some(frame) = current {
            if let ScopeKind::Function(outer) = &frame.kind {
                if outer.locals.contains(name) {
                    return frame;
                }
            }
            current = frame.parent.as_deref();
        }
        &*self.globals
    }

    // Expressions

    pub fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> PyResult<Value> {
        match expr {
            Expr::Name(name) => self.load_name(name, scope),
            Expr::Const(constant) => Ok(match constant {
                Const::None => Value::None,
                Const::Bool(b) => Value::Bool(*b),
                Const::Int(i) => Value::Int(*i),
                Const::Float(f) => Value::Float(*f),
                Const::Str(s) => Value::Str(s.clone()),
                Const::Ellipsis => Value::Ellipsis,
            }),
            Expr::FString(parts) => Ok(Value::string(self.render_fstring(parts, scope)?)),
            Expr::List(items) => Ok(Value::list(self.eval_items(items, scope)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_items(items, scope)?)),
            Expr::Set(items) => {
                let mut set = Dict::new();
                for item in self.eval_items(items, scope)? {
                    set.insert(ops::hash_key(&item)?, item, Value::None);
                }
                Ok(Value::set(set))
            }
            Expr::Dict(entries) => {
                let dict = heap::dict(Dict::new());
                for (key, value) in entries {
                    match key {
                        Some(key) => {
                            let key = self.eval(key, scope)?;
                            let value = self.eval(value, scope)?;
                            let hash = ops::hash_key(&key)?;
                            dict.borrow_mut().insert(hash, key, value);
                        }
                        None => {
                            let mapping = self.eval(value, scope)?;
                            if !matches!(mapping, Value::Dict(_)) {
                                return Err(type_error(format!(
                                    "'{}' object is not a mapping",
                                    mapping.type_name()
                                )));
                            }
                            methods::dict_update(self, &dict, &mapping)?;
                        }
                    }
                }
                Ok(Value::Dict(dict))
            }
            Expr::Starred(_) => Err(Fault::new(
                ExcKind::SyntaxError,
                "can't use starred expression here",
            )),
            Expr::BinOp(left, op, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                ops::binary_op(*op, &left, &right)
            }
            Expr::UnaryOp(op, operand) => {
                let operand = self.eval(operand, scope)?;
                ops::unary_op(*op, &operand)
            }
            Expr::And(left, right) => {
                let left = self.eval(left, scope)?;
                if ops::truthy(&left) {
                    self.eval(right, scope)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left, scope)?;
                if ops::truthy(&left) {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Compare(left, comparisons) => {
                let mut lhs = self.eval(left, scope)?;
                for (op, right) in comparisons {
                    let rhs = self.eval(right, scope)?;
                    let holds = match op {
                        CmpOp::In => self.contains(&rhs, &lhs)?,
                        CmpOp::NotIn => !self.contains(&rhs, &lhs)?,
                        other => ops::compare(*other, &lhs, &rhs)?,
                    };
                    if !holds {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                let test = self.eval(test, scope)?;
                if ops::truthy(&test) {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            Expr::Call(func, args) => {
                let callee = self.eval(func, scope)?;
                let args = self.eval_args(args, scope)?;
                self.call(&callee, args)
            }
            Expr::Attribute(obj, name) => {
                let obj = self.eval(obj, scope)?;
                self.get_attribute(&obj, name)
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                let index = self.eval(index, scope)?;
                ops::get_item(&obj, &index)
            }
            Expr::Slice(start, stop, step) => {
                let mut bound = |part: &Option<Box<Expr>>| -> PyResult<Value> {
                    match part {
                        Some(expr) => self.eval(expr, scope),
                        None => Ok(Value::None),
                    }
                };
                Ok(Value::Slice(Rc::new(SliceObj {
                    start: bound(start)?,
                    stop: bound(stop)?,
                    step: bound(step)?,
                })))
            }
            Expr::Lambda(def) => self.make_function(def, scope, "<lambda>"),
            Expr::ListComp(element, generators) => {
                let child = Scope::child(scope, ScopeKind::Comprehension);
                let mut out = Vec::new();
                self.comprehend(generators, 0, &child, &mut |this, s| {
                    out.push(this.eval(element, s)?);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            Expr::SetComp(element, generators) => {
                let child = Scope::child(scope, ScopeKind::Comprehension);
                let mut out = Dict::new();
                self.comprehend(generators, 0, &child, &mut |this, s| {
                    let item = this.eval(element, s)?;
                    out.insert(ops::hash_key(&item)?, item, Value::None);
                    Ok(())
                })?;
                Ok(Value::set(out))
            }
            Expr::DictComp(key, value, generators) => {
                let child = Scope::child(scope, ScopeKind::Comprehension);
                let mut out = Dict::new();
                self.comprehend(generators, 0, &child, &mut |this, s| {
                    let k = this.eval(key, s)?;
                    let v = this.eval(value, s)?;
                    out.insert(ops::hash_key(&k)?, k, v);
                    Ok(())
                })?;
                Ok(Value::dict(out))
            }
            Expr::GeneratorExp(element, generators) => {
                // Generators are produced eagerly and then consumed once.
                let child = Scope::child(scope, ScopeKind::Comprehension);
                let mut out = Vec::new();
                self.comprehend(generators, 0, &child, &mut |this, s| {
                    out.push(this.eval(element, s)?);
                    Ok(())
                })?;
                let iter = IterObj::new(BuiltinType::Generator, IterState::items(out));
                Ok(Value::Iterator(Rc::new(iter)))
            }
        }
    }

    fn eval_items(&mut self, items: &[Expr], scope: &Rc<Scope>) -> PyResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Starred(inner) => {
                    let value = self.eval(inner, scope)?;
                    out.extend(self.collect(&value)?);
                }
                other => out.push(self.eval(other, scope)?),
            }
        }
        Ok(out)
    }

    fn eval_args(&mut self, args: &[Arg], scope: &Rc<Scope>) -> PyResult<Args> {
        let mut out = Args::default();
        for arg in args {
            match arg {
                Arg::Positional(expr) => out.positional.push(self.eval(expr, scope)?),
                Arg::Star(expr) => {
                    let value = self.eval(expr, scope)?;
                    out.positional.extend(self.collect(&value)?);
                }
                Arg::Keyword(name, expr) => {
                    let value = self.eval(expr, scope)?;
                    out.keywords.push((name.clone(), value));
                }
                Arg::DoubleStar(expr) => {
                    let mapping = self.eval(expr, scope)?;
                    let Value::Dict(dict) = &mapping else {
                        return Err(type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            mapping.type_name()
                        )));
                    };
                    let entries: Vec<(Value, Value)> = dict
                        .borrow()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    for (key, value) in entries {
                        let Value::Str(key) = key else {
                            return Err(type_error("keywords must be strings"));
                        };
                        if out.keywords.iter().any(|(k, _)| **k == *key) {
                            return Err(type_error(format!(
                                "got multiple values for keyword argument '{}'",
                                key
                            )));
                        }
                        out.keywords.push((key.to_string(), value));
                    }
                }
            }
        }
        Ok(out)
    }

    fn render_fstring(&mut self, parts: &[FStringPart], scope: &Rc<Scope>) -> PyResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr, scope)?;
                    let value = match conversion {
                        Some('r') | Some('a') => Value::string(format::try_repr(&value)?),
                        Some('s') => Value::string(format::try_to_str(&value)?),
                        _ => value,
                    };
                    let spec = self.render_fstring(spec, scope)?;
                    out.push_str(&format::format_value(&value, &spec)?);
                }
            }
        }
        Ok(out)
    }

    fn comprehend(
        &mut self,
        generators: &[Comprehension],
        index: usize,
        scope: &Rc<Scope>,
        emit: &mut dyn FnMut(&mut Self, &Rc<Scope>) -> PyResult<()>,
    ) -> PyResult<()> {
        let Some(generator) = generators.get(index) else {
            return emit(self, scope);
        };
        let iterable = self.eval(&generator.iter, scope)?;
        let mut cursor = self.iterate(&iterable)?;
        'items: while let Some(item) = cursor.next(self)? {
            self.assign(&generator.target, item, scope)?;
            for condition in &generator.ifs {
                let keep = self.eval(condition, scope)?;
                if !ops::truthy(&keep) {
                    continue 'items;
                }
            }
            self.comprehend(generators, index + 1, scope, emit)?;
        }
        Ok(())
    }

    // Functions and calls

    fn make_function(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>, name: &str) -> PyResult<Value> {
        let mut defaults = Vec::with_capacity(def.params.positional.len());
        for param in &def.params.positional {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, scope)?),
                None => None,
            });
        }
        let mut kw_defaults = Vec::with_capacity(def.params.kwonly.len());
        for param in &def.params.kwonly {
            kw_defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, scope)?),
                None => None,
            });
        }
        Ok(Value::Function(heap::function(Function {
            def: def.clone(),
            name: name.to_string(),
            defaults,
            kw_defaults,
            closure: scope.clone(),
            attrs: RefCell::new(HashMap::new()),
        })))
    }

    /// Call any callable value.
    pub fn call(&mut self, callee: &Value, args: Args) -> PyResult<Value> {
        match callee {
            Value::Function(func) => self.call_function(func, args),
            Value::Builtin(builtin) => {
                let func = builtin.func.clone();
                func(self, args)
            }
            Value::Method(method) => {
                let receiver = method.receiver.clone();
                let name = method.name.clone();
                methods::call_method(self, &receiver, &name, args)
            }
            Value::Type(typ) => types::construct(self, typ, args),
            other => Err(type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, func: &Rc<Function>, args: Args) -> PyResult<Value> {
        if self.depth >= self.recursion_limit {
            return Err(Fault::new(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let scope = Scope::child(&func.closure, ScopeKind::Function(func.def.clone()));
        bind_arguments(func, args, &scope)?;
        self.depth += 1;
        let result = self.exec_block(&func.def.body, &scope);
        self.depth -= 1;
        match result {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::None),
            Err(fault) => Err(fault.leave_frame(&func.name)),
        }
    }

    // Iteration

    /// Start iterating over `value`.
    pub fn iterate(&mut self, value: &Value) -> PyResult<IterState> {
        Ok(match value {
            Value::List(list) => IterState::List {
                list: list.clone(),
                pos: 0,
            },
            Value::Tuple(items) => IterState::items(items.to_vec()),
            Value::Str(s) => IterState::items(s.chars().map(|c| Value::string(c.to_string())).collect()),
            Value::Dict(dict) | Value::Set(dict) => IterState::items(dict.borrow().keys()),
            Value::Range(range) => IterState::range(*range),
            Value::Iterator(iter) => IterState::Shared(iter.clone()),
            Value::Native(obj) => match obj.iterate() {
                Some(state) => state?,
                None => return Err(not_iterable(value)),
            },
            other => return Err(not_iterable(other)),
        })
    }

    /// Drain an iterable into a vector.
    pub fn collect(&mut self, value: &Value) -> PyResult<Vec<Value>> {
        match value {
            Value::List(list) => Ok(list.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            _ => {
                let mut cursor = self.iterate(value)?;
                let mut out = Vec::new();
                while let Some(item) = cursor.next(self)? {
                    out.push(item);
                }
                Ok(out)
            }
        }
    }

    /// `item in container`
    pub fn contains(&mut self, container: &Value, item: &Value) -> PyResult<bool> {
        if let Some(found) = ops::contains(container, item)? {
            return Ok(found);
        }
        let mut cursor = self.iterate(container)?;
        while let Some(candidate) = cursor.next(self)? {
            if ops::same_or_equal(&candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // Attributes

    pub fn get_attribute(&mut self, obj: &Value, name: &str) -> PyResult<Value> {
        match obj {
            Value::Module(module) => {
                if name == "__name__" {
                    return Ok(Value::str(&module.name));
                }
                if name == "__doc__" {
                    return Ok(module.doc.map(Value::str).unwrap_or(Value::None));
                }
                module.get(name).ok_or_else(|| {
                    attribute_error(format!(
                        "module '{}' has no attribute '{}'",
                        module.name, name
                    ))
                })
            }
            Value::Function(func) => match name {
                "__name__" | "__qualname__" => Ok(Value::str(&func.name)),
                "__doc__" => Ok(func.def.doc.as_deref().map(Value::str).unwrap_or(Value::None)),
                "__module__" => Ok(Value::str("__main__")),
                _ => func
                    .attrs
                    .borrow()
                    .get(name)
                    .cloned()
                    .ok_or_else(|| no_attribute(obj, name)),
            },
            Value::Builtin(builtin) => match name {
                "__name__" | "__qualname__" => {
                    let short = builtin.name.rsplit('.').next().unwrap_or(&builtin.name);
                    Ok(Value::str(short))
                }
                "__doc__" => Ok(builtin.doc.map(Value::str).unwrap_or(Value::None)),
                _ => Err(no_attribute(obj, name)),
            },
            Value::Type(typ) => type_attribute(typ, name),
            Value::Exception(exc) => match name {
                "args" => Ok(Value::tuple(exc.args.clone())),
                _ => Err(no_attribute(obj, name)),
            },
            Value::Native(native) => {
                if let Some(value) = native.get_attr(name) {
                    return Ok(value);
                }
                if native.method_names().contains(&name) {
                    return Ok(bound_method(obj, name));
                }
                Err(no_attribute(obj, name))
            }
            Value::Float(f) if name == "real" => Ok(Value::Float(*f)),
            Value::Float(_) if name == "imag" => Ok(Value::Float(0.0)),
            Value::Int(_) | Value::Bool(_) if name == "real" || name == "numerator" => {
                Ok(Value::Int(obj.as_int().unwrap_or(0)))
            }
            Value::Int(_) | Value::Bool(_) if name == "imag" => Ok(Value::Int(0)),
            Value::Int(_) | Value::Bool(_) if name == "denominator" => Ok(Value::Int(1)),
            Value::Slice(slice) => match name {
                "start" => Ok(slice.start.clone()),
                "stop" => Ok(slice.stop.clone()),
                "step" => Ok(slice.step.clone()),
                _ => Err(no_attribute(obj, name)),
            },
            Value::Range(range) => match name {
                "start" => Ok(Value::Int(range.start)),
                "stop" => Ok(Value::Int(range.stop)),
                "step" => Ok(Value::Int(range.step)),
                _ => Err(no_attribute(obj, name)),
            },
            other => {
                if methods::has_method(other, name) {
                    Ok(bound_method(other, name))
                } else {
                    Err(no_attribute(other, name))
                }
            }
        }
    }

    pub fn has_attribute(&mut self, obj: &Value, name: &str) -> PyResult<bool> {
        match self.get_attribute(obj, name) {
            Ok(_) => Ok(true),
            Err(fault) if fault.kind() == ExcKind::AttributeError => Ok(false),
            Err(fault) => Err(fault),
        }
    }

    pub fn set_attribute(&mut self, obj: &Value, name: &str, value: Value) -> PyResult<()> {
        match obj {
            Value::Module(module) => {
                module.set(name, value);
                Ok(())
            }
            Value::Function(func) => {
                func.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Type(typ) => Err(type_error(format!(
                "cannot set '{}' attribute of immutable type '{}'",
                name,
                typ.name()
            ))),
            other => {
                if methods::has_method(other, name) {
                    Err(attribute_error(format!(
                        "'{}' object attribute '{}' is read-only",
                        other.type_name(),
                        name
                    )))
                } else {
                    Err(no_attribute(other, name))
                }
            }
        }
    }

    /// Attribute names listed by `dir(obj)`.
    pub fn attribute_names(&self, obj: &Value) -> Vec<String> {
        let mut names: Vec<String> = match obj {
            Value::Module(module) => {
                let mut names = module.names();
                names.extend(["__doc__", "__name__"].map(String::from));
                names
            }
            Value::Function(func) => {
                let mut names: Vec<String> = func.attrs.borrow().keys().cloned().collect();
                names.extend(["__doc__", "__module__", "__name__", "__qualname__"].map(String::from));
                names
            }
            Value::Type(TypeObj::Builtin(t)) => methods::type_method_names(*t)
                .iter()
                .map(|s| s.to_string())
                .chain(["__name__".to_string()])
                .collect(),
            Value::Type(TypeObj::Native(t)) => t.attrs.keys().cloned().chain(["__name__".to_string()]).collect(),
            Value::Exception(_) => vec!["args".to_string()],
            other => methods::method_names(other).iter().map(|s| s.to_string()).collect(),
        };
        names.sort();
        names.dedup();
        names
    }

    // Imports

    /// Resolve a module by dotted name.
    pub fn import_module(&mut self, name: &str) -> PyResult<Value> {
        self.modules.get(name).cloned().ok_or_else(|| {
            Fault::new(
                ExcKind::ModuleNotFoundError,
                format!("No module named '{}'", name),
            )
        })
    }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }

    fn import_from(&mut self, module: &str, names: &[crate::interp::ast::Alias], scope: &Rc<Scope>) -> PyResult<()> {
        if module.starts_with('.') {
            return Err(Fault::new(
                ExcKind::ImportError,
                "attempted relative import with no known parent package",
            ));
        }
        let source = self.import_module(module)?;
        let Value::Module(source_module) = &source else {
            return Err(type_error(format!("'{}' is not a module", module)));
        };
        for alias in names {
            if alias.name == "*" {
                for name in source_module.names() {
                    if !name.starts_with('_') {
                        if let Some(value) = source_module.get(&name) {
                            self.store_name(&name, value, scope);
                        }
                    }
                }
                continue;
            }
            let value = match source_module.get(&alias.name) {
                Some(value) => value,
                None => {
                    let dotted = format!("{}.{}", module, alias.name);
                    self.modules.get(&dotted).cloned().ok_or_else(|| {
                        Fault::new(
                            ExcKind::ImportError,
                            format!(
                                "cannot import name '{}' from '{}' (unknown location)",
                                alias.name, module
                            ),
                        )
                    })?
                }
            };
            let bound = alias.asname.as_deref().unwrap_or(&alias.name);
            self.store_name(bound, value, scope);
        }
        Ok(())
    }
}

fn bound_method(receiver: &Value, name: &str) -> Value {
    Value::Method(Rc::new(BoundMethod {
        receiver: receiver.clone(),
        name: Rc::from(name),
    }))
}

fn no_attribute(obj: &Value, name: &str) -> Fault {
    attribute_error(format!(
        "'{}' object has no attribute '{}'",
        obj.type_name(),
        name
    ))
}

fn not_iterable(value: &Value) -> Fault {
    type_error(format!("'{}' object is not iterable", value.type_name()))
}

fn unbound(name: &str, innermost: bool) -> Fault {
    if innermost {
        Fault::new(
            ExcKind::UnboundLocalError,
            format!(
                "cannot access local variable '{}' where it is not associated with a value",
                name
            ),
        )
    } else {
        Fault::new(
            ExcKind::NameError,
            format!(
                "cannot access free variable '{}' where it is not associated with a value in enclosing scope",
                name
            ),
        )
    }
}

/// Attributes of type objects: `__name__`, unbound methods such as
/// `str.upper`, and class attributes of native types.
fn type_attribute(typ: &TypeObj, name: &str) -> PyResult<Value> {
    if name == "__name__" || name == "__qualname__" {
        return Ok(Value::string(typ.name()));
    }
    match typ {
        TypeObj::Builtin(BuiltinType::Dict) if name == "fromkeys" => {
            Ok(Value::builtin("fromkeys", methods::dict_fromkeys))
        }
        TypeObj::Builtin(t) if methods::type_method_names(*t).contains(&name) => {
            let method: Rc<str> = Rc::from(name);
            let owner = *t;
            Ok(Value::builtin(name, move |interp, mut args| {
                if args.positional.is_empty() {
                    return Err(type_error(format!(
                        "unbound method {}.{}() needs an argument",
                        owner.name(),
                        method
                    )));
                }
                let receiver = args.positional.remove(0);
                if !receiver.builtin_type().is_subtype_of(owner) {
                    return Err(type_error(format!(
                        "descriptor '{}' for '{}' objects doesn't apply to a '{}' object",
                        method,
                        owner.name(),
                        receiver.type_name()
                    )));
                }
                methods::call_method(interp, &receiver, &method, args)
            }))
        }
        TypeObj::Native(native) => native.attrs.get(name).cloned().ok_or_else(|| {
            attribute_error(format!(
                "type object '{}' has no attribute '{}'",
                native.name, name
            ))
        }),
        other => Err(attribute_error(format!(
            "type object '{}' has no attribute '{}'",
            other.name(),
            name
        ))),
    }
}

/// `isinstance`-style matching of an exception kind against an `except` filter.
impl Drop for Interpreter {
    /// Break the cycles the program built, such as a function held by the
    /// globals it closes over.
    fn drop(&mut self) {
        self.handling.clear();
        let roots = self
            .builtins
            .drain()
            .chain(self.modules.drain())
            .map(|(_, value)| value)
            .collect();
        self.heap.release(roots);
    }
}

pub fn exception_matches(kind: ExcKind, filter: &Value) -> PyResult<bool> {
    match filter {
        Value::Type(TypeObj::Exception(expected)) => Ok(kind.is_subclass_of(*expected)),
        Value::Tuple(items) => {
            for item in items.iter() {
                if exception_matches(kind, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

/// Bind call arguments to the parameters of `func` inside `scope`.
fn bind_arguments(func: &Function, args: Args, scope: &Scope) -> PyResult<()> {
    let params = &func.def.params;
    let name = &func.name;
    let given = args.positional.len();
    let mut slots: Vec<Option<Value>> = vec![None; params.positional.len()];
    let mut extra = Vec::new();
    for (i, value) in args.positional.into_iter().enumerate() {
        match slots.get_mut(i) {
            Some(slot) => *slot = Some(value),
            None => extra.push(value),
        }
    }
    if !extra.is_empty() && params.vararg.is_none() {
        let required = func.defaults.iter().filter(|d| d.is_none()).count();
        let total = params.positional.len();
        let expected = if required == total {
            format!("{} positional argument{}", total, if total == 1 { "" } else { "s" })
        } else {
            format!("from {} to {} positional arguments", required, total)
        };
        return Err(type_error(format!(
            "{}() takes {} but {} {} given",
            name,
            expected,
            given,
            if given == 1 { "was" } else { "were" }
        )));
    }

    let mut kwonly: Vec<Option<Value>> = vec![None; params.kwonly.len()];
    let mut kwargs = Dict::new();
    for (key, value) in args.keywords {
        if let Some(i) = params.positional.iter().position(|p| p.name == key) {
            if slots[i].is_some() {
                return Err(type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    name, key
                )));
            }
            slots[i] = Some(value);
        } else if let Some(i) = params.kwonly.iter().position(|p| p.name == key) {
            kwonly[i] = Some(value);
        } else if params.kwarg.is_some() {
            let key = Value::string(key);
            kwargs.insert(ops::hash_key(&key)?, key, value);
        } else {
            return Err(type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                name, key
            )));
        }
    }

    let mut missing = Vec::new();
    for (i, slot) in slots.iter_mut().enumerate() {
        if slot.is_none() {
            match &func.defaults[i] {
                Some(default) => *slot = Some(default.clone()),
                None => missing.push(params.positional[i].name.clone()),
            }
        }
    }
    if !missing.is_empty() {
        return Err(missing_arguments(name, "positional", &missing));
    }
    for (i, slot) in kwonly.iter_mut().enumerate() {
        if slot.is_none() {
            match &func.kw_defaults[i] {
                Some(default) => *slot = Some(default.clone()),
                None => missing.push(params.kwonly[i].name.clone()),
            }
        }
    }
    if !missing.is_empty() {
        return Err(missing_arguments(name, "keyword-only", &missing));
    }

    for (param, value) in params.positional.iter().zip(slots) {
        scope.set(&param.name, value.unwrap_or(Value::None));
    }
    for (param, value) in params.kwonly.iter().zip(kwonly) {
        scope.set(&param.name, value.unwrap_or(Value::None));
    }
    if let Some(vararg) = &params.vararg {
        scope.set(vararg, Value::tuple(extra));
    }
    if let Some(kwarg) = &params.kwarg {
        scope.set(kwarg, Value::dict(kwargs));
    }
    Ok(())
}

fn missing_arguments(func: &str, kind: &str, names: &[String]) -> Fault {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    let list = match quoted.as_slice() {
        [one] => one.clone(),
        [first, second] => format!("{} and {}", first, second),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
        [] => String::new(),
    };
    type_error(format!(
        "{}() missing {} required {} argument{}: {}",
        func,
        names.len(),
        kind,
        if names.len() == 1 { "" } else { "s" },
        list
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (PyResult<()>, String) {
        let mut interp = Interpreter::new(CapturedStreams::default(), DEFAULT_RECURSION_LIMIT);
        interp.define_builtin(
            "ZeroDivisionError",
            Value::Type(TypeObj::Exception(ExcKind::ZeroDivisionError)),
        );
        interp.define_builtin(
            "emit",
            Value::builtin("emit", |interp, args| {
                let text: Vec<String> = args.positional.iter().map(format::to_str).collect();
                interp.write(Stream::Stdout, &format!("{}\n", text.join(" ")));
                Ok(Value::None)
            }),
        );
        let result = interp.run(source);
        (result, interp.into_streams().stdout.into_string())
    }

    #[test]
    fn test_closures_and_nonlocal() {
        let (result, out) = run(
            "def counter():\n    n = 0\n    def inc():\n        nonlocal n\n        n += 1\n        return n\n    return inc\nc = counter()\nc()\nemit(c())\n",
        );
        assert!(result.is_ok());
        assert_eq!(out, "2\n");
    }

    #[test]
    fn test_unbound_local_is_reported() {
        let (result, _) = run("x = 1\ndef f():\n    emit(x)\n    x = 2\nf()\n");
        let fault = result.unwrap_err();
        assert_eq!(fault.kind(), ExcKind::UnboundLocalError);
        assert_eq!(fault.frames().len(), 2);
    }

    #[test]
    fn test_try_except_finally_ordering() {
        let (result, out) = run(
            "try:\n    1/0\nexcept ZeroDivisionError as e:\n    emit('caught', e)\nelse:\n    emit('else')\nfinally:\n    emit('finally')\n",
        );
        assert!(result.is_ok());
        assert_eq!(out, "caught division by zero\nfinally\n");
    }

    #[test]
    fn test_handler_for_unknown_name_faults() {
        let (result, out) = run("try:\n    1/0\nexcept RuntimeError:\n    emit('no')\nfinally:\n    emit('finally')\n");
        assert_eq!(result.unwrap_err().kind(), ExcKind::NameError);
        assert_eq!(out, "finally\n");
    }

    #[test]
    fn test_bare_except_and_reraise() {
        let (result, out) = run("try:\n    [][1]\nexcept:\n    emit('handled')\n    raise\n");
        assert_eq!(out, "handled\n");
        let fault = result.unwrap_err();
        assert_eq!(fault.kind(), ExcKind::IndexError);
        assert_eq!(fault.frames()[0].line, 2);
    }

    #[test]
    fn test_star_unpacking() {
        let (result, out) = run("a, *b, c = [1, 2, 3, 4]\nemit(a, b, c)\n");
        assert!(result.is_ok());
        assert_eq!(out, "1 [2, 3] 4\n");
    }

    #[test]
    fn test_argument_binding_errors() {
        let (result, _) = run("def f(a, b):\n    pass\nf(1)\n");
        assert_eq!(
            result.unwrap_err().message(),
            "f() missing 1 required positional argument: 'b'"
        );
        let (result, _) = run("def f(a, b=2):\n    pass\nf(1, 2, 3)\n");
        assert_eq!(
            result.unwrap_err().message(),
            "f() takes from 1 to 2 positional arguments but 3 were given"
        );
    }

    #[test]
    fn test_recursion_limit() {
        let mut interp = Interpreter::new(CapturedStreams::default(), 50);
        let fault = interp.run("def f(n):\n    return f(n + 1)\nf(0)\n").unwrap_err();
        assert_eq!(fault.kind(), ExcKind::RecursionError);
    }

    #[test]
    fn test_class_definition_is_refused() {
        let (result, _) = run("class A:\n    pass\n");
        assert_eq!(result.unwrap_err().summary(), "NameError: __build_class__ not found");
    }

    #[test]
    fn test_namespace_freed_after_drop() {
        let mut interp = Interpreter::new(CapturedStreams::default(), DEFAULT_RECURSION_LIMIT);
        let source = "data = [1, 2, 3]\ndef keep():\n    return data\nitems = [keep]\nitems.append(items)\nkeep.me = keep\n";
        assert!(interp.run(source).is_ok());
        let globals = Rc::downgrade(&interp.globals);
        let data = match interp.global("data") {
            Some(Value::List(list)) => Rc::downgrade(&list),
            _ => panic!("data is not a list"),
        };
        let keep = match interp.global("keep") {
            Some(Value::Function(func)) => Rc::downgrade(&func),
            _ => panic!("keep is not a function"),
        };
        drop(interp);
        assert!(globals.upgrade().is_none());
        assert!(data.upgrade().is_none());
        assert!(keep.upgrade().is_none());
    }

    #[test]
    fn test_comprehension_scoping() {
        let (result, out) = run("x = 'outer'\nys = [x for x in (0, 1, 2)]\nemit(x, ys)\n");
        assert!(result.is_ok());
        assert_eq!(out, "outer [0, 1, 2]\n");
    }
}
