//! Runtime values of the evaluated language.

use crate::interp::ast::{BinOp, FunctionDef};
use crate::interp::fault::{type_error, ExcKind, ExceptionObj, Fault, PyResult};
use crate::interp::heap;
use crate::interp::interpreter::Interpreter;
use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Host callable: receives the running interpreter and the call arguments.
pub type NativeFn = Rc<dyn Fn(&mut Interpreter, Args) -> PyResult<Value>>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Ellipsis,
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Dict>>),
    Range(RangeObj),
    Slice(Rc<SliceObj>),
    Function(Rc<Function>),
    Builtin(Rc<Builtin>),
    Method(Rc<BoundMethod>),
    Module(Rc<Module>),
    Type(TypeObj),
    Exception(Rc<ExceptionObj>),
    Iterator(Rc<IterObj>),
    Native(Rc<dyn NativeObject>),
}

impl Value {
    pub fn str(text: &str) -> Value {
        Value::Str(Rc::from(text))
    }

    pub fn string(text: String) -> Value {
        Value::Str(Rc::from(text))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(heap::list(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(heap::dict(dict))
    }

    pub fn set(dict: Dict) -> Value {
        Value::Set(heap::dict(dict))
    }

    pub fn builtin(name: &str, func: impl Fn(&mut Interpreter, Args) -> PyResult<Value> + 'static) -> Value {
        Value::Builtin(Rc::new(Builtin {
            name: Rc::from(name),
            doc: None,
            func: Rc::new(func),
        }))
    }

    pub fn native(obj: impl NativeObject + 'static) -> Value {
        Value::Native(Rc::new(obj))
    }

    /// Name of the value's type as shown in messages (`'int'`, `'NoneType'`).
    pub fn type_name(&self) -> String {
        match self {
            Value::Native(obj) => short_name(obj.type_name()).to_string(),
            Value::Exception(exc) => exc.kind.name().to_string(),
            Value::Iterator(it) => it.name.to_string(),
            other => other.builtin_type().name().to_string(),
        }
    }

    pub fn builtin_type(&self) -> BuiltinType {
        match self {
            Value::None => BuiltinType::NoneType,
            Value::Bool(_) => BuiltinType::Bool,
            Value::Int(_) => BuiltinType::Int,
            Value::Float(_) => BuiltinType::Float,
            Value::Str(_) => BuiltinType::Str,
            Value::Ellipsis => BuiltinType::Ellipsis,
            Value::List(_) => BuiltinType::List,
            Value::Tuple(_) => BuiltinType::Tuple,
            Value::Dict(_) => BuiltinType::Dict,
            Value::Set(_) => BuiltinType::Set,
            Value::Range(_) => BuiltinType::Range,
            Value::Slice(_) => BuiltinType::Slice,
            Value::Function(_) => BuiltinType::Function,
            Value::Builtin(_) => BuiltinType::BuiltinFunction,
            Value::Method(_) => BuiltinType::Method,
            Value::Module(_) => BuiltinType::Module,
            Value::Type(_) => BuiltinType::Type,
            Value::Exception(_) => BuiltinType::Object,
            Value::Iterator(it) => it.kind,
            Value::Native(_) => BuiltinType::Object,
        }
    }

    /// The value's type object, as returned by `type(x)`.
    pub fn type_of(&self) -> TypeObj {
        match self {
            Value::Exception(exc) => TypeObj::Exception(exc.kind),
            Value::Native(obj) => TypeObj::Native(Rc::new(NativeType::new(obj.type_name()))),
            other => TypeObj::Builtin(other.builtin_type()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer argument check used by builtins and methods.
    pub fn expect_int(&self, what: &str) -> PyResult<i64> {
        self.as_int().ok_or_else(|| {
            type_error(format!(
                "'{}' object cannot be interpreted as an integer{}",
                self.type_name(),
                if what.is_empty() { String::new() } else { format!(" ({})", what) }
            ))
        })
    }

    pub fn expect_float(&self, func: &str) -> PyResult<f64> {
        self.as_float().ok_or_else(|| {
            type_error(format!(
                "{}() argument must be a real number, not '{}'",
                func,
                self.type_name()
            ))
        })
    }

    pub fn expect_str(&self, func: &str) -> PyResult<Rc<str>> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            other => Err(type_error(format!(
                "{}() argument must be str, not {}",
                func,
                other.type_name()
            ))),
        }
    }

    /// Identity comparison (`is`).
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || (a.len() <= 1 && a == b),
            (Value::Type(a), Value::Type(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Address of heap-allocated values; used for identity and `id()`-like output.
    pub fn identity(&self) -> Option<usize> {
        let ptr = match self {
            Value::List(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Tuple(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Dict(v) | Value::Set(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Slice(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Function(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Builtin(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Method(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Module(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Exception(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Iterator(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Native(v) => Rc::as_ptr(v) as *const () as usize,
            _ => return None,
        };
        Some(ptr)
    }

    /// Downcast a native value to its concrete type.
    pub fn as_any_native<T: 'static>(&self) -> Option<&T> {
        match self {
            Value::Native(obj) => obj.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::Method(_) | Value::Type(_)
        )
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::interp::format::repr(self))
    }
}

fn short_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// Hashable projection of a value, used as dict and set key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Range(i64, i64, i64),
    Type(String),
    Ptr(usize),
}

/// Insertion-ordered hash map backing both dicts and sets.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<Option<(HashKey, Value, Value)>>,
    index: HashMap<HashKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        let slot = *self.index.get(key)?;
        self.entries[slot].as_ref().map(|(_, _, v)| v)
    }

    /// Insert or overwrite. An existing key keeps its original key object
    /// and position.
    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) {
        if let Some(&slot) = self.index.get(&hash) {
            if let Some(entry) = self.entries[slot].as_mut() {
                entry.2 = value;
            }
            return;
        }
        self.index.insert(hash.clone(), self.entries.len());
        self.entries.push(Some((hash, key, value)));
    }

    pub fn remove(&mut self, hash: &HashKey) -> Option<(Value, Value)> {
        let slot = self.index.remove(hash)?;
        let removed = self.entries[slot].take().map(|(_, k, v)| (k, v));
        if self.entries.len() > 32 && self.index.len() * 2 < self.entries.len() {
            self.compact();
        }
        removed
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        while let Some(entry) = self.entries.pop() {
            if let Some((hash, k, v)) = entry {
                self.index.remove(&hash);
                return Some((k, v));
            }
        }
        None
    }

    pub fn pop_first(&mut self) -> Option<(Value, Value)> {
        let hash = self.entries.iter().flatten().next().map(|(h, _, _)| h.clone())?;
        self.remove(&hash)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Remove every entry, handing back keys and values.
    pub fn drain(&mut self) -> Vec<Value> {
        self.index.clear();
        self.entries
            .drain(..)
            .flatten()
            .flat_map(|(_, k, v)| [k, v])
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().flatten().map(|(_, k, v)| (k, v))
    }

    pub fn hashed(&self) -> impl Iterator<Item = (&HashKey, &Value)> {
        self.entries.iter().flatten().map(|(h, k, _)| (h, k))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }

    fn compact(&mut self) {
        self.entries.retain(Option::is_some);
        self.index.clear();
        for (slot, entry) in self.entries.iter().enumerate() {
            if let Some((hash, _, _)) = entry {
                self.index.insert(hash.clone(), slot);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeObj {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeObj {
    /// Number of elements. Exact for any bounds; a range spanning the whole
    /// 64-bit domain still fits.
    pub fn count(&self) -> u64 {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let n = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        n as u64
    }

    /// `len(range)`, which must fit a signed machine size.
    pub fn len(&self) -> PyResult<usize> {
        i64::try_from(self.count())
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                Fault::new(
                    ExcKind::OverflowError,
                    "Python int too large to convert to C ssize_t",
                )
            })
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Element at `index`, negative indices counting from the end.
    pub fn item(&self, index: i64) -> Option<i64> {
        let n = self.count() as i128;
        let i = if index < 0 { index as i128 + n } else { index as i128 };
        if i < 0 || i >= n {
            return None;
        }
        i64::try_from(self.start as i128 + self.step as i128 * i).ok()
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (value as i128 - self.start as i128) % self.step as i128 == 0
    }

    /// Equal ranges hold the same elements whatever bounds built them.
    pub fn same_sequence(&self, other: &RangeObj) -> bool {
        let n = self.count();
        n == other.count()
            && (n == 0 || (self.start == other.start && (n == 1 || self.step == other.step)))
    }

    /// Hash parts consistent with `same_sequence`.
    pub fn hash_parts(&self) -> (i64, i64, i64) {
        match self.count() {
            0 => (0, 0, 0),
            1 => (1, self.start, 0),
            n => (n as i64, self.start, self.step),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SliceObj {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

/// A user-defined function or lambda.
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub name: String,
    /// Evaluated defaults aligned with `def.params.positional`.
    pub defaults: Vec<Option<Value>>,
    pub kw_defaults: Vec<Option<Value>>,
    pub closure: Rc<Scope>,
    pub attrs: RefCell<HashMap<String, Value>>,
}

pub struct Builtin {
    pub name: Rc<str>,
    pub doc: Option<&'static str>,
    pub func: NativeFn,
}

/// `receiver.name` resolved to a builtin-type method.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: Rc<str>,
}

pub struct Module {
    pub name: String,
    pub doc: Option<&'static str>,
    pub attrs: RefCell<HashMap<String, Value>>,
}

impl Module {
    pub fn new(name: &str, doc: Option<&'static str>) -> Self {
        Self {
            name: name.to_string(),
            doc,
            attrs: RefCell::new(HashMap::new()),
        }
    }

    pub fn set(&self, name: &str, value: Value) {
        self.attrs.borrow_mut().insert(name.to_string(), value);
    }

    pub fn add_fn(
        &self,
        name: &str,
        func: impl Fn(&mut Interpreter, Args) -> PyResult<Value> + 'static,
    ) {
        let qualified = format!("{}.{}", self.name, name);
        let value = Value::builtin(&qualified, func);
        self.set(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attrs.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    Object,
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    Ellipsis,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Slice,
    Function,
    BuiltinFunction,
    Method,
    Module,
    Type,
    Map,
    Filter,
    Zip,
    Enumerate,
    Generator,
    ListIterator,
}

impl BuiltinType {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Object => "object",
            BuiltinType::NoneType => "NoneType",
            BuiltinType::Bool => "bool",
            BuiltinType::Int => "int",
            BuiltinType::Float => "float",
            BuiltinType::Str => "str",
            BuiltinType::Ellipsis => "ellipsis",
            BuiltinType::List => "list",
            BuiltinType::Tuple => "tuple",
            BuiltinType::Dict => "dict",
            BuiltinType::Set => "set",
            BuiltinType::Range => "range",
            BuiltinType::Slice => "slice",
            BuiltinType::Function => "function",
            BuiltinType::BuiltinFunction => "builtin_function_or_method",
            BuiltinType::Method => "builtin_function_or_method",
            BuiltinType::Module => "module",
            BuiltinType::Type => "type",
            BuiltinType::Map => "map",
            BuiltinType::Filter => "filter",
            BuiltinType::Zip => "zip",
            BuiltinType::Enumerate => "enumerate",
            BuiltinType::Generator => "generator",
            BuiltinType::ListIterator => "list_iterator",
        }
    }

    /// `bool` is a subtype of `int`; every type derives from `object`.
    pub fn is_subtype_of(self, other: BuiltinType) -> bool {
        self == other
            || other == BuiltinType::Object
            || (self == BuiltinType::Bool && other == BuiltinType::Int)
            || (self == BuiltinType::Method && other == BuiltinType::BuiltinFunction)
    }
}

/// Constructor and class attributes of a host-provided type.
pub struct NativeType {
    pub name: String,
    pub ctor: Option<NativeFn>,
    pub attrs: HashMap<String, Value>,
}

impl NativeType {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ctor: None,
            attrs: HashMap::new(),
        }
    }

    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }
}

#[derive(Clone)]
pub enum TypeObj {
    Builtin(BuiltinType),
    Exception(ExcKind),
    Native(Rc<NativeType>),
}

impl TypeObj {
    pub fn name(&self) -> String {
        match self {
            TypeObj::Builtin(t) => t.name().to_string(),
            TypeObj::Exception(k) => k.name().to_string(),
            TypeObj::Native(t) => t.short_name().to_string(),
        }
    }

    pub fn qualified_name(&self) -> String {
        match self {
            TypeObj::Builtin(t) => t.name().to_string(),
            TypeObj::Exception(k) => k.qualified_name().to_string(),
            TypeObj::Native(t) => t.name.clone(),
        }
    }
}

impl PartialEq for TypeObj {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeObj::Builtin(a), TypeObj::Builtin(b)) => a == b,
            (TypeObj::Exception(a), TypeObj::Exception(b)) => a == b,
            (TypeObj::Native(a), TypeObj::Native(b)) => a.name == b.name,
            _ => false,
        }
    }
}

/// Objects implemented by module providers (datetimes, regex matches,
/// stream handles). Every hook has a conservative default.
pub trait NativeObject {
    /// Qualified type name, e.g. `datetime.datetime`.
    fn type_name(&self) -> &str;

    fn repr(&self) -> String;

    fn to_str(&self) -> String {
        self.repr()
    }

    /// Data attributes such as `dt.year`.
    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    fn method_names(&self) -> &'static [&'static str] {
        &[]
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, _args: Args) -> PyResult<Value> {
        Err(crate::interp::fault::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            short_name(self.type_name()),
            name
        )))
    }

    /// `self <op> other`, or `other <op> self` when `reflected`.
    fn binary_op(&self, _op: BinOp, _other: &Value, _reflected: bool) -> Option<PyResult<Value>> {
        None
    }

    fn compare(&self, _other: &Value) -> Option<Ordering> {
        None
    }

    fn equals(&self, _other: &Value) -> Option<PyResult<bool>> {
        None
    }

    /// Value-based hash; `None` falls back to identity.
    fn hash_key(&self) -> Option<HashKey> {
        None
    }

    fn iterate(&self) -> Option<PyResult<IterState>> {
        None
    }

    fn length(&self) -> Option<usize> {
        None
    }

    fn get_item(&self, _index: &Value) -> Option<PyResult<Value>> {
        None
    }

    fn contains(&self, _item: &Value) -> Option<PyResult<bool>> {
        None
    }

    fn format(&self, _spec: &str) -> Option<PyResult<String>> {
        None
    }

    fn truthy(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any;
}

/// Positional and keyword arguments of a call.
#[derive(Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Validate the positional count for builtin `name`.
    pub fn check(&self, name: &str, min: usize, max: usize) -> PyResult<()> {
        let n = self.positional.len();
        if n >= min && n <= max {
            return Ok(());
        }
        let message = if min == max && min == 1 {
            format!("{}() takes exactly one argument ({} given)", name, n)
        } else if min == max && min == 0 {
            format!("{}() takes no arguments ({} given)", name, n)
        } else if min == max {
            format!("{} expected {} arguments, got {}", name, min, n)
        } else if n < min {
            format!(
                "{} expected at least {} argument{}, got {}",
                name,
                min,
                if min == 1 { "" } else { "s" },
                n
            )
        } else {
            format!("{} expected at most {} arguments, got {}", name, max, n)
        };
        Err(type_error(message))
    }

    pub fn no_keywords(&self, name: &str) -> PyResult<()> {
        if self.keywords.is_empty() {
            Ok(())
        } else {
            Err(type_error(format!("{}() takes no keyword arguments", name)))
        }
    }

    pub fn take_keyword(&mut self, key: &str) -> Option<Value> {
        let pos = self.keywords.iter().position(|(k, _)| k == key)?;
        Some(self.keywords.remove(pos).1)
    }

    /// Positional argument `index`, or keyword `key` as a fallback.
    pub fn take(&mut self, index: usize, key: &str) -> Option<Value> {
        match self.take_keyword(key) {
            Some(v) => Some(v),
            None => self.positional.get(index).cloned(),
        }
    }

    pub fn reject_unknown_keywords(&self, name: &str) -> PyResult<()> {
        match self.keywords.first() {
            Some((key, _)) => Err(type_error(format!(
                "'{}' is an invalid keyword argument for {}()",
                key, name
            ))),
            None => Ok(()),
        }
    }
}

/// Kind of a lexical scope.
pub enum ScopeKind {
    Module,
    Function(Rc<FunctionDef>),
    Comprehension,
}

/// Variable storage of one activation.
pub struct Scope {
    pub vars: RefCell<HashMap<String, Value>>,
    pub parent: Option<Rc<Scope>>,
    pub kind: ScopeKind,
}

impl Scope {
    pub fn module() -> Rc<Self> {
        heap::scope(Self {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            kind: ScopeKind::Module,
        })
    }

    pub fn child(parent: &Rc<Scope>, kind: ScopeKind) -> Rc<Self> {
        heap::scope(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            kind,
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }

    pub fn declares_local(&self, name: &str) -> bool {
        match &self.kind {
            ScopeKind::Function(def) => def.locals.contains(name),
            _ => false,
        }
    }

    pub fn declared_globals(&self) -> Option<&HashSet<String>> {
        match &self.kind {
            ScopeKind::Function(def) => Some(&def.globals),
            _ => None,
        }
    }
}

/// A single-pass iterator object visible to evaluated code.
pub struct IterObj {
    pub name: &'static str,
    pub kind: BuiltinType,
    pub state: RefCell<IterState>,
}

impl IterObj {
    pub fn new(kind: BuiltinType, state: IterState) -> Self {
        Self {
            name: kind.name(),
            kind,
            state: RefCell::new(state),
        }
    }
}

/// Cursor over an iterable.
pub enum IterState {
    /// Live view of a list; sees appends made during iteration.
    List {
        list: Rc<RefCell<Vec<Value>>>,
        pos: usize,
    },
    Items {
        items: Vec<Value>,
        pos: usize,
    },
    Range {
        next: i64,
        remaining: u64,
        step: i64,
    },
    Enumerate {
        inner: Box<IterState>,
        count: i64,
    },
    Zip {
        inners: Vec<IterState>,
    },
    Map {
        func: Value,
        inners: Vec<IterState>,
    },
    Filter {
        func: Value,
        inner: Box<IterState>,
    },
    Shared(Rc<IterObj>),
    Exhausted,
}

impl IterState {
    pub fn items(items: Vec<Value>) -> Self {
        IterState::Items { items, pos: 0 }
    }

    pub fn range(range: RangeObj) -> Self {
        IterState::Range {
            next: range.start,
            remaining: range.count(),
            step: range.step,
        }
    }

    /// Advance. `map` and `filter` call back into the interpreter.
    pub fn next(&mut self, interp: &mut Interpreter) -> PyResult<Option<Value>> {
        match self {
            IterState::List { list, pos } => {
                let item = list.borrow().get(*pos).cloned();
                if item.is_some() {
                    *pos += 1;
                }
                Ok(item)
            }
            IterState::Items { items, pos } => {
                let item = items.get(*pos).cloned();
                if item.is_some() {
                    *pos += 1;
                }
                Ok(item)
            }
            IterState::Range {
                next,
                remaining,
                step,
            } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let value = *next;
                *remaining -= 1;
                *next = next.wrapping_add(*step);
                Ok(Some(Value::Int(value)))
            }
            IterState::Enumerate { inner, count } => match inner.next(interp)? {
                Some(item) => {
                    let index = *count;
                    *count += 1;
                    Ok(Some(Value::tuple(vec![Value::Int(index), item])))
                }
                None => Ok(None),
            },
            IterState::Zip { inners } => {
                if inners.is_empty() {
                    return Ok(None);
                }
                let mut row = Vec::with_capacity(inners.len());
                for inner in inners.iter_mut() {
                    match inner.next(interp)? {
                        Some(item) => row.push(item),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::tuple(row)))
            }
            IterState::Map { func, inners } => {
                let mut row = Vec::with_capacity(inners.len());
                for inner in inners.iter_mut() {
                    match inner.next(interp)? {
                        Some(item) => row.push(item),
                        None => return Ok(None),
                    }
                }
                let func = func.clone();
                interp.call(&func, Args::new(row)).map(Some)
            }
            IterState::Filter { func, inner } => {
                let func = func.clone();
                while let Some(item) = inner.next(interp)? {
                    let keep = if matches!(func, Value::None) {
                        crate::interp::ops::truthy(&item)
                    } else {
                        let verdict = interp.call(&func, Args::new(vec![item.clone()]))?;
                        crate::interp::ops::truthy(&verdict)
                    };
                    if keep {
                        return Ok(Some(item));
                    }
                }
                Ok(None)
            }
            IterState::Shared(obj) => {
                // Take the state out while advancing so callbacks that touch
                // the same iterator see it as exhausted instead of aliasing.
                let mut state = std::mem::replace(&mut *obj.state.borrow_mut(), IterState::Exhausted);
                let result = state.next(interp);
                *obj.state.borrow_mut() = state;
                result
            }
            IterState::Exhausted => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_keeps_insertion_order() {
        let mut d = Dict::new();
        for (i, k) in ["b", "a", "c"].iter().enumerate() {
            d.insert(HashKey::Str(Rc::from(*k)), Value::str(k), Value::Int(i as i64));
        }
        d.insert(HashKey::Str(Rc::from("b")), Value::str("b"), Value::Int(9));
        let keys: Vec<String> = d.keys().iter().map(|k| k.as_str().unwrap().to_string()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(d.get(&HashKey::Str(Rc::from("b"))).and_then(Value::as_int), Some(9));
    }

    #[test]
    fn test_dict_remove_and_compact() {
        let mut d = Dict::new();
        for i in 0..100 {
            d.insert(HashKey::Int(i), Value::Int(i), Value::None);
        }
        for i in 0..90 {
            assert!(d.remove(&HashKey::Int(i)).is_some());
        }
        assert_eq!(d.len(), 10);
        assert_eq!(d.keys()[0].as_int(), Some(90));
        assert!(d.contains(&HashKey::Int(99)));
    }

    #[test]
    fn test_range_len_and_contains() {
        let r = RangeObj { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len().unwrap(), 4);
        assert!(r.contains(9));
        assert!(!r.contains(10));
        let down = RangeObj { start: 5, stop: 0, step: -2 };
        assert_eq!(down.len().unwrap(), 3);
        assert!(down.contains(1));
        assert!(RangeObj { start: 3, stop: 3, step: 1 }.is_empty());
    }

    #[test]
    fn test_range_at_integer_bounds() {
        let whole = RangeObj { start: i64::MIN, stop: i64::MAX, step: 1 };
        assert_eq!(whole.count(), u64::MAX);
        let err = whole.len().unwrap_err();
        assert_eq!(err.kind(), ExcKind::OverflowError);
        assert_eq!(whole.item(0), Some(i64::MIN));
        assert_eq!(whole.item(-1), Some(i64::MAX - 1));
        assert!(whole.contains(0));
        assert!(whole.contains(i64::MIN));
        assert!(!whole.contains(i64::MAX));

        let wide = RangeObj { start: i64::MIN, stop: i64::MAX, step: i64::MAX };
        assert_eq!(wide.len().unwrap(), 3);
        assert_eq!(wide.item(2), Some(i64::MAX - 1));
        assert_eq!(wide.item(3), None);
        assert!(wide.contains(-1));
        assert!(!wide.contains(1));

        let down = RangeObj { start: i64::MAX, stop: i64::MIN, step: i64::MIN };
        assert_eq!(down.len().unwrap(), 2);
        assert_eq!(down.item(1), Some(-1));
        assert!(down.contains(-1));
    }

    #[test]
    fn test_equal_ranges_hash_alike() {
        let a = RangeObj { start: 0, stop: 0, step: 1 };
        let b = RangeObj { start: 5, stop: 2, step: 3 };
        assert!(a.same_sequence(&b));
        assert_eq!(a.hash_parts(), b.hash_parts());
        let c = RangeObj { start: 0, stop: 3, step: 2 };
        let d = RangeObj { start: 0, stop: 4, step: 2 };
        assert!(c.same_sequence(&d));
        assert_eq!(c.hash_parts(), d.hash_parts());
    }

    #[test]
    fn test_args_count_messages() {
        let args = Args::new(vec![Value::Int(1), Value::Int(2)]);
        let err = args.check("len", 1, 1).unwrap_err();
        assert_eq!(err.message(), "len() takes exactly one argument (2 given)");
        assert!(args.check("range", 1, 3).is_ok());
    }
}
