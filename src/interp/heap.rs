//! Reclaiming what a finished program leaves behind.
//!
//! Values are reference counted, which cannot free cycles: a function
//! stored in the globals it closes over, a list appended to itself. Every
//! mutable container, scope and function is allocated through this module
//! and recorded against the interpreter that is live on the current thread.
//! When that interpreter is dropped its [`Heap`] empties every recorded
//! object that is still alive, which breaks all cycles at once, and then
//! drops the contents iteratively so deeply nested data cannot exhaust the
//! stack.
//!
//! Nothing is collected while a program runs; cycles built and abandoned
//! inside one evaluation stay allocated until it ends.

use crate::interp::value::{Dict, Function, Scope, Value};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Records kept before the first sweep of dead entries.
const INITIAL_PRUNE_AT: usize = 1024;

#[derive(Default)]
struct Arena {
    owner: u64,
    lists: Vec<Weak<RefCell<Vec<Value>>>>,
    dicts: Vec<Weak<RefCell<Dict>>>,
    scopes: Vec<Weak<Scope>>,
    functions: Vec<Weak<Function>>,
    prune_at: usize,
}

impl Arena {
    fn records(&self) -> usize {
        self.lists.len() + self.dicts.len() + self.scopes.len() + self.functions.len()
    }

    /// Drop records of objects already freed; amortized by doubling.
    fn maybe_prune(&mut self) {
        if self.records() < self.prune_at {
            return;
        }
        self.lists.retain(|w| w.strong_count() > 0);
        self.dicts.retain(|w| w.strong_count() > 0);
        self.scopes.retain(|w| w.strong_count() > 0);
        self.functions.retain(|w| w.strong_count() > 0);
        self.prune_at = (self.records() * 2).max(INITIAL_PRUNE_AT);
    }
}

thread_local! {
    static ARENAS: RefCell<Vec<Arena>> = const { RefCell::new(Vec::new()) };
    static NEXT_OWNER: Cell<u64> = const { Cell::new(1) };
}

fn record(add: impl FnOnce(&mut Arena)) {
    ARENAS.with(|arenas| {
        if let Ok(mut arenas) = arenas.try_borrow_mut() {
            if let Some(arena) = arenas.last_mut() {
                add(arena);
                arena.maybe_prune();
            }
        }
    });
}

pub fn list(items: Vec<Value>) -> Rc<RefCell<Vec<Value>>> {
    let cell = Rc::new(RefCell::new(items));
    record(|arena| arena.lists.push(Rc::downgrade(&cell)));
    cell
}

pub fn dict(dict: Dict) -> Rc<RefCell<Dict>> {
    let cell = Rc::new(RefCell::new(dict));
    record(|arena| arena.dicts.push(Rc::downgrade(&cell)));
    cell
}

pub fn scope(scope: Scope) -> Rc<Scope> {
    let scope = Rc::new(scope);
    record(|arena| arena.scopes.push(Rc::downgrade(&scope)));
    scope
}

pub fn function(function: Function) -> Rc<Function> {
    let function = Rc::new(function);
    record(|arena| arena.functions.push(Rc::downgrade(&function)));
    function
}

/// Objects currently recorded on this thread and still alive.
pub fn live_objects() -> usize {
    ARENAS.with(|arenas| {
        arenas.borrow().iter().map(|arena| {
            arena.lists.iter().filter(|w| w.strong_count() > 0).count()
                + arena.dicts.iter().filter(|w| w.strong_count() > 0).count()
                + arena.scopes.iter().filter(|w| w.strong_count() > 0).count()
                + arena.functions.iter().filter(|w| w.strong_count() > 0).count()
        })
        .sum::<usize>()
    })
}

/// Ownership of everything allocated while one interpreter is live.
pub struct Heap {
    owner: u64,
}

impl Heap {
    /// Start recording allocations on this thread for a new interpreter.
    pub fn open() -> Self {
        let owner = NEXT_OWNER.with(|next| {
            let owner = next.get();
            next.set(owner + 1);
            owner
        });
        ARENAS.with(|arenas| {
            arenas.borrow_mut().push(Arena {
                owner,
                prune_at: INITIAL_PRUNE_AT,
                ..Arena::default()
            })
        });
        Heap { owner }
    }

    /// Empty every recorded object plus `roots`, then free the contents.
    pub fn release(&self, roots: Vec<Value>) {
        let arena = ARENAS.with(|arenas| {
            let mut arenas = arenas.borrow_mut();
            let pos = arenas.iter().position(|arena| arena.owner == self.owner)?;
            Some(arenas.remove(pos))
        });
        let mut garbage = roots;
        if let Some(arena) = arena {
            for list in arena.lists.iter().filter_map(Weak::upgrade) {
                if let Ok(mut items) = list.try_borrow_mut() {
                    garbage.append(&mut *items);
                }
            }
            for dict in arena.dicts.iter().filter_map(Weak::upgrade) {
                if let Ok(mut dict) = dict.try_borrow_mut() {
                    garbage.extend(dict.drain());
                }
            }
            for scope in arena.scopes.iter().filter_map(Weak::upgrade) {
                if let Ok(mut vars) = scope.vars.try_borrow_mut() {
                    garbage.extend(vars.drain().map(|(_, v)| v));
                }
            }
            for function in arena.functions.iter().filter_map(Weak::upgrade) {
                if let Ok(mut attrs) = function.attrs.try_borrow_mut() {
                    garbage.extend(attrs.drain().map(|(_, v)| v));
                }
            }
        }
        drain(garbage);
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.release(Vec::new());
    }
}

/// Free `garbage` without recursing into nested values.
fn drain(mut garbage: Vec<Value>) {
    while let Some(value) = garbage.pop() {
        match value {
            Value::Tuple(items) => {
                if let Ok(items) = Rc::try_unwrap(items) {
                    garbage.extend(items);
                }
            }
            Value::List(items) => {
                if let Ok(items) = Rc::try_unwrap(items) {
                    garbage.extend(items.into_inner());
                }
            }
            Value::Dict(dict) | Value::Set(dict) => {
                if let Ok(dict) = Rc::try_unwrap(dict) {
                    garbage.extend(dict.into_inner().drain());
                }
            }
            Value::Module(module) => {
                if let Ok(mut attrs) = module.attrs.try_borrow_mut() {
                    garbage.extend(attrs.drain().map(|(_, v)| v));
                }
            }
            Value::Function(function) => {
                if let Ok(mut attrs) = function.attrs.try_borrow_mut() {
                    garbage.extend(attrs.drain().map(|(_, v)| v));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::value::HashKey;

    #[test]
    fn test_release_breaks_self_reference() {
        let heap = Heap::open();
        let list = list(Vec::new());
        list.borrow_mut().push(Value::List(list.clone()));
        let weak = Rc::downgrade(&list);
        drop(list);
        assert!(weak.upgrade().is_some());

        drop(heap);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_release_breaks_dict_cycle() {
        let heap = Heap::open();
        let dict = dict(Dict::new());
        let holder = Value::list(vec![Value::Dict(dict.clone())]);
        dict.borrow_mut()
            .insert(HashKey::Str(Rc::from("holder")), Value::str("holder"), holder);
        let weak = Rc::downgrade(&dict);
        drop(dict);
        assert!(weak.upgrade().is_some());

        drop(heap);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_deep_nesting_frees_iteratively() {
        let heap = Heap::open();
        let mut value = Value::list(vec![]);
        for _ in 0..200_000 {
            value = Value::tuple(vec![value]);
        }
        let outer = list(vec![value]);
        drop(heap);
        assert!(outer.borrow().is_empty());
    }

    #[test]
    fn test_untracked_without_open_heap() {
        let before = live_objects();
        let _list = list(vec![]);
        assert_eq!(live_objects(), before);
    }
}
