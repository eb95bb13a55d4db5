use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, NyxError, SourceSpan},
    value::Value,
};

pub type EnvironmentRef = Rc<RefCell<Environment>>;

/// One lexical scope. Children hold a strong reference to their parent so
/// closures keep their defining scope alive.
#[derive(Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }))
    }

    /// Binds `name` in this scope, shadowing any outer binding.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    /// Rebinds `name` in the nearest scope that already has it, otherwise
    /// defines it in `env` itself.
    pub fn set(env: &EnvironmentRef, name: &str, value: Value) {
        let mut scope = Rc::clone(env);
        loop {
            if scope.borrow().bindings.contains_key(name) {
                scope.borrow_mut().bindings.insert(name.to_string(), value);
                return;
            }
            let parent = scope.borrow().parent.clone();
            match parent {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        env.borrow_mut().define(name, value);
    }

    pub fn lookup(env: &EnvironmentRef, name: &str) -> Option<Value> {
        let mut scope = Rc::clone(env);
        loop {
            if let Some(value) = scope.borrow().bindings.get(name) {
                return Some(value.clone());
            }
            let parent = scope.borrow().parent.clone();
            scope = parent?;
        }
    }

    pub fn get(env: &EnvironmentRef, name: &str, span: SourceSpan) -> Result<Value, NyxError> {
        Environment::lookup(env, name).ok_or_else(|| {
            NyxError::from(
                Diagnostic::runtime(format!("identifier not found: {name}")).with_span(span),
            )
        })
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
