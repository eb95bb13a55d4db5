use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::Block,
    diagnostics::{Diagnostic, NyxError, Result},
    environment::EnvironmentRef,
};

#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String(value.into()))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Self::new(ValueKind::Array(RefCell::new(values)))
    }

    pub fn map(entries: IndexMap<HashKey, Value>) -> Self {
        Self::new(ValueKind::Map(RefCell::new(entries)))
    }

    pub fn module(name: impl Into<String>, exports: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Module(ModuleValue {
            name: name.into(),
            exports,
        }))
    }

    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        matches!(&*self.0, ValueKind::Null)
    }

    /// Only `null` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(&*self.0, ValueKind::Null | ValueKind::Bool(false))
    }

    pub fn as_int(&self) -> Option<i64> {
        match &*self.0 {
            ValueKind::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.0 {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of ints and floats; booleans are deliberately excluded.
    pub fn as_number(&self) -> Option<f64> {
        match &*self.0 {
            ValueKind::Int(n) => Some(*n as f64),
            ValueKind::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::Null => "NULL",
            ValueKind::Bool(_) => "BOOLEAN",
            ValueKind::Int(_) => "INTEGER",
            ValueKind::Float(_) => "FLOAT",
            ValueKind::String(_) => "STRING",
            ValueKind::Array(_) => "ARRAY",
            ValueKind::Map(_) => "HASH",
            ValueKind::Module(_) => "MODULE",
            ValueKind::Function(_) | ValueKind::BoundMethod(_) => "FUNCTION",
            ValueKind::Builtin(_) => "BUILTIN",
            ValueKind::Class(_) => "CLASS",
            ValueKind::Instance(_) => "INSTANCE",
        }
    }

    pub fn hash_key(&self) -> Result<HashKey> {
        match &*self.0 {
            ValueKind::Bool(b) => Ok(HashKey::Bool(*b)),
            ValueKind::Int(n) => Ok(HashKey::Int(*n)),
            ValueKind::String(s) => Ok(HashKey::Str(s.clone())),
            _ => Err(NyxError::from(Diagnostic::runtime(format!(
                "unusable as hash key: {}",
                self.type_name()
            )))),
        }
    }

    /// Structural equality for data, identity for functions, classes and instances.
    pub fn equals(&self, other: &Value) -> bool {
        self.equals_within(other, &mut Vec::new())
    }

    /// `active` holds the container pairs already being compared further up;
    /// meeting one again means both sides cycle in step.
    fn equals_within(&self, other: &Value, active: &mut Vec<(*const ValueKind, *const ValueKind)>) -> bool {
        let pair = (Rc::as_ptr(&self.0), Rc::as_ptr(&other.0));
        match (&*self.0, &*other.0) {
            (ValueKind::Null, ValueKind::Null) => true,
            (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Float(b)) | (ValueKind::Float(b), ValueKind::Int(a)) => {
                (*a as f64) == *b
            }
            (ValueKind::Float(a), ValueKind::Float(b)) => a == b,
            (ValueKind::String(a), ValueKind::String(b)) => a == b,
            (ValueKind::Array(_), ValueKind::Array(_)) | (ValueKind::Map(_), ValueKind::Map(_))
                if Rc::ptr_eq(&self.0, &other.0) || active.contains(&pair) =>
            {
                true
            }
            (ValueKind::Array(a), ValueKind::Array(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return false;
                }
                active.push(pair);
                let equal = a
                    .iter()
                    .zip(b.iter())
                    .all(|(x, y)| x.equals_within(y, active));
                active.pop();
                equal
            }
            (ValueKind::Map(a), ValueKind::Map(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return false;
                }
                active.push(pair);
                let equal = a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| x.equals_within(y, active)));
                active.pop();
                equal
            }
            _ => Rc::ptr_eq(&self.0, &other.0),
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, seen: &mut Vec<*const ValueKind>) -> fmt::Result {
        match &*self.0 {
            ValueKind::String(s) => write!(f, "{s:?}"),
            _ => self.fmt_within(f, seen),
        }
    }

    /// `seen` holds the containers currently being written; a container that
    /// contains itself is elided as `[...]` or `{...}`.
    fn fmt_within(&self, f: &mut fmt::Formatter<'_>, seen: &mut Vec<*const ValueKind>) -> fmt::Result {
        let ptr = Rc::as_ptr(&self.0);
        match &*self.0 {
            ValueKind::Null => write!(f, "null"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) if n.is_finite() && n.fract() == 0.0 => write!(f, "{n:.1}"),
            ValueKind::Float(n) => write!(f, "{n}"),
            ValueKind::String(s) => write!(f, "{s}"),
            ValueKind::Array(_) if seen.contains(&ptr) => write!(f, "[...]"),
            ValueKind::Map(_) if seen.contains(&ptr) => write!(f, "{{...}}"),
            ValueKind::Array(values) => {
                seen.push(ptr);
                write!(f, "[")?;
                for (idx, value) in values.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    value.fmt_nested(f, seen)?;
                }
                seen.pop();
                write!(f, "]")
            }
            ValueKind::Map(map) => {
                seen.push(ptr);
                write!(f, "{{")?;
                for (idx, (key, value)) in map.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: ")?;
                    value.fmt_nested(f, seen)?;
                }
                seen.pop();
                write!(f, "}}")
            }
            ValueKind::Module(module) => write!(f, "<module {}>", module.name),
            ValueKind::Function(fun) => write!(
                f,
                "<fn {}>",
                fun.name.as_deref().unwrap_or("anonymous")
            ),
            ValueKind::BoundMethod(method) => write!(
                f,
                "<bound method {}.{}>",
                method.class.name,
                method.function.name.as_deref().unwrap_or("anonymous")
            ),
            ValueKind::Builtin(fun) => write!(f, "<builtin {}>", fun.name),
            ValueKind::Class(class) => write!(f, "<class {}>", class.name),
            ValueKind::Instance(instance) => write!(f, "<{} instance>", instance.class.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_nested(f, &mut Vec::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_within(f, &mut Vec::new())
    }
}

pub enum ValueKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(RefCell<Vec<Value>>),
    Map(RefCell<IndexMap<HashKey, Value>>),
    Module(ModuleValue),
    Function(UserFunction),
    BoundMethod(BoundMethod),
    Builtin(Builtin),
    Class(Rc<NyxClass>),
    Instance(Instance),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl HashKey {
    pub fn to_value(&self) -> Value {
        match self {
            HashKey::Bool(b) => Value::bool(*b),
            HashKey::Int(n) => Value::int(*n),
            HashKey::Str(s) => Value::string(s.clone()),
        }
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKey::Bool(b) => write!(f, "{b}"),
            HashKey::Int(n) => write!(f, "{n}"),
            HashKey::Str(s) => write!(f, "{s:?}"),
        }
    }
}

pub struct ModuleValue {
    pub name: String,
    pub exports: IndexMap<String, Value>,
}

/// A closure: parameters and body plus the scope it was created in.
#[derive(Clone)]
pub struct UserFunction {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Rc<Block>,
    pub env: EnvironmentRef,
}

/// A method looked up through an instance; calling it supplies the receiver.
#[derive(Clone)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: UserFunction,
    /// Class that declared the method, so `super` resolves from it.
    pub class: Rc<NyxClass>,
}

pub type BuiltinFn = fn(&[Value]) -> Result<Value>;

#[derive(Clone)]
pub struct Builtin {
    pub name: String,
    /// `usize::MAX` accepts any number of arguments.
    pub arity: usize,
    pub callback: BuiltinFn,
}

impl Builtin {
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        if self.arity != usize::MAX && args.len() != self.arity {
            return Err(NyxError::from(Diagnostic::runtime(format!(
                "wrong number of arguments to `{}`: expected {}, got {}",
                self.name,
                self.arity,
                args.len()
            ))));
        }
        (self.callback)(args)
    }
}

pub struct NyxClass {
    pub name: String,
    pub superclass: Option<Rc<NyxClass>>,
    pub methods: IndexMap<String, UserFunction>,
    /// Field defaults copied into every new instance.
    pub fields: IndexMap<String, Value>,
}

impl NyxClass {
    /// Finds `name` on this class or an ancestor, along with the declaring class.
    pub fn find_method(self: &Rc<Self>, name: &str) -> Option<(Rc<NyxClass>, UserFunction)> {
        let mut class = Some(Rc::clone(self));
        while let Some(current) = class {
            if let Some(method) = current.methods.get(name) {
                return Some((Rc::clone(&current), method.clone()));
            }
            class = current.superclass.clone();
        }
        None
    }

    pub fn default_fields(&self) -> IndexMap<String, Value> {
        let mut fields = match &self.superclass {
            Some(parent) => parent.default_fields(),
            None => IndexMap::new(),
        };
        for (name, value) in &self.fields {
            fields.insert(name.clone(), value.clone());
        }
        fields
    }
}

pub struct Instance {
    pub class: Rc<NyxClass>,
    pub fields: RefCell<IndexMap<String, Value>>,
}
