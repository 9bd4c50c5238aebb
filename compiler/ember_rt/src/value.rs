//! Runtime values carried by variable slots and object members.
//!
//! # Reference Semantics
//!
//! Strings and lists are immutable and shared through `Arc`, so cloning a
//! `Value` is O(1). Objects are held through [`ObjectRef`], which counts
//! *external* references: the last one released runs the object's
//! destructor. Closures are shared [`ClosureValue`]s.
//!
//! Dropping a `Value` that holds the last reference to an object has no
//! thread context to run a destructor on, so the object is obliterated.
//! Paths that do have a context (slot unwinding, explicit release) call
//! [`Value::release`] instead. That includes objects reached through the
//! last owner of a list or of a closure's captured slots.

use std::fmt;
use std::sync::Arc;

use crate::closure::ClosureValue;
use crate::object::ObjectRef;
use crate::stack::ensure_sufficient_stack;
use crate::thread::ThreadContext;

/// Dynamically-typed runtime value.
#[derive(Clone, Default)]
pub enum Value {
    /// The absence of a value.
    #[default]
    Nothing,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    /// External reference to a language-level object.
    Object(ObjectRef),
    Closure(Arc<ClosureValue>),
}

impl Value {
    /// Create a string value.
    #[inline]
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    /// Create a list value.
    #[inline]
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    /// Wrap a closure.
    #[inline]
    pub fn closure(closure: Arc<ClosureValue>) -> Self {
        Value::Closure(closure)
    }

    /// Script-visible type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nothing => "nothing",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Closure(_) => "closure",
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    #[inline]
    pub fn as_closure(&self) -> Option<&Arc<ClosureValue>> {
        match self {
            Value::Closure(c) => Some(c),
            _ => None,
        }
    }

    #[inline]
    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    /// Release this value with a thread context available.
    ///
    /// Object references are released through [`ObjectRef::release`] so a
    /// destructor triggered here runs on `ctx`. Lists and closures are walked
    /// only when this was their last owner; a closure hands back the values
    /// of captured slots nothing else holds. Destructor errors go to the
    /// context's sink.
    pub fn release(self, ctx: &mut ThreadContext) {
        match self {
            Value::Object(obj) => {
                let result = obj.release(ctx);
                ctx.sink_mut().absorb(result);
            }
            Value::List(items) => {
                if let Some(items) = Arc::into_inner(items) {
                    ensure_sufficient_stack(|| {
                        for item in items.into_iter().rev() {
                            item.release(ctx);
                        }
                    });
                }
            }
            Value::Closure(closure) => {
                ensure_sufficient_stack(|| ClosureValue::release(closure, ctx));
            }
            Value::Nothing | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {}
        }
    }
}

impl PartialEq for Value {
    /// Structural for scalars, strings and lists; identity for objects and
    /// closures.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nothing, Value::Nothing) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => write!(f, "Nothing"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Object(obj) => write!(f, "Object({})", obj.class().name()),
            Value::Closure(c) => write!(f, "Closure({})", c.name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => write!(f, "NOTHING"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Object(obj) => write!(f, "<object {}>", obj.class().name()),
            Value::Closure(c) => write!(f, "<closure {}>", c.name()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}
