//! Dynamically-typed value and type model for the expression graph.
//!
//! The teacher crate carries a single dynamically-typed `Value` (from
//! `netidx-value`) through its whole dataflow graph rather than monomorphizing
//! every node over `T`. We follow the same shape here instead of literally
//! implementing `Constant<T>`/`Operator<T>` as generics: it keeps node bodies,
//! the variable map, and the external interface boundary free of a type
//! parameter that would otherwise infect every public signature in C3/C4/C7.

use std::fmt;

/// The type of an expression's value. `Unknown` is a first-class type: it is
/// what an expression has before it is known (spec.md section 3, "A Node with
/// NO_OUTCOME reports its outcome as unknown").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Typ {
    Boolean,
    Integer,
    Real,
    String,
    Array(Box<Typ>),
    Unknown,
}

impl fmt::Display for Typ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Typ::Boolean => write!(f, "Boolean"),
            Typ::Integer => write!(f, "Integer"),
            Typ::Real => write!(f, "Real"),
            Typ::String => write!(f, "String"),
            Typ::Array(t) => write!(f, "Array<{t}>"),
            Typ::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A value flowing through the expression graph.
///
/// There is deliberately no `Value::Unknown` variant: "unknown" is a
/// property of an expression (`is_known` returns false), not a value an
/// expression holds. Callers ask `is_known`/`get_value` rather than pattern
/// matching out an unknown case.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn typ(&self) -> Typ {
        match self {
            Value::Boolean(_) => Typ::Boolean,
            Value::Integer(_) => Typ::Integer,
            Value::Real(_) => Typ::Real,
            Value::String(_) => Typ::String,
            Value::Array(vs) => {
                let elt = vs.first().map(|v| v.typ()).unwrap_or(Typ::Unknown);
                Typ::Array(Box::new(elt))
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(vs) => Some(vs.as_slice()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Type-compatibility check for interface-variable resolution (spec.md
/// section 4.2): identical type, numeric widening Integer -> Real, or
/// Unknown matching anything. Array element types must match exactly except
/// for Unknown.
pub fn types_compatible(required: &Typ, offered: &Typ) -> bool {
    match (required, offered) {
        (a, b) if a == b => true,
        (Typ::Unknown, _) | (_, Typ::Unknown) => true,
        (Typ::Real, Typ::Integer) => true,
        (Typ::Array(a), Typ::Array(b)) => types_compatible(a, b),
        _ => false,
    }
}
