use std::fmt;

use super::heap::HeapHandle;

/// A tagged runtime value.
///
/// Values are immutable once produced; instructions replace stack entries
/// rather than mutating them in place.
/// - Int: 64-bit signed integer (wrapping arithmetic)
/// - Float: 64-bit IEEE 754 double
/// - Ref: generation-checked handle to a heap object
/// - Null: the absent value
#[derive(Clone, Copy, Default)]
pub enum Value {
    Int(i64),
    Float(f64),
    Ref(HeapHandle),
    #[default]
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Value::Float(_))
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Value::Ref(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view of the value; integers are promoted.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<HeapHandle> {
        match self {
            Value::Ref(h) => Some(*h),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Ref(_) => true,
            Value::Null => false,
        }
    }

    /// Get the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Ref(_) => "ref",
            Value::Null => "null",
        }
    }

    /// Check if two values are equal.
    ///
    /// Numbers compare after promotion, references by handle identity.
    pub fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::Ref(a), Value::Ref(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        Value::eq(self, other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Float(n) => write!(f, "Float({})", n),
            Value::Ref(h) => write!(f, "Ref({})", h),
            Value::Null => write!(f, "Null"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.fract() == 0.0 {
                    write!(f, "{}.0", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Ref(h) => write!(f, "<ref {}>", h),
            Value::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_as_int() {
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Float(1.0).as_int(), None);
    }

    #[test]
    fn test_int_as_float() {
        assert_eq!(Value::Int(42).as_float(), Some(42.0));
        assert_eq!(Value::Null.as_float(), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Int(-1).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(Value::Ref(HeapHandle::new(0, 0)).is_truthy());
    }

    #[test]
    fn test_equality() {
        assert!(Value::Int(42).eq(&Value::Float(42.0)));
        assert!(Value::Null.eq(&Value::Null));
        assert!(!Value::Int(0).eq(&Value::Null));
        assert!(!Value::Ref(HeapHandle::new(1, 0)).eq(&Value::Ref(HeapHandle::new(1, 1))));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "null");
    }
}
