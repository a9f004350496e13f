//! Runtime values
//!
//! `Value` is the dynamically typed cell that flows through the operand
//! stack, fields, arguments and invocation records. Reference types are
//! shared through `Arc`; value types are copied.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHasher;

use crate::error::{VmError, VmResult};
use crate::interceptor::{Interceptor, InterceptorSelector};
use crate::types::{MethodDef, Primitive, TypeDef, TypeId, TypeRef};

/// Shared object reference
pub type ObjectRef = Arc<Object>;

/// Shared array reference
pub type ArrayRef = Arc<Array>;

/// Interceptor chain as stored in proxy fields
pub type InterceptorArray = Arc<Vec<Arc<dyn Interceptor>>>;

/// A runtime value
#[derive(Clone, Default)]
pub enum Value {
    /// Null reference
    #[default]
    Null,
    /// `bool`
    Bool(bool),
    /// `char`
    Char(char),
    /// `i32`
    I32(i32),
    /// `i64`
    I64(i64),
    /// `f64`
    F64(f64),
    /// `string`
    Str(Arc<str>),
    /// Enum constant of the given enum type
    Enum(TypeId, i32),
    /// Class instance
    Object(ObjectRef),
    /// Array instance
    Array(ArrayRef),
    /// Managed pointer (by-reference argument)
    Ref(Pointer),
    /// Type handle
    Type(TypeRef),
    /// Method handle
    Method(MethodToken),
    /// Interceptor chain
    Interceptors(InterceptorArray),
    /// Interceptor selector
    Selector(Arc<dyn InterceptorSelector>),
}

impl Value {
    /// Whether this is the null reference
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer payload
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) | Value::Enum(_, v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Object payload
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Array payload
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Pointer payload
    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self {
            Value::Ref(p) => Some(p),
            _ => None,
        }
    }

    /// Object payload, or a null-reference error naming `what`
    pub fn expect_object(&self, what: &str) -> VmResult<&ObjectRef> {
        match self {
            Value::Object(o) => Ok(o),
            Value::Null => Err(VmError::NullReference(what.to_string())),
            other => Err(VmError::InvalidCast(format!(
                "{} is not an object ({:?})",
                what, other
            ))),
        }
    }

    /// Pointer payload, or an error naming `what`
    pub fn expect_pointer(&self, what: &str) -> VmResult<&Pointer> {
        match self {
            Value::Ref(p) => Ok(p),
            Value::Null => Err(VmError::NullReference(what.to_string())),
            other => Err(VmError::InvalidCast(format!(
                "{} is not a reference ({:?})",
                what, other
            ))),
        }
    }

    /// Fresh by-reference cell holding `value`
    pub fn new_ref(value: Value) -> Value {
        Value::Ref(Pointer::Slot(Arc::new(Mutex::new(value))))
    }

    /// Runtime type of the value; `None` for null
    pub fn runtime_type(&self) -> Option<TypeRef> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => TypeRef::Primitive(Primitive::Bool),
            Value::Char(_) => TypeRef::Primitive(Primitive::Char),
            Value::I32(_) => TypeRef::Primitive(Primitive::I32),
            Value::I64(_) => TypeRef::Primitive(Primitive::I64),
            Value::F64(_) => TypeRef::Primitive(Primitive::F64),
            Value::Str(_) => TypeRef::Primitive(Primitive::String),
            Value::Enum(id, _) => TypeRef::named(*id),
            Value::Object(o) => o.type_ref(),
            Value::Array(a) => TypeRef::array_of(a.element.clone()),
            Value::Ref(p) => TypeRef::by_ref(p.load().runtime_type().unwrap_or_else(TypeRef::object)),
            Value::Type(_) => TypeRef::named(TypeId::TYPE),
            Value::Method(_) => TypeRef::named(TypeId::METHOD_INFO),
            Value::Interceptors(_) => TypeRef::interceptor_array(),
            Value::Selector(_) => TypeRef::named(TypeId::INTERCEPTOR_SELECTOR),
        })
    }

    /// Default value of a primitive or reference type.
    ///
    /// Enum defaults need the type table; see `TypeTable::default_value`.
    pub fn default_of(ty: &TypeRef) -> Value {
        match ty {
            TypeRef::Primitive(Primitive::Bool) => Value::Bool(false),
            TypeRef::Primitive(Primitive::Char) => Value::Char('\0'),
            TypeRef::Primitive(Primitive::I32) => Value::I32(0),
            TypeRef::Primitive(Primitive::I64) => Value::I64(0),
            TypeRef::Primitive(Primitive::F64) => Value::F64(0.0),
            _ => Value::Null,
        }
    }

    /// Equality used for attribute comparison and cache identity.
    ///
    /// Null-aware, ordinal for strings, by value for scalars and by
    /// identity for reference types.
    pub fn value_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Enum(ta, a), Value::Enum(tb, b)) => ta == tb && a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => {
                Arc::ptr_eq(a, b) || {
                    let (left, right) = (a.to_vec(), b.to_vec());
                    a.element == b.element
                        && left.len() == right.len()
                        && left.iter().zip(&right).all(|(x, y)| x.value_eq(y))
                }
            }
            (Value::Ref(a), Value::Ref(b)) => a.same_location(b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Method(a), Value::Method(b)) => a == b,
            (Value::Interceptors(a), Value::Interceptors(b)) => Arc::ptr_eq(a, b),
            (Value::Selector(a), Value::Selector(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        }
    }

    /// Hash consistent with [`Value::value_eq`]
    pub fn hash_code(&self) -> u64 {
        let mut hasher = FxHasher::default();
        std::mem::discriminant(self).hash(&mut hasher);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(&mut hasher),
            Value::Char(v) => v.hash(&mut hasher),
            Value::I32(v) => v.hash(&mut hasher),
            Value::I64(v) => v.hash(&mut hasher),
            Value::F64(v) => v.to_bits().hash(&mut hasher),
            Value::Str(v) => v.hash(&mut hasher),
            Value::Enum(t, v) => {
                t.hash(&mut hasher);
                v.hash(&mut hasher);
            }
            Value::Object(o) => (Arc::as_ptr(o) as usize).hash(&mut hasher),
            Value::Array(a) => {
                a.element.hash(&mut hasher);
                for item in a.to_vec() {
                    hasher.write_u64(item.hash_code());
                }
            }
            Value::Ref(_) => {}
            Value::Type(t) => t.hash(&mut hasher),
            Value::Method(m) => m.method.id.hash(&mut hasher),
            Value::Interceptors(a) => (Arc::as_ptr(a) as usize).hash(&mut hasher),
            Value::Selector(s) => (Arc::as_ptr(s) as *const () as usize).hash(&mut hasher),
        }
        hasher.finish()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.value_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{:?}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}L", v),
            Value::F64(v) => write!(f, "{:?}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            Value::Enum(t, v) => write!(f, "enum#{}({})", t.0, v),
            Value::Object(o) => write!(f, "<{} @{:x}>", o.ty.name, Arc::as_ptr(o) as usize),
            Value::Array(a) => write!(f, "{}[{}]", a.element, a.len()),
            Value::Ref(p) => write!(f, "&{:?}", p.load()),
            Value::Type(t) => write!(f, "typeof({})", t),
            Value::Method(m) => write!(f, "methodof({})", m.method.name),
            Value::Interceptors(a) => write!(f, "<{} interceptors>", a.len()),
            Value::Selector(_) => write!(f, "<selector>"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

/// A class instance
pub struct Object {
    /// Runtime type definition
    pub ty: Arc<TypeDef>,
    /// Type arguments when the definition is generic
    pub type_args: Vec<TypeRef>,
    fields: Mutex<Vec<Value>>,
}

impl Object {
    /// Allocate an instance with pre-initialized field slots
    pub fn new(ty: Arc<TypeDef>, type_args: Vec<TypeRef>, fields: Vec<Value>) -> ObjectRef {
        Arc::new(Self {
            ty,
            type_args,
            fields: Mutex::new(fields),
        })
    }

    /// Constructed type of the instance
    pub fn type_ref(&self) -> TypeRef {
        TypeRef::Named(self.ty.id, self.type_args.clone())
    }

    /// Read an instance field
    pub fn field(&self, slot: usize) -> Value {
        self.fields.lock().get(slot).cloned().unwrap_or(Value::Null)
    }

    /// Write an instance field
    pub fn set_field(&self, slot: usize, value: Value) {
        let mut fields = self.fields.lock();
        if fields.len() <= slot {
            fields.resize(slot + 1, Value::Null);
        }
        fields[slot] = value;
    }

    /// Copy of all field values
    pub fn fields(&self) -> Vec<Value> {
        self.fields.lock().clone()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.ty.name)
            .field("type_args", &self.type_args)
            .finish_non_exhaustive()
    }
}

/// A single-dimension array
pub struct Array {
    /// Element type
    pub element: TypeRef,
    items: Mutex<Vec<Value>>,
}

impl Array {
    /// Array holding `items`
    pub fn new(element: TypeRef, items: Vec<Value>) -> ArrayRef {
        Arc::new(Self {
            element,
            items: Mutex::new(items),
        })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Read an element
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` when `index` is past the end.
    pub fn get(&self, index: usize) -> VmResult<Value> {
        let items = self.items.lock();
        items.get(index).cloned().ok_or(VmError::IndexOutOfRange {
            index: index as i64,
            length: items.len(),
        })
    }

    /// Write an element
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` when `index` is past the end.
    pub fn set(&self, index: usize, value: Value) -> VmResult<()> {
        let mut items = self.items.lock();
        let length = items.len();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::IndexOutOfRange {
                index: index as i64,
                length,
            }),
        }
    }

    /// Copy of all elements
    pub fn to_vec(&self) -> Vec<Value> {
        self.items.lock().clone()
    }
}

/// Managed pointer to a storage location
#[derive(Clone)]
pub enum Pointer {
    /// Argument or local slot, or a standalone cell
    Slot(Arc<Mutex<Value>>),
    /// Instance field
    Field(ObjectRef, usize),
    /// Array element
    Element(ArrayRef, usize),
    /// Static field
    Static(Arc<TypeDef>, usize),
}

impl Pointer {
    /// Read through the pointer
    pub fn load(&self) -> Value {
        match self {
            Pointer::Slot(cell) => cell.lock().clone(),
            Pointer::Field(obj, slot) => obj.field(*slot),
            Pointer::Element(array, index) => array.get(*index).unwrap_or(Value::Null),
            Pointer::Static(ty, slot) => ty.static_value(*slot),
        }
    }

    /// Write through the pointer
    pub fn store(&self, value: Value) {
        match self {
            Pointer::Slot(cell) => *cell.lock() = value,
            Pointer::Field(obj, slot) => obj.set_field(*slot, value),
            Pointer::Element(array, index) => {
                if let Err(err) = array.set(*index, value) {
                    tracing::warn!(%err, "store through dangling element pointer");
                }
            }
            Pointer::Static(ty, slot) => ty.set_static_value(*slot, value),
        }
    }

    /// Whether both pointers address the same location
    pub fn same_location(&self, other: &Pointer) -> bool {
        match (self, other) {
            (Pointer::Slot(a), Pointer::Slot(b)) => Arc::ptr_eq(a, b),
            (Pointer::Field(a, i), Pointer::Field(b, j)) => Arc::ptr_eq(a, b) && i == j,
            (Pointer::Element(a, i), Pointer::Element(b, j)) => Arc::ptr_eq(a, b) && i == j,
            (Pointer::Static(a, i), Pointer::Static(b, j)) => a.id == b.id && i == j,
            _ => false,
        }
    }
}

/// A method handle closed over its generic arguments
#[derive(Debug, Clone)]
pub struct MethodToken {
    /// Method definition
    pub method: Arc<MethodDef>,
    /// Generic method arguments
    pub generic_args: Vec<TypeRef>,
}

impl PartialEq for MethodToken {
    fn eq(&self, other: &Self) -> bool {
        self.method.id == other.method.id && self.generic_args == other.generic_args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_eq_semantics() {
        assert_eq!(Value::from("abc"), Value::from(String::from("abc")));
        assert_ne!(Value::I32(1), Value::I64(1));
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::I32(0));
        assert_eq!(Value::from(1.5).hash_code(), Value::from(1.5).hash_code());
    }

    #[test]
    fn test_ref_cell_round_trip() {
        let cell = Value::new_ref(Value::I32(1));
        let pointer = cell.as_pointer().unwrap().clone();
        pointer.store(Value::I32(42));
        assert_eq!(cell.as_pointer().unwrap().load(), Value::I32(42));
    }

    #[test]
    fn test_array_bounds() {
        let array = Array::new(TypeRef::i32(), vec![Value::I32(1), Value::I32(2)]);
        assert_eq!(array.get(1).unwrap(), Value::I32(2));
        assert!(matches!(
            array.set(2, Value::I32(3)),
            Err(VmError::IndexOutOfRange { index: 2, length: 2 })
        ));
    }

    #[test]
    fn test_element_pointer_writes_into_array() {
        let array = Array::new(TypeRef::object(), vec![Value::Null]);
        let pointer = Pointer::Element(array.clone(), 0);
        pointer.store(Value::from("x"));
        assert_eq!(array.get(0).unwrap(), Value::from("x"));
    }

    #[test]
    fn test_default_of_primitives() {
        assert_eq!(Value::default_of(&TypeRef::bool()), Value::Bool(false));
        assert_eq!(Value::default_of(&TypeRef::i32()), Value::I32(0));
        assert!(Value::default_of(&TypeRef::string()).is_null());
    }
}
