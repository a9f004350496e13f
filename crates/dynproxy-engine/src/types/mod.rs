//! Runtime type system
//!
//! Types and methods are plain records in a [`TypeTable`]. Source types are
//! declared through [`TypeBuilder`]; synthesized proxy types are produced by
//! the class emitter. Both end up as the same [`TypeDef`]/[`MethodDef`]
//! records, so dispatch never needs to know where a type came from.

pub mod builder;
pub mod def;
pub mod generics;
pub mod signature;
pub mod table;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use builder::{MethodBuilder, TypeBuilder};
pub use def::{
    AttributeUsage, CustomAttributeData, EventDef, FieldDef, FieldRef, GenericParameterDef,
    MethodBody, MethodDef, MethodHandle, MethodKind, NativeCall, NativeFn, ParameterDef,
    PropertyDef, TypeDef, TypeKind, Variance, Visibility,
};
pub use table::TypeTable;

/// Index of a type in its [`TypeTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Root of every class hierarchy
    pub const OBJECT: TypeId = TypeId(0);
    /// Base class of attribute types
    pub const ATTRIBUTE: TypeId = TypeId(1);
    /// Runtime type handle (`Value::Type`)
    pub const TYPE: TypeId = TypeId(2);
    /// Runtime method handle (`Value::Method`)
    pub const METHOD_INFO: TypeId = TypeId(3);
    /// Marker interface for interceptor values
    pub const INTERCEPTOR: TypeId = TypeId(4);
    /// Marker interface for selector values
    pub const INTERCEPTOR_SELECTOR: TypeId = TypeId(5);
    /// Infrastructure interface implemented by every proxy
    pub const PROXY_TARGET_ACCESSOR: TypeId = TypeId(6);
    /// Retarget capability of invocation types
    pub const CHANGE_PROXY_TARGET: TypeId = TypeId(7);
    /// Base class of every invocation type
    pub const ABSTRACT_INVOCATION: TypeId = TypeId(8);
    /// Invocation base for proxies that forward to a separate target
    pub const COMPOSITION_INVOCATION: TypeId = TypeId(9);
    /// Invocation base for class proxies that forward to their own base class
    pub const INHERITANCE_INVOCATION: TypeId = TypeId(10);

    /// Table index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Global method identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId(pub u32);

/// Built-in scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    /// `bool`
    Bool,
    /// `char`
    Char,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 64-bit float
    F64,
    /// Immutable string (a reference type)
    String,
}

impl Primitive {
    /// Whether values of this type are value types
    pub fn is_value_type(self) -> bool {
        !matches!(self, Primitive::String)
    }

    /// Source-level name
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Char => "char",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::F64 => "f64",
            Primitive::String => "string",
        }
    }

    /// Parse a source-level name
    pub fn from_name(name: &str) -> Option<Primitive> {
        Some(match name {
            "bool" => Primitive::Bool,
            "char" => Primitive::Char,
            "i32" | "int" => Primitive::I32,
            "i64" | "long" => Primitive::I64,
            "f64" | "double" => Primitive::F64,
            "string" => Primitive::String,
            _ => return None,
        })
    }
}

/// Which declaration a generic parameter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GenericOwner {
    /// Declared on the enclosing type
    Type,
    /// Declared on the method itself
    Method,
}

/// Reference to a (possibly constructed) type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeRef {
    /// No value
    Void,
    /// Built-in scalar
    Primitive(Primitive),
    /// Table type, with type arguments when the definition is generic
    Named(TypeId, Vec<TypeRef>),
    /// Generic parameter by position
    GenericParam(GenericOwner, u16),
    /// Single-dimension array
    Array(Box<TypeRef>),
    /// Managed pointer to a storage location (by-reference parameter)
    ByRef(Box<TypeRef>),
}

impl TypeRef {
    /// Non-generic named type
    pub fn named(id: TypeId) -> Self {
        TypeRef::Named(id, Vec::new())
    }

    /// The root object type
    pub fn object() -> Self {
        TypeRef::named(TypeId::OBJECT)
    }

    /// `string`
    pub fn string() -> Self {
        TypeRef::Primitive(Primitive::String)
    }

    /// `i32`
    pub fn i32() -> Self {
        TypeRef::Primitive(Primitive::I32)
    }

    /// `bool`
    pub fn bool() -> Self {
        TypeRef::Primitive(Primitive::Bool)
    }

    /// Array of `element`
    pub fn array_of(element: TypeRef) -> Self {
        TypeRef::Array(Box::new(element))
    }

    /// By-reference `element`
    pub fn by_ref(element: TypeRef) -> Self {
        TypeRef::ByRef(Box::new(element))
    }

    /// Method-level generic parameter
    pub fn method_param(position: u16) -> Self {
        TypeRef::GenericParam(GenericOwner::Method, position)
    }

    /// Type-level generic parameter
    pub fn type_param(position: u16) -> Self {
        TypeRef::GenericParam(GenericOwner::Type, position)
    }

    /// Array of interceptors, as stored in proxy fields
    pub fn interceptor_array() -> Self {
        TypeRef::array_of(TypeRef::named(TypeId::INTERCEPTOR))
    }

    /// Whether this is `void`
    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }

    /// Whether this is a by-reference type
    pub fn is_by_ref(&self) -> bool {
        matches!(self, TypeRef::ByRef(_))
    }

    /// Whether this is a generic parameter
    pub fn is_generic_param(&self) -> bool {
        matches!(self, TypeRef::GenericParam(..))
    }

    /// The pointee of a by-ref type, or the type itself
    pub fn strip_by_ref(&self) -> &TypeRef {
        match self {
            TypeRef::ByRef(inner) => inner,
            other => other,
        }
    }

    /// Element type of an array or by-ref
    pub fn element_type(&self) -> Option<&TypeRef> {
        match self {
            TypeRef::Array(inner) | TypeRef::ByRef(inner) => Some(inner),
            _ => None,
        }
    }

    /// Table id of a named type
    pub fn type_id(&self) -> Option<TypeId> {
        match self {
            TypeRef::Named(id, _) => Some(*id),
            _ => None,
        }
    }

    /// Type arguments of a named type
    pub fn type_args(&self) -> &[TypeRef] {
        match self {
            TypeRef::Named(_, args) => args,
            _ => &[],
        }
    }

    /// Whether any generic parameter occurs in this type
    pub fn contains_generic_params(&self) -> bool {
        match self {
            TypeRef::GenericParam(..) => true,
            TypeRef::Named(_, args) => args.iter().any(TypeRef::contains_generic_params),
            TypeRef::Array(inner) | TypeRef::ByRef(inner) => inner.contains_generic_params(),
            TypeRef::Void | TypeRef::Primitive(_) => false,
        }
    }

    /// Replace generic parameters with the supplied arguments.
    ///
    /// Parameters without a matching argument are left untouched.
    pub fn substitute(&self, type_args: &[TypeRef], method_args: &[TypeRef]) -> TypeRef {
        self.map_generic(&mut |owner, position| {
            let args = match owner {
                GenericOwner::Type => type_args,
                GenericOwner::Method => method_args,
            };
            args.get(position as usize).cloned()
        })
    }

    /// Rewrite generic parameters through `f`; `None` keeps the parameter.
    pub fn map_generic(
        &self,
        f: &mut dyn FnMut(GenericOwner, u16) -> Option<TypeRef>,
    ) -> TypeRef {
        match self {
            TypeRef::GenericParam(owner, position) => {
                f(*owner, *position).unwrap_or_else(|| self.clone())
            }
            TypeRef::Named(id, args) => {
                TypeRef::Named(*id, args.iter().map(|a| a.map_generic(f)).collect())
            }
            TypeRef::Array(inner) => TypeRef::Array(Box::new(inner.map_generic(f))),
            TypeRef::ByRef(inner) => TypeRef::ByRef(Box::new(inner.map_generic(f))),
            TypeRef::Void | TypeRef::Primitive(_) => self.clone(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Void => write!(f, "void"),
            TypeRef::Primitive(p) => write!(f, "{}", p.name()),
            TypeRef::Named(id, args) => {
                write!(f, "#{}", id.0)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            TypeRef::GenericParam(GenericOwner::Type, position) => write!(f, "!{}", position),
            TypeRef::GenericParam(GenericOwner::Method, position) => write!(f, "!!{}", position),
            TypeRef::Array(inner) => write!(f, "{}[]", inner),
            TypeRef::ByRef(inner) => write!(f, "{}&", inner),
        }
    }
}
