//! Type, method and member definitions

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};

use crate::emit::CompiledMethod;
use crate::error::VmResult;
use crate::types::{GenericOwner, MethodId, TypeId, TypeRef};
use crate::value::Value;
use crate::vm::Vm;

/// Shape of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Reference type with fields, constructors and single inheritance
    Class,
    /// Contract with abstract members only
    Interface,
    /// Named set of `i32` constants (a value type)
    Enum,
}

/// Accessibility of a type or member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Visible everywhere
    Public,
    /// Visible to derived types
    Protected,
    /// Visible inside the declaring module
    Internal,
    /// Visible to derived types and inside the declaring module
    ProtectedInternal,
    /// Visible to the declaring type only
    Private,
}

impl Visibility {
    /// Whether a derived type in another module can see the member
    pub fn visible_to_subclasses(self) -> bool {
        matches!(
            self,
            Visibility::Public | Visibility::Protected | Visibility::ProtectedInternal
        )
    }
}

/// Variance of a generic parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variance {
    /// No variance
    #[default]
    Invariant,
    /// `out T`
    Covariant,
    /// `in T`
    Contravariant,
}

/// A generic parameter with its constraints
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericParameterDef {
    /// Declared name (`T`)
    pub name: String,
    /// Owning declaration
    pub owner: GenericOwner,
    /// Position in the owner's parameter list
    pub position: u16,
    /// Variance flag
    pub variance: Variance,
    /// `class` constraint
    pub reference_type: bool,
    /// `struct` constraint
    pub value_type: bool,
    /// `new()` constraint
    pub default_constructor: bool,
    /// Interfaces the argument must implement
    pub interface_constraints: Vec<TypeRef>,
    /// Class the argument must derive from
    pub class_constraint: Option<TypeRef>,
}

impl GenericParameterDef {
    /// Unconstrained parameter
    pub fn new(name: impl Into<String>, owner: GenericOwner, position: u16) -> Self {
        Self {
            name: name.into(),
            owner,
            position,
            variance: Variance::Invariant,
            reference_type: false,
            value_type: false,
            default_constructor: false,
            interface_constraints: Vec::new(),
            class_constraint: None,
        }
    }

    /// Whether no constraint of any kind is present
    pub fn is_unconstrained(&self) -> bool {
        !self.reference_type
            && !self.value_type
            && !self.default_constructor
            && self.interface_constraints.is_empty()
            && self.class_constraint.is_none()
    }
}

/// A method parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterDef {
    /// Parameter name
    pub name: String,
    /// Declared type (`ByRef` for `ref`/`out` parameters)
    pub ty: TypeRef,
    /// `out` parameter
    pub is_out: bool,
    /// Trailing variadic array parameter
    pub is_params: bool,
}

impl ParameterDef {
    /// Plain by-value parameter
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            is_out: false,
            is_params: false,
        }
    }

    /// `out` parameter of the given pointee type
    pub fn out(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty: TypeRef::by_ref(ty),
            is_out: true,
            is_params: false,
        }
    }

    /// `ref` parameter of the given pointee type
    pub fn by_ref(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty: TypeRef::by_ref(ty),
            is_out: false,
            is_params: false,
        }
    }
}

/// A declared field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeRef,
    /// Slot in the instance layout (or the static table)
    pub slot: usize,
    /// Static field
    pub is_static: bool,
    /// Accessibility
    pub visibility: Visibility,
    /// Only assignable in constructors
    pub is_readonly: bool,
}

/// Resolved handle to a field, used by generated code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring type
    pub owner: TypeId,
    /// Slot index
    pub slot: usize,
    /// Static field
    pub is_static: bool,
    /// Field type
    pub ty: TypeRef,
    /// Field name, for diagnostics
    pub name: Arc<str>,
}

/// Role a method plays in its declaring type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Ordinary method
    Method,
    /// Instance constructor
    Constructor,
    /// Static initializer, run once after the type is registered
    TypeInitializer,
    /// Property getter
    Getter,
    /// Property setter
    Setter,
    /// Event subscription
    EventAdd,
    /// Event unsubscription
    EventRemove,
}

/// Arguments handed to a native method body
#[derive(Debug, Clone)]
pub struct NativeCall {
    /// Receiver (`Value::Null` for static methods)
    pub this: Value,
    /// Arguments in declaration order
    pub args: Vec<Value>,
    /// Type arguments of the receiver's type
    pub type_args: Vec<TypeRef>,
    /// Generic method arguments
    pub method_args: Vec<TypeRef>,
}

impl NativeCall {
    /// Argument by position, `Null` when missing
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or(Value::Null)
    }
}

/// Native method implementation
pub type NativeFn = Arc<dyn Fn(&Vm, NativeCall) -> VmResult<Value> + Send + Sync>;

/// Executable body of a method
#[derive(Clone)]
pub enum MethodBody {
    /// No body (interface and abstract members)
    Abstract,
    /// Implemented in Rust
    Native(NativeFn),
    /// Compiled from instruction-layer code
    Compiled(Arc<CompiledMethod>),
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Abstract => write!(f, "Abstract"),
            MethodBody::Native(_) => write!(f, "Native"),
            MethodBody::Compiled(code) => write!(f, "Compiled({} instructions)", code.instructions.len()),
        }
    }
}

/// A declared method or constructor
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Method id
    pub id: MethodId,
    /// Declaring type
    pub declaring_type: TypeId,
    /// Name (`Iface.Name` for explicit implementations)
    pub name: String,
    /// Role
    pub kind: MethodKind,
    /// Accessibility
    pub visibility: Visibility,
    /// No receiver
    pub is_static: bool,
    /// Dispatched through the vtable
    pub is_virtual: bool,
    /// Has no body
    pub is_abstract: bool,
    /// Cannot be overridden further
    pub is_final: bool,
    /// Parameters (without the receiver)
    pub parameters: Vec<ParameterDef>,
    /// Return type
    pub return_type: TypeRef,
    /// Generic parameters declared by the method
    pub generic_params: Vec<GenericParameterDef>,
    /// Body
    pub body: MethodBody,
    /// Custom attributes applied to the method
    pub attributes: Vec<CustomAttributeData>,
}

impl MethodDef {
    /// Whether the method declares generic parameters
    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }

    /// Whether a derived type can override the method
    pub fn is_overridable(&self) -> bool {
        self.is_virtual && !self.is_final && !self.is_static
    }

    /// Whether any parameter is passed by reference
    pub fn has_by_ref_parameters(&self) -> bool {
        self.parameters.iter().any(|p| p.ty.is_by_ref())
    }

    /// Lightweight call handle
    pub fn handle(&self) -> MethodHandle {
        MethodHandle {
            id: self.id,
            name: Arc::from(self.name.as_str()),
            return_type: self.return_type.clone(),
            param_count: self.parameters.len(),
            is_static: self.is_static,
        }
    }
}

/// Call-site view of a method, available before its type is registered
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodHandle {
    /// Method id
    pub id: MethodId,
    /// Name, for diagnostics
    pub name: Arc<str>,
    /// Return type as seen by the caller
    pub return_type: TypeRef,
    /// Number of declared parameters
    pub param_count: usize,
    /// No receiver
    pub is_static: bool,
}

/// A declared property
#[derive(Debug, Clone)]
pub struct PropertyDef {
    /// Property name
    pub name: String,
    /// Property type
    pub ty: TypeRef,
    /// Getter method
    pub getter: Option<MethodId>,
    /// Setter method
    pub setter: Option<MethodId>,
    /// Custom attributes applied to the property
    pub attributes: Vec<CustomAttributeData>,
}

/// A declared event
#[derive(Debug, Clone)]
pub struct EventDef {
    /// Event name
    pub name: String,
    /// Handler type
    pub handler_type: TypeRef,
    /// Subscription method
    pub adder: Option<MethodId>,
    /// Unsubscription method
    pub remover: Option<MethodId>,
}

/// How an attribute type may be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeUsage {
    /// Applications flow to derived types
    pub inherited: bool,
    /// More than one application per target is allowed
    pub allow_multiple: bool,
}

impl Default for AttributeUsage {
    fn default() -> Self {
        Self {
            inherited: true,
            allow_multiple: false,
        }
    }
}

/// Recipe for constructing an attribute instance
#[derive(Debug, Clone)]
pub struct CustomAttributeData {
    /// Attribute class
    pub attribute_type: TypeId,
    /// Constructor to call
    pub constructor: MethodId,
    /// Constructor arguments
    pub constructor_args: Vec<Value>,
    /// Property assignments applied after construction
    pub named_properties: Vec<(String, Value)>,
    /// Field assignments applied after construction
    pub named_fields: Vec<(String, Value)>,
}

impl CustomAttributeData {
    /// Attribute built from a constructor call only
    pub fn new(attribute_type: TypeId, constructor: MethodId, constructor_args: Vec<Value>) -> Self {
        Self {
            attribute_type,
            constructor,
            constructor_args,
            named_properties: Vec::new(),
            named_fields: Vec::new(),
        }
    }

    /// Hash consistent with `PartialEq`
    pub fn hash_code(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl PartialEq for CustomAttributeData {
    fn eq(&self, other: &Self) -> bool {
        fn pairs_eq(a: &[(String, Value)], b: &[(String, Value)]) -> bool {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((na, va), (nb, vb))| na == nb && va.value_eq(vb))
        }

        self.attribute_type == other.attribute_type
            && self.constructor == other.constructor
            && self.constructor_args.len() == other.constructor_args.len()
            && self
                .constructor_args
                .iter()
                .zip(&other.constructor_args)
                .all(|(a, b)| a.value_eq(b))
            && pairs_eq(&self.named_properties, &other.named_properties)
            && pairs_eq(&self.named_fields, &other.named_fields)
    }
}

impl Eq for CustomAttributeData {}

impl Hash for CustomAttributeData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.attribute_type.hash(state);
        self.constructor.hash(state);
        for arg in &self.constructor_args {
            state.write_u64(arg.hash_code());
        }
        for (name, value) in self.named_properties.iter().chain(&self.named_fields) {
            name.hash(state);
            state.write_u64(value.hash_code());
        }
    }
}

/// A registered type
#[derive(Debug)]
pub struct TypeDef {
    /// Table id
    pub id: TypeId,
    /// Full name, e.g. `Demo.Calculator`
    pub name: String,
    /// Shape
    pub kind: TypeKind,
    /// Accessibility
    pub visibility: Visibility,
    /// Cannot be derived from
    pub is_sealed: bool,
    /// Cannot be instantiated
    pub is_abstract: bool,
    /// Instances may be persisted through a proxy recipe
    pub is_serializable: bool,
    /// Produced by the proxy generators
    pub is_generated: bool,
    /// Base class (`None` for the root and for interfaces)
    pub parent: Option<TypeRef>,
    /// Directly implemented interfaces (base interfaces for interfaces)
    pub interfaces: Vec<TypeRef>,
    /// Generic parameters of the definition
    pub generic_params: Vec<GenericParameterDef>,
    /// Declared fields
    pub fields: Vec<FieldDef>,
    /// Instance slots including inherited ones
    pub instance_field_count: usize,
    /// Declared methods (excluding constructors)
    pub methods: Vec<MethodId>,
    /// Declared constructors
    pub constructors: Vec<MethodId>,
    /// Static initializer
    pub type_initializer: Option<MethodId>,
    /// Declared properties
    pub properties: Vec<PropertyDef>,
    /// Declared events
    pub events: Vec<EventDef>,
    /// Explicit overrides declared by this type (slot → implementation)
    pub overrides: Vec<(MethodId, MethodId)>,
    /// Flattened dispatch table including inherited entries
    pub vtable: FxHashMap<MethodId, MethodId>,
    /// Custom attributes applied to the type
    pub attributes: Vec<CustomAttributeData>,
    /// Usage flags when this is an attribute type
    pub attribute_usage: Option<AttributeUsage>,
    /// Static field storage
    pub(crate) statics: Mutex<Vec<Value>>,
}

impl TypeDef {
    /// Empty definition with the given identity
    pub fn new(id: TypeId, name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            visibility: Visibility::Public,
            is_sealed: false,
            is_abstract: kind == TypeKind::Interface,
            is_serializable: false,
            is_generated: false,
            parent: None,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            instance_field_count: 0,
            methods: Vec::new(),
            constructors: Vec::new(),
            type_initializer: None,
            properties: Vec::new(),
            events: Vec::new(),
            overrides: Vec::new(),
            vtable: FxHashMap::default(),
            attributes: Vec::new(),
            attribute_usage: None,
            statics: Mutex::new(Vec::new()),
        }
    }

    /// Whether this is an interface
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// Whether this is a class
    pub fn is_class(&self) -> bool {
        self.kind == TypeKind::Class
    }

    /// Whether the definition declares generic parameters
    pub fn is_generic_definition(&self) -> bool {
        !self.generic_params.is_empty()
    }

    /// Short name (after the last `.`)
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Declared field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Handle to a declared field
    pub fn field_ref(&self, name: &str) -> Option<FieldRef> {
        self.field(name).map(|f| FieldRef {
            owner: self.id,
            slot: f.slot,
            is_static: f.is_static,
            ty: f.ty.clone(),
            name: Arc::from(f.name.as_str()),
        })
    }

    /// Read a static field
    pub fn static_value(&self, slot: usize) -> Value {
        self.statics.lock().get(slot).cloned().unwrap_or(Value::Null)
    }

    /// Write a static field
    pub fn set_static_value(&self, slot: usize, value: Value) {
        let mut statics = self.statics.lock();
        if statics.len() <= slot {
            statics.resize(slot + 1, Value::Null);
        }
        statics[slot] = value;
    }

    /// Dispatch a slot through the vtable
    pub fn resolve_slot(&self, slot: MethodId) -> MethodId {
        self.vtable.get(&slot).copied().unwrap_or(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_storage_grows_on_write() {
        let def = TypeDef::new(TypeId(40), "Demo.Holder", TypeKind::Class);
        assert!(def.static_value(3).is_null());
        def.set_static_value(3, Value::I32(7));
        assert_eq!(def.static_value(3), Value::I32(7));
        assert!(def.static_value(0).is_null());
    }

    #[test]
    fn test_attribute_data_equality_is_by_value() {
        let a = CustomAttributeData::new(TypeId(30), MethodId(1), vec![Value::from("x")]);
        let b = CustomAttributeData::new(TypeId(30), MethodId(1), vec![Value::from("x")]);
        let c = CustomAttributeData::new(TypeId(30), MethodId(1), vec![Value::from("y")]);
        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
        assert_ne!(a, c);
    }

    #[test]
    fn test_unconstrained_parameter() {
        let mut param = GenericParameterDef::new("T", GenericOwner::Method, 0);
        assert!(param.is_unconstrained());
        param.default_constructor = true;
        assert!(!param.is_unconstrained());
    }
}
