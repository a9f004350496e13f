//! Meta-model of a proxy type under construction
//!
//! Contributors describe what they are going to emit as [`MetaMethod`]s,
//! [`MetaProperty`]s and [`MetaEvent`]s collected into one shared
//! [`MetaType`]. Name clashes between members that come from different
//! interfaces are settled here, before any code is emitted: the newcomer
//! becomes an explicit implementation (`IFoo.Run`), and a clash that
//! survives the rename fails the generation.

use std::sync::Arc;

use crate::error::{ProxyError, ProxyResult};
use crate::types::signature::{same_signature_parts, MethodSignature};
use crate::types::{
    CustomAttributeData, MethodDef, ParameterDef, TypeRef, TypeTable, Visibility,
};

fn explicit_prefix(types: &TypeTable, declaring: &TypeRef) -> String {
    types
        .def_of(declaring)
        .map(|def| def.simple_name().to_string())
        .unwrap_or_else(|| declaring.to_string())
}

/// A method the proxy overrides or implements
#[derive(Debug, Clone)]
pub struct MetaMethod {
    /// Source method: the overridden class method or the interface slot
    pub method: Arc<MethodDef>,
    /// Declaring type of `method`, with its type arguments
    pub declaring: TypeRef,
    /// Whether calls go through the interceptor chain
    pub intercepted: bool,
    /// Not an accessor of a property or event
    pub standalone: bool,
    on_interface: bool,
    name: String,
    explicit: bool,
    prefix: String,
}

impl MetaMethod {
    /// Describe `method` as declared on `declaring`
    pub fn new(
        types: &TypeTable,
        method: Arc<MethodDef>,
        declaring: TypeRef,
        intercepted: bool,
        standalone: bool,
    ) -> Self {
        Self {
            name: method.name.clone(),
            on_interface: types.is_interface(&declaring),
            prefix: explicit_prefix(types, &declaring),
            method,
            declaring,
            intercepted,
            standalone,
            explicit: false,
        }
    }

    /// Name of the emitted member
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the member is emitted as an explicit implementation
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// Whether the source method is an interface slot
    pub fn is_interface_member(&self) -> bool {
        self.on_interface
    }

    /// Rename to `Interface.Member`
    pub fn switch_to_explicit_implementation(&mut self) {
        self.name = format!("{}.{}", self.prefix, self.method.name);
        self.explicit = true;
    }

    /// Accessibility of the emitted member
    pub fn visibility(&self, internals_visible: bool) -> Visibility {
        if self.explicit {
            return Visibility::Private;
        }
        if self.on_interface {
            return Visibility::Public;
        }
        match self.method.visibility {
            Visibility::ProtectedInternal if !internals_visible => Visibility::Protected,
            other => other,
        }
    }

    /// Parameters with the declaring type's arguments substituted
    pub fn parameters(&self) -> Vec<ParameterDef> {
        let args = self.declaring.type_args();
        self.method
            .parameters
            .iter()
            .map(|p| ParameterDef {
                ty: p.ty.substitute(args, &[]),
                ..p.clone()
            })
            .collect()
    }

    /// Return type with the declaring type's arguments substituted
    pub fn return_type(&self) -> TypeRef {
        self.method
            .return_type
            .substitute(self.declaring.type_args(), &[])
    }

    /// The source method as seen through the closed declaring type, under
    /// its emitted name
    pub fn closed_method(&self) -> MethodDef {
        let signature = self.signature();
        let mut closed = MethodDef::clone(&self.method);
        closed.name = self.name.clone();
        closed.parameters = self.parameters();
        closed.return_type = signature.return_type;
        closed.generic_params = signature.generic_params;
        closed
    }

    /// Signature used for collision checks
    pub fn signature(&self) -> MethodSignature {
        let mut signature = MethodSignature::closed(&self.method, self.declaring.type_args());
        signature.name = self.name.clone();
        signature
    }

    fn collides_with(&self, other: &MetaMethod) -> bool {
        self.name == other.name && same_signature_parts(&self.signature(), &other.signature())
    }
}

/// A property the proxy declares
#[derive(Debug, Clone)]
pub struct MetaProperty {
    /// Property type, closed
    pub ty: TypeRef,
    /// Index of the getter in [`MetaType::methods`]
    pub getter: Option<usize>,
    /// Index of the setter in [`MetaType::methods`]
    pub setter: Option<usize>,
    /// Attributes copied to the emitted property
    pub attributes: Vec<CustomAttributeData>,
    source_name: String,
    name: String,
    prefix: String,
}

impl MetaProperty {
    /// Describe a property declared on `declaring`
    pub fn new(
        types: &TypeTable,
        declaring: &TypeRef,
        name: &str,
        ty: TypeRef,
        getter: Option<usize>,
        setter: Option<usize>,
    ) -> Self {
        Self {
            ty,
            getter,
            setter,
            attributes: Vec::new(),
            source_name: name.to_string(),
            name: name.to_string(),
            prefix: explicit_prefix(types, declaring),
        }
    }

    /// Name of the emitted property
    pub fn name(&self) -> &str {
        &self.name
    }

    fn switch_to_explicit_implementation(&mut self) {
        self.name = format!("{}.{}", self.prefix, self.source_name);
    }
}

/// An event the proxy declares
#[derive(Debug, Clone)]
pub struct MetaEvent {
    /// Handler type, closed
    pub handler_type: TypeRef,
    /// Index of the subscription method in [`MetaType::methods`]
    pub adder: Option<usize>,
    /// Index of the unsubscription method in [`MetaType::methods`]
    pub remover: Option<usize>,
    source_name: String,
    name: String,
    prefix: String,
}

impl MetaEvent {
    /// Describe an event declared on `declaring`
    pub fn new(
        types: &TypeTable,
        declaring: &TypeRef,
        name: &str,
        handler_type: TypeRef,
        adder: Option<usize>,
        remover: Option<usize>,
    ) -> Self {
        Self {
            handler_type,
            adder,
            remover,
            source_name: name.to_string(),
            name: name.to_string(),
            prefix: explicit_prefix(types, declaring),
        }
    }

    /// Name of the emitted event
    pub fn name(&self) -> &str {
        &self.name
    }

    fn switch_to_explicit_implementation(&mut self) {
        self.name = format!("{}.{}", self.prefix, self.source_name);
    }
}

/// Everything a proxy type will contain, across all contributors
#[derive(Debug, Default)]
pub struct MetaType {
    methods: Vec<MetaMethod>,
    properties: Vec<MetaProperty>,
    events: Vec<MetaEvent>,
}

impl MetaType {
    /// Empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method, renaming it on collision. Returns its index.
    pub fn add_method(&mut self, mut method: MetaMethod) -> ProxyResult<usize> {
        if self.methods.iter().any(|m| m.collides_with(&method)) {
            method.switch_to_explicit_implementation();
            if self.methods.iter().any(|m| m.collides_with(&method)) {
                return Err(ProxyError::DuplicateElement(method.name));
            }
        }
        self.methods.push(method);
        Ok(self.methods.len() - 1)
    }

    /// Add a property, renaming it on collision. Returns its index.
    pub fn add_property(&mut self, mut property: MetaProperty) -> ProxyResult<usize> {
        let clash = |p: &MetaProperty, q: &MetaProperty| p.name == q.name && p.ty == q.ty;
        if self.properties.iter().any(|p| clash(p, &property)) {
            property.switch_to_explicit_implementation();
            if self.properties.iter().any(|p| clash(p, &property)) {
                return Err(ProxyError::DuplicateElement(property.name));
            }
        }
        self.properties.push(property);
        Ok(self.properties.len() - 1)
    }

    /// Add an event, renaming it on collision. Returns its index.
    pub fn add_event(&mut self, mut event: MetaEvent) -> ProxyResult<usize> {
        let clash =
            |a: &MetaEvent, b: &MetaEvent| a.name == b.name && a.handler_type == b.handler_type;
        if self.events.iter().any(|e| clash(e, &event)) {
            event.switch_to_explicit_implementation();
            if self.events.iter().any(|e| clash(e, &event)) {
                return Err(ProxyError::DuplicateElement(event.name));
            }
        }
        self.events.push(event);
        Ok(self.events.len() - 1)
    }

    /// Collected methods
    pub fn methods(&self) -> &[MetaMethod] {
        &self.methods
    }

    /// Collected properties
    pub fn properties(&self) -> &[MetaProperty] {
        &self.properties
    }

    /// Collected events
    pub fn events(&self) -> &[MetaEvent] {
        &self.events
    }
}
