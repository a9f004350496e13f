//! Type builder for declaring source types
//!
//! Source types are the classes and interfaces that proxies are generated
//! for. They are declared with a fluent builder and registered in a
//! [`TypeTable`]; method bodies are either native Rust closures or left
//! abstract.
//!
//! ```ignore
//! let calculator = scope.define(
//!     TypeBuilder::class("Demo.Calculator")
//!         .implements(icalculator.clone())
//!         .method(
//!             MethodBuilder::new("Add")
//!                 .param("a", TypeRef::i32())
//!                 .param("b", TypeRef::i32())
//!                 .returns(TypeRef::i32())
//!                 .as_virtual()
//!                 .native(|_, call| Ok(Value::I32(call.arg(0).as_i32().unwrap_or(0) + call.arg(1).as_i32().unwrap_or(0)))),
//!         ),
//! )?;
//! ```

use std::sync::Arc;

use crate::error::{ProxyError, ProxyResult, VmResult};
use crate::types::table::next_method_id;
use crate::types::{
    AttributeUsage, CustomAttributeData, EventDef, FieldDef, GenericOwner, GenericParameterDef,
    MethodBody, MethodDef, MethodId, MethodKind, NativeCall, ParameterDef, PropertyDef, TypeDef,
    TypeId, TypeKind, TypeRef, TypeTable, Visibility,
};
use crate::value::Value;
use crate::vm::Vm;

/// Definition of a method to be added to a type
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    name: String,
    kind: MethodKind,
    visibility: Visibility,
    is_static: bool,
    is_virtual: bool,
    is_abstract: bool,
    is_final: bool,
    is_override: bool,
    parameters: Vec<ParameterDef>,
    return_type: TypeRef,
    generic_params: Vec<GenericParameterDef>,
    body: MethodBody,
    attributes: Vec<CustomAttributeData>,
}

impl MethodBuilder {
    /// Public, non-virtual, `void` method without a body
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MethodKind::Method,
            visibility: Visibility::Public,
            is_static: false,
            is_virtual: false,
            is_abstract: false,
            is_final: false,
            is_override: false,
            parameters: Vec::new(),
            return_type: TypeRef::Void,
            generic_params: Vec::new(),
            body: MethodBody::Abstract,
            attributes: Vec::new(),
        }
    }

    /// Public constructor
    pub fn constructor() -> Self {
        let mut builder = Self::new(".ctor");
        builder.kind = MethodKind::Constructor;
        builder
    }

    /// Add a by-value parameter
    pub fn param(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.parameters.push(ParameterDef::new(name, ty));
        self
    }

    /// Add an `out` parameter
    pub fn out_param(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.parameters.push(ParameterDef::out(name, ty));
        self
    }

    /// Add a `ref` parameter
    pub fn ref_param(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.parameters.push(ParameterDef::by_ref(name, ty));
        self
    }

    /// Add a trailing variadic array parameter
    pub fn params_array(mut self, name: impl Into<String>, element: TypeRef) -> Self {
        let mut param = ParameterDef::new(name, TypeRef::array_of(element));
        param.is_params = true;
        self.parameters.push(param);
        self
    }

    /// Set the return type
    pub fn returns(mut self, ty: TypeRef) -> Self {
        self.return_type = ty;
        self
    }

    /// Declare an unconstrained method-level generic parameter
    pub fn generic_param(mut self, name: impl Into<String>) -> Self {
        let position = self.generic_params.len() as u16;
        self.generic_params
            .push(GenericParameterDef::new(name, GenericOwner::Method, position));
        self
    }

    /// Declare a method-level generic parameter with constraints
    pub fn generic_param_def(mut self, mut param: GenericParameterDef) -> Self {
        param.owner = GenericOwner::Method;
        param.position = self.generic_params.len() as u16;
        self.generic_params.push(param);
        self
    }

    /// Set the accessibility
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Mark as virtual
    pub fn as_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Mark as abstract (implies virtual)
    pub fn as_abstract(mut self) -> Self {
        self.is_abstract = true;
        self.is_virtual = true;
        self.body = MethodBody::Abstract;
        self
    }

    /// Mark as sealed
    pub fn as_sealed(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Override a virtual method of the base class with the same signature
    pub fn as_override(mut self) -> Self {
        self.is_override = true;
        self.is_virtual = true;
        self
    }

    /// Mark as static
    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Attach a custom attribute
    pub fn attribute(mut self, data: CustomAttributeData) -> Self {
        self.attributes.push(data);
        self
    }

    /// Implement the method in Rust
    pub fn native<F>(mut self, f: F) -> Self
    where
        F: Fn(&Vm, NativeCall) -> VmResult<Value> + Send + Sync + 'static,
    {
        self.body = MethodBody::Native(Arc::new(f));
        self
    }

    fn into_def(self, id: MethodId, declaring_type: TypeId) -> MethodDef {
        MethodDef {
            id,
            declaring_type,
            name: self.name,
            kind: self.kind,
            visibility: self.visibility,
            is_static: self.is_static,
            is_virtual: self.is_virtual,
            is_abstract: self.is_abstract,
            is_final: self.is_final,
            parameters: self.parameters,
            return_type: self.return_type,
            generic_params: self.generic_params,
            body: self.body,
            attributes: self.attributes,
        }
    }
}

#[derive(Debug, Clone)]
struct FieldDecl {
    name: String,
    ty: TypeRef,
    is_static: bool,
    visibility: Visibility,
    is_readonly: bool,
}

#[derive(Debug, Clone)]
struct PropertyDecl {
    name: String,
    ty: TypeRef,
    getter: Option<MethodBuilder>,
    setter: Option<MethodBuilder>,
    auto: bool,
    is_virtual: bool,
    attributes: Vec<CustomAttributeData>,
}

#[derive(Debug, Clone)]
struct EventDecl {
    name: String,
    handler_type: TypeRef,
    adder: MethodBuilder,
    remover: MethodBuilder,
}

/// Fluent declaration of a class, interface, enum or attribute type
#[derive(Debug, Clone)]
pub struct TypeBuilder {
    name: String,
    kind: TypeKind,
    visibility: Visibility,
    is_sealed: bool,
    is_abstract: bool,
    is_serializable: bool,
    is_root: bool,
    parent: Option<TypeRef>,
    interfaces: Vec<TypeRef>,
    generic_params: Vec<GenericParameterDef>,
    fields: Vec<FieldDecl>,
    methods: Vec<MethodBuilder>,
    constructors: Vec<MethodBuilder>,
    properties: Vec<PropertyDecl>,
    events: Vec<EventDecl>,
    attributes: Vec<CustomAttributeData>,
    attribute_usage: Option<AttributeUsage>,
}

impl TypeBuilder {
    fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            visibility: Visibility::Public,
            is_sealed: kind == TypeKind::Enum,
            is_abstract: kind == TypeKind::Interface,
            is_serializable: false,
            is_root: false,
            parent: None,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            attributes: Vec::new(),
            attribute_usage: None,
        }
    }

    /// Declare a class (deriving from the root object unless `extends` is used)
    pub fn class(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Class)
    }

    /// Declare an interface
    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Interface)
    }

    /// Declare an enum
    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Enum)
    }

    /// Declare an attribute class
    pub fn attribute(name: impl Into<String>) -> Self {
        let mut builder = Self::new(name, TypeKind::Class);
        builder.parent = Some(TypeRef::named(TypeId::ATTRIBUTE));
        builder.attribute_usage = Some(AttributeUsage::default());
        builder
    }

    /// The root of the class hierarchy has no parent
    pub(crate) fn root(mut self) -> Self {
        self.is_root = true;
        self
    }

    /// Set the base class
    pub fn extends(mut self, parent: TypeRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add an implemented (or, for interfaces, inherited) interface
    pub fn implements(mut self, iface: TypeRef) -> Self {
        self.interfaces.push(iface);
        self
    }

    /// Declare an unconstrained type-level generic parameter
    pub fn generic_param(mut self, name: impl Into<String>) -> Self {
        let position = self.generic_params.len() as u16;
        self.generic_params
            .push(GenericParameterDef::new(name, GenericOwner::Type, position));
        self
    }

    /// Set the accessibility
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Forbid derivation
    pub fn sealed(mut self) -> Self {
        self.is_sealed = true;
        self
    }

    /// Forbid instantiation
    pub fn as_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Allow instances to be persisted through proxy recipes
    pub fn serializable(mut self) -> Self {
        self.is_serializable = true;
        self
    }

    /// Add a public instance field
    pub fn field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            ty,
            is_static: false,
            visibility: Visibility::Public,
            is_readonly: false,
        });
        self
    }

    /// Add a public static field
    pub fn static_field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            ty,
            is_static: true,
            visibility: Visibility::Public,
            is_readonly: false,
        });
        self
    }

    /// Add a method
    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }

    /// Add a constructor
    pub fn constructor(mut self, ctor: MethodBuilder) -> Self {
        let mut ctor = ctor;
        ctor.kind = MethodKind::Constructor;
        ctor.name = ".ctor".to_string();
        self.constructors.push(ctor);
        self
    }

    /// Add a property with explicit accessors
    pub fn property(
        mut self,
        name: impl Into<String>,
        ty: TypeRef,
        getter: Option<MethodBuilder>,
        setter: Option<MethodBuilder>,
    ) -> Self {
        self.properties.push(PropertyDecl {
            name: name.into(),
            ty,
            getter,
            setter,
            auto: false,
            is_virtual: false,
            attributes: Vec::new(),
        });
        self
    }

    /// Add a read/write property backed by a generated field
    pub fn auto_property(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.properties.push(PropertyDecl {
            name: name.into(),
            ty,
            getter: None,
            setter: None,
            auto: true,
            is_virtual: false,
            attributes: Vec::new(),
        });
        self
    }

    /// Add a virtual read/write property backed by a generated field
    pub fn virtual_auto_property(self, name: impl Into<String>, ty: TypeRef) -> Self {
        let mut builder = self.auto_property(name, ty);
        if let Some(last) = builder.properties.last_mut() {
            last.is_virtual = true;
        }
        builder
    }

    /// Add an event with explicit subscription methods
    pub fn event(
        mut self,
        name: impl Into<String>,
        handler_type: TypeRef,
        adder: MethodBuilder,
        remover: MethodBuilder,
    ) -> Self {
        self.events.push(EventDecl {
            name: name.into(),
            handler_type,
            adder,
            remover,
        });
        self
    }

    /// Attach a custom attribute
    pub fn with_attribute(mut self, data: CustomAttributeData) -> Self {
        self.attributes.push(data);
        self
    }

    /// Set usage flags of an attribute type
    pub fn usage(mut self, usage: AttributeUsage) -> Self {
        self.attribute_usage = Some(usage);
        self
    }

    /// Validate, lay out and register the type
    pub fn build(self, table: &mut TypeTable) -> ProxyResult<Arc<TypeDef>> {
        let invalid = |reason: &str| ProxyError::InvalidDefinition {
            type_name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.kind == TypeKind::Interface {
            if !self.fields.is_empty() {
                return Err(invalid("interfaces cannot declare fields"));
            }
            if !self.constructors.is_empty() {
                return Err(invalid("interfaces cannot declare constructors"));
            }
        }

        let parent = match self.kind {
            TypeKind::Class if !self.is_root => {
                Some(self.parent.clone().unwrap_or_else(TypeRef::object))
            }
            _ => None,
        };
        let parent_def = match &parent {
            Some(p) => {
                let def = table
                    .def_of(p)
                    .ok_or_else(|| ProxyError::UnknownType(table.type_name(p)))?;
                if def.is_sealed {
                    return Err(ProxyError::SealedType(def.name.clone()));
                }
                if !def.is_class() {
                    return Err(ProxyError::NotAClass(def.name.clone()));
                }
                Some(def)
            }
            None => None,
        };

        let id = table.reserve(&self.name)?;
        let result = self.build_reserved(id, parent, parent_def, table);
        if result.is_err() {
            table.release(id);
        }
        result
    }

    fn build_reserved(
        self,
        id: TypeId,
        parent: Option<TypeRef>,
        parent_def: Option<Arc<TypeDef>>,
        table: &mut TypeTable,
    ) -> ProxyResult<Arc<TypeDef>> {
        let is_interface = self.kind == TypeKind::Interface;
        let mut def = TypeDef::new(id, self.name.clone(), self.kind);
        def.visibility = self.visibility;
        def.is_sealed = self.is_sealed;
        def.is_abstract = self.is_abstract;
        def.is_serializable = self.is_serializable;
        def.parent = parent.clone();
        def.interfaces = self.interfaces.clone();
        def.generic_params = self.generic_params.clone();
        def.attributes = self.attributes.clone();
        def.attribute_usage = self.attribute_usage;

        let mut instance_slot = parent_def
            .as_ref()
            .map(|p| p.instance_field_count)
            .unwrap_or(0);
        let mut static_slot = 0usize;
        let mut push_field = |def: &mut TypeDef, decl: FieldDecl| -> usize {
            let slot = if decl.is_static {
                static_slot += 1;
                static_slot - 1
            } else {
                instance_slot += 1;
                instance_slot - 1
            };
            def.fields.push(FieldDef {
                name: decl.name,
                ty: decl.ty,
                slot,
                is_static: decl.is_static,
                visibility: decl.visibility,
                is_readonly: decl.is_readonly,
            });
            slot
        };
        for decl in self.fields.clone() {
            push_field(&mut def, decl);
        }

        let mut methods: Vec<MethodDef> = Vec::new();
        let mut declare = |def: &mut TypeDef, builder: MethodBuilder| -> MethodId {
            let mut builder = builder;
            if is_interface {
                builder.is_abstract = true;
                builder.is_virtual = true;
                builder.body = MethodBody::Abstract;
            }
            let method_id = next_method_id();
            let is_ctor = builder.kind == MethodKind::Constructor;
            let method = builder.into_def(method_id, id);
            if is_ctor {
                def.constructors.push(method_id);
            } else {
                def.methods.push(method_id);
            }
            methods.push(method);
            method_id
        };

        for property in self.properties.clone() {
            let (getter, setter) = if property.auto && is_interface {
                (
                    Some(MethodBuilder::new(format!("get_{}", property.name))),
                    Some(MethodBuilder::new(format!("set_{}", property.name))),
                )
            } else if property.auto {
                let slot = push_field(
                    &mut def,
                    FieldDecl {
                        name: format!("<{}>k__BackingField", property.name),
                        ty: property.ty.clone(),
                        is_static: false,
                        visibility: Visibility::Private,
                        is_readonly: false,
                    },
                );
                let mut getter = MethodBuilder::new(format!("get_{}", property.name))
                    .returns(property.ty.clone())
                    .native(move |_, call| Ok(call.this.expect_object("this")?.field(slot)));
                let mut setter = MethodBuilder::new(format!("set_{}", property.name))
                    .param("value", property.ty.clone())
                    .native(move |_, call| {
                        call.this.expect_object("this")?.set_field(slot, call.arg(0));
                        Ok(Value::Null)
                    });
                getter.is_virtual = property.is_virtual;
                setter.is_virtual = property.is_virtual;
                (Some(getter), Some(setter))
            } else {
                (property.getter, property.setter)
            };

            let getter = getter.map(|mut g| {
                g.kind = MethodKind::Getter;
                if !g.name.starts_with("get_") {
                    g.name = format!("get_{}", property.name);
                }
                g.return_type = property.ty.clone();
                declare(&mut def, g)
            });
            let setter = setter.map(|mut s| {
                s.kind = MethodKind::Setter;
                if !s.name.starts_with("set_") {
                    s.name = format!("set_{}", property.name);
                }
                if s.parameters.is_empty() {
                    s.parameters.push(ParameterDef::new("value", property.ty.clone()));
                }
                declare(&mut def, s)
            });
            def.properties.push(PropertyDef {
                name: property.name,
                ty: property.ty,
                getter,
                setter,
                attributes: property.attributes,
            });
        }

        for event in self.events.clone() {
            let mut adder = event.adder;
            adder.kind = MethodKind::EventAdd;
            adder.name = format!("add_{}", event.name);
            let mut remover = event.remover;
            remover.kind = MethodKind::EventRemove;
            remover.name = format!("remove_{}", event.name);
            let adder = declare(&mut def, adder);
            let remover = declare(&mut def, remover);
            def.events.push(EventDef {
                name: event.name,
                handler_type: event.handler_type,
                adder: Some(adder),
                remover: Some(remover),
            });
        }

        let mut override_requests = Vec::new();
        for method in self.methods.clone() {
            let wants_override = method.is_override;
            let method_id = declare(&mut def, method);
            if wants_override {
                override_requests.push(method_id);
            }
        }

        if self.kind == TypeKind::Class {
            let mut ctors = self.constructors.clone();
            if ctors.is_empty() {
                let base_ctor = parent_def.as_ref().and_then(|p| {
                    table
                        .constructors_of(p.id)
                        .into_iter()
                        .find(|c| c.parameters.is_empty())
                        .map(|c| c.id)
                });
                ctors.push(MethodBuilder::constructor().native(move |vm, call| {
                    if let Some(base_ctor) = base_ctor {
                        vm.call_constructor(base_ctor, &call.this, Vec::new())?;
                    }
                    Ok(Value::Null)
                }));
            }
            for ctor in ctors {
                declare(&mut def, ctor);
            }
        }

        def.instance_field_count = instance_slot;

        for method_id in override_requests {
            let Some(method) = methods.iter().find(|m| m.id == method_id) else {
                continue;
            };
            let base = parent
                .as_ref()
                .and_then(|p| table.find_base_slot(p, method))
                .ok_or_else(|| ProxyError::InvalidDefinition {
                    type_name: self.name.clone(),
                    reason: format!("no suitable method found to override for {}", method.name),
                })?;
            if !base.is_overridable() {
                return Err(ProxyError::NotOverridable {
                    type_name: table.type_name(&TypeRef::named(base.declaring_type)),
                    member: base.name.clone(),
                    reason: "the method is sealed".to_string(),
                });
            }
            def.overrides.push((base.id, method_id));
        }

        table.register(def, methods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_root() -> TypeTable {
        let mut table = TypeTable::new();
        TypeBuilder::class("System.Object")
            .root()
            .build(&mut table)
            .unwrap();
        table
    }

    #[test]
    fn test_class_gets_default_constructor_and_object_parent() {
        let mut table = table_with_root();
        let def = TypeBuilder::class("Demo.Point")
            .field("x", TypeRef::i32())
            .field("y", TypeRef::i32())
            .build(&mut table)
            .unwrap();

        assert_eq!(def.parent, Some(TypeRef::object()));
        assert_eq!(def.instance_field_count, 2);
        assert_eq!(def.constructors.len(), 1);
        assert_eq!(def.field("y").unwrap().slot, 1);
    }

    #[test]
    fn test_derived_fields_follow_inherited_slots() {
        let mut table = table_with_root();
        let base = TypeBuilder::class("Demo.Shape")
            .field("name", TypeRef::string())
            .build(&mut table)
            .unwrap();
        let derived = TypeBuilder::class("Demo.Circle")
            .extends(TypeRef::named(base.id))
            .field("radius", TypeRef::Primitive(crate::types::Primitive::F64))
            .build(&mut table)
            .unwrap();

        assert_eq!(derived.field("radius").unwrap().slot, 1);
        assert_eq!(derived.instance_field_count, 2);
    }

    #[test]
    fn test_interface_rejects_fields() {
        let mut table = table_with_root();
        let err = TypeBuilder::interface("Demo.IBad")
            .field("x", TypeRef::i32())
            .build(&mut table)
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidDefinition { .. }));
        assert!(table.get_by_name("Demo.IBad").is_none());
    }

    #[test]
    fn test_override_of_sealed_method_fails() {
        let mut table = table_with_root();
        let base = TypeBuilder::class("Demo.Base")
            .method(MethodBuilder::new("Run").as_virtual().as_sealed())
            .build(&mut table)
            .unwrap();
        let err = TypeBuilder::class("Demo.Derived")
            .extends(TypeRef::named(base.id))
            .method(MethodBuilder::new("Run").as_override())
            .build(&mut table)
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotOverridable { .. }));
    }

    #[test]
    fn test_auto_property_declares_accessors() {
        let mut table = table_with_root();
        let def = TypeBuilder::class("Demo.Person")
            .auto_property("Name", TypeRef::string())
            .build(&mut table)
            .unwrap();
        let property = &def.properties[0];
        let getter = table.method(property.getter.unwrap()).unwrap();
        assert_eq!(getter.name, "get_Name");
        assert_eq!(getter.kind, MethodKind::Getter);
        assert_eq!(def.instance_field_count, 1);
    }

    #[test]
    fn test_sealed_parent_is_rejected() {
        let mut table = table_with_root();
        let sealed = TypeBuilder::class("Demo.Final").sealed().build(&mut table).unwrap();
        let err = TypeBuilder::class("Demo.Child")
            .extends(TypeRef::named(sealed.id))
            .build(&mut table)
            .unwrap_err();
        assert_eq!(err, ProxyError::SealedType("Demo.Final".to_string()));
    }
}
