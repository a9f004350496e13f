//! Class emitter
//!
//! Collects the members of a synthesized class and registers the finished
//! type in a [`TypeTable`]. The type id is reserved when the emitter is
//! created, so members can reference the type (and each other) while it is
//! still being assembled.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::emit::ast::Statement;
use crate::emit::method_emitter::MethodEmitter;
use crate::emit::naming::NamingScope;
use crate::emit::property_emitter::{EventEmitter, PropertyEmitter};
use crate::error::{ProxyError, ProxyResult};
use crate::types::generics::{arguments_for, copy_generic_parameters};
use crate::types::{
    CustomAttributeData, FieldDef, FieldRef, GenericOwner, GenericParameterDef, MethodDef,
    MethodId, MethodKind, ParameterDef, TypeDef, TypeId, TypeKind, TypeRef, TypeTable, Visibility,
};
use crate::value::Value;

/// A class under construction
#[derive(Debug)]
pub struct ClassEmitter {
    id: TypeId,
    name: String,
    parent: TypeRef,
    interfaces: Vec<TypeRef>,
    generic_params: Vec<GenericParameterDef>,
    fields: Vec<FieldDef>,
    next_instance_slot: usize,
    next_static_slot: usize,
    methods: Vec<MethodEmitter>,
    constructors: Vec<MethodEmitter>,
    type_initializer: Vec<Statement>,
    properties: Vec<PropertyEmitter>,
    events: Vec<EventEmitter>,
    overrides: Vec<(MethodId, MethodId)>,
    attributes: Vec<CustomAttributeData>,
    is_serializable: bool,
    is_sealed: bool,
    naming: NamingScope,
}

impl ClassEmitter {
    /// Reserve a type named after `suggested_name` (made unique) deriving
    /// from `parent`.
    pub fn new(
        types: &mut TypeTable,
        suggested_name: &str,
        parent: TypeRef,
        interfaces: Vec<TypeRef>,
    ) -> ProxyResult<Self> {
        let parent_def = types
            .def_of(&parent)
            .ok_or_else(|| ProxyError::UnknownType(types.type_name(&parent)))?;
        if !parent_def.is_class() {
            return Err(ProxyError::NotAClass(parent_def.name.clone()));
        }
        let name = types.unique_name(suggested_name);
        let id = types.reserve(&name)?;
        Ok(Self {
            id,
            name,
            parent,
            interfaces,
            generic_params: Vec::new(),
            fields: Vec::new(),
            next_instance_slot: parent_def.instance_field_count,
            next_static_slot: 0,
            methods: Vec::new(),
            constructors: Vec::new(),
            type_initializer: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            overrides: Vec::new(),
            attributes: Vec::new(),
            is_serializable: false,
            is_sealed: false,
            naming: NamingScope::new(),
        })
    }

    /// Reserved type id
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Full name of the type
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base class
    pub fn parent(&self) -> &TypeRef {
        &self.parent
    }

    /// Implemented interfaces
    pub fn interfaces(&self) -> &[TypeRef] {
        &self.interfaces
    }

    /// Add an interface to the implemented set
    pub fn add_interface(&mut self, iface: TypeRef) {
        if !self.interfaces.contains(&iface) {
            self.interfaces.push(iface);
        }
    }

    /// The type as seen from its own members (generic parameters open)
    pub fn type_ref(&self) -> TypeRef {
        TypeRef::Named(self.id, arguments_for(&self.generic_params, GenericOwner::Type))
    }

    /// Declared generic parameters
    pub fn generic_params(&self) -> &[GenericParameterDef] {
        &self.generic_params
    }

    /// Declare type-level generic parameters mirroring `source`'s method
    /// parameters. Used by invocation types of generic methods.
    pub fn copy_generic_parameters_from_method(&mut self, source: &MethodDef) {
        self.generic_params = copy_generic_parameters(
            &source.generic_params,
            GenericOwner::Method,
            GenericOwner::Type,
        );
    }

    /// Declare type-level generic parameters mirroring a generic type
    pub fn copy_generic_parameters_from_type(&mut self, params: &[GenericParameterDef]) {
        self.generic_params =
            copy_generic_parameters(params, GenericOwner::Type, GenericOwner::Type);
    }

    /// Member name unique within this type
    pub fn unique_member_name(&mut self, suggestion: &str) -> String {
        self.naming.unique_name(suggestion)
    }

    /// Mark the type as serializable
    pub fn serializable(&mut self) {
        self.is_serializable = true;
    }

    /// Mark the type as sealed
    pub fn sealed(&mut self) {
        self.is_sealed = true;
    }

    /// Attach a custom attribute to the type
    pub fn add_attribute(&mut self, data: CustomAttributeData) {
        self.attributes.push(data);
    }

    /// Declare a private instance field; the name is made unique.
    pub fn create_field(&mut self, name: &str, ty: TypeRef) -> FieldRef {
        let slot = self.next_instance_slot;
        self.next_instance_slot += 1;
        self.push_field(name, ty, slot, false)
    }

    /// Declare a private static field; the name is made unique.
    pub fn create_static_field(&mut self, name: &str, ty: TypeRef) -> FieldRef {
        let slot = self.next_static_slot;
        self.next_static_slot += 1;
        self.push_field(name, ty, slot, true)
    }

    fn push_field(&mut self, name: &str, ty: TypeRef, slot: usize, is_static: bool) -> FieldRef {
        let name = self.naming.unique_name(name);
        self.fields.push(FieldDef {
            name: name.clone(),
            ty: ty.clone(),
            slot,
            is_static,
            visibility: Visibility::Private,
            is_readonly: false,
        });
        FieldRef {
            owner: self.id,
            slot,
            is_static,
            ty,
            name: Arc::from(name.as_str()),
        }
    }

    /// Field declared on this emitter
    pub fn get_field(&self, name: &str) -> Option<FieldRef> {
        self.fields.iter().find(|f| f.name == name).map(|f| FieldRef {
            owner: self.id,
            slot: f.slot,
            is_static: f.is_static,
            ty: f.ty.clone(),
            name: Arc::from(f.name.as_str()),
        })
    }

    /// All declared fields
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Start an ordinary method on this type
    pub fn create_method(
        &self,
        name: impl Into<String>,
        parameters: Vec<ParameterDef>,
        return_type: TypeRef,
    ) -> MethodEmitter {
        MethodEmitter::new(self.id, name, MethodKind::Method, parameters, return_type)
    }

    /// Start a method of a particular role (accessors)
    pub fn create_member(
        &self,
        name: impl Into<String>,
        kind: MethodKind,
        parameters: Vec<ParameterDef>,
        return_type: TypeRef,
    ) -> MethodEmitter {
        MethodEmitter::new(self.id, name, kind, parameters, return_type)
    }

    /// Start a constructor on this type
    pub fn create_constructor(&self, parameters: Vec<ParameterDef>) -> MethodEmitter {
        MethodEmitter::new(
            self.id,
            ".ctor",
            MethodKind::Constructor,
            parameters,
            TypeRef::Void,
        )
    }

    /// Add a finished method
    pub fn add_method(&mut self, method: MethodEmitter) -> MethodId {
        let id = method.id();
        self.methods.push(method);
        id
    }

    /// Add a finished constructor
    pub fn add_constructor(&mut self, ctor: MethodEmitter) -> MethodId {
        let id = ctor.id();
        self.constructors.push(ctor);
        id
    }

    /// Number of constructors added so far
    pub fn constructor_count(&self) -> usize {
        self.constructors.len()
    }

    /// Append a statement to the static initializer
    pub fn add_type_initializer_statement(&mut self, statement: Statement) {
        self.type_initializer.push(statement);
    }

    /// Dispatch `slot` (a base virtual or interface method) to `implementation`
    pub fn add_override(&mut self, slot: MethodId, implementation: MethodId) {
        self.overrides.push((slot, implementation));
    }

    /// Add a property
    pub fn add_property(&mut self, property: PropertyEmitter) {
        self.properties.push(property);
    }

    /// Add an event
    pub fn add_event(&mut self, event: EventEmitter) {
        self.events.push(event);
    }

    /// Compile every member and register the type.
    ///
    /// On failure the reserved id is released, so a failed generation never
    /// leaves a half-built type behind.
    pub fn build(self, types: &mut TypeTable) -> ProxyResult<Arc<TypeDef>> {
        let id = self.id;
        let result = self.build_inner(types);
        if result.is_err() {
            types.release(id);
        }
        result
    }

    /// Give up on the type and release its reserved id
    pub fn abandon(self, types: &mut TypeTable) {
        types.release(self.id);
    }

    fn build_inner(self, types: &mut TypeTable) -> ProxyResult<Arc<TypeDef>> {
        let mut def = TypeDef::new(self.id, self.name.clone(), TypeKind::Class);
        def.is_generated = true;
        def.is_sealed = self.is_sealed;
        def.is_serializable = self.is_serializable;
        def.parent = Some(self.parent);
        def.interfaces = self.interfaces;
        def.generic_params = self.generic_params;
        def.fields = self.fields;
        def.instance_field_count = self.next_instance_slot;
        def.overrides = self.overrides;
        def.attributes = self.attributes;
        def.properties = self.properties.into_iter().map(PropertyEmitter::build).collect();
        def.events = self.events.into_iter().map(EventEmitter::build).collect();

        let mut compiled = Vec::with_capacity(self.methods.len() + self.constructors.len() + 1);
        for method in self.methods {
            let method = method.build(types)?;
            def.methods.push(method.id);
            compiled.push(method);
        }
        for ctor in self.constructors {
            let ctor = ctor.build(types)?;
            def.constructors.push(ctor.id);
            compiled.push(ctor);
        }
        if !self.type_initializer.is_empty() {
            let mut cctor = MethodEmitter::new(
                self.id,
                ".cctor",
                MethodKind::TypeInitializer,
                Vec::new(),
                TypeRef::Void,
            );
            for statement in self.type_initializer {
                cctor.add_statement(statement);
            }
            let cctor = cctor.build(types)?;
            def.type_initializer = Some(cctor.id);
            compiled.push(cctor);
        }
        def.statics = Mutex::new(vec![Value::Null; self.next_static_slot]);

        debug!(
            "Emitted {} ({} methods, {} constructors, {} fields)",
            def.name,
            def.methods.len(),
            def.constructors.len(),
            def.fields.len()
        );
        types.register(def, compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::ast::{Expression, Reference};
    use crate::types::TypeBuilder;

    fn table() -> TypeTable {
        let mut types = TypeTable::new();
        TypeBuilder::class("System.Object").root().build(&mut types).unwrap();
        types
    }

    #[test]
    fn test_fields_follow_parent_layout() {
        let mut types = table();
        let base = TypeBuilder::class("Demo.Base")
            .field("a", TypeRef::i32())
            .build(&mut types)
            .unwrap();
        let mut class =
            ClassEmitter::new(&mut types, "Demo.Derived", TypeRef::named(base.id), Vec::new())
                .unwrap();
        let field = class.create_field("b", TypeRef::i32());
        assert_eq!(field.slot, 1);
        let def = class.build(&mut types).unwrap();
        assert_eq!(def.instance_field_count, 2);
        assert!(def.is_generated);
    }

    #[test]
    fn test_duplicate_names_are_made_unique() {
        let mut types = table();
        let first = ClassEmitter::new(&mut types, "Demo.Proxy", TypeRef::object(), Vec::new())
            .unwrap()
            .build(&mut types)
            .unwrap();
        let second = ClassEmitter::new(&mut types, "Demo.Proxy", TypeRef::object(), Vec::new())
            .unwrap()
            .build(&mut types)
            .unwrap();
        assert_eq!(first.name, "Demo.Proxy");
        assert_eq!(second.name, "Demo.Proxy_1");
    }

    #[test]
    fn test_type_initializer_is_registered() {
        let mut types = table();
        let mut class =
            ClassEmitter::new(&mut types, "Demo.Holder", TypeRef::object(), Vec::new()).unwrap();
        let token = class.create_static_field("token", TypeRef::i32());
        class.add_type_initializer_statement(Statement::assign(
            Reference::field(token),
            Expression::Literal(Value::I32(4)),
        ));
        let def = class.build(&mut types).unwrap();
        assert!(def.type_initializer.is_some());
        assert_eq!(def.fields[0].name, "token");
    }

    #[test]
    fn test_failed_build_releases_name() {
        let mut types = table();
        let iface = TypeBuilder::interface("Demo.IRun")
            .method(crate::types::MethodBuilder::new("Run"))
            .build(&mut types)
            .unwrap();
        // Missing implementation of IRun.Run
        let class = ClassEmitter::new(
            &mut types,
            "Demo.Runner",
            TypeRef::object(),
            vec![TypeRef::named(iface.id)],
        )
        .unwrap();
        assert!(class.build(&mut types).is_err());
        assert_eq!(types.unique_name("Demo.Runner"), "Demo.Runner");
    }
}
