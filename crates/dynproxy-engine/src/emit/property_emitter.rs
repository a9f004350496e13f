//! Property and event emitters

use crate::types::{CustomAttributeData, EventDef, MethodId, PropertyDef, TypeRef};

/// A property under construction; accessors are emitted as ordinary methods
#[derive(Debug, Clone)]
pub struct PropertyEmitter {
    name: String,
    ty: TypeRef,
    getter: Option<MethodId>,
    setter: Option<MethodId>,
    attributes: Vec<CustomAttributeData>,
}

impl PropertyEmitter {
    /// Property without accessors
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            getter: None,
            setter: None,
            attributes: Vec::new(),
        }
    }

    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the getter
    pub fn getter(mut self, method: MethodId) -> Self {
        self.getter = Some(method);
        self
    }

    /// Set the setter
    pub fn setter(mut self, method: MethodId) -> Self {
        self.setter = Some(method);
        self
    }

    /// Attach a custom attribute
    pub fn attribute(mut self, data: CustomAttributeData) -> Self {
        self.attributes.push(data);
        self
    }

    pub(crate) fn build(self) -> PropertyDef {
        PropertyDef {
            name: self.name,
            ty: self.ty,
            getter: self.getter,
            setter: self.setter,
            attributes: self.attributes,
        }
    }
}

/// An event under construction
#[derive(Debug, Clone)]
pub struct EventEmitter {
    name: String,
    handler_type: TypeRef,
    adder: Option<MethodId>,
    remover: Option<MethodId>,
}

impl EventEmitter {
    /// Event without accessors
    pub fn new(name: impl Into<String>, handler_type: TypeRef) -> Self {
        Self {
            name: name.into(),
            handler_type,
            adder: None,
            remover: None,
        }
    }

    /// Event name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the subscription method
    pub fn adder(mut self, method: MethodId) -> Self {
        self.adder = Some(method);
        self
    }

    /// Set the unsubscription method
    pub fn remover(mut self, method: MethodId) -> Self {
        self.remover = Some(method);
        self
    }

    pub(crate) fn build(self) -> EventDef {
        EventDef {
            name: self.name,
            handler_type: self.handler_type,
            adder: self.adder,
            remover: self.remover,
        }
    }
}
