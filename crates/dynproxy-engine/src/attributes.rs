//! Attribute replication
//!
//! Attributes whose usage is not inherited would be lost on a proxy type,
//! so the generators copy them over. [`AttributeDisassembler`] goes the
//! other way: from a live attribute instance back to constructor arguments
//! and named assignments, for attributes that exist only as objects.

use std::sync::Arc;

use tracing::debug;

use crate::types::{
    CustomAttributeData, MethodDef, PropertyDef, TypeDef, TypeRef, TypeTable, Visibility,
};
use crate::value::{Array, Value};
use crate::vm::Vm;
use crate::error::VmResult;

/// Whether applications of `attribute` flow to derived types on their own
pub fn is_inheritable(types: &TypeTable, attribute: &CustomAttributeData) -> bool {
    types
        .get(attribute.attribute_type)
        .and_then(|def| def.attribute_usage)
        .map(|usage| usage.inherited)
        .unwrap_or(true)
}

/// The attributes of `attributes` a derived member would not inherit
pub(crate) fn non_inheritable(
    types: &TypeTable,
    attributes: &[CustomAttributeData],
) -> Vec<CustomAttributeData> {
    attributes
        .iter()
        .filter(|attribute| !is_inheritable(types, attribute))
        .cloned()
        .collect()
}

/// Recreate an attribute instance from its data
pub fn instantiate(vm: &Vm, data: &CustomAttributeData) -> VmResult<Value> {
    let ty = TypeRef::named(data.attribute_type);
    let instance = vm.allocate(&ty)?;
    vm.call_constructor(data.constructor, &instance, data.constructor_args.clone())?;
    for (name, value) in &data.named_properties {
        vm.set_property(&instance, name, value.clone())?;
    }
    if !data.named_fields.is_empty() {
        let def = vm.type_def(data.attribute_type)?;
        let object = instance.expect_object("attribute")?;
        for (name, value) in &data.named_fields {
            let slot = public_fields(vm, &def)
                .into_iter()
                .find(|(field, _)| field == name)
                .map(|(_, slot)| slot)
                .ok_or_else(|| crate::error::VmError::MissingMember(format!("field {}", name)))?;
            object.set_field(slot, value.clone());
        }
    }
    Ok(instance)
}

/// Best-effort reconstruction of [`CustomAttributeData`] from an attribute
/// instance.
///
/// The first constructor of the attribute type is fed from the instance's
/// properties (by name, then by type, then a default). The result is
/// re-instantiated; properties and public fields that differ from that
/// fresh instance become named assignments. Attributes that cannot be
/// rebuilt are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeDisassembler;

impl AttributeDisassembler {
    /// Disassemble `attribute`, or `None` when it cannot be rebuilt
    pub fn disassemble(&self, vm: &Vm, attribute: &Value) -> Option<CustomAttributeData> {
        let object = attribute.as_object()?;
        let ty = object.type_ref();
        let (def, constructor, properties) = {
            let types = vm.types().read();
            let def = types.def_of(&ty)?;
            let constructor = types.constructors_of(def.id).into_iter().next()?;
            let properties = readable_properties(&types, &ty);
            (def, constructor, properties)
        };

        let arguments: Vec<Value> = constructor
            .parameters
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let trailing = i + 1 == constructor.parameters.len();
                argument_for(vm, attribute, &properties, &param.name, &param.ty, trailing && param.is_params)
            })
            .collect();

        let fresh = match instantiate_with(vm, &ty, &constructor, arguments.clone()) {
            Ok(fresh) => fresh,
            Err(err) => {
                debug!("Dropping attribute {}: {}", def.name, err);
                return None;
            }
        };

        let mut data = CustomAttributeData::new(def.id, constructor.id, arguments);
        for property in properties.iter().filter(|p| p.setter.is_some()) {
            let (Ok(current), Ok(default)) = (
                vm.get_property(attribute, &property.name),
                vm.get_property(&fresh, &property.name),
            ) else {
                debug!("Skipping unreadable property {}.{}", def.name, property.name);
                continue;
            };
            if !current.value_eq(&default) {
                data.named_properties.push((property.name.clone(), current));
            }
        }
        let fresh_object = fresh.as_object()?;
        for (name, slot) in public_fields(vm, &def) {
            let current = object.field(slot);
            if !current.value_eq(&fresh_object.field(slot)) {
                data.named_fields.push((name, current));
            }
        }
        Some(data)
    }
}

fn instantiate_with(
    vm: &Vm,
    ty: &TypeRef,
    constructor: &MethodDef,
    arguments: Vec<Value>,
) -> VmResult<Value> {
    let instance = vm.allocate(ty)?;
    vm.call_constructor(constructor.id, &instance, arguments)?;
    Ok(instance)
}

/// Public properties with a public getter, most derived first
fn readable_properties(types: &TypeTable, ty: &TypeRef) -> Vec<PropertyDef> {
    let public = |id| {
        types
            .method(id)
            .map(|m| m.visibility == Visibility::Public)
            .unwrap_or(false)
    };
    let mut properties: Vec<PropertyDef> = Vec::new();
    let mut level = Some(ty.clone());
    while let Some(current) = level {
        let Some(def) = types.def_of(&current) else {
            break;
        };
        for property in &def.properties {
            if properties.iter().any(|p| p.name == property.name) {
                continue;
            }
            if property.getter.map(public).unwrap_or(false) {
                let mut property = property.clone();
                property.ty = property.ty.substitute(current.type_args(), &[]);
                property.setter = property.setter.filter(|id| public(*id));
                properties.push(property);
            }
        }
        level = types.parent_of(&current);
    }
    properties
}

/// Public instance fields of `def` and its ancestors, by name and slot
fn public_fields(vm: &Vm, def: &Arc<TypeDef>) -> Vec<(String, usize)> {
    let types = vm.types().read();
    let mut fields = Vec::new();
    let mut level = Some(TypeRef::named(def.id));
    while let Some(current) = level {
        let Some(level_def) = types.def_of(&current) else {
            break;
        };
        fields.extend(
            level_def
                .fields
                .iter()
                .filter(|f| !f.is_static && f.visibility == Visibility::Public)
                .map(|f| (f.name.clone(), f.slot)),
        );
        level = types.parent_of(&current);
    }
    fields
}

fn argument_for(
    vm: &Vm,
    attribute: &Value,
    properties: &[PropertyDef],
    name: &str,
    ty: &TypeRef,
    is_params: bool,
) -> Value {
    let wants_string = *ty == TypeRef::string();
    let read = |property: &PropertyDef| vm.get_property(attribute, &property.name).ok();

    if let Some(property) = properties
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
    {
        if let Some(value) = read(property) {
            return if wants_string { to_text(value) } else { value };
        }
    }

    // An exact type match wins; a string parameter otherwise takes the last
    // readable property and converts it
    let best = properties
        .iter()
        .find(|p| p.ty == *ty)
        .or_else(|| wants_string.then(|| properties.last()).flatten());
    if let Some(value) = best.and_then(read) {
        return if wants_string { to_text(value) } else { value };
    }

    if is_params {
        let element = ty.element_type().cloned().unwrap_or_else(TypeRef::object);
        return Value::Array(Array::new(element, Vec::new()));
    }
    match ty {
        TypeRef::Primitive(_) => Value::default_of(ty),
        TypeRef::Named(..) => vm.types().read().default_value(ty),
        _ => Value::Null,
    }
}

fn to_text(value: Value) -> Value {
    let text = match &value {
        Value::Null => return Value::Null,
        Value::Str(_) => return value,
        Value::Bool(v) => v.to_string(),
        Value::Char(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::Enum(_, v) => v.to_string(),
        Value::Type(ty) => ty.to_string(),
        other => format!("{:?}", other),
    };
    Value::Str(text.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ModuleScope;
    use crate::types::{AttributeUsage, MethodBuilder, TypeBuilder};

    fn define_tag(scope: &ModuleScope) -> Arc<TypeDef> {
        scope
            .define(
                TypeBuilder::attribute("Demo.TagAttribute")
                    .usage(AttributeUsage {
                        inherited: false,
                        allow_multiple: false,
                    })
                    .auto_property("Name", TypeRef::string())
                    .auto_property("Weight", TypeRef::i32())
                    .field("Note", TypeRef::string())
                    .constructor(
                        MethodBuilder::constructor()
                            .param("name", TypeRef::string())
                            .native(|vm, call| {
                                vm.set_property(&call.this, "Name", call.arg(0))?;
                                Ok(Value::Null)
                            }),
                    ),
            )
            .unwrap()
    }

    fn tag(scope: &ModuleScope, name: &str) -> Value {
        let def = define_or_get(scope);
        scope
            .vm()
            .construct(&TypeRef::named(def.id), vec![Value::Str(name.into())])
            .unwrap()
    }

    fn define_or_get(scope: &ModuleScope) -> Arc<TypeDef> {
        scope
            .type_by_name("Demo.TagAttribute")
            .unwrap_or_else(|| define_tag(scope))
    }

    #[test]
    fn test_defaults_replicate_nothing_extra() {
        let scope = ModuleScope::new().unwrap();
        let instance = tag(&scope, "audit");
        let data = AttributeDisassembler
            .disassemble(scope.vm(), &instance)
            .unwrap();
        assert_eq!(data.constructor_args.len(), 1);
        assert!(data.constructor_args[0].value_eq(&Value::Str("audit".into())));
        assert!(data.named_properties.is_empty());
        assert!(data.named_fields.is_empty());
    }

    #[test]
    fn test_one_changed_property_is_replicated() {
        let scope = ModuleScope::new().unwrap();
        let instance = tag(&scope, "audit");
        scope
            .vm()
            .set_property(&instance, "Weight", Value::I32(3))
            .unwrap();
        let data = AttributeDisassembler
            .disassemble(scope.vm(), &instance)
            .unwrap();
        assert_eq!(data.named_properties.len(), 1);
        assert_eq!(data.named_properties[0].0, "Weight");
        assert!(data.named_properties[0].1.value_eq(&Value::I32(3)));
        assert!(data.named_fields.is_empty());
    }

    #[test]
    fn test_changed_public_field_is_replicated() {
        let scope = ModuleScope::new().unwrap();
        let instance = tag(&scope, "audit");
        let def = define_or_get(&scope);
        let slot = def.field("Note").unwrap().slot;
        instance
            .as_object()
            .unwrap()
            .set_field(slot, Value::Str("kept".into()));
        let data = AttributeDisassembler
            .disassemble(scope.vm(), &instance)
            .unwrap();
        assert_eq!(data.named_fields.len(), 1);
        assert_eq!(data.named_fields[0].0, "Note");
    }

    #[test]
    fn test_instantiate_round_trips_named_values() {
        let scope = ModuleScope::new().unwrap();
        let instance = tag(&scope, "audit");
        scope
            .vm()
            .set_property(&instance, "Weight", Value::I32(7))
            .unwrap();
        let data = AttributeDisassembler
            .disassemble(scope.vm(), &instance)
            .unwrap();
        let rebuilt = instantiate(scope.vm(), &data).unwrap();
        let weight = scope.vm().get_property(&rebuilt, "Weight").unwrap();
        assert!(weight.value_eq(&Value::I32(7)));
    }

    #[test]
    fn test_failing_constructor_drops_attribute() {
        let scope = ModuleScope::new().unwrap();
        let def = scope
            .define(
                TypeBuilder::attribute("Demo.FragileAttribute").constructor(
                    MethodBuilder::constructor()
                        .param("flag", TypeRef::bool())
                        .native(|_vm, call| match call.arg(0) {
                            Value::Bool(true) => Ok(Value::Null),
                            _ => Err(crate::error::VmError::User("needs a flag".to_string())),
                        }),
                ),
            )
            .unwrap();
        let instance = scope.vm().allocate(&TypeRef::named(def.id)).unwrap();
        assert!(AttributeDisassembler
            .disassemble(scope.vm(), &instance)
            .is_none());
    }

    #[test]
    fn test_string_parameter_falls_back_to_last_property() {
        let scope = ModuleScope::new().unwrap();
        let def = scope
            .define(
                TypeBuilder::attribute("Demo.LabelAttribute")
                    .auto_property("Count", TypeRef::i32())
                    .auto_property("Rank", TypeRef::i32())
                    .constructor(
                        MethodBuilder::constructor()
                            .param("label", TypeRef::string())
                            .native(|_vm, _call| Ok(Value::Null)),
                    ),
            )
            .unwrap();
        let instance = scope
            .vm()
            .construct(&TypeRef::named(def.id), vec![Value::Str("ignored".into())])
            .unwrap();
        scope.vm().set_property(&instance, "Count", Value::I32(1)).unwrap();
        scope.vm().set_property(&instance, "Rank", Value::I32(2)).unwrap();
        let data = AttributeDisassembler
            .disassemble(scope.vm(), &instance)
            .unwrap();
        assert!(data.constructor_args[0].value_eq(&Value::Str("2".into())));
    }

    #[test]
    fn test_non_inherited_usage_is_detected() {
        let scope = ModuleScope::new().unwrap();
        let def = define_tag(&scope);
        let types = scope.types().read();
        let ctor = types.constructors_of(def.id)[0].id;
        let data = CustomAttributeData::new(def.id, ctor, vec![Value::Str("x".into())]);
        assert!(!is_inheritable(&types, &data));
        assert_eq!(non_inheritable(&types, &[data]).len(), 1);
    }
}
