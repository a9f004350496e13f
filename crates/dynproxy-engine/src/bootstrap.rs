//! Built-in types every module scope starts with
//!
//! The bootstrap registers, in [`TypeId`] order, the root object, the
//! reflection stand-ins, the collaborator marker interfaces, the two proxy
//! interfaces and the invocation base classes generated invocation types
//! derive from.

use tracing::debug;

use crate::error::{ProxyError, ProxyResult, VmError, VmResult};
use crate::invocation::{self, slots};
use crate::types::{
    FieldRef, MethodBuilder, MethodHandle, TypeBuilder, TypeId, TypeRef, TypeTable, Visibility,
};
use crate::value::Value;

/// Handles to the built-in members generated code calls
#[derive(Debug, Clone)]
pub struct Infrastructure {
    /// `Object()`
    pub object_constructor: MethodHandle,
    /// `IProxyTargetAccessor.DynProxyGetTarget`
    pub get_target: MethodHandle,
    /// `IProxyTargetAccessor.GetInterceptors`
    pub get_interceptors: MethodHandle,
    /// `IChangeProxyTarget.ChangeInvocationTarget`
    pub change_invocation_target: MethodHandle,
    /// `IChangeProxyTarget.ChangeProxyTarget`
    pub change_proxy_target: MethodHandle,
    /// `AbstractInvocation.GetArgumentValue`
    pub get_argument_value: MethodHandle,
    /// `AbstractInvocation.SetArgumentValue`
    pub set_argument_value: MethodHandle,
    /// `AbstractInvocation.GetReturnValue`
    pub get_return_value: MethodHandle,
    /// `AbstractInvocation.SetReturnValue`
    pub set_return_value: MethodHandle,
    /// `AbstractInvocation.SetGenericMethodArguments`
    pub set_generic_method_arguments: MethodHandle,
    /// `AbstractInvocation.Proceed`
    pub proceed: MethodHandle,
    /// `AbstractInvocation.ThrowOnNoTarget`
    pub throw_on_no_target: MethodHandle,
    /// `AbstractInvocation.InvokeMethodOnTarget` (abstract slot)
    pub invoke_method_on_target: MethodHandle,
    /// `CompositionInvocation.EnsureValidTarget`
    pub ensure_valid_target: MethodHandle,
    /// `CompositionInvocation(target, proxy, interceptors, method, arguments)`
    pub composition_constructor: MethodHandle,
    /// Composition constructor taking a selector and an interceptor cache
    pub composition_constructor_with_selector: MethodHandle,
    /// `InheritanceInvocation(targetType, proxy, interceptors, method, arguments)`
    pub inheritance_constructor: MethodHandle,
    /// Inheritance constructor taking a selector and an interceptor cache
    pub inheritance_constructor_with_selector: MethodHandle,
    /// `AbstractInvocation.proxy`
    pub invocation_proxy: FieldRef,
    /// `CompositionInvocation.target`
    pub invocation_target: FieldRef,
}

impl Infrastructure {
    /// Invocation constructor for the given base and selector use
    pub fn invocation_constructor(&self, base: TypeId, with_selector: bool) -> &MethodHandle {
        match (base == TypeId::INHERITANCE_INVOCATION, with_selector) {
            (true, true) => &self.inheritance_constructor_with_selector,
            (true, false) => &self.inheritance_constructor,
            (false, true) => &self.composition_constructor_with_selector,
            (false, false) => &self.composition_constructor,
        }
    }
}

fn index_arg(value: &Value) -> VmResult<usize> {
    value
        .as_i32()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| VmError::InvalidArgument(format!("invalid argument index {:?}", value)))
}

/// Register the built-in types in an empty table
pub(crate) fn install(table: &mut TypeTable) -> ProxyResult<Infrastructure> {
    if !table.is_empty() {
        return Err(ProxyError::InvalidDefinition {
            type_name: "System.Object".to_string(),
            reason: "built-in types must be registered first".to_string(),
        });
    }

    let object = TypeBuilder::class("System.Object")
        .root()
        .method(
            MethodBuilder::new("ToString")
                .returns(TypeRef::string())
                .as_virtual()
                .native(|vm, call| {
                    let name = match call.this.runtime_type() {
                        Some(ty) => vm.types().read().type_name(&ty),
                        None => "null".to_string(),
                    };
                    Ok(Value::from(name))
                }),
        )
        .method(
            MethodBuilder::new("Equals")
                .param("obj", TypeRef::object())
                .returns(TypeRef::bool())
                .as_virtual()
                .native(|_, call| Ok(Value::Bool(call.this.value_eq(&call.arg(0))))),
        )
        .method(
            MethodBuilder::new("GetHashCode")
                .returns(TypeRef::i32())
                .as_virtual()
                .native(|_, call| Ok(Value::I32(call.this.hash_code() as i32))),
        )
        .build(table)?;
    expect_id(object.id, TypeId::OBJECT)?;

    let attribute = TypeBuilder::class("System.Attribute")
        .as_abstract()
        .build(table)?;
    expect_id(attribute.id, TypeId::ATTRIBUTE)?;
    let ty = TypeBuilder::class("System.Type").sealed().build(table)?;
    expect_id(ty.id, TypeId::TYPE)?;
    let method_info = TypeBuilder::class("System.Reflection.MethodInfo")
        .sealed()
        .build(table)?;
    expect_id(method_info.id, TypeId::METHOD_INFO)?;

    let interceptor = TypeBuilder::interface("DynProxy.IInterceptor").build(table)?;
    expect_id(interceptor.id, TypeId::INTERCEPTOR)?;
    let selector = TypeBuilder::interface("DynProxy.IInterceptorSelector").build(table)?;
    expect_id(selector.id, TypeId::INTERCEPTOR_SELECTOR)?;

    let accessor = TypeBuilder::interface("DynProxy.IProxyTargetAccessor")
        .method(MethodBuilder::new("DynProxyGetTarget").returns(TypeRef::object()))
        .method(MethodBuilder::new("GetInterceptors").returns(TypeRef::interceptor_array()))
        .build(table)?;
    expect_id(accessor.id, TypeId::PROXY_TARGET_ACCESSOR)?;

    let change_target = TypeBuilder::interface("DynProxy.IChangeProxyTarget")
        .method(MethodBuilder::new("ChangeInvocationTarget").param("target", TypeRef::object()))
        .method(MethodBuilder::new("ChangeProxyTarget").param("target", TypeRef::object()))
        .build(table)?;
    expect_id(change_target.id, TypeId::CHANGE_PROXY_TARGET)?;

    let abstract_invocation = TypeBuilder::class("DynProxy.AbstractInvocation")
        .as_abstract()
        .field("proxy", TypeRef::object())
        .field("interceptors", TypeRef::interceptor_array())
        .field("currentInterceptorIndex", TypeRef::i32())
        .field("method", TypeRef::named(TypeId::METHOD_INFO))
        .field("arguments", TypeRef::array_of(TypeRef::object()))
        .field("returnValue", TypeRef::object())
        .field("genericMethodArguments", TypeRef::array_of(TypeRef::named(TypeId::TYPE)))
        .method(
            MethodBuilder::new("GetArgumentValue")
                .param("index", TypeRef::i32())
                .returns(TypeRef::object())
                .native(|_, call| {
                    let record = invocation::record_of(&call.this)?;
                    invocation::argument_value(record, index_arg(&call.arg(0))?)
                }),
        )
        .method(
            MethodBuilder::new("SetArgumentValue")
                .param("index", TypeRef::i32())
                .param("value", TypeRef::object())
                .native(|_, call| {
                    let record = invocation::record_of(&call.this)?;
                    invocation::set_argument_value(record, index_arg(&call.arg(0))?, call.arg(1))?;
                    Ok(Value::Null)
                }),
        )
        .method(
            MethodBuilder::new("GetReturnValue")
                .returns(TypeRef::object())
                .native(|_, call| {
                    Ok(invocation::record_of(&call.this)?.field(slots::RETURN_VALUE))
                }),
        )
        .method(
            MethodBuilder::new("SetReturnValue")
                .param("value", TypeRef::object())
                .native(|_, call| {
                    invocation::record_of(&call.this)?.set_field(slots::RETURN_VALUE, call.arg(0));
                    Ok(Value::Null)
                }),
        )
        .method(
            MethodBuilder::new("SetGenericMethodArguments")
                .param("arguments", TypeRef::array_of(TypeRef::named(TypeId::TYPE)))
                .native(|_, call| {
                    invocation::record_of(&call.this)?
                        .set_field(slots::GENERIC_ARGUMENTS, call.arg(0));
                    Ok(Value::Null)
                }),
        )
        .method(MethodBuilder::new("Proceed").native(|vm, call| {
            invocation::proceed(vm, invocation::record_of(&call.this)?)?;
            Ok(Value::Null)
        }))
        .method(
            MethodBuilder::new("ThrowOnNoTarget")
                .visibility(Visibility::Protected)
                .native(|_, call| {
                    Err(invocation::throw_on_no_target(invocation::record_of(
                        &call.this,
                    )?))
                }),
        )
        .method(
            MethodBuilder::new("InvokeMethodOnTarget")
                .visibility(Visibility::Protected)
                .as_abstract(),
        )
        .build(table)?;
    expect_id(abstract_invocation.id, TypeId::ABSTRACT_INVOCATION)?;

    let base = TypeRef::named(TypeId::ABSTRACT_INVOCATION);
    let common = |ctor: MethodBuilder| {
        ctor.param("proxy", TypeRef::object())
            .param("interceptors", TypeRef::interceptor_array())
            .param("method", TypeRef::named(TypeId::METHOD_INFO))
            .param("arguments", TypeRef::array_of(TypeRef::object()))
    };
    let with_selector = |ctor: MethodBuilder| {
        common(ctor)
            .param("selector", TypeRef::named(TypeId::INTERCEPTOR_SELECTOR))
            .ref_param("interceptorsCache", TypeRef::interceptor_array())
    };

    let composition = TypeBuilder::class("DynProxy.CompositionInvocation")
        .extends(base.clone())
        .as_abstract()
        .field("target", TypeRef::object())
        .constructor(
            common(MethodBuilder::constructor().param("target", TypeRef::object()))
                .visibility(Visibility::Protected)
                .native(|_, call| {
                    let record = invocation::record_of(&call.this)?;
                    record.set_field(slots::TARGET, call.arg(0));
                    invocation::initialize(record, call.arg(1), call.arg(2), call.arg(3), call.arg(4))?;
                    Ok(Value::Null)
                }),
        )
        .constructor(
            with_selector(MethodBuilder::constructor().param("target", TypeRef::object()))
                .visibility(Visibility::Protected)
                .native(|_, call| {
                    let record = invocation::record_of(&call.this)?;
                    let target = call.arg(0);
                    let selected = invocation::select_interceptors(
                        target.runtime_type().as_ref(),
                        &call.arg(3),
                        &call.arg(2),
                        &call.arg(5),
                        &call.arg(6),
                    )?;
                    record.set_field(slots::TARGET, target);
                    invocation::initialize(record, call.arg(1), selected, call.arg(3), call.arg(4))?;
                    Ok(Value::Null)
                }),
        )
        .method(
            MethodBuilder::new("EnsureValidTarget")
                .visibility(Visibility::Protected)
                .native(|_, call| {
                    invocation::ensure_valid_target(invocation::record_of(&call.this)?)?;
                    Ok(Value::Null)
                }),
        )
        .build(table)?;
    expect_id(composition.id, TypeId::COMPOSITION_INVOCATION)?;

    let inheritance = TypeBuilder::class("DynProxy.InheritanceInvocation")
        .extends(base)
        .as_abstract()
        .field("targetType", TypeRef::named(TypeId::TYPE))
        .constructor(
            common(MethodBuilder::constructor().param("targetType", TypeRef::named(TypeId::TYPE)))
                .visibility(Visibility::Protected)
                .native(|_, call| {
                    let record = invocation::record_of(&call.this)?;
                    record.set_field(slots::TARGET, call.arg(0));
                    invocation::initialize(record, call.arg(1), call.arg(2), call.arg(3), call.arg(4))?;
                    Ok(Value::Null)
                }),
        )
        .constructor(
            with_selector(
                MethodBuilder::constructor().param("targetType", TypeRef::named(TypeId::TYPE)),
            )
            .visibility(Visibility::Protected)
            .native(|_, call| {
                let record = invocation::record_of(&call.this)?;
                let target_type = match call.arg(0) {
                    Value::Type(ty) => Some(ty),
                    _ => None,
                };
                let selected = invocation::select_interceptors(
                    target_type.as_ref(),
                    &call.arg(3),
                    &call.arg(2),
                    &call.arg(5),
                    &call.arg(6),
                )?;
                record.set_field(slots::TARGET, call.arg(0));
                invocation::initialize(record, call.arg(1), selected, call.arg(3), call.arg(4))?;
                Ok(Value::Null)
            }),
        )
        .build(table)?;
    expect_id(inheritance.id, TypeId::INHERITANCE_INVOCATION)?;

    debug!("Registered {} built-in types", table.len());

    Ok(Infrastructure {
        object_constructor: constructor(table, TypeId::OBJECT, 0)?,
        get_target: method(table, TypeId::PROXY_TARGET_ACCESSOR, "DynProxyGetTarget")?,
        get_interceptors: method(table, TypeId::PROXY_TARGET_ACCESSOR, "GetInterceptors")?,
        change_invocation_target: method(table, TypeId::CHANGE_PROXY_TARGET, "ChangeInvocationTarget")?,
        change_proxy_target: method(table, TypeId::CHANGE_PROXY_TARGET, "ChangeProxyTarget")?,
        get_argument_value: method(table, TypeId::ABSTRACT_INVOCATION, "GetArgumentValue")?,
        set_argument_value: method(table, TypeId::ABSTRACT_INVOCATION, "SetArgumentValue")?,
        get_return_value: method(table, TypeId::ABSTRACT_INVOCATION, "GetReturnValue")?,
        set_return_value: method(table, TypeId::ABSTRACT_INVOCATION, "SetReturnValue")?,
        set_generic_method_arguments: method(
            table,
            TypeId::ABSTRACT_INVOCATION,
            "SetGenericMethodArguments",
        )?,
        proceed: method(table, TypeId::ABSTRACT_INVOCATION, "Proceed")?,
        throw_on_no_target: method(table, TypeId::ABSTRACT_INVOCATION, "ThrowOnNoTarget")?,
        invoke_method_on_target: method(table, TypeId::ABSTRACT_INVOCATION, "InvokeMethodOnTarget")?,
        ensure_valid_target: method(table, TypeId::COMPOSITION_INVOCATION, "EnsureValidTarget")?,
        composition_constructor: constructor(table, TypeId::COMPOSITION_INVOCATION, 5)?,
        composition_constructor_with_selector: constructor(table, TypeId::COMPOSITION_INVOCATION, 7)?,
        inheritance_constructor: constructor(table, TypeId::INHERITANCE_INVOCATION, 5)?,
        inheritance_constructor_with_selector: constructor(table, TypeId::INHERITANCE_INVOCATION, 7)?,
        invocation_proxy: field(table, TypeId::ABSTRACT_INVOCATION, "proxy")?,
        invocation_target: field(table, TypeId::COMPOSITION_INVOCATION, "target")?,
    })
}

fn expect_id(actual: TypeId, expected: TypeId) -> ProxyResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ProxyError::InvalidDefinition {
            type_name: format!("#{}", actual.0),
            reason: format!("built-in type registered out of order (expected #{})", expected.0),
        })
    }
}

fn missing(owner: TypeId, member: &str) -> ProxyError {
    ProxyError::InvalidDefinition {
        type_name: format!("#{}", owner.0),
        reason: format!("built-in member {} is missing", member),
    }
}

fn method(table: &TypeTable, owner: TypeId, name: &str) -> ProxyResult<MethodHandle> {
    table
        .find_method(owner, name)
        .map(|m| m.handle())
        .ok_or_else(|| missing(owner, name))
}

fn constructor(table: &TypeTable, owner: TypeId, arity: usize) -> ProxyResult<MethodHandle> {
    table
        .constructors_of(owner)
        .into_iter()
        .find(|c| c.parameters.len() == arity)
        .map(|c| c.handle())
        .ok_or_else(|| missing(owner, &format!(".ctor/{}", arity)))
}

fn field(table: &TypeTable, owner: TypeId, name: &str) -> ProxyResult<FieldRef> {
    table
        .get(owner)
        .and_then(|def| def.field_ref(name))
        .ok_or_else(|| missing(owner, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_registered_in_order() {
        let mut table = TypeTable::new();
        let infra = install(&mut table).unwrap();
        assert_eq!(table.len(), 11);
        assert_eq!(
            table.get_by_name("DynProxy.InheritanceInvocation").unwrap().id,
            TypeId::INHERITANCE_INVOCATION
        );
        assert_eq!(infra.invocation_proxy.slot, slots::PROXY);
        assert_eq!(infra.invocation_target.slot, slots::TARGET);
        assert_eq!(infra.composition_constructor_with_selector.param_count, 7);
    }

    #[test]
    fn test_invocation_slot_layout() {
        let mut table = TypeTable::new();
        install(&mut table).unwrap();
        let def = table.get(TypeId::ABSTRACT_INVOCATION).unwrap();
        assert_eq!(def.field("genericMethodArguments").unwrap().slot, slots::GENERIC_ARGUMENTS);
        assert_eq!(def.field("returnValue").unwrap().slot, slots::RETURN_VALUE);
        let inheritance = table.get(TypeId::INHERITANCE_INVOCATION).unwrap();
        assert_eq!(inheritance.field("targetType").unwrap().slot, slots::TARGET);
        assert!(table.is_subclass_of(
            &TypeRef::named(TypeId::INHERITANCE_INVOCATION),
            &TypeRef::named(TypeId::ABSTRACT_INVOCATION)
        ));
    }

    #[test]
    fn test_install_twice_fails() {
        let mut table = TypeTable::new();
        install(&mut table).unwrap();
        assert!(install(&mut table).is_err());
    }
}
