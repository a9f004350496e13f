//! Helpers for code that receives values which may be proxies

use std::sync::Arc;

use crate::error::VmResult;
use crate::scope::ModuleScope;
use crate::types::{TypeId, TypeRef, TypeTable, Visibility};
use crate::value::Value;

/// Whether `value` is an instance of a generated proxy type
pub fn is_proxy(types: &TypeTable, value: &Value) -> bool {
    match value.runtime_type() {
        Some(ty) => types.implements(&ty, &TypeRef::named(TypeId::PROXY_TARGET_ACCESSOR)),
        None => false,
    }
}

/// The object a proxy forwards to, or `value` itself when it is not a proxy.
///
/// Class proxies without target return themselves; target-less interface
/// proxies return null.
pub fn get_unproxied_instance(scope: &ModuleScope, value: &Value) -> VmResult<Value> {
    let proxy = is_proxy(&scope.types().read(), value);
    if !proxy {
        return Ok(value.clone());
    }
    scope.vm().call_virtual(
        scope.infrastructure().get_target.id,
        value,
        Vec::new(),
        Vec::new(),
    )
}

/// Type of the object behind `value`.
///
/// For a class proxy without target this is the proxied class; for a
/// target-less interface proxy it is the proxy type itself.
pub fn get_unproxied_type(scope: &ModuleScope, value: &Value) -> VmResult<Option<TypeRef>> {
    let Some(own_type) = value.runtime_type() else {
        return Ok(None);
    };
    if !is_proxy(&scope.types().read(), value) {
        return Ok(Some(own_type));
    }
    let target = get_unproxied_instance(scope, value)?;
    match (&target, value) {
        (Value::Null, _) => Ok(Some(own_type)),
        (Value::Object(a), Value::Object(b)) if Arc::ptr_eq(a, b) => {
            Ok(scope.types().read().parent_of(&own_type))
        }
        _ => Ok(target.runtime_type()),
    }
}

/// Whether generated code can see `ty`, including every type argument
pub fn is_accessible(types: &TypeTable, ty: &TypeRef, internals_visible: bool) -> bool {
    match ty {
        TypeRef::Void | TypeRef::Primitive(_) | TypeRef::GenericParam(..) => true,
        TypeRef::Array(element) | TypeRef::ByRef(element) => {
            is_accessible(types, element, internals_visible)
        }
        TypeRef::Named(id, args) => {
            let Some(def) = types.get(*id) else {
                return false;
            };
            let visible = match def.visibility {
                Visibility::Public => true,
                Visibility::Internal | Visibility::ProtectedInternal => internals_visible,
                Visibility::Protected | Visibility::Private => false,
            };
            visible
                && args
                    .iter()
                    .all(|arg| is_accessible(types, arg, internals_visible))
        }
    }
}

/// Whether `ty` still has generic parameters to fill in
pub fn is_open_generic(types: &TypeTable, ty: &TypeRef) -> bool {
    if ty.contains_generic_params() {
        return true;
    }
    match ty {
        TypeRef::Named(id, args) => match types.get(*id) {
            Some(def) => {
                def.generic_params.len() != args.len()
                    || args.iter().any(|arg| is_open_generic(types, arg))
            }
            None => false,
        },
        TypeRef::Array(element) | TypeRef::ByRef(element) => is_open_generic(types, element),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeBuilder;

    #[test]
    fn test_internal_type_needs_internals_visible() {
        let scope = ModuleScope::new().unwrap();
        let def = scope
            .define(TypeBuilder::class("Demo.Hidden").visibility(Visibility::Internal))
            .unwrap();
        let types = scope.types().read();
        let ty = TypeRef::named(def.id);
        assert!(!is_accessible(&types, &ty, false));
        assert!(is_accessible(&types, &ty, true));
    }

    #[test]
    fn test_inaccessible_type_argument_hides_type() {
        let scope = ModuleScope::new().unwrap();
        let hidden = scope
            .define(TypeBuilder::class("Demo.Secret").visibility(Visibility::Private))
            .unwrap();
        let list = scope
            .define(TypeBuilder::interface("Demo.IList").generic_param("T"))
            .unwrap();
        let types = scope.types().read();
        let closed = TypeRef::Named(list.id, vec![TypeRef::named(hidden.id)]);
        assert!(!is_accessible(&types, &closed, true));
        assert!(is_accessible(
            &types,
            &TypeRef::Named(list.id, vec![TypeRef::string()]),
            false
        ));
    }

    #[test]
    fn test_generic_definition_without_arguments_is_open() {
        let scope = ModuleScope::new().unwrap();
        let list = scope
            .define(TypeBuilder::interface("Demo.IBag").generic_param("T"))
            .unwrap();
        let types = scope.types().read();
        assert!(is_open_generic(&types, &TypeRef::named(list.id)));
        assert!(is_open_generic(
            &types,
            &TypeRef::Named(list.id, vec![TypeRef::type_param(0)])
        ));
        assert!(!is_open_generic(
            &types,
            &TypeRef::Named(list.id, vec![TypeRef::i32()])
        ));
    }

    #[test]
    fn test_plain_object_is_not_a_proxy() {
        let scope = ModuleScope::new().unwrap();
        let def = scope.define(TypeBuilder::class("Demo.Plain")).unwrap();
        let value = scope
            .vm()
            .construct(&TypeRef::named(def.id), Vec::new())
            .unwrap();
        assert!(!is_proxy(&scope.types().read(), &value));
        let unproxied = get_unproxied_instance(&scope, &value).unwrap();
        assert!(unproxied.value_eq(&value));
        assert_eq!(
            get_unproxied_type(&scope, &value).unwrap(),
            Some(TypeRef::named(def.id))
        );
    }
}
