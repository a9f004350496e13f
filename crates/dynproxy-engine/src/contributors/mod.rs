//! Type contributors
//!
//! A proxy type is assembled by several contributors, each responsible for
//! one source of members: the proxied class or interface, additional
//! interfaces, mixins and the proxy target accessor. Generation runs in two
//! passes over the same contributor list:
//!
//! 1. `collect_elements_to_proxy` records every member into the shared
//!    [`MetaType`], where name clashes are settled
//! 2. `generate` emits the members into the [`ClassEmitter`]
//!
//! Which contributor owns an interface is decided up front by the
//! [`ImplementerMap`].

mod class_target;
mod interface_target;
mod interface_without_target;
mod mixin;
mod target_accessor;

pub(crate) use class_target::ClassTargetContributor;
pub(crate) use interface_target::InterfaceTargetContributor;
pub(crate) use interface_without_target::InterfaceWithoutTargetContributor;
pub(crate) use mixin::MixinContributor;
pub(crate) use target_accessor::{AccessorTarget, TargetAccessorContributor};

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::attributes;
use crate::emit::{ClassEmitter, EventEmitter, PropertyEmitter};
use crate::error::{ConflictSource, ProxyError, ProxyResult};
use crate::generators::method::{generate_method, MethodStrategy};
use crate::generators::ProxyShape;
use crate::interceptor::ProxyGenerationHook;
use crate::meta::{MetaEvent, MetaMethod, MetaProperty, MetaType};
use crate::options::MixinData;
use crate::scope::GenerationContext;
use crate::types::signature::{same_signature_parts, MethodSignature};
use crate::types::{MethodDef, MethodId, MethodKind, TypeDef, TypeId, TypeRef, TypeTable, Visibility};

/// Who implements an interface of the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Implementer {
    /// The proxied type (or the proxy's target)
    Target,
    /// An additional interface with nothing behind it
    AdditionalInterface,
    /// A mixin instance
    Mixin,
    /// Proxy infrastructure
    Infrastructure,
}

/// Interface to implementer assignment, in insertion order
#[derive(Debug, Default)]
pub(crate) struct ImplementerMap {
    map: IndexMap<TypeRef, Implementer>,
}

impl ImplementerMap {
    /// Assign `iface` unless it already has an implementer
    pub fn add(&mut self, iface: TypeRef, implementer: Implementer) -> bool {
        if self.map.contains_key(&iface) {
            return false;
        }
        self.map.insert(iface, implementer);
        true
    }

    /// Interfaces assigned to `implementer`
    pub fn interfaces_of(&self, implementer: Implementer) -> Vec<TypeRef> {
        self.map
            .iter()
            .filter(|(_, who)| **who == implementer)
            .map(|(iface, _)| iface.clone())
            .collect()
    }

    /// Every interface the proxy will implement
    pub fn interfaces(&self) -> Vec<TypeRef> {
        self.map.keys().cloned().collect()
    }

    /// Assign mixin interfaces not already taken by the target.
    ///
    /// A mixin that carries the proxy target accessor is rejected.
    pub fn add_mixins(&mut self, types: &TypeTable, mixins: &MixinData) -> ProxyResult<()> {
        let accessor = TypeRef::named(TypeId::PROXY_TARGET_ACCESSOR);
        for (iface, mixin) in mixins.interfaces().iter().zip(mixins.mixins()) {
            if *iface == accessor {
                return Err(ProxyError::InfrastructureConflict {
                    origin: ConflictSource::Mixin,
                    type_name: mixin
                        .runtime_type()
                        .map(|ty| types.type_name(&ty))
                        .unwrap_or_default(),
                });
            }
            if !self.add(iface.clone(), Implementer::Mixin) {
                trace!(
                    "{} is implemented by the target; its mixin is not used for it",
                    types.type_name(iface)
                );
            }
        }
        Ok(())
    }

    /// Assign additional interfaces (and their bases) nobody else claims
    pub fn add_additional_interfaces(
        &mut self,
        types: &TypeTable,
        interfaces: &[TypeRef],
        mixins: &MixinData,
    ) -> ProxyResult<()> {
        for iface in expand_interfaces(types, interfaces) {
            if iface == TypeRef::named(TypeId::PROXY_TARGET_ACCESSOR) {
                return Err(ProxyError::InfrastructureConflict {
                    origin: ConflictSource::AdditionalInterface,
                    type_name: types.type_name(&iface),
                });
            }
            if !mixins.contains_mixin(&iface) {
                self.add(iface, Implementer::AdditionalInterface);
            }
        }
        Ok(())
    }

    /// Assign the accessor interface to the infrastructure
    pub fn add_infrastructure(&mut self) {
        self.add(
            TypeRef::named(TypeId::PROXY_TARGET_ACCESSOR),
            Implementer::Infrastructure,
        );
    }
}

/// `interfaces` followed by their base interfaces, without repeats
pub(crate) fn expand_interfaces(types: &TypeTable, interfaces: &[TypeRef]) -> Vec<TypeRef> {
    let mut expanded: Vec<TypeRef> = Vec::new();
    for iface in interfaces {
        for candidate in std::iter::once(iface.clone()).chain(types.all_interfaces(iface)) {
            if !expanded.contains(&candidate) {
                expanded.push(candidate);
            }
        }
    }
    expanded
}

/// Fail if `ty` already carries the proxy target accessor
pub(crate) fn reject_accessor_on_target(types: &TypeTable, ty: &TypeRef) -> ProxyResult<()> {
    let accessor = TypeRef::named(TypeId::PROXY_TARGET_ACCESSOR);
    if types.implements(ty, &accessor) {
        return Err(ProxyError::InfrastructureConflict {
            origin: ConflictSource::Target,
            type_name: types.type_name(ty),
        });
    }
    Ok(())
}

/// Inputs of the collection pass
pub(crate) struct CollectContext<'a> {
    pub types: &'a TypeTable,
    pub hook: &'a dyn ProxyGenerationHook,
    pub internals_visible: bool,
}

impl CollectContext<'_> {
    /// Whether generated code in another module may override `method`
    pub fn is_accessible(&self, method: &MethodDef) -> bool {
        method.visibility.visible_to_subclasses()
            || (self.internals_visible && method.visibility == Visibility::Internal)
    }
}

/// One source of proxy members
pub(crate) trait TypeContributor {
    /// Record the members this contributor will emit
    fn collect_elements_to_proxy(
        &mut self,
        ctx: &CollectContext<'_>,
        meta: &mut MetaType,
    ) -> ProxyResult<()>;

    /// Emit the recorded members
    fn generate(
        &mut self,
        ctx: &mut GenerationContext<'_>,
        class: &mut ClassEmitter,
        meta: &MetaType,
        shape: &ProxyShape,
    ) -> ProxyResult<()>;
}

/// Indices into a [`MetaType`] owned by one contributor
#[derive(Debug, Default, Clone)]
pub(crate) struct MemberSet {
    pub methods: Vec<usize>,
    pub properties: Vec<usize>,
    pub events: Vec<usize>,
}

impl MemberSet {
    /// Take over the members of `other`
    pub fn extend(&mut self, other: MemberSet) {
        self.methods.extend(other.methods);
        self.properties.extend(other.properties);
        self.events.extend(other.events);
    }

    fn add_properties_and_events(
        &mut self,
        types: &TypeTable,
        meta: &mut MetaType,
        def: &TypeDef,
        declaring: &TypeRef,
        collected: &FxHashMap<MethodId, usize>,
    ) -> ProxyResult<()> {
        let index = |id: Option<MethodId>| id.and_then(|id| collected.get(&id).copied());
        for property in &def.properties {
            let (getter, setter) = (index(property.getter), index(property.setter));
            if getter.is_none() && setter.is_none() {
                continue;
            }
            let mut meta_property = MetaProperty::new(
                types,
                declaring,
                &property.name,
                property.ty.substitute(declaring.type_args(), &[]),
                getter,
                setter,
            );
            meta_property.attributes = attributes::non_inheritable(types, &property.attributes);
            self.properties.push(meta.add_property(meta_property)?);
        }
        for event in &def.events {
            let (adder, remover) = (index(event.adder), index(event.remover));
            if adder.is_none() && remover.is_none() {
                continue;
            }
            self.events.push(meta.add_event(MetaEvent::new(
                types,
                declaring,
                &event.name,
                event.handler_type.substitute(declaring.type_args(), &[]),
                adder,
                remover,
            ))?);
        }
        Ok(())
    }
}

fn is_standalone(method: &MethodDef) -> bool {
    method.kind == MethodKind::Method
}

/// Collect the members declared directly on `iface`.
///
/// Every interface member ends up in the proxy; the hook only decides
/// whether it is intercepted.
pub(crate) fn collect_interface_members(
    ctx: &CollectContext<'_>,
    iface: &TypeRef,
    meta: &mut MetaType,
) -> ProxyResult<MemberSet> {
    let def = ctx
        .types
        .def_of(iface)
        .ok_or_else(|| ProxyError::UnknownType(ctx.types.type_name(iface)))?;
    let mut set = MemberSet::default();
    let mut collected = FxHashMap::default();
    for method in ctx.types.methods_of(def.id) {
        if method.is_static {
            continue;
        }
        let intercepted = ctx.hook.should_intercept_method(&def, &method);
        let standalone = is_standalone(&method);
        let id = method.id;
        let index = meta.add_method(MetaMethod::new(
            ctx.types,
            method,
            iface.clone(),
            intercepted,
            standalone,
        ))?;
        set.methods.push(index);
        collected.insert(id, index);
    }
    set.add_properties_and_events(ctx.types, meta, &def, iface, &collected)?;
    Ok(set)
}

/// Collect the overridable members of `class` and its ancestors.
///
/// Only the most derived declaration of each signature is considered.
/// Members the hook declines are left alone unless they are abstract (they
/// still need a body) or `include_declined` is set (a target receives them).
pub(crate) fn collect_class_members(
    ctx: &CollectContext<'_>,
    class: &TypeRef,
    include_declined: bool,
    meta: &mut MetaType,
) -> ProxyResult<MemberSet> {
    let mut set = MemberSet::default();
    let mut seen: Vec<MethodSignature> = Vec::new();
    let mut level = Some(class.clone());

    while let Some(current) = level {
        let def = ctx
            .types
            .def_of(&current)
            .ok_or_else(|| ProxyError::UnknownType(ctx.types.type_name(&current)))?;
        let mut collected = FxHashMap::default();

        for method in ctx.types.methods_of(def.id) {
            if method.is_static {
                continue;
            }
            let signature = MethodSignature::closed(&method, current.type_args());
            if seen.iter().any(|s| same_signature_parts(s, &signature)) {
                continue;
            }
            seen.push(signature);
            if !ctx.is_accessible(&method) {
                continue;
            }
            if !method.is_overridable() {
                ctx.hook.non_proxyable_member_notification(&def, &method);
                continue;
            }
            let intercepted = ctx.hook.should_intercept_method(&def, &method);
            if !intercepted && !method.is_abstract && !include_declined {
                continue;
            }
            let standalone = is_standalone(&method);
            let id = method.id;
            let index = meta.add_method(MetaMethod::new(
                ctx.types,
                method,
                current.clone(),
                intercepted,
                standalone,
            ))?;
            set.methods.push(index);
            collected.insert(id, index);
        }
        set.add_properties_and_events(ctx.types, meta, &def, &current, &collected)?;
        level = ctx.types.parent_of(&current);
    }
    Ok(set)
}

/// Emit `set`, choosing each method body with `strategy`, then declare its
/// properties and events over the emitted accessors.
pub(crate) fn generate_members<F>(
    ctx: &mut GenerationContext<'_>,
    class: &mut ClassEmitter,
    meta: &MetaType,
    set: &MemberSet,
    shape: &ProxyShape,
    strategy: F,
) -> ProxyResult<()>
where
    F: Fn(&MetaMethod) -> ProxyResult<MethodStrategy>,
{
    let mut emitted: FxHashMap<usize, MethodId> = FxHashMap::default();
    for &index in &set.methods {
        let method = &meta.methods()[index];
        let id = generate_method(ctx, class, method, &strategy(method)?, shape)?;
        emitted.insert(index, id);
    }
    let accessor = |index: Option<usize>| index.and_then(|i| emitted.get(&i).copied());

    for &index in &set.properties {
        let property = &meta.properties()[index];
        let (getter, setter) = (accessor(property.getter), accessor(property.setter));
        if getter.is_none() && setter.is_none() {
            continue;
        }
        let mut emitter = PropertyEmitter::new(property.name(), property.ty.clone());
        if let Some(id) = getter {
            emitter = emitter.getter(id);
        }
        if let Some(id) = setter {
            emitter = emitter.setter(id);
        }
        for attribute in &property.attributes {
            emitter = emitter.attribute(attribute.clone());
        }
        class.add_property(emitter);
    }

    for &index in &set.events {
        let event = &meta.events()[index];
        let (adder, remover) = (accessor(event.adder), accessor(event.remover));
        if adder.is_none() && remover.is_none() {
            continue;
        }
        let mut emitter = EventEmitter::new(event.name(), event.handler_type.clone());
        if let Some(id) = adder {
            emitter = emitter.adder(id);
        }
        if let Some(id) = remover {
            emitter = emitter.remover(id);
        }
        class.add_event(emitter);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::interceptor::AllMethodsHook;
    use crate::types::{MethodBuilder, TypeBuilder};

    fn table() -> TypeTable {
        let mut table = TypeTable::new();
        bootstrap::install(&mut table).unwrap();
        table
    }

    #[test]
    fn test_expand_interfaces_adds_bases_once() {
        let mut types = table();
        let base = TypeBuilder::interface("Demo.IBase").build(&mut types).unwrap();
        let left = TypeBuilder::interface("Demo.ILeft")
            .implements(TypeRef::named(base.id))
            .build(&mut types)
            .unwrap();
        let right = TypeBuilder::interface("Demo.IRight")
            .implements(TypeRef::named(base.id))
            .build(&mut types)
            .unwrap();
        let expanded = expand_interfaces(
            &types,
            &[TypeRef::named(left.id), TypeRef::named(right.id)],
        );
        assert_eq!(
            expanded,
            vec![
                TypeRef::named(left.id),
                TypeRef::named(base.id),
                TypeRef::named(right.id)
            ]
        );
    }

    #[test]
    fn test_first_implementer_wins() {
        let mut map = ImplementerMap::default();
        assert!(map.add(TypeRef::object(), Implementer::Target));
        assert!(!map.add(TypeRef::object(), Implementer::Mixin));
        assert_eq!(map.interfaces_of(Implementer::Target), vec![TypeRef::object()]);
        assert!(map.interfaces_of(Implementer::Mixin).is_empty());
    }

    #[test]
    fn test_additional_accessor_is_rejected() {
        let types = table();
        let mut map = ImplementerMap::default();
        let mixins = MixinData::new(&types, &[]).unwrap();
        let err = map
            .add_additional_interfaces(
                &types,
                &[TypeRef::named(TypeId::PROXY_TARGET_ACCESSOR)],
                &mixins,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::InfrastructureConflict {
                origin: ConflictSource::AdditionalInterface,
                ..
            }
        ));
    }

    #[test]
    fn test_class_members_keep_most_derived_override() {
        let mut types = table();
        let base = TypeBuilder::class("Demo.Base")
            .method(MethodBuilder::new("Run").as_virtual())
            .method(MethodBuilder::new("Stop").as_virtual())
            .build(&mut types)
            .unwrap();
        let derived = TypeBuilder::class("Demo.Derived")
            .extends(TypeRef::named(base.id))
            .method(MethodBuilder::new("Run").as_override())
            .build(&mut types)
            .unwrap();

        let ctx = CollectContext {
            types: &types,
            hook: &AllMethodsHook,
            internals_visible: false,
        };
        let mut meta = MetaType::new();
        let set = collect_class_members(&ctx, &TypeRef::named(derived.id), false, &mut meta).unwrap();
        let owners: Vec<(String, TypeRef)> = set
            .methods
            .iter()
            .map(|i| {
                let m = &meta.methods()[*i];
                (m.name().to_string(), m.declaring.clone())
            })
            .collect();
        assert_eq!(
            owners,
            vec![
                ("Run".to_string(), TypeRef::named(derived.id)),
                ("Stop".to_string(), TypeRef::named(base.id)),
            ]
        );
    }

    #[test]
    fn test_sealed_members_are_reported_not_collected() {
        use parking_lot::Mutex;
        use std::any::Any;

        #[derive(Default)]
        struct Recording(Mutex<Vec<String>>);

        impl ProxyGenerationHook for Recording {
            fn should_intercept_method(&self, _ty: &TypeDef, _method: &MethodDef) -> bool {
                true
            }
            fn non_proxyable_member_notification(&self, _ty: &TypeDef, member: &MethodDef) {
                self.0.lock().push(member.name.clone());
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let mut types = table();
        let class = TypeBuilder::class("Demo.Service")
            .method(MethodBuilder::new("Fixed"))
            .method(MethodBuilder::new("Open").as_virtual())
            .build(&mut types)
            .unwrap();
        let hook = Recording::default();
        let ctx = CollectContext {
            types: &types,
            hook: &hook,
            internals_visible: false,
        };
        let mut meta = MetaType::new();
        let set = collect_class_members(&ctx, &TypeRef::named(class.id), false, &mut meta).unwrap();
        let names: Vec<&str> = set.methods.iter().map(|i| meta.methods()[*i].name()).collect();
        assert!(names.contains(&"Open"));
        assert!(!names.contains(&"Fixed"));
        assert!(hook.0.lock().contains(&"Fixed".to_string()));
    }
}
