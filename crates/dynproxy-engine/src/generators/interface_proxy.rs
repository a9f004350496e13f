//! Interface proxies: classes deriving from the configured base type that
//! implement the primary interface, its bases and any additional
//! interfaces.

use crate::cache::ProxyKind;
use crate::contributors::{
    expand_interfaces, reject_accessor_on_target, AccessorTarget, Implementer, ImplementerMap,
    InterfaceTargetContributor, InterfaceWithoutTargetContributor, MixinContributor,
    TargetAccessorContributor, TypeContributor,
};
use crate::error::{ProxyError, ProxyResult};
use crate::generators::{ProxyPlan, ProxyRequest};
use crate::scope::GenerationContext;

pub(super) fn plan(
    ctx: &GenerationContext<'_>,
    request: &ProxyRequest<'_>,
) -> ProxyResult<ProxyPlan> {
    let types = &*ctx.types;
    let primary = request.target;
    let def = types
        .def_of(primary)
        .ok_or_else(|| ProxyError::UnknownType(types.type_name(primary)))?;
    reject_accessor_on_target(types, primary)?;
    let mixins = request.options.mixin_data()?;

    let mut map = ImplementerMap::default();
    for iface in expand_interfaces(types, std::slice::from_ref(primary)) {
        map.add(iface, Implementer::Target);
    }
    // Additional interfaces the target happens to implement are forwarded to it
    if request.kind == ProxyKind::InterfaceWithTarget {
        if let Some(implementation) = request.implementation {
            for iface in expand_interfaces(types, request.interfaces) {
                if types.implements(implementation, &iface) {
                    map.add(iface, Implementer::Target);
                }
            }
        }
    }
    map.add_mixins(types, mixins)?;
    map.add_additional_interfaces(types, request.interfaces, mixins)?;
    map.add_infrastructure();

    let targets = map.interfaces_of(Implementer::Target);
    let (target_contributor, accessor): (Box<dyn TypeContributor>, _) = match request.kind {
        ProxyKind::InterfaceWithTarget => (
            Box::new(InterfaceTargetContributor::new(targets, false)),
            AccessorTarget::TargetField,
        ),
        ProxyKind::InterfaceWithTargetInterface => (
            Box::new(InterfaceTargetContributor::new(targets, true)),
            AccessorTarget::TargetField,
        ),
        _ => (
            Box::new(InterfaceWithoutTargetContributor::new(targets)),
            AccessorTarget::Nothing,
        ),
    };
    let contributors: Vec<Box<dyn TypeContributor>> = vec![
        target_contributor,
        Box::new(InterfaceWithoutTargetContributor::new(
            map.interfaces_of(Implementer::AdditionalInterface),
        )),
        Box::new(MixinContributor::new(map.interfaces_of(Implementer::Mixin))),
        Box::new(TargetAccessorContributor::new(accessor)),
    ];

    let has_target = request.kind != ProxyKind::InterfaceWithoutTarget;
    Ok(ProxyPlan {
        name: format!("{}.{}Proxy", ctx.config.proxy_namespace, def.simple_name()),
        parent: request.options.base_type_for_interface_proxy.clone(),
        interfaces: map.interfaces(),
        target_field: has_target.then(|| primary.clone()),
        mixins: mixins.interfaces().to_vec(),
        contributors,
        parameterless_only: true,
        serializable: ctx.config.serializable_proxies,
        attribute_source: None,
    })
}
