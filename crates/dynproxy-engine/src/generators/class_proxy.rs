//! Class proxies: subclasses of the proxied class
//!
//! Without a target, proceeding runs the base implementation through a
//! callback. With a target, calls proceed to a separate instance of the
//! class held in `__target`, and the proxy's own inherited state is unused.

use crate::cache::ProxyKind;
use crate::contributors::{
    reject_accessor_on_target, AccessorTarget, ClassTargetContributor, Implementer,
    ImplementerMap, InterfaceWithoutTargetContributor, MixinContributor,
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
    let class = request.target;
    let def = types
        .def_of(class)
        .ok_or_else(|| ProxyError::UnknownType(types.type_name(class)))?;
    reject_accessor_on_target(types, class)?;
    let mixins = request.options.mixin_data()?;

    let mut map = ImplementerMap::default();
    for iface in types.all_interfaces(class) {
        map.add(iface, Implementer::Target);
    }
    map.add_mixins(types, mixins)?;
    map.add_additional_interfaces(types, request.interfaces, mixins)?;
    map.add_infrastructure();

    let with_target = request.kind == ProxyKind::ClassWithTarget;
    let accessor = if with_target {
        AccessorTarget::TargetField
    } else {
        AccessorTarget::Proxy
    };
    let contributors: Vec<Box<dyn TypeContributor>> = vec![
        Box::new(ClassTargetContributor::new(class.clone(), with_target)),
        Box::new(InterfaceWithoutTargetContributor::new(
            map.interfaces_of(Implementer::AdditionalInterface),
        )),
        Box::new(MixinContributor::new(map.interfaces_of(Implementer::Mixin))),
        Box::new(TargetAccessorContributor::new(accessor)),
    ];

    // Interfaces of the class come with the parent
    let interfaces = map
        .interfaces()
        .into_iter()
        .filter(|iface| !types.implements(class, iface))
        .collect();

    Ok(ProxyPlan {
        name: format!("{}.{}Proxy", ctx.config.proxy_namespace, def.simple_name()),
        parent: class.clone(),
        interfaces,
        target_field: with_target.then(|| class.clone()),
        mixins: mixins.interfaces().to_vec(),
        contributors,
        parameterless_only: false,
        serializable: def.is_serializable && ctx.config.serializable_proxies,
        attribute_source: Some(def),
    })
}
