//! Interfaces implemented by forwarding to the proxy's target

use crate::contributors::{
    collect_interface_members, generate_members, CollectContext, MemberSet, TypeContributor,
};
use crate::emit::ClassEmitter;
use crate::error::{ProxyError, ProxyResult};
use crate::generators::method::{CallTarget, MethodStrategy};
use crate::generators::ProxyShape;
use crate::meta::MetaType;
use crate::scope::GenerationContext;
use crate::types::TypeRef;

pub(crate) struct InterfaceTargetContributor {
    interfaces: Vec<TypeRef>,
    can_change_target: bool,
    members: MemberSet,
}

impl InterfaceTargetContributor {
    /// With `can_change_target`, interceptors may swap the target and
    /// non-intercepted members tolerate a null one.
    pub fn new(interfaces: Vec<TypeRef>, can_change_target: bool) -> Self {
        Self {
            interfaces,
            can_change_target,
            members: MemberSet::default(),
        }
    }
}

impl TypeContributor for InterfaceTargetContributor {
    fn collect_elements_to_proxy(
        &mut self,
        ctx: &CollectContext<'_>,
        meta: &mut MetaType,
    ) -> ProxyResult<()> {
        for iface in &self.interfaces {
            let members = collect_interface_members(ctx, iface, meta)?;
            self.members.extend(members);
        }
        Ok(())
    }

    fn generate(
        &mut self,
        ctx: &mut GenerationContext<'_>,
        class: &mut ClassEmitter,
        meta: &MetaType,
        shape: &ProxyShape,
    ) -> ProxyResult<()> {
        let field = shape
            .target
            .clone()
            .ok_or(ProxyError::NullArgument("target"))?;
        let can_change_target = self.can_change_target;
        generate_members(ctx, class, meta, &self.members, shape, |method| {
            Ok(if method.intercepted {
                MethodStrategy::Intercept(CallTarget::Field {
                    field: field.clone(),
                    can_change_target,
                })
            } else if can_change_target {
                MethodStrategy::OptionallyForward(field.clone())
            } else {
                MethodStrategy::Forward(field.clone())
            })
        })
    }
}
