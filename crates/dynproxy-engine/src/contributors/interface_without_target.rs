//! Interfaces with no implementation behind them
//!
//! Used for the primary interface of target-less proxies and for additional
//! interfaces no target or mixin implements. Interceptors must produce
//! every result; members the hook declines return defaults.

use crate::contributors::{
    collect_interface_members, generate_members, CollectContext, MemberSet, TypeContributor,
};
use crate::emit::ClassEmitter;
use crate::error::ProxyResult;
use crate::generators::method::{CallTarget, MethodStrategy};
use crate::generators::ProxyShape;
use crate::meta::MetaType;
use crate::scope::GenerationContext;
use crate::types::TypeRef;

pub(crate) struct InterfaceWithoutTargetContributor {
    interfaces: Vec<TypeRef>,
    members: MemberSet,
}

impl InterfaceWithoutTargetContributor {
    pub fn new(interfaces: Vec<TypeRef>) -> Self {
        Self {
            interfaces,
            members: MemberSet::default(),
        }
    }
}

impl TypeContributor for InterfaceWithoutTargetContributor {
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
        generate_members(ctx, class, meta, &self.members, shape, |method| {
            Ok(if method.intercepted {
                MethodStrategy::Intercept(CallTarget::Nothing)
            } else {
                MethodStrategy::Minimal
            })
        })
    }
}
