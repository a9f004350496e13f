//! Interfaces implemented by mixin instances

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

/// Each mixin interface is backed by its own field; calls go to the mixin
/// stored there, through the interceptors when the hook asks for it.
pub(crate) struct MixinContributor {
    interfaces: Vec<TypeRef>,
    members: MemberSet,
}

impl MixinContributor {
    pub fn new(interfaces: Vec<TypeRef>) -> Self {
        Self {
            interfaces,
            members: MemberSet::default(),
        }
    }
}

impl TypeContributor for MixinContributor {
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
        let types = &*ctx.types;
        let missing = self
            .interfaces
            .iter()
            .find(|iface| shape.mixin_field(iface).is_none())
            .map(|iface| types.type_name(iface));
        if let Some(name) = missing {
            return Err(ProxyError::UnknownType(format!("mixin field for {}", name)));
        }

        generate_members(ctx, class, meta, &self.members, shape, |method| {
            let field = shape
                .mixin_field(&method.declaring)
                .cloned()
                .ok_or_else(|| ProxyError::UnknownType(format!("mixin field for {}", method.declaring)))?;
            Ok(if method.intercepted {
                MethodStrategy::Intercept(CallTarget::Field {
                    field,
                    can_change_target: false,
                })
            } else {
                MethodStrategy::Forward(field)
            })
        })
    }
}
