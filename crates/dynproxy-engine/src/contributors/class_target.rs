//! Members of the proxied class

use crate::contributors::{
    collect_class_members, generate_members, CollectContext, MemberSet, TypeContributor,
};
use crate::emit::ClassEmitter;
use crate::error::ProxyResult;
use crate::generators::method::{CallTarget, MethodStrategy};
use crate::generators::ProxyShape;
use crate::meta::MetaType;
use crate::scope::GenerationContext;
use crate::types::TypeRef;

/// Overrides the virtual members of the proxied class.
///
/// Intercepted calls proceed to the base implementation, or to the target
/// instance when the proxy has one. A proxy with a target also forwards the
/// members its hook declines.
pub(crate) struct ClassTargetContributor {
    class: TypeRef,
    with_target: bool,
    members: MemberSet,
}

impl ClassTargetContributor {
    pub fn new(class: TypeRef, with_target: bool) -> Self {
        Self {
            class,
            with_target,
            members: MemberSet::default(),
        }
    }
}

impl TypeContributor for ClassTargetContributor {
    fn collect_elements_to_proxy(
        &mut self,
        ctx: &CollectContext<'_>,
        meta: &mut MetaType,
    ) -> ProxyResult<()> {
        self.members = collect_class_members(ctx, &self.class, self.with_target, meta)?;
        Ok(())
    }

    fn generate(
        &mut self,
        ctx: &mut GenerationContext<'_>,
        class: &mut ClassEmitter,
        meta: &MetaType,
        shape: &ProxyShape,
    ) -> ProxyResult<()> {
        let target = shape.target.clone();
        generate_members(ctx, class, meta, &self.members, shape, |method| {
            Ok(match (&target, method.intercepted) {
                (None, true) => MethodStrategy::Intercept(CallTarget::BaseClass),
                (None, false) => MethodStrategy::Minimal,
                (Some(field), true) => MethodStrategy::Intercept(CallTarget::Field {
                    field: field.clone(),
                    can_change_target: false,
                }),
                (Some(field), false) => MethodStrategy::Forward(field.clone()),
            })
        })
    }
}
