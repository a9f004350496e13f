//! The proxy target accessor every proxy implements

use crate::contributors::{CollectContext, TypeContributor};
use crate::emit::ast::{Expression, Reference, Statement};
use crate::emit::ClassEmitter;
use crate::error::{ProxyError, ProxyResult};
use crate::generators::ProxyShape;
use crate::meta::MetaType;
use crate::scope::GenerationContext;
use crate::types::TypeRef;

/// What `DynProxyGetTarget` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessorTarget {
    /// The proxy itself (class proxies without target)
    Proxy,
    /// The `__target` field
    TargetField,
    /// Null
    Nothing,
}

pub(crate) struct TargetAccessorContributor {
    target: AccessorTarget,
}

impl TargetAccessorContributor {
    pub fn new(target: AccessorTarget) -> Self {
        Self { target }
    }
}

impl TypeContributor for TargetAccessorContributor {
    fn collect_elements_to_proxy(
        &mut self,
        _ctx: &CollectContext<'_>,
        _meta: &mut MetaType,
    ) -> ProxyResult<()> {
        Ok(())
    }

    fn generate(
        &mut self,
        ctx: &mut GenerationContext<'_>,
        class: &mut ClassEmitter,
        _meta: &MetaType,
        shape: &ProxyShape,
    ) -> ProxyResult<()> {
        let infra = ctx.infrastructure;
        let target = match self.target {
            AccessorTarget::Proxy => Expression::Load(Reference::This),
            AccessorTarget::TargetField => {
                let field = shape
                    .target
                    .clone()
                    .ok_or(ProxyError::NullArgument("target"))?;
                Expression::Load(Reference::field(field))
            }
            AccessorTarget::Nothing => Expression::Null,
        };

        let mut get_target = class
            .create_method(infra.get_target.name.as_ref(), Vec::new(), TypeRef::object())
            .as_virtual();
        get_target.add_statement(Statement::Return(Some(target)));
        let id = class.add_method(get_target);
        class.add_override(infra.get_target.id, id);

        let mut get_interceptors = class
            .create_method(
                infra.get_interceptors.name.as_ref(),
                Vec::new(),
                TypeRef::interceptor_array(),
            )
            .as_virtual();
        get_interceptors.add_statement(Statement::Return(Some(Expression::Load(
            Reference::field(shape.interceptors.clone()),
        ))));
        let id = class.add_method(get_interceptors);
        class.add_override(infra.get_interceptors.id, id);
        Ok(())
    }
}
