//! Proxy type generators
//!
//! A generation request is turned into a type in four steps:
//!
//! 1. decide which contributor implements each interface
//!    ([`ImplementerMap`](crate::contributors::ImplementerMap))
//! 2. let every contributor collect its members into a [`MetaType`]
//! 3. reserve the proxy type, create its fields and let every contributor
//!    emit its members
//! 4. add constructors and attributes, then register the type
//!
//! The kind-specific parts (which contributors, which base type, which
//! constructors) live in [`class_proxy`] and [`interface_proxy`].

mod class_proxy;
mod interface_proxy;
pub(crate) mod invocation_type;
pub(crate) mod method;

use std::sync::Arc;

use tracing::debug;

use crate::attributes;
use crate::cache::ProxyKind;
use crate::contributors::{CollectContext, TypeContributor};
use crate::emit::ast::{Expression, Reference, Statement};
use crate::emit::ClassEmitter;
use crate::error::{ProxyError, ProxyResult};
use crate::meta::MetaType;
use crate::options::ProxyGenerationOptions;
use crate::scope::GenerationContext;
use crate::types::{FieldRef, ParameterDef, TypeDef, TypeId, TypeRef, Visibility};
use crate::value::Value;

/// Name of the interceptor array field
pub const INTERCEPTORS_FIELD: &str = "__interceptors";
/// Name of the interceptor selector field
pub const SELECTOR_FIELD: &str = "__selector";
/// Name of the target field
pub const TARGET_FIELD: &str = "__target";
/// Prefix of mixin fields; the rest is the mixin interface's name
pub const MIXIN_FIELD_PREFIX: &str = "__mixin_";

/// Field holding the mixin that implements `iface`
pub(crate) fn mixin_field_name(type_name: &str) -> String {
    let suffix: String = type_name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}{}", MIXIN_FIELD_PREFIX, suffix)
}

/// What the caller asked for
pub(crate) struct ProxyRequest<'a> {
    pub kind: ProxyKind,
    /// Proxied class, or primary interface
    pub target: &'a TypeRef,
    /// Additional interfaces
    pub interfaces: &'a [TypeRef],
    /// Runtime type of a fixed interface target
    pub implementation: Option<&'a TypeRef>,
    pub options: &'a ProxyGenerationOptions,
}

/// The proxy type being emitted, as seen by contributors
pub(crate) struct ProxyShape {
    pub kind: ProxyKind,
    /// The proxy type itself
    pub proxy_type: TypeRef,
    /// Proxied class, or primary interface
    pub target_type: TypeRef,
    pub interceptors: FieldRef,
    pub selector: Option<FieldRef>,
    pub target: Option<FieldRef>,
    /// One field per mixin interface, in mixin order
    pub mixins: Vec<(TypeRef, FieldRef)>,
}

impl ProxyShape {
    /// Field holding the mixin that implements `iface`
    pub fn mixin_field(&self, iface: &TypeRef) -> Option<&FieldRef> {
        self.mixins
            .iter()
            .find(|(candidate, _)| candidate == iface)
            .map(|(_, field)| field)
    }

    /// Fields assigned from the leading constructor parameters, in order
    fn constructor_fields(&self) -> Vec<FieldRef> {
        let mixins = self.mixins.iter().map(|(_, field)| field.clone());
        let mut fields = Vec::new();
        if self.kind == ProxyKind::ClassWithTarget {
            fields.extend(self.target.clone());
        }
        fields.extend(mixins);
        fields.push(self.interceptors.clone());
        if !self.kind.is_class() {
            fields.extend(self.target.clone());
        }
        fields.extend(self.selector.clone());
        fields
    }
}

/// Leading constructor arguments of a proxy of `kind`, in the order its
/// constructors declare them
pub(crate) fn constructor_arguments(
    kind: ProxyKind,
    target: Option<Value>,
    mixins: &[Value],
    interceptors: Value,
    selector: Option<Value>,
) -> Vec<Value> {
    let mut args = Vec::new();
    if kind == ProxyKind::ClassWithTarget {
        args.extend(target.clone());
    }
    args.extend(mixins.iter().cloned());
    args.push(interceptors);
    if !kind.is_class() {
        args.extend(target);
    }
    args.extend(selector);
    args
}

/// Kind-specific inputs of [`assemble`]
struct ProxyPlan {
    name: String,
    parent: TypeRef,
    interfaces: Vec<TypeRef>,
    /// Type of the target field, when the proxy has one
    target_field: Option<TypeRef>,
    mixins: Vec<TypeRef>,
    contributors: Vec<Box<dyn TypeContributor>>,
    /// Only the parent's parameterless constructor is chained
    parameterless_only: bool,
    serializable: bool,
    /// Type whose non-inherited attributes the proxy repeats
    attribute_source: Option<Arc<TypeDef>>,
}

/// Generate the proxy type for `request`
pub(crate) fn generate(
    ctx: &mut GenerationContext<'_>,
    request: &ProxyRequest<'_>,
) -> ProxyResult<TypeId> {
    debug!(
        "Generating {} proxy of {}",
        request.kind,
        ctx.types.type_name(request.target)
    );
    let plan = if request.kind.is_class() {
        class_proxy::plan(ctx, request)?
    } else {
        interface_proxy::plan(ctx, request)?
    };
    assemble(ctx, request, plan)
}

fn assemble(
    ctx: &mut GenerationContext<'_>,
    request: &ProxyRequest<'_>,
    mut plan: ProxyPlan,
) -> ProxyResult<TypeId> {
    let options = request.options;
    let mut meta = MetaType::new();
    {
        let collect = CollectContext {
            types: &*ctx.types,
            hook: options.hook.as_ref(),
            internals_visible: ctx.config.internals_visible,
        };
        for contributor in plan.contributors.iter_mut() {
            contributor.collect_elements_to_proxy(&collect, &mut meta)?;
        }
    }
    options.hook.methods_inspected();

    let mut class = ClassEmitter::new(
        ctx.types,
        &plan.name,
        plan.parent.clone(),
        std::mem::take(&mut plan.interfaces),
    )?;
    match populate(ctx, request, &mut class, &meta, &mut plan) {
        Ok(()) => Ok(class.build(ctx.types)?.id),
        Err(err) => {
            class.abandon(ctx.types);
            Err(err)
        }
    }
}

fn populate(
    ctx: &mut GenerationContext<'_>,
    request: &ProxyRequest<'_>,
    class: &mut ClassEmitter,
    meta: &MetaType,
    plan: &mut ProxyPlan,
) -> ProxyResult<()> {
    let options = request.options;
    let mixins = plan
        .mixins
        .iter()
        .map(|iface| {
            let name = mixin_field_name(&ctx.types.type_name(iface));
            (iface.clone(), class.create_field(&name, iface.clone()))
        })
        .collect();
    let interceptors = class.create_field(INTERCEPTORS_FIELD, TypeRef::interceptor_array());
    let target = plan
        .target_field
        .clone()
        .map(|ty| class.create_field(TARGET_FIELD, ty));
    let selector = options.selector.as_ref().map(|_| {
        class.create_field(
            SELECTOR_FIELD,
            TypeRef::named(TypeId::INTERCEPTOR_SELECTOR),
        )
    });

    let shape = ProxyShape {
        kind: request.kind,
        proxy_type: class.type_ref(),
        target_type: request.target.clone(),
        interceptors,
        selector,
        target,
        mixins,
    };
    for contributor in plan.contributors.iter_mut() {
        contributor.generate(ctx, class, meta, &shape)?;
    }

    generate_constructors(ctx, class, &plan.parent, &shape.constructor_fields(), plan.parameterless_only)?;

    if let Some(source) = &plan.attribute_source {
        for attribute in attributes::non_inheritable(ctx.types, &source.attributes) {
            class.add_attribute(attribute);
        }
    }
    for attribute in options.attributes() {
        class.add_attribute(attribute.clone());
    }
    if plan.serializable {
        class.serializable();
    }
    Ok(())
}

/// One proxy constructor per accessible parent constructor: assign the
/// proxy fields from the leading parameters, then chain to the parent with
/// the rest.
fn generate_constructors(
    ctx: &GenerationContext<'_>,
    class: &mut ClassEmitter,
    parent: &TypeRef,
    fields: &[FieldRef],
    parameterless_only: bool,
) -> ProxyResult<()> {
    let parent_def = ctx
        .types
        .def_of(parent)
        .ok_or_else(|| ProxyError::UnknownType(ctx.types.type_name(parent)))?;
    for base in ctx.types.constructors_of(parent_def.id) {
        let accessible = base.visibility.visible_to_subclasses()
            || (ctx.config.internals_visible && base.visibility == Visibility::Internal);
        if !accessible || (parameterless_only && !base.parameters.is_empty()) {
            continue;
        }
        let mut parameters: Vec<ParameterDef> = fields
            .iter()
            .map(|field| ParameterDef::new(field.name.trim_start_matches('_'), field.ty.clone()))
            .collect();
        parameters.extend(base.parameters.iter().map(|param| ParameterDef {
            ty: param.ty.substitute(parent.type_args(), &[]),
            ..param.clone()
        }));

        let mut ctor = class.create_constructor(parameters);
        let arguments = ctor.arguments();
        for (field, argument) in fields.iter().zip(&arguments) {
            ctor.add_statement(Statement::assign(
                Reference::field(field.clone()),
                Expression::Load(argument.clone()),
            ));
        }
        ctor.add_statement(Statement::BaseConstructorCall {
            ctor: base.handle(),
            args: arguments[fields.len()..]
                .iter()
                .cloned()
                .map(Expression::Load)
                .collect(),
        });
        class.add_constructor(ctor);
    }
    if class.constructor_count() == 0 {
        debug!(
            "{} has no accessible constructor; {} cannot be instantiated",
            parent_def.name,
            class.name()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixin_field_names_are_identifiers() {
        assert_eq!(mixin_field_name("Demo.IAudit"), "__mixin_Demo_IAudit");
        assert_eq!(
            mixin_field_name("Demo.IRepo<string>"),
            "__mixin_Demo_IRepo_string_"
        );
    }

    #[test]
    fn test_constructor_argument_order_per_kind() {
        let t = Value::Str("target".into());
        let m = Value::Str("mixin".into());
        let i = Value::Str("interceptors".into());
        let s = Value::Str("selector".into());
        let names = |args: Vec<Value>| -> Vec<String> {
            args.iter().map(|v| v.as_str().unwrap().to_string()).collect()
        };

        assert_eq!(
            names(constructor_arguments(
                ProxyKind::ClassWithTarget,
                Some(t.clone()),
                &[m.clone()],
                i.clone(),
                Some(s.clone())
            )),
            vec!["target", "mixin", "interceptors", "selector"]
        );
        assert_eq!(
            names(constructor_arguments(
                ProxyKind::InterfaceWithTarget,
                Some(t),
                &[m.clone()],
                i.clone(),
                Some(s)
            )),
            vec!["mixin", "interceptors", "target", "selector"]
        );
        assert_eq!(
            names(constructor_arguments(ProxyKind::Class, None, &[m], i, None)),
            vec!["mixin", "interceptors"]
        );
    }
}
