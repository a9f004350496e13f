//! Invocation types
//!
//! Each intercepted method gets a class deriving from one of the built-in
//! invocation bases. Its only job is `InvokeMethodOnTarget`: unpack the
//! argument array, call the real implementation (a target object or the
//! proxy's base-class callback) and store the result.
//!
//! Generic methods get generic invocation types: the method's generic
//! parameters become the type's, and the proxy closes the invocation type
//! over its own method arguments at run time.

use tracing::trace;

use crate::cache::InvocationKey;
use crate::emit::ast::{Expression, Reference, Statement};
use crate::emit::{ClassEmitter, MethodEmitter};
use crate::error::{ProxyError, ProxyResult};
use crate::generators::method::{create_callback, CallTarget};
use crate::generators::ProxyShape;
use crate::meta::MetaMethod;
use crate::scope::GenerationContext;
use crate::types::generics::{arguments_for, method_params_to_type_params};
use crate::types::{
    FieldRef, GenericOwner, MethodHandle, ParameterDef, TypeId, TypeRef, Visibility,
};
use crate::value::Value;

/// A generated invocation type and its constructor
#[derive(Debug, Clone)]
pub(crate) struct InvocationType {
    pub id: TypeId,
    pub constructor: MethodHandle,
}

/// Where `InvokeMethodOnTarget` sends the call
enum Dispatch<'a> {
    /// The invocation's target object
    Target {
        /// Proxy type and its target field, when interceptors may retarget
        retarget: Option<(&'a TypeRef, &'a FieldRef)>,
    },
    /// A non-virtual callback on the proxy
    Callback {
        proxy_type: &'a TypeRef,
        callback: MethodHandle,
    },
    /// Nowhere: proceeding fails
    NoTarget,
}

/// The invocation type for an intercepted `method`.
///
/// Composition invocations with a fixed target (or none) are shared across
/// proxies; the rest are generated per proxy.
pub(crate) fn obtain(
    ctx: &mut GenerationContext<'_>,
    class: &mut ClassEmitter,
    method: &MetaMethod,
    target: &CallTarget,
    shape: &ProxyShape,
) -> ProxyResult<InvocationType> {
    let with_selector = shape.selector.is_some();
    match target {
        CallTarget::BaseClass => {
            let dispatch = match create_callback(class, method) {
                Some(callback) => Dispatch::Callback {
                    proxy_type: &shape.proxy_type,
                    callback,
                },
                None => Dispatch::NoTarget,
            };
            generate(ctx, method, TypeId::INHERITANCE_INVOCATION, with_selector, dispatch)
        }
        CallTarget::Field {
            field,
            can_change_target: true,
        } => generate(
            ctx,
            method,
            TypeId::COMPOSITION_INVOCATION,
            with_selector,
            Dispatch::Target {
                retarget: Some((&shape.proxy_type, field)),
            },
        ),
        CallTarget::Field { .. } | CallTarget::Nothing => {
            let has_target = matches!(target, CallTarget::Field { .. });
            let key = InvocationKey {
                method: method.method.id,
                declaring: method.declaring.clone(),
                has_target,
                with_selector,
            };
            if let Some(id) = ctx.invocations.get(&key).copied() {
                trace!("Reusing invocation type {}", ctx.types.type_name(&TypeRef::named(id)));
                let constructor = ctx
                    .types
                    .constructors_of(id)
                    .first()
                    .map(|ctor| ctor.handle())
                    .ok_or_else(|| ProxyError::UnknownType(format!("constructor of #{}", id.0)))?;
                return Ok(InvocationType { id, constructor });
            }
            let dispatch = if has_target {
                Dispatch::Target { retarget: None }
            } else {
                Dispatch::NoTarget
            };
            let generated = generate(
                ctx,
                method,
                TypeId::COMPOSITION_INVOCATION,
                with_selector,
                dispatch,
            )?;
            ctx.invocations.insert(key, generated.id);
            Ok(generated)
        }
    }
}

fn generate(
    ctx: &mut GenerationContext<'_>,
    method: &MetaMethod,
    base: TypeId,
    with_selector: bool,
    dispatch: Dispatch<'_>,
) -> ProxyResult<InvocationType> {
    let infra = ctx.infrastructure;
    let closed = method.closed_method();
    let declaring_name = ctx
        .types
        .def_of(&method.declaring)
        .map(|def| def.simple_name().to_string())
        .unwrap_or_default();
    let name = format!(
        "{}.{}_{}",
        ctx.config.invocation_namespace, declaring_name, method.method.name
    );

    let mut class = ClassEmitter::new(ctx.types, &name, TypeRef::named(base), Vec::new())?;
    class.copy_generic_parameters_from_method(&closed);
    if ctx.config.serializable_proxies {
        class.serializable();
    }
    let type_args = arguments_for(class.generic_params(), GenericOwner::Type);

    let base_ctor = infra.invocation_constructor(base, with_selector).clone();
    let parameters = ctx
        .types
        .method(base_ctor.id)
        .map(|ctor| ctor.parameters.clone())
        .ok_or_else(|| ProxyError::UnknownType(format!("constructor of #{}", base.0)))?;
    let mut ctor = class.create_constructor(parameters);
    let args = ctor.arguments().into_iter().map(Expression::Load).collect();
    ctor.add_statement(Statement::BaseConstructorCall {
        ctor: base_ctor,
        args,
    });
    let constructor = ctor.handle();
    class.add_constructor(ctor);

    let mut invoke = class
        .create_method("InvokeMethodOnTarget", Vec::new(), TypeRef::Void)
        .visibility(Visibility::Protected)
        .as_virtual();
    match &dispatch {
        Dispatch::NoTarget => {
            invoke.add_expression(Expression::call_self(infra.throw_on_no_target.clone(), Vec::new()))
        }
        Dispatch::Target { retarget } => {
            if retarget.is_some() {
                invoke.add_expression(Expression::call_self(
                    infra.ensure_valid_target.clone(),
                    Vec::new(),
                ));
            }
            let receiver = Expression::convert(
                Expression::Load(Reference::field(infra.invocation_target.clone())),
                TypeRef::object(),
                method.declaring.clone(),
            );
            call_target(ctx, &mut invoke, method, receiver, method.method.handle(), &type_args, true)?;
        }
        Dispatch::Callback {
            proxy_type,
            callback,
        } => {
            let receiver = Expression::Load(Reference::AsType {
                inner: Box::new(Reference::field(infra.invocation_proxy.clone())),
                ty: (*proxy_type).clone(),
            });
            call_target(ctx, &mut invoke, method, receiver, callback.clone(), &type_args, false)?;
        }
    }
    let invoke_id = class.add_method(invoke);
    class.add_override(infra.invoke_method_on_target.id, invoke_id);

    if let Dispatch::Target {
        retarget: Some((proxy_type, field)),
    } = dispatch
    {
        implement_change_target(ctx, &mut class, method, proxy_type, field);
    }

    let def = class.build(ctx.types)?;
    trace!("Generated invocation type {}", def.name);
    Ok(InvocationType {
        id: def.id,
        constructor,
    })
}

/// Unpack the arguments, call `callee` on `receiver`, store the result and
/// copy by-ref arguments back into the invocation.
fn call_target(
    ctx: &GenerationContext<'_>,
    invoke: &mut MethodEmitter,
    method: &MetaMethod,
    receiver: Expression,
    callee: MethodHandle,
    type_args: &[TypeRef],
    is_virtual: bool,
) -> ProxyResult<()> {
    let infra = ctx.infrastructure;
    let position = |i: usize| Expression::Literal(Value::I32(i as i32));
    let get_argument =
        |i: usize| Expression::call_self(infra.get_argument_value.clone(), vec![position(i)]);

    let mut args = Vec::new();
    let mut copy_back = Vec::new();
    for (i, param) in method.parameters().iter().enumerate() {
        let ty = method_params_to_type_params(&param.ty);
        if ty.is_by_ref() {
            let element = ty.strip_by_ref().clone();
            let local = invoke.declare_local(element.clone())?;
            invoke.add_statement(Statement::assign(
                local.clone(),
                Expression::convert(get_argument(i), TypeRef::object(), element.clone()),
            ));
            args.push(Expression::AddressOf(local.clone()));
            copy_back.push(Statement::Expression(Expression::call_self(
                infra.set_argument_value.clone(),
                vec![
                    position(i),
                    Expression::convert(Expression::Load(local), element, TypeRef::object()),
                ],
            )));
        } else {
            args.push(Expression::convert(get_argument(i), TypeRef::object(), ty));
        }
    }

    let return_type = method_params_to_type_params(&method.return_type());
    let call = Expression::Invoke {
        target: Some(Box::new(receiver)),
        method: callee,
        generic_args: type_args.to_vec(),
        args,
        is_virtual,
    };
    if return_type.is_void() {
        invoke.add_expression(call);
    } else {
        invoke.add_expression(Expression::call_self(
            infra.set_return_value.clone(),
            vec![Expression::convert(call, return_type, TypeRef::object())],
        ));
    }
    for statement in copy_back {
        invoke.add_statement(statement);
    }
    Ok(())
}

/// Let interceptors swap the target of this call (`ChangeInvocationTarget`)
/// or of the proxy for later calls (`ChangeProxyTarget`)
fn implement_change_target(
    ctx: &GenerationContext<'_>,
    class: &mut ClassEmitter,
    method: &MetaMethod,
    proxy_type: &TypeRef,
    proxy_target: &FieldRef,
) {
    let infra = ctx.infrastructure;
    class.add_interface(TypeRef::named(TypeId::CHANGE_PROXY_TARGET));
    let parameter = || vec![ParameterDef::new("target", TypeRef::object())];
    let argument = || Expression::Load(Reference::arg(0, TypeRef::object()));

    let mut change_invocation = class
        .create_method("ChangeInvocationTarget", parameter(), TypeRef::Void)
        .as_virtual();
    change_invocation.add_statement(Statement::assign(
        Reference::field(infra.invocation_target.clone()),
        Expression::convert(argument(), TypeRef::object(), method.declaring.clone()),
    ));
    let id = class.add_method(change_invocation);
    class.add_override(infra.change_invocation_target.id, id);

    let mut change_proxy = class
        .create_method("ChangeProxyTarget", parameter(), TypeRef::Void)
        .as_virtual();
    let proxy = Reference::AsType {
        inner: Box::new(Reference::field(infra.invocation_proxy.clone())),
        ty: proxy_type.clone(),
    };
    change_proxy.add_statement(Statement::assign(
        Reference::field_of(proxy, proxy_target.clone()),
        Expression::convert(argument(), TypeRef::object(), proxy_target.ty.clone()),
    ));
    let id = class.add_method(change_proxy);
    class.add_override(infra.change_proxy_target.id, id);
}
