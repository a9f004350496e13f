//! Proxy member bodies
//!
//! Every proxied member is emitted by [`generate_method`]. The override
//! itself always looks the same (name, closed signature, generic
//! parameters, visibility); its body depends on the [`MethodStrategy`]
//! the owning contributor picked.

use crate::attributes;
use crate::emit::ast::{Expression, Reference, Statement};
use crate::emit::{ClassEmitter, MethodEmitter};
use crate::error::{ProxyResult, VmError};
use crate::generators::invocation_type;
use crate::generators::ProxyShape;
use crate::meta::MetaMethod;
use crate::scope::GenerationContext;
use crate::types::generics::arguments_for;
use crate::types::{
    FieldRef, GenericOwner, MethodDef, MethodHandle, MethodId, TypeId, TypeRef, Visibility,
};
use crate::value::Value;

/// What an intercepted call proceeds to once the interceptors are done
#[derive(Debug, Clone)]
pub(crate) enum CallTarget {
    /// The base class implementation
    BaseClass,
    /// The object held in a proxy field
    Field {
        /// Proxy field holding the target
        field: FieldRef,
        /// Whether interceptors may swap the target
        can_change_target: bool,
    },
    /// Nothing; proceeding fails
    Nothing,
}

/// How a proxied member is implemented
#[derive(Debug, Clone)]
pub(crate) enum MethodStrategy {
    /// Route the call through the interceptor chain
    Intercept(CallTarget),
    /// Call straight through to the object in a field
    Forward(FieldRef),
    /// Like [`Forward`](Self::Forward), returning defaults while the field
    /// is null
    OptionallyForward(FieldRef),
    /// Assign out parameters and return a default value
    Minimal,
}

/// Emit the proxy member for `method` and map it over its source slot
pub(crate) fn generate_method(
    ctx: &mut GenerationContext<'_>,
    class: &mut ClassEmitter,
    method: &MetaMethod,
    strategy: &MethodStrategy,
    shape: &ProxyShape,
) -> ProxyResult<MethodId> {
    let closed = method.closed_method();
    let mut emitter = override_emitter(ctx, class, method, &closed);
    match strategy {
        MethodStrategy::Intercept(target) => {
            intercepted_body(ctx, class, &mut emitter, method, &closed, target, shape)?
        }
        MethodStrategy::Forward(field) => forwarding_body(&mut emitter, method, &closed, field, false),
        MethodStrategy::OptionallyForward(field) => {
            forwarding_body(&mut emitter, method, &closed, field, true)
        }
        MethodStrategy::Minimal => minimal_body(&mut emitter),
    }
    let id = class.add_method(emitter);
    class.add_override(method.method.id, id);
    Ok(id)
}

fn override_emitter(
    ctx: &GenerationContext<'_>,
    class: &ClassEmitter,
    method: &MetaMethod,
    closed: &MethodDef,
) -> MethodEmitter {
    let mut emitter = class
        .create_member(
            method.name(),
            closed.kind,
            closed.parameters.clone(),
            closed.return_type.clone(),
        )
        .visibility(method.visibility(ctx.config.internals_visible))
        .as_virtual();
    if method.is_explicit() {
        emitter = emitter.as_final();
    }
    emitter.copy_generic_parameters_from(closed);
    for attribute in attributes::non_inheritable(ctx.types, &closed.attributes) {
        emitter.add_attribute(attribute);
    }
    emitter
}

fn call_on(local: &Reference, method: &MethodHandle, args: Vec<Expression>) -> Expression {
    Expression::Invoke {
        target: Some(Box::new(Expression::Load(local.clone()))),
        method: method.clone(),
        generic_args: Vec::new(),
        args,
        is_virtual: false,
    }
}

fn index(i: usize) -> Expression {
    Expression::Literal(Value::I32(i as i32))
}

/// Build an invocation, run the interceptor chain, copy by-ref arguments
/// back (even when the chain throws) and unwrap the return value.
fn intercepted_body(
    ctx: &mut GenerationContext<'_>,
    class: &mut ClassEmitter,
    emitter: &mut MethodEmitter,
    method: &MetaMethod,
    closed: &MethodDef,
    target: &CallTarget,
    shape: &ProxyShape,
) -> ProxyResult<()> {
    let infra = ctx.infrastructure;
    let method_args = arguments_for(&closed.generic_params, GenericOwner::Method);
    let invocation = invocation_type::obtain(ctx, class, method, target, shape)?;
    let invocation_ty = TypeRef::Named(invocation.id, method_args.clone());

    let token = if closed.is_generic() {
        Expression::MethodToken {
            method: method.method.handle(),
            generic_args: method_args.clone(),
        }
    } else {
        let field = class.create_static_field(
            &format!("token_{}", method.method.name),
            TypeRef::named(TypeId::METHOD_INFO),
        );
        class.add_type_initializer_statement(Statement::assign(
            Reference::field(field.clone()),
            Expression::MethodToken {
                method: method.method.handle(),
                generic_args: Vec::new(),
            },
        ));
        Expression::Load(Reference::field(field))
    };

    let target_arg = match target {
        CallTarget::BaseClass => Expression::TypeToken(shape.target_type.clone()),
        CallTarget::Field { field, .. } => Expression::Load(Reference::field(field.clone())),
        CallTarget::Nothing => Expression::Null,
    };
    let arguments = emitter.arguments();
    let mut ctor_args = vec![
        target_arg,
        Expression::Load(Reference::This),
        Expression::Load(Reference::field(shape.interceptors.clone())),
        token,
        Expression::ReferencesToObjectArray(
            arguments.iter().cloned().map(Reference::wrap_if_by_ref).collect(),
        ),
    ];
    if let Some(selector) = &shape.selector {
        let cache = class.create_field(
            &format!("interceptors_{}", method.method.name),
            TypeRef::interceptor_array(),
        );
        ctor_args.push(Expression::Load(Reference::field(selector.clone())));
        ctor_args.push(Expression::AddressOf(Reference::field(cache)));
    }

    let local = emitter.declare_local(invocation_ty.clone())?;
    emitter.add_statement(Statement::assign(
        local.clone(),
        Expression::NewInstance {
            ctor: invocation.constructor,
            ty: invocation_ty,
            args: ctor_args,
        },
    ));

    if closed.is_generic() {
        let type_tokens = method_args.iter().cloned().map(Expression::TypeToken).collect();
        emitter.add_expression(call_on(
            &local,
            &infra.set_generic_method_arguments,
            vec![Expression::NewArray {
                element: TypeRef::named(TypeId::TYPE),
                items: type_tokens,
            }],
        ));
    }

    let proceed = Statement::Expression(call_on(&local, &infra.proceed, Vec::new()));
    let copy_back: Vec<Statement> = arguments
        .iter()
        .enumerate()
        .filter(|(_, arg)| arg.ty().is_by_ref())
        .map(|(i, arg)| {
            let element = arg.ty().strip_by_ref().clone();
            Statement::assign(
                Reference::Indirect(Box::new(arg.clone())),
                Expression::convert(
                    call_on(&local, &infra.get_argument_value, vec![index(i)]),
                    TypeRef::object(),
                    element,
                ),
            )
        })
        .collect();
    if copy_back.is_empty() {
        emitter.add_statement(proceed);
    } else {
        emitter.add_statement(Statement::TryFinally {
            body: vec![proceed],
            finally: copy_back,
        });
    }

    let return_type = closed.return_type.clone();
    if return_type.is_void() {
        return Ok(());
    }
    let result = call_on(&local, &infra.get_return_value, Vec::new());
    if ctx.types.is_value_type(&return_type) {
        // A value type cannot come back as null
        let value = emitter.declare_local(TypeRef::object())?;
        emitter.add_statement(Statement::assign(value.clone(), result));
        emitter.add_statement(Statement::IfNull {
            value: Expression::Load(value.clone()),
            then: vec![Statement::Throw(VmError::MissingReturnValue)],
            otherwise: Vec::new(),
        });
        emitter.add_statement(Statement::Return(Some(Expression::convert(
            Expression::Load(value),
            TypeRef::object(),
            return_type,
        ))));
    } else {
        emitter.add_statement(Statement::Return(Some(Expression::convert(
            result,
            TypeRef::object(),
            return_type,
        ))));
    }
    Ok(())
}

fn forwarding_body(
    emitter: &mut MethodEmitter,
    method: &MetaMethod,
    closed: &MethodDef,
    field: &FieldRef,
    optional: bool,
) {
    let arguments = emitter.arguments();
    if optional {
        let mut fallback = default_out_arguments(emitter);
        let default = if closed.return_type.is_void() {
            None
        } else {
            Some(Expression::Default(closed.return_type.clone()))
        };
        fallback.push(Statement::Return(default));
        emitter.add_statement(Statement::IfNull {
            value: Expression::Load(Reference::field(field.clone())),
            then: fallback,
            otherwise: Vec::new(),
        });
    }

    let target = Expression::convert(
        Expression::Load(Reference::field(field.clone())),
        field.ty.clone(),
        method.declaring.clone(),
    );
    let call = Expression::Invoke {
        target: Some(Box::new(target)),
        method: method.method.handle(),
        generic_args: arguments_for(&closed.generic_params, GenericOwner::Method),
        args: arguments.into_iter().map(Expression::Load).collect(),
        is_virtual: true,
    };
    if closed.return_type.is_void() {
        emitter.add_expression(call);
    } else {
        emitter.add_statement(Statement::Return(Some(call)));
    }
}

fn default_out_arguments(emitter: &MethodEmitter) -> Vec<Statement> {
    emitter
        .parameters()
        .iter()
        .zip(emitter.arguments())
        .filter(|(param, _)| param.is_out)
        .map(|(param, arg)| {
            Statement::assign(
                Reference::Indirect(Box::new(arg)),
                Expression::Default(param.ty.strip_by_ref().clone()),
            )
        })
        .collect()
}

fn minimal_body(emitter: &mut MethodEmitter) {
    for statement in default_out_arguments(emitter) {
        emitter.add_statement(statement);
    }
}

/// Non-virtual trampoline into the base implementation of `method`, used by
/// inheritance invocations to reach code the override hides. Abstract
/// methods have nothing to call.
pub(crate) fn create_callback(
    class: &mut ClassEmitter,
    method: &MetaMethod,
) -> Option<MethodHandle> {
    if method.method.is_abstract {
        return None;
    }
    let closed = method.closed_method();
    let name = class.unique_member_name(&format!("{}_callback", method.method.name));
    let mut callback = class
        .create_method(name, closed.parameters.clone(), closed.return_type.clone())
        .visibility(Visibility::Internal);
    callback.copy_generic_parameters_from(&closed);
    let call = Expression::Invoke {
        target: None,
        method: method.method.handle(),
        generic_args: arguments_for(&closed.generic_params, GenericOwner::Method),
        args: callback.arguments().into_iter().map(Expression::Load).collect(),
        is_virtual: false,
    };
    if closed.return_type.is_void() {
        callback.add_expression(call);
    } else {
        callback.add_statement(Statement::Return(Some(call)));
    }
    let handle = callback.handle();
    class.add_method(callback);
    Some(handle)
}

