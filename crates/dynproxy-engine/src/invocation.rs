//! Runtime invocation records
//!
//! Every intercepted call allocates one invocation object (an instance of a
//! generated subclass of the built-in `AbstractInvocation`). The proxy method
//! fills it with the arguments and calls `Proceed`, which walks the
//! interceptor chain and finally calls the generated `InvokeMethodOnTarget`.
//!
//! [`Invocation`] is the view interceptors get on that object.

use std::sync::Arc;

use tracing::trace;

use crate::error::{VmError, VmResult};
use crate::interceptor::{Interceptor, InterceptorSelector};
use crate::types::{MethodDef, MethodId, TypeId, TypeRef};
use crate::value::{Array, InterceptorArray, MethodToken, ObjectRef, Value};
use crate::vm::Vm;

/// Field slots of the built-in invocation classes
pub(crate) mod slots {
    /// The proxy the call was made on
    pub const PROXY: usize = 0;
    /// Interceptors that run for this call
    pub const INTERCEPTORS: usize = 1;
    /// Position in the interceptor chain (-1 before the first)
    pub const CURRENT_INDEX: usize = 2;
    /// Method token of the intercepted method
    pub const METHOD: usize = 3;
    /// `object[]` of argument values
    pub const ARGUMENTS: usize = 4;
    /// Return value set by the target or an interceptor
    pub const RETURN_VALUE: usize = 5;
    /// `Type[]` closing a generic method
    pub const GENERIC_ARGUMENTS: usize = 6;
    /// Composition: the target object. Inheritance: the proxied class
    pub const TARGET: usize = 7;
}

/// The pending call, as seen by an interceptor
pub struct Invocation<'a> {
    vm: &'a Vm,
    record: ObjectRef,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(vm: &'a Vm, record: ObjectRef) -> Self {
        Self { vm, record }
    }

    /// VM running the call
    pub fn vm(&self) -> &'a Vm {
        self.vm
    }

    /// The underlying invocation object
    pub fn record(&self) -> &ObjectRef {
        &self.record
    }

    /// Token of the intercepted method, closed over its generic arguments
    pub fn method_token(&self) -> VmResult<MethodToken> {
        method_token(&self.record)
    }

    /// The intercepted method as declared on the proxied type
    pub fn method(&self) -> VmResult<Arc<MethodDef>> {
        Ok(self.method_token()?.method)
    }

    /// Generic method arguments, empty for non-generic methods
    pub fn generic_arguments(&self) -> Vec<TypeRef> {
        match self.record.field(slots::GENERIC_ARGUMENTS) {
            Value::Array(array) => array
                .to_vec()
                .into_iter()
                .filter_map(|v| match v {
                    Value::Type(ty) => Some(ty),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Current argument values
    pub fn arguments(&self) -> Vec<Value> {
        match self.record.field(slots::ARGUMENTS) {
            Value::Array(array) => array.to_vec(),
            _ => Vec::new(),
        }
    }

    /// Argument value by position
    pub fn argument(&self, index: usize) -> VmResult<Value> {
        argument_value(&self.record, index)
    }

    /// Replace an argument value. By-reference arguments are copied back
    /// to the caller when the call completes.
    pub fn set_argument_value(&mut self, index: usize, value: Value) -> VmResult<()> {
        set_argument_value(&self.record, index, value)
    }

    /// Current return value
    pub fn return_value(&self) -> Value {
        self.record.field(slots::RETURN_VALUE)
    }

    /// Set the value the proxy method returns
    pub fn set_return_value(&mut self, value: Value) {
        self.record.set_field(slots::RETURN_VALUE, value);
    }

    /// The proxy the call was made on
    pub fn proxy(&self) -> Value {
        self.record.field(slots::PROXY)
    }

    /// Object the call is forwarded to: the target for composition
    /// proxies, the proxy itself for class proxies
    pub fn invocation_target(&self) -> Value {
        if self.is_inheritance() {
            self.proxy()
        } else {
            self.record.field(slots::TARGET)
        }
    }

    /// Type of the invocation target, `None` when there is no target
    pub fn target_type(&self) -> Option<TypeRef> {
        if self.is_inheritance() {
            match self.record.field(slots::TARGET) {
                Value::Type(ty) => Some(ty),
                _ => None,
            }
        } else {
            self.record.field(slots::TARGET).runtime_type()
        }
    }

    /// Implementation of the intercepted method on the invocation target
    pub fn method_invocation_target(&self) -> VmResult<Option<Arc<MethodDef>>> {
        let method = self.method()?;
        let resolved = if self.is_inheritance() {
            let Some(ty) = self.target_type() else {
                return Ok(None);
            };
            let table = self.vm.types().read();
            match table.def_of(&ty) {
                Some(def) => def.resolve_slot(method.id),
                None => return Ok(None),
            }
        } else {
            match self.record.field(slots::TARGET) {
                Value::Object(target) => target.ty.resolve_slot(method.id),
                _ => return Ok(None),
            }
        };
        self.vm.method_def(resolved).map(Some)
    }

    /// Continue with the next interceptor, or call the target when every
    /// interceptor has run.
    ///
    /// # Errors
    ///
    /// Propagates whatever the rest of the chain raises; fails with
    /// `ProceedPastEnd` when called again after the target was reached.
    pub fn proceed(&mut self) -> VmResult<()> {
        proceed(self.vm, &self.record)
    }

    /// Whether the invocation supports retargeting
    pub fn can_change_target(&self) -> bool {
        self.vm.types().read().implements(
            &self.record.type_ref(),
            &TypeRef::named(TypeId::CHANGE_PROXY_TARGET),
        )
    }

    /// Redirect this call to another target
    pub fn change_invocation_target(&mut self, target: Value) -> VmResult<()> {
        self.call_change_target("ChangeInvocationTarget", target)
    }

    /// Redirect this and every later call on the proxy to another target
    pub fn change_proxy_target(&mut self, target: Value) -> VmResult<()> {
        self.call_change_target("ChangeProxyTarget", target)
    }

    fn call_change_target(&mut self, name: &str, target: Value) -> VmResult<()> {
        if !self.can_change_target() {
            return Err(VmError::InvalidOperation(format!(
                "{} is not supported by invocations of '{}'",
                name,
                method_name(&self.record)
            )));
        }
        let slot = self
            .vm
            .types()
            .read()
            .find_method(TypeId::CHANGE_PROXY_TARGET, name)
            .ok_or_else(|| VmError::MissingMember(format!("IChangeProxyTarget.{}", name)))?;
        self.vm
            .call_virtual(slot.id, &Value::Object(self.record.clone()), vec![target], Vec::new())?;
        Ok(())
    }

    fn is_inheritance(&self) -> bool {
        self.vm.types().read().is_subclass_of(
            &self.record.type_ref(),
            &TypeRef::named(TypeId::INHERITANCE_INVOCATION),
        )
    }
}

/// The invocation object behind a native method's receiver
pub(crate) fn record_of(this: &Value) -> VmResult<&ObjectRef> {
    this.expect_object("invocation")
}

pub(crate) fn method_token(record: &ObjectRef) -> VmResult<MethodToken> {
    match record.field(slots::METHOD) {
        Value::Method(token) => Ok(token),
        other => Err(VmError::InvalidCast(format!(
            "invocation method slot holds {:?}",
            other
        ))),
    }
}

pub(crate) fn method_name(record: &ObjectRef) -> String {
    method_token(record)
        .map(|token| token.method.name.clone())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

fn arguments_array(record: &ObjectRef) -> VmResult<Arc<Array>> {
    match record.field(slots::ARGUMENTS) {
        Value::Array(array) => Ok(array),
        Value::Null => Err(VmError::NullReference("invocation arguments".to_string())),
        other => Err(VmError::InvalidCast(format!(
            "invocation arguments slot holds {:?}",
            other
        ))),
    }
}

pub(crate) fn argument_value(record: &ObjectRef, index: usize) -> VmResult<Value> {
    arguments_array(record)?.get(index)
}

pub(crate) fn set_argument_value(record: &ObjectRef, index: usize, value: Value) -> VmResult<()> {
    arguments_array(record)?.set(index, value)
}

fn interceptors(record: &ObjectRef) -> VmResult<InterceptorArray> {
    match record.field(slots::INTERCEPTORS) {
        Value::Interceptors(chain) => Ok(chain),
        Value::Null => Ok(Arc::new(Vec::new())),
        other => Err(VmError::InvalidCast(format!(
            "invocation interceptor slot holds {:?}",
            other
        ))),
    }
}

/// Fill the common slots of a freshly allocated invocation
pub(crate) fn initialize(
    record: &ObjectRef,
    proxy: Value,
    interceptors: Value,
    method: Value,
    arguments: Value,
) -> VmResult<()> {
    if !matches!(method, Value::Method(_)) {
        return Err(VmError::InvalidArgument(format!(
            "invocation method token expected, got {:?}",
            method
        )));
    }
    if !matches!(arguments, Value::Array(_)) {
        return Err(VmError::InvalidArgument(format!(
            "invocation argument array expected, got {:?}",
            arguments
        )));
    }
    let interceptors = match interceptors {
        Value::Interceptors(chain) => Value::Interceptors(chain),
        Value::Null => Value::Interceptors(Arc::new(Vec::new())),
        other => {
            return Err(VmError::InvalidArgument(format!(
                "interceptor array expected, got {:?}",
                other
            )))
        }
    };
    record.set_field(slots::PROXY, proxy);
    record.set_field(slots::INTERCEPTORS, interceptors);
    record.set_field(slots::CURRENT_INDEX, Value::I32(-1));
    record.set_field(slots::METHOD, method);
    record.set_field(slots::ARGUMENTS, arguments);
    record.set_field(slots::RETURN_VALUE, Value::Null);
    Ok(())
}

/// Resolve the interceptors for one method through the selector, caching
/// the result in the proxy field `cache` points at.
///
/// The selector runs only while the cached value is still null; a selector
/// returning nothing caches an empty chain.
pub(crate) fn select_interceptors(
    target_type: Option<&TypeRef>,
    method: &Value,
    interceptors: &Value,
    selector: &Value,
    cache: &Value,
) -> VmResult<Value> {
    let cache = cache.expect_pointer("interceptor cache")?;
    if let Value::Interceptors(cached) = cache.load() {
        return Ok(Value::Interceptors(cached));
    }

    let Value::Method(token) = method else {
        return Err(VmError::InvalidArgument(
            "interceptor selection needs a method token".to_string(),
        ));
    };
    let all: Vec<Arc<dyn Interceptor>> = match interceptors {
        Value::Interceptors(chain) => chain.as_ref().clone(),
        _ => Vec::new(),
    };
    let selected = match selector {
        Value::Selector(selector) => {
            let selector: &dyn InterceptorSelector = selector.as_ref();
            selector.select_interceptors(target_type, &token.method, &all)
        }
        _ => all,
    };
    trace!(
        "Selected {} interceptors for {}",
        selected.len(),
        token.method.name
    );
    let selected = Value::Interceptors(Arc::new(selected));
    cache.store(selected.clone());
    Ok(selected)
}

/// Advance the interceptor cursor and run the next step of the chain.
///
/// The cursor is restored on every exit path, so an interceptor may call
/// `proceed` more than once (retry) without skipping the rest of the chain.
pub(crate) fn proceed(vm: &Vm, record: &ObjectRef) -> VmResult<()> {
    let chain = interceptors(record)?;
    let index = record.field(slots::CURRENT_INDEX).as_i32().unwrap_or(-1);
    let next = index + 1;
    record.set_field(slots::CURRENT_INDEX, Value::I32(next));

    let result = match usize::try_from(next) {
        Ok(position) if position == chain.len() => invoke_method_on_target(vm, record),
        Ok(position) if position < chain.len() => {
            let mut invocation = Invocation::new(vm, record.clone());
            chain[position].intercept(&mut invocation)
        }
        _ => Err(VmError::ProceedPastEnd(method_name(record))),
    };

    record.set_field(slots::CURRENT_INDEX, Value::I32(index));
    result
}

fn invoke_method_on_target(vm: &Vm, record: &ObjectRef) -> VmResult<()> {
    let slot = invoke_method_on_target_slot(vm)?;
    vm.call_virtual(slot, &Value::Object(record.clone()), Vec::new(), Vec::new())?;
    Ok(())
}

fn invoke_method_on_target_slot(vm: &Vm) -> VmResult<MethodId> {
    vm.types()
        .read()
        .find_method(TypeId::ABSTRACT_INVOCATION, "InvokeMethodOnTarget")
        .map(|m| m.id)
        .ok_or_else(|| VmError::MissingMember("AbstractInvocation.InvokeMethodOnTarget".to_string()))
}

/// Raised by `InvokeMethodOnTarget` of invocations without a target
pub(crate) fn throw_on_no_target(record: &ObjectRef) -> VmError {
    VmError::NoTarget {
        method: method_name(record),
    }
}

/// Checked before forwarding when the target may have been changed
pub(crate) fn ensure_valid_target(record: &ObjectRef) -> VmResult<()> {
    match record.field(slots::TARGET) {
        Value::Null => Err(throw_on_no_target(record)),
        target if target.value_eq(&record.field(slots::PROXY)) => Err(VmError::TargetIsProxy {
            method: method_name(record),
        }),
        _ => Ok(()),
    }
}
