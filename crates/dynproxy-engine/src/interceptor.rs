//! Collaborator traits supplied by callers
//!
//! - [`Interceptor`]: runs around every intercepted call
//! - [`InterceptorSelector`]: narrows the interceptor chain per method
//! - [`ProxyGenerationHook`]: decides which members get intercepted

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::VmResult;
use crate::invocation::Invocation;
use crate::types::{MethodDef, TypeDef, TypeId, TypeRef};

/// Code that runs around an intercepted call
pub trait Interceptor: Send + Sync {
    /// Handle one call. Call [`Invocation::proceed`] to continue down the
    /// chain (and eventually to the target), or set a return value instead.
    fn intercept(&self, invocation: &mut Invocation<'_>) -> VmResult<()>;
}

impl fmt::Debug for dyn Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interceptor@{:p}", self as *const dyn Interceptor as *const ())
    }
}

/// Picks the interceptors that apply to a particular method.
///
/// Called once per proxy instance and method; the result is cached in the
/// proxy.
pub trait InterceptorSelector: Send + Sync {
    /// Interceptors for calls to `method` on `ty` (`None` for proxies
    /// without a target type)
    fn select_interceptors(
        &self,
        ty: Option<&TypeRef>,
        method: &MethodDef,
        interceptors: &[Arc<dyn Interceptor>],
    ) -> Vec<Arc<dyn Interceptor>>;
}

impl fmt::Debug for dyn InterceptorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InterceptorSelector@{:p}",
            self as *const dyn InterceptorSelector as *const ()
        )
    }
}

/// Decides which members of a proxied type are intercepted.
///
/// Hooks take part in the generation cache key, so two hooks that make the
/// same decisions should compare equal through [`equals`](Self::equals).
/// The default implementations compare by identity.
pub trait ProxyGenerationHook: Send + Sync {
    /// Whether calls to `method` of `ty` go through the interceptors
    fn should_intercept_method(&self, ty: &TypeDef, method: &MethodDef) -> bool;

    /// A member of `ty` that cannot be intercepted was skipped
    fn non_proxyable_member_notification(&self, ty: &TypeDef, member: &MethodDef) {
        let _ = (ty, member);
    }

    /// Every member was inspected
    fn methods_inspected(&self) {}

    /// Get the hook as `Any` for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Cache identity
    fn equals(&self, other: &dyn ProxyGenerationHook) -> bool {
        std::ptr::addr_eq(self as *const Self, other as *const dyn ProxyGenerationHook)
    }

    /// Hash consistent with [`equals`](Self::equals)
    fn hash_code(&self) -> u64 {
        (self as *const Self).cast::<()>() as usize as u64
    }

    /// Name under which the hook can be rebuilt when a proxy is
    /// deserialized
    fn key(&self) -> Option<&str> {
        None
    }
}

impl fmt::Debug for dyn ProxyGenerationHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "ProxyGenerationHook({})", key),
            None => write!(
                f,
                "ProxyGenerationHook@{:p}",
                self as *const dyn ProxyGenerationHook as *const ()
            ),
        }
    }
}

/// Intercepts every overridable member except the root object's own
#[derive(Debug, Clone, Copy, Default)]
pub struct AllMethodsHook;

impl AllMethodsHook {
    /// Key used by the hook registry
    pub const KEY: &'static str = "all-methods";
}

impl ProxyGenerationHook for AllMethodsHook {
    fn should_intercept_method(&self, _ty: &TypeDef, method: &MethodDef) -> bool {
        method.declaring_type != TypeId::OBJECT
    }

    fn non_proxyable_member_notification(&self, ty: &TypeDef, member: &MethodDef) {
        if member.declaring_type != TypeId::OBJECT {
            debug!("Member {}.{} is not proxyable", ty.name, member.name);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn ProxyGenerationHook) -> bool {
        other.as_any().is::<AllMethodsHook>()
    }

    fn hash_code(&self) -> u64 {
        0x5d1f_a11a
    }

    fn key(&self) -> Option<&str> {
        Some(Self::KEY)
    }
}

/// Interceptor with overridable steps around [`Invocation::proceed`].
///
/// `perform_proceed` only runs when `pre_proceed` returns `true`;
/// `post_proceed` always runs afterwards.
pub trait StandardInterceptor: Send + Sync {
    /// Runs before the call; return `false` to skip it
    fn pre_proceed(&self, invocation: &mut Invocation<'_>) -> VmResult<bool> {
        let _ = invocation;
        Ok(true)
    }

    /// Continues the chain
    fn perform_proceed(&self, invocation: &mut Invocation<'_>) -> VmResult<()> {
        invocation.proceed()
    }

    /// Runs after the call (or after the skip)
    fn post_proceed(&self, invocation: &mut Invocation<'_>) -> VmResult<()> {
        let _ = invocation;
        Ok(())
    }
}

impl<T: StandardInterceptor> Interceptor for T {
    fn intercept(&self, invocation: &mut Invocation<'_>) -> VmResult<()> {
        if self.pre_proceed(invocation)? {
            self.perform_proceed(invocation)?;
        }
        self.post_proceed(invocation)
    }
}

/// Interceptor built from a closure
pub struct FnInterceptor<F>(pub F);

impl<F> StandardInterceptor for FnInterceptor<F>
where
    F: Fn(&mut Invocation<'_>) -> VmResult<()> + Send + Sync,
{
    fn perform_proceed(&self, invocation: &mut Invocation<'_>) -> VmResult<()> {
        (self.0)(invocation)
    }
}

/// Wrap a closure as a shared interceptor
pub fn interceptor_fn<F>(f: F) -> Arc<dyn Interceptor>
where
    F: Fn(&mut Invocation<'_>) -> VmResult<()> + Send + Sync + 'static,
{
    Arc::new(FnInterceptor(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHook;

    impl ProxyGenerationHook for CountingHook {
        fn should_intercept_method(&self, _ty: &TypeDef, _method: &MethodDef) -> bool {
            true
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_default_hook_equality_is_identity() {
        let a: Arc<dyn ProxyGenerationHook> = Arc::new(CountingHook);
        let b: Arc<dyn ProxyGenerationHook> = Arc::new(CountingHook);
        assert!(a.equals(a.as_ref()));
        assert!(!a.equals(b.as_ref()));
    }

    #[test]
    fn test_all_methods_hooks_are_equal() {
        let a: Arc<dyn ProxyGenerationHook> = Arc::new(AllMethodsHook);
        let b: Arc<dyn ProxyGenerationHook> = Arc::new(AllMethodsHook);
        let other: Arc<dyn ProxyGenerationHook> = Arc::new(CountingHook);
        assert!(a.equals(b.as_ref()));
        assert_eq!(a.hash_code(), b.hash_code());
        assert!(!a.equals(other.as_ref()));
        assert_eq!(a.key(), Some(AllMethodsHook::KEY));
    }
}
