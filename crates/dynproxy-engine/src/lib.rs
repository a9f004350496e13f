//! dynproxy engine
//!
//! Runtime proxy synthesis and call interception over a managed type table:
//! - **Types**: source classes and interfaces, declared with [`TypeBuilder`]
//!   (`types` module)
//! - **VM**: interpreter executing native and generated method bodies
//!   (`vm` module)
//! - **Emit**: symbolic instruction layer and member emitters the generators
//!   compile proxy bodies with (`emit` module)
//! - **Proxies**: [`ProxyGenerator`] synthesizes proxy types once per request
//!   shape, caches them in a [`ModuleScope`] and routes every intercepted
//!   call through an [`Interceptor`] chain
//!
//! # Example
//!
//! ```rust,ignore
//! use dynproxy_engine::{interceptor_fn, ProxyGenerationOptions, ProxyGenerator, TypeBuilder};
//!
//! let generator = ProxyGenerator::new()?;
//! let calculator = generator.scope().define(
//!     TypeBuilder::interface("Demo.ICalculator")
//!         .method(MethodBuilder::new("Add").param("a", TypeRef::i32()).param("b", TypeRef::i32()).returns(TypeRef::i32())),
//! )?;
//!
//! let proxy = generator.create_interface_proxy_without_target(
//!     &TypeRef::named(calculator.id),
//!     &[],
//!     &ProxyGenerationOptions::default(),
//!     vec![interceptor_fn(|invocation| {
//!         invocation.set_return_value(Value::I32(42));
//!         Ok(())
//!     })],
//! )?;
//! let result = generator.scope().vm().invoke(&proxy, "Add", vec![Value::I32(1), Value::I32(2)])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

// ============================================================================
// Object Model
// ============================================================================

/// Type table, type and method records, builders
pub mod types;

/// Runtime values
pub mod value;

/// Interpreter
pub mod vm;

/// Built-in infrastructure types
pub mod bootstrap;

/// Code emission
pub mod emit;

// ============================================================================
// Proxy Generation
// ============================================================================

/// Errors for every layer
pub mod error;

/// Scope configuration
pub mod config;

/// Module scope and generation cache
pub mod scope;

/// Cache keys
pub mod cache;

/// Generation options and mixins
pub mod options;

/// Meta-model of a proxy type under construction
pub mod meta;

/// Caller-supplied collaborators
pub mod interceptor;

/// Runtime invocation records
pub mod invocation;

/// Attribute replication
pub mod attributes;

/// Type listing
pub mod dump;

pub(crate) mod contributors;
pub(crate) mod generators;

/// Public proxy API
pub mod proxy_generator;

/// Proxy inspection helpers
pub mod proxy_util;

/// Persisting proxies
pub mod serialization;

// ============================================================================
// Re-exports
// ============================================================================

pub use attributes::AttributeDisassembler;
pub use cache::{CacheKey, ProxyKind};
pub use config::ScopeConfig;
pub use error::{ConflictSource, EmitError, ProxyError, ProxyResult, VmError, VmResult};
pub use generators::{INTERCEPTORS_FIELD, MIXIN_FIELD_PREFIX, SELECTOR_FIELD, TARGET_FIELD};
pub use interceptor::{
    interceptor_fn, AllMethodsHook, FnInterceptor, Interceptor, InterceptorSelector,
    ProxyGenerationHook, StandardInterceptor,
};
pub use invocation::Invocation;
pub use options::{MixinData, ProxyGenerationOptions};
pub use proxy_generator::ProxyGenerator;
pub use scope::ModuleScope;
pub use serialization::{HookRegistry, ProxyRecipe};
pub use types::{
    CustomAttributeData, MethodBuilder, MethodDef, TypeBuilder, TypeDef, TypeId, TypeRef,
    TypeTable, Visibility,
};
pub use value::{ObjectRef, Value};
pub use vm::Vm;
