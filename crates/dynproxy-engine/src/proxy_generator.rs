//! Public entry point: validate a request, fetch or synthesize the proxy type
//! and instantiate it
//!
//! ```rust,ignore
//! let generator = ProxyGenerator::new()?;
//! let proxy = generator.create_interface_proxy_without_target(
//!     &calculator,
//!     &[],
//!     &ProxyGenerationOptions::default(),
//!     vec![interceptor_fn(|inv| { inv.set_return_value(Value::I32(42)); Ok(()) })],
//! )?;
//! ```

use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::{CacheKey, ProxyKind};
use crate::error::{ProxyError, ProxyResult};
use crate::generators::{self, ProxyRequest};
use crate::interceptor::Interceptor;
use crate::options::ProxyGenerationOptions;
use crate::proxy_util;
use crate::scope::ModuleScope;
use crate::types::{TypeRef, TypeTable};
use crate::value::Value;

/// Creates proxies over the types of one [`ModuleScope`]
#[derive(Debug, Clone)]
pub struct ProxyGenerator {
    scope: Arc<ModuleScope>,
}

impl ProxyGenerator {
    /// Generator over a fresh scope with default settings
    pub fn new() -> ProxyResult<Self> {
        Ok(Self::with_scope(Arc::new(ModuleScope::new()?)))
    }

    /// Generator over an existing scope
    pub fn with_scope(scope: Arc<ModuleScope>) -> Self {
        Self { scope }
    }

    /// The scope proxies are generated into
    pub fn scope(&self) -> &Arc<ModuleScope> {
        &self.scope
    }

    // ------------------------------------------------------------------------
    // Class proxies
    // ------------------------------------------------------------------------

    /// Subclass `class`, routing intercepted virtual members through
    /// `interceptors` and proceeding to the base implementation.
    ///
    /// `ctor_args` select the base constructor.
    pub fn create_class_proxy(
        &self,
        class: &TypeRef,
        interfaces: &[TypeRef],
        options: &ProxyGenerationOptions,
        ctor_args: Vec<Value>,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> ProxyResult<Value> {
        let proxy_type = self.create_class_proxy_type(class, interfaces, options)?;
        self.instantiate(
            ProxyKind::Class,
            class,
            &proxy_type,
            None,
            options,
            ctor_args,
            interceptors,
        )
    }

    /// Proxy type for [`create_class_proxy`](Self::create_class_proxy)
    pub fn create_class_proxy_type(
        &self,
        class: &TypeRef,
        interfaces: &[TypeRef],
        options: &ProxyGenerationOptions,
    ) -> ProxyResult<TypeRef> {
        self.validate_class(class, interfaces)?;
        self.proxy_type(ProxyKind::Class, class, interfaces, None, options)
    }

    /// Subclass `class`, forwarding intercepted calls to `target` instead of
    /// the base implementation
    pub fn create_class_proxy_with_target(
        &self,
        class: &TypeRef,
        interfaces: &[TypeRef],
        target: Value,
        options: &ProxyGenerationOptions,
        ctor_args: Vec<Value>,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> ProxyResult<Value> {
        self.check_target(&target, class)?;
        let proxy_type = self.create_class_proxy_type_with_target(class, interfaces, options)?;
        self.instantiate(
            ProxyKind::ClassWithTarget,
            class,
            &proxy_type,
            Some(target),
            options,
            ctor_args,
            interceptors,
        )
    }

    /// Proxy type for
    /// [`create_class_proxy_with_target`](Self::create_class_proxy_with_target)
    pub fn create_class_proxy_type_with_target(
        &self,
        class: &TypeRef,
        interfaces: &[TypeRef],
        options: &ProxyGenerationOptions,
    ) -> ProxyResult<TypeRef> {
        self.validate_class(class, interfaces)?;
        self.proxy_type(ProxyKind::ClassWithTarget, class, interfaces, None, options)
    }

    // ------------------------------------------------------------------------
    // Interface proxies
    // ------------------------------------------------------------------------

    /// Implement `interface` by forwarding to `target`.
    ///
    /// Additional interfaces the target's runtime type implements are
    /// forwarded to it as well; the others have no implementation.
    pub fn create_interface_proxy_with_target(
        &self,
        interface: &TypeRef,
        interfaces: &[TypeRef],
        options: &ProxyGenerationOptions,
        target: Value,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> ProxyResult<Value> {
        self.check_target(&target, interface)?;
        let implementation = target
            .runtime_type()
            .ok_or(ProxyError::NullArgument("target"))?;
        self.validate_interface(interface, interfaces, options)?;
        let proxy_type = self.proxy_type(
            ProxyKind::InterfaceWithTarget,
            interface,
            interfaces,
            Some(&implementation),
            options,
        )?;
        self.instantiate(
            ProxyKind::InterfaceWithTarget,
            interface,
            &proxy_type,
            Some(target),
            options,
            Vec::new(),
            interceptors,
        )
    }

    /// Proxy type for
    /// [`create_interface_proxy_with_target`](Self::create_interface_proxy_with_target)
    /// given the runtime type of the target
    pub fn create_interface_proxy_type_with_target(
        &self,
        interface: &TypeRef,
        interfaces: &[TypeRef],
        implementation: &TypeRef,
        options: &ProxyGenerationOptions,
    ) -> ProxyResult<TypeRef> {
        {
            let types = self.scope.types().read();
            if !types.is_assignable(implementation, interface) {
                return Err(ProxyError::TargetDoesNotImplement {
                    target: types.type_name(implementation),
                    expected: types.type_name(interface),
                });
            }
        }
        self.validate_interface(interface, interfaces, options)?;
        self.proxy_type(
            ProxyKind::InterfaceWithTarget,
            interface,
            interfaces,
            Some(implementation),
            options,
        )
    }

    /// Implement `interface` by forwarding to `target`, which interceptors
    /// may replace per call or for the proxy as a whole
    pub fn create_interface_proxy_with_target_interface(
        &self,
        interface: &TypeRef,
        interfaces: &[TypeRef],
        options: &ProxyGenerationOptions,
        target: Value,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> ProxyResult<Value> {
        if !target.is_null() {
            self.check_target(&target, interface)?;
        }
        let proxy_type =
            self.create_interface_proxy_type_with_target_interface(interface, interfaces, options)?;
        self.instantiate(
            ProxyKind::InterfaceWithTargetInterface,
            interface,
            &proxy_type,
            Some(target),
            options,
            Vec::new(),
            interceptors,
        )
    }

    /// Proxy type for
    /// [`create_interface_proxy_with_target_interface`](Self::create_interface_proxy_with_target_interface)
    pub fn create_interface_proxy_type_with_target_interface(
        &self,
        interface: &TypeRef,
        interfaces: &[TypeRef],
        options: &ProxyGenerationOptions,
    ) -> ProxyResult<TypeRef> {
        self.validate_interface(interface, interfaces, options)?;
        self.proxy_type(
            ProxyKind::InterfaceWithTargetInterface,
            interface,
            interfaces,
            None,
            options,
        )
    }

    /// Implement `interface` with nothing behind it; interceptors produce
    /// every result
    pub fn create_interface_proxy_without_target(
        &self,
        interface: &TypeRef,
        interfaces: &[TypeRef],
        options: &ProxyGenerationOptions,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> ProxyResult<Value> {
        let proxy_type =
            self.create_interface_proxy_type_without_target(interface, interfaces, options)?;
        self.instantiate(
            ProxyKind::InterfaceWithoutTarget,
            interface,
            &proxy_type,
            None,
            options,
            Vec::new(),
            interceptors,
        )
    }

    /// Proxy type for
    /// [`create_interface_proxy_without_target`](Self::create_interface_proxy_without_target)
    pub fn create_interface_proxy_type_without_target(
        &self,
        interface: &TypeRef,
        interfaces: &[TypeRef],
        options: &ProxyGenerationOptions,
    ) -> ProxyResult<TypeRef> {
        self.validate_interface(interface, interfaces, options)?;
        self.proxy_type(
            ProxyKind::InterfaceWithoutTarget,
            interface,
            interfaces,
            None,
            options,
        )
    }

    // ------------------------------------------------------------------------
    // Shared pipeline
    // ------------------------------------------------------------------------

    /// Cached or freshly generated proxy type for a validated request
    pub(crate) fn proxy_type(
        &self,
        kind: ProxyKind,
        target: &TypeRef,
        interfaces: &[TypeRef],
        implementation: Option<&TypeRef>,
        options: &ProxyGenerationOptions,
    ) -> ProxyResult<TypeRef> {
        options.initialize(self.scope.vm())?;
        let key = {
            let types = self.scope.types().read();
            let key = CacheKey::new(&types, kind, target.clone(), interfaces, options.clone());
            match implementation {
                Some(implementation) => key.with_implementation(implementation.clone()),
                None => key,
            }
        };
        let id = self.scope.get_or_generate(key, |ctx| {
            generators::generate(
                ctx,
                &ProxyRequest {
                    kind,
                    target,
                    interfaces,
                    implementation,
                    options,
                },
            )
        })?;
        Ok(TypeRef::named(id))
    }

    /// Run the proxy constructor matching the leading proxy state plus
    /// `ctor_args`
    pub(crate) fn instantiate(
        &self,
        kind: ProxyKind,
        proxied: &TypeRef,
        proxy_type: &TypeRef,
        target: Option<Value>,
        options: &ProxyGenerationOptions,
        ctor_args: Vec<Value>,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> ProxyResult<Value> {
        let mixins = options.mixin_data()?.mixins().to_vec();
        let mut args = generators::constructor_arguments(
            kind,
            target,
            &mixins,
            Value::Interceptors(Arc::new(interceptors)),
            options.selector.clone().map(Value::Selector),
        );
        let supplied = ctor_args.len();
        args.extend(ctor_args);

        let vm = self.scope.vm();
        if vm.find_constructor(proxy_type, &args).is_none() {
            return Err(ProxyError::NoMatchingConstructor {
                type_name: self.scope.type_name(proxied),
                arg_count: supplied,
            });
        }
        trace!(
            "Instantiating {} with {} arguments",
            self.scope.type_name(proxy_type),
            args.len()
        );
        Ok(vm.construct(proxy_type, args)?)
    }

    fn check_target(&self, target: &Value, expected: &TypeRef) -> ProxyResult<()> {
        if target.is_null() {
            return Err(ProxyError::NullArgument("target"));
        }
        if self.scope.vm().is_instance_of(target, expected) {
            return Ok(());
        }
        let types = self.scope.types().read();
        Err(ProxyError::TargetDoesNotImplement {
            target: target
                .runtime_type()
                .map(|ty| types.type_name(&ty))
                .unwrap_or_default(),
            expected: types.type_name(expected),
        })
    }

    fn validate_class(&self, class: &TypeRef, interfaces: &[TypeRef]) -> ProxyResult<()> {
        let types = self.scope.types().read();
        let name = types.type_name(class);
        let def = types
            .def_of(class)
            .ok_or_else(|| ProxyError::UnknownType(name.clone()))?;
        if !def.is_class() {
            return Err(ProxyError::NotAClass(name));
        }
        if def.is_sealed {
            return Err(ProxyError::SealedType(name));
        }
        self.check_proxyable(&types, class)?;
        self.validate_interfaces(&types, interfaces)
    }

    fn validate_interface(
        &self,
        interface: &TypeRef,
        interfaces: &[TypeRef],
        options: &ProxyGenerationOptions,
    ) -> ProxyResult<()> {
        let types = self.scope.types().read();
        if !types.is_interface(interface) {
            return Err(ProxyError::NotAnInterface(types.type_name(interface)));
        }
        self.check_proxyable(&types, interface)?;
        self.validate_interfaces(&types, interfaces)?;
        self.validate_base_type(&types, &options.base_type_for_interface_proxy)
    }

    fn validate_interfaces(&self, types: &TypeTable, interfaces: &[TypeRef]) -> ProxyResult<()> {
        for iface in interfaces {
            if !types.is_interface(iface) {
                return Err(ProxyError::NotAnInterface(types.type_name(iface)));
            }
            self.check_proxyable(types, iface)?;
        }
        Ok(())
    }

    /// Closed and visible to generated code
    fn check_proxyable(&self, types: &TypeTable, ty: &TypeRef) -> ProxyResult<()> {
        if proxy_util::is_open_generic(types, ty) {
            return Err(ProxyError::OpenGenericType(types.type_name(ty)));
        }
        if !proxy_util::is_accessible(types, ty, self.scope.config().internals_visible) {
            return Err(ProxyError::InaccessibleType(types.type_name(ty)));
        }
        Ok(())
    }

    fn validate_base_type(&self, types: &TypeTable, base: &TypeRef) -> ProxyResult<()> {
        let type_name = types.type_name(base);
        let invalid = |reason: &str| ProxyError::InvalidBaseType {
            type_name: type_name.clone(),
            reason: reason.to_string(),
        };
        let def = types
            .def_of(base)
            .ok_or_else(|| invalid("the type is not registered"))?;
        if !def.is_class() {
            return Err(invalid("it is not a class type"));
        }
        if def.is_sealed {
            return Err(invalid("it is sealed"));
        }
        if def.is_abstract {
            return Err(invalid("it is abstract"));
        }
        if proxy_util::is_open_generic(types, base) {
            return Err(invalid("it is an open generic type"));
        }
        let has_default_ctor = types.constructors_of(def.id).iter().any(|ctor| {
            ctor.parameters.is_empty() && ctor.visibility.visible_to_subclasses()
        });
        if !has_default_ctor {
            return Err(invalid("it has no accessible parameterless constructor"));
        }
        debug!("Interface proxies will derive from {}", type_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MethodBuilder, TypeBuilder};

    fn generator() -> ProxyGenerator {
        ProxyGenerator::new().unwrap()
    }

    fn define(generator: &ProxyGenerator, builder: TypeBuilder) -> TypeRef {
        TypeRef::named(generator.scope().define(builder).unwrap().id)
    }

    fn service(generator: &ProxyGenerator) -> TypeRef {
        define(
            generator,
            TypeBuilder::interface("Demo.IService")
                .method(MethodBuilder::new("Run").returns(TypeRef::i32())),
        )
    }

    #[test]
    fn test_class_proxy_rejects_interface() {
        let generator = generator();
        let iface = service(&generator);
        let err = generator
            .create_class_proxy_type(&iface, &[], &ProxyGenerationOptions::default())
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotAClass(name) if name == "Demo.IService"));
    }

    #[test]
    fn test_class_proxy_rejects_sealed_class() {
        let generator = generator();
        let class = define(&generator, TypeBuilder::class("Demo.Final").sealed());
        let err = generator
            .create_class_proxy_type(&class, &[], &ProxyGenerationOptions::default())
            .unwrap_err();
        assert!(matches!(err, ProxyError::SealedType(_)));
        assert_eq!(generator.scope().cached_count(), 0);
    }

    #[test]
    fn test_interface_proxy_rejects_class_as_additional_interface() {
        let generator = generator();
        let iface = service(&generator);
        let class = define(&generator, TypeBuilder::class("Demo.Plain"));
        let err = generator
            .create_interface_proxy_type_without_target(
                &iface,
                &[class],
                &ProxyGenerationOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotAnInterface(name) if name == "Demo.Plain"));
    }

    #[test]
    fn test_interface_proxy_with_null_target_is_rejected() {
        let generator = generator();
        let iface = service(&generator);
        let err = generator
            .create_interface_proxy_with_target(
                &iface,
                &[],
                &ProxyGenerationOptions::default(),
                Value::Null,
                Vec::new(),
            )
            .unwrap_err();
        assert_eq!(err, ProxyError::NullArgument("target"));
    }

    #[test]
    fn test_target_must_implement_interface() {
        let generator = generator();
        let iface = service(&generator);
        let class = define(&generator, TypeBuilder::class("Demo.Unrelated"));
        let target = generator.scope().vm().construct(&class, Vec::new()).unwrap();
        let err = generator
            .create_interface_proxy_with_target(
                &iface,
                &[],
                &ProxyGenerationOptions::default(),
                target,
                Vec::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ProxyError::TargetDoesNotImplement { .. }));
    }

    #[test]
    fn test_sealed_base_type_is_rejected() {
        let generator = generator();
        let iface = service(&generator);
        let base = define(&generator, TypeBuilder::class("Demo.SealedBase").sealed());
        let options = ProxyGenerationOptions::default().with_base_type(base);
        let err = generator
            .create_interface_proxy_type_without_target(&iface, &[], &options)
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidBaseType { reason, .. } if reason.contains("sealed")));
    }

    #[test]
    fn test_missing_constructor_reports_argument_count() {
        let generator = generator();
        let class = define(&generator, TypeBuilder::class("Demo.Widget"));
        let err = generator
            .create_class_proxy(
                &class,
                &[],
                &ProxyGenerationOptions::default(),
                vec![Value::I32(1), Value::I32(2)],
                Vec::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ProxyError::NoMatchingConstructor {
                type_name: "Demo.Widget".to_string(),
                arg_count: 2,
            }
        );
    }

    #[test]
    fn test_same_request_reuses_type() {
        let generator = generator();
        let iface = service(&generator);
        let options = ProxyGenerationOptions::default();
        let first = generator
            .create_interface_proxy_type_without_target(&iface, &[], &options)
            .unwrap();
        let second = generator
            .create_interface_proxy_type_without_target(&iface, &[], &options)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(generator.scope().cached_count(), 1);
    }
}
