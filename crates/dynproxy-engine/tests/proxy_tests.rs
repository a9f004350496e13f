//! Behavior of generated proxies: dispatch, by-ref arguments, targets,
//! mixins and selectors

mod common;

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{calls, counting, Fixture};
use dynproxy_engine::{
    interceptor_fn, proxy_util, Interceptor, InterceptorSelector, MethodBuilder, MethodDef,
    ProxyError, ProxyGenerationHook, ProxyGenerationOptions, TypeBuilder, TypeDef, TypeRef,
    Value, VmError,
};
use parking_lot::Mutex;

// ============================================================================
// Class Proxies
// ============================================================================

mod class_proxy {
    use super::*;

    #[test]
    fn test_every_virtual_call_runs_interceptor_once() {
        let f = Fixture::new();
        let (count, interceptor) = counting();
        let proxy = f
            .generator
            .create_class_proxy(
                &f.counter,
                &[],
                &ProxyGenerationOptions::default(),
                vec![Value::I32(10)],
                vec![interceptor],
            )
            .unwrap();

        assert_eq!(f.invoke(&proxy, "Next", vec![]).unwrap(), Value::I32(11));
        assert_eq!(f.invoke(&proxy, "Next", vec![]).unwrap(), Value::I32(12));
        assert_eq!(calls(&count), 2);

        assert_eq!(f.invoke(&proxy, "Peek", vec![]).unwrap(), Value::I32(12));
        assert_eq!(calls(&count), 3);
    }

    #[test]
    fn test_non_virtual_members_are_not_intercepted() {
        let f = Fixture::new();
        let (count, interceptor) = counting();
        let proxy = f
            .generator
            .create_class_proxy(
                &f.counter,
                &[],
                &ProxyGenerationOptions::default(),
                vec![Value::I32(0)],
                vec![interceptor],
            )
            .unwrap();
        assert_eq!(f.invoke(&proxy, "Fixed", vec![]).unwrap(), Value::I32(-1));
        assert_eq!(calls(&count), 0);
    }

    #[test]
    fn test_virtual_property_is_intercepted() {
        let f = Fixture::new();
        let (count, interceptor) = counting();
        let proxy = f
            .generator
            .create_class_proxy(
                &f.counter,
                &[],
                &ProxyGenerationOptions::default(),
                vec![Value::I32(0)],
                vec![interceptor],
            )
            .unwrap();
        let vm = f.generator.scope().vm();
        vm.set_property(&proxy, "Label", Value::from("tally")).unwrap();
        let label = vm.get_property(&proxy, "Label").unwrap();
        assert_eq!(label.as_str(), Some("tally"));
        assert_eq!(calls(&count), 2);
    }

    #[test]
    fn test_interceptor_can_short_circuit() {
        let f = Fixture::new();
        let replace = interceptor_fn(|invocation| {
            invocation.set_return_value(Value::I32(99));
            Ok(())
        });
        let proxy = f
            .generator
            .create_class_proxy(
                &f.counter,
                &[],
                &ProxyGenerationOptions::default(),
                vec![Value::I32(0)],
                vec![replace],
            )
            .unwrap();
        assert_eq!(f.invoke(&proxy, "Next", vec![]).unwrap(), Value::I32(99));
        // The base implementation never ran
        let vm = f.generator.scope().vm();
        assert_eq!(vm.get_property(&proxy, "Count").unwrap(), Value::I32(0));
    }

    #[test]
    fn test_class_proxy_is_its_own_target() {
        let f = Fixture::new();
        let proxy = f
            .generator
            .create_class_proxy(
                &f.counter,
                &[],
                &ProxyGenerationOptions::default(),
                vec![Value::I32(0)],
                Vec::new(),
            )
            .unwrap();
        let scope = f.generator.scope();
        assert!(proxy_util::is_proxy(&scope.types().read(), &proxy));
        let target = proxy_util::get_unproxied_instance(scope, &proxy).unwrap();
        assert!(target.value_eq(&proxy));
        assert_eq!(
            proxy_util::get_unproxied_type(scope, &proxy).unwrap(),
            Some(f.counter.clone())
        );
    }

    #[test]
    fn test_class_proxy_with_target_forwards() {
        let f = Fixture::new();
        let target = f.new_instance(&f.counter, vec![Value::I32(5)]);
        let (count, interceptor) = counting();
        let proxy = f
            .generator
            .create_class_proxy_with_target(
                &f.counter,
                &[],
                target.clone(),
                &ProxyGenerationOptions::default(),
                vec![Value::I32(0)],
                vec![interceptor],
            )
            .unwrap();
        assert_eq!(f.invoke(&proxy, "Next", vec![]).unwrap(), Value::I32(6));
        assert_eq!(calls(&count), 1);

        let vm = f.generator.scope().vm();
        assert_eq!(vm.get_property(&target, "Count").unwrap(), Value::I32(6));
        let unproxied = proxy_util::get_unproxied_instance(f.generator.scope(), &proxy).unwrap();
        assert!(unproxied.value_eq(&target));
    }

    #[test]
    fn test_hook_decides_what_is_intercepted() {
        struct SkipPeek;

        impl ProxyGenerationHook for SkipPeek {
            fn should_intercept_method(&self, _ty: &TypeDef, method: &MethodDef) -> bool {
                method.name != "Peek"
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let f = Fixture::new();
        let (count, interceptor) = counting();
        let options = ProxyGenerationOptions::new(Arc::new(SkipPeek));
        let proxy = f
            .generator
            .create_class_proxy(&f.counter, &[], &options, vec![Value::I32(3)], vec![interceptor])
            .unwrap();
        assert_eq!(f.invoke(&proxy, "Peek", vec![]).unwrap(), Value::I32(3));
        assert_eq!(calls(&count), 0);
        f.invoke(&proxy, "Next", vec![]).unwrap();
        assert_eq!(calls(&count), 1);
    }
}

// ============================================================================
// Interface Proxies
// ============================================================================

mod interface_proxy {
    use super::*;

    #[test]
    fn test_with_target_forwards_after_interceptors() {
        let f = Fixture::new();
        let target = f.new_instance(&f.adder, vec![]);
        let (count, interceptor) = counting();
        let proxy = f
            .generator
            .create_interface_proxy_with_target(
                &f.calculator,
                &[],
                &ProxyGenerationOptions::default(),
                target,
                vec![interceptor],
            )
            .unwrap();
        let sum = f.invoke(&proxy, "Add", vec![Value::I32(2), Value::I32(3)]).unwrap();
        assert_eq!(sum, Value::I32(5));
        assert_eq!(calls(&count), 1);
    }

    #[test]
    fn test_interceptors_see_and_change_arguments() {
        let f = Fixture::new();
        let target = f.new_instance(&f.adder, vec![]);
        let double_first = interceptor_fn(|invocation| {
            let first = invocation.argument(0)?.as_i32().unwrap_or_default();
            invocation.set_argument_value(0, Value::I32(first * 2))?;
            invocation.proceed()
        });
        let proxy = f
            .generator
            .create_interface_proxy_with_target(
                &f.calculator,
                &[],
                &ProxyGenerationOptions::default(),
                target,
                vec![double_first],
            )
            .unwrap();
        let sum = f.invoke(&proxy, "Add", vec![Value::I32(4), Value::I32(1)]).unwrap();
        assert_eq!(sum, Value::I32(9));
    }

    #[test]
    fn test_without_target_proceed_fails() {
        let f = Fixture::new();
        let (_, interceptor) = counting();
        let proxy = f
            .generator
            .create_interface_proxy_without_target(
                &f.calculator,
                &[],
                &ProxyGenerationOptions::default(),
                vec![interceptor],
            )
            .unwrap();
        let err = f
            .invoke(&proxy, "Add", vec![Value::I32(1), Value::I32(1)])
            .unwrap_err();
        assert!(matches!(err, VmError::NoTarget { method } if method.contains("Add")));
    }

    #[test]
    fn test_unset_value_return_is_reported() {
        let f = Fixture::new();
        let silent = interceptor_fn(|_| Ok(()));
        let proxy = f
            .generator
            .create_interface_proxy_without_target(
                &f.calculator,
                &[],
                &ProxyGenerationOptions::default(),
                vec![silent],
            )
            .unwrap();
        let err = f
            .invoke(&proxy, "Add", vec![Value::I32(1), Value::I32(1)])
            .unwrap_err();
        assert_eq!(err, VmError::MissingReturnValue);
    }

    #[test]
    fn test_generic_method_gets_type_arguments() {
        let f = Fixture::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = {
            let seen = seen.clone();
            interceptor_fn(move |invocation| {
                seen.lock().extend(invocation.generic_arguments());
                let value = invocation.argument(0)?;
                invocation.set_return_value(value);
                Ok(())
            })
        };
        let proxy = f
            .generator
            .create_interface_proxy_without_target(
                &f.echo,
                &[],
                &ProxyGenerationOptions::default(),
                vec![record],
            )
            .unwrap();
        let echoed = f
            .generator
            .scope()
            .vm()
            .invoke_generic(&proxy, "Echo", vec![TypeRef::string()], vec![Value::from("ping")])
            .unwrap();
        assert_eq!(echoed.as_str(), Some("ping"));
        assert_eq!(*seen.lock(), vec![TypeRef::string()]);
    }

    #[test]
    fn test_additional_interface_without_implementation() {
        let f = Fixture::new();
        let target = f.new_instance(&f.adder, vec![]);
        let greet = interceptor_fn(|invocation| {
            if invocation.method()?.name == "Greet" {
                invocation.set_return_value(Value::from("intercepted"));
                Ok(())
            } else {
                invocation.proceed()
            }
        });
        let proxy = f
            .generator
            .create_interface_proxy_with_target(
                &f.calculator,
                &[f.greeter.clone()],
                &ProxyGenerationOptions::default(),
                target,
                vec![greet],
            )
            .unwrap();
        let greeting = f.invoke(&proxy, "Greet", vec![]).unwrap();
        assert_eq!(greeting.as_str(), Some("intercepted"));
        assert!(f.generator.scope().vm().is_instance_of(&proxy, &f.greeter));
    }

    #[test]
    fn test_infrastructure_interface_cannot_be_requested() {
        let f = Fixture::new();
        let accessor = TypeRef::named(dynproxy_engine::TypeId::PROXY_TARGET_ACCESSOR);
        let err = f
            .generator
            .create_interface_proxy_type_without_target(
                &f.calculator,
                &[accessor],
                &ProxyGenerationOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ProxyError::InfrastructureConflict { .. }));
    }
}

// ============================================================================
// By-Reference Arguments
// ============================================================================

mod by_ref {
    use super::*;

    #[test]
    fn test_out_parameter_set_without_target() {
        let f = Fixture::new();
        let answer = interceptor_fn(|invocation| invocation.set_argument_value(0, Value::I32(42)));
        let proxy = f
            .generator
            .create_interface_proxy_without_target(
                &f.filler,
                &[],
                &ProxyGenerationOptions::default(),
                vec![answer],
            )
            .unwrap();
        let slot = Value::new_ref(Value::I32(0));
        f.invoke(&proxy, "Fill", vec![slot.clone()]).unwrap();
        assert_eq!(slot.as_pointer().unwrap().load(), Value::I32(42));
    }

    #[test]
    fn test_out_parameter_copied_back_when_interceptor_fails() {
        let f = Fixture::new();
        let failing = interceptor_fn(|invocation| {
            invocation.set_argument_value(0, Value::I32(7))?;
            Err(VmError::User("boom".to_string()))
        });
        let proxy = f
            .generator
            .create_interface_proxy_without_target(
                &f.filler,
                &[],
                &ProxyGenerationOptions::default(),
                vec![failing],
            )
            .unwrap();
        let slot = Value::new_ref(Value::I32(0));
        let err = f.invoke(&proxy, "Fill", vec![slot.clone()]).unwrap_err();
        assert_eq!(err, VmError::User("boom".to_string()));
        assert_eq!(slot.as_pointer().unwrap().load(), Value::I32(7));
    }

    #[test]
    fn test_out_parameter_written_by_target() {
        let f = Fixture::new();
        let filler_impl = f
            .generator
            .scope()
            .define(
                TypeBuilder::class("Demo.Filler")
                    .implements(f.filler.clone())
                    .method(
                        MethodBuilder::new("Fill")
                            .out_param("value", TypeRef::i32())
                            .as_virtual()
                            .native(|_, call| {
                                call.arg(0).expect_pointer("value")?.store(Value::I32(99));
                                Ok(Value::Null)
                            }),
                    ),
            )
            .unwrap();
        let target = f.new_instance(&TypeRef::named(filler_impl.id), vec![]);
        let (count, interceptor) = counting();
        let proxy = f
            .generator
            .create_interface_proxy_with_target(
                &f.filler,
                &[],
                &ProxyGenerationOptions::default(),
                target,
                vec![interceptor],
            )
            .unwrap();

        let slot = Value::new_ref(Value::I32(0));
        f.invoke(&proxy, "Fill", vec![slot.clone()]).unwrap();
        assert_eq!(slot.as_pointer().unwrap().load(), Value::I32(99));
        assert_eq!(calls(&count), 1);
    }

    #[test]
    fn test_ref_parameter_changed_by_base_implementation() {
        let f = Fixture::new();
        let doubler = f
            .generator
            .scope()
            .define(
                TypeBuilder::class("Demo.Doubler").method(
                    MethodBuilder::new("Double")
                        .ref_param("value", TypeRef::i32())
                        .as_virtual()
                        .native(|_, call| {
                            let value = call.arg(0);
                            let pointer = value.expect_pointer("value")?;
                            let doubled = pointer.load().as_i32().unwrap_or_default() * 2;
                            pointer.store(Value::I32(doubled));
                            Ok(Value::Null)
                        }),
                ),
            )
            .unwrap();
        let (count, interceptor) = counting();
        let proxy = f
            .generator
            .create_class_proxy(
                &TypeRef::named(doubler.id),
                &[],
                &ProxyGenerationOptions::default(),
                vec![],
                vec![interceptor],
            )
            .unwrap();

        let slot = Value::new_ref(Value::I32(3));
        f.invoke(&proxy, "Double", vec![slot.clone()]).unwrap();
        assert_eq!(slot.as_pointer().unwrap().load(), Value::I32(6));
        assert_eq!(calls(&count), 1);
    }
}

// ============================================================================
// Mixins
// ============================================================================

mod mixins {
    use super::*;

    #[test]
    fn test_mixin_members_reach_the_mixin() {
        let f = Fixture::new();
        let mixin = f.new_instance(&f.greeter_impl, vec![]);
        let options = ProxyGenerationOptions::default().with_mixin(mixin).unwrap();
        let (count, interceptor) = counting();
        let proxy = f
            .generator
            .create_class_proxy(&f.counter, &[], &options, vec![Value::I32(0)], vec![interceptor])
            .unwrap();
        assert!(f.generator.scope().vm().is_instance_of(&proxy, &f.greeter));
        let greeting = f.invoke(&proxy, "Greet", vec![]).unwrap();
        assert_eq!(greeting.as_str(), Some("hello"));
        assert_eq!(calls(&count), 1);
    }

    #[test]
    fn test_mixin_instances_do_not_change_the_type() {
        let f = Fixture::new();
        let first = ProxyGenerationOptions::default()
            .with_mixin(f.new_instance(&f.greeter_impl, vec![]))
            .unwrap();
        let second = ProxyGenerationOptions::default()
            .with_mixin(f.new_instance(&f.greeter_impl, vec![]))
            .unwrap();
        let a = f
            .generator
            .create_class_proxy_type(&f.counter, &[], &first)
            .unwrap();
        let b = f
            .generator
            .create_class_proxy_type(&f.counter, &[], &second)
            .unwrap();
        assert_eq!(a, b);
    }
}

// ============================================================================
// Selectors and Retargeting
// ============================================================================

mod selection {
    use super::*;

    struct NoneFor(&'static str);

    impl InterceptorSelector for NoneFor {
        fn select_interceptors(
            &self,
            _ty: Option<&TypeRef>,
            method: &MethodDef,
            interceptors: &[Arc<dyn Interceptor>],
        ) -> Vec<Arc<dyn Interceptor>> {
            if method.name == self.0 {
                Vec::new()
            } else {
                interceptors.to_vec()
            }
        }
    }

    #[test]
    fn test_selector_narrows_chain_per_method() {
        let f = Fixture::new();
        let (count, interceptor) = counting();
        let options = ProxyGenerationOptions::default().with_selector(Arc::new(NoneFor("Peek")));
        let proxy = f
            .generator
            .create_class_proxy(&f.counter, &[], &options, vec![Value::I32(1)], vec![interceptor])
            .unwrap();
        f.invoke(&proxy, "Peek", vec![]).unwrap();
        f.invoke(&proxy, "Peek", vec![]).unwrap();
        assert_eq!(calls(&count), 0);
        f.invoke(&proxy, "Next", vec![]).unwrap();
        assert_eq!(calls(&count), 1);
    }

    #[test]
    fn test_invocation_target_can_change_per_call() {
        let f = Fixture::new();
        let adder = f.new_instance(&f.adder, vec![]);
        let multiplier = f.new_instance(&f.multiplier, vec![]);
        let swap = {
            let multiplier = multiplier.clone();
            interceptor_fn(move |invocation| {
                invocation.change_invocation_target(multiplier.clone())?;
                invocation.proceed()
            })
        };
        let proxy = f
            .generator
            .create_interface_proxy_with_target_interface(
                &f.calculator,
                &[],
                &ProxyGenerationOptions::default(),
                adder.clone(),
                vec![swap],
            )
            .unwrap();
        let product = f.invoke(&proxy, "Add", vec![Value::I32(3), Value::I32(4)]).unwrap();
        assert_eq!(product, Value::I32(12));
        // The proxy itself still points at the original target
        let target = proxy_util::get_unproxied_instance(f.generator.scope(), &proxy).unwrap();
        assert!(target.value_eq(&adder));
    }

    #[test]
    fn test_proxy_target_change_sticks() {
        let f = Fixture::new();
        let adder = f.new_instance(&f.adder, vec![]);
        let multiplier = f.new_instance(&f.multiplier, vec![]);
        let switched = Arc::new(AtomicBool::new(false));
        let swap_once = {
            let multiplier = multiplier.clone();
            let switched = switched.clone();
            interceptor_fn(move |invocation| {
                if !switched.swap(true, Ordering::SeqCst) {
                    invocation.change_proxy_target(multiplier.clone())?;
                }
                invocation.proceed()
            })
        };
        let proxy = f
            .generator
            .create_interface_proxy_with_target_interface(
                &f.calculator,
                &[],
                &ProxyGenerationOptions::default(),
                adder,
                vec![swap_once],
            )
            .unwrap();
        f.invoke(&proxy, "Add", vec![Value::I32(2), Value::I32(5)]).unwrap();
        let later = f.invoke(&proxy, "Add", vec![Value::I32(2), Value::I32(5)]).unwrap();
        assert_eq!(later, Value::I32(10));
        let target = proxy_util::get_unproxied_instance(f.generator.scope(), &proxy).unwrap();
        assert!(target.value_eq(&multiplier));
    }

    #[test]
    fn test_retargeting_requires_target_interface_proxy() {
        let f = Fixture::new();
        let adder = f.new_instance(&f.adder, vec![]);
        let multiplier = f.new_instance(&f.multiplier, vec![]);
        let swap = interceptor_fn(move |invocation| {
            invocation.change_invocation_target(multiplier.clone())?;
            invocation.proceed()
        });
        let proxy = f
            .generator
            .create_interface_proxy_with_target(
                &f.calculator,
                &[],
                &ProxyGenerationOptions::default(),
                adder,
                vec![swap],
            )
            .unwrap();
        let err = f
            .invoke(&proxy, "Add", vec![Value::I32(1), Value::I32(2)])
            .unwrap_err();
        assert!(matches!(err, VmError::InvalidOperation(_)));
    }
}
