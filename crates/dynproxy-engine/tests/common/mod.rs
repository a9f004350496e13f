//! Source types shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dynproxy_engine::error::VmError;
use dynproxy_engine::{
    interceptor_fn, Interceptor, MethodBuilder, ProxyGenerator, TypeBuilder, TypeRef, Value,
};

pub struct Fixture {
    pub generator: ProxyGenerator,
    pub calculator: TypeRef,
    pub adder: TypeRef,
    pub multiplier: TypeRef,
    pub counter: TypeRef,
    pub greeter: TypeRef,
    pub greeter_impl: TypeRef,
    pub filler: TypeRef,
    pub echo: TypeRef,
}

fn int(value: &Value) -> i32 {
    value.as_i32().unwrap_or_default()
}

impl Fixture {
    pub fn new() -> Self {
        let generator = ProxyGenerator::new().unwrap();
        let scope = generator.scope().clone();
        let named = |builder: TypeBuilder| TypeRef::named(scope.define(builder).unwrap().id);

        let calculator = named(
            TypeBuilder::interface("Demo.ICalculator").method(
                MethodBuilder::new("Add")
                    .param("a", TypeRef::i32())
                    .param("b", TypeRef::i32())
                    .returns(TypeRef::i32()),
            ),
        );
        let adder = named(
            TypeBuilder::class("Demo.Adder")
                .implements(calculator.clone())
                .method(
                    MethodBuilder::new("Add")
                        .param("a", TypeRef::i32())
                        .param("b", TypeRef::i32())
                        .returns(TypeRef::i32())
                        .as_virtual()
                        .native(|_, call| Ok(Value::I32(int(&call.arg(0)) + int(&call.arg(1))))),
                ),
        );
        let multiplier = named(
            TypeBuilder::class("Demo.Multiplier")
                .implements(calculator.clone())
                .method(
                    MethodBuilder::new("Add")
                        .param("a", TypeRef::i32())
                        .param("b", TypeRef::i32())
                        .returns(TypeRef::i32())
                        .as_virtual()
                        .native(|_, call| Ok(Value::I32(int(&call.arg(0)) * int(&call.arg(1))))),
                ),
        );

        let counter = named(
            TypeBuilder::class("Demo.Counter")
                .auto_property("Count", TypeRef::i32())
                .virtual_auto_property("Label", TypeRef::string())
                .constructor(
                    MethodBuilder::constructor()
                        .param("start", TypeRef::i32())
                        .native(|vm, call| {
                            vm.set_property(&call.this, "Count", call.arg(0))?;
                            Ok(Value::Null)
                        }),
                )
                .method(
                    MethodBuilder::new("Next")
                        .returns(TypeRef::i32())
                        .as_virtual()
                        .native(|vm, call| {
                            let next = int(&vm.get_property(&call.this, "Count")?) + 1;
                            vm.set_property(&call.this, "Count", Value::I32(next))?;
                            Ok(Value::I32(next))
                        }),
                )
                .method(
                    MethodBuilder::new("Peek")
                        .returns(TypeRef::i32())
                        .as_virtual()
                        .native(|vm, call| vm.get_property(&call.this, "Count")),
                )
                .method(
                    MethodBuilder::new("Fixed")
                        .returns(TypeRef::i32())
                        .native(|_, _| Ok(Value::I32(-1))),
                ),
        );

        let greeter = named(
            TypeBuilder::interface("Demo.IGreeter")
                .method(MethodBuilder::new("Greet").returns(TypeRef::string())),
        );
        let greeter_impl = named(
            TypeBuilder::class("Demo.Greeter")
                .implements(greeter.clone())
                .method(
                    MethodBuilder::new("Greet")
                        .returns(TypeRef::string())
                        .as_virtual()
                        .native(|_, _| Ok(Value::from("hello"))),
                ),
        );

        let filler = named(
            TypeBuilder::interface("Demo.IFiller")
                .method(MethodBuilder::new("Fill").out_param("value", TypeRef::i32())),
        );

        let echo = named(
            TypeBuilder::interface("Demo.IEcho").method(
                MethodBuilder::new("Echo")
                    .generic_param("T")
                    .param("value", TypeRef::method_param(0))
                    .returns(TypeRef::method_param(0)),
            ),
        );

        Self {
            generator,
            calculator,
            adder,
            multiplier,
            counter,
            greeter,
            greeter_impl,
            filler,
            echo,
        }
    }

    pub fn new_instance(&self, ty: &TypeRef, args: Vec<Value>) -> Value {
        self.generator.scope().vm().construct(ty, args).unwrap()
    }

    pub fn invoke(&self, proxy: &Value, name: &str, args: Vec<Value>) -> Result<Value, VmError> {
        self.generator.scope().vm().invoke(proxy, name, args)
    }
}

/// Interceptor that counts calls and proceeds
pub fn counting() -> (Arc<AtomicUsize>, Arc<dyn Interceptor>) {
    let count = Arc::new(AtomicUsize::new(0));
    let interceptor = {
        let count = count.clone();
        interceptor_fn(move |invocation| {
            count.fetch_add(1, Ordering::SeqCst);
            invocation.proceed()
        })
    };
    (count, interceptor)
}

pub fn calls(count: &AtomicUsize) -> usize {
    count.load(Ordering::SeqCst)
}
