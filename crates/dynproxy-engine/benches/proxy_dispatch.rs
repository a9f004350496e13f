use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dynproxy_engine::{
    interceptor_fn, MethodBuilder, ProxyGenerationOptions, ProxyGenerator, TypeBuilder, TypeRef,
    Value,
};

fn setup() -> (ProxyGenerator, TypeRef, TypeRef) {
    let generator = ProxyGenerator::new().unwrap();
    let scope = generator.scope().clone();
    let calculator = scope
        .define(
            TypeBuilder::interface("Bench.ICalculator").method(
                MethodBuilder::new("Add")
                    .param("a", TypeRef::i32())
                    .param("b", TypeRef::i32())
                    .returns(TypeRef::i32()),
            ),
        )
        .unwrap();
    let adder = scope
        .define(
            TypeBuilder::class("Bench.Adder")
                .implements(TypeRef::named(calculator.id))
                .method(
                    MethodBuilder::new("Add")
                        .param("a", TypeRef::i32())
                        .param("b", TypeRef::i32())
                        .returns(TypeRef::i32())
                        .as_virtual()
                        .native(|_, call| {
                            let a = call.arg(0).as_i32().unwrap_or_default();
                            let b = call.arg(1).as_i32().unwrap_or_default();
                            Ok(Value::I32(a + b))
                        }),
                ),
        )
        .unwrap();
    (
        generator,
        TypeRef::named(calculator.id),
        TypeRef::named(adder.id),
    )
}

fn bench_cached_creation(c: &mut Criterion) {
    let (generator, calculator, adder) = setup();
    let options = ProxyGenerationOptions::default();
    let target = generator.scope().vm().construct(&adder, Vec::new()).unwrap();
    // Warm the cache
    generator
        .create_interface_proxy_type_with_target(&calculator, &[], &adder, &options)
        .unwrap();

    c.bench_function("create_cached_interface_proxy", |b| {
        b.iter(|| {
            generator
                .create_interface_proxy_with_target(
                    black_box(&calculator),
                    &[],
                    &options,
                    target.clone(),
                    Vec::new(),
                )
                .unwrap()
        });
    });
}

fn bench_intercepted_call(c: &mut Criterion) {
    let (generator, calculator, adder) = setup();
    let options = ProxyGenerationOptions::default();
    let vm = generator.scope().vm();
    let target = vm.construct(&adder, Vec::new()).unwrap();

    let mut group = c.benchmark_group("intercepted_call");
    for depth in [0usize, 1, 4] {
        let interceptors = (0..depth)
            .map(|_| interceptor_fn(|invocation| invocation.proceed()))
            .collect();
        let proxy = generator
            .create_interface_proxy_with_target(
                &calculator,
                &[],
                &options,
                target.clone(),
                interceptors,
            )
            .unwrap();
        group.bench_with_input(BenchmarkId::new("interceptors", depth), &proxy, |b, proxy| {
            b.iter(|| {
                vm.invoke(
                    black_box(proxy),
                    "Add",
                    vec![Value::I32(1), Value::I32(2)],
                )
                .unwrap()
            });
        });
    }
    group.finish();

    c.bench_function("direct_call", |b| {
        b.iter(|| {
            vm.invoke(black_box(&target), "Add", vec![Value::I32(1), Value::I32(2)])
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_cached_creation, bench_intercepted_call);
criterion_main!(benches);
