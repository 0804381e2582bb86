//! Benchmarks for the dependency manager's dispatch loop: service
//! creation, dependency resolution, and steady-state event throughput.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use dependency_manager::prelude::*;
use futures::future::BoxFuture;
use std::any::TypeId;
use std::hint::black_box;

struct NoopService;

impl ServiceBehavior for NoopService {
    fn start(&self) -> BoxFuture<'static, std::result::Result<(), StartError>> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

fn bench_service_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("service_creation");

    group.bench_function("independent_service", |b| {
        b.iter(|| {
            let manager = DependencyManager::new();
            manager.create_service(ServiceBuilder::new("Noop"), Arc::new(()), Arc::new(NoopService));
            manager.drain();
            black_box(manager)
        })
    });

    group.bench_function("batch_100_independent_services", |b| {
        b.iter(|| {
            let manager = DependencyManager::new();
            for _ in 0..100 {
                manager.create_service(ServiceBuilder::new("Noop"), Arc::new(()), Arc::new(NoopService));
            }
            manager.drain();
            black_box(manager.service_count())
        })
    });

    group.finish();
}

fn bench_dependency_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency_resolution");

    group.bench_function("single_required_dependency", |b| {
        b.iter(|| {
            let manager = DependencyManager::new();
            let iface = InterfaceHash::from_name("IWidget");
            manager.create_service(
                ServiceBuilder::new("Consumer").requires(iface, "IWidget", DependencyFlags::REQUIRED),
                Arc::new(()),
                Arc::new(NoopService),
            );
            manager.create_service(ServiceBuilder::new("Provider").offers(iface, "IWidget"), Arc::new(()), Arc::new(NoopService));
            manager.drain();
            black_box(manager.service_count())
        })
    });

    group.bench_function("fan_out_10_consumers_one_provider", |b| {
        b.iter(|| {
            let manager = DependencyManager::new();
            let iface = InterfaceHash::from_name("IWidget");
            manager.create_service(
                ServiceBuilder::new("Provider").offers(iface, "IWidget"),
                Arc::new(()),
                Arc::new(NoopService),
            );
            for _ in 0..10 {
                manager.create_service(
                    ServiceBuilder::new("Consumer").requires(iface, "IWidget", DependencyFlags::REQUIRED),
                    Arc::new(()),
                    Arc::new(NoopService),
                );
            }
            manager.drain();
            black_box(manager.service_count())
        })
    });

    group.finish();
}

fn bench_event_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_throughput");
    group.throughput(Throughput::Elements(1000));

    struct Marker;

    group.bench_function("1000_custom_events_one_handler", |b| {
        b.iter(|| {
            let manager = DependencyManager::new();
            let id = manager.create_service(ServiceBuilder::new("Listener").offers(InterfaceHash::from_name("Listener"), "Listener"), Arc::new(()), Arc::new(NoopService));
            manager.drain();
            let _registration =
                manager.register_event_handler(id, TypeId::of::<Marker>(), |_event| Box::pin(async {}));
            manager.drain();

            for _ in 0..1000u32 {
                manager.push_event(
                    ServiceId::NONE,
                    EventKind::Custom { type_tag: TypeId::of::<Marker>(), payload: Arc::new(()) },
                );
            }
            manager.drain();
            black_box(manager.queue_size())
        })
    });

    group.finish();
}

fn bench_quit_cascade(c: &mut Criterion) {
    let mut group = c.benchmark_group("quit_cascade");

    group.bench_function("100_active_services", |b| {
        b.iter(|| {
            let manager = DependencyManager::new();
            for i in 0..100 {
                manager.create_service(
                    ServiceBuilder::new(format!("Service{i}")),
                    Arc::new(()),
                    Arc::new(NoopService),
                );
            }
            manager.drain();
            manager.quit();
            manager.run(false);
            black_box(manager.service_count())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_service_creation,
    bench_dependency_resolution,
    bench_event_throughput,
    bench_quit_cascade,
);
criterion_main!(benches);
