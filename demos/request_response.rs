//! A request/response walkthrough: one service offers an interface, a
//! second requires it and, once injected, answers events the first
//! service fires at it.
//!
//! Run with:
//! ```bash
//! cargo run --example request_response
//! ```

use dependency_manager::prelude::*;
use futures::future::BoxFuture;
use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};

/// The event a client fires to ask the echo service to answer.
struct PingRequest {
    payload: u64,
}

/// A trivial service with no dependencies and nothing to await on start.
struct EchoService {
    replies: AtomicU64,
}

impl ServiceBehavior for EchoService {
    fn start(&self) -> BoxFuture<'static, std::result::Result<(), StartError>> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

/// Requires the echo interface before it starts, then fires a handful of
/// `PingRequest` events once injected.
struct ClientService;

impl ServiceBehavior for ClientService {
    fn start(&self) -> BoxFuture<'static, std::result::Result<(), StartError>> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

fn main() {
    let manager = DependencyManager::new();
    let echo_interface = InterfaceHash::from_name("EchoService");

    let echo = manager.create_service(
        ServiceBuilder::new("EchoService").offers(echo_interface, "EchoService"),
        Arc::new(()),
        Arc::new(EchoService { replies: AtomicU64::new(0) }),
    );

    // The echo service answers every PingRequest it sees while active,
    // recording the reply count on its own instance. The handler reaches
    // the manager via `current()` rather than capturing it directly,
    // since it runs on the dispatch loop's own thread anyway.
    let _registration = manager.register_event_handler(echo, TypeId::of::<PingRequest>(), move |event| {
        Box::pin(async move {
            let EventKind::Custom { payload, .. } = &event.kind else {
                return;
            };
            if let Some(ping) = payload.downcast_ref::<PingRequest>() {
                if let Some(manager) = DependencyManager::current() {
                    if let Some(instance) = manager.instance(echo) {
                        if let Some(service) = instance.downcast_ref::<EchoService>() {
                            service.replies.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
                println!("  [EchoService] answered ping({})", ping.payload);
            }
        })
    });

    // The client requires the echo interface, so its own start is gated
    // until the echo service is active.
    let client = manager.create_service(
        ServiceBuilder::new("ClientService").requires(echo_interface, "EchoService", DependencyFlags::REQUIRED),
        Arc::new(()),
        Arc::new(ClientService),
    );

    manager.drain();
    assert_eq!(manager.service_count(), 2);

    for payload in 0..3 {
        manager.push_event(
            client,
            EventKind::Custom {
                type_tag: TypeId::of::<PingRequest>(),
                payload: Arc::new(PingRequest { payload }),
            },
        );
    }
    manager.drain();

    if let Some(instance) = manager.instance(echo) {
        if let Some(service) = instance.downcast_ref::<EchoService>() {
            println!("\nEchoService answered {} request(s)", service.replies.load(Ordering::SeqCst));
        }
    }

    manager.quit();
    manager.run(false);
    assert_eq!(manager.service_count(), 0);
}
