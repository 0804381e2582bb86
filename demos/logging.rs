//! Example demonstrating logging capabilities
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use dependency_manager::prelude::*;
use futures::future::BoxFuture;

struct Database;

impl ServiceBehavior for Database {
    fn start(&self) -> BoxFuture<'static, std::result::Result<(), StartError>> {
        println!("  [Database] starting");
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> BoxFuture<'static, ()> {
        println!("  [Database] stopping");
        Box::pin(async {})
    }
}

struct UserService;

impl ServiceBehavior for UserService {
    fn start(&self) -> BoxFuture<'static, std::result::Result<(), StartError>> {
        println!("  [UserService] starting, database is now injected");
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

fn main() {
    // Initialize logging - JSON if logging-json enabled, pretty if logging-pretty
    #[cfg(feature = "logging")]
    {
        dependency_manager::logging::init();
    }

    println!("=== Dependency Manager Logging Demo ===\n");

    // Creating a manager logs manager construction at debug level.
    let manager = DependencyManager::new();

    let database_interface = InterfaceHash::from_name("Database");

    // Registering a service logs "InsertService" dispatch.
    manager.create_service(
        ServiceBuilder::new("Database").offers(database_interface, "Database"),
        Arc::new(()),
        Arc::new(Database),
    );

    // Registering a dependent service logs the resolver matching the
    // not-yet-active Database offer, then gating the start until it's online.
    manager.create_service(
        ServiceBuilder::new("UserService").requires(
            database_interface,
            "Database",
            DependencyFlags::REQUIRED,
        ),
        Arc::new(()),
        Arc::new(UserService),
    );

    // Drive the dispatch loop until the queue is empty. Each step (insert,
    // resolve, start, online) logs at debug level under the
    // "dependency_manager" target.
    manager.drain();

    println!("\nServices active: {}", manager.service_count());

    // Quitting logs the cascade of StopService events for every active
    // service, then the final queue-drained shutdown.
    manager.quit();
    manager.run(false);

    println!("\n=== Demo Complete ===");
    println!("Check the log output above to see structured logging in action!");
    println!("\nTip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
}
