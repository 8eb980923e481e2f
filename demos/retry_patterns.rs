//! Retry Patterns Example
//!
//! Shows the ways to run a database operation under a retry policy:
//! - Startup configuration from `RETRY_*` environment variables
//! - An explicit policy
//! - The process-wide default policy
//! - Ad hoc overrides on top of the default
//! - Observing retries with a hook
//! - A circuit breaker inside the retry loop
//!
//! Run with: `RETRY_MAX_ATTEMPTS=4 RETRY_BASE_DELAY=0.05 cargo run --example retry_patterns`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dbretry::breaker::{circuit_breaker, BreakerConfig};
use dbretry::error::{ConnectionFields, QueryFields};
use dbretry::{
    get_default, initialize_default_policy, retry, retry_default, retry_with, retry_with_hooks,
    DatabaseError, ErrorKind, PolicyOverrides, RetryEvent, RetryPolicy, RetrySettings,
};

/// Fails with a connection error `failures` times, then returns `value`.
fn flaky<T: Clone>(
    failures: u32,
    value: T,
) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<T, DatabaseError>>) {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let operation = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        std::future::ready(if n < failures {
            Err(DatabaseError::connection(
                "connection reset by peer",
                ConnectionFields::new()
                    .param("host", "db.internal")
                    .param("password", "hunter2"),
            ))
        } else {
            Ok(value.clone())
        })
    };
    (attempts, operation)
}

// ==================== Startup Configuration ====================

/// Example 1: configure the default policy from the environment
fn example_startup_configuration() {
    println!("\n=== Example 1: Startup Configuration ===");

    let settings = match RetrySettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            println!("Ignoring bad retry settings ({}), using defaults", e);
            RetrySettings::default()
        }
    };
    println!("Settings: {:?}", settings);

    match initialize_default_policy(&settings) {
        Ok(policy) => println!("Default policy: {:?}", policy.describe()),
        Err(e) => println!("Default policy unchanged: {}", e),
    }
}

// ==================== Explicit Policy ====================

/// Example 2: retry under a policy built in place
async fn example_explicit_policy() {
    println!("\n=== Example 2: Explicit Policy ===");

    let policy = RetryPolicy::builder()
        .max_attempts(5)
        .base_delay(Duration::from_millis(50))
        .max_delay(Duration::from_secs(1))
        .jitter(0.1)
        .build()
        .expect("valid policy");

    let (attempts, operation) = flaky(2, "row 42");
    match retry(&policy, operation).await {
        Ok(row) => println!("Fetched {} after {} attempts", row, attempts.load(Ordering::SeqCst)),
        Err(e) => println!("Failed: {}", e),
    }

    // Non-transient kinds are returned straight away.
    let result: Result<(), _> = retry(&policy, || async {
        Err(DatabaseError::query(
            "syntax error at or near \"SELEC\"",
            QueryFields::new()
                .query("SELEC * FROM users")
                .execution_time(Duration::from_micros(1250)),
        )
        .with_code("42601"))
    })
    .await;
    if let Err(e) = result {
        println!("Query error after {:?} attempt(s): {}", e.retry_attempts(), e);
    }
}

// ==================== Default Policy ====================

/// Example 3: retry under the process-wide default
async fn example_default_policy() {
    println!("\n=== Example 3: Default Policy ===");

    let (attempts, operation) = flaky(1, 7u64);
    let result = retry_default(operation).await;
    println!(
        "Result {:?} after {} attempts (default allows {})",
        result.map_err(|e| e.kind()),
        attempts.load(Ordering::SeqCst),
        get_default().max_attempts()
    );
}

// ==================== Ad Hoc Overrides ====================

/// Example 4: tighten the default for one call site
async fn example_overrides() {
    println!("\n=== Example 4: Ad Hoc Overrides ===");

    let overrides = PolicyOverrides::new()
        .max_attempts(2)
        .timeout(Some(Duration::from_secs(2)));

    let (attempts, operation) = flaky(5, ());
    if let Err(e) = retry_with(&overrides, operation).await {
        println!(
            "Gave up after {} attempts in {:?}: {}",
            attempts.load(Ordering::SeqCst),
            e.retry_duration().unwrap_or_default(),
            e
        );
    }

    // Invalid overrides are reported before the operation runs.
    let (attempts, operation) = flaky(0, ());
    if let Err(e) = retry_with(&PolicyOverrides::new().jitter(2.0), operation).await {
        println!(
            "Rejected overrides ({} calls): {}",
            attempts.load(Ordering::SeqCst),
            e
        );
    }
}

// ==================== Retry with Hooks ====================

/// Example 5: observe every retry
async fn example_hooks() {
    println!("\n=== Example 5: Retry with Hooks ===");

    let policy = RetryPolicy::builder()
        .max_attempts(4)
        .base_delay(Duration::from_millis(20))
        .jitter(0.0)
        .build()
        .expect("valid policy");

    let (_, operation) = flaky(3, "committed");
    let result = retry_with_hooks(&policy, operation, |event: &RetryEvent<'_, DatabaseError>| {
        println!(
            "  Attempt {} failed ({}), waiting {:?}; {:?} elapsed",
            event.attempt,
            event.error.kind(),
            event.next_delay,
            event.elapsed
        );
    })
    .await;
    println!("Outcome: {:?}", result.map_err(|e| e.kind()));
}

// ==================== Circuit Breaker ====================

/// Example 6: stop hammering a dependency that is down
async fn example_circuit_breaker() {
    println!("\n=== Example 6: Circuit Breaker ===");

    let breaker = circuit_breaker(
        "orders-db",
        BreakerConfig::default()
            .with_failure_threshold(3)
            .with_recovery_timeout(Duration::from_secs(30))
            .with_excluded_kinds([ErrorKind::NotFound, ErrorKind::Validation]),
    )
    .expect("valid breaker config");
    let policy = RetryPolicy::builder()
        .max_attempts(10)
        .base_delay(Duration::from_millis(10))
        .build()
        .expect("valid policy");

    let attempts = Arc::new(AtomicU32::new(0));
    let result: Result<(), DatabaseError> = retry(&policy, || {
        let attempts = attempts.clone();
        breaker.call(move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(DatabaseError::new(ErrorKind::Connection, "connection refused"))
        })
    })
    .await;

    if let Err(e) = result {
        println!(
            "Stopped after {:?} attempts, {} reached the database: {}",
            e.retry_attempts(),
            attempts.load(Ordering::SeqCst),
            e
        );
    }
    println!("Breaker: {:?}", breaker.stats());
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("======================================");
    println!("       Retry Patterns Example         ");
    println!("======================================");

    example_startup_configuration();
    example_explicit_policy().await;
    example_default_policy().await;
    example_overrides().await;
    example_hooks().await;
    example_circuit_breaker().await;

    println!("\n======================================");
    println!("           Examples Complete           ");
    println!("======================================");
}
