pub mod builders;
pub mod fake_remote;

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt};

use taskfeed::engine::{ResultDispatcher, TaskEvent};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=taskfeed=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Receive exactly `n` events from the dispatcher (5-second timeout).
pub async fn recv_events(dispatcher: &mut ResultDispatcher, n: usize) -> Vec<TaskEvent> {
    with_timeout(async {
        let mut events = Vec::with_capacity(n);
        while events.len() < n {
            match dispatcher.recv().await {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    })
    .await
}

/// Receive events until `pred` matches one (included in the result).
pub async fn recv_until<P>(dispatcher: &mut ResultDispatcher, mut pred: P) -> Vec<TaskEvent>
where
    P: FnMut(&TaskEvent) -> bool,
{
    with_timeout(async {
        let mut events = Vec::new();
        while let Some(event) = dispatcher.recv().await {
            let done = pred(&event);
            events.push(event);
            if done {
                break;
            }
        }
        events
    })
    .await
}
