use std::future::pending;
use tokio::time::{Instant, sleep_until};

/// Sleeps until `deadline`, or forever when there is none. Meant as a
/// `tokio::select!` arm for an optional timer.
pub(crate) async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
