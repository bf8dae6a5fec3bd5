use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use stacked_errors::{Error, Result, StackableErr};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

/// Set by the ctrl-c handler that [std_init] installs
pub static CTRLC_ISSUED: AtomicBool = AtomicBool::new(false);

/// Sets up `tracing_subscriber` and the ctrl-c handler.
///
/// The filter is taken from `RUST_LOG` and falls back to "info". Events go to
/// stderr, keeping stdout for command output only.
pub fn std_init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    ctrlc::set_handler(|| {
        CTRLC_ISSUED.store(true, Ordering::SeqCst);
    })
    .stack_err("std_init() -> could not set the ctrl-c handler")?;
    Ok(())
}

/// Returns if `CTRLC_ISSUED` has been set, and resets it to `false`
pub fn ctrlc_issued_reset() -> bool {
    CTRLC_ISSUED.swap(false, Ordering::SeqCst)
}

/// Delay between polls of a service that is still settling
pub const STD_POLL_DELAY: Duration = Duration::from_secs(5);

/// Repeatedly polls `f` until it returns an `Ok` which is returned, or
/// `num_tries` is reached in which a timeout error is returned
pub async fn wait_for_ok<F: FnMut() -> Fut, Fut: Future<Output = Result<T>>, T>(
    num_tries: u64,
    delay: Duration,
    mut f: F,
) -> Result<T> {
    for _ in 0..num_tries {
        if let Ok(o) = f().await {
            return Ok(o)
        }
        sleep(delay).await;
    }
    Err(Error::timeout()).stack_err_with(|| {
        format!("wait_for_ok(num_tries: {num_tries}, delay: {delay:?}) timeout")
    })
}
