//! Cooperative cancellation for the run loops
//!
//! Loops check a [`CancelToken`] once per iteration. Ctrl+C cancels the token;
//! a second Ctrl+C exits immediately, for a loop stuck in a write.

use anyhow::{Context, Result};
use colored::Colorize;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit status used when the user forces termination
const FORCED_EXIT_CODE: i32 = 130;

/// Shared stop flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancel `token` on the first Ctrl+C, exit the process on the second
pub fn cancel_on_interrupt(token: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .with_context(|| "Failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    debug!("Ctrl+C listener unavailable");
                    return;
                }
                eprintln!("\n{}", "Stopping (press Ctrl+C again to force)...".yellow());
                token.cancel();

                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(FORCED_EXIT_CODE);
                }
            });
        })
        .with_context(|| "Failed to set Ctrl+C handler")?;

    Ok(())
}
