// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use signal_hook::SigId;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::debug;

/// Cheap, cloneable view of an [`InterruptLatch`] flag.
#[derive(Debug, Clone)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    /// Sets the flag. Idempotent; there is no way to clear it.
    pub fn trip(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One-shot stop request for a single session.
///
/// The flag is set asynchronously (signal handler or key event) and only read by the
/// session loop. Signal handlers registered through [`InterruptLatch::install`] are
/// removed when the latch is dropped, so the next session starts clean.
///
/// A SIGINT/SIGTERM that arrives after the latch is already tripped exits the process with
/// `128 + signal`, so a session blocked in a decode can always be killed from the
/// terminal. After the latch is dropped signal-hook keeps its (now empty) handler
/// installed: until the next latch is installed these signals are ignored, which covers
/// only the short registry save and summary that follow a session.
pub struct InterruptLatch {
    flag: Arc<AtomicBool>,
    sig_ids: Vec<SigId>,
}

impl InterruptLatch {
    /// A latch with no signal handlers attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            sig_ids: Vec::new(),
        }
    }

    /// A latch tripped by SIGINT and SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if a signal handler cannot be registered.
    pub fn install() -> Result<Self> {
        let mut latch = Self::new();
        for (signal, name) in [(SIGINT, "SIGINT"), (SIGTERM, "SIGTERM")] {
            // Registered first so it sees the flag as the previous signal left it.
            let exit_status = 128 + signal;
            let id = signal_hook::flag::register_conditional_shutdown(
                signal,
                exit_status,
                Arc::clone(&latch.flag),
            )
            .with_context(|| format!("failed to register {name} shutdown handler"))?;
            latch.sig_ids.push(id);

            let id = signal_hook::flag::register(signal, Arc::clone(&latch.flag))
                .with_context(|| format!("failed to register {name} handler"))?;
            latch.sig_ids.push(id);
        }
        Ok(latch)
    }

    #[must_use]
    pub fn handle(&self) -> InterruptHandle {
        InterruptHandle(Arc::clone(&self.flag))
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl Default for InterruptLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptLatch {
    fn drop(&mut self) {
        for id in self.sig_ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
        if self.is_set() {
            debug!("interrupt latch released after being tripped");
        }
    }
}
