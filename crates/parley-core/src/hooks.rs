//! Ordered queues of setup/teardown units.
//!
//! A failing unit never stops the queue: its error is collected and the next
//! unit runs. Panics count as failures.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::warn;

/// A re-runnable, possibly suspending unit of user code.
pub type HookUnit = Box<dyn FnMut() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A unit that failed or panicked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("hook #{index} failed: {message}")]
pub struct HookError {
    /// Position of the unit in its queue.
    pub index: usize,
    pub message: String,
}

/// FIFO of hook units.
#[derive(Default)]
pub struct HookQueue {
    units: Vec<HookUnit>,
}

impl HookQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a unit built from a closure returning a future.
    pub fn enqueue<F, Fut>(&mut self, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.units.push(Box::new(move || f().boxed()));
    }

    pub fn enqueue_unit(&mut self, unit: HookUnit) {
        self.units.push(unit);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Runs every unit in order and keeps them for the next run.
    ///
    /// Returns the collected errors. An empty queue completes without
    /// suspending.
    pub async fn run_all(&mut self) -> Vec<HookError> {
        let mut errors = Vec::new();
        for (index, unit) in self.units.iter_mut().enumerate() {
            if let Err(message) = run_unit(unit).await {
                warn!(hook = index, error = %message, "Hook failed");
                errors.push(HookError { index, message });
            }
        }
        errors
    }

    /// Runs every unit in order, emptying the queue.
    pub async fn drain(&mut self) -> Vec<HookError> {
        let errors = self.run_all().await;
        self.units.clear();
        errors
    }

    /// Moves the units out, leaving this queue empty.
    pub fn take(&mut self) -> HookQueue {
        std::mem::take(self)
    }
}

impl std::fmt::Debug for HookQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookQueue")
            .field("len", &self.units.len())
            .finish()
    }
}

async fn run_unit(unit: &mut HookUnit) -> Result<(), String> {
    let future = std::panic::catch_unwind(AssertUnwindSafe(|| unit())).map_err(panic_message)?;
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(payload) => Err(panic_message(payload)),
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
