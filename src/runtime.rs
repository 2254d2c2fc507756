//! Runs an async unit of work from a call site that may or may not already
//! be inside a Tokio runtime.
//!
//! Worker threads, embedding applications, and plain `main` functions all
//! end up needing to drive one future to completion synchronously. Blocking
//! the calling thread is only safe when no runtime is live on it; when one
//! is, the future is moved to a dedicated OS thread owning its own private
//! current-thread runtime, and the caller blocks on a channel join instead.
//! The ambient runtime is never entered, blocked, or shut down from here.
//!
//! The private runtime is dropped only after the future has fully
//! completed, so any per-run resource the future opens is released inside
//! the future itself, strictly before its loop is torn down.

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::runtime::{Builder as RuntimeBuilder, Handle};

use crate::error::AdapterError;

/// Runs `fut` to completion and blocks the calling thread until it
/// finishes.
///
/// Safe to call from any thread: with no ambient runtime the future runs on
/// a private runtime built in place; with one, it runs on a dedicated
/// bridge thread and the result (or captured panic) is joined back across
/// the thread boundary.
pub fn run_blocking<F, T>(fut: F) -> Result<T, AdapterError>
where
  F: Future<Output = T> + Send + 'static,
  T: Send + 'static,
{
  if Handle::try_current().is_err() {
    return run_isolated(fut);
  }

  // A runtime is live on this thread. Blocking it here would stall its
  // tasks (and deadlock a current-thread runtime), so the future gets its
  // own thread and loop.
  let (tx, rx) = std::sync::mpsc::channel();
  let thread = std::thread::Builder::new()
    .name("taskwheel-bridge".to_string())
    .spawn(move || {
      let _ = tx.send(run_isolated(fut));
    })
    .map_err(|e| AdapterError::Startup(e.to_string()))?;

  match rx.recv() {
    Ok(result) => {
      let _ = thread.join();
      result
    }
    Err(_) => match thread.join() {
      Err(payload) => Err(AdapterError::Panicked(panic_message(payload.as_ref()))),
      Ok(()) => Err(AdapterError::ThreadLost),
    },
  }
}

/// Async-context variant: delegates the same bridging to a blocking-capable
/// thread so the caller's executor thread keeps making progress.
pub async fn run_from_async<F, T>(fut: F) -> Result<T, AdapterError>
where
  F: Future<Output = T> + Send + 'static,
  T: Send + 'static,
{
  match tokio::task::spawn_blocking(move || run_isolated(fut)).await {
    Ok(result) => result,
    Err(join_err) => {
      if join_err.is_panic() {
        Err(AdapterError::Panicked(panic_message(
          join_err.into_panic().as_ref(),
        )))
      } else {
        Err(AdapterError::ThreadLost)
      }
    }
  }
}

/// Builds a throwaway current-thread runtime, drives `fut` on it, and
/// converts a panicking future into [`AdapterError::Panicked`]. The runtime
/// drops with this call frame, after the future has completed.
fn run_isolated<F, T>(fut: F) -> Result<T, AdapterError>
where
  F: Future<Output = T>,
{
  let run = || -> Result<T, AdapterError> {
    let runtime = RuntimeBuilder::new_current_thread()
      .enable_all()
      .build()
      .map_err(|e| AdapterError::Startup(e.to_string()))?;
    Ok(runtime.block_on(fut))
  };
  match catch_unwind(AssertUnwindSafe(run)) {
    Ok(result) => result,
    Err(payload) => Err(AdapterError::Panicked(panic_message(payload.as_ref()))),
  }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(text) = payload.downcast_ref::<&str>() {
    (*text).to_string()
  } else if let Some(text) = payload.downcast_ref::<String>() {
    text.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
