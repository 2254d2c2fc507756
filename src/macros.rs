/// Macro to simplify creating a closure compatible with
/// [`TaskRegistry::register_fn`](crate::registry::TaskRegistry::register_fn).
///
/// Takes an optional synchronous setup block and a mandatory async logic
/// block receiving the [`TaskContext`](crate::registry::TaskContext).
/// Handles the necessary boxing (`Box::pin`).
///
/// # Usage
///
/// ```ignore
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use taskwheel::task_fn;
///
/// let counter = Arc::new(AtomicUsize::new(0));
///
/// // With setup block (runs on every fire, before the async body):
/// let tick = task_fn! {
///     {
///         let fired = counter.clone();
///     }
///     |ctx| {
///         fired.fetch_add(1, Ordering::SeqCst);
///         tracing::info!(job = %ctx.job_name, "tick");
///         Ok(())
///     }
/// };
///
/// // Without setup block:
/// let noop = task_fn! {
///     |_ctx| { Ok(()) }
/// };
/// ```
#[macro_export]
macro_rules! task_fn {
  // Matcher 1: optional setup block followed by the |ctx| logic block
  (
    { $($setup_stmts:stmt);* $(;)? } // Setup block (optional contents)
    |$ctx:ident| $main_block:block    // Main logic block
  ) => {
    move |$ctx: $crate::registry::TaskContext| {
      // Execute setup statements
      $($setup_stmts)*

      let fut = async move { $main_block };

      Box::pin(fut) as $crate::registry::TaskFuture
    }
  };

  // Matcher 2: only the |ctx| logic block is provided
  (
    |$ctx:ident| $main_block:block
  ) => {
    move |$ctx: $crate::registry::TaskContext| {
      let fut = async move { $main_block };

      Box::pin(fut) as $crate::registry::TaskFuture
    }
  };
}
