/// Resilience primitives for content distribution
///
/// This library provides:
/// - **Retry**: a stateless capped exponential backoff policy and an executor
///   that runs attempts strictly in sequence through an injectable [`Sleeper`]
/// - **Deadline**: abandon in-flight work once an absolute deadline passes
/// - **Presets**: tuned policies for edge push and origin pull
///
/// # Example: push with retry
///
/// ```rust,no_run
/// use resilience::{presets, retry_classified, TokioSleeper};
///
/// #[tokio::main]
/// async fn main() {
///     let policy = presets::edge_push_policy();
///
///     let result = retry_classified(
///         &policy,
///         &TokioSleeper,
///         || async {
///             // Your delivery call here
///             Ok::<_, String>(())
///         },
///         |_err| true,
///     )
///     .await;
/// }
/// ```

pub mod metrics;
pub mod presets;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use presets::{edge_push_policy, origin_pull_policy};
pub use retry::{
    retry_classified, with_retry, Attempted, RetryError, RetryPolicy, Sleeper, TokioSleeper,
};
pub use timeout::{with_deadline, Deadline, TimeoutError};
