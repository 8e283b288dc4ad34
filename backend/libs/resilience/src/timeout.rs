/// Deadline wrapper for async operations
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("Operation timed out after {0:?}")]
    Elapsed(Duration),
}

/// Absolute point in time after which in-flight work is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Run `future` to completion, or drop it once `deadline` passes.
///
/// With no deadline the future simply runs to completion.
pub async fn with_deadline<F, T>(deadline: Option<Deadline>, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline.instant(), future)
            .await
            .map_err(|_| TimeoutError::Elapsed(deadline.budget())),
        None => Ok(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_success() {
        let deadline = Some(Deadline::after(Duration::from_secs(1)));
        let result = with_deadline(deadline, async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapsed() {
        let result = with_deadline(Some(Deadline::after(Duration::from_millis(10))), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert_eq!(result, Err(TimeoutError::Elapsed(Duration::from_millis(10))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deadline_runs_to_completion() {
        let result = with_deadline(None, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "done"
        })
        .await;

        assert_eq!(result, Ok("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let deadline = Deadline::after(Duration::from_millis(5));
        assert!(!deadline.is_expired());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(deadline.is_expired());
    }
}
