use anyhow::{anyhow, Result};
use futures_util::future::join_all;
use log::warn;
use std::future::Future;

/// Runs every task concurrently and waits for all of them to settle.
/// Results keep submission order.
pub async fn settle_all<I, F, T>(tasks: I) -> Vec<Result<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T>>,
{
    join_all(tasks).await
}

/// Fan-out/fan-in with partial tolerance: succeeds with every successful value
/// (in submission order) when at least one task succeeded, otherwise fails with
/// the first failure.
pub async fn settle_at_least_one<I, F, T>(tasks: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T>>,
{
    let settled = settle_all(tasks).await;
    let total = settled.len();

    let mut successes = Vec::new();
    let mut first_error = None;
    for result in settled {
        match result {
            Ok(value) => successes.push(value),
            Err(e) => {
                warn!("Batch task failed: {:#}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    if !successes.is_empty() {
        return Ok(successes);
    }
    Err(first_error.unwrap_or_else(|| anyhow!("No tasks were submitted (0 of {})", total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn task(i: usize, ok: bool, delay_ms: u64) -> Result<usize> {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if ok {
            Ok(i)
        } else {
            Err(anyhow!("task {} failed", i))
        }
    }

    #[tokio::test]
    async fn test_one_success_of_four_is_enough() {
        let tasks = vec![task(0, false, 5), task(1, false, 1), task(2, true, 3), task(3, false, 0)];
        let values = settle_at_least_one(tasks).await.unwrap();
        assert_eq!(values, vec![2]);
    }

    #[tokio::test]
    async fn test_all_failures_surface_first_submitted_error() {
        let tasks = vec![task(0, false, 10), task(1, false, 0), task(2, false, 5), task(3, false, 1)];
        let err = settle_at_least_one(tasks).await.unwrap_err();
        assert_eq!(err.to_string(), "task 0 failed");
    }

    #[tokio::test]
    async fn test_successes_keep_submission_order() {
        let tasks = vec![task(0, true, 10), task(1, false, 0), task(2, true, 0)];
        assert_eq!(settle_at_least_one(tasks).await.unwrap(), vec![0, 2]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_an_error() {
        let tasks: Vec<std::future::Ready<Result<u8>>> = Vec::new();
        assert!(settle_at_least_one(tasks).await.is_err());
    }

    #[tokio::test]
    async fn test_settle_all_reports_every_outcome() {
        let results = settle_all(vec![task(0, true, 0), task(1, false, 0)]).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
