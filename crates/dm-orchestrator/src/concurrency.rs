//! Scatter-gather over independent tasks
//!
//! Used wherever a fixed set of independent operations must all run to
//! completion before the caller continues: dialing every host at bootstrap
//! and the post-recreate health sub-checks.

use std::future::Future;

use futures::future::join_all;
use tokio::task::JoinError;

/// Spawn every task onto the runtime and wait for all of them.
///
/// Results come back in the order the tasks were given. A task that
/// panics yields a `JoinError` in its slot; the remaining tasks still run
/// to completion.
pub async fn scatter_gather<I, F, T>(tasks: I) -> Vec<Result<T, JoinError>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();
    join_all(handles).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_task_order() {
        let tasks = [30u64, 10, 20].map(|delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            delay
        });

        let results: Vec<u64> = scatter_gather(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let tasks: Vec<std::future::Ready<()>> = Vec::new();
        assert!(scatter_gather(tasks).await.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_drop_siblings() {
        let tasks: Vec<futures::future::BoxFuture<'static, u32>> = vec![
            Box::pin(async { 1 }),
            Box::pin(async { panic!("boom") }),
            Box::pin(async { 3 }),
        ];

        let results = scatter_gather(tasks).await;

        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(results[1].as_ref().unwrap_err().is_panic());
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }
}
