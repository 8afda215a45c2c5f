//! Paginated describe fan-out
//!
//! The first page is fetched alone to learn the total count. The remaining
//! pages are spread over a bounded number of concurrent workers, each writing
//! into its own slot, and the slots are concatenated in page order once every
//! worker has finished.

use crate::error::Result;
use crate::retry::{RetryBudget, retry};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use tracing::debug;

/// Offset and limit of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

/// One page of a describe response
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of matches reported by the remote side
    pub total: usize,
}

/// Describe every object matching a query.
///
/// Each page call is retried under `budget`. Output order is page order,
/// never completion order.
pub async fn describe_all<T, F, Fut>(
    label: &str,
    budget: &RetryBudget,
    workers: usize,
    page_size: usize,
    fetch_page: F,
) -> Result<Vec<T>>
where
    F: Fn(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let page_size = page_size.max(1);

    let first_request = PageRequest {
        offset: 0,
        limit: page_size,
    };
    let first = retry(label, budget, || fetch_page(first_request)).await?;
    let pages = first.total.div_ceil(page_size).max(1);
    debug!(operation = %label, total = first.total, pages, workers, "Describing all pages");

    let mut slots: Vec<Option<Vec<T>>> = Vec::with_capacity(pages);
    slots.push(Some(first.items));
    slots.resize_with(pages, || None);

    let fetch_page = &fetch_page;
    let fetched: Vec<(usize, Vec<T>)> = stream::iter(1..pages)
        .map(|index| async move {
            let request = PageRequest {
                offset: index * page_size,
                limit: page_size,
            };
            let page = retry(label, budget, || fetch_page(request)).await?;
            Ok::<_, crate::error::CloudError>((index, page.items))
        })
        .buffer_unordered(workers.max(1))
        .try_collect()
        .await?;

    for (index, items) in fetched {
        slots[index] = Some(items);
    }

    Ok(slots.into_iter().flatten().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn budget() -> RetryBudget {
        RetryBudget::read()
    }

    fn page_of(total: usize, request: PageRequest) -> Page<usize> {
        let end = (request.offset + request.limit).min(total);
        Page {
            items: (request.offset..end).collect(),
            total,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_page_order_not_completion_order() {
        let completed = Mutex::new(Vec::new());
        let completed_ref = &completed;

        let items = describe_all("describe disks", &budget(), 4, 10, |request| async move {
            // later pages finish first
            tokio::time::sleep(Duration::from_millis(100 - request.offset as u64)).await;
            completed_ref.lock().unwrap().push(request.offset);
            Ok(page_of(45, request))
        })
        .await
        .unwrap();

        assert_eq!(items, (0..45).collect::<Vec<_>>());
        let order = completed.lock().unwrap().clone();
        assert_eq!(order[0], 0);
        assert_eq!(&order[1..], &[40, 30, 20, 10]);
    }

    #[tokio::test]
    async fn test_single_page_makes_one_call() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let items = describe_all("describe snapshots", &budget(), 4, 100, |request| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(page_of(7, request))
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_result() {
        let items: Vec<usize> = describe_all("describe domains", &budget(), 2, 20, |request| async move {
            Ok(page_of(0, request))
        })
        .await
        .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_fatal_page_error_fails_whole_listing() {
        let result = describe_all("describe disks", &budget(), 3, 10, |request| async move {
            if request.offset == 20 {
                return Err(CloudError::api("InvalidParameter", "bad offset"));
            }
            Ok(page_of(30, request))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), Some("InvalidParameter"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_page_error_is_retried() {
        let failures = AtomicUsize::new(0);
        let failures_ref = &failures;
        let items = describe_all("describe disks", &budget(), 2, 10, |request| async move {
            if request.offset == 10 && failures_ref.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(CloudError::api("RequestLimitExceeded", "slow down"));
            }
            Ok(page_of(20, request))
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 20);
        assert_eq!(failures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_retries_stop_at_given_budget() {
        let budget = RetryBudget {
            max_elapsed: Duration::from_secs(3),
            ..RetryBudget::read()
        };
        let err = describe_all("describe disks", &budget, 2, 10, |_| async {
            Err::<Page<usize>, _>(CloudError::api("RequestLimitExceeded", "slow down"))
        })
        .await
        .unwrap_err();

        // fails at 0s, 1s and 3s; the next backoff would overrun the budget
        let CloudError::RetriesExhausted { attempts, .. } = &err else {
            panic!("expected exhausted retries, got {err:?}");
        };
        assert_eq!(*attempts, 3);
    }
}
