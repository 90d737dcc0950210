//! The infinite/paginated query controller: an ordered list of pages fetched on demand via
//! `getNextPageParam`/`getPreviousPageParam`, with an optional page-count window.
//!
//! Shares `Query`'s single-in-flight-fetch discipline (one `tokio::sync::Mutex` gate) but
//! tracks a `Vec<Page<_>>` instead of one value, since each page can independently succeed
//! or fail.

use crate::config::InfiniteQueryOptions;
use crate::error::{Error, Result};
use crate::query::QueryStatus;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

/// One fetched (or failed) page.
#[derive(Debug, Clone)]
pub struct Page<TParam, TData> {
    pub param: TParam,
    pub data: Option<TData>,
    pub error: Option<String>,
}

/// A snapshot of an infinite query's page list and in-flight status, broadcast to
/// subscribers the same way [`crate::query::QueryState`] is.
#[derive(Debug, Clone)]
pub struct InfiniteQueryState<TParam, TData> {
    pub status: QueryStatus,
    pub pages: Vec<Page<TParam, TData>>,
    pub is_fetching_next: bool,
    pub is_fetching_previous: bool,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl<TParam, TData> Default for InfiniteQueryState<TParam, TData> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            pages: Vec::new(),
            is_fetching_next: false,
            is_fetching_previous: false,
            has_next_page: true,
            has_previous_page: false,
        }
    }
}

type PageFetcher<TParam, TData> =
    Arc<dyn Fn(TParam) -> BoxFuture<'static, Result<TData>> + Send + Sync>;
type NextParamFn<TParam, TData> =
    Arc<dyn Fn(&[Page<TParam, TData>]) -> Option<TParam> + Send + Sync>;
type PrevParamFn<TParam, TData> =
    Arc<dyn Fn(&[Page<TParam, TData>]) -> Option<TParam> + Send + Sync>;

/// A paginated query. Generic over the page parameter (cursor, offset, ...) and the page
/// payload.
pub struct InfiniteQuery<TParam, TData> {
    options: InfiniteQueryOptions,
    fetcher: PageFetcher<TParam, TData>,
    get_next_page_param: NextParamFn<TParam, TData>,
    get_previous_page_param: Option<PrevParamFn<TParam, TData>>,
    state_tx: Arc<watch::Sender<InfiniteQueryState<TParam, TData>>>,
    fetch_lock: Arc<AsyncMutex<()>>,
    subscriber_count: Arc<AtomicU32>,
}

impl<TParam, TData> InfiniteQuery<TParam, TData>
where
    TParam: Clone + Send + Sync + 'static,
    TData: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        options: InfiniteQueryOptions,
        fetcher: PageFetcher<TParam, TData>,
        get_next_page_param: NextParamFn<TParam, TData>,
        get_previous_page_param: Option<PrevParamFn<TParam, TData>>,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(InfiniteQueryState::default());
        let query = Self {
            options,
            fetcher,
            get_next_page_param,
            get_previous_page_param,
            state_tx: Arc::new(state_tx),
            fetch_lock: Arc::new(AsyncMutex::new(())),
            subscriber_count: Arc::new(AtomicU32::new(0)),
        };
        query.state_tx.send_modify(|state| {
            state.has_previous_page = query.get_previous_page_param.is_some();
        });
        query
    }

    #[must_use]
    pub fn subscribe_to_state(&self) -> watch::Receiver<InfiniteQueryState<TParam, TData>> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn current_state(&self) -> InfiniteQueryState<TParam, TData> {
        self.state_tx.borrow().clone()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> u32 {
        self.subscriber_count.load(Ordering::Acquire)
    }

    /// Register a subscriber. The first subscriber on a query with no pages yet triggers an
    /// auto-fetch of the first page, using the initial next-param computed from an empty page
    /// list, mirroring [`crate::query::Query::subscribe`].
    pub async fn subscribe(&self) -> Result<watch::Receiver<InfiniteQueryState<TParam, TData>>> {
        let previous = self.subscriber_count.fetch_add(1, Ordering::AcqRel);
        let receiver = self.state_tx.subscribe();

        if previous == 0 && self.current_state().pages.is_empty() {
            if let Some(param) = self.next_param() {
                self.fetch_first_page(param).await?;
            }
        }

        Ok(receiver)
    }

    /// Unregister a subscriber. Does not cancel any in-flight fetch or clear pages: a query
    /// with zero subscribers simply stops auto-fetching until the next `subscribe`.
    pub fn unsubscribe(&self) {
        self.subscriber_count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
            Some(count.saturating_sub(1))
        })
        .ok();
    }

    /// Fetch the first page, replacing any existing pages.
    pub async fn fetch_first_page(&self, param: TParam) -> Result<()> {
        if !self.options.enabled {
            return Ok(());
        }
        let _permit = self.fetch_lock.lock().await;
        self.state_tx.send_modify(|state| {
            state.status = QueryStatus::Loading;
            state.is_fetching_next = true;
        });
        let page = self.fetch_page(param).await;
        let failed = page.error.is_some();
        self.state_tx.send_modify(|state| {
            state.status = if failed {
                QueryStatus::Error
            } else {
                QueryStatus::Success
            };
            state.pages = vec![page];
            state.is_fetching_next = false;
        });
        self.refresh_page_flags();
        Ok(())
    }

    /// Fetch the next page using `getNextPageParam` over the current page list. A no-op if
    /// there is no next page, or a fetch is already in flight.
    pub async fn fetch_next_page(&self) -> Result<()> {
        if !self.options.enabled {
            return Ok(());
        }
        let Some(param) = self.next_param() else {
            debug!("fetch_next_page called with no next page available");
            return Ok(());
        };

        let Ok(_permit) = self.fetch_lock.try_lock() else {
            debug!("fetch_next_page skipped: a fetch is already in flight");
            return Ok(());
        };

        self.state_tx.send_modify(|state| {
            state.is_fetching_next = true;
        });
        let page = self.fetch_page(param).await;
        self.state_tx.send_modify(|state| {
            state.pages.push(page);
            state.is_fetching_next = false;
        });
        self.enforce_max_pages(false);
        self.refresh_page_flags();
        Ok(())
    }

    /// Fetch the previous page using `getPreviousPageParam`. Requires that constructor was
    /// given a `get_previous_page_param` callback.
    pub async fn fetch_previous_page(&self) -> Result<()> {
        if !self.options.enabled {
            return Ok(());
        }
        let Some(get_prev) = &self.get_previous_page_param else {
            return Ok(());
        };
        let Some(param) = get_prev(&self.state_tx.borrow().pages) else {
            return Ok(());
        };

        let Ok(_permit) = self.fetch_lock.try_lock() else {
            debug!("fetch_previous_page skipped: a fetch is already in flight");
            return Ok(());
        };

        self.state_tx.send_modify(|state| {
            state.is_fetching_previous = true;
        });
        let page = self.fetch_page(param).await;
        self.state_tx.send_modify(|state| {
            state.pages.insert(0, page);
            state.is_fetching_previous = false;
        });
        self.enforce_max_pages(true);
        self.refresh_page_flags();
        Ok(())
    }

    /// Drop every fetched page and reset to the empty state.
    pub fn reset(&self) {
        self.state_tx.send_replace(InfiniteQueryState {
            has_previous_page: self.get_previous_page_param.is_some(),
            ..InfiniteQueryState::default()
        });
    }

    fn next_param(&self) -> Option<TParam> {
        let pages = self.state_tx.borrow().pages.clone();
        (self.get_next_page_param)(&pages)
    }

    async fn fetch_page(&self, param: TParam) -> Page<TParam, TData> {
        match (self.fetcher)(param.clone()).await {
            Ok(data) => Page {
                param,
                data: Some(data),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "infinite query page fetch failed");
                Page {
                    param,
                    data: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Drop pages from the window's edge once `maxPages` is exceeded: from the start when a
    /// forward page was just appended, from the end when a previous page was just prepended.
    fn enforce_max_pages(&self, just_prepended: bool) {
        let Some(max_pages) = self.options.max_pages else {
            return;
        };
        self.state_tx.send_modify(|state| {
            while state.pages.len() > max_pages {
                if just_prepended {
                    state.pages.pop();
                } else {
                    state.pages.remove(0);
                }
            }
        });
    }

    fn refresh_page_flags(&self) {
        let pages = self.state_tx.borrow().pages.clone();
        let has_next = (self.get_next_page_param)(&pages).is_some();
        let has_previous = self
            .get_previous_page_param
            .as_ref()
            .is_some_and(|f| f(&pages).is_some());
        self.state_tx.send_modify(|state| {
            state.has_next_page = has_next;
            state.has_previous_page = has_previous;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_query(total_pages: usize) -> InfiniteQuery<usize, Vec<i32>> {
        let fetcher: PageFetcher<usize, Vec<i32>> =
            Arc::new(|page: usize| Box::pin(async move { Ok(vec![page as i32]) }));
        let next_param: NextParamFn<usize, Vec<i32>> = Arc::new(move |pages| {
            if pages.len() >= total_pages {
                None
            } else {
                Some(pages.len())
            }
        });
        InfiniteQuery::new(InfiniteQueryOptions::default(), fetcher, next_param, None)
    }

    #[tokio::test]
    async fn first_page_fetch_populates_single_page() {
        let query = make_query(3);
        query.fetch_first_page(0).await.unwrap();
        let state = query.current_state();
        assert_eq!(state.pages.len(), 1);
        assert_eq!(state.pages[0].data, Some(vec![0]));
    }

    #[tokio::test]
    async fn next_page_appends_and_tracks_has_next() {
        let query = make_query(2);
        query.fetch_first_page(0).await.unwrap();
        query.fetch_next_page().await.unwrap();

        let state = query.current_state();
        assert_eq!(state.pages.len(), 2);
        assert!(!state.has_next_page);
    }

    #[tokio::test]
    async fn fetch_next_page_is_noop_once_exhausted() {
        let query = make_query(1);
        query.fetch_first_page(0).await.unwrap();
        assert!(!query.current_state().has_next_page);
        query.fetch_next_page().await.unwrap();
        assert_eq!(query.current_state().pages.len(), 1);
    }

    #[tokio::test]
    async fn max_pages_drops_from_the_front() {
        let fetcher: PageFetcher<usize, Vec<i32>> =
            Arc::new(|page: usize| Box::pin(async move { Ok(vec![page as i32]) }));
        let next_param: NextParamFn<usize, Vec<i32>> =
            Arc::new(|pages| Some(pages.len()));
        let options = InfiniteQueryOptions {
            max_pages: Some(2),
            ..InfiniteQueryOptions::default()
        };
        let query = InfiniteQuery::new(options, fetcher, next_param, None);

        query.fetch_first_page(0).await.unwrap();
        query.fetch_next_page().await.unwrap();
        query.fetch_next_page().await.unwrap();

        let state = query.current_state();
        assert_eq!(state.pages.len(), 2);
        assert_eq!(state.pages[0].param, 1);
        assert_eq!(state.pages[1].param, 2);
    }

    #[tokio::test]
    async fn reset_clears_pages() {
        let query = make_query(3);
        query.fetch_first_page(0).await.unwrap();
        query.reset();
        assert!(query.current_state().pages.is_empty());
    }
}
