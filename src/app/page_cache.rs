// LogThreads - app/page_cache.rs
//
// Progressive page cache for presenting large result sets in windows.
//
// Pages are fetched on demand through a `PageLoader`, kept in an `LruCache`
// and evicted once more than `max_memory_pages` are held. Pages next to the
// most recently requested one are queued for prefetch; the host runs them
// one at a time with `run_prefetch()`.
//
// Concurrency: all state sits behind one mutex and the loader always runs
// outside it. Every on-demand request takes a new generation number and
// cancels the previous request's token; a result whose generation is no
// longer current is dropped and reported as `PageError::Cancelled`.
// `reset()` also bumps an epoch so queued or running prefetches from before
// the reset are discarded.

use crate::util::constants;
use crate::util::error::PageError;
use lru::LruCache;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// =============================================================================
// Loader interface
// =============================================================================

/// Cooperative cancellation signal handed to loaders.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
    /// Set only for `PageCache::search` requests.
    pub search: Option<String>,
    /// Cancelled once the request is superseded. Loaders may check it and
    /// bail out early; their result is ignored either way.
    pub cancel: CancelToken,
}

/// One page as returned by a loader.
#[derive(Debug, Clone, PartialEq)]
pub struct PageData<T> {
    pub data: Vec<T>,
    /// Size of the whole data set.
    pub total_count: usize,
    pub has_more: bool,
}

/// Source of pages. Implemented for any suitable closure.
pub trait PageLoader<T>: Send + Sync {
    fn load_page(&self, request: &PageRequest) -> Result<PageData<T>, PageError>;
}

impl<T, F> PageLoader<T> for F
where
    F: Fn(&PageRequest) -> Result<PageData<T>, PageError> + Send + Sync,
{
    fn load_page(&self, request: &PageRequest) -> Result<PageData<T>, PageError> {
        self(request)
    }
}

#[derive(Debug, Clone)]
pub struct PageCacheConfig {
    /// Items per page, fixed for the cache's lifetime.
    pub page_size: usize,
    /// Pages held before LRU eviction.
    pub max_memory_pages: usize,
    /// Pages prefetched on each side of a requested page.
    pub preload_pages: usize,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            page_size: constants::DEFAULT_PAGE_SIZE,
            max_memory_pages: constants::DEFAULT_MAX_MEMORY_PAGES,
            preload_pages: constants::DEFAULT_PRELOAD_PAGES,
        }
    }
}

type ErrorCallback = Box<dyn Fn(&PageError) + Send + Sync>;

// =============================================================================
// Cache state
// =============================================================================

struct CacheState<T> {
    /// Unbounded; trimmed explicitly so a multi-page request can hold every
    /// page it covers until it has been sliced.
    pages: LruCache<usize, Vec<T>>,

    /// Bumped by every on-demand request and by reset.
    generation: u64,
    /// Bumped by reset only.
    epoch: u64,
    in_flight: Option<CancelToken>,
    prefetch_token: CancelToken,
    prefetch: VecDeque<(usize, u64)>,

    total_count: Option<usize>,
    has_more: bool,
    next_page: usize,
    data: Vec<T>,
    last_error: Option<PageError>,
    loading: bool,
}

impl<T> CacheState<T> {
    fn new() -> Self {
        Self {
            pages: LruCache::unbounded(),
            generation: 0,
            epoch: 0,
            in_flight: None,
            prefetch_token: CancelToken::new(),
            prefetch: VecDeque::new(),
            total_count: None,
            has_more: true,
            next_page: 0,
            data: Vec::new(),
            last_error: None,
            loading: false,
        }
    }

    fn touch(&mut self, page: usize) {
        self.pages.promote(&page);
    }

    /// Start an on-demand request, superseding any earlier one.
    fn begin_request(&mut self) -> (u64, CancelToken) {
        if let Some(stale) = self.in_flight.take() {
            stale.cancel();
        }
        self.generation += 1;
        let token = CancelToken::new();
        self.in_flight = Some(token.clone());
        self.loading = true;
        (self.generation, token)
    }

    fn is_current(&self, generation: u64, token: &CancelToken) -> bool {
        self.generation == generation && !token.is_cancelled()
    }

    fn end_request(&mut self) {
        self.in_flight = None;
        self.loading = false;
    }

    fn store(&mut self, page: usize, loaded: PageData<T>) {
        self.total_count = Some(loaded.total_count);
        self.has_more = loaded.has_more;
        self.pages.put(page, loaded.data);
    }

    fn evict(&mut self, max_pages: usize) {
        while self.pages.len() > max_pages {
            let Some((oldest, _)) = self.pages.pop_lru() else {
                break;
            };
            tracing::debug!(page = oldest, "Evicted page");
        }
    }

    fn queue_prefetch(&mut self, center: usize, radius: usize, page_size: usize) {
        let within_total = |page: usize| match self.total_count {
            Some(total) => page.saturating_mul(page_size) < total,
            None => true,
        };

        let mut wanted = Vec::new();
        for d in 1..=radius {
            if let Some(next) = center.checked_add(d) {
                wanted.push(next);
            }
            if let Some(prev) = center.checked_sub(d) {
                wanted.push(prev);
            }
        }
        let epoch = self.epoch;
        let wanted: Vec<usize> = wanted
            .into_iter()
            .filter(|&p| within_total(p))
            .filter(|p| !self.pages.contains(p))
            .filter(|&p| !self.prefetch.iter().any(|&(q, _)| q == p))
            .collect();
        self.prefetch.extend(wanted.into_iter().map(|p| (p, epoch)));
    }
}

// =============================================================================
// PageCache
// =============================================================================

pub struct PageCache<T, L> {
    config: PageCacheConfig,
    loader: L,
    state: Mutex<CacheState<T>>,
    on_error: Option<ErrorCallback>,
}

impl<T, L> PageCache<T, L>
where
    T: Clone + Send,
    L: PageLoader<T>,
{
    pub fn new(config: PageCacheConfig, loader: L) -> Self {
        let config = PageCacheConfig {
            page_size: config.page_size.max(1),
            ..config
        };
        Self {
            config,
            loader,
            state: Mutex::new(CacheState::new()),
            on_error: None,
        }
    }

    /// Callback for loader failures. Cancellation is never reported.
    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PageError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &PageCacheConfig {
        &self.config
    }

    /// Items `[start, end)` across however many pages they span.
    ///
    /// Cached pages are touched, missing ones are loaded in parallel. The
    /// result is cut short where the data set ends. Returns
    /// `PageError::Cancelled` if a newer request or a reset overtook this one.
    pub fn get_visible_range(&self, start: usize, end: usize) -> Result<Vec<T>, PageError> {
        // Once the size is known, never ask the loader for pages past it.
        let end = match self.lock().total_count {
            Some(total) => end.min(total),
            None => end,
        };
        if start >= end {
            return Ok(Vec::new());
        }
        let page_size = self.config.page_size;
        let first = start / page_size;
        let last = (end - 1) / page_size;

        let (generation, token, missing) = {
            let mut st = self.lock();
            let (generation, token) = st.begin_request();
            let mut missing = Vec::new();
            for page in first..=last {
                if st.pages.contains(&page) {
                    st.touch(page);
                } else {
                    missing.push(page);
                }
            }
            (generation, token, missing)
        };

        let results: Vec<(usize, Result<PageData<T>, PageError>)> = missing
            .par_iter()
            .map(|&page| {
                let request = PageRequest {
                    page,
                    page_size,
                    search: None,
                    cancel: token.clone(),
                };
                (page, self.loader.load_page(&request))
            })
            .collect();

        let mut st = self.lock();
        if !st.is_current(generation, &token) {
            tracing::debug!(first, last, "Stale page request discarded");
            return Err(PageError::Cancelled);
        }
        st.end_request();

        let mut failure = None;
        for (page, result) in results {
            match result {
                Ok(loaded) => st.store(page, loaded),
                Err(e) if failure.is_none() => failure = Some(e),
                Err(_) => {}
            }
        }
        if let Some(e) = failure {
            st.evict(self.config.max_memory_pages);
            return Err(self.fail(st, e));
        }

        let mut visible = Vec::with_capacity(end - start);
        for page in first..=last {
            st.touch(page);
            let base = page * page_size;
            if let Some(cached) = st.pages.peek(&page) {
                let lo = start.saturating_sub(base).min(cached.len());
                let hi = (end - base).min(page_size).min(cached.len());
                visible.extend_from_slice(&cached[lo..hi]);
            }
        }

        st.evict(self.config.max_memory_pages);
        if !missing.is_empty() {
            st.queue_prefetch(last, self.config.preload_pages, page_size);
        }
        Ok(visible)
    }

    /// One whole page.
    pub fn load_page(&self, page: usize) -> Result<Vec<T>, PageError> {
        let start = page.saturating_mul(self.config.page_size);
        self.get_visible_range(start, start.saturating_add(self.config.page_size))
    }

    /// Load the page after the last one appended to `data()`.
    ///
    /// Returns `Ok(false)` when the loader has reported no more data, a load
    /// is already running, or the page came back empty.
    pub fn load_next_page(&self) -> Result<bool, PageError> {
        let (page, generation, token) = {
            let mut st = self.lock();
            if !st.has_more || st.loading {
                return Ok(false);
            }
            let page = st.next_page;
            let (generation, token) = st.begin_request();
            (page, generation, token)
        };

        let result = self.loader.load_page(&PageRequest {
            page,
            page_size: self.config.page_size,
            search: None,
            cancel: token.clone(),
        });

        let mut st = self.lock();
        if !st.is_current(generation, &token) {
            return Err(PageError::Cancelled);
        }
        st.end_request();

        let loaded = match result {
            Ok(loaded) => loaded,
            Err(e) => return Err(self.fail(st, e)),
        };
        if loaded.data.is_empty() {
            st.total_count = Some(loaded.total_count);
            st.has_more = false;
            return Ok(false);
        }

        st.data.extend(loaded.data.iter().cloned());
        st.store(page, loaded);
        st.next_page = page + 1;
        st.evict(self.config.max_memory_pages);
        st.queue_prefetch(page, self.config.preload_pages, self.config.page_size);
        tracing::debug!(page, accumulated = st.data.len(), "Loaded next page");
        Ok(true)
    }

    /// Run one queued prefetch. Returns false when the queue is empty.
    ///
    /// Failures are logged and swallowed; results that arrive after a reset
    /// are dropped.
    pub fn run_prefetch(&self) -> bool {
        let (page, epoch, token) = {
            let mut st = self.lock();
            loop {
                let Some((page, epoch)) = st.prefetch.pop_front() else {
                    return false;
                };
                if epoch == st.epoch && !st.pages.contains(&page) {
                    break (page, epoch, st.prefetch_token.clone());
                }
            }
        };

        let result = self.loader.load_page(&PageRequest {
            page,
            page_size: self.config.page_size,
            search: None,
            cancel: token,
        });

        let mut st = self.lock();
        if st.epoch != epoch {
            tracing::debug!(page, "Prefetch result discarded after reset");
            return true;
        }
        match result {
            Ok(loaded) => {
                st.store(page, loaded);
                st.evict(self.config.max_memory_pages);
                tracing::trace!(page, "Prefetched page");
            }
            Err(e) => tracing::debug!(page, error = %e, "Prefetch failed"),
        }
        true
    }

    /// Pass a search query to the loader and return its first page.
    /// Results are not cached.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<T>, PageError> {
        let result = self.loader.load_page(&PageRequest {
            page: 0,
            page_size: limit,
            search: Some(query.to_string()),
            cancel: CancelToken::new(),
        });
        match result {
            Ok(loaded) => Ok(loaded.data),
            Err(e) => Err(self.fail(self.lock(), e)),
        }
    }

    /// Drop every page and accumulated item, cancel in-flight work.
    pub fn reset(&self) {
        let mut st = self.lock();
        if let Some(token) = st.in_flight.take() {
            token.cancel();
        }
        st.prefetch_token.cancel();
        let epoch = st.epoch + 1;
        let generation = st.generation + 1;
        *st = CacheState::new();
        st.epoch = epoch;
        st.generation = generation;
        tracing::debug!(epoch, "Page cache reset");
    }

    /// Items accumulated by `load_next_page`.
    pub fn data(&self) -> Vec<T> {
        self.lock().data.clone()
    }

    /// Number of pages currently held.
    pub fn memory_usage(&self) -> usize {
        self.lock().pages.len()
    }

    pub fn is_page_loaded(&self, page: usize) -> bool {
        self.lock().pages.contains(&page)
    }

    /// Cached page numbers, ascending.
    pub fn cached_pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.lock().pages.iter().map(|(&p, _)| p).collect();
        pages.sort_unstable();
        pages
    }

    /// Pages waiting in the prefetch queue.
    pub fn pending_prefetches(&self) -> usize {
        self.lock().prefetch.len()
    }

    /// Size of the whole data set, once any page has been loaded.
    pub fn total_count(&self) -> Option<usize> {
        self.lock().total_count
    }

    pub fn has_more(&self) -> bool {
        self.lock().has_more
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn last_error(&self) -> Option<PageError> {
        self.lock().last_error.clone()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a loader failure and notify the callback outside the lock.
    fn fail(&self, mut st: MutexGuard<'_, CacheState<T>>, error: PageError) -> PageError {
        if error.is_cancelled() {
            return error;
        }
        tracing::warn!(error = %error, "Page load failed");
        st.last_error = Some(error.clone());
        drop(st);
        if let Some(callback) = &self.on_error {
            callback(&error);
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    /// Loader over the numbers `0..total`.
    fn numbers(total: usize) -> impl Fn(&PageRequest) -> Result<PageData<usize>, PageError> {
        move |req: &PageRequest| {
            let start = (req.page * req.page_size).min(total);
            let end = (start + req.page_size).min(total);
            Ok(PageData {
                data: (start..end).collect(),
                total_count: total,
                has_more: end < total,
            })
        }
    }

    fn config(page_size: usize, max_memory_pages: usize, preload_pages: usize) -> PageCacheConfig {
        PageCacheConfig {
            page_size,
            max_memory_pages,
            preload_pages,
        }
    }

    #[test]
    fn test_range_spans_pages() {
        let cache = PageCache::new(config(10, 10, 0), numbers(1000));
        let items = cache.get_visible_range(5, 25).unwrap();
        assert_eq!(items, (5..25).collect::<Vec<_>>());
        assert_eq!(cache.cached_pages(), vec![0, 1, 2]);
        assert_eq!(cache.total_count(), Some(1000));
    }

    #[test]
    fn test_range_past_end_is_truncated() {
        let cache = PageCache::new(config(10, 10, 0), numbers(15));
        assert_eq!(cache.get_visible_range(12, 30).unwrap(), vec![12, 13, 14]);
        assert!(cache.get_visible_range(5, 5).unwrap().is_empty());
    }

    #[test]
    fn test_lru_keeps_most_recent_pages() {
        let cache = PageCache::new(config(10, 3, 0), numbers(1000));
        for page in 0..=6 {
            cache.load_page(page).unwrap();
            assert!(cache.memory_usage() <= 3);
        }
        assert_eq!(cache.cached_pages(), vec![4, 5, 6]);
    }

    #[test]
    fn test_access_refreshes_lru_position() {
        let cache = PageCache::new(config(10, 3, 0), numbers(1000));
        cache.load_page(0).unwrap();
        cache.load_page(1).unwrap();
        cache.load_page(2).unwrap();
        cache.load_page(0).unwrap();
        cache.load_page(3).unwrap();
        assert_eq!(cache.cached_pages(), vec![0, 2, 3]);
    }

    #[test]
    fn test_cached_pages_not_reloaded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let inner = numbers(100);
        let cache = PageCache::new(config(10, 10, 0), move |req: &PageRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner(req)
        });
        cache.get_visible_range(0, 30).unwrap();
        cache.get_visible_range(10, 20).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_load_error_reported_and_cache_still_usable() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let inner = numbers(100);
        let cache = PageCache::new(config(10, 10, 0), move |req: &PageRequest| {
            if req.page == 2 {
                Err(PageError::Load {
                    page: 2,
                    message: "backend down".to_string(),
                })
            } else {
                inner(req)
            }
        })
        .with_error_callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let err = cache.get_visible_range(15, 25).unwrap_err();
        assert!(matches!(err, PageError::Load { page: 2, .. }));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(cache.last_error(), Some(err));
        assert!(!cache.is_loading());

        // Page 1 loaded alongside and is still served.
        assert!(cache.is_page_loaded(1));
        assert_eq!(cache.get_visible_range(30, 32).unwrap(), vec![30, 31]);
    }

    #[test]
    fn test_failed_range_still_evicts() {
        let inner = numbers(1000);
        let cache = PageCache::new(config(10, 2, 0), move |req: &PageRequest| {
            if req.page == 3 {
                Err(PageError::Load {
                    page: 3,
                    message: "backend down".to_string(),
                })
            } else {
                inner(req)
            }
        });

        assert!(cache.get_visible_range(0, 40).is_err());
        assert!(cache.memory_usage() <= 2);
    }

    #[test]
    fn test_range_clamped_to_known_total() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let inner = numbers(15);
        let cache = PageCache::new(config(1, 3, 0), move |req: &PageRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner(req)
        });

        cache.get_visible_range(0, 3).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert_eq!(cache.get_visible_range(12, 100).unwrap(), vec![12, 13, 14]);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(cache.cached_pages(), vec![12, 13, 14]);

        assert!(cache.get_visible_range(20, 30).unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_newer_request_wins() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let inner = numbers(100);
        let cache = Arc::new(
            PageCache::new(config(10, 10, 0), move |req: &PageRequest| {
                if req.page == 0 {
                    // Hold the first request until it is superseded.
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while !req.cancel.is_cancelled() && Instant::now() < deadline {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                }
                inner(req)
            })
            .with_error_callback(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let slow = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || cache.get_visible_range(0, 10))
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cache.is_loading() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(cache.get_visible_range(10, 12).unwrap(), vec![10, 11]);
        assert_eq!(slow.join().unwrap(), Err(PageError::Cancelled));
        assert!(!cache.is_page_loaded(0));
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert!(cache.last_error().is_none());
    }

    #[test]
    fn test_prefetch_adjacent_pages() {
        let cache = PageCache::new(config(10, 20, 2), numbers(65));
        cache.load_page(5).unwrap();
        // Page 7 would start past the 65 items.
        assert_eq!(cache.pending_prefetches(), 3);
        while cache.run_prefetch() {}
        assert_eq!(cache.cached_pages(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_prefetch_failures_swallowed() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let inner = numbers(100);
        let cache = PageCache::new(config(10, 10, 1), move |req: &PageRequest| {
            if req.page == 1 {
                Err(PageError::Load {
                    page: 1,
                    message: "flaky".to_string(),
                })
            } else {
                inner(req)
            }
        })
        .with_error_callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        cache.load_page(0).unwrap();
        while cache.run_prefetch() {}
        assert!(!cache.is_page_loaded(1));
        assert!(cache.last_error().is_none());
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let cache = PageCache::new(config(10, 10, 1), numbers(100));
        cache.load_page(3).unwrap();
        cache.load_next_page().unwrap();
        cache.reset();

        assert_eq!(cache.memory_usage(), 0);
        assert!(cache.data().is_empty());
        assert!(cache.has_more());
        assert_eq!(cache.total_count(), None);
        assert!(!cache.run_prefetch());
    }

    #[test]
    fn test_load_next_page_accumulates() {
        let cache = PageCache::new(config(10, 10, 0), numbers(25));
        assert!(cache.load_next_page().unwrap());
        assert!(cache.load_next_page().unwrap());
        assert!(cache.load_next_page().unwrap());
        assert!(!cache.has_more());
        assert!(!cache.load_next_page().unwrap());
        assert_eq!(cache.data(), (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_search_passes_query() {
        let cache = PageCache::new(config(10, 10, 0), |req: &PageRequest| {
            let query = req.search.clone().unwrap_or_default();
            Ok(PageData {
                data: vec![format!("{query}:{}", req.page_size)],
                total_count: 1,
                has_more: false,
            })
        });
        assert_eq!(cache.search("task-1", 50).unwrap(), vec!["task-1:50".to_string()]);
        assert_eq!(cache.memory_usage(), 0);
    }
}
