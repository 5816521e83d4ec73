//! The three-chapter reading window.
//!
//! A [`ReaderSession`] owns a [`NavigationWindow`] of Previous, Current and
//! Next slots. Navigation commands shift the slots under a lock and return
//! immediately; loading the newly exposed edge and evicting the displaced
//! slot both run as background tasks.
//!
//! Every load is stamped with a generation. A finished load only lands in
//! the slot that still carries its generation; if the slot was shifted out
//! or reset in the meantime the result is thrown away and its page buffers
//! are released.

use bytes::Bytes;
use log::{debug, error, info, warn};
use std::mem;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinError, JoinSet};

use super::buffers::ImageBuffers;
use super::error::ReaderError;
use super::library::{LibraryStore, ReadingPosition};
use super::loader::{ChapterLoader, ChapterView, LoadedChapter};
use super::provider::{Adjacent, ContentProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotStatus {
    #[default]
    Empty,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPosition {
    Previous,
    Current,
    Next,
}

/// One chapter position in the window. An empty address means there is no
/// chapter in that direction.
#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub address: String,
    pub view: Option<Arc<ChapterView>>,
    pub status: SlotStatus,
    adjacent: Adjacent,
    generation: u64,
}

impl Slot {
    fn loading(address: &str, generation: u64) -> Self {
        Self {
            address: address.to_string(),
            status: SlotStatus::Loading,
            generation,
            ..Self::default()
        }
    }

    fn failed(generation: u64) -> Self {
        Self {
            status: SlotStatus::Failed,
            generation,
            ..Self::default()
        }
    }

    fn ready(chapter: LoadedChapter, generation: u64) -> Self {
        Self {
            address: chapter.address,
            view: Some(Arc::new(chapter.view)),
            status: SlotStatus::Ready,
            adjacent: chapter.adjacent,
            generation,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SlotStatus::Ready && self.view.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NavigationWindow {
    pub previous: Slot,
    pub current: Slot,
    pub next: Slot,
    generation: u64,
}

impl NavigationWindow {
    pub fn slot(&self, position: SlotPosition) -> &Slot {
        match position {
            SlotPosition::Previous => &self.previous,
            SlotPosition::Current => &self.current,
            SlotPosition::Next => &self.next,
        }
    }

    fn slot_mut(&mut self, position: SlotPosition) -> &mut Slot {
        match position {
            SlotPosition::Previous => &mut self.previous,
            SlotPosition::Current => &mut self.current,
            SlotPosition::Next => &mut self.next,
        }
    }

    fn begin_load(&mut self, position: SlotPosition, address: &str) -> u64 {
        self.generation += 1;
        *self.slot_mut(position) = Slot::loading(address, self.generation);
        self.generation
    }

    /// The slot still waiting for the load stamped with `generation`.
    fn waiting_for(&mut self, generation: u64) -> Option<&mut Slot> {
        [&mut self.previous, &mut self.current, &mut self.next]
            .into_iter()
            .find(|slot| slot.status == SlotStatus::Loading && slot.generation == generation)
    }

    /// Previous <- Current <- Next. Returns the slot pushed out of the window.
    fn shift_forward(&mut self) -> Slot {
        let displaced = mem::take(&mut self.previous);
        self.previous = mem::replace(&mut self.current, mem::take(&mut self.next));
        displaced
    }

    /// Previous -> Current -> Next. Returns the slot pushed out of the window.
    fn shift_backward(&mut self) -> Slot {
        let displaced = mem::take(&mut self.next);
        self.next = mem::replace(&mut self.current, mem::take(&mut self.previous));
        displaced
    }

    fn reset(&mut self) -> [Slot; 3] {
        [
            mem::take(&mut self.previous),
            mem::take(&mut self.current),
            mem::take(&mut self.next),
        ]
    }

    /// Keys referenced by the ready slots, with one entry per slot.
    pub fn referenced_keys(&self) -> Vec<String> {
        [&self.previous, &self.current, &self.next]
            .into_iter()
            .filter_map(|slot| slot.view.as_ref())
            .flat_map(|view| view.keys().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }
}

struct SessionInner {
    window: Mutex<NavigationWindow>,
    loader: ChapterLoader,
    library: Option<Arc<dyn LibraryStore>>,
    // Never held across an await.
    tasks: std::sync::Mutex<JoinSet<()>>,
    active: Arc<watch::Sender<usize>>,
}

/// A single reader's window plus the buffers and collaborators behind it.
/// Cheap to clone; clones share the same window.
#[derive(Clone)]
pub struct ReaderSession {
    inner: Arc<SessionInner>,
}

impl ReaderSession {
    pub fn new(provider: Arc<dyn ContentProvider>, buffers: ImageBuffers) -> Self {
        Self::with_library(provider, buffers, None)
    }

    pub fn with_library(
        provider: Arc<dyn ContentProvider>,
        buffers: ImageBuffers,
        library: Option<Arc<dyn LibraryStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                window: Mutex::new(NavigationWindow::default()),
                loader: ChapterLoader::new(provider, buffers),
                library,
                tasks: std::sync::Mutex::new(JoinSet::new()),
                active: Arc::new(watch::Sender::new(0)),
            }),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ContentProvider> {
        self.inner.loader.provider()
    }

    pub fn buffers(&self) -> &ImageBuffers {
        self.inner.loader.buffers()
    }

    pub fn library(&self) -> Option<&Arc<dyn LibraryStore>> {
        self.inner.library.as_ref()
    }

    pub async fn snapshot(&self) -> NavigationWindow {
        self.inner.window.lock().await.clone()
    }

    pub async fn current(&self) -> Option<Arc<ChapterView>> {
        self.inner.window.lock().await.current.view.clone()
    }

    pub async fn image(&self, key: &str) -> Option<Bytes> {
        self.buffers().get(key).await
    }

    /// Replaces the whole window with `address`. The current chapter is
    /// loaded before returning; its neighbours load in the background.
    pub async fn open_new(&self, address: &str) -> Result<Arc<ChapterView>, ReaderError> {
        if address.is_empty() {
            return Err(ReaderError::NoContent("empty chapter address".into()));
        }

        let generation = {
            let mut window = self.inner.window.lock().await;
            let displaced = window.reset();
            self.evict(displaced);
            window.begin_load(SlotPosition::Current, address)
        };

        info!("Opening {}", address);
        let result = self.inner.loader.load_chapter(address).await;

        let mut window = self.inner.window.lock().await;
        let Some(slot) = window.waiting_for(generation) else {
            drop(window);
            if let Ok(chapter) = result {
                self.buffers().release(chapter.view.keys()).await;
            }
            return Err(ReaderError::Superseded(address.to_string()));
        };

        let chapter = match result {
            Ok(chapter) => chapter,
            Err(e) => {
                *slot = Slot::failed(generation);
                error!("Could not load {}: {}", address, e);
                return Err(e);
            }
        };

        let adjacent = chapter.adjacent.clone();
        *slot = Slot::ready(chapter, generation);
        let view = slot.view.clone();

        self.start_edge_load(&mut window, SlotPosition::Previous, adjacent.previous);
        self.start_edge_load(&mut window, SlotPosition::Next, adjacent.next);
        drop(window);

        self.record_position(address);

        view.ok_or_else(|| ReaderError::NoContent(address.to_string()))
    }

    /// Opens the last recorded position of a series, if the library has one.
    pub async fn resume(&self, series_id: &str) -> Result<Option<Arc<ChapterView>>, ReaderError> {
        let Some(library) = self.inner.library.as_ref() else {
            return Ok(None);
        };
        match library.last_position(series_id).await? {
            Some(position) => self.open_new(&position.address).await.map(Some),
            None => Ok(None),
        }
    }

    /// Moves one chapter forward. Returns `None` without touching the
    /// window when the next chapter is not ready.
    pub async fn advance(&self) -> Option<Arc<ChapterView>> {
        let mut window = self.inner.window.lock().await;
        if !window.next.is_ready() {
            debug!("Next chapter is {:?}, staying put", window.next.status);
            return None;
        }

        let displaced = window.shift_forward();
        self.evict([displaced]);

        let next = window.current.adjacent.next.clone();
        self.start_edge_load(&mut window, SlotPosition::Next, next);

        debug!("Advanced to {}", window.current.address);
        window.current.view.clone()
    }

    /// Moves one chapter back. Returns `None` without touching the window
    /// when the previous chapter is not ready.
    pub async fn retreat(&self) -> Option<Arc<ChapterView>> {
        let mut window = self.inner.window.lock().await;
        if !window.previous.is_ready() {
            debug!("Previous chapter is {:?}, staying put", window.previous.status);
            return None;
        }

        let displaced = window.shift_backward();
        self.evict([displaced]);

        let previous = window.current.adjacent.previous.clone();
        self.start_edge_load(&mut window, SlotPosition::Previous, previous);

        debug!("Retreated to {}", window.current.address);
        window.current.view.clone()
    }

    /// Records where the reader stopped, then empties the window and lets go
    /// of every page buffer it held.
    pub async fn exit(&self) {
        let (address, displaced) = {
            let mut window = self.inner.window.lock().await;
            let address = window
                .current
                .is_ready()
                .then(|| window.current.address.clone());
            (address, window.reset())
        };

        if let Some(address) = address {
            self.record_position(&address);
        }
        self.evict(displaced);
    }

    /// Waits for every background load, eviction and library write.
    ///
    /// The tasks stay owned by the session, so dropping this future cancels
    /// nothing, and any number of callers may wait at once.
    pub async fn wait_idle(&self) {
        let mut active = self.inner.active.subscribe();
        if active.wait_for(|running| *running == 0).await.is_err() {
            return;
        }
        reap(&mut self.tasks());
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks();
        reap(&mut tasks);

        self.inner.active.send_modify(|running| *running += 1);
        let running = RunningTask(Arc::clone(&self.inner.active));
        tasks.spawn(async move {
            let _running = running;
            task.await;
        });
    }

    fn evict<I>(&self, displaced: I)
    where
        I: IntoIterator<Item = Slot>,
    {
        let keys: Vec<String> = displaced
            .into_iter()
            .filter_map(|slot| slot.view)
            .flat_map(|view| view.keys().map(str::to_string).collect::<Vec<_>>())
            .collect();
        if keys.is_empty() {
            return;
        }

        let buffers = self.buffers().clone();
        self.spawn(async move {
            let evicted = buffers.release(&keys).await;
            debug!("Evicted {} of {} buffers out of the window", evicted, keys.len());
        });
    }

    fn start_edge_load(
        &self,
        window: &mut NavigationWindow,
        position: SlotPosition,
        address: Option<String>,
    ) {
        let Some(address) = address.filter(|a| !a.is_empty()) else {
            *window.slot_mut(position) = Slot::default();
            return;
        };

        let generation = window.begin_load(position, &address);
        let session = self.clone();
        self.spawn(async move {
            let result = session.inner.loader.load_chapter(&address).await;
            session.commit_edge(generation, &address, result).await;
        });
    }

    async fn commit_edge(
        &self,
        generation: u64,
        address: &str,
        result: Result<LoadedChapter, ReaderError>,
    ) {
        let mut window = self.inner.window.lock().await;
        let Some(slot) = window.waiting_for(generation) else {
            drop(window);
            if let Ok(chapter) = result {
                debug!("Discarding stale load of {}", address);
                self.buffers().release(chapter.view.keys()).await;
            }
            return;
        };

        match result {
            Ok(chapter) => {
                debug!("Prefetched {}", address);
                *slot = Slot::ready(chapter, generation);
            }
            Err(ReaderError::NoContent(reason)) => {
                info!("No chapter at {}: {}", address, reason);
                *slot = Slot::default();
            }
            Err(e) => {
                error!("Could not prefetch {}: {}", address, e);
                *slot = Slot::failed(generation);
            }
        }
    }

    fn record_position(&self, address: &str) {
        let Some(library) = self.inner.library.clone() else {
            return;
        };
        let provider = Arc::clone(self.provider());
        let address = address.to_string();

        self.spawn(async move {
            if let Err(e) = record(&*library, &*provider, &address).await {
                error!("Could not update library for {}: {}", address, e);
            }
        });
    }
}

/// Counts a background task as running until dropped, which also covers
/// panics and cancellation.
struct RunningTask(Arc<watch::Sender<usize>>);

impl Drop for RunningTask {
    fn drop(&mut self) {
        self.0.send_modify(|running| *running = running.saturating_sub(1));
    }
}

/// Drops finished tasks from the set. Returns how many of them failed.
fn reap(tasks: &mut JoinSet<()>) -> usize {
    let mut failed = 0;
    while let Some(joined) = tasks.try_join_next() {
        if report_task(joined) {
            failed += 1;
        }
    }
    failed
}

/// Logs a background task that panicked or was cancelled. Returns whether
/// it failed.
fn report_task(joined: Result<(), JoinError>) -> bool {
    match joined {
        Ok(()) => false,
        Err(e) => {
            error!("Background task failed: {}", e);
            true
        }
    }
}

async fn record(
    library: &dyn LibraryStore,
    provider: &dyn ContentProvider,
    address: &str,
) -> Result<(), ReaderError> {
    let (series_id, _) = match provider.extract_ids(address) {
        Ok(ids) => ids,
        Err(e) => {
            warn!("Not recording {} in the library: {}", address, e);
            return Ok(());
        }
    };
    let (series_title, chapter_label) = provider.extract_title_and_label(address)?;

    library
        .record_position(&ReadingPosition {
            series_id: series_id.clone(),
            series_title,
            address: address.to_string(),
            chapter_label,
            timestamp: unix_now(),
        })
        .await?;

    if library.thumbnail(&series_id).await?.is_none() {
        match provider.extract_thumbnail(&series_id).await {
            Ok(url) => library.set_thumbnail(&series_id, &url).await?,
            Err(e) => warn!("No thumbnail for series {}: {}", series_id, e),
        }
    }
    Ok(())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
