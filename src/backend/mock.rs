//! Scripted provider used by the loader and window tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

use super::error::ReaderError;
use super::provider::{Adjacent, ContentProvider};

#[derive(Debug, Clone, Default)]
pub struct MockChapter {
    pub images: Option<Vec<String>>,
    pub next: Option<String>,
    pub previous: Option<String>,
}

#[derive(Default)]
pub struct MockProvider {
    chapters: HashMap<String, MockChapter>,
    failing_images: HashSet<String>,
    gates: HashMap<String, Arc<Semaphore>>,
    markup_fetches: AtomicUsize,
    image_fetches: AtomicUsize,
}

pub fn chapter_address(number: usize) -> String {
    format!("/title/1-foo/{}-ch_{}", 9 + number, number)
}

pub fn image_url(chapter: usize, page: usize) -> String {
    format!("https://cdn.example/foo/c{chapter}p{page}.webp")
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chapters `1..=count` linked to each other, each with `pages` images.
    pub fn series(count: usize, pages: usize) -> Self {
        let mut provider = Self::new();
        for number in 1..=count {
            let images = (0..pages).map(|page| image_url(number, page)).collect();
            provider.chapters.insert(
                chapter_address(number),
                MockChapter {
                    images: Some(images),
                    next: (number < count).then(|| chapter_address(number + 1)),
                    previous: (number > 1).then(|| chapter_address(number - 1)),
                },
            );
        }
        provider
    }

    pub fn with_chapter(mut self, address: &str, chapter: MockChapter) -> Self {
        self.chapters.insert(address.to_string(), chapter);
        self
    }

    pub fn with_images(mut self, address: &str, images: &[&str]) -> Self {
        let chapter = self.chapters.entry(address.to_string()).or_default();
        chapter.images = Some(images.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn without_content(mut self, address: &str) -> Self {
        self.chapters.entry(address.to_string()).or_default().images = None;
        self
    }

    pub fn failing_image(mut self, url: &str) -> Self {
        self.failing_images.insert(url.to_string());
        self
    }

    /// Markup fetches for `address` block until the returned semaphore
    /// gets a permit.
    pub fn gate(&mut self, address: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates.insert(address.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn markup_fetches(&self) -> usize {
        self.markup_fetches.load(Ordering::SeqCst)
    }

    pub fn image_fetches(&self) -> usize {
        self.image_fetches.load(Ordering::SeqCst)
    }

    fn lookup(&self, markup: &str) -> Option<&MockChapter> {
        self.chapters.get(markup)
    }

    fn path_parts(address: &str) -> Option<(&str, &str, &str, &str)> {
        let mut segments = address.trim_start_matches('/').split('/');
        if segments.next()? != "title" {
            return None;
        }
        let (series_id, title) = segments.next()?.split_once('-')?;
        let (chapter_id, label) = segments.next()?.split_once('-')?;
        Some((series_id, title, chapter_id, label))
    }
}

#[async_trait]
impl ContentProvider for MockProvider {
    async fn fetch_markup(&self, address: &str) -> Result<String, ReaderError> {
        self.markup_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gates.get(address) {
            let _ = gate.acquire().await;
        }

        if self.chapters.contains_key(address) {
            // The address doubles as markup so extraction can look it up again.
            Ok(address.to_string())
        } else {
            Err(ReaderError::Fetch {
                address: address.to_string(),
                reason: "status 404 Not Found".into(),
            })
        }
    }

    async fn fetch_image(&self, url: &str) -> Result<Bytes, ReaderError> {
        self.image_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.failing_images.contains(url) {
            return Err(ReaderError::Download {
                url: url.to_string(),
                reason: "status 502 Bad Gateway".into(),
            });
        }
        Ok(Bytes::from(format!("bytes of {url}")))
    }

    fn extract_image_list(&self, markup: &str) -> Result<Vec<String>, ReaderError> {
        self.lookup(markup)
            .and_then(|chapter| chapter.images.clone())
            .ok_or_else(|| ReaderError::NoContent(format!("no image list for {markup}")))
    }

    fn extract_adjacent(&self, markup: &str) -> Adjacent {
        self.lookup(markup)
            .map(|chapter| Adjacent {
                next: chapter.next.clone(),
                previous: chapter.previous.clone(),
            })
            .unwrap_or_default()
    }

    fn extract_title_and_label(&self, address: &str) -> Result<(String, String), ReaderError> {
        Self::path_parts(address)
            .map(|(_, title, _, label)| (title.to_string(), label.to_string()))
            .ok_or_else(|| ReaderError::Parse(format!("title and chapter from {address}")))
    }

    fn extract_ids(&self, address: &str) -> Result<(String, String), ReaderError> {
        Self::path_parts(address)
            .map(|(series, _, chapter, _)| (series.to_string(), chapter.to_string()))
            .ok_or_else(|| ReaderError::Parse(format!("ids from {address}")))
    }

    async fn extract_thumbnail(&self, series_id: &str) -> Result<String, ReaderError> {
        Ok(format!("https://cdn.example/thumb/{series_id}.webp"))
    }

    fn page_url(&self, address: &str) -> String {
        format!("https://mock.example{address}")
    }
}
