use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

use super::buffers::ImageBuffers;
use super::error::ReaderError;
use super::provider::{Adjacent, ContentProvider};

pub const UNKNOWN_TITLE: &str = "Unknown";
pub const UNKNOWN_LABEL: &str = "ch_?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub key: String,
    pub ordinal: usize,
}

/// A fully downloaded chapter, ready to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterView {
    pub title: String,
    pub images: Vec<ImageRef>,
}

impl ChapterView {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(|image| image.key.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedChapter {
    pub address: String,
    pub view: ChapterView,
    pub adjacent: Adjacent,
}

/// Turns a chapter address into a [`ChapterView`] whose pages sit in the
/// shared [`ImageBuffers`].
///
/// Every key of a returned view carries one reference taken on behalf of the
/// caller, who must [`ImageBuffers::release`] it when the view is dropped.
#[derive(Clone)]
pub struct ChapterLoader {
    provider: Arc<dyn ContentProvider>,
    buffers: ImageBuffers,
}

impl ChapterLoader {
    pub fn new(provider: Arc<dyn ContentProvider>, buffers: ImageBuffers) -> Self {
        Self { provider, buffers }
    }

    pub fn provider(&self) -> &Arc<dyn ContentProvider> {
        &self.provider
    }

    pub fn buffers(&self) -> &ImageBuffers {
        &self.buffers
    }

    pub async fn load(&self, address: &str) -> Result<ChapterView, ReaderError> {
        self.load_chapter(address).await.map(|chapter| chapter.view)
    }

    pub async fn load_chapter(&self, address: &str) -> Result<LoadedChapter, ReaderError> {
        let markup = self.provider.fetch_markup(address).await?;

        let sources = self.provider.extract_image_list(&markup)?;
        if sources.is_empty() {
            return Err(ReaderError::NoContent(format!("{address} lists no images")));
        }
        let adjacent = self.provider.extract_adjacent(&markup);

        let (title, label) = match self.provider.extract_title_and_label(address) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Could not extract title and chapter from {}: {}", address, e);
                (UNKNOWN_TITLE.to_string(), UNKNOWN_LABEL.to_string())
            }
        };

        let images = self.download_all(&sources).await?;
        debug!("Loaded {} ({} pages)", address, images.len());

        Ok(LoadedChapter {
            address: address.to_string(),
            view: ChapterView {
                title: display_title(&title, &label),
                images,
            },
            adjacent,
        })
    }

    /// One task per page. The first failure aborts the rest and releases
    /// whatever was already stored.
    async fn download_all(&self, sources: &[String]) -> Result<Vec<ImageRef>, ReaderError> {
        let keys = assign_keys(sources);
        let mut downloads = JoinSet::new();
        let mut urls_by_task = HashMap::new();

        for (url, key) in sources.iter().zip(&keys) {
            let provider = Arc::clone(&self.provider);
            let buffers = self.buffers.clone();
            let (url_owned, key) = (url.clone(), key.clone());

            let handle = downloads.spawn(async move {
                let bytes = provider
                    .fetch_image(&url_owned)
                    .await
                    .map_err(|e| as_download_error(&url_owned, e))?;
                buffers.acquire(key.clone(), bytes).await;
                Ok::<_, ReaderError>(key)
            });
            urls_by_task.insert(handle.id(), url.clone());
        }

        let mut acquired = Vec::with_capacity(keys.len());
        let mut failure = None;

        while let Some(joined) = downloads.join_next_with_id().await {
            let error = match joined {
                Ok((_, Ok(key))) => {
                    acquired.push(key);
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => ReaderError::Download {
                    url: urls_by_task.get(&e.id()).cloned().unwrap_or_default(),
                    reason: format!("download task failed: {e}"),
                },
            };

            if failure.is_none() {
                downloads.abort_all();
                failure = Some(error);
            }
        }

        if let Some(error) = failure {
            self.buffers.release(&acquired).await;
            return Err(error);
        }

        Ok(keys
            .into_iter()
            .enumerate()
            .map(|(ordinal, key)| ImageRef { key, ordinal })
            .collect())
    }
}

fn as_download_error(url: &str, error: ReaderError) -> ReaderError {
    match error {
        ReaderError::Download { .. } => error,
        other => ReaderError::Download {
            url: url.to_string(),
            reason: other.to_string(),
        },
    }
}

pub fn display_title(title: &str, label: &str) -> String {
    format!("{} - {}", title.replace('-', " "), label.replace('_', " "))
}

/// The last path segment of an image URL, without query or fragment.
pub fn image_key(source: &str) -> &str {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    path.rsplit('/').next().unwrap_or(path)
}

fn assign_keys(sources: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .enumerate()
        .map(|(ordinal, source)| {
            let mut key = match image_key(source) {
                "" => format!("page-{ordinal}"),
                segment => segment.to_string(),
            };
            while !seen.insert(key.clone()) {
                key = format!("{ordinal}-{key}");
            }
            key
        })
        .collect()
}
