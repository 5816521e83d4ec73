use async_trait::async_trait;
use bytes::Bytes;

use super::error::ReaderError;

/// Links to the neighbouring chapters found in a chapter's markup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjacent {
    pub next: Option<String>,
    pub previous: Option<String>,
}

/// A site the reader can pull chapters from.
///
/// Fetching is async and goes over the network; extraction works on markup
/// or addresses that were already fetched.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn fetch_markup(&self, address: &str) -> Result<String, ReaderError>;

    async fn fetch_image(&self, url: &str) -> Result<Bytes, ReaderError>;

    /// Ordered page image URLs. Fails with [`ReaderError::NoContent`] when the
    /// markup has no reader structure, which usually means the series ended.
    fn extract_image_list(&self, markup: &str) -> Result<Vec<String>, ReaderError>;

    fn extract_adjacent(&self, markup: &str) -> Adjacent;

    /// Series title and chapter label, as written in the address.
    fn extract_title_and_label(&self, address: &str) -> Result<(String, String), ReaderError>;

    /// Series id and chapter id, as written in the address.
    fn extract_ids(&self, address: &str) -> Result<(String, String), ReaderError>;

    async fn extract_thumbnail(&self, series_id: &str) -> Result<String, ReaderError>;

    fn page_url(&self, address: &str) -> String;
}
