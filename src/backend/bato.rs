use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use std::time::Duration;

use super::error::ReaderError;
use super::provider::{Adjacent, ContentProvider};
use crate::config::Config;

pub const BASE_URL: &str = "https://bato.to";

/// Provider for the bato.to reader layout.
pub struct Bato {
    client: reqwest::Client,
    base_url: String,
    image_block: Regex,
    image_file: Regex,
    next_link: Regex,
    prev_link: Regex,
    title_and_label: Regex,
    ids: Regex,
    thumbnail: Regex,
}

fn build_client(config: &Config) -> Result<reqwest::Client, ReaderError> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

impl Bato {
    pub fn new(config: &Config) -> Result<Self, ReaderError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            image_block: Regex::new(
                r#"<astro-island.*props=".*;imageFiles&quot;:\[1,&quot;\[(.*)\]&quot;\]"#,
            )?,
            image_file: Regex::new(r#"\[0,\\&quot;([^&]*)\\&quot;\]"#)?,
            next_link: Regex::new(r#"<a data-hk="0-6-0" .*? href="(.*?)["']"#)?,
            prev_link: Regex::new(r#"<a data-hk="0-5-0" .*? href="(.*?)["']"#)?,
            title_and_label: Regex::new(r"/title/\d*-(.*?)/\d*-(.*)")?,
            ids: Regex::new(r"/title/(\d*)-.*?/(\d*)-.*")?,
            thumbnail: Regex::new(r#"<img data-hk="0-1-0" .*? src="(.*?)["']"#)?,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("status {status}"));
        }

        response.text().await.map_err(|e| e.to_string())
    }

    fn link(pattern: &Regex, markup: &str) -> Option<String> {
        pattern
            .captures(markup)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|href| !href.is_empty())
    }
}

#[async_trait]
impl ContentProvider for Bato {
    async fn fetch_markup(&self, address: &str) -> Result<String, ReaderError> {
        let url = format!("{}?load=2", self.page_url(address));
        self.get_text(&url)
            .await
            .map_err(|reason| ReaderError::Fetch {
                address: address.to_string(),
                reason,
            })
    }

    async fn fetch_image(&self, url: &str) -> Result<Bytes, ReaderError> {
        let download_error = |reason: String| ReaderError::Download {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("status {status}")));
        }

        response
            .bytes()
            .await
            .map_err(|e| download_error(e.to_string()))
    }

    fn extract_image_list(&self, markup: &str) -> Result<Vec<String>, ReaderError> {
        let block = self
            .image_block
            .captures(markup)
            .and_then(|c| c.get(1))
            .ok_or_else(|| ReaderError::NoContent("no image list in chapter markup".into()))?;

        Ok(self
            .image_file
            .captures_iter(block.as_str())
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect())
    }

    fn extract_adjacent(&self, markup: &str) -> Adjacent {
        Adjacent {
            next: Self::link(&self.next_link, markup),
            previous: Self::link(&self.prev_link, markup),
        }
    }

    fn extract_title_and_label(&self, address: &str) -> Result<(String, String), ReaderError> {
        let captures = self
            .title_and_label
            .captures(address)
            .ok_or_else(|| ReaderError::Parse(format!("title and chapter from {address}")))?;

        Ok((captures[1].to_string(), captures[2].to_string()))
    }

    fn extract_ids(&self, address: &str) -> Result<(String, String), ReaderError> {
        let captures = self
            .ids
            .captures(address)
            .ok_or_else(|| ReaderError::Parse(format!("title and chapter ids from {address}")))?;

        let (series, chapter) = (&captures[1], &captures[2]);
        if series.is_empty() || chapter.is_empty() {
            return Err(ReaderError::Parse(format!("numeric ids from {address}")));
        }
        Ok((series.to_string(), chapter.to_string()))
    }

    async fn extract_thumbnail(&self, series_id: &str) -> Result<String, ReaderError> {
        let address = format!("/title/{series_id}");
        let markup = self
            .get_text(&self.page_url(&address))
            .await
            .map_err(|reason| ReaderError::Fetch { address, reason })?;

        Self::link(&self.thumbnail, &markup)
            .ok_or_else(|| ReaderError::Parse(format!("thumbnail for series {series_id}")))
    }

    fn page_url(&self, address: &str) -> String {
        format!("{}{}", self.base_url, address)
    }
}
