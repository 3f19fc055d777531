//! A Source that reads byte ranges from a remote HTTP URL via `Range`
//! headers, renewing the URL through a caller-supplied callback.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ChunkedIoError;
use crate::headers::HeaderDict;
use crate::io::Source;
use crate::io::block::UrlGenerator;
use crate::transport::{RequestTimeout, Transport};

pub struct HttpSource {
    transport: Transport,
    url_generator: UrlGenerator,
    size: u64,
}

impl HttpSource {
    pub fn new(transport: Transport, url_generator: UrlGenerator, size: u64) -> Self {
        Self {
            transport,
            url_generator,
            size,
        }
    }

    async fn current_url(&self) -> Result<String, ChunkedIoError> {
        (self.url_generator)().await
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn get_size(&self) -> Result<u64, ChunkedIoError> {
        Ok(self.size)
    }

    async fn read_chunk(&self, offset: u64, length: u64) -> Result<Bytes, ChunkedIoError> {
        let url = self.current_url().await?;
        let mut headers = HeaderDict::new();
        headers.insert("Range", format!("bytes={}-{}", offset, offset + length - 1));

        let response = self
            .transport
            .request(
                reqwest::Method::GET,
                &url,
                Some(headers),
                None,
                None,
                None::<RequestTimeout>,
            )
            .await
            .map_err(|e| ChunkedIoError::Recoverable(e.to_string()))?;

        if response.status != 206 && response.status != 200 {
            return Err(ChunkedIoError::Recoverable(format!(
                "range read returned unexpected status {}",
                response.status
            )));
        }
        Ok(response.data)
    }

    async fn recover(&self) -> bool {
        (self.url_generator)().await.is_ok()
    }
}
