//! Block manifest and the staged-block upload destination. The wire
//! format (base64 zero-padded offsets, `?comp=block`/`?comp=blocklist`,
//! the XML manifest shape) is dictated by the storage server and is
//! preserved bit-exact.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::error::ChunkedIoError;
use crate::io::Destination;
use crate::retry::{Action, Retry, RetryError};
use crate::transport::{Body, RequestTimeout, Transport};

/// A staged chunk awaiting commit.
#[derive(Debug, Clone)]
pub struct Block {
    pub byte_offset: u64,
    pub id: String,
}

impl Block {
    /// `base64(zero-padded-32-digit-decimal(offset))`, dictated by the
    /// storage server; do not "improve" the encoding.
    pub fn id_for_offset(offset: u64) -> String {
        STANDARD.encode(format!("{offset:032}"))
    }

    pub fn new(byte_offset: u64) -> Self {
        Self {
            byte_offset,
            id: Self::id_for_offset(byte_offset),
        }
    }
}

/// A mutex-guarded, seal-once collection of blocks. Adding a block at an
/// existing offset replaces the prior entry so retries never duplicate.
/// Once [`BlockList::prepare`] is called, the list is immutable.
#[derive(Default)]
pub struct BlockList {
    blocks: Mutex<Vec<Block>>,
    sealed: std::sync::atomic::AtomicBool,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_block(&self, offset: u64) -> Result<(), ChunkedIoError> {
        if self.sealed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ChunkedIoError::AlreadyCommitted);
        }
        let mut blocks = self.blocks.lock().await;
        if let Some(existing) = blocks.iter_mut().find(|b| b.byte_offset == offset) {
            *existing = Block::new(offset);
        } else {
            blocks.push(Block::new(offset));
        }
        Ok(())
    }

    /// Seals the list and serializes it to the XML manifest, ordered by
    /// ascending offset. After this call, `add_block` always errors.
    pub async fn prepare(&self) -> Result<String, ChunkedIoError> {
        if self
            .sealed
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(ChunkedIoError::AlreadySealed);
        }
        let mut blocks = self.blocks.lock().await.clone();
        blocks.sort_by_key(|b| b.byte_offset);

        let mut lines = vec![
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>".to_string(),
            "<BlockList>".to_string(),
        ];
        lines.extend(blocks.iter().map(|block| format!("  <Latest>{}</Latest>", block.id)));
        lines.push("</BlockList>".to_string());
        Ok(lines.join("\n"))
    }
}

/// A zero-argument async callback returning the freshest signed URL for
/// a storage operation. The Destination must never cache the URL past a
/// failure.
pub type UrlGenerator = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<String, ChunkedIoError>> + Send>> + Send + Sync>;

/// Destination that stages blocks to a signed URL and commits them with
/// an ordered manifest.
pub struct StorageDestination {
    transport: Transport,
    url_generator: UrlGenerator,
    blocks: BlockList,
    commit_retry: Mutex<Retry>,
}

impl StorageDestination {
    pub fn new(transport: Transport, url_generator: UrlGenerator, commit_retry: Retry) -> Self {
        Self {
            transport,
            url_generator,
            blocks: BlockList::new(),
            commit_retry: Mutex::new(commit_retry),
        }
    }

    async fn current_url(&self) -> Result<String, ChunkedIoError> {
        (self.url_generator)().await
    }

    /// Seals the block list and PUTs the manifest to `?comp=blocklist`.
    /// `write_chunk` after `commit` is a programming error.
    pub async fn commit(&self) -> Result<(), ChunkedIoError> {
        let manifest = self.blocks.prepare().await?;
        let mut retry = self.commit_retry.lock().await;
        let outcome = retry
            .run(|_attempt| {
                let manifest = manifest.clone();
                async move {
                    match self.put_blocklist(&manifest).await {
                        Ok(()) => Action::Done(()),
                        Err(e @ ChunkedIoError::Recoverable(_)) => {
                            if self.recover().await {
                                Action::Retry(e)
                            } else {
                                Action::Fatal(e)
                            }
                        }
                        Err(e) => Action::Fatal(e),
                    }
                }
            })
            .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(RetryError::Fatal(e)) => Err(e),
            Err(e @ RetryError::Exhausted(_)) => Err(ChunkedIoError::RetryExhausted {
                caused_by: Box::new(e),
            }),
        }
    }

    async fn put_blocklist(&self, manifest: &str) -> Result<(), ChunkedIoError> {
        let url = self.current_url().await?;
        let mut headers = crate::headers::HeaderDict::new();
        headers.insert("Content-Type", "text/plain; charset=UTF-8");
        let response = self
            .transport
            .request(
                reqwest::Method::PUT,
                &format!("{url}&comp=blocklist"),
                Some(headers),
                None,
                Some(Body::Text(manifest.to_string())),
                None::<RequestTimeout>,
            )
            .await
            .map_err(|e| ChunkedIoError::Recoverable(e.to_string()))?;
        if response.status != 201 {
            return Err(ChunkedIoError::Recoverable(format!(
                "commit returned unexpected status {}",
                response.status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Destination for StorageDestination {
    async fn write_chunk(&self, offset: u64, data: Bytes) -> Result<(), ChunkedIoError> {
        let url = self.current_url().await?;
        let block_id = Block::id_for_offset(offset);
        let mut headers = crate::headers::HeaderDict::new();
        headers.insert("Content-Length", data.len().to_string());
        let response = self
            .transport
            .request(
                reqwest::Method::PUT,
                &format!("{url}&comp=block&blockid={block_id}"),
                Some(headers),
                None,
                Some(Body::Bytes(data)),
                None::<RequestTimeout>,
            )
            .await
            .map_err(|e| ChunkedIoError::Recoverable(e.to_string()))?;
        if response.status != 201 {
            return Err(ChunkedIoError::Recoverable(format!(
                "block stage returned unexpected status {}",
                response.status
            )));
        }
        self.blocks.add_block(offset).await
    }

    async fn recover(&self) -> bool {
        (self.url_generator)().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_is_base64_of_zero_padded_decimal_offset() {
        assert_eq!(Block::id_for_offset(0), STANDARD.encode(format!("{:032}", 0)));
        assert_eq!(Block::id_for_offset(200), STANDARD.encode(format!("{:032}", 200)));
    }

    #[tokio::test]
    async fn add_block_deduplicates_by_offset_and_orders_ascending_on_prepare() {
        let list = BlockList::new();
        list.add_block(100).await.unwrap();
        list.add_block(0).await.unwrap();
        list.add_block(200).await.unwrap();
        list.add_block(100).await.unwrap(); // retry of the first block

        let xml = list.prepare().await.unwrap();
        let expected_order = [
            Block::id_for_offset(0),
            Block::id_for_offset(100),
            Block::id_for_offset(200),
        ];
        let positions: Vec<usize> = expected_order.iter().map(|id| xml.find(id).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(xml.matches("<Latest>").count(), 3);
    }

    #[tokio::test]
    async fn add_block_after_prepare_is_an_error() {
        let list = BlockList::new();
        list.add_block(0).await.unwrap();
        list.prepare().await.unwrap();
        assert!(matches!(
            list.add_block(0).await,
            Err(ChunkedIoError::AlreadyCommitted)
        ));
    }

    #[tokio::test]
    async fn prepare_is_single_shot() {
        let list = BlockList::new();
        list.prepare().await.unwrap();
        assert!(matches!(list.prepare().await, Err(ChunkedIoError::AlreadySealed)));
    }
}
