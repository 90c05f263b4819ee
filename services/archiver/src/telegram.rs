//! Downloads archived content from the Telegram Bot API
//!
//! `getFile` resolves a `file_id` to a server path, then the file is streamed
//! into memory. Files above the configured cap are refused before the
//! download when the platform reports their size, and cut off mid-stream when
//! it does not.

use crate::error::FetchError;
use crate::pipeline::ContentFetcher;
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use teloxide::Bot;
use teloxide::net::Download;
use teloxide::requests::Requester;
use tokio::io::AsyncWrite;
use tracing::debug;

/// [`ContentFetcher`] backed by a bot's file API
#[derive(Clone)]
pub struct TelegramFetcher {
    bot: Bot,
    max_download_bytes: u64,
}

impl TelegramFetcher {
    pub fn new(bot: Bot, max_download_bytes: u64) -> Self {
        Self {
            bot,
            max_download_bytes,
        }
    }
}

#[async_trait]
impl ContentFetcher for TelegramFetcher {
    async fn fetch(&self, content_id: &str) -> Result<Vec<u8>, FetchError> {
        let file = self.bot.get_file(content_id).await?;

        let reported = u64::from(file.size);
        if reported > self.max_download_bytes {
            return Err(FetchError::TooLarge {
                size: reported,
                limit: self.max_download_bytes,
            });
        }
        if file.path.is_empty() {
            return Err(FetchError::MissingPath(content_id.to_string()));
        }

        let mut sink = CappedBuffer::new(self.max_download_bytes);
        let downloaded = self.bot.download_file(&file.path, &mut sink).await;
        if let Some(size) = sink.overflow() {
            return Err(FetchError::TooLarge {
                size,
                limit: self.max_download_bytes,
            });
        }
        downloaded?;

        debug!("Downloaded {} ({} bytes)", content_id, sink.len());
        Ok(sink.into_inner())
    }
}

/// In-memory write target that fails once more than `limit` bytes arrive
struct CappedBuffer {
    bytes: Vec<u8>,
    limit: u64,
    overflow: Option<u64>,
}

impl CappedBuffer {
    fn new(limit: u64) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            overflow: None,
        }
    }

    /// Byte count that broke the limit, if any write did
    fn overflow(&self) -> Option<u64> {
        self.overflow
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

impl AsyncWrite for CappedBuffer {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let total = self.bytes.len() as u64 + buf.len() as u64;
        if total > self.limit {
            self.overflow = Some(total);
            return Poll::Ready(Err(io::Error::other("download limit exceeded")));
        }
        self.bytes.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
