//! Async streaming of merged frames (feature `async`).
//!
//! [`AsyncFrameStream`] runs a [`FrameStream`](crate::FrameStream) on a
//! blocking thread via `tokio::task::spawn_blocking` and forwards every item
//! through a bounded `mpsc` channel, so the Tokio runtime never waits on a
//! decoder process.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use tokio_stream::StreamExt;
//!
//! use framechunk::{ExtractOptions, FfmpegDecoder, FrameChunkError, FrameExtractor};
//!
//! # async fn example() -> Result<(), FrameChunkError> {
//! let extractor = FrameExtractor::new(FfmpegDecoder::new("input.mp4"), ExtractOptions::new())?;
//! let mut stream = extractor.extract_stream_async(Duration::from_secs(90), |path, index| {
//!     Ok((index, std::fs::read(path)?))
//! })?;
//!
//! while let Some(result) = stream.next().await {
//!     let (index, bytes) = result?;
//!     println!("frame {index}: {} bytes", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio_stream::Stream;

use crate::error::FrameChunkError;
use crate::extract::FrameExtractor;

/// Bounded-channel capacity between the blocking thread and the stream.
const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// A stream of processed frames produced on a blocking thread.
///
/// Implements [`tokio_stream::Stream`], so the
/// [`StreamExt`](tokio_stream::StreamExt) combinators apply.
///
/// Dropping the stream closes the channel; the blocking thread notices at its
/// next send and drops the underlying job, which cancels it.
pub struct AsyncFrameStream<T> {
    receiver: Receiver<Result<T, FrameChunkError>>,
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

impl<T> Stream for AsyncFrameStream<T> {
    type Item = Result<T, FrameChunkError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl FrameExtractor {
    /// Async counterpart of
    /// [`extract_streaming`](FrameExtractor::extract_streaming).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn extract_stream_async<T, F>(
        &self,
        duration: Duration,
        processor: F,
    ) -> Result<AsyncFrameStream<T>, FrameChunkError>
    where
        T: Send + 'static,
        F: FnMut(&Path, u64) -> Result<T, FrameChunkError> + Send + 'static,
    {
        let frames = self.extract_streaming(duration, processor)?;
        let (sender, receiver) = tokio::sync::mpsc::channel(DEFAULT_CHANNEL_CAPACITY);

        let handle = tokio::task::spawn_blocking(move || {
            for item in frames {
                if sender.blocking_send(item).is_err() {
                    log::debug!("Async frame stream dropped; cancelling job");
                    break;
                }
            }
        });

        Ok(AsyncFrameStream { receiver, handle })
    }
}
