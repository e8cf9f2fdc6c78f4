//! Byte-stream handles.
//!
//! [`ByteStream`] is the payload of a stream variable: an owned, boxed
//! [`AsyncRead`]. Streams are moved between ops (and, through a transport,
//! between processes), never cloned. Wrappers here let an owner learn when a
//! stream reaches EOF or is closed, and restrict a stream to a byte window.

use crate::error::{Result, SwitchError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::oneshot;

/// An owned byte stream.
pub struct ByteStream {
    inner: Pin<Box<dyn AsyncRead + Send>>,
}

impl ByteStream {
    /// Wrap any async reader.
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            inner: Box::pin(reader),
        }
    }

    /// A stream over an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(io::Cursor::new(bytes.into()))
    }

    /// A stream that is immediately at EOF.
    pub fn empty() -> Self {
        Self::new(tokio::io::empty())
    }

    /// Read the remainder of the stream into memory and close it.
    pub async fn read_all(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Wrap the stream so the returned receiver fires once, when the
    /// wrapper is dropped.
    ///
    /// The payload reports whether EOF had been observed before the close.
    pub fn notify_on_close(self) -> (ByteStream, oneshot::Receiver<StreamEnd>) {
        let (tx, rx) = oneshot::channel();
        let watched = Watched {
            inner: self,
            on_eof: None,
            on_close: Some(tx),
            reached_eof: false,
        };
        (ByteStream::new(watched), rx)
    }

    /// Wrap the stream so the returned receiver fires the first time a read
    /// observes EOF.
    ///
    /// If the wrapper is dropped before EOF the sender is dropped too, and
    /// the receiver resolves to an error.
    pub fn notify_on_eof(self) -> (ByteStream, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let watched = Watched {
            inner: self,
            on_eof: Some(tx),
            on_close: None,
            reached_eof: false,
        };
        (ByteStream::new(watched), rx)
    }

    /// Restrict the stream to `range`, skipping leading bytes and truncating
    /// after `range.length` bytes.
    pub fn range(self, range: ByteRange) -> ByteStream {
        if range.is_full() {
            return self;
        }
        let skipped = Skip {
            inner: self,
            to_skip: range.offset,
            scratch: Vec::new(),
        };
        match range.length {
            Some(len) => ByteStream::new(skipped.take(len)),
            None => ByteStream::new(skipped),
        }
    }
}

impl AsyncRead for ByteStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

/// How a watched stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEnd {
    /// Whether a read observed EOF before the stream was closed.
    pub reached_eof: bool,
}

struct Watched {
    inner: ByteStream,
    on_eof: Option<oneshot::Sender<()>>,
    on_close: Option<oneshot::Sender<StreamEnd>>,
    reached_eof: bool,
}

impl AsyncRead for Watched {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let wants_bytes = buf.remaining() > 0;
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;

        if wants_bytes && buf.filled().len() == before {
            self.reached_eof = true;
            if let Some(tx) = self.on_eof.take() {
                let _ = tx.send(());
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for Watched {
    fn drop(&mut self) {
        if let Some(tx) = self.on_close.take() {
            let _ = tx.send(StreamEnd {
                reached_eof: self.reached_eof,
            });
        }
    }
}

struct Skip {
    inner: ByteStream,
    to_skip: u64,
    scratch: Vec<u8>,
}

impl AsyncRead for Skip {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        while this.to_skip > 0 {
            let want = this.to_skip.min(8 * 1024) as usize;
            this.scratch.resize(want, 0);
            let mut discard = ReadBuf::new(&mut this.scratch[..want]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut discard))?;
            let n = discard.filled().len();
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended before the requested range",
                )));
            }
            this.to_skip -= n as u64;
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

/// A byte window into a stream. `length: None` means "to the end".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte of the window.
    pub offset: u64,
    /// Number of bytes in the window, or `None` for an open-ended window.
    pub length: Option<u64>,
}

impl ByteRange {
    /// Create a bounded range.
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }

    /// Create an open-ended range starting at `offset`.
    pub fn from_offset(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    /// The whole stream.
    pub fn full() -> Self {
        Self::default()
    }

    /// Whether this range covers the whole stream.
    pub fn is_full(&self) -> bool {
        self.offset == 0 && self.length.is_none()
    }

    /// Exclusive end offset, if bounded.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|len| self.offset + len)
    }

    /// Express this range relative to a stream that itself starts at
    /// `outer.offset` and covers `outer`.
    pub fn relative_to(&self, outer: &ByteRange) -> Result<ByteRange> {
        let out_of_window = || SwitchError::InvalidTopology {
            cause: format!(
                "range {}..{:?} is not inside the provided window {}..{:?}",
                self.offset,
                self.end(),
                outer.offset,
                outer.end()
            ),
        };

        if self.offset < outer.offset {
            return Err(out_of_window());
        }
        if let Some(outer_end) = outer.end() {
            match self.end() {
                Some(end) if end <= outer_end => {}
                _ => return Err(out_of_window()),
            }
        }
        Ok(ByteRange {
            offset: self.offset - outer.offset,
            length: self.length,
        })
    }
}
