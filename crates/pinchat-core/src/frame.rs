//! Length-prefixed framing over a byte stream.
//!
//! Every logical message travels as one frame:
//!
//! ```text
//! ┌──────────────────────┬─────────────────────────────┐
//! │ length: u32 (BE)     │ payload: `length` bytes     │
//! └──────────────────────┴─────────────────────────────┘
//! ```
//!
//! Byte streams do not preserve write boundaries, so one read is never
//! assumed to be one message. The reader buffers until a whole frame is
//! present.
//!
//! # Invariants
//!
//! - A declared length above the reader's limit is rejected before any payload
//!   is read ([`FrameError::TooLarge`]). The stream is unusable afterwards.
//! - End-of-stream exactly on a frame boundary is a clean close (`Ok(None)`);
//!   anywhere else it is [`FrameError::UnexpectedEof`].

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Hard upper bound on a frame payload in either direction.
pub const MAX_FRAME_PAYLOAD: usize = 2048;

/// Append one frame carrying `payload` to `dst`.
///
/// # Errors
///
/// - [`FrameError::TooLarge`] if `payload` exceeds [`MAX_FRAME_PAYLOAD`]
pub fn encode(payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(FrameError::TooLarge { size: payload.len(), max: MAX_FRAME_PAYLOAD });
    }

    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame from the front of `src`.
///
/// Returns the payload and the number of bytes consumed, or `Ok(None)` if
/// `src` does not yet hold a complete frame.
///
/// # Errors
///
/// - [`FrameError::TooLarge`] if the declared length exceeds `max_payload`
pub fn decode(src: &[u8], max_payload: usize) -> Result<Option<(&[u8], usize)>, FrameError> {
    let Some(prefix) = src.get(..LENGTH_PREFIX_SIZE) else {
        return Ok(None);
    };

    let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
    len_bytes.copy_from_slice(prefix);
    let size = u32::from_be_bytes(len_bytes) as usize;

    if size > max_payload {
        return Err(FrameError::TooLarge { size, max: max_payload });
    }

    let end = LENGTH_PREFIX_SIZE + size;
    Ok(src.get(LENGTH_PREFIX_SIZE..end).map(|payload| (payload, end)))
}

/// Interpret a frame payload as UTF-8 text.
///
/// # Errors
///
/// - [`FrameError::InvalidUtf8`] if the bytes are not valid UTF-8
pub fn payload_text(payload: &[u8]) -> Result<&str, FrameError> {
    std::str::from_utf8(payload).map_err(|_| FrameError::InvalidUtf8)
}

/// Reads whole frames from the receive half of a stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_payload: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader using the default [`MAX_FRAME_PAYLOAD`] limit.
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_FRAME_PAYLOAD)
    }

    /// Wrap a reader with a custom payload limit.
    pub fn with_limit(inner: R, max_payload: usize) -> Self {
        Self { inner, max_payload }
    }

    /// Read the next frame payload.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly between
    /// frames.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];

        // First byte distinguishes a clean close from a truncated frame.
        if self.inner.read(&mut prefix[..1]).await? == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut prefix[1..]).await?;

        let size = u32::from_be_bytes(prefix) as usize;
        if size > self.max_payload {
            return Err(FrameError::TooLarge { size, max: self.max_payload });
        }

        let mut payload = BytesMut::zeroed(size);
        self.inner.read_exact(&mut payload).await?;
        Ok(Some(payload.freeze()))
    }

    /// Read the next frame and decode it as text.
    ///
    /// A non-UTF-8 payload yields [`FrameError::InvalidUtf8`], which is
    /// recoverable: the stream stays aligned on the next frame.
    pub async fn read_text(&mut self) -> Result<Option<String>, FrameError> {
        match self.read_frame().await? {
            Some(payload) => Ok(Some(payload_text(&payload)?.to_string())),
            None => Ok(None),
        }
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes whole frames to the send half of a stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    scratch: BytesMut,
}

/// Type-erased writer so connections over different transports can share a
/// registry.
pub type BoxedWriter = FrameWriter<Box<dyn AsyncWrite + Send + Unpin>>;

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self { inner, scratch: BytesMut::with_capacity(LENGTH_PREFIX_SIZE + 256) }
    }

    /// Write one frame and flush it.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        self.scratch.clear();
        encode(payload, &mut self.scratch)?;
        self.inner.write_all(&self.scratch).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write one text frame and flush it.
    pub async fn write_text(&mut self, text: &str) -> Result<(), FrameError> {
        self.write_frame(text.as_bytes()).await
    }

    /// Shut down the write half. The peer's reader sees end-of-stream.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Send + Unpin + 'static> FrameWriter<W> {
    /// Erase the writer type.
    pub fn boxed(self) -> BoxedWriter {
        FrameWriter { inner: Box::new(self.inner), scratch: self.scratch }
    }
}
