use std::fmt;

use bytes::{Bytes, BytesMut};
use futures::stream::{LocalBoxStream, Stream, StreamExt, TryStreamExt};

/// Payload of a request or response. Hosts hand over inbound bodies as streams; everything the
/// relay and the worker produce themselves is buffered.
pub enum Body {
    Once(Bytes),
    Stream(LocalBoxStream<'static, Result<Bytes, anyhow::Error>>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Once(Bytes::new())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Body::Once(bytes.into())
    }

    pub fn from_stream<S, E>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        Body::Stream(chunks.map_err(Into::into).boxed_local())
    }

    /// Bytes of a buffered body.
    ///
    /// # Panics
    ///
    /// When called on a stream; use [`Body::collect`] for those.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Once(bytes) => bytes,
            Body::Stream(_) => panic!("as_bytes called on a streaming body"),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// A stream may still yield nothing, but only a buffered body is known to be empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Once(bytes) => bytes.is_empty(),
            Body::Stream(_) => false,
        }
    }

    pub async fn collect(self) -> Result<Bytes, anyhow::Error> {
        let mut chunks = match self {
            Body::Once(bytes) => return Ok(bytes),
            Body::Stream(chunks) => chunks,
        };
        let mut joined = BytesMut::new();
        while let Some(chunk) = chunks.try_next().await? {
            joined.extend_from_slice(&chunk);
        }
        Ok(joined.freeze())
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Once(bytes) => write!(f, "Body({} bytes)", bytes.len()),
            Body::Stream(_) => f.write_str("Body(stream)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Once(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Once(bytes.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Once(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Once(text.into())
    }
}
