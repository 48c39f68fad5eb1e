//! Message codecs, pooling and content negotiation.
//!
//! A codec is a decoder or encoder bound to one stream and one wire format.
//! Factories build codecs; the [`CodecRegistry`] indexes one pool per
//! factory under each media type the factory serves.
//!
//! Codecs that can be rebound to a new stream (see [`ResetDecoder`] and
//! [`ResetEncoder`]) are cached and reused. Other codecs are allocated per
//! use. A codec instance belongs to whoever acquired it until the guard
//! returned by the pool is dropped; instances are never shared.

mod document;
mod json;
mod negotiate;
mod pool;
mod registry;
mod xml;

use std::io::Read;

use bytes::BytesMut;

use crate::error::{BoxError, ServiceError};

pub use document::from_document;
pub use json::JsonCodec;
pub use negotiate::{
    MediaRange, negotiate_content_type, normalize_media_type, parse_accept, response_content_type,
};
pub use pool::{DecoderPool, EncoderPool, PooledDecoder, PooledEncoder};
pub use registry::{CodecRegistry, Encoded};
pub use xml::XmlCodec;

/// Format-neutral message document produced by decoders and consumed by
/// encoders.
pub type Document = serde_json::Value;

/// Readable request body handed to decoders.
pub type Stream = Box<dyn Read + Send>;

/// Media type assumed for requests without a content type.
pub const DEFAULT_MEDIA_TYPE: &str = "application/json";

/// Media range matching everything; also the key of the default pools.
pub const ANY_MEDIA_TYPE: &str = "*/*";

pub trait Decoder: Send {
    /// Reads one document from the bound stream.
    fn decode(&mut self) -> Result<Document, CodecError>;

    /// Returns the rebinding capability when the decoder supports it.
    fn as_resettable(&mut self) -> Option<&mut dyn ResetDecoder> {
        None
    }
}

/// Decoder that can be rebound to a new stream instead of reallocated.
pub trait ResetDecoder {
    fn reset(&mut self, stream: Stream);
}

pub trait Encoder: Send {
    /// Appends the encoded document to the owned output buffer.
    fn encode(&mut self, value: &Document) -> Result<(), CodecError>;

    /// Hands back everything encoded so far, leaving the buffer empty.
    fn take_output(&mut self) -> BytesMut;

    /// Returns the rebinding capability when the encoder supports it.
    fn as_resettable(&mut self) -> Option<&mut dyn ResetEncoder> {
        None
    }
}

/// Encoder that can be rebound to a new buffer instead of reallocated.
pub trait ResetEncoder {
    fn reset(&mut self, buffer: BytesMut);
}

pub trait DecoderFactory: Send + Sync {
    fn new_decoder(&self, stream: Stream) -> Box<dyn Decoder>;
}

pub trait EncoderFactory: Send + Sync {
    fn new_encoder(&self, buffer: BytesMut) -> Box<dyn Encoder>;
}

/// Codec and negotiation failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported media type {0:?}")]
    UnsupportedMediaType(String),

    #[error("no encoder registered for {requested:?}")]
    NoEncoder { requested: String },

    #[error("failed to decode {media_type} payload: {source}")]
    Decode {
        media_type: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to encode {media_type} payload: {source}")]
    Encode {
        media_type: String,
        #[source]
        source: BoxError,
    },
}

impl CodecError {
    pub fn decode(media_type: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Decode {
            media_type: media_type.into(),
            source: source.into(),
        }
    }

    pub fn encode(media_type: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Encode {
            media_type: media_type.into(),
            source: source.into(),
        }
    }
}

/// Request-side failures are the caller's fault, response-side failures are
/// ours.
impl From<CodecError> for ServiceError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedMediaType(_) | CodecError::Decode { .. } => {
                ServiceError::decode_payload(err.to_string())
            }
            CodecError::NoEncoder { .. } | CodecError::Encode { .. } => {
                ServiceError::fault(err.to_string())
            }
        }
    }
}
