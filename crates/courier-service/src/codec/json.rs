//! JSON codec backed by `serde_json`.

use bytes::{BufMut, BytesMut};

use super::{
    CodecError, Decoder, DecoderFactory, Document, Encoder, EncoderFactory, ResetDecoder,
    ResetEncoder, Stream,
};

const MEDIA_TYPE: &str = "application/json";

/// Factory for JSON decoders and encoders. Both sides are resettable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub const MEDIA_TYPES: &'static [&'static str] = &["application/json", "application/text+json"];
}

struct JsonDecoder {
    stream: Stream,
}

impl Decoder for JsonDecoder {
    fn decode(&mut self) -> Result<Document, CodecError> {
        serde_json::from_reader(&mut self.stream).map_err(|e| CodecError::decode(MEDIA_TYPE, e))
    }

    fn as_resettable(&mut self) -> Option<&mut dyn ResetDecoder> {
        Some(self)
    }
}

impl ResetDecoder for JsonDecoder {
    fn reset(&mut self, stream: Stream) {
        self.stream = stream;
    }
}

struct JsonEncoder {
    out: BytesMut,
}

impl Encoder for JsonEncoder {
    fn encode(&mut self, value: &Document) -> Result<(), CodecError> {
        serde_json::to_writer((&mut self.out).writer(), value)
            .map_err(|e| CodecError::encode(MEDIA_TYPE, e))
    }

    fn take_output(&mut self) -> BytesMut {
        self.out.split()
    }

    fn as_resettable(&mut self) -> Option<&mut dyn ResetEncoder> {
        Some(self)
    }
}

impl ResetEncoder for JsonEncoder {
    fn reset(&mut self, buffer: BytesMut) {
        self.out = buffer;
    }
}

impl DecoderFactory for JsonCodec {
    fn new_decoder(&self, stream: Stream) -> Box<dyn Decoder> {
        Box::new(JsonDecoder { stream })
    }
}

impl EncoderFactory for JsonCodec {
    fn new_encoder(&self, buffer: BytesMut) -> Box<dyn Encoder> {
        Box::new(JsonEncoder { out: buffer })
    }
}
