//! Media-type keyed codec pools.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{
    ANY_MEDIA_TYPE, CodecError, DEFAULT_MEDIA_TYPE, DecoderFactory, DecoderPool, Document,
    EncoderFactory, EncoderPool, JsonCodec, XmlCodec, from_document, negotiate_content_type,
    normalize_media_type,
};

/// Encoded response body and the media type it was encoded as.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub media_type: String,
    pub body: Bytes,
}

struct EncoderEntry {
    /// First media type the pool was registered with.
    media_type: String,
    pool: EncoderPool,
}

/// Decoder and encoder pools indexed by normalized media type.
///
/// Registration happens at wiring time; afterwards the registry is only
/// read and can be shared freely.
#[derive(Default)]
pub struct CodecRegistry {
    decoders: HashMap<String, Arc<DecoderPool>>,
    encoders: HashMap<String, Arc<EncoderEntry>>,
    encodable: Vec<String>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut decodable: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        decodable.sort_unstable();
        f.debug_struct("CodecRegistry")
            .field("decodable", &decodable)
            .field("encodable", &self.encodable)
            .finish()
    }
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON registered for both directions and as the `*/*` default.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .set_decoder(Arc::new(JsonCodec), true, JsonCodec::MEDIA_TYPES)
            .set_encoder(Arc::new(JsonCodec), true, JsonCodec::MEDIA_TYPES);
        registry
    }

    /// Registers the XML codecs for both directions.
    pub fn register_xml(&mut self, make_default: bool) -> &mut Self {
        self.set_decoder(Arc::new(XmlCodec), make_default, XmlCodec::MEDIA_TYPES)
            .set_encoder(Arc::new(XmlCodec), make_default, XmlCodec::MEDIA_TYPES)
    }

    /// Indexes one decoder pool under every media type, and under `*/*`
    /// when `make_default` is set. Later registrations replace earlier ones.
    pub fn set_decoder(
        &mut self,
        factory: Arc<dyn DecoderFactory>,
        make_default: bool,
        media_types: &[&str],
    ) -> &mut Self {
        let pool = Arc::new(DecoderPool::new(factory));
        for media_type in media_types {
            self.decoders
                .insert(normalize_media_type(media_type), Arc::clone(&pool));
        }
        if make_default {
            self.decoders.insert(ANY_MEDIA_TYPE.to_owned(), pool);
        }
        self
    }

    /// Encoder counterpart of [`set_decoder`](Self::set_decoder). The media
    /// types become negotiation offers in registration order.
    pub fn set_encoder(
        &mut self,
        factory: Arc<dyn EncoderFactory>,
        make_default: bool,
        media_types: &[&str],
    ) -> &mut Self {
        let normalized: Vec<String> = media_types
            .iter()
            .map(|m| normalize_media_type(m))
            .collect();
        let entry = Arc::new(EncoderEntry {
            media_type: normalized
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_owned()),
            pool: EncoderPool::new(factory),
        });
        for media_type in normalized {
            if !self.encodable.contains(&media_type) {
                self.encodable.push(media_type.clone());
            }
            self.encoders.insert(media_type, Arc::clone(&entry));
        }
        if make_default {
            self.encoders.insert(ANY_MEDIA_TYPE.to_owned(), entry);
        }
        self
    }

    /// Media types offered during response negotiation, in registration
    /// order.
    pub fn encodable_media_types(&self) -> &[String] {
        &self.encodable
    }

    pub fn can_decode(&self, content_type: Option<&str>) -> bool {
        self.decoder_for(content_type).is_ok()
    }

    fn decoder_for(
        &self,
        content_type: Option<&str>,
    ) -> Result<(String, &DecoderPool), CodecError> {
        let media_type = content_type
            .map(normalize_media_type)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_owned());
        match self
            .decoders
            .get(&media_type)
            .or_else(|| self.decoders.get(ANY_MEDIA_TYPE))
        {
            Some(pool) => Ok((media_type, pool.as_ref())),
            None => Err(CodecError::UnsupportedMediaType(media_type)),
        }
    }

    /// Decodes a request body.
    ///
    /// The media type comes from `content_type` (parameters ignored),
    /// defaulting to `application/json`. Unknown media types fall back to
    /// the `*/*` decoder; without one the request is rejected.
    pub fn decode_request<R>(
        &self,
        content_type: Option<&str>,
        body: R,
    ) -> Result<Document, CodecError>
    where
        R: Read + Send + 'static,
    {
        let (media_type, pool) = self.decoder_for(content_type)?;
        tracing::trace!(%media_type, "decoding request");
        let mut decoder = pool.acquire(Box::new(body));
        decoder.decode()
    }

    /// Decodes a request body into `T`. Text scalars fill numeric and
    /// boolean fields, see [`from_document`].
    pub fn decode_request_as<T, R>(
        &self,
        content_type: Option<&str>,
        body: R,
    ) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
        R: Read + Send + 'static,
    {
        let (media_type, pool) = self.decoder_for(content_type)?;
        let document = pool.acquire(Box::new(body)).decode()?;
        from_document(document).map_err(|e| CodecError::decode(media_type, e))
    }

    /// Picks the response media type for an `Accept` header.
    ///
    /// Returns `*/*` when only the default encoder applies.
    pub fn negotiate<'a>(&'a self, accept: Option<&str>) -> Result<&'a str, CodecError> {
        let chosen = negotiate_content_type(accept, &self.encodable, ANY_MEDIA_TYPE);
        if self.encoders.contains_key(chosen) {
            Ok(chosen)
        } else {
            Err(CodecError::NoEncoder {
                requested: accept.unwrap_or(chosen).to_owned(),
            })
        }
    }

    /// Encodes a response document for an `Accept` header.
    pub fn encode_response(
        &self,
        accept: Option<&str>,
        value: &Document,
    ) -> Result<Encoded, CodecError> {
        let chosen = self.negotiate(accept)?;
        let entry = self.encoders.get(chosen).ok_or_else(|| CodecError::NoEncoder {
            requested: chosen.to_owned(),
        })?;
        let media_type = if chosen == ANY_MEDIA_TYPE {
            entry.media_type.clone()
        } else {
            chosen.to_owned()
        };

        let mut encoder = entry.pool.acquire(BytesMut::new());
        encoder.encode(value)?;
        let body = encoder.take_output().freeze();
        Ok(Encoded { media_type, body })
    }

    /// Encodes a serializable response for an `Accept` header.
    pub fn encode_response_as<T: Serialize>(
        &self,
        accept: Option<&str>,
        value: &T,
    ) -> Result<Encoded, CodecError> {
        let document =
            serde_json::to_value(value).map_err(|e| CodecError::encode(DEFAULT_MEDIA_TYPE, e))?;
        self.encode_response(accept, &document)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[test]
    fn default_json_decodes_without_content_type() {
        let registry = CodecRegistry::with_defaults();
        let value = registry.decode_request(None, &b"{\"a\":1}"[..]).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parameters_are_ignored() {
        let registry = CodecRegistry::with_defaults();
        let value = registry
            .decode_request(Some("Application/JSON; charset=utf-8"), &b"[true]"[..])
            .unwrap();
        assert_eq!(value, json!([true]));
    }

    #[test]
    fn unknown_type_uses_default_decoder() {
        let registry = CodecRegistry::with_defaults();
        let value = registry
            .decode_request(Some("application/vnd.acme"), &b"{\"a\":2}"[..])
            .unwrap();
        assert_eq!(value["a"], 2);
    }

    #[test]
    fn no_matching_decoder_is_an_error() {
        let mut registry = CodecRegistry::new();
        registry.register_xml(false);
        let err = registry
            .decode_request(Some("text/csv"), &b"a,b"[..])
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedMediaType(ref m) if m == "text/csv"));
        assert!(!registry.can_decode(None));
    }

    #[test]
    fn typed_decoding() {
        #[derive(Debug, Deserialize)]
        struct Pair {
            a: i64,
            b: i64,
        }

        let registry = CodecRegistry::with_defaults();
        let pair: Pair = registry
            .decode_request_as(None, &b"{\"a\":1,\"b\":2}"[..])
            .unwrap();
        assert_eq!((pair.a, pair.b), (1, 2));

        let err = registry
            .decode_request_as::<Pair, _>(None, &b"{\"a\":\"x\"}"[..])
            .unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }

    #[test]
    fn typed_xml_decoding() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Pair {
            a: i64,
            b: i64,
        }

        let mut registry = CodecRegistry::with_defaults();
        registry.register_xml(false);
        let pair: Pair = registry
            .decode_request_as(
                Some("application/xml"),
                &b"<request><a>1</a><b>2</b></request>"[..],
            )
            .unwrap();
        assert_eq!(pair, Pair { a: 1, b: 2 });

        let list: Vec<i64> = registry
            .decode_request_as(
                Some("text/xml"),
                &b"<request><item>3</item><item>4</item></request>"[..],
            )
            .unwrap();
        assert_eq!(list, [3, 4]);
    }

    #[test]
    fn lists_encode_as_one_xml_document() {
        let mut registry = CodecRegistry::new();
        registry.register_xml(true);
        let encoded = registry
            .encode_response(Some("application/xml"), &json!([1, 2]))
            .unwrap();
        assert_eq!(
            &encoded.body[..],
            b"<response><item>1</item><item>2</item></response>"
        );
    }

    #[test]
    fn missing_encoder_names_requested_type() {
        let mut registry = CodecRegistry::new();
        registry.set_encoder(Arc::new(XmlCodec), false, XmlCodec::MEDIA_TYPES);
        let err = registry
            .encode_response(Some("application/json"), &json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("application/json"));
    }

    #[test]
    fn negotiates_between_encoders() {
        let mut registry = CodecRegistry::with_defaults();
        registry.register_xml(false);
        assert_eq!(
            registry.encodable_media_types(),
            ["application/json", "application/text+json", "application/xml", "text/xml"]
        );

        let xml = registry
            .encode_response(Some("text/xml"), &json!({"name": "courier"}))
            .unwrap();
        assert_eq!(xml.media_type, "text/xml");
        assert!(xml.body.starts_with(b"<response>"));

        let json = registry
            .encode_response(Some("application/*;q=0.8, text/xml;q=0.5"), &json!({"a": 1}))
            .unwrap();
        assert_eq!(json.media_type, "application/json");
        assert_eq!(&json.body[..], b"{\"a\":1}");
    }

    #[test]
    fn default_encoder_reports_its_media_type() {
        let registry = CodecRegistry::with_defaults();
        for accept in [None, Some("*/*"), Some("text/csv")] {
            let encoded = registry.encode_response(accept, &json!(null)).unwrap();
            assert_eq!(encoded.media_type, "application/json");
            assert_eq!(&encoded.body[..], b"null");
        }
    }

    #[test]
    fn typed_encoding() {
        #[derive(Serialize)]
        struct Sum {
            total: i64,
        }

        let registry = CodecRegistry::with_defaults();
        let encoded = registry.encode_response_as(None, &Sum { total: 3 }).unwrap();
        assert_eq!(&encoded.body[..], b"{\"total\":3}");
    }
}
