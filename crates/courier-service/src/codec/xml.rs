//! XML codec backed by `quick-xml`.
//!
//! Decoding maps the root element to a document:
//! - child elements and attributes become object fields, the root name is dropped;
//! - text-only elements become strings and empty elements become `null`;
//! - repeated child elements collect into an array.
//!
//! Encoded documents are wrapped in a `<response>` root element. A top-level
//! array is written as `<item>` children of the root, and a root holding
//! only `<item>` children decodes back to an array.

use std::io::Read;

use bytes::BytesMut;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::{Map, Value};

use super::{CodecError, Decoder, DecoderFactory, Document, Encoder, EncoderFactory, Stream};
use crate::error::BoxError;

const MEDIA_TYPE: &str = "application/xml";
const ROOT: &str = "response";
const ITEM: &str = "item";
const MIXED_TEXT: &str = "$text";

/// Factory for XML decoders and encoders. Neither side is resettable, so
/// every use allocates a fresh codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlCodec;

impl XmlCodec {
    pub const MEDIA_TYPES: &'static [&'static str] = &["application/xml", "text/xml"];
}

fn decode_error(err: impl Into<BoxError>) -> CodecError {
    CodecError::decode(MEDIA_TYPE, err)
}

/// Element under construction.
struct Element {
    fields: Map<String, Value>,
    text: String,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self, CodecError> {
        let mut fields = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(decode_error)?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let name = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value().map_err(decode_error)?;
            add_field(&mut fields, name, Value::String(value.into_owned()));
        }
        Ok(Self {
            fields,
            text: String::new(),
        })
    }

    fn close(mut self) -> Value {
        match (self.fields.is_empty(), self.text.is_empty()) {
            (true, true) => Value::Null,
            (true, false) => Value::String(self.text),
            (false, true) => Value::Object(self.fields),
            (false, false) => {
                self.fields
                    .insert(MIXED_TEXT.to_owned(), Value::String(self.text));
                Value::Object(self.fields)
            }
        }
    }
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// Adds a field, turning repeated names into an array.
fn add_field(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(name, value);
        }
    }
}

/// A root holding nothing but `<item>` children is a list.
fn unwrap_items(root: Value) -> Value {
    match root {
        Value::Object(mut fields) if fields.len() == 1 && fields.contains_key(ITEM) => {
            match fields.remove(ITEM) {
                Some(Value::Array(items)) => Value::Array(items),
                Some(single) => Value::Array(vec![single]),
                None => Value::Object(fields),
            }
        }
        other => other,
    }
}

fn parse_document(text: &str) -> Result<Document, CodecError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut open: Vec<(String, Element)> = Vec::new();
    let mut root = None;

    loop {
        let closed = match reader.read_event().map_err(decode_error)? {
            Event::Start(start) => {
                open.push((element_name(&start), Element::open(&start)?));
                None
            }
            Event::Empty(start) => Some((element_name(&start), Element::open(&start)?.close())),
            Event::End(_) => open.pop().map(|(name, element)| (name, element.close())),
            Event::Text(chunk) => {
                if let Some((_, element)) = open.last_mut() {
                    element.text.push_str(&chunk.unescape().map_err(decode_error)?);
                }
                None
            }
            Event::CData(data) => {
                if let Some((_, element)) = open.last_mut() {
                    element
                        .text
                        .push_str(std::str::from_utf8(&data).map_err(decode_error)?);
                }
                None
            }
            Event::Eof => break,
            _ => None,
        };

        if let Some((name, value)) = closed {
            match open.last_mut() {
                Some((_, parent)) => add_field(&mut parent.fields, name, value),
                None if root.is_none() => root = Some(value),
                None => return Err(decode_error("multiple root elements")),
            }
        }
    }

    if !open.is_empty() {
        return Err(decode_error("unexpected end of document"));
    }
    root.map(unwrap_items)
        .ok_or_else(|| decode_error("missing root element"))
}

struct XmlDecoder {
    stream: Stream,
}

impl Decoder for XmlDecoder {
    fn decode(&mut self) -> Result<Document, CodecError> {
        let mut text = String::new();
        self.stream
            .read_to_string(&mut text)
            .map_err(decode_error)?;
        parse_document(&text)
    }
}

struct XmlEncoder {
    out: BytesMut,
}

impl Encoder for XmlEncoder {
    fn encode(&mut self, value: &Document) -> Result<(), CodecError> {
        let text = match value {
            Value::Array(items) => {
                let mut wrapper = Map::new();
                wrapper.insert(ITEM.to_owned(), Value::Array(items.clone()));
                quick_xml::se::to_string_with_root(ROOT, &wrapper)
            }
            other => quick_xml::se::to_string_with_root(ROOT, other),
        }
        .map_err(|e| CodecError::encode(MEDIA_TYPE, e))?;
        self.out.extend_from_slice(text.as_bytes());
        Ok(())
    }

    fn take_output(&mut self) -> BytesMut {
        self.out.split()
    }
}

impl DecoderFactory for XmlCodec {
    fn new_decoder(&self, stream: Stream) -> Box<dyn Decoder> {
        Box::new(XmlDecoder { stream })
    }
}

impl EncoderFactory for XmlCodec {
    fn new_encoder(&self, buffer: BytesMut) -> Box<dyn Encoder> {
        Box::new(XmlEncoder { out: buffer })
    }
}
