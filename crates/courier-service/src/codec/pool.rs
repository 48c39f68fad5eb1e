//! Per-factory codec pools.

use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use super::{Decoder, DecoderFactory, Encoder, EncoderFactory, Stream};

/// Decoders built by one factory.
///
/// On construction a probe decoder is built and asked for the resettable
/// capability. When present the probe seeds a cache of reusable decoders,
/// otherwise every acquire builds a fresh decoder.
pub struct DecoderPool {
    factory: Arc<dyn DecoderFactory>,
    cache: Option<Mutex<Vec<Box<dyn Decoder>>>>,
}

impl DecoderPool {
    pub fn new(factory: Arc<dyn DecoderFactory>) -> Self {
        let mut probe = factory.new_decoder(Box::new(io::empty()));
        let cache = probe
            .as_resettable()
            .is_some()
            .then(|| Mutex::new(vec![probe]));
        Self { factory, cache }
    }

    pub fn is_reusable(&self) -> bool {
        self.cache.is_some()
    }

    /// Returns a decoder bound to `stream`, reusing a cached one if possible.
    pub fn acquire(&self, stream: Stream) -> PooledDecoder<'_> {
        let cached = self.cache.as_ref().and_then(|cache| cache.lock().pop());
        let decoder = match cached {
            Some(mut decoder) => match decoder.as_resettable() {
                Some(reset) => {
                    reset.reset(stream);
                    decoder
                }
                None => self.factory.new_decoder(stream),
            },
            None => self.factory.new_decoder(stream),
        };
        PooledDecoder {
            pool: self,
            decoder: Some(decoder),
        }
    }

    fn release(&self, mut decoder: Box<dyn Decoder>) {
        if let Some(cache) = &self.cache {
            // Drop the borrowed stream before caching.
            if let Some(reset) = decoder.as_resettable() {
                reset.reset(Box::new(io::empty()));
            }
            cache.lock().push(decoder);
        }
    }
}

/// Decoder checked out of a [`DecoderPool`], returned on drop.
pub struct PooledDecoder<'a> {
    pool: &'a DecoderPool,
    decoder: Option<Box<dyn Decoder>>,
}

impl Deref for PooledDecoder<'_> {
    type Target = dyn Decoder;

    fn deref(&self) -> &Self::Target {
        self.decoder.as_deref().expect("decoder present until drop")
    }
}

impl DerefMut for PooledDecoder<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.decoder.as_deref_mut().expect("decoder present until drop")
    }
}

impl Drop for PooledDecoder<'_> {
    fn drop(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            self.pool.release(decoder);
        }
    }
}

/// Encoders built by one factory. Same probing rules as [`DecoderPool`].
pub struct EncoderPool {
    factory: Arc<dyn EncoderFactory>,
    cache: Option<Mutex<Vec<Box<dyn Encoder>>>>,
}

impl EncoderPool {
    pub fn new(factory: Arc<dyn EncoderFactory>) -> Self {
        let mut probe = factory.new_encoder(BytesMut::new());
        let cache = probe
            .as_resettable()
            .is_some()
            .then(|| Mutex::new(vec![probe]));
        Self { factory, cache }
    }

    pub fn is_reusable(&self) -> bool {
        self.cache.is_some()
    }

    /// Returns an encoder writing into `buffer`, reusing a cached one if
    /// possible.
    pub fn acquire(&self, buffer: BytesMut) -> PooledEncoder<'_> {
        let cached = self.cache.as_ref().and_then(|cache| cache.lock().pop());
        let encoder = match cached {
            Some(mut encoder) => match encoder.as_resettable() {
                Some(reset) => {
                    reset.reset(buffer);
                    encoder
                }
                None => self.factory.new_encoder(buffer),
            },
            None => self.factory.new_encoder(buffer),
        };
        PooledEncoder {
            pool: self,
            encoder: Some(encoder),
        }
    }

    fn release(&self, mut encoder: Box<dyn Encoder>) {
        if let Some(cache) = &self.cache {
            if let Some(reset) = encoder.as_resettable() {
                reset.reset(BytesMut::new());
            }
            cache.lock().push(encoder);
        }
    }
}

/// Encoder checked out of an [`EncoderPool`], returned on drop.
pub struct PooledEncoder<'a> {
    pool: &'a EncoderPool,
    encoder: Option<Box<dyn Encoder>>,
}

impl Deref for PooledEncoder<'_> {
    type Target = dyn Encoder;

    fn deref(&self) -> &Self::Target {
        self.encoder.as_deref().expect("encoder present until drop")
    }
}

impl DerefMut for PooledEncoder<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.encoder.as_deref_mut().expect("encoder present until drop")
    }
}

impl Drop for PooledEncoder<'_> {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.pool.release(encoder);
        }
    }
}
