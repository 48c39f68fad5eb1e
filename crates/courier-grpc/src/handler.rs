//! Server-side wrappers turning tonic calls into endpoint invocations.

use std::sync::Arc;

use courier_service::endpoint::{downcast, payload};
use courier_service::error::{BoxError, ServiceError};
use courier_service::{Context, Endpoint, Payload};
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use crate::error::encode_error;
use crate::metadata::{OutgoingMetadata, context_from_metadata};
use crate::stream::{ClientStream, ResponseStream, ServerStream};

/// Converts an incoming message and its metadata into the endpoint request.
pub type DecodeFn<M> =
    Arc<dyn Fn(&Context, M, &MetadataMap) -> Result<Payload, BoxError> + Send + Sync>;

/// Converts the endpoint response into the outgoing message, optionally
/// adding response headers and trailers.
pub type EncodeFn<R> =
    Arc<dyn Fn(&Context, Payload, &mut OutgoingMetadata) -> Result<R, BoxError> + Send + Sync>;

fn decode_failure(err: BoxError) -> Status {
    if err.is::<ServiceError>() {
        encode_error(err)
    } else {
        Status::invalid_argument(err.to_string())
    }
}

fn encode_failure(err: BoxError) -> Status {
    if err.is::<ServiceError>() {
        encode_error(err)
    } else {
        Status::unknown(err.to_string())
    }
}

/// Serves a unary method through an endpoint.
pub struct UnaryHandler<M, R> {
    endpoint: Endpoint,
    decode: DecodeFn<M>,
    encode: EncodeFn<R>,
}

impl<M, R> Clone for UnaryHandler<M, R> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Arc::clone(&self.endpoint),
            decode: Arc::clone(&self.decode),
            encode: Arc::clone(&self.encode),
        }
    }
}

impl<M, R> UnaryHandler<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    pub fn new<D, E>(endpoint: Endpoint, decode: D, encode: E) -> Self
    where
        D: Fn(&Context, M, &MetadataMap) -> Result<Payload, BoxError> + Send + Sync + 'static,
        E: Fn(&Context, Payload, &mut OutgoingMetadata) -> Result<R, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            endpoint,
            decode: Arc::new(decode),
            encode: Arc::new(encode),
        }
    }

    /// Handler whose messages are the endpoint's request and response
    /// types.
    pub fn direct(endpoint: Endpoint) -> Self {
        Self::new(
            endpoint,
            |_ctx, message, _metadata| Ok(payload(message)),
            |_ctx, response, _outgoing| Ok(downcast::<R>(response)?),
        )
    }

    /// Decodes the request, invokes the endpoint and encodes its response.
    ///
    /// Decoder service errors are forwarded, other decoder errors become
    /// `InvalidArgument`. Endpoint errors go through [`encode_error`].
    /// Encoder service errors are forwarded, other encoder errors and
    /// unsendable metadata become `Unknown`.
    pub async fn handle(&self, request: Request<M>) -> Result<Response<R>, Status> {
        let metadata = request.metadata().clone();
        let ctx = context_from_metadata(&metadata);
        let message = request.into_inner();

        let request = (self.decode)(&ctx, message, &metadata).map_err(decode_failure)?;
        let response = (self.endpoint)(ctx.clone(), request)
            .await
            .map_err(encode_error)?;

        let mut outgoing = OutgoingMetadata::new();
        let message = (self.encode)(&ctx, response, &mut outgoing).map_err(encode_failure)?;

        let mut response = Response::new(message);
        if !outgoing.is_empty() {
            outgoing.apply(response.metadata_mut())?;
        }
        Ok(response)
    }
}

/// Converts the initial, non-streamed part of a streaming call into the
/// endpoint request. The message is present for server streams only;
/// client and bidirectional streams decode from metadata alone.
pub type StreamDecodeFn<M> =
    Arc<dyn Fn(&Context, Option<M>, &MetadataMap) -> Result<Payload, BoxError> + Send + Sync>;

/// Endpoint request of a server-streaming method: the decoded initial
/// message and the stream to send responses on.
pub struct ServerStreamRequest<T> {
    pub request: Payload,
    pub stream: ServerStream<T>,
}

/// Endpoint request of a client-streaming method: the decoded initial
/// request and the stream of incoming messages.
pub struct ClientStreamRequest<M> {
    pub request: Payload,
    pub stream: ClientStream<M>,
}

/// Endpoint request of a bidirectional method.
pub struct BidiStreamRequest<M, T> {
    pub request: Payload,
    pub incoming: ClientStream<M>,
    pub outgoing: ServerStream<T>,
}

/// Serves streaming methods through an endpoint.
///
/// The endpoint receives one of [`ServerStreamRequest`],
/// [`ClientStreamRequest`] or [`BidiStreamRequest`] as its request payload.
/// Its response payload is ignored for server and bidirectional streams.
pub struct StreamHandler<M> {
    endpoint: Endpoint,
    decode: Option<StreamDecodeFn<M>>,
}

impl<M> Clone for StreamHandler<M> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Arc::clone(&self.endpoint),
            decode: self.decode.clone(),
        }
    }
}

impl<M: Send + 'static> StreamHandler<M> {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            decode: None,
        }
    }

    /// Sets the decoder run once per call, before the endpoint.
    #[must_use]
    pub fn with_decoder<D>(mut self, decode: D) -> Self
    where
        D: Fn(&Context, Option<M>, &MetadataMap) -> Result<Payload, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.decode = Some(Arc::new(decode));
        self
    }

    /// Decodes the initial part of a call. Without a decoder the message
    /// itself is the request, or `()` when there is none.
    pub fn decode(
        &self,
        ctx: &Context,
        message: Option<M>,
        metadata: &MetadataMap,
    ) -> Result<Payload, Status> {
        match (&self.decode, message) {
            (Some(decode), message) => decode(ctx, message, metadata).map_err(decode_failure),
            (None, Some(message)) => Ok(payload(message)),
            (None, None) => Ok(payload(())),
        }
    }

    /// Invokes the endpoint with `request` as its payload.
    pub async fn handle<S: Send + 'static>(
        &self,
        ctx: Context,
        request: S,
    ) -> Result<Payload, Status> {
        (self.endpoint)(ctx, payload(request))
            .await
            .map_err(encode_error)
    }

    /// Runs the endpoint on its own task; an endpoint error terminates
    /// `outgoing` with the encoded status.
    fn spawn_streaming<T, S>(&self, ctx: Context, outgoing: ServerStream<T>, request: S)
    where
        T: Send + 'static,
        S: Send + 'static,
    {
        let handler = self.clone();
        tokio::spawn(async move {
            if let Err(status) = handler.handle(ctx, request).await {
                if outgoing.send_error(Box::new(status)).await.is_err() {
                    tracing::debug!("stream closed before error could be sent");
                }
            }
        });
    }

    /// Serves a server-streaming call.
    ///
    /// The endpoint runs on its own task and sends on
    /// [`ServerStreamRequest::stream`].
    pub fn serve_server_stream<T: Send + 'static>(
        &self,
        request: Request<M>,
        buffer: usize,
    ) -> Result<Response<ResponseStream<T>>, Status> {
        let metadata = request.metadata().clone();
        let ctx = context_from_metadata(&metadata);
        let initial = self.decode(&ctx, Some(request.into_inner()), &metadata)?;

        let (stream, responses) = ServerStream::channel(buffer);
        let request = ServerStreamRequest {
            request: initial,
            stream: stream.clone(),
        };
        self.spawn_streaming(ctx, stream, request);
        Ok(Response::new(responses))
    }

    /// Serves a client-streaming call, returning the endpoint response as
    /// `R`.
    ///
    /// `S` is usually [`tonic::Streaming<M>`].
    pub async fn serve_client_stream<R, S>(
        &self,
        request: Request<S>,
    ) -> Result<Response<R>, Status>
    where
        R: Send + 'static,
        S: Into<ClientStream<M>>,
    {
        let metadata = request.metadata().clone();
        let ctx = context_from_metadata(&metadata);
        let initial = self.decode(&ctx, None, &metadata)?;

        let request = ClientStreamRequest {
            request: initial,
            stream: request.into_inner().into(),
        };
        let response = self.handle(ctx, request).await?;
        let response = downcast::<R>(response).map_err(|e| encode_error(Box::new(e)))?;
        Ok(Response::new(response))
    }

    /// Serves a bidirectional call.
    ///
    /// The endpoint runs on its own task, reading
    /// [`BidiStreamRequest::incoming`] and sending on
    /// [`BidiStreamRequest::outgoing`].
    pub fn serve_bidi_stream<T, S>(
        &self,
        request: Request<S>,
        buffer: usize,
    ) -> Result<Response<ResponseStream<T>>, Status>
    where
        T: Send + 'static,
        S: Into<ClientStream<M>>,
    {
        let metadata = request.metadata().clone();
        let ctx = context_from_metadata(&metadata);
        let initial = self.decode(&ctx, None, &metadata)?;

        let (outgoing, responses) = ServerStream::channel(buffer);
        let request = BidiStreamRequest {
            request: initial,
            incoming: request.into_inner().into(),
            outgoing: outgoing.clone(),
        };
        self.spawn_streaming(ctx, outgoing, request);
        Ok(Response::new(responses))
    }
}
