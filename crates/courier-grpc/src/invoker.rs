//! Client-side wrapper exposing a remote unary method as an endpoint.

use std::future::Future;
use std::sync::Arc;

use courier_service::error::{BoxError, ServiceError};
use courier_service::{Context, Endpoint, Payload};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tonic::metadata::{Ascii, MetadataMap, MetadataValue};
use tonic::{Request, Response, Status};

use crate::error::decode_error;
use crate::metadata::REQUEST_ID_KEY;

/// Performs the remote call, typically a generated tonic client method.
pub type RemoteCall<M, R> =
    Arc<dyn Fn(Request<M>) -> BoxFuture<'static, Result<Response<R>, Status>> + Send + Sync>;

/// Builds the outgoing message and request metadata from the endpoint
/// request.
pub type RequestEncoder<M> =
    Arc<dyn Fn(&Context, Payload, &mut MetadataMap) -> Result<M, BoxError> + Send + Sync>;

/// Builds the endpoint response from the incoming message and response
/// metadata (headers and trailers).
pub type ResponseDecoder<R> =
    Arc<dyn Fn(&Context, R, &MetadataMap) -> Result<Payload, BoxError> + Send + Sync>;

/// Invokes a remote unary method.
pub struct UnaryInvoker<M, R> {
    call: RemoteCall<M, R>,
    encode: RequestEncoder<M>,
    decode: ResponseDecoder<R>,
}

impl<M, R> Clone for UnaryInvoker<M, R> {
    fn clone(&self) -> Self {
        Self {
            call: Arc::clone(&self.call),
            encode: Arc::clone(&self.encode),
            decode: Arc::clone(&self.decode),
        }
    }
}

impl<M, R> UnaryInvoker<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    pub fn new<C, Fut, E, D>(call: C, encode: E, decode: D) -> Self
    where
        C: Fn(Request<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<R>, Status>> + Send + 'static,
        E: Fn(&Context, Payload, &mut MetadataMap) -> Result<M, BoxError> + Send + Sync + 'static,
        D: Fn(&Context, R, &MetadataMap) -> Result<Payload, BoxError> + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(move |request| call(request).boxed()),
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    /// Encodes the request, performs the call and decodes the response.
    ///
    /// The request ID and remaining deadline of `ctx` are propagated. An
    /// error status is translated back into a service error, and
    /// cancelling `ctx` abandons the call.
    pub async fn invoke(&self, ctx: Context, request: Payload) -> Result<Payload, BoxError> {
        let mut metadata = MetadataMap::new();
        let message = (self.encode)(&ctx, request, &mut metadata)?;

        let mut request = Request::new(message);
        *request.metadata_mut() = metadata;
        if let Some(id) = ctx.request_id() {
            match id.parse::<MetadataValue<Ascii>>() {
                Ok(value) => {
                    request.metadata_mut().insert(REQUEST_ID_KEY, value);
                }
                Err(e) => tracing::debug!(request_id = id, error = %e, "request ID not propagated"),
            }
        }
        if let Some(remaining) = ctx.remaining() {
            request.set_timeout(remaining);
        }

        let response = tokio::select! {
            response = (self.call)(request) => response,
            () = ctx.cancelled() => {
                return Err(Box::new(ServiceError::temporary(
                    "cancelled",
                    "request cancelled by caller",
                )));
            }
        };
        let response = response.map_err(|status| decode_error(&status))?;

        let (metadata, message, _) = response.into_parts();
        (self.decode)(&ctx, message, &metadata)
    }

    /// Exposes the remote method as a local endpoint.
    pub fn into_endpoint(self) -> Endpoint {
        let this = Arc::new(self);
        Arc::new(move |ctx, request| {
            let this = Arc::clone(&this);
            async move { this.invoke(ctx, request).await }.boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_service::endpoint::{downcast, payload, typed_endpoint};
    use tonic::Code;

    use super::*;
    use crate::handler::UnaryHandler;

    #[derive(Clone, PartialEq, prost::Message)]
    struct AddRequest {
        #[prost(int64, tag = "1")]
        a: i64,
        #[prost(int64, tag = "2")]
        b: i64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    struct AddResponse {
        #[prost(int64, tag = "1")]
        sum: i64,
        #[prost(string, tag = "2")]
        request_id: String,
        #[prost(bool, tag = "3")]
        has_deadline: bool,
    }

    fn server() -> UnaryHandler<AddRequest, AddResponse> {
        let add = typed_endpoint(|ctx: Context, (a, b): (i64, i64)| async move {
            if a < 0 || b < 0 {
                return Err(ServiceError::permanent("negative", "operands must be positive"));
            }
            Ok(AddResponse {
                sum: a + b,
                request_id: ctx.request_id().unwrap_or_default().to_owned(),
                has_deadline: ctx.deadline().is_some(),
            })
        });
        UnaryHandler::new(
            add,
            |_ctx, message: AddRequest, _metadata| Ok(payload((message.a, message.b))),
            |_ctx, response, outgoing| {
                outgoing.insert_trailer("x-handled", "1");
                Ok(downcast::<AddResponse>(response)?)
            },
        )
    }

    fn client(
        server: UnaryHandler<AddRequest, AddResponse>,
    ) -> UnaryInvoker<AddRequest, AddResponse> {
        UnaryInvoker::new(
            move |request| {
                let server = server.clone();
                async move { server.handle(request).await }
            },
            |_ctx, request, _metadata| {
                let (a, b) = downcast::<(i64, i64)>(request)?;
                Ok(AddRequest { a, b })
            },
            |_ctx, response: AddResponse, metadata| {
                assert!(metadata.contains_key("x-handled"));
                Ok(payload(response))
            },
        )
    }

    #[tokio::test]
    async fn in_process_round_trip() {
        let ep = client(server()).into_endpoint();
        let ctx = Context::new()
            .with_request_id("call-42")
            .with_timeout(Duration::from_secs(30));

        let response = ep(ctx, payload((2_i64, 3_i64))).await.unwrap();
        let response = downcast::<AddResponse>(response).unwrap();
        assert_eq!(response.sum, 5);
        assert_eq!(response.request_id, "call-42");
        assert!(response.has_deadline);
    }

    #[tokio::test]
    async fn remote_service_errors_are_rebuilt() {
        let ep = client(server()).into_endpoint();
        let err = ep(Context::new(), payload((-1_i64, 3_i64))).await.unwrap_err();
        let err = err.downcast::<ServiceError>().unwrap();
        assert_eq!(err.name, "negative");
        assert_eq!(err.message, "operands must be positive");
        assert!(!err.fault && !err.temporary && !err.timeout);
    }

    #[tokio::test]
    async fn bare_statuses_become_faults() {
        let invoker = UnaryInvoker::<AddRequest, AddResponse>::new(
            |_request| async { Err(Status::new(Code::Internal, "exploded")) },
            |_ctx, _request, _metadata| Ok(AddRequest::default()),
            |_ctx, response, _metadata| Ok(payload(response)),
        );
        let err = invoker
            .invoke(Context::new(), payload(()))
            .await
            .unwrap_err()
            .downcast::<ServiceError>()
            .unwrap();
        assert!(err.fault);
        assert_eq!(err.message, "exploded");
    }

    #[tokio::test]
    async fn cancellation_abandons_the_call() {
        let invoker = UnaryInvoker::<AddRequest, AddResponse>::new(
            |_request| futures_util::future::pending(),
            |_ctx, _request, _metadata| Ok(AddRequest::default()),
            |_ctx, response, _metadata| Ok(payload(response)),
        );
        let ctx = Context::new();
        ctx.cancel();
        let err = invoker
            .invoke(ctx, payload(()))
            .await
            .unwrap_err()
            .downcast::<ServiceError>()
            .unwrap();
        assert_eq!(err.name, "cancelled");
        assert!(err.temporary);
    }
}
