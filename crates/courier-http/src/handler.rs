//! Bridges endpoints to axum handlers.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::{MethodRouter, post};
use bytes::Bytes;
use courier_service::codec::{Document, from_document};
use courier_service::endpoint::{downcast, payload};
use courier_service::error::{BoxError, ServiceError};
use courier_service::{Context, Endpoint, Payload, ServiceRuntime};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::encoding::{decode_request, encode_error, encode_response};

/// Request ID header read from requests and echoed on responses.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

type DecodeFn = Arc<dyn Fn(Document) -> Result<Payload, ServiceError> + Send + Sync>;
type EncodeFn = Arc<dyn Fn(Payload) -> Result<Document, ServiceError> + Send + Sync>;

/// An endpoint served over HTTP.
///
/// Request bodies are decoded with the runtime's codecs and converted to
/// `Req`; the endpoint's `Resp` is converted back and encoded for the
/// request's `Accept` header.
#[derive(Clone)]
pub struct HttpEndpoint {
    runtime: ServiceRuntime,
    endpoint: Endpoint,
    decode: DecodeFn,
    encode: EncodeFn,
}

impl HttpEndpoint {
    pub fn new<Req, Resp>(runtime: ServiceRuntime, endpoint: Endpoint) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + 'static,
    {
        Self {
            runtime,
            endpoint,
            decode: Arc::new(|document| {
                from_document::<Req>(document)
                    .map(payload)
                    .map_err(|e| ServiceError::decode_payload(e.to_string()))
            }),
            encode: Arc::new(|response| {
                let response = downcast::<Resp>(response)?;
                serde_json::to_value(&response)
                    .map_err(|e| ServiceError::fault(format!("failed to encode response: {e}")))
            }),
        }
    }

    /// Handles one request.
    pub async fn serve(&self, headers: HeaderMap, body: Bytes) -> Response {
        let request_id = headers
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(|| self.runtime.request_ids().next_id(), str::to_owned);
        let ctx = Context::new().with_request_id(request_id.as_str());

        let mut response = match self.invoke(ctx, &headers, body).await {
            Ok(document) => {
                match encode_response(self.runtime.codecs(), &headers, StatusCode::OK, &document) {
                    Ok(response) => response,
                    Err(e) => encode_error(
                        self.runtime.codecs(),
                        &headers,
                        Box::new(ServiceError::from(e)),
                    ),
                }
            }
            Err(err) => encode_error(self.runtime.codecs(), &headers, err),
        };

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }

    async fn invoke(
        &self,
        ctx: Context,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Document, BoxError> {
        let document = decode_request(self.runtime.codecs(), headers, body)?;
        let request = (self.decode)(document)?;
        let response = (self.endpoint)(ctx, request).await?;
        Ok((self.encode)(response)?)
    }

    /// A `POST` route serving this endpoint.
    pub fn into_route<S>(self) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let this = Arc::new(self);
        post(move |headers: HeaderMap, body: Bytes| {
            let this = Arc::clone(&this);
            async move { this.serve(headers, body).await }
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::header::CONTENT_TYPE;
    use courier_service::RuntimeConfig;
    use courier_service::codec::CodecRegistry;
    use courier_service::endpoint::typed_endpoint;
    use http_body_util::BodyExt;
    use serde::Deserialize;

    use super::*;
    use crate::error::ErrorResponse;

    #[derive(Deserialize)]
    struct Divide {
        a: i64,
        b: i64,
    }

    #[derive(Serialize)]
    struct Quotient {
        value: i64,
    }

    fn divide(runtime: &ServiceRuntime) -> HttpEndpoint {
        let ep = typed_endpoint(|_ctx: Context, req: Divide| async move {
            if req.b == 0 {
                return Err(ServiceError::permanent("div_by_zero", "division by zero"));
            }
            Ok(Quotient { value: req.a / req.b })
        });
        HttpEndpoint::new::<Divide, Quotient>(runtime.clone(), ep)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn serves_successful_requests() {
        let runtime = ServiceRuntime::default();
        let response = divide(&runtime)
            .serve(HeaderMap::new(), Bytes::from_static(b"{\"a\":7,\"b\":2}"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert!(response.headers().contains_key(&REQUEST_ID_HEADER));
        assert_eq!(json_body(response).await, serde_json::json!({"value": 3}));
    }

    #[tokio::test]
    async fn echoes_request_id() {
        let runtime = ServiceRuntime::default();
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc-1"));
        let response = divide(&runtime)
            .serve(headers, Bytes::from_static(b"{\"a\":1,\"b\":1}"))
            .await;
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc-1");
    }

    #[tokio::test]
    async fn endpoint_errors_are_mapped() {
        let runtime = ServiceRuntime::default();
        let response = divide(&runtime)
            .serve(HeaderMap::new(), Bytes::from_static(b"{\"a\":1,\"b\":0}"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(body.name, "div_by_zero");
    }

    #[tokio::test]
    async fn decodes_xml_requests() {
        let mut codecs = CodecRegistry::with_defaults();
        codecs.register_xml(false);
        let runtime = ServiceRuntime::new(codecs, &RuntimeConfig::default());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        let response = divide(&runtime)
            .serve(headers, Bytes::from_static(b"<request><a>9</a><b>3</b></request>"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!({"value": 3}));
    }

    #[tokio::test]
    async fn undecodable_requests_are_rejected() {
        let runtime = ServiceRuntime::default();
        let response = divide(&runtime)
            .serve(HeaderMap::new(), Bytes::from_static(b"{\"a\":\"x\"}"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(body.name, "decode_payload");
    }
}
