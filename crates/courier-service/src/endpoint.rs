//! Endpoints and middleware.
//!
//! An [`Endpoint`] is one remotely invocable service method: an async
//! function from a [`Context`] and an opaque request [`Payload`] to an
//! opaque response payload. Transport glue produces and consumes the
//! payloads; business logic downcasts them to concrete types.
//!
//! A [`Middleware`] wraps an endpoint into another endpoint. Middleware is
//! applied at wiring time, before serving starts.

use std::any::{Any, type_name};
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::context::Context;
use crate::error::{BoxError, ServiceError};

/// Opaque request or response value.
pub type Payload = Box<dyn Any + Send>;

/// Future returned by an endpoint invocation.
pub type EndpointFuture = BoxFuture<'static, Result<Payload, BoxError>>;

/// Transport-agnostic callable for one service method.
pub type Endpoint = Arc<dyn Fn(Context, Payload) -> EndpointFuture + Send + Sync>;

/// Decorator that wraps an endpoint with cross-cutting behavior.
pub type Middleware = Arc<dyn Fn(Endpoint) -> Endpoint + Send + Sync>;

/// Builds an endpoint from an async function over opaque payloads.
pub fn endpoint<F, Fut>(f: F) -> Endpoint
where
    F: Fn(Context, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, BoxError>> + Send + 'static,
{
    Arc::new(move |ctx, request| f(ctx, request).boxed())
}

/// Builds an endpoint from an async function over concrete types.
///
/// The request payload is downcast to `Req` (a mismatch is reported as a
/// fault) and the response is boxed back into a payload.
pub fn typed_endpoint<Req, Resp, E, F, Fut>(f: F) -> Endpoint
where
    Req: Any + Send,
    Resp: Any + Send,
    E: Into<BoxError>,
    F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, E>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |ctx, request| {
        let f = Arc::clone(&f);
        async move {
            let request = match downcast::<Req>(request) {
                Ok(request) => request,
                Err(err) => return Err(BoxError::from(err)),
            };
            f(ctx, request).await.map(payload).map_err(Into::into)
        }
        .boxed()
    })
}

/// Builds a middleware from a function.
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(Endpoint) -> Endpoint + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Composes middleware so that the first item is the outermost wrapper.
///
/// `chain([a, b])` applied to `ep` yields `a(b(ep))`.
pub fn chain(items: impl IntoIterator<Item = Middleware>) -> Middleware {
    let items: Vec<Middleware> = items.into_iter().collect();
    Arc::new(move |ep| items.iter().rev().fold(ep, |ep, m| m(ep)))
}

/// Boxes a value into a payload.
pub fn payload<T: Any + Send>(value: T) -> Payload {
    Box::new(value)
}

/// Recovers the concrete value of a payload.
pub fn downcast<T: Any>(value: Payload) -> Result<T, ServiceError> {
    value
        .downcast::<T>()
        .map(|b| *b)
        .map_err(|_| ServiceError::fault(format!("payload is not a {}", type_name::<T>())))
}

/// Named endpoints of one service.
///
/// Endpoints keep their registration order.
#[derive(Clone, Default)]
pub struct Endpoints {
    entries: Vec<(String, Endpoint)>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint, replacing any endpoint with the same name.
    pub fn add(&mut self, name: impl Into<String>, ep: Endpoint) -> &mut Self {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = ep,
            None => self.entries.push((name, ep)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Endpoint> {
        self.entries
            .iter()
            .find_map(|(n, ep)| (n == name).then_some(ep))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wraps every endpoint with `m`.
    ///
    /// The middleware of the latest call becomes the outermost layer: it
    /// runs first on the way in and last on the way out.
    pub fn use_middleware(&mut self, m: &Middleware) -> &mut Self {
        for (_, ep) in &mut self.entries {
            *ep = m(Arc::clone(ep));
        }
        self
    }
}

impl IntoIterator for Endpoints {
    type Item = (String, Endpoint);
    type IntoIter = std::vec::IntoIter<(String, Endpoint)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn recording(label: &'static str, log: Arc<Mutex<Vec<String>>>) -> Middleware {
        middleware(move |next: Endpoint| {
            let log = Arc::clone(&log);
            endpoint(move |ctx, request| {
                let next = Arc::clone(&next);
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(format!("{label} in"));
                    let response = next(ctx, request).await;
                    log.lock().push(format!("{label} out"));
                    response
                }
            })
        })
    }

    fn echo(log: Arc<Mutex<Vec<String>>>) -> Endpoint {
        endpoint(move |_ctx, request| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push("handler".to_owned());
                Ok(request)
            }
        })
    }

    #[tokio::test]
    async fn last_used_middleware_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut endpoints = Endpoints::new();
        endpoints.add("echo", echo(Arc::clone(&log)));
        endpoints.use_middleware(&recording("first", Arc::clone(&log)));
        endpoints.use_middleware(&recording("second", Arc::clone(&log)));

        let ep = endpoints.get("echo").unwrap();
        let response = ep(Context::new(), payload(7_u32)).await.unwrap();
        assert_eq!(downcast::<u32>(response).unwrap(), 7);

        assert_eq!(
            *log.lock(),
            ["second in", "first in", "handler", "first out", "second out"]
        );
    }

    #[tokio::test]
    async fn chain_puts_first_item_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = chain([
            recording("outer", Arc::clone(&log)),
            recording("inner", Arc::clone(&log)),
        ]);
        let ep = stack(echo(Arc::clone(&log)));
        ep(Context::new(), payload(())).await.unwrap();
        assert_eq!(
            *log.lock(),
            ["outer in", "inner in", "handler", "inner out", "outer out"]
        );
    }

    #[tokio::test]
    async fn typed_endpoint_downcasts() {
        let add = typed_endpoint(|_ctx, (a, b): (i64, i64)| async move {
            Ok::<_, ServiceError>(a + b)
        });
        let sum = add(Context::new(), payload((2_i64, 3_i64))).await.unwrap();
        assert_eq!(downcast::<i64>(sum).unwrap(), 5);

        let err = add(Context::new(), payload("oops")).await.unwrap_err();
        let err = err.downcast::<ServiceError>().unwrap();
        assert!(err.fault);
        assert!(err.message.contains("(i64, i64)"));
    }

    #[test]
    fn add_replaces_existing_name() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut endpoints = Endpoints::new();
        endpoints
            .add("a", echo(Arc::clone(&log)))
            .add("b", echo(Arc::clone(&log)))
            .add("a", echo(Arc::clone(&log)));
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints.names().collect::<Vec<_>>(), ["a", "b"]);
    }
}
