//! Typed stream wrappers for streaming methods.

use std::pin::Pin;

use courier_service::error::{BoxError, ServiceError};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use crate::error::{decode_error, encode_error};

/// Response stream handed to tonic for server-streaming methods.
pub type ResponseStream<T> = ReceiverStream<Result<T, Status>>;

/// Send side of a server-streaming response.
///
/// Clones send into the same stream; the stream ends once every clone is
/// dropped.
#[derive(Debug)]
pub struct ServerStream<T> {
    tx: mpsc::Sender<Result<T, Status>>,
}

impl<T> Clone for ServerStream<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> ServerStream<T> {
    /// Creates the send side and the tonic response stream, buffering up to
    /// `buffer` messages.
    pub fn channel(buffer: usize) -> (Self, ResponseStream<T>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, ReceiverStream::new(rx))
    }

    /// Sends one message, waiting for buffer space.
    ///
    /// Fails with a temporary error once the client went away.
    pub async fn send(&self, message: T) -> Result<(), ServiceError> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| stream_closed())
    }

    /// Terminates the stream with an error status.
    pub async fn send_error(&self, err: BoxError) -> Result<(), ServiceError> {
        self.tx
            .send(Err(encode_error(err)))
            .await
            .map_err(|_| stream_closed())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn stream_closed() -> ServiceError {
    ServiceError::temporary("stream_closed", "stream closed by peer")
}

/// Receive side of a client-streaming request or a streamed response.
pub struct ClientStream<T> {
    inner: Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>,
}

impl<T> ClientStream<T> {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, Status>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Receives the next message, `None` once the peer finished sending.
    ///
    /// Error statuses are translated back into service errors.
    pub async fn recv(&mut self) -> Result<Option<T>, ServiceError> {
        match self.inner.next().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(status)) => Err(decode_error(&status)),
            None => Ok(None),
        }
    }
}

impl<T: Send + 'static> From<tonic::Streaming<T>> for ClientStream<T> {
    fn from(stream: tonic::Streaming<T>) -> Self {
        Self::new(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_stream_feeds_client_stream() {
        let (tx, rx) = ServerStream::channel(4);
        let mut rx = ClientStream::new(rx);

        tokio::spawn(async move {
            for n in 1..=3_u32 {
                tx.send(n).await.unwrap();
            }
            tx.send_error(Box::new(ServiceError::temporary("busy", "slow down")))
                .await
                .unwrap();
        });

        let mut received = Vec::new();
        let err = loop {
            match rx.recv().await {
                Ok(Some(n)) => received.push(n),
                Ok(None) => panic!("stream ended without error"),
                Err(err) => break err,
            }
        };
        assert_eq!(received, [1, 2, 3]);
        assert_eq!(err.name, "busy");
        assert!(err.temporary);
    }

    #[tokio::test]
    async fn stream_ends_when_senders_drop() {
        let (tx, rx) = ServerStream::<u8>::channel(1);
        let mut rx = ClientStream::new(rx);
        drop(tx);
        assert!(rx.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn send_fails_after_receiver_drops() {
        let (tx, rx) = ServerStream::channel(1);
        drop(rx);
        assert!(tx.is_closed());
        let err = tx.send(1_u8).await.unwrap_err();
        assert_eq!(err.name, "stream_closed");
    }
}
