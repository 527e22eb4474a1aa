//! The seam between the client and the wire.
//!
//! A [`Transport`] sends one [`HttpRequest`] and returns whatever the server answered, non-2xx
//! included. Only failures that produce no response at all are errors here; status handling and
//! deadlines belong to the client.

use crate::error::TransportError;
use crate::request::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod reqwest_transport {
    use super::*;

    /// [`Transport`] backed by a shared `reqwest::Client`.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    impl From<reqwest::Error> for TransportError {
        fn from(err: reqwest::Error) -> Self {
            if err.is_builder() {
                TransportError::InvalidRequest(err.to_string())
            } else if err.is_connect() {
                TransportError::Connect(err.to_string())
            } else if err.is_timeout() || err.is_body() || err.is_request() {
                TransportError::Io(err.to_string())
            } else {
                TransportError::Other(err.to_string())
            }
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let mut builder =
                self.client.request(request.method, &request.url).headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await?.to_vec();
            Ok(HttpResponse { status, headers, body })
        }
    }
}
