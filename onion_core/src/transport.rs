/*! Plain HTTP to guards and seeds

Service nodes use self-signed certificates, the onion layers provide the
confidentiality, so certificate validation is off.
*/

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

/// Error that can happen when no HTTP response was received.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum TransportError {
    /// Connection, TLS or protocol failure.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The request timed out.
    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Connection(error.to_string())
        }
    }
}

/// HTTP methods used by onion routing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

/// HTTP request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Full URL.
    pub url: String,
    /// Body of `POST` requests.
    pub body: Option<Vec<u8>>,
    /// Per request timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// `GET` request.
    pub fn get(url: String) -> Self {
        HttpRequest {
            method: HttpMethod::Get,
            url,
            body: None,
            timeout: None,
        }
    }

    /// `POST` request with `body`.
    pub fn post(url: String, body: Vec<u8>) -> Self {
        HttpRequest {
            method: HttpMethod::Post,
            url,
            body: Some(body),
            timeout: None,
        }
    }

    /// Set timeout of this request.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP response with any status.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Check if the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can execute HTTP requests.
pub trait Transport: Send + Sync {
    /// Execute `request`. Non-2xx responses are `Ok`.
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>>;
}

/// `Transport` over `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create new `HttpTransport`.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
        let client = self.client.clone();
        async move {
            trace!("{:?} {}", request.method, request.url);
            let mut builder = match request.method {
                HttpMethod::Get => client.get(&request.url),
                HttpMethod::Post => client.post(&request.url),
            };
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?.to_vec();
            Ok(HttpResponse { status, body })
        }.boxed()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;

    /// Transport answering with a closure and recording requests.
    #[derive(Clone)]
    pub struct FnTransport {
        handler: Arc<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>,
        pub requests: Arc<Mutex<Vec<HttpRequest>>>,
    }

    impl FnTransport {
        pub fn new<F>(handler: F) -> Self
        where F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static {
            FnTransport {
                handler: Arc::new(handler),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    impl Transport for FnTransport {
        fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
            let result = (self.handler)(&request);
            self.requests.lock().push(request);
            futures::future::ready(result).boxed()
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse { status: 200, body: body.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders() {
        let request = HttpRequest::post("https://1.2.3.4:1/onion_req/v2".to_owned(), vec![1])
            .with_timeout(Some(Duration::from_secs(3)));
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.body, Some(vec![1]));
        assert_eq!(request.timeout, Some(Duration::from_secs(3)));
        assert_eq!(HttpRequest::get("u".to_owned()).body, None);
    }

    #[test]
    fn success_statuses() {
        assert!(HttpResponse { status: 204, body: vec![] }.is_success());
        assert!(!HttpResponse { status: 421, body: vec![] }.is_success());
    }

    #[test]
    fn client_builds() {
        assert!(HttpTransport::new().is_ok());
    }
}
