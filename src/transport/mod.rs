//! Transport abstraction
//!
//! The sync engine only needs "GET a URL and stream the body". `HttpTransport`
//! does that over HTTPS with a cookie-carrying session; tests plug in an
//! in-memory implementation.

pub mod auth;
pub mod http;

use std::fmt;
use std::io::Read;
use std::time::Duration;

use url::Url;

use crate::error::Result;

pub use auth::{Credentials, Gateway};
pub use http::HttpTransport;

/// Response to a GET, after redirects have been followed.
pub struct HttpResponse {
    pub status: u16,
    /// Final URL (differs from the request URL after redirects)
    pub url: Url,
    /// Declared body length, when the server sent one
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Read the whole body as text (lossy UTF-8).
    pub fn text(mut self) -> std::io::Result<String> {
        let mut buf = Vec::new();
        self.body.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Something that can fetch URLs for the sync engine.
pub trait Transport {
    fn get(&self, url: &Url) -> Result<HttpResponse>;

    /// Credentials to present to the login gateway on later requests.
    fn set_credentials(&mut self, _credentials: Credentials) {}

    fn set_timeout(&mut self, _timeout: Duration) {}
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &Url) -> Result<HttpResponse> {
        (**self).get(url)
    }
}
