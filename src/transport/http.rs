//! HTTPS transport backed by a blocking reqwest client.
//!
//! Redirects are followed by hand so that Basic credentials are attached only
//! to requests addressed to the login gateway. The cookie jar keeps the
//! session cookie the archive hands out after the first successful redirect
//! round-trip, so later requests go straight to the content.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::cookie::Jar;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use tracing::{debug, warn};
use url::Url;

use super::{Credentials, HttpResponse, Transport};
use crate::config::Config;
use crate::error::{Result, SyncError};

/// Upper bound on redirect hops for one request
const MAX_REDIRECTS: usize = 10;

pub struct HttpTransport {
    client: Client,
    cookies: Arc<Jar>,
    user_agent: String,
    login_host: String,
    credentials: Option<Credentials>,
}

/// Build a client whose timeout bounds the connect, the wait for headers
/// and each individual body read. A slow but steady download never trips it.
///
/// No per-request timeout is set: on the blocking client that turns into a
/// deadline for the whole transfer.
fn build_client(cookies: &Arc<Jar>, user_agent: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .cookie_provider(Arc::clone(cookies))
        .redirect(Policy::none())
        .user_agent(user_agent)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| SyncError::Http(format!("failed to build HTTP client: {}", e)))
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let client = build_client(&cookies, &config.user_agent, config.timeout())?;

        Ok(Self {
            client,
            cookies,
            user_agent: config.user_agent.clone(),
            login_host: config.login_host.clone(),
            credentials: None,
        })
    }

    fn is_login_host(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(&self.login_host))
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> Result<HttpResponse> {
        let mut current = url.clone();

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self.client.get(current.clone());
            if self.is_login_host(&current) {
                if let Some(creds) = &self.credentials {
                    request = request.basic_auth(&creds.username, Some(&creds.password));
                }
            }

            let response = request
                .send()
                .map_err(|e| SyncError::Http(format!("GET {}: {}", current, e)))?;
            let status = response.status();
            debug!("GET {} -> {}", current, status.as_u16());

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        SyncError::Http(format!("redirect from {} without Location", current))
                    })?;
                current = current.join(location).map_err(|e| {
                    SyncError::Http(format!("bad redirect target {:?}: {}", location, e))
                })?;
                continue;
            }

            return Ok(HttpResponse {
                status: status.as_u16(),
                url: current,
                content_length: response.content_length(),
                body: Box::new(response),
            });
        }

        Err(SyncError::Http(format!(
            "too many redirects fetching {}",
            url
        )))
    }

    fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    /// Rebuilds the client around the same cookie jar, so the login session
    /// survives a timeout change.
    fn set_timeout(&mut self, timeout: Duration) {
        match build_client(&self.cookies, &self.user_agent, timeout) {
            Ok(client) => self.client = client,
            Err(e) => warn!("keeping previous timeout: {}", e),
        }
    }
}
