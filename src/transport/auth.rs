//! Login gateway handling and credential discovery.
//!
//! Credentials are looked up in order: environment
//! (`EARTHDATA_USERNAME` / `EARTHDATA_PASSWORD`), the `~/.netrc` entry for
//! the login host, then an interactive prompt.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use url::Url;

use super::{HttpResponse, Transport};
use crate::error::{Result, SyncError};

pub const USERNAME_ENV: &str = "EARTHDATA_USERNAME";
pub const PASSWORD_ENV: &str = "EARTHDATA_PASSWORD";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let username = std::env::var(USERNAME_ENV).ok()?;
        let password = std::env::var(PASSWORD_ENV).ok()?;
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self::new(username, password))
    }

    /// Look up `host` in a netrc file. A missing file is `Ok(None)`.
    pub fn from_netrc(path: &Path, host: &str) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(parse_netrc(&content, host)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Ask on the terminal; the password is read without echo.
    pub fn prompt(host: &str) -> Result<Self> {
        print!("Username for {}: ", host);
        io::stdout().flush()?;
        let mut username = String::new();
        io::stdin().lock().read_line(&mut username)?;
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(SyncError::AuthenticationRequired(
                "no username entered".to_string(),
            ));
        }
        let password = rpassword::prompt_password(format!("Password for {}@{}: ", username, host))?;
        Ok(Self::new(username, password))
    }

    /// Environment, then netrc, then prompt.
    pub fn discover(login_host: &str) -> Result<Self> {
        if let Some(creds) = Self::from_env() {
            debug!("using credentials from {}", USERNAME_ENV);
            return Ok(creds);
        }
        if let Some(path) = default_netrc_path() {
            if let Some(creds) = Self::from_netrc(&path, login_host)? {
                debug!("using credentials from {}", path.display());
                return Ok(creds);
            }
        }
        Self::prompt(login_host)
    }
}

pub fn default_netrc_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".netrc"))
}

/// Minimal netrc reader: `machine`, `default`, `login`, `password` tokens.
pub fn parse_netrc(content: &str, host: &str) -> Option<Credentials> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let mut fallback = None;
    let mut i = 0;

    while i < tokens.len() {
        let is_default = tokens[i] == "default";
        let matches = match tokens[i] {
            "machine" => {
                i += 1;
                tokens.get(i).is_some_and(|name| name.eq_ignore_ascii_case(host))
            }
            "default" => false,
            _ => {
                i += 1;
                continue;
            }
        };
        i += 1;

        let mut login = None;
        let mut password = None;
        while i < tokens.len() && tokens[i] != "machine" && tokens[i] != "default" {
            match tokens[i] {
                "login" => login = tokens.get(i + 1).map(|s| s.to_string()),
                "password" => password = tokens.get(i + 1).map(|s| s.to_string()),
                _ => {
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }

        if let (Some(login), Some(password)) = (login, password) {
            if matches {
                return Some(Credentials::new(login, password));
            }
            if is_default {
                fallback = Some(Credentials::new(login, password));
            }
        }
    }
    fallback
}

/// Recognizes responses that came from the login gateway instead of the archive.
#[derive(Debug, Clone)]
pub struct Gateway {
    login_host: String,
}

impl Gateway {
    pub fn new(login_host: &str) -> Self {
        Self {
            login_host: login_host.to_ascii_lowercase(),
        }
    }

    pub fn login_host(&self) -> &str {
        &self.login_host
    }

    /// True when the status or final URL says "go log in".
    pub fn redirected_to_login(&self, response: &HttpResponse) -> bool {
        response.status == 401
            || response
                .url
                .host_str()
                .is_some_and(|host| host.eq_ignore_ascii_case(&self.login_host))
    }

    /// GET a text document, failing with `AuthenticationRequired` when the
    /// gateway answers instead of the archive.
    pub fn fetch_text(&self, transport: &dyn Transport, url: &Url) -> Result<String> {
        let response = transport.get(url)?;
        if self.redirected_to_login(&response) {
            return Err(SyncError::AuthenticationRequired(format!(
                "{} redirected to {}",
                url, response.url
            )));
        }
        if !response.is_success() {
            return Err(SyncError::listing(
                url.as_str(),
                format!("HTTP {}", response.status),
            ));
        }
        let body = response
            .text()
            .map_err(|e| SyncError::listing(url.as_str(), e.to_string()))?;
        if self.is_login_page(&body) {
            return Err(SyncError::AuthenticationRequired(format!(
                "{} returned a login form",
                url
            )));
        }
        Ok(body)
    }

    /// True when an HTML body is a login form (a `<form>` holding a password input).
    pub fn is_login_page(&self, body: &str) -> bool {
        let lower = body.to_ascii_lowercase();
        let Some(form) = lower.find("<form") else {
            return false;
        };
        lower[form..].split("<input").skip(1).any(|input| {
            let tag = input.split('>').next().unwrap_or_default();
            let compact: String = tag.chars().filter(|c| !c.is_whitespace()).collect();
            ["type=\"password", "type='password", "type=password"]
                .iter()
                .any(|marker| compact.contains(marker))
        })
    }
}

/// Check that `url` is reachable with the current session.
pub fn check_access(transport: &dyn Transport, gateway: &Gateway, url: &Url) -> Result<()> {
    gateway.fetch_text(transport, url).map(|_| ())
}

/// Log in by probing `url`, asking `next` for new credentials after each
/// rejection. Gives up after `attempts` tries.
pub fn login<T, N>(
    transport: &mut T,
    gateway: &Gateway,
    url: &Url,
    attempts: u32,
    initial: Credentials,
    mut next: N,
) -> Result<Credentials>
where
    T: Transport,
    N: FnMut() -> Result<Credentials>,
{
    let attempts = attempts.max(1);
    let mut creds = initial;
    for attempt in 1..=attempts {
        transport.set_credentials(creds.clone());
        match check_access(&*transport, gateway, url) {
            Ok(()) => return Ok(creds),
            Err(e) if e.is_auth() => {
                warn!("login attempt {} of {} rejected: {}", attempt, attempts, e);
                if attempt < attempts {
                    creds = next()?;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(SyncError::AuthenticationRequired(format!(
        "check your credentials for {}",
        gateway.login_host()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn response(status: u16, url: &str) -> HttpResponse {
        HttpResponse {
            status,
            url: Url::parse(url).unwrap(),
            content_length: None,
            body: Box::new(Cursor::new(Vec::new())),
        }
    }

    #[test]
    fn test_parse_netrc() {
        let netrc = "machine other.host login a password b\n\
                     machine urs.earthdata.nasa.gov\n  login alice\n  password s3cret\n";
        let creds = parse_netrc(netrc, "urs.earthdata.nasa.gov").unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3cret");
        assert!(parse_netrc(netrc, "unknown.host").is_none());
    }

    #[test]
    fn test_parse_netrc_default_entry() {
        let netrc = "machine x login a password b\ndefault login anon password guest";
        let creds = parse_netrc(netrc, "urs.earthdata.nasa.gov").unwrap();
        assert_eq!(creds.username, "anon");
    }

    #[test]
    fn test_netrc_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let found = Credentials::from_netrc(&tmp.path().join(".netrc"), "host").unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("bob", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("bob"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_gateway_detection() {
        let gateway = Gateway::new("urs.earthdata.nasa.gov");
        assert!(gateway.redirected_to_login(&response(
            200,
            "https://urs.earthdata.nasa.gov/oauth/authorize?client_id=x"
        )));
        assert!(gateway.redirected_to_login(&response(401, "https://data.host/A/")));
        assert!(!gateway.redirected_to_login(&response(200, "https://data.host/A/")));

        let form = r#"<html><form action="/login" method="post">
            <input name="username" type="text"><input name="password" type="password">
            </form></html>"#;
        assert!(gateway.is_login_page(form));
        assert!(!gateway.is_login_page("<html><table><tr><td><a href=\"a/\">a/</a></td></tr></table></html>"));
    }

    struct Gatekeeper {
        presented: Option<Credentials>,
    }

    impl Transport for Gatekeeper {
        fn get(&self, url: &Url) -> Result<HttpResponse> {
            let accepted = self.presented == Some(Credentials::new("alice", "right"));
            let (final_url, body) = if accepted {
                (url.clone(), "<html><a href=\"f\">f</a></html>")
            } else {
                (
                    Url::parse("https://urs.earthdata.nasa.gov/oauth/authorize").unwrap(),
                    "<html><form><input type=\"password\"></form></html>",
                )
            };
            Ok(HttpResponse {
                status: 200,
                url: final_url,
                content_length: None,
                body: Box::new(Cursor::new(body.as_bytes().to_vec())),
            })
        }

        fn set_credentials(&mut self, credentials: Credentials) {
            self.presented = Some(credentials);
        }
    }

    #[test]
    fn test_login_retries_with_new_credentials() {
        let gateway = Gateway::new("urs.earthdata.nasa.gov");
        let url = Url::parse("https://data.host/ICEBRIDGE/").unwrap();
        let mut transport = Gatekeeper { presented: None };

        let creds = login(
            &mut transport,
            &gateway,
            &url,
            3,
            Credentials::new("alice", "wrong"),
            || Ok(Credentials::new("alice", "right")),
        )
        .unwrap();
        assert_eq!(creds.password, "right");
    }

    #[test]
    fn test_login_gives_up() {
        let gateway = Gateway::new("urs.earthdata.nasa.gov");
        let url = Url::parse("https://data.host/ICEBRIDGE/").unwrap();
        let mut transport = Gatekeeper { presented: None };
        let mut prompts = 0;

        let err = login(
            &mut transport,
            &gateway,
            &url,
            3,
            Credentials::new("alice", "wrong"),
            || {
                prompts += 1;
                Ok(Credentials::new("alice", "still-wrong"))
            },
        )
        .unwrap_err();
        assert!(err.is_auth());
        assert_eq!(prompts, 2);
    }
}
