//! In-memory archive serving Apache-style index pages, for integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use idxsync::config::Config;
use idxsync::listing::HtmlLister;
use idxsync::policy::ChangePolicy;
use idxsync::sync::{Orchestrator, SyncSettings};
use idxsync::transport::{Credentials, Gateway, HttpResponse, Transport};
use idxsync::Result;

pub const HOST: &str = "archive.test";
pub const LOGIN_HOST: &str = "login.test";

const HREF: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?');

/// Ways a request can be made to fail.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Status(u16),
    /// Declares the full length but sends half the body
    Truncate,
    /// Bounces to the login gateway
    LoginRedirect,
}

#[derive(Default)]
pub struct MemoryArchive {
    files: RefCell<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
    dirs: RefCell<BTreeSet<String>>,
    faults: RefCell<HashMap<String, Fault>>,
    requests: RefCell<Vec<String>>,
    /// Credentials that must be presented before anything is served
    required: Option<Credentials>,
    presented: Option<Credentials>,
}

pub fn stamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 3, 1, 12, 30, 0).unwrap()
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive that answers with the login gateway until `creds` are set.
    pub fn with_login(creds: Credentials) -> Self {
        Self {
            required: Some(creds),
            ..Self::default()
        }
    }

    /// Add (or replace) a file at an absolute path like `/A/B/f2`.
    pub fn put(&self, path: &str, body: &[u8], modified: DateTime<Utc>) {
        let path = path.trim_end_matches('/');
        let mut parent = String::new();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for segment in &segments[..segments.len() - 1] {
            parent.push('/');
            parent.push_str(segment);
            self.dirs.borrow_mut().insert(parent.clone());
        }
        self.files
            .borrow_mut()
            .insert(path.to_string(), (body.to_vec(), modified));
    }

    pub fn mkdir(&self, path: &str) {
        let mut parent = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            parent.push('/');
            parent.push_str(segment);
            self.dirs.borrow_mut().insert(parent.clone());
        }
    }

    /// Make requests for `path` fail. Directories are addressed with a trailing `/`.
    pub fn fail(&self, path: &str, fault: Fault) {
        self.faults.borrow_mut().insert(path.to_string(), fault);
    }

    pub fn heal(&self, path: &str) {
        self.faults.borrow_mut().remove(path);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    /// Requests that downloaded a file rather than a listing.
    pub fn file_requests(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter(|p| !p.ends_with('/'))
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.borrow_mut().clear();
    }

    pub fn base_url() -> Url {
        Url::parse(&format!("https://{}/", HOST)).unwrap()
    }

    fn index_page(&self, dir: &str) -> String {
        let prefix = format!("{}/", dir);
        let mut rows = String::new();
        for sub in self.dirs.borrow().iter() {
            if let Some(name) = child(&prefix, sub) {
                rows.push_str(&row(&format!("{}/", name), "-", stamp()));
            }
        }
        for (path, (body, modified)) in self.files.borrow().iter() {
            if let Some(name) = child(&prefix, path) {
                rows.push_str(&row(name, &body.len().to_string(), *modified));
            }
        }
        format!(
            r#"<!DOCTYPE HTML PUBLIC "-//W3C//DTD HTML 3.2 Final//EN">
<html>
 <head>
  <title>Index of {dir}/</title>
 </head>
 <body>
<h1>Index of {dir}/</h1>
  <table id="indexlist">
   <tr class="indexhead"><th class="indexcolicon"><img src="/icons/blank.gif" alt="[ICO]"></th><th class="indexcolname"><a href="?C=N;O=D">Name</a></th><th class="indexcollastmod"><a href="?C=M;O=A">Last modified</a></th><th class="indexcolsize"><a href="?C=S;O=A">Size</a></th></tr>
   <tr class="indexbreakrow"><th colspan="4"><hr></th></tr>
   <tr class="even"><td class="indexcolicon"><a href="../"><img src="/icons/back.gif" alt="[PARENTDIR]"></a></td><td class="indexcolname"><a href="../">Parent Directory</a></td><td class="indexcollastmod">&nbsp;</td><td class="indexcolsize">  - </td></tr>
{rows}   <tr class="indexbreakrow"><th colspan="4"><hr></th></tr>
</table>
<address>Apache/2.4 Server at {host} Port 443</address>
</body></html>
"#,
            dir = dir,
            rows = rows,
            host = HOST
        )
    }

    fn respond(&self, url: &Url, status: u16, body: Vec<u8>, declared: Option<u64>) -> HttpResponse {
        HttpResponse {
            status,
            url: url.clone(),
            content_length: declared,
            body: Box::new(Cursor::new(body)),
        }
    }

    fn login_page(&self) -> HttpResponse {
        let body = r#"<html><body><form method="post" action="/login">
<input type="text" name="username"><input type="password" name="password">
</form></body></html>"#;
        HttpResponse {
            status: 200,
            url: Url::parse(&format!("https://{}/oauth/authorize?client_id=x", LOGIN_HOST)).unwrap(),
            content_length: Some(body.len() as u64),
            body: Box::new(Cursor::new(body.as_bytes().to_vec())),
        }
    }
}

fn child<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

fn row(name: &str, size: &str, modified: DateTime<Utc>) -> String {
    let href = utf8_percent_encode(name, HREF).to_string();
    format!(
        "   <tr class=\"odd\"><td class=\"indexcolicon\"><img src=\"/icons/unknown.gif\" alt=\"[   ]\"></td><td class=\"indexcolname\"><a href=\"{}\">{}</a></td><td class=\"indexcollastmod\">{}  </td><td class=\"indexcolsize\">{}</td></tr>\n",
        href,
        name,
        modified.format("%Y-%m-%d %H:%M"),
        size
    )
}

impl Transport for MemoryArchive {
    fn get(&self, url: &Url) -> Result<HttpResponse> {
        let path = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
        self.requests.borrow_mut().push(path.clone());

        if self.required.is_some() && self.presented != self.required {
            return Ok(self.login_page());
        }
        if url.host_str() != Some(HOST) {
            return Ok(self.respond(url, 404, Vec::new(), None));
        }

        let fault = self.faults.borrow().get(&path).copied();
        match fault {
            Some(Fault::Status(status)) => {
                return Ok(self.respond(url, status, b"error".to_vec(), None));
            }
            Some(Fault::LoginRedirect) => return Ok(self.login_page()),
            _ => {}
        }

        if let Some(dir) = path.strip_suffix('/') {
            if !dir.is_empty() && !self.dirs.borrow().contains(dir) {
                return Ok(self.respond(url, 404, b"Not Found".to_vec(), None));
            }
            let page = self.index_page(dir).into_bytes();
            let len = page.len() as u64;
            return Ok(self.respond(url, 200, page, Some(len)));
        }

        let file = self.files.borrow().get(&path).map(|(body, _)| body.clone());
        match file {
            Some(body) => {
                let len = body.len() as u64;
                let body = match fault {
                    Some(Fault::Truncate) => body[..body.len() / 2].to_vec(),
                    _ => body,
                };
                Ok(self.respond(url, 200, body, Some(len)))
            }
            None => Ok(self.respond(url, 404, b"Not Found".to_vec(), None)),
        }
    }

    fn set_credentials(&mut self, credentials: Credentials) {
        self.presented = Some(credentials);
    }
}

pub fn test_config() -> Config {
    Config {
        host: HOST.to_string(),
        login_host: LOGIN_HOST.to_string(),
        start_collection: "A".to_string(),
        retries: 1,
        ..Config::default()
    }
}

pub fn settings() -> SyncSettings {
    let config = test_config();
    SyncSettings {
        base_url: MemoryArchive::base_url(),
        gateway: Gateway::new(LOGIN_HOST),
        policy: ChangePolicy::new(config.mtime_tolerance()),
        chunk_size: 7,
        mode: 0o755,
        retries: 1,
    }
}

pub fn orchestrator(
    archive: &MemoryArchive,
) -> Orchestrator<'static, HtmlLister<&MemoryArchive>, &MemoryArchive> {
    let lister = HtmlLister::new(
        archive,
        MemoryArchive::base_url(),
        Gateway::new(LOGIN_HOST),
        test_config().time_formats,
    );
    Orchestrator::new(lister, archive, settings())
}

pub fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}
