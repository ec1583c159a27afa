//! In-memory WebDAV server

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::sync::Mutex;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::dav::DavTransport;
use crate::endpoint::Credentials;
use crate::error::{RemoteError, RemoteResult};

/// Characters escaped inside one href path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

/// Bodies are written in chunks of this size, as a network stream would be.
const CHUNK: usize = 8 * 1024;

/// A collection tree served from memory
pub struct MockDav {
    /// Collection path, e.g. `/products/S1A_IW`
    root: String,
    /// Files keyed by path relative to `root`
    files: BTreeMap<String, Vec<u8>>,
    /// Render hrefs as absolute URLs with this origin instead of paths
    href_origin: Option<String>,
    listing_status: Option<u16>,
    failing_gets: HashMap<String, u16>,
    /// Answer 401 unless requests carry exactly these credentials
    required: Option<Credentials>,
    requests: Mutex<Vec<String>>,
    users: Mutex<Vec<Option<String>>>,
}

impl MockDav {
    pub fn new(root: &str) -> Self {
        Self {
            root: format!("/{}", root.trim_matches('/')),
            files: BTreeMap::new(),
            href_origin: None,
            listing_status: None,
            failing_gets: HashMap::new(),
            required: None,
            requests: Mutex::new(Vec::new()),
            users: Mutex::new(Vec::new()),
        }
    }

    pub fn with_file(mut self, relative: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(relative.trim_matches('/').to_string(), content.into());
        self
    }

    /// Emit `http://host/...` hrefs rather than absolute paths.
    pub fn with_absolute_hrefs(mut self, origin: &str) -> Self {
        self.href_origin = Some(origin.trim_end_matches('/').to_string());
        self
    }

    /// Answer PROPFIND with `status`.
    pub fn fail_listing(mut self, status: u16) -> Self {
        self.listing_status = Some(status);
        self
    }

    /// Answer GET for `relative` with `status`.
    pub fn fail_get(mut self, relative: &str, status: u16) -> Self {
        self.failing_gets.insert(relative.trim_matches('/').to_string(), status);
        self
    }

    /// Reject requests that do not authenticate as `username`/`password`.
    pub fn require_credentials(mut self, username: &str, password: &str) -> Self {
        self.required = Some(Credentials::new(username, Some(password.to_string())));
        self
    }

    /// Username each request authenticated as, in request order
    pub fn users_seen(&self) -> Vec<Option<String>> {
        self.users.lock().map(|u| u.clone()).unwrap_or_default()
    }

    /// Requests received so far (`PROPFIND /path` / `GET /path`)
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, line: String, auth: Option<&Credentials>) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(line);
        }
        if let Ok(mut users) = self.users.lock() {
            users.push(auth.map(|c| c.username().to_string()));
        }
    }

    fn authorize(&self, url: &Url, auth: Option<&Credentials>) -> RemoteResult<()> {
        match &self.required {
            Some(required) if auth != Some(required) => Err(RemoteError::Transfer {
                url: url.to_string(),
                status: 401,
            }),
            _ => Ok(()),
        }
    }

    fn collections(&self) -> BTreeSet<String> {
        let mut dirs = BTreeSet::new();
        dirs.insert(String::new());
        for path in self.files.keys() {
            let mut prefix = String::new();
            let parts: Vec<&str> = path.split('/').collect();
            for part in &parts[..parts.len().saturating_sub(1)] {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(part);
                dirs.insert(prefix.clone());
            }
        }
        dirs
    }

    fn href(&self, relative: &str, collection: bool) -> String {
        let mut href = self
            .root
            .split('/')
            .chain(relative.split('/'))
            .filter(|s| !s.is_empty())
            .fold(String::new(), |mut acc, s| {
                acc.push('/');
                acc.extend(utf8_percent_encode(s, SEGMENT));
                acc
            });
        if collection || href.is_empty() {
            href.push('/');
        }
        match &self.href_origin {
            Some(origin) => format!("{}{}", origin, href),
            None => href,
        }
    }

    /// Multistatus body for the whole tree.
    pub fn render_listing(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">\n");
        for dir in self.collections() {
            xml.push_str(&format!(
                "<D:response><D:href>{}</D:href><D:propstat><D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>\n",
                xml_escape(&self.href(&dir, true))
            ));
        }
        for (path, content) in &self.files {
            xml.push_str(&format!(
                "<D:response><D:href>{}</D:href><D:propstat><D:prop><D:resourcetype/><D:getcontentlength>{}</D:getcontentlength></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>\n",
                xml_escape(&self.href(path, false)),
                content.len()
            ));
        }
        xml.push_str("</D:multistatus>\n");
        xml
    }

    fn relative_of(&self, url: &Url) -> Option<String> {
        let path = percent_decode_str(url.path()).decode_utf8().ok()?.into_owned();
        let rest = path.strip_prefix(&self.root)?;
        Some(rest.trim_matches('/').to_string())
    }
}

impl DavTransport for MockDav {
    fn propfind(&self, url: &Url, auth: Option<&Credentials>) -> RemoteResult<String> {
        self.record(format!("PROPFIND {}", url.path()), auth);
        self.authorize(url, auth)?;

        if let Some(status) = self.listing_status {
            return Err(RemoteError::Transfer {
                url: url.to_string(),
                status,
            });
        }
        if url.path().trim_end_matches('/') != self.root {
            return Err(RemoteError::Transfer {
                url: url.to_string(),
                status: 404,
            });
        }
        Ok(self.render_listing())
    }

    fn get_to(&self, url: &Url, auth: Option<&Credentials>, out: &mut dyn Write) -> RemoteResult<u64> {
        self.record(format!("GET {}", url.path()), auth);
        self.authorize(url, auth)?;

        let not_found = RemoteError::Transfer {
            url: url.to_string(),
            status: 404,
        };
        let relative = self.relative_of(url).ok_or(not_found)?;

        if let Some(&status) = self.failing_gets.get(&relative) {
            return Err(RemoteError::Transfer {
                url: url.to_string(),
                status,
            });
        }

        let content = self.files.get(&relative).ok_or_else(|| RemoteError::Transfer {
            url: url.to_string(),
            status: 404,
        })?;

        for chunk in content.chunks(CHUNK) {
            out.write_all(chunk).map_err(|e| RemoteError::Http {
                url: url.to_string(),
                message: format!("body copy failed: {}", e),
            })?;
        }
        Ok(content.len() as u64)
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
