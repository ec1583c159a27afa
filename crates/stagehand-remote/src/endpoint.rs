//! Remote endpoint parsing
//!
//! An endpoint is `scheme://[user[:password]@]host[:port]/path`. The scheme
//! picks the collaborator: `ssh` runs shell steps over ssh/scp, `file` runs
//! them on the local machine, and `http(s)`/`dav(s)` address a WebDAV
//! collection. The scp shorthand `[user@]host:/path` is accepted as `ssh`.
//!
//! Credentials are parsed into a structured value. They are never rendered
//! by `Display` or `Debug`.

use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{RemoteError, RemoteResult};

/// Transfer collaborator selected by the endpoint scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Shell steps over ssh, payloads over scp
    Ssh,
    /// Shell steps on the local machine
    File,
    /// WebDAV over HTTP(S)
    WebDav { tls: bool },
}

impl Scheme {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ssh" | "scp" => Some(Scheme::Ssh),
            "file" => Some(Scheme::File),
            "http" | "dav" => Some(Scheme::WebDav { tls: false }),
            "https" | "davs" => Some(Scheme::WebDav { tls: true }),
            _ => None,
        }
    }
}

/// Username and optional password taken from the URL authority
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A parsed remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    scheme: Scheme,
    host: Option<String>,
    port: Option<u16>,
    credentials: Option<Credentials>,
    /// Decoded path
    path: String,
    /// Path as it appeared on the wire (percent-encoded)
    raw_path: String,
}

impl RemoteEndpoint {
    /// Parse an endpoint string.
    pub fn parse(input: &str) -> RemoteResult<Self> {
        if !input.contains("://") {
            return Self::parse_scp_shorthand(input);
        }

        let url = Url::parse(input).map_err(|e| RemoteError::endpoint(input, e.to_string()))?;

        let scheme = Scheme::parse(url.scheme()).ok_or_else(|| {
            RemoteError::endpoint(input, format!("unsupported scheme '{}'", url.scheme()))
        })?;

        let credentials = Self::parse_credentials(input, &url)?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(str::to_string);

        match scheme {
            Scheme::File => {
                if host.as_deref().is_some_and(|h| h != "localhost") {
                    return Err(RemoteError::endpoint(input, "file endpoints cannot name a host"));
                }
                if credentials.is_some() {
                    return Err(RemoteError::endpoint(input, "file endpoints cannot carry credentials"));
                }
            }
            Scheme::Ssh | Scheme::WebDav { .. } => {
                if host.is_none() {
                    return Err(RemoteError::endpoint(input, "missing host"));
                }
            }
        }

        let raw_path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };
        let path = decode(input, &raw_path)?;

        Ok(Self {
            scheme,
            host: if scheme == Scheme::File { None } else { host },
            port: url.port(),
            credentials,
            path,
            raw_path,
        })
    }

    /// `[user@]host:/path`
    fn parse_scp_shorthand(input: &str) -> RemoteResult<Self> {
        let (user, host_path) = match input.split_once('@') {
            Some((user, rest)) if !user.contains('/') => (Some(user), rest),
            _ => (None, input),
        };

        if let Some(user) = user {
            if user.is_empty() {
                return Err(RemoteError::endpoint(input, "empty user before '@'"));
            }
            if user.contains(':') {
                return Err(RemoteError::endpoint(
                    input,
                    "passwords are not accepted in host:path form",
                ));
            }
        }

        let (host, path) = host_path
            .split_once(':')
            .ok_or_else(|| RemoteError::endpoint(input, "expected scheme://... or host:/path"))?;

        if host.is_empty() {
            return Err(RemoteError::endpoint(input, "missing host"));
        }
        if path.is_empty() {
            return Err(RemoteError::endpoint(input, "missing path"));
        }

        Ok(Self {
            scheme: Scheme::Ssh,
            host: Some(host.to_string()),
            port: None,
            credentials: user.map(|u| Credentials::new(u, None)),
            path: path.to_string(),
            raw_path: path.to_string(),
        })
    }

    fn parse_credentials(input: &str, url: &Url) -> RemoteResult<Option<Credentials>> {
        let username = decode(input, url.username())?;
        let password = match url.password() {
            Some(p) => Some(decode(input, p)?),
            None => None,
        };

        match (username.is_empty(), password) {
            (true, None) => Ok(None),
            (true, Some(_)) => Err(RemoteError::endpoint(input, "password given without a user")),
            (false, password) => Ok(Some(Credentials::new(
                username,
                password.filter(|p| !p.is_empty()),
            ))),
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn user(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.username())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_webdav(&self) -> bool {
        matches!(self.scheme, Scheme::WebDav { .. })
    }

    /// Last non-empty path segment, used to name local mirrors.
    pub fn final_segment(&self) -> Option<&str> {
        self.path.split('/').rev().find(|s| !s.is_empty())
    }

    /// Plain HTTP(S) URL for a WebDAV endpoint, without user info.
    pub fn http_url(&self) -> RemoteResult<Url> {
        let tls = match self.scheme {
            Scheme::WebDav { tls } => tls,
            _ => {
                return Err(RemoteError::endpoint(
                    &self.to_string(),
                    "not a WebDAV endpoint",
                ))
            }
        };
        let host = self.host.as_deref().unwrap_or_default();
        let authority = match self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let rendered = format!(
            "{}://{}{}",
            if tls { "https" } else { "http" },
            authority,
            self.raw_path
        );
        Url::parse(&rendered).map_err(|e| RemoteError::endpoint(&self.to_string(), e.to_string()))
    }

    /// HTTP URL normalized to end with `/`, as collections must be listed.
    pub fn collection_url(&self) -> RemoteResult<Url> {
        let mut url = self.http_url()?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// `user@host` target for ssh/scp.
    pub fn ssh_target(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        Some(match self.user() {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        })
    }
}

impl FromStr for RemoteEndpoint {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Ssh => "ssh",
            Scheme::File => "file",
            Scheme::WebDav { tls: false } => "http",
            Scheme::WebDav { tls: true } => "https",
        };
        write!(f, "{}://", scheme)?;
        if let Some(user) = self.user() {
            write!(f, "{}@", user)?;
        }
        if let Some(host) = &self.host {
            write!(f, "{}", host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.path)
    }
}

fn decode(input: &str, raw: &str) -> RemoteResult<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| RemoteError::endpoint(input, "percent-encoded text is not UTF-8"))
}

/// Strip `user:password@` from a URL-ish string before it is shown anywhere.
pub fn redact_userinfo(input: &str) -> String {
    let Some(scheme_end) = input.find("://") else {
        return input.to_string();
    };
    let rest = &input[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", &input[..scheme_end], &rest[at + 1..]),
        None => input.to_string(),
    }
}
