//! WebDAV transports
//!
//! `DavTransport` is the seam between the directory fetcher and HTTP.
//! `HttpDav` is the production implementation; tests use `mock::MockDav`.

use std::io::Write;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tracing::debug;
use url::Url;

use crate::endpoint::{Credentials, RemoteEndpoint};
use crate::error::{RemoteError, RemoteResult};
use crate::timeout::TransferTimeouts;

/// Minimal PROPFIND body: only resource types are needed.
const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/></D:prop></D:propfind>"#;

/// Listing and download primitives for a WebDAV server
///
/// `auth` carries credentials taken from the URL being fetched. They take
/// precedence over anything the transport was built with.
pub trait DavTransport: Send + Sync {
    /// PROPFIND `url` with infinite depth and return the multistatus body.
    fn propfind(&self, url: &Url, auth: Option<&Credentials>) -> RemoteResult<String>;

    /// GET `url`, streaming the body into `out`. Returns bytes written.
    fn get_to(&self, url: &Url, auth: Option<&Credentials>, out: &mut dyn Write) -> RemoteResult<u64>;
}

impl<T: DavTransport + ?Sized> DavTransport for &T {
    fn propfind(&self, url: &Url, auth: Option<&Credentials>) -> RemoteResult<String> {
        (**self).propfind(url, auth)
    }

    fn get_to(&self, url: &Url, auth: Option<&Credentials>, out: &mut dyn Write) -> RemoteResult<u64> {
        (**self).get_to(url, auth, out)
    }
}

/// Blocking reqwest client with optional default basic auth
pub struct HttpDav {
    client: Client,
    credentials: Option<Credentials>,
}

impl HttpDav {
    pub fn new(credentials: Option<Credentials>, timeouts: TransferTimeouts) -> RemoteResult<Self> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect())
            .timeout(timeouts.transfer())
            .build()
            .map_err(|e| RemoteError::Http {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            credentials,
        })
    }

    /// Client authenticated with whatever the endpoint URL carried.
    pub fn for_endpoint(endpoint: &RemoteEndpoint, timeouts: TransferTimeouts) -> RemoteResult<Self> {
        Self::new(endpoint.credentials().cloned(), timeouts)
    }

    fn request(&self, method: Method, url: &Url, auth: Option<&Credentials>) -> RequestBuilder {
        let builder = self.client.request(method, url.clone());
        match auth.or(self.credentials.as_ref()) {
            Some(creds) => builder.basic_auth(creds.username(), creds.password()),
            None => builder,
        }
    }

    fn send(&self, builder: RequestBuilder, url: &Url) -> RemoteResult<reqwest::blocking::Response> {
        let response = builder.send().map_err(|e| http_error(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Transfer {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

impl DavTransport for HttpDav {
    fn propfind(&self, url: &Url, auth: Option<&Credentials>) -> RemoteResult<String> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        let builder = self
            .request(method, url, auth)
            .header("Depth", "infinity")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);

        debug!(%url, "PROPFIND");
        let response = self.send(builder, url)?;
        response.text().map_err(|e| http_error(url, e))
    }

    fn get_to(&self, url: &Url, auth: Option<&Credentials>, out: &mut dyn Write) -> RemoteResult<u64> {
        debug!(%url, "GET");
        let mut response = self.send(self.request(Method::GET, url, auth), url)?;
        response.copy_to(out).map_err(|e| http_error(url, e))
    }
}

fn http_error(url: &Url, err: reqwest::Error) -> RemoteError {
    RemoteError::Http {
        url: url.to_string(),
        message: err.without_url().to_string(),
    }
}
