//! Recursive WebDAV download
//!
//! Lists a collection with one infinite-depth PROPFIND, then streams every
//! non-collection entry into a local mirror rooted at a directory named after
//! the collection's final path segment.
//!
//! A failed fetch leaves whatever was already mirrored in place. Callers must
//! treat an interrupted fetch as needing a full re-fetch. Each file is written
//! to a fresh hidden temp file beside its target and renamed once its body is
//! complete, so a truncated file never appears under its final name and no
//! listed name is ever used as scratch space.
//!
//! Credentials in the URL authority are passed to the transport with every
//! request.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use super::multistatus::parse_multistatus;
use super::transport::DavTransport;
use crate::endpoint::{Credentials, RemoteEndpoint};
use crate::error::{RemoteError, RemoteResult};

const PART_PREFIX: &str = ".stagehand-";
const PART_SUFFIX: &str = ".part";

/// Outcome of a completed directory fetch
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    /// Local directory mirroring the remote collection
    pub local_root: PathBuf,
    /// Files written, in listing order
    pub files: Vec<PathBuf>,
    /// Total bytes written
    pub bytes: u64,
}

/// Mirrors WebDAV collections under a local destination directory
pub struct DirectoryFetcher<T: DavTransport> {
    transport: T,
    dest_root: PathBuf,
}

impl<T: DavTransport> DirectoryFetcher<T> {
    pub fn new(transport: T, dest_root: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            dest_root: dest_root.into(),
        }
    }

    /// Fetch the collection at `url` and return the local mirror path.
    ///
    /// `user:password@` in the URL authenticates every request.
    pub fn fetch_directory(&self, url: &str) -> RemoteResult<PathBuf> {
        let endpoint = RemoteEndpoint::parse(url)?;
        Ok(self.fetch(&endpoint)?.local_root)
    }

    /// Fetch the collection named by `endpoint`.
    pub fn fetch(&self, endpoint: &RemoteEndpoint) -> RemoteResult<FetchReport> {
        if !endpoint.is_webdav() {
            return Err(RemoteError::InvalidRequest(format!(
                "{} is not a WebDAV endpoint",
                endpoint
            )));
        }

        let base = endpoint.collection_url()?;
        let name = endpoint.final_segment().ok_or_else(|| {
            RemoteError::InvalidRequest(format!("{} has no final path segment to name a mirror", endpoint))
        })?;
        check_segment(name)?;

        let local_root = self.dest_root.join(name);
        fs::create_dir_all(&local_root).map_err(|e| RemoteError::local_io(&local_root, e))?;

        let auth = endpoint.credentials();
        let listing = self.transport.propfind(&base, auth)?;
        let entries = parse_multistatus(&listing)?;
        let base_segments = decoded_segments(&base)?;

        let mut report = FetchReport {
            local_root: local_root.clone(),
            ..Default::default()
        };

        for entry in entries.iter().filter(|e| !e.is_collection) {
            let url = base
                .join(&entry.href)
                .map_err(|e| RemoteError::Protocol(format!("bad href '{}': {}", entry.href, e)))?;

            if url.host_str() != base.host_str() || url.port_or_known_default() != base.port_or_known_default() {
                return Err(RemoteError::Protocol(format!(
                    "href '{}' points outside {}",
                    entry.href, base
                )));
            }

            let relative = relative_segments(&base_segments, &url)?;
            if relative.is_empty() {
                continue;
            }

            let local = relative.iter().fold(local_root.clone(), |p, s| p.join(s));
            let bytes = self.download(&url, auth, &local)?;
            debug!(%url, local = %local.display(), bytes, "fetched file");

            report.bytes += bytes;
            report.files.push(local);
        }

        info!(
            remote = %endpoint,
            local = %local_root.display(),
            files = report.files.len(),
            bytes = report.bytes,
            "fetched remote directory"
        );

        Ok(report)
    }

    fn download(&self, url: &Url, auth: Option<&Credentials>, local: &Path) -> RemoteResult<u64> {
        let parent = local.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| RemoteError::local_io(parent, e))?;

        let mut part = tempfile::Builder::new()
            .prefix(PART_PREFIX)
            .suffix(PART_SUFFIX)
            .tempfile_in(parent)
            .map_err(|e| RemoteError::local_io(parent, e))?;
        let part_path = part.path().to_path_buf();

        let bytes = self.stream(url, auth, &part_path, BufWriter::new(part.as_file_mut()))?;

        part.persist(local)
            .map_err(|e| RemoteError::local_io(local, e.error))?;
        Ok(bytes)
    }

    /// GET `url` into `out`. Write failures on `out` are reported as local
    /// I/O at `path`, whatever error the transport wrapped them in.
    fn stream(&self, url: &Url, auth: Option<&Credentials>, path: &Path, out: impl Write) -> RemoteResult<u64> {
        let mut sink = Sink {
            inner: out,
            failure: None,
        };
        let result = self
            .transport
            .get_to(url, auth, &mut sink)
            .and_then(|bytes| {
                sink.flush()
                    .map(|()| bytes)
                    .map_err(|e| RemoteError::local_io(path, e))
            });

        match (result, sink.failure.take()) {
            (Err(_), Some(source)) => Err(RemoteError::local_io(path, source)),
            (result, _) => result,
        }
    }
}

/// Writer that keeps the first error its inner writer returned
struct Sink<W> {
    inner: W,
    failure: Option<io::Error>,
}

impl<W> Sink<W> {
    fn record(&mut self, err: io::Error) -> io::Error {
        let copy = io::Error::new(err.kind(), err.to_string());
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        copy
    }
}

impl<W: Write> Write for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).map_err(|e| self.record(e))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(|e| self.record(e))
    }
}

fn decoded_segments(url: &Url) -> RemoteResult<Vec<String>> {
    let Some(segments) = url.path_segments() else {
        return Ok(Vec::new());
    };
    segments
        .filter(|s| !s.is_empty())
        .map(|s| {
            percent_decode_str(s)
                .decode_utf8()
                .map(|d| d.into_owned())
                .map_err(|_| RemoteError::Protocol(format!("path segment '{}' is not UTF-8", s)))
        })
        .collect()
}

/// Decoded path segments of `url` below the listing root.
fn relative_segments(base: &[String], url: &Url) -> RemoteResult<Vec<String>> {
    let segments = decoded_segments(url)?;
    if segments.len() < base.len() || segments[..base.len()] != base[..] {
        return Err(RemoteError::Protocol(format!(
            "href '{}' is not below the listed collection",
            url.path()
        )));
    }
    let relative = segments[base.len()..].to_vec();
    for segment in &relative {
        check_segment(segment)?;
    }
    Ok(relative)
}

fn check_segment(segment: &str) -> RemoteResult<()> {
    if segment == "." || segment == ".." || segment.contains(['/', '\\', '\0']) {
        return Err(RemoteError::Protocol(format!(
            "refusing unsafe path segment '{}'",
            segment
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDav;

    #[test]
    fn test_relative_segments() {
        let base = Url::parse("http://h/products/S1A/").unwrap();
        let base_segments = decoded_segments(&base).unwrap();
        assert_eq!(base_segments, vec!["products", "S1A"]);

        let url = Url::parse("http://h/products/S1A/measurement/vv%20band.tiff").unwrap();
        assert_eq!(
            relative_segments(&base_segments, &url).unwrap(),
            vec!["measurement", "vv band.tiff"]
        );
    }

    #[test]
    fn test_outside_root_rejected() {
        let base_segments = vec!["products".to_string(), "S1A".to_string()];
        let url = Url::parse("http://h/products/S1B/x").unwrap();
        assert!(relative_segments(&base_segments, &url).is_err());
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_local_write_failure_is_local_io() {
        let dav = MockDav::new("/p").with_file("a.bin", vec![0u8; 64]);
        let fetcher = DirectoryFetcher::new(&dav, "unused");
        let url = Url::parse("http://h/p/a.bin").unwrap();
        let part = Path::new("mirror/.stagehand-a.part");

        let err = fetcher.stream(&url, None, part, FullDisk).unwrap_err();

        match err {
            RemoteError::LocalIo { path, source } => {
                assert_eq!(path, part);
                assert!(source.to_string().contains("no space left"));
            }
            other => panic!("expected local I/O error, got {other:?}"),
        }
    }

    #[test]
    fn test_remote_failure_is_not_local_io() {
        let dav = MockDav::new("/p").with_file("a.bin", "x").fail_get("a.bin", 503);
        let fetcher = DirectoryFetcher::new(&dav, "unused");
        let url = Url::parse("http://h/p/a.bin").unwrap();

        let err = fetcher
            .stream(&url, None, Path::new("x.part"), Vec::new())
            .unwrap_err();

        assert!(matches!(err, RemoteError::Transfer { status: 503, .. }));
    }

    #[test]
    fn test_encoded_traversal_rejected() {
        let base_segments = vec!["p".to_string()];
        let url = Url::parse("http://h/p/a%2F..%2Fescape").unwrap();
        assert!(relative_segments(&base_segments, &url).is_err());
    }
}
