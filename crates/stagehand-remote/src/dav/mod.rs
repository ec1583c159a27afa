//! WebDAV directory mirroring

mod fetcher;
mod multistatus;
mod transport;

pub use fetcher::{DirectoryFetcher, FetchReport};
pub use multistatus::{parse_multistatus, DavEntry};
pub use transport::{DavTransport, HttpDav};
