//! WebDAV multistatus parsing
//!
//! Only two things are read from a PROPFIND response: each `response`'s
//! `href` and whether its `resourcetype` contains `collection`. Element
//! matching uses local names, so `D:`, `d:` and default-namespace documents
//! all parse the same.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{RemoteError, RemoteResult};

/// One `response` element of a multistatus document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavEntry {
    /// Raw href as sent by the server (path or absolute URL, percent-encoded)
    pub href: String,
    pub is_collection: bool,
}

pub fn parse_multistatus(xml: &str) -> RemoteResult<Vec<DavEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut in_response = false;
    let mut in_href = false;
    let mut in_resourcetype = false;
    let mut href = String::new();
    let mut is_collection = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => {
                    in_response = true;
                    href.clear();
                    is_collection = false;
                }
                b"href" if in_response => in_href = true,
                b"resourcetype" if in_response => in_resourcetype = true,
                b"collection" if in_resourcetype => is_collection = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_resourcetype && e.local_name().as_ref() == b"collection" {
                    is_collection = true;
                }
            }
            Ok(Event::Text(t)) if in_href => {
                let text = t
                    .unescape()
                    .map_err(|e| RemoteError::Protocol(format!("bad href text: {}", e)))?;
                href.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"href" => in_href = false,
                b"resourcetype" => in_resourcetype = false,
                b"response" if in_response => {
                    in_response = false;
                    let trimmed = href.trim();
                    if trimmed.is_empty() {
                        return Err(RemoteError::Protocol(
                            "multistatus response without href".to_string(),
                        ));
                    }
                    entries.push(DavEntry {
                        href: trimmed.to_string(),
                        is_collection,
                    });
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RemoteError::Protocol(format!(
                    "malformed multistatus at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/products/S1A_IW/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/products/S1A_IW/manifest.safe</D:href>
    <D:propstat>
      <D:prop><D:resourcetype/><D:getcontentlength>42</D:getcontentlength></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/products/S1A_IW/measurement/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection></D:collection></D:resourcetype></D:prop>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/products/S1A_IW/measurement/s1a%20vv.tiff</D:href>
    <D:propstat><D:prop><D:resourcetype/></D:prop></D:propstat>
  </D:response>
</D:multistatus>"#;

    #[test]
    fn test_parse_prefixed_listing() {
        let entries = parse_multistatus(LISTING).unwrap();
        assert_eq!(entries.len(), 4);
        assert!(entries[0].is_collection);
        assert!(!entries[1].is_collection);
        assert!(entries[2].is_collection);
        assert_eq!(entries[3].href, "/products/S1A_IW/measurement/s1a%20vv.tiff");
        assert!(!entries[3].is_collection);
    }

    #[test]
    fn test_parse_default_namespace() {
        let xml = r#"<multistatus xmlns="DAV:">
            <response><href>http://dav.example.org/a/b.txt</href>
              <propstat><prop><resourcetype/></prop></propstat></response>
            </multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries, vec![DavEntry {
            href: "http://dav.example.org/a/b.txt".to_string(),
            is_collection: false,
        }]);
    }

    #[test]
    fn test_escaped_href() {
        let xml = r#"<d:multistatus xmlns:d="DAV:"><d:response>
            <d:href>/a/R&amp;D.txt</d:href></d:response></d:multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries[0].href, "/a/R&D.txt");
    }

    #[test]
    fn test_malformed_document() {
        let err = parse_multistatus("<D:multistatus xmlns:D=\"DAV:\"><D:response></D:multistatus>").unwrap_err();
        assert!(matches!(err, RemoteError::Protocol(_)));
    }

    #[test]
    fn test_response_without_href() {
        let err = parse_multistatus("<multistatus><response></response></multistatus>").unwrap_err();
        assert!(err.to_string().contains("without href"));
    }
}
