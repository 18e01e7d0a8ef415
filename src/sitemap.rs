use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::info;
use url::Url;

use crate::error::{JobError, SitemapError};

/// A page discovered in the sitemap. Only the decoded URL path is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub path: String,
}

/// Read the sitemap file from disk and parse it.
pub async fn read_file(path: &Path) -> Result<Vec<SitemapEntry>, JobError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| JobError::SitemapUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
    let entries = read(&bytes)?;
    info!("The sitemap contains {} url(s)", entries.len());
    Ok(entries)
}

/// Parse a `<urlset>` document and return one entry per `<url><loc>`, in
/// document order. Duplicates are kept.
pub fn read(xml: &[u8]) -> Result<Vec<SitemapEntry>, SitemapError> {
    let mut reader = Reader::from_reader(xml);
    let mut entries = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut saw_urlset = false;
    // `<loc>` text being accumulated, and the first loc of the open `<url>`.
    let mut loc_text: Option<String> = None;
    let mut url_loc: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                open_element(&stack, &name, &mut saw_urlset, &mut loc_text, &mut url_loc)?;
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = e.local_name().as_ref().to_vec();
                open_element(&stack, &name, &mut saw_urlset, &mut loc_text, &mut url_loc)?;
                stack.push(name);
                close_element(&mut stack, &mut entries, &mut loc_text, &mut url_loc)?;
            }
            Event::Text(e) => {
                if let Some(text) = loc_text.as_mut() {
                    text.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let Some(text) = loc_text.as_mut() {
                    let raw = std::str::from_utf8(&e)
                        .map_err(|_| malformed("<loc> CDATA is not valid UTF-8"))?;
                    text.push_str(raw);
                }
            }
            Event::End(_) => {
                close_element(&mut stack, &mut entries, &mut loc_text, &mut url_loc)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(malformed(format!(
            "unexpected end of document inside <{}>",
            String::from_utf8_lossy(open)
        )));
    }
    if !saw_urlset {
        return Err(malformed("document has no <urlset> root element"));
    }
    Ok(entries)
}

fn open_element(
    stack: &[Vec<u8>],
    name: &[u8],
    saw_urlset: &mut bool,
    loc_text: &mut Option<String>,
    url_loc: &mut Option<String>,
) -> Result<(), SitemapError> {
    match (stack, name) {
        ([], b"urlset") => *saw_urlset = true,
        ([], other) => {
            return Err(malformed(format!(
                "root element is <{}>, expected <urlset>",
                String::from_utf8_lossy(other)
            )))
        }
        ([_], b"url") => *url_loc = None,
        ([_, parent], b"loc") if parent.as_slice() == b"url" => *loc_text = Some(String::new()),
        _ => {}
    }
    Ok(())
}

fn close_element(
    stack: &mut Vec<Vec<u8>>,
    entries: &mut Vec<SitemapEntry>,
    loc_text: &mut Option<String>,
    url_loc: &mut Option<String>,
) -> Result<(), SitemapError> {
    let name = stack
        .pop()
        .ok_or_else(|| malformed("closing tag without a matching opening tag"))?;

    match (stack.len(), name.as_slice()) {
        (2, b"loc") => {
            if let Some(text) = loc_text.take() {
                url_loc.get_or_insert(text);
            }
        }
        (1, b"url") => {
            let loc = url_loc
                .take()
                .ok_or_else(|| malformed(format!("<url> #{} has no <loc>", entries.len() + 1)))?;
            entries.push(entry_from_loc(&loc)?);
        }
        _ => {}
    }
    Ok(())
}

/// Keep only the percent-decoded path of an absolute page URL.
fn entry_from_loc(loc: &str) -> Result<SitemapEntry, SitemapError> {
    let loc = loc.trim();
    if loc.is_empty() {
        return Err(malformed("empty <loc>"));
    }
    let url = Url::parse(loc)
        .map_err(|e| malformed(format!("<loc> {:?} is not an absolute URL: {}", loc, e)))?;
    if url.cannot_be_a_base() {
        return Err(malformed(format!("<loc> {:?} has no path component", loc)));
    }
    let path = decode_path(url.path())
        .ok_or_else(|| malformed(format!("<loc> {:?} path is not valid UTF-8", loc)))?;
    Ok(SitemapEntry { path })
}

/// Characters whose escapes stay encoded, so `%2F` never becomes a segment
/// separator.
const RESERVED: &[u8] = b";/?:@&=+$,#";

/// Percent-decode a URL path, leaving escapes of reserved characters as-is.
fn decode_path(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let (mut start, mut i) = (0, 0);
    while i < bytes.len() {
        let reserved = bytes[i] == b'%'
            && raw
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .is_some_and(|b| RESERVED.contains(&b));
        if reserved {
            out.push_str(&urlencoding::decode(&raw[start..i]).ok()?);
            out.push_str(&raw[i..i + 3]);
            i += 3;
            start = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&urlencoding::decode(&raw[start..]).ok()?);
    Some(out)
}

fn malformed(msg: impl Into<String>) -> SitemapError {
    SitemapError::Malformed(msg.into())
}
