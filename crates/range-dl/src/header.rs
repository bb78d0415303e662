//! Range request construction and response header inspection

use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use log::trace;
use serde::Serialize;

/// Value of an open-ended `Range` header starting at `offset`.
pub fn range_from(offset: u64) -> String {
    format!("bytes={}-", offset)
}

/// Adds `Range: bytes=<offset>-` when `offset > 0`.
pub fn with_range(request: RequestBuilder, offset: u64) -> RequestBuilder {
    if offset > 0 {
        trace!("range_header: offset={}", offset);
        request.header(reqwest::header::RANGE, range_from(offset))
    } else {
        request
    }
}

/// Whether the server honoured (or advertises support for) a byte-range resume.
///
/// A `206 Partial Content` status is enough on its own; otherwise any
/// `Accept-Ranges` value listing `bytes` (case-insensitive) counts.
pub fn accepts_ranges(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::PARTIAL_CONTENT {
        return true;
    }
    headers
        .get_all(ACCEPT_RANGES)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
}

/// File name suggested by `Content-Disposition`, preferring the RFC 5987
/// `filename*` form over plain `filename`. Directory components are stripped.
pub fn file_name_from_disposition(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(CONTENT_DISPOSITION)?;
    let value = String::from_utf8_lossy(raw.as_bytes());

    let mut plain = None;
    let mut extended = None;
    for param in value.split(';').skip(1) {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let val = val.trim();
        match key.as_str() {
            "filename*" => {
                // charset'language'percent-encoded
                let encoded = val.splitn(3, '\'').nth(2).unwrap_or(val);
                if let Ok(decoded) = urlencoding::decode(encoded.trim_matches('"')) {
                    extended = Some(decoded.into_owned());
                }
            }
            "filename" => plain = Some(val.trim_matches('"').to_string()),
            _ => {}
        }
    }

    extended
        .or(plain)
        .map(|name| {
            name.rsplit(['/', '\\'])
                .next()
                .unwrap_or_default()
                .trim()
                .to_string()
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// What a transfer needs to know about a response, detached from its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseMeta {
    pub status: u16,
    pub content_length: Option<u64>,
    pub accepts_ranges: bool,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl ResponseMeta {
    pub fn from_parts(status: StatusCode, headers: &HeaderMap) -> Self {
        Self {
            status: status.as_u16(),
            content_length: header_str(headers, CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()),
            accepts_ranges: accepts_ranges(status, headers),
            file_name: file_name_from_disposition(headers),
            content_type: header_str(headers, CONTENT_TYPE),
        }
    }

    pub fn from_response(response: &Response) -> Self {
        Self::from_parts(response.status(), response.headers())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_partial(&self) -> bool {
        self.status == StatusCode::PARTIAL_CONTENT.as_u16()
    }
}
