//! HTTP `Range` header handling for single byte ranges.

use serde::Serialize;

/// An inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` value for a partial response.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// How a request's `Range` header applies to a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range: serve the whole file.
    Full,
    Partial(ByteRange),
    /// Syntactically valid but outside the file.
    Unsatisfiable,
}

/// A syntactically valid single range, before the file size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeSpec {
    /// `bytes=a-` or `bytes=a-b`.
    From { start: u64, end: Option<u64> },
    /// `bytes=-n`.
    Suffix(u64),
}

fn parse_spec(header: &str) -> Option<RangeSpec> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start_s, end_s) = spec.trim().split_once('-')?;
    let (start_s, end_s) = (start_s.trim(), end_s.trim());

    if start_s.is_empty() {
        return end_s.parse().ok().map(RangeSpec::Suffix);
    }
    let start = start_s.parse().ok()?;
    let end = if end_s.is_empty() {
        None
    } else {
        Some(end_s.parse().ok()?)
    };
    if end.is_some_and(|end| end < start) {
        return None;
    }
    Some(RangeSpec::From { start, end })
}

/// Resolve a `Range` header against a file size.
///
/// Supports `bytes=a-b`, `bytes=a-` and `bytes=-n`. Headers that do not
/// parse, use another unit or ask for several ranges are ignored and the
/// whole file is served.
pub fn resolve_range(header: Option<&str>, size: u64) -> RangeRequest {
    let Some(spec) = header.and_then(parse_spec) else {
        return RangeRequest::Full;
    };
    match spec {
        RangeSpec::Suffix(suffix) => {
            if suffix == 0 || size == 0 {
                return RangeRequest::Unsatisfiable;
            }
            RangeRequest::Partial(ByteRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            })
        }
        RangeSpec::From { start, end } => {
            if start >= size {
                return RangeRequest::Unsatisfiable;
            }
            let end = end.map_or(size - 1, |end| end.min(size - 1));
            RangeRequest::Partial(ByteRange { start, end })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_header_is_full() {
        assert_eq!(resolve_range(None, 1000), RangeRequest::Full);
    }

    #[test]
    fn open_ended_range() {
        assert_eq!(
            resolve_range(Some("bytes=100-"), 1000),
            RangeRequest::Partial(ByteRange { start: 100, end: 999 })
        );
    }

    #[test]
    fn closed_range_is_clamped_to_size() {
        assert_eq!(
            resolve_range(Some("bytes=0-4999"), 1000),
            RangeRequest::Partial(ByteRange { start: 0, end: 999 })
        );
    }

    #[test]
    fn suffix_range() {
        let range = resolve_range(Some("bytes=-200"), 1000);
        assert_eq!(range, RangeRequest::Partial(ByteRange { start: 800, end: 999 }));
    }

    #[test]
    fn start_past_end_of_file_is_unsatisfiable() {
        assert_eq!(resolve_range(Some("bytes=1000-"), 1000), RangeRequest::Unsatisfiable);
        assert_eq!(resolve_range(Some("bytes=-0"), 1000), RangeRequest::Unsatisfiable);
    }

    #[test]
    fn unparsable_headers_are_ignored() {
        for header in ["items=0-1", "bytes=abc-", "bytes=5-2", "bytes=0-1,5-9", "bytes"] {
            assert_eq!(resolve_range(Some(header), 1000), RangeRequest::Full, "{header}");
        }
    }

    #[test]
    fn content_range_format() {
        let range = ByteRange { start: 100, end: 999 };
        assert_eq!(range.len(), 900);
        assert_eq!(range.content_range(1000), "bytes 100-999/1000");
    }
}
