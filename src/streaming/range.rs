//! HTTP `Range` header parsing against a known file size.
//!
//! The parser is total: malformed input falls back to the full range rather
//! than erroring, because media players routinely send sloppy headers and a
//! refused stream is worse than a full one. Rejecting a start offset beyond
//! the end of the file (`416`) is the caller's decision, not the parser's.

/// A resolved byte window, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    fn full(file_size: u64) -> Self {
        Self {
            start: 0,
            end: file_size.saturating_sub(1),
        }
    }
}

/// Parse a `Range` header value against `file_size`.
///
/// Supported form: `bytes=<start>-[<end>]`. Everything else - absent or
/// empty header, other units, suffix ranges (`-500`), multi-range specs,
/// unparseable start - falls back to the full file. An unparseable or
/// inverted `end` snaps to `file_size - 1`, and `end` is always clamped to
/// the last byte. `start` is returned as parsed and may lie past the end of
/// the file; the caller turns that into `416`.
pub fn parse(header: Option<&str>, file_size: u64) -> ByteRange {
    let full = ByteRange::full(file_size);

    let Some(header) = header else {
        return full;
    };
    if header.is_empty() {
        return full;
    }

    let Some((unit, spec)) = header.split_once('=') else {
        tracing::warn!(range = header, "invalid range header format, serving full file");
        return full;
    };
    if unit != "bytes" {
        tracing::warn!(range = header, "unsupported range unit, serving full file");
        return full;
    }

    let Some((start_part, end_part)) = spec.split_once('-') else {
        tracing::warn!(range = header, "missing range separator, serving full file");
        return full;
    };

    let Ok(start) = start_part.parse::<u64>() else {
        tracing::warn!(range = header, "invalid range start, serving full file");
        return full;
    };

    let mut end = if end_part.is_empty() {
        file_size.saturating_sub(1)
    } else {
        match end_part.parse::<u64>() {
            Ok(end) if end >= start => end,
            _ => {
                tracing::warn!(range = header, "invalid range end, snapping to file end");
                file_size.saturating_sub(1)
            }
        }
    };

    if end >= file_size {
        end = file_size.saturating_sub(1);
    }

    ByteRange { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_header_serves_full_file() {
        assert_eq!(parse(None, 1000), ByteRange { start: 0, end: 999 });
        assert_eq!(parse(Some(""), 1000), ByteRange { start: 0, end: 999 });
    }

    #[test]
    fn test_bounded_range() {
        assert_eq!(parse(Some("bytes=0-499"), 1000), ByteRange { start: 0, end: 499 });
        assert_eq!(parse(Some("bytes=500-999"), 1000), ByteRange { start: 500, end: 999 });
    }

    #[test]
    fn test_open_ended_range() {
        assert_eq!(parse(Some("bytes=500-"), 1000), ByteRange { start: 500, end: 999 });
    }

    #[test]
    fn test_end_clamped_to_file_size() {
        assert_eq!(parse(Some("bytes=0-2000"), 1000), ByteRange { start: 0, end: 999 });
    }

    #[test]
    fn test_inverted_end_snaps_to_file_end() {
        assert_eq!(parse(Some("bytes=500-100"), 1000), ByteRange { start: 500, end: 999 });
    }

    #[test]
    fn test_malformed_input_serves_full_file() {
        assert_eq!(parse(Some("bytes"), 1000), ByteRange { start: 0, end: 999 });
        assert_eq!(parse(Some("items=0-10"), 1000), ByteRange { start: 0, end: 999 });
        assert_eq!(parse(Some("bytes=abc-def"), 1000), ByteRange { start: 0, end: 999 });
        assert_eq!(parse(Some("bytes=500"), 1000), ByteRange { start: 0, end: 999 });
    }

    #[test]
    fn test_suffix_range_unsupported_serves_full_file() {
        assert_eq!(parse(Some("bytes=-500"), 1000), ByteRange { start: 0, end: 999 });
    }

    #[test]
    fn test_start_past_eof_is_preserved_for_caller() {
        // The caller decides 416; the parser just clamps end.
        assert_eq!(parse(Some("bytes=5000-"), 1000), ByteRange { start: 5000, end: 999 });
    }

    #[test]
    fn test_empty_file() {
        assert_eq!(parse(None, 0), ByteRange { start: 0, end: 0 });
        assert_eq!(parse(Some("bytes=0-"), 0), ByteRange { start: 0, end: 0 });
    }

    #[test]
    fn test_clamping_is_idempotent() {
        for header in ["bytes=0-499", "bytes=900-", "bytes=100-99999", "bytes=7-7"] {
            let first = parse(Some(header), 1000);
            assert!(first.start <= first.end);
            assert!(first.end <= 999);
            let again = parse(Some(&format!("bytes={}-{}", first.start, first.end)), 1000);
            assert_eq!(first, again);
        }
    }
}
