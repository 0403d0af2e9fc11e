// ABOUTME: Strips characters that are illegal in XML from raw upstream payloads
// ABOUTME: Total over text input; only undecodable bytes are rejected

use std::sync::OnceLock;

use regex::Regex;

use super::FeedError;

/// Control characters (except TAB, LF, CR), C1 controls, and the
/// noncharacters XML 1.0 forbids. Surrogate code points cannot occur in a
/// Rust `str`, so lone surrogates are rejected at decode time instead.
fn illegal_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\x9F\x{FDD0}-\x{FDEF}\x{FFFE}\x{FFFF}]")
            .expect("static regex")
    })
}

/// Decimal (`&#38;`) and hexadecimal (`&#x26;`) numeric character references.
fn char_refs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"&#(?:[xX][0-9A-Fa-f]+|[0-9]+);").expect("static regex")
    })
}

/// Remove NUL bytes, illegal XML code points and numeric character references.
///
/// Well-formed content outside those classes passes through untouched. The
/// reference pass repeats until nothing matches so that removals cannot splice
/// a new reference together, which keeps the function idempotent.
pub fn sanitize(raw: &str) -> String {
    let mut cleaned = illegal_chars().replace_all(raw, "").into_owned();

    while char_refs().is_match(&cleaned) {
        cleaned = char_refs().replace_all(&cleaned, "").into_owned();
    }

    cleaned
}

/// Decode a raw response body and sanitize it.
///
/// Fails only when the bytes are not valid UTF-8 text.
pub fn sanitize_bytes(raw: &[u8]) -> Result<String, FeedError> {
    let text = std::str::from_utf8(raw).map_err(FeedError::InvalidInput)?;
    Ok(sanitize(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_nul_bytes() {
        assert_eq!(sanitize("ab\u{0}c\u{0}"), "abc");
    }

    #[test]
    fn test_removes_numeric_character_references() {
        assert_eq!(sanitize("a&#x1F;b&#X0B;c&#12;d"), "abcd");
    }

    #[test]
    fn test_removes_control_and_noncharacters() {
        let raw = "x\u{1}\u{8}\u{B}\u{C}\u{1F}\u{7F}\u{85}\u{9F}\u{FDD0}\u{FDEF}\u{FFFE}\u{FFFF}y";
        assert_eq!(sanitize(raw), "xy");
    }

    #[test]
    fn test_keeps_whitespace_and_markup() {
        let xml = "<d:name>Smith &amp; Sons\tLLC\r\n</d:name>";
        assert_eq!(sanitize(xml), xml);
    }

    #[test]
    fn test_keeps_non_ascii_text() {
        let xml = "<d:city>Zürich – 東京 🏠</d:city>";
        assert_eq!(sanitize(xml), xml);
    }

    #[test]
    fn test_is_idempotent_when_removal_splices_a_reference() {
        let raw = "&#&#x41;x41;&#\u{0}65;";
        let once = sanitize(raw);
        assert_eq!(sanitize(&once), once);
        assert!(!char_refs().is_match(&once));
    }

    #[test]
    fn test_idempotent_on_mixed_input() {
        let samples = [
            "",
            "plain",
            "<a>\u{0}&#x0;</a>",
            "\u{FFFE}&#1;\u{1}&#x&#10;;",
            "&#xD800;&#xDC00;ok",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_sanitize_bytes_rejects_invalid_utf8() {
        let err = sanitize_bytes(&[0x3c, 0xff, 0xfe, 0x3e]).unwrap_err();
        assert!(matches!(err, FeedError::InvalidInput(_)));
    }

    #[test]
    fn test_sanitize_bytes_accepts_utf8() {
        let text = sanitize_bytes("<a>\u{0}ok</a>".as_bytes()).unwrap();
        assert_eq!(text, "<a>ok</a>");
    }
}
