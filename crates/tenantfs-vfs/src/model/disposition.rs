//! Content-Disposition header values (RFC 6266, RFC 5987).

use std::fmt::Write;

/// Legacy `filename=` value used when nothing printable survives.
const FALLBACK_FILENAME: &str = "download";

/// Build a Content-Disposition value such as `attachment; filename="a.zip"`.
///
/// The quoted `filename` keeps only printable ASCII (minus quotes and
/// slashes). When that differs from the real name, the UTF-8 name is added as
/// a percent-encoded `filename*` parameter.
pub fn content_disposition(disposition: &str, filename: &str) -> String {
    let mut legacy: String = filename
        .chars()
        .filter(|&c| c > ' ' && c < '\u{7f}' && c != '"' && c != '/' && c != '\\')
        .collect();
    if legacy.is_empty() {
        legacy = FALLBACK_FILENAME.to_string();
    }
    if legacy == filename {
        return format!(r#"{disposition}; filename="{legacy}""#);
    }
    format!(
        r#"{disposition}; filename="{legacy}"; filename*=UTF-8''{}"#,
        percent_encode(filename)
    )
}

/// RFC 5987 `value-chars`: unreserved bytes stay, everything else is `%XX`.
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            // Writing to a String cannot fail.
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}
