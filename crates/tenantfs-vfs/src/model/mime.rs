//! MIME type and class derivation.
//!
//! The class is a coarse bucket clients use to pick an icon or a viewer.

use crate::constants::{DEFAULT_CLASS, DEFAULT_CONTENT_TYPE};
use crate::model::name::split_ext;

const EXTENSIONS: &[(&str, &str)] = &[
    // images
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".bmp", "image/bmp"),
    (".webp", "image/webp"),
    (".svg", "image/svg+xml"),
    (".heic", "image/heic"),
    (".tif", "image/tiff"),
    (".tiff", "image/tiff"),
    // audio / video
    (".mp3", "audio/mpeg"),
    (".ogg", "audio/ogg"),
    (".flac", "audio/flac"),
    (".wav", "audio/wav"),
    (".mp4", "video/mp4"),
    (".mov", "video/quicktime"),
    (".webm", "video/webm"),
    (".mkv", "video/x-matroska"),
    // text and code
    (".txt", "text/plain"),
    (".md", "text/markdown"),
    (".csv", "text/csv"),
    (".html", "text/html"),
    (".htm", "text/html"),
    (".css", "text/css"),
    (".xml", "text/xml"),
    (".js", "application/javascript"),
    (".json", "application/json"),
    (".c", "text/x-c"),
    (".go", "text/x-go"),
    (".py", "text/x-python"),
    (".rb", "application/x-ruby"),
    (".rs", "text/x-rust"),
    // documents
    (".pdf", "application/pdf"),
    (".doc", "application/msword"),
    (".docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    (".odt", "application/vnd.oasis.opendocument.text"),
    (".xls", "application/vnd.ms-excel"),
    (".xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    (".ods", "application/vnd.oasis.opendocument.spreadsheet"),
    (".ppt", "application/vnd.ms-powerpoint"),
    (".pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    (".odp", "application/vnd.oasis.opendocument.presentation"),
    (".key", "application/vnd.apple.keynote"),
    // archives and binaries
    (".zip", "application/zip"),
    (".gz", "application/gzip"),
    (".tar", "application/x-tar"),
    (".7z", "application/x-7z-compressed"),
    (".rar", "application/x-rar-compressed"),
    (".dmg", "application/x-apple-diskimage"),
    (".exe", "application/x-msdownload"),
];

/// Derive `(mime, class)` from a file name's extension.
///
/// Unknown or missing extensions give `application/octet-stream` / `files`.
pub fn mime_and_class_from_filename(name: &str) -> (String, String) {
    let (_, ext) = split_ext(name);
    let ext = ext.to_ascii_lowercase();
    let mime = EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, m)| *m)
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    mime_and_class(mime)
}

/// Split a Content-Type value into `(mime, class)`, dropping parameters.
pub fn mime_and_class(content_type: &str) -> (String, String) {
    let content_type = if content_type.trim().is_empty() {
        DEFAULT_CONTENT_TYPE
    } else {
        content_type
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_string();

    let class = match mime.as_str() {
        DEFAULT_CONTENT_TYPE => DEFAULT_CLASS.to_string(),
        "application/x-apple-diskimage" | "application/x-msdownload" => "binary".to_string(),
        "text/html" | "text/css" | "text/xml" | "application/javascript" | "application/json"
        | "text/x-c" | "text/x-go" | "text/x-python" | "text/x-rust" | "application/x-ruby" => {
            "code".to_string()
        }
        "application/pdf" => "pdf".to_string(),
        "application/vnd.ms-powerpoint"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        | "application/vnd.oasis.opendocument.presentation"
        | "application/vnd.apple.keynote" => "slide".to_string(),
        "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.oasis.opendocument.spreadsheet"
        | "text/csv" => "spreadsheet".to_string(),
        "application/msword"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/vnd.oasis.opendocument.text"
        | "text/markdown"
        | "text/plain" => "text".to_string(),
        "application/zip" | "application/gzip" | "application/x-tar"
        | "application/x-7z-compressed" | "application/x-rar-compressed" => "zip".to_string(),
        other => other.split('/').next().unwrap_or(other).to_string(),
    };
    (mime, class)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_filename() {
        assert_eq!(
            mime_and_class_from_filename("foof"),
            ("application/octet-stream".into(), "files".into())
        );
        assert_eq!(
            mime_and_class_from_filename("foof.jpg"),
            ("image/jpeg".into(), "image".into())
        );
        assert_eq!(
            mime_and_class_from_filename("SCAN.PDF"),
            ("application/pdf".into(), "pdf".into())
        );
        assert_eq!(mime_and_class_from_filename("notes.md").1, "text");
        assert_eq!(mime_and_class_from_filename("backup.tar").1, "zip");
    }

    #[test]
    fn test_content_type_parameters() {
        let (mime, class) = mime_and_class("text/html; charset=utf-8");
        assert_eq!(mime, "text/html");
        assert_eq!(class, "code");

        let (mime, class) = mime_and_class("");
        assert_eq!(mime, DEFAULT_CONTENT_TYPE);
        assert_eq!(class, DEFAULT_CLASS);

        assert_eq!(mime_and_class("font/woff2").1, "font");
    }
}
