//! Response metadata for object downloads.

/// Content type for a file name, from its extension.
///
/// Unknown extensions fall back to `application/octet-stream`.
pub fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .to_string()
}

/// Build an `inline` Content-Disposition value for a file name.
///
/// Control characters are dropped and quotes or backslashes replaced in the
/// plain `filename` parameter. Names that are not plain ASCII also get an
/// RFC 5987 `filename*` parameter.
pub fn content_disposition_inline(name: &str) -> String {
    let plain = name.is_ascii() && !name.chars().any(|c| c.is_control() || c == '"' || c == '\\');
    if plain {
        return format!("inline; filename=\"{name}\"");
    }

    let sanitized: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            _ => c,
        })
        .collect();
    let encoded = urlencoding::encode(name);

    format!("inline; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_known_extensions() {
        assert_eq!(content_type_for("cat.jpg"), "image/jpeg");
        assert_eq!(content_type_for("CAT.JPG"), "image/jpeg");
        assert_eq!(content_type_for("notes.txt"), "text/plain");
        assert_eq!(content_type_for("doc.pdf"), "application/pdf");
    }

    #[test]
    fn test_content_type_fallback() {
        assert_eq!(content_type_for("blob.zzzunknown"), "application/octet-stream");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }

    #[test]
    fn test_disposition_plain() {
        assert_eq!(
            content_disposition_inline("report.pdf"),
            "inline; filename=\"report.pdf\""
        );
    }

    #[test]
    fn test_disposition_escapes_quotes() {
        let value = content_disposition_inline("a\"b\\c.txt");
        assert!(value.starts_with("inline; filename=\"a_b_c.txt\""));
        assert!(value.contains("filename*=UTF-8''"));
    }

    #[test]
    fn test_disposition_non_ascii() {
        let value = content_disposition_inline("写真.jpg");
        assert!(value.starts_with("inline; filename=\"写真.jpg\""));
        assert!(value.ends_with(&format!("filename*=UTF-8''{}", urlencoding::encode("写真.jpg"))));
    }

    #[test]
    fn test_disposition_drops_control_characters() {
        let value = content_disposition_inline("bad\r\nname.txt");
        assert!(value.starts_with("inline; filename=\"badname.txt\""));
        assert!(!value.contains('\n'));
    }
}
