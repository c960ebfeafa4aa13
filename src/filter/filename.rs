//! Filename sanitization for names taken from untrusted message headers.

/// Longest filename we will create, in characters.
pub const MAX_FILENAME_LEN: usize = 200;

/// Reduce an attachment name to a single safe path component.
///
/// Both `/` and `\` count as separators and only the last component is
/// kept, so `../../etc/passwd` becomes `passwd`. Control characters are
/// dropped and the result is trimmed and truncated to [`MAX_FILENAME_LEN`].
/// Returns `None` when nothing usable remains (`""`, `.` or `..`).
pub fn sanitize(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .chars()
        .take(MAX_FILENAME_LEN)
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => None,
        _ => Some(cleaned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_plain_names() {
        assert_eq!(sanitize("a.pdf").as_deref(), Some("a.pdf"));
        assert_eq!(
            sanitize("Factura enero 2024.pdf").as_deref(),
            Some("Factura enero 2024.pdf")
        );
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize("C:\\Users\\x\\evil.pdf").as_deref(), Some("evil.pdf"));
        assert_eq!(sanitize("/abs/path.pdf").as_deref(), Some("path.pdf"));
    }

    #[test]
    fn test_sanitize_rejects_unusable() {
        assert_eq!(sanitize(""), None);
        assert_eq!(sanitize(".."), None);
        assert_eq!(sanitize("dir/"), None);
        assert_eq!(sanitize("  \t "), None);
    }

    #[test]
    fn test_sanitize_drops_control_chars_and_truncates() {
        assert_eq!(sanitize("a\nb\r.pdf").as_deref(), Some("ab.pdf"));
        let long = "x".repeat(500);
        assert_eq!(sanitize(&long).unwrap().chars().count(), MAX_FILENAME_LEN);
    }
}
