//! Small validation and text-sanitization helpers shared across the core.

/// Maximum length, in bytes, of a symbol name or UEL label.
pub const MAX_IDENT_LEN: usize = 63;

/// Maximum length, in bytes, of an explanatory text or set-text entry.
pub const MAX_TEXT_LEN: usize = 255;

/// Maximum symbol dimension.
pub const MAX_DIMENSION: i32 = 20;

/// Checks whether `s` is a legal identifier: non-empty, at most
/// [`MAX_IDENT_LEN`] bytes, first character a letter, remaining characters
/// letters/digits/underscore. Used for both symbol names and acronym names.
///
/// # Example
/// ```
/// use gdx::util::is_good_ident;
/// assert!(is_good_ident("i"));
/// assert!(!is_good_ident("1i"));
/// assert!(!is_good_ident(""));
/// ```
pub fn is_good_ident(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_IDENT_LEN {
        return false;
    }
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Checks whether `s` is a legal UEL label: at most [`MAX_IDENT_LEN`] bytes,
/// no control characters, and not a string that mixes single and double
/// quotes. Unlike [`is_good_ident`], UELs may start with a
/// digit or punctuation and may be quoted.
pub fn is_good_uel_string(s: &str) -> bool {
    if s.len() > MAX_IDENT_LEN {
        return false;
    }
    if s.chars().any(|c| c.is_control()) {
        return false;
    }
    !(s.contains('\'') && s.contains('"'))
}

/// Truncates `s` to at most [`MAX_TEXT_LEN`] bytes on a `char` boundary,
/// for explanatory text and set-text fields.
pub fn sanitize_text(s: &str) -> String {
    if s.len() <= MAX_TEXT_LEN {
        return s.to_string();
    }
    let mut end = MAX_TEXT_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Returns the narrowest integer width (in bytes: 1, 2 or 4) that can
/// represent every value in `0..=span` for delta-compressed keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    Byte,
    Word,
    Int,
}

impl IntWidth {
    pub fn for_span(span: i64) -> IntWidth {
        if span <= 255 {
            IntWidth::Byte
        } else if span <= 65535 {
            IntWidth::Word
        } else {
            IntWidth::Int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_length_boundaries() {
        let ok = "a".repeat(MAX_IDENT_LEN);
        let bad = "a".repeat(MAX_IDENT_LEN + 1);
        assert!(is_good_ident(&ok));
        assert!(!is_good_ident(&bad));
    }

    #[test]
    fn ident_must_start_with_letter() {
        assert!(!is_good_ident("3abc"));
        assert!(!is_good_ident("_abc"));
        assert!(is_good_ident("abc3"));
    }

    #[test]
    fn uel_string_rejects_mixed_quotes() {
        assert!(is_good_uel_string("it's"));
        assert!(is_good_uel_string("\"quoted\""));
        assert!(!is_good_uel_string("it's \"bad\""));
    }

    #[test]
    fn uel_string_rejects_control_chars() {
        assert!(!is_good_uel_string("a\tb"));
    }

    #[test]
    fn text_sanitize_boundary() {
        let ok = "x".repeat(MAX_TEXT_LEN);
        let long = "x".repeat(MAX_TEXT_LEN + 10);
        assert_eq!(sanitize_text(&ok).len(), MAX_TEXT_LEN);
        assert_eq!(sanitize_text(&long).len(), MAX_TEXT_LEN);
    }

    #[test]
    fn int_width_spans() {
        assert_eq!(IntWidth::for_span(0), IntWidth::Byte);
        assert_eq!(IntWidth::for_span(255), IntWidth::Byte);
        assert_eq!(IntWidth::for_span(256), IntWidth::Word);
        assert_eq!(IntWidth::for_span(65535), IntWidth::Word);
        assert_eq!(IntWidth::for_span(65536), IntWidth::Int);
    }
}
