/// Characters that may not appear in a file name on this platform.
///
#[cfg(windows)]
const RESERVED: &[char] = &['"', '<', '>', '|', ':', '*', '?', '\\', '/'];

/// Characters that may not appear in a file name on this platform.
///
#[cfg(not(windows))]
const RESERVED: &[char] = &['/', '\0'];

/// Whether `c` is illegal inside a single path component.
///
pub fn is_reserved(c: char) -> bool {
    RESERVED.contains(&c) || (cfg!(windows) && c.is_ascii_control())
}

/// Removes every reserved character from `name`.
///
/// The result may be empty, which callers must treat as "no usable name".
///
pub fn sanitize_file_name(name: &str) -> String {
    name.chars().filter(|c| !is_reserved(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_subject_unchanged() {
        assert_eq!(sanitize_file_name("Q3 Report"), "Q3 Report");
        assert_eq!(sanitize_file_name("Re: Überweisung #42"), {
            if cfg!(windows) { "Re Überweisung #42" } else { "Re: Überweisung #42" }
        });
    }

    #[test]
    fn test_separators_removed() {
        assert_eq!(sanitize_file_name("invoices/2024\0final"), "invoices2024final");
    }

    #[test]
    fn test_sanitizes_to_empty() {
        assert_eq!(sanitize_file_name(""), "");
        assert_eq!(sanitize_file_name("///"), "");
    }

    #[cfg(windows)]
    #[test]
    fn test_windows_reserved() {
        assert_eq!(sanitize_file_name("a<b>c:d\"e|f?g*h\\i\tj"), "abcdefghij");
    }
}
