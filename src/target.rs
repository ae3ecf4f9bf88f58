use regex::Regex;
use std::sync::OnceLock;

use crate::index::{DocumentPath, IdentifierIndex};

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{8}T\d{6})").expect("timestamp pattern is valid"))
}

/// Leading `YYYYMMDDTHHMMSS` token of a file name, if any.
pub fn timestamp_token(file_name: &str) -> Option<&str> {
    timestamp_re()
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Output artifact name for a document: its identifier, else the timestamp
/// its file name starts with. `None` means the document cannot be built.
pub fn target_name(index: &IdentifierIndex, document: &DocumentPath) -> Option<String> {
    if let Some(identifier) = index.identifier_of(document) {
        return Some(identifier.to_string());
    }
    timestamp_token(document.file_name()).map(str::to_string)
}

/// Whether `name` can be used as an output file stem inside the output
/// directory: non-empty, no path separators, not `.` or `..`.
pub fn is_safe_target(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Declaration;

    fn index() -> IdentifierIndex {
        IdentifierIndex::from_declarations(vec![Declaration {
            path: DocumentPath::new("/typ/20230505T101010-named.typ"),
            line: 1,
            identifier: "named".to_string(),
        }])
    }

    #[test]
    fn test_identifier_takes_precedence() {
        let doc = DocumentPath::new("/typ/20230505T101010-named.typ");
        assert_eq!(target_name(&index(), &doc), Some("named".to_string()));
    }

    #[test]
    fn test_timestamp_fallback() {
        let doc = DocumentPath::new("/typ/20240101T000000-notes.typ");
        assert_eq!(target_name(&index(), &doc), Some("20240101T000000".to_string()));

        let bare = DocumentPath::new("/typ/20240101T000000.typ");
        assert_eq!(target_name(&index(), &bare), Some("20240101T000000".to_string()));
    }

    #[test]
    fn test_unresolvable() {
        for name in ["/typ/index.typ", "/typ/2024-01-01-notes.typ", "/typ/x20240101T000000.typ", "/typ/20240101T0000.typ"] {
            assert_eq!(target_name(&index(), &DocumentPath::new(name)), None, "{name}");
        }
    }

    #[test]
    fn test_timestamp_only_from_file_name() {
        let doc = DocumentPath::new("/20240101T000000/notes.typ");
        assert_eq!(target_name(&index(), &doc), None);
    }

    #[test]
    fn test_safe_targets() {
        for name in ["alpha", "20240101T000000", "a.b", "..x"] {
            assert!(is_safe_target(name), "{name}");
        }
        for name in ["", " ", ".", "..", "../x", "a/b", "a\\b"] {
            assert!(!is_safe_target(name), "{name}");
        }
    }
}
