use regex::{Regex, RegexBuilder};
use std::fmt;
use std::path::PathBuf;

use crate::config::MarkersConfig;
use crate::error::Result;
use crate::search::{SearchScope, TextSearchProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// `#ln("denote:id")[anchor text]`
    Link,
    /// `#tr("denote:id")`
    Context,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Link => f.write_str("link"),
            ReferenceKind::Context => f.write_str("context"),
        }
    }
}

/// A marker in `source` pointing at `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub source: PathBuf,
    pub line: usize,
    pub target: String,
    pub kind: ReferenceKind,
    pub anchor_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MarkerSyntax {
    pub namespace: String,
    pub link: String,
    pub context: String,
}

impl Default for MarkerSyntax {
    fn default() -> Self {
        Self::from(&MarkersConfig::default())
    }
}

impl From<&MarkersConfig> for MarkerSyntax {
    fn from(config: &MarkersConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            link: config.link.clone(),
            context: config.context.clone(),
        }
    }
}

impl MarkerSyntax {
    /// `"namespace:identifier"` as written inside a marker.
    pub fn citation(&self, identifier: &str) -> String {
        format!("{}:{}", self.namespace, identifier)
    }

    fn target_call(&self, token: &str, identifier: &str) -> String {
        format!(
            r#"{}\([[:blank:]]*"{}:{}""#,
            regex::escape(token),
            regex::escape(&self.namespace),
            regex::escape(identifier)
        )
    }

    pub fn link_pattern(&self, identifier: &str) -> Result<Regex> {
        let pattern = format!(
            r"{}[[:blank:]]*\)\[(.*?)\]",
            self.target_call(&self.link, identifier)
        );
        Ok(RegexBuilder::new(&pattern).case_insensitive(true).build()?)
    }

    pub fn context_pattern(&self, identifier: &str) -> Result<Regex> {
        let pattern = self.target_call(&self.context, identifier);
        Ok(RegexBuilder::new(&pattern).case_insensitive(true).build()?)
    }
}

/// Finds, across the corpus, every marker that targets a given identifier.
///
/// Matching is lexical and line-based; markers inside comments or disabled
/// code are found too.
pub struct ReferenceScanner<'a> {
    search: &'a dyn TextSearchProvider,
    scope: &'a SearchScope,
    markers: MarkerSyntax,
}

impl<'a> ReferenceScanner<'a> {
    pub fn new(
        search: &'a dyn TextSearchProvider,
        scope: &'a SearchScope,
        markers: MarkerSyntax,
    ) -> Self {
        Self {
            search,
            scope,
            markers,
        }
    }

    pub fn markers(&self) -> &MarkerSyntax {
        &self.markers
    }

    /// One entry per link marker, carrying its anchor text.
    pub fn find_links_to(&self, identifier: &str) -> Result<Vec<Reference>> {
        let pattern = self.markers.link_pattern(identifier)?;
        let matches = self.search.find_pattern(&pattern, self.scope)?;
        Ok(matches
            .into_iter()
            .map(|m| Reference {
                anchor_text: Some(m.group(1).unwrap_or_default().to_string()),
                source: m.path,
                line: m.line,
                target: identifier.to_string(),
                kind: ReferenceKind::Link,
            })
            .collect())
    }

    pub fn find_contexts_of(&self, identifier: &str) -> Result<Vec<Reference>> {
        let pattern = self.markers.context_pattern(identifier)?;
        let matches = self.search.find_pattern(&pattern, self.scope)?;
        Ok(matches
            .into_iter()
            .map(|m| Reference {
                source: m.path,
                line: m.line,
                target: identifier.to_string(),
                kind: ReferenceKind::Context,
                anchor_text: None,
            })
            .collect())
    }

    pub fn find(&self, kind: ReferenceKind, identifier: &str) -> Result<Vec<Reference>> {
        match kind {
            ReferenceKind::Link => self.find_links_to(identifier),
            ReferenceKind::Context => self.find_contexts_of(identifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::CorpusSearcher;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn scan<T>(files: &[(&str, &str)], f: impl FnOnce(&ReferenceScanner<'_>, &TempDir) -> T) -> T {
        let temp = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(temp.path().join(name), content).unwrap();
        }
        let scope = SearchScope::new(temp.path(), "typ", &[]).unwrap();
        let scanner = ReferenceScanner::new(&CorpusSearcher, &scope, MarkerSyntax::default());
        f(&scanner, &temp)
    }

    #[test]
    fn test_link_pattern_shapes() {
        let re = MarkerSyntax::default().link_pattern("beta").unwrap();
        let anchor = |s: &str| re.captures(s).map(|c| c[1].to_string());

        assert_eq!(anchor(r#"see #ln("denote:beta")[see beta] too"#), Some("see beta".to_string()));
        assert_eq!(anchor("#LN( \"DENOTE:Beta\"\t)[x]"), Some("x".to_string()));
        assert_eq!(anchor(r#"#ln("denote:beta")[]"#), Some(String::new()));
        assert_eq!(anchor(r#"#ln("denote:betamax")[x]"#), None);
        assert_eq!(anchor(r#"#ln("denote:beta")"#), None);
        assert_eq!(anchor(r#"#tr("denote:beta")[x]"#), None);
    }

    #[test]
    fn test_identifier_is_escaped() {
        let re = MarkerSyntax::default().context_pattern("a.b").unwrap();
        assert!(re.is_match(r#"#tr("denote:a.b")"#));
        assert!(!re.is_match(r#"#tr("denote:axb")"#));
    }

    #[test]
    fn test_find_links_one_entry_per_match() {
        let files = [
            ("a.typ", "#ln(\"denote:x\")[first] and #ln(\"denote:x\")[second]\n"),
            ("b.typ", "text\n#ln(\"denote:x\")[from b]\n"),
            ("c.typ", "#ln(\"denote:y\")[other]\n"),
        ];
        scan(&files, |scanner, temp| {
            let links = scanner.find_links_to("x").unwrap();
            let got: Vec<_> = links
                .iter()
                .map(|r| (r.source.clone(), r.line, r.anchor_text.clone().unwrap()))
                .collect();
            assert_eq!(
                got,
                vec![
                    (temp.path().join("a.typ"), 1, "first".to_string()),
                    (temp.path().join("a.typ"), 1, "second".to_string()),
                    (temp.path().join("b.typ"), 2, "from b".to_string()),
                ]
            );
            assert!(links.iter().all(|r| r.kind == ReferenceKind::Link));
        });
    }

    #[test]
    fn test_n_documents_yield_n_links() {
        let docs: Vec<(String, String)> = (0..5)
            .map(|i| (format!("doc{i}.typ"), format!("#ln(\"denote:X\")[anchor {i}]\n")))
            .collect();
        let files: Vec<(&str, &str)> = docs.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect();
        scan(&files, |scanner, temp| {
            let links = scanner.find_links_to("X").unwrap();
            assert_eq!(links.len(), 5);
            for (i, link) in links.iter().enumerate() {
                assert_eq!(link.source, temp.path().join(format!("doc{i}.typ")));
                assert_eq!(link.anchor_text.as_deref(), Some(format!("anchor {i}").as_str()));
            }
        });
    }

    #[test]
    fn test_find_contexts_and_empty_results() {
        let files = [
            ("a.typ", "#tr(\"denote:x\", hide: true)\n"),
            ("b.typ", "// #tr(\"denote:x\")\n"),
            ("c.md", "#tr(\"denote:x\")\n"),
        ];
        scan(&files, |scanner, _| {
            assert_eq!(scanner.find_contexts_of("x").unwrap().len(), 2);
            assert!(scanner.find_contexts_of("nobody").unwrap().is_empty());
            assert!(scanner.find(ReferenceKind::Link, "x").unwrap().is_empty());
        });
    }
}
