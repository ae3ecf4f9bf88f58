use std::path::Path;

use crate::error::Result;
use crate::index::{DocumentPath, IdentifierIndex};
use crate::refs::{ReferenceKind, ReferenceScanner};

pub const BACKLINKS_TITLE: &str = "Backlinks";
pub const CONTEXTS_TITLE: &str = "Contexts";

const SECTION_KINDS: [(&str, ReferenceKind); 2] = [
    (BACKLINKS_TITLE, ReferenceKind::Link),
    (CONTEXTS_TITLE, ReferenceKind::Context),
];

/// A titled list of the documents referencing the current one. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackmatterSection {
    pub title: String,
    pub identifiers: Vec<String>,
}

pub struct BackmatterAssembler<'a> {
    scanner: &'a ReferenceScanner<'a>,
    index: &'a IdentifierIndex,
    root: &'a Path,
    template_import: String,
}

impl<'a> BackmatterAssembler<'a> {
    pub fn new(
        scanner: &'a ReferenceScanner<'a>,
        index: &'a IdentifierIndex,
        root: &'a Path,
        template_import: impl Into<String>,
    ) -> Self {
        Self {
            scanner,
            index,
            root,
            template_import: template_import.into(),
        }
    }

    /// Backlinks and contexts of `document`, in referencing-path order with
    /// each referencing identifier listed once. Unindexed documents have no
    /// backmatter, and unindexed referrers are left out.
    pub fn assemble(&self, document: &DocumentPath) -> Result<Vec<BackmatterSection>> {
        let Some(identifier) = self.index.identifier_of(document) else {
            log::debug!("{document} has no identifier, no backmatter");
            return Ok(Vec::new());
        };

        let mut sections = Vec::new();
        for (title, kind) in SECTION_KINDS {
            let mut identifiers: Vec<String> = Vec::new();
            for reference in self.scanner.find(kind, identifier)? {
                match self.index.identifier_of_file(self.root, &reference.source) {
                    Some(source_id) => {
                        if !identifiers.iter().any(|id| id == source_id) {
                            identifiers.push(source_id.to_string());
                        }
                    }
                    None => log::debug!(
                        "Skipping {} {} from unindexed {}",
                        kind,
                        identifier,
                        reference.source.display()
                    ),
                }
            }

            if !identifiers.is_empty() {
                sections.push(BackmatterSection {
                    title: title.to_string(),
                    identifiers,
                });
            }
        }

        Ok(sections)
    }

    /// Source for the backmatter sub-compile: a call to the template's
    /// `backmatters` function with `(name, urls)` tuples.
    pub fn render(&self, sections: &[BackmatterSection]) -> String {
        let markers = self.scanner.markers();
        let parts: Vec<String> = sections
            .iter()
            .map(|section| {
                let urls: Vec<String> = section
                    .identifiers
                    .iter()
                    .map(|id| quote(&markers.citation(id)))
                    .collect();
                format!(
                    "(name: {}, urls: {})",
                    quote(&section.title),
                    typst_array(&urls)
                )
            })
            .collect();

        format!(
            "#import {}: backmatters\n#backmatters(parts: {})\n",
            quote(&self.template_import),
            typst_array(&parts)
        )
    }
}

/// Typst array literal; a single element needs a trailing comma.
fn typst_array(items: &[String]) -> String {
    if items.is_empty() {
        "()".to_string()
    } else {
        format!("({},)", items.join(", "))
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
