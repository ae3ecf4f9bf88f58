use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::search::{SearchScope, TextSearchProvider};

/// Project-root-relative path of a source document, always with a leading
/// `/` and forward slashes (`/typ/20240101T000000-notes.typ`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path.as_ref().replace('\\', "/");
        let trimmed = normalized.trim_start_matches("./").trim_start_matches('/');
        Self(format!("/{trimmed}"))
    }

    /// Path of `path` relative to `root`, or `None` when it lies outside it.
    pub fn from_fs(root: &Path, path: &Path) -> Option<Self> {
        if let Ok(relative) = path.strip_prefix(root) {
            return Some(Self::new(relative.to_string_lossy()));
        }
        let root = root.canonicalize().ok()?;
        let path = path.canonicalize().ok()?;
        path.strip_prefix(&root)
            .ok()
            .map(|relative| Self::new(relative.to_string_lossy()))
    }

    pub fn to_fs(&self, root: &Path) -> PathBuf {
        root.join(self.0.trim_start_matches('/'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An `identifier: "..."` line found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub path: DocumentPath,
    pub line: usize,
    pub identifier: String,
}

/// Bidirectional identifier <-> document map. Every identifier maps to
/// exactly one path and every path to exactly one identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierIndex {
    by_id: BTreeMap<String, DocumentPath>,
    by_path: BTreeMap<DocumentPath, String>,
}

pub fn declaration_pattern() -> Result<Regex> {
    Ok(RegexBuilder::new(
        r#"^[[:blank:]]*identifier[[:blank:]]*:[[:blank:]]*"([^"]+?)",?[[:blank:]]*$"#,
    )
    .case_insensitive(true)
    .build()?)
}

impl IdentifierIndex {
    /// Rescan the whole corpus for identifier declarations.
    pub fn rebuild(
        search: &dyn TextSearchProvider,
        scope: &SearchScope,
        root: &Path,
    ) -> Result<Self> {
        let pattern = declaration_pattern()?;
        let mut declarations = Vec::new();

        for m in search.find_pattern(&pattern, scope)? {
            let Some(identifier) = m.group(1) else {
                continue;
            };
            match DocumentPath::from_fs(root, &m.path) {
                Some(path) => declarations.push(Declaration {
                    path,
                    line: m.line,
                    identifier: identifier.to_string(),
                }),
                None => log::warn!(
                    "Ignoring {}: outside project root {}",
                    m.path.display(),
                    root.display()
                ),
            }
        }

        Ok(Self::from_declarations(declarations))
    }

    /// Build the index, resolving conflicts in ascending path then line order:
    /// the first declaration of an identifier wins, and a document keeps only
    /// its first declaration.
    pub fn from_declarations(declarations: impl IntoIterator<Item = Declaration>) -> Self {
        let mut declarations: Vec<Declaration> = declarations.into_iter().collect();
        declarations.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));

        let mut index = Self::default();
        for decl in declarations {
            if let Some(kept) = index.by_path.get(&decl.path) {
                log::warn!(
                    "{} declares more than one identifier; keeping \"{}\", discarding \"{}\" (line {})",
                    decl.path,
                    kept,
                    decl.identifier,
                    decl.line
                );
                continue;
            }
            if let Some(owner) = index.by_id.get(&decl.identifier) {
                log::warn!(
                    "Duplicate identifier \"{}\" in {} (line {}); already declared by {}, discarding",
                    decl.identifier,
                    decl.path,
                    decl.line,
                    owner
                );
                continue;
            }
            index.insert(decl.identifier, decl.path);
        }
        index
    }

    fn insert(&mut self, identifier: String, path: DocumentPath) {
        self.by_path.insert(path.clone(), identifier.clone());
        self.by_id.insert(identifier, path);
    }

    /// Write the identifier -> path map as pretty-printed JSON.
    pub fn persist(&self, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.by_id)?;
        let tmp = destination.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, json).and_then(|()| fs::rename(&tmp, destination)) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                log::debug!("Could not remove {}: {cleanup}", tmp.display());
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub fn load(source: &Path) -> Result<Self> {
        if !source.exists() {
            return Err(Error::IndexNotInitialized {
                path: source.to_path_buf(),
            });
        }
        let content = fs::read_to_string(source)?;
        let raw: BTreeMap<String, String> =
            serde_json::from_str(&content).map_err(|e| Error::IndexCorrupt {
                path: source.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut index = Self::default();
        for (identifier, path) in raw {
            let path = DocumentPath::new(path);
            if let Some(other) = index.by_path.get(&path) {
                return Err(Error::IndexCorrupt {
                    path: source.to_path_buf(),
                    reason: format!("{path} is mapped by both \"{other}\" and \"{identifier}\""),
                });
            }
            index.insert(identifier, path);
        }
        Ok(index)
    }

    pub fn path_of(&self, identifier: &str) -> Option<&DocumentPath> {
        self.by_id.get(identifier)
    }

    pub fn identifier_of(&self, path: &DocumentPath) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    /// Reverse lookup starting from a filesystem path.
    pub fn identifier_of_file(&self, root: &Path, path: &Path) -> Option<&str> {
        DocumentPath::from_fs(root, path).and_then(|p| self.identifier_of(&p))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DocumentPath)> {
        self.by_id.iter().map(|(id, path)| (id.as_str(), path))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
