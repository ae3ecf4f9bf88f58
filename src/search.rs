use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;

/// The set of documents a search runs over: one directory, one source
/// extension, minus excluded globs. Subdirectories are included unless the
/// scope is narrowed with [`SearchScope::top_level`].
#[derive(Debug, Clone)]
pub struct SearchScope {
    pub dir: PathBuf,
    pub extension: String,
    pub recursive: bool,
    excludes: GlobSet,
}

impl SearchScope {
    pub fn new(dir: impl Into<PathBuf>, extension: &str, exclude: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_lowercase(),
            recursive: true,
            excludes: builder.build()?,
        })
    }

    /// The same scope restricted to files directly inside `dir`.
    pub fn top_level(&self) -> Self {
        Self {
            recursive: false,
            ..self.clone()
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.input_dir(),
            &config.compiler.extension,
            &config.directories.exclude,
        )
    }

    pub fn admits(&self, path: &Path) -> bool {
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false);
        if !ext_ok {
            return false;
        }
        let relative = path.strip_prefix(&self.dir).unwrap_or(path);
        !self.excludes.is_match(relative)
    }
}

/// One match of a pattern on one line of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub path: PathBuf,
    pub line: usize,
    /// Capture groups, index 0 being the whole match.
    pub groups: Vec<Option<String>>,
}

impl PatternMatch {
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }
}

/// Regex search over the corpus.
pub trait TextSearchProvider {
    /// Every document in scope, in ascending path order.
    fn source_files(&self, scope: &SearchScope) -> Result<Vec<PathBuf>>;

    /// Every match of `pattern`, grouped by document in `source_files`
    /// order, then by line. Matches never span lines.
    fn find_pattern(&self, pattern: &Regex, scope: &SearchScope) -> Result<Vec<PatternMatch>>;
}

/// In-process search that walks the corpus directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorpusSearcher;

impl TextSearchProvider for CorpusSearcher {
    fn source_files(&self, scope: &SearchScope) -> Result<Vec<PathBuf>> {
        if !scope.dir.exists() {
            log::warn!("Corpus directory {} does not exist", scope.dir.display());
            return Ok(Vec::new());
        }

        let mut builder = WalkBuilder::new(&scope.dir);
        builder.hidden(true).git_ignore(true).git_global(true);
        if !scope.recursive {
            builder.max_depth(Some(1));
        }

        let mut files = Vec::new();
        for result in builder.build() {
            match result {
                Ok(entry) => {
                    if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                        continue;
                    }
                    if scope.admits(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        files.sort();
        Ok(files)
    }

    fn find_pattern(&self, pattern: &Regex, scope: &SearchScope) -> Result<Vec<PatternMatch>> {
        let mut matches = Vec::new();

        for path in self.source_files(scope)? {
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    log::warn!("Skipping unreadable {}: {e}", path.display());
                    continue;
                }
            };

            for (i, line) in content.lines().enumerate() {
                for caps in pattern.captures_iter(line) {
                    matches.push(PatternMatch {
                        path: path.clone(),
                        line: i + 1,
                        groups: caps
                            .iter()
                            .map(|m| m.map(|m| m.as_str().to_string()))
                            .collect(),
                    });
                }
            }
        }

        log::debug!("Pattern {} matched {} times", pattern.as_str(), matches.len());
        Ok(matches)
    }
}
