use colored::Colorize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backmatter::BackmatterAssembler;
use crate::compose::{compose, page_title};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::{DocumentPath, IdentifierIndex};
use crate::refs::{MarkerSyntax, ReferenceScanner};
use crate::render::{
    fragment_of, strip_wrapper, ExternalRenderer, RenderInput, RenderMode, RenderOutput,
    RenderRequest, NO_NUMBERING,
};
use crate::search::{SearchScope, TextSearchProvider};
use crate::site;
use crate::target::{is_safe_target, target_name};

/// Build states. Documents go through `Compile` to `Write` one at a time;
/// any failure moves the whole build to `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Indexing,
    Compile,
    ScanRefs,
    RenderBackmatter,
    Compose,
    Write,
    Done,
    Aborted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Indexing => "indexing",
            Stage::Compile => "compile",
            Stage::ScanRefs => "reference scan",
            Stage::RenderBackmatter => "backmatter render",
            Stage::Compose => "compose",
            Stage::Write => "write",
            Stage::Done => "done",
            Stage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

type StageResult<T> = std::result::Result<T, (Stage, Error)>;

trait AtStage<T> {
    fn at(self, stage: Stage) -> StageResult<T>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> StageResult<T> {
        self.map_err(|e| (stage, e))
    }
}

/// A rescanned index and whether it was written to the index file.
#[derive(Debug)]
pub struct IndexRefresh {
    pub index: IdentifierIndex,
    pub persisted: bool,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<DocumentPath>,
}

/// Runs index refresh and the per-document pipeline over the corpus.
/// Single-threaded: document `i + 1` starts only after `i` is written.
pub struct SiteBuilder<'a> {
    config: &'a Config,
    search: &'a dyn TextSearchProvider,
    renderer: &'a dyn ExternalRenderer,
    scope: SearchScope,
    quiet: bool,
}

impl<'a> SiteBuilder<'a> {
    pub fn new(
        config: &'a Config,
        search: &'a dyn TextSearchProvider,
        renderer: &'a dyn ExternalRenderer,
    ) -> Result<Self> {
        Ok(Self {
            config,
            search,
            renderer,
            scope: SearchScope::from_config(config)?,
            quiet: false,
        })
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Rescan the corpus and persist the result. A persist failure is fatal
    /// only when there was no index file before; otherwise the in-memory
    /// index is used for this run.
    pub fn refresh_index(&self) -> Result<IndexRefresh> {
        log::debug!("{}", Stage::Indexing);
        let index = IdentifierIndex::rebuild(self.search, &self.scope, self.config.root())?;
        let destination = self.config.index_file();

        if index.is_empty() {
            log::warn!(
                "No identifier declarations found in {}, leaving {} untouched",
                self.scope.dir.display(),
                destination.display()
            );
            return Ok(IndexRefresh {
                index,
                persisted: false,
            });
        }

        let existed = destination.exists();
        let persisted = match index.persist(&destination) {
            Ok(()) => {
                log::info!(
                    "Wrote {} identifiers to {}",
                    index.len(),
                    destination.display()
                );
                true
            }
            Err(e) if existed => {
                log::warn!(
                    "Failed to update {}: {e}; continuing with the rescanned index",
                    destination.display()
                );
                false
            }
            Err(e) => return Err(e),
        };
        Ok(IndexRefresh { index, persisted })
    }

    /// The persisted index, for builds that skip the rescan.
    pub fn load_index(&self) -> Result<IdentifierIndex> {
        IdentifierIndex::load(&self.config.index_file())
    }

    /// Top-level sources in build order paired with their root-relative
    /// paths. Files in subdirectories are only scanned, never built.
    fn documents(&self) -> Result<Vec<(PathBuf, DocumentPath)>> {
        let mut documents = Vec::new();
        for source in self.search.source_files(&self.scope.top_level())? {
            match DocumentPath::from_fs(self.config.root(), &source) {
                Some(doc) => documents.push((source, doc)),
                None => log::warn!(
                    "Skipping {}: outside project root {}",
                    source.display(),
                    self.config.root().display()
                ),
            }
        }
        Ok(documents)
    }

    fn resolve_target(&self, index: &IdentifierIndex, doc: &DocumentPath, report: &mut BuildReport) -> Option<String> {
        let Some(target) = target_name(index, doc) else {
            log::warn!("Skipping {doc}: no identifier and no leading timestamp in its file name");
            report.skipped.push(doc.clone());
            return None;
        };
        if !is_safe_target(&target) {
            log::warn!("Skipping {doc}: \"{target}\" is not usable as an output file name");
            report.skipped.push(doc.clone());
            return None;
        }
        Some(target)
    }

    fn announce(&self, doc: &DocumentPath, output: &Path) {
        if !self.quiet {
            println!(
                "{} {} -> {}",
                "Compiling".cyan().bold(),
                doc.file_name(),
                output.file_name().unwrap_or_default().to_string_lossy()
            );
        }
    }

    fn abort(&self, doc: &DocumentPath, report: &BuildReport, stage: Stage, source: Error) -> Error {
        log::error!(
            "{}: {doc} failed at {stage}; {} documents written before it",
            Stage::Aborted,
            report.written.len()
        );
        Error::Aborted {
            stage,
            document: doc.to_string(),
            source: Box::new(source),
        }
    }

    /// HTML build: fragment, backmatter and shell template per document.
    pub fn build_html(&self, index: &IdentifierIndex) -> Result<BuildReport> {
        log::debug!("{}", Stage::Init);
        site::prepare_template(self.config, RenderMode::Fragment)?;
        site::copy_public_assets(self.config)?;

        let shell_path = self.config.shell_template();
        if !shell_path.exists() {
            return Err(Error::TemplateMissing { path: shell_path });
        }
        let shell = fs::read_to_string(&shell_path)?;

        let mut report = BuildReport::default();
        let documents = self.documents()?;
        if documents.is_empty() {
            log::warn!("No source documents found in {}", self.scope.dir.display());
            return Ok(report);
        }

        let html_dir = self.config.html_dir();
        fs::create_dir_all(&html_dir)?;

        let scanner = ReferenceScanner::new(
            self.search,
            &self.scope,
            MarkerSyntax::from(&self.config.markers),
        );
        let assembler = BackmatterAssembler::new(
            &scanner,
            index,
            self.config.root(),
            self.config.active_template_import(),
        );

        for (source, doc) in &documents {
            let Some(target) = self.resolve_target(index, doc, &mut report) else {
                continue;
            };
            let output = html_dir.join(format!("{target}.html"));
            self.announce(doc, &output);

            if let Err((stage, e)) = self.build_page(source, doc, &target, &output, &shell, &assembler) {
                return Err(self.abort(doc, &report, stage, e));
            }
            report.written.push(output);
        }

        log::debug!("{}", Stage::Done);
        Ok(report)
    }

    fn build_page(
        &self,
        source: &Path,
        doc: &DocumentPath,
        target: &str,
        output: &Path,
        shell: &str,
        assembler: &BackmatterAssembler<'_>,
    ) -> StageResult<()> {
        log::debug!("{doc}: {}", Stage::Compile);
        let rendered = self
            .renderer
            .render(&RenderRequest {
                input: RenderInput::File(source),
                mode: RenderMode::Fragment,
                output: RenderOutput::Stdout,
                inputs: &[],
            })
            .at(Stage::Compile)?;
        let fragment = fragment_of(&rendered.stdout, doc.as_str());

        let mut backmatter = String::new();
        if !fragment.is_empty() {
            log::debug!("{doc}: {}", Stage::ScanRefs);
            let sections = assembler.assemble(doc).at(Stage::ScanRefs)?;

            if !sections.is_empty() {
                log::debug!("{doc}: {}", Stage::RenderBackmatter);
                let text = assembler.render(&sections);
                let name = format!("backmatter of {doc}");
                let rendered = self
                    .renderer
                    .render(&RenderRequest {
                        input: RenderInput::Source { name: &name, text: &text },
                        mode: RenderMode::Fragment,
                        output: RenderOutput::Stdout,
                        inputs: &[NO_NUMBERING],
                    })
                    .at(Stage::RenderBackmatter)?;

                if rendered.stdout.trim().is_empty() {
                    log::warn!("Compiler produced no output for {name}");
                } else {
                    match strip_wrapper(&rendered.stdout) {
                        Some(inner) => backmatter.push_str(inner),
                        None => log::warn!("No <html> wrapper in output for {name}, dropping it"),
                    }
                }
            }
        }

        log::debug!("{doc}: {}", Stage::Compose);
        let title = page_title(&fragment, target);
        let page = compose(&fragment, &backmatter, shell, &title);

        log::debug!("{doc}: {}", Stage::Write);
        fs::write(output, page).map_err(Error::from).at(Stage::Write)
    }

    /// PDF build: one paged compile per document, no backmatter.
    pub fn build_pdf(&self, index: &IdentifierIndex) -> Result<BuildReport> {
        log::debug!("{}", Stage::Init);
        site::prepare_template(self.config, RenderMode::Paged)?;

        let mut report = BuildReport::default();
        let documents = self.documents()?;
        if documents.is_empty() {
            log::warn!("No source documents found in {}", self.scope.dir.display());
            return Ok(report);
        }

        let pdf_dir = self.config.pdf_dir();
        fs::create_dir_all(&pdf_dir)?;

        for (source, doc) in &documents {
            let Some(target) = self.resolve_target(index, doc, &mut report) else {
                continue;
            };
            let output = pdf_dir.join(format!("{target}.pdf"));
            self.announce(doc, &output);

            log::debug!("{doc}: {}", Stage::Compile);
            let rendered = self.renderer.render(&RenderRequest {
                input: RenderInput::File(source),
                mode: RenderMode::Paged,
                output: RenderOutput::File(&output),
                inputs: &[],
            });
            match rendered {
                Ok(rendered) => {
                    if !rendered.stdout.trim().is_empty() {
                        log::info!("{}", rendered.stdout.trim_end());
                    }
                }
                Err(e) => return Err(self.abort(doc, &report, Stage::Compile, e)),
            }
            report.written.push(output);
        }

        log::debug!("{}", Stage::Done);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Rendered;
    use crate::search::CorpusSearcher;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Wraps each document's text in a fragment with an `<h1>` of its file
    /// name. Fails on sources containing `FAIL`.
    #[derive(Default)]
    struct FakeRenderer {
        calls: RefCell<Vec<String>>,
    }

    impl ExternalRenderer for FakeRenderer {
        fn render(&self, request: &RenderRequest<'_>) -> Result<Rendered> {
            self.calls.borrow_mut().push(request.input_name());
            let (name, text) = match request.input {
                RenderInput::File(path) => (
                    path.file_name().unwrap().to_string_lossy().to_string(),
                    fs::read_to_string(path)?,
                ),
                RenderInput::Source { text, .. } => {
                    assert_eq!(request.inputs, &[NO_NUMBERING]);
                    return Ok(Rendered {
                        stdout: format!("<html><footer>{text}</footer></html>"),
                        diagnostics: String::new(),
                    });
                }
            };
            if text.contains("FAIL") {
                return Err(Error::CompilerFailed {
                    source_name: request.input_name(),
                    status: "exit status: 1".to_string(),
                    stderr: "error: unexpected FAIL".to_string(),
                });
            }
            match request.output {
                RenderOutput::File(path) => {
                    fs::write(path, format!("%PDF {name}"))?;
                    Ok(Rendered::default())
                }
                RenderOutput::Stdout if text.contains("EMPTY") => Ok(Rendered::default()),
                RenderOutput::Stdout => Ok(Rendered {
                    stdout: format!(
                        "<!DOCTYPE html><html><section><h1>{name}</h1><p>{}</p></section></html>",
                        text.len()
                    ),
                    diagnostics: String::new(),
                }),
            }
        }
    }

    struct Site {
        temp: TempDir,
        config: Config,
    }

    impl Site {
        fn new(docs: &[(&str, &str)]) -> Self {
            let temp = TempDir::new().unwrap();
            let config = Config::with_root(temp.path());
            fs::create_dir_all(config.input_dir()).unwrap();
            fs::create_dir_all(config.templates_dir()).unwrap();
            fs::write(config.html_template(), "// html template").unwrap();
            fs::write(config.paged_template(), "// paged template").unwrap();
            fs::write(
                config.shell_template(),
                "<html><head><title></title></head><body><!-- contents goes here --></body></html>",
            )
            .unwrap();
            for (name, content) in docs {
                fs::write(config.input_dir().join(name), content).unwrap();
            }
            Self { temp, config }
        }

        fn html(&self, target: &str) -> Option<String> {
            fs::read_to_string(self.config.html_dir().join(format!("{target}.html"))).ok()
        }
    }

    #[test]
    fn test_html_build_end_to_end() {
        let site = Site::new(&[
            ("A.typ", "identifier: \"alpha\"\n#ln(\"denote:beta\")[see beta]\n"),
            ("B.typ", "identifier: \"beta\"\n"),
        ]);
        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer)
            .unwrap()
            .quiet(true);

        let index = builder.refresh_index().unwrap().index;
        let report = builder.build_html(&index).unwrap();
        assert_eq!(report.written.len(), 2);
        assert!(report.skipped.is_empty());

        let persisted: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(site.config.index_file()).unwrap(),
        )
        .unwrap();
        assert_eq!(
            persisted,
            serde_json::json!({"alpha": "/typ/A.typ", "beta": "/typ/B.typ"})
        );

        let beta = site.html("beta").unwrap();
        assert!(beta.starts_with("<html><head><title>B.typ</title></head><body><section><h1>B.typ</h1>"));
        assert!(beta.contains("</section><footer>#import \"/_template/template.typ\": backmatters"));
        assert!(beta.contains("(name: \"Backlinks\", urls: (\"denote:alpha\",))"));
        assert!(!beta.contains("Contexts"));

        let alpha = site.html("alpha").unwrap();
        assert!(!alpha.contains("<footer>"));

        // A, its backmatter never compiled, then B and its backmatter.
        let calls = renderer.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], "backmatter of /typ/B.typ");

        assert_eq!(
            fs::read_to_string(site.config.active_template()).unwrap(),
            "// html template"
        );
    }

    #[test]
    fn test_html_build_fails_fast() {
        let site = Site::new(&[
            ("a.typ", "identifier: \"a\"\n"),
            ("b.typ", "identifier: \"b\"\nFAIL\n"),
            ("c.typ", "identifier: \"c\"\n"),
        ]);
        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer)
            .unwrap()
            .quiet(true);
        let index = builder.refresh_index().unwrap().index;

        let err = builder.build_html(&index).unwrap_err();
        match err {
            Error::Aborted { stage, document, source } => {
                assert_eq!(stage, Stage::Compile);
                assert_eq!(document, "/typ/b.typ");
                assert!(matches!(*source, Error::CompilerFailed { .. }));
            }
            other => panic!("expected abort, got {other:?}"),
        }

        assert!(site.html("a").is_some());
        assert!(site.html("b").is_none());
        assert!(site.html("c").is_none());
        assert!(!renderer.calls.borrow().iter().any(|c| c.ends_with("c.typ")));
    }

    #[test]
    fn test_unresolvable_targets_are_skipped() {
        let site = Site::new(&[
            ("20240101T000000-notes.typ", "no identifier\n"),
            ("index.typ", "no identifier either\n"),
            ("z.typ", "identifier: \"z\"\n"),
        ]);
        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer)
            .unwrap()
            .quiet(true);
        let index = builder.refresh_index().unwrap().index;

        let report = builder.build_html(&index).unwrap();
        assert_eq!(report.skipped, vec![DocumentPath::new("/typ/index.typ")]);
        assert!(site.html("20240101T000000").is_some());
        assert!(site.html("z").is_some());
    }

    #[test]
    fn test_subdirectory_sources_are_scanned_but_not_built() {
        let site = Site::new(&[("a.typ", "identifier: \"a\"\n")]);
        let lib = site.config.input_dir().join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(
            lib.join("20240101T000000-helpers.typ"),
            "identifier: \"helpers\"\n#ln(\"denote:a\")[a]\n",
        )
        .unwrap();

        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer)
            .unwrap()
            .quiet(true);
        let index = builder.refresh_index().unwrap().index;
        assert_eq!(
            index.path_of("helpers"),
            Some(&DocumentPath::new("/typ/lib/20240101T000000-helpers.typ"))
        );

        let report = builder.build_html(&index).unwrap();
        assert_eq!(report.written, vec![site.config.html_dir().join("a.html")]);
        assert!(site.html("helpers").is_none());
        assert!(site.html("20240101T000000").is_none());
        assert!(!renderer.calls.borrow().iter().any(|c| c.contains("helpers")));
        assert!(site.html("a").unwrap().contains("denote:helpers"));
    }

    #[test]
    fn test_identifiers_unusable_as_file_names_are_skipped() {
        let site = Site::new(&[
            ("a.typ", "identifier: \"../escaped\"\n"),
            ("b.typ", "identifier: \"b/c\"\n"),
            ("d.typ", "identifier: \"d\"\n"),
        ]);
        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer)
            .unwrap()
            .quiet(true);
        let index = builder.refresh_index().unwrap().index;

        let report = builder.build_html(&index).unwrap();
        assert_eq!(
            report.skipped,
            vec![DocumentPath::new("/typ/a.typ"), DocumentPath::new("/typ/b.typ")]
        );
        assert_eq!(report.written, vec![site.config.html_dir().join("d.html")]);
        assert!(!site.temp.path().join("escaped.html").exists());
    }

    #[test]
    fn test_empty_compiler_output_still_composes() {
        let site = Site::new(&[
            ("a.typ", "identifier: \"a\"\nEMPTY\n"),
            ("b.typ", "identifier: \"b\"\n#ln(\"denote:a\")[a]\n"),
        ]);
        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer)
            .unwrap()
            .quiet(true);
        let index = builder.refresh_index().unwrap().index;
        builder.build_html(&index).unwrap();

        assert_eq!(
            site.html("a").unwrap(),
            "<html><head><title>a</title></head><body></body></html>"
        );
    }

    #[test]
    fn test_missing_shell_template_is_error() {
        let site = Site::new(&[("a.typ", "identifier: \"a\"\n")]);
        fs::remove_file(site.config.shell_template()).unwrap();
        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer).unwrap();

        let err = builder.build_html(&IdentifierIndex::default()).unwrap_err();
        assert!(matches!(err, Error::TemplateMissing { .. }));
        assert!(renderer.calls.borrow().is_empty());
    }

    #[test]
    fn test_pdf_build_writes_and_fails_fast() {
        let site = Site::new(&[
            ("a.typ", "identifier: \"a\"\n"),
            ("b.typ", "identifier: \"b\"\nFAIL\n"),
            ("c.typ", "identifier: \"c\"\n"),
        ]);
        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer)
            .unwrap()
            .quiet(true);
        let index = builder.refresh_index().unwrap().index;

        let err = builder.build_pdf(&index).unwrap_err();
        assert!(matches!(err, Error::Aborted { stage: Stage::Compile, .. }));
        assert_eq!(
            fs::read_to_string(site.config.pdf_dir().join("a.pdf")).unwrap(),
            "%PDF a.typ"
        );
        assert!(!site.config.pdf_dir().join("c.pdf").exists());
        assert_eq!(renderer.calls.borrow().len(), 2);
    }

    #[test]
    fn test_refresh_index_persist_failure_with_previous_index() {
        let site = Site::new(&[("a.typ", "identifier: \"a\"\n")]);
        // A directory where the index file should be: it exists, but cannot
        // be replaced by a file.
        fs::create_dir_all(site.config.index_file()).unwrap();

        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer).unwrap();
        let refreshed = builder.refresh_index().unwrap();
        assert!(!refreshed.persisted);
        assert_eq!(
            refreshed.index.path_of("a"),
            Some(&DocumentPath::new("/typ/a.typ"))
        );
        assert!(!site.config.index_file().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_refresh_index_persist_failure_without_previous_index() {
        let mut site = Site::new(&[("a.typ", "identifier: \"a\"\n")]);
        fs::write(site.temp.path().join("blocker"), "not a directory").unwrap();
        site.config.directories.index_file = PathBuf::from("blocker/id_path_map.json");

        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer).unwrap();
        assert!(builder.refresh_index().is_err());
    }

    #[test]
    fn test_empty_index_is_not_persisted() {
        let site = Site::new(&[("20240101T000000.typ", "nothing declared\n")]);
        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer).unwrap();

        let refreshed = builder.refresh_index().unwrap();
        assert!(refreshed.index.is_empty());
        assert!(!refreshed.persisted);
        assert!(!site.config.index_file().exists());
        assert!(matches!(
            builder.load_index(),
            Err(Error::IndexNotInitialized { .. })
        ));
    }

    #[test]
    fn test_load_index_after_refresh() {
        let site = Site::new(&[("a.typ", "identifier: \"a\"\n")]);
        let renderer = FakeRenderer::default();
        let builder = SiteBuilder::new(&site.config, &CorpusSearcher, &renderer).unwrap();
        let refreshed = builder.refresh_index().unwrap();
        assert!(refreshed.persisted);
        assert_eq!(builder.load_index().unwrap(), refreshed.index);
    }
}
