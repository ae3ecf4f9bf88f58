use regex::Regex;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use crate::config::Config;
use crate::error::{Error, Result};

/// Compiler input that turns off heading numbering in the template.
pub const NO_NUMBERING: (&str, &str) = ("no-numbering", "true");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Paginated output (PDF).
    Paged,
    /// Markup fragment (HTML).
    Fragment,
}

#[derive(Debug, Clone, Copy)]
pub enum RenderInput<'a> {
    File(&'a Path),
    /// In-memory source fed over stdin. `name` is only used in messages.
    Source { name: &'a str, text: &'a str },
}

#[derive(Debug, Clone, Copy)]
pub enum RenderOutput<'a> {
    Stdout,
    File(&'a Path),
}

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub input: RenderInput<'a>,
    pub mode: RenderMode,
    pub output: RenderOutput<'a>,
    pub inputs: &'a [(&'a str, &'a str)],
}

impl RenderRequest<'_> {
    pub fn input_name(&self) -> String {
        match self.input {
            RenderInput::File(path) => path.display().to_string(),
            RenderInput::Source { name, .. } => name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub stdout: String,
    pub diagnostics: String,
}

/// The document compiler, treated as a black box from source to output.
pub trait ExternalRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Rendered>;
}

/// Runs `typst compile` as a subprocess. No timeout: a hung compiler hangs
/// the build.
#[derive(Debug, Clone)]
pub struct TypstRenderer {
    program: String,
    subcommand: String,
    root: PathBuf,
}

impl TypstRenderer {
    pub fn new(program: impl Into<String>, subcommand: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            subcommand: subcommand.into(),
            root: root.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.compiler.program,
            &config.compiler.subcommand,
            config.root(),
        )
    }

    pub fn arguments(&self, request: &RenderRequest<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.subcommand.clone().into(),
            "--root".into(),
            self.root.clone().into(),
        ];
        match request.mode {
            RenderMode::Fragment => {
                args.extend(["--features", "html", "--format", "html"].map(OsString::from));
            }
            RenderMode::Paged => {
                args.extend(["--format", "pdf"].map(OsString::from));
            }
        }
        for (key, value) in request.inputs {
            args.push("--input".into());
            args.push(format!("{key}={value}").into());
        }
        match request.input {
            RenderInput::File(path) => args.push(path.into()),
            RenderInput::Source { .. } => args.push("-".into()),
        }
        match request.output {
            RenderOutput::Stdout => args.push("-".into()),
            RenderOutput::File(path) => args.push(path.into()),
        }
        args
    }
}

impl ExternalRenderer for TypstRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Rendered> {
        let args = self.arguments(request);
        log::debug!(
            "Running: {} {}",
            self.program,
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let stdin_text = match request.input {
            RenderInput::Source { text, .. } => {
                command.stdin(Stdio::piped());
                Some(text)
            }
            RenderInput::File(_) => {
                command.stdin(Stdio::null());
                None
            }
        };

        let spawn_err = |source| Error::CompilerSpawn {
            program: self.program.clone(),
            source,
        };
        let mut child = command.spawn().map_err(spawn_err)?;
        let mut write_err = None;
        if let (Some(text), Some(mut stdin)) = (stdin_text, child.stdin.take()) {
            if let Err(e) = stdin.write_all(text.as_bytes()) {
                write_err = Some(e);
            }
        }
        // stdin is dropped above; the compiler sees EOF before the wait.
        let output = child.wait_with_output()?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(Error::CompilerFailed {
                source_name: request.input_name(),
                status: output.status.to_string(),
                stderr: diagnostics,
            });
        }
        match write_err {
            Some(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                log::debug!("{} closed stdin early: {e}", self.program);
            }
            Some(e) => return Err(e.into()),
            None => {}
        }
        if !diagnostics.trim().is_empty() {
            log::warn!("{}:\n{}", request.input_name(), diagnostics.trim_end());
        }

        Ok(Rendered {
            stdout,
            diagnostics,
        })
    }
}

fn wrapper_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<html[^>]*>(.*?)</html>").expect("wrapper pattern is valid"))
}

/// Contents of the outer `<html>` element, trimmed.
pub fn strip_wrapper(output: &str) -> Option<&str> {
    wrapper_re()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Turn compiler stdout into a fragment. Empty output gives an empty
/// fragment; output without a wrapper is used whole.
pub fn fragment_of(output: &str, name: &str) -> String {
    if output.trim().is_empty() {
        log::warn!("Compiler produced no output for {name}");
        return String::new();
    }
    match strip_wrapper(output) {
        Some(inner) => inner.to_string(),
        None => {
            log::warn!("No <html> wrapper in output for {name}, using entire output");
            output.trim().to_string()
        }
    }
}
