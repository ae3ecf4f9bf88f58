use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = ".notewiki.toml";

/// Project layout and tool settings, read from `.notewiki.toml`.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub directories: DirectoriesConfig,
    pub compiler: CompilerConfig,
    pub markers: MarkersConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DirectoriesConfig {
    pub root: PathBuf,
    pub input: PathBuf,
    pub html: PathBuf,
    pub pdf: PathBuf,
    pub public: PathBuf,
    pub templates: PathBuf,
    pub index_file: PathBuf,
    pub exclude: Vec<String>,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            input: PathBuf::from("typ"),
            html: PathBuf::from("html"),
            pdf: PathBuf::from("html/pdf"),
            public: PathBuf::from("public"),
            templates: PathBuf::from("_template"),
            index_file: PathBuf::from("typ/id_path_map.json"),
            exclude: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CompilerConfig {
    pub program: String,
    pub subcommand: String,
    /// Source extension of corpus documents, without the dot.
    pub extension: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "typst".to_string(),
            subcommand: "compile".to_string(),
            extension: "typ".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MarkersConfig {
    pub namespace: String,
    pub link: String,
    pub context: String,
}

impl Default for MarkersConfig {
    fn default() -> Self {
        Self {
            namespace: "denote".to_string(),
            link: "#ln".to_string(),
            context: "#tr".to_string(),
        }
    }
}

impl Config {
    /// Load the config file. A missing file is only tolerated when it is the
    /// default location.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            if path == Path::new(DEFAULT_CONFIG_PATH) {
                log::debug!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
                return Ok(Self::default());
            }
            return Err(Error::Config {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }

        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Config rooted at `root`, everything else default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.directories.root = root.into();
        config
    }

    pub fn root(&self) -> &Path {
        &self.directories.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.under_root(&self.directories.input)
    }

    pub fn html_dir(&self) -> PathBuf {
        self.under_root(&self.directories.html)
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.under_root(&self.directories.pdf)
    }

    pub fn public_dir(&self) -> PathBuf {
        self.under_root(&self.directories.public)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.under_root(&self.directories.templates)
    }

    pub fn index_file(&self) -> PathBuf {
        self.under_root(&self.directories.index_file)
    }

    pub fn html_template(&self) -> PathBuf {
        self.templates_dir().join("template-html.typ")
    }

    pub fn paged_template(&self) -> PathBuf {
        self.templates_dir().join("template-paged.typ")
    }

    pub fn active_template(&self) -> PathBuf {
        self.templates_dir().join("template.typ")
    }

    pub fn shell_template(&self) -> PathBuf {
        self.templates_dir().join("template.html")
    }

    /// Import path of the active template as seen from the compiler root.
    pub fn active_template_import(&self) -> String {
        let relative = self.directories.templates.join("template.typ");
        let relative = relative.to_string_lossy().replace('\\', "/");
        format!("/{}", relative.trim_start_matches("./").trim_start_matches('/'))
    }

    fn under_root(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.directories.root.join(path)
        }
    }
}
