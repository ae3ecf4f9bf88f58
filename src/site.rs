use colored::Colorize;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::render::RenderMode;

/// Copy the mode's template over the active `template.typ`.
pub fn prepare_template(config: &Config, mode: RenderMode) -> Result<()> {
    let source = match mode {
        RenderMode::Paged => config.paged_template(),
        RenderMode::Fragment => config.html_template(),
    };
    if !source.exists() {
        return Err(Error::TemplateMissing { path: source });
    }
    log::info!(
        "Setting active template to {}",
        source.file_name().unwrap_or_default().to_string_lossy()
    );
    fs::copy(&source, config.active_template())?;
    Ok(())
}

/// Copy `public/` into the HTML output directory, overwriting. Returns the
/// number of files copied.
pub fn copy_public_assets(config: &Config) -> Result<usize> {
    let public = config.public_dir();
    let is_empty = fs::read_dir(&public)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true);
    if is_empty {
        log::info!("{} is empty or does not exist, skipping copy", public.display());
        return Ok(0);
    }

    let html = config.html_dir();
    log::info!("Copying contents of {} to {}", public.display(), html.display());
    fs::create_dir_all(&html)?;

    let mut copied = 0;
    for entry in WalkDir::new(&public).min_depth(1) {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => Error::Io(io),
            None => Error::Io(std::io::Error::other("filesystem loop in public directory")),
        })?;
        let relative = entry.path().strip_prefix(&public).unwrap_or(entry.path());
        let destination = html.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Remove everything inside `dir`, keeping `keep` if it is a direct child.
/// Failures on single entries are reported and skipped.
fn clean_dir(dir: &Path, keep: Option<&Path>, quiet: bool) -> Result<()> {
    if !dir.exists() {
        if !quiet {
            println!("Directory {} does not exist, nothing to clean.", dir.display());
        }
        return Ok(());
    }
    if !quiet {
        println!("{} {}", "Cleaning".cyan().bold(), dir.display());
    }

    let keep = keep.and_then(|k| k.canonicalize().ok());
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let result = if path.is_dir() {
            if keep.is_some() && path.canonicalize().ok() == keep {
                log::info!("Skipping {}", path.display());
                continue;
            }
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = result {
            log::warn!("Error removing {}: {e}", path.display());
        }
    }
    Ok(())
}

/// Empty the HTML directory, preserving the PDF directory inside it.
pub fn clean_html(config: &Config, quiet: bool) -> Result<()> {
    clean_dir(&config.html_dir(), Some(&config.pdf_dir()), quiet)
}

pub fn clean_pdf(config: &Config, quiet: bool) -> Result<()> {
    clean_dir(&config.pdf_dir(), None, quiet)
}

/// Clean both outputs and drop the active template copy.
pub fn clean_all(config: &Config, quiet: bool) -> Result<()> {
    clean_pdf(config, quiet)?;
    clean_html(config, quiet)?;
    let active = config.active_template();
    if active.exists() {
        log::info!("Removing {}", active.display());
        fs::remove_file(active)?;
    }
    Ok(())
}
