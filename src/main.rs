use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Instant;

use notewiki::config::DEFAULT_CONFIG_PATH;
use notewiki::{
    site, BuildReport, Config, CorpusSearcher, IdentifierIndex, IndexRefresh, Result, SiteBuilder,
    TypstRenderer,
};

/// notewiki - Build a personal wiki from identified Typst notes
#[derive(Parser)]
#[command(name = "notewiki")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose mode - debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index and compile every note to HTML with backmatter (default)
    Html {
        /// Use the persisted index instead of rescanning the notes
        #[arg(long)]
        no_reindex: bool,
    },

    /// Rebuild the index and compile every note to PDF
    Pdf {
        /// Use the persisted index instead of rescanning the notes
        #[arg(long)]
        no_reindex: bool,
    },

    /// Remove all generated output and the active template
    Clean,

    /// Remove generated HTML, keeping the PDF directory
    CleanHtml,

    /// Remove generated PDFs
    CleanPdf,

    /// Copy public assets into the HTML directory
    CopyPublic,

    /// Rescan the notes and rewrite the identifier index
    UpdateIdPath,
}

fn main() {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        logger.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.target(env_logger::Target::Stderr).init();

    let result = Config::load(&cli.config).and_then(|config| {
        match cli.command.unwrap_or(Commands::Html { no_reindex: false }) {
            Commands::Html { no_reindex } => cmd_html(&config, no_reindex, cli.quiet),
            Commands::Pdf { no_reindex } => cmd_pdf(&config, no_reindex, cli.quiet),
            Commands::Clean => cmd_clean(&config, cli.quiet),
            Commands::CleanHtml => site::clean_html(&config, cli.quiet),
            Commands::CleanPdf => site::clean_pdf(&config, cli.quiet),
            Commands::CopyPublic => cmd_copy_public(&config, cli.quiet),
            Commands::UpdateIdPath => cmd_update_id_path(&config, cli.quiet),
        }
    });

    if let Err(e) = result {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn index_for_build(builder: &SiteBuilder<'_>, no_reindex: bool, quiet: bool) -> Result<IdentifierIndex> {
    if no_reindex {
        return builder.load_index();
    }
    let refreshed = builder.refresh_index()?;
    if !quiet {
        println!("{} {} identifiers", "Indexed".cyan().bold(), refreshed.index.len());
    }
    Ok(refreshed.index)
}

fn print_report(title: &str, report: &BuildReport, start: Instant, quiet: bool) {
    if quiet {
        return;
    }
    println!();
    println!("{}", title.green().bold());
    println!("  Documents written: {}", report.written.len().to_string().cyan());
    println!("  Skipped:           {}", report.skipped.len().to_string().yellow());
    println!("  Time elapsed:      {:.2?}", start.elapsed());
}

fn cmd_html(config: &Config, no_reindex: bool, quiet: bool) -> Result<()> {
    let start = Instant::now();
    let renderer = TypstRenderer::from_config(config);
    let builder = SiteBuilder::new(config, &CorpusSearcher, &renderer)?.quiet(quiet);

    let index = index_for_build(&builder, no_reindex, quiet)?;
    let report = builder.build_html(&index)?;
    print_report("HTML Build Complete", &report, start, quiet);
    Ok(())
}

fn cmd_pdf(config: &Config, no_reindex: bool, quiet: bool) -> Result<()> {
    let start = Instant::now();
    let renderer = TypstRenderer::from_config(config);
    let builder = SiteBuilder::new(config, &CorpusSearcher, &renderer)?.quiet(quiet);

    let index = index_for_build(&builder, no_reindex, quiet)?;
    let report = builder.build_pdf(&index)?;
    print_report("PDF Build Complete", &report, start, quiet);
    Ok(())
}

fn cmd_clean(config: &Config, quiet: bool) -> Result<()> {
    site::clean_all(config, quiet)?;
    if !quiet {
        println!("{}", "Cleaning complete".green());
    }
    Ok(())
}

fn cmd_copy_public(config: &Config, quiet: bool) -> Result<()> {
    let copied = site::copy_public_assets(config)?;
    if !quiet {
        println!(
            "{} {} files to {}",
            "Copied".green(),
            copied.to_string().cyan(),
            config.html_dir().display()
        );
    }
    Ok(())
}

fn cmd_update_id_path(config: &Config, quiet: bool) -> Result<()> {
    let renderer = TypstRenderer::from_config(config);
    let builder = SiteBuilder::new(config, &CorpusSearcher, &renderer)?;
    let IndexRefresh { index, persisted } = builder.refresh_index()?;

    if !quiet {
        for (identifier, path) in index.iter() {
            println!("  {} {}", identifier.cyan(), path);
        }
        if persisted {
            println!(
                "{} {} identifiers to {}",
                "Indexed".green(),
                index.len().to_string().cyan(),
                config.index_file().display()
            );
        } else {
            println!(
                "{} {} identifiers; {} was not updated",
                "Indexed".yellow(),
                index.len().to_string().cyan(),
                config.index_file().display()
            );
        }
    }
    Ok(())
}
