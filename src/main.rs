use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use url::Url;

use textmark::dom;
use textmark::frame::{ContentRoot, content_roots};
use textmark::highlight::parse_highlights;
use textmark::logging::init_logging;
use textmark::panic_handler::initialize_panic_handler;
use textmark::session::Highlighter;
use textmark::settings::load_settings;

#[derive(Parser, Debug)]
#[command(name = "textmark")]
#[command(about = "Find backend highlight text in a rendered HTML text layer and annotate it", long_about = None)]
struct Cli {
    /// Rendered HTML (a viewer text layer or a saved page)
    html: PathBuf,

    /// JSON highlight list: an array or an object with a `highlights` field
    #[arg(long)]
    highlights: PathBuf,

    /// Write the annotated HTML here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Origin the document is served from; frames from other origins are skipped
    #[arg(long)]
    origin: Option<Url>,

    /// Pause between highlights in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Log to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_panic_handler();

    let mut settings = load_settings(cli.config.as_deref());
    if cli.verbose {
        settings.logging.level = "debug".to_string();
    }
    if let Some(path) = &cli.log_file {
        settings.logging.file = Some(path.clone());
    }
    if let Some(delay) = cli.delay_ms {
        settings.batch_delay_ms = delay;
    }
    init_logging(&settings.logging)?;

    info!("Annotating {:?} with {:?}", cli.html, cli.highlights);

    let html = fs::read_to_string(&cli.html)
        .with_context(|| format!("Failed to read HTML file {:?}", cli.html))?;
    let json = fs::read_to_string(&cli.highlights)
        .with_context(|| format!("Failed to read highlight list {:?}", cli.highlights))?;
    let descriptors = parse_highlights(&json)?;

    let base = match cli.origin {
        Some(origin) => origin,
        None => document_url(&cli.html)?,
    };

    let document = dom::parse_html(&html);
    let roots = content_roots(&document.document, &base);
    let mut highlighter = Highlighter::new(&settings, &base);
    let report = highlighter.highlight_all(&descriptors, &roots);

    for root in &roots {
        if let ContentRoot::Frame(frame) = root {
            if let Err(e) = frame.write_back() {
                error!("Failed to write frame {} back: {e:#}", frame.src);
            }
        }
    }

    let annotated = dom::serialize_document(&document)?;
    match &cli.out {
        Some(path) => fs::write(path, annotated)
            .with_context(|| format!("Failed to write {path:?}"))?,
        None => io::stdout()
            .write_all(annotated.as_bytes())
            .context("Failed to write to stdout")?,
    }

    for applied in &report.applied {
        eprintln!(
            "applied  {} (page {})",
            applied.id,
            applied.page.unwrap_or(1)
        );
    }
    for id in &report.not_found {
        eprintln!("missing  {id}");
    }
    for (id, e) in &report.failed {
        eprintln!("failed   {id}: {e}");
    }

    info!("Done");
    Ok(())
}

fn document_url(path: &Path) -> Result<Url> {
    let absolute = fs::canonicalize(path).with_context(|| format!("Failed to resolve {path:?}"))?;
    Url::from_file_path(&absolute)
        .map_err(|()| anyhow::anyhow!("Cannot express {absolute:?} as a file URL"))
}
