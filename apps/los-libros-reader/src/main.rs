//! Los Libros Reader
//!
//! Command line front end for the reader core: inspect a book, build its
//! locations index or page list, and resolve navigation targets.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use los_libros_reader::book::Navigation;
use los_libros_reader::render::FlowSurface;
use los_libros_reader::{Book, ReaderSettings};

#[derive(Parser)]
#[command(name = "los-libros-reader")]
#[command(version, about = "EPUB locations, pagination and CFI navigation", long_about = None)]
struct Cli {
    /// Settings JSON, merged over READER_* environment variables
    #[arg(short, long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show metadata, spine and table of contents
    Inspect {
        book: PathBuf,
    },
    /// Generate the locations index as JSON
    Locations {
        book: PathBuf,
        /// Characters per location
        #[arg(short, long)]
        r#break: Option<usize>,
    },
    /// Generate the page list for a viewport as JSON
    Paginate {
        book: PathBuf,
        #[arg(long, default_value_t = 600.0)]
        width: f64,
        #[arg(long, default_value_t = 800.0)]
        height: f64,
    },
    /// Resolve a CFI, href, page number or percentage
    Goto {
        book: PathBuf,
        target: String,
        #[arg(long, default_value_t = 600.0)]
        width: f64,
        #[arg(long, default_value_t = 800.0)]
        height: f64,
    },
}

fn load_settings(path: Option<&PathBuf>) -> Result<ReaderSettings> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading settings {}", path.display()))?;
            ReaderSettings::from_json(&json).context("parsing settings")
        }
        None => Ok(ReaderSettings::from_env()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "los_libros_reader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_ref())?;

    match cli.command {
        Command::Inspect { book } => inspect(book, settings).await,
        Command::Locations { book, r#break } => {
            let settings = ReaderSettings {
                location_break: r#break.unwrap_or(settings.location_break),
                ..settings
            };
            locations(book, settings).await
        }
        Command::Paginate {
            book,
            width,
            height,
        } => paginate(book, settings, width, height).await,
        Command::Goto {
            book,
            target,
            width,
            height,
        } => goto(book, settings, &target, width, height).await,
    }
}

async fn open(path: &PathBuf, settings: ReaderSettings) -> Result<Book> {
    Book::open_at(path, settings)
        .await
        .with_context(|| format!("opening {}", path.display()))
}

async fn inspect(path: PathBuf, settings: ReaderSettings) -> Result<()> {
    let book = open(&path, settings).await?;

    if let Some(meta) = book.metadata() {
        println!("File: {}", path.display());
        println!("Title: {}", meta.title);
        if !meta.creator.is_empty() {
            println!("Creator: {}", meta.creator);
        }
        if !meta.language.is_empty() {
            println!("Language: {}", meta.language);
        }
        println!("Layout: {:?}", book.layout_settings());
    }

    println!("Spine:");
    for item in book.spine() {
        let linear = if item.linear { "" } else { " (non-linear)" };
        println!("  {:>3}  {}  epubcfi({}){}", item.index, item.href, item.cfi_base, linear);
    }

    println!("Contents:");
    let mut stack: Vec<_> = book.toc().iter().rev().map(|entry| (entry, 1)).collect();
    while let Some((entry, depth)) = stack.pop() {
        println!("{}{}  {}", "  ".repeat(depth), entry.label, entry.href);
        stack.extend(entry.subitems.iter().rev().map(|child| (child, depth + 1)));
    }

    if !book.page_list().is_empty() {
        println!("Page list: {} pages", book.page_list().len());
    }
    Ok(())
}

async fn locations(path: PathBuf, settings: ReaderSettings) -> Result<()> {
    let mut book = open(&path, settings).await?;
    let count = book.generate_locations().await?;
    tracing::info!(count, "locations generated");
    println!("{}", book.locations().save()?);
    Ok(())
}

async fn paginate(path: PathBuf, settings: ReaderSettings, width: f64, height: f64) -> Result<()> {
    let mut book = open(&path, settings).await?;
    let page_list = book.generate_pagination(width, height).await?;
    println!("{}", serde_json::to_string_pretty(page_list)?);
    Ok(())
}

async fn goto(
    path: PathBuf,
    settings: ReaderSettings,
    target: &str,
    width: f64,
    height: f64,
) -> Result<()> {
    let settings = ReaderSettings {
        width: Some(width),
        height: Some(height),
        ..settings
    };
    let flow = settings.flow;
    let mut book = open(&path, settings).await?;
    book.generate_pagination(width, height).await?;
    book.render_to(Box::new(FlowSurface::with_metrics(width, height, flow)))
        .await?;

    match book.goto(target).await? {
        Navigation::Moved { cfi } => {
            let page = cfi
                .as_deref()
                .and_then(|cfi| book.pagination().page_from_cfi(cfi));
            println!("chapter: {}", book.spine_pos());
            println!("cfi: {}", cfi.unwrap_or_default());
            if let Some(page) = page {
                println!("page: {} of {}", page, book.pagination().last_page());
            }
        }
        other => println!("{:?}", other),
    }
    Ok(())
}
