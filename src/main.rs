mod cli;

use crate::cli::{Args, Command};
use clap::Parser;
use futures::StreamExt;
use miette::{IntoDiagnostic, Result, miette};
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vellum_config::Config;
use vellum_library::api::Response;
use vellum_library::content::ContentOptions;
use vellum_library::scan::{ScanEvent, ScanOptions};
use vellum_library::{Library, LibraryOptions};
use vellum_registry::models::Page;
use vellum_registry::{Database, RegistryHandle, SqliteRegistry};
use vellum_storage::BackendHandle;
use vellum_storage::backend::{LocalBackend, ReadOnlyBackend};

fn report<E: Debug>(err: E) -> miette::Report {
    miette!("{err:?}")
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

/// Print a successful response, or turn the failure into an error.
fn respond<T: Serialize>(response: Response<T>) -> Result<()> {
    let status = response.status();
    match response {
        Response::Ok(value) => print(&value),
        Response::Accepted | Response::NoContent => Ok(()),
        Response::NotFound(id) => Err(miette!("not found: {id}")),
        Response::Unprocessable(anchor) => Err(miette!("work anchor cannot be located: {anchor}")),
        Response::Timeout => Err(miette!("timed out ({status})")),
        Response::Unavailable(reason) | Response::Failed(reason) => Err(miette!("{reason} ({status})")),
    }
}

fn options(config: &Config) -> LibraryOptions {
    LibraryOptions {
        min_works: config.detect.min_works,
        toc_depth: config.detect.toc_depth,
        max_reference_depth: config.extract.max_reference_depth,
        content: ContentOptions {
            workers: config.content.workers,
            timeout: config.content.timeout(),
            eviction_age: config.content.eviction_age(),
        },
        scan: ScanOptions {
            concurrency: config.scan.concurrency,
            timeout: config.scan.timeout(),
            prewarm: config.scan.prewarm,
        },
    }
}

async fn assemble(config: &Config) -> Result<Library> {
    let local = LocalBackend::new("library", &config.library.root).map_err(report)?;
    let library: BackendHandle = Arc::new(ReadOnlyBackend::new(Arc::new(local)));
    let artifacts: BackendHandle = Arc::new(LocalBackend::new("artifacts", &config.cache.artifacts).map_err(report)?);
    let database = Database::connect(&config.cache.database).await.map_err(report)?;
    let registry: RegistryHandle = Arc::new(SqliteRegistry::from(&database));
    Ok(Library::new(library, artifacts, registry, options(config)))
}

async fn scan(system: &Library, sweep_interval: std::time::Duration) -> Result<()> {
    let sweeper = system.content().clone().spawn_sweeper(sweep_interval);
    let scanner = system.scanner().clone();
    let mut events = std::pin::pin!(scanner.scan());
    let result = loop {
        let event = tokio::select! {
            event = events.next() => event,
            _ = tokio::signal::ctrl_c() => break Err(miette!("scan interrupted")),
        };
        match event {
            Some(Ok(ScanEvent::Started)) => tracing::info!("Scan started"),
            Some(Ok(ScanEvent::DiscoveryComplete(total))) => tracing::info!(total, "Discovered books"),
            Some(Ok(ScanEvent::Processed(outcome))) => {
                if outcome.is_failed() {
                    tracing::warn!(book = %outcome.book_id, status = ?outcome.status, "Book failed");
                } else {
                    tracing::debug!(book = %outcome.book_id, status = ?outcome.status, "Book processed");
                }
            },
            Some(Ok(ScanEvent::Complete(summary))) => break print(&summary),
            Some(Err(err)) => break Err(report(err)),
            None => break Ok(()),
        }
    };
    sweeper.abort();
    result
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref()).map_err(report)?;
    let system = assemble(&config).await?;
    let api = system.api();
    match args.command {
        Command::Sync => print(&system.sync().await.map_err(report)?),
        Command::Scan => scan(&system, config.content.sweep_interval()).await,
        Command::Process { book } => print(&system.scanner().process_book(&book).await.map_err(report)?),
        Command::List { book, offset, limit } => respond(api.list_virtual_books(&book, Page::new(offset, limit)).await),
        Command::Show { id } => respond(api.get_virtual_book(id).await),
        Command::Content { id, output } => {
            let content = match api.get_content(id).await {
                Response::Ok(content) => content,
                failure => return respond(failure.map(|_| ())),
            };
            let bytes = tokio::task::spawn_blocking(move || content.into_bytes())
                .await
                .into_diagnostic()?
                .into_diagnostic()?;
            tokio::fs::write(&output, &bytes).await.into_diagnostic()?;
            tracing::info!(%id, path = %output.display(), size = bytes.len(), "Wrote virtual book");
            Ok(())
        },
        Command::Delete { book } => respond(api.delete_virtual_books(&book).await),
        Command::Sweep => print(&system.content().sweep().await.map_err(report)?),
        Command::ClearCache => {
            let removed = system.content().clear().await.map_err(report)?;
            tracing::info!(removed, "Cleared artifact cache");
            Ok(())
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    run(args).await
}
