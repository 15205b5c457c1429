//! folio: file operations over local disk, the trash and network shares.
//!
//! Usage:
//!   folio ls <URL>                 List a directory
//!   folio cp <SRC>... <DIR>        Copy into a directory
//!   folio mv <SRC>... <DIR>        Move into a directory
//!   folio rm <PATH>...             Delete recursively
//!   folio trash <PATH>...          Move to the trash
//!   folio restore <ITEM>...        Restore trashed items
//!   folio watch <DIR>              Print external changes until Ctrl-C

mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use folio_core::location::trash::TRASH_ROOT_URL;
use folio_core::{
    ActionEngine, Config, CoreError, DirectoryListingModel, EngineEvents, InMemoryShare, ListingFilter,
    LocationRegistry, Services, Storage,
};

use crate::output::{print_event, print_rows, Outcome};

const LISTING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "folio", version, about = "Copy, move, trash and list files across storage backends")]
struct Cli {
    /// Configuration file (defaults to ~/.config/folio/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve smb://demo/ from an in-memory share
    #[arg(long, global = true)]
    demo_share: bool,

    /// User for network shares
    #[arg(long, global = true)]
    user: Option<String>,

    /// Password for network shares
    #[arg(long, global = true)]
    password: Option<String>,

    /// Remember the share credentials on disk
    #[arg(long, global = true)]
    save_credentials: bool,

    /// More logging (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a directory
    Ls {
        url: String,
        /// Include hidden entries
        #[arg(short, long)]
        all: bool,
        /// Only show files matching this glob (repeatable)
        #[arg(short = 'p', long = "pattern")]
        patterns: Vec<String>,
    },
    /// Copy sources into a directory
    Cp {
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },
    /// Move sources into a directory
    Mv {
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },
    /// Delete paths recursively
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Move paths to the trash
    Trash {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Restore trashed items to where they came from
    Restore {
        /// Names in the trash or trash:/// URLs
        #[arg(required = true)]
        items: Vec<String>,
    },
    /// Print changes made to a directory by other programs
    Watch { dir: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load_or_default(cli.config.as_deref()).context("loading configuration")?;
    let mut services = Services::new(config).context("starting services")?;
    if cli.demo_share {
        services = services.with_share(Arc::new(demo_share()?));
    }
    let registry = Arc::new(services.registry()?);

    match &cli.command {
        Command::Ls { url, all, patterns } => run_ls(&cli, services, registry, url, *all, patterns),
        Command::Cp { paths } => {
            let (sources, dir) = split_destination(paths)?;
            run_paste(&cli, &services, registry, sources, dir, false).await
        }
        Command::Mv { paths } => {
            let (sources, dir) = split_destination(paths)?;
            run_paste(&cli, &services, registry, sources, dir, true).await
        }
        Command::Rm { paths } => {
            let (mut engine, events) = ActionEngine::new(Arc::clone(&registry), &services);
            engine.remove(paths.iter().map(|p| absolutize(p)));
            drive(engine, events).await
        }
        Command::Trash { paths } => run_trash(&services, registry, paths).await,
        Command::Restore { items } => run_restore(&services, registry, items).await,
        Command::Watch { dir } => run_watch(&cli, services, registry, dir).await,
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "folio_core=debug,folio=debug",
        _ => "folio_core=trace,folio=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn demo_share() -> Result<InMemoryShare> {
    let share = InMemoryShare::new();
    share.add_workgroup("WORKGROUP");
    share.add_share("demo", "public", None);
    share.add_share("demo", "private", Some(("demo", "demo")));
    share.put_file("smb://demo/public/readme.txt", b"served by folio --demo-share\n")?;
    share.put_dir("smb://demo/public/docs")?;
    share.put_file("smb://demo/private/secret.txt", b"only for demo:demo\n")?;
    Ok(share)
}

/// Bare relative paths are taken relative to the working directory.
fn absolutize(path: &str) -> String {
    if path.contains("://") || path.starts_with('/') {
        return path.to_string();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path).to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}

fn split_destination(paths: &[String]) -> Result<(Vec<String>, String)> {
    let Some((dir, sources)) = paths.split_last() else {
        bail!("expected at least one source and a destination");
    };
    Ok((sources.iter().map(|s| absolutize(s)).collect(), absolutize(dir)))
}

fn open_location(cli: &Cli, registry: &LocationRegistry, url: &str) -> Result<()> {
    registry
        .set_new_path(
            url,
            cli.user.as_deref(),
            cli.password.as_deref(),
            cli.save_credentials,
        )
        .map_err(|err| {
            if let CoreError::AuthenticationRequired { user, url } = &err {
                return anyhow!("{url} needs credentials (tried as {user}); pass --user and --password");
            }
            anyhow::Error::new(err).context(format!("cannot open {url}"))
        })?;
    Ok(())
}

fn run_ls(
    cli: &Cli,
    services: Services,
    registry: Arc<LocationRegistry>,
    url: &str,
    all: bool,
    patterns: &[String],
) -> Result<()> {
    let url = absolutize(url);
    let mut model = DirectoryListingModel::with_registry(services, Arc::clone(&registry));
    model
        .set_filter(ListingFilter {
            show_hidden: all,
            name_patterns: patterns.to_vec(),
            ..ListingFilter::default()
        })
        .context("invalid --pattern")?;
    open_location(cli, &registry, &url)?;
    model.refresh()?;

    let mut outcome = Outcome::default();
    for event in model.wait_idle(LISTING_TIMEOUT) {
        outcome.record(&event);
        print_event(&event);
    }
    print_rows(model.rows());
    outcome.into_result()
}

async fn run_paste(
    cli: &Cli,
    services: &Services,
    registry: Arc<LocationRegistry>,
    sources: Vec<String>,
    dir: String,
    cut: bool,
) -> Result<()> {
    open_location(cli, &registry, &dir)?;
    let (mut engine, events) = ActionEngine::new(registry, services);
    if cut {
        engine.cut(sources);
    } else {
        engine.copy(sources);
    }
    engine.paste();
    drive(engine, events).await
}

async fn run_trash(
    services: &Services,
    registry: Arc<LocationRegistry>,
    paths: &[String],
) -> Result<()> {
    let mut pairs = Vec::with_capacity(paths.len());
    for path in paths {
        let item = registry.item_info(&absolutize(path))?;
        if !item.exists() {
            bail!("{path} does not exist");
        }
        pairs.push(registry.trash().move_pair(&item));
    }
    let (mut engine, events) = ActionEngine::new(registry, services);
    engine.move_to_trash(pairs);
    drive(engine, events).await
}

async fn run_restore(
    services: &Services,
    registry: Arc<LocationRegistry>,
    items: &[String],
) -> Result<()> {
    let trash = registry.trash();
    let mut pairs = Vec::with_capacity(items.len());
    for name in items {
        let url = if name.starts_with("trash://") {
            name.clone()
        } else {
            format!("{TRASH_ROOT_URL}{}", name.trim_start_matches('/'))
        };
        let item = trash.new_item_info(&url)?;
        if !item.exists() {
            bail!("{name} is not in the trash");
        }
        pairs.push(trash.restore_pair(&item)?);
    }
    let (mut engine, events) = ActionEngine::new(Arc::clone(&registry), services);
    engine.restore_from_trash(pairs);
    drive(engine, events).await
}

async fn run_watch(
    cli: &Cli,
    services: Services,
    registry: Arc<LocationRegistry>,
    dir: &str,
) -> Result<()> {
    let dir = absolutize(dir);
    let mut model = DirectoryListingModel::with_registry(services, Arc::clone(&registry));
    open_location(cli, &registry, &dir)?;
    model.refresh()?;
    for event in model.wait_idle(LISTING_TIMEOUT) {
        print_event(&event);
    }
    if !model.is_watching() {
        bail!("{dir} cannot be watched");
    }
    println!("watching {dir} ({} entries), Ctrl-C to stop", model.len());

    let mut tick = tokio::time::interval(Duration::from_millis(200));
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            _ = tick.tick() => {
                for event in model.poll() {
                    print_event(&event);
                }
            }
        }
    }
    info!("stopped watching");
    Ok(())
}

/// Runs every queued action, printing events as they come. Ctrl-C cancels
/// the running action.
async fn drive(mut engine: ActionEngine, mut events: EngineEvents) -> Result<()> {
    let cancel = engine.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling...");
            cancel.cancel();
        }
    });

    let mut outcome = Outcome::default();
    while engine.pump() {
        for event in events.drain() {
            outcome.record(&event);
            print_event(&event);
        }
        tokio::task::yield_now().await;
    }
    for event in events.drain() {
        outcome.record(&event);
        print_event(&event);
    }
    interrupt.abort();
    debug!(errors = outcome.errors, "actions finished");
    outcome.into_result()
}
