use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use ghostsync::ErrorCode;
use ghostsync::config::{AppConfig, ConfigError};
use ghostsync::enhance::config::EnhanceConfig;
use ghostsync::enhance::{AiAction, EnhanceError};
use ghostsync::identity::{AllowList, DeviceFlag, FileDeviceFlag, Identity, IdentityError, restore};
use ghostsync::raster::{PixelCanvas, Point, RasterError, Size, decode_data_uri};
use ghostsync::realtime::ConnectionStatus;
use ghostsync::session::canvas::{CanvasHandle, CanvasSession, CanvasView};
use ghostsync::session::note::{NoteHandle, NoteSession};
use ghostsync::session::{Collaborators, SessionError};
use ghostsync::store::postgrest::PostgrestStore;
use ghostsync::store::{RowStore, StoreError};
use ghostsync::stroke::{ClearOutcome, DEFAULT_COLOR, DEFAULT_WIDTH};
use ghostsync::text::SyncStatus;
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Enhance(#[from] EnhanceError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("not logged in; run `ghost-cli login <name>` first")]
    NotLoggedIn,
    #[error("no config directory; pass --flag-file or set GHOST_DEVICE_FLAG")]
    NoFlagLocation,
    #[error("unknown action `{0}`; expected summarize, fix, expand, or action-items")]
    UnknownAction(String),
    #[error("no snapshot stored yet")]
    NoSnapshot,
    #[error("session did not become ready within {0:?}")]
    Timeout(Duration),
    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::Identity(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Enhance(e) => e.error_code(),
            Self::Raster(e) => e.error_code(),
            Self::NotLoggedIn => "E_NOT_LOGGED_IN",
            Self::NoFlagLocation => "E_FLAG_LOCATION",
            Self::UnknownAction(_) => "E_UNKNOWN_ACTION",
            Self::NoSnapshot => "E_NO_SNAPSHOT",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::Io(_) => "E_IO",
            Self::InvalidJson(_) => "E_JSON",
        }
    }
}

/// How long a one-shot command waits for the initial load and subscribe.
const READY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "ghost-cli", about = "Shared note and sketchpad for two")]
struct Cli {
    /// Where the last chosen name is remembered.
    #[arg(long, env = "GHOST_DEVICE_FLAG")]
    flag_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Choose who you are on this device.
    Login { name: String },
    /// Forget the remembered name.
    Logout,
    Whoami,
    Note(NoteCommand),
    Canvas(CanvasCommand),
}

#[derive(Args, Debug)]
struct NoteCommand {
    #[command(subcommand)]
    command: NoteSubcommand,
}

#[derive(Subcommand, Debug)]
enum NoteSubcommand {
    /// Print the shared note.
    Show,
    /// Follow the shared note until Ctrl-C.
    Watch,
    /// Replace the shared note.
    Write { text: String },
    /// Rewrite the shared note with an AI action.
    Enhance { action: String },
}

#[derive(Args, Debug)]
struct CanvasCommand {
    #[arg(long = "canvas-width", default_value_t = 800)]
    width: u32,

    #[arg(long = "canvas-height", default_value_t = 600)]
    height: u32,

    #[command(subcommand)]
    command: CanvasSubcommand,
}

#[derive(Subcommand, Debug)]
enum CanvasSubcommand {
    /// Follow strokes and presence until Ctrl-C.
    Watch,
    /// Draw one line; coordinates are fractions of the canvas (0..=1).
    Line {
        #[arg(value_parser = parse_unit)]
        x1: f64,
        #[arg(value_parser = parse_unit)]
        y1: f64,
        #[arg(value_parser = parse_unit)]
        x2: f64,
        #[arg(value_parser = parse_unit)]
        y2: f64,
        #[arg(long, default_value = DEFAULT_COLOR)]
        color: String,
        #[arg(long, default_value_t = DEFAULT_WIDTH)]
        width: f64,
    },
    /// Clear the canvas for everyone (presses clear twice).
    Clear,
    /// Save the stored snapshot as a JPEG file.
    Snapshot {
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error [{}]: {e}", e.code());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let flag = device_flag(cli.flag_file)?;
    match cli.command {
        Command::Login { name } => run_login(&flag, &name),
        Command::Logout => {
            flag.forget()?;
            println!("logged out");
            Ok(())
        }
        Command::Whoami => {
            println!("{}", signed_in(&flag)?);
            Ok(())
        }
        Command::Note(note) => {
            let me = signed_in(&flag)?;
            info!(user = %me, "opening note");
            run_note(note).await
        }
        Command::Canvas(canvas) => run_canvas(signed_in(&flag)?, canvas).await,
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

fn device_flag(path: Option<PathBuf>) -> Result<FileDeviceFlag, CliError> {
    match path {
        Some(path) => Ok(FileDeviceFlag::new(path)),
        None => FileDeviceFlag::default_location().ok_or(CliError::NoFlagLocation),
    }
}

/// The allow-list alone, so identity commands work without store credentials.
fn allow_list() -> Result<AllowList, CliError> {
    match std::env::var("GHOST_ALLOWED_USERS") {
        Ok(raw) => Ok(AllowList::parse(&raw)?),
        Err(_) => Ok(AllowList::default()),
    }
}

/// The remembered identity; both surfaces refuse to open without one.
fn signed_in(flag: &dyn DeviceFlag) -> Result<Identity, CliError> {
    restore(flag, &allow_list()?).ok_or(CliError::NotLoggedIn)
}

fn run_login(flag: &dyn DeviceFlag, name: &str) -> Result<(), CliError> {
    let me = allow_list()?.admit(name)?;
    flag.store(&me)?;
    info!(user = %me, "logged in");
    println!("logged in as {me}");
    Ok(())
}

// =============================================================================
// NOTE
// =============================================================================

async fn run_note(note: NoteCommand) -> Result<(), CliError> {
    let config = AppConfig::from_env()?;

    if let NoteSubcommand::Show = note.command {
        let store = PostgrestStore::new(config.store.clone())?;
        let doc = store.fetch_text().await?;
        println!("{}", doc.text);
        return Ok(());
    }

    let enhance = match &note.command {
        NoteSubcommand::Enhance { .. } => Some(EnhanceConfig::from_env()?),
        _ => None,
    };
    let collaborators = Collaborators::connect(&config, enhance).await?;
    let handle = NoteSession::spawn(&collaborators, config.timings).await?;
    let ready = wait_note_ready(&handle).await;
    if let Err(e) = ready {
        handle.shutdown().await;
        return Err(e);
    }

    let echo = !matches!(note.command, NoteSubcommand::Watch);
    let result = match note.command {
        NoteSubcommand::Show => Ok(()),
        NoteSubcommand::Watch => watch_note(&handle).await,
        NoteSubcommand::Write { text } => handle.edit(text).await.map_err(CliError::from),
        NoteSubcommand::Enhance { action } => enhance_note(&handle, &action).await,
    };
    handle.shutdown().await;
    result?;

    if echo {
        println!("{}", collaborators.store.fetch_text().await?.text);
    }
    Ok(())
}

async fn wait_note_ready(handle: &NoteHandle) -> Result<(), CliError> {
    let mut view = handle.watch();
    let ready = view.wait_for(|v| v.loaded || v.status == SyncStatus::Error);
    match tokio::time::timeout(READY_TIMEOUT, ready).await {
        Ok(Ok(v)) if v.loaded => Ok(()),
        Ok(Ok(v)) => Err(StoreError::Unavailable(v.last_error.clone().unwrap_or_default()).into()),
        Ok(Err(_)) => Err(SessionError::Closed.into()),
        Err(_) => Err(CliError::Timeout(READY_TIMEOUT)),
    }
}

async fn enhance_note(handle: &NoteHandle, raw: &str) -> Result<(), CliError> {
    let action = AiAction::parse(raw).ok_or_else(|| CliError::UnknownAction(raw.to_owned()))?;
    info!(action = action.label(), "running AI action");
    handle.enhance(action).await?;
    Ok(())
}

async fn watch_note(handle: &NoteHandle) -> Result<(), CliError> {
    let mut view = handle.watch();
    let mut last = String::new();
    loop {
        {
            let current = view.borrow_and_update();
            if current.text != last {
                last.clone_from(&current.text);
                println!("--- {} ---\n{}", current.status.label(), current.text);
            }
        }
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

// =============================================================================
// CANVAS
// =============================================================================

async fn run_canvas(me: Identity, canvas: CanvasCommand) -> Result<(), CliError> {
    let config = AppConfig::from_env()?;
    let size = Size::new(canvas.width, canvas.height);

    if let CanvasSubcommand::Snapshot { out } = &canvas.command {
        let store = PostgrestStore::new(config.store.clone())?;
        let uri = store.fetch_snapshot().await?.image_data_uri.ok_or(CliError::NoSnapshot)?;
        std::fs::write(out, decode_data_uri(&uri)?)?;
        println!("wrote {}", out.display());
        return Ok(());
    }

    let collaborators = Collaborators::connect(&config, None).await?;
    let surface = PixelCanvas::new().with_quality(config.snapshot_quality);
    let handle = CanvasSession::spawn(&collaborators, me, surface, config.timings).await?;
    handle.resize(size).await?;
    if let Err(e) = wait_canvas_ready(&handle).await {
        handle.shutdown().await;
        return Err(e);
    }

    let result = match canvas.command {
        CanvasSubcommand::Watch => watch_canvas(&handle).await,
        CanvasSubcommand::Line { x1, y1, x2, y2, color, width } => {
            draw_line(&handle, size, (x1, y1), (x2, y2), color, width).await
        }
        CanvasSubcommand::Clear => clear_canvas(&handle).await,
        CanvasSubcommand::Snapshot { .. } => Ok(()),
    };
    handle.shutdown().await;
    result
}

async fn wait_canvas_ready(handle: &CanvasHandle<PixelCanvas>) -> Result<(), CliError> {
    let mut view = handle.watch();
    let ready = view.wait_for(|v| v.restored && v.connection == ConnectionStatus::Connected);
    match tokio::time::timeout(READY_TIMEOUT, ready).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(SessionError::Closed.into()),
        Err(_) => Err(CliError::Timeout(READY_TIMEOUT)),
    }
}

async fn draw_line(
    handle: &CanvasHandle<PixelCanvas>,
    size: Size,
    from: (f64, f64),
    to: (f64, f64),
    color: String,
    width: f64,
) -> Result<(), CliError> {
    handle.set_brush(color, width).await?;
    handle.line(to_pixels(from, size), to_pixels(to, size)).await?;
    println!("drew line");
    Ok(())
}

async fn clear_canvas(handle: &CanvasHandle<PixelCanvas>) -> Result<(), CliError> {
    for _ in 0..2 {
        if handle.request_clear().await? == ClearOutcome::Cleared {
            println!("cleared");
            return Ok(());
        }
    }
    warn!("clear did not confirm");
    Ok(())
}

async fn watch_canvas(handle: &CanvasHandle<PixelCanvas>) -> Result<(), CliError> {
    let mut view = handle.watch();
    let mut last = Value::Null;
    loop {
        let line = {
            let current = view.borrow_and_update();
            view_line(&current)
        };
        if line != last {
            println!("{}", serde_json::to_string(&line)?);
            last = line;
        }
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn parse_unit(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.trim().parse().map_err(|e| format!("{raw}: {e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{raw} is outside 0..=1"))
    }
}

fn to_pixels((x, y): (f64, f64), size: Size) -> Point {
    Point::new(x * f64::from(size.width), y * f64::from(size.height))
}

fn view_line(view: &CanvasView) -> Value {
    json!({
        "connection": match view.connection {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        },
        "peer": view.peer.as_ref().map(|p| &p.user),
        "peer_drawing": view.peer.as_ref().is_some_and(|p| p.is_drawing),
        "just_online": view.peer_pulse,
        "clear_armed": view.clear_armed,
    })
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
