mod app;
mod braille;
mod data;
mod map;
mod ui;

use anyhow::{Context, Result};
use app::App;
use clap::Parser;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::execute;
use ratatui::DefaultTerminal;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use globe_tiles::ProjectionConfig;

/// Braille terminal viewer for flat and globe tile projections.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Projection name: globe, vertical-perspective or mercator
    #[arg(long, default_value = "globe")]
    projection: String,

    /// JSON file with projection settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding Natural Earth GeoJSON files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Log destination. The terminal belongs to the UI
    #[arg(long, default_value = "globe-tiles.log")]
    log_file: PathBuf,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Start with tile wireframes visible
    #[arg(long)]
    wireframe: bool,
}

fn init_logging(path: &Path, level: Option<&str>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating log file {}", path.display()))?;
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("invalid log filter '{level}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_file, args.log_level.as_deref())?;

    let config = match &args.config {
        Some(path) => ProjectionConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ProjectionConfig::default(),
    };

    let mut terminal = ratatui::init();
    terminal.clear()?;
    execute!(std::io::stdout(), EnableMouseCapture)?;

    let result = run(&mut terminal, &args, config);

    let _ = execute!(std::io::stdout(), DisableMouseCapture);
    ratatui::restore();
    result
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    app.set_mouse_pos(mouse.column, mouse.row);

    match mouse.kind {
        MouseEventKind::ScrollUp => app.zoom_at(mouse.column, mouse.row, true),
        MouseEventKind::ScrollDown => app.zoom_at(mouse.column, mouse.row, false),
        MouseEventKind::ScrollLeft => app.pan(-30.0, 0.0),
        MouseEventKind::ScrollRight => app.pan(30.0, 0.0),
        MouseEventKind::Down(MouseButton::Left) => app.last_mouse = Some((mouse.column, mouse.row)),
        MouseEventKind::Drag(MouseButton::Left) => app.handle_drag(mouse.column, mouse.row),
        MouseEventKind::Up(MouseButton::Left) => app.end_drag(),
        _ => {}
    }
}

fn handle_key(app: &mut App, code: KeyCode) {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => app.quit(),

        KeyCode::Left | KeyCode::Char('h') => app.pan(-20.0, 0.0),
        KeyCode::Right | KeyCode::Char('l') => app.pan(20.0, 0.0),
        KeyCode::Up | KeyCode::Char('k') => app.pan(0.0, -12.0),
        KeyCode::Down | KeyCode::Char('j') => app.pan(0.0, 12.0),

        KeyCode::Char('+') | KeyCode::Char('=') => app.zoom_in(),
        KeyCode::Char('-') | KeyCode::Char('_') => app.zoom_out(),

        KeyCode::Char('[') => app.pitch_down(),
        KeyCode::Char(']') => app.pitch_up(),
        KeyCode::Char(',') => app.rotate_left(),
        KeyCode::Char('.') => app.rotate_right(),

        KeyCode::Char('g') | KeyCode::Char('G') => app.toggle_globe(),
        KeyCode::Char('w') | KeyCode::Char('W') => app.map_renderer.toggle_wireframe(),
        KeyCode::Char('t') | KeyCode::Char('T') => app.map_renderer.toggle_graticule(),
        KeyCode::Char('r') | KeyCode::Char('0') => app.reset(),
        _ => {}
    }
}

fn run(terminal: &mut DefaultTerminal, args: &Args, config: ProjectionConfig) -> Result<()> {
    let size = terminal.size()?;
    let mut app = App::new(usize::from(size.width), usize::from(size.height), &args.projection, config);
    if args.wireframe {
        app.map_renderer.toggle_wireframe();
    }

    let loaded = if args.data_dir.exists() {
        data::load_all_geojson(&mut app.map_renderer, &args.data_dir)?
    } else {
        0
    };
    if !app.map_renderer.has_data() {
        info!("no GeoJSON found, using the built-in outline");
        data::generate_simple_world(&mut app.map_renderer);
    }
    info!(loaded, projection = app.projection.name(), "viewer started");

    loop {
        app.tick();
        terminal.draw(|frame| ui::render(frame, &mut app))?;

        if event::poll(Duration::from_millis(16))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(&mut app, key.code),
                Event::Mouse(mouse) => handle_mouse(&mut app, mouse),
                Event::Resize(width, height) => app.resize(usize::from(width), usize::from(height)),
                _ => {}
            }
        }

        if app.should_quit {
            break;
        }
    }

    app.projection.release();
    Ok(())
}
