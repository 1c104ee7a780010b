use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use ratatui::DefaultTerminal;
use tracing::{error, info};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, prelude::*};

mod columns;
mod controller;
mod domain;
mod grouping;
mod inputter;
mod loader;
mod model;
mod record;
mod ui;
mod view;

use controller::Controller;
use domain::{GridConfig, GridError, PAGE_SIZE_OPTIONS, RELATIONSHIP_FIELD, SearchMode};
use model::{Model, Status};
use loader::Loaded;
use ui::TableUI;

/// Browse a json or tabular file as a grid grouped by TENANT_ID.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Data file (.json, .csv, .parquet, .arrow)
    path: String,

    /// Tenants per page
    #[arg(long, default_value_t = PAGE_SIZE_OPTIONS[0])]
    page_size: usize,

    /// Match the search text case-sensitively
    #[arg(long)]
    case_sensitive: bool,

    /// Title of the RELATIONSHIP column
    #[arg(long, default_value = RELATIONSHIP_FIELD)]
    relationship_label: String,

    /// Maximum width of a column in characters
    #[arg(long, default_value_t = 30)]
    max_column_width: usize,

    /// Event poll timeout in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Log file, defaults to tenant-grid.log in the temp directory
    #[arg(long)]
    log_file: Option<String>,

    /// Log filter, RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> GridConfig {
        let search_mode = if self.case_sensitive {
            SearchMode::CaseSensitive
        } else {
            SearchMode::IgnoreCase
        };
        GridConfig::default()
            .with_page_size(self.page_size.max(1))
            .with_search_mode(search_mode)
            .with_relationship_label(self.relationship_label.as_str())
            .with_max_column_width(self.max_column_width.max(4))
            .with_event_poll_time(self.poll_ms)
    }
}

fn expand_path(path: &str) -> Result<PathBuf, GridError> {
    shellexpand::full(path)
        .map(|p| PathBuf::from(p.as_ref()))
        .map_err(|e| GridError::LoadingFailed(e.to_string()))
}

// The terminal belongs to the ui, so logs go to a file.
fn init_logging(args: &Args) -> Result<PathBuf, GridError> {
    let path = match &args.log_file {
        Some(p) => expand_path(p)?,
        None => std::env::temp_dir().join("tenant-grid.log"),
    };
    let file = File::create(&path)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .with(ErrorLayer::default())
        .init();
    Ok(path)
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Err(e) => {
            error!("Exiting with error: {e:?}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn run(args: &Args) -> Result<(), GridError> {
    let log_path = init_logging(args)?;
    let cfg = args.config();
    info!("Starting tenant-grid, logging to {log_path:?}, {cfg:?}");

    let (file_info, loaded) = loader::load_records(expand_path(&args.path)?)?;

    let mut terminal = ratatui::init();
    let result = event_loop(&mut terminal, &cfg, file_info.name(), loaded);
    ratatui::restore();
    info!("Bye");
    result
}

fn event_loop(
    terminal: &mut DefaultTerminal,
    cfg: &GridConfig,
    name: String,
    loaded: Loaded,
) -> Result<(), GridError> {
    let size = terminal.size()?;
    let mut model = Model::init(
        cfg,
        name,
        loaded.records,
        loaded.skipped.len(),
        size.width as usize,
        size.height as usize,
    );
    let mut ui = TableUI::new();
    let controller = Controller::new(cfg);

    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(&model, f))?;

        // Handle events and map to a Message
        let message = controller.handle_event(&model)?;
        model.update(message)?;
    }
    Ok(())
}
