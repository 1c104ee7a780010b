use std::fmt;
use std::io::Error;

use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;

pub const TENANT_FIELD: &str = "TENANT_ID";
pub const RELATIONSHIP_FIELD: &str = "RELATIONSHIP";
pub const UNKNOWN_TENANT: &str = "Unknown";
/// A record field of this name is replaced by the synthetic row key.
pub const KEY_FIELD: &str = "key";

pub const PAGE_SIZE_OPTIONS: [usize; 4] = [10, 20, 50, 100];

pub const HELP_TEXT: &str = "
  Navigation
    ↑ ↓ / k j        Move between rows
    ← → / h l        Select column
    Enter / Space    Expand or collapse tenant
    e / c            Expand / collapse all tenants on page

  Pages
    PgDn / n         Next page
    PgUp / p         Previous page
    Home / g         First page
    End / G          Last page
    + / -            Larger / smaller page size

  Search & filter
    /                Search (Enter keeps, Esc clears)
    s                Toggle sort: asc, desc, off
    f                Filter menu for column
                     (Space select, Enter apply, r reset)

  Other
    y / Y            Copy cell / row
    ?                Help
    Esc              Close popup
    q                Quit
";

// Errors that can stop the viewer before or while it starts up.
#[derive(Debug)]
pub enum GridError {
    IoError(Error),
    PolarsError(PolarsError),
    JsonError(serde_json::Error),
    LoadingFailed(String),
    FileNotFound,
    PermissionDenied,
    UnknownFileType,
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::IoError(e) => write!(f, "io error: {e}"),
            GridError::PolarsError(e) => write!(f, "could not read table: {e}"),
            GridError::JsonError(e) => write!(f, "invalid json: {e}"),
            GridError::LoadingFailed(msg) => write!(f, "loading failed: {msg}"),
            GridError::FileNotFound => write!(f, "file not found"),
            GridError::PermissionDenied => write!(f, "permission denied"),
            GridError::UnknownFileType => {
                write!(f, "unknown file type (expected json, csv, parquet or arrow)")
            }
        }
    }
}

impl std::error::Error for GridError {}

impl From<Error> for GridError {
    fn from(err: Error) -> Self {
        GridError::IoError(err)
    }
}

impl From<PolarsError> for GridError {
    fn from(err: PolarsError) -> Self {
        GridError::PolarsError(err)
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::JsonError(err)
    }
}

/// How the search query is compared against record values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Query and values are both lower-cased before matching.
    #[default]
    IgnoreCase,
    CaseSensitive,
}

#[derive(Debug, Clone, Setters)]
#[setters(prefix = "with_")]
pub struct GridConfig {
    pub event_poll_time: u64,
    pub max_column_width: usize,
    pub page_size: usize,
    pub search_mode: SearchMode,
    #[setters(into)]
    pub relationship_label: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            event_poll_time: 100,
            max_column_width: 30,
            page_size: PAGE_SIZE_OPTIONS[0],
            search_mode: SearchMode::IgnoreCase,
            relationship_label: RELATIONSHIP_FIELD.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    ExpandAll,
    CollapseAll,
    NextPage,
    PrevPage,
    FirstPage,
    LastPage,
    GrowPageSize,
    ShrinkPageSize,
    Search,
    ToggleSort,
    Filter,
    ToggleSelection,
    ResetFilter,
    CopyCell,
    CopyRow,
    Help,
    Enter,
    Exit,
    Resize(usize, usize),
    RawKey(KeyEvent),
}
