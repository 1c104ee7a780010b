use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::domain::GridError;
use crate::record::{Record, Value};

#[derive(Debug, PartialEq)]
enum FileType {
    JSON,
    CSV,
    PARQUET,
    ARROW,
}

#[derive(Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub file_size: u64,
    file_type: FileType,
}

impl FileInfo {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("???")
            .to_string()
    }
}

/// Records read from a file, plus the positions of json elements that were not objects.
#[derive(Debug, Default)]
pub struct Loaded {
    pub records: Vec<Record>,
    pub skipped: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColumnKind {
    Text,
    Integer,
    Unsigned,
    Float,
}

impl ColumnKind {
    fn of(dtype: &DataType) -> Self {
        match dtype {
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                ColumnKind::Integer
            }
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
                ColumnKind::Unsigned
            }
            DataType::Float32 | DataType::Float64 => ColumnKind::Float,
            _ => ColumnKind::Text,
        }
    }

    // Integers are parsed exactly, a text value is kept when parsing fails.
    fn value(self, s: &str) -> Value {
        let parsed = match self {
            ColumnKind::Text => None,
            ColumnKind::Integer => s.parse().ok().map(Value::Integer),
            ColumnKind::Unsigned => s.parse().ok().map(Value::Unsigned),
            ColumnKind::Float => s.parse().ok().map(Value::Number),
        };
        parsed.unwrap_or_else(|| Value::Text(s.to_string()))
    }
}

// One loaded column of a tabular file, `None` marks a null cell.
struct Column {
    name: String,
    kind: ColumnKind,
    data: Vec<Option<String>>,
}

#[instrument(skip_all, fields(path = ?path))]
pub fn load_records(path: PathBuf) -> Result<(FileInfo, Loaded), GridError> {
    let file_info = get_file_info(path)?;
    let start_time = Instant::now();
    let loaded = match file_info.file_type {
        FileType::JSON => parse_json(&fs::read_to_string(&file_info.path)?)?,
        FileType::CSV => Loaded::from(records_from_frame(load_csv(&file_info.path)?)?),
        FileType::PARQUET => Loaded::from(records_from_frame(load_parquet(&file_info.path)?)?),
        FileType::ARROW => Loaded::from(records_from_frame(load_arrow(&file_info.path)?)?),
    };
    info!(
        "Loaded {} records ({} bytes, {} skipped) from {:?} in {}ms",
        loaded.records.len(),
        file_info.file_size,
        loaded.skipped.len(),
        file_info.path,
        start_time.elapsed().as_millis()
    );
    Ok((file_info, loaded))
}

impl From<Vec<Record>> for Loaded {
    fn from(records: Vec<Record>) -> Self {
        Loaded {
            records,
            skipped: Vec::new(),
        }
    }
}

/// Parses a json array of flat objects. Elements that are not objects are skipped.
pub fn parse_json(content: &str) -> Result<Loaded, GridError> {
    let serde_json::Value::Array(items) = serde_json::from_str(content)? else {
        return Err(GridError::LoadingFailed(
            "expected a json array of objects".into(),
        ));
    };

    let mut loaded = Loaded {
        records: Vec::with_capacity(items.len()),
        skipped: Vec::new(),
    };
    for (idx, item) in items.into_iter().enumerate() {
        match item {
            serde_json::Value::Object(map) => loaded.records.push(Record::from_json(map)),
            other => {
                warn!("Skipping element {idx}, not an object: {other}");
                loaded.skipped.push(idx);
            }
        }
    }
    Ok(loaded)
}

fn detect_file_type(path: &Path) -> Result<FileType, GridError> {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_uppercase())
        .as_deref()
    {
        Some("JSON") => Ok(FileType::JSON),
        Some("CSV") => Ok(FileType::CSV),
        Some("PARQUET") | Some("PQ") => Ok(FileType::PARQUET),
        Some("ARROW") | Some("IPC") | Some("FEATHER") => Ok(FileType::ARROW),
        _ => Err(GridError::UnknownFileType),
    }
}

fn get_file_info(path: PathBuf) -> Result<FileInfo, GridError> {
    let metadata = fs::metadata(&path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => GridError::FileNotFound,
        ErrorKind::PermissionDenied => GridError::PermissionDenied,
        _ => GridError::IoError(e),
    })?;
    if !metadata.is_file() {
        return Err(GridError::LoadingFailed("Not a file!".into()));
    }

    let file_type = detect_file_type(&path)?;
    Ok(FileInfo {
        path,
        file_size: metadata.len(),
        file_type,
    })
}

fn load_column(df: &DataFrame, col_name: &str) -> Result<Column, PolarsError> {
    let kind = ColumnKind::of(df.column(col_name)?.dtype());
    let col = df.column(col_name)?.cast(&DataType::String)?;
    let data = col.str()?.into_iter().map(|v| v.map(str::to_string)).collect();
    Ok(Column {
        name: col_name.to_string(),
        kind,
        data,
    })
}

// Columns are converted in parallel, then zipped row by row into records.
fn records_from_frame(frame: LazyFrame) -> Result<Vec<Record>, GridError> {
    let df = Arc::new(frame.collect()?);
    let columns: Vec<Column> = df
        .get_column_names()
        .par_iter()
        .map(|name| load_column(&df, name))
        .collect::<Result<_, _>>()?;
    debug!("Loaded {} columns with {} rows", columns.len(), df.height());

    let records = (0..df.height())
        .map(|row| {
            Record::from_pairs(columns.iter().map(|c| {
                let value = match &c.data[row] {
                    None => Value::Absent,
                    Some(s) => c.kind.value(s),
                };
                (c.name.as_str(), value)
            }))
        })
        .collect();
    Ok(records)
}

fn load_csv(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyCsvReader::new(PlPath::Local(path.into()))
        .with_has_header(true)
        .finish()
}

fn load_parquet(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyFrame::scan_parquet(PlPath::Local(path.into()), ScanArgsParquet::default())
}

fn load_arrow(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyFrame::scan_ipc(
        PlPath::Local(path.into()),
        polars::io::ipc::IpcScanOptions,
        UnifiedScanArgs::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn loads_json_fixture_in_field_order() {
        let (info, loaded) = load_records(fixture("tenants.json")).unwrap();
        let records = loaded.records;
        assert_eq!(info.name(), "tenants.json");
        assert_eq!(records.len(), 7);
        let names: Vec<&str> = records[0].field_names().collect();
        assert_eq!(names, vec!["TENANT_ID", "RELATIONSHIP", "USER_NAME", "ROLE", "SEATS"]);
        assert_eq!(records[0].text("SEATS"), "5");
    }

    #[test]
    fn loads_csv_fixture() {
        let (_, loaded) = load_records(fixture("tenants.csv")).unwrap();
        let records = loaded.records;
        assert_eq!(records.len(), 4);
        assert!(loaded.skipped.is_empty());
        assert_eq!(records[0].text("TENANT_ID"), "acme");
        assert_eq!(records[1].get("SEATS"), Some(&Value::Integer(3)));
        // Empty csv cells are nulls
        assert_eq!(records[3].get("TENANT_ID"), Some(&Value::Absent));
    }

    #[test]
    fn json_must_be_an_array() {
        assert!(matches!(
            parse_json(r#"{"TENANT_ID": "T1"}"#),
            Err(GridError::LoadingFailed(_))
        ));
        assert!(matches!(parse_json("[1,"), Err(GridError::JsonError(_))));
    }

    #[test]
    fn non_object_elements_are_skipped() {
        let loaded = parse_json(r#"[{"A": 1}, 2, "x", {"A": null}]"#).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.skipped, vec![1, 2]);
        let empty = parse_json("[]").unwrap();
        assert!(empty.records.is_empty() && empty.skipped.is_empty());
    }

    #[test]
    fn large_integer_ids_keep_tenants_apart() {
        let (_, loaded) = load_records(fixture("large_ids.csv")).unwrap();
        let ids: Vec<String> = loaded.records.iter().map(|r| r.text("TENANT_ID")).collect();
        assert_eq!(ids, vec!["9007199254740993", "9007199254740992"]);

        let keys: Vec<String> = crate::grouping::group(&loaded.records)
            .into_iter()
            .map(|g| g.key)
            .collect();
        assert_eq!(keys, vec!["9007199254740993", "9007199254740992"]);
    }

    #[test]
    fn column_kinds_parse_exactly() {
        assert_eq!(
            ColumnKind::Integer.value("-9007199254740993"),
            Value::Integer(-9007199254740993)
        );
        assert_eq!(
            ColumnKind::Unsigned.value("18446744073709551615"),
            Value::Unsigned(u64::MAX)
        );
        assert_eq!(ColumnKind::Float.value("2.5"), Value::Number(2.5));
        assert_eq!(ColumnKind::Text.value("42"), Value::Text("42".into()));
        assert_eq!(ColumnKind::of(&DataType::Int64), ColumnKind::Integer);
        assert_eq!(ColumnKind::of(&DataType::String), ColumnKind::Text);
    }

    #[test]
    fn rejects_unknown_files() {
        assert!(matches!(
            detect_file_type(Path::new("data.xlsx")),
            Err(GridError::UnknownFileType)
        ));
        assert_eq!(detect_file_type(Path::new("a.JSON")).unwrap(), FileType::JSON);
        assert!(matches!(
            load_records(fixture("does-not-exist.json")),
            Err(GridError::FileNotFound)
        ));
    }
}
