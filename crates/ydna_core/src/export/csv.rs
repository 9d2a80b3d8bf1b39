//! CSV export of profiles with haplogroups, and CSV import of assignments.
//!
//! # Responsibility
//! - Write profile rows with RFC 4180 quoting.
//! - Read `(geni_profile_id|profile_id, haplogroup, source)` rows and append
//!   them as tested assignments without any traversal.
//! - Name full-tree exports deterministically from the root profile.
//!
//! # Invariants
//! - Import never fetches or links profiles; it only appends assignments.
//! - Rows with a blank or malformed profile id or haplogroup are skipped and
//!   reported by line number.

use crate::model::haplogroup::{HaplogroupAssignment, NewAssignment};
use crate::model::profile::{normalize_profile_id, Profile, ProfileId};
use crate::repo::store::{ExportRecord, LocalStore, StoreError};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

pub const DEFAULT_IMPORT_SOURCE: &str = "imported";

pub const EXPORT_HEADER: [&str; 10] = [
    "geni_profile_id",
    "display_name",
    "first_name",
    "last_name",
    "gender",
    "birth_date",
    "death_date",
    "generation",
    "haplogroup",
    "haplogroup_source",
];

static FILE_NAME_STRIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s-]").expect("file name pattern is valid"));

#[derive(Debug)]
pub enum CsvError {
    Io(std::io::Error),
    /// Header lacks a required column.
    MissingColumn(&'static str),
    /// Unterminated quoted field starting on `line`.
    Malformed { line: usize },
    Store(StoreError),
}

impl Display for CsvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::MissingColumn(column) => write!(f, "CSV header has no `{column}` column"),
            Self::Malformed { line } => {
                write!(f, "unterminated quoted field starting on line {line}")
            }
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CsvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CsvError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<StoreError> for CsvError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// One exported profile line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportRow {
    pub profile_id: ProfileId,
    pub display_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
    pub generation: Option<u32>,
    pub haplogroup: Option<String>,
    pub haplogroup_source: Option<String>,
}

impl ExportRow {
    pub fn new(
        profile_id: &str,
        profile: Option<&Profile>,
        generation: Option<u32>,
        assignment: Option<&HaplogroupAssignment>,
    ) -> Self {
        let mut row = Self {
            profile_id: profile_id.to_string(),
            generation,
            haplogroup: assignment.map(|a| a.haplogroup.clone()),
            haplogroup_source: assignment.map(|a| a.source.clone()),
            ..Self::default()
        };
        if let Some(profile) = profile {
            row.display_name = profile.label();
            row.first_name = profile.first_name.clone();
            row.last_name = profile.last_name.clone();
            row.gender = Some(profile.gender.as_str().to_string());
            row.birth_date = profile.birth_date.clone();
            row.death_date = profile.death_date.clone();
        }
        row
    }

    fn fields(&self) -> [Cow<'_, str>; 10] {
        let opt = |value: &Option<String>| Cow::Owned(value.clone().unwrap_or_default());
        [
            Cow::Borrowed(self.profile_id.as_str()),
            Cow::Borrowed(self.display_name.as_str()),
            opt(&self.first_name),
            opt(&self.last_name),
            opt(&self.gender),
            opt(&self.birth_date),
            opt(&self.death_date),
            Cow::Owned(self.generation.map(|g| g.to_string()).unwrap_or_default()),
            opt(&self.haplogroup),
            opt(&self.haplogroup_source),
        ]
    }
}

/// Rows for stored assignment records, one per assignment.
pub fn rows_from_records(records: &[ExportRecord]) -> Vec<ExportRow> {
    records
        .iter()
        .map(|record| {
            ExportRow::new(
                &record.assignment.profile_id,
                record.profile.as_ref(),
                None,
                Some(&record.assignment),
            )
        })
        .collect()
}

/// Rows for visited profiles, each with its latest assignment.
///
/// With `haplogroup_prefix`, only assignments whose haplogroup starts with
/// it are considered.
pub fn rows_for_profiles<S, I>(
    store: &S,
    visits: I,
    haplogroup_prefix: Option<&str>,
) -> Result<Vec<ExportRow>, CsvError>
where
    S: LocalStore,
    I: IntoIterator<Item = (ProfileId, Option<u32>)>,
{
    let mut rows = Vec::new();
    for (profile_id, generation) in visits {
        let profile = store.get_profile(&profile_id)?;
        let assignments = store.get_assignments(&profile_id)?;
        let latest = assignments.iter().rev().find(|assignment| {
            haplogroup_prefix
                .map(|prefix| assignment.haplogroup.starts_with(prefix.trim()))
                .unwrap_or(true)
        });
        rows.push(ExportRow::new(&profile_id, profile.as_ref(), generation, latest));
    }
    Ok(rows)
}

/// Writes the header and `rows`.
pub fn write_rows<W: Write>(writer: W, rows: &[ExportRow]) -> Result<(), CsvError> {
    let mut writer = BufWriter::new(writer);
    write_record(&mut writer, EXPORT_HEADER.iter().map(|column| Cow::Borrowed(*column)))?;
    for row in rows {
        write_record(&mut writer, row.fields())?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes rows to `path`, replacing any existing file.
pub fn write_rows_to_path(path: &Path, rows: &[ExportRow]) -> Result<(), CsvError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_rows(File::create(path)?, rows)?;
    info!(
        "event=csv_export module=export status=ok rows={} path={}",
        rows.len(),
        path.display()
    );
    Ok(())
}

fn write_record<'a, W, I>(writer: &mut W, fields: I) -> std::io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = Cow<'a, str>>,
{
    let mut first = true;
    for field in fields {
        if !first {
            writer.write_all(b",")?;
        }
        first = false;
        writer.write_all(escape_field(&field).as_bytes())?;
    }
    writer.write_all(b"\r\n")
}

/// Quotes a field when it contains a comma, quote or line break.
pub fn escape_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// One assignment read from an import file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    /// 1-based line where the record starts.
    pub line: usize,
    pub profile_id: ProfileId,
    pub haplogroup: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportBatch {
    pub rows: Vec<ImportRow>,
    /// Lines skipped for a blank or malformed profile id or haplogroup.
    pub skipped_lines: Vec<usize>,
}

/// Reads an assignment import file.
///
/// The header must name `geni_profile_id` or `profile_id`, and `haplogroup`;
/// `source` is optional and defaults to `imported`.
pub fn read_assignment_rows<R: Read>(mut reader: R) -> Result<ImportBatch, CsvError> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

    let mut records = parse_records(content)?.into_iter();
    let Some((_, header)) = records.next() else {
        return Err(CsvError::MissingColumn("profile_id"));
    };
    let column = |name: &str| {
        header
            .iter()
            .position(|field| field.trim().eq_ignore_ascii_case(name))
    };
    let id_column = column("geni_profile_id")
        .or_else(|| column("profile_id"))
        .ok_or(CsvError::MissingColumn("profile_id"))?;
    let haplogroup_column = column("haplogroup").ok_or(CsvError::MissingColumn("haplogroup"))?;
    let source_column = column("source");

    let mut batch = ImportBatch::default();
    for (line, fields) in records {
        if fields.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let field = |index: usize| fields.get(index).map(|value| value.trim()).unwrap_or("");
        let haplogroup = field(haplogroup_column);
        let profile_id = match normalize_profile_id(field(id_column)) {
            Ok(profile_id) if !haplogroup.is_empty() => profile_id,
            _ => {
                batch.skipped_lines.push(line);
                continue;
            }
        };
        let source = source_column
            .map(field)
            .filter(|source| !source.is_empty())
            .unwrap_or(DEFAULT_IMPORT_SOURCE);
        batch.rows.push(ImportRow {
            line,
            profile_id,
            haplogroup: haplogroup.to_string(),
            source: source.to_string(),
        });
    }
    Ok(batch)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Lines rejected by parsing or assignment validation.
    pub skipped_lines: Vec<usize>,
}

/// Appends every row of `batch` as a tested assignment.
pub fn import_assignments<S: LocalStore>(
    store: &S,
    batch: &ImportBatch,
) -> Result<ImportSummary, CsvError> {
    let mut summary = ImportSummary {
        imported: 0,
        skipped_lines: batch.skipped_lines.clone(),
    };
    for row in &batch.rows {
        let profile_id = store.resolve_alias(&row.profile_id)?;
        let assignment =
            NewAssignment::tested(profile_id, row.haplogroup.as_str(), row.source.as_str());
        match store.put_assignment(&assignment) {
            Ok(_) => summary.imported += 1,
            Err(StoreError::Assignment(err)) => {
                warn!(
                    "event=csv_import module=export status=skipped line={} reason={}",
                    row.line, err
                );
                summary.skipped_lines.push(row.line);
            }
            Err(err) => return Err(err.into()),
        }
    }
    summary.skipped_lines.sort_unstable();
    info!(
        "event=csv_import module=export status=ok imported={} skipped={}",
        summary.imported,
        summary.skipped_lines.len()
    );
    Ok(summary)
}

/// `tree_<haplogroup>_<clean root name>_<root numeric id>_<timestamp>.csv`.
///
/// `timestamp` is expected as `YYYYmmdd_HHMMSS`.
pub fn tree_file_name(haplogroup: &str, root: &Profile, timestamp: &str) -> String {
    let label = root.label();
    let clean_name = FILE_NAME_STRIP_RE
        .replace_all(&label, "")
        .trim()
        .replace(' ', "_");
    let haplogroup = haplogroup.trim().replace(['/', '\\'], "_");
    format!(
        "tree_{haplogroup}_{clean_name}_{}_{timestamp}.csv",
        root.short_id()
    )
}

/// Splits CSV text into records of fields, keyed by starting line.
fn parse_records(content: &str) -> Result<Vec<(usize, Vec<String>)>, CsvError> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut quote_line = 1;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(ch);
                }
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => {
                in_quotes = true;
                quote_line = line;
            }
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                fields.push(std::mem::take(&mut field));
                records.push((record_line, std::mem::take(&mut fields)));
                line += 1;
                record_line = line;
            }
            _ => field.push(ch),
        }
    }

    if in_quotes {
        return Err(CsvError::Malformed { line: quote_line });
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push((record_line, fields));
    }
    Ok(records)
}
