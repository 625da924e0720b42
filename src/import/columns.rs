//! CSV structure helpers: header detection, mapping validation, previews.

use csv::{ByteRecord, ReaderBuilder, StringRecord, Trim};
use regex::Regex;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::jobs::JobResult;

pub const CUSTOM_FIELD_PREFIX: &str = "custom.";
const MAX_REPORTED_ERRORS: usize = 20;

/// A subscriber attribute a CSV column can be mapped onto.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MappableField {
    pub key: String,
    pub label: String,
    pub required: bool,
}

const STANDARD_FIELDS: &[(&str, &str, bool)] = &[
    ("email", "Email address", true),
    ("firstName", "First name", false),
    ("lastName", "Last name", false),
    ("company", "Company", false),
    ("phone", "Phone", false),
    ("location", "Location", false),
];

pub fn mappable_fields() -> Vec<MappableField> {
    STANDARD_FIELDS
        .iter()
        .map(|(key, label, required)| MappableField {
            key: key.to_string(),
            label: label.to_string(),
            required: *required,
        })
        .collect()
}

/// Known field key or `custom.<name>`.
pub fn is_mappable(target: &str) -> bool {
    if STANDARD_FIELDS.iter().any(|(key, _, _)| *key == target) {
        return true;
    }
    target
        .strip_prefix(CUSTOM_FIELD_PREFIX)
        .is_some_and(|name| !name.trim().is_empty())
}

/// Check a `csvColumn -> field` mapping, optionally against the file headers.
pub fn validate_column_mapping(
    mapping: &BTreeMap<String, String>,
    headers: Option<&[String]>,
) -> Result<(), String> {
    if mapping.is_empty() {
        return Err("columnMapping is required".to_string());
    }

    let email_columns = mapping.values().filter(|field| *field == "email").count();
    match email_columns {
        0 => return Err("columnMapping must map a column to 'email'".to_string()),
        1 => {}
        _ => return Err("columnMapping maps more than one column to 'email'".to_string()),
    }

    for (column, field) in mapping {
        if !is_mappable(field) {
            return Err(format!("Unknown field '{}' for column '{}'", field, column));
        }
        if let Some(headers) = headers {
            if !headers.iter().any(|header| header == column) {
                return Err(format!("Column '{}' not found in file", column));
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MappingSuggestion {
    pub column: String,
    pub field: String,
    pub confidence: f64,
}

fn header_patterns() -> &'static [(&'static str, Vec<Regex>)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Vec<Regex>)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let build = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){}", p)).expect("static header pattern"))
                .collect()
        };
        vec![
            (
                "email",
                build(&[
                    r"^e?-?mail$",
                    r"^email.*address$",
                    r"^contact.*email$",
                    r"^user.*email$",
                    r"^subscriber.*email$",
                ]),
            ),
            (
                "firstName",
                build(&[r"^first.*name$", r"^fname$", r"^given.*name$", r"^forename$"]),
            ),
            (
                "lastName",
                build(&[r"^last.*name$", r"^lname$", r"^surname$", r"^family.*name$"]),
            ),
            (
                "phone",
                build(&[
                    r"^phone$",
                    r"^telephone$",
                    r"^mobile$",
                    r"^cell$",
                    r"^contact.*number$",
                ]),
            ),
            (
                "company",
                build(&[
                    r"^company$",
                    r"^organization$",
                    r"^org$",
                    r"^business$",
                    r"^employer$",
                ]),
            ),
            ("location", build(&[r"^location$", r"^city$", r"^country$", r"^address$"])),
        ]
    })
}

/// Suggest a field for a single header name.
pub fn suggest_field(header: &str) -> Option<&'static str> {
    let normalized = header.trim().replace(['_', ' '], "");
    header_patterns()
        .iter()
        .find(|(_, patterns)| {
            patterns
                .iter()
                .any(|p| p.is_match(header.trim()) || p.is_match(&normalized))
        })
        .map(|(field, _)| *field)
}

/// Suggest mappings for every header; each field is suggested at most once.
pub fn suggest_mapping(headers: &[String], samples: &[StringRecord]) -> Vec<MappingSuggestion> {
    let mut suggestions: Vec<MappingSuggestion> = Vec::new();

    for header in headers {
        if let Some(field) = suggest_field(header) {
            if suggestions.iter().all(|s| s.field != field) {
                suggestions.push(MappingSuggestion {
                    column: header.clone(),
                    field: field.to_string(),
                    confidence: 0.9,
                });
            }
        }
    }

    // Fall back to sniffing values when no header looks like an email column.
    if suggestions.iter().all(|s| s.field != "email") {
        for (index, header) in headers.iter().enumerate() {
            let values: Vec<&str> = samples
                .iter()
                .filter_map(|record| record.get(index))
                .filter(|value| !value.is_empty())
                .collect();
            if values.is_empty() {
                continue;
            }
            let matches = values
                .iter()
                .filter(|value| super::validation::is_valid_syntax(&value.to_lowercase()))
                .count();
            let ratio = matches as f64 / values.len() as f64;
            if ratio >= 0.8 {
                suggestions.push(MappingSuggestion {
                    column: header.clone(),
                    field: "email".to_string(),
                    confidence: (ratio * 0.8 * 100.0).round() / 100.0,
                });
                break;
            }
        }
    }

    suggestions
}

/// One data row. `row_number` counts data rows from 1 after the header and
/// keeps counting across blank and unreadable rows.
#[derive(Debug, Clone)]
pub struct CsvRow {
    pub row_number: i32,
    pub record: StringRecord,
    /// Why the row could not be read cleanly; its fields are then best effort.
    pub error: Option<String>,
}

/// Parsed CSV content: headers plus every non-blank data row.
pub struct CsvContent {
    pub headers: Vec<String>,
    pub rows: Vec<CsvRow>,
    pub errors: Vec<String>,
}

impl CsvContent {
    /// Rows that parsed cleanly.
    pub fn clean_records(&self) -> impl Iterator<Item = &StringRecord> {
        self.rows
            .iter()
            .filter(|row| row.error.is_none())
            .map(|row| &row.record)
    }
}

fn reader_for(path: &Path) -> JobResult<csv::Reader<std::fs::File>> {
    Ok(ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?)
}

fn clean_headers(record: &StringRecord) -> Vec<String> {
    record
        .iter()
        .enumerate()
        .map(|(index, header)| {
            let header = if index == 0 {
                header.trim_start_matches('\u{feff}')
            } else {
                header
            };
            header.trim().to_string()
        })
        .collect()
}

/// Read a whole CSV file. Malformed rows are kept with their error so the
/// caller can report them; only I/O failures are fatal.
pub fn read_csv(path: &Path) -> JobResult<CsvContent> {
    let mut reader = reader_for(path)?;
    let headers = clean_headers(reader.headers()?);

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    let mut row_number: i32 = 0;
    for result in reader.byte_records() {
        row_number += 1;
        let row = match result {
            Ok(bytes) => decode_row(bytes, row_number),
            Err(err) if matches!(err.kind(), csv::ErrorKind::Io(_)) => return Err(err.into()),
            Err(err) => CsvRow {
                row_number,
                record: StringRecord::new(),
                error: Some(format!("Row {}: {}", row_number, err)),
            },
        };

        match &row.error {
            None if row.record.iter().all(str::is_empty) => continue,
            Some(error) if errors.len() < MAX_REPORTED_ERRORS => errors.push(error.clone()),
            _ => {}
        }
        rows.push(row);
    }

    Ok(CsvContent {
        headers,
        rows,
        errors,
    })
}

fn decode_row(bytes: ByteRecord, row_number: i32) -> CsvRow {
    match StringRecord::from_byte_record(bytes) {
        Ok(record) => CsvRow {
            row_number,
            record,
            error: None,
        },
        Err(err) => CsvRow {
            row_number,
            record: err
                .into_byte_record()
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect(),
            error: Some(format!("Row {} is not valid UTF-8", row_number)),
        },
    }
}

/// Structure report returned by the pre-upload validation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CsvInspection {
    pub is_valid: bool,
    pub headers: Vec<String>,
    pub sample_data: Vec<BTreeMap<String, String>>,
    pub total_rows: usize,
    pub suggestions: Vec<MappingSuggestion>,
    pub errors: Vec<String>,
}

pub fn inspect_csv(path: &Path, sample_size: usize) -> JobResult<CsvInspection> {
    let content = read_csv(path)?;
    let mut errors = content.errors.clone();

    if content.headers.iter().all(|header| header.is_empty()) {
        errors.push("File has no header row".to_string());
    }

    let sample_records: Vec<StringRecord> =
        content.clean_records().take(sample_size).cloned().collect();
    let sample_data = sample_records
        .iter()
        .map(|record| row_to_map(&content.headers, record))
        .collect();
    let suggestions = suggest_mapping(&content.headers, &sample_records);

    Ok(CsvInspection {
        is_valid: errors.is_empty(),
        headers: content.headers,
        sample_data,
        total_rows: content.rows.len(),
        suggestions,
        errors,
    })
}

/// Pair each header with the record value in the same position.
pub fn row_to_map(headers: &[String], record: &StringRecord) -> BTreeMap<String, String> {
    headers
        .iter()
        .enumerate()
        .filter(|(_, header)| !header.is_empty())
        .map(|(index, header)| (header.clone(), record.get(index).unwrap_or("").to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn mapping_requires_an_email_column() {
        assert!(validate_column_mapping(&BTreeMap::new(), None).is_err());
        assert!(validate_column_mapping(&mapping(&[("Name", "firstName")]), None).is_err());
        assert!(validate_column_mapping(&mapping(&[("E-mail", "email")]), None).is_ok());
    }

    #[test]
    fn mapping_rejects_unknown_fields_and_missing_columns() {
        let bad_field = mapping(&[("Email", "email"), ("Age", "age")]);
        assert!(validate_column_mapping(&bad_field, None).is_err());

        let custom = mapping(&[("Email", "email"), ("Age", "custom.age")]);
        assert!(validate_column_mapping(&custom, None).is_ok());

        let headers = vec!["Email".to_string()];
        assert!(validate_column_mapping(&custom, Some(&headers)).is_err());
    }

    #[test]
    fn detects_common_header_names() {
        assert_eq!(suggest_field("E-mail"), Some("email"));
        assert_eq!(suggest_field("Email Address"), Some("email"));
        assert_eq!(suggest_field("first_name"), Some("firstName"));
        assert_eq!(suggest_field("Surname"), Some("lastName"));
        assert_eq!(suggest_field("Mobile"), Some("phone"));
        assert_eq!(suggest_field("Organization"), Some("company"));
        assert_eq!(suggest_field("Favourite colour"), None);
    }

    #[test]
    fn sniffs_email_column_from_values() {
        let headers = vec!["contact".to_string(), "who".to_string()];
        let samples = vec![
            StringRecord::from(vec!["a@example.com", "Ann"]),
            StringRecord::from(vec!["b@example.com", "Bob"]),
        ];
        let suggestions = suggest_mapping(&headers, &samples);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].column, "contact");
        assert_eq!(suggestions[0].field, "email");
    }

    #[test]
    fn inspects_csv_with_bom_and_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            "\u{feff}Email,First Name\njane@example.com,Jane\n,\nbob@example.com,Bob\n"
        )
        .expect("write csv");

        let inspection = inspect_csv(file.path(), 5).expect("inspect");
        assert!(inspection.is_valid);
        assert_eq!(inspection.headers, vec!["Email", "First Name"]);
        assert_eq!(inspection.total_rows, 2);
        assert_eq!(inspection.sample_data[0]["Email"], "jane@example.com");
        assert!(inspection
            .suggestions
            .iter()
            .any(|s| s.column == "Email" && s.field == "email"));
    }

    #[test]
    fn unreadable_rows_keep_their_slot() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"Email,Name\na@example.com,Ann\nb@example.com,B\xff\xfe\n,\nc@example.com,Cy\n")
            .expect("write csv");

        let content = read_csv(file.path()).expect("read");
        let numbers: Vec<i32> = content.rows.iter().map(|row| row.row_number).collect();
        assert_eq!(numbers, vec![1, 2, 4]);

        let broken = &content.rows[1];
        assert!(broken.error.as_deref().is_some_and(|e| e.contains("UTF-8")));
        assert_eq!(broken.record.get(0), Some("b@example.com"));
        assert_eq!(content.errors.len(), 1);
        assert_eq!(content.clean_records().count(), 2);
    }
}
