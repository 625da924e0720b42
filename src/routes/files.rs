//! Multipart CSV uploads and binary responses (export downloads, the
//! tracking pixel).

use std::io::Cursor;
use std::path::PathBuf;

use rocket::fs::{NamedFile, TempFile};
use rocket::http::ContentType;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::export::ExportDownload;

const ACCEPTED_CSV_TYPES: &[(&str, &str)] = &[
    ("text", "csv"),
    ("text", "plain"),
    ("application", "vnd.ms-excel"),
];

/// CSV by declared type, or by extension when the client sent a generic type.
pub fn is_accepted_csv(content_type: Option<&ContentType>, file_name: &str) -> bool {
    let by_type = content_type.is_some_and(|ct| {
        ACCEPTED_CSV_TYPES
            .iter()
            .any(|(top, sub)| ct.top() == *top && ct.sub() == *sub)
    });
    by_type || file_name.to_ascii_lowercase().ends_with(".csv")
}

/// Client-supplied file name without any directory part.
pub fn display_name(raw: Option<&str>) -> String {
    raw.and_then(|name| name.rsplit(|c| c == '/' || c == '\\').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("upload.csv")
        .to_string()
}

/// Validate an uploaded file and return its display name.
pub fn check_upload(file: &TempFile<'_>, max_bytes: u64) -> Result<String, ApiError> {
    let name = display_name(
        file.raw_name()
            .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str()),
    );

    if file.len() == 0 {
        return Err(ApiError::BadRequest("Uploaded file is empty".into()));
    }
    if file.len() > max_bytes {
        return Err(ApiError::BadRequest(format!(
            "File exceeds the upload limit of {} bytes",
            max_bytes
        )));
    }
    if !is_accepted_csv(file.content_type(), &name) {
        return Err(ApiError::BadRequest("Only CSV files are accepted".into()));
    }
    Ok(name)
}

pub struct StoredUpload {
    pub file_name: String,
    pub original_file_name: String,
    pub path: PathBuf,
}

/// Persist an upload as `<storage>/imports/<uuid>.csv`.
pub async fn store_csv(
    file: &mut TempFile<'_>,
    config: &AppConfig,
) -> Result<StoredUpload, ApiError> {
    let original_file_name = check_upload(file, config.max_upload_bytes)?;
    let file_name = format!("{}.csv", Uuid::new_v4());
    let path = config.import_dir().join(&file_name);

    file.move_copy_to(&path)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to store upload: {}", e)))?;

    log::debug!("stored upload '{}' as {}", original_file_name, path.display());
    Ok(StoredUpload {
        file_name,
        original_file_name,
        path,
    })
}

pub fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .filter(|c| !matches!(c, '"' | '\\' | '\r' | '\n'))
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

/// A file sent as an attachment.
pub struct FileDownload {
    file: NamedFile,
    file_name: String,
    content_type: ContentType,
}

impl FileDownload {
    pub async fn open(download: ExportDownload) -> Result<Self, ApiError> {
        let file = NamedFile::open(&download.path)
            .await
            .map_err(|_| ApiError::NotFound("Export file not found".into()))?;
        let content_type =
            ContentType::parse_flexible(download.content_type).unwrap_or(ContentType::Binary);
        Ok(Self {
            file,
            file_name: download.file_name,
            content_type,
        })
    }
}

impl<'r> Responder<'r, 'static> for FileDownload {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let disposition = content_disposition(&self.file_name);
        Response::build_from(self.file.respond_to(request)?)
            .header(self.content_type)
            .raw_header("Content-Disposition", disposition)
            .ok()
    }
}

/// Uncacheable 1x1 GIF.
pub struct Pixel(pub &'static [u8]);

impl<'r> Responder<'r, 'static> for Pixel {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        Response::build()
            .header(ContentType::GIF)
            .raw_header("Cache-Control", "no-store, no-cache, must-revalidate")
            .sized_body(self.0.len(), Cursor::new(self.0))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_csv_by_type_or_extension() {
        assert!(is_accepted_csv(Some(&ContentType::CSV), "list"));
        assert!(is_accepted_csv(Some(&ContentType::Plain), "list.txt"));
        assert!(is_accepted_csv(
            ContentType::parse_flexible("application/vnd.ms-excel").as_ref(),
            "x"
        ));
        assert!(is_accepted_csv(Some(&ContentType::Binary), "Contacts.CSV"));
        assert!(!is_accepted_csv(Some(&ContentType::PNG), "photo.png"));
        assert!(!is_accepted_csv(None, "notes"));
    }

    #[test]
    fn display_name_drops_directories() {
        assert_eq!(display_name(Some("C:\\Users\\me\\list.csv")), "list.csv");
        assert_eq!(display_name(Some("../../etc/passwd")), "passwd");
        assert_eq!(display_name(Some("  ")), "upload.csv");
        assert_eq!(display_name(None), "upload.csv");
    }

    #[test]
    fn disposition_strips_quotes() {
        assert_eq!(
            content_disposition("a\"b.csv"),
            "attachment; filename=\"ab.csv\""
        );
    }
}
