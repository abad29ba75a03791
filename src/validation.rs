use std::path::Path;

use thiserror::Error;

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "png", "jpg", "jpeg", "txt",
];

const MAX_CODE_SEGMENT_LEN: usize = 10;
pub const MAX_CODE_LEN: usize = 50;
pub const MAX_FILE_NAME_LEN: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("code '{0}' must be uppercase segments separated by '-', e.g. PR-GC-01")]
    MalformedCode(String),
    #[error("file must not be empty")]
    EmptyFile,
    #[error("file is {size} bytes; the limit is {limit} bytes")]
    FileTooLarge { size: usize, limit: usize },
    #[error("file type '{0}' is not allowed")]
    UnsupportedFileType(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

pub fn required(field: &'static str, value: Option<&str>) -> ValidationResult<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ValidationError::Required { field })
}

pub fn max_len(field: &'static str, value: &str, max: usize) -> ValidationResult<()> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// Normalises a document code such as `pr-gc-01` to `PR-GC-01`.
///
/// At least two segments, the first alphabetic, each made of ascii letters
/// and digits.
pub fn normalize_code(raw: &str) -> ValidationResult<String> {
    let code = raw.trim().to_ascii_uppercase();
    max_len("code", &code, MAX_CODE_LEN)?;
    let segments: Vec<&str> = code.split('-').collect();

    let well_formed = segments.len() >= 2
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= MAX_CODE_SEGMENT_LEN
                && segment.chars().all(|ch| ch.is_ascii_alphanumeric())
        })
        && segments[0].chars().all(|ch| ch.is_ascii_alphabetic());

    if well_formed {
        Ok(code)
    } else {
        Err(ValidationError::MalformedCode(raw.trim().to_string()))
    }
}

pub struct CheckedUpload {
    pub file_name: String,
    pub content_type: String,
}

/// Validates an uploaded file before anything is stored.
pub fn check_upload(file_name: &str, size: usize, limit: usize) -> ValidationResult<CheckedUpload> {
    let file_name = sanitize_file_name(file_name);
    if file_name.is_empty() {
        return Err(ValidationError::Required { field: "file name" });
    }
    max_len("file name", &file_name, MAX_FILE_NAME_LEN)?;
    if size == 0 {
        return Err(ValidationError::EmptyFile);
    }
    if size > limit {
        return Err(ValidationError::FileTooLarge { size, limit });
    }

    let extension = Path::new(&file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ValidationError::UnsupportedFileType(extension));
    }

    let content_type = mime_guess::from_path(&file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    Ok(CheckedUpload {
        file_name,
        content_type,
    })
}

/// Strips directory components and characters unsafe in object keys.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    base.trim()
        .chars()
        .map(|ch| match ch {
            ch if ch.is_alphanumeric() => ch,
            '.' | '-' | '_' => ch,
            _ => '_',
        })
        .collect()
}
