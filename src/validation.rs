use crate::config::UploadConfig;
use crate::models::{FileCandidate, ValidationResult};
use regex::Regex;

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// The subset of the upload configuration that decides whether a file is accepted.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRules<'a> {
    pub max_file_size: Option<u64>,
    pub allowed_types: &'a [String],
}

impl<'a> From<&'a UploadConfig> for ValidationRules<'a> {
    fn from(config: &'a UploadConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            allowed_types: &config.allowed_types,
        }
    }
}

/// Formats a byte count as `1.5 MB`, base 1024, at most two decimals.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, SIZE_UNITS[unit])
}

pub fn validate_file_size(size: u64, max_size: u64) -> bool {
    size <= max_size
}

/// Checks `name`/`mime_type` against the allowed patterns. An empty list accepts everything.
///
/// Patterns are `.ext` (case-insensitive suffix of the name), `category/*`
/// (wildcard over the MIME type) or an exact MIME type.
pub fn validate_file_type(name: &str, mime_type: &str, allowed_types: &[String]) -> bool {
    if allowed_types.is_empty() {
        return true;
    }

    allowed_types.iter().any(|pattern| {
        if pattern.starts_with('.') {
            name.to_lowercase().ends_with(&pattern.to_lowercase())
        } else if pattern.contains('*') {
            wildcard_match(pattern, mime_type)
        } else {
            mime_type == pattern
        }
    })
}

pub fn validate_file(file: &FileCandidate, rules: ValidationRules<'_>) -> ValidationResult {
    let mut errors = Vec::new();

    if let Some(max) = rules.max_file_size {
        if !validate_file_size(file.size, max) {
            errors.push(format!("File size cannot exceed {}", format_file_size(max)));
        }
    }

    if !validate_file_type(&file.name, &file.mime_type, rules.allowed_types) {
        errors.push(format!(
            "Unsupported file type, allowed: {}",
            rules.allowed_types.join(", ")
        ));
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

// `*` matches any run of characters, everything else matches literally.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let body: Vec<String> = pattern.split('*').map(regex::escape).collect();
    match Regex::new(&format!("(?i)^{}$", body.join(".*"))) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}
