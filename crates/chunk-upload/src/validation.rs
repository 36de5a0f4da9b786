//! Client-side checks run before anything touches the network

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ValidationError;

pub const MAX_NAME_LENGTH: usize = 255;

/// Upload limits enforced on the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadPolicy {
    pub max_file_size: u64,
    pub max_files_count: usize,
    /// Exact types or `type/*` wildcards. Empty allows everything.
    pub allowed_types: Vec<String>,
    /// Checked after `allowed_types`; a match here always rejects
    pub disallowed_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size: 500 * 1024 * 1024,
            max_files_count: 100,
            allowed_types: [
                "image/*",
                "video/*",
                "audio/*",
                "text/*",
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "application/zip",
                "application/x-zip-compressed",
                "application/x-rar-compressed",
                "application/x-7z-compressed",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            disallowed_types: vec!["application/pdf".to_string()],
        }
    }
}

/// Name, size and type of a candidate file
#[derive(Debug, Clone, Copy)]
pub struct FileCandidate<'a> {
    pub name: &'a str,
    pub size: u64,
    pub mime_type: &'a str,
}

impl UploadPolicy {
    pub fn max_total_size(&self) -> u64 {
        self.max_file_size
            .saturating_mul(self.max_files_count as u64)
    }

    pub fn validate_file(&self, file: &FileCandidate<'_>) -> Result<(), ValidationError> {
        if file.name.trim().is_empty() || file.name.chars().count() > MAX_NAME_LENGTH {
            return Err(ValidationError::InvalidName {
                name: file.name.to_string(),
                max_len: MAX_NAME_LENGTH,
            });
        }

        if file.size > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                name: file.name.to_string(),
                limit: format_size(self.max_file_size),
            });
        }

        let allowed = self.allowed_types.is_empty()
            || self
                .allowed_types
                .iter()
                .any(|pattern| mime_matches(pattern, file.mime_type));
        let denied = self
            .disallowed_types
            .iter()
            .any(|pattern| mime_matches(pattern, file.mime_type));
        if !allowed || denied {
            return Err(ValidationError::DisallowedType {
                mime_type: file.mime_type.to_string(),
            });
        }

        Ok(())
    }

    /// Every batch rule, then every file
    pub fn validate_batch(&self, files: &[FileCandidate<'_>]) -> Result<(), ValidationError> {
        self.validate_batch_limits(files)?;
        files.iter().try_for_each(|file| self.validate_file(file))
    }

    /// Count, duplicate names and total size. Individual files are not checked.
    pub fn validate_batch_limits(&self, files: &[FileCandidate<'_>]) -> Result<(), ValidationError> {
        if files.is_empty() {
            return Err(ValidationError::Empty);
        }
        if files.len() > self.max_files_count {
            return Err(ValidationError::TooManyFiles {
                max: self.max_files_count,
            });
        }

        let mut names = HashSet::new();
        let mut total: u64 = 0;
        for file in files {
            if !names.insert(file.name) {
                return Err(ValidationError::DuplicateName {
                    name: file.name.to_string(),
                });
            }
            total = total.saturating_add(file.size);
            if total > self.max_total_size() {
                return Err(ValidationError::TotalTooLarge {
                    limit: format_size(self.max_total_size()),
                });
            }
        }
        Ok(())
    }
}

fn mime_matches(pattern: &str, mime_type: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) if pattern.ends_with("/*") => mime_type.starts_with(prefix),
        _ => pattern == mime_type,
    }
}

/// Human readable size with binary units, e.g. `500 MB`, `1.5 GB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 || value.fract() == 0.0 {
        format!("{} {}", value as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
