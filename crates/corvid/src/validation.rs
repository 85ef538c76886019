use tracing::debug;

use crate::{constants::MAX_COLLECTION_NAME_LEN, CorvidError, Result};

/// Windows reserved names that cannot be used as filenames.
/// Collection names become journal file names, so these are rejected everywhere.
pub const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9", "LPT1", "LPT2",
    "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Checks if a name contains only valid filesystem-safe characters.
///
/// Valid characters are: alphanumeric, underscore (_), hyphen (-), and dot (.).
pub fn is_valid_name_chars(name: &str) -> bool {
    name.chars().all(|ch| {
        match ch {
            'a' ..= 'z' | 'A' ..= 'Z' | '0' ..= '9' | '_' | '-' | '.' => true,
            _ => false,
        }
    })
}

/// Checks if a name is a Windows reserved name (case-insensitive), including the base name
/// before the first dot.
pub fn is_reserved_name(name: &str) -> bool {
    let name_upper = name.to_uppercase();
    let base_name = name_upper.split('.').next().unwrap_or(&name_upper);
    WINDOWS_RESERVED_NAMES.contains(&name_upper.as_str()) || WINDOWS_RESERVED_NAMES.contains(&base_name)
}

/// Validates a collection name.
///
/// - Must not be empty or longer than [`MAX_COLLECTION_NAME_LEN`]
/// - Must not start with a dot or end with a dot
/// - Must only contain alphanumeric characters, underscores (_), hyphens (-), and dots (.)
/// - Must not be a Windows reserved name (CON, PRN, AUX, NUL, COM1-9, LPT1-9)
///
/// # Returns
/// - `Ok(())` if the name is valid
/// - `Err(CorvidError::InvalidCollectionName)` otherwise
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty() &&
        name.len() <= MAX_COLLECTION_NAME_LEN &&
        !name.starts_with('.') &&
        !name.ends_with('.') &&
        is_valid_name_chars(name) &&
        !is_reserved_name(name);
    if !valid {
        debug!("Rejected collection name: {:?}", name);
        return Err(CorvidError::InvalidCollectionName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_name_chars() {
        assert!(is_valid_name_chars("valid_name-123.txt"));
        assert!(!is_valid_name_chars("invalid/name"));
        assert!(!is_valid_name_chars("invalid\\name"));
        assert!(!is_valid_name_chars("invalid<name>"));
        assert!(!is_valid_name_chars("invalid name"));
        assert!(!is_valid_name_chars("invalid\u{0001}name"));
    }

    #[test]
    fn test_validate_collection_name() {
        assert!(validate_collection_name("students").is_ok());
        assert!(validate_collection_name("student_data-2024").is_ok());
        assert!(validate_collection_name("archive.v1").is_ok());

        for bad in ["", ".hidden", "trailing.", "path/traversal", "CON", "lpt1.log", "sp ace"] {
            assert!(
                matches!(
                    validate_collection_name(bad),
                    Err(CorvidError::InvalidCollectionName { .. })
                ),
                "expected '{}' to be rejected",
                bad
            );
        }
        assert!(validate_collection_name(&"a".repeat(MAX_COLLECTION_NAME_LEN + 1)).is_err());
    }
}
