use thiserror::Error;

/// Minimum length of an element name in characters.
pub const ELEMENT_NAME_MIN_LEN: usize = 4;
/// Maximum length of an element name in characters.
pub const ELEMENT_NAME_MAX_LEN: usize = 25;

/// Validation errors for entity, attribute, and calculation names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name cannot be empty")]
    Empty,
    #[error("name is too short ({len} < {ELEMENT_NAME_MIN_LEN})")]
    TooShort { len: usize },
    #[error("name is too long ({len} > {ELEMENT_NAME_MAX_LEN})")]
    TooLong { len: usize },
    #[error("name must start with a letter, found '{0}'")]
    InvalidStartCharacter(char),
    #[error("name contains invalid character '{ch}' at index {index}")]
    InvalidCharacter { ch: char, index: usize },
    #[error("name contains consecutive spaces")]
    ConsecutiveSpaces,
}

/// Validate an element name: starts with a letter, contains only letters,
/// digits, and single spaces, and is 4-25 characters long.
pub fn validate_element_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }

    let len = name.chars().count();
    if len < ELEMENT_NAME_MIN_LEN {
        return Err(NameError::TooShort { len });
    }
    if len > ELEMENT_NAME_MAX_LEN {
        return Err(NameError::TooLong { len });
    }

    let mut prev_space = false;
    for (index, ch) in name.chars().enumerate() {
        if index == 0 {
            if !ch.is_ascii_alphabetic() {
                return Err(NameError::InvalidStartCharacter(ch));
            }
            continue;
        }
        if ch == ' ' {
            if prev_space {
                return Err(NameError::ConsecutiveSpaces);
            }
            prev_space = true;
            continue;
        }
        prev_space = false;
        if !ch.is_ascii_alphanumeric() {
            return Err(NameError::InvalidCharacter { ch, index });
        }
    }

    Ok(())
}

/// The canonical form of an element name as formula text references it:
/// lowercase, with spaces replaced by underscores.
#[must_use]
pub fn canonical_name(name: &str) -> String {
    name.to_ascii_lowercase().replace(' ', "_")
}
