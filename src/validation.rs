//! Player name validation and filesystem-safe file stems

use std::collections::HashSet;

/// Player name validation errors with helpful messages
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlayerNameError {
    #[error("Name is too short (minimum {min} characters)")]
    TooShort { min: usize },

    #[error("Name is too long (maximum {max} characters)")]
    TooLong { max: usize },

    #[error("Name contains invalid characters: {chars}")]
    InvalidCharacters { chars: String },

    #[error("Name contains path separators (/ or \\)")]
    PathTraversal,

    #[error("Name is reserved")]
    Reserved,
}

/// Player name rules
#[derive(Debug, Clone)]
pub struct NameRules {
    pub min_length: usize,
    pub max_length: usize,
    /// Accept non-ASCII letters
    pub allow_unicode: bool,
}

impl Default for NameRules {
    fn default() -> Self {
        NameRules {
            min_length: 2,
            max_length: 20,
            allow_unicode: false,
        }
    }
}

/// Generate safe filename from a name using URL encoding
pub fn safe_filename(name: &str) -> String {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    utf8_percent_encode(name, NON_ALPHANUMERIC).to_string()
}

/// Case-folded, percent-encoded stem for a player's files; `None` for names
/// that can never map to a file.
pub fn player_file_stem(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
        return None;
    }
    Some(safe_filename(&trimmed.to_lowercase()))
}

/// Names that would collide with commands or confuse players
fn reserved_names() -> HashSet<&'static str> {
    [
        "all", "self", "me", "someone", "something", "nobody", "new", "quit",
        "immortal", "god", "admin", "administrator", "root", "system",
        "con", "prn", "aux", "nul", "index",
    ]
    .iter()
    .copied()
    .collect()
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    }
}

/// Validate a new player name; returns it in canonical capitalization.
pub fn validate_player_name(name: &str, rules: &NameRules) -> Result<String, PlayerNameError> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();

    if len < rules.min_length {
        return Err(PlayerNameError::TooShort { min: rules.min_length });
    }
    if len > rules.max_length {
        return Err(PlayerNameError::TooLong { max: rules.max_length });
    }

    if trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
        return Err(PlayerNameError::PathTraversal);
    }

    let invalid: HashSet<char> = trimmed
        .chars()
        .filter(|c| {
            let ok = c.is_ascii_alphabetic() || (rules.allow_unicode && c.is_alphabetic());
            !ok
        })
        .collect();
    if !invalid.is_empty() {
        let mut chars: Vec<char> = invalid.into_iter().collect();
        chars.sort_unstable();
        return Err(PlayerNameError::InvalidCharacters {
            chars: chars.into_iter().collect(),
        });
    }

    if reserved_names().contains(trimmed.to_lowercase().as_str()) {
        return Err(PlayerNameError::Reserved);
    }

    Ok(capitalize(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_name_validation() {
        let rules = NameRules::default();
        assert_eq!(validate_player_name("alice", &rules), Ok("Alice".to_string()));
        assert_eq!(validate_player_name("  BOB ", &rules), Ok("Bob".to_string()));

        assert_eq!(validate_player_name("a", &rules), Err(PlayerNameError::TooShort { min: 2 }));
        assert!(matches!(
            validate_player_name("abcdefghijklmnopqrstuvwxyz", &rules),
            Err(PlayerNameError::TooLong { .. })
        ));
        assert_eq!(validate_player_name("../etc", &rules), Err(PlayerNameError::PathTraversal));
        assert_eq!(
            validate_player_name("Bob1", &rules),
            Err(PlayerNameError::InvalidCharacters { chars: "1".into() })
        );
        assert_eq!(validate_player_name("Self", &rules), Err(PlayerNameError::Reserved));
    }

    #[test]
    fn test_unicode_names_need_opt_in() {
        let strict = NameRules::default();
        let relaxed = NameRules {
            allow_unicode: true,
            ..NameRules::default()
        };
        assert!(validate_player_name("José", &strict).is_err());
        assert_eq!(validate_player_name("josé", &relaxed), Ok("José".to_string()));
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("martin"), "martin");
        assert_eq!(safe_filename("Al Sayeed"), "Al%20Sayeed");
        assert!(!safe_filename("user/file").contains('/'));
    }

    #[test]
    fn test_player_file_stem() {
        assert_eq!(player_file_stem("Alice").as_deref(), Some("alice"));
        assert_eq!(player_file_stem(" ").as_deref(), None);
        assert_eq!(player_file_stem("a/b"), None);
    }
}
