use serde::Deserialize;

/// Canonical form for comparable values: surrounding whitespace trimmed,
/// uppercased. `" m "` and `"M"` compare equal.
pub fn normalize_value(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Join the non-blank name parts with a single space.
pub fn display_name<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// How a source's raw key column maps onto the shared key space.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyNormalizer {
    /// Prepended when the trimmed key does not already start with it
    /// (compared case-insensitively).
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_lowercase")]
    pub lowercase: bool,
}

fn default_lowercase() -> bool {
    true
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self {
            prefix: None,
            lowercase: true,
        }
    }
}

impl KeyNormalizer {
    /// Returns `None` for a blank key.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut key = match &self.prefix {
            Some(prefix)
                if !trimmed
                    .to_lowercase()
                    .starts_with(&prefix.to_lowercase()) =>
            {
                format!("{prefix}{trimmed}")
            }
            _ => trimmed.to_string(),
        };

        if self.lowercase {
            key = key.to_lowercase();
        }
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_trim_and_case() {
        assert_eq!(normalize_value("  m "), "M");
        assert_eq!(normalize_value("XL"), "XL");
        assert_eq!(normalize_value("\tl\n"), "L");
        assert_eq!(normalize_value("   "), "");
    }

    #[test]
    fn name_joins_non_blank_parts() {
        assert_eq!(display_name(["Elly", " Chang "]), "Elly Chang");
        assert_eq!(display_name(["", "Chang"]), "Chang");
        assert_eq!(display_name(Vec::<&str>::new()), "");
    }

    #[test]
    fn key_prefix_added_once() {
        let n = KeyNormalizer {
            prefix: Some("s".into()),
            lowercase: true,
        };
        assert_eq!(n.normalize("202943").as_deref(), Some("s202943"));
        assert_eq!(n.normalize(" s202943 ").as_deref(), Some("s202943"));
        assert_eq!(n.normalize("S202943").as_deref(), Some("s202943"));
        assert_eq!(n.normalize("  "), None);
    }

    #[test]
    fn key_case_preserved_when_not_lowercasing() {
        let n = KeyNormalizer {
            prefix: None,
            lowercase: false,
        };
        assert_eq!(n.normalize(" AbC ").as_deref(), Some("AbC"));
    }
}
