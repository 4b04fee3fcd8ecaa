//! Filter configuration storage

use crate::value::Value;
use std::collections::BTreeMap;

/// Key/value configuration of one filter
///
/// Plain settings are locale independent; localized settings hold one value
/// per locale under the same logical name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: BTreeMap<String, Value>,
    localized: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn get_localized(&self, name: &str, locale: &str) -> Option<&Value> {
        self.localized.get(name).and_then(|variants| variants.get(locale))
    }

    pub fn set_localized(
        &mut self,
        name: impl Into<String>,
        locale: impl Into<String>,
        value: Value,
    ) {
        self.localized
            .entry(name.into())
            .or_default()
            .insert(locale.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name) || self.localized.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.localized.is_empty()
    }

    /// Plain settings in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Localized settings as `(name, locale, value)` in name/locale order
    pub fn iter_localized(&self) -> impl Iterator<Item = (&String, &String, &Value)> {
        self.localized.iter().flat_map(|(name, variants)| {
            variants.iter().map(move |(locale, value)| (name, locale, value))
        })
    }
}

/// Setting declared by a filter class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl SettingSpec {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_localized_are_separate() {
        let mut settings = Settings::new();
        settings.set("title", Value::from("plain"));
        settings.set_localized("title", "en_US", Value::from("English"));
        settings.set_localized("title", "de_DE", Value::from("Deutsch"));

        assert_eq!(settings.get("title"), Some(&Value::from("plain")));
        assert_eq!(
            settings.get_localized("title", "de_DE"),
            Some(&Value::from("Deutsch"))
        );
        assert_eq!(settings.get_localized("title", "fr_FR"), None);

        let locales: Vec<&String> = settings.iter_localized().map(|(_, l, _)| l).collect();
        assert_eq!(locales, vec!["de_DE", "en_US"]);
    }

    #[test]
    fn test_contains_checks_both_maps() {
        let mut settings = Settings::new();
        assert!(settings.is_empty());
        settings.set_localized("name", "en_US", Value::from("x"));
        assert!(settings.contains("name"));
        assert!(!settings.contains("other"));
    }
}
