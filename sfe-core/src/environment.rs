//! Capability/runtime gate
//!
//! Filters may declare what they need from the running platform: a version
//! window, named optional features and named external tools. The gate is
//! checked before a filter transforms anything and by the registry before it
//! hands out filters from a compatibility lookup.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Setting names under which requirements are persisted with a filter
pub const SETTING_MIN_VERSION: &str = "runtime_min_version";
pub const SETTING_MAX_VERSION: &str = "runtime_max_version";
pub const SETTING_FEATURES: &str = "runtime_features";
pub const SETTING_TOOLS: &str = "runtime_tools";

/// Dotted numeric version (`3.4.0`)
///
/// Components compare numerically; missing trailing components count as 0,
/// so `3.4` equals `3.4.0`. Anything after the first `-` or `+` is ignored.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    components: Vec<u64>,
}

impl Version {
    pub fn new(components: Vec<u64>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let core = s
            .trim()
            .split(|c| c == '-' || c == '+')
            .next()
            .unwrap_or_default();
        if core.is_empty() {
            return Err(format!("Invalid version '{}'", s));
        }
        let components = core
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|e| format!("Invalid version '{}': {}", s, e))
            })
            .collect::<Result<Vec<u64>, String>>()?;
        Ok(Self { components })
    }
}

impl TryFrom<String> for Version {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

/// What the running platform offers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    /// Host platform version; `None` fails every version bound
    pub platform_version: Option<Version>,
    /// Enabled optional features
    pub features: BTreeSet<String>,
    /// Configured external tools (name → executable path)
    pub tools: BTreeMap<String, PathBuf>,
}

impl Environment {
    pub fn new(platform_version: Version) -> Self {
        Self {
            platform_version: Some(platform_version),
            ..Default::default()
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(name.into(), path.into());
        self
    }

    /// A tool counts as available when it is configured and its path exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.get(name).map_or(false, |path| path.exists())
    }
}

/// What a filter needs from the running platform
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeRequirements {
    pub min_version: Option<Version>,
    pub max_version: Option<Version>,
    pub features: BTreeSet<String>,
    pub tools: BTreeSet<String>,
}

impl RuntimeRequirements {
    pub fn is_empty(&self) -> bool {
        self.min_version.is_none()
            && self.max_version.is_none()
            && self.features.is_empty()
            && self.tools.is_empty()
    }

    pub fn with_min_version(mut self, version: Version) -> Self {
        self.min_version = Some(version);
        self
    }

    pub fn with_max_version(mut self, version: Version) -> Self {
        self.max_version = Some(version);
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.insert(tool.into());
        self
    }

    /// True only if every requirement is satisfied
    pub fn is_compatible(&self, environment: &Environment) -> bool {
        self.unmet(environment).is_empty()
    }

    /// Human readable list of unmet requirements
    pub fn unmet(&self, environment: &Environment) -> Vec<String> {
        let mut unmet = Vec::new();

        if let Some(min) = &self.min_version {
            match &environment.platform_version {
                Some(current) if current >= min => {}
                Some(current) => unmet.push(format!("version {} < required {}", current, min)),
                None => unmet.push(format!("unknown platform version (requires >= {})", min)),
            }
        }
        if let Some(max) = &self.max_version {
            match &environment.platform_version {
                Some(current) if current <= max => {}
                Some(current) => unmet.push(format!("version {} > allowed {}", current, max)),
                None => unmet.push(format!("unknown platform version (requires <= {})", max)),
            }
        }
        for feature in &self.features {
            if !environment.features.contains(feature) {
                unmet.push(format!("missing feature '{}'", feature));
            }
        }
        for tool in &self.tools {
            if !environment.has_tool(tool) {
                unmet.push(format!("missing external tool '{}'", tool));
            }
        }

        unmet
    }

    /// Requirements encoded as reserved filter settings
    pub fn to_settings(&self) -> BTreeMap<String, Value> {
        let mut settings = BTreeMap::new();
        if let Some(min) = &self.min_version {
            settings.insert(SETTING_MIN_VERSION.to_string(), Value::String(min.to_string()));
        }
        if let Some(max) = &self.max_version {
            settings.insert(SETTING_MAX_VERSION.to_string(), Value::String(max.to_string()));
        }
        if !self.features.is_empty() {
            settings.insert(SETTING_FEATURES.to_string(), string_list(&self.features));
        }
        if !self.tools.is_empty() {
            settings.insert(SETTING_TOOLS.to_string(), string_list(&self.tools));
        }
        settings
    }

    /// Is this one of the reserved requirement setting names?
    pub fn is_requirement_setting(name: &str) -> bool {
        matches!(
            name,
            SETTING_MIN_VERSION | SETTING_MAX_VERSION | SETTING_FEATURES | SETTING_TOOLS
        )
    }

    /// Apply one reserved setting read back from storage
    pub fn apply_setting(&mut self, name: &str, value: &Value) -> Result<(), String> {
        match name {
            SETTING_MIN_VERSION => self.min_version = Some(version_value(name, value)?),
            SETTING_MAX_VERSION => self.max_version = Some(version_value(name, value)?),
            SETTING_FEATURES => self.features = string_set(name, value)?,
            SETTING_TOOLS => self.tools = string_set(name, value)?,
            other => return Err(format!("'{}' is not a runtime requirement setting", other)),
        }
        Ok(())
    }
}

fn string_list(items: &BTreeSet<String>) -> Value {
    Value::Array(items.iter().map(|s| Value::String(s.clone())).collect())
}

fn version_value(name: &str, value: &Value) -> Result<Version, String> {
    value
        .as_str()
        .ok_or_else(|| format!("'{}' must be a version string", name))?
        .parse()
}

fn string_set(name: &str, value: &Value) -> Result<BTreeSet<String>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("'{}' must be a list of names", name))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| format!("'{}' must only contain strings", name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_version_ordering() {
        assert!(v("3.4.0") > v("3.3.9"));
        assert!(v("3.10") > v("3.9"));
        assert_eq!(v("3.4"), v("3.4.0"));
        assert_eq!(v("3.4.0-1"), v("3.4.0"));
        assert!("x.1".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
    }

    #[test]
    fn test_empty_requirements_always_compatible() {
        let requirements = RuntimeRequirements::default();
        assert!(requirements.is_empty());
        assert!(requirements.is_compatible(&Environment::default()));
    }

    #[test]
    fn test_version_window() {
        let requirements = RuntimeRequirements::default()
            .with_min_version(v("3.3"))
            .with_max_version(v("3.4.99"));

        assert!(requirements.is_compatible(&Environment::new(v("3.4.0"))));
        assert!(!requirements.is_compatible(&Environment::new(v("3.2.1"))));
        assert!(!requirements.is_compatible(&Environment::new(v("3.5"))));
        assert!(!requirements.is_compatible(&Environment::default()));
    }

    #[test]
    fn test_features_and_tools() {
        let existing = std::env::temp_dir();
        let requirements = RuntimeRequirements::default()
            .with_feature("xsl")
            .with_tool("xslt");

        let env = Environment::new(v("1.0")).with_feature("xsl");
        let unmet = requirements.unmet(&env);
        assert_eq!(unmet.len(), 1);
        assert!(unmet[0].contains("xslt"));

        let env = env.with_tool("xslt", existing);
        assert!(requirements.is_compatible(&env));

        let env = Environment::new(v("1.0"))
            .with_feature("xsl")
            .with_tool("xslt", "/definitely/not/a/real/path/xsltproc");
        assert!(!requirements.is_compatible(&env));
    }

    #[test]
    fn test_settings_round_trip() {
        let requirements = RuntimeRequirements::default()
            .with_min_version(v("2.0"))
            .with_feature("json")
            .with_tool("tidy");

        let mut restored = RuntimeRequirements::default();
        for (name, value) in requirements.to_settings() {
            assert!(RuntimeRequirements::is_requirement_setting(&name));
            restored.apply_setting(&name, &value).unwrap();
        }
        assert_eq!(restored, requirements);
    }

    #[test]
    fn test_apply_setting_rejects_bad_shapes() {
        let mut requirements = RuntimeRequirements::default();
        assert!(requirements
            .apply_setting(SETTING_MIN_VERSION, &Value::Integer(3))
            .is_err());
        assert!(requirements
            .apply_setting(SETTING_FEATURES, &Value::from("xsl"))
            .is_err());
        assert!(requirements.apply_setting("other", &Value::Null).is_err());
    }
}
