//! Composite filters
//!
//! A composite owns its sub-filters keyed by sequence number. Settings of a
//! sub-filter are addressed from the composite as `seq<N>_<name>`; the key is
//! resolved one level at a time, so `seq1_seq2_x` reaches setting `x` of the
//! second child of the first child.
//!
//! An alias table (`settings_mapping`) maps a composite-level name to one or
//! more target keys. Writing an alias writes every target in order; reading
//! an alias returns the first target's value. Targets may themselves be
//! aliases of the same composite; a write that comes back to a key it is
//! already propagating fails with [`FilterError::SettingCycle`].

use super::{multiplexer, sequencer, Filter, FilterCore, FilterError, Settings};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const SEQUENCER_CLASS: &str = "sequencer";
pub const MULTIPLEXER_CLASS: &str = "multiplexer";

/// Internal key holding the alias table
pub const SETTINGS_MAPPING_KEY: &str = "settings_mapping";
/// Internal multiplexer key
pub const TOLERATE_FAILURES_KEY: &str = "tolerate_failures";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    /// Children form a pipeline
    Sequencer,
    /// Every child receives the same input
    Multiplexer { tolerate_failures: bool },
}

/// Parsed value of an internal key
enum InternalValue {
    Mapping(BTreeMap<String, Vec<String>>),
    TolerateFailures(bool),
}

#[derive(Debug)]
pub struct CompositeFilter {
    core: FilterCore,
    kind: CompositeKind,
    children: BTreeMap<u32, Filter>,
    settings_mapping: BTreeMap<String, Vec<String>>,
}

impl CompositeFilter {
    pub fn new(core: FilterCore, kind: CompositeKind) -> Self {
        Self {
            core,
            kind,
            children: BTreeMap::new(),
            settings_mapping: BTreeMap::new(),
        }
    }

    pub fn core(&self) -> &FilterCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    pub fn kind(&self) -> CompositeKind {
        self.kind
    }

    pub fn tolerate_failures(&self) -> bool {
        matches!(
            self.kind,
            CompositeKind::Multiplexer {
                tolerate_failures: true
            }
        )
    }

    pub fn children(&self) -> &BTreeMap<u32, Filter> {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut BTreeMap<u32, Filter> {
        &mut self.children
    }

    pub fn child(&self, sequence: u32) -> Option<&Filter> {
        self.children.get(&sequence)
    }

    pub fn child_mut(&mut self, sequence: u32) -> Option<&mut Filter> {
        self.children.get_mut(&sequence)
    }

    pub fn remove_child(&mut self, sequence: u32) -> Option<Filter> {
        self.children.remove(&sequence)
    }

    /// Add a sub-filter
    ///
    /// Keeps the child's sequence if it has one, otherwise assigns the
    /// highest existing sequence + 1 (starting at 1). Returns `None` and adds
    /// nothing if the sequence is already taken.
    pub fn add_child(&mut self, mut child: Filter) -> Option<u32> {
        let sequence = match child.sequence() {
            Some(sequence) => sequence,
            None => self.children.keys().next_back().map_or(1, |max| max + 1),
        };
        if self.children.contains_key(&sequence) {
            debug!(
                "Composite '{}' already has a sub-filter at sequence {}",
                self.core.display_name(),
                sequence
            );
            return None;
        }
        child.core_mut().set_sequence(Some(sequence));
        self.children.insert(sequence, child);
        Some(sequence)
    }

    pub fn settings_mapping(&self) -> &BTreeMap<String, Vec<String>> {
        &self.settings_mapping
    }

    /// Map `alias` to setting `setting` of the sub-filter at `sequence`
    pub fn map_setting(
        &mut self,
        alias: &str,
        sequence: u32,
        setting: &str,
    ) -> Result<(), FilterError> {
        self.map_setting_to_key(alias, &format!("seq{}_{}", sequence, setting))
    }

    /// Map `alias` to an arbitrary key of this composite (another alias or a
    /// `seq<N>_<name>` key)
    pub fn map_setting_to_key(&mut self, alias: &str, key: &str) -> Result<(), FilterError> {
        self.validate_alias(alias)?;
        let targets = self.settings_mapping.entry(alias.to_string()).or_default();
        if !targets.iter().any(|existing| existing == key) {
            targets.push(key.to_string());
        }
        Ok(())
    }

    fn validate_alias(&self, alias: &str) -> Result<(), FilterError> {
        let reason = if alias.is_empty() {
            Some("alias must not be empty")
        } else if self.is_internal_key(alias) {
            Some("alias shadows an internal setting")
        } else if parse_seq_key(alias).is_ok() {
            Some("alias must not use the seq<N>_<name> form")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(FilterError::InvalidSetting {
                key: alias.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn is_internal_key(&self, key: &str) -> bool {
        key == SETTINGS_MAPPING_KEY
            || (key == TOLERATE_FAILURES_KEY
                && matches!(self.kind, CompositeKind::Multiplexer { .. }))
    }

    pub fn get_data(&self, key: &str, locale: Option<&str>) -> Result<Option<Value>, FilterError> {
        self.get_data_guarded(key, locale, &mut BTreeSet::new())
    }

    /// Write a setting; every key an alias fans out to is resolved before
    /// anything is written, so a failing target leaves all targets unchanged
    pub fn set_data(
        &mut self,
        key: &str,
        value: Value,
        locale: Option<&str>,
    ) -> Result<(), FilterError> {
        self.check_writable(key, &value, &mut BTreeSet::new())?;
        self.set_data_guarded(key, value, locale, &mut BTreeSet::new())
    }

    /// Resolve `key` down to the filters a write would touch, writing nothing
    fn check_writable(
        &self,
        key: &str,
        value: &Value,
        in_progress: &mut BTreeSet<String>,
    ) -> Result<(), FilterError> {
        if self.is_internal_key(key) {
            return self.parse_internal_value(key, value).map(|_| ());
        }

        if let Some(targets) = self.settings_mapping.get(key) {
            if !in_progress.insert(key.to_string()) {
                return Err(FilterError::SettingCycle(key.to_string()));
            }
            for target in targets {
                self.check_writable(target, value, in_progress)?;
            }
            in_progress.remove(key);
            return Ok(());
        }

        let (sequence, rest) = parse_seq_key(key)?;
        match self.children.get(&sequence) {
            Some(Filter::Composite(composite)) => {
                composite.check_writable(rest, value, &mut BTreeSet::new())
            }
            Some(Filter::Leaf(_)) => Ok(()),
            None => Err(FilterError::UnknownSequence {
                key: key.to_string(),
                sequence,
            }),
        }
    }

    fn get_data_guarded(
        &self,
        key: &str,
        locale: Option<&str>,
        in_progress: &mut BTreeSet<String>,
    ) -> Result<Option<Value>, FilterError> {
        if self.is_internal_key(key) {
            return Ok(self.internal_value(key));
        }

        if let Some(targets) = self.settings_mapping.get(key) {
            if !in_progress.insert(key.to_string()) {
                return Err(FilterError::SettingCycle(key.to_string()));
            }
            let value = match targets.first() {
                Some(target) => self.get_data_guarded(target, locale, in_progress)?,
                None => None,
            };
            in_progress.remove(key);
            return Ok(value);
        }

        let (sequence, rest) = parse_seq_key(key)?;
        let child = self
            .children
            .get(&sequence)
            .ok_or_else(|| FilterError::UnknownSequence {
                key: key.to_string(),
                sequence,
            })?;
        match child {
            Filter::Composite(composite) => composite.get_data(rest, locale),
            Filter::Leaf(leaf) => {
                let settings = &leaf.core().settings;
                Ok(match locale {
                    Some(locale) => settings.get_localized(rest, locale).cloned(),
                    None => settings.get(rest).cloned(),
                })
            }
        }
    }

    fn set_data_guarded(
        &mut self,
        key: &str,
        value: Value,
        locale: Option<&str>,
        in_progress: &mut BTreeSet<String>,
    ) -> Result<(), FilterError> {
        if self.is_internal_key(key) {
            return self.set_internal_value(key, value);
        }

        if let Some(targets) = self.settings_mapping.get(key).cloned() {
            if !in_progress.insert(key.to_string()) {
                return Err(FilterError::SettingCycle(key.to_string()));
            }
            for target in &targets {
                self.set_data_guarded(target, value.clone(), locale, in_progress)?;
            }
            in_progress.remove(key);
            return Ok(());
        }

        let (sequence, rest) = parse_seq_key(key)?;
        let child = self
            .children
            .get_mut(&sequence)
            .ok_or_else(|| FilterError::UnknownSequence {
                key: key.to_string(),
                sequence,
            })?;
        match locale {
            Some(locale) => child.set_localized_data(rest, locale, value),
            None => child.set_data(rest, value),
        }
    }

    fn internal_value(&self, key: &str) -> Option<Value> {
        match key {
            SETTINGS_MAPPING_KEY => Some(Value::Map(
                self.settings_mapping
                    .iter()
                    .map(|(alias, targets)| {
                        let targets = targets.iter().map(|t| Value::from(t.as_str())).collect();
                        (alias.clone(), Value::Array(targets))
                    })
                    .collect(),
            )),
            TOLERATE_FAILURES_KEY => Some(Value::Boolean(self.tolerate_failures())),
            _ => None,
        }
    }

    fn set_internal_value(&mut self, key: &str, value: Value) -> Result<(), FilterError> {
        match self.parse_internal_value(key, &value)? {
            InternalValue::Mapping(mapping) => self.settings_mapping = mapping,
            InternalValue::TolerateFailures(tolerate_failures) => {
                self.kind = CompositeKind::Multiplexer { tolerate_failures };
            }
        }
        Ok(())
    }

    fn parse_internal_value(&self, key: &str, value: &Value) -> Result<InternalValue, FilterError> {
        let invalid = |reason: &str| FilterError::InvalidSetting {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        match key {
            SETTINGS_MAPPING_KEY => {
                let entries = value
                    .as_map()
                    .ok_or_else(|| invalid("expected a map of alias to target keys"))?;
                let mut mapping = BTreeMap::new();
                for (alias, targets) in entries {
                    self.validate_alias(alias)?;
                    let targets = targets
                        .as_array()
                        .ok_or_else(|| invalid("alias targets must be a list"))?
                        .iter()
                        .map(|target| {
                            target
                                .as_str()
                                .map(str::to_string)
                                .ok_or_else(|| invalid("alias targets must be strings"))
                        })
                        .collect::<Result<Vec<String>, FilterError>>()?;
                    mapping.insert(alias.clone(), targets);
                }
                Ok(InternalValue::Mapping(mapping))
            }
            TOLERATE_FAILURES_KEY => value
                .as_bool()
                .map(InternalValue::TolerateFailures)
                .ok_or_else(|| invalid("expected a boolean")),
            _ => Err(invalid("not an internal setting")),
        }
    }

    /// Settings stored with the composite itself
    pub(super) fn own_settings(&self) -> Settings {
        let mut settings = self.core.settings.clone();
        if !self.settings_mapping.is_empty() {
            if let Some(mapping) = self.internal_value(SETTINGS_MAPPING_KEY) {
                settings.set(SETTINGS_MAPPING_KEY, mapping);
            }
        }
        if let CompositeKind::Multiplexer { tolerate_failures } = self.kind {
            settings.set(TOLERATE_FAILURES_KEY, Value::Boolean(tolerate_failures));
        }
        settings
    }

    pub(super) fn transform(&mut self, input: Value) -> Option<Value> {
        match self.kind {
            CompositeKind::Sequencer => sequencer::run(self, input),
            CompositeKind::Multiplexer { tolerate_failures } => {
                multiplexer::run(self, input, tolerate_failures)
            }
        }
    }

    /// Copy every child's error list into this composite's, in sequence order
    pub(super) fn collect_child_errors(&mut self) {
        let collected: Vec<String> = self
            .children
            .values()
            .flat_map(|child| child.errors().iter().cloned())
            .collect();
        self.core.errors.extend(collected);
    }

    pub(super) fn push_error(&mut self, message: String) {
        self.core.errors.push(message);
    }
}

/// Split `seq<N>_<rest>` into `(N, rest)`
pub(super) fn parse_seq_key(key: &str) -> Result<(u32, &str), FilterError> {
    let malformed = || FilterError::MalformedSettingKey(key.to_string());
    let body = key.strip_prefix("seq").ok_or_else(malformed)?;
    let (digits, rest) = body.split_once('_').ok_or_else(malformed)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) || rest.is_empty() {
        return Err(malformed());
    }
    let sequence = digits.parse::<u32>().map_err(|_| malformed())?;
    Ok((sequence, rest))
}
