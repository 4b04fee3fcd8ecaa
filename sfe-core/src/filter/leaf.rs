//! Leaf filters

use super::{FilterCore, SettingSpec, Settings};
use crate::value::Value;
use std::fmt;

/// What a leaf filter does to a validated input
///
/// Implementations return `None` when they cannot produce a result; the
/// filter records that as a failure. Type validation happens around the
/// call, so `transform` may assume its input matches the declared input type.
pub trait Transformer: Send + fmt::Debug {
    fn transform(&mut self, input: Value, ctx: &mut TransformContext<'_>) -> Option<Value>;

    /// Settings this transformer reads
    fn setting_specs(&self) -> Vec<SettingSpec> {
        Vec::new()
    }
}

/// Read access to the filter's settings plus a sink for error messages
pub struct TransformContext<'a> {
    settings: &'a Settings,
    errors: &'a mut Vec<String>,
    filter_name: &'a str,
}

impl<'a> TransformContext<'a> {
    pub fn setting(&self, name: &str) -> Option<&Value> {
        self.settings.get(name)
    }

    pub fn localized_setting(&self, name: &str, locale: &str) -> Option<&Value> {
        self.settings.get_localized(name, locale)
    }

    pub fn filter_name(&self) -> &str {
        self.filter_name
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

#[derive(Debug)]
pub struct LeafFilter {
    pub(super) core: FilterCore,
    transformer: Box<dyn Transformer>,
}

impl LeafFilter {
    pub fn new(core: FilterCore, transformer: Box<dyn Transformer>) -> Self {
        Self { core, transformer }
    }

    pub fn core(&self) -> &FilterCore {
        &self.core
    }

    pub fn transformer(&self) -> &dyn Transformer {
        self.transformer.as_ref()
    }

    pub(super) fn transform(&mut self, input: Value) -> Option<Value> {
        let mut ctx = TransformContext {
            settings: &self.core.settings,
            errors: &mut self.core.errors,
            filter_name: &self.core.display_name,
        };
        self.transformer.transform(input, &mut ctx)
    }
}

/// Transformer backed by a closure
pub struct FnTransformer<F> {
    transform: F,
}

impl<F> FnTransformer<F>
where
    F: FnMut(Value, &mut TransformContext<'_>) -> Option<Value> + Send,
{
    pub fn new(transform: F) -> Self {
        Self { transform }
    }
}

impl<F> fmt::Debug for FnTransformer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnTransformer")
    }
}

impl<F> Transformer for FnTransformer<F>
where
    F: FnMut(Value, &mut TransformContext<'_>) -> Option<Value> + Send,
{
    fn transform(&mut self, input: Value, ctx: &mut TransformContext<'_>) -> Option<Value> {
        (self.transform)(input, ctx)
    }
}
