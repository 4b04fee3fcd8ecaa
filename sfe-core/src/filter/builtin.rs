//! Built-in leaf transformers

use super::{SettingSpec, TransformContext, Transformer};
use crate::value::Value;

/// Returns its input unchanged
#[derive(Debug, Default)]
pub struct Identity;

impl Transformer for Identity {
    fn transform(&mut self, input: Value, _ctx: &mut TransformContext<'_>) -> Option<Value> {
        Some(input)
    }
}

/// Renders a scalar as a string
#[derive(Debug, Default)]
pub struct Stringify;

impl Transformer for Stringify {
    fn transform(&mut self, input: Value, ctx: &mut TransformContext<'_>) -> Option<Value> {
        let text = match input {
            Value::String(s) => s,
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            other => {
                ctx.add_error(format!("Cannot stringify a value of type '{}'", other.type_name()));
                return None;
            }
        };
        Some(Value::String(text))
    }
}

pub const CASE_SETTING: &str = "case";

/// Upper- or lower-cases a string, per the `case` setting
#[derive(Debug, Default)]
pub struct StringCase;

impl Transformer for StringCase {
    fn transform(&mut self, input: Value, ctx: &mut TransformContext<'_>) -> Option<Value> {
        let text = input.as_str()?;
        let case = ctx.setting(CASE_SETTING).and_then(Value::as_str);
        match case {
            Some(case) if case.eq_ignore_ascii_case("upper") => {
                Some(Value::String(text.to_uppercase()))
            }
            Some(case) if case.eq_ignore_ascii_case("lower") => {
                Some(Value::String(text.to_lowercase()))
            }
            Some(other) => {
                let message = format!("Unknown case '{}' (expected 'upper' or 'lower')", other);
                ctx.add_error(message);
                None
            }
            None => {
                ctx.add_error(format!("Setting '{}' is not configured", CASE_SETTING));
                None
            }
        }
    }

    fn setting_specs(&self) -> Vec<SettingSpec> {
        vec![SettingSpec::required(CASE_SETTING, "'upper' or 'lower'")]
    }
}

pub const FIELD_SETTING: &str = "field";

/// Pulls one named field out of an object or map
#[derive(Debug, Default)]
pub struct FieldExtract;

impl Transformer for FieldExtract {
    fn transform(&mut self, input: Value, ctx: &mut TransformContext<'_>) -> Option<Value> {
        let Some(field) = ctx.setting(FIELD_SETTING).and_then(Value::as_str) else {
            ctx.add_error(format!("Setting '{}' is not configured", FIELD_SETTING));
            return None;
        };
        let field = field.to_string();

        let found = match &input {
            Value::Object(object) => object.field(&field).cloned(),
            Value::Map(map) => map.get(&field).cloned(),
            _ => None,
        };
        if found.is_none() {
            ctx.add_error(format!("Field '{}' not present in input", field));
        }
        found
    }

    fn setting_specs(&self) -> Vec<SettingSpec> {
        vec![SettingSpec::required(FIELD_SETTING, "name of the field to extract")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, FilterCore};
    use crate::types::TypeDescriptor;
    use crate::value::Object;

    fn filter(transformer: impl Transformer + 'static, input: &str, output: &str) -> Filter {
        let core = FilterCore::new(
            "test",
            "test",
            TypeDescriptor::parse(input).unwrap(),
            TypeDescriptor::parse(output).unwrap(),
        );
        Filter::leaf(core, transformer)
    }

    #[test]
    fn test_stringify() {
        let mut f = filter(Stringify, "primitive::integer", "primitive::string");
        assert_eq!(f.execute(Value::Integer(7)).unwrap(), Value::from("7"));

        let mut f = filter(Stringify, "primitive::boolean", "primitive::string");
        assert_eq!(f.execute(Value::Boolean(true)).unwrap(), Value::from("true"));
    }

    #[test]
    fn test_string_case() {
        let mut f = filter(StringCase, "primitive::string", "primitive::string");
        assert!(f.execute(Value::from("Abc")).is_err());
        assert_eq!(f.missing_settings(), vec![CASE_SETTING.to_string()]);

        f.set_data(CASE_SETTING, "upper").unwrap();
        assert_eq!(f.execute(Value::from("Abc")).unwrap(), Value::from("ABC"));
        f.set_data(CASE_SETTING, "lower").unwrap();
        assert_eq!(f.execute(Value::from("Abc")).unwrap(), Value::from("abc"));
        assert!(f.missing_settings().is_empty());
    }

    #[test]
    fn test_field_extract() {
        let mut f = filter(
            FieldExtract,
            "class::lib.pkp.classes.submission.Submission",
            "primitive::string",
        );
        f.set_data(FIELD_SETTING, "title").unwrap();

        let submission = Object::new("Submission").with_field("title", "On Filters");
        assert_eq!(
            f.execute(Value::Object(submission)).unwrap(),
            Value::from("On Filters")
        );

        let untitled = Object::new("Submission");
        assert!(f.execute(Value::Object(untitled)).is_err());
        assert!(f.errors()[0].contains("title"));
    }
}
