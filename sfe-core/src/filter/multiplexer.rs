//! Multiplexer: one input, every child

use super::{CompositeFilter, FilterError};
use crate::value::Value;
use tracing::debug;

/// Run every child on its own copy of `input` and collect the outputs
///
/// Outputs are returned as an array in sequence order. A failing branch is
/// skipped when `tolerate_failures` is set, otherwise the run is aborted.
/// Either way each failure is reported as a [`FilterError::BranchFailure`]
/// after the children's own errors. No surviving output means no result.
pub(super) fn run(
    composite: &mut CompositeFilter,
    input: Value,
    tolerate_failures: bool,
) -> Option<Value> {
    let name = composite.core().display_name().to_string();
    let mut outputs = Vec::new();
    let mut failures = Vec::new();

    for (&sequence, child) in composite.children_mut().iter_mut() {
        match child.execute(input.clone()) {
            Ok(output) => outputs.push(output),
            Err(e) => {
                debug!("Multiplexer '{}' branch {} failed: {}", name, sequence, e);
                failures.push(FilterError::BranchFailure {
                    filter: name.clone(),
                    sequence,
                });
                if !tolerate_failures {
                    break;
                }
            }
        }
    }

    composite.collect_child_errors();
    for failure in &failures {
        composite.push_error(failure.to_string());
    }

    if (!tolerate_failures && !failures.is_empty()) || outputs.is_empty() {
        return None;
    }
    Some(Value::Array(outputs))
}

#[cfg(test)]
mod tests {
    use crate::filter::Filter;
    use crate::types::TypeDescriptor;
    use crate::value::{Object, Value};

    fn td(s: &str) -> TypeDescriptor {
        TypeDescriptor::parse(s).unwrap()
    }

    fn mux(tolerate: bool) -> Filter {
        let mut mux = Filter::multiplexer(
            "mux",
            td("primitive::string"),
            td("primitive::string[]"),
            tolerate,
        );
        mux.add_child(Filter::from_fn(
            "a",
            td("primitive::string"),
            td("primitive::string"),
            |v, _| v.as_str().map(|s| Value::from(format!("{}-a", s))),
        ))
        .unwrap();
        mux.add_child(Filter::from_fn(
            "broken",
            td("primitive::string"),
            td("primitive::string"),
            |_, _| None,
        ))
        .unwrap();
        mux.add_child(Filter::from_fn(
            "c",
            td("primitive::string"),
            td("primitive::string"),
            |v, _| v.as_str().map(|s| Value::from(format!("{}-c", s))),
        ))
        .unwrap();
        mux
    }

    #[test]
    fn test_tolerant_multiplexer_skips_failures() {
        let mut filter = mux(true);
        let output = filter.execute(Value::from("x")).unwrap();
        assert_eq!(
            output,
            Value::Array(vec![Value::from("x-a"), Value::from("x-c")])
        );
        assert!(filter.errors().iter().any(|e| e.contains("Branch 2")));
    }

    #[test]
    fn test_strict_multiplexer_aborts() {
        let mut filter = mux(false);
        assert!(filter.execute(Value::from("x")).is_err());
        assert!(filter.errors().iter().any(|e| e.contains("Branch 2")));
        let children = filter.children().unwrap();
        assert!(children[&3].last_valid_output().is_none());
    }

    #[test]
    fn test_branches_receive_independent_copies() {
        let record = td("class::lib.pkp.classes.Record");
        let mut filter = Filter::multiplexer("mux", record.clone(), td("class::Record[]"), false);
        filter
            .add_child(Filter::from_fn("mutator", record.clone(), record.clone(), |v, _| {
                let Value::Object(mut object) = v else {
                    return None;
                };
                object.fields.insert("title".to_string(), Value::from("changed"));
                Some(Value::Object(object))
            }))
            .unwrap();
        filter
            .add_child(Filter::from_fn("observer", record.clone(), record, |v, _| Some(v)))
            .unwrap();

        let input = Value::Object(Object::new("Record").with_field("title", "original"));
        let output = filter.execute(input.clone()).unwrap();

        let branches = output.as_array().unwrap();
        assert_eq!(
            branches[0].as_object().unwrap().field("title"),
            Some(&Value::from("changed"))
        );
        assert_eq!(branches[1], input);
    }

    #[test]
    fn test_no_children_yields_no_result() {
        let mut filter = Filter::multiplexer(
            "empty",
            td("primitive::string"),
            td("primitive::string[]"),
            true,
        );
        assert!(filter.execute(Value::from("x")).is_err());
    }
}
