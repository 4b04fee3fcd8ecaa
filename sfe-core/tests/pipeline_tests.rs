//! End-to-end pipeline behaviour without persistence

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sfe_core::factory::{FIELD_EXTRACT_CLASS, STRING_CASE_CLASS, STRINGIFY_CLASS};
use sfe_core::{Filter, FilterError, FilterFactory, Object, TypeDescriptor, Value};

fn td(s: &str) -> TypeDescriptor {
    TypeDescriptor::parse(s).unwrap()
}

fn counting(name: &str, calls: Arc<AtomicUsize>) -> Filter {
    Filter::from_fn(
        name,
        td("primitive::string"),
        td("primitive::string"),
        move |v, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Some(v)
        },
    )
}

#[test]
fn execute_checks_both_ends() {
    let factory = FilterFactory::with_builtins();
    let mut stringify = factory
        .construct(STRINGIFY_CLASS, td("primitive::integer"), td("primitive::string"))
        .unwrap();

    assert_eq!(stringify.execute(Value::Integer(42)).unwrap(), Value::from("42"));

    let err = stringify.execute(Value::from("42")).unwrap_err();
    assert_eq!(
        err,
        FilterError::UnsupportedInput {
            filter: STRINGIFY_CLASS.to_string(),
            type_name: "string".to_string(),
        }
    );

    // integer in, but declared to produce booleans: the output check catches it
    let mut mislabeled = factory
        .construct(STRINGIFY_CLASS, td("primitive::integer"), td("primitive::boolean"))
        .unwrap();
    assert!(matches!(
        mislabeled.execute_with_errors(Value::Integer(1)),
        Err(FilterError::UnsupportedOutput { rejected: Some(_), .. })
    ));
}

#[test]
fn sequencer_stops_at_first_failure() {
    let first = Arc::new(AtomicUsize::new(0));
    let third = Arc::new(AtomicUsize::new(0));

    let mut pipeline = Filter::sequencer("pipe", td("primitive::string"), td("primitive::string"));
    pipeline.add_child(counting("first", first.clone())).unwrap();
    pipeline
        .add_child(Filter::from_fn(
            "fails",
            td("primitive::string"),
            td("primitive::string"),
            |_, ctx| {
                ctx.add_error("cannot continue");
                None
            },
        ))
        .unwrap();
    pipeline.add_child(counting("third", third.clone())).unwrap();

    assert!(pipeline.execute(Value::from("x")).is_err());
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(third.load(Ordering::SeqCst), 0);
    assert!(pipeline.errors().iter().any(|e| e == "cannot continue"));
    assert!(pipeline.last_valid_output().is_none());
}

#[test]
fn multiplexer_failure_tolerance() {
    let build = |tolerate: bool| {
        let mut mux = Filter::multiplexer(
            "variants",
            td("primitive::string"),
            td("primitive::string[]"),
            tolerate,
        );
        for output in ["a", "b"] {
            mux.add_child(Filter::from_fn(
                output,
                td("primitive::string"),
                td("primitive::string"),
                move |_, _| Some(Value::from(output)),
            ))
            .unwrap();
        }
        mux.add_child(Filter::from_fn(
            "broken",
            td("primitive::string"),
            td("primitive::string"),
            |_, _| Some(Value::Integer(0)),
        ))
        .unwrap();
        mux
    };

    let mut tolerant = build(true);
    assert_eq!(
        tolerant.execute(Value::from("in")).unwrap(),
        Value::Array(vec![Value::from("a"), Value::from("b")])
    );

    let mut strict = build(false);
    assert!(matches!(
        strict.execute(Value::from("in")),
        Err(FilterError::NoResult { .. })
    ));
    assert!(strict.errors().iter().any(|e| e.contains("Branch 3")));
}

#[test]
fn alias_reaches_every_target() {
    let factory = FilterFactory::with_builtins();
    let string = || td("primitive::string");

    let mut mux = Filter::multiplexer("both", string(), td("primitive::string[]"), false);
    for _ in 0..2 {
        let child = factory
            .construct(STRING_CASE_CLASS, string(), string())
            .unwrap();
        mux.add_child(child).unwrap();
    }
    {
        let composite = mux.as_composite_mut().unwrap();
        composite.map_setting("case", 1, "case").unwrap();
        composite.map_setting("case", 2, "case").unwrap();
    }

    mux.set_data("case", "upper").unwrap();
    assert_eq!(mux.get_data("seq1_case").unwrap(), Some(Value::from("upper")));
    assert_eq!(mux.get_data("seq2_case").unwrap(), Some(Value::from("upper")));

    mux.set_data("seq2_case", "lower").unwrap();
    assert_eq!(mux.get_data("case").unwrap(), Some(Value::from("upper")));
    assert_eq!(
        mux.execute(Value::from("Ab")).unwrap(),
        Value::Array(vec![Value::from("AB"), Value::from("ab")])
    );
}

#[test]
fn typed_pipeline_over_class_instances() {
    let factory = FilterFactory::with_builtins();
    let submission = td("class::lib.pkp.classes.submission.Submission");
    let string = td("primitive::string");

    let mut extract = factory
        .construct(FIELD_EXTRACT_CLASS, submission.clone(), string.clone())
        .unwrap();
    extract.set_data("field", "title").unwrap();
    let mut upper = factory
        .construct(STRING_CASE_CLASS, string.clone(), string.clone())
        .unwrap();
    upper.set_data("case", "upper").unwrap();

    let mut pipeline = factory
        .construct("sequencer", submission, string)
        .unwrap();
    pipeline.add_child(extract).unwrap();
    pipeline.add_child(upper).unwrap();

    let article = Object::new("classes.article.Article")
        .extends("lib.pkp.classes.submission.Submission")
        .with_field("title", "typed filters");
    assert_eq!(
        pipeline.execute(Value::Object(article)).unwrap(),
        Value::from("TYPED FILTERS")
    );

    let author = Object::new("lib.pkp.classes.author.Author").with_field("title", "Dr");
    assert!(matches!(
        pipeline.execute(Value::Object(author)),
        Err(FilterError::UnsupportedInput { .. })
    ));
}
