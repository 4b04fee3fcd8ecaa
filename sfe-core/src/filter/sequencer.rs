//! Sequencer: children piped left to right

use super::CompositeFilter;
use crate::value::Value;
use tracing::debug;

/// Feed `input` through every child in sequence order
///
/// The first failing child ends the run with no result; later children are
/// not invoked. Errors of all children are copied into the sequencer either
/// way. With no children the input passes through unchanged.
pub(super) fn run(composite: &mut CompositeFilter, input: Value) -> Option<Value> {
    let mut current = Some(input);

    for (sequence, child) in composite.children_mut().iter_mut() {
        let Some(value) = current.take() else {
            break;
        };
        match child.execute(value) {
            Ok(output) => current = Some(output),
            Err(e) => {
                debug!("Sequencer stopped at sub-filter {}: {}", sequence, e);
                break;
            }
        }
    }

    composite.collect_child_errors();
    current
}
