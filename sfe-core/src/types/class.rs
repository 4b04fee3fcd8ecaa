//! `class::` namespace
//!
//! The payload is a dotted class path; the segment after the last `.` is the
//! class name a value must be an instance of. The path is trusted as given:
//! no allow-list of packages is enforced, so any class name a caller stores in
//! a descriptor will be matched against.

use super::{ParseError, TypeMatcher};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct ClassMatcher {
    package: String,
    class_name: String,
}

impl ClassMatcher {
    pub fn new(class_path: &str) -> Result<Self, ParseError> {
        let (package, class_name) = match class_path.rfind('.') {
            Some(pos) => (&class_path[..pos], &class_path[pos + 1..]),
            None => ("", class_path),
        };
        if class_name.is_empty() {
            return Err(ParseError::EmptyTypeName(class_path.to_string()));
        }
        Ok(Self {
            package: package.to_string(),
            class_name: class_name.to_string(),
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Matcher constructor registered for the `class` namespace
    pub fn construct(type_name: &str) -> Result<Box<dyn TypeMatcher>, ParseError> {
        Ok(Box::new(ClassMatcher::new(type_name)?))
    }
}

impl TypeMatcher for ClassMatcher {
    fn check_type(&self, value: &Value) -> bool {
        value
            .as_object()
            .map_or(false, |object| object.is_a(&self.class_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_last_separator() {
        let matcher = ClassMatcher::new("lib.pkp.classes.submission.Submission").unwrap();
        assert_eq!(matcher.package(), "lib.pkp.classes.submission");
        assert_eq!(matcher.class_name(), "Submission");
    }

    #[test]
    fn test_bare_class_name() {
        let matcher = ClassMatcher::new("Author").unwrap();
        assert_eq!(matcher.package(), "");
        assert_eq!(matcher.class_name(), "Author");
    }

    #[test]
    fn test_trailing_separator_rejected() {
        assert!(matches!(
            ClassMatcher::new("lib.pkp."),
            Err(ParseError::EmptyTypeName(_))
        ));
    }
}
