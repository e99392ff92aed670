//! Expected-error evaluation
//!
//! Inverts a step's pass/fail semantics: with an expectation attached, a
//! failing action can pass and a succeeding one can fail.

use crate::core::step::{ErrorMatcher, ExpectError};

/// Check the final error (if any) of a step against its expectation.
///
/// Returns the failure message when the expectation is not met.
pub fn check(expect: &ExpectError, error: Option<&str>) -> Result<(), String> {
    match (expect.should_error, error) {
        (true, None) => Err("expected an error but the step succeeded".to_string()),
        (false, Some(error)) => Err(format!("expected no error but got: {}", error)),
        (false, None) => Ok(()),
        (true, Some(error)) => match expect.matchers.iter().find(|m| !matches(m, error)) {
            Some(matcher) => Err(format!(
                "error \"{}\" does not match expectation: {}",
                error,
                describe(matcher)
            )),
            None => Ok(()),
        },
    }
}

fn matches(matcher: &ErrorMatcher, error: &str) -> bool {
    match matcher {
        ErrorMatcher::Any => true,
        ErrorMatcher::Contains(s) => error.contains(s.as_str()),
        ErrorMatcher::NotContains(s) => !error.contains(s.as_str()),
        ErrorMatcher::Exact(s) => error == s,
        ErrorMatcher::StartsWith(s) => error.starts_with(s.as_str()),
        ErrorMatcher::EndsWith(s) => error.ends_with(s.as_str()),
        ErrorMatcher::Matches(re) => re.is_match(error),
        ErrorMatcher::NotMatches(re) => !re.is_match(error),
    }
}

fn describe(matcher: &ErrorMatcher) -> String {
    match matcher {
        ErrorMatcher::Any => "any error".to_string(),
        ErrorMatcher::Contains(s) => format!("contains \"{}\"", s),
        ErrorMatcher::NotContains(s) => format!("does not contain \"{}\"", s),
        ErrorMatcher::Exact(s) => format!("equals \"{}\"", s),
        ErrorMatcher::StartsWith(s) => format!("starts with \"{}\"", s),
        ErrorMatcher::EndsWith(s) => format!("ends with \"{}\"", s),
        ErrorMatcher::Matches(re) => format!("matches /{}/", re.as_str()),
        ErrorMatcher::NotMatches(re) => format!("does not match /{}/", re.as_str()),
    }
}
