use std::fmt;

/// Raised when a `Provider`/`Property` is evaluated while absent.
///
/// Mirrors the source's `NoValuePresent` exception (`spec.md §7`). Local to
/// property reads; callers that want an optional result use `or_none`/
/// `or_else` instead of propagating this.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoValuePresent;

impl fmt::Display for NoValuePresent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no value present")
    }
}

impl std::error::Error for NoValuePresent {}

/// Raised by `Property::set`/`default` once a property has been finalized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FinalizedMutation;

impl fmt::Display for FinalizedMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot mutate a finalized property")
    }
}

impl std::error::Error for FinalizedMutation {}
