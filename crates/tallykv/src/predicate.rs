//! Conflict predicates: guards deciding whether a conditional update fires.
//!
//! A predicate is a deterministic pure function of the existing entry and the
//! incoming change. No I/O, no side effects; the same inputs always produce
//! the same answer, so retries and tests are reproducible.

use std::sync::Arc;

use crate::error::PredicateError;
use crate::value::{Entry, Value};

/// The incoming side of a conflict, as seen by a predicate.
///
/// Borrowed view over the request; predicates never receive mutable access
/// to store state.
#[derive(Debug, Clone, Copy)]
pub struct Incoming<'a> {
   /// The value the request wants to write.
   pub value: &'a Value,

   /// The request's logical timestamp, if supplied.
   pub last_updated: Option<i64>,
}

/// A shared guard evaluated when an upsert hits an existing key.
///
/// Returns `Ok(true)` to let the update branch fire, `Ok(false)` to skip it,
/// or `Err` when the inputs cannot be compared (surfaced to the caller as
/// [`crate::Error::Predicate`]; the entry is left unchanged).
pub type ConflictPredicate =
   Arc<dyn Fn(&Entry, Incoming<'_>) -> Result<bool, PredicateError> + Send + Sync>;

/// Predicate that always lets the update fire.
///
/// This is the default behavior of the `DoUpdate` policy; it exists so the
/// choice can be spelled out explicitly at call sites.
pub fn always() -> ConflictPredicate {
   Arc::new(|_existing, _incoming| Ok(true))
}

/// Predicate that fires only when the incoming logical timestamp is strictly
/// newer than the stored one.
///
/// Fails with a [`PredicateError`] when either side has no timestamp: the
/// comparison is undefined, and guessing would make stale-write protection
/// silently ineffective.
pub fn last_updated_newer() -> ConflictPredicate {
   Arc::new(|existing, incoming| {
      let stored = existing.last_updated.ok_or_else(|| {
         PredicateError::new(format!(
            "existing entry for key '{}' has no last_updated timestamp",
            existing.key
         ))
      })?;

      let proposed = incoming
         .last_updated
         .ok_or_else(|| PredicateError::new("incoming change has no last_updated timestamp"))?;

      Ok(proposed > stored)
   })
}
