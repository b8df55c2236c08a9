//! Satisfiability oracle.
//!
//! The engine talks to any backend through [`SatOracle`]: declare typed
//! variables, assert formulas inside push/pop scopes, then ask for a verdict
//! under a timeout. [`NativeOracle`] is the built-in backend; with the `smt`
//! feature, [`OxizOracle`] hands the check to the `OxiZ` solver and is the
//! default.

pub mod formula;
pub mod native;
#[cfg(feature = "smt")]
pub mod smt;

use serde::{Deserialize, Serialize};

pub use formula::{CmpOp, Formula, Model, Sort, Term, Value};
pub use native::NativeOracle;
#[cfg(feature = "smt")]
pub use smt::OxizOracle;

/// The oracle used when none is chosen explicitly.
#[cfg(feature = "smt")]
pub type DefaultOracle = OxizOracle;

/// The oracle used when none is chosen explicitly.
#[cfg(not(feature = "smt"))]
pub type DefaultOracle = NativeOracle;

use crate::error::OracleError;

/// Verdict of a satisfiability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    /// A satisfying assignment exists; [`SatOracle::model`] returns it.
    Sat,
    /// No assignment satisfies the asserted formulas.
    Unsat,
    /// The backend gave up (timeout, budget or undecided fragment).
    Unknown,
}

/// A satisfiability-solving backend.
///
/// Declarations and assertions made after [`push`](SatOracle::push) are
/// discarded by the matching [`pop`](SatOracle::pop).
pub trait SatOracle: Send {
    /// Declare a variable of the given sort in the current scope.
    ///
    /// Re-declaring with the same sort is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::SortConflict`] if the name is already visible
    /// with a different sort.
    fn declare(&mut self, name: &str, sort: Sort) -> Result<(), OracleError>;

    /// Assert a formula in the current scope.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::UndeclaredVariable`] if the formula mentions a
    /// variable not visible in the current scope.
    fn assert(&mut self, formula: Formula) -> Result<(), OracleError>;

    /// Open a new scope.
    fn push(&mut self);

    /// Close the innermost scope.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::EmptyScope`] when there is no open scope.
    fn pop(&mut self) -> Result<(), OracleError>;

    /// Decide the conjunction of all visible assertions.
    ///
    /// A `timeout_ms` of zero means no timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if an assertion is ill-sorted.
    fn check(&mut self, timeout_ms: u64) -> Result<CheckOutcome, OracleError>;

    /// The satisfying assignment found by the last [`check`](SatOracle::check).
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::NoModel`] unless the last check returned SAT.
    fn model(&self) -> Result<Model, OracleError>;

    /// Drop every scope, declaration and assertion.
    fn reset(&mut self);
}
