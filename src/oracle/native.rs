//! Built-in oracle: unit propagation followed by a bounded model search.
//!
//! Every atom of a compiled rule compares one variable with a constant, so
//! the truth value of each atom only changes at the constants it mentions.
//! Trying one witness per region (the constants, their neighbours and the
//! midpoints between them) is therefore a complete decision procedure for
//! that fragment. Formulas outside it still get searched, but exhausting the
//! candidates reports [`CheckOutcome::Unknown`] rather than UNSAT.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use super::formula::{CmpOp, Formula, Model, Sort, Term, Value};
use super::{CheckOutcome, SatOracle};
use crate::error::OracleError;

/// Default bound on the number of assignments tried per check.
pub const DEFAULT_MAX_CANDIDATES: usize = 65_536;

/// How many assignments to try between deadline checks.
const DEADLINE_STRIDE: usize = 256;

#[derive(Debug, Clone, Default)]
struct Scope {
    declarations: BTreeMap<String, Sort>,
    assertions: Vec<Formula>,
}

/// In-process satisfiability backend for quantifier-free rule formulas.
#[derive(Debug, Clone)]
pub struct NativeOracle {
    scopes: Vec<Scope>,
    max_candidates: usize,
    last_model: Option<Model>,
}

impl Default for NativeOracle {
    fn default() -> Self {
        Self {
            scopes: vec![Scope::default()],
            max_candidates: DEFAULT_MAX_CANDIDATES,
            last_model: None,
        }
    }
}

impl NativeOracle {
    /// Create an oracle with the default search budget.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of assignments tried per check.
    #[must_use]
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates.max(1);
        self
    }

    /// Sort of a visible variable.
    #[must_use]
    pub fn sort_of(&self, name: &str) -> Option<Sort> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.declarations.get(name).copied())
    }

    /// Number of open scopes above the base scope.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Assertions of every open scope, outermost first.
    pub(super) fn visible_assertions(&self) -> Vec<&Formula> {
        self.scopes
            .iter()
            .flat_map(|scope| scope.assertions.iter())
            .collect()
    }

    pub(super) fn sort_or_err(&self, name: &str) -> Result<Sort, OracleError> {
        self.sort_of(name)
            .ok_or_else(|| OracleError::UndeclaredVariable(name.to_string()))
    }

    fn search(&self, timeout_ms: u64) -> Result<(CheckOutcome, Option<Model>), OracleError> {
        let deadline =
            (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
        let assertions = self.visible_assertions();
        let Some(fixed) = unit_assignment(&assertions, |name| self.sort_or_err(name))? else {
            return Ok((CheckOutcome::Unsat, None));
        };

        let mut free_sorts = BTreeMap::new();
        for formula in &assertions {
            for name in formula.variables() {
                if !fixed.contains_key(&name) {
                    let sort = self.sort_or_err(&name)?;
                    free_sorts.insert(name, sort);
                }
            }
        }

        let mut constants: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut complete = true;
        for formula in &assertions {
            collect_constants(formula, &fixed, &free_sorts, &mut constants, &mut complete);
        }

        let free: Vec<(String, Vec<Value>)> = free_sorts
            .iter()
            .map(|(name, sort)| {
                let consts = constants.get(name).map_or(&[][..], Vec::as_slice);
                (name.clone(), candidates(*sort, consts))
            })
            .collect();

        let space = free
            .iter()
            .fold(1_usize, |acc, (_, pool)| acc.saturating_mul(pool.len()));
        if space > self.max_candidates {
            tracing::debug!(
                space,
                budget = self.max_candidates,
                "search space exceeds candidate budget"
            );
            return Ok((CheckOutcome::Unknown, None));
        }

        let mut indices = vec![0_usize; free.len()];
        let mut model = fixed;
        let mut visited = 0_usize;
        loop {
            for ((name, pool), &index) in free.iter().zip(&indices) {
                model.insert(name.clone(), pool[index].clone());
            }
            if satisfies(&assertions, &model)? {
                return Ok((CheckOutcome::Sat, Some(model)));
            }

            visited += 1;
            if visited % DEADLINE_STRIDE == 0 && deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::debug!(visited, "oracle deadline reached");
                return Ok((CheckOutcome::Unknown, None));
            }

            let mut position = 0;
            loop {
                if position == indices.len() {
                    let outcome = if complete {
                        CheckOutcome::Unsat
                    } else {
                        CheckOutcome::Unknown
                    };
                    return Ok((outcome, None));
                }
                indices[position] += 1;
                if indices[position] < free[position].1.len() {
                    break;
                }
                indices[position] = 0;
                position += 1;
            }
        }
    }
}

impl SatOracle for NativeOracle {
    fn declare(&mut self, name: &str, sort: Sort) -> Result<(), OracleError> {
        if let Some(existing) = self.sort_of(name) {
            if existing != sort {
                return Err(OracleError::SortConflict {
                    name: name.to_string(),
                    existing: existing.to_string(),
                    requested: sort.to_string(),
                });
            }
            return Ok(());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.declarations.insert(name.to_string(), sort);
        }
        Ok(())
    }

    fn assert(&mut self, formula: Formula) -> Result<(), OracleError> {
        for name in formula.variables() {
            self.sort_or_err(&name)?;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.assertions.push(formula);
        }
        self.last_model = None;
        Ok(())
    }

    fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    fn pop(&mut self) -> Result<(), OracleError> {
        if self.scopes.len() <= 1 {
            return Err(OracleError::EmptyScope);
        }
        self.scopes.pop();
        self.last_model = None;
        Ok(())
    }

    fn check(&mut self, timeout_ms: u64) -> Result<CheckOutcome, OracleError> {
        self.last_model = None;
        let (outcome, model) = self.search(timeout_ms)?;
        self.last_model = model;
        Ok(outcome)
    }

    fn model(&self) -> Result<Model, OracleError> {
        self.last_model.clone().ok_or(OracleError::NoModel)
    }

    fn reset(&mut self) {
        self.scopes = vec![Scope::default()];
        self.last_model = None;
    }
}

fn satisfies(assertions: &[&Formula], model: &Model) -> Result<bool, OracleError> {
    for formula in assertions {
        if !formula.eval(model)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Values forced by top-level unit equalities.
///
/// Returns `None` when two units give one variable different values.
pub(super) fn unit_assignment<F>(
    assertions: &[&Formula],
    sort_of: F,
) -> Result<Option<Model>, OracleError>
where
    F: Fn(&str) -> Result<Sort, OracleError>,
{
    let mut units = Vec::new();
    for formula in assertions {
        collect_units(formula, &mut units);
    }
    let mut fixed = Model::new();
    for (name, value) in units {
        let sort = sort_of(&name)?;
        let Some(value) = value.coerce_to(sort) else {
            continue;
        };
        match fixed.get(&name) {
            Some(existing) if *existing != value => {
                tracing::debug!(variable = %name, "conflicting unit equalities");
                return Ok(None);
            }
            Some(_) => {}
            None => {
                fixed.insert(name, value);
            }
        }
    }
    Ok(Some(fixed))
}

/// Top-level `var == const` facts, looking through conjunctions.
fn collect_units(formula: &Formula, units: &mut Vec<(String, Value)>) {
    match formula {
        Formula::And(items) => {
            for item in items {
                collect_units(item, units);
            }
        }
        Formula::Atom(Term::Var(name)) => units.push((name.clone(), Value::Bool(true))),
        Formula::Not(inner) => {
            if let Formula::Atom(Term::Var(name)) = inner.as_ref() {
                units.push((name.clone(), Value::Bool(false)));
            }
        }
        Formula::Cmp {
            lhs: Term::Var(name),
            op: CmpOp::Eq,
            rhs: Term::Const(value),
        }
        | Formula::Cmp {
            lhs: Term::Const(value),
            op: CmpOp::Eq,
            rhs: Term::Var(name),
        } => units.push((name.clone(), value.clone())),
        _ => {}
    }
}

/// Constants each free variable is compared against.
///
/// Clears `complete` when an atom relates two free variables or orders
/// strings, since region witnesses no longer cover every case.
fn collect_constants(
    formula: &Formula,
    fixed: &Model,
    free: &BTreeMap<String, Sort>,
    constants: &mut BTreeMap<String, Vec<Value>>,
    complete: &mut bool,
) {
    match formula {
        Formula::Const(_) | Formula::Atom(_) => {}
        Formula::Cmp { lhs, op, rhs } => {
            let resolve = |term: &Term| -> Option<Value> {
                match term {
                    Term::Const(value) => Some(value.clone()),
                    Term::Var(name) => fixed.get(name).cloned(),
                }
            };
            let target = match (lhs, rhs) {
                (Term::Var(a), Term::Var(b)) if a == b => None,
                (Term::Var(a), Term::Var(b))
                    if free.contains_key(a) && free.contains_key(b) =>
                {
                    *complete = false;
                    None
                }
                (Term::Var(a), other) | (other, Term::Var(a)) if free.contains_key(a) => {
                    resolve(other).map(|value| (a, value))
                }
                _ => None,
            };
            if let Some((name, value)) = target {
                if op.is_ordering() && free.get(name) == Some(&Sort::Str) {
                    *complete = false;
                }
                constants.entry(name.clone()).or_default().push(value);
            }
        }
        Formula::Not(inner) => collect_constants(inner, fixed, free, constants, complete),
        Formula::And(items) | Formula::Or(items) => {
            for item in items {
                collect_constants(item, fixed, free, constants, complete);
            }
        }
        Formula::Implies(premise, conclusion) => {
            collect_constants(premise, fixed, free, constants, complete);
            collect_constants(conclusion, fixed, free, constants, complete);
        }
    }
}

/// One witness per region carved out by `constants`.
#[allow(clippy::cast_possible_truncation)]
fn candidates(sort: Sort, constants: &[Value]) -> Vec<Value> {
    match sort {
        Sort::Bool => vec![Value::Bool(false), Value::Bool(true)],
        Sort::Int => {
            let mut points = BTreeSet::from([0_i64]);
            for c in constants.iter().filter_map(Value::as_f64).filter(|c| c.is_finite()) {
                let (lo, hi) = (c.floor() as i64, c.ceil() as i64);
                points.extend([lo.saturating_sub(1), lo, hi, hi.saturating_add(1)]);
            }
            points.into_iter().map(Value::Int).collect()
        }
        Sort::Real => {
            let mut points: Vec<f64> = constants
                .iter()
                .filter_map(Value::as_f64)
                .filter(|c| c.is_finite())
                .collect();
            points.push(0.0);
            points.sort_by(f64::total_cmp);
            points.dedup();
            let mut witnesses = points.clone();
            witnesses.extend(points.windows(2).map(|w| w[0] + (w[1] - w[0]) / 2.0));
            if let (Some(min), Some(max)) = (points.first(), points.last()) {
                witnesses.push(min - 1.0);
                witnesses.push(max + 1.0);
            }
            witnesses.sort_by(f64::total_cmp);
            witnesses.dedup();
            witnesses.into_iter().map(Value::Real).collect()
        }
        Sort::Str => {
            let mut seen: BTreeSet<String> = constants
                .iter()
                .filter_map(|v| match v {
                    Value::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .collect();
            let fresh = (0..)
                .map(|i| format!("#fresh{i}"))
                .find(|s| !seen.contains(s))
                .unwrap_or_default();
            seen.insert(fresh);
            seen.into_iter().map(Value::Str).collect()
        }
    }
}
