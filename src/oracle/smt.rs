//! `OxiZ` SMT backend.
//!
//! Visible assertions are translated into a fresh `OxiZ` solver on every
//! check. Booleans map to boolean terms; integers, reals and strings map to
//! integer terms:
//!
//! - reals are scaled by a power of ten large enough to keep every decimal
//!   constant integral and to leave room between neighbouring constants
//! - strings become odd codes ranked by the string constants they are
//!   compared with, leaving even codes for every other string
//!
//! Atoms outside that encoding (mixed integer/real comparisons, orderings on
//! booleans) fall back to the in-process [`NativeOracle`]. Scopes and models
//! are kept on the Rust side; the solver only answers SAT, UNSAT or unknown.

use std::collections::{BTreeMap, BTreeSet};

use oxiz::{
    TermManager,
    solver::{Solver, SolverConfig, SolverResult},
};

use super::formula::{CmpOp, Formula, Model, Sort, Term, Value};
use super::native::{NativeOracle, unit_assignment};
use super::{CheckOutcome, SatOracle};
use crate::error::OracleError;

/// Decimal places of a real constant that are kept exactly.
const MAX_DECIMALS: i32 = 6;

/// Largest power of ten used to scale reals.
const MAX_SCALE_EXPONENT: i32 = 12;

/// Magnitude above which a scaled constant no longer fits the encoding.
const MAX_ENCODED_MAGNITUDE: f64 = 9.0e15;

/// SMT-backed oracle.
#[derive(Debug, Clone, Default)]
pub struct OxizOracle {
    inner: NativeOracle,
    last_model: Option<Model>,
}

impl OxizOracle {
    /// Create an oracle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the candidate budget of the in-process fallback.
    #[must_use]
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.inner = self.inner.with_max_candidates(max_candidates);
        self
    }

    /// Sort of a visible variable.
    #[must_use]
    pub fn sort_of(&self, name: &str) -> Option<Sort> {
        self.inner.sort_of(name)
    }

    /// Decide the visible assertions with the solver.
    ///
    /// Returns `None` when some atom has no integer encoding.
    fn solve(&self, timeout_ms: u64) -> Result<Option<CheckOutcome>, OracleError> {
        let assertions = self.inner.visible_assertions();
        let mut sorts = BTreeMap::new();
        for formula in &assertions {
            for name in formula.variables() {
                let sort = self.inner.sort_or_err(&name)?;
                sorts.insert(name, sort);
            }
        }
        let encoding = Encoding::new(&assertions, sorts);

        let config = if timeout_ms > 0 {
            SolverConfig::default().with_timeout(timeout_ms)
        } else {
            SolverConfig::default()
        };
        let mut solver = Solver::with_config(config);
        let mut tm = TermManager::new();
        let bool_sort = tm.sorts.bool_sort;
        let int_sort = tm.sorts.int_sort;

        let truth = tm.mk_var("oxiproof_true", bool_sort);
        solver.assert(truth, &mut tm);

        let mut vars = BTreeMap::new();
        for (index, (name, sort)) in encoding.sorts.iter().enumerate() {
            let smt_sort = if *sort == Sort::Bool { bool_sort } else { int_sort };
            vars.insert(name.as_str(), tm.mk_var(&format!("v{index}"), smt_sort));
        }

        for formula in &assertions {
            let mut stack = vec![Step::Visit(*formula)];
            let mut terms = Vec::new();
            while let Some(step) = stack.pop() {
                match step {
                    Step::Visit(Formula::Const(true)) => terms.push(truth),
                    Step::Visit(Formula::Const(false)) => terms.push(tm.mk_not(truth)),
                    Step::Visit(Formula::Atom(term)) => match term {
                        Term::Const(Value::Bool(true)) => terms.push(truth),
                        Term::Const(Value::Bool(false)) => terms.push(tm.mk_not(truth)),
                        Term::Var(name) if encoding.sort(name) == Some(Sort::Bool) => {
                            let Some(var) = vars.get(name.as_str()) else {
                                return Ok(None);
                            };
                            terms.push(*var);
                        }
                        Term::Var(_) | Term::Const(_) => return Ok(None),
                    },
                    Step::Visit(Formula::Cmp { lhs, op, rhs }) => {
                        let Some(plan) = encoding.plan(lhs, *op, rhs) else {
                            tracing::debug!(atom = %formula, "atom has no integer encoding");
                            return Ok(None);
                        };
                        let (lhs, op, rhs) = match plan {
                            CmpPlan::Fixed(true) => {
                                terms.push(truth);
                                continue;
                            }
                            CmpPlan::Fixed(false) => {
                                terms.push(tm.mk_not(truth));
                                continue;
                            }
                            CmpPlan::BoolLit { var, positive } => {
                                let Some(&var) = vars.get(var) else {
                                    return Ok(None);
                                };
                                terms.push(if positive { var } else { tm.mk_not(var) });
                                continue;
                            }
                            CmpPlan::BoolIff { a, b, equal } => {
                                let (Some(&a), Some(&b)) = (vars.get(a), vars.get(b)) else {
                                    return Ok(None);
                                };
                                // a == b  iff  (a or not b) and (not a or b)
                                let not_a = tm.mk_not(a);
                                let not_b = tm.mk_not(b);
                                let forward = tm.mk_or([a, not_b]);
                                let backward = tm.mk_or([not_a, b]);
                                let not_forward = tm.mk_not(forward);
                                let not_backward = tm.mk_not(backward);
                                let differ = tm.mk_or([not_forward, not_backward]);
                                terms.push(if equal { tm.mk_not(differ) } else { differ });
                                continue;
                            }
                            CmpPlan::VarVar { a, op, b } => {
                                let (Some(&a), Some(&b)) = (vars.get(a), vars.get(b)) else {
                                    return Ok(None);
                                };
                                (a, op, b)
                            }
                            CmpPlan::VarConst { var, op, value } => {
                                let Some(&var) = vars.get(var) else {
                                    return Ok(None);
                                };
                                (var, op, tm.mk_int(value))
                            }
                        };
                        let term = match op {
                            CmpOp::Lt => tm.mk_lt(lhs, rhs),
                            CmpOp::Le => tm.mk_le(lhs, rhs),
                            CmpOp::Gt => tm.mk_gt(lhs, rhs),
                            CmpOp::Ge => tm.mk_ge(lhs, rhs),
                            CmpOp::Eq => tm.mk_eq(lhs, rhs),
                            CmpOp::Ne => {
                                let eq = tm.mk_eq(lhs, rhs);
                                tm.mk_not(eq)
                            }
                        };
                        terms.push(term);
                    }
                    Step::Visit(Formula::Not(inner)) => {
                        stack.push(Step::Not);
                        stack.push(Step::Visit(inner));
                    }
                    Step::Visit(Formula::And(items)) => {
                        stack.push(Step::And(items.len()));
                        stack.extend(items.iter().rev().map(Step::Visit));
                    }
                    Step::Visit(Formula::Or(items)) => {
                        stack.push(Step::Or(items.len()));
                        stack.extend(items.iter().rev().map(Step::Visit));
                    }
                    Step::Visit(Formula::Implies(premise, conclusion)) => {
                        stack.push(Step::Implies);
                        stack.push(Step::Visit(conclusion));
                        stack.push(Step::Visit(premise));
                    }
                    Step::Not => {
                        let Some(inner) = terms.pop() else {
                            return Ok(None);
                        };
                        terms.push(tm.mk_not(inner));
                    }
                    Step::And(0) => terms.push(truth),
                    Step::And(count) => {
                        let Some(start) = terms.len().checked_sub(count) else {
                            return Ok(None);
                        };
                        let negated: Vec<_> = terms
                            .split_off(start)
                            .into_iter()
                            .map(|t| tm.mk_not(t))
                            .collect();
                        let any_false = tm.mk_or(negated);
                        terms.push(tm.mk_not(any_false));
                    }
                    Step::Or(0) => terms.push(tm.mk_not(truth)),
                    Step::Or(count) => {
                        let Some(start) = terms.len().checked_sub(count) else {
                            return Ok(None);
                        };
                        let items = terms.split_off(start);
                        terms.push(tm.mk_or(items));
                    }
                    Step::Implies => {
                        let (Some(conclusion), Some(premise)) = (terms.pop(), terms.pop()) else {
                            return Ok(None);
                        };
                        let not_premise = tm.mk_not(premise);
                        terms.push(tm.mk_or([not_premise, conclusion]));
                    }
                }
            }
            let Some(encoded) = terms.pop() else {
                return Ok(None);
            };
            solver.assert(encoded, &mut tm);
        }

        let outcome = match solver.check(&mut tm) {
            SolverResult::Sat => CheckOutcome::Sat,
            SolverResult::Unsat => CheckOutcome::Unsat,
            SolverResult::Unknown => CheckOutcome::Unknown,
        };
        tracing::debug!(
            assertions = assertions.len(),
            variables = encoding.sorts.len(),
            ?outcome,
            "smt check finished"
        );
        Ok(Some(outcome))
    }

    /// A model for a SAT verdict: the unit-forced values, completed by the
    /// fallback search when variables remain free.
    fn build_model(&mut self, timeout_ms: u64) -> Result<Option<Model>, OracleError> {
        let assertions = self.inner.visible_assertions();
        let Some(mut model) = unit_assignment(&assertions, |name| self.inner.sort_or_err(name))?
        else {
            return Ok(None);
        };
        let mut free = BTreeSet::new();
        for formula in &assertions {
            free.extend(
                formula
                    .variables()
                    .into_iter()
                    .filter(|name| !model.contains_key(name)),
            );
        }
        if free.is_empty() {
            return Ok(Some(model));
        }

        if self.inner.check(timeout_ms)? == CheckOutcome::Sat {
            return self.inner.model().map(Some);
        }
        tracing::debug!(
            free = free.len(),
            "solver found a model the search could not rebuild, reporting free variables at zero"
        );
        for name in free {
            let sort = self.inner.sort_or_err(&name)?;
            model.insert(name, sort.zero());
        }
        Ok(Some(model))
    }
}

impl SatOracle for OxizOracle {
    fn declare(&mut self, name: &str, sort: Sort) -> Result<(), OracleError> {
        self.inner.declare(name, sort)
    }

    fn assert(&mut self, formula: Formula) -> Result<(), OracleError> {
        self.last_model = None;
        self.inner.assert(formula)
    }

    fn push(&mut self) {
        self.inner.push();
    }

    fn pop(&mut self) -> Result<(), OracleError> {
        self.last_model = None;
        self.inner.pop()
    }

    fn check(&mut self, timeout_ms: u64) -> Result<CheckOutcome, OracleError> {
        self.last_model = None;
        match self.solve(timeout_ms)? {
            Some(CheckOutcome::Sat) => {
                let Some(model) = self.build_model(timeout_ms)? else {
                    return Ok(CheckOutcome::Unsat);
                };
                self.last_model = Some(model);
                Ok(CheckOutcome::Sat)
            }
            Some(CheckOutcome::Unsat) => Ok(CheckOutcome::Unsat),
            Some(CheckOutcome::Unknown) | None => {
                let outcome = self.inner.check(timeout_ms)?;
                if outcome == CheckOutcome::Sat {
                    self.last_model = Some(self.inner.model()?);
                }
                Ok(outcome)
            }
        }
    }

    fn model(&self) -> Result<Model, OracleError> {
        self.last_model.clone().ok_or(OracleError::NoModel)
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.last_model = None;
    }
}

/// One unit of work in the post-order translation of a formula.
enum Step<'f> {
    Visit(&'f Formula),
    Not,
    And(usize),
    Or(usize),
    Implies,
}

/// How one comparison atom is expressed over solver terms.
#[derive(Debug, Clone, PartialEq)]
enum CmpPlan<'a> {
    Fixed(bool),
    BoolLit { var: &'a str, positive: bool },
    BoolIff { a: &'a str, b: &'a str, equal: bool },
    VarVar { a: &'a str, op: CmpOp, b: &'a str },
    VarConst { var: &'a str, op: CmpOp, value: i64 },
}

/// Sorts and constant tables shared by every atom of one check.
#[derive(Debug)]
struct Encoding {
    sorts: BTreeMap<String, Sort>,
    real_scale: f64,
    strings: Vec<String>,
}

impl Encoding {
    fn new(assertions: &[&Formula], sorts: BTreeMap<String, Sort>) -> Self {
        let mut strings = BTreeSet::new();
        let mut decimals = 0;
        for formula in assertions {
            visit_constants(formula, &mut |value| match value {
                Value::Str(s) => {
                    strings.insert(s.clone());
                }
                Value::Real(r) => decimals = decimals.max(decimal_places(*r)),
                Value::Bool(_) | Value::Int(_) => {}
            });
        }
        let real_vars = sorts.values().filter(|s| **s == Sort::Real).count();
        let headroom = i32::try_from((real_vars + 1).to_string().len()).unwrap_or(MAX_SCALE_EXPONENT);
        let exponent = (decimals + headroom).min(MAX_SCALE_EXPONENT);
        Self {
            sorts,
            real_scale: 10_f64.powi(exponent),
            strings: strings.into_iter().collect(),
        }
    }

    fn sort(&self, name: &str) -> Option<Sort> {
        self.sorts.get(name).copied()
    }

    fn plan<'a>(&self, lhs: &'a Term, op: CmpOp, rhs: &'a Term) -> Option<CmpPlan<'a>> {
        match (lhs, rhs) {
            (Term::Const(a), Term::Const(b)) => {
                Formula::cmp(a.clone(), op, b.clone())
                    .eval(&Model::new())
                    .ok()
                    .map(CmpPlan::Fixed)
            }
            (Term::Var(var), Term::Const(value)) => self.plan_const(var, op, value),
            (Term::Const(value), Term::Var(var)) => self.plan_const(var, op.flipped(), value),
            (Term::Var(a), Term::Var(b)) => {
                let (sa, sb) = (self.sort(a)?, self.sort(b)?);
                if sa != sb {
                    return None;
                }
                match (sa, op) {
                    (Sort::Bool, CmpOp::Eq | CmpOp::Ne) => Some(CmpPlan::BoolIff {
                        a,
                        b,
                        equal: op == CmpOp::Eq,
                    }),
                    (Sort::Bool, _) => None,
                    _ => Some(CmpPlan::VarVar { a, op, b }),
                }
            }
        }
    }

    fn plan_const<'a>(&self, var: &'a str, op: CmpOp, value: &Value) -> Option<CmpPlan<'a>> {
        match (self.sort(var)?, value) {
            (Sort::Bool, Value::Bool(b)) => match op {
                CmpOp::Eq => Some(CmpPlan::BoolLit { var, positive: *b }),
                CmpOp::Ne => Some(CmpPlan::BoolLit { var, positive: !*b }),
                _ => None,
            },
            (Sort::Int, Value::Int(i)) => Some(CmpPlan::VarConst { var, op, value: *i }),
            (Sort::Int, Value::Real(r)) => integer_bound(var, op, *r),
            (Sort::Real, Value::Int(_) | Value::Real(_)) => {
                let scaled = value.as_f64()? * self.real_scale;
                let rounded = scaled.round();
                let snapped = if (scaled - rounded).abs() <= 1e-6 { rounded } else { scaled };
                integer_bound(var, op, snapped)
            }
            (Sort::Str, Value::Str(s)) => {
                let rank = self.strings.binary_search(s).ok()?;
                let code = i64::try_from(rank).ok()?.checked_mul(2)?.checked_add(1)?;
                Some(CmpPlan::VarConst { var, op, value: code })
            }
            _ => None,
        }
    }
}

/// `var op c` over the integers, for a real constant `c`.
#[allow(clippy::cast_possible_truncation)]
fn integer_bound(var: &str, op: CmpOp, c: f64) -> Option<CmpPlan<'_>> {
    if !c.is_finite() || c.abs() >= MAX_ENCODED_MAGNITUDE {
        return None;
    }
    if c.fract() == 0.0 {
        return Some(CmpPlan::VarConst { var, op, value: c as i64 });
    }
    Some(match op {
        CmpOp::Lt | CmpOp::Le => CmpPlan::VarConst {
            var,
            op: CmpOp::Le,
            value: c.floor() as i64,
        },
        CmpOp::Gt | CmpOp::Ge => CmpPlan::VarConst {
            var,
            op: CmpOp::Ge,
            value: c.ceil() as i64,
        },
        CmpOp::Eq => CmpPlan::Fixed(false),
        CmpOp::Ne => CmpPlan::Fixed(true),
    })
}

/// Decimal places of `r` as printed, capped.
fn decimal_places(r: f64) -> i32 {
    let printed = r.to_string();
    let places = printed.split_once('.').map_or(0, |(_, frac)| frac.len());
    i32::try_from(places).map_or(MAX_DECIMALS, |p| p.min(MAX_DECIMALS))
}

fn visit_constants(formula: &Formula, visit: &mut impl FnMut(&Value)) {
    match formula {
        Formula::Const(_) | Formula::Atom(Term::Var(_)) => {}
        Formula::Atom(Term::Const(value)) => visit(value),
        Formula::Cmp { lhs, rhs, .. } => {
            for term in [lhs, rhs] {
                if let Term::Const(value) = term {
                    visit(value);
                }
            }
        }
        Formula::Not(inner) => visit_constants(inner, visit),
        Formula::And(items) | Formula::Or(items) => {
            for item in items {
                visit_constants(item, visit);
            }
        }
        Formula::Implies(premise, conclusion) => {
            visit_constants(premise, visit);
            visit_constants(conclusion, visit);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn oracle_with(vars: &[(&str, Sort)]) -> OxizOracle {
        let mut oracle = OxizOracle::new();
        for (name, sort) in vars {
            oracle.declare(name, *sort).unwrap();
        }
        oracle
    }

    #[test]
    fn test_bound_violation_is_sat() {
        let mut oracle = oracle_with(&[("amount", Sort::Int)]);
        oracle.assert(Formula::eq("amount", 150_000_i64)).unwrap();
        oracle.assert(Formula::le("amount", 100_000_i64).negate()).unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Sat);
        assert_eq!(oracle.model().unwrap().get("amount"), Some(&Value::Int(150_000)));
    }

    #[test]
    fn test_real_decimals_decided_exactly() {
        let mut oracle = oracle_with(&[("dti", Sort::Real)]);
        oracle.assert(Formula::eq("dti", 0.35)).unwrap();
        oracle.assert(Formula::le("dti", 0.43).negate()).unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Unsat);
        assert!(matches!(oracle.model(), Err(OracleError::NoModel)));

        oracle.reset();
        oracle.declare("dti", Sort::Real).unwrap();
        oracle.assert(Formula::eq("dti", 0.43)).unwrap();
        oracle.assert(Formula::lt("dti", 0.43).negate()).unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Sat);
    }

    #[test]
    fn test_variable_ordering() {
        let mut oracle = oracle_with(&[("x", Sort::Int), ("y", Sort::Int)]);
        oracle
            .assert(Formula::cmp(Term::var("x"), CmpOp::Lt, Term::var("y")))
            .unwrap();
        oracle
            .assert(Formula::cmp(Term::var("y"), CmpOp::Lt, Term::var("x")))
            .unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Unsat);
    }

    #[test]
    fn test_integer_gap() {
        let mut oracle = oracle_with(&[("n", Sort::Int)]);
        oracle.assert(Formula::gt("n", 3_i64)).unwrap();
        oracle.assert(Formula::lt("n", 4_i64)).unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Unsat);

        oracle.reset();
        oracle.declare("n", Sort::Int).unwrap();
        oracle.assert(Formula::gt("n", 3_i64)).unwrap();
        oracle.assert(Formula::lt("n", 4.5)).unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Sat);
        assert_eq!(oracle.model().unwrap().get("n"), Some(&Value::Int(4)));
    }

    #[test]
    fn test_push_pop_isolation() {
        let mut oracle = oracle_with(&[("flag", Sort::Bool)]);
        oracle.assert(Formula::var("flag")).unwrap();
        oracle.push();
        oracle.assert(Formula::not(Formula::var("flag"))).unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Unsat);
        oracle.pop().unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Sat);
        assert_eq!(oracle.model().unwrap().get("flag"), Some(&Value::Bool(true)));
        assert!(matches!(oracle.pop(), Err(OracleError::EmptyScope)));
    }

    #[test]
    fn test_implication_counterexample() {
        let mut oracle = oracle_with(&[("is_denial", Sort::Bool), ("has_reason", Sort::Bool)]);
        oracle.assert(Formula::eq("is_denial", true)).unwrap();
        oracle.assert(Formula::eq("has_reason", false)).unwrap();
        oracle
            .assert(
                Formula::implies(Formula::var("is_denial"), Formula::var("has_reason")).negate(),
            )
            .unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Sat);
        let model = oracle.model().unwrap();
        assert_eq!(model.get("has_reason"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_string_codes() {
        let mut oracle = oracle_with(&[("status", Sort::Str)]);
        oracle.assert(Formula::eq("status", Term::constant("denied"))).unwrap();
        oracle
            .assert(Formula::cmp(Term::var("status"), CmpOp::Ne, Term::constant("denied")))
            .unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Unsat);

        oracle.reset();
        oracle.declare("status", Sort::Str).unwrap();
        oracle
            .assert(Formula::cmp(Term::constant("approved"), CmpOp::Lt, Term::var("status")))
            .unwrap();
        oracle.assert(Formula::lt("status", Term::constant("denied"))).unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Sat);
    }

    #[test]
    fn test_mixed_sorts_fall_back() {
        let mut oracle = oracle_with(&[("a", Sort::Int), ("b", Sort::Real)]);
        oracle.assert(Formula::eq("a", 2_i64)).unwrap();
        oracle.assert(Formula::eq("b", 2.5)).unwrap();
        oracle
            .assert(Formula::cmp(Term::var("a"), CmpOp::Lt, Term::var("b")))
            .unwrap();
        assert_eq!(oracle.check(1000).unwrap(), CheckOutcome::Sat);
    }

    #[test]
    fn test_plan_flips_constant_lhs() {
        let encoding = Encoding::new(&[], BTreeMap::from([("x".to_string(), Sort::Int)]));
        let lhs = Term::constant(5_i64);
        let rhs = Term::var("x");
        assert_eq!(
            encoding.plan(&lhs, CmpOp::Lt, &rhs),
            Some(CmpPlan::VarConst {
                var: "x",
                op: CmpOp::Gt,
                value: 5
            })
        );
    }

    #[test]
    fn test_integer_bound_rounding() {
        assert_eq!(
            integer_bound("x", CmpOp::Lt, 2.5),
            Some(CmpPlan::VarConst { var: "x", op: CmpOp::Le, value: 2 })
        );
        assert_eq!(
            integer_bound("x", CmpOp::Gt, -2.5),
            Some(CmpPlan::VarConst { var: "x", op: CmpOp::Ge, value: -2 })
        );
        assert_eq!(integer_bound("x", CmpOp::Eq, 2.5), Some(CmpPlan::Fixed(false)));
        assert_eq!(integer_bound("x", CmpOp::Le, f64::NAN), None);
        assert_eq!(decimal_places(0.43), 2);
        assert_eq!(decimal_places(1e-9), MAX_DECIMALS);
    }
}
