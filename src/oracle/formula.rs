//! Quantifier-free formulas over typed variables.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// Sort (type) of a solver-visible variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    /// Boolean.
    #[serde(alias = "boolean")]
    Bool,
    /// Mathematical integer (represented as `i64`).
    #[serde(alias = "integer")]
    Int,
    /// Real number (represented as `f64`).
    #[serde(alias = "float", alias = "numeric")]
    Real,
    /// String.
    #[serde(rename = "string", alias = "str")]
    Str,
}

impl Sort {
    /// The value a variable of this sort takes when nothing else is known.
    #[must_use]
    pub fn zero(self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Real => Value::Real(0.0),
            Self::Str => Value::Str(String::new()),
        }
    }

    /// Whether the sort is numeric.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Real)
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "Bool",
            Self::Int => "Int",
            Self::Real => "Real",
            Self::Str => "String",
        };
        f.write_str(name)
    }
}

/// A concrete value of some sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Real value.
    Real(f64),
    /// String value.
    Str(String),
}

impl Value {
    /// The sort of this value.
    #[must_use]
    pub const fn sort(&self) -> Sort {
        match self {
            Self::Bool(_) => Sort::Bool,
            Self::Int(_) => Sort::Int,
            Self::Real(_) => Sort::Real,
            Self::Str(_) => Sort::Str,
        }
    }

    /// Numeric view of the value, if it has one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Real(r) => Some(*r),
            Self::Bool(_) | Self::Str(_) => None,
        }
    }

    /// Convert the value to `sort` without losing information.
    ///
    /// Integers widen to reals; reals narrow to integers only when integral.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn coerce_to(&self, sort: Sort) -> Option<Self> {
        match (self, sort) {
            (Self::Int(i), Sort::Real) => Some(Self::Real(*i as f64)),
            (Self::Real(r), Sort::Int) if r.fract() == 0.0 && r.is_finite() => {
                Some(Self::Int(*r as i64))
            }
            (v, s) if v.sort() == s => Some(v.clone()),
            _ => None,
        }
    }

    fn compare(&self, other: &Self) -> Result<Option<Ordering>, OracleError> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Ok(Some(a.cmp(b))),
            (Self::Str(a), Self::Str(b)) => Ok(Some(a.cmp(b))),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
                _ => Err(OracleError::SortMismatch(format!(
                    "cannot compare {} with {}",
                    a.sort(),
                    b.sort()
                ))),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Self::Real(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

/// An assignment of values to variables.
pub type Model = BTreeMap<String, Value>;

/// A term: either a variable reference or a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    /// Reference to a declared variable.
    Var(String),
    /// Constant value.
    Const(Value),
}

impl Term {
    /// A variable reference.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    /// A constant.
    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Const(value.into())
    }

    fn resolve<'a>(&'a self, model: &'a Model) -> Result<&'a Value, OracleError> {
        match self {
            Self::Var(name) => model
                .get(name)
                .ok_or_else(|| OracleError::UndeclaredVariable(name.clone())),
            Self::Const(value) => Ok(value),
        }
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Self::Const(value)
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Self::Const(Value::Bool(b))
    }
}

impl From<i64> for Term {
    fn from(i: i64) -> Self {
        Self::Const(Value::Int(i))
    }
}

impl From<f64> for Term {
    fn from(r: f64) -> Self {
        Self::Const(Value::Real(r))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => f.write_str(name),
            Self::Const(value) => write!(f, "{value}"),
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl CmpOp {
    /// Parse an operator from its textual form.
    #[must_use]
    pub fn parse(symbol: &str) -> Option<Self> {
        match symbol {
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            _ => None,
        }
    }

    /// Textual form of the operator.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    /// SMT-LIB spelling of the operator.
    #[must_use]
    pub const fn to_smtlib(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "=",
            Self::Ne => "distinct",
        }
    }

    /// The operator with its operands swapped: `a op b` iff `b op.flipped() a`.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
        }
    }

    /// Whether the operator only makes sense on ordered sorts.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    fn holds(self, ordering: Option<Ordering>) -> bool {
        let Some(ordering) = ordering else {
            // NaN compares unequal to everything
            return self == Self::Ne;
        };
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A quantifier-free formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Formula {
    /// `true` or `false`.
    Const(bool),
    /// A boolean-sorted term used as a formula.
    Atom(Term),
    /// Binary comparison.
    Cmp {
        /// Left operand.
        lhs: Term,
        /// Operator.
        op: CmpOp,
        /// Right operand.
        rhs: Term,
    },
    /// Negation.
    Not(Box<Formula>),
    /// Conjunction (empty is `true`).
    And(Vec<Formula>),
    /// Disjunction (empty is `false`).
    Or(Vec<Formula>),
    /// Implication.
    Implies(Box<Formula>, Box<Formula>),
}

impl Formula {
    /// The trivially-true formula.
    #[must_use]
    pub const fn truth() -> Self {
        Self::Const(true)
    }

    /// A boolean variable used as a formula.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Atom(Term::var(name))
    }

    /// A comparison between two terms.
    #[must_use]
    pub fn cmp(lhs: impl Into<Term>, op: CmpOp, rhs: impl Into<Term>) -> Self {
        Self::Cmp {
            lhs: lhs.into(),
            op,
            rhs: rhs.into(),
        }
    }

    /// `var < rhs`
    #[must_use]
    pub fn lt(var: &str, rhs: impl Into<Term>) -> Self {
        Self::cmp(Term::var(var), CmpOp::Lt, rhs)
    }

    /// `var <= rhs`
    #[must_use]
    pub fn le(var: &str, rhs: impl Into<Term>) -> Self {
        Self::cmp(Term::var(var), CmpOp::Le, rhs)
    }

    /// `var > rhs`
    #[must_use]
    pub fn gt(var: &str, rhs: impl Into<Term>) -> Self {
        Self::cmp(Term::var(var), CmpOp::Gt, rhs)
    }

    /// `var >= rhs`
    #[must_use]
    pub fn ge(var: &str, rhs: impl Into<Term>) -> Self {
        Self::cmp(Term::var(var), CmpOp::Ge, rhs)
    }

    /// `var == rhs`
    #[must_use]
    pub fn eq(var: &str, rhs: impl Into<Term>) -> Self {
        Self::cmp(Term::var(var), CmpOp::Eq, rhs)
    }

    /// Logical negation.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(formula: Self) -> Self {
        Self::Not(Box::new(formula))
    }

    /// Conjunction of the given formulas.
    #[must_use]
    pub fn and(formulas: impl IntoIterator<Item = Self>) -> Self {
        Self::And(formulas.into_iter().collect())
    }

    /// Disjunction of the given formulas.
    #[must_use]
    pub fn or(formulas: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(formulas.into_iter().collect())
    }

    /// `premise => conclusion`
    #[must_use]
    pub fn implies(premise: Self, conclusion: Self) -> Self {
        Self::Implies(Box::new(premise), Box::new(conclusion))
    }

    /// Negate this formula.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::not(self)
    }

    /// Names of all variables referenced by the formula.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.collect_variables(&mut vars);
        vars
    }

    fn collect_variables(&self, vars: &mut BTreeSet<String>) {
        match self {
            Self::Const(_) => {}
            Self::Atom(term) => {
                if let Term::Var(name) = term {
                    vars.insert(name.clone());
                }
            }
            Self::Cmp { lhs, rhs, .. } => {
                for term in [lhs, rhs] {
                    if let Term::Var(name) = term {
                        vars.insert(name.clone());
                    }
                }
            }
            Self::Not(inner) => inner.collect_variables(vars),
            Self::And(items) | Self::Or(items) => {
                for item in items {
                    item.collect_variables(vars);
                }
            }
            Self::Implies(premise, conclusion) => {
                premise.collect_variables(vars);
                conclusion.collect_variables(vars);
            }
        }
    }

    /// Evaluate the formula under a complete assignment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is unassigned or an atom mixes sorts.
    pub fn eval(&self, model: &Model) -> Result<bool, OracleError> {
        match self {
            Self::Const(b) => Ok(*b),
            Self::Atom(term) => match term.resolve(model)? {
                Value::Bool(b) => Ok(*b),
                other => Err(OracleError::SortMismatch(format!(
                    "atom {term} has sort {}, expected Bool",
                    other.sort()
                ))),
            },
            Self::Cmp { lhs, op, rhs } => {
                let left = lhs.resolve(model)?;
                let right = rhs.resolve(model)?;
                if op.is_ordering() && matches!(left, Value::Bool(_)) {
                    return Err(OracleError::SortMismatch(format!(
                        "ordering comparison {self} on Bool"
                    )));
                }
                Ok(op.holds(left.compare(right)?))
            }
            Self::Not(inner) => Ok(!inner.eval(model)?),
            Self::And(items) => {
                for item in items {
                    if !item.eval(model)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(items) => {
                for item in items {
                    if item.eval(model)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Implies(premise, conclusion) => {
                Ok(!premise.eval(model)? || conclusion.eval(model)?)
            }
        }
    }

    /// Render the formula in SMT-LIB syntax.
    #[must_use]
    pub fn to_smtlib(&self) -> String {
        match self {
            Self::Const(b) => b.to_string(),
            Self::Atom(term) => term.to_string(),
            Self::Cmp { lhs, op, rhs } => format!("({} {lhs} {rhs})", op.to_smtlib()),
            Self::Not(inner) => format!("(not {})", inner.to_smtlib()),
            Self::And(items) if items.is_empty() => "true".to_string(),
            Self::Or(items) if items.is_empty() => "false".to_string(),
            Self::And(items) => format!("(and {})", join_smtlib(items)),
            Self::Or(items) => format!("(or {})", join_smtlib(items)),
            Self::Implies(premise, conclusion) => {
                format!("(=> {} {})", premise.to_smtlib(), conclusion.to_smtlib())
            }
        }
    }
}

fn join_smtlib(items: &[Formula]) -> String {
    items
        .iter()
        .map(Formula::to_smtlib)
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_smtlib())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(pairs: &[(&str, Value)]) -> Model {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_eval_mixed_numeric_comparison() {
        let f = Formula::le("amount", 100_000.0);
        assert!(f.eval(&model(&[("amount", Value::Int(50_000))])).unwrap());
        assert!(!f.eval(&model(&[("amount", Value::Int(150_000))])).unwrap());
    }

    #[test]
    fn test_eval_implication() {
        let f = Formula::implies(Formula::var("is_denial"), Formula::var("has_reason"));
        let m = model(&[("is_denial", Value::Bool(true)), ("has_reason", Value::Bool(false))]);
        assert!(!f.eval(&m).unwrap());
        let m = model(&[("is_denial", Value::Bool(false)), ("has_reason", Value::Bool(false))]);
        assert!(f.eval(&m).unwrap());
    }

    #[test]
    fn test_eval_sort_mismatch() {
        let f = Formula::var("amount");
        let err = f.eval(&model(&[("amount", Value::Int(3))])).unwrap_err();
        assert!(matches!(err, OracleError::SortMismatch(_)));
    }

    #[test]
    fn test_eval_unassigned_variable() {
        let f = Formula::ge("score", 600_i64);
        assert_eq!(
            f.eval(&Model::new()).unwrap_err(),
            OracleError::UndeclaredVariable("score".into())
        );
    }

    #[test]
    fn test_empty_connectives() {
        assert!(Formula::and([]).eval(&Model::new()).unwrap());
        assert!(!Formula::or([]).eval(&Model::new()).unwrap());
    }

    #[test]
    fn test_to_smtlib() {
        let f = Formula::or([
            Formula::le("dti", 43.0),
            Formula::ge("compensating_factors", 2_i64),
        ])
        .negate();
        assert_eq!(
            f.to_smtlib(),
            "(not (or (<= dti 43.0) (>= compensating_factors 2)))"
        );
    }

    #[test]
    fn test_variables() {
        let f = Formula::and([
            Formula::var("a"),
            Formula::not(Formula::cmp(Term::var("b"), CmpOp::Ne, Term::var("c"))),
        ]);
        let vars: Vec<_> = f.variables().into_iter().collect();
        assert_eq!(vars, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_value_coercion() {
        assert_eq!(Value::Int(3).coerce_to(Sort::Real), Some(Value::Real(3.0)));
        assert_eq!(Value::Real(3.0).coerce_to(Sort::Int), Some(Value::Int(3)));
        assert_eq!(Value::Real(3.5).coerce_to(Sort::Int), None);
        assert_eq!(Value::Bool(true).coerce_to(Sort::Int), None);
    }

    #[test]
    fn test_sort_aliases() {
        let sort: Sort = serde_json::from_str("\"float\"").unwrap();
        assert_eq!(sort, Sort::Real);
        let sort: Sort = serde_json::from_str("\"string\"").unwrap();
        assert_eq!(sort, Sort::Str);
        let sort: Sort = serde_json::from_str("\"integer\"").unwrap();
        assert_eq!(sort, Sort::Int);
    }
}
