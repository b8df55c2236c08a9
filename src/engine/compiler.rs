//! Rule compilation.
//!
//! A compiled rule is a set of typed declarations, one binding per variable
//! (the claim value, or a safe default when the claim is absent) and the
//! rule's formula. The engine asserts the bindings and the negated formula.

use std::collections::BTreeMap;

use super::catalogue::{CatalogueEntry, FormulaCatalogue};
use super::expr::{parse_boolean, parse_range};
use crate::config::UnsupportedRulePolicy;
use crate::error::RuleError;
use crate::oracle::{Formula, Sort, Term, Value};
use crate::types::{ClaimMap, ClaimValue, Rule, RuleType};

/// How a rule's formula was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaSource {
    /// `var op threshold`.
    Range,
    /// Parsed from the rule's boolean expression.
    Expression,
    /// Taken from the formula catalogue.
    Catalogue,
    /// No formula could be derived; compiled to `true`.
    Trivial,
    /// Rule type has no compiler; compiled to `true` under the permissive
    /// policy.
    Unsupported,
}

/// A rule ready to be checked.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    /// Variables to declare, in order.
    pub declarations: Vec<(String, Sort)>,
    /// `var == value` assertions fixing every declared variable.
    pub bindings: Vec<Formula>,
    /// The rule formula (not negated).
    pub formula: Formula,
    /// Where the formula came from.
    pub source: FormulaSource,
}

impl CompiledRule {
    /// Whether the formula is `true` without a real check behind it.
    #[must_use]
    pub const fn is_vacuous(&self) -> bool {
        matches!(self.source, FormulaSource::Trivial | FormulaSource::Unsupported)
    }

    /// Declared variable names, in order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.declarations.iter().map(|(name, _)| name.as_str())
    }
}

/// Compiles rules against a claim map.
#[derive(Debug, Clone, Copy)]
pub struct RuleCompiler<'a> {
    catalogue: &'a FormulaCatalogue,
    ontology_types: &'a BTreeMap<String, Sort>,
    policy: UnsupportedRulePolicy,
}

impl<'a> RuleCompiler<'a> {
    /// Create a compiler.
    #[must_use]
    pub const fn new(
        catalogue: &'a FormulaCatalogue,
        ontology_types: &'a BTreeMap<String, Sort>,
        policy: UnsupportedRulePolicy,
    ) -> Self {
        Self {
            catalogue,
            ontology_types,
            policy,
        }
    }

    /// Compile `rule` given the claims.
    ///
    /// A rule whose expression is not mechanical falls back to the catalogue
    /// entry registered under its name, whatever type was inferred for it.
    ///
    /// # Errors
    ///
    /// Returns a [`RuleError`] when the expression does not parse, a range
    /// rule is bound to a non-numeric claim, or the rule type is unsupported
    /// under the strict policy.
    pub fn compile(&self, rule: &Rule, claims: &ClaimMap) -> Result<CompiledRule, RuleError> {
        match rule.rule_type {
            RuleType::NumericRange => {
                match Self::compile_range(rule, claims, self.ontology_types) {
                    Err(e @ (RuleError::InvalidExpression { .. } | RuleError::UnknownOperator(_))) => {
                        self.from_catalogue(rule, claims).ok_or(e)
                    }
                    compiled => compiled,
                }
            }
            RuleType::BooleanLogic => Ok(self.compile_boolean(rule, claims)),
            other => {
                if let Some(compiled) = self.from_catalogue(rule, claims) {
                    return Ok(compiled);
                }
                match self.policy {
                    UnsupportedRulePolicy::Strict => {
                        Err(RuleError::UnsupportedRuleType(other.as_str().to_string()))
                    }
                    UnsupportedRulePolicy::Permissive => {
                        tracing::warn!(
                            rule = %rule.name,
                            rule_type = %other,
                            "rule type not fully implemented, compiled to true"
                        );
                        Ok(self.trivial(rule, claims, FormulaSource::Unsupported))
                    }
                }
            }
        }
    }

    fn compile_range(
        rule: &Rule,
        claims: &ClaimMap,
        ontology_types: &BTreeMap<String, Sort>,
    ) -> Result<CompiledRule, RuleError> {
        let range = parse_range(&rule.expression)?;
        let actual = match bound_claim(claims, &range.variable) {
            Some(ClaimValue::Int(i)) => Value::Int(*i),
            Some(ClaimValue::Float(f)) => Value::Real(*f),
            Some(_) => {
                return Err(RuleError::NonNumericValue {
                    variable: range.variable,
                });
            }
            None => Value::Int(0),
        };

        let hinted = rule
            .variable_types
            .get(&range.variable)
            .or_else(|| ontology_types.get(&range.variable))
            .copied();
        let integral = range.threshold.fract() == 0.0 && range.threshold.is_finite();
        let sort = match (&actual, hinted) {
            (Value::Int(_), _) | (_, Some(Sort::Int)) if integral => Sort::Int,
            _ => Sort::Real,
        };
        let (actual, threshold) = match sort {
            Sort::Int => (
                actual.coerce_to(Sort::Int).unwrap_or(actual),
                int_threshold(range.threshold),
            ),
            _ => (
                actual.coerce_to(Sort::Real).unwrap_or(actual),
                Value::Real(range.threshold),
            ),
        };
        // A real claim that is not integral keeps its sort.
        let sort = actual.sort();
        let threshold = threshold.coerce_to(sort).unwrap_or(threshold);

        tracing::debug!(rule = %rule.name, variable = %range.variable, %sort, "compiled range rule");
        let mut declarations = vec![(range.variable.clone(), sort)];
        let mut bindings = vec![Formula::eq(&range.variable, actual)];
        for name in &rule.variables {
            if *name != range.variable {
                let (sort, value) = extra_binding(rule, claims, ontology_types, name, None);
                declarations.push((name.clone(), sort));
                bindings.push(Formula::eq(name, value));
            }
        }
        Ok(CompiledRule {
            declarations,
            bindings,
            formula: Formula::cmp(Term::var(&range.variable), range.op, threshold),
            source: FormulaSource::Range,
        })
    }

    fn compile_boolean(&self, rule: &Rule, claims: &ClaimMap) -> CompiledRule {
        match parse_boolean(&rule.expression) {
            Ok(formula) if formula.variables().iter().all(|v| rule.variables.contains(v)) => {
                tracing::debug!(rule = %rule.name, "compiled boolean expression");
                return self.assemble(rule, claims, formula, None, FormulaSource::Expression);
            }
            Ok(_) => {
                tracing::debug!(rule = %rule.name, "expression mentions undeclared identifiers");
            }
            Err(e) => {
                tracing::debug!(rule = %rule.name, error = %e, "expression is not mechanical");
            }
        }

        self.from_catalogue(rule, claims).unwrap_or_else(|| {
            tracing::debug!(rule = %rule.name, "no formula derivable, compiled to true");
            self.trivial(rule, claims, FormulaSource::Trivial)
        })
    }

    /// The catalogue formula registered under the rule's name, if any.
    fn from_catalogue(&self, rule: &Rule, claims: &ClaimMap) -> Option<CompiledRule> {
        let entry = self.catalogue.get(&rule.name)?;
        tracing::debug!(rule = %rule.name, rule_type = %rule.rule_type, "compiled from formula catalogue");
        Some(self.assemble(
            rule,
            claims,
            entry.build(),
            Some(entry),
            FormulaSource::Catalogue,
        ))
    }

    fn trivial(&self, rule: &Rule, claims: &ClaimMap, source: FormulaSource) -> CompiledRule {
        self.assemble(rule, claims, Formula::truth(), None, source)
    }

    fn assemble(
        &self,
        rule: &Rule,
        claims: &ClaimMap,
        formula: Formula,
        entry: Option<&CatalogueEntry>,
        source: FormulaSource,
    ) -> CompiledRule {
        let mut names: Vec<String> = rule.variables.clone();
        for name in formula.variables() {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let mut declarations = Vec::with_capacity(names.len());
        let mut bindings = Vec::with_capacity(names.len());
        for name in names {
            let usage = usage_sort(&formula, &name);
            let (sort, value) = match entry.and_then(|e| e.variable(&name)) {
                Some(var) => {
                    let hinted = hint(rule, self.ontology_types, &name).unwrap_or(var.sort);
                    match bound_value(claims, &name) {
                        Some(value) => (value.sort(), value),
                        None => (
                            hinted,
                            var.safe_default
                                .coerce_to(hinted)
                                .unwrap_or_else(|| hinted.zero()),
                        ),
                    }
                }
                None => extra_binding(rule, claims, self.ontology_types, &name, usage),
            };
            bindings.push(Formula::eq(&name, value));
            declarations.push((name, sort));
        }
        CompiledRule {
            declarations,
            bindings,
            formula,
            source,
        }
    }
}

/// Sort and binding of a variable with no catalogue declaration.
fn extra_binding(
    rule: &Rule,
    claims: &ClaimMap,
    ontology_types: &BTreeMap<String, Sort>,
    name: &str,
    usage: Option<Sort>,
) -> (Sort, Value) {
    if let Some(value) = bound_value(claims, name) {
        return (value.sort(), value);
    }
    let sort = hint(rule, ontology_types, name)
        .or(usage)
        .unwrap_or(Sort::Real);
    (sort, sort.zero())
}

fn hint(rule: &Rule, ontology_types: &BTreeMap<String, Sort>, name: &str) -> Option<Sort> {
    rule.variable_types
        .get(name)
        .or_else(|| ontology_types.get(name))
        .copied()
}

/// A claim counts as bound only when it holds a scalar.
fn bound_claim<'c>(claims: &'c ClaimMap, name: &str) -> Option<&'c ClaimValue> {
    claims.get(name).filter(|v| v.to_oracle_value().is_some())
}

fn bound_value(claims: &ClaimMap, name: &str) -> Option<Value> {
    claims.get(name).and_then(ClaimValue::to_oracle_value)
}

#[allow(clippy::cast_possible_truncation)]
fn int_threshold(threshold: f64) -> Value {
    Value::Int(threshold as i64)
}

/// The sort a variable's occurrences in `formula` imply.
fn usage_sort(formula: &Formula, name: &str) -> Option<Sort> {
    match formula {
        Formula::Const(_) => None,
        Formula::Atom(Term::Var(v)) => (v == name).then_some(Sort::Bool),
        Formula::Atom(Term::Const(_)) => None,
        Formula::Cmp { lhs, rhs, .. } => match (lhs, rhs) {
            (Term::Var(v), Term::Const(c)) | (Term::Const(c), Term::Var(v)) if v == name => {
                Some(c.sort())
            }
            _ => None,
        },
        Formula::Not(inner) => usage_sort(inner, name),
        Formula::And(items) | Formula::Or(items) => {
            items.iter().find_map(|f| usage_sort(f, name))
        }
        Formula::Implies(premise, conclusion) => {
            usage_sort(premise, name).or_else(|| usage_sort(conclusion, name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{CmpOp, Model};

    fn compile(rule: &Rule, claims: &ClaimMap) -> Result<CompiledRule, RuleError> {
        let catalogue = FormulaCatalogue::standard();
        let types = BTreeMap::new();
        RuleCompiler::new(&catalogue, &types, UnsupportedRulePolicy::Strict).compile(rule, claims)
    }

    fn model_of(compiled: &CompiledRule) -> Model {
        compiled
            .bindings
            .iter()
            .filter_map(|b| match b {
                Formula::Cmp {
                    lhs: Term::Var(v),
                    op: CmpOp::Eq,
                    rhs: Term::Const(c),
                } => Some((v.clone(), c.clone())),
                _ => None,
            })
            .collect()
    }

    fn claims(pairs: &[(&str, ClaimValue)]) -> ClaimMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_range_with_int_claim() {
        let rule = Rule::new("min_credit_score", "credit_score >= 600");
        let compiled = compile(&rule, &claims(&[("credit_score", ClaimValue::Int(550))])).unwrap();
        assert_eq!(compiled.source, FormulaSource::Range);
        assert_eq!(
            compiled.declarations,
            vec![("credit_score".to_string(), Sort::Int)]
        );
        assert!(!compiled.formula.eval(&model_of(&compiled)).unwrap());
    }

    #[test]
    fn test_range_mixed_numeric_sorts() {
        let rule = Rule::new("max_dti", "debt_to_income_ratio <= 0.43");
        let compiled = compile(
            &rule,
            &claims(&[("debt_to_income_ratio", ClaimValue::Int(1))]),
        )
        .unwrap();
        assert_eq!(compiled.declarations[0].1, Sort::Real);
        assert!(!compiled.formula.eval(&model_of(&compiled)).unwrap());

        let rule = Rule::new("max_amount", "amount <= 100000");
        let compiled = compile(&rule, &claims(&[("amount", ClaimValue::Float(99_999.5))])).unwrap();
        assert_eq!(compiled.declarations[0].1, Sort::Real);
        assert!(compiled.formula.eval(&model_of(&compiled)).unwrap());
    }

    #[test]
    fn test_range_absent_claim_defaults_to_zero() {
        let rule = Rule::new("max_amount", "amount <= 100000");
        let compiled = compile(&rule, &ClaimMap::new()).unwrap();
        assert_eq!(model_of(&compiled).get("amount"), Some(&Value::Int(0)));
        assert!(compiled.formula.eval(&model_of(&compiled)).unwrap());
    }

    #[test]
    fn test_range_non_numeric_claim() {
        let rule = Rule::new("max_amount", "amount <= 100000");
        let err = compile(&rule, &claims(&[("amount", ClaimValue::from("lots"))])).unwrap_err();
        assert!(matches!(err, RuleError::NonNumericValue { variable } if variable == "amount"));
    }

    #[test]
    fn test_boolean_expression_path() {
        let rule = Rule::new("denial_reason", "is_denial implies has_reason")
            .with_variables(["is_denial", "has_reason"]);
        let compiled = compile(&rule, &claims(&[("is_denial", ClaimValue::Bool(true))])).unwrap();
        assert_eq!(compiled.source, FormulaSource::Expression);
        let model = model_of(&compiled);
        assert_eq!(model.get("has_reason"), Some(&Value::Bool(false)));
        assert!(!compiled.formula.eval(&model).unwrap());
    }

    #[test]
    fn test_usage_sort_for_absent_variables() {
        let rule = Rule::new("status_check", "status != 'denied' and score >= 1.5")
            .with_variables(["status", "score"]);
        let compiled = compile(&rule, &ClaimMap::new()).unwrap();
        assert_eq!(
            compiled.declarations,
            vec![
                ("status".to_string(), Sort::Str),
                ("score".to_string(), Sort::Real)
            ]
        );
    }

    #[test]
    fn test_catalogue_path_uses_safe_defaults() {
        let rule = Rule::new("HPML_ESCROW", "Credit score below 620 prohibits escrow waiver");
        let compiled = compile(&rule, &ClaimMap::new()).unwrap();
        assert_eq!(compiled.source, FormulaSource::Catalogue);
        let model = model_of(&compiled);
        assert_eq!(model.get("credit_score"), Some(&Value::Int(620)));
        assert!(compiled.formula.eval(&model).unwrap());
    }

    #[test]
    fn test_catalogue_claim_overrides_default() {
        let rule = Rule::new("ATR_QM_DTI", "DTI > 43% requires compensating factors");
        assert_eq!(rule.rule_type, RuleType::NumericRange);
        let compiled = compile(
            &rule,
            &claims(&[
                ("dti", ClaimValue::Float(45.0)),
                ("compensating_factors", ClaimValue::Int(1)),
            ]),
        )
        .unwrap();
        assert!(!compiled.formula.eval(&model_of(&compiled)).unwrap());
    }

    #[test]
    fn test_prose_range_rule_reaches_catalogue() {
        let rule = Rule::new("ATR_QM_DTI", "DTI > 43% requires compensating factors")
            .with_variables(["dti", "compensating_factors"]);
        let compiled = compile(
            &rule,
            &claims(&[
                ("dti", ClaimValue::Float(30.0)),
                ("compensating_factors", ClaimValue::Int(0)),
            ]),
        )
        .unwrap();
        assert_eq!(compiled.source, FormulaSource::Catalogue);
        assert!(compiled.formula.eval(&model_of(&compiled)).unwrap());
    }

    #[test]
    fn test_malformed_range_without_entry_is_an_error() {
        let rule = Rule::new("max_amount", "amount <= lots");
        assert_eq!(rule.rule_type, RuleType::NumericRange);
        assert!(matches!(
            compile(&rule, &ClaimMap::new()),
            Err(RuleError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn test_temporal_prose_reaches_catalogue() {
        let rule = Rule::new("DELIVERY_PROMISE", "Delivery time must allow at least 48 hours");
        assert_eq!(rule.rule_type, RuleType::Temporal);
        let compiled = compile(&rule, &claims(&[("delivery_hours", ClaimValue::Int(24))])).unwrap();
        assert_eq!(compiled.source, FormulaSource::Catalogue);
        assert!(!compiled.formula.eval(&model_of(&compiled)).unwrap());
    }

    #[test]
    fn test_unknown_prose_is_trivial() {
        let rule = Rule::new("tone", "Responses should be courteous");
        let compiled = compile(&rule, &ClaimMap::new()).unwrap();
        assert_eq!(compiled.source, FormulaSource::Trivial);
        assert!(compiled.is_vacuous());
    }

    #[test]
    fn test_unsupported_policy() {
        let rule = Rule::new("pattern", "email matches regex '.+@.+'");
        assert_eq!(rule.rule_type, RuleType::StringPattern);
        assert!(matches!(
            compile(&rule, &ClaimMap::new()),
            Err(RuleError::UnsupportedRuleType(t)) if t == "string_pattern"
        ));

        let catalogue = FormulaCatalogue::new();
        let types = BTreeMap::new();
        let compiled = RuleCompiler::new(&catalogue, &types, UnsupportedRulePolicy::Permissive)
            .compile(&rule, &ClaimMap::new())
            .unwrap();
        assert_eq!(compiled.source, FormulaSource::Unsupported);
        assert_eq!(compiled.formula, Formula::truth());
    }

    #[test]
    fn test_ontology_type_hint() {
        let catalogue = FormulaCatalogue::new();
        let mut types = BTreeMap::new();
        types.insert("approved".to_string(), Sort::Bool);
        let rule = Rule::new("r", "approved or manual_review")
            .with_variables(["approved", "manual_review"]);
        let compiled = RuleCompiler::new(&catalogue, &types, UnsupportedRulePolicy::Strict)
            .compile(&rule, &ClaimMap::new())
            .unwrap();
        assert!(compiled.declarations.iter().all(|(_, s)| *s == Sort::Bool));
    }
}
