//! Constraint verification engine.
//!
//! Each selected rule is compiled against the claims, then the oracle is
//! asked whether the rule's negation is satisfiable inside a fresh scope.
//! SAT means a counterexample exists and the rule is violated.

pub mod catalogue;
pub mod compiler;
pub mod expr;

use std::sync::Arc;
use std::time::Instant;

pub use catalogue::{CatalogueEntry, CatalogueVariable, FormulaCatalogue};
pub use compiler::{CompiledRule, FormulaSource, RuleCompiler};

use crate::config::EngineConfig;
use crate::error::RuleError;
use crate::oracle::{CheckOutcome, DefaultOracle, Model, NativeOracle, SatOracle};
use crate::ontology::Ontology;
use crate::types::{
    ClaimMap, ClaimValue, Rule, RuleOutcome, RuleSelection, RuleStatus, Severity, SolverStatus,
    VerificationResult, Violation,
};

/// Creates a fresh oracle for each verification call.
pub type OracleFactory<O> = Arc<dyn Fn(&EngineConfig) -> O + Send + Sync>;

/// Checks claims against ontology rules.
///
/// The engine holds no per-call state: every call to
/// [`verify`](VerificationEngine::verify) builds its own oracle, so one
/// engine can serve concurrent requests.
pub struct VerificationEngine<O = DefaultOracle> {
    config: EngineConfig,
    catalogue: Arc<FormulaCatalogue>,
    oracle_factory: OracleFactory<O>,
}

impl<O> std::fmt::Debug for VerificationEngine<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationEngine")
            .field("config", &self.config)
            .field("catalogue_entries", &self.catalogue.len())
            .finish_non_exhaustive()
    }
}

impl<O> Clone for VerificationEngine<O> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            catalogue: Arc::clone(&self.catalogue),
            oracle_factory: Arc::clone(&self.oracle_factory),
        }
    }
}

/// Factory for [`NativeOracle`] honouring the configured candidate budget.
#[must_use]
pub fn native_oracle_factory() -> OracleFactory<NativeOracle> {
    Arc::new(|config: &EngineConfig| {
        NativeOracle::new().with_max_candidates(config.max_search_candidates)
    })
}

/// Factory for [`OxizOracle`](crate::oracle::OxizOracle); the candidate
/// budget bounds its in-process fallback.
#[cfg(feature = "smt")]
#[must_use]
pub fn smt_oracle_factory() -> OracleFactory<crate::oracle::OxizOracle> {
    Arc::new(|config: &EngineConfig| {
        crate::oracle::OxizOracle::new().with_max_candidates(config.max_search_candidates)
    })
}

/// Factory for [`DefaultOracle`].
#[must_use]
pub fn default_oracle_factory() -> OracleFactory<DefaultOracle> {
    #[cfg(feature = "smt")]
    {
        smt_oracle_factory()
    }
    #[cfg(not(feature = "smt"))]
    {
        native_oracle_factory()
    }
}

impl VerificationEngine<DefaultOracle> {
    /// Create an engine backed by [`DefaultOracle`] and the standard catalogue.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::from_factory(config, default_oracle_factory())
    }
}

impl Default for VerificationEngine<DefaultOracle> {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// What the oracle said about one compiled rule.
enum CheckVerdict {
    Holds,
    Violated(Model),
    Unknown,
}

impl<O: SatOracle> VerificationEngine<O> {
    /// Create an engine with a custom oracle backend.
    pub fn with_oracle_factory<F>(config: EngineConfig, factory: F) -> Self
    where
        F: Fn(&EngineConfig) -> O + Send + Sync + 'static,
    {
        Self::from_factory(config, Arc::new(factory))
    }

    /// Create an engine from a shared oracle factory.
    #[must_use]
    pub fn from_factory(config: EngineConfig, oracle_factory: OracleFactory<O>) -> Self {
        Self {
            config,
            catalogue: Arc::new(FormulaCatalogue::standard()),
            oracle_factory,
        }
    }

    /// Replace the formula catalogue.
    #[must_use]
    pub fn with_catalogue(mut self, catalogue: FormulaCatalogue) -> Self {
        self.catalogue = Arc::new(catalogue);
        self
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The formula catalogue.
    #[must_use]
    pub fn catalogue(&self) -> &FormulaCatalogue {
        &self.catalogue
    }

    /// Rules a selection resolves to, in evaluation order.
    ///
    /// The default selection is every error-severity rule. An allowlist is
    /// taken in the given order; names the ontology lacks are skipped.
    #[must_use]
    pub fn select_rules<'o>(ontology: &'o Ontology, selection: &RuleSelection) -> Vec<&'o Rule> {
        match selection {
            RuleSelection::Default => ontology
                .rules
                .iter()
                .filter(|r| r.severity == Severity::Error)
                .collect(),
            RuleSelection::Only(names) => {
                let mut selected: Vec<&Rule> = Vec::with_capacity(names.len());
                for name in names {
                    match ontology.rule(name) {
                        Some(rule) if !selected.iter().any(|r| r.name == rule.name) => {
                            selected.push(rule);
                        }
                        Some(_) => {}
                        None => tracing::warn!(
                            rule = %name,
                            ontology = %ontology.name,
                            "requested rule not in ontology, skipping"
                        ),
                    }
                }
                selected
            }
        }
    }

    /// Verify claims with the configured timeout.
    #[must_use]
    pub fn verify(
        &self,
        claims: &ClaimMap,
        ontology: &Ontology,
        selection: &RuleSelection,
    ) -> VerificationResult {
        self.verify_with_timeout(claims, ontology, selection, self.config.timeout_ms)
    }

    /// Verify claims, giving each oracle check at most `timeout_ms`.
    ///
    /// A zero timeout means the configured one; checks are never unbounded.
    #[must_use]
    pub fn verify_with_timeout(
        &self,
        claims: &ClaimMap,
        ontology: &Ontology,
        selection: &RuleSelection,
        timeout_ms: u64,
    ) -> VerificationResult {
        let start = Instant::now();
        let timeout_ms = self.config.effective_timeout_ms(timeout_ms);
        let rules = Self::select_rules(ontology, selection);
        tracing::info!(
            ontology = %ontology.name,
            version = %ontology.version,
            rules = rules.len(),
            claims = claims.len(),
            "starting verification"
        );

        let compiler = RuleCompiler::new(
            &self.catalogue,
            &ontology.variable_types,
            self.config.unsupported_rule_policy,
        );
        let mut oracle = (self.oracle_factory)(&self.config);
        oracle.reset();

        let mut violations = Vec::new();
        let mut rule_outcomes = Vec::with_capacity(rules.len());
        for rule in &rules {
            let status = match Self::check_rule(&mut oracle, &compiler, rule, claims, timeout_ms) {
                Ok((CheckVerdict::Holds, vacuous)) => {
                    if vacuous {
                        RuleStatus::Vacuous
                    } else {
                        RuleStatus::Satisfied
                    }
                }
                Ok((CheckVerdict::Violated(model), _)) => {
                    tracing::warn!(rule = %rule.name, severity = %rule.severity, "rule violated");
                    violations.push(violation(rule, claims, model));
                    RuleStatus::Violated
                }
                Ok((CheckVerdict::Unknown, _)) => {
                    tracing::warn!(
                        rule = %rule.name,
                        timeout_ms,
                        "oracle returned unknown, treating rule as satisfied"
                    );
                    RuleStatus::Indeterminate
                }
                Err(e) => {
                    tracing::error!(rule = %rule.name, error = %e, "error evaluating constraint");
                    violations.push(processing_failure(rule, &e));
                    RuleStatus::Failed
                }
            };
            rule_outcomes.push(RuleOutcome {
                rule: rule.name.clone(),
                status,
            });
        }

        let solver_status = if rule_outcomes
            .iter()
            .any(|o| matches!(o.status, RuleStatus::Indeterminate | RuleStatus::Vacuous))
        {
            SolverStatus::Partial
        } else {
            SolverStatus::Complete
        };
        let result = VerificationResult {
            verified: violations.is_empty(),
            constraints_checked: rule_outcomes.len(),
            violations,
            execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            solver_status,
            rule_outcomes,
        };
        tracing::info!(
            ontology = %ontology.name,
            verified = result.verified,
            violations = result.violations.len(),
            checked = result.constraints_checked,
            elapsed_ms = result.execution_time_ms,
            "verification complete"
        );
        result
    }

    /// Compile one rule and check its negation in a scope of its own.
    fn check_rule(
        oracle: &mut O,
        compiler: &RuleCompiler<'_>,
        rule: &Rule,
        claims: &ClaimMap,
        timeout_ms: u64,
    ) -> Result<(CheckVerdict, bool), RuleError> {
        let compiled = compiler.compile(rule, claims)?;
        let vacuous = compiled.is_vacuous();

        oracle.push();
        let verdict = Self::check_compiled(oracle, compiled, timeout_ms);
        if let Err(e) = oracle.pop() {
            tracing::error!(rule = %rule.name, error = %e, "scope lost, resetting oracle");
            oracle.reset();
        }
        Ok((verdict?, vacuous))
    }

    fn check_compiled(
        oracle: &mut O,
        compiled: CompiledRule,
        timeout_ms: u64,
    ) -> Result<CheckVerdict, RuleError> {
        for (name, sort) in &compiled.declarations {
            oracle.declare(name, *sort)?;
        }
        for binding in compiled.bindings {
            oracle.assert(binding)?;
        }
        oracle.assert(compiled.formula.negate())?;
        Ok(match oracle.check(timeout_ms)? {
            CheckOutcome::Unsat => CheckVerdict::Holds,
            CheckOutcome::Sat => CheckVerdict::Violated(oracle.model()?),
            CheckOutcome::Unknown => CheckVerdict::Unknown,
        })
    }
}

/// A violation built from the oracle's counterexample.
fn violation(rule: &Rule, claims: &ClaimMap, model: Model) -> Violation {
    let path = rule
        .variables
        .first()
        .or_else(|| model.keys().next())
        .cloned()
        .unwrap_or_default();
    let actual = claims.get(&path).cloned().unwrap_or(ClaimValue::Null);
    Violation {
        constraint_name: rule.name.clone(),
        description: rule.description.clone(),
        severity: rule.severity,
        expected: rule.expression.clone(),
        actual,
        path,
        counterexample: model,
    }
}

/// The error-severity violation recorded when a rule cannot be checked.
fn processing_failure(rule: &Rule, error: &RuleError) -> Violation {
    Violation {
        constraint_name: rule.name.clone(),
        description: format!("Error evaluating constraint: {error}"),
        severity: Severity::Error,
        expected: "Valid constraint".to_string(),
        actual: ClaimValue::Text("Processing error".to_string()),
        path: String::new(),
        counterexample: Model::new(),
    }
}
