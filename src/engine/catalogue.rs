//! Named compliance formulas.
//!
//! Rules whose expressions are prose rather than parseable logic compile to
//! a hand-authored formula registered under the rule's identifier. Each entry
//! declares its variables with a safe default: the value used when the claim
//! is absent, chosen so the default alone never violates the formula.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::oracle::{Formula, Sort, Value};

/// Builds an entry's formula on demand.
pub type FormulaBuilder = Arc<dyn Fn() -> Formula + Send + Sync>;

/// A variable used by a catalogue formula.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogueVariable {
    /// Variable name.
    pub name: String,
    /// Declared sort.
    pub sort: Sort,
    /// Value bound when no claim supplies one.
    pub safe_default: Value,
}

/// A registered formula with its variable declarations.
#[derive(Clone)]
pub struct CatalogueEntry {
    /// What the formula enforces.
    pub description: String,
    /// Declared variables.
    pub variables: Vec<CatalogueVariable>,
    build: FormulaBuilder,
}

impl CatalogueEntry {
    /// Create an entry from a formula builder.
    pub fn new<F>(description: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Formula + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            variables: Vec::new(),
            build: Arc::new(build),
        }
    }

    /// Declare a variable with its safe default.
    #[must_use]
    pub fn with_variable(
        mut self,
        name: impl Into<String>,
        sort: Sort,
        safe_default: impl Into<Value>,
    ) -> Self {
        self.variables.push(CatalogueVariable {
            name: name.into(),
            sort,
            safe_default: safe_default.into(),
        });
        self
    }

    /// Build the formula.
    #[must_use]
    pub fn build(&self) -> Formula {
        (self.build)()
    }

    /// Look up a declared variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&CatalogueVariable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

impl fmt::Debug for CatalogueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogueEntry")
            .field("description", &self.description)
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

/// Registry from rule identifier to formula.
#[derive(Debug, Clone, Default)]
pub struct FormulaCatalogue {
    entries: BTreeMap<String, CatalogueEntry>,
}

impl FormulaCatalogue {
    /// An empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalogue shipped with the crate.
    #[must_use]
    pub fn standard() -> Self {
        let mut catalogue = Self::new();
        catalogue.register_lending();
        catalogue.register_medical();
        catalogue.register_trading();
        catalogue.register_contract();
        catalogue.register_customer_service();
        catalogue.register_content_policy();
        catalogue.register_data_privacy();
        catalogue.register_financial_advice();
        catalogue
    }

    /// Register an entry, returning any entry it replaces.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        entry: CatalogueEntry,
    ) -> Option<CatalogueEntry> {
        self.entries.insert(id.into(), entry)
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CatalogueEntry> {
        self.entries.get(id)
    }

    /// Whether an entry is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalogue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over registered identifiers and entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CatalogueEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Register "`var` must never hold".
    fn prohibit(&mut self, id: &str, var: &'static str, description: &str) {
        self.register(
            id,
            CatalogueEntry::new(description, move || Formula::not(Formula::var(var)))
                .with_variable(var, Sort::Bool, false),
        );
    }

    /// Register "`var` <= `limit`" over reals.
    fn cap(&mut self, id: &str, var: &'static str, limit: f64, description: &str) {
        self.register(
            id,
            CatalogueEntry::new(description, move || Formula::le(var, limit))
                .with_variable(var, Sort::Real, 0.0),
        );
    }

    fn register_lending(&mut self) {
        self.register(
            "ATR_QM_DTI",
            CatalogueEntry::new("DTI > 43% requires at least two compensating factors", || {
                Formula::or([
                    Formula::le("dti", 43.0),
                    Formula::ge("compensating_factors", 2_i64),
                ])
            })
            .with_variable("dti", Sort::Real, 0.0)
            .with_variable("compensating_factors", Sort::Int, 0_i64),
        );
        self.register(
            "HOEPA_HIGH_COST",
            CatalogueEntry::new("Fees of 8% or more require counseling disclosure", || {
                Formula::or([
                    Formula::lt("fee_percentage", 8.0),
                    Formula::var("counseling_disclosed"),
                ])
            })
            .with_variable("fee_percentage", Sort::Real, 0.0)
            .with_variable("counseling_disclosed", Sort::Bool, false),
        );
        self.register(
            "UDAAP_NO_GUARANTEES",
            CatalogueEntry::new("Approval must not be presented as guaranteed", || {
                Formula::not(Formula::and([
                    Formula::var("has_guarantee"),
                    Formula::var("has_approval"),
                ]))
            })
            .with_variable("has_guarantee", Sort::Bool, false)
            .with_variable("has_approval", Sort::Bool, false),
        );
        self.register(
            "HPML_ESCROW",
            CatalogueEntry::new("Credit score below 620 prohibits escrow waiver", || {
                Formula::or([
                    Formula::ge("credit_score", 620_i64),
                    Formula::not(Formula::var("escrow_waived")),
                ])
            })
            .with_variable("credit_score", Sort::Int, 620_i64)
            .with_variable("escrow_waived", Sort::Bool, false),
        );
        self.register(
            "REG_B_ADVERSE",
            CatalogueEntry::new("A denial must state a specific reason", || {
                Formula::implies(
                    Formula::var("is_denial"),
                    Formula::var("has_specific_reason"),
                )
            })
            .with_variable("is_denial", Sort::Bool, false)
            .with_variable("has_specific_reason", Sort::Bool, false),
        );
        self.cap("MAX_DTI", "dti", 43.0, "DTI must not exceed 43%");
        self.register(
            "MIN_CREDIT_SCORE",
            CatalogueEntry::new("Credit score must be at least 600", || {
                Formula::ge("credit_score", 600_i64)
            })
            .with_variable("credit_score", Sort::Int, 600_i64),
        );
    }

    fn register_medical(&mut self) {
        self.register(
            "EGFR_METFORMIN",
            CatalogueEntry::new("Metformin is contraindicated when eGFR is below 45", || {
                Formula::or([
                    Formula::ge("egfr", 45_i64),
                    Formula::not(Formula::var("recommends_metformin")),
                ])
            })
            .with_variable("egfr", Sort::Int, 90_i64)
            .with_variable("recommends_metformin", Sort::Bool, false),
        );
        self.register(
            "EGFR_DOSE_LIMIT",
            CatalogueEntry::new("Metformin above 1000mg requires eGFR of at least 60", || {
                Formula::or([
                    Formula::not(Formula::var("recommends_metformin")),
                    Formula::ge("egfr", 60_i64),
                    Formula::le("metformin_dose", 1000_i64),
                ])
            })
            .with_variable("egfr", Sort::Int, 90_i64)
            .with_variable("metformin_dose", Sort::Int, 0_i64)
            .with_variable("recommends_metformin", Sort::Bool, false),
        );
        self.register(
            "CREATININE_NEPHRO",
            CatalogueEntry::new("Creatinine above 1.5 requires nephrology referral", || {
                Formula::or([
                    Formula::le("creatinine", 1.5),
                    Formula::var("nephro_referral"),
                ])
            })
            .with_variable("creatinine", Sort::Real, 0.0)
            .with_variable("nephro_referral", Sort::Bool, false),
        );
        self.register(
            "DRUG_INTERACTION",
            CatalogueEntry::new(
                "ACE inhibitors must not be combined with potassium-sparing diuretics",
                || {
                    Formula::not(Formula::and([
                        Formula::var("ace_inhibitor"),
                        Formula::var("potassium_sparing"),
                    ]))
                },
            )
            .with_variable("ace_inhibitor", Sort::Bool, false)
            .with_variable("potassium_sparing", Sort::Bool, false),
        );
        self.register(
            "HBA1C_TARGET",
            CatalogueEntry::new("HbA1c above 7% requires treatment escalation", || {
                Formula::or([
                    Formula::le("hba1c", 7.0),
                    Formula::var("treatment_escalation"),
                ])
            })
            .with_variable("hba1c", Sort::Real, 0.0)
            .with_variable("treatment_escalation", Sort::Bool, false),
        );
    }

    fn register_trading(&mut self) {
        self.cap("SECTOR_LIMIT", "tech_exposure", 40.0, "Sector exposure capped at 40%");
        self.cap("POSITION_LIMIT", "position_size", 10.0, "Single position capped at 10%");
    }

    fn register_contract(&mut self) {
        self.cap("USURY_LIMIT", "annual_rate", 25.0, "Annual rate capped at 25%");
        self.cap(
            "LATE_FEE_CAP",
            "monthly_late_fee",
            1.5,
            "Monthly late fee capped at 1.5%",
        );
    }

    fn register_customer_service(&mut self) {
        self.cap(
            "DISCOUNT_LIMIT",
            "discount_percentage",
            10.0,
            "Discounts capped at 10%",
        );
        self.register(
            "DELIVERY_PROMISE",
            CatalogueEntry::new("Delivery promises must allow at least 48 hours", || {
                Formula::ge("delivery_hours", 48_i64)
            })
            .with_variable("delivery_hours", Sort::Int, 48_i64),
        );
        self.prohibit("NO_FAULT_ADMISSION", "admits_fault", "Must not admit fault");
        self.prohibit(
            "NO_INTERNAL_INFO",
            "reveals_internal",
            "Must not reveal internal information",
        );
    }

    fn register_content_policy(&mut self) {
        self.prohibit(
            "NO_REAL_PEOPLE",
            "mentions_real_people",
            "Must not mention real people",
        );
        self.prohibit(
            "NO_RELIGIOUS_CONTENT",
            "has_religious_content",
            "Must not contain religious content",
        );
        self.prohibit(
            "NO_MEDICAL_ADVICE",
            "provides_medical_advice",
            "Must not provide medical advice",
        );
    }

    fn register_data_privacy(&mut self) {
        self.prohibit("NO_PII", "exposes_pii", "Must not expose personal data");
        self.prohibit(
            "NO_INTERNAL_URLS",
            "reveals_internal_urls",
            "Must not reveal internal URLs",
        );
        self.prohibit(
            "NO_CREDENTIALS",
            "shares_credentials",
            "Must not share credentials",
        );
        self.prohibit(
            "NO_DB_NAMES",
            "reveals_db_names",
            "Must not reveal database names",
        );
    }

    fn register_financial_advice(&mut self) {
        self.prohibit(
            "NO_SPECIFIC_SECURITIES",
            "recommends_specific_securities",
            "Must not recommend specific securities",
        );
        self.prohibit(
            "NO_GUARANTEED_RETURNS",
            "guarantees_returns",
            "Must not guarantee returns",
        );
        self.register(
            "REQUIRED_DISCLAIMER",
            CatalogueEntry::new("Financial advice requires a disclaimer", || {
                Formula::or([
                    Formula::not(Formula::var("is_financial_advice")),
                    Formula::var("has_disclaimer"),
                ])
            })
            .with_variable("is_financial_advice", Sort::Bool, false)
            .with_variable("has_disclaimer", Sort::Bool, false),
        );
        self.prohibit(
            "NO_BUY_SELL_SIGNALS",
            "has_buy_sell_recommendation",
            "Must not give buy or sell signals",
        );
    }
}
