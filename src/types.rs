//! Record shape and the fixed field/key mapping.
//!
//! `AssessmentRecord` is the canonical server-side row for one respondent.
//! The `Section` enum is the single source of truth for the name mapping
//! between server columns and local-store keys: every tracked local key is
//! traceable to exactly one record field through it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON object payload for one form section.
pub type SectionData = serde_json::Map<String, Value>;

// ============================================================================
// Section — the enumerable set of form sections
// ============================================================================

/// One section of the assessment form.
///
/// Each section owns one JSON data blob and one completion flag, both on the
/// server row and in the local store. Local keys equal the column names except
/// for `EmployeeImpact`, which keeps its legacy local key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Firmographics,
    GeneralBenefits,
    CurrentSupport,
    CrossDimensional,
    EmployeeImpact,
    Dimension1,
    Dimension2,
    Dimension3,
    Dimension4,
    Dimension5,
    Dimension6,
    Dimension7,
    Dimension8,
    Dimension9,
    Dimension10,
    Dimension11,
    Dimension12,
    Dimension13,
}

impl Section {
    /// All sections, in canonical order.
    pub const ALL: [Section; 18] = [
        Section::Firmographics,
        Section::GeneralBenefits,
        Section::CurrentSupport,
        Section::CrossDimensional,
        Section::EmployeeImpact,
        Section::Dimension1,
        Section::Dimension2,
        Section::Dimension3,
        Section::Dimension4,
        Section::Dimension5,
        Section::Dimension6,
        Section::Dimension7,
        Section::Dimension8,
        Section::Dimension9,
        Section::Dimension10,
        Section::Dimension11,
        Section::Dimension12,
        Section::Dimension13,
    ];

    /// Server column holding this section's data blob.
    pub fn data_column(&self) -> &'static str {
        match self {
            Section::Firmographics => "firmographics_data",
            Section::GeneralBenefits => "general_benefits_data",
            Section::CurrentSupport => "current_support_data",
            Section::CrossDimensional => "cross_dimensional_data",
            Section::EmployeeImpact => "employee_impact_data",
            Section::Dimension1 => "dimension1_data",
            Section::Dimension2 => "dimension2_data",
            Section::Dimension3 => "dimension3_data",
            Section::Dimension4 => "dimension4_data",
            Section::Dimension5 => "dimension5_data",
            Section::Dimension6 => "dimension6_data",
            Section::Dimension7 => "dimension7_data",
            Section::Dimension8 => "dimension8_data",
            Section::Dimension9 => "dimension9_data",
            Section::Dimension10 => "dimension10_data",
            Section::Dimension11 => "dimension11_data",
            Section::Dimension12 => "dimension12_data",
            Section::Dimension13 => "dimension13_data",
        }
    }

    /// Server column holding this section's completion flag.
    pub fn flag_column(&self) -> &'static str {
        match self {
            Section::Firmographics => "firmographics_complete",
            Section::GeneralBenefits => "general_benefits_complete",
            Section::CurrentSupport => "current_support_complete",
            Section::CrossDimensional => "cross_dimensional_complete",
            Section::EmployeeImpact => "employee_impact_complete",
            Section::Dimension1 => "dimension1_complete",
            Section::Dimension2 => "dimension2_complete",
            Section::Dimension3 => "dimension3_complete",
            Section::Dimension4 => "dimension4_complete",
            Section::Dimension5 => "dimension5_complete",
            Section::Dimension6 => "dimension6_complete",
            Section::Dimension7 => "dimension7_complete",
            Section::Dimension8 => "dimension8_complete",
            Section::Dimension9 => "dimension9_complete",
            Section::Dimension10 => "dimension10_complete",
            Section::Dimension11 => "dimension11_complete",
            Section::Dimension12 => "dimension12_complete",
            Section::Dimension13 => "dimension13_complete",
        }
    }

    /// Local-store key for this section's data blob.
    ///
    /// Name-stable: form widgets read/write these keys directly.
    pub fn local_data_key(&self) -> &'static str {
        match self {
            // Legacy key predating the column rename; kept for name stability.
            Section::EmployeeImpact => "employee-impact-assessment_data",
            other => other.data_column(),
        }
    }

    /// Local-store key for this section's completion flag.
    pub fn local_flag_key(&self) -> &'static str {
        match self {
            Section::EmployeeImpact => "employee-impact-assessment_complete",
            other => other.flag_column(),
        }
    }

    /// Reverse mapping from a data column name.
    pub fn from_data_column(name: &str) -> Option<Section> {
        Section::ALL.iter().copied().find(|s| s.data_column() == name)
    }
}

// ============================================================================
// Local meta keys
// ============================================================================

/// Local-store keys outside the per-section mapping.
///
/// These names are the wire format between the sync core and the rest of the
/// client; external code reads them directly, so they must not change.
pub mod keys {
    /// Human-facing survey identifier.
    pub const SURVEY_ID: &str = "survey_id";
    /// Respondent email, written at login.
    pub const EMAIL: &str = "auth_email";
    pub const COMPANY_NAME: &str = "login_company_name";
    /// Authorization process flag (`"true"` or absent).
    pub const AUTH_COMPLETED: &str = "auth_completed";
    pub const PAYMENT_COMPLETED: &str = "payment_completed";
    pub const PAYMENT_METHOD: &str = "payment_method";
    pub const PAYMENT_DATE: &str = "payment_date";
    pub const INVOICE_DATA: &str = "invoice_data";
    pub const INVOICE_NUMBER: &str = "current_invoice_number";
    pub const SURVEY_SUBMITTED: &str = "survey_fully_submitted";
    pub const OPT_IN: &str = "employee_survey_opt_in";
    /// Last version observed from the server (optimistic-concurrency token).
    pub const VERSION: &str = "assessment_version";
}

/// Canonical string literal for boolean flags in the local store.
pub const TRUE_LITERAL: &str = "true";

/// Fields the remote store computes or guards itself — a client payload must
/// never carry them into an update. The reference server strips them; typed
/// update paths in this crate simply never read them from a payload.
pub const FORBIDDEN_UPDATE_FIELDS: [&str; 9] = [
    "id",
    "user_id",
    "survey_id",
    "app_id",
    "version",
    "created_at",
    "updated_at",
    "last_update_source",
    "last_update_client_id",
];

// ============================================================================
// AssessmentRecord
// ============================================================================

/// The canonical server-side entity: one row per respondent identity.
///
/// Used both as the full remote row and as a *partial* record (collector
/// output / update payload), where "no opinion" is expressed as `None`, an
/// absent map entry, or a `false` process flag. Update application is
/// additive for flags: only `true` is ever sent, matching the local store's
/// `"true"`-or-absent convention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    /// Stable primary key, assigned by the remote store.
    pub id: Option<String>,
    /// Authenticated-user back-reference (owner). Linked additively, never
    /// overwritten — see identity resolution.
    pub user_id: Option<String>,
    pub survey_id: Option<String>,
    /// Normalized application identifier (separators stripped, uppercased).
    pub app_id: Option<String>,
    pub email: Option<String>,
    pub company_name: Option<String>,

    /// One JSON blob per form section; contents are private to the section.
    #[serde(default)]
    pub data: BTreeMap<Section, SectionData>,
    /// Sections the respondent has marked complete.
    #[serde(default)]
    pub completed: BTreeSet<Section>,

    #[serde(default)]
    pub auth_completed: bool,
    #[serde(default)]
    pub payment_completed: bool,
    pub payment_method: Option<String>,
    pub payment_amount: Option<f64>,
    pub payment_date: Option<String>,
    pub invoice_data: Option<Value>,
    pub invoice_number: Option<String>,

    #[serde(default)]
    pub survey_submitted: bool,
    pub submitted_at: Option<String>,
    pub employee_survey_opt_in: Option<bool>,

    /// Monotonic version counter. Only the remote store assigns it.
    #[serde(default)]
    pub version: u64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    /// Advisory provenance — not used for conflict logic.
    pub last_update_source: Option<String>,
    pub last_update_client_id: Option<String>,
}

impl AssessmentRecord {
    /// A minimal record carrying identity fields only, as created on first
    /// authorization.
    pub fn minimal(
        user_id: Option<String>,
        survey_id: Option<String>,
        app_id: Option<String>,
        email: Option<String>,
    ) -> Self {
        Self {
            user_id,
            survey_id,
            app_id: app_id.as_deref().map(normalize_app_id),
            email,
            ..Self::default()
        }
    }

    /// True when the record carries no collectable content at all.
    pub fn is_empty(&self) -> bool {
        self.data.values().all(|m| m.is_empty())
            && self.completed.is_empty()
            && !self.auth_completed
            && !self.payment_completed
            && !self.survey_submitted
            && self.email.is_none()
            && self.company_name.is_none()
            && self.payment_method.is_none()
            && self.payment_date.is_none()
            && self.invoice_data.is_none()
            && self.invoice_number.is_none()
            && self.employee_survey_opt_in.is_none()
    }

    /// Non-empty data blob for a section, if present.
    pub fn section_data(&self, section: Section) -> Option<&SectionData> {
        self.data.get(&section).filter(|m| !m.is_empty())
    }
}

/// Normalize a raw application identifier: strip `-` separators, uppercase.
///
/// Respondents type these in from printed letters, so `cac2-5120` and
/// `CAC25120` must address the same row.
pub fn normalize_app_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_uppercase()
}
