//! Transformation module.
//!
//! - Rules: what to convert and how, plus lowering from a mapping set
//! - Convert: the per-kind value conversions
//! - Custom: caller-registered conversion functions
//! - Validate: rule parameters and field validators
//! - Engine: compiled rules applied lazily to rows
//! - Report: counts and findings of a run

pub mod convert;
pub mod custom;
pub mod engine;
pub mod report;
pub mod rules;
pub mod validate;

pub use custom::{CustomFunction, CustomFunctions};
pub use engine::{TransformEngine, Transformed, TransformedRow};
pub use report::{ReportStatus, TransformReport};
pub use rules::{lower, rules_from_json, RuleKind, TransformationRule};
pub use validate::FieldValidators;
