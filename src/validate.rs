//! Scheme Validation
//!
//! Compares a scheme to a dataset before any solve and emits a structured
//! issue report: one row per `(group, variable, issue)` with a fixed
//! severity. Errors are conditions under which the solver would fail or
//! produce degenerate weights (missing columns, NaN in a weighting
//! dimension, a positive target with no observations); warnings are
//! survivable but worth surfacing (data categories the scheme ignores,
//! groups whose filter matches nothing).
//!
//! The default mode returns the full report; [`validate_scheme_strict`] is
//! the raise-eagerly convenience. [`validate_scheme_dict`] validates the
//! raw dictionary form, so a malformed target (for example a zero total)
//! becomes a report row instead of a construction failure.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeSet;

use serde::Serialize;

use crate::builders::scheme_from_dict;
use crate::filter::{EqualityEvaluator, FilterEvaluator};
use crate::index::canon_value;
use crate::scheme::{RimParams, Scheme, SchemeDict, SchemeError, GLOBAL_GROUP};
use crate::table::Dataset;
use crate::target::TargetError;

/// Issue severity. Errors prevent a solve from starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

/// The fixed set of validation findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueType {
    /// Scheme references a column absent from the dataset.
    MissingColumn,
    /// A weighting column contains missing values within a group.
    NaNValues,
    /// A scheme category with a positive target has no observations.
    MissingInData,
    /// A data category is not referenced by the scheme.
    MissingInScheme,
    /// A group's filter matches zero rows.
    EmptyGroup,
    /// The filter evaluator rejected the group's descriptor.
    FilterError,
    /// A target dimension sums to zero.
    ZeroTotal,
}

impl IssueType {
    /// The fixed severity of this issue type.
    pub fn severity(self) -> Severity {
        match self {
            IssueType::MissingColumn
            | IssueType::NaNValues
            | IssueType::MissingInData
            | IssueType::FilterError
            | IssueType::ZeroTotal => Severity::Error,
            IssueType::MissingInScheme | IssueType::EmptyGroup => Severity::Warning,
        }
    }
}

/// One report row.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub group: String,
    pub variable: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub details: String,
}

impl Issue {
    fn new(group: &str, variable: &str, issue_type: IssueType, details: String) -> Self {
        Self {
            group: group.to_owned(),
            variable: variable.to_owned(),
            issue_type,
            severity: issue_type.severity(),
            details,
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:?}] {:?} group={} variable={}: {}",
            self.severity, self.issue_type, self.group, self.variable, self.details
        )
    }
}

/// Structured validation report: all findings, in group order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    issues: Vec<Issue>,
}

impl ValidationReport {
    /// All findings.
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// True when the report holds no findings at all.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// True when at least one finding has Error severity.
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Error-severity findings only.
    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    /// Warning-severity findings only.
    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// Raise-eagerly mode: `Err` when the report carries any Error.
    pub fn into_result(self) -> Result<ValidationReport, ValidationError> {
        if self.has_errors() {
            Err(ValidationError { report: self })
        } else {
            Ok(self)
        }
    }

    fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    fn extend(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let errors = self.errors().count();
        let warnings = self.warnings().count();
        writeln!(f, "{errors} error(s), {warnings} warning(s)")?;
        for issue in &self.issues {
            writeln!(f, "  {issue}")?;
        }
        Ok(())
    }
}

/// A report that contains at least one Error-severity finding.
#[derive(Debug, thiserror::Error)]
#[error("scheme validation failed: {report}")]
pub struct ValidationError {
    pub report: ValidationReport,
}

/// Validate `scheme` against `df` with the default filter evaluator.
pub fn validate_scheme(df: &Dataset, scheme: &Scheme) -> ValidationReport {
    validate_scheme_with(df, scheme, &EqualityEvaluator)
}

/// Validate with a caller-supplied filter evaluator.
pub fn validate_scheme_with(
    df: &Dataset,
    scheme: &Scheme,
    evaluator: &dyn FilterEvaluator,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for group in scheme.groups() {
        let rows: Vec<usize> = match group.filter() {
            None => (0..df.n_rows()).collect(),
            Some(filter) => match evaluator.apply(filter, df) {
                Ok(rows) => rows,
                Err(err) => {
                    let variable = match filter {
                        crate::filter::FilterDescriptor::ColumnEquals { column, .. } => {
                            column.clone()
                        }
                    };
                    report.push(Issue::new(
                        group.name(),
                        &variable,
                        IssueType::FilterError,
                        err.to_string(),
                    ));
                    continue;
                }
            },
        };
        if rows.is_empty() {
            report.push(Issue::new(
                group.name(),
                scheme.segment_by().unwrap_or(""),
                IssueType::EmptyGroup,
                "filter matches zero rows".to_owned(),
            ));
        }

        for target in group.targets() {
            let dimension = target.dimension();
            let column = match df.column(dimension) {
                Some(c) => c,
                None => {
                    report.push(Issue::new(
                        group.name(),
                        dimension,
                        IssueType::MissingColumn,
                        format!("column {dimension:?} not found in dataset"),
                    ));
                    continue;
                }
            };

            let mut missing_cells = 0usize;
            let mut observed: BTreeSet<String> = BTreeSet::new();
            for &row in &rows {
                match canon_value(&column.value(row)) {
                    Some(key) => {
                        observed.insert(key);
                    }
                    None => missing_cells += 1,
                }
            }
            if missing_cells > 0 {
                report.push(Issue::new(
                    group.name(),
                    dimension,
                    IssueType::NaNValues,
                    format!("{missing_cells} missing value(s) in weighting column"),
                ));
            }

            if !rows.is_empty() {
                for (category, share) in target.iter() {
                    if share > 0.0 && !observed.contains(category) {
                        report.push(Issue::new(
                            group.name(),
                            dimension,
                            IssueType::MissingInData,
                            format!(
                                "category {category:?} has target {share:.4} but no observations"
                            ),
                        ));
                    }
                }
            }

            let unreferenced: Vec<&str> = observed
                .iter()
                .map(String::as_str)
                .filter(|key| target.share(key).is_none())
                .collect();
            if !unreferenced.is_empty() {
                report.push(Issue::new(
                    group.name(),
                    dimension,
                    IssueType::MissingInScheme,
                    format!("data categories not in scheme: {}", unreferenced.join(", ")),
                ));
            }
        }
    }

    report
}

/// Raise-eagerly convenience: `Err` on the first Error-severity finding.
pub fn validate_scheme_strict(df: &Dataset, scheme: &Scheme) -> Result<(), ValidationError> {
    validate_scheme(df, scheme).into_result().map(|_| ())
}

/// Validate the raw dictionary form against `df`.
///
/// Target totals of zero become `ZeroTotal` report rows rather than
/// construction failures; structurally malformed dictionaries (mismatched
/// segments, no dimensions) still fail with [`SchemeError`].
pub fn validate_scheme_dict(
    df: &Dataset,
    dict: &SchemeDict,
) -> Result<ValidationReport, SchemeError> {
    let mut report = ValidationReport::default();

    // Dictionary-level total checks, reported per group and dimension.
    match dict {
        SchemeDict::Flat(dists) => {
            for (dimension, dist) in dists {
                if dist.values().sum::<f64>() <= 0.0 {
                    report.push(Issue::new(
                        GLOBAL_GROUP,
                        dimension,
                        IssueType::ZeroTotal,
                        "target distribution sums to zero".to_owned(),
                    ));
                }
            }
        }
        SchemeDict::Segmented {
            segment_by,
            segment_targets,
            segments,
        } => {
            if segment_targets.values().sum::<f64>() <= 0.0 {
                report.push(Issue::new(
                    "",
                    segment_by,
                    IssueType::ZeroTotal,
                    "segment targets sum to zero".to_owned(),
                ));
            }
            for (segment, dists) in segments {
                for (dimension, dist) in dists {
                    if dist.values().sum::<f64>() <= 0.0 {
                        report.push(Issue::new(
                            segment,
                            dimension,
                            IssueType::ZeroTotal,
                            "target distribution sums to zero".to_owned(),
                        ));
                    }
                }
            }
        }
    }

    match scheme_from_dict(dict, None, RimParams::default()) {
        Ok(scheme) => {
            report.extend(validate_scheme(df, &scheme));
            Ok(report)
        }
        // Zero totals were already reported above; don't fail on them.
        Err(SchemeError::Target(TargetError::ZeroTotal { .. }))
        | Err(SchemeError::ZeroSegmentTotal { .. })
            if report.has_errors() =>
        {
            Ok(report)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn df() -> Dataset {
        Dataset::from_columns([
            ("gender", Column::from(vec!["Male", "Female", "Male", "Female"])),
            ("age", Column::from(vec!["18-24", "18-24", "25+", "25+"])),
            ("region", Column::from(vec!["A", "A", "B", "B"])),
        ])
        .unwrap()
    }

    fn flat_dict(entries: &[(&str, &[(&str, f64)])]) -> SchemeDict {
        SchemeDict::Flat(
            entries
                .iter()
                .map(|(dim, dist)| {
                    (
                        (*dim).to_owned(),
                        dist.iter().map(|(c, v)| ((*c).to_owned(), *v)).collect(),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn valid_match_is_clean() {
        let dict = flat_dict(&[
            ("gender", &[("Male", 50.0), ("Female", 50.0)]),
            ("age", &[("18-24", 50.0), ("25+", 50.0)]),
        ]);
        let report = validate_scheme_dict(&df(), &dict).unwrap();
        assert!(report.is_clean(), "unexpected findings:\n{report}");
    }

    #[test]
    fn target_without_observations_is_an_error() {
        let dict = flat_dict(&[(
            "gender",
            &[("Male", 40.0), ("Female", 40.0), ("Non-binary", 20.0)],
        )]);
        let report = validate_scheme_dict(&df(), &dict).unwrap();
        assert!(report.has_errors());
        let issue = report.errors().next().unwrap();
        assert_eq!(issue.issue_type, IssueType::MissingInData);
        assert!(issue.details.contains("Non-binary"));
    }

    #[test]
    fn data_category_outside_scheme_is_a_warning() {
        let dict = flat_dict(&[("gender", &[("Female", 100.0)])]);
        let report = validate_scheme_dict(&df(), &dict).unwrap();
        assert!(!report.has_errors());
        let issue = report.warnings().next().unwrap();
        assert_eq!(issue.issue_type, IssueType::MissingInScheme);
        assert!(issue.details.contains("Male"));
    }

    #[test]
    fn zero_target_missing_from_data_is_tolerated() {
        let dict = flat_dict(&[(
            "gender",
            &[("Male", 50.0), ("Female", 50.0), ("Non-binary", 0.0)],
        )]);
        let report = validate_scheme_dict(&df(), &dict).unwrap();
        assert!(report.is_clean(), "unexpected findings:\n{report}");
    }

    #[test]
    fn missing_cells_in_weighting_column_are_an_error() {
        let df = Dataset::from_columns([(
            "gender",
            Column::Text(vec![None, Some("Male".into()), Some("Female".into())]),
        )])
        .unwrap();
        let dict = flat_dict(&[("gender", &[("Male", 50.0), ("Female", 50.0)])]);
        let report = validate_scheme_dict(&df, &dict).unwrap();
        let issue = report.errors().next().unwrap();
        assert_eq!(issue.issue_type, IssueType::NaNValues);
        assert!(issue.details.starts_with("1 missing"));
    }

    #[test]
    fn missing_column_and_zero_total_reported() {
        let dict = flat_dict(&[
            ("height", &[("tall", 50.0), ("short", 50.0)]),
            ("gender", &[("Male", 50.0), ("Female", 50.0)]),
        ]);
        let report = validate_scheme_dict(&df(), &dict).unwrap();
        assert!(report
            .errors()
            .any(|i| i.issue_type == IssueType::MissingColumn && i.variable == "height"));

        let dict = flat_dict(&[("gender", &[("Male", 0.0), ("Female", 0.0)])]);
        let report = validate_scheme_dict(&df(), &dict).unwrap();
        assert!(report.errors().any(|i| i.issue_type == IssueType::ZeroTotal));
    }

    #[test]
    fn segmented_issues_carry_group_names() {
        let json = r#"{
            "segment_by": "region",
            "segment_targets": {"A": 50.0, "B": 50.0},
            "segments": {
                "A": {"gender": {"Male": 100.0}},
                "B": {"gender": {"Alien": 100.0}}
            }
        }"#;
        let dict = SchemeDict::from_json(json).unwrap();
        let report = validate_scheme_dict(&df(), &dict).unwrap();

        let a: Vec<_> = report.issues().iter().filter(|i| i.group == "A").collect();
        assert_eq!(a[0].issue_type, IssueType::MissingInScheme);
        let b: Vec<_> = report
            .issues()
            .iter()
            .filter(|i| i.group == "B" && i.severity == Severity::Error)
            .collect();
        assert_eq!(b[0].issue_type, IssueType::MissingInData);
        assert!(b[0].details.contains("Alien"));
    }

    #[test]
    fn empty_group_is_a_warning() {
        let json = r#"{
            "segment_by": "region",
            "segment_targets": {"A": 50.0, "C": 50.0},
            "segments": {
                "A": {"gender": {"Male": 50.0, "Female": 50.0}},
                "C": {"gender": {"Male": 50.0, "Female": 50.0}}
            }
        }"#;
        let dict = SchemeDict::from_json(json).unwrap();
        let report = validate_scheme_dict(&df(), &dict).unwrap();
        assert!(report
            .warnings()
            .any(|i| i.group == "C" && i.issue_type == IssueType::EmptyGroup));
    }

    #[test]
    fn strict_mode_raises_on_errors_only() {
        let dict = flat_dict(&[("gender", &[("Female", 100.0)])]);
        let scheme = scheme_from_dict(&dict, Some("s"), RimParams::default()).unwrap();
        // Warning only: strict passes.
        assert!(validate_scheme_strict(&df(), &scheme).is_ok());

        let dict = flat_dict(&[("gender", &[("Alien", 100.0)])]);
        let scheme = scheme_from_dict(&dict, Some("s"), RimParams::default()).unwrap();
        let err = validate_scheme_strict(&df(), &scheme).unwrap_err();
        assert!(err.report.has_errors());
    }
}
