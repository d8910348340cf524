//! Ground-Truth Verification
//!
//! Compares operator-entered ground truth against extracted fields and
//! reports a field exact-match rate. Comparison is exact and
//! case-sensitive after trimming surrounding whitespace; there is no
//! fuzzy or locale-aware matching.

use std::collections::HashMap;

use crate::extract::FieldMap;
use crate::schema::FieldSchema;

/// Operator-supplied expected values, keyed by field name. Sparse: only
/// the fields the operator chose to fill are present.
pub type GroundTruth = HashMap<String, String>;

/// Exact-match counts for one verification pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreReport {
    /// Fields with a non-empty ground-truth value
    pub total: usize,
    /// Fields whose extracted value matched exactly
    pub correct: usize,
}

impl ScoreReport {
    /// Exact match rate as a percentage
    pub fn rate(&self) -> f64 {
        self.correct as f64 / self.total as f64 * 100.0
    }

    /// One-line summary, e.g. "66.67% (2 out of 3 fields)"
    pub fn summary(&self) -> String {
        format!("{:.2}% ({} out of {} fields)", self.rate(), self.correct, self.total)
    }
}

/// Result of a scoring pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreOutcome {
    Report(ScoreReport),
    /// No non-empty ground-truth values were supplied; a reported
    /// condition, not an error
    NoComparableFields,
}

/// Score extracted fields against operator ground truth.
///
/// Only schema fields with a non-empty ground-truth value count toward the
/// total. An empty ground-truth entry means "not provided", never an
/// intentional empty-string assertion. Ground-truth keys outside the
/// schema are ignored. A field the backend never produced compares as
/// empty and therefore counts as a miss.
pub fn score(schema: &FieldSchema, extracted: &FieldMap, ground_truth: &GroundTruth) -> ScoreOutcome {
    let mut total = 0;
    let mut correct = 0;

    for field in schema.fields() {
        let Some(expected) = ground_truth.get(field.name) else {
            continue;
        };
        let expected = expected.trim();
        if expected.is_empty() {
            continue;
        }

        total += 1;
        let actual = extracted.get(field.name).map(|v| v.trim()).unwrap_or("");
        if actual == expected {
            correct += 1;
        }
    }

    if total == 0 {
        ScoreOutcome::NoComparableFields
    } else {
        ScoreOutcome::Report(ScoreReport { total, correct })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_trailing_whitespace_trimmed_before_compare() {
        let schema = FieldSchema::license();
        let extracted = map(&[("No", "123"), ("Name", "Aye")]);
        let truth = map(&[("No", "123 ")]);

        match score(&schema, &extracted, &truth) {
            ScoreOutcome::Report(report) => {
                assert_eq!(report.total, 1);
                assert_eq!(report.correct, 1);
                assert!((report.rate() - 100.0).abs() < f64::EPSILON);
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_mismatch_scores_zero() {
        let schema = FieldSchema::license();
        let extracted = map(&[("No", "123")]);
        let truth = map(&[("No", "124")]);

        match score(&schema, &extracted, &truth) {
            ScoreOutcome::Report(report) => {
                assert_eq!(report.total, 1);
                assert_eq!(report.correct, 0);
                assert!(report.rate().abs() < f64::EPSILON);
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_ground_truth_is_incomparable() {
        let schema = FieldSchema::license();
        let extracted = map(&[("No", "123")]);

        assert_eq!(
            score(&schema, &extracted, &GroundTruth::new()),
            ScoreOutcome::NoComparableFields
        );
    }

    #[test]
    fn test_unknown_ground_truth_keys_ignored() {
        let schema = FieldSchema::license();
        let extracted = map(&[("No", "123")]);
        let truth = map(&[("Unknown", "x"), ("No", "123")]);

        match score(&schema, &extracted, &truth) {
            ScoreOutcome::Report(report) => {
                assert_eq!(report.total, 1);
                assert_eq!(report.correct, 1);
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_ground_truth_entry_means_not_provided() {
        let schema = FieldSchema::license();
        let extracted = map(&[("No", ""), ("Name", "Aye")]);
        // blank "No" is not an assertion that the extracted value is empty
        let truth = map(&[("No", "  "), ("Name", "Aye")]);

        match score(&schema, &extracted, &truth) {
            ScoreOutcome::Report(report) => {
                assert_eq!(report.total, 1);
                assert_eq!(report.correct, 1);
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_comparison_is_case_sensitive() {
        let schema = FieldSchema::license();
        let extracted = map(&[("Name", "AYE AYE")]);
        let truth = map(&[("Name", "Aye Aye")]);

        match score(&schema, &extracted, &truth) {
            ScoreOutcome::Report(report) => {
                assert_eq!(report.correct, 0);
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_extracted_field_counts_as_miss() {
        let schema = FieldSchema::license();
        // local pipeline never produced DOB
        let extracted = map(&[("No", "123")]);
        let truth = map(&[("No", "123"), ("DOB", "01-01-1990")]);

        match score(&schema, &extracted, &truth) {
            ScoreOutcome::Report(report) => {
                assert_eq!(report.total, 2);
                assert_eq!(report.correct, 1);
                assert!((report.rate() - 50.0).abs() < f64::EPSILON);
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_summary_annotation() {
        let report = ScoreReport { total: 3, correct: 2 };
        assert_eq!(report.summary(), "66.67% (2 out of 3 fields)");
    }
}
