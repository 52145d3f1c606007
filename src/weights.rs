use serde::Serialize;

use crate::calc::round_off_1_decimal;
use crate::model::{GradeSheet, GradingPeriod};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightRow {
    pub sheet_id: String,
    pub title: String,
    pub grading_period: GradingPeriod,
    pub weight_percentage: f64,
}

/// Advisory check that a course's grading-period weights sum to 100. Sheets
/// are created incrementally across a term, so an incomplete or over-100
/// distribution is a warning to surface, never a blocked write.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightValidation {
    pub is_valid: bool,
    /// Sum of the sheet weights, rounded to one decimal for display.
    pub total: f64,
    pub sheets: Vec<WeightRow>,
}

pub fn validate(sheets: &[GradeSheet]) -> WeightValidation {
    // Non-numeric weights already decoded leniently to 0 at the model layer.
    let raw_total: f64 = sheets.iter().map(|s| s.weight_percentage).sum();
    WeightValidation {
        // Validity is judged on the unrounded sum.
        is_valid: (raw_total - 100.0).abs() < 0.01,
        total: round_off_1_decimal(raw_total),
        sheets: sheets
            .iter()
            .map(|s| WeightRow {
                sheet_id: s.id.clone(),
                title: s.title.clone(),
                grading_period: s.grading_period,
                weight_percentage: s.weight_percentage,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(title: &str, weight: serde_json::Value) -> GradeSheet {
        serde_json::from_value(serde_json::json!({
            "id": title,
            "courseId": "c1",
            "courseName": "Algebra",
            "title": title,
            "gradingPeriod": "quarter1",
            "weightPercentage": weight
        }))
        .expect("decode sheet")
    }

    #[test]
    fn complete_distribution_is_valid() {
        let sheets = vec![
            sheet("Q1", serde_json::json!(40.0)),
            sheet("Q2", serde_json::json!(35.0)),
            sheet("Q3", serde_json::json!(25.0)),
        ];
        let v = validate(&sheets);
        assert!(v.is_valid);
        assert_eq!(v.total, 100.0);
        assert_eq!(v.sheets.len(), 3);
    }

    #[test]
    fn partial_distribution_is_reported_not_rejected() {
        let sheets = vec![
            sheet("Q1", serde_json::json!(40.0)),
            sheet("Q2", serde_json::json!(30.0)),
        ];
        let v = validate(&sheets);
        assert!(!v.is_valid);
        assert_eq!(v.total, 70.0);
    }

    #[test]
    fn junk_weights_count_as_zero() {
        let sheets = vec![
            sheet("Q1", serde_json::json!("60")),
            sheet("Q2", serde_json::json!("forty")),
            sheet("Q3", serde_json::json!(40.0)),
        ];
        let v = validate(&sheets);
        assert!(v.is_valid);
        assert_eq!(v.total, 100.0);
    }

    #[test]
    fn near_100_float_sums_pass_the_tolerance() {
        let sheets = vec![
            sheet("Q1", serde_json::json!(33.3)),
            sheet("Q2", serde_json::json!(33.3)),
            sheet("Q3", serde_json::json!(33.4)),
        ];
        assert!(validate(&sheets).is_valid);
        assert!(validate(&[]).total == 0.0);
        assert!(!validate(&[]).is_valid);
    }
}
