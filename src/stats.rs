use serde::Serialize;

use crate::model::{GradeSheet, RecordStatus};

/// Sheet-level summary derived by walking every entry of every record.
/// Scores here are raw entry values (whatever scale the activities use);
/// normalization is an aggregation concern, not a statistics one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetStatistics {
    pub total_students: usize,
    pub graded_students: usize,
    pub average_score: f64,
    pub highest_score: f64,
    pub lowest_score: f64,
    pub completion_rate: f64,
}

pub fn statistics(sheet: &GradeSheet) -> SheetStatistics {
    let total_students = sheet.students.len();
    let graded_students = sheet
        .students
        .iter()
        .filter(|s| s.status == RecordStatus::Completed)
        .count();

    let mut sum = 0.0;
    let mut count = 0usize;
    let mut highest = f64::NEG_INFINITY;
    let mut lowest = f64::INFINITY;
    for record in &sheet.students {
        for entry in record.grades.values() {
            sum += entry.value;
            count += 1;
            highest = highest.max(entry.value);
            lowest = lowest.min(entry.value);
        }
    }

    SheetStatistics {
        total_students,
        graded_students,
        average_score: if count > 0 { sum / count as f64 } else { 0.0 },
        highest_score: if count > 0 { highest } else { 0.0 },
        lowest_score: if count > 0 { lowest } else { 0.0 },
        completion_rate: if total_students > 0 {
            graded_students as f64 / total_students as f64 * 100.0
        } else {
            0.0
        },
    }
}
