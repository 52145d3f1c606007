use serde::Serialize;

use crate::model::{GradeSheet, GradingPeriod};

/// Every aggregate is expressed on this canonical scale; activities carry
/// arbitrary `maxScore`s and are normalized at read time.
pub const CANONICAL_MAX: f64 = 5.0;

/// 1-decimal rounding used for display values (weight totals, percentages):
/// `floor(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// `value` out of `max_score`, mapped onto 0..=CANONICAL_MAX. A non-positive
/// `max_score` cannot be normalized and contributes 0.
pub fn normalized_value(value: f64, max_score: f64) -> f64 {
    if max_score > 0.0 {
        value / max_score * CANONICAL_MAX
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeStatus {
    Passing,
    AtRisk,
    Failing,
    /// Distinct from `Failing`: nothing has been graded yet. A zero that
    /// means "no data" must never read as a failing grade.
    NoGrades,
}

/// Named cutoffs on the canonical 0..=5 scale. Exactly one policy is active
/// per workspace (the `calc.thresholds` setting); call sites never pick
/// their own cutoffs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    pub name: &'static str,
    pub passing: f64,
    pub at_risk: f64,
}

pub const STANDARD_THRESHOLDS: ThresholdPolicy = ThresholdPolicy {
    name: "standard",
    passing: 3.0,
    at_risk: 2.0,
};

pub const STRICT_THRESHOLDS: ThresholdPolicy = ThresholdPolicy {
    name: "strict",
    passing: 3.5,
    at_risk: 3.0,
};

impl ThresholdPolicy {
    pub fn by_name(name: &str) -> Option<ThresholdPolicy> {
        match name {
            "standard" => Some(STANDARD_THRESHOLDS),
            "strict" => Some(STRICT_THRESHOLDS),
            _ => None,
        }
    }

    pub fn classify(&self, final_grade: f64, has_grades: bool) -> GradeStatus {
        if !has_grades {
            return GradeStatus::NoGrades;
        }
        if final_grade >= self.passing {
            GradeStatus::Passing
        } else if final_grade >= self.at_risk {
            GradeStatus::AtRisk
        } else {
            GradeStatus::Failing
        }
    }
}

/// Mean of normalized entry values over the sheet's activities that carry an
/// entry for this student. Activities without an entry are excluded, not
/// treated as zero; `None` when nothing is graded (or the student is absent).
pub fn sheet_average(sheet: &GradeSheet, student_id: &str) -> Option<f64> {
    let record = sheet.record(student_id)?;
    let mut sum = 0.0;
    let mut count = 0usize;
    for activity in &sheet.activities {
        if let Some(entry) = record.grades.get(&activity.id) {
            sum += normalized_value(entry.value, activity.max_score);
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// One student's standing in one sheet, as surfaced in course reads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetBreakdown {
    pub sheet_id: String,
    pub title: String,
    pub grading_period: GradingPeriod,
    pub weight_percentage: f64,
    pub average: Option<f64>,
    pub graded_count: usize,
    /// Whether this sheet entered the weighted final (graded, positive
    /// average, positive weight).
    pub counted: bool,
}

/// The on-demand course-level derivation. Never persisted; rebuilt on every
/// read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGradeSnapshot {
    pub current_grade: f64,
    pub evaluated_percentage: f64,
    pub remaining_percentage: f64,
    pub status: GradeStatus,
}

/// Course final grade for one student over the given sheets (the caller
/// decides published-only vs drafts-included). Pure; missing data degrades
/// to the no-grades snapshot rather than erroring.
pub fn course_snapshot(
    sheets: &[GradeSheet],
    student_id: &str,
    policy: &ThresholdPolicy,
) -> CourseGradeSnapshot {
    let total_weight: f64 = sheets.iter().map(|s| s.weight_percentage).sum();
    let mut has_grades = false;

    if total_weight > 0.0 {
        // Weighted mean restricted to sheets the student actually has
        // grades in; zero-weight and ungraded sheets sit outside both the
        // numerator and the denominator, so early-term finals reflect only
        // graded work.
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for sheet in sheets {
            let avg = sheet_average(sheet, student_id);
            if avg.is_some() {
                has_grades = true;
            }
            let Some(avg) = avg.filter(|v| *v > 0.0) else {
                continue;
            };
            if sheet.weight_percentage <= 0.0 {
                continue;
            }
            numerator += avg * sheet.weight_percentage / 100.0;
            denominator += sheet.weight_percentage / 100.0;
        }
        let current_grade = if denominator > 0.0 {
            numerator / denominator
        } else {
            0.0
        };
        let evaluated = denominator * 100.0;
        return CourseGradeSnapshot {
            current_grade,
            evaluated_percentage: evaluated,
            remaining_percentage: (100.0 - evaluated).max(0.0),
            status: policy.classify(current_grade, has_grades),
        };
    }

    // Unweighted course: flat mean of every normalized entry across all
    // sheets, ignoring the per-sheet structure. Evaluated coverage is the
    // literal formula value, 0.
    let mut sum = 0.0;
    let mut count = 0usize;
    for sheet in sheets {
        let Some(record) = sheet.record(student_id) else {
            continue;
        };
        for activity in &sheet.activities {
            if let Some(entry) = record.grades.get(&activity.id) {
                sum += normalized_value(entry.value, activity.max_score);
                count += 1;
            }
        }
    }
    if count > 0 {
        has_grades = true;
    }
    let current_grade = if count > 0 { sum / count as f64 } else { 0.0 };
    CourseGradeSnapshot {
        current_grade,
        evaluated_percentage: 0.0,
        remaining_percentage: 100.0,
        status: policy.classify(current_grade, has_grades),
    }
}

pub fn sheet_breakdowns(sheets: &[GradeSheet], student_id: &str) -> Vec<SheetBreakdown> {
    sheets
        .iter()
        .map(|sheet| {
            let average = sheet_average(sheet, student_id);
            let graded_count = sheet
                .record(student_id)
                .map(|r| {
                    sheet
                        .activities
                        .iter()
                        .filter(|a| r.grades.contains_key(&a.id))
                        .count()
                })
                .unwrap_or(0);
            SheetBreakdown {
                sheet_id: sheet.id.clone(),
                title: sheet.title.clone(),
                grading_period: sheet.grading_period,
                weight_percentage: sheet.weight_percentage,
                average,
                graded_count,
                counted: average.map(|v| v > 0.0).unwrap_or(false)
                    && sheet.weight_percentage > 0.0,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetMeta {
    pub sheet_id: String,
    pub title: String,
    pub grading_period: GradingPeriod,
    pub weight_percentage: f64,
    pub is_published: bool,
    pub activity_count: usize,
    pub student_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub student_id: String,
    pub name: String,
    /// One slot per sheet, in the same order as `CourseSummary::sheets`.
    pub sheet_averages: Vec<Option<f64>>,
    pub current_grade: f64,
    pub evaluated_percentage: f64,
    pub remaining_percentage: f64,
    pub status: GradeStatus,
}

/// The teacher-dashboard read: per-sheet metadata plus one row per student
/// seen anywhere in the course.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    pub course_id: String,
    pub threshold_policy: &'static str,
    pub sheets: Vec<SheetMeta>,
    pub students: Vec<StudentRow>,
}

pub fn course_summary(
    course_id: &str,
    sheets: &[GradeSheet],
    policy: &ThresholdPolicy,
) -> CourseSummary {
    let sheet_metas: Vec<SheetMeta> = sheets
        .iter()
        .map(|s| SheetMeta {
            sheet_id: s.id.clone(),
            title: s.title.clone(),
            grading_period: s.grading_period,
            weight_percentage: s.weight_percentage,
            is_published: s.is_published,
            activity_count: s.activities.len(),
            student_count: s.students.len(),
        })
        .collect();

    // Union of rosters across the sheets, in first-seen order; the first
    // cached name wins (roster.rename refreshes all sheets it touches).
    let mut order: Vec<String> = Vec::new();
    let mut names: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    for sheet in sheets {
        for record in &sheet.students {
            if !names.contains_key(&record.student_id) {
                order.push(record.student_id.clone());
                names.insert(record.student_id.clone(), record.name.clone());
            }
        }
    }

    let students = order
        .into_iter()
        .map(|student_id| {
            let snapshot = course_snapshot(sheets, &student_id, policy);
            StudentRow {
                name: names.remove(&student_id).unwrap_or_default(),
                sheet_averages: sheets
                    .iter()
                    .map(|s| sheet_average(s, &student_id))
                    .collect(),
                current_grade: snapshot.current_grade,
                evaluated_percentage: snapshot.evaluated_percentage,
                remaining_percentage: snapshot.remaining_percentage,
                status: snapshot.status,
                student_id,
            }
        })
        .collect();

    CourseSummary {
        course_id: course_id.to_string(),
        threshold_policy: policy.name,
        sheets: sheet_metas,
        students,
    }
}
