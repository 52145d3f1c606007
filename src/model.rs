use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::EngineError;

/// One grading period's record for one course. Stored as a single document;
/// `students` is embedded, which is why all mutations go through the
/// versioned store (see `store.rs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSheet {
    pub id: String,
    pub course_id: String,
    pub course_name: String,
    pub title: String,
    pub grading_period: GradingPeriod,
    #[serde(default, deserialize_with = "lenient_weight")]
    pub weight_percentage: f64,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub students: Vec<StudentGradeRecord>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingPeriod {
    Quarter1,
    Quarter2,
    Quarter3,
    Quarter4,
    Semester1,
    Semester2,
    Final,
}

impl GradingPeriod {
    /// Sort rank used by `store::get_by_course`: chronological within a term.
    pub fn sort_rank(self) -> i64 {
        match self {
            GradingPeriod::Quarter1 => 0,
            GradingPeriod::Quarter2 => 1,
            GradingPeriod::Quarter3 => 2,
            GradingPeriod::Quarter4 => 3,
            GradingPeriod::Semester1 => 4,
            GradingPeriod::Semester2 => 5,
            GradingPeriod::Final => 6,
        }
    }
}

/// One gradable item inside a sheet. `percentage`/`weight` are informational
/// within the sheet; the per-record `total` is an unweighted mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub max_score: f64,
    #[serde(default, deserialize_with = "lenient_weight")]
    pub percentage: f64,
    #[serde(default, deserialize_with = "lenient_weight")]
    pub weight: f64,
    #[serde(default)]
    pub passing_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub status: ActivityStatus,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Exam,
    Quiz,
    Homework,
    Project,
    Participation,
    Presentation,
    Essay,
    Lab,
    SelfEvaluation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Draft,
    #[default]
    Active,
    Closed,
}

/// One student's state within a sheet. `total` is a cache of the raw mean of
/// present entry values; it is recomputed on every mutation and never
/// trusted as a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeRecord {
    pub student_id: String,
    pub name: String,
    #[serde(default)]
    pub grades: BTreeMap<String, GradeEntry>,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Pending,
    // Older documents wrote "graded" for the same state.
    #[serde(alias = "graded")]
    Completed,
    Incomplete,
}

impl RecordStatus {
    /// Wire/CSV spelling, matching the serde snake_case names.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Completed => "completed",
            RecordStatus::Incomplete => "incomplete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub value: f64,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub submitted_at: i64,
}

impl StudentGradeRecord {
    pub fn new(student_id: &str, name: &str) -> Self {
        StudentGradeRecord {
            student_id: student_id.to_string(),
            name: name.to_string(),
            grades: BTreeMap::new(),
            total: 0.0,
            status: RecordStatus::Pending,
        }
    }

    /// Raw unweighted mean of all present entry values (0 when empty).
    pub fn recomputed_total(&self) -> f64 {
        if self.grades.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.grades.values().map(|g| g.value).sum();
        sum / self.grades.len() as f64
    }

    pub fn refresh_total(&mut self) {
        self.total = self.recomputed_total();
    }
}

impl GradeSheet {
    pub fn activity(&self, activity_id: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.id == activity_id)
    }

    pub fn record(&self, student_id: &str) -> Option<&StudentGradeRecord> {
        self.students.iter().find(|s| s.student_id == student_id)
    }

    pub fn record_mut(&mut self, student_id: &str) -> Option<&mut StudentGradeRecord> {
        self.students.iter_mut().find(|s| s.student_id == student_id)
    }

    /// Document invariants for freshly created sheets: unique activity ids,
    /// unique student ids, positive max scores, weight inside 0..=100.
    pub fn validate_for_create(&self) -> Result<(), EngineError> {
        if !(0.0..=100.0).contains(&self.weight_percentage) {
            return Err(EngineError::invalid_weight(format!(
                "weightPercentage must be within 0..=100, got {}",
                self.weight_percentage
            )));
        }
        let mut activity_ids = std::collections::HashSet::new();
        for a in &self.activities {
            if !activity_ids.insert(a.id.as_str()) {
                return Err(EngineError::bad_params(format!(
                    "duplicate activity id: {}",
                    a.id
                )));
            }
            a.validate()?;
        }
        let mut student_ids = std::collections::HashSet::new();
        for s in &self.students {
            if !student_ids.insert(s.student_id.as_str()) {
                return Err(EngineError::bad_params(format!(
                    "duplicate student id: {}",
                    s.student_id
                )));
            }
        }
        Ok(())
    }
}

impl Activity {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::bad_params("activity name must not be empty"));
        }
        if !(self.max_score > 0.0) || !self.max_score.is_finite() {
            return Err(EngineError::bad_params(format!(
                "activity maxScore must be > 0, got {}",
                self.max_score
            )));
        }
        if let Some(d) = self.due_date.as_deref() {
            if chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
                return Err(EngineError::bad_params(format!(
                    "dueDate must be YYYY-MM-DD, got {:?}",
                    d
                )));
            }
        }
        Ok(())
    }
}

/// Weight fields tolerate documents written by older clients: numbers,
/// numeric strings, null and absent all decode; anything else is 0.
fn lenient_weight<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(weight_from_value(raw.as_ref()))
}

pub fn weight_from_value(v: Option<&serde_json::Value>) -> f64 {
    let w = match v {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if w.is_finite() {
        w
    } else {
        0.0
    }
}
