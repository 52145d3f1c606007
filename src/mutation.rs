use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::model::{
    Activity, ActivityStatus, ActivityType, GradeEntry, GradeSheet, GradingPeriod, RecordStatus,
    StudentGradeRecord,
};
use crate::store::{self, CasOutcome};

/// Grading an unrostered student is permitted at this layer (enrollment
/// checks belong to the caller); the synthesized record carries this name
/// until `roster.rename` refreshes it.
pub const UNROSTERED_NAME: &str = "(unrostered)";

const CAS_MAX_ATTEMPTS: u32 = 8;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct Applied<T> {
    outcome: T,
    changed: bool,
}

/// Every mutation is fetch -> apply delta to the freshest snapshot ->
/// compare-and-swap. On conflict the delta is replayed against a refetched
/// snapshot, so a concurrent writer's changes are never clobbered. Deltas
/// that change nothing skip the write entirely (the version stays put).
fn run_mutation<T>(
    conn: &Connection,
    sheet_id: &str,
    mut apply: impl FnMut(&mut GradeSheet, i64) -> Result<Applied<T>, EngineError>,
) -> Result<(i64, T), EngineError> {
    for _ in 0..CAS_MAX_ATTEMPTS {
        let Some(snapshot) = store::get(conn, sheet_id)? else {
            return Err(EngineError::not_found("grade sheet not found"));
        };
        let mut sheet = snapshot.sheet;
        let now = now_unix();
        let applied = apply(&mut sheet, now)?;
        if !applied.changed {
            return Ok((snapshot.version, applied.outcome));
        }
        sheet.updated_at = now;
        match store::compare_and_swap(conn, sheet_id, snapshot.version, &sheet)? {
            CasOutcome::Committed(version) => return Ok((version, applied.outcome)),
            CasOutcome::Conflict => continue,
        }
    }
    Err(EngineError::conflict(
        "grade sheet kept changing underneath the mutation; giving up",
    ))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetGradeOutcome {
    pub total: f64,
    pub record_status: RecordStatus,
    pub published: bool,
}

pub fn set_grade(
    conn: &Connection,
    sheet_id: &str,
    student_id: &str,
    activity_id: &str,
    value: f64,
    comment: Option<&str>,
    publish_sheet: bool,
) -> Result<(i64, SetGradeOutcome), EngineError> {
    run_mutation(conn, sheet_id, |sheet, now| {
        apply_set_grade(
            sheet,
            student_id,
            activity_id,
            value,
            comment,
            publish_sheet,
            now,
        )
        .map(|outcome| Applied {
            outcome,
            changed: true,
        })
    })
}

pub fn apply_set_grade(
    sheet: &mut GradeSheet,
    student_id: &str,
    activity_id: &str,
    value: f64,
    comment: Option<&str>,
    publish_sheet: bool,
    now: i64,
) -> Result<SetGradeOutcome, EngineError> {
    let max_score = match sheet.activity(activity_id) {
        Some(a) => a.max_score,
        None => {
            return Err(EngineError::not_found("activity not found in sheet")
                .with_details(serde_json::json!({ "activityId": activity_id })))
        }
    };
    if !value.is_finite() || value < 0.0 || value > max_score {
        return Err(
            EngineError::invalid_grade(format!(
                "grade must be within 0..={}, got {}",
                max_score, value
            ))
            .with_details(serde_json::json!({ "value": value, "maxScore": max_score })),
        );
    }

    let idx = match sheet
        .students
        .iter()
        .position(|s| s.student_id == student_id)
    {
        Some(i) => i,
        None => {
            sheet
                .students
                .push(StudentGradeRecord::new(student_id, UNROSTERED_NAME));
            sheet.students.len() - 1
        }
    };
    let record = &mut sheet.students[idx];

    record.grades.insert(
        activity_id.to_string(),
        GradeEntry {
            value,
            comment: comment.unwrap_or("").to_string(),
            submitted_at: now,
        },
    );
    record.refresh_total();
    record.status = RecordStatus::Completed;
    let total = record.total;

    // Publishing is an explicit caller choice, never a grading side effect.
    if publish_sheet {
        sheet.is_published = true;
    }

    Ok(SetGradeOutcome {
        total,
        record_status: RecordStatus::Completed,
        published: sheet.is_published,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub student_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStudentsOutcome {
    pub added: usize,
    pub skipped: usize,
}

pub fn add_students(
    conn: &Connection,
    sheet_id: &str,
    students: &[RosterStudent],
) -> Result<(i64, AddStudentsOutcome), EngineError> {
    run_mutation(conn, sheet_id, |sheet, _now| {
        let outcome = apply_add_students(sheet, students);
        let changed = outcome.added > 0;
        Ok(Applied { outcome, changed })
    })
}

pub fn apply_add_students(sheet: &mut GradeSheet, students: &[RosterStudent]) -> AddStudentsOutcome {
    let mut added = 0usize;
    let mut skipped = 0usize;
    for s in students {
        if s.student_id.trim().is_empty() || sheet.record(&s.student_id).is_some() {
            skipped += 1;
            continue;
        }
        sheet
            .students
            .push(StudentGradeRecord::new(&s.student_id, &s.name));
        added += 1;
    }
    AddStudentsOutcome { added, skipped }
}

pub fn remove_student(
    conn: &Connection,
    sheet_id: &str,
    student_id: &str,
) -> Result<(i64, bool), EngineError> {
    run_mutation(conn, sheet_id, |sheet, _now| {
        let removed = apply_remove_student(sheet, student_id);
        Ok(Applied {
            outcome: removed,
            changed: removed,
        })
    })
}

pub fn apply_remove_student(sheet: &mut GradeSheet, student_id: &str) -> bool {
    let before = sheet.students.len();
    sheet.students.retain(|s| s.student_id != student_id);
    sheet.students.len() != before
}

pub fn rename_student(
    conn: &Connection,
    sheet_id: &str,
    student_id: &str,
    name: &str,
) -> Result<(i64, ()), EngineError> {
    run_mutation(conn, sheet_id, |sheet, _now| {
        let record = sheet
            .record_mut(student_id)
            .ok_or_else(|| EngineError::not_found("student not found in sheet"))?;
        let changed = record.name != name;
        record.name = name.to_string();
        Ok(Applied {
            outcome: (),
            changed,
        })
    })
}

pub fn set_published(
    conn: &Connection,
    sheet_id: &str,
    published: bool,
) -> Result<(i64, bool), EngineError> {
    run_mutation(conn, sheet_id, |sheet, _now| {
        let changed = sheet.is_published != published;
        sheet.is_published = published;
        Ok(Applied {
            outcome: published,
            changed,
        })
    })
}

/// Patchable sheet metadata; untouched fields stay as stored. An empty
/// description clears the stored one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub course_name: Option<String>,
    pub weight_percentage: Option<f64>,
    pub grading_period: Option<GradingPeriod>,
}

pub fn update_sheet(
    conn: &Connection,
    sheet_id: &str,
    patch: &SheetPatch,
) -> Result<(i64, ()), EngineError> {
    run_mutation(conn, sheet_id, |sheet, _now| {
        let changed = apply_sheet_patch(sheet, patch)?;
        Ok(Applied {
            outcome: (),
            changed,
        })
    })
}

pub fn apply_sheet_patch(sheet: &mut GradeSheet, patch: &SheetPatch) -> Result<bool, EngineError> {
    let mut changed = false;
    if let Some(title) = patch.title.as_deref() {
        if title.trim().is_empty() {
            return Err(EngineError::bad_params("title must not be empty"));
        }
        if sheet.title != title {
            sheet.title = title.to_string();
            changed = true;
        }
    }
    if let Some(description) = patch.description.as_deref() {
        let next = if description.trim().is_empty() {
            None
        } else {
            Some(description.to_string())
        };
        if sheet.description != next {
            sheet.description = next;
            changed = true;
        }
    }
    if let Some(course_name) = patch.course_name.as_deref() {
        if sheet.course_name != course_name {
            sheet.course_name = course_name.to_string();
            changed = true;
        }
    }
    if let Some(weight) = patch.weight_percentage {
        if !(0.0..=100.0).contains(&weight) || !weight.is_finite() {
            return Err(EngineError::invalid_weight(format!(
                "weightPercentage must be within 0..=100, got {}",
                weight
            )));
        }
        if sheet.weight_percentage != weight {
            sheet.weight_percentage = weight;
            changed = true;
        }
    }
    if let Some(period) = patch.grading_period {
        if sheet.grading_period != period {
            sheet.grading_period = period;
            changed = true;
        }
    }
    Ok(changed)
}

/// Incoming activity reference from an external assessment. `id` is the
/// durable linkage; name matching below is a migration shim only.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySpec {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub max_score: f64,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub passing_score: f64,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub status: Option<ActivityStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    Id,
    Name,
    Created,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureActivityOutcome {
    pub activity_id: String,
    pub matched_by: MatchedBy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub fn ensure_activity(
    conn: &Connection,
    sheet_id: &str,
    spec: &ActivitySpec,
) -> Result<(i64, EnsureActivityOutcome), EngineError> {
    run_mutation(conn, sheet_id, |sheet, now| {
        let outcome = apply_ensure_activity(sheet, spec, now)?;
        let changed = outcome.matched_by == MatchedBy::Created;
        Ok(Applied { outcome, changed })
    })
}

pub fn apply_ensure_activity(
    sheet: &mut GradeSheet,
    spec: &ActivitySpec,
    now: i64,
) -> Result<EnsureActivityOutcome, EngineError> {
    if let Some(id) = spec.id.as_deref().filter(|s| !s.trim().is_empty()) {
        if sheet.activity(id).is_some() {
            return Ok(EnsureActivityOutcome {
                activity_id: id.to_string(),
                matched_by: MatchedBy::Id,
                warning: None,
            });
        }
    } else {
        let wanted = spec.name.trim().to_ascii_lowercase();
        if let Some(existing) = sheet
            .activities
            .iter()
            .find(|a| a.name.trim().to_ascii_lowercase() == wanted)
        {
            return Ok(EnsureActivityOutcome {
                activity_id: existing.id.clone(),
                matched_by: MatchedBy::Name,
                warning: Some(format!(
                    "matched activity {:?} by name; store its id {} on the assessment instead",
                    existing.name, existing.id
                )),
            });
        }
    }

    let activity = Activity {
        id: spec
            .id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: spec.name.clone(),
        kind: spec.kind,
        max_score: spec.max_score,
        percentage: spec.percentage,
        weight: spec.weight,
        passing_score: spec.passing_score,
        due_date: spec.due_date.clone(),
        status: spec.status.unwrap_or_default(),
        created_at: now,
    };
    activity.validate()?;
    let activity_id = activity.id.clone();
    sheet.activities.push(activity);
    Ok(EnsureActivityOutcome {
        activity_id,
        matched_by: MatchedBy::Created,
        warning: None,
    })
}
