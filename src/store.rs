use rusqlite::{Connection, OptionalExtension};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::model::GradeSheet;

/// A sheet together with the store version it was read at. Every write must
/// name the version it is based on; see `compare_and_swap`.
#[derive(Debug, Clone)]
pub struct VersionedSheet {
    pub version: i64,
    pub sheet: GradeSheet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Committed(i64),
    /// Someone else committed since the snapshot was read. The caller must
    /// refetch and reapply its delta; a blind overwrite is never performed.
    Conflict,
}

fn now_ts_string() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

fn encode_body(sheet: &GradeSheet) -> Result<String, EngineError> {
    serde_json::to_string(sheet)
        .map_err(|e| EngineError::store_unavailable(format!("encode sheet document: {}", e)))
}

fn decode_body(id: &str, body: &str) -> Result<GradeSheet, EngineError> {
    serde_json::from_str(body).map_err(|e| {
        EngineError::store_unavailable(format!("corrupt sheet document: {}", e))
            .with_details(serde_json::json!({ "sheetId": id }))
    })
}

/// Inserts a new sheet document. The store owns id assignment.
pub fn create(conn: &Connection, mut sheet: GradeSheet) -> Result<String, EngineError> {
    sheet.id = Uuid::new_v4().to_string();
    let body = encode_body(&sheet)?;
    conn.execute(
        "INSERT INTO grade_sheets(id, course_id, version, body, updated_at)
         VALUES(?, ?, 1, ?, ?)",
        (&sheet.id, &sheet.course_id, &body, now_ts_string()),
    )?;
    Ok(sheet.id)
}

pub fn get(conn: &Connection, sheet_id: &str) -> Result<Option<VersionedSheet>, EngineError> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT version, body FROM grade_sheets WHERE id = ?",
            [sheet_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    match row {
        Some((version, body)) => Ok(Some(VersionedSheet {
            version,
            sheet: decode_body(sheet_id, &body)?,
        })),
        None => Ok(None),
    }
}

/// All sheets of a course, ordered by grading period, then creation time.
pub fn get_by_course(conn: &Connection, course_id: &str) -> Result<Vec<VersionedSheet>, EngineError> {
    let mut stmt = conn.prepare("SELECT id, version, body FROM grade_sheets WHERE course_id = ?")?;
    let rows: Vec<(String, i64, String)> = stmt
        .query_map([course_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, version, body) in rows {
        out.push(VersionedSheet {
            version,
            sheet: decode_body(&id, &body)?,
        });
    }
    out.sort_by(|a, b| {
        a.sheet
            .grading_period
            .sort_rank()
            .cmp(&b.sheet.grading_period.sort_rank())
            .then(a.sheet.created_at.cmp(&b.sheet.created_at))
            .then(a.sheet.id.cmp(&b.sheet.id))
    });
    Ok(out)
}

/// Unconditional full overwrite. Kept for callers that hold no version
/// (administrative restores); the mutation engine never uses it.
pub fn put(conn: &Connection, sheet_id: &str, sheet: &GradeSheet) -> Result<i64, EngineError> {
    let body = encode_body(sheet)?;
    let changed = conn.execute(
        "UPDATE grade_sheets
         SET course_id = ?, body = ?, version = version + 1, updated_at = ?
         WHERE id = ?",
        (&sheet.course_id, &body, now_ts_string(), sheet_id),
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("grade sheet not found"));
    }
    let version: i64 = conn.query_row(
        "SELECT version FROM grade_sheets WHERE id = ?",
        [sheet_id],
        |r| r.get(0),
    )?;
    Ok(version)
}

/// The only write path the mutation engine uses: commits `sheet` iff the row
/// is still at `expected_version`.
pub fn compare_and_swap(
    conn: &Connection,
    sheet_id: &str,
    expected_version: i64,
    sheet: &GradeSheet,
) -> Result<CasOutcome, EngineError> {
    let body = encode_body(sheet)?;
    let changed = conn.execute(
        "UPDATE grade_sheets
         SET course_id = ?, body = ?, version = version + 1, updated_at = ?
         WHERE id = ? AND version = ?",
        (
            &sheet.course_id,
            &body,
            now_ts_string(),
            sheet_id,
            expected_version,
        ),
    )?;
    if changed == 1 {
        return Ok(CasOutcome::Committed(expected_version + 1));
    }
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM grade_sheets WHERE id = ?",
            [sheet_id],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_some() {
        Ok(CasOutcome::Conflict)
    } else {
        Err(EngineError::not_found("grade sheet not found"))
    }
}

/// Idempotent; returns whether a row was actually removed.
pub fn delete(conn: &Connection, sheet_id: &str) -> Result<bool, EngineError> {
    let changed = conn.execute("DELETE FROM grade_sheets WHERE id = ?", [sheet_id])?;
    Ok(changed == 1)
}
