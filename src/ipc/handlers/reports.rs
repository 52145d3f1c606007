use crate::calc::{self, ThresholdPolicy, STANDARD_THRESHOLDS};
use crate::db;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::GradeSheet;
use crate::stats;
use crate::store;
use crate::weights;
use rusqlite::Connection;
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Workspace-wide policy selection; unknown or unset values fall back to the
/// standard cutoffs so a bad setting can never take reads offline.
fn threshold_policy(conn: &Connection) -> ThresholdPolicy {
    match db::settings_get_json(conn, "calc.thresholds") {
        Ok(Some(v)) => v
            .as_str()
            .and_then(ThresholdPolicy::by_name)
            .unwrap_or(STANDARD_THRESHOLDS),
        _ => STANDARD_THRESHOLDS,
    }
}

fn course_sheets(
    conn: &Connection,
    course_id: &str,
    include_drafts: bool,
) -> Result<Vec<GradeSheet>, crate::errors::EngineError> {
    Ok(store::get_by_course(conn, course_id)?
        .into_iter()
        .map(|v| v.sheet)
        .filter(|s| include_drafts || s.is_published)
        .collect())
}

fn handle_weights_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Weights are a teacher-facing concern: drafts count too.
    let sheets = match course_sheets(conn, &course_id, true) {
        Ok(s) => s,
        Err(e) => return engine_err(&req.id, e),
    };
    let validation = weights::validate(&sheets);
    match serde_json::to_value(&validation) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "store_unavailable", e.to_string(), None),
    }
}

fn handle_course_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let include_drafts = req
        .params
        .get("includeDrafts")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let sheets = match course_sheets(conn, &course_id, include_drafts) {
        Ok(s) => s,
        Err(e) => return engine_err(&req.id, e),
    };
    let policy = threshold_policy(conn);
    let summary = calc::course_summary(&course_id, &sheets, &policy);
    match serde_json::to_value(&summary) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "store_unavailable", e.to_string(), None),
    }
}

fn handle_student_snapshot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Students only ever see published sheets; an unknown student degrades
    // to the no-grades snapshot rather than an error.
    let sheets = match course_sheets(conn, &course_id, false) {
        Ok(s) => s,
        Err(e) => return engine_err(&req.id, e),
    };
    let policy = threshold_policy(conn);
    let snapshot = calc::course_snapshot(&sheets, &student_id, &policy);
    let breakdown = calc::sheet_breakdowns(&sheets, &student_id);
    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "studentId": student_id,
            "snapshot": snapshot,
            "sheets": breakdown,
        }),
    )
}

fn handle_sheet_statistics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get(conn, &sheet_id) {
        Ok(Some(v)) => {
            let statistics = stats::statistics(&v.sheet);
            match serde_json::to_value(&statistics) {
                Ok(value) => ok(&req.id, value),
                Err(e) => err(&req.id, "store_unavailable", e.to_string(), None),
            }
        }
        Ok(None) => err(&req.id, "not_found", "grade sheet not found", None),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "weights.validate" => Some(handle_weights_validate(state, req)),
        "course.summary" => Some(handle_course_summary(state, req)),
        "course.studentSnapshot" => Some(handle_student_snapshot(state, req)),
        "sheet.statistics" => Some(handle_sheet_statistics(state, req)),
        _ => None,
    }
}
