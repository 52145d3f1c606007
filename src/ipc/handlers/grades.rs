use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::mutation::{self, RosterStudent};
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

fn handle_set_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(value) = req.params.get("value").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing numeric value", None);
    };
    let comment = req.params.get("comment").and_then(|v| v.as_str());
    let publish_sheet = req
        .params
        .get("publishSheet")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    match mutation::set_grade(
        conn,
        &sheet_id,
        &student_id,
        &activity_id,
        value,
        comment,
        publish_sheet,
    ) {
        Ok((version, outcome)) => ok(
            &req.id,
            json!({
                "version": version,
                "total": outcome.total,
                "recordStatus": outcome.record_status,
                "published": outcome.published,
            }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_roster_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(raw) = req.params.get("students") else {
        return err(&req.id, "bad_params", "missing students", None);
    };
    let students: Vec<RosterStudent> = match serde_json::from_value(raw.clone()) {
        Ok(s) => s,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid students: {}", e),
                None,
            )
        }
    };

    match mutation::add_students(conn, &sheet_id, &students) {
        Ok((version, outcome)) => ok(
            &req.id,
            json!({
                "version": version,
                "added": outcome.added,
                "skipped": outcome.skipped,
            }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_roster_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match mutation::remove_student(conn, &sheet_id, &student_id) {
        Ok((version, removed)) => {
            ok(&req.id, json!({ "version": version, "removed": removed }))
        }
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_roster_rename(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match mutation::rename_student(conn, &sheet_id, &student_id, &name) {
        Ok((version, ())) => ok(&req.id, json!({ "version": version })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.set" => Some(handle_set_grade(state, req)),
        "roster.add" => Some(handle_roster_add(state, req)),
        "roster.remove" => Some(handle_roster_remove(state, req)),
        "roster.rename" => Some(handle_roster_rename(state, req)),
        _ => None,
    }
}
