use crate::export;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

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

fn handle_sheet_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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
            let csv = export::sheet_csv(&v.sheet);
            ok(
                &req.id,
                json!({ "csv": csv, "rows": v.sheet.students.len() }),
            )
        }
        Ok(None) => err(&req.id, "not_found", "grade sheet not found", None),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_course_archive(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };
    let include_drafts = req
        .params
        .get("includeDrafts")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let sheets: Vec<_> = match store::get_by_course(conn, &course_id) {
        Ok(versioned) => versioned
            .into_iter()
            .map(|v| v.sheet)
            .filter(|s| include_drafts || s.is_published)
            .collect(),
        Err(e) => return engine_err(&req.id, e),
    };
    if sheets.is_empty() {
        return err(
            &req.id,
            "not_found",
            "no sheets to export for course",
            Some(json!({ "courseId": course_id })),
        );
    }

    match export::export_course_archive(&course_id, &sheets, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "path": out_path.to_string_lossy(),
                "entryCount": summary.entry_count,
                "sheetCount": summary.sheet_count,
            }),
        ),
        Err(e) => err(&req.id, "store_unavailable", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.sheetCsv" => Some(handle_sheet_csv(state, req)),
        "export.courseArchive" => Some(handle_course_archive(state, req)),
        _ => None,
    }
}
