use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::GradeSheet;
use crate::mutation::{self, ActivitySpec, SheetPatch};
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

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

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn sheet_meta(version: i64, sheet: &GradeSheet) -> serde_json::Value {
    json!({
        "sheetId": sheet.id,
        "title": sheet.title,
        "gradingPeriod": sheet.grading_period,
        "weightPercentage": sheet.weight_percentage,
        "isPublished": sheet.is_published,
        "activityCount": sheet.activities.len(),
        "studentCount": sheet.students.len(),
        "version": version,
    })
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // The store owns id assignment; decode the document with a placeholder.
    let mut doc = req.params.clone();
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("id".to_string(), json!(""));
    }
    let mut sheet: GradeSheet = match serde_json::from_value(doc) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "bad_params", format!("invalid sheet: {}", e), None),
    };
    if let Err(e) = sheet.validate_for_create() {
        return engine_err(&req.id, e);
    }
    let now = now_unix();
    if sheet.created_at == 0 {
        sheet.created_at = now;
    }
    sheet.updated_at = now;

    match store::create(conn, sheet) {
        Ok(sheet_id) => ok(&req.id, json!({ "sheetId": sheet_id, "version": 1 })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get(conn, &sheet_id) {
        Ok(Some(v)) => ok(
            &req.id,
            json!({ "version": v.version, "sheet": v.sheet }),
        ),
        Ok(None) => err(&req.id, "not_found", "grade sheet not found", None),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_list_by_course(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match store::get_by_course(conn, &course_id) {
        Ok(versioned) => {
            let sheets: Vec<serde_json::Value> = versioned
                .iter()
                .filter(|v| include_drafts || v.sheet.is_published)
                .map(|v| sheet_meta(v.version, &v.sheet))
                .collect();
            ok(&req.id, json!({ "courseId": course_id, "sheets": sheets }))
        }
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let patch: SheetPatch = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "bad_params", format!("invalid patch: {}", e), None),
    };
    match mutation::update_sheet(conn, &sheet_id, &patch) {
        Ok((version, ())) => ok(&req.id, json!({ "version": version })),
        Err(e) => engine_err(&req.id, e),
    }
}

/// Administrative wholesale overwrite, bypassing the version check. Restore
/// tooling only; everything else goes through the compare-and-swap mutations.
fn handle_replace(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(raw) = req.params.get("sheet") else {
        return err(&req.id, "bad_params", "missing sheet", None);
    };
    let mut doc = raw.clone();
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("id".to_string(), json!(sheet_id));
    }
    let mut sheet: GradeSheet = match serde_json::from_value(doc) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "bad_params", format!("invalid sheet: {}", e), None),
    };
    if let Err(e) = sheet.validate_for_create() {
        return engine_err(&req.id, e);
    }
    sheet.updated_at = now_unix();

    match store::put(conn, &sheet_id, &sheet) {
        Ok(version) => ok(&req.id, json!({ "version": version })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::delete(conn, &sheet_id) {
        Ok(deleted) => ok(&req.id, json!({ "deleted": deleted })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_set_published(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(published) = req.params.get("published").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing published", None);
    };
    match mutation::set_published(conn, &sheet_id, published) {
        Ok((version, published)) => {
            ok(&req.id, json!({ "version": version, "published": published }))
        }
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_ensure_activity(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(raw) = req.params.get("activity") else {
        return err(&req.id, "bad_params", "missing activity", None);
    };
    let spec: ActivitySpec = match serde_json::from_value(raw.clone()) {
        Ok(s) => s,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid activity: {}", e),
                None,
            )
        }
    };
    match mutation::ensure_activity(conn, &sheet_id, &spec) {
        Ok((version, outcome)) => {
            let warnings: Vec<String> = outcome.warning.clone().into_iter().collect();
            ok(
                &req.id,
                json!({
                    "version": version,
                    "activityId": outcome.activity_id,
                    "matchedBy": outcome.matched_by,
                    "warnings": warnings,
                }),
            )
        }
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sheets.create" => Some(handle_create(state, req)),
        "sheets.get" => Some(handle_get(state, req)),
        "sheets.listByCourse" => Some(handle_list_by_course(state, req)),
        "sheets.update" => Some(handle_update(state, req)),
        "sheets.replace" => Some(handle_replace(state, req)),
        "sheets.delete" => Some(handle_delete(state, req)),
        "sheets.setPublished" => Some(handle_set_published(state, req)),
        "activities.ensure" => Some(handle_ensure_activity(state, req)),
        _ => None,
    }
}
