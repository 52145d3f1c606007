use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One line on stdin: `{id, method, params}`.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state: at most one selected workspace and its open database.
/// Everything except `health` and `workspace.select` requires both.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
