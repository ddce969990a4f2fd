use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Workspace {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeEntry {
    pub id: u64,
    #[serde(rename = "wid")]
    pub workspace_id: u64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    pub email: String,
    #[serde(default)]
    pub fullname: Option<String>,
}

/// Remote timer this process started and has not stopped yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTimer {
    pub entry_id: u64,
    pub workspace_id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartedEntry {
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct StartRequest<'a> {
    pub time_entry: NewTimeEntry<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct NewTimeEntry<'a> {
    pub wid: u64,
    pub description: &'a str,
    pub created_with: &'a str,
}
