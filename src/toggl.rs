use std::collections::HashSet;
use std::time::Duration as StdDuration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Duration;
use reqwest::blocking::{Client, Request};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::dates::DateRange;
use crate::models::{
    ActiveTimer, DataEnvelope, NewTimeEntry, Profile, StartRequest, StartedEntry, TimeEntry,
    Workspace,
};

pub const DEFAULT_API_URL: &str = "https://api.track.toggl.com/api/v8";
pub const CREATED_WITH: &str = "tomate-toggl-plugin";
const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(15);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TogglError {
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("token rejected by Toggl ({status}): {body}")]
    InvalidToken { status: u16, body: String },
    #[error("Toggl API error {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("unexpected response from Toggl: {0}")]
    Decode(String),
}

impl TogglError {
    /// Only network-level failures are safe to retry; a rejected request
    /// will be rejected again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TogglError::Transport(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub token: String,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>, token: &str) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            token: token.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// Carries one request to the Toggl API. Implementations report only
/// transport failures as errors; any HTTP status comes back as a response.
pub trait Transport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TogglError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TogglError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: StdDuration,
    ) -> Result<Self, TogglError> {
        let client = Client::builder()
            .user_agent(CREATED_WITH)
            .timeout(timeout)
            .build()
            .map_err(|err| TogglError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl ReqwestTransport {
    fn build(&self, request: &ApiRequest) -> Result<Request, TogglError> {
        let base = format!("{}{}", self.base_url, request.path);
        let url = reqwest::Url::parse_with_params(&base, &request.query)
            .map_err(|err| TogglError::InvalidArgument(err.to_string()))?;
        let credentials = STANDARD.encode(format!("{}:api_token", request.token));

        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
        };
        let mut builder = builder
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Basic {}", credentials));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
            .build()
            .map_err(|err| TogglError::InvalidArgument(err.to_string()))
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TogglError> {
        let request = self.build(request)?;
        let response = self
            .client
            .execute(request)
            .map_err(|err| TogglError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| TogglError::Transport(err.to_string()))?;
        Ok(ApiResponse { status, body })
    }
}

/// Stateful wrapper over the Toggl API. Holds the last token that passed
/// validation and the timer it started, if any.
pub struct TrackingClient<T: Transport> {
    transport: T,
    token: Option<String>,
    active: Option<ActiveTimer>,
}

impl<T: Transport> TrackingClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            token: None,
            active: None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn active_timer(&self) -> Option<ActiveTimer> {
        self.active
    }

    /// Checks `candidate` against `/me`. The held token is replaced only when
    /// the server accepts the candidate.
    pub fn validate_token(&mut self, candidate: &str) -> Result<Profile, TogglError> {
        let request = ApiRequest::new(Method::Get, "/me", candidate);
        let response = self.transport.send(&request)?;
        if response.status != 200 {
            error!(status = response.status, body = %response.body, "token check failed");
            return Err(TogglError::InvalidToken {
                status: response.status,
                body: response.body,
            });
        }
        let envelope: DataEnvelope<Profile> = decode(&response.body)?;
        self.token = Some(candidate.to_string());
        debug!(email = %envelope.data.email, "token accepted");
        Ok(envelope.data)
    }

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>, TogglError> {
        let token = self.require_token()?;
        let response = self.call(ApiRequest::new(Method::Get, "/workspaces", token))?;
        decode(&response.body)
    }

    /// Entries of `workspace_id` started within the trailing `lookback`,
    /// one per distinct description, in the order the API returned them.
    pub fn list_recent_entries(
        &self,
        workspace_id: u64,
        lookback: Duration,
    ) -> Result<Vec<TimeEntry>, TogglError> {
        let token = self.require_token()?;
        let range = DateRange::trailing_from_now(lookback).map_err(TogglError::InvalidArgument)?;
        let (start, end) = range.as_iso8601();

        let mut request = ApiRequest::new(Method::Get, "/time_entries", token);
        request.query = vec![
            ("start_date".to_string(), start),
            ("end_date".to_string(), end),
        ];
        let response = self.call(request)?;
        let entries: Vec<TimeEntry> = decode(&response.body)?;
        debug!(count = entries.len(), "fetched time entries");

        let entries = unique_descriptions(entries, workspace_id);
        debug!(count = entries.len(), workspace_id, "entries after filtering");
        Ok(entries)
    }

    pub fn start_timer(&mut self, workspace_id: u64, description: &str) -> Result<u64, TogglError> {
        let token = self.require_token()?;
        let payload = StartRequest {
            time_entry: NewTimeEntry {
                wid: workspace_id,
                description,
                created_with: CREATED_WITH,
            },
        };
        let mut request = ApiRequest::new(Method::Post, "/time_entries/start", token);
        request.body = Some(
            serde_json::to_value(&payload).map_err(|err| TogglError::Decode(err.to_string()))?,
        );

        let response = self.call(request)?;
        let started: DataEnvelope<StartedEntry> = decode(&response.body)?;
        let entry_id = started.data.id;
        self.active = Some(ActiveTimer {
            entry_id,
            workspace_id,
        });
        info!(entry_id, workspace_id, description, "started time entry");
        Ok(entry_id)
    }

    /// Stops `entry_id`. On failure the active timer is kept so the same id
    /// can be retried.
    pub fn stop_timer(&mut self, entry_id: u64) -> Result<(), TogglError> {
        let token = self.require_token()?;
        let path = format!("/time_entries/{entry_id}/stop");
        self.call(ApiRequest::new(Method::Put, path, token))?;
        self.active = None;
        info!(entry_id, "stopped time entry");
        Ok(())
    }

    pub fn stop_active_timer(&mut self) -> Result<(), TogglError> {
        let timer = self
            .active
            .ok_or_else(|| TogglError::PreconditionFailed("no active timer".to_string()))?;
        self.stop_timer(timer.entry_id)
    }

    fn require_token(&self) -> Result<&str, TogglError> {
        self.token
            .as_deref()
            .ok_or_else(|| TogglError::PreconditionFailed("no token".to_string()))
    }

    fn call(&self, request: ApiRequest) -> Result<ApiResponse, TogglError> {
        let response = self.transport.send(&request)?;
        if response.status != 200 {
            error!(
                status = response.status,
                path = %request.path,
                body = %response.body,
                "Toggl request failed"
            );
            return Err(TogglError::Remote {
                status: response.status,
                body: response.body,
            });
        }
        Ok(response)
    }
}

fn decode<D: DeserializeOwned>(body: &str) -> Result<D, TogglError> {
    serde_json::from_str(body).map_err(|err| TogglError::Decode(err.to_string()))
}

fn unique_descriptions(entries: Vec<TimeEntry>, workspace_id: u64) -> Vec<TimeEntry> {
    let mut seen: HashSet<Option<String>> = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| entry.workspace_id == workspace_id)
        .filter(|entry| seen.insert(entry.description.clone()))
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    /// Scripted transport: replies are consumed in order and every request
    /// is recorded. Clones share the same script and log.
    #[derive(Clone, Default)]
    pub struct FakeTransport {
        replies: Rc<RefCell<VecDeque<Result<ApiResponse, TogglError>>>>,
        requests: Rc<RefCell<Vec<ApiRequest>>>,
    }

    impl FakeTransport {
        pub fn reply(&self, status: u16, body: &str) -> &Self {
            self.replies.borrow_mut().push_back(Ok(ApiResponse {
                status,
                body: body.to_string(),
            }));
            self
        }

        pub fn fail(&self, message: &str) -> &Self {
            self.replies
                .borrow_mut()
                .push_back(Err(TogglError::Transport(message.to_string())));
            self
        }

        pub fn requests(&self) -> Vec<ApiRequest> {
            self.requests.borrow().clone()
        }

        pub fn paths(&self) -> Vec<String> {
            self.requests
                .borrow()
                .iter()
                .map(|request| request.path.clone())
                .collect()
        }

        pub fn clear(&self) {
            self.requests.borrow_mut().clear();
        }
    }

    impl Transport for FakeTransport {
        fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TogglError> {
            self.requests.borrow_mut().push(request.clone());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(TogglError::Transport("no scripted reply".to_string())))
        }
    }

    pub const ME: &str = r#"{"data":{"email":"ada@example.com","fullname":"Ada"}}"#;

    pub fn verified_client(transport: &FakeTransport) -> TrackingClient<FakeTransport> {
        transport.reply(200, ME);
        let mut client = TrackingClient::new(transport.clone());
        client.validate_token("good-token").unwrap();
        transport.clear();
        client
    }
}
