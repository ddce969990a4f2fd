use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dates::lookback_from_days;
use crate::models::{TimeEntry, Workspace};
use crate::storage::Settings;
use crate::toggl::{TogglError, TrackingClient, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Pomodoro,
    ShortBreak,
    LongBreak,
}

impl TaskKind {
    pub fn is_work(self) -> bool {
        matches!(self, TaskKind::Pomodoro)
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pomodoro" | "work" => Ok(TaskKind::Pomodoro),
            "shortbreak" | "short_break" | "short-break" | "break" => Ok(TaskKind::ShortBreak),
            "longbreak" | "long_break" | "long-break" => Ok(TaskKind::LongBreak),
            other => Err(format!("Unknown session kind: {other}")),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Pomodoro => "pomodoro",
            TaskKind::ShortBreak => "shortbreak",
            TaskKind::LongBreak => "longbreak",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub workspace_id: u64,
    pub description: String,
}

/// Read-only view of the remote data a selector may offer to the user.
pub trait Catalog {
    fn workspaces(&mut self) -> Result<Vec<Workspace>, TogglError>;
    fn recent_entries(&mut self, workspace_id: u64) -> Result<Vec<TimeEntry>, TogglError>;
}

/// Asks the user which workspace and description to track.
/// Returns `None` when the user cancels.
pub trait EntrySelector {
    fn select(&mut self, catalog: &mut dyn Catalog) -> Option<Selection>;
}

struct ClientCatalog<'a, T: Transport> {
    client: &'a TrackingClient<T>,
    lookback: Duration,
}

impl<T: Transport> Catalog for ClientCatalog<'_, T> {
    fn workspaces(&mut self) -> Result<Vec<Workspace>, TogglError> {
        self.client.list_workspaces()
    }

    fn recent_entries(&mut self, workspace_id: u64) -> Result<Vec<TimeEntry>, TogglError> {
        self.client.list_recent_entries(workspace_id, self.lookback)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    TimerOpen { entry_id: u64 },
}

#[derive(Debug, Error)]
enum StartError {
    #[error("No Toggl token configured")]
    MissingToken,
    #[error("Toggl selection cancelled")]
    Cancelled,
    #[error(transparent)]
    Toggl(#[from] TogglError),
}

/// Stops only timers it started, and is idle again after every stop attempt.
pub struct SessionSync<T: Transport> {
    client: TrackingClient<T>,
    state: SyncState,
    status: Option<String>,
}

impl<T: Transport> SessionSync<T> {
    pub fn new(client: TrackingClient<T>) -> Self {
        Self {
            client,
            state: SyncState::Idle,
            status: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn client(&self) -> &TrackingClient<T> {
        &self.client
    }

    /// Last user-facing message, for a status label.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn on_session_started(
        &mut self,
        task: TaskKind,
        settings: &Settings,
        selector: &mut dyn EntrySelector,
    ) {
        if !task.is_work() {
            debug!(%task, "not a work session, skipping Toggl");
            return;
        }
        if let SyncState::TimerOpen { entry_id } = self.state {
            warn!(entry_id, "session started while a timer is still open");
            self.close_open_timer();
        }

        match self.start(settings, selector) {
            Ok(entry_id) => {
                self.state = SyncState::TimerOpen { entry_id };
                self.status = Some(format!("Tracking Toggl entry {entry_id}"));
            }
            Err(StartError::Cancelled) => {
                info!("Toggl selection cancelled");
                self.status = Some("Toggl tracking skipped".to_string());
            }
            Err(err) => {
                warn!(error = %err, "could not start Toggl timer");
                self.status = Some(format!("Toggl: {err}"));
            }
        }
    }

    pub fn on_session_stopped(&mut self) {
        self.close_open_timer();
    }

    pub fn on_session_finished(&mut self) {
        self.close_open_timer();
    }

    fn start(
        &mut self,
        settings: &Settings,
        selector: &mut dyn EntrySelector,
    ) -> Result<u64, StartError> {
        let token = settings.token.as_deref().ok_or(StartError::MissingToken)?;
        self.client.validate_token(token)?;

        let mut catalog = ClientCatalog {
            client: &self.client,
            lookback: lookback_from_days(settings.lookback_days),
        };
        let selection = selector.select(&mut catalog).ok_or(StartError::Cancelled)?;

        let entry_id = self
            .client
            .start_timer(selection.workspace_id, &selection.description)?;
        Ok(entry_id)
    }

    fn close_open_timer(&mut self) {
        let SyncState::TimerOpen { entry_id } = self.state else {
            return;
        };
        self.state = SyncState::Idle;
        match self.client.stop_timer(entry_id) {
            Ok(()) => {
                self.status = Some(format!("Stopped Toggl entry {entry_id}"));
            }
            Err(err) => {
                warn!(entry_id, error = %err, "could not stop Toggl timer");
                self.status = Some(format!("Toggl: {err}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toggl::testing::{FakeTransport, ME};

    struct Scripted {
        choice: Option<Selection>,
        calls: usize,
    }

    impl Scripted {
        fn choose(workspace_id: u64, description: &str) -> Self {
            Self {
                choice: Some(Selection {
                    workspace_id,
                    description: description.to_string(),
                }),
                calls: 0,
            }
        }

        fn cancel() -> Self {
            Self {
                choice: None,
                calls: 0,
            }
        }
    }

    impl EntrySelector for Scripted {
        fn select(&mut self, _catalog: &mut dyn Catalog) -> Option<Selection> {
            self.calls += 1;
            self.choice.clone()
        }
    }

    fn settings() -> Settings {
        Settings {
            token: Some("good-token".to_string()),
            lookback_days: 7,
        }
    }

    fn sync(transport: &FakeTransport) -> SessionSync<FakeTransport> {
        SessionSync::new(TrackingClient::new(transport.clone()))
    }

    fn stop_calls(transport: &FakeTransport) -> usize {
        transport
            .paths()
            .iter()
            .filter(|path| path.ends_with("/stop"))
            .count()
    }

    #[test]
    fn work_session_opens_and_closes_timer() {
        let transport = FakeTransport::default();
        transport
            .reply(200, ME)
            .reply(200, r#"{"data":{"id":99,"wid":7}}"#)
            .reply(200, r#"{"data":{"id":99}}"#);
        let mut sync = sync(&transport);
        let mut selector = Scripted::choose(7, "Writing");

        sync.on_session_started(TaskKind::Pomodoro, &settings(), &mut selector);
        assert_eq!(sync.state(), SyncState::TimerOpen { entry_id: 99 });
        let start = &transport.requests()[1];
        assert_eq!(start.body.as_ref().unwrap()["time_entry"]["wid"], 7);
        assert_eq!(
            start.body.as_ref().unwrap()["time_entry"]["description"],
            "Writing"
        );

        sync.on_session_stopped();
        assert_eq!(sync.state(), SyncState::Idle);
        assert_eq!(
            transport.paths(),
            vec!["/me", "/time_entries/start", "/time_entries/99/stop"]
        );
        assert_eq!(sync.client().active_timer(), None);
    }

    #[test]
    fn break_session_makes_no_calls() {
        let transport = FakeTransport::default();
        let mut sync = sync(&transport);
        let mut selector = Scripted::choose(7, "Writing");

        sync.on_session_started(TaskKind::ShortBreak, &settings(), &mut selector);
        sync.on_session_started(TaskKind::LongBreak, &settings(), &mut selector);

        assert_eq!(sync.state(), SyncState::Idle);
        assert!(transport.requests().is_empty());
        assert_eq!(selector.calls, 0);
    }

    #[test]
    fn failed_start_stays_idle_and_stop_is_noop() {
        let transport = FakeTransport::default();
        transport.reply(200, ME).reply(500, "server down");
        let mut sync = sync(&transport);

        sync.on_session_started(TaskKind::Pomodoro, &settings(), &mut Scripted::choose(7, "x"));
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(sync.status().unwrap().contains("500"));

        sync.on_session_stopped();
        sync.on_session_finished();
        assert_eq!(stop_calls(&transport), 0);
    }

    #[test]
    fn invalid_token_aborts_before_selection() {
        let transport = FakeTransport::default();
        transport.reply(403, "Forbidden");
        let mut sync = sync(&transport);
        let mut selector = Scripted::choose(7, "x");

        sync.on_session_started(TaskKind::Pomodoro, &settings(), &mut selector);

        assert_eq!(sync.state(), SyncState::Idle);
        assert_eq!(selector.calls, 0);
        assert_eq!(transport.paths(), vec!["/me"]);
    }

    #[test]
    fn missing_token_makes_no_calls() {
        let transport = FakeTransport::default();
        let mut sync = sync(&transport);
        let settings = Settings {
            token: None,
            lookback_days: 7,
        };

        sync.on_session_started(TaskKind::Pomodoro, &settings, &mut Scripted::choose(1, "x"));

        assert_eq!(sync.state(), SyncState::Idle);
        assert!(transport.requests().is_empty());
        assert!(sync.status().is_some());
    }

    #[test]
    fn cancelled_selection_starts_nothing() {
        let transport = FakeTransport::default();
        transport.reply(200, ME);
        let mut sync = sync(&transport);

        sync.on_session_started(TaskKind::Pomodoro, &settings(), &mut Scripted::cancel());

        assert_eq!(sync.state(), SyncState::Idle);
        assert_eq!(transport.paths(), vec!["/me"]);
    }

    #[test]
    fn failed_stop_still_returns_to_idle() {
        let transport = FakeTransport::default();
        transport
            .reply(200, ME)
            .reply(200, r#"{"data":{"id":5}}"#)
            .fail("timeout");
        let mut sync = sync(&transport);

        sync.on_session_started(TaskKind::Pomodoro, &settings(), &mut Scripted::choose(1, "x"));
        sync.on_session_finished();

        assert_eq!(sync.state(), SyncState::Idle);
        assert!(sync.status().unwrap().contains("timeout"));
        sync.on_session_stopped();
        assert_eq!(stop_calls(&transport), 1);
    }

    #[test]
    fn finished_session_closes_timer_once() {
        let transport = FakeTransport::default();
        transport
            .reply(200, ME)
            .reply(200, r#"{"data":{"id":12}}"#)
            .reply(200, r#"{"data":{"id":12}}"#);
        let mut sync = sync(&transport);

        sync.on_session_started(TaskKind::Pomodoro, &settings(), &mut Scripted::choose(3, "x"));
        sync.on_session_finished();
        sync.on_session_stopped();

        assert_eq!(stop_calls(&transport), 1);
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[test]
    fn new_work_session_closes_stale_timer_first() {
        let transport = FakeTransport::default();
        transport
            .reply(200, ME)
            .reply(200, r#"{"data":{"id":10}}"#)
            .reply(200, r#"{"data":{"id":10}}"#)
            .reply(200, ME)
            .reply(200, r#"{"data":{"id":11}}"#);
        let mut sync = sync(&transport);

        sync.on_session_started(TaskKind::Pomodoro, &settings(), &mut Scripted::choose(1, "a"));
        sync.on_session_started(TaskKind::Pomodoro, &settings(), &mut Scripted::choose(1, "b"));

        assert_eq!(sync.state(), SyncState::TimerOpen { entry_id: 11 });
        assert_eq!(
            transport.paths(),
            vec![
                "/me",
                "/time_entries/start",
                "/time_entries/10/stop",
                "/me",
                "/time_entries/start"
            ]
        );
    }

    #[test]
    fn selector_sees_workspaces_and_recent_entries() {
        struct Browsing;

        impl EntrySelector for Browsing {
            fn select(&mut self, catalog: &mut dyn Catalog) -> Option<Selection> {
                let workspace = catalog.workspaces().ok()?.into_iter().next()?;
                let entry = catalog.recent_entries(workspace.id).ok()?.into_iter().next()?;
                Some(Selection {
                    workspace_id: workspace.id,
                    description: entry.description?,
                })
            }
        }

        let transport = FakeTransport::default();
        transport
            .reply(200, ME)
            .reply(200, r#"[{"id":3,"name":"Work"}]"#)
            .reply(200, r#"[{"id":1,"wid":3,"description":"Review"}]"#)
            .reply(200, r#"{"data":{"id":8}}"#);
        let mut sync = sync(&transport);

        sync.on_session_started(TaskKind::Pomodoro, &settings(), &mut Browsing);

        assert_eq!(sync.state(), SyncState::TimerOpen { entry_id: 8 });
        let start = &transport.requests()[3];
        assert_eq!(
            start.body.as_ref().unwrap()["time_entry"]["description"],
            "Review"
        );
    }

    #[test]
    fn task_kind_parses_host_names() {
        assert_eq!("pomodoro".parse::<TaskKind>(), Ok(TaskKind::Pomodoro));
        assert_eq!("Work".parse::<TaskKind>(), Ok(TaskKind::Pomodoro));
        assert_eq!("break".parse::<TaskKind>(), Ok(TaskKind::ShortBreak));
        assert_eq!("longbreak".parse::<TaskKind>(), Ok(TaskKind::LongBreak));
        assert!("nap".parse::<TaskKind>().is_err());
    }
}
