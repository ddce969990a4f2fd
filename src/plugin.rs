use std::io;

use tracing::{debug, info, warn};

use crate::models::Profile;
use crate::session::{EntrySelector, SessionSync, SyncState, TaskKind};
use crate::storage::{self, ConfigStore, Settings};
use crate::toggl::{TrackingClient, Transport};

pub const TOKEN_INVALID_LABEL: &str = "Token invalid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    SessionStarted { task: TaskKind },
    SessionStopped,
    SessionFinished,
}

/// Settings-window logic: a candidate token must pass a check before it
/// can be saved.
pub struct Preferences<T: Transport> {
    client: TrackingClient<T>,
    candidate: Option<String>,
    checked: Option<Profile>,
}

impl<T: Transport> Preferences<T> {
    pub fn new(client: TrackingClient<T>) -> Self {
        Self {
            client,
            candidate: None,
            checked: None,
        }
    }

    /// Validates `candidate` and returns the label text to show next to it.
    pub fn check_token(&mut self, candidate: &str) -> String {
        self.candidate = Some(candidate.trim().to_string());
        let candidate = candidate.trim();
        match self.client.validate_token(candidate) {
            Ok(profile) => {
                let label = profile.email.clone();
                self.checked = Some(profile);
                label
            }
            Err(err) => {
                debug!(error = %err, "preferences token check failed");
                self.checked = None;
                TOKEN_INVALID_LABEL.to_string()
            }
        }
    }

    /// Saves the checked token. If the last candidate has not passed a check
    /// yet it is checked again and nothing is saved unless it passes.
    pub fn apply(&mut self, store: &mut dyn ConfigStore) -> Result<Option<Profile>, io::Error> {
        if self.checked.is_none() {
            let Some(candidate) = self.candidate.clone() else {
                return Ok(None);
            };
            self.check_token(&candidate);
        }
        let (Some(profile), Some(token)) = (self.checked.clone(), self.client.token()) else {
            return Ok(None);
        };
        storage::write_token(store, token)?;
        info!(email = %profile.email, "saved Toggl token");
        Ok(Some(profile))
    }
}

/// Host-facing entry point: lifecycle hooks, event dispatch and the settings
/// window.
pub struct TogglPlugin<T: Transport, S: ConfigStore> {
    store: S,
    sync: SessionSync<T>,
    preferences: Preferences<T>,
    selector: Box<dyn EntrySelector>,
    env_token: Option<String>,
    activated: bool,
}

impl<T: Transport + Clone, S: ConfigStore> TogglPlugin<T, S> {
    pub fn new(transport: T, store: S, selector: Box<dyn EntrySelector>) -> Self {
        let sync = SessionSync::new(TrackingClient::new(transport.clone()));
        let preferences = Preferences::new(TrackingClient::new(transport));
        Self {
            store,
            sync,
            preferences,
            selector,
            env_token: Settings::env_token(),
            activated: false,
        }
    }
}

impl<T: Transport, S: ConfigStore> TogglPlugin<T, S> {
    pub fn activate(&mut self) {
        self.activated = true;
        info!("Toggl plugin activated");
    }

    /// Closes a timer the plugin still has open before going inactive.
    pub fn deactivate(&mut self) {
        if self.activated {
            self.sync.on_session_stopped();
        }
        self.activated = false;
        info!("Toggl plugin deactivated");
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn handle(&mut self, event: HostEvent) {
        if !self.activated {
            debug!(?event, "plugin inactive, ignoring event");
            return;
        }
        match event {
            HostEvent::SessionStarted { task } => {
                let settings = Settings::resolve(&self.store, self.env_token.clone());
                self.sync
                    .on_session_started(task, &settings, self.selector.as_mut());
            }
            HostEvent::SessionStopped => self.sync.on_session_stopped(),
            HostEvent::SessionFinished => self.sync.on_session_finished(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn status(&self) -> Option<&str> {
        self.sync.status()
    }

    pub fn check_token(&mut self, candidate: &str) -> String {
        self.preferences.check_token(candidate)
    }

    pub fn apply_preferences(&mut self) -> Result<Option<Profile>, io::Error> {
        let saved = self.preferences.apply(&mut self.store);
        if let Err(err) = &saved {
            warn!(error = %err, "could not save preferences");
        }
        saved
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
