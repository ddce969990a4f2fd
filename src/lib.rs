pub mod dates;
pub mod logging;
pub mod models;
pub mod plugin;
pub mod session;
pub mod storage;
pub mod toggl;

pub use plugin::{HostEvent, Preferences, TogglPlugin};
pub use session::{Catalog, EntrySelector, Selection, SessionSync, SyncState, TaskKind};
pub use toggl::{ReqwestTransport, TogglError, TrackingClient, Transport};
