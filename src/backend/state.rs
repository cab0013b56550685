use std::fmt;
use std::sync::{Arc, Mutex};

/// Lifecycle of the supervised backend process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackendState {
    #[default]
    NotStarted,
    Starting,
    Ready,
    Running,
    /// Exit code, `None` when the process was ended by a signal.
    Terminated(Option<i32>),
    Failed(String),
}

impl BackendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendState::NotStarted => "NotStarted",
            BackendState::Starting => "Starting",
            BackendState::Ready => "Ready",
            BackendState::Running => "Running",
            BackendState::Terminated(_) => "Terminated",
            BackendState::Failed(_) => "Failed",
        }
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendState::Terminated(Some(code)) => write!(f, "Terminated({code})"),
            BackendState::Terminated(None) => write!(f, "Terminated(signal)"),
            BackendState::Failed(reason) => write!(f, "Failed({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// State shared between the supervisor and its monitor task.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedState(Arc<Mutex<BackendState>>);

impl SharedState {
    pub fn get(&self) -> BackendState {
        match self.0.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, state: BackendState) {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = state;
    }
}
