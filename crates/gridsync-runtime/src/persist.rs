#![forbid(unsafe_code)]

//! Seam to the page persistence collaborator.
//!
//! The coordinator hands every canonical write to a [`LayoutPersister`]. The
//! collaborator owns transport and retries; it answers either
//! [`PersistStatus::Landed`] (durable now), [`PersistStatus::InFlight`]
//! (it will confirm later through the unified state) or a [`PersistError`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use gridsync_layout::{ChangeSource, ContentHash, LayoutChangeOrigin, ResponsiveLayouts};

/// Identifies one write within one page session.
///
/// `epoch` changes on every reset, so confirmations for writes issued before
/// a page change are recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitTicket {
    pub epoch: u64,
    pub version: u64,
}

/// Payload handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistRequest {
    pub ticket: CommitTicket,
    pub layouts: ResponsiveLayouts,
    pub origin: LayoutChangeOrigin,
    pub hash: ContentHash,
}

/// Immediate answer of the persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStatus {
    Landed,
    InFlight,
}

/// Persistence failure reported by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// Storage refused the payload.
    Rejected { reason: String },
    /// The write could not be delivered.
    Transport { reason: String },
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { reason } => write!(f, "layout rejected by storage: {reason}"),
            Self::Transport { reason } => write!(f, "layout persistence transport failed: {reason}"),
        }
    }
}

impl std::error::Error for PersistError {}

/// A failed write as surfaced to the host's error handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistFailure {
    pub ticket: CommitTicket,
    pub source: ChangeSource,
    pub error: PersistError,
}

impl fmt::Display for PersistFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} write v{} failed: {}",
            self.source, self.ticket.version, self.error
        )
    }
}

impl std::error::Error for PersistFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Downstream persistence collaborator.
pub trait LayoutPersister {
    fn persist(&mut self, request: &PersistRequest) -> Result<PersistStatus, PersistError>;
}

impl<F> LayoutPersister for F
where
    F: FnMut(&PersistRequest) -> Result<PersistStatus, PersistError>,
{
    fn persist(&mut self, request: &PersistRequest) -> Result<PersistStatus, PersistError> {
        self(request)
    }
}

/// Persister that lands every write immediately and keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPersister;

impl LayoutPersister for NullPersister {
    fn persist(&mut self, _request: &PersistRequest) -> Result<PersistStatus, PersistError> {
        Ok(PersistStatus::Landed)
    }
}

/// How a [`RecordingPersister`] answers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PersistMode {
    #[default]
    Land,
    Defer,
    Fail(PersistError),
}

#[derive(Debug, Default)]
struct RecordingState {
    requests: Vec<PersistRequest>,
    mode: PersistMode,
}

/// Persister that records every request and answers per a scripted mode.
///
/// Cloning shares the log, so a clone kept by the host observes what the
/// coordinator wrote.
#[derive(Debug, Clone, Default)]
pub struct RecordingPersister {
    state: Rc<RefCell<RecordingState>>,
}

impl RecordingPersister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: PersistMode) {
        self.state.borrow_mut().mode = mode;
    }

    #[must_use]
    pub fn requests(&self) -> Vec<PersistRequest> {
        self.state.borrow().requests.clone()
    }

    #[must_use]
    pub fn last_request(&self) -> Option<PersistRequest> {
        self.state.borrow().requests.last().cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LayoutPersister for RecordingPersister {
    fn persist(&mut self, request: &PersistRequest) -> Result<PersistStatus, PersistError> {
        let mut state = self.state.borrow_mut();
        state.requests.push(request.clone());
        match &state.mode {
            PersistMode::Land => Ok(PersistStatus::Landed),
            PersistMode::Defer => Ok(PersistStatus::InFlight),
            PersistMode::Fail(error) => Err(error.clone()),
        }
    }
}
