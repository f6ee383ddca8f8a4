use std::any::Any;
use std::io;

/// Failure type carried by every [`Task`](crate::task::Task).
///
/// Failures are type-erased and can be intercepted by their concrete type with
/// [`Task::catch`](crate::task::Task::catch).
pub type Failure = anyhow::Error;

#[derive(thiserror::Error, Debug)]
pub enum EvError {
    #[error("no reactor is installed on this thread")]
    NoReactor,

    #[error("a reactor is already active on this thread")]
    ReactorAlreadyActive,

    #[error("reactor is already running a top-level task")]
    ReactorBusy,

    #[error("top-level task cannot make progress: nothing is pending on the reactor")]
    Stalled,

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("blocking call result was lost")]
    Abandoned,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EvError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EvError::NoReactor | EvError::ReactorAlreadyActive | EvError::Stalled
        )
    }
}

pub(crate) fn panic_payload_as_str(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
