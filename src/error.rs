use std::{any::Any, io, thread::ScopedJoinHandle, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("task {task} panicked: {message}")]
    TaskPanicked { task: String, message: String },

    #[error("work item {item} failed: {reason}")]
    WorkFailed { item: usize, reason: String },

    #[error("fork {fork} is held by seat {holder}, seat {seat} cannot take it")]
    ForkConflict {
        fork: usize,
        holder: usize,
        seat: usize,
    },

    #[error("table made no progress within {timeout:?} after {eaten} meals")]
    Deadlock { timeout: Duration, eaten: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Builds a `TaskPanicked` from the payload handed back by `JoinHandle::join`.
    pub fn panicked(task: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        Error::TaskPanicked {
            task: task.into(),
            message: panic_message(payload.as_ref()),
        }
    }
}

/// Joins a scoped thread spawned through `thread::Builder`, turning both a
/// failed spawn and a panic into `TaskPanicked`.
pub(crate) fn join_task<T>(task: String, handle: io::Result<ScopedJoinHandle<'_, T>>) -> Result<T> {
    match handle {
        Ok(handle) => handle
            .join()
            .map_err(|payload| Error::panicked(task, payload)),
        Err(err) => Err(Error::TaskPanicked {
            task,
            message: err.to_string(),
        }),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_panic_payload_is_surfaced() {
        let handle = thread::spawn(|| panic!("boom"));
        let err = Error::panicked("worker-0", handle.join().unwrap_err());
        match err {
            Error::TaskPanicked { task, message } => {
                assert_eq!(task, "worker-0");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_formatted_panic_payload() {
        let id = 7;
        let handle = thread::spawn(move || panic!("item {id} exploded"));
        let err = Error::panicked("worker-1", handle.join().unwrap_err());
        assert_eq!(err.to_string(), "task worker-1 panicked: item 7 exploded");
    }
}
