use std::{any::Any, convert::Infallible, error::Error, rc::Rc};

use parse_display::Display;
use serde::Serialize;

use crate::utils::timer::TimeoutError;

/// Failure of a run.
///
/// An aborted run is not a failure and never produces a `RunError`.
#[derive(Clone, Debug, Display)]
pub enum RunError {
    /// The wrapped function returned an error.
    #[display("{0}")]
    Failed(Rc<dyn Error>),
    /// The wrapped function failed with a value that is not an error, rendered as JSON.
    #[display("{0}")]
    Value(String),
    /// The wrapped function panicked.
    #[display("{0}")]
    Panicked(String),
    /// The wrapped function did not settle within the timeout.
    #[display("{0}")]
    Timeout(TimeoutError),
}

impl RunError {
    pub fn new(e: impl Error + 'static) -> Self {
        Self::Failed(Rc::new(e))
    }

    /// Creates an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Coerces a non-error value into an error by serializing it.
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::Value(serde_json::to_string(value).unwrap_or_else(|e| e.to_string()))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panicked".to_string()
        };
        Self::Panicked(message)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Failed(e) => Some(&**e),
            Self::Timeout(e) => Some(e),
            Self::Value(_) | Self::Panicked(_) => None,
        }
    }
}

impl From<TimeoutError> for RunError {
    fn from(e: TimeoutError) -> Self {
        Self::Timeout(e)
    }
}
impl From<String> for RunError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}
impl From<&str> for RunError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}
impl From<Box<dyn Error>> for RunError {
    fn from(e: Box<dyn Error>) -> Self {
        Self::Failed(e.into())
    }
}
impl From<Infallible> for RunError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

#[derive(Debug, Display)]
#[display("{0}")]
struct Message(String);

impl Error for Message {}
