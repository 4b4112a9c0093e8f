//! Hooks for running an async operation from a single-threaded reactive host.
//!
//! [`AsyncRunner`] tracks the pending, data and error state of one async function,
//! supersedes in-flight runs when a new run starts, and fails runs that exceed a timeout.
//! [`BooleanState`] and [`AutoUpdatableRef`] are the building blocks it is made of.

pub mod core;
pub mod utils;

mod async_runner;
mod auto_ref;
mod boolean_state;
mod effect;
mod state;
mod subscription;

pub use crate::core::{ActionContext, AsyncActionContext, Runtime, SignalContext};
pub use async_runner::*;
pub use auto_ref::*;
pub use boolean_state::*;
pub use effect::*;
pub use state::*;
pub use subscription::*;
