use std::{future::Future, rc::Rc, time::Duration};

use futures::{future::LocalBoxFuture, FutureExt};

use super::{AbortReason, RunError};
use crate::{utils::timer::MAX_TIMEOUT, ActionContext};

/// Wrapped async function, type-erased.
pub type RunnerFn<A, T> = Rc<dyn Fn(A) -> LocalBoxFuture<'static, Result<T, RunError>>>;

pub type OnStart<A> = Rc<dyn Fn(&A, &mut ActionContext)>;
pub type OnSuccess<A, T> = Rc<dyn Fn(&T, &A, &mut ActionContext)>;
pub type OnError<A> = Rc<dyn Fn(&RunError, &A, &mut ActionContext)>;
pub type OnFinish<A> = Rc<dyn Fn(&A, &mut ActionContext)>;
pub type OnAbort<A> = Rc<dyn Fn(AbortReason, &A, &mut ActionContext)>;

/// Lifecycle callbacks of a runner.
pub(super) struct Callbacks<A, T> {
    pub on_start: Option<OnStart<A>>,
    pub on_success: Option<OnSuccess<A, T>>,
    pub on_error: Option<OnError<A>>,
    pub on_finish: Option<OnFinish<A>>,
    pub on_abort: Option<OnAbort<A>>,
}

impl<A, T> Default for Callbacks<A, T> {
    fn default() -> Self {
        Self {
            on_start: None,
            on_success: None,
            on_error: None,
            on_finish: None,
            on_abort: None,
        }
    }
}

/// Input of [`AsyncRunner::new`](super::AsyncRunner::new) and
/// [`AsyncRunner::update`](super::AsyncRunner::update).
///
/// ```
/// use std::time::Duration;
/// use async_runner::{AsyncRunnerProps, RunError};
///
/// let props = AsyncRunnerProps::new(
///     |(id,): (u32,)| async move { Ok::<_, RunError>(id * 2) },
///     (21,),
/// )
/// .autorun(true)
/// .timeout(Duration::from_secs(5))
/// .on_success(|data, _args, _ac| println!("{data}"));
/// # drop(props);
/// ```
pub struct AsyncRunnerProps<A: 'static, T: 'static> {
    pub(super) f: RunnerFn<A, T>,
    pub(super) args: A,
    pub(super) autorun: bool,
    pub(super) timeout: Duration,
    pub(super) callbacks: Callbacks<A, T>,
}

impl<A: 'static, T: 'static> AsyncRunnerProps<A, T> {
    /// Wraps `f`, which is called with `args` by [`run`](super::AsyncRunner::run).
    pub fn new<F, Fut, E>(f: F, args: A) -> Self
    where
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: Into<RunError>,
    {
        Self {
            f: Rc::new(move |args: A| {
                f(args)
                    .map(|r| r.map_err(Into::<RunError>::into))
                    .boxed_local()
            }),
            args,
            autorun: false,
            timeout: MAX_TIMEOUT,
            callbacks: Callbacks::default(),
        }
    }

    /// Replaces the argument snapshot.
    pub fn args(mut self, args: A) -> Self {
        self.args = args;
        self
    }

    /// Runs automatically on first activation and whenever the arguments change.
    pub fn autorun(mut self, autorun: bool) -> Self {
        self.autorun = autorun;
        self
    }

    /// Fails a run that has not settled after `timeout`. Clamped to [`MAX_TIMEOUT`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Called before the wrapped function is invoked.
    pub fn on_start(mut self, f: impl Fn(&A, &mut ActionContext) + 'static) -> Self {
        self.callbacks.on_start = Some(Rc::new(f));
        self
    }

    /// Called when the wrapped function succeeds. Not called for an aborted run.
    pub fn on_success(mut self, f: impl Fn(&T, &A, &mut ActionContext) + 'static) -> Self {
        self.callbacks.on_success = Some(Rc::new(f));
        self
    }

    /// Called when the wrapped function fails or times out. Not called for an aborted run.
    pub fn on_error(mut self, f: impl Fn(&RunError, &A, &mut ActionContext) + 'static) -> Self {
        self.callbacks.on_error = Some(Rc::new(f));
        self
    }

    /// Called after `on_success` or `on_error`. Not called for an aborted run.
    pub fn on_finish(mut self, f: impl Fn(&A, &mut ActionContext) + 'static) -> Self {
        self.callbacks.on_finish = Some(Rc::new(f));
        self
    }

    /// Called when a run is aborted.
    pub fn on_abort(mut self, f: impl Fn(AbortReason, &A, &mut ActionContext) + 'static) -> Self {
        self.callbacks.on_abort = Some(Rc::new(f));
        self
    }
}

impl<T: 'static> AsyncRunnerProps<(), T> {
    /// Wraps a function that takes no arguments.
    pub fn from_fn<F, Fut, E>(f: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: Into<RunError>,
    {
        Self::new(move |()| f(), ())
    }
}
