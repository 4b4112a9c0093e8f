use std::{
    cell::{Cell, RefCell},
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll},
    time::Duration,
};

use derive_ex::derive_ex;
use futures::{
    channel::oneshot::{self, Canceled},
    FutureExt,
};
use parse_display::Display;
use serde::{Deserialize, Serialize};

use crate::{
    core::{spawn_action_async, AsyncActionContext},
    utils::timer::with_timeout,
    ActionContext, AutoUpdatableRef, BooleanState, SignalContext, State,
};

mod error;
mod props;

pub use error::RunError;
pub use props::*;


/// Why a run ended without a result.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(style = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum AbortReason {
    /// A newer run was started.
    NextRun,
    /// [`AsyncRunner::abort`] was called.
    Manual,
    /// The runner was dropped before the run settled.
    Dropped,
}

/// Outcome of one run.
///
/// Once resolved, exactly one of `data`, `error` and `abort_reason` is `Some`.
#[derive(Debug, Clone)]
pub struct RunResult<A, T> {
    pub args: A,
    pub data: Option<T>,
    pub error: Option<RunError>,
    pub abort_reason: Option<AbortReason>,
}

impl<A, T> RunResult<A, T> {
    fn new(args: A) -> Self {
        Self {
            args,
            data: None,
            error: None,
            abort_reason: None,
        }
    }
    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }
}

/// Future returned by [`AsyncRunner::run`] and [`AsyncRunner::run_with_args`].
///
/// The run proceeds whether or not this future is polled.
pub struct RunFuture<A, T> {
    args: A,
    receiver: oneshot::Receiver<RunResult<A, T>>,
}

// No field is pinned; `poll` goes through `get_mut` for any `A`.
impl<A, T> Unpin for RunFuture<A, T> {}

impl<A: Clone, T> Future for RunFuture<A, T> {
    type Output = RunResult<A, T>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(Canceled)) => {
                let mut result = RunResult::new(this.args.clone());
                result.abort_reason = Some(AbortReason::Dropped);
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("#{0}")]
struct RunId(u64);

struct CurrentRun<A, T> {
    id: RunId,
    result: RunResult<A, T>,
    sender: oneshot::Sender<RunResult<A, T>>,
}

struct RunnerNode<A: 'static, T: 'static> {
    f: AutoUpdatableRef<RunnerFn<A, T>>,
    autorun: AutoUpdatableRef<bool>,
    timeout: AutoUpdatableRef<Duration>,
    callbacks: AutoUpdatableRef<Callbacks<A, T>>,
    args: RefCell<A>,
    is_pending: BooleanState,
    data: State<Option<T>>,
    error: State<Option<RunError>>,
    current: RefCell<Option<CurrentRun<A, T>>>,
    next_id: Cell<u64>,
}

/// Runs an async function and publishes its state.
///
/// At most one run is current at a time. Starting a run aborts the current one with
/// [`AbortReason::NextRun`], and the outcome of a run that is no longer current is discarded.
/// Aborting never interrupts the wrapped function; its future keeps running in the background.
#[derive_ex(Clone, bound())]
pub struct AsyncRunner<A: 'static, T: 'static>(Rc<RunnerNode<A, T>>);

impl<A, T> AsyncRunner<A, T>
where
    A: Clone + PartialEq + 'static,
    T: Clone + 'static,
{
    /// Activates a runner. If `props` enables autorun, a run starts immediately.
    pub fn new(props: AsyncRunnerProps<A, T>, ac: &mut ActionContext) -> Self {
        let AsyncRunnerProps {
            f,
            args,
            autorun,
            timeout,
            callbacks,
        } = props;
        let this = Self(Rc::new(RunnerNode {
            f: AutoUpdatableRef::new(f),
            autorun: AutoUpdatableRef::new(autorun),
            timeout: AutoUpdatableRef::new(timeout),
            callbacks: AutoUpdatableRef::new(callbacks),
            args: RefCell::new(args),
            is_pending: BooleanState::new(autorun),
            data: State::new(None),
            error: State::new(None),
            current: RefCell::new(None),
            next_id: Cell::new(0),
        }));
        if autorun {
            let _ = this.run(ac);
        }
        this
    }

    /// Applies the props of a new evaluation cycle.
    ///
    /// The function, timeout, autorun flag and callbacks are replaced unconditionally.
    /// The arguments are replaced only if they differ from the stored ones, in which case
    /// a run starts when autorun is enabled.
    pub fn update(&self, props: AsyncRunnerProps<A, T>, ac: &mut ActionContext) {
        let AsyncRunnerProps {
            f,
            args,
            autorun,
            timeout,
            callbacks,
        } = props;
        let node = &self.0;
        node.f.update(f);
        node.autorun.update(autorun);
        node.timeout.update(timeout);
        node.callbacks.update(callbacks);

        let changed = {
            let mut current = node.args.borrow_mut();
            if *current != args {
                *current = args;
                true
            } else {
                false
            }
        };
        if changed && node.autorun.get() {
            let _ = self.run(ac);
        }
    }

    /// Whether a run is in progress.
    pub fn is_pending(&self, sc: &mut SignalContext) -> bool {
        self.0.is_pending.get(sc)
    }

    /// Result of the last successful run.
    pub fn data(&self, sc: &mut SignalContext) -> Option<T> {
        self.0.data.get(sc)
    }

    /// Error of the last failed run.
    pub fn error(&self, sc: &mut SignalContext) -> Option<RunError> {
        self.0.error.get(sc)
    }

    /// The stored argument snapshot.
    pub fn args(&self) -> A {
        self.0.args.borrow().clone()
    }

    /// Returns `true` if a run is current.
    pub fn is_running(&self) -> bool {
        self.0.current.borrow().is_some()
    }

    /// Starts a run with the stored argument snapshot.
    pub fn run(&self, ac: &mut ActionContext) -> RunFuture<A, T> {
        let args = self.args();
        self.0.start(args, ac)
    }

    /// Starts a run with `args`. The stored argument snapshot is left unchanged.
    pub fn run_with_args(&self, args: A, ac: &mut ActionContext) -> RunFuture<A, T> {
        self.0.start(args, ac)
    }

    /// Aborts the current run with [`AbortReason::Manual`]. Does nothing if no run is current.
    pub fn abort(&self, ac: &mut ActionContext) {
        self.0.abort(AbortReason::Manual, ac)
    }
}

impl<A, T> RunnerNode<A, T>
where
    A: Clone + PartialEq + 'static,
    T: Clone + 'static,
{
    fn start(self: &Rc<Self>, args: A, ac: &mut ActionContext) -> RunFuture<A, T> {
        let id = RunId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let (sender, receiver) = oneshot::channel();
        let result = RunResult::new(args.clone());

        // `on_abort` may start another run; it is superseded as well.
        while self.current.borrow().is_some() {
            self.abort(AbortReason::NextRun, ac);
        }
        *self.current.borrow_mut() = Some(CurrentRun { id, result, sender });
        tracing::debug!(run = %id, "run scheduled");

        let this = Rc::downgrade(self);
        let invoke_args = args.clone();
        spawn_action_async(move |aac| Self::invoke(this, id, invoke_args, aac));
        RunFuture { args, receiver }
    }

    async fn invoke(this: Weak<Self>, id: RunId, args: A, aac: AsyncActionContext) {
        let Some((f, timeout)) = aac.call(|ac| this.upgrade()?.begin(id, &args, ac)) else {
            return;
        };
        let call_args = args.clone();
        let outcome = with_timeout(
            || AssertUnwindSafe(async move { f(call_args).await }).catch_unwind(),
            timeout,
        )
        .await;
        let outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(payload)) => Err(RunError::from_panic(payload)),
            Err(e) => Err(e.into()),
        };
        aac.call(|ac| match this.upgrade() {
            Some(this) => this.settle(id, outcome, &args, ac),
            None => tracing::debug!(run = %id, "runner dropped before the run settled"),
        });
    }

    fn is_current(&self, id: RunId) -> bool {
        self.current.borrow().as_ref().is_some_and(|run| run.id == id)
    }

    /// Publishes the start of a run and returns what is needed to invoke the wrapped function.
    ///
    /// Returns `None` if the run stopped being current before its invocation.
    fn begin(
        &self,
        id: RunId,
        args: &A,
        ac: &mut ActionContext,
    ) -> Option<(RunnerFn<A, T>, Duration)> {
        if !self.is_current(id) {
            tracing::debug!(run = %id, "run superseded before invocation");
            return None;
        }
        self.is_pending.set_true(ac);
        self.error.set(None, ac);
        self.data.set(None, ac);
        if let Some(on_start) = self.callbacks.with(|c| c.on_start.clone()) {
            on_start(args, ac);
        }
        Some((self.f.get(), self.timeout.get()))
    }

    fn settle(&self, id: RunId, outcome: Result<T, RunError>, args: &A, ac: &mut ActionContext) {
        if !self.is_current(id) {
            match &outcome {
                Ok(_) => tracing::debug!(run = %id, "discarding result of a stale run"),
                Err(e) => tracing::debug!(run = %id, error = %e, "discarding error of a stale run"),
            }
            return;
        }
        match outcome {
            Ok(data) => self.succeed(id, data, args, ac),
            Err(e) => self.fail(id, e, args, ac),
        }
        self.finish(id, args, ac);
    }

    fn succeed(&self, id: RunId, data: T, args: &A, ac: &mut ActionContext) {
        if !self.record(id, |result| result.data = Some(data.clone())) {
            return;
        }
        self.data.set(Some(data.clone()), ac);
        if let Some(on_success) = self.callbacks.with(|c| c.on_success.clone()) {
            on_success(&data, args, ac);
        }
    }

    fn fail(&self, id: RunId, e: RunError, args: &A, ac: &mut ActionContext) {
        if !self.record(id, |result| result.error = Some(e.clone())) {
            return;
        }
        tracing::error!(run = %id, error = %e, "run failed");
        self.error.set(Some(e.clone()), ac);
        if let Some(on_error) = self.callbacks.with(|c| c.on_error.clone()) {
            on_error(&e, args, ac);
        }
    }

    fn finish(&self, id: RunId, args: &A, ac: &mut ActionContext) {
        let run = {
            let mut current = self.current.borrow_mut();
            if current.as_ref().is_some_and(|run| run.id == id) {
                current.take()
            } else {
                None
            }
        };
        let Some(run) = run else {
            return;
        };
        if let Some(on_finish) = self.callbacks.with(|c| c.on_finish.clone()) {
            on_finish(args, ac);
        }
        tracing::debug!(run = %id, "run finished");
        let _ = run.sender.send(run.result);
        self.is_pending.set_false(ac);
    }

    /// Applies `f` to the result record of run `id` if it is still current.
    fn record(&self, id: RunId, f: impl FnOnce(&mut RunResult<A, T>)) -> bool {
        match &mut *self.current.borrow_mut() {
            Some(run) if run.id == id => {
                f(&mut run.result);
                true
            }
            _ => false,
        }
    }

    fn abort(&self, reason: AbortReason, ac: &mut ActionContext) {
        let Some(run) = self.current.borrow_mut().take() else {
            return;
        };
        tracing::debug!(run = %run.id, %reason, "run aborted");
        let CurrentRun {
            mut result, sender, ..
        } = run;
        result.data = None;
        result.error = None;
        result.abort_reason = Some(reason);
        if let Some(on_abort) = self.callbacks.with(|c| c.on_abort.clone()) {
            on_abort(reason, &result.args, ac);
        }
        let _ = sender.send(result);
        self.is_pending.set_false(ac);
    }
}
