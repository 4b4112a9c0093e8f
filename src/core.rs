use std::{
    any::Any,
    cell::{Cell, RefCell},
    future::{poll_fn, Future},
    mem::{replace, swap, take},
    pin::{pin, Pin},
    ptr::null_mut,
    rc::{Rc, Weak},
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll, Wake, Waker},
    thread::AccessError,
};

use derive_ex::derive_ex;
use slabmap::SlabMap;


thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

#[derive(Default)]
struct Scheduler {
    has_runtime: bool,
    actions: Vec<Action>,
    tasks: Vec<Task>,
    is_parked: bool,
    wakes: WakeTable,
}
impl Scheduler {
    fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        SCHEDULER.with(|s| f(&mut s.borrow_mut()))
    }
    fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Result<T, AccessError> {
        SCHEDULER.try_with(|s| f(&mut s.borrow_mut()))
    }

    /// Moves the queued actions, including resumed async actions, into `to`.
    fn take_actions(to: &mut Vec<Action>) -> bool {
        let released = Self::with(|s| {
            let released = s.wakes.drain_into(&mut s.actions);
            swap(to, &mut s.actions);
            released
        });
        drop(released);
        !to.is_empty()
    }
    fn take_tasks(to: &mut Vec<Task>) -> bool {
        Self::with(|s| swap(to, &mut s.tasks));
        !to.is_empty()
    }

    fn push_action(&mut self, action: Action) {
        if !self.has_runtime {
            panic!("`Runtime` is not created.");
        }
        self.actions.push(action);
        self.unpark();
    }
    fn push_task(&mut self, task: Task) {
        self.tasks.push(task);
        self.unpark();
    }

    fn poll_ready(&mut self, cx: &Context) -> Poll<()> {
        self.is_parked = false;
        if !self.actions.is_empty() || !self.tasks.is_empty() || !self.wakes.park(cx.waker()) {
            return Poll::Ready(());
        }
        self.is_parked = true;
        Poll::Pending
    }
    fn unpark(&mut self) {
        if replace(&mut self.is_parked, false) {
            self.wakes.pending.lock().unpark();
        }
    }

    fn close(&mut self) -> (Vec<Action>, Vec<Task>) {
        self.has_runtime = false;
        (take(&mut self.actions), take(&mut self.tasks))
    }
}

/// Single-threaded runtime that drives actions, async actions and effects.
///
/// Only one `Runtime` can exist per thread at a time.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Runtime {
    async_actions: SlabMap<Rc<AsyncAction>>,
    action_buf: Vec<Action>,
    task_buf: Vec<Task>,
}
impl Runtime {
    pub fn new() -> Self {
        if Scheduler::with(|s| replace(&mut s.has_runtime, true)) {
            panic!("Only one `Runtime` can exist in the same thread at the same time.");
        }
        Self {
            async_actions: SlabMap::new(),
            action_buf: Vec::new(),
            task_buf: Vec::new(),
        }
    }

    pub fn ac(&mut self) -> &mut ActionContext {
        ActionContext::new(self)
    }

    /// Returns a [`SignalContext`] that does not track dependencies.
    pub fn sc(&mut self) -> SignalContext<'_> {
        SignalContext { tracker: None }
    }

    /// Runs queued actions, including the ones they queue.
    ///
    /// Returns `true` if any action ran.
    pub fn run_actions(&mut self) -> bool {
        let mut batch = take(&mut self.action_buf);
        let mut handled = false;
        while Scheduler::take_actions(&mut batch) {
            handled = true;
            for action in batch.drain(..) {
                action.run(self.ac());
            }
        }
        self.action_buf = batch;
        handled
    }

    /// Runs queued tasks such as effect re-evaluations.
    ///
    /// Returns `true` if any task ran.
    pub fn run_tasks(&mut self) -> bool {
        let mut batch = take(&mut self.task_buf);
        let mut handled = false;
        while Scheduler::take_tasks(&mut batch) {
            handled = true;
            for task in batch.drain(..) {
                task.run(&mut UpdateContext { _private: () });
            }
        }
        self.task_buf = batch;
        handled
    }

    /// Runs actions, then tasks, until both queues are empty.
    pub fn update(&mut self) {
        while self.run_actions() || self.run_tasks() {}
    }

    /// Completes when [`update`](Self::update) has something to do.
    pub async fn wait_for_ready(&mut self) {
        poll_fn(|cx| Scheduler::with(|s| s.poll_ready(cx))).await
    }

    /// Runs [`update`](Self::update) on the current thread until `fut` completes.
    ///
    /// The thread is parked while neither the runtime nor `fut` can make progress.
    pub fn block_on<Fut: Future>(&mut self, fut: Fut) -> Fut::Output {
        let mut fut = pin!(fut);
        futures::executor::block_on(poll_fn(|cx| loop {
            self.update();
            if let Poll::Ready(value) = fut.as_mut().poll(cx) {
                return Poll::Ready(value);
            }
            if Scheduler::with(|s| s.poll_ready(cx)).is_pending() {
                return Poll::Pending;
            }
        }))
    }

    fn cancel_async_actions(&mut self) {
        while let Some(action) = self.async_actions.values().next().cloned() {
            action.cancel(self.ac());
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.cancel_async_actions();
        let discarded = Scheduler::with(|s| s.close());
        drop(discarded);
    }
}

/// Identifies a sink registered in a [`SinkBindings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindKey(usize);

struct Dependency {
    source: Rc<dyn BindSource>,
    key: BindKey,
}

struct Tracker {
    sink: Weak<dyn BindSink>,
    deps: Vec<Dependency>,
}

/// Dependencies collected by a sink during its last evaluation.
#[derive(Default)]
pub struct SourceBindings(Vec<Dependency>);

impl SourceBindings {
    /// Drops the previous dependencies and collects new ones while `f` runs.
    pub fn update<T>(
        &mut self,
        sink: Weak<dyn BindSink>,
        f: impl FnOnce(&mut SignalContext) -> T,
        _uc: &mut UpdateContext,
    ) -> T {
        self.clear();
        let mut tracker = Tracker {
            sink,
            deps: take(&mut self.0),
        };
        let value = f(&mut SignalContext {
            tracker: Some(&mut tracker),
        });
        self.0 = tracker.deps;
        value
    }
    pub fn clear(&mut self) {
        for dep in self.0.drain(..) {
            dep.source.unbind(dep.key);
        }
    }
}
impl Drop for SourceBindings {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Sinks that depend on a source.
#[derive(Default)]
pub struct SinkBindings(SlabMap<Weak<dyn BindSink>>);

impl SinkBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the sink tracked by `sc` as a dependent of `this`.
    ///
    /// Does nothing if `sc` does not track dependencies or already depends on `this`.
    pub fn bind(&mut self, this: Rc<dyn BindSource>, sc: &mut SignalContext) {
        let Some(tracker) = sc.tracker.as_deref_mut() else {
            return;
        };
        if tracker.deps.iter().any(|d| Rc::ptr_eq(&d.source, &this)) {
            return;
        }
        let key = BindKey(self.0.insert(tracker.sink.clone()));
        tracker.deps.push(Dependency { source: this, key });
    }

    pub fn unbind(&mut self, key: BindKey) {
        self.0.remove(key.0);
    }

    /// Returns the live sinks to be notified.
    ///
    /// The caller notifies them after releasing its borrow on `self`.
    pub fn sinks(&mut self) -> Vec<Rc<dyn BindSink>> {
        self.0.optimize();
        self.0.values().filter_map(|sink| sink.upgrade()).collect()
    }
}

/// Context for running scheduled tasks.
pub struct UpdateContext {
    _private: (),
}

/// Context for sending change notifications.
#[repr(transparent)]
pub struct NotifyContext(ActionContext);

impl NotifyContext {
    fn new(ac: &mut ActionContext) -> &mut Self {
        unsafe { &mut *(ac as *mut ActionContext as *mut Self) }
    }
}

/// Context for reading state and tracking dependencies.
pub struct SignalContext<'s> {
    tracker: Option<&'s mut Tracker>,
}

impl<'s> SignalContext<'s> {
    /// Calls `f` with a [`SignalContext`] that does not track dependencies.
    pub fn untrack<T>(&mut self, f: impl FnOnce(&mut SignalContext<'s>) -> T) -> T {
        let tracker = self.tracker.take();
        let value = f(&mut SignalContext { tracker: None });
        self.tracker = tracker;
        value
    }
}

pub trait BindSink: 'static {
    fn notify(self: Rc<Self>, nc: &mut NotifyContext);
}

pub trait BindSource: 'static {
    fn unbind(self: Rc<Self>, key: BindKey);
}

/// Context for changing state.
#[repr(transparent)]
pub struct ActionContext(Runtime);

impl ActionContext {
    fn new(rt: &mut Runtime) -> &mut Self {
        unsafe { &mut *(rt as *mut Runtime as *mut Self) }
    }
    pub fn nc(&mut self) -> &mut NotifyContext {
        NotifyContext::new(self)
    }
    pub fn sc(&mut self) -> SignalContext<'_> {
        self.0.sc()
    }
}

/// Queues `f` to run on the next [`Runtime::run_actions`].
pub fn spawn_action(f: impl FnOnce(&mut ActionContext) + 'static) {
    Action::Once(Box::new(f)).schedule()
}

/// Queues an asynchronous action.
///
/// The future is first polled on the next [`Runtime::run_actions`] and polled again
/// whenever it is woken, until it completes or the runtime is dropped.
pub fn spawn_action_async<Fut>(f: impl FnOnce(AsyncActionContext) -> Fut + 'static)
where
    Fut: Future<Output = ()> + 'static,
{
    spawn_action(|ac| AsyncAction::start(ac, f))
}

enum Action {
    Once(Box<dyn FnOnce(&mut ActionContext)>),
    Resume(Rc<AsyncAction>),
}

impl Action {
    fn run(self, ac: &mut ActionContext) {
        match self {
            Action::Once(f) => f(ac),
            Action::Resume(action) => action.poll(ac),
        }
    }
    fn schedule(self) {
        let _ = Scheduler::try_with(|s| s.push_action(self));
    }
}

struct AsyncAction {
    slot: RuntimeSlot,
    state: RefCell<Option<Running>>,
}

struct Running {
    future: Pin<Box<dyn Future<Output = ()>>>,
    waker: Waker,
    id: usize,
}

impl AsyncAction {
    fn start<Fut>(ac: &mut ActionContext, f: impl FnOnce(AsyncActionContext) -> Fut + 'static)
    where
        Fut: Future<Output = ()> + 'static,
    {
        let slot = RuntimeSlot::new();
        let aac = AsyncActionContext(slot.0.clone());
        let future = slot.lend(ac, || f(aac));
        let this = Rc::new(Self {
            slot,
            state: RefCell::new(None),
        });
        let id = ac.0.async_actions.insert(this.clone());
        let waker = Waker::from(Scheduler::with(|s| s.wakes.register(this.clone())));
        *this.state.borrow_mut() = Some(Running {
            future: Box::pin(future),
            waker,
            id,
        });
        this.poll(ac);
    }

    fn poll(&self, ac: &mut ActionContext) {
        self.step(ac, |state| {
            let running = state.as_mut()?;
            let mut cx = Context::from_waker(&running.waker);
            if running.future.as_mut().poll(&mut cx).is_ready() {
                state.take()
            } else {
                None
            }
        })
    }
    fn cancel(&self, ac: &mut ActionContext) {
        self.step(ac, |state| state.take())
    }

    /// Applies `f` with the runtime lent to the future, and releases the action if `f`
    /// returns its finished state.
    fn step(
        &self,
        ac: &mut ActionContext,
        f: impl FnOnce(&mut Option<Running>) -> Option<Running>,
    ) {
        let finished = self.slot.lend(ac, || f(&mut self.state.borrow_mut()));
        if let Some(finished) = finished {
            ac.0.async_actions.remove(finished.id);
            self.slot.lend(ac, || drop(finished));
        }
    }
}

/// Runtime pointer shared by an async action and its [`AsyncActionContext`].
///
/// Non-null only while the action is being polled or dropped.
struct RuntimeSlot(Rc<Cell<*mut Runtime>>);

impl RuntimeSlot {
    fn new() -> Self {
        Self(Rc::new(Cell::new(null_mut())))
    }
    fn lend<T>(&self, ac: &mut ActionContext, f: impl FnOnce() -> T) -> T {
        let prev = self.0.replace(&mut ac.0);
        let value = f();
        self.0.set(prev);
        value
    }
}

/// Context for changing state from an async action.
///
/// An [`ActionContext`] is only available while the owning async action is being polled.
pub struct AsyncActionContext(Rc<Cell<*mut Runtime>>);

impl AsyncActionContext {
    pub fn call<T>(&self, f: impl FnOnce(&mut ActionContext) -> T) -> T {
        let rt = self.0.get();
        assert!(
            !rt.is_null(),
            "`AsyncActionContext` cannot be used outside of its async action."
        );
        f(unsafe { &mut *rt }.ac())
    }
}

#[derive(Default)]
struct WakeTable {
    actions: SlabMap<Rc<AsyncAction>>,
    pending: PendingWakes,
}

impl WakeTable {
    fn register(&mut self, action: Rc<AsyncAction>) -> Arc<ActionWaker> {
        Arc::new(ActionWaker {
            pending: self.pending.clone(),
            key: self.actions.insert(action),
        })
    }

    /// Queues a resume for every woken action.
    ///
    /// Returns the actions whose wakers are all gone. They are dropped by the caller
    /// outside of the scheduler borrow.
    fn drain_into(&mut self, to: &mut Vec<Action>) -> Vec<Rc<AsyncAction>> {
        let mut queue = self.pending.lock();
        let released = queue
            .released
            .drain(..)
            .filter_map(|key| self.actions.remove(key))
            .collect();
        for key in queue.woken.drain(..) {
            if let Some(action) = self.actions.get(key) {
                to.push(Action::Resume(action.clone()));
            }
        }
        released
    }

    /// Registers `waker` to be woken by the next wake. Returns `false` if a wake is
    /// already queued.
    fn park(&self, waker: &Waker) -> bool {
        let mut queue = self.pending.lock();
        if !queue.woken.is_empty() || !queue.released.is_empty() {
            return false;
        }
        queue.parked = Some(waker.clone());
        true
    }
}

#[derive(Clone, Default)]
struct PendingWakes(Arc<Mutex<WakeQueue>>);

impl PendingWakes {
    fn lock(&self) -> MutexGuard<'_, WakeQueue> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Default)]
struct WakeQueue {
    woken: Vec<usize>,
    released: Vec<usize>,
    parked: Option<Waker>,
}
impl WakeQueue {
    fn unpark(&mut self) {
        if let Some(waker) = self.parked.take() {
            waker.wake();
        }
    }
}

struct ActionWaker {
    pending: PendingWakes,
    key: usize,
}

impl Wake for ActionWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref()
    }
    fn wake_by_ref(self: &Arc<Self>) {
        let mut queue = self.pending.lock();
        queue.woken.push(self.key);
        queue.unpark();
    }
}
impl Drop for ActionWaker {
    fn drop(&mut self) {
        self.pending.lock().released.push(self.key);
    }
}

/// Deferred work run by [`Runtime::run_tasks`].
pub struct Task {
    this: Weak<dyn Any>,
    #[allow(clippy::type_complexity)]
    f: Box<dyn Fn(Weak<dyn Any>, &mut UpdateContext)>,
}

impl Task {
    /// Creates a task that calls `f` if `this` is still alive when the task runs.
    pub fn from_weak_fn<T: Any>(
        this: Weak<T>,
        f: impl Fn(Rc<T>, &mut UpdateContext) + 'static,
    ) -> Self {
        Self {
            this,
            f: Box::new(move |this, uc| {
                if let Some(this) = this.upgrade().and_then(|this| this.downcast::<T>().ok()) {
                    f(this, uc)
                }
            }),
        }
    }

    pub fn schedule(self) {
        let _ = Scheduler::try_with(|s| s.push_task(self));
    }
    fn run(self, uc: &mut UpdateContext) {
        (self.f)(self.this, uc)
    }
}
