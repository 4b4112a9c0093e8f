//! Delays and timeouts backed by a single background timer thread.

use std::{
    collections::BTreeMap,
    future::{pending, Future},
    pin::Pin,
    sync::{Condvar, LazyLock, Mutex, MutexGuard},
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use futures::{
    future::{select, Either},
    pin_mut,
};
use parse_display::Display;
use slabmap::SlabMap;


/// Upper bound of every delay: `i32::MAX` milliseconds (about 24.8 days).
pub const MAX_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// Clamps `duration` to [`MAX_TIMEOUT`].
pub fn clamp_timeout(duration: Duration) -> Duration {
    duration.min(MAX_TIMEOUT)
}

static TIMER: LazyLock<Timer> = LazyLock::new(|| Timer {
    queue: Mutex::new(TimerQueue::new()),
    condvar: Condvar::new(),
});

struct Timer {
    queue: Mutex<TimerQueue>,
    condvar: Condvar,
}
impl Timer {
    fn lock(&self) -> MutexGuard<'_, TimerQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run_worker(&self) {
        let mut expired = Vec::new();
        let mut queue = self.lock();
        loop {
            queue.take_expired(Instant::now(), &mut expired);
            if !expired.is_empty() {
                drop(queue);
                for waker in expired.drain(..) {
                    waker.wake();
                }
                queue = self.lock();
                continue;
            }
            queue = match queue.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    self.condvar
                        .wait_timeout(queue, wait)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self.condvar.wait(queue).unwrap_or_else(|e| e.into_inner()),
            };
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    deadline: Instant,
    seq: u64,
}

struct TimerQueue {
    deadlines: BTreeMap<Key, usize>,
    entries: SlabMap<Option<(Key, Waker)>>,
    next_seq: u64,
    is_worker_running: bool,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            deadlines: BTreeMap::new(),
            entries: SlabMap::new(),
            next_seq: 0,
            is_worker_running: false,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first_key_value().map(|(key, _)| key.deadline)
    }

    fn take_expired(&mut self, now: Instant, to: &mut Vec<Waker>) {
        while let Some(entry) = self.deadlines.first_entry() {
            if entry.key().deadline > now {
                break;
            }
            let id = entry.remove();
            if let Some((_, waker)) = self.entries[id].take() {
                to.push(waker);
            }
        }
    }

    /// Registers a deadline and returns the entry id.
    ///
    /// Returns `true` as the second value if the worker must re-evaluate its wait.
    fn insert(&mut self, deadline: Instant, waker: Waker) -> (usize, bool) {
        let key = Key {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let is_first = self.next_deadline().is_none_or(|first| deadline < first);
        let id = self.entries.insert(Some((key, waker)));
        self.deadlines.insert(key, id);
        (id, is_first)
    }

    fn poll(&mut self, id: usize, cx: &Context) -> Poll<()> {
        match &mut self.entries[id] {
            Some((_, waker)) => {
                if !waker.will_wake(cx.waker()) {
                    *waker = cx.waker().clone();
                }
                Poll::Pending
            }
            None => {
                self.entries.remove(id);
                Poll::Ready(())
            }
        }
    }

    fn remove(&mut self, id: usize) {
        if let Some(Some((key, _))) = self.entries.remove(id) {
            self.deadlines.remove(&key);
        }
    }

    fn ensure_worker_running(&mut self) {
        if !self.is_worker_running {
            self.is_worker_running = true;
            std::thread::spawn(|| TIMER.run_worker());
        }
    }
}

/// Future returned by [`sleep`] and [`sleep_until`].
///
/// The deadline is registered with the timer thread on first poll.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Sleep {
    deadline: Instant,
    id: Option<usize>,
    is_done: bool,
}

impl Sleep {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.is_done {
            return Poll::Ready(());
        }
        let mut queue = TIMER.lock();
        let poll = if let Some(id) = this.id {
            queue.poll(id, cx)
        } else if this.deadline <= Instant::now() {
            Poll::Ready(())
        } else {
            queue.ensure_worker_running();
            let (id, is_first) = queue.insert(this.deadline, cx.waker().clone());
            this.id = Some(id);
            if is_first {
                TIMER.condvar.notify_one();
            }
            Poll::Pending
        };
        if poll.is_ready() {
            this.id = None;
            this.is_done = true;
        }
        poll
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            TIMER.lock().remove(id);
        }
    }
}

/// Completes after `duration` has elapsed.
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

/// Completes at `deadline`.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        id: None,
        is_done: false,
    }
}

/// Completes after `bound`, clamped to [`MAX_TIMEOUT`], or never if `bound` is `None`.
pub async fn delay(bound: Option<Duration>) {
    match bound {
        Some(bound) => sleep(clamp_timeout(bound)).await,
        None => pending().await,
    }
}

/// Error returned when [`with_timeout`] loses the race against its delay.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[display("Rejected by timeout {millis} ms")]
pub struct TimeoutError {
    timeout: Duration,
    millis: u64,
}
impl TimeoutError {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            millis: timeout.as_nanos().div_ceil(1_000_000) as u64,
        }
    }

    /// The bound that was exceeded.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::error::Error for TimeoutError {}

/// Calls `producer` and races its future against a delay of `timeout`.
///
/// `timeout` is clamped to [`MAX_TIMEOUT`]. If both are ready at the same poll, the producer wins.
pub async fn with_timeout<Fut: Future>(
    producer: impl FnOnce() -> Fut,
    timeout: Duration,
) -> Result<Fut::Output, TimeoutError> {
    let timeout = clamp_timeout(timeout);
    let fut = producer();
    let delay = sleep(timeout);
    pin_mut!(fut);
    match select(fut, delay).await {
        Either::Left((value, _)) => Ok(value),
        Either::Right(((), _)) => Err(TimeoutError::new(timeout)),
    }
}
