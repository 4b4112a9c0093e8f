use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::{
    core::{BindSink, NotifyContext, SignalContext, SourceBindings, Task, UpdateContext},
    Subscription,
};

#[cfg(test)]
mod tests;

/// Runs `f` now and again after any state it read has changed.
///
/// `f` runs during [`Runtime::run_tasks`](crate::core::Runtime::run_tasks), at most once per
/// batch of changes. Dropping the returned [`Subscription`] stops it.
pub fn effect(f: impl FnMut(&mut SignalContext) + 'static) -> Subscription {
    let node = Rc::new(EffectNode {
        is_dirty: Cell::new(true),
        body: RefCell::new(EffectBody {
            f,
            sources: SourceBindings::default(),
        }),
    });
    node.schedule();
    Subscription::from_rc(node)
}

struct EffectBody<F> {
    f: F,
    sources: SourceBindings,
}

struct EffectNode<F> {
    is_dirty: Cell<bool>,
    body: RefCell<EffectBody<F>>,
}

impl<F: FnMut(&mut SignalContext) + 'static> EffectNode<F> {
    fn schedule(self: &Rc<Self>) {
        Task::from_weak_fn(Rc::downgrade(self), Self::run).schedule()
    }

    fn run(self: Rc<Self>, uc: &mut UpdateContext) {
        if !self.is_dirty.replace(false) {
            return;
        }
        let sink = Rc::downgrade(&self) as Weak<dyn BindSink>;
        let body = &mut *self.body.borrow_mut();
        body.sources.update(sink, &mut body.f, uc);
    }
}

impl<F: FnMut(&mut SignalContext) + 'static> BindSink for EffectNode<F> {
    fn notify(self: Rc<Self>, _nc: &mut NotifyContext) {
        if !self.is_dirty.replace(true) {
            self.schedule();
        }
    }
}
