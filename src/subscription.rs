use std::{any::Any, rc::Rc};

#[cfg(test)]
mod tests;

/// Keeps a registration alive until dropped.
#[derive(Default)]
#[must_use]
pub struct Subscription(Option<Box<dyn Any>>);

impl Subscription {
    pub fn empty() -> Self {
        Self(None)
    }

    /// Calls `f` when the subscription is dropped.
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        struct OnDrop<F: FnOnce()>(Option<F>);
        impl<F: FnOnce()> Drop for OnDrop<F> {
            fn drop(&mut self) {
                if let Some(f) = self.0.take() {
                    f()
                }
            }
        }
        Self(Some(Box::new(OnDrop(Some(f)))))
    }

    /// Holds `rc` until the subscription is dropped.
    pub fn from_rc(rc: Rc<dyn Any>) -> Self {
        Self(Some(Box::new(rc)))
    }
}
