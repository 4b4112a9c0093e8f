use std::{
    cell::{Ref, RefCell},
    rc::Rc,
};

use derive_ex::derive_ex;


/// A mutable cell that always holds the value passed to the latest [`update`](Self::update).
///
/// Cloned handles share the cell, so a closure that captured a handle once keeps seeing
/// the newest value. Reads do not register dependencies.
#[derive_ex(Clone, bound())]
pub struct AutoUpdatableRef<T>(Rc<RefCell<T>>);

impl<T> AutoUpdatableRef<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Overwrites the stored value. Call once per evaluation cycle.
    pub fn update(&self, value: T) {
        *self.0.borrow_mut() = value;
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.0.borrow().clone()
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.0.borrow())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AutoUpdatableRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.try_borrow() {
            Ok(value) => f.debug_tuple("AutoUpdatableRef").field(&*value).finish(),
            Err(_) => write!(f, "AutoUpdatableRef(<borrowed>)"),
        }
    }
}
