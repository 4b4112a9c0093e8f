use std::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    ops::{Deref, DerefMut},
    rc::Rc,
};

use derive_ex::derive_ex;
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};

use crate::core::{
    ActionContext, BindKey, BindSource, NotifyContext, SignalContext, SinkBindings,
};


/// Shared mutable value whose readers are re-run when it changes.
///
/// Reads through a tracking [`SignalContext`] register a dependency.
/// Writes through an [`ActionContext`] notify every dependent.
#[derive(Default)]
#[derive_ex(Clone, bound())]
pub struct State<T: 'static>(Rc<StateNode<T>>);

impl<T: 'static> State<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(StateNode {
            sinks: RefCell::new(SinkBindings::new()),
            value: RefCell::new(value),
        }))
    }

    /// Borrows the value and registers a dependency on `sc`.
    pub fn borrow<'a>(&'a self, sc: &mut SignalContext) -> Ref<'a, T> {
        self.0.bind(sc);
        self.0.value.borrow()
    }

    pub fn get(&self, sc: &mut SignalContext) -> T
    where
        T: Clone,
    {
        self.borrow(sc).clone()
    }

    /// Mutably borrows the value.
    ///
    /// Dependents are notified when the guard is dropped, if it was dereferenced mutably.
    pub fn borrow_mut<'a>(&'a self, ac: &'a mut ActionContext) -> StateRefMut<'a, T> {
        StateRefMut {
            value: self.0.value.borrow_mut(),
            node: &self.0,
            nc: ac.nc(),
            is_written: false,
        }
    }

    /// Replaces the value and notifies dependents.
    pub fn set(&self, value: T, ac: &mut ActionContext) {
        *self.0.value.borrow_mut() = value;
        self.0.notify(ac.nc());
    }

    /// Replaces the value and notifies dependents, unless it equals the current value.
    pub fn set_dedup(&self, value: T, ac: &mut ActionContext)
    where
        T: PartialEq,
    {
        {
            let mut current = self.0.value.borrow_mut();
            if *current == value {
                return;
            }
            *current = value;
        }
        self.0.notify(ac.nc());
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: fmt::Debug> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.value.try_borrow() {
            Ok(value) => value.fmt(f),
            Err(_) => f.write_str("<borrowed>"),
        }
    }
}

impl<T: Serialize> Serialize for State<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self
            .0
            .value
            .try_borrow()
            .map_err(|_| <S::Error as ser::Error>::custom("state is mutably borrowed"))?;
        value.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for State<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = T::deserialize(deserializer).map_err(<D::Error as de::Error>::custom)?;
        Ok(Self::new(value))
    }
}

#[derive(Default)]
struct StateNode<T: 'static> {
    sinks: RefCell<SinkBindings>,
    value: RefCell<T>,
}

impl<T: 'static> StateNode<T> {
    fn bind(self: &Rc<Self>, sc: &mut SignalContext) {
        self.sinks.borrow_mut().bind(self.clone(), sc);
    }

    /// Notifies the current dependents. The sinks are collected first so that a dependent
    /// may bind or unbind while being notified.
    fn notify(&self, nc: &mut NotifyContext) {
        let sinks = self.sinks.borrow_mut().sinks();
        for sink in sinks {
            sink.notify(nc);
        }
    }
}

impl<T: 'static> BindSource for StateNode<T> {
    fn unbind(self: Rc<Self>, key: BindKey) {
        self.sinks.borrow_mut().unbind(key);
    }
}

/// Guard returned by [`State::borrow_mut`].
pub struct StateRefMut<'a, T: 'static> {
    value: RefMut<'a, T>,
    node: &'a StateNode<T>,
    nc: &'a mut NotifyContext,
    is_written: bool,
}

impl<T> Deref for StateRefMut<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for StateRefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.is_written = true;
        &mut self.value
    }
}

impl<T> Drop for StateRefMut<'_, T> {
    fn drop(&mut self) {
        if self.is_written {
            self.node.notify(self.nc);
        }
    }
}
