use crate::{ActionContext, SignalContext, State};


/// A boolean [`State`] with two setters.
///
/// The setters returned by [`setters`](Self::setters) always refer to the same cell,
/// so they can be handed out once and reused.
#[derive(Clone)]
pub struct BooleanState(State<bool>);

impl BooleanState {
    pub fn new(initial: bool) -> Self {
        Self(State::new(initial))
    }

    /// Creates a `BooleanState` whose initial value is computed by `f`.
    pub fn new_with(f: impl FnOnce() -> bool) -> Self {
        Self::new(f())
    }

    pub fn get(&self, sc: &mut SignalContext) -> bool {
        self.0.get(sc)
    }

    pub fn set_true(&self, ac: &mut ActionContext) {
        self.0.set_dedup(true, ac)
    }

    pub fn set_false(&self, ac: &mut ActionContext) {
        self.0.set_dedup(false, ac)
    }

    /// Returns the set-true and set-false setters.
    pub fn setters(&self) -> (BoolSetter, BoolSetter) {
        (
            BoolSetter {
                state: self.0.clone(),
                value: true,
            },
            BoolSetter {
                state: self.0.clone(),
                value: false,
            },
        )
    }

    /// Returns the current flag together with its setters.
    pub fn to_tuple(&self, sc: &mut SignalContext) -> (bool, BoolSetter, BoolSetter) {
        let (set_true, set_false) = self.setters();
        (self.get(sc), set_true, set_false)
    }
}

impl std::fmt::Debug for BooleanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

/// Setter that stores a fixed value into a [`BooleanState`].
#[derive(Clone)]
pub struct BoolSetter {
    state: State<bool>,
    value: bool,
}

impl BoolSetter {
    pub fn call(&self, ac: &mut ActionContext) {
        self.state.set_dedup(self.value, ac)
    }

    /// The value this setter stores.
    pub fn value(&self) -> bool {
        self.value
    }

    /// Returns `true` if both setters store the same value into the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.value == other.value && self.state.ptr_eq(&other.state)
    }
}
