use std::{any::Any, fmt::Display};

use assert_call::call;

pub fn call_on_drop(s: impl Display) -> impl Any {
    struct OnDrop(String);
    impl Drop for OnDrop {
        fn drop(&mut self) {
            call!("{}", self.0);
        }
    }
    OnDrop(s.to_string())
}
