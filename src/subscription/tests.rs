use std::rc::Rc;

use assert_call::{call, CallRecorder};

use super::*;
use crate::utils::test_helpers::call_on_drop;

#[test]
fn from_fn_calls_on_drop() {
    let mut cr = CallRecorder::new();
    let s = Subscription::from_fn(|| call!("drop"));
    cr.verify(());
    drop(s);
    cr.verify("drop");
}

#[test]
fn from_rc_releases_on_drop() {
    let mut cr = CallRecorder::new();
    let s = Subscription::from_rc(Rc::new(call_on_drop("released")));
    cr.verify(());
    drop(s);
    cr.verify("released");
}

#[test]
fn empty_does_nothing() {
    let mut cr = CallRecorder::new();
    drop(Subscription::empty());
    drop(Subscription::default());
    cr.verify(());
}
