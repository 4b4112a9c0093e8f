use assert_call::{call, CallRecorder};

use crate::{core::Runtime, effect, State};

#[test]
fn effect_runs_on_first_update() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let _e = effect(|_| call!("run"));
    cr.verify(());
    rt.update();
    cr.verify("run");
    rt.update();
    cr.verify(());
}

#[test]
fn effect_reruns_when_dependency_changes() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(1);
    let _e = effect({
        let s = s.clone();
        move |sc| call!("{}", s.get(sc))
    });
    rt.update();
    cr.verify("1");

    s.set(2, rt.ac());
    rt.update();
    cr.verify("2");
}

#[test]
fn effect_tracks_only_last_dependencies() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let use_a = State::new(true);
    let a = State::new("a0");
    let b = State::new("b0");
    let _e = effect({
        let use_a = use_a.clone();
        let a = a.clone();
        let b = b.clone();
        move |sc| {
            if use_a.get(sc) {
                call!("{}", a.get(sc));
            } else {
                call!("{}", b.get(sc));
            }
        }
    });
    rt.update();
    cr.verify("a0");

    use_a.set(false, rt.ac());
    rt.update();
    cr.verify("b0");

    a.set("a1", rt.ac());
    rt.update();
    cr.verify(());

    b.set("b1", rt.ac());
    rt.update();
    cr.verify("b1");
}

#[test]
fn effect_batches_multiple_changes() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(0);
    let _e = effect({
        let s = s.clone();
        move |sc| call!("{}", s.get(sc))
    });
    rt.update();
    cr.verify("0");

    s.set(1, rt.ac());
    s.set(2, rt.ac());
    s.set(3, rt.ac());
    rt.update();
    cr.verify("3");
}

#[test]
fn untracked_read_does_not_subscribe() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(0);
    let _e = effect({
        let s = s.clone();
        move |sc| call!("{}", sc.untrack(|sc| s.get(sc)))
    });
    rt.update();
    cr.verify("0");

    s.set(1, rt.ac());
    rt.update();
    cr.verify(());
}

#[test]
fn drop_subscription_stops_effect() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(0);
    let e = effect({
        let s = s.clone();
        move |sc| call!("{}", s.get(sc))
    });
    rt.update();
    cr.verify("0");

    drop(e);
    s.set(1, rt.ac());
    rt.update();
    cr.verify(());
}
