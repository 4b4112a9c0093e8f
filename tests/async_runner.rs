mod common;

use std::{cell::RefCell, rc::Rc, time::Duration};

use assert_call::{call, CallRecorder};
use async_runner::{
    effect, utils::timer::sleep, AbortReason, AsyncRunner, AsyncRunnerProps, BooleanState,
    RunError, Runtime, State,
};
use pretty_assertions::assert_eq;

use common::init_test_logging;

/// Looks up `query` after a delay that depends on the query, so that
/// shorter queries answer later.
fn search(query: String) -> AsyncRunnerProps<String, Vec<String>> {
    AsyncRunnerProps::new(
        |query: String| async move {
            let ms = 100u64.saturating_sub(query.len() as u64 * 40);
            sleep(Duration::from_millis(ms)).await;
            if query == "err" {
                return Err(RunError::from_value(&query));
            }
            Ok(["apple", "apricot", "banana"]
                .iter()
                .filter(|w| w.starts_with(&query))
                .map(|w| w.to_string())
                .collect::<Vec<_>>())
        },
        query,
    )
    .autorun(true)
}

#[test]
fn typeahead_keeps_latest_query() {
    init_test_logging();
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let runner = AsyncRunner::new(search("a".into()), rt.ac());
    let _view = effect({
        let runner = runner.clone();
        move |sc| {
            if !runner.is_pending(sc) {
                call!("results {:?}", runner.data(sc));
            }
        }
    });
    rt.update();
    cr.verify(());

    runner.update(search("ap".into()), rt.ac());
    rt.update();
    cr.verify(());

    rt.block_on(sleep(Duration::from_millis(150)));
    cr.verify(r#"results Some(["apple", "apricot"])"#);
    assert_eq!(runner.args(), "ap");
}

#[test]
fn rerender_with_same_query_does_not_refetch() {
    init_test_logging();
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let props = |q: &str| search(q.into()).on_start(|q, _| call!("fetch {q}"));
    let runner = AsyncRunner::new(props("ban"), rt.ac());
    rt.update();
    cr.verify("fetch ban");

    for _ in 0..3 {
        runner.update(props("ban"), rt.ac());
        rt.update();
    }
    cr.verify(());

    rt.block_on(sleep(Duration::from_millis(50)));
    assert_eq!(
        runner.data(&mut rt.sc()),
        Some(vec!["banana".to_string()])
    );
}

#[test]
fn callbacks_drive_other_state() {
    init_test_logging();
    let mut rt = Runtime::new();
    let loading = BooleanState::new(false);
    let history = State::new(Vec::<String>::new());
    let (show, hide) = loading.setters();

    let runner = AsyncRunner::new(
        search("ap".into())
            .autorun(false)
            .on_start(move |_, ac| show.call(ac))
            .on_success({
                let history = history.clone();
                move |data: &Vec<String>, q, ac| {
                    history.borrow_mut(ac).push(format!("{q}: {}", data.len()))
                }
            })
            .on_error({
                let history = history.clone();
                move |e, q, ac| history.borrow_mut(ac).push(format!("{q}: {e}"))
            })
            .on_finish(move |_, ac| hide.call(ac)),
        rt.ac(),
    );

    let fut = runner.run(rt.ac());
    rt.update();
    assert!(loading.get(&mut rt.sc()));
    rt.block_on(fut);
    assert!(!loading.get(&mut rt.sc()));

    let fut = runner.run_with_args("err".into(), rt.ac());
    rt.block_on(fut);
    assert_eq!(
        history.get(&mut rt.sc()),
        vec!["ap: 2".to_string(), r#"err: "err""#.to_string()]
    );
    assert!(runner.data(&mut rt.sc()).is_none());
    assert_eq!(
        runner.error(&mut rt.sc()).map(|e| e.to_string()),
        Some(r#""err""#.to_string())
    );
}

#[test]
fn on_finish_can_start_next_run() {
    init_test_logging();
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let slot: Rc<RefCell<Option<AsyncRunner<u32, u32>>>> = Rc::new(RefCell::new(None));
    let props = {
        let slot = slot.clone();
        AsyncRunnerProps::new(|n: u32| async move { Ok::<_, RunError>(n * 10) }, 1)
            .on_success(|data, _, _| call!("success {data}"))
            .on_abort(|reason, n, _| call!("abort {reason} {n}"))
            .on_finish(move |n, ac| {
                if *n < 3 {
                    if let Some(runner) = &*slot.borrow() {
                        let _ = runner.run_with_args(n + 1, ac);
                    }
                }
            })
    };
    let runner = AsyncRunner::new(props, rt.ac());
    *slot.borrow_mut() = Some(runner.clone());

    let fut = runner.run(rt.ac());
    let first = rt.block_on(fut);
    assert_eq!(first.data, Some(10));
    assert_eq!(first.abort_reason, None);

    rt.update();
    cr.verify(["success 10", "success 20", "success 30"]);
    assert_eq!(runner.data(&mut rt.sc()), Some(30));
    assert!(!runner.is_pending(&mut rt.sc()));
    slot.borrow_mut().take();
}

#[test]
fn success_callback_that_restarts_aborts_own_run() {
    init_test_logging();
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let slot: Rc<RefCell<Option<AsyncRunner<u32, u32>>>> = Rc::new(RefCell::new(None));
    let props = {
        let slot = slot.clone();
        AsyncRunnerProps::new(|n: u32| async move { Ok::<_, RunError>(n) }, 0)
            .on_success(move |data, _, ac| {
                call!("success {data}");
                if *data == 0 {
                    if let Some(runner) = &*slot.borrow() {
                        let _ = runner.run_with_args(1, ac);
                    }
                }
            })
            .on_finish(|n, _| call!("finish {n}"))
    };
    let runner = AsyncRunner::new(props, rt.ac());
    *slot.borrow_mut() = Some(runner.clone());

    let fut = runner.run(rt.ac());
    let first = rt.block_on(fut);
    assert_eq!(first.abort_reason, Some(AbortReason::NextRun));
    assert_eq!(first.data, None);
    assert!(first.error.is_none());

    rt.update();
    cr.verify(["success 0", "success 1", "finish 1"]);
    assert_eq!(runner.data(&mut rt.sc()), Some(1));
    slot.borrow_mut().take();
}

#[test]
fn abort_then_rerun() {
    init_test_logging();
    let mut rt = Runtime::new();
    let runner = AsyncRunner::new(search("b".into()).autorun(false), rt.ac());

    let aborted = runner.run(rt.ac());
    rt.update();
    runner.abort(rt.ac());
    let again = runner.run(rt.ac());

    assert_eq!(rt.block_on(aborted).abort_reason, Some(AbortReason::Manual));
    let again = rt.block_on(again);
    assert_eq!(again.data, Some(vec!["banana".to_string()]));
    assert_eq!(runner.data(&mut rt.sc()), again.data);
}

#[test]
fn timeout_from_latest_props() {
    init_test_logging();
    let mut rt = Runtime::new();
    let runner = AsyncRunner::new(search("".into()).autorun(false), rt.ac());
    let fut = runner.run(rt.ac());
    runner.update(
        search("".into())
            .autorun(false)
            .timeout(Duration::from_millis(30)),
        rt.ac(),
    );
    let result = rt.block_on(fut);
    let error = result.error.unwrap();
    assert!(error.is_timeout());
    assert_eq!(error.to_string(), "Rejected by timeout 30 ms");
}
