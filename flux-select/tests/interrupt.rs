mod common;

use common::{lab_selector, lab_selector_with};
use flux_select::engine::EngineEvents;
use flux_select::{Interest, InterruptPolicy, SelectError, Selector, SelectorBuilder};
use std::io;
use std::time::Duration;

#[test]
fn test_interrupt_cancels_a_blocking_wait() {
    let mut selector = lab_selector::<()>();
    selector.register(1, Interest::READ, None).unwrap();
    selector
        .engine_mut()
        .schedule_signal(Duration::from_millis(5), libc::SIGINT);

    let err = selector.select(None).unwrap_err();

    assert!(matches!(err, SelectError::Interrupted(libc::SIGINT)));
    assert!(err.is_interrupted());
    assert_eq!(selector.engine().live_watchers(), 1);
    assert_eq!(selector.engine().pending_signals(), 0);
}

#[test]
fn test_interrupt_cancels_a_bounded_wait() {
    let mut selector = lab_selector::<()>();
    selector.register(1, Interest::READ, None).unwrap();
    selector
        .engine_mut()
        .schedule_signal(Duration::from_millis(100), libc::SIGINT);

    let err = selector.select(Some(Duration::from_secs(1))).unwrap_err();

    assert!(err.is_interrupted());
    assert_eq!(selector.engine().now(), Duration::from_millis(100));
    assert_eq!(selector.engine().live_watchers(), 1);
}

#[test]
fn test_interrupt_cancels_a_poll_and_discards_readiness() {
    let mut selector = lab_selector::<()>();
    selector.register(1, Interest::READ, None).unwrap();
    selector.engine_mut().set_ready(1, EngineEvents::POLLIN);
    selector.engine_mut().raise(libc::SIGINT);

    let err = selector.select(Some(Duration::ZERO)).unwrap_err();
    assert!(err.is_interrupted(), "interrupt wins over readiness");
    assert!(selector.take_interrupted().is_empty());

    selector.engine_mut().clear_ready(1);
    let ready = selector.select(Some(Duration::ZERO)).unwrap();
    assert!(ready.is_empty(), "the next wait starts from an empty set");
}

#[test]
fn test_preserve_policy_keeps_readiness_aside() {
    let mut selector =
        lab_selector_with::<&str>(SelectorBuilder::new().interrupt_policy(InterruptPolicy::Preserve));
    selector.register(1, Interest::READ, Some("pipe")).unwrap();
    selector.engine_mut().set_ready(1, EngineEvents::POLLIN);
    selector.engine_mut().raise(libc::SIGINT);

    let err = selector.select(None).unwrap_err();
    assert!(err.is_interrupted());

    let kept = selector.take_interrupted();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].0.tag, Some("pipe"));
    assert_eq!(kept[0].1, Interest::READ);
    assert!(selector.take_interrupted().is_empty());
}

#[test]
fn test_only_the_configured_signal_interrupts() {
    let mut selector =
        lab_selector_with::<()>(SelectorBuilder::new().interrupt_signal(libc::SIGTERM));
    selector.register(1, Interest::READ, None).unwrap();
    selector.engine_mut().raise(libc::SIGINT);

    let ready = selector.select(Some(Duration::from_millis(10))).unwrap();
    assert!(ready.is_empty());
    assert_eq!(selector.engine().pending_signals(), 1);

    selector.engine_mut().raise(libc::SIGTERM);
    let err = selector.select(Some(Duration::from_millis(10))).unwrap_err();
    assert!(matches!(err, SelectError::Interrupted(libc::SIGTERM)));
    assert_eq!(selector.interrupt_signal(), libc::SIGTERM);
}

#[test]
#[should_panic(expected = "interrupt_signal must be a positive signal number")]
fn test_invalid_interrupt_signal_panics() {
    let _ = SelectorBuilder::new().interrupt_signal(0);
}

#[test]
fn test_engine_failure_is_surfaced_and_watchers_released() {
    let mut selector = lab_selector::<()>();
    selector.register(1, Interest::READ, None).unwrap();
    selector.register(2, Interest::WRITE, None).unwrap();
    selector
        .engine_mut()
        .fail_next_run(io::Error::other("backend gone"));

    let err = selector.select(Some(Duration::from_secs(1))).unwrap_err();

    match err {
        SelectError::Engine(err) => assert_eq!(err.to_string(), "backend gone"),
        other => panic!("expected an engine error, got {other:?}"),
    }
    assert_eq!(selector.engine().live_watchers(), 2);

    selector.engine_mut().set_ready(2, EngineEvents::POLLOUT);
    let ready = selector.select(None).unwrap();
    assert_eq!(ready.len(), 1, "a failed wait does not poison the selector");
}

#[test]
fn test_wait_that_can_never_finish_is_an_engine_error() {
    let mut selector = lab_selector::<()>();
    selector.register(1, Interest::READ, None).unwrap();

    let err = selector.select(None).unwrap_err();

    match err {
        SelectError::Engine(err) => assert_eq!(err.kind(), io::ErrorKind::WouldBlock),
        other => panic!("expected an engine error, got {other:?}"),
    }
    assert_eq!(selector.engine().live_watchers(), 1);
}

#[test]
fn test_failed_session_watcher_is_an_engine_error() {
    let mut selector = lab_selector::<()>();
    selector.register(1, Interest::READ, None).unwrap();

    selector
        .engine_mut()
        .fail_next_watcher(io::Error::other("no more watchers"));
    let err = selector.select(Some(Duration::from_millis(10)));

    assert!(matches!(err, Err(SelectError::Engine(_))));
    assert_eq!(selector.engine().live_watchers(), 1);
    assert_eq!(selector.engine().runs(), 0);
}
