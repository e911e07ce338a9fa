mod common;

use common::lab_selector;
use flux_select::engine::{EngineEvents, RunMode};
use flux_select::{HostHandle, HostId, Interest, SelectError, Selector};
use std::os::fd::RawFd;

struct FakeHost {
    id: usize,
    fd: RawFd,
}

impl HostHandle for FakeHost {
    fn host_id(&self) -> HostId {
        HostId(self.id)
    }

    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

#[test]
fn test_attach_twice_is_a_duplicate() {
    let mut selector = lab_selector::<()>();
    let host = FakeHost { id: 1, fd: 40 };
    selector.attach_host(&host).unwrap();

    let err = selector.attach_host(&host).unwrap_err();

    assert!(matches!(err, SelectError::DuplicateBridge(HostId(1))));
    assert_eq!(selector.host_fds().count(), 1);
}

#[test]
fn test_detach_unknown_host_fails() {
    let mut selector = lab_selector::<()>();

    let err = selector.detach_host(HostId(3)).unwrap_err();

    assert!(matches!(err, SelectError::HostNotAttached(HostId(3))));
}

#[test]
fn test_host_ready_drains_without_blocking() {
    let mut selector = lab_selector::<&str>();
    let host = FakeHost { id: 1, fd: 40 };
    selector.attach_host(&host).unwrap();
    selector.register(5, Interest::READ, Some("job")).unwrap();
    selector.engine_mut().set_ready(5, EngineEvents::POLLIN);

    let ready = selector.host_ready(HostId(1)).unwrap().unwrap();

    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].0.tag, Some("job"));
    assert_eq!(selector.engine().run_modes(), &[RunMode::NoWait]);
    assert_eq!(selector.host(HostId(1)).unwrap().drains(), 1);
}

#[test]
fn test_host_ready_with_nothing_ready_is_empty() {
    let mut selector = lab_selector::<()>();
    selector.attach_host(&FakeHost { id: 1, fd: 40 }).unwrap();
    selector.register(5, Interest::READ, None).unwrap();

    let ready = selector.host_ready(HostId(1)).unwrap();

    assert_eq!(ready, Some(Vec::new()));
}

#[test]
fn test_detached_host_never_drains_again() {
    let mut selector = lab_selector::<()>();
    selector.attach_host(&FakeHost { id: 1, fd: 40 }).unwrap();
    selector.host_ready(HostId(1)).unwrap();

    let meta = selector.detach_host(HostId(1)).unwrap();
    assert_eq!(meta.drains(), 1);
    assert_eq!(meta.fd(), 40);

    assert_eq!(selector.host_ready(HostId(1)).unwrap(), None);
    assert_eq!(selector.engine().runs(), 1, "no drain after detach");
}

#[test]
fn test_several_hosts_drive_the_same_engine() {
    let mut selector = lab_selector::<()>();
    selector.attach_host(&FakeHost { id: 1, fd: 40 }).unwrap();
    selector.attach_host(&FakeHost { id: 2, fd: 41 }).unwrap();
    selector.register(5, Interest::WRITE, None).unwrap();
    selector.engine_mut().set_ready(5, EngineEvents::POLLOUT);

    let first = selector.host_ready(HostId(1)).unwrap().unwrap();
    let second = selector.host_ready(HostId(2)).unwrap().unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(selector.engine().run_modes(), &[RunMode::NoWait, RunMode::NoWait]);

    let mut fds: Vec<_> = selector.host_fds().map(|(_, fd)| fd).collect();
    fds.sort_unstable();
    assert_eq!(fds, vec![40, 41]);
}

#[test]
fn test_host_drain_can_be_interrupted() {
    let mut selector = lab_selector::<()>();
    selector.attach_host(&FakeHost { id: 1, fd: 40 }).unwrap();
    selector.engine_mut().raise(libc::SIGINT);

    let err = selector.host_ready(HostId(1)).unwrap_err();

    assert!(err.is_interrupted());
    assert_eq!(selector.engine().live_watchers(), 0);
}

#[test]
fn test_identity_from_address() {
    let mut selector = lab_selector::<()>();
    let host = FakeHost { id: 0, fd: 40 };
    let id = HostId::of(&host);

    struct ByAddress<'a>(&'a FakeHost);

    impl HostHandle for ByAddress<'_> {
        fn host_id(&self) -> HostId {
            HostId::of(self.0)
        }

        fn as_raw_fd(&self) -> RawFd {
            self.0.fd
        }
    }

    selector.attach_host(&ByAddress(&host)).unwrap();
    assert!(selector.host(id).is_some());
    assert!(selector.detach_host(id).is_ok());
}

#[test]
fn test_close_detaches_every_host() {
    let mut selector = lab_selector::<()>();
    selector.attach_host(&FakeHost { id: 1, fd: 40 }).unwrap();
    selector.attach_host(&FakeHost { id: 2, fd: 41 }).unwrap();

    selector.close();

    assert_eq!(selector.host_fds().count(), 0);
    assert_eq!(selector.host_ready(HostId(2)).unwrap(), None);
}
