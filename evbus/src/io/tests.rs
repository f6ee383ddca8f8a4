use super::*;
use crate::runtime::spawn;
use crate::test_utils::*;
use crate::time::{sleep, yield_n};
use anyhow::Result;
use std::cell::Cell;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

#[test]
fn test_readable_resolves_after_peer_writes() -> Result<()> {
    let reactor = init_reactor(None)?;
    let (mut reader, mut writer) = UnixStream::pair()?;
    let fd = reader.as_raw_fd();

    spawn(sleep(Duration::from_millis(5)).try_map(move |()| {
        writer.write_all(b"ping")?;
        Ok(())
    }));

    let task = readable(fd).try_map(move |()| {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        assert_eq!(&buf, b"ping");
        Ok(0)
    });

    assert_eq!(reactor.start(task), 0);
    Ok(())
}

#[test]
fn test_readable_resolves_on_hang_up() -> Result<()> {
    let reactor = init_reactor(None)?;
    let (reader, writer) = UnixStream::pair()?;

    spawn(sleep(Duration::from_millis(5)).map(move |()| drop(writer)));

    let task = readable(reader.as_raw_fd()).map(move |()| {
        drop(reader);
        0
    });

    assert_eq!(reactor.start(task), 0);
    Ok(())
}

#[test]
fn test_writable_resolves() -> Result<()> {
    let reactor = init_reactor(None)?;
    let (sock, _peer) = UnixStream::pair()?;

    assert_eq!(reactor.start(writable(sock.as_raw_fd()).map(|()| 0)), 0);
    Ok(())
}

#[test]
fn test_fd_can_be_watched_again_after_firing() -> Result<()> {
    let reactor = init_reactor(None)?;
    let (sock, _peer) = UnixStream::pair()?;
    let fd = sock.as_raw_fd();

    let task = writable(fd).then(move |()| writable(fd)).map(|()| 0);
    assert_eq!(reactor.start(task), 0);
    Ok(())
}

#[test]
fn test_second_pending_watch_on_fd_fails() -> Result<()> {
    let reactor = init_reactor(None)?;
    let (sock, _peer) = UnixStream::pair()?;
    let fd = sock.as_raw_fd();

    let fired = Rc::new(Cell::new(false));
    let flag = Rc::clone(&fired);
    spawn(writable(fd).map(move |()| flag.set(true)));

    let out = run_capturing(readable(fd));
    match out.expect_failure().downcast_ref::<EvError>() {
        Some(EvError::Io(e)) => assert_eq!(e.raw_os_error(), Some(libc::EEXIST)),
        other => panic!("unexpected failure: {:?}", other),
    }

    // The first registration is unaffected.
    assert_eq!(reactor.start(yield_n(3).map(|()| 0)), 0);
    assert!(fired.get());
    Ok(())
}

#[test]
fn test_readiness_without_reactor_fails() -> Result<()> {
    let (sock, _peer) = UnixStream::pair()?;

    let out = run_capturing(writable(sock.as_raw_fd()));
    assert!(matches!(
        out.expect_failure().downcast_ref::<EvError>(),
        Some(EvError::NoReactor)
    ));
    Ok(())
}
