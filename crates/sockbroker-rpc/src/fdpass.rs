//! Descriptor passing over Unix domain sockets via `SCM_RIGHTS`.
//!
//! The kernel duplicates the descriptor into the receiving process — the
//! sender keeps its own copy and both remain valid after the transfer, so
//! a broker can hand the same listening socket to any number of workers
//! while never giving up ownership.
//!
//! Each transfer carries a single placeholder byte; ancillary data cannot
//! travel on an empty message. Tokio sockets are non-blocking, so both
//! directions drive the raw `sendmsg`/`recvmsg` through readiness waits
//! plus [`UnixStream::try_io`].

use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::io::{AsRawFd, RawFd};

use tokio::io::Interest;
use tokio::net::UnixStream;

/// Send `fd` to the peer of `stream`.
///
/// The descriptor is attached as `SCM_RIGHTS` ancillary data on a
/// one-byte message. `O_CLOEXEC` is a per-process attribute and does not
/// block the transfer.
///
/// # Errors
///
/// Returns the underlying `sendmsg` error, e.g. if the peer disconnected.
pub async fn send_fd(stream: &UnixStream, fd: RawFd) -> io::Result<()> {
    loop {
        stream.writable().await?;
        match stream.try_io(Interest::WRITABLE, || sendmsg_fd(stream.as_raw_fd(), fd)) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
}

/// Receive one descriptor from the peer of `stream`.
///
/// Blocks until the peer's `SCM_RIGHTS` message arrives.
///
/// # Errors
///
/// Returns `UnexpectedEof` if the peer closed the connection, or
/// `InvalidData` if a message arrived without ancillary data.
pub async fn recv_fd(stream: &UnixStream) -> io::Result<OwnedFd> {
    loop {
        stream.readable().await?;
        match stream.try_io(Interest::READABLE, || recvmsg_fd(stream.as_raw_fd())) {
            Ok(fd) => return Ok(fd),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
}

/// Receive a transferred TCP listener.
///
/// The returned listener is already bound and listening; it shares its
/// accept queue with the broker's original.
///
/// # Errors
///
/// See [`recv_fd`].
pub async fn recv_tcp_listener(stream: &UnixStream) -> io::Result<std::net::TcpListener> {
    let fd = recv_fd(stream).await?;
    Ok(std::net::TcpListener::from(fd))
}

/// Receive a transferred UDP socket, already bound.
///
/// # Errors
///
/// See [`recv_fd`].
pub async fn recv_udp_socket(stream: &UnixStream) -> io::Result<std::net::UdpSocket> {
    let fd = recv_fd(stream).await?;
    Ok(std::net::UdpSocket::from(fd))
}

// cmsg lengths are tiny; the u32 casts cannot truncate
#[allow(clippy::cast_possible_truncation)]
fn sendmsg_fd(sock_fd: RawFd, fd: RawFd) -> io::Result<()> {
    let payload = [0u8; 1];
    let fd_size = std::mem::size_of::<libc::c_int>();
    // CMSG_SPACE includes the cmsghdr header overhead.
    let cmsg_space = unsafe { libc::CMSG_SPACE(fd_size as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut iov = libc::iovec {
        iov_base: payload.as_ptr().cast::<libc::c_void>().cast_mut(),
        iov_len: payload.len(),
    };

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = cmsg_space as _;

    // Populate cmsghdr with SOL_SOCKET / SCM_RIGHTS and the fd value.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(fd_size as u32) as _;
        let data_ptr = libc::CMSG_DATA(cmsg).cast::<libc::c_int>();
        std::ptr::write_unaligned(data_ptr, fd);
    }

    let n = unsafe { libc::sendmsg(sock_fd, &msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// cmsg lengths are tiny; the u32 casts cannot truncate
#[allow(clippy::cast_possible_truncation)]
fn recvmsg_fd(sock_fd: RawFd) -> io::Result<OwnedFd> {
    let mut payload = [0u8; 1];
    let fd_size = std::mem::size_of::<libc::c_int>();
    let cmsg_space = unsafe { libc::CMSG_SPACE(fd_size as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut iov = libc::iovec {
        iov_base: payload.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: payload.len(),
    };

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = cmsg_space as _;

    let n = unsafe { libc::recvmsg(sock_fd, &mut msg, libc::MSG_CMSG_CLOEXEC) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed before descriptor transfer",
        ));
    }

    let raw = unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null()
            || (*cmsg).cmsg_level != libc::SOL_SOCKET
            || (*cmsg).cmsg_type != libc::SCM_RIGHTS
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "no descriptor in ancillary data",
            ));
        }
        std::ptr::read_unaligned(libc::CMSG_DATA(cmsg).cast::<libc::c_int>())
    };

    // SAFETY: the kernel just installed `raw` into this process; nothing
    // else owns it yet.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_transferred_listener_shares_accept_queue() {
        let (broker_side, worker_side) = UnixStream::pair().unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        send_fd(&broker_side, listener.as_raw_fd()).await.unwrap();
        let received = recv_tcp_listener(&worker_side).await.unwrap();

        assert_eq!(received.local_addr().unwrap(), addr);

        // A connection accepted through the received copy proves both fds
        // refer to the same kernel listener.
        let accepted = tokio::task::spawn_blocking(move || {
            let (mut conn, _) = received.accept().unwrap();
            conn.write_all(b"ok").unwrap();
        });
        let mut conn = tokio::net::TcpStream::connect(addr).await.unwrap();
        accepted.await.unwrap();

        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 2];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[tokio::test]
    async fn test_udp_socket_transfer() {
        let (broker_side, worker_side) = UnixStream::pair().unwrap();

        let sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = sock.local_addr().unwrap();

        send_fd(&broker_side, sock.as_raw_fd()).await.unwrap();
        let received = recv_udp_socket(&worker_side).await.unwrap();

        assert_eq!(received.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_recv_fd_on_closed_peer() {
        let (broker_side, worker_side) = UnixStream::pair().unwrap();
        drop(broker_side);

        let err = recv_fd(&worker_side).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_sender_retains_its_descriptor() {
        let (broker_side, worker_side) = UnixStream::pair().unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        send_fd(&broker_side, listener.as_raw_fd()).await.unwrap();
        let received = recv_tcp_listener(&worker_side).await.unwrap();
        drop(received);

        // Dropping the receiver's copy must not close the sender's socket.
        assert_eq!(listener.local_addr().unwrap(), addr);
    }
}
