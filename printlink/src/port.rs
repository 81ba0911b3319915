use std::fs::File;
use std::io::{self, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::error::*;

/// The byte stream a [`Device`](crate::Device) talks to the controller through.
///
/// Opening and configuring the serial line is up to the caller; the engine
/// only reads, writes and, for [`flush`](crate::Device::flush), switches
/// blocking mode.
pub trait Port: Read + Write + Send {
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()>;
    fn is_nonblocking(&self) -> Result<bool>;
}

#[cfg(unix)]
fn fd_flags(fd: RawFd) -> io::Result<libc::c_int> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags)
}

#[cfg(unix)]
fn fd_set_nonblocking(fd: RawFd, nonblocking: bool) -> Result<()> {
    let flags = fd_flags(fd)?;
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(unix)]
fn fd_is_nonblocking(fd: RawFd) -> Result<bool> {
    Ok(fd_flags(fd)? & libc::O_NONBLOCK != 0)
}

/// A serial device node opened by the caller.
#[cfg(unix)]
impl Port for File {
    #[inline]
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        fd_set_nonblocking(self.as_raw_fd(), nonblocking)
    }

    #[inline]
    fn is_nonblocking(&self) -> Result<bool> {
        fd_is_nonblocking(self.as_raw_fd())
    }
}

/// Serial-over-network bridges.
#[cfg(unix)]
impl Port for TcpStream {
    #[inline]
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)?;
        Ok(())
    }

    #[inline]
    fn is_nonblocking(&self) -> Result<bool> {
        fd_is_nonblocking(self.as_raw_fd())
    }
}

#[cfg(unix)]
impl Port for UnixStream {
    #[inline]
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        UnixStream::set_nonblocking(self, nonblocking)?;
        Ok(())
    }

    #[inline]
    fn is_nonblocking(&self) -> Result<bool> {
        fd_is_nonblocking(self.as_raw_fd())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_file_blocking_mode() {
        let mut file = tempfile::tempfile().unwrap();
        assert!(!file.is_nonblocking().unwrap());
        Port::set_nonblocking(&mut file, true).unwrap();
        assert!(file.is_nonblocking().unwrap());
        Port::set_nonblocking(&mut file, false).unwrap();
        assert!(!file.is_nonblocking().unwrap());
    }

    #[test]
    fn test_unix_stream_blocking_mode() {
        let (mut a, b) = UnixStream::pair().unwrap();
        Port::set_nonblocking(&mut a, true).unwrap();
        assert!(a.is_nonblocking().unwrap());
        assert!(!b.is_nonblocking().unwrap());
    }
}
