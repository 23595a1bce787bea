//! The privileged file-open broker.
//!
//! Device nodes are typically only readable by root; compositors run the actual `open(2)`
//! through a privileged helper. The core therefore never opens or closes a device node
//! itself: every fd passes through the host-supplied [`DeviceBroker`].

use std::io;
use std::os::fd::RawFd;

/// Host hooks for opening and closing restricted device nodes.
pub trait DeviceBroker {
    /// Opens `path` with the given `open(2)` flags on behalf of the core.
    fn open_restricted(&mut self, path: &str, flags: i32) -> io::Result<RawFd>;

    /// Closes an fd previously returned by [`DeviceBroker::open_restricted`].
    fn close_restricted(&mut self, fd: RawFd);
}
