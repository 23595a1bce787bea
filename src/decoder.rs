//! The interface to the external evdev decoding library.
//!
//! The core does not read device nodes itself: an [`EventDecoder`] (libevdev or equivalent)
//! owns the raw byte stream, types the events, tracks kernel buffer overflow, and offers a
//! re-sync stream that replays the state delta after one. The core only consumes this
//! surface.

use std::io;

use crate::abs_info::AbsInfo;
use crate::event::{Abs, EventType, InputEvent};

/// Which of the decoder's streams to read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// The live event stream.
    Normal,
    /// The re-sync stream that replays state changes lost in a kernel buffer overflow.
    /// Exhausted when [`ReadStatus::Synced`] is returned.
    Sync,
}

/// Result of a successful [`EventDecoder::next_event`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// A regular decoded event.
    Event(InputEvent),
    /// The kernel buffer overflowed and events were lost; switch to [`ReadMode::Sync`] and
    /// drain the re-sync stream. The carried event is the overflow marker (`SYN_DROPPED`);
    /// only its timestamp is meaningful.
    Sync(InputEvent),
    /// The re-sync stream is exhausted; resume [`ReadMode::Normal`] reads.
    Synced,
}

/// A typed evdev event decoder for one device node.
///
/// `next_event` mirrors the non-blocking read convention of the underlying fd: exhaustion is
/// an [`io::ErrorKind::WouldBlock`] error, interruption is [`io::ErrorKind::Interrupted`],
/// anything else is a transport failure.
pub trait EventDecoder {
    fn next_event(&mut self, mode: ReadMode) -> io::Result<ReadStatus>;

    /// Switches event timestamps to the monotonic clock.
    fn set_monotonic_clock(&mut self) -> io::Result<()>;

    /// The device name reported by the kernel.
    fn name(&self) -> &str;

    fn has_event_type(&self, ty: EventType) -> bool;
    fn has_event_code(&self, ty: EventType, code: u16) -> bool;

    /// Range information for an absolute axis, if the device has it.
    fn abs_info(&self, axis: Abs) -> Option<AbsInfo>;

    /// Overrides the decoder's view of an axis (used to fix up a reported resolution of 0).
    fn set_abs_info(&mut self, axis: Abs, info: AbsInfo);

    /// Number of multitouch slots, or a negative value for devices without `ABS_MT_SLOT`.
    fn num_slots(&self) -> i32;

    /// The slot that `ABS_MT_*` events currently apply to.
    fn current_slot(&self) -> i32;
}

/// Constructs the external decoding objects for a freshly opened device fd.
pub trait DecoderFactory {
    /// Builds a decoder for the device node behind `fd`.
    fn decoder(&mut self, fd: std::os::fd::RawFd) -> io::Result<Box<dyn EventDecoder>>;

    /// Builds the protocol-A slot converter for multitouch devices without `ABS_MT_SLOT`.
    ///
    /// The default implementation fails, which in turn fails device creation; hosts that
    /// support legacy devices override it.
    fn slot_converter(&mut self, fd: std::os::fd::RawFd) -> io::Result<Box<dyn SlotConverter>> {
        let _ = fd;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "multitouch protocol A is not supported",
        ))
    }
}

/// Bridge for multitouch protocol A devices (no `ABS_MT_SLOT`).
///
/// Legacy devices emit unslotted touch streams; an external converter (mtdev) buffers each
/// frame and re-emits it slotted. The device feeds every raw event in via `put_event` and, at
/// each `SYN_REPORT`, drains the converted events out again.
pub trait SlotConverter {
    fn put_event(&mut self, event: InputEvent);

    /// Takes the next converted event, or [`None`] when the frame is drained.
    fn fetch_event(&mut self) -> Option<InputEvent>;

    /// Number of slots the converter multiplexes onto.
    fn num_slots(&self) -> i32;

    /// The active slot after conversion.
    fn current_slot(&self) -> i32;
}
