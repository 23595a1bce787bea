//! Seat-level evdev event processing.
//!
//! `evseat` turns the raw event stream of kernel input devices into a normalized stream of
//! pointer, keyboard, and touch notifications for one logical *seat*: multi-field evdev
//! reports are coalesced into single semantic events at `SYN_REPORT` boundaries, touches
//! from all member devices share one pool of stable seat slot identifiers, redundant
//! key/button transitions are deduplicated, absolute coordinates run through an affine
//! calibration, and relative motion through a pointer acceleration filter.
//!
//! The crate deliberately stops at a few seams:
//!
//! - device nodes are only opened through the host's [`DeviceBroker`],
//! - raw bytes are decoded by an external [`EventDecoder`] (libevdev or equivalent),
//!   obtained through a [`DecoderFactory`],
//! - processed events leave through the host's [`NotifySink`].
//!
//! Everything runs on one thread; a device drains its fd to completion whenever
//! [`Device::dispatch_events`] is called from the host's event loop.

#![warn(missing_debug_implementations)]

mod abs_info;
mod decoder;
mod device;
mod dispatch;
pub mod event;
mod filter;
mod host;
mod keys;
mod matrix;
mod seat;
mod sink;
mod util;

pub use abs_info::AbsInfo;
pub use decoder::{DecoderFactory, EventDecoder, ReadMode, ReadStatus, SlotConverter};
pub use device::{
    ConfigStatus, CreateError, Device, Leds, SeatCaps, parse_calibration_property,
};
pub use dispatch::{Dispatch, FallbackDispatch, PendingEvent};
pub use filter::{
    AccelParams, AccelProfile, DEFAULT_POINTER_DPI, LinearFilter, Motion, MotionFilter,
    PointerAccelerator, smooth_simple_profile,
};
pub use host::DeviceBroker;
pub use keys::{KeyType, key_type};
pub use matrix::Matrix;
pub use seat::{Seat, SeatState};
pub use sink::{ButtonState, KeyState, NotifySink, PointerAxis};
