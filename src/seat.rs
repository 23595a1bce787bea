//! Seat-wide state shared between the devices of one logical seat.
//!
//! Touches from any member device draw their *seat slot* (the identifier consumers track a
//! touch by) from one bitmap, so that two fingers on two different touchscreens of the same
//! seat never collide. A seat slot is allocated when a touch begins and stays stable until
//! that touch ends.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::device::Device;

/// Seat slot allocator state, shared (`Rc`) by every device of the seat.
///
/// The bitmap is 32 bits wide: at most 32 simultaneous touches per seat, across all member
/// devices. This is a hard cap, not a buffer size.
#[derive(Debug, Default)]
pub struct SeatState {
    slot_map: Cell<u32>,
}

impl SeatState {
    /// Allocates the lowest free seat slot, or returns -1 if all 32 are taken.
    pub(crate) fn alloc_slot(&self) -> i32 {
        let map = self.slot_map.get();
        let slot = (!map).trailing_zeros();
        if slot >= 32 {
            return -1;
        }
        self.slot_map.set(map | 1 << slot);
        slot as i32
    }

    /// Frees a previously allocated seat slot.
    pub(crate) fn release_slot(&self, slot: i32) {
        debug_assert!((0..32).contains(&slot));
        self.slot_map.set(self.slot_map.get() & !(1 << slot));
    }

    /// Returns the raw allocation bitmap; bit *i* is set while seat slot *i* is in use.
    pub fn slot_map(&self) -> u32 {
        self.slot_map.get()
    }
}

/// A logical seat: the slot allocator plus the devices that feed it.
///
/// The seat owns its devices; devices back-reference the shared [`SeatState`] only.
#[derive(Default)]
pub struct Seat {
    state: Rc<SeatState>,
    devices: Vec<Device>,
}

impl Seat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &Rc<SeatState> {
        &self.state
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    pub(crate) fn attach(&mut self, device: Device) -> &mut Device {
        self.devices.push(device);
        self.devices.last_mut().unwrap()
    }

    /// Detaches a device from the seat's list, returning it to the caller (usually on its way
    /// into [`Device::remove`][crate::Device::remove]).
    pub fn detach(&mut self, index: usize) -> Device {
        self.devices.remove(index)
    }
}

impl fmt::Debug for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seat")
            .field("state", &self.state)
            .field("devices", &self.devices)
            .finish()
    }
}
