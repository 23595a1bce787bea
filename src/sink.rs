//! The outbound notification interface.
//!
//! Everything the core produces leaves through a [`NotifySink`]: one semantic event per
//! processed frame and per key/button transition, plus device add/remove notifications.
//! Implementations must tolerate re-entrant calls: a flush triggered while the sink is
//! processing an earlier notification delivers further notifications before returning.

use crate::device::Device;

/// State of a keyboard key, as delivered to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
}

/// State of a pointer button, as delivered to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Pressed,
    Released,
}

/// Scroll axis of a pointer axis notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAxis {
    VerticalScroll,
    HorizontalScroll,
}

/// The seat-facing notification sink.
///
/// All timestamps are milliseconds on the device's monotonic clock. Touch notifications carry
/// the per-device slot (`-1` for single-touch devices) and the seat-wide stable seat slot.
#[allow(unused_variables)]
pub trait NotifySink {
    fn pointer_notify_motion(&mut self, device: &Device, time_ms: u64, dx: f64, dy: f64) {}

    fn pointer_notify_motion_absolute(&mut self, device: &Device, time_ms: u64, x: f64, y: f64) {}

    fn pointer_notify_button(
        &mut self,
        device: &Device,
        time_ms: u64,
        button: u32,
        state: ButtonState,
    ) {
    }

    fn pointer_notify_axis(&mut self, device: &Device, time_ms: u64, axis: PointerAxis, value: f64) {
    }

    fn keyboard_notify_key(&mut self, device: &Device, time_ms: u64, key: u32, state: KeyState) {}

    fn touch_notify_touch_down(
        &mut self,
        device: &Device,
        time_ms: u64,
        slot: i32,
        seat_slot: i32,
        x: f64,
        y: f64,
    ) {
    }

    fn touch_notify_touch_motion(
        &mut self,
        device: &Device,
        time_ms: u64,
        slot: i32,
        seat_slot: i32,
        x: f64,
        y: f64,
    ) {
    }

    fn touch_notify_touch_up(&mut self, device: &Device, time_ms: u64, slot: i32, seat_slot: i32) {}

    /// Ends the group of touch events that belong to one `SYN_REPORT` frame.
    fn touch_notify_frame(&mut self, device: &Device, time_ms: u64) {}

    fn notify_added_device(&mut self, device: &Device) {}

    fn notify_removed_device(&mut self, device: &Device) {}
}
