//! Event dispatch and the pending-event state machine.
//!
//! Evdev spreads one semantic event over several raw events (a finger landing is a tracking
//! id, two positions, and a `SYN_REPORT`). The machine here accumulates those fields on the
//! device and *flushes* at most one semantic event per pointing stream when the frame is
//! committed (or when an incompatible raw event interrupts the accumulation).

use crate::device::{Device, SeatCaps};
use crate::event::{Abs, AbsEvent, EventKind, InputEvent, Key, KeyEvent, Rel, RelEvent};
use crate::filter::Motion;
use crate::keys::{KeyType, key_type};
use crate::sink::{ButtonState, KeyState, NotifySink, PointerAxis};

/// Scroll distance delivered per wheel detent.
const DEFAULT_AXIS_STEP_DISTANCE: f64 = 10.0;

/// The class of semantic event currently being accumulated between two `SYN_REPORT`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingEvent {
    #[default]
    None,
    RelativeMotion,
    AbsoluteMotion,
    AbsoluteMtDown,
    AbsoluteMtMotion,
    AbsoluteMtUp,
    AbsoluteTouchDown,
    AbsoluteTouchUp,
}

/// Per-device event processing, polymorphic over the device class.
///
/// The fallback implementation below covers generic pointers, keyboards, and touch devices;
/// specialized dispatchers (touchpads) plug in through the same trait. Resource teardown is
/// `Drop`.
pub trait Dispatch {
    /// Processes one decoded event. `time_ms` is the event timestamp in milliseconds.
    fn process(
        &mut self,
        device: &mut Device,
        sink: &mut dyn NotifySink,
        event: &InputEvent,
        time_ms: u64,
    );

    /// Whether this dispatcher exposes the calibration configuration.
    fn has_calibration(&self) -> bool {
        false
    }
}

/// The generic dispatcher: routes raw events into the pending-event machine.
#[derive(Debug, Default)]
pub struct FallbackDispatch {
    _priv: (),
}

impl FallbackDispatch {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dispatch for FallbackDispatch {
    fn process(
        &mut self,
        device: &mut Device,
        sink: &mut dyn NotifySink,
        event: &InputEvent,
        time_ms: u64,
    ) {
        match event.kind() {
            Some(EventKind::Rel(ev)) => process_relative(device, sink, &ev, time_ms),
            Some(EventKind::Abs(ev)) => {
                if device.is_mt {
                    process_touch(device, sink, &ev, time_ms);
                } else {
                    process_absolute_motion(device, &ev);
                }
            }
            Some(EventKind::Key(ev)) => process_key(device, sink, &ev, time_ms),
            Some(EventKind::Syn(_)) => {
                let need_frame = need_touch_frame(device);
                flush_pending_event(device, sink, time_ms);
                if need_frame {
                    sink.touch_notify_frame(device, time_ms);
                }
            }
            _ => {}
        }
    }

    fn has_calibration(&self) -> bool {
        true
    }
}

fn process_relative(device: &mut Device, sink: &mut dyn NotifySink, ev: &RelEvent, time_ms: u64) {
    match ev.rel() {
        Rel::X => {
            if device.pending_event != PendingEvent::RelativeMotion {
                flush_pending_event(device, sink, time_ms);
            }
            device.rel.dx += ev.value();
            device.pending_event = PendingEvent::RelativeMotion;
        }
        Rel::Y => {
            if device.pending_event != PendingEvent::RelativeMotion {
                flush_pending_event(device, sink, time_ms);
            }
            device.rel.dy += ev.value();
            device.pending_event = PendingEvent::RelativeMotion;
        }
        Rel::WHEEL => {
            flush_pending_event(device, sink, time_ms);
            sink.pointer_notify_axis(
                device,
                time_ms,
                PointerAxis::VerticalScroll,
                -f64::from(ev.value()) * DEFAULT_AXIS_STEP_DISTANCE,
            );
        }
        Rel::HWHEEL => {
            flush_pending_event(device, sink, time_ms);
            match ev.value() {
                // -1 scrolls left, 1 scrolls right; anything else is garbage.
                -1 | 1 => sink.pointer_notify_axis(
                    device,
                    time_ms,
                    PointerAxis::HorizontalScroll,
                    f64::from(ev.value()) * DEFAULT_AXIS_STEP_DISTANCE,
                ),
                _ => {}
            }
        }
        _ => {}
    }
}

fn process_touch(device: &mut Device, sink: &mut dyn NotifySink, ev: &AbsEvent, time_ms: u64) {
    match ev.abs() {
        Abs::MT_SLOT => {
            flush_pending_event(device, sink, time_ms);
            device.mt.slot = ev.value();
        }
        Abs::MT_TRACKING_ID => {
            if device.pending_event != PendingEvent::None
                && device.pending_event != PendingEvent::AbsoluteMtMotion
            {
                flush_pending_event(device, sink, time_ms);
            }
            device.pending_event = if ev.value() >= 0 {
                PendingEvent::AbsoluteMtDown
            } else {
                PendingEvent::AbsoluteMtUp
            };
        }
        Abs::MT_POSITION_X => {
            if let Some(slot) = device.mt.current_slot_mut() {
                slot.x = ev.value();
                if device.pending_event == PendingEvent::None {
                    device.pending_event = PendingEvent::AbsoluteMtMotion;
                }
            }
        }
        Abs::MT_POSITION_Y => {
            if let Some(slot) = device.mt.current_slot_mut() {
                slot.y = ev.value();
                if device.pending_event == PendingEvent::None {
                    device.pending_event = PendingEvent::AbsoluteMtMotion;
                }
            }
        }
        _ => {}
    }
}

fn process_absolute_motion(device: &mut Device, ev: &AbsEvent) {
    match ev.abs() {
        Abs::X => {
            device.abs.x = ev.value();
            if device.pending_event == PendingEvent::None {
                device.pending_event = PendingEvent::AbsoluteMotion;
            }
        }
        Abs::Y => {
            device.abs.y = ev.value();
            if device.pending_event == PendingEvent::None {
                device.pending_event = PendingEvent::AbsoluteMotion;
            }
        }
        _ => {}
    }
}

fn process_touch_button(device: &mut Device, sink: &mut dyn NotifySink, time_ms: u64, down: bool) {
    // A pending absolute motion is merged into the touch boundary instead of being flushed
    // as a separate event.
    if device.pending_event != PendingEvent::None
        && device.pending_event != PendingEvent::AbsoluteMotion
    {
        flush_pending_event(device, sink, time_ms);
    }

    device.pending_event = if down {
        PendingEvent::AbsoluteTouchDown
    } else {
        PendingEvent::AbsoluteTouchUp
    };
}

fn process_key(device: &mut Device, sink: &mut dyn NotifySink, ev: &KeyEvent, time_ms: u64) {
    // Ignore kernel key repeat.
    if ev.is_repeat() {
        return;
    }

    if ev.key() == Key::BTN_TOUCH {
        if !device.is_mt {
            process_touch_button(device, sink, time_ms, ev.is_pressed());
        }
        return;
    }

    flush_pending_event(device, sink, time_ms);

    let ty = key_type(ev.key());

    // Ignore key release events for keys we never got a press for, and redundant presses
    // of keys that are already down.
    match ty {
        KeyType::None => {}
        KeyType::Key | KeyType::Button => {
            if device.key_mask.is_down(ev.key()) == ev.is_pressed() {
                return;
            }
        }
    }

    device.key_mask.set_down(ev.key(), ev.is_pressed());

    match ty {
        KeyType::None => {}
        KeyType::Key => {
            let state = if ev.is_pressed() {
                KeyState::Pressed
            } else {
                KeyState::Released
            };
            device.keyboard_notify_key(sink, time_ms, ev.key(), state);
        }
        KeyType::Button => {
            let state = if ev.is_pressed() {
                ButtonState::Pressed
            } else {
                ButtonState::Released
            };
            device.pointer_notify_button(sink, time_ms, ev.key(), state);
        }
    }
}

/// Whether the committed frame must be followed by a touch frame notification.
fn need_touch_frame(device: &Device) -> bool {
    if !device.seat_caps.contains(SeatCaps::TOUCH) {
        return false;
    }

    !matches!(
        device.pending_event,
        PendingEvent::None | PendingEvent::RelativeMotion
    )
}

/// Turns the accumulated pending event into at most one outbound notification.
///
/// Always leaves `pending_event` at [`PendingEvent::None`].
pub(crate) fn flush_pending_event(device: &mut Device, sink: &mut dyn NotifySink, time_ms: u64) {
    let slot = device.mt.slot;

    match device.pending_event {
        PendingEvent::None => return,
        PendingEvent::RelativeMotion => {
            let mut motion = Motion::new(f64::from(device.rel.dx), f64::from(device.rel.dy));
            device.rel.dx = 0;
            device.rel.dy = 0;

            // Apply pointer acceleration.
            if let Some(filter) = &mut device.pointer_filter {
                filter.apply(&mut motion, time_ms);
            }

            if !motion.is_zero() {
                sink.pointer_notify_motion(device, time_ms, motion.dx, motion.dy);
            }
        }
        PendingEvent::AbsoluteMtDown => 'down: {
            if !device.seat_caps.contains(SeatCaps::TOUCH) {
                break 'down;
            }
            let Some(record) = device.mt.current_slot() else {
                break 'down;
            };
            if record.seat_slot != -1 {
                log::error!(
                    "kernel bug: {}: driver sent multiple touch down for the same slot",
                    device.devnode
                );
                break 'down;
            }
            let (rx, ry) = (record.x, record.y);

            let seat_slot = device.seat.alloc_slot();
            if let Some(record) = device.mt.current_slot_mut() {
                record.seat_slot = seat_slot;
            }

            // Seat saturated: the touch is tracked but never surfaced.
            if seat_slot == -1 {
                break 'down;
            }

            let (x, y) = device.transform_absolute(rx, ry);
            sink.touch_notify_touch_down(device, time_ms, slot, seat_slot, x.into(), y.into());
        }
        PendingEvent::AbsoluteMtMotion => 'motion: {
            if !device.seat_caps.contains(SeatCaps::TOUCH) {
                break 'motion;
            }
            let Some(record) = device.mt.current_slot() else {
                break 'motion;
            };
            let seat_slot = record.seat_slot;
            if seat_slot == -1 {
                break 'motion;
            }

            let (x, y) = device.transform_absolute(record.x, record.y);
            sink.touch_notify_touch_motion(device, time_ms, slot, seat_slot, x.into(), y.into());
        }
        PendingEvent::AbsoluteMtUp => 'up: {
            if !device.seat_caps.contains(SeatCaps::TOUCH) {
                break 'up;
            }
            let Some(record) = device.mt.current_slot_mut() else {
                break 'up;
            };
            let seat_slot = record.seat_slot;
            record.seat_slot = -1;
            if seat_slot == -1 {
                break 'up;
            }

            device.seat.release_slot(seat_slot);
            sink.touch_notify_touch_up(device, time_ms, slot, seat_slot);
        }
        PendingEvent::AbsoluteTouchDown => 'down: {
            if !device.seat_caps.contains(SeatCaps::TOUCH) {
                break 'down;
            }
            if device.abs.seat_slot != -1 {
                log::error!(
                    "kernel bug: {}: driver sent multiple touch down for the same slot",
                    device.devnode
                );
                break 'down;
            }

            let seat_slot = device.seat.alloc_slot();
            device.abs.seat_slot = seat_slot;
            if seat_slot == -1 {
                break 'down;
            }

            let (x, y) = device.transform_absolute(device.abs.x, device.abs.y);
            sink.touch_notify_touch_down(device, time_ms, -1, seat_slot, x.into(), y.into());
        }
        PendingEvent::AbsoluteMotion => {
            let (x, y) = device.transform_absolute(device.abs.x, device.abs.y);

            if device.seat_caps.contains(SeatCaps::TOUCH) {
                let seat_slot = device.abs.seat_slot;
                if seat_slot != -1 {
                    sink.touch_notify_touch_motion(device, time_ms, -1, seat_slot, x.into(), y.into());
                }
            } else if device.seat_caps.contains(SeatCaps::POINTER) {
                sink.pointer_notify_motion_absolute(device, time_ms, x.into(), y.into());
            }
        }
        PendingEvent::AbsoluteTouchUp => 'up: {
            if !device.seat_caps.contains(SeatCaps::TOUCH) {
                break 'up;
            }
            let seat_slot = device.abs.seat_slot;
            device.abs.seat_slot = -1;
            if seat_slot == -1 {
                break 'up;
            }

            device.seat.release_slot(seat_slot);
            sink.touch_notify_touch_up(device, time_ms, -1, seat_slot);
        }
    }

    device.pending_event = PendingEvent::None;
}
