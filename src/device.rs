//! Device state and lifecycle: creation, capability classification, event draining, and
//! removal.

use std::fmt;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::rc::Rc;

use bitflags::bitflags;
use thiserror::Error;

use crate::abs_info::AbsInfo;
use crate::decoder::{DecoderFactory, EventDecoder, ReadMode, ReadStatus, SlotConverter};
use crate::dispatch::{Dispatch, FallbackDispatch, PendingEvent};
use crate::event::{Abs, EventType, InputEvent, KEY_CNT, Key, Led, Rel, Syn, SynEvent};
use crate::filter::{MotionFilter, PointerAccelerator, smooth_simple_profile};
use crate::host::DeviceBroker;
use crate::keys::{KeyCounts, KeyMask, KeyType, key_type};
use crate::matrix::Matrix;
use crate::seat::{Seat, SeatState};
use crate::sink::{ButtonState, KeyState, NotifySink};
use crate::util::monotonic_time_ms;

bitflags! {
    /// Capabilities a device contributes to its seat.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SeatCaps: u32 {
        const POINTER = 1 << 0;
        const KEYBOARD = 1 << 1;
        const TOUCH = 1 << 2;
    }
}

bitflags! {
    /// Keyboard indicator LEDs exposed to consumers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Leds: u32 {
        const NUM_LOCK = 1 << 0;
        const CAPS_LOCK = 1 << 1;
        const SCROLL_LOCK = 1 << 2;
    }
}

/// Status of a configuration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    Success,
}

/// Why [`Device::create`] failed.
#[derive(Debug, Error)]
pub enum CreateError {
    /// The device classifies as neither pointer, keyboard, nor touch. Not an error in the
    /// transport sense; the caller simply isn't interested in this device.
    #[error("device is not handled")]
    Unhandled,
    /// The privileged broker refused to open the device node.
    #[error("opening the device failed")]
    Open(#[source] io::Error),
    /// Decoder construction or capability probing failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One multitouch slot: the latest position and the seat slot of the touch occupying it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MtSlot {
    pub seat_slot: i32,
    pub x: i32,
    pub y: i32,
}

impl MtSlot {
    const INACTIVE: Self = Self {
        seat_slot: -1,
        x: 0,
        y: 0,
    };
}

/// Multitouch tracking state.
#[derive(Debug, Default)]
pub(crate) struct MtState {
    /// Slot that incoming `ABS_MT_*` events apply to.
    pub slot: i32,
    pub slots: Vec<MtSlot>,
}

impl MtState {
    pub fn current_slot(&self) -> Option<&MtSlot> {
        usize::try_from(self.slot)
            .ok()
            .and_then(|slot| self.slots.get(slot))
    }

    pub fn current_slot_mut(&mut self) -> Option<&mut MtSlot> {
        let slot = usize::try_from(self.slot).ok();
        match slot.and_then(|slot| self.slots.get_mut(slot)) {
            Some(record) => Some(record),
            None => {
                log::warn!("kernel bug: event for out-of-range slot {}", self.slot);
                None
            }
        }
    }
}

/// Absolute axis state, including the calibration pipeline.
#[derive(Debug)]
pub(crate) struct AbsState {
    pub absinfo_x: Option<AbsInfo>,
    pub absinfo_y: Option<AbsInfo>,
    /// Set when an axis reported resolution 0 and we forced it to 1; physical size queries
    /// fail while this is set.
    pub fake_resolution: bool,

    pub x: i32,
    pub y: i32,
    /// Seat slot of the single-touch contact, -1 while inactive.
    pub seat_slot: i32,

    pub apply_calibration: bool,
    /// The effective transform: `Un-Normalize · usermatrix · Normalize`.
    pub calibration: Matrix,
    /// Seeded from the `LIBINPUT_CALIBRATION_MATRIX` device property.
    pub default_calibration: Matrix,
    /// As supplied by the caller, for round-trip readback.
    pub usermatrix: Matrix,
}

impl Default for AbsState {
    fn default() -> Self {
        Self {
            absinfo_x: None,
            absinfo_y: None,
            fake_resolution: false,
            x: 0,
            y: 0,
            seat_slot: -1,
            apply_calibration: false,
            calibration: Matrix::identity(),
            default_calibration: Matrix::identity(),
            usermatrix: Matrix::identity(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RelAccumulator {
    pub dx: i32,
    pub dy: i32,
}

/// One opened event device, member of a seat.
pub struct Device {
    pub(crate) fd: RawFd,
    pub(crate) decoder: Box<dyn EventDecoder>,
    pub(crate) devnode: String,
    sysname: String,
    devname: String,

    pub(crate) seat: Rc<SeatState>,
    pub(crate) seat_caps: SeatCaps,
    pub(crate) is_mt: bool,
    converter: Option<Box<dyn SlotConverter>>,
    /// Cleared when a read fails; the owner is expected to remove the device.
    source_attached: bool,

    pub(crate) abs: AbsState,
    pub(crate) mt: MtState,
    pub(crate) rel: RelAccumulator,
    pub(crate) pending_event: PendingEvent,

    pub(crate) pointer_filter: Option<Box<dyn MotionFilter>>,
    pub(crate) key_mask: KeyMask,
    pub(crate) key_counts: KeyCounts,

    dispatch: Option<Box<dyn Dispatch>>,
}

impl Device {
    /// Opens `devnode` through the broker and attaches the device to `seat`.
    ///
    /// The device is classified by its advertised capabilities; a device that classifies as
    /// none of pointer, keyboard, or touch fails with [`CreateError::Unhandled`] (and its fd
    /// is closed again). On success the sink receives an added-device notification and the
    /// device lives in the seat's device list.
    pub fn create<'seat>(
        seat: &'seat mut Seat,
        broker: &mut dyn DeviceBroker,
        factory: &mut dyn DecoderFactory,
        sink: &mut dyn NotifySink,
        devnode: &str,
        sysname: &str,
    ) -> Result<&'seat mut Device, CreateError> {
        // Non-blocking mode, so that the dispatch loop can drain the fd completely.
        let fd = match broker.open_restricted(devnode, libc::O_RDWR | libc::O_NONBLOCK) {
            Ok(fd) => fd,
            Err(e) => {
                log::info!("opening input device '{devnode}' failed ({e})");
                return Err(CreateError::Open(e));
            }
        };

        let result = (|| -> Result<Device, CreateError> {
            let mut decoder = factory.decoder(fd)?;
            decoder.set_monotonic_clock()?;

            let devname = decoder.name().to_owned();
            let mut device = Device {
                fd,
                decoder,
                devnode: devnode.to_owned(),
                sysname: sysname.to_owned(),
                devname,
                seat: seat.state().clone(),
                seat_caps: SeatCaps::empty(),
                is_mt: false,
                converter: None,
                source_attached: true,
                abs: AbsState::default(),
                mt: MtState::default(),
                rel: RelAccumulator::default(),
                pending_event: PendingEvent::None,
                pointer_filter: None,
                key_mask: KeyMask::new(),
                key_counts: KeyCounts::new(),
                dispatch: None,
            };

            device.configure(factory)?;

            if device.seat_caps.is_empty() {
                return Err(CreateError::Unhandled);
            }

            if device.dispatch.is_none() {
                device.dispatch = Some(Box::new(FallbackDispatch::new()));
            }

            Ok(device)
        })();

        match result {
            Ok(device) => {
                let device = seat.attach(device);
                sink.notify_added_device(device);
                Ok(device)
            }
            Err(e) => {
                broker.close_restricted(fd);
                Err(e)
            }
        }
    }

    /// Classifies the device and sets up the state its capabilities need.
    fn configure(&mut self, factory: &mut dyn DecoderFactory) -> io::Result<()> {
        let mut has_abs = false;
        let mut has_rel = false;
        let mut has_button = false;
        let mut has_keyboard = false;
        let mut has_touch = false;

        if self.decoder.has_event_type(EventType::ABS) {
            if let Some(absinfo) = self.decoder.abs_info(Abs::X) {
                self.abs.absinfo_x = Some(self.fixup_resolution(Abs::X, absinfo));
                has_abs = true;
            }
            if let Some(absinfo) = self.decoder.abs_info(Abs::Y) {
                self.abs.absinfo_y = Some(self.fixup_resolution(Abs::Y, absinfo));
                has_abs = true;
            }

            // Only the slotted protocol B is processed directly. Devices with
            // ABS_MT_POSITION_* but no ABS_MT_SLOT go through the slot converter.
            if self.decoder.has_event_code(EventType::ABS, Abs::MT_POSITION_X.raw())
                && self.decoder.has_event_code(EventType::ABS, Abs::MT_POSITION_Y.raw())
            {
                if let Some(absinfo) = self.decoder.abs_info(Abs::MT_POSITION_X) {
                    self.abs.absinfo_x = Some(self.fixup_resolution(Abs::MT_POSITION_X, absinfo));
                }
                if let Some(absinfo) = self.decoder.abs_info(Abs::MT_POSITION_Y) {
                    self.abs.absinfo_y = Some(self.fixup_resolution(Abs::MT_POSITION_Y, absinfo));
                }
                self.is_mt = true;
                has_touch = true;

                let (num_slots, active_slot);
                if !self.decoder.has_event_code(EventType::ABS, Abs::MT_SLOT.raw()) {
                    let converter = factory.slot_converter(self.fd)?;
                    num_slots = converter.num_slots();
                    active_slot = converter.current_slot();
                    self.converter = Some(converter);
                } else {
                    num_slots = self.decoder.num_slots();
                    active_slot = self.decoder.current_slot();
                }
                if num_slots <= 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("multitouch device reports {num_slots} slots"),
                    ));
                }

                self.mt.slots = vec![MtSlot::INACTIVE; num_slots as usize];
                self.mt.slot = active_slot;
            }
        }

        if self.decoder.has_event_code(EventType::REL, Rel::X.raw())
            || self.decoder.has_event_code(EventType::REL, Rel::Y.raw())
        {
            has_rel = true;
        }

        if self.decoder.has_event_type(EventType::KEY) {
            for code in 0..KEY_CNT as u16 {
                if self.decoder.has_event_code(EventType::KEY, code) {
                    match key_type(Key::from_raw(code)) {
                        KeyType::None => {}
                        KeyType::Key => has_keyboard = true,
                        KeyType::Button => has_button = true,
                    }
                }
            }

            if self.decoder.has_event_code(EventType::KEY, Key::BTN_TOUCH.raw()) {
                has_touch = true;
            }
        }
        if self.decoder.has_event_type(EventType::LED) {
            has_keyboard = true;
        }

        if (has_abs || has_rel) && has_button {
            self.pointer_filter = Some(Box::new(PointerAccelerator::new(smooth_simple_profile)));
            self.seat_caps |= SeatCaps::POINTER;
            log::info!(
                "input device '{}', {} is a pointer caps ={}{}{}",
                self.devname,
                self.devnode,
                if has_abs { " absolute-motion" } else { "" },
                if has_rel { " relative-motion" } else { "" },
                if has_button { " button" } else { "" },
            );
        }
        if has_keyboard {
            self.seat_caps |= SeatCaps::KEYBOARD;
            log::info!("input device '{}', {} is a keyboard", self.devname, self.devnode);
        }
        if has_touch && !has_button {
            self.seat_caps |= SeatCaps::TOUCH;
            log::info!("input device '{}', {} is a touch device", self.devname, self.devnode);
        }

        Ok(())
    }

    /// Forces a reported resolution of 0 to 1 and remembers that the value is made up.
    fn fixup_resolution(&mut self, axis: Abs, absinfo: AbsInfo) -> AbsInfo {
        if absinfo.resolution() != 0 {
            return absinfo;
        }

        let fixed = absinfo.with_resolution(1);
        self.decoder.set_abs_info(axis, fixed);
        self.abs.fake_resolution = true;
        fixed
    }

    /// Drains and processes all readable events.
    ///
    /// Call when the fd becomes readable; everything available is processed before this
    /// returns, so a slow caller doesn't accumulate input lag. On a transport error the
    /// device detaches itself (see [`Device::is_attached`]); the fd stays open for the owner
    /// to remove the device.
    pub fn dispatch_events(&mut self, sink: &mut dyn NotifySink) {
        if let Err(e) = self.drain(sink) {
            match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {}
                _ => {
                    log::warn!("reading from {} failed: {e}; detaching", self.devnode);
                    self.source_attached = false;
                }
            }
        }
    }

    fn drain(&mut self, sink: &mut dyn NotifySink) -> io::Result<()> {
        loop {
            match self.decoder.next_event(ReadMode::Normal)? {
                ReadStatus::Event(ev) => self.dispatch_one(sink, ev),
                ReadStatus::Sync(marker) => {
                    // Commit the partially accumulated frame before replaying the
                    // post-overflow state.
                    let syn = InputEvent::from(SynEvent::new(Syn::REPORT)).with_time(marker.time());
                    self.dispatch_one(sink, syn);

                    self.sync_events(sink)?;
                }
                ReadStatus::Synced => {}
            }
        }
    }

    /// Drains the decoder's re-sync stream after a kernel buffer overflow.
    fn sync_events(&mut self, sink: &mut dyn NotifySink) -> io::Result<()> {
        loop {
            match self.decoder.next_event(ReadMode::Sync) {
                Ok(ReadStatus::Event(ev)) | Ok(ReadStatus::Sync(ev)) => {
                    self.dispatch_one(sink, ev)
                }
                Ok(ReadStatus::Synced) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Routes one event through the slot converter (if any) into the dispatcher.
    fn dispatch_one(&mut self, sink: &mut dyn NotifySink, event: InputEvent) {
        match self.converter.take() {
            None => self.process_event(sink, event),
            Some(mut converter) => {
                converter.put_event(event);
                if event.is_syn_report() {
                    while let Some(converted) = converter.fetch_event() {
                        self.process_event(sink, converted);
                    }
                }
                self.converter = Some(converter);
            }
        }
    }

    fn process_event(&mut self, sink: &mut dyn NotifySink, event: InputEvent) {
        let time_ms = event.time_ms();
        let mut dispatch = self.dispatch.take().expect("dispatch is installed at create");
        dispatch.process(self, sink, &event, time_ms);
        self.dispatch = Some(dispatch);
    }

    /// Registers a key transition and notifies the seat when the press count crosses zero.
    ///
    /// Intermediate presses and releases of a multiply-pressed key are swallowed.
    pub fn keyboard_notify_key(
        &mut self,
        sink: &mut dyn NotifySink,
        time_ms: u64,
        key: Key,
        state: KeyState,
    ) {
        let down_count = self.key_counts.update(key, state == KeyState::Pressed);

        if (state == KeyState::Pressed && down_count == 1)
            || (state == KeyState::Released && down_count == 0)
        {
            sink.keyboard_notify_key(self, time_ms, key.raw().into(), state);
        }
    }

    /// Button counterpart of [`Device::keyboard_notify_key`].
    pub fn pointer_notify_button(
        &mut self,
        sink: &mut dyn NotifySink,
        time_ms: u64,
        button: Key,
        state: ButtonState,
    ) {
        let down_count = self.key_counts.update(button, state == ButtonState::Pressed);

        if (state == ButtonState::Pressed && down_count == 1)
            || (state == ButtonState::Released && down_count == 0)
        {
            sink.pointer_notify_button(self, time_ms, button.raw().into(), state);
        }
    }

    /// Replaces the pointer motion filter.
    ///
    /// `None` removes acceleration entirely; motion then passes through unmodified.
    pub fn set_pointer_filter(&mut self, filter: Option<Box<dyn MotionFilter>>) {
        self.pointer_filter = filter;
    }

    /// Applies the calibration transform to a device coordinate.
    pub(crate) fn transform_absolute(&self, x: i32, y: i32) -> (i32, i32) {
        if !self.abs.apply_calibration {
            return (x, y);
        }
        self.abs.calibration.apply(x, y)
    }

    /// Whether the calibration configuration is available on this device.
    pub fn has_calibration_matrix(&self) -> bool {
        let dispatch_has_calibration =
            self.dispatch.as_ref().is_some_and(|d| d.has_calibration());
        dispatch_has_calibration && self.abs.absinfo_x.is_some() && self.abs.absinfo_y.is_some()
    }

    /// Installs a new user calibration matrix. Always succeeds.
    pub fn set_calibration(&mut self, matrix: [f32; 6]) -> ConfigStatus {
        self.calibrate(matrix);
        ConfigStatus::Success
    }

    /// Returns the user calibration matrix and whether it differs from the identity.
    pub fn get_calibration(&self) -> ([f32; 6], bool) {
        (
            self.abs.usermatrix.to_array6(),
            !self.abs.usermatrix.is_identity(),
        )
    }

    /// Returns the default calibration matrix (from the device metadata) and whether it
    /// differs from the identity.
    pub fn get_default_calibration(&self) -> ([f32; 6], bool) {
        (
            self.abs.default_calibration.to_array6(),
            !self.abs.default_calibration.is_identity(),
        )
    }

    /// Seeds the default calibration (the `LIBINPUT_CALIBRATION_MATRIX` device property) and
    /// applies it.
    pub fn set_default_calibration(&mut self, matrix: [f32; 6]) {
        self.abs.default_calibration = Matrix::from_array6(matrix);
        self.calibrate(matrix);
    }

    /// Rebuilds the effective device-space transform from a user matrix.
    ///
    /// The user matrix acts on coordinates normalized to [0, 1]; the effective transform is
    /// `M = Un-Normalize · U · Normalize` over the axis extents, so that a translation of 1
    /// in the user matrix shifts by one device width/height.
    fn calibrate(&mut self, calibration: [f32; 6]) {
        let transform = Matrix::from_array6(calibration);

        // Keep the user matrix for round-trip readback.
        self.abs.usermatrix = transform;
        self.abs.apply_calibration = !transform.is_identity();

        if !self.abs.apply_calibration {
            self.abs.calibration = Matrix::identity();
            return;
        }

        let (Some(absinfo_x), Some(absinfo_y)) = (self.abs.absinfo_x, self.abs.absinfo_y) else {
            // No absolute axes, nothing to calibrate against.
            self.abs.apply_calibration = false;
            self.abs.calibration = Matrix::identity();
            return;
        };

        let min_x = absinfo_x.minimum() as f32;
        let min_y = absinfo_y.minimum() as f32;
        let sx = (absinfo_x.maximum() - absinfo_x.minimum() + 1) as f32;
        let sy = (absinfo_y.maximum() - absinfo_y.minimum() + 1) as f32;

        let unnormalize = Matrix::translate(min_x, min_y).mul(&Matrix::scale(sx, sy));
        let normalize =
            Matrix::translate(-min_x / sx, -min_y / sy).mul(&Matrix::scale(1.0 / sx, 1.0 / sy));

        self.abs.calibration = unnormalize.mul(&transform).mul(&normalize);
    }

    pub fn has_capability(&self, cap: SeatCaps) -> bool {
        self.seat_caps.contains(cap)
    }

    /// Physical size of the absolute axes in millimeters.
    ///
    /// Fails for devices without absolute axes and for devices whose reported resolution was
    /// made up during configuration: their size is unknown.
    pub fn size(&self) -> Option<(f64, f64)> {
        let x = self.decoder.abs_info(Abs::X)?;
        let y = self.decoder.abs_info(Abs::Y)?;

        if self.abs.fake_resolution || x.resolution() == 0 || y.resolution() == 0 {
            return None;
        }

        Some((x.to_mm(x.maximum().into()), y.to_mm(y.maximum().into())))
    }

    /// Scales an absolute x coordinate to `[0, width)`.
    pub fn transform_x(&self, x: f64, width: u32) -> Option<f64> {
        self.abs.absinfo_x.map(|info| scale_axis(&info, x, width.into()))
    }

    /// Scales an absolute y coordinate to `[0, height)`.
    pub fn transform_y(&self, y: f64, height: u32) -> Option<f64> {
        self.abs.absinfo_y.map(|info| scale_axis(&info, y, height.into()))
    }

    /// Pushes the LED state to the device.
    ///
    /// Best effort: the write result is intentionally ignored.
    pub fn led_update(&self, leds: Leds) {
        const MAP: [(Leds, Led); 3] = [
            (Leds::NUM_LOCK, Led::NUML),
            (Leds::CAPS_LOCK, Led::CAPSL),
            (Leds::SCROLL_LOCK, Led::SCROLLL),
        ];

        if !self.seat_caps.contains(SeatCaps::KEYBOARD) {
            return;
        }

        #[repr(C)]
        struct RawEvent {
            time: libc::timeval,
            type_: u16,
            code: u16,
            value: i32,
        }

        let raw = |ty: u16, code: u16, value: i32| RawEvent {
            time: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            type_: ty,
            code,
            value,
        };

        let events = [
            raw(EventType::LED.raw(), MAP[0].1.raw(), leds.contains(MAP[0].0) as i32),
            raw(EventType::LED.raw(), MAP[1].1.raw(), leds.contains(MAP[1].0) as i32),
            raw(EventType::LED.raw(), MAP[2].1.raw(), leds.contains(MAP[2].0) as i32),
            raw(EventType::SYN.raw(), Syn::REPORT.raw(), 0),
        ];

        let ret = unsafe {
            libc::write(
                self.fd,
                events.as_ptr().cast(),
                mem::size_of_val(&events),
            )
        };
        let _ = ret; /* no, we really don't care about the return value */
    }

    /// Synthesizes a release notification for every key or button still counted as pressed.
    fn release_pressed_keys(&mut self, sink: &mut dyn NotifySink) {
        let time_ms = monotonic_time_ms();

        let pressed: Vec<Key> = self.key_counts.pressed().collect();
        for key in pressed {
            match key_type(key) {
                KeyType::None => {}
                KeyType::Key => {
                    sink.keyboard_notify_key(self, time_ms, key.raw().into(), KeyState::Released)
                }
                KeyType::Button => sink.pointer_notify_button(
                    self,
                    time_ms,
                    key.raw().into(),
                    ButtonState::Released,
                ),
            }
        }
    }

    /// Tears the device down: releases its pressed keys, closes the fd through the broker,
    /// and notifies removal.
    ///
    /// The device must already be detached from its seat (see
    /// [`Seat::detach`][crate::Seat::detach]).
    pub fn remove(mut self, broker: &mut dyn DeviceBroker, sink: &mut dyn NotifySink) {
        self.source_attached = false;

        self.release_pressed_keys(sink);

        self.converter = None;
        broker.close_restricted(self.fd);
        self.fd = -1;

        sink.notify_removed_device(&self);
    }

    /// Whether the device is still attached to the event loop. Cleared after a transport
    /// failure; the owner should then remove the device.
    pub fn is_attached(&self) -> bool {
        self.source_attached
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The kernel-reported device name.
    pub fn name(&self) -> &str {
        &self.devname
    }

    pub fn sysname(&self) -> &str {
        &self.sysname
    }

    pub fn devnode(&self) -> &str {
        &self.devnode
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.devname)
            .field("devnode", &self.devnode)
            .field("seat_caps", &self.seat_caps)
            .field("is_mt", &self.is_mt)
            .field("pending_event", &self.pending_event)
            .finish_non_exhaustive()
    }
}

#[inline]
fn scale_axis(absinfo: &AbsInfo, value: f64, to_range: f64) -> f64 {
    (value - f64::from(absinfo.minimum())) * to_range
        / f64::from(absinfo.maximum() - absinfo.minimum() + 1)
}

/// Parses the 6-float `LIBINPUT_CALIBRATION_MATRIX` device property.
pub fn parse_calibration_property(value: &str) -> Option<[f32; 6]> {
    let mut out = [0.0f32; 6];
    let mut parts = value.split_whitespace();
    for slot in &mut out {
        *slot = parts.next()?.parse().ok()?;
    }
    parts.next().is_none().then_some(out)
}
