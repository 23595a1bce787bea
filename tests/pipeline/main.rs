//! The pipeline test suite.
//!
//! Drives complete devices through the processing core: a scripted decoder stands in for
//! the kernel + decoding library, a recording sink stands in for the seat's consumers, and
//! the tests assert on the notification stream that comes out the far end.


use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

use evseat::event::{Abs, EventTime, EventType, InputEvent, Key, Rel, Syn};
use evseat::{
    AbsInfo, ButtonState, CreateError, DecoderFactory, Device, DeviceBroker, EventDecoder,
    KeyState, NotifySink, PointerAxis, ReadMode, ReadStatus, Seat, SlotConverter,
};

pub fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// -- scripted decoder --------------------------------------------------------

#[derive(Default)]
struct DecoderState {
    queue: VecDeque<io::Result<ReadStatus>>,
    sync_queue: VecDeque<InputEvent>,
    types: HashSet<u16>,
    codes: HashSet<(u16, u16)>,
    absinfo: HashMap<u16, AbsInfo>,
    num_slots: i32,
    current_slot: i32,
    monotonic: bool,
}

/// A decoder whose event stream is scripted by the test.
///
/// Clones share their state, so the test can keep pushing events after the device has taken
/// ownership of its copy.
#[derive(Clone)]
pub struct ScriptedDecoder {
    name: String,
    state: Rc<RefCell<DecoderState>>,
}

impl ScriptedDecoder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Rc::new(RefCell::new(DecoderState {
                num_slots: -1,
                ..DecoderState::default()
            })),
        }
    }

    pub fn add_code(&self, ty: EventType, code: u16) -> &Self {
        let mut state = self.state.borrow_mut();
        state.types.insert(ty.raw());
        state.codes.insert((ty.raw(), code));
        self
    }

    pub fn add_type(&self, ty: EventType) -> &Self {
        self.state.borrow_mut().types.insert(ty.raw());
        self
    }

    pub fn set_absinfo(&self, axis: Abs, info: AbsInfo) -> &Self {
        self.add_code(EventType::ABS, axis.raw());
        self.state.borrow_mut().absinfo.insert(axis.raw(), info);
        self
    }

    pub fn set_slots(&self, num_slots: i32, current: i32) -> &Self {
        let mut state = self.state.borrow_mut();
        state.num_slots = num_slots;
        state.current_slot = current;
        self
    }

    /// Queues the events of one frame, all with the same timestamp, followed by the
    /// `SYN_REPORT` committing them.
    pub fn push_frame(&self, time_ms: u64, events: &[InputEvent]) {
        let time = EventTime::from_ms(time_ms);
        let mut state = self.state.borrow_mut();
        for ev in events {
            state.queue.push_back(Ok(ReadStatus::Event(ev.with_time(time))));
        }
        state.queue.push_back(Ok(ReadStatus::Event(
            InputEvent::new(EventType::SYN, Syn::REPORT.raw(), 0).with_time(time),
        )));
    }

    /// Queues a single raw event without a commit.
    pub fn push_event(&self, time_ms: u64, event: InputEvent) {
        self.state.borrow_mut().queue.push_back(Ok(ReadStatus::Event(
            event.with_time(EventTime::from_ms(time_ms)),
        )));
    }

    /// Queues a kernel buffer overflow marker.
    pub fn push_overflow(&self, time_ms: u64) {
        let marker = InputEvent::new(EventType::SYN, Syn::DROPPED.raw(), 0)
            .with_time(EventTime::from_ms(time_ms));
        self.state
            .borrow_mut()
            .queue
            .push_back(Ok(ReadStatus::Sync(marker)));
    }

    /// Queues an event onto the re-sync stream drained after an overflow.
    pub fn push_sync_event(&self, time_ms: u64, event: InputEvent) {
        self.state
            .borrow_mut()
            .sync_queue
            .push_back(event.with_time(EventTime::from_ms(time_ms)));
    }

    pub fn push_error(&self, kind: io::ErrorKind) {
        self.state
            .borrow_mut()
            .queue
            .push_back(Err(io::Error::new(kind, "scripted error")));
    }

    pub fn is_monotonic(&self) -> bool {
        self.state.borrow().monotonic
    }
}

impl EventDecoder for ScriptedDecoder {
    fn next_event(&mut self, mode: ReadMode) -> io::Result<ReadStatus> {
        let mut state = self.state.borrow_mut();
        match mode {
            ReadMode::Normal => match state.queue.pop_front() {
                Some(item) => item,
                None => Err(io::ErrorKind::WouldBlock.into()),
            },
            ReadMode::Sync => match state.sync_queue.pop_front() {
                Some(ev) => Ok(ReadStatus::Event(ev)),
                None => Ok(ReadStatus::Synced),
            },
        }
    }

    fn set_monotonic_clock(&mut self) -> io::Result<()> {
        self.state.borrow_mut().monotonic = true;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_event_type(&self, ty: EventType) -> bool {
        self.state.borrow().types.contains(&ty.raw())
    }

    fn has_event_code(&self, ty: EventType, code: u16) -> bool {
        self.state.borrow().codes.contains(&(ty.raw(), code))
    }

    fn abs_info(&self, axis: Abs) -> Option<AbsInfo> {
        self.state.borrow().absinfo.get(&axis.raw()).copied()
    }

    fn set_abs_info(&mut self, axis: Abs, info: AbsInfo) {
        self.state.borrow_mut().absinfo.insert(axis.raw(), info);
    }

    fn num_slots(&self) -> i32 {
        self.state.borrow().num_slots
    }

    fn current_slot(&self) -> i32 {
        self.state.borrow().current_slot
    }
}

// -- device templates --------------------------------------------------------

pub fn mouse() -> ScriptedDecoder {
    let dec = ScriptedDecoder::new("test mouse");
    dec.add_code(EventType::REL, Rel::X.raw());
    dec.add_code(EventType::REL, Rel::Y.raw());
    dec.add_code(EventType::REL, Rel::WHEEL.raw());
    dec.add_code(EventType::REL, Rel::HWHEEL.raw());
    dec.add_code(EventType::KEY, Key::BTN_LEFT.raw());
    dec.add_code(EventType::KEY, Key::BTN_RIGHT.raw());
    dec.add_code(EventType::KEY, Key::BTN_MIDDLE.raw());
    dec
}

pub fn keyboard() -> ScriptedDecoder {
    let dec = ScriptedDecoder::new("test keyboard");
    dec.add_code(EventType::KEY, Key::KEY_ESC.raw());
    dec.add_code(EventType::KEY, Key::KEY_A.raw());
    dec.add_code(EventType::KEY, Key::KEY_Q.raw());
    dec.add_type(EventType::LED);
    dec
}

/// A protocol-B multitouch touchscreen.
pub fn touchscreen_mt(min: i32, max: i32, slots: i32) -> ScriptedDecoder {
    let dec = ScriptedDecoder::new("test mt touchscreen");
    dec.set_absinfo(Abs::X, AbsInfo::new(min, max));
    dec.set_absinfo(Abs::Y, AbsInfo::new(min, max));
    dec.set_absinfo(Abs::MT_POSITION_X, AbsInfo::new(min, max));
    dec.set_absinfo(Abs::MT_POSITION_Y, AbsInfo::new(min, max));
    dec.add_code(EventType::ABS, Abs::MT_SLOT.raw());
    dec.add_code(EventType::ABS, Abs::MT_TRACKING_ID.raw());
    dec.add_code(EventType::KEY, Key::BTN_TOUCH.raw());
    dec.set_slots(slots, 0);
    dec
}

/// A single-touch touchscreen (`BTN_TOUCH` + plain `ABS_X`/`ABS_Y`).
pub fn touchscreen_st(x: AbsInfo, y: AbsInfo) -> ScriptedDecoder {
    let dec = ScriptedDecoder::new("test st touchscreen");
    dec.set_absinfo(Abs::X, x);
    dec.set_absinfo(Abs::Y, y);
    dec.add_code(EventType::KEY, Key::BTN_TOUCH.raw());
    dec
}

// -- broker / factory --------------------------------------------------------

#[derive(Default)]
pub struct TestBroker {
    next_fd: RawFd,
    pub opened: Vec<String>,
    pub closed: Vec<RawFd>,
    pub refuse: bool,
}

impl DeviceBroker for TestBroker {
    fn open_restricted(&mut self, path: &str, flags: i32) -> io::Result<RawFd> {
        assert_ne!(flags & libc::O_NONBLOCK, 0, "device must be opened non-blocking");
        if self.refuse {
            return Err(io::ErrorKind::PermissionDenied.into());
        }
        self.next_fd += 1;
        self.opened.push(path.to_owned());
        // Far above any fd the test process could have open, so the best-effort LED write
        // hits EBADF instead of a real file.
        Ok(0x10_0000 + self.next_fd)
    }

    fn close_restricted(&mut self, fd: RawFd) {
        self.closed.push(fd);
    }
}

pub struct TestFactory {
    decoder: Option<ScriptedDecoder>,
    pub converter: Option<TestConverter>,
}

impl TestFactory {
    pub fn new(decoder: &ScriptedDecoder) -> Self {
        Self {
            decoder: Some(decoder.clone()),
            converter: None,
        }
    }
}

impl DecoderFactory for TestFactory {
    fn decoder(&mut self, _fd: RawFd) -> io::Result<Box<dyn EventDecoder>> {
        Ok(Box::new(self.decoder.take().expect("factory used twice")))
    }

    fn slot_converter(&mut self, _fd: RawFd) -> io::Result<Box<dyn SlotConverter>> {
        match self.converter.take() {
            Some(converter) => Ok(Box::new(converter)),
            None => Err(io::ErrorKind::Unsupported.into()),
        }
    }
}

/// A stand-in for the protocol-A bridge: buffers a frame and hands it back unchanged.
pub struct TestConverter {
    num_slots: i32,
    buffered: VecDeque<InputEvent>,
}

impl TestConverter {
    pub fn new(num_slots: i32) -> Self {
        Self {
            num_slots,
            buffered: VecDeque::new(),
        }
    }
}

impl SlotConverter for TestConverter {
    fn put_event(&mut self, event: InputEvent) {
        self.buffered.push_back(event);
    }

    fn fetch_event(&mut self) -> Option<InputEvent> {
        self.buffered.pop_front()
    }

    fn num_slots(&self) -> i32 {
        self.num_slots
    }

    fn current_slot(&self) -> i32 {
        0
    }
}

// -- recording sink ----------------------------------------------------------

/// Everything a device can tell the seat, as recorded data.
#[derive(Debug, Clone, PartialEq)]
pub enum Note {
    Motion {
        time: u64,
        dx: f64,
        dy: f64,
    },
    MotionAbsolute {
        time: u64,
        x: f64,
        y: f64,
    },
    Button {
        time: u64,
        button: u32,
        state: ButtonState,
    },
    Axis {
        time: u64,
        axis: PointerAxis,
        value: f64,
    },
    Key {
        time: u64,
        key: u32,
        state: KeyState,
    },
    TouchDown {
        time: u64,
        slot: i32,
        seat_slot: i32,
        x: f64,
        y: f64,
    },
    TouchMotion {
        time: u64,
        slot: i32,
        seat_slot: i32,
        x: f64,
        y: f64,
    },
    TouchUp {
        time: u64,
        slot: i32,
        seat_slot: i32,
    },
    Frame {
        time: u64,
    },
    Added {
        name: String,
    },
    Removed {
        name: String,
    },
}

#[derive(Default)]
pub struct RecordingSink {
    pub notes: Vec<Note>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<Note> {
        std::mem::take(&mut self.notes)
    }

    /// Asserts the recorded stream equals `expected`, then clears it.
    #[track_caller]
    pub fn expect(&mut self, expected: &[Note]) {
        assert_eq!(self.notes, expected);
        self.notes.clear();
    }
}

impl NotifySink for RecordingSink {
    fn pointer_notify_motion(&mut self, _device: &Device, time: u64, dx: f64, dy: f64) {
        self.notes.push(Note::Motion { time, dx, dy });
    }

    fn pointer_notify_motion_absolute(&mut self, _device: &Device, time: u64, x: f64, y: f64) {
        self.notes.push(Note::MotionAbsolute { time, x, y });
    }

    fn pointer_notify_button(
        &mut self,
        _device: &Device,
        time: u64,
        button: u32,
        state: ButtonState,
    ) {
        self.notes.push(Note::Button { time, button, state });
    }

    fn pointer_notify_axis(&mut self, _device: &Device, time: u64, axis: PointerAxis, value: f64) {
        self.notes.push(Note::Axis { time, axis, value });
    }

    fn keyboard_notify_key(&mut self, _device: &Device, time: u64, key: u32, state: KeyState) {
        self.notes.push(Note::Key { time, key, state });
    }

    fn touch_notify_touch_down(
        &mut self,
        _device: &Device,
        time: u64,
        slot: i32,
        seat_slot: i32,
        x: f64,
        y: f64,
    ) {
        self.notes.push(Note::TouchDown {
            time,
            slot,
            seat_slot,
            x,
            y,
        });
    }

    fn touch_notify_touch_motion(
        &mut self,
        _device: &Device,
        time: u64,
        slot: i32,
        seat_slot: i32,
        x: f64,
        y: f64,
    ) {
        self.notes.push(Note::TouchMotion {
            time,
            slot,
            seat_slot,
            x,
            y,
        });
    }

    fn touch_notify_touch_up(&mut self, _device: &Device, time: u64, slot: i32, seat_slot: i32) {
        self.notes.push(Note::TouchUp {
            time,
            slot,
            seat_slot,
        });
    }

    fn touch_notify_frame(&mut self, _device: &Device, time: u64) {
        self.notes.push(Note::Frame { time });
    }

    fn notify_added_device(&mut self, device: &Device) {
        self.notes.push(Note::Added {
            name: device.name().to_owned(),
        });
    }

    fn notify_removed_device(&mut self, device: &Device) {
        self.notes.push(Note::Removed {
            name: device.name().to_owned(),
        });
    }
}

// -- rig ----------------------------------------------------------------------

/// One seat plus the host-side fakes, wired together.
pub struct Rig {
    pub seat: Seat,
    pub broker: TestBroker,
    pub sink: RecordingSink,
}

impl Rig {
    pub fn new() -> Self {
        setup();
        Self {
            seat: Seat::new(),
            broker: TestBroker::default(),
            sink: RecordingSink::new(),
        }
    }

    /// Creates a device from the scripted decoder and swallows the added-device note.
    pub fn create(&mut self, decoder: &ScriptedDecoder, devnode: &str) {
        let mut factory = TestFactory::new(decoder);
        Device::create(
            &mut self.seat,
            &mut self.broker,
            &mut factory,
            &mut self.sink,
            devnode,
            devnode,
        )
        .expect("device creation failed");
        assert_eq!(
            self.sink.take(),
            vec![Note::Added {
                name: decoder.name.clone()
            }]
        );
    }

    pub fn try_create(
        &mut self,
        factory: &mut TestFactory,
        devnode: &str,
    ) -> Result<(), CreateError> {
        Device::create(
            &mut self.seat,
            &mut self.broker,
            factory,
            &mut self.sink,
            devnode,
            devnode,
        )
        .map(drop)
    }

    pub fn device_mut(&mut self, devnode: &str) -> &mut Device {
        self.seat
            .devices_mut()
            .iter_mut()
            .find(|d| d.devnode() == devnode)
            .expect("no such device")
    }

    /// Drains the named device into the recording sink.
    pub fn dispatch(&mut self, devnode: &str) {
        let device = self
            .seat
            .devices_mut()
            .iter_mut()
            .find(|d| d.devnode() == devnode)
            .expect("no such device");
        device.dispatch_events(&mut self.sink);
    }

    /// Detaches and removes the named device.
    pub fn remove(&mut self, devnode: &str) {
        let index = self
            .seat
            .devices()
            .iter()
            .position(|d| d.devnode() == devnode)
            .expect("no such device");
        let device = self.seat.detach(index);
        device.remove(&mut self.broker, &mut self.sink);
    }

    pub fn slot_map(&self) -> u32 {
        self.seat.state().slot_map()
    }
}
