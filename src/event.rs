//! Typed evdev input events.
//!
//! The decoder hands the core [`InputEvent`]s, the raw `(type, code, value)` triples of the
//! kernel protocol plus a timestamp. [`InputEvent::kind`] converts an event into an
//! [`EventKind`] that can be conveniently `match`ed on.
//!
//! Only the event types and codes this crate processes are enumerated here; unknown codes are
//! preserved in their raw form and passed through untouched.

use std::fmt;
use std::ops::Deref;

/// Declares a newtype over a kernel code with named constants, in the C enum style.
macro_rules! code_enum {
    (
        $( #[$attrs:meta] )*
        $v:vis enum $name:ident {
            $(
                $( #[$variant_attrs:meta] )*
                $variant:ident = $value:expr
            ),+
            $(,)?
        }
    ) => {
        $( #[$attrs] )*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        $v struct $name(u16);

        impl $name {
            $(
                $( #[$variant_attrs] )*
                $v const $variant: Self = Self($value);
            )+

            /// Returns the raw code wrapped by `self`.
            #[inline]
            $v const fn raw(self) -> u16 {
                self.0
            }

            /// Creates a value from a raw kernel code.
            #[inline]
            $v const fn from_raw(raw: u16) -> Self {
                Self(raw)
            }

            #[allow(unreachable_patterns)]
            fn variant_name(&self) -> Option<&'static str> {
                match self {
                    $(
                        &Self::$variant => Some(stringify!($variant)),
                    )*
                    _ => None,
                }
            }
        }
    };
}

/// Number of `EV_KEY` codes (`KEY_CNT`); bounds the per-device key bookkeeping arrays.
pub const KEY_CNT: usize = 0x300;

/// Kernel timestamp of an input event (`struct timeval` granularity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventTime {
    sec: u64,
    usec: u64,
}

impl EventTime {
    #[inline]
    pub const fn new(sec: u64, usec: u64) -> Self {
        Self { sec, usec }
    }

    /// Creates a timestamp from a millisecond count.
    #[inline]
    pub const fn from_ms(ms: u64) -> Self {
        Self {
            sec: ms / 1000,
            usec: (ms % 1000) * 1000,
        }
    }

    /// Converts the timestamp to milliseconds since the clock origin.
    #[inline]
    pub const fn as_ms(&self) -> u64 {
        self.sec * 1000 + self.usec / 1000
    }
}

/// An input event received from an event device.
///
/// Use [`InputEvent::kind`] to convert it to a `match`able enum.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    time: EventTime,
    type_: EventType,
    code: u16,
    value: i32,
}

impl InputEvent {
    /// Creates an [`InputEvent`] from raw values.
    ///
    /// The timestamp of the event will be set to 0.
    #[inline]
    pub const fn new(ty: EventType, raw_code: u16, raw_value: i32) -> Self {
        Self {
            time: EventTime::new(0, 0),
            type_: ty,
            code: raw_code,
            value: raw_value,
        }
    }

    /// Returns a copy of `self`, with its timestamp set to `time`.
    #[inline]
    pub const fn with_time(mut self, time: EventTime) -> Self {
        self.time = time;
        self
    }

    #[inline]
    pub const fn time(&self) -> EventTime {
        self.time
    }

    /// Returns the event timestamp in milliseconds.
    #[inline]
    pub const fn time_ms(&self) -> u64 {
        self.time.as_ms()
    }

    #[inline]
    pub const fn event_type(&self) -> EventType {
        self.type_
    }

    #[inline]
    pub const fn raw_code(&self) -> u16 {
        self.code
    }

    #[inline]
    pub const fn raw_value(&self) -> i32 {
        self.value
    }

    /// Converts the event into a typed [`EventKind`].
    ///
    /// Returns [`None`] for event types this crate does not process.
    pub fn kind(&self) -> Option<EventKind> {
        match self.type_ {
            EventType::SYN => Some(EventKind::Syn(SynEvent(*self))),
            EventType::KEY => Some(EventKind::Key(KeyEvent(*self))),
            EventType::REL => Some(EventKind::Rel(RelEvent(*self))),
            EventType::ABS => Some(EventKind::Abs(AbsEvent(*self))),
            EventType::LED => Some(EventKind::Led(LedEvent(*self))),
            _ => None,
        }
    }

    /// Returns whether `self` is a `SYN_REPORT` event.
    pub fn is_syn_report(&self) -> bool {
        self.type_ == EventType::SYN && self.code == Syn::REPORT.raw()
    }
}

impl fmt::Debug for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(EventKind::Syn(ev)) => write!(f, "{:?}", ev.syn()),
            Some(EventKind::Key(ev)) => write!(f, "{:?} = {}", ev.key(), self.value),
            Some(EventKind::Rel(ev)) => write!(f, "{:?} = {}", ev.rel(), self.value),
            Some(EventKind::Abs(ev)) => write!(f, "{:?} = {}", ev.abs(), self.value),
            Some(EventKind::Led(ev)) => write!(f, "{:?} = {}", ev.led(), self.value),
            None => write!(
                f,
                "InputEvent({:?}, code={:#x}, value={})",
                self.type_, self.code, self.value
            ),
        }
    }
}

/// A typed view of an [`InputEvent`], for `match`-based dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Syn(SynEvent),
    Key(KeyEvent),
    Rel(RelEvent),
    Abs(AbsEvent),
    Led(LedEvent),
}

macro_rules! event_wrapper {
    (
        $( #[$attrs:meta] )*
        $name:ident
    ) => {
        $( #[$attrs] )*
        #[derive(Clone, Copy, PartialEq, Eq)]
        #[repr(transparent)]
        pub struct $name(InputEvent);

        impl Deref for $name {
            type Target = InputEvent;

            #[inline]
            fn deref(&self) -> &InputEvent {
                &self.0
            }
        }

        impl From<$name> for InputEvent {
            #[inline]
            fn from(ev: $name) -> InputEvent {
                ev.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&self.0, f)
            }
        }
    };
}

event_wrapper! {
    /// An `EV_SYN` synchronization event.
    SynEvent
}

impl SynEvent {
    #[inline]
    pub fn new(syn: Syn) -> Self {
        Self(InputEvent::new(EventType::SYN, syn.raw(), 0))
    }

    #[inline]
    pub fn syn(&self) -> Syn {
        Syn::from_raw(self.0.code)
    }
}

event_wrapper! {
    /// An `EV_KEY` key or button state change.
    KeyEvent
}

impl KeyEvent {
    #[inline]
    pub fn new(key: Key, pressed: bool) -> Self {
        Self(InputEvent::new(EventType::KEY, key.raw(), pressed as i32))
    }

    #[inline]
    pub fn key(&self) -> Key {
        Key::from_raw(self.0.code)
    }

    #[inline]
    pub fn is_pressed(&self) -> bool {
        self.0.value != 0
    }

    /// Returns whether this is a kernel autorepeat event (value 2).
    #[inline]
    pub fn is_repeat(&self) -> bool {
        self.0.value == 2
    }
}

event_wrapper! {
    /// An `EV_REL` relative axis movement.
    RelEvent
}

impl RelEvent {
    #[inline]
    pub fn new(rel: Rel, value: i32) -> Self {
        Self(InputEvent::new(EventType::REL, rel.raw(), value))
    }

    #[inline]
    pub fn rel(&self) -> Rel {
        Rel::from_raw(self.0.code)
    }

    #[inline]
    pub fn value(&self) -> i32 {
        self.0.value
    }
}

event_wrapper! {
    /// An `EV_ABS` absolute axis update.
    AbsEvent
}

impl AbsEvent {
    #[inline]
    pub fn new(abs: Abs, value: i32) -> Self {
        Self(InputEvent::new(EventType::ABS, abs.raw(), value))
    }

    #[inline]
    pub fn abs(&self) -> Abs {
        Abs::from_raw(self.0.code)
    }

    #[inline]
    pub fn value(&self) -> i32 {
        self.0.value
    }
}

event_wrapper! {
    /// An `EV_LED` indicator state change.
    LedEvent
}

impl LedEvent {
    #[inline]
    pub fn new(led: Led, on: bool) -> Self {
        Self(InputEvent::new(EventType::LED, led.raw(), on as i32))
    }

    #[inline]
    pub fn led(&self) -> Led {
        Led::from_raw(self.0.code)
    }

    #[inline]
    pub fn is_on(&self) -> bool {
        self.0.value != 0
    }
}

code_enum! {
    /// Types of [`InputEvent`]s.
    pub enum EventType {
        /// Synchronization event; `SYN_REPORT` commits the fields updated since the last one.
        SYN = 0x00,
        /// A key or button press, release, or repeat.
        KEY = 0x01,
        /// A relative axis movement.
        REL = 0x02,
        /// An absolute axis update.
        ABS = 0x03,
        /// An LED indicator change (written to devices, never processed inbound).
        LED = 0x11,
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "EV_{name}"),
            None => write!(f, "EventType({:#x})", self.0),
        }
    }
}

code_enum! {
    /// `EV_SYN` event codes.
    pub enum Syn {
        /// Ends a batch of events that happened at the same time.
        REPORT = 0,
        CONFIG = 1,
        MT_REPORT = 2,
        /// The kernel event buffer overflowed; events were lost.
        DROPPED = 3,
    }
}

impl fmt::Debug for Syn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "SYN_{name}"),
            None => write!(f, "Syn({:#x})", self.0),
        }
    }
}

code_enum! {
    /// `EV_KEY` codes: keyboard keys and buttons.
    ///
    /// Only the codes the core refers to by name are listed; the classification in
    /// [`key_type`][crate::key_type] works on closed raw ranges, so every code in
    /// `0..KEY_CNT` is classified whether it is named here or not.
    pub enum Key {
        KEY_RESERVED     = 0,
        /// First code of the primary keyboard key range.
        KEY_ESC          = 1,
        KEY_1            = 2,
        KEY_Q            = 16,
        KEY_A            = 30,
        KEY_CAPSLOCK     = 58,
        KEY_NUMLOCK      = 69,
        KEY_SCROLLLOCK   = 70,
        /// Last code of the primary keyboard key range.
        KEY_MICMUTE      = 248,
        /// First code of the primary button range.
        BTN_MISC         = 0x100,
        BTN_LEFT         = 0x110,
        BTN_RIGHT        = 0x111,
        BTN_MIDDLE       = 0x112,
        BTN_SIDE         = 0x113,
        BTN_EXTRA        = 0x114,
        BTN_TOOL_PEN     = 0x140,
        BTN_TOOL_FINGER  = 0x145,
        /// Touch contact indicator; maps to touch up/down on single-touch devices.
        BTN_TOUCH        = 0x14a,
        /// Last code of the primary button range.
        BTN_GEAR_UP      = 0x151,
        /// First code of the extended keyboard key range.
        KEY_OK           = 0x160,
        /// Last code of the extended keyboard key range.
        KEY_LIGHTS_TOGGLE = 0x21e,
        /// First code of the extended button range.
        BTN_DPAD_UP      = 0x220,
        /// Last code of the extended button range.
        BTN_TRIGGER_HAPPY40 = 0x2e7,
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Key({:#x})", self.0),
        }
    }
}

code_enum! {
    /// `EV_REL` relative axis codes.
    pub enum Rel {
        X      = 0x00,
        Y      = 0x01,
        HWHEEL = 0x06,
        WHEEL  = 0x08,
    }
}

impl fmt::Debug for Rel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "REL_{name}"),
            None => write!(f, "Rel({:#x})", self.0),
        }
    }
}

code_enum! {
    /// `EV_ABS` absolute axis codes.
    pub enum Abs {
        X              = 0x00,
        Y              = 0x01,
        /// Selects the multitouch slot that subsequent `MT_*` events apply to.
        MT_SLOT        = 0x2f,
        MT_POSITION_X  = 0x35,
        MT_POSITION_Y  = 0x36,
        /// Non-negative while a contact is active, -1 when it ends.
        MT_TRACKING_ID = 0x39,
    }
}

impl fmt::Debug for Abs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "ABS_{name}"),
            None => write!(f, "Abs({:#x})", self.0),
        }
    }
}

code_enum! {
    /// `EV_LED` indicator codes.
    pub enum Led {
        NUML    = 0x00,
        CAPSL   = 0x01,
        SCROLLL = 0x02,
    }
}

impl fmt::Debug for Led {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "LED_{name}"),
            None => write!(f, "Led({:#x})", self.0),
        }
    }
}
