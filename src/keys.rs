//! Key and button bookkeeping.
//!
//! Devices keep two parallel structures per `EV_KEY` code: a packed bitmap of codes that are
//! currently down (used to drop release events for keys we never saw pressed) and a press
//! counter (used to deduplicate redundant press/release pairs into a single notification).

use crate::event::{KEY_CNT, Key};

const WORD_BITS: usize = u64::BITS as usize;
const KEY_WORDS: usize = KEY_CNT.div_ceil(WORD_BITS);

/// How a key code is surfaced to the seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Not forwarded (touch indicators, tool types, codes outside the known ranges).
    None,
    /// Forwarded as a keyboard key.
    Key,
    /// Forwarded as a pointer button.
    Button,
}

/// Classifies an `EV_KEY` code into keyboard key, pointer button, or neither.
pub fn key_type(key: Key) -> KeyType {
    if key == Key::BTN_TOUCH {
        return KeyType::None;
    }

    let code = key.raw();
    if (Key::KEY_ESC.raw()..=Key::KEY_MICMUTE.raw()).contains(&code) {
        return KeyType::Key;
    }
    if (Key::BTN_MISC.raw()..=Key::BTN_GEAR_UP.raw()).contains(&code) {
        return KeyType::Button;
    }
    if (Key::KEY_OK.raw()..=Key::KEY_LIGHTS_TOGGLE.raw()).contains(&code) {
        return KeyType::Key;
    }
    if (Key::BTN_DPAD_UP.raw()..=Key::BTN_TRIGGER_HAPPY40.raw()).contains(&code) {
        return KeyType::Button;
    }
    KeyType::None
}

/// Packed per-code "currently down" bitmap.
#[derive(Clone)]
pub(crate) struct KeyMask {
    words: [u64; KEY_WORDS],
}

impl KeyMask {
    pub fn new() -> Self {
        Self {
            words: [0; KEY_WORDS],
        }
    }

    pub fn is_down(&self, key: Key) -> bool {
        let index = key.raw() as usize;
        if index >= KEY_CNT {
            return false;
        }
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    pub fn set_down(&mut self, key: Key, down: bool) {
        let index = key.raw() as usize;
        if index >= KEY_CNT {
            return;
        }
        if down {
            self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
        } else {
            self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
        }
    }
}

/// Per-code press counters.
///
/// Several internal sources may press the same button (for example a physical button and a
/// software-emulated one); a notification is only emitted when the count crosses zero.
#[derive(Clone)]
pub(crate) struct KeyCounts {
    counts: Box<[u32; KEY_CNT]>,
}

impl KeyCounts {
    pub fn new() -> Self {
        Self {
            counts: Box::new([0; KEY_CNT]),
        }
    }

    /// Registers a press or release and returns the new count.
    ///
    /// A release that would underflow is dropped at count zero, and a count above 32 is
    /// reported once per offending event; both indicate a bug in whatever feeds us.
    pub fn update(&mut self, key: Key, pressed: bool) -> u32 {
        let index = key.raw() as usize;
        if index >= KEY_CNT {
            return 0;
        }

        let count = &mut self.counts[index];
        if pressed {
            *count += 1;
        } else if *count > 0 {
            *count -= 1;
        } else {
            log::error!("core bug: releasing {:?} with a press count of 0", key);
        }

        if *count > 32 {
            log::warn!("key count for {:?} reached abnormal values", key);
        }

        *count
    }

    /// Iterator over all codes with a non-zero press count.
    pub fn pressed(&self) -> impl Iterator<Item = Key> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(code, _)| Key::from_raw(code as u16))
    }
}
