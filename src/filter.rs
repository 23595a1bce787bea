//! Pointer motion filters.
//!
//! Relative pointer deltas pass through a [`MotionFilter`] before they are delivered, which is
//! where pointer acceleration happens. A filter may rewrite both deltas, including to zero
//! (suppressing the event entirely); it cannot fail. Devices without a filter deliver deltas
//! unmodified.
//!
//! Deltas and velocities are expressed in device units per millisecond at the 400 dpi
//! reference resolution; accelerators built for devices with a different resolution scale
//! their velocity estimate accordingly.

use std::f64::consts::PI;

/// Reference resolution that motion deltas are normalized to.
pub const DEFAULT_POINTER_DPI: u32 = 400;

const NUM_POINTER_TRACKERS: usize = 16;
/// Samples older than this no longer contribute to the velocity estimate.
const MOTION_TIMEOUT_MS: u64 = 300;
/// Samples whose velocity deviates more than this from the newest are ignored (units/ms).
const MAX_VELOCITY_DIFF: f64 = 1.0;

const DEFAULT_THRESHOLD: f64 = 0.4; /* units/ms */
const DEFAULT_ACCELERATION: f64 = 2.0; /* unitless factor */

const UNDEFINED_DIRECTION: u8 = 0xff;

/// An unaccelerated motion vector, in units/ms at 400 dpi.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Motion {
    pub dx: f64,
    pub dy: f64,
}

impl Motion {
    #[inline]
    pub const fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

/// A pointer motion filter.
///
/// Implementations are free to keep per-device state between calls (the device owns its
/// filter exclusively).
pub trait MotionFilter {
    /// Rewrites `motion` in place. `time_ms` is the millisecond timestamp of the frame the
    /// motion belongs to.
    fn apply(&mut self, motion: &mut Motion, time_ms: u64);
}

/// Multiplies every delta by a constant speed factor.
#[derive(Debug)]
pub struct LinearFilter {
    speed: f64,
}

impl LinearFilter {
    pub fn new(speed: f64) -> Self {
        Self { speed }
    }
}

impl MotionFilter for LinearFilter {
    fn apply(&mut self, motion: &mut Motion, _time_ms: u64) {
        motion.dx *= self.speed;
        motion.dy *= self.speed;
    }
}

/// Tunable parameters handed to an [`AccelProfile`].
#[derive(Debug, Clone, Copy)]
pub struct AccelParams {
    /// Velocity (units/ms) below which motion is not accelerated.
    pub threshold: f64,
    /// Maximum acceleration factor.
    pub accel: f64,
}

impl Default for AccelParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            accel: DEFAULT_ACCELERATION,
        }
    }
}

/// Maps a velocity (units/ms at 400 dpi) to a unitless acceleration factor.
pub type AccelProfile = fn(&AccelParams, f64, u64) -> f64;

#[derive(Debug, Clone, Copy, Default)]
struct Tracker {
    dx: f64,
    dy: f64,
    time: u64,
    dir: u8,
}

/// The adaptive pointer accelerator.
///
/// Keeps a short ring of recent motion samples, derives a smoothed velocity estimate from
/// them, and scales the incoming delta by the factor the profile returns for that velocity.
#[derive(Debug)]
pub struct PointerAccelerator {
    profile: AccelProfile,
    params: AccelParams,
    last_velocity: f64, /* units/ms */
    trackers: [Tracker; NUM_POINTER_TRACKERS],
    cur_tracker: usize,
    dpi_factor: f64, /* 400 dpi : device resolution */
}

impl PointerAccelerator {
    pub fn new(profile: AccelProfile) -> Self {
        Self {
            profile,
            params: AccelParams::default(),
            last_velocity: 0.0,
            trackers: [Tracker::default(); NUM_POINTER_TRACKERS],
            cur_tracker: 0,
            dpi_factor: 1.0,
        }
    }

    /// Configures the device resolution the incoming deltas are expressed in.
    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi_factor = f64::from(DEFAULT_POINTER_DPI) / f64::from(dpi.max(1));
        self
    }

    fn feed(&mut self, motion: &Motion, time: u64) {
        for tracker in &mut self.trackers {
            tracker.dx += motion.dx;
            tracker.dy += motion.dy;
        }

        self.cur_tracker = (self.cur_tracker + 1) % NUM_POINTER_TRACKERS;
        self.trackers[self.cur_tracker] = Tracker {
            dx: 0.0,
            dy: 0.0,
            time,
            dir: vector_direction(motion.dx, motion.dy),
        };
    }

    fn tracker(&self, offset: usize) -> &Tracker {
        let index = (self.cur_tracker + NUM_POINTER_TRACKERS - offset) % NUM_POINTER_TRACKERS;
        &self.trackers[index]
    }

    /// Velocity of a single sample window, in units/ms.
    fn tracker_velocity(tracker: &Tracker, time: u64) -> f64 {
        let tdelta = (time - tracker.time + 1) as f64;
        tracker.dx.hypot(tracker.dy) / tdelta
    }

    /// Averages the velocity across recent samples, stopping at samples that are too old,
    /// moved in a different direction, or differ too much from the newest velocity.
    fn velocity(&self, time: u64) -> f64 {
        let mut result = 0.0;
        let mut initial_velocity = 0.0;
        let mut dir = self.tracker(0).dir;

        for offset in 1..NUM_POINTER_TRACKERS {
            let tracker = self.tracker(offset);

            // Timestamps running backwards means the trackers are stale.
            if tracker.time > time {
                break;
            }

            if time - tracker.time > MOTION_TIMEOUT_MS {
                if offset == 1 {
                    // The pointer was resting; derive the velocity of the first movement
                    // from the timeout window instead of the stale timestamp.
                    result = Self::tracker_velocity(tracker, tracker.time + MOTION_TIMEOUT_MS);
                }
                break;
            }

            let velocity = Self::tracker_velocity(tracker, time);

            dir &= tracker.dir;
            if dir == 0 {
                // Direction changed; the first sample after the change stands alone.
                if offset == 1 {
                    result = velocity;
                }
                break;
            }

            if initial_velocity == 0.0 {
                initial_velocity = velocity;
                result = velocity;
            } else {
                if (initial_velocity - velocity).abs() > MAX_VELOCITY_DIFF {
                    break;
                }
                result = velocity;
            }
        }

        result
    }

    /// Averages the profile output between the previous and current velocity (Simpson's
    /// rule) to smoothen out factor changes between frames.
    fn acceleration_factor(&self, velocity: f64, time: u64) -> f64 {
        let profile = self.profile;
        let mut factor = profile(&self.params, velocity, time);
        factor += profile(&self.params, self.last_velocity, time);
        factor += 4.0 * profile(&self.params, (self.last_velocity + velocity) / 2.0, time);
        factor / 6.0
    }
}

impl MotionFilter for PointerAccelerator {
    fn apply(&mut self, motion: &mut Motion, time_ms: u64) {
        self.feed(motion, time_ms);
        let velocity = self.velocity(time_ms) * self.dpi_factor;
        let factor = self.acceleration_factor(velocity, time_ms);

        motion.dx *= factor;
        motion.dy *= factor;

        self.last_velocity = velocity;
    }
}

/// Maps a motion vector to a bitmask of the octants it points into.
///
/// Small vectors are ambiguous and map to a wider mask, so that the direction comparison in
/// the velocity estimation doesn't cut off slow motion.
fn vector_direction(dx: f64, dy: f64) -> u8 {
    const N: u8 = 1 << 0;
    const NE: u8 = 1 << 1;
    const E: u8 = 1 << 2;
    const SE: u8 = 1 << 3;
    const S: u8 = 1 << 4;
    const SW: u8 = 1 << 5;
    const W: u8 = 1 << 6;
    const NW: u8 = 1 << 7;

    if dx.abs() < 2.0 && dy.abs() < 2.0 {
        if dx > 0.0 && dy > 0.0 {
            S | SE | E
        } else if dx > 0.0 && dy < 0.0 {
            N | NE | E
        } else if dx < 0.0 && dy > 0.0 {
            S | SW | W
        } else if dx < 0.0 && dy < 0.0 {
            N | NW | W
        } else if dx > 0.0 {
            NE | E | SE
        } else if dx < 0.0 {
            NW | W | SW
        } else if dy > 0.0 {
            SE | S | SW
        } else if dy < 0.0 {
            NE | N | NW
        } else {
            UNDEFINED_DIRECTION
        }
    } else {
        // Map the angle into [0, 8) with 0 pointing north, then mark the one or two
        // octants the vector is close to.
        let r = dy.atan2(dx);
        let r = (r + 2.5 * PI) % (2.0 * PI);
        let r = r * 4.0 / PI;

        let d1 = (r + 0.9) as u32 % 8;
        let d2 = (r + 0.1) as u32 % 8;

        (1 << d1) | (1 << d2)
    }
}

fn penumbral_gradient(x: f64) -> f64 {
    let x = x * 2.0 - 1.0;
    0.5 + (x * (1.0 - x * x).sqrt() + x.asin()) / PI
}

/// The "smooth simple" acceleration profile.
///
/// Three regions over the input velocity: a low-speed ramp that eases from standstill up to
/// the unaccelerated factor 1 (so slow motion stays precise), a linear region where the
/// factor grows with `velocity / threshold`, and a flat tail capped at the maximum
/// acceleration factor.
pub fn smooth_simple_profile(params: &AccelParams, velocity: f64, _time_ms: u64) -> f64 {
    let threshold = params.threshold.max(1.0);
    let accel = params.accel.max(1.0);

    if velocity < threshold / 2.0 {
        return penumbral_gradient(0.5 + velocity / threshold) * 2.0 - 1.0;
    }

    if velocity <= threshold {
        return 1.0;
    }

    let factor = velocity / threshold;
    factor.min(accel)
}
