use std::mem::MaybeUninit;

/// Reads the monotonic clock, in milliseconds.
///
/// Event timestamps use the same clock once the decoder has been switched to
/// `CLOCK_MONOTONIC`, so values from here can stand in for event times (synthesized key
/// releases on device removal).
pub(crate) fn monotonic_time_ms() -> u64 {
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, ts.as_mut_ptr()) };
    if ret != 0 {
        // clock_gettime(CLOCK_MONOTONIC) only fails for invalid arguments.
        log::error!(
            "clock_gettime: {}",
            std::io::Error::last_os_error()
        );
        return 0;
    }
    let ts = unsafe { ts.assume_init() };
    ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000
}
