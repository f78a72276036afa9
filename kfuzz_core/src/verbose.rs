//! Verbose logging of generation and mutation decisions.
//!
//! The switch is per thread. Release builds compile `debug_info!` away entirely.

#[cfg(debug_assertions)]
thread_local! {
    static VERBOSE: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

/// Turn verbose logging on or off for the calling thread.
#[cfg(debug_assertions)]
pub fn set_verbose(verbose: bool) {
    VERBOSE.with(|v| v.set(verbose))
}

#[cfg(not(debug_assertions))]
#[inline(always)]
pub fn set_verbose(_verbose: bool) {}

#[cfg(debug_assertions)]
#[inline]
pub fn verbose_mode() -> bool {
    VERBOSE.with(|v| v.get())
}

#[cfg(not(debug_assertions))]
#[inline(always)]
pub fn verbose_mode() -> bool {
    false
}

#[cfg(debug_assertions)]
#[macro_export]
macro_rules! debug_info {
    ($($arg:tt)+) => {
        if $crate::verbose::verbose_mode() {
            log::info!(target: "kfuzz_core", $($arg)+)
        }
    };
}

#[cfg(not(debug_assertions))]
#[macro_export]
macro_rules! debug_info {
    ($($arg:tt)+) => {};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_is_per_thread() {
        set_verbose(true);
        assert_eq!(verbose_mode(), cfg!(debug_assertions));
        let other = std::thread::spawn(verbose_mode).join().unwrap();
        assert!(!other);
        set_verbose(false);
        assert!(!verbose_mode());
    }
}
