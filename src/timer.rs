//! Arms and disarms the periodic interval timer that produces the timer
//! signal.
//!
//! A direct port of `software_interrupt_arm_timer`/`_disarm_timer`'s
//! `setitimer(ITIMER_REAL, ...)` calls, including the "set both fields to
//! zero to disarm" detail and the fatal-on-error policy — the original
//! calls `perror` then `exit(1)`; this logs at `error!` then aborts via
//! [`crate::errors::fatal_config`].

use crate::errors::ConfigError;

/// Configure the OS interval timer to fire once after one quantum and
/// thereafter every quantum. A no-op when preemption is globally disabled.
///
/// # Panics / aborts
/// A failing `setitimer` is a fatal configuration error (spec.md §7): this
/// logs and aborts the process rather than returning an error, matching
/// the original's `perror("setitimer"); exit(1);`.
pub fn arm(quantum_micros: u64, preemption_enabled: bool) {
    if !preemption_enabled {
        return;
    }

    let interval = libc::timeval {
        tv_sec: 0,
        tv_usec: quantum_micros as libc::suseconds_t,
    };
    let timer = libc::itimerval {
        it_interval: interval,
        it_value: interval,
    };

    set_itimer(&timer);
}

/// Set the interval and value both to zero, disarming the timer.
pub fn disarm() {
    let zero = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let timer = libc::itimerval {
        it_interval: zero,
        it_value: zero,
    };
    set_itimer(&timer);
}

fn set_itimer(timer: &libc::itimerval) {
    let rc = unsafe { libc::setitimer(libc::ITIMER_REAL, timer, std::ptr::null_mut()) };
    if rc != 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
        crate::errors::fatal_config(ConfigError::Syscall {
            call: "setitimer",
            errno,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_is_a_no_op_when_preemption_disabled() {
        // Nothing to assert on directly without racing the process's real
        // timer, but this must not panic or touch setitimer at all.
        arm(1_000, false);
    }

    #[test]
    fn arm_then_disarm_round_trips_without_aborting() {
        arm(50_000, true);
        disarm();
    }
}
