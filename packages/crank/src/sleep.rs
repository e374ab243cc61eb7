//! The loop's sleep/wake primitive.
//!
//! `prepare_to_sleep` publishes the intent to block, `sleep` blocks until
//! the intent is cancelled, and `wake` cancels it. Waking is the one
//! operation that is legal from any thread.
//!
//! On Linux the whole protocol is a futex on a single 32-bit flag; elsewhere
//! (and under Miri, which does not model the futex syscall) a mutex and
//! condition variable carry the same flag.

#[cfg(any(not(target_os = "linux"), miri))]
pub(crate) use condvar::Sleeper;
#[cfg(all(target_os = "linux", not(miri)))]
pub(crate) use futex::Sleeper;

#[cfg(all(target_os = "linux", not(miri)))]
mod futex {
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    pub(crate) struct Sleeper {
        prepared_to_sleep: AtomicU32,
    }

    impl Sleeper {
        pub(crate) fn new() -> Self {
            Self {
                prepared_to_sleep: AtomicU32::new(0),
            }
        }

        pub(crate) fn prepare_to_sleep(&self) {
            self.prepared_to_sleep.store(1, Ordering::Relaxed);
        }

        pub(crate) fn sleep(&self) {
            while self.prepared_to_sleep.load(Ordering::Relaxed) == 1 {
                // SAFETY: FUTEX_WAIT on our own flag word. Spurious wakeups
                // and EINTR are handled by re-checking the flag.
                unsafe {
                    libc::syscall(
                        libc::SYS_futex,
                        self.prepared_to_sleep.as_ptr(),
                        libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                        1_u32,
                        std::ptr::null::<libc::timespec>(),
                    );
                }
            }
        }

        pub(crate) fn wake(&self) {
            if self.prepared_to_sleep.swap(0, Ordering::Relaxed) == 1 {
                // The flag was set, so a sleep is prepared or in progress.
                // SAFETY: FUTEX_WAKE on our own flag word.
                unsafe {
                    libc::syscall(
                        libc::SYS_futex,
                        self.prepared_to_sleep.as_ptr(),
                        libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                        1_u32,
                    );
                }
            }
        }
    }
}

#[cfg(any(not(target_os = "linux"), miri))]
mod condvar {
    use parking_lot::{Condvar, Mutex};

    #[derive(Debug)]
    pub(crate) struct Sleeper {
        prepared_to_sleep: Mutex<bool>,
        wakeup: Condvar,
    }

    impl Sleeper {
        pub(crate) fn new() -> Self {
            Self {
                prepared_to_sleep: Mutex::new(false),
                wakeup: Condvar::new(),
            }
        }

        pub(crate) fn prepare_to_sleep(&self) {
            *self.prepared_to_sleep.lock() = true;
        }

        pub(crate) fn sleep(&self) {
            let mut prepared = self.prepared_to_sleep.lock();
            while *prepared {
                self.wakeup.wait(&mut prepared);
            }
        }

        pub(crate) fn wake(&self) {
            let mut prepared = self.prepared_to_sleep.lock();
            if *prepared {
                *prepared = false;
                self.wakeup.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn wake_before_sleep_cancels_the_nap() {
        let sleeper = Sleeper::new();
        sleeper.prepare_to_sleep();
        sleeper.wake();
        // The prepared sleep was cancelled, so this returns immediately.
        sleeper.sleep();
    }

    #[test]
    fn wake_without_prepare_is_a_no_op() {
        let sleeper = Sleeper::new();
        sleeper.wake();
    }

    #[test]
    fn cross_thread_wake_releases_sleeper() {
        let sleeper = Arc::new(Sleeper::new());
        sleeper.prepare_to_sleep();

        let remote = Arc::clone(&sleeper);
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.wake();
        });

        sleeper.sleep();
        waker.join().unwrap();
    }
}
