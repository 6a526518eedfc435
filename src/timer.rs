use std::time::{Duration, Instant};

/// Session clock with millisecond timestamps and platform-specific sleep.
///
/// Clones share the same start instant, so every component that holds a
/// copy reports times on one axis.
#[derive(Debug, Clone)]
pub struct HighPrecisionTimer {
    start_time: Instant,
    pub frame_times: Vec<Duration>,
    max_samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingInfo {
    pub samples: usize,
    pub average_frame_time: f64, // milliseconds
    pub jitter: f64,             // standard deviation in milliseconds
    pub min_frame_time: f64,     // milliseconds
    pub max_frame_time: f64,     // milliseconds
}

impl HighPrecisionTimer {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frame_times: Vec::with_capacity(64),
            max_samples: 1000,
        }
    }

    /// Milliseconds elapsed since the timer was created
    pub fn get_time(&self) -> f64 {
        self.ms_at(Instant::now())
    }

    /// Converts an instant captured elsewhere (e.g. an input event) to the
    /// timer's millisecond axis. Instants before the start map to 0.
    pub fn ms_at(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.start_time).as_secs_f64() * 1000.0
    }

    /// Blocks for `ms` milliseconds
    pub fn pause(&self, ms: u64) {
        self.high_precision_sleep(Duration::from_millis(ms));
    }

    /// Records frame duration to the frame_times buffer
    pub fn record_frame_time(&mut self, duration: Duration) {
        if self.frame_times.len() >= self.max_samples {
            self.frame_times.remove(0);
        }
        self.frame_times.push(duration);
    }

    /// Returns statistics computed from recorded frame durations
    pub fn get_info(&self) -> TimingInfo {
        if self.frame_times.is_empty() {
            return TimingInfo {
                samples: 0,
                average_frame_time: 0.0,
                jitter: 0.0,
                min_frame_time: 0.0,
                max_frame_time: 0.0,
            };
        }
        let times_ms: Vec<f64> = self
            .frame_times
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();

        let avg = times_ms.iter().sum::<f64>() / times_ms.len() as f64;
        let variance =
            times_ms.iter().map(|x| (*x - avg).powi(2)).sum::<f64>() / times_ms.len() as f64;
        let min_val = times_ms.iter().copied().fold(f64::INFINITY, f64::min);
        let max_val = times_ms.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        TimingInfo {
            samples: times_ms.len(),
            average_frame_time: avg,
            jitter: variance.sqrt(),
            min_frame_time: min_val,
            max_frame_time: max_val,
        }
    }

    /// High precision sleep (platform specific)
    pub fn high_precision_sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        #[cfg(all(feature = "high_precision_timer", target_os = "windows"))]
        self.windows_sleep(duration);
        #[cfg(all(feature = "high_precision_timer", target_os = "linux"))]
        self.linux_sleep(duration);
        #[cfg(all(feature = "high_precision_timer", target_os = "macos"))]
        self.macos_sleep(duration);
        #[cfg(not(all(
            feature = "high_precision_timer",
            any(target_os = "windows", target_os = "linux", target_os = "macos")
        )))]
        std::thread::sleep(duration);
    }

    #[cfg(all(feature = "high_precision_timer", target_os = "windows"))]
    fn windows_sleep(&self, duration: Duration) {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Threading::{
            CreateWaitableTimerW, SetWaitableTimer, WaitForSingleObject, INFINITE,
        };

        // negative due time = relative, in 100 ns intervals
        let due_time = -((duration.as_nanos() / 100) as i64);

        unsafe {
            let Ok(timer) = CreateWaitableTimerW(None, true, PCWSTR::null()) else {
                std::thread::sleep(duration);
                return;
            };
            if SetWaitableTimer(timer, &due_time, 0, None, None, false).is_ok() {
                WaitForSingleObject(timer, INFINITE);
            } else {
                std::thread::sleep(duration);
            }
            let _ = CloseHandle(timer);
        }
    }

    #[cfg(all(feature = "high_precision_timer", target_os = "linux"))]
    fn linux_sleep(&self, duration: Duration) {
        use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC, EINTR};

        let mut req = timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        };

        loop {
            let mut rem = timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            let rc = unsafe { clock_nanosleep(CLOCK_MONOTONIC, 0, &req, &mut rem) };
            if rc != EINTR {
                break;
            }
            req = rem;
        }
    }

    #[cfg(all(feature = "high_precision_timer", target_os = "macos"))]
    fn macos_sleep(&self, duration: Duration) {
        use mach2::mach_time::{mach_absolute_time, mach_timebase_info, mach_timebase_info_data_t};

        if duration.as_nanos() < 100_000 {
            unsafe {
                let start = mach_absolute_time();
                let mut timebase = mach_timebase_info_data_t { numer: 0, denom: 0 };
                mach_timebase_info(&mut timebase);

                let target_ticks =
                    duration.as_nanos() as u64 * timebase.denom as u64 / timebase.numer as u64;

                while mach_absolute_time() - start < target_ticks {
                    std::hint::spin_loop();
                }
            }
        } else {
            std::thread::sleep(duration);
        }
    }
}

impl Default for HighPrecisionTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_time_axis() {
        let timer = HighPrecisionTimer::new();
        let clone = timer.clone();
        let at = Instant::now();
        assert_eq!(timer.ms_at(at), clone.ms_at(at));
    }

    #[test]
    fn pause_blocks_at_least_requested_time() {
        let timer = HighPrecisionTimer::new();
        let before = timer.get_time();
        timer.pause(15);
        assert!(timer.get_time() - before >= 15.0);
    }

    #[test]
    fn frame_statistics() {
        let mut timer = HighPrecisionTimer::new();
        assert_eq!(timer.get_info().samples, 0);

        timer.record_frame_time(Duration::from_millis(10));
        timer.record_frame_time(Duration::from_millis(20));
        let info = timer.get_info();
        assert_eq!(info.samples, 2);
        assert!((info.average_frame_time - 15.0).abs() < 1e-9);
        assert!((info.jitter - 5.0).abs() < 1e-9);
        assert!((info.min_frame_time - 10.0).abs() < 1e-9);
        assert!((info.max_frame_time - 20.0).abs() < 1e-9);
    }

    #[test]
    fn frame_buffer_is_bounded() {
        let mut timer = HighPrecisionTimer::new();
        for _ in 0..1005 {
            timer.record_frame_time(Duration::from_millis(1));
        }
        assert_eq!(timer.frame_times.len(), 1000);
    }
}
