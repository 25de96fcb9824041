use std::fmt::Debug;
use std::fmt::Error;
use std::fmt::Formatter;
use std::ops::{Add, AddAssign, Deref};
use std::time::Duration;
use std::time::Instant;

#[derive(Clone, Copy, Debug)]
pub struct GbTimer {
    instant: Instant,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct GbDuration {
    duration: Duration,
}

impl GbTimer {
    pub fn now() -> Self {
        Self { instant: Instant::now() }
    }

    pub fn elapsed(&self) -> GbDuration {
        GbDuration { duration: self.instant.elapsed() }
    }
}

impl GbDuration {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn to_millis_string(&self) -> String {
        const MICRO_PER_MILLI: u128 = 1_000;
        format!(
            "{}.{:03} ms",
            self.duration.as_micros() / MICRO_PER_MILLI,
            self.duration.as_micros() % MICRO_PER_MILLI
        )
    }

    pub fn to_seconds_string(&self) -> String {
        format!("{}.{:06} s", self.duration.as_secs(), self.duration.subsec_micros())
    }

    /// Items per second over this duration, zero for an empty duration.
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&self, count: u64) -> f64 {
        let seconds = self.duration.as_secs_f64();
        if seconds > 0.0 {
            count as f64 / seconds
        } else {
            0.0
        }
    }
}

impl Debug for GbDuration {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        write!(f, "{:?}", self.duration)
    }
}

impl Deref for GbDuration {
    type Target = Duration;

    fn deref(&self) -> &Self::Target {
        &self.duration
    }
}

impl Add for GbDuration {
    type Output = GbDuration;

    fn add(mut self, rhs: Self) -> Self::Output {
        self.duration += rhs.duration;
        self
    }
}

impl AddAssign for GbDuration {
    fn add_assign(&mut self, rhs: Self) {
        self.duration += rhs.duration;
    }
}

#[cfg(test)]
mod tests {
    use crate::util::timer::GbDuration;
    use std::time::Duration;

    #[test]
    fn string_format() {
        let inputs = vec![
            (0, 7_106_780, "0.007106 s", "7.106 ms"),
            (152, 628_093_000, "152.628093 s", "152628.093 ms"),
        ];
        for (sec, nano, sec_str, milli_str) in inputs {
            let duration = GbDuration::new(Duration::new(sec, nano));
            assert_eq!(duration.to_seconds_string(), sec_str);
            assert_eq!(duration.to_millis_string(), milli_str);
        }
    }

    #[test]
    fn rates() {
        assert!((GbDuration::new(Duration::from_secs(4)).rate(1_000) - 250.0).abs() < 1e-9);
        assert!(GbDuration::default().rate(10).abs() < 1e-9);
    }
}
