//! Schedule policies deciding whether an image is worth classifying.
//!
//! A policy sees only the file name. Returning `false` tells the scan loop to
//! delete the file without classifying it.
//!
//! # Examples
//!
//! ```
//! use hooman::schedule::{AlwaysProcess, SchedulePolicy};
//!
//! assert!(AlwaysProcess.should_process("snap.jpg"));
//!
//! let skip_thumbnails = |name: &str| !name.starts_with("thumb_");
//! assert!(!skip_thumbnails.should_process("thumb_snap.jpg"));
//! ```

use chrono::{Local, NaiveTime};
use std::fmt;

/// Decides, per file name, whether a file should be processed or discarded.
pub trait SchedulePolicy: Send + Sync {
    /// Returns true to process the file normally, false to discard it.
    fn should_process(&self, file_name: &str) -> bool;
}

impl<F> SchedulePolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn should_process(&self, file_name: &str) -> bool {
        self(file_name)
    }
}

/// Processes every file. Used when no schedule is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysProcess;

impl SchedulePolicy for AlwaysProcess {
    fn should_process(&self, _file_name: &str) -> bool {
        true
    }
}

/// Processes files only while the local time is inside a daily window.
///
/// The window is `[start, end)`. When `end` is earlier than `start` the window
/// wraps past midnight; when they are equal it covers the whole day.
pub struct ActiveHours {
    start: NaiveTime,
    end: NaiveTime,
    clock: Box<dyn Fn() -> NaiveTime + Send + Sync>,
}

impl ActiveHours {
    /// Creates a window checked against the local wall clock.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self::with_clock(start, end, || Local::now().time())
    }

    /// Creates a window checked against a custom clock.
    pub fn with_clock<C>(start: NaiveTime, end: NaiveTime, clock: C) -> Self
    where
        C: Fn() -> NaiveTime + Send + Sync + 'static,
    {
        Self {
            start,
            end,
            clock: Box::new(clock),
        }
    }

    /// Returns true if `time` falls inside the window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

impl SchedulePolicy for ActiveHours {
    fn should_process(&self, _file_name: &str) -> bool {
        self.contains((self.clock)())
    }
}

impl fmt::Debug for ActiveHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveHours")
            .field("start", &self.start)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}
