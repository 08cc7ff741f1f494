//! The scan loop.
//!
//! Each cycle walks the watch directory, and for every matching image:
//! 1. Asks the schedule policy whether to process it (no: delete it)
//! 2. Leaves it in place if a destination already holds that name
//! 3. Classifies it (hard failure: leave it for the next cycle)
//! 4. Moves it to the positive or negative directory
//!
//! A failure on one file never stops the others. [`Scanner::run_cycle`] does a
//! single pass and [`Scanner::run`] repeats it forever with a fixed delay.

use crate::classifier::{ImageClassifier, Verdict};
use crate::router::{Destination, Destinations, DirectoryRouter, RouteError};
use crate::schedule::{AlwaysProcess, SchedulePolicy};
use glob::Pattern;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Decides which files in the watch directory are images to process.
#[derive(Debug, Clone)]
pub enum ImageMatcher {
    /// The file name contains this text anywhere (case-sensitive).
    ///
    /// `backup.jpg.bak` and `jpgsomething.png` both match `jpg`.
    Substring(String),
    /// The file extension equals this text (case-insensitive).
    Extension(String),
    /// The file name matches this glob.
    Glob(Pattern),
}

impl Default for ImageMatcher {
    fn default() -> Self {
        ImageMatcher::Substring("jpg".to_string())
    }
}

impl ImageMatcher {
    /// Returns true if a file called `file_name` should be processed.
    ///
    /// # Examples
    ///
    /// ```
    /// use hooman::scanner::ImageMatcher;
    ///
    /// let loose = ImageMatcher::default();
    /// assert!(loose.matches("backup.jpg.bak"));
    ///
    /// let strict = ImageMatcher::Extension("jpg".to_string());
    /// assert!(strict.matches("SNAP.JPG"));
    /// assert!(!strict.matches("backup.jpg.bak"));
    /// ```
    pub fn matches(&self, file_name: &str) -> bool {
        match self {
            ImageMatcher::Substring(marker) => file_name.contains(marker.as_str()),
            ImageMatcher::Extension(ext) => Path::new(file_name)
                .extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext)),
            ImageMatcher::Glob(pattern) => pattern.matches(file_name),
        }
    }
}

/// How to route an image that could not be read because it is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadConflictPolicy {
    /// Treat it as "nothing detected" and move it to the negative directory.
    #[default]
    RouteNegative,
    /// Leave it in the watch directory so the next cycle tries again.
    Retry,
}

/// What happened during one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Files moved to the positive directory.
    pub positive: Vec<PathBuf>,
    /// Files moved to the negative directory.
    pub negative: Vec<PathBuf>,
    /// Files deleted by the schedule policy.
    pub discarded: Vec<PathBuf>,
    /// Files left in place because they were still being written.
    pub deferred: Vec<PathBuf>,
    /// Files left in place because classification failed.
    pub classify_failures: Vec<(PathBuf, String)>,
    /// Files whose move or delete failed.
    pub route_failures: Vec<(PathBuf, String)>,
}

impl CycleReport {
    /// Total number of matched files seen this cycle.
    pub fn total_seen(&self) -> usize {
        self.positive.len()
            + self.negative.len()
            + self.discarded.len()
            + self.deferred.len()
            + self.classify_failures.len()
            + self.route_failures.len()
    }

    /// Returns true if no file failed this cycle.
    pub fn is_clean(&self) -> bool {
        self.classify_failures.is_empty() && self.route_failures.is_empty()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files: {} hoomans, {} nothing, {} discarded, {} deferred, {} failed",
            self.total_seen(),
            self.positive.len(),
            self.negative.len(),
            self.discarded.len(),
            self.deferred.len(),
            self.classify_failures.len() + self.route_failures.len()
        )
    }
}

/// Watches one directory and routes its images.
pub struct Scanner {
    watch_dir: PathBuf,
    destinations: Destinations,
    classifier: Box<dyn ImageClassifier>,
    schedule: Box<dyn SchedulePolicy>,
    matcher: ImageMatcher,
    read_conflict: ReadConflictPolicy,
    interval: Duration,
}

impl Scanner {
    /// Creates a scanner with the default matcher, schedule and interval.
    pub fn new(
        watch_dir: impl Into<PathBuf>,
        destinations: Destinations,
        classifier: Box<dyn ImageClassifier>,
    ) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            destinations,
            classifier,
            schedule: Box::new(AlwaysProcess),
            matcher: ImageMatcher::default(),
            read_conflict: ReadConflictPolicy::default(),
            interval: Duration::from_secs(30),
        }
    }

    pub fn with_schedule(mut self, schedule: Box<dyn SchedulePolicy>) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_matcher(mut self, matcher: ImageMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_read_conflict(mut self, policy: ReadConflictPolicy) -> Self {
        self.read_conflict = policy;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The directory being watched.
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Lists matching files under the watch directory, recursively.
    ///
    /// Files already inside a destination directory are skipped, so a
    /// processed root nested in the watch directory is never re-scanned.
    /// Symlinks to files are listed and later moved as links; links to
    /// directories are not descended into.
    pub fn enumerate(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.watch_dir)
            .into_iter()
            .filter_entry(|entry| !self.destinations.contains(entry.path()))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| {
                entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file())
            })
            .filter(|entry| self.matcher.matches(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        files
    }

    /// Processes every matching file once.
    pub fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        for file in self.enumerate() {
            self.process_file(&file, &mut report);
        }
        report
    }

    /// Runs cycles forever, sleeping the configured interval between them.
    pub fn run(&self) -> ! {
        info!(
            "Watching {} every {}s",
            self.watch_dir.display(),
            self.interval.as_secs()
        );
        loop {
            let report = self.run_cycle();
            if report.total_seen() == 0 {
                debug!("Cycle complete: no images");
            } else if report.is_clean() {
                info!("Cycle complete: {}", report);
            } else {
                warn!("Cycle complete: {}", report);
            }
            thread::sleep(self.interval);
        }
    }

    fn process_file(&self, file: &Path, report: &mut CycleReport) {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !self.schedule.should_process(&file_name) {
            match DirectoryRouter::discard(file) {
                Ok(()) => {
                    debug!("Discarded {} outside schedule", file.display());
                    report.discarded.push(file.to_path_buf());
                }
                Err(e) => {
                    error!("{}", e);
                    report.route_failures.push((file.to_path_buf(), e.to_string()));
                }
            }
            return;
        }

        // The move would fail; do not pay for a detection call.
        if let Some(existing) = file
            .file_name()
            .and_then(|name| self.destinations.occupied(name))
        {
            let e = RouteError::DestinationExists {
                source: file.to_path_buf(),
                destination: existing,
            };
            error!("{}; not sending it for detection", e);
            report.route_failures.push((file.to_path_buf(), e.to_string()));
            return;
        }

        let verdict = match self.classifier.classify(file) {
            Ok(verdict) => verdict,
            Err(e) => {
                error!("{}; leaving it for the next cycle", e);
                report
                    .classify_failures
                    .push((file.to_path_buf(), e.to_string()));
                return;
            }
        };

        let destination = match verdict {
            Verdict::Person { .. } => Destination::Positive,
            Verdict::Nothing => Destination::Negative,
            Verdict::ReadConflict => match self.read_conflict {
                ReadConflictPolicy::RouteNegative => Destination::Negative,
                ReadConflictPolicy::Retry => {
                    debug!("Deferring {} until the next cycle", file.display());
                    report.deferred.push(file.to_path_buf());
                    return;
                }
            },
        };

        match DirectoryRouter::place(file, self.destinations.path(destination)) {
            Ok(moved) => {
                debug!("Moved {} to {}", file.display(), moved.display());
                match destination {
                    Destination::Positive => report.positive.push(moved),
                    Destination::Negative => report.negative.push(moved),
                }
            }
            Err(e) => {
                error!("{}", e);
                report.route_failures.push((file.to_path_buf(), e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifyError, ClassifyResult, DetectError};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, Destinations) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let watch = temp_dir.path().join("watch");
        fs::create_dir(&watch).expect("Failed to create watch dir");
        let destinations =
            Destinations::create(&temp_dir.path().join("processed")).expect("destinations");
        (temp_dir, watch, destinations)
    }

    fn verdict_by_name(path: &Path) -> ClassifyResult<Verdict> {
        let name = path.file_name().unwrap().to_string_lossy();
        if name.starts_with("person") {
            Ok(Verdict::Person {
                label: "Person".to_string(),
                confidence: 99.0,
            })
        } else if name.starts_with("busy") {
            Ok(Verdict::ReadConflict)
        } else if name.starts_with("broken") {
            Err(ClassifyError::Detect {
                path: path.to_path_buf(),
                source: DetectError::Transport("down".into()),
            })
        } else {
            Ok(Verdict::Nothing)
        }
    }

    #[test]
    fn test_matcher_substring_is_loose() {
        let matcher = ImageMatcher::default();
        assert!(matcher.matches("a.jpg"));
        assert!(matcher.matches("jpgsomething.png"));
        assert!(matcher.matches("backup.jpg.bak"));
        assert!(!matcher.matches("a.JPG"));
        assert!(!matcher.matches("a.png"));
    }

    #[test]
    fn test_matcher_extension_is_strict() {
        let matcher = ImageMatcher::Extension("jpg".to_string());
        assert!(matcher.matches("a.jpg"));
        assert!(matcher.matches("a.JPG"));
        assert!(!matcher.matches("backup.jpg.bak"));
        assert!(!matcher.matches("jpg"));
    }

    #[test]
    fn test_matcher_glob() {
        let matcher = ImageMatcher::Glob(Pattern::new("cam-*.jp*g").unwrap());
        assert!(matcher.matches("cam-01.jpeg"));
        assert!(!matcher.matches("other.jpg"));
    }

    #[test]
    fn test_enumerate_is_recursive_and_filtered() {
        let (_tmp, watch, destinations) = setup();
        fs::create_dir_all(watch.join("2024").join("06")).unwrap();
        fs::write(watch.join("a.jpg"), b"x").unwrap();
        fs::write(watch.join("2024").join("06").join("b.jpg"), b"x").unwrap();
        fs::write(watch.join("notes.txt"), b"x").unwrap();

        let scanner = Scanner::new(&watch, destinations, Box::new(verdict_by_name));
        let files = scanner.enumerate();

        assert_eq!(
            files,
            vec![watch.join("2024").join("06").join("b.jpg"), watch.join("a.jpg")]
        );
    }

    #[test]
    fn test_enumerate_skips_nested_destinations() {
        let temp_dir = TempDir::new().unwrap();
        let watch = temp_dir.path().to_path_buf();
        let destinations = Destinations::create(&watch.join("processed")).unwrap();
        fs::write(watch.join("processed").join("hoomans").join("old.jpg"), b"x").unwrap();
        fs::write(watch.join("new.jpg"), b"x").unwrap();

        let scanner = Scanner::new(&watch, destinations, Box::new(verdict_by_name));

        assert_eq!(scanner.enumerate(), vec![watch.join("new.jpg")]);
    }

    #[test]
    fn test_cycle_routes_by_verdict() {
        let (_tmp, watch, destinations) = setup();
        fs::write(watch.join("person-a.jpg"), b"x").unwrap();
        fs::write(watch.join("b.jpg"), b"x").unwrap();
        let positive = destinations.path(Destination::Positive).to_path_buf();
        let negative = destinations.path(Destination::Negative).to_path_buf();

        let scanner = Scanner::new(&watch, destinations, Box::new(verdict_by_name));
        let report = scanner.run_cycle();

        assert!(positive.join("person-a.jpg").exists());
        assert!(negative.join("b.jpg").exists());
        assert_eq!(report.positive.len(), 1);
        assert_eq!(report.negative.len(), 1);
        assert!(report.is_clean());
        assert!(scanner.enumerate().is_empty());
    }

    #[test]
    fn test_schedule_rejection_discards_without_classifying() {
        let (_tmp, watch, destinations) = setup();
        fs::write(watch.join("person-c.jpg"), b"x").unwrap();
        let positive = destinations.path(Destination::Positive).to_path_buf();

        let classifier = |_: &Path| -> ClassifyResult<Verdict> {
            panic!("classifier must not be called for discarded files")
        };
        let scanner = Scanner::new(&watch, destinations, Box::new(classifier))
            .with_schedule(Box::new(|_: &str| false));
        let report = scanner.run_cycle();

        assert!(!watch.join("person-c.jpg").exists());
        assert!(!positive.join("person-c.jpg").exists());
        assert_eq!(report.discarded.len(), 1);
    }

    #[test]
    fn test_classify_failure_leaves_file_in_place() {
        let (_tmp, watch, destinations) = setup();
        fs::write(watch.join("broken.jpg"), b"x").unwrap();
        fs::write(watch.join("ok.jpg"), b"x").unwrap();

        let scanner = Scanner::new(&watch, destinations, Box::new(verdict_by_name));
        let report = scanner.run_cycle();

        assert!(watch.join("broken.jpg").exists());
        assert!(!watch.join("ok.jpg").exists());
        assert_eq!(report.classify_failures.len(), 1);
        assert_eq!(report.negative.len(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_read_conflict_routes_negative_by_default() {
        let (_tmp, watch, destinations) = setup();
        fs::write(watch.join("busy.jpg"), b"x").unwrap();
        let negative = destinations.path(Destination::Negative).to_path_buf();

        let scanner = Scanner::new(&watch, destinations, Box::new(verdict_by_name));
        scanner.run_cycle();

        assert!(negative.join("busy.jpg").exists());
    }

    #[test]
    fn test_read_conflict_retry_keeps_file() {
        let (_tmp, watch, destinations) = setup();
        fs::write(watch.join("busy.jpg"), b"x").unwrap();

        let scanner = Scanner::new(&watch, destinations, Box::new(verdict_by_name))
            .with_read_conflict(ReadConflictPolicy::Retry);
        let report = scanner.run_cycle();

        assert!(watch.join("busy.jpg").exists());
        assert_eq!(report.deferred, vec![watch.join("busy.jpg")]);
    }

    #[test]
    fn test_route_failure_does_not_stop_cycle() {
        let (_tmp, watch, destinations) = setup();
        let negative = destinations.path(Destination::Negative).to_path_buf();
        fs::write(negative.join("a.jpg"), b"already here").unwrap();
        fs::write(watch.join("a.jpg"), b"x").unwrap();
        fs::write(watch.join("b.jpg"), b"x").unwrap();

        let scanner = Scanner::new(&watch, destinations, Box::new(verdict_by_name));
        let report = scanner.run_cycle();

        assert_eq!(report.route_failures.len(), 1);
        assert!(watch.join("a.jpg").exists());
        assert!(negative.join("b.jpg").exists());
    }

    #[test]
    fn test_name_clash_skips_classification() {
        let (_tmp, watch, destinations) = setup();
        let positive = destinations.path(Destination::Positive).to_path_buf();
        fs::write(positive.join("person-x.jpg"), b"already here").unwrap();
        fs::write(watch.join("person-x.jpg"), b"x").unwrap();

        let classifier = |_: &Path| -> ClassifyResult<Verdict> {
            panic!("classifier must not be called for a clashing name")
        };
        let scanner = Scanner::new(&watch, destinations, Box::new(classifier));
        let first = scanner.run_cycle();
        let second = scanner.run_cycle();

        assert!(watch.join("person-x.jpg").exists());
        assert_eq!(fs::read(positive.join("person-x.jpg")).unwrap(), b"already here");
        assert_eq!(first.route_failures.len(), 1);
        assert!(first.route_failures[0].1.contains("already exists"));
        assert_eq!(second.route_failures.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_image_is_routed_as_link() {
        let (tmp, watch, destinations) = setup();
        let target = tmp.path().join("elsewhere.jpg");
        fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, watch.join("link.jpg")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("missing.jpg"), watch.join("dangling.jpg"))
            .unwrap();
        let negative = destinations.path(Destination::Negative).to_path_buf();

        let scanner = Scanner::new(&watch, destinations, Box::new(verdict_by_name));
        assert_eq!(scanner.enumerate(), vec![watch.join("link.jpg")]);
        let report = scanner.run_cycle();

        assert_eq!(report.negative, vec![negative.join("link.jpg")]);
        assert!(fs::symlink_metadata(watch.join("link.jpg")).is_err());
        assert!(
            fs::symlink_metadata(negative.join("link.jpg"))
                .unwrap()
                .file_type()
                .is_symlink()
        );
        assert!(target.exists());
    }

    #[test]
    fn test_read_conflict_policy_names() {
        let policy: ReadConflictPolicy = serde_json::from_str("\"retry\"").unwrap();
        assert_eq!(policy, ReadConflictPolicy::Retry);
        let policy: ReadConflictPolicy = serde_json::from_str("\"route_negative\"").unwrap();
        assert_eq!(policy, ReadConflictPolicy::RouteNegative);
    }

    #[test]
    fn test_empty_watch_directory_is_noop() {
        let (_tmp, watch, destinations) = setup();
        let scanner = Scanner::new(&watch, destinations, Box::new(verdict_by_name));

        let first = scanner.run_cycle();
        let second = scanner.run_cycle();

        assert_eq!(first.total_seen(), 0);
        assert_eq!(second.total_seen(), 0);
    }

    #[test]
    fn test_report_display() {
        let report = CycleReport {
            positive: vec![PathBuf::from("a.jpg")],
            negative: vec![PathBuf::from("b.jpg"), PathBuf::from("c.jpg")],
            ..CycleReport::default()
        };
        assert_eq!(
            report.to_string(),
            "3 files: 1 hoomans, 2 nothing, 0 discarded, 0 deferred, 0 failed"
        );
    }
}
