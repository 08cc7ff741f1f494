//! hooman - sort camera snapshots by whether they contain a person
//!
//! This library watches a directory for captured images, asks a remote
//! label-detection service whether each one shows a person, and moves it into
//! a `hoomans` or `nothing` directory. An optional schedule policy can discard
//! images before they are classified.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod logging;
pub mod output;
pub mod router;
pub mod scanner;
pub mod schedule;

pub use classifier::{
    ClassifyError, DetectError, HttpLabelDetector, ImageClassifier, Label, LabelDetector,
    PersonClassifier, RetryPolicy, Verdict,
};
pub use config::{Config, ConfigError};
pub use router::{Destination, Destinations, DirectoryRouter, RouteError};
pub use scanner::{CycleReport, ImageMatcher, ReadConflictPolicy, Scanner};
pub use schedule::{ActiveHours, AlwaysProcess, SchedulePolicy};

pub use cli::{Cli, run_cli};
