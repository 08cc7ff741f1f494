//! Command-line interface module for hooman.
//!
//! This module handles:
//! - Argument parsing
//! - Loading configuration and starting logging
//! - Wiring the classifier, schedule and router into a [`Scanner`]

use crate::classifier::{HttpLabelDetector, PersonClassifier};
use crate::config::Config;
use crate::logging::{self, LogLevel};
use crate::output::OutputFormatter;
use crate::router::{Destination, Destinations};
use crate::scanner::Scanner;
use crate::schedule::{ActiveHours, AlwaysProcess, SchedulePolicy};
use clap::Parser;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Sort camera snapshots into `hoomans` and `nothing`.
#[derive(Debug, Clone, Parser)]
#[command(name = "hooman", version, about)]
pub struct Cli {
    /// Path to image directory
    #[arg(short = 'i', long = "images", value_name = "DIR")]
    pub images: PathBuf,

    /// Path to processed image directory
    #[arg(
        short = 'p',
        long = "processed_images",
        visible_alias = "processed-images",
        value_name = "DIR"
    )]
    pub processed_images: PathBuf,

    /// Logging level
    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

/// Runs the watcher until the process is killed.
///
/// Only startup failures return: invalid configuration, an unusable log
/// directory, or destination directories that cannot be created.
pub fn run_cli(cli: Cli) -> Result<Infallible, String> {
    let config = Config::load(None).map_err(|e| format!("Error loading configuration: {}", e))?;

    let _log_guard = logging::init_logging(cli.log_level, config.logging.directory.as_deref())
        .map_err(|e| format!("Error starting logging: {}", e))?;

    let scanner = build_scanner(&cli, &config)?;
    print_banner(&cli, &config);

    if !scanner.watch_dir().is_dir() {
        warn!(
            "Watch directory {} does not exist yet",
            scanner.watch_dir().display()
        );
    }
    info!("hooman started");

    scanner.run()
}

/// Builds a scanner from parsed arguments and configuration.
///
/// Creates the processed root and both destination directories.
pub fn build_scanner(cli: &Cli, config: &Config) -> Result<Scanner, String> {
    let processed_root = absolute(&cli.processed_images);
    let destinations = Destinations::create(&processed_root)
        .map_err(|e| format!("Error preparing destination directories: {}", e))?;

    let classifier_config = &config.classifier;
    let detector = HttpLabelDetector::new(
        classifier_config.endpoint.clone(),
        classifier_config.api_key(),
        Duration::from_secs(classifier_config.timeout_secs),
        classifier_config.retry_policy(),
    )
    .map_err(|e| format!("Error creating detection client: {}", e))?;
    let classifier = PersonClassifier::new(detector)
        .with_max_labels(classifier_config.max_labels)
        .with_min_confidence(classifier_config.min_confidence)
        .with_person_labels(classifier_config.person_labels.iter().cloned());

    let schedule: Box<dyn SchedulePolicy> = match &config.schedule.active_hours {
        Some(hours) => {
            let (start, end) = hours
                .bounds()
                .map_err(|e| format!("Error in schedule: {}", e))?;
            Box::new(ActiveHours::new(start, end))
        }
        None => Box::new(AlwaysProcess),
    };

    let matcher = config
        .matcher()
        .map_err(|e| format!("Error in scan settings: {}", e))?;

    Ok(
        Scanner::new(absolute(&cli.images), destinations, Box::new(classifier))
            .with_schedule(schedule)
            .with_matcher(matcher)
            .with_read_conflict(config.scan.read_conflict)
            .with_interval(config.interval()),
    )
}

fn print_banner(cli: &Cli, config: &Config) {
    let processed_root = absolute(&cli.processed_images);
    OutputFormatter::header("hooman");
    OutputFormatter::field("Watching", &absolute(&cli.images).display().to_string());
    OutputFormatter::field(
        "People",
        &processed_root
            .join(Destination::Positive.dir_name())
            .display()
            .to_string(),
    );
    OutputFormatter::field(
        "Nothing",
        &processed_root
            .join(Destination::Negative.dir_name())
            .display()
            .to_string(),
    );
    OutputFormatter::field("Detector", &config.classifier.endpoint);
    OutputFormatter::field("Interval", &format!("{}s", config.scan.interval_secs));
    if config.classifier.api_key().is_none() {
        OutputFormatter::warning("No detection API key set; requests are unauthenticated");
    }
}

/// Makes `path` absolute without requiring it to exist.
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
