/// Placement of processed images into their destination directories.
///
/// This module owns the file-system side of routing: creating the two
/// destination directories, moving a classified image into one of them while
/// keeping its base name, and deleting images rejected by the schedule.
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the directory receiving images in which a person was detected.
pub const POSITIVE_DIR_NAME: &str = "hoomans";
/// Name of the directory receiving every other processed image.
pub const NEGATIVE_DIR_NAME: &str = "nothing";

/// Where a classified image should end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A person was detected.
    Positive,
    /// Nothing of interest was detected.
    Negative,
}

impl Destination {
    /// Returns the directory name for this destination.
    ///
    /// # Examples
    ///
    /// ```
    /// use hooman::router::Destination;
    ///
    /// assert_eq!(Destination::Positive.dir_name(), "hoomans");
    /// assert_eq!(Destination::Negative.dir_name(), "nothing");
    /// ```
    pub fn dir_name(&self) -> &'static str {
        match self {
            Destination::Positive => POSITIVE_DIR_NAME,
            Destination::Negative => NEGATIVE_DIR_NAME,
        }
    }
}

/// Errors that can occur while placing or discarding a file.
#[derive(Debug)]
pub enum RouteError {
    /// Failed to create a destination directory.
    DirectoryCreationFailed { path: PathBuf, source: io::Error },
    /// A file with the same name is already present at the destination.
    DestinationExists { source: PathBuf, destination: PathBuf },
    /// The path has no file name component to preserve.
    MissingFileName { path: PathBuf },
    /// Failed to move a file to its destination directory.
    FileMoveFailure {
        source: PathBuf,
        destination: PathBuf,
        source_error: io::Error,
    },
    /// Failed to delete a discarded file.
    DiscardFailed { path: PathBuf, source: io::Error },
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectoryCreationFailed { path, source } => {
                write!(
                    f,
                    "Failed to create directory {}: {}",
                    path.display(),
                    source
                )
            }
            Self::DestinationExists {
                source,
                destination,
            } => {
                write!(
                    f,
                    "Cannot move {}: {} already exists",
                    source.display(),
                    destination.display()
                )
            }
            Self::MissingFileName { path } => {
                write!(f, "Path {} has no file name", path.display())
            }
            Self::FileMoveFailure {
                source,
                destination,
                source_error,
            } => {
                write!(
                    f,
                    "Failed to move {} to {}: {}",
                    source.display(),
                    destination.display(),
                    source_error
                )
            }
            Self::DiscardFailed { path, source } => {
                write!(f, "Failed to delete {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for RouteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DirectoryCreationFailed { source, .. } => Some(source),
            Self::FileMoveFailure { source_error, .. } => Some(source_error),
            Self::DiscardFailed { source, .. } => Some(source),
            Self::DestinationExists { .. } | Self::MissingFileName { .. } => None,
        }
    }
}

/// Result type for routing operations.
pub type RouteResult<T> = Result<T, RouteError>;

/// The pair of destination directories under a processed-images root.
#[derive(Debug, Clone)]
pub struct Destinations {
    positive: PathBuf,
    negative: PathBuf,
}

impl Destinations {
    /// Creates the processed root and both destination directories.
    ///
    /// Safe to call against a root that already exists.
    pub fn create(processed_root: &Path) -> RouteResult<Self> {
        DirectoryRouter::ensure(processed_root)?;
        let destinations = Self {
            positive: processed_root.join(POSITIVE_DIR_NAME),
            negative: processed_root.join(NEGATIVE_DIR_NAME),
        };
        DirectoryRouter::ensure(&destinations.positive)?;
        DirectoryRouter::ensure(&destinations.negative)?;
        Ok(destinations)
    }

    /// Returns the directory for a destination.
    pub fn path(&self, destination: Destination) -> &Path {
        match destination {
            Destination::Positive => &self.positive,
            Destination::Negative => &self.negative,
        }
    }

    /// Returns true if `path` lies inside either destination directory.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.positive) || path.starts_with(&self.negative)
    }

    /// Returns an existing entry named `file_name` in either destination.
    pub fn occupied(&self, file_name: &OsStr) -> Option<PathBuf> {
        [&self.positive, &self.negative]
            .into_iter()
            .map(|dir| dir.join(file_name))
            .find(|candidate| candidate.exists())
    }
}

/// Moves and deletes files on behalf of the scan loop.
pub struct DirectoryRouter;

impl DirectoryRouter {
    /// Creates `dir` and any missing parents. No-op if it already exists.
    pub fn ensure(dir: &Path) -> RouteResult<()> {
        fs::create_dir_all(dir).map_err(|e| RouteError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: e,
        })
    }

    /// Moves `file_path` into `destination_dir`, keeping its base name.
    ///
    /// An existing file with the same name is never overwritten. On the same
    /// file system this is a single rename. Across devices the content is
    /// first copied to a hidden temporary name next to the final one and then
    /// renamed into place, so the final name only ever refers to a complete
    /// file; the source is removed last.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hooman::router::DirectoryRouter;
    /// use std::path::Path;
    ///
    /// let moved = DirectoryRouter::place(
    ///     Path::new("/srv/camera/snap-0001.jpg"),
    ///     Path::new("/srv/processed/hoomans"),
    /// );
    /// match moved {
    ///     Ok(path) => println!("now at {}", path.display()),
    ///     Err(e) => eprintln!("{}", e),
    /// }
    /// ```
    pub fn place(file_path: &Path, destination_dir: &Path) -> RouteResult<PathBuf> {
        let file_name = file_path
            .file_name()
            .ok_or_else(|| RouteError::MissingFileName {
                path: file_path.to_path_buf(),
            })?;

        let destination_path = destination_dir.join(file_name);

        if destination_path.exists() {
            return Err(RouteError::DestinationExists {
                source: file_path.to_path_buf(),
                destination: destination_path,
            });
        }

        match fs::rename(file_path, &destination_path) {
            Ok(()) => Ok(destination_path),
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                Self::copy_then_remove(file_path, &destination_path)?;
                Ok(destination_path)
            }
            Err(e) => Err(RouteError::FileMoveFailure {
                source: file_path.to_path_buf(),
                destination: destination_path,
                source_error: e,
            }),
        }
    }

    /// Permanently deletes `file_path`.
    pub fn discard(file_path: &Path) -> RouteResult<()> {
        fs::remove_file(file_path).map_err(|e| RouteError::DiscardFailed {
            path: file_path.to_path_buf(),
            source: e,
        })
    }

    fn copy_then_remove(file_path: &Path, destination_path: &Path) -> RouteResult<()> {
        let staging_path = Self::staging_path(destination_path);
        let move_failure = |e: io::Error| RouteError::FileMoveFailure {
            source: file_path.to_path_buf(),
            destination: destination_path.to_path_buf(),
            source_error: e,
        };

        if let Err(e) = fs::copy(file_path, &staging_path) {
            let _ = fs::remove_file(&staging_path);
            return Err(move_failure(e));
        }
        if let Err(e) = fs::rename(&staging_path, destination_path) {
            let _ = fs::remove_file(&staging_path);
            return Err(move_failure(e));
        }
        if let Err(e) = fs::remove_file(file_path) {
            // Keep exactly one copy: roll the destination back.
            let _ = fs::remove_file(destination_path);
            return Err(move_failure(e));
        }
        Ok(())
    }

    /// `dir/name.jpg` becomes `dir/.name.jpg.partial`.
    fn staging_path(destination_path: &Path) -> PathBuf {
        let name = destination_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging_name = format!(".{}.partial", name);
        match destination_path.parent() {
            Some(parent) => parent.join(staging_name),
            None => PathBuf::from(staging_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_creates_nested_directories() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested = temp_dir.path().join("a").join("b").join("c");

        DirectoryRouter::ensure(&nested).expect("Failed to ensure directory");
        assert!(nested.is_dir());

        // Second call is a no-op
        DirectoryRouter::ensure(&nested).expect("Second ensure should succeed");
        assert!(nested.is_dir());
    }

    #[test]
    fn test_destinations_create_layout() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("processed");

        let destinations = Destinations::create(&root).expect("Failed to create destinations");

        assert!(root.join("hoomans").is_dir());
        assert!(root.join("nothing").is_dir());
        assert_eq!(destinations.path(Destination::Positive), root.join("hoomans"));
        assert!(destinations.contains(&root.join("nothing").join("x.jpg")));
        assert!(!destinations.contains(&root.join("x.jpg")));
    }

    #[test]
    fn test_destinations_occupied() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("processed");
        let destinations = Destinations::create(&root).expect("Failed to create destinations");
        fs::write(root.join("nothing").join("x.jpg"), b"old").expect("Failed to write test file");

        assert_eq!(
            destinations.occupied(OsStr::new("x.jpg")),
            Some(root.join("nothing").join("x.jpg"))
        );
        assert_eq!(destinations.occupied(OsStr::new("y.jpg")), None);
    }

    #[test]
    fn test_place_preserves_file_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dest = temp_dir.path().join("hoomans");
        fs::create_dir(&dest).expect("Failed to create destination");

        let file_path = temp_dir.path().join("cam-01.jpg");
        fs::write(&file_path, b"jpeg bytes").expect("Failed to write test file");

        let moved = DirectoryRouter::place(&file_path, &dest).expect("Failed to place file");

        assert_eq!(moved, dest.join("cam-01.jpg"));
        assert!(!file_path.exists());
        assert_eq!(fs::read(&moved).expect("Failed to read moved file"), b"jpeg bytes");
    }

    #[test]
    fn test_place_refuses_to_overwrite() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dest = temp_dir.path().join("nothing");
        fs::create_dir(&dest).expect("Failed to create destination");
        fs::write(dest.join("dup.jpg"), b"old").expect("Failed to write existing file");

        let file_path = temp_dir.path().join("dup.jpg");
        fs::write(&file_path, b"new").expect("Failed to write test file");

        let result = DirectoryRouter::place(&file_path, &dest);

        assert!(matches!(result, Err(RouteError::DestinationExists { .. })));
        assert!(file_path.exists(), "Source must stay in place");
        assert_eq!(fs::read(dest.join("dup.jpg")).expect("read"), b"old");
    }

    #[test]
    fn test_place_into_missing_directory_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let file_path = temp_dir.path().join("a.jpg");
        fs::write(&file_path, b"x").expect("Failed to write test file");

        let result = DirectoryRouter::place(&file_path, &temp_dir.path().join("missing"));

        assert!(matches!(result, Err(RouteError::FileMoveFailure { .. })));
        assert!(file_path.exists());
    }

    #[test]
    fn test_discard_removes_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let file_path = temp_dir.path().join("night.jpg");
        fs::write(&file_path, b"x").expect("Failed to write test file");

        DirectoryRouter::discard(&file_path).expect("Failed to discard");
        assert!(!file_path.exists());
    }

    #[test]
    fn test_discard_missing_file_is_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = DirectoryRouter::discard(&temp_dir.path().join("gone.jpg"));
        assert!(matches!(result, Err(RouteError::DiscardFailed { .. })));
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let staging = DirectoryRouter::staging_path(Path::new("/p/hoomans/a.jpg"));
        assert_eq!(staging, PathBuf::from("/p/hoomans/.a.jpg.partial"));
    }
}
