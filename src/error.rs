//! Typed error kinds for each fallible boundary

/// Errors raised while resolving run configuration
#[derive(thiserror::Error, Debug)]
pub(crate) enum ConfigError {
    /// A thermal threshold is not in the required `resume < pause < abort` order
    #[error("thermal thresholds must satisfy resume < pause < abort, got resume={resume}, pause={pause}, abort={abort}")]
    ThresholdOrder {
        /// Resume threshold, degrees Celsius
        resume: f64,
        /// Pause threshold, degrees Celsius
        pause: f64,
        /// Abort threshold, degrees Celsius
        abort: f64,
    },

    /// Destructive pattern list was empty
    #[error("pattern list must contain at least one byte pattern")]
    EmptyPatternList,

    /// `--cycles` was given as 0
    #[error("cycles must be at least 1")]
    ZeroCycles,

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while probing or validating the target device
#[derive(thiserror::Error, Debug)]
pub(crate) enum ProbeError {
    /// Path does not refer to a block device
    #[error("{0:?} is not a block device")]
    NotABlockDevice(std::path::PathBuf),

    /// Device, or one of its partitions, is currently mounted
    #[error("{0:?} is mounted, refusing to touch it")]
    Mounted(std::path::PathBuf),

    /// Device backs the running root filesystem
    #[error("{0:?} backs the root filesystem, refusing to touch it")]
    BacksRoot(std::path::PathBuf),

    /// Size or sector size could not be read
    #[error("failed to read device geometry for {0:?}")]
    Geometry(std::path::PathBuf),

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while reading or writing the checkpoint file
#[derive(thiserror::Error, Debug)]
pub(crate) enum CheckpointError {
    /// Checkpoint file exists but is not owned by the invoking user
    #[error("checkpoint file {0:?} is not owned by the invoking user")]
    WrongOwner(std::path::PathBuf),

    /// Checkpoint file is writable by group or others
    #[error("checkpoint file {0:?} has unsafe permissions")]
    UnsafePermissions(std::path::PathBuf),

    /// Checkpoint file could not be parsed strictly
    #[error("checkpoint file {0:?} is malformed")]
    Malformed(std::path::PathBuf),

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
