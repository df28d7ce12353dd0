use std::path::PathBuf;

/// Unrecoverable conditions that abort the current operation.
///
/// The CLI dispatcher catches exactly this kind, prints it without a
/// backtrace and exits with `exit_status()`. Anything else that escapes is
/// a programming error and is allowed to crash.
#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    #[error("config error: {0}")]
    Config(String),

    /// A referenced row does not exist. Raised by the application-level
    /// check before an insert is attempted, so the user sees the table and
    /// key instead of an opaque SQL constraint failure.
    #[error("{table} '{key}' does not exist")]
    ForeignKey { table: &'static str, key: String },

    #[error("no blob matching '{0}' in the store")]
    BlobNotFound(String),

    #[error("blob id '{prefix}' is ambiguous: {matches} archives match")]
    AmbiguousId { prefix: String, matches: usize },

    #[error("store error: {0}")]
    Store(String),

    #[error("sessions are not reentrant")]
    NotReentrant,

    #[error("interrupted by signal")]
    Interrupted,

    #[error("{0}")]
    Execution(String),

    #[error("file error: '{0}' does not exist")]
    MissingPath(PathBuf),
}

impl Fatal {
    pub fn exit_status(&self) -> i32 {
        match self {
            Fatal::Config(_) => 2,
            Fatal::ForeignKey { .. } => 3,
            Fatal::BlobNotFound(_) | Fatal::AmbiguousId { .. } | Fatal::Store(_) => 4,
            Fatal::NotReentrant => 70,
            Fatal::Interrupted => 130,
            Fatal::Execution(_) => 5,
            Fatal::MissingPath(_) => 3,
        }
    }
}

/// Returns the exit status when `err` is (or wraps) a [`Fatal`].
pub fn fatal_exit_status(err: &anyhow::Error) -> Option<i32> {
    err.downcast_ref::<Fatal>().map(Fatal::exit_status)
}
