//! Command line descriptions and job specifications.
//!
//! A [`CommandLine`] captures *what* to run: either a shell pipeline handed to
//! `/bin/sh -c`, or an exec-style argv list that bypasses the shell entirely.
//! A [`JobSpec`] wraps a command line with the execution policy around it:
//! environment, working directory, stdin source, wall-clock limit, output
//! retention and whether a non-zero exit is treated as an error.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;

use super::{DEFAULT_RETENTION_LIMIT, DEFAULT_STOP_GRACE};

/// Shell used for [`CommandLine::Shell`] commands.
pub const SHELL: &str = "/bin/sh";

/// How a job's program and arguments are expressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// A command string interpreted by `/bin/sh -c`, with full shell syntax.
    Shell(String),
    /// An argv list executed directly, without shell interpretation.
    Exec(Vec<OsString>),
}

impl CommandLine {
    /// Builds a shell command from a pipeline string.
    pub fn shell(command: impl Into<String>) -> Self {
        CommandLine::Shell(command.into())
    }

    /// Builds an exec command from an argv list.
    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        CommandLine::Exec(argv.into_iter().map(Into::into).collect())
    }

    /// The program that will be spawned, for diagnostics.
    pub fn program(&self) -> String {
        match self {
            CommandLine::Shell(_) => SHELL.to_string(),
            CommandLine::Exec(argv) => argv
                .first()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "<empty>".to_string()),
        }
    }

    /// A human-readable rendering of the full command line.
    ///
    /// Used in logs and attached to [`super::JobOutput`]. Exec argv elements
    /// are rendered lossily and joined with spaces, so the result is for
    /// display only, not for re-execution.
    pub fn display(&self) -> String {
        match self {
            CommandLine::Shell(command) => command.clone(),
            CommandLine::Exec(argv) => argv
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Where a job's stdin comes from.
#[derive(Debug, Clone, Default)]
pub enum StdinSource {
    /// No stdin; the child reads EOF immediately.
    #[default]
    Null,
    /// The pipe is kept open for interactive writes via
    /// [`super::BackgroundJob::write_stdin`].
    Piped,
    /// Fixed bytes are written to the child, then the pipe is closed.
    Bytes(Bytes),
    /// The file's contents are streamed to the child, then the pipe is closed.
    File(PathBuf),
}

/// Full specification of a job to execute.
///
/// Construct with [`JobSpec::shell`] or [`JobSpec::exec`] and refine with the
/// `with_*` builders. Checking is enabled by default: a non-zero exit from
/// [`crate::job::run`] or [`super::BackgroundJob::wait`] becomes
/// [`crate::HilError::CommandFailed`] unless [`JobSpec::unchecked`] is called.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub(crate) command: CommandLine,
    pub(crate) env: Vec<(OsString, OsString)>,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) stdin: StdinSource,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retention_limit: usize,
    pub(crate) stop_grace: Duration,
    pub(crate) check: bool,
}

impl JobSpec {
    /// Creates a spec from an explicit [`CommandLine`].
    pub fn new(command: CommandLine) -> Self {
        Self {
            command,
            env: Vec::new(),
            cwd: None,
            stdin: StdinSource::Null,
            timeout: None,
            retention_limit: DEFAULT_RETENTION_LIMIT,
            stop_grace: DEFAULT_STOP_GRACE,
            check: true,
        }
    }

    /// Creates a spec for a shell command string.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new(CommandLine::shell(command))
    }

    /// Creates a spec for an exec-style argv list.
    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self::new(CommandLine::exec(argv))
    }

    /// Adds an environment variable visible to the child.
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the child's working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Feeds the given bytes to the child's stdin, then closes the pipe.
    ///
    /// Empty input still opens the pipe and closes it immediately, so the
    /// child observes EOF rather than a missing stdin.
    pub fn with_stdin_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        self.stdin = StdinSource::Bytes(bytes.into());
        self
    }

    /// Streams the given file to the child's stdin, then closes the pipe.
    pub fn with_stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = StdinSource::File(path.into());
        self
    }

    /// Keeps stdin open for interactive writes after spawn.
    pub fn with_stdin_piped(mut self) -> Self {
        self.stdin = StdinSource::Piped;
        self
    }

    /// Sets a wall-clock limit; on expiry the whole process group is killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Caps the retained bytes per output stream. Oldest bytes are dropped
    /// first so the tail of a chatty stream survives. A limit of zero
    /// retains nothing: subscribers still see every chunk, but the final
    /// output comes back empty and marked truncated.
    pub fn with_retention_limit(mut self, limit: usize) -> Self {
        self.retention_limit = limit;
        self
    }

    /// Sets how long [`super::BackgroundJob::stop`] waits after SIGTERM
    /// before escalating to SIGKILL.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Disables exit status checking; non-zero exits are returned as plain
    /// [`super::JobOutput`] values instead of errors.
    pub fn unchecked(mut self) -> Self {
        self.check = false;
        self
    }

    /// The command line this spec will run.
    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    /// The configured wall-clock limit, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
