use core::fmt;

/// Connection state of a compute node.
///
/// ```text
/// Disconnected -> Handshaking -> AwaitingCommitment -> Working
///       ^                                                  |
///       +----------------- any failure --------------------+
/// ```
///
/// A node never resumes a session: every reconnect repeats the full
/// handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Disconnected,
    Handshaking,
    AwaitingCommitment,
    Working,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Handshaking => "handshaking",
            Self::AwaitingCommitment => "awaiting-commitment",
            Self::Working => "working",
        };
        f.write_str(name)
    }
}
