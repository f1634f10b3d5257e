use tokio::sync::mpsc;

/// Session status values surfaced to the host, mirroring the state
/// machine transitions plus the transient upload indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Authenticating,
    Connecting,
    Connected,
    ConnectError,
    Uploading,
    Disconnecting,
    Disconnected,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticating => "authenticating",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConnectError => "connect-error",
            Self::Uploading => "uploading",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Status(SessionStatus),
    /// A failure with no RPC caller waiting on it (background uploads,
    /// account bookkeeping during auth callbacks). Surfaced to the user
    /// through the error signal instead of a call result.
    Error {
        path: Option<String>,
        message: String,
    },
}

/// Fan-in point for status transitions and background errors. Cloned into
/// the session and every watcher; the daemon drains the receiving end into
/// D-Bus signals and log lines.
#[derive(Clone)]
pub struct StatusNotifier {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn status(&self, status: SessionStatus) {
        let _ = self.tx.send(StatusEvent::Status(status));
    }

    pub fn error(&self, path: Option<&str>, message: impl Into<String>) {
        let _ = self.tx.send(StatusEvent::Error {
            path: path.map(str::to_string),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_stable_strings() {
        assert_eq!(SessionStatus::Authenticating.as_str(), "authenticating");
        assert_eq!(SessionStatus::ConnectError.as_str(), "connect-error");
        assert_eq!(SessionStatus::Disconnected.as_str(), "disconnected");
    }

    #[tokio::test]
    async fn notifier_delivers_events_in_order() {
        let (notifier, mut rx) = StatusNotifier::new();
        notifier.status(SessionStatus::Connecting);
        notifier.error(Some("/tmp/a.txt"), "upload failed");

        assert_eq!(
            rx.recv().await,
            Some(StatusEvent::Status(SessionStatus::Connecting))
        );
        assert_eq!(
            rx.recv().await,
            Some(StatusEvent::Error {
                path: Some("/tmp/a.txt".into()),
                message: "upload failed".into(),
            })
        );
    }

    #[test]
    fn notifier_survives_dropped_receiver() {
        let (notifier, rx) = StatusNotifier::new();
        drop(rx);
        notifier.status(SessionStatus::Connected);
    }
}
