//! Cloneable control handle for a running session

use super::state::{Command, SessionNotice};
use crate::media::MediaKind;
use crate::{Error, Result};
use tokio::sync::{broadcast, mpsc};

/// Sends commands to a session loop and hands out notice subscriptions
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionHandle {
    pub(crate) fn channel(
        notices: broadcast::Sender<SessionNotice>,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { commands, notices }, rx)
    }

    /// Queue a command
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` once the session loop has stopped.
    pub fn send(&self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|e| Error::InvalidState(format!("session loop stopped, dropped {:?}", e.0)))
    }

    /// Start a call attempt
    pub fn request_permissions(&self) -> Result<()> {
        self.send(Command::RequestPermissions)
    }

    /// Cancel the search
    pub fn stop_search(&self) -> Result<()> {
        self.send(Command::StopSearch)
    }

    /// Hang up
    pub fn end_call(&self) -> Result<()> {
        self.send(Command::EndCall)
    }

    /// Return to idle
    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    /// Flip local tracks of `kind`
    pub fn toggle(&self, kind: MediaKind) -> Result<()> {
        self.send(Command::Toggle(kind))
    }

    /// Enable or disable local tracks of `kind`
    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) -> Result<()> {
        self.send(Command::SetEnabled(kind, enabled))
    }

    /// End any call and stop the loop
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Subscribe to session notices
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Whether the session loop has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_are_queued_in_order() {
        let (notices, _) = broadcast::channel(8);
        let (handle, mut rx) = SessionHandle::channel(notices);

        handle.request_permissions().unwrap();
        handle.toggle(MediaKind::Audio).unwrap();
        handle.shutdown().unwrap();

        assert_eq!(rx.try_recv().unwrap(), Command::RequestPermissions);
        assert_eq!(rx.try_recv().unwrap(), Command::Toggle(MediaKind::Audio));
        assert_eq!(rx.try_recv().unwrap(), Command::Shutdown);
    }

    #[test]
    fn test_send_after_loop_stopped_fails() {
        let (notices, _) = broadcast::channel(8);
        let (handle, rx) = SessionHandle::channel(notices);
        drop(rx);

        assert!(handle.is_closed());
        assert!(matches!(handle.end_call(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_subscribers_share_notices() {
        let (notices, _) = broadcast::channel(8);
        let (handle, _rx) = SessionHandle::channel(notices.clone());
        let mut first = handle.subscribe();
        let mut second = handle.clone().subscribe();

        notices.send(SessionNotice::Searching).unwrap();
        assert_eq!(first.try_recv().unwrap(), SessionNotice::Searching);
        assert_eq!(second.try_recv().unwrap(), SessionNotice::Searching);
    }
}
