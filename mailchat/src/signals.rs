//! Process signals, translated into controller requests.

use mailchat_common::internal;
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::mpsc,
};

/// What the running server is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// SIGINT or SIGTERM
    Shutdown,
    /// SIGUSR1
    LogRotate,
}

/// Listen for SIGINT, SIGTERM and SIGUSR1.
///
/// A second SIGINT after shutdown was requested exits the process without
/// waiting for the shutdown to finish.
///
/// # Errors
///
/// Fails if a signal handler cannot be installed.
pub fn listen() -> std::io::Result<mpsc::Receiver<Control>> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut rotate = signal(SignalKind::user_defined1())?;
    let (sender, receiver) = mpsc::channel(8);

    tokio::spawn(async move {
        let mut stopping = false;
        loop {
            let control = tokio::select! {
                Some(()) = interrupt.recv() => {
                    if stopping {
                        internal!(level = WARN, "CTRL+C entered again, forcing shutdown");
                        std::process::exit(130);
                    }
                    internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
                    Control::Shutdown
                }
                Some(()) = terminate.recv() => {
                    internal!(level = INFO, "Terminate Signal received, shutting down");
                    Control::Shutdown
                }
                Some(()) = rotate.recv() => Control::LogRotate,
                else => break,
            };

            stopping |= control == Control::Shutdown;
            if sender.send(control).await.is_err() {
                break;
            }
        }
    });

    Ok(receiver)
}
