//! # OS termination signals.
//!
//! [`wait_for_shutdown_signal`] resolves on the first termination signal and reports
//! which one arrived, so the supervisor can log it.
//!
//! | Platform | Signals                                  |
//! |----------|------------------------------------------|
//! | unix     | `SIGINT`, `SIGTERM`, `SIGQUIT`           |
//! | other    | Ctrl-C ([`tokio::signal::ctrl_c`])       |

use std::io;

/// Waits for a termination signal and returns its name.
///
/// Listeners are registered on every call.
///
/// # Errors
/// Fails if a signal handler cannot be registered.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

/// Waits for Ctrl-C and returns its name.
///
/// # Errors
/// Fails if the Ctrl-C handler cannot be registered.
#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
