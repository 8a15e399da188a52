//! Termination signal handling
//!
//! Signals only flip a one-shot flag. The control loop notices the flag and
//! performs the restoration itself.

use std::io;
use tokio::sync::watch;
use tracing::{debug, info};

/// Sending half of the shutdown flag
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Raise the flag; returns `false` if it was already raised
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|raised| {
            if *raised {
                false
            } else {
                *raised = true;
                true
            }
        })
    }
}

/// Receiving half of the shutdown flag
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether the flag has been raised
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the flag is raised
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Trigger dropped without firing
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create an unconnected trigger/flag pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Raise the returned flag on SIGINT or SIGTERM
pub fn listen() -> io::Result<Shutdown> {
    let (trigger, shutdown) = channel();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    Some(()) = interrupt.recv() => "SIGINT",
                    Some(()) = terminate.recv() => "SIGTERM",
                    else => break,
                };
                if trigger.trigger() {
                    info!("Received {}", name);
                } else {
                    debug!("Received {} while already quitting, ignored", name);
                }
            }
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if trigger.trigger() {
                info!("Received Ctrl-C");
            }
        }
    });

    Ok(shutdown)
}
