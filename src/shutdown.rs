use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

/// Fires the shutdown signal. Held by whoever listens for interrupts.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed by long-running loops between units of work.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Trigger shutdown on the first Ctrl+C; a second one exits the process at
/// once with status 130.
pub fn listen_for_ctrl_c(trigger: ShutdownTrigger) {
    tokio::spawn(handle_interrupts(trigger, tokio::signal::ctrl_c, || {
        std::process::exit(130)
    }));
}

async fn handle_interrupts<N, S, F>(trigger: ShutdownTrigger, mut interrupted: N, force_exit: F)
where
    N: FnMut() -> S,
    S: Future<Output = io::Result<()>>,
    F: FnOnce(),
{
    if let Err(e) = interrupted().await {
        warn!("Unable to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Interrupt received, finishing current item and saving (Ctrl+C again to quit now)...");
    trigger.trigger();

    match interrupted().await {
        Ok(()) => {
            warn!("Second interrupt, exiting without a final save");
            force_exit();
        }
        Err(e) => warn!("Unable to listen for Ctrl+C: {}", e),
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`, waking early on shutdown.
    /// Returns `true` if shutdown was requested.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                changed = self.rx.changed() => match changed {
                    Ok(()) if *self.rx.borrow() => return true,
                    Ok(()) => continue,
                    // Trigger dropped: nobody can interrupt us any more.
                    Err(_) => {
                        (&mut sleep).await;
                        return false;
                    }
                },
            }
        }
    }
}
