//! Interrupt propagation
//!
//! One trigger, many cloned signals. Once triggered, a signal stays triggered.

use tokio::sync::watch;

/// Raises the shutdown flag
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Observes the shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag is raised; never resolves if the trigger is dropped unraised
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let (trigger, signal) = channel();
        let mut waiter = signal.clone();
        assert!(!signal.is_triggered());

        let handle = tokio::spawn(async move { waiter.triggered().await });
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_trigger_never_fires() {
        let (trigger, mut signal) = channel();
        drop(trigger);

        let result = tokio::time::timeout(Duration::from_millis(30), signal.triggered()).await;
        assert!(result.is_err());
    }
}
