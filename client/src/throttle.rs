//! Leading-edge throttle with a coalesced trailing send.
//!
//! The first value pushed into an idle [`Throttle`] goes to the sink right
//! away and opens a window. Values pushed while the window is open replace
//! each other; when the window closes the newest one is sent and a fresh
//! window opens. An idle window simply ends. At most one send happens per
//! window, and the last value pushed is always the last value sent.

use std::future::Future;
use std::time::Duration;

use log::trace;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

pub struct Throttle<T> {
    tx: mpsc::UnboundedSender<T>,
    driver: JoinHandle<()>,
}

impl<T: Send + 'static> Throttle<T> {
    /// Spawns the driver task on the current tokio runtime.
    pub fn spawn<F, Fut>(window: Duration, sink: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(run(window, rx, sink));
        Self { tx, driver }
    }

    /// Queues a value. Returns false once the throttle has been stopped.
    pub fn push(&self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }

    /// Stops immediately. Pending values are discarded and an in-flight send
    /// is abandoned.
    pub fn abort(&self) {
        self.driver.abort();
    }
}

async fn run<T, F, Fut>(window: Duration, mut rx: mpsc::UnboundedReceiver<T>, mut sink: F)
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = ()>,
{
    while let Some(first) = rx.recv().await {
        let mut next = Some(first);

        while let Some(value) = next.take() {
            let deadline = Instant::now() + window;
            sink(value).await;

            let mut coalesced = 0usize;
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    received = rx.recv() => match received {
                        Some(value) => {
                            next = Some(value);
                            coalesced += 1;
                        }
                        None => {
                            if let Some(value) = next.take() {
                                sink(value).await;
                            }
                            return;
                        }
                    },
                }
            }

            if coalesced > 1 {
                trace!("throttle coalesced {} values into one send", coalesced);
            }
        }
    }
}
