// src/batcher.rs
//
// Leading-edge batching: the first item of a burst goes out alone and at
// once, everything arriving while the window is open is coalesced into a
// single batch emitted when the window closes.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

pub struct Batcher<T> {
    period: Duration,
    window: Option<Instant>,
    buffer: Vec<T>,
}

impl<T: Send + 'static> Batcher<T> {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            window: None,
            buffer: Vec::new(),
        }
    }

    /// Run until `input` closes. Items still buffered at that point are
    /// discarded.
    pub async fn run(mut self, mut input: mpsc::Receiver<T>, output: mpsc::Sender<Vec<T>>) {
        loop {
            let window = self.window;
            let expiry = async move {
                match window {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                received = input.recv() => {
                    let Some(item) = received else { break };
                    if self.window.is_some() {
                        self.buffer.push(item);
                        continue;
                    }
                    if output.send(vec![item]).await.is_err() {
                        return;
                    }
                    if !self.period.is_zero() {
                        self.window = Some(Instant::now() + self.period);
                    }
                }
                _ = expiry => {
                    if self.buffer.is_empty() {
                        self.window = None;
                        continue;
                    }
                    let batch = std::mem::take(&mut self.buffer);
                    trace!("Flushing batch of {} items", batch.len());
                    if output.send(batch).await.is_err() {
                        return;
                    }
                    self.window = Some(Instant::now() + self.period);
                }
            }
        }

        if !self.buffer.is_empty() {
            trace!("Batcher closed with {} unflushed items", self.buffer.len());
        }
    }
}

/// Spawn a batcher task and return its input and output ends.
pub fn spawn<T: Send + 'static>(
    period: Duration,
    capacity: usize,
) -> (mpsc::Sender<T>, mpsc::Receiver<Vec<T>>, tokio::task::JoinHandle<()>) {
    let (input_tx, input_rx) = mpsc::channel(capacity);
    let (output_tx, output_rx) = mpsc::channel(capacity);
    let handle = tokio::spawn(Batcher::new(period).run(input_rx, output_tx));
    (input_tx, output_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const PERIOD: Duration = Duration::from_secs(10);

    async fn collect(mut rx: mpsc::Receiver<Vec<char>>) -> Vec<Vec<char>> {
        let mut batches = Vec::new();
        while let Some(batch) = rx.recv().await {
            batches.push(batch);
        }
        batches
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_item_then_coalesced_burst() {
        let (tx, rx, _) = spawn(PERIOD, 16);
        for item in ['a', 'b', 'c', 'd', 'e'] {
            tx.send(item).await.unwrap();
            sleep(Duration::from_secs(1)).await;
        }
        sleep(PERIOD * 3).await;
        drop(tx);

        assert_eq!(collect(rx).await, vec![vec!['a'], vec!['b', 'c', 'd', 'e']]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reopens_after_quiet_period() {
        let (tx, rx, _) = spawn(PERIOD, 16);
        tx.send('a').await.unwrap();
        tx.send('b').await.unwrap();
        sleep(PERIOD * 3).await;
        tx.send('c').await.unwrap();
        sleep(Duration::from_secs(1)).await;
        tx.send('d').await.unwrap();
        sleep(PERIOD * 3).await;
        drop(tx);

        assert_eq!(
            collect(rx).await,
            vec![vec!['a'], vec!['b'], vec!['c'], vec!['d']]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuing_burst_keeps_window_open() {
        let (tx, rx, _) = spawn(PERIOD, 16);
        tx.send('a').await.unwrap();
        sleep(Duration::from_secs(5)).await;
        tx.send('b').await.unwrap();
        sleep(Duration::from_secs(10)).await;
        tx.send('c').await.unwrap();
        sleep(PERIOD * 3).await;
        drop(tx);

        assert_eq!(collect(rx).await, vec![vec!['a'], vec!['b'], vec!['c']]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_emits_singletons() {
        let (tx, rx, _) = spawn(Duration::ZERO, 16);
        for item in ['a', 'b', 'c'] {
            tx.send(item).await.unwrap();
        }
        drop(tx);

        assert_eq!(collect(rx).await, vec![vec!['a'], vec!['b'], vec!['c']]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_discards_buffer() {
        let (tx, rx, handle) = spawn(PERIOD, 16);
        tx.send('a').await.unwrap();
        tx.send('b').await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(collect(rx).await, vec![vec!['a']]);
    }
}
