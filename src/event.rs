use std::time::Duration;
use tokio::sync::mpsc;

/// Daemon events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  /// Periodic tick for status reporting
  Tick,
  /// Ctrl-C received
  Shutdown,
}

/// Event handler that produces events from a tick timer and the shutdown signal
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn tick timer
    let tick_tx = tx.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(tick_rate);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        if tick_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    // Spawn signal listener
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_ticks_arrive() {
    let mut events = EventHandler::new(Duration::from_millis(10));
    let event = tokio::time::timeout(Duration::from_secs(1), events.next())
      .await
      .unwrap();
    assert_eq!(event, Some(Event::Tick));
  }
}
