use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::Level;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::metrics::METRICS;

/// How long the pump waits for a new record before yielding.
///
/// Keeps the drain loop responsive without busy-spinning.
const DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Ring-buffer capacity per subscriber. A subscriber that falls more
/// than this many records behind starts dropping the oldest ones
/// instead of stalling the producer side.
const SUBSCRIBER_BUFFER: usize = 1024;

/// One log line as it crosses from producer threads to streaming
/// subscribers.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self { timestamp: Utc::now(), level, message: message.into() }
    }

    /// Wire format shared by the SSE and WebSocket transports.
    pub fn render(&self) -> String {
        format!(
            "{} [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level,
            self.message
        )
    }
}

/// ============================================================
/// LogRelay
/// ============================================================
///
/// Moves log records produced by worker tasks into an asynchronous
/// broadcast consumed by streaming subscribers.
///
/// Two halves:
/// - Producer side: `publish` pushes onto an unbounded queue.
///   Non-blocking, callable from any thread.
/// - Consumer side: a single pump task drains the queue and
///   re-publishes every record to all currently-registered
///   subscribers (broadcast, not work-stealing).
///
/// Subscribers register by taking a `broadcast::Receiver` and
/// deregister by dropping it; a record published before a subscriber
/// registered is never replayed. A slow subscriber lags and loses old
/// records; a dead one errors out of its stream. Neither can block
/// the producers or the other subscribers.
#[derive(Clone)]
pub struct LogRelay {
    producer: mpsc::UnboundedSender<LogRecord>,
    fanout: broadcast::Sender<LogRecord>,
}

impl LogRelay {
    /// Creates the relay and its pump. The pump must be spawned for
    /// records to reach subscribers.
    pub fn new() -> (Self, RelayPump) {
        let (producer, queue) = mpsc::unbounded_channel();
        let (fanout, _) = broadcast::channel(SUBSCRIBER_BUFFER);

        let relay = Self { producer, fanout: fanout.clone() };
        (relay, RelayPump { queue, fanout })
    }

    /// Enqueues a record. Never blocks.
    ///
    /// Errors (pump gone during shutdown) are ignored; log delivery
    /// is best-effort by contract.
    pub fn publish(&self, record: LogRecord) {
        let _ = self.producer.send(record);
    }

    /// Registers a new streaming subscriber.
    ///
    /// The receiver sees every record published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.fanout.subscribe()
    }
}

/// Drains the producer queue into the subscriber broadcast.
///
/// Runs as a dedicated task for the lifetime of the process. The
/// bounded wait keeps it off the CPU while idle yet responsive to
/// new records and new subscribers.
pub struct RelayPump {
    queue: mpsc::UnboundedReceiver<LogRecord>,
    fanout: broadcast::Sender<LogRecord>,
}

impl RelayPump {
    pub async fn run(mut self) {
        loop {
            match timeout(DRAIN_WAIT, self.queue.recv()).await {
                Ok(Some(record)) => {
                    METRICS.records_relayed.fetch_add(1, Ordering::Relaxed);
                    // No subscribers is not an error; the record is
                    // simply not observed live.
                    let _ = self.fanout.send(record);
                }

                // All producer handles dropped – shutdown.
                Ok(None) => break,

                // Drain wait elapsed; loop around.
                Err(_) => continue,
            }
        }
    }
}

/// ============================================================
/// RelayLogger
/// ============================================================
///
/// `log` facade backend with two sinks:
/// - an `env_logger` console logger (operator-facing stdout/stderr)
/// - the LogRelay (live streaming subscribers)
///
/// Every record accepted by the console filter is also relayed, so
/// the stream shows exactly what the console shows.
pub struct RelayLogger {
    console: env_logger::Logger,
    relay: LogRelay,
}

impl RelayLogger {
    /// Builds the dual logger and installs it as the global `log`
    /// backend. Must be called exactly once, before the first log
    /// statement.
    pub fn install(relay: LogRelay) -> anyhow::Result<()> {
        let console = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .build();

        let max_level = console.filter();
        log::set_boxed_logger(Box::new(Self { console, relay }))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl log::Log for RelayLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.console.matches(record) {
            return;
        }
        self.console.log(record);
        self.relay
            .publish(LogRecord::new(record.level(), record.args().to_string()));
    }

    fn flush(&self) {
        self.console.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_records_in_order() {
        let (relay, pump) = LogRelay::new();
        tokio::spawn(pump.run());

        let mut rx = relay.subscribe();

        relay.publish(LogRecord::new(Level::Info, "one"));
        relay.publish(LogRecord::new(Level::Warn, "two"));
        relay.publish(LogRecord::new(Level::Error, "three"));

        for expected in ["one", "two", "three"] {
            let record = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("record within drain window")
                .expect("relay alive");
            assert_eq!(record.message, expected);
        }
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_later_records() {
        let (relay, pump) = LogRelay::new();
        tokio::spawn(pump.run());

        // No subscriber registered yet: this record is dropped.
        relay.publish(LogRecord::new(Level::Info, "early"));

        // Wait until the pump has drained the early record so the
        // new subscriber cannot observe it.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut rx = relay.subscribe();
        relay.publish(LogRecord::new(Level::Info, "late"));

        let record = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("record within drain window")
            .expect("relay alive");
        assert_eq!(record.message, "late");
    }

    #[tokio::test]
    async fn disconnected_subscriber_does_not_affect_others() {
        let (relay, pump) = LogRelay::new();
        tokio::spawn(pump.run());

        let dropped = relay.subscribe();
        let mut kept = relay.subscribe();
        drop(dropped);

        relay.publish(LogRecord::new(Level::Info, "still flowing"));

        let record = timeout(Duration::from_secs(2), kept.recv())
            .await
            .expect("record within drain window")
            .expect("relay alive");
        assert_eq!(record.message, "still flowing");
    }
}
