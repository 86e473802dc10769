//! Connection supervision for the platform event stream.
//!
//! One listener task drains the current connection into an [`EventSink`].
//! The task returns when the stream closes or errors, and a drop guard
//! clears the connected flag however it ends, panics included. A periodic
//! tick reconnects whenever the flag is down.

use huddle_core::channel::{EventReceiver, EventSource, PlatformEvent};
use huddle_core::error::ChannelError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Receives every event from the live connection. Must not block.
pub trait EventSink: Send + Sync + 'static {
    fn deliver(self: Arc<Self>, event: PlatformEvent);
}

struct ConnectedGuard(Arc<AtomicBool>);

impl Drop for ConnectedGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn listen(mut events: EventReceiver, sink: Arc<dyn EventSink>, connected: Arc<AtomicBool>) {
    let _guard = ConnectedGuard(connected);
    while let Some(item) = events.recv().await {
        match item {
            Ok(event) => Arc::clone(&sink).deliver(event),
            Err(e) => {
                warn!(error = %e, "Event stream failed");
                return;
            }
        }
    }
    warn!("Event stream closed");
}

pub struct ConnectionSupervisor {
    source: Arc<dyn EventSource>,
    sink: Arc<dyn EventSink>,
    connected: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl ConnectionSupervisor {
    pub fn new(source: Arc<dyn EventSource>, sink: Arc<dyn EventSink>, interval: Duration) -> Self {
        Self {
            source,
            sink,
            connected: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
            interval,
        }
    }

    /// First connection. An error here is meant to be fatal for the caller.
    pub async fn start(&self) -> Result<(), ChannelError> {
        self.connect().await
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        let events = self.source.connect().await?;
        // Raised before the listener exists so an instant hang-up still
        // lowers it.
        self.connected.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(listen(events, Arc::clone(&self.sink), Arc::clone(&self.connected)));
        // A finished listener's handle is simply replaced.
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("Event stream connected");
        Ok(())
    }

    /// Reconnect if the stream is down. Returns whether it is up afterwards.
    pub async fn tick(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        warn!("Event stream disconnected, reconnecting");
        match self.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, retry_in_secs = self.interval.as_secs(), "Reconnect failed");
                false
            }
        }
    }

    /// Run [`tick`](Self::tick) forever on the configured interval.
    pub fn spawn_supervision(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }

    /// Abort the current listener. The connected flag drops with it.
    pub fn stop(&self) {
        if let Some(handle) = self.listener.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
            info!("Event stream listener stopped");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Shared view of the connection state, for health reporting.
    pub fn connection_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_channels::MemoryEvents;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl EventSink for RecordingSink {
        fn deliver(self: Arc<Self>, event: PlatformEvent) {
            if event.event == "boom" {
                panic!("sink blew up");
            }
            self.events.lock().unwrap().push(event.event);
        }
    }

    fn event(name: &str) -> PlatformEvent {
        PlatformEvent {
            event: name.into(),
            ..Default::default()
        }
    }

    fn setup() -> (Arc<MemoryEvents>, Arc<RecordingSink>, Arc<ConnectionSupervisor>) {
        let source = Arc::new(MemoryEvents::new());
        let sink = Arc::new(RecordingSink::default());
        let supervisor = Arc::new(ConnectionSupervisor::new(
            source.clone(),
            sink.clone(),
            Duration::from_secs(10),
        ));
        (source, sink, supervisor)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn events_reach_the_sink() {
        let (source, sink, supervisor) = setup();
        supervisor.start().await.unwrap();
        assert!(supervisor.is_connected());

        source.push(event("posted")).await.unwrap();
        source.push(event("typing")).await.unwrap();
        settle().await;
        assert_eq!(*sink.events.lock().unwrap(), vec!["posted", "typing"]);
    }

    #[tokio::test]
    async fn initial_connect_failure_is_returned() {
        let (source, _sink, supervisor) = setup();
        source.fail_next_connects(1);
        assert!(supervisor.start().await.is_err());
        assert!(!supervisor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_reconnects_after_hangup() {
        let (source, sink, supervisor) = setup();
        supervisor.start().await.unwrap();

        source.disconnect();
        settle().await;
        assert!(!supervisor.is_connected());

        source.fail_next_connects(1);
        assert!(!supervisor.tick().await);
        assert!(supervisor.tick().await);
        assert_eq!(source.connect_count(), 3);

        source.push(event("posted")).await.unwrap();
        settle().await;
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_is_noop_while_connected() {
        let (source, _sink, supervisor) = setup();
        supervisor.start().await.unwrap();
        assert!(supervisor.tick().await);
        assert_eq!(source.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_error_drops_connection() {
        let (source, _sink, supervisor) = setup();
        supervisor.start().await.unwrap();
        source
            .push_error(ChannelError::ConnectionLost("reset".into()))
            .await
            .unwrap();
        settle().await;
        assert!(!supervisor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn sink_panic_clears_flag_and_supervision_recovers() {
        let (source, sink, supervisor) = setup();
        supervisor.start().await.unwrap();
        let flag = supervisor.connection_flag();
        let _supervision = supervisor.clone().spawn_supervision();

        source.push(event("boom")).await.unwrap();
        settle().await;
        assert!(!flag.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(source.connect_count(), 2);

        source.push(event("posted")).await.unwrap();
        settle().await;
        assert_eq!(*sink.events.lock().unwrap(), vec!["posted"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_the_listener() {
        let (source, sink, supervisor) = setup();
        supervisor.start().await.unwrap();
        supervisor.stop();
        settle().await;
        assert!(!supervisor.is_connected());

        assert!(source.push(event("posted")).await.is_err());
        assert!(sink.events.lock().unwrap().is_empty());
    }
}
