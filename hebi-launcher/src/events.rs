//! Bidirectional event channel between the launcher and session browser tabs.
//!
//! Sessions connect over a websocket and identify themselves by the session
//! URL carried in each payload, never by the transport connection: there is
//! no affinity to assume. The launcher periodically broadcasts a
//! `heartbeat-request` to every connected client; replies and initial
//! connections feed the activity tracker.

use std::time::Duration;

use async_trait::async_trait;
use hebi_task::{ShutdownSignal, Task};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::activity::{self, ActivityTracker};

const BROADCAST_CAPACITY: usize = 32;

/// Events sent by session clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// A browser client just opened its session URL.
    SessionConnect { client: String },
    /// A browser client replying to a `heartbeat-request` broadcast.
    HeartbeatResponse { client: String },
}

/// Events broadcast by the launcher to every connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    HeartbeatRequest { data: String },
}

impl ServerEvent {
    pub fn heartbeat_request() -> Self {
        Self::HeartbeatRequest {
            data: "Are you active?".to_owned(),
        }
    }
}

#[derive(Clone)]
pub struct EventBroadcaster(broadcast::Sender<ServerEvent>);

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self(tx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.0.subscribe()
    }

    /// Emits `event` to every connected client. Having no client connected is
    /// not an error.
    pub fn broadcast(&self, event: ServerEvent) {
        match self.0.send(event) {
            Ok(receiver_count) => trace!(receiver_count, "Event broadcast"),
            Err(_) => trace!("No connected client"),
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Feeds one client event into the activity tracker.
///
/// Both event kinds carry the full session URL; the owner is extracted from
/// it and events with an unusable URL are dropped.
pub fn handle_client_event(activity: &ActivityTracker, event: ClientEvent) {
    let (ClientEvent::SessionConnect { client } | ClientEvent::HeartbeatResponse { client }) = event;

    match activity::user_from_session_url(&client) {
        Some(fedid) => {
            debug!(%fedid, "Session activity recorded");
            activity.touch(&fedid);
        }
        None => {
            warn!(%client, "Discarding event with unusable session URL");
        }
    }
}

/// Periodic "are-you-alive?" broadcast to all connected session clients.
pub struct HeartbeatTask {
    pub events: EventBroadcaster,
    pub interval: Duration,
}

#[async_trait]
impl Task for HeartbeatTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "heartbeat broadcaster";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        debug!("Task started");

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // Consume the immediate first tick.

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.events.broadcast(ServerEvent::heartbeat_request());
                }
                () = shutdown_signal.wait() => {
                    break;
                }
            }
        }

        debug!("Task terminated");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fedid::Fedid;

    fn fedid(s: &str) -> Fedid {
        s.parse().unwrap()
    }

    #[test]
    fn client_events_deserialize_from_the_wire_format() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"session-connect","client":"https://hebi.diamond.ac.uk/abc12345/foo"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::SessionConnect {
                client: "https://hebi.diamond.ac.uk/abc12345/foo".to_owned()
            }
        );

        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"heartbeat-response","client":"https://hebi.diamond.ac.uk/abc12345/"}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::HeartbeatResponse { .. }));
    }

    #[test]
    fn heartbeat_request_serializes_to_the_wire_format() {
        let json = serde_json::to_value(ServerEvent::heartbeat_request()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"event": "heartbeat-request", "data": "Are you active?"})
        );
    }

    #[test]
    fn session_connect_touches_the_activity_map() {
        let activity = ActivityTracker::new();

        handle_client_event(
            &activity,
            ClientEvent::SessionConnect {
                client: "https://hebi.diamond.ac.uk/abc12345/foo".to_owned(),
            },
        );

        assert!(activity.get(&fedid("abc12345")).is_some());
    }

    #[test]
    fn heartbeat_response_refreshes_the_timestamp() {
        let activity = ActivityTracker::new();
        let user = fedid("abc12345");

        let stale = time::OffsetDateTime::now_utc() - time::Duration::seconds(10);
        activity.touch_at(user.clone(), stale);

        handle_client_event(
            &activity,
            ClientEvent::HeartbeatResponse {
                client: "https://hebi.diamond.ac.uk/abc12345/foo".to_owned(),
            },
        );

        let refreshed = activity.get(&user).expect("entry present");
        assert!(refreshed > stale);
        assert!(time::OffsetDateTime::now_utc() - refreshed < time::Duration::seconds(1));
    }

    #[test]
    fn unusable_urls_do_not_touch_the_map() {
        let activity = ActivityTracker::new();

        handle_client_event(
            &activity,
            ClientEvent::HeartbeatResponse {
                client: "not a url".to_owned(),
            },
        );

        assert!(activity.snapshot().is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let events = EventBroadcaster::new();
        let mut rx_a = events.subscribe();
        let mut rx_b = events.subscribe();

        events.broadcast(ServerEvent::heartbeat_request());

        assert_eq!(rx_a.recv().await.unwrap(), ServerEvent::heartbeat_request());
        assert_eq!(rx_b.recv().await.unwrap(), ServerEvent::heartbeat_request());
    }
}
