use std::sync::Arc;

use rider_transit::models::AlertsStreamData;
use serde_json::json;

use crate::network::Socket;
use crate::repositories::channel::{ChannelSubscription, ReceiveCallback};

pub const ALERTS_TOPIC: &str = "alerts";
pub const STREAM_DATA_EVENT: &str = "stream_data";

/// Live alerts feed.
pub trait AlertsSource: Send + Sync {
    fn connect(&self, on_receive: ReceiveCallback<AlertsStreamData>);

    fn disconnect(&self);
}

pub struct AlertsRepository {
    subscription: ChannelSubscription<AlertsStreamData>,
}

impl AlertsRepository {
    pub fn new(socket: Arc<dyn Socket>) -> Self {
        Self {
            subscription: ChannelSubscription::new(socket, STREAM_DATA_EVENT),
        }
    }
}

impl AlertsSource for AlertsRepository {
    fn connect(&self, on_receive: ReceiveCallback<AlertsStreamData>) {
        self.subscription.connect(ALERTS_TOPIC, json!({}), on_receive);
    }

    fn disconnect(&self) {
        self.subscription.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::channel::tests::{collector, connected_socket, reply_to};

    #[tokio::test]
    async fn test_receives_alerts_on_join() {
        let (socket, _server, mut connection) = connected_socket().await;
        let repository = AlertsRepository::new(socket);
        let (on_receive, mut results) = collector();

        repository.connect(on_receive);
        let join = connection.recv().await.unwrap();
        assert_eq!(join.topic, ALERTS_TOPIC);

        let response = json!({"alerts": {"a1": {
            "id": "a1",
            "effect": "shuttle",
            "informed_entity": [{"route": "Red"}],
            "updated_at": "2024-03-14T10:00:00-04:00"
        }}});
        connection.send(&reply_to(&join, "ok", response));

        let data = results.recv().await.unwrap().unwrap();
        assert!(data.get_alert("a1").is_some());

        repository.disconnect();
    }
}
