//! Pure translation between rumqttc v5 wire events and the router-facing
//! `EventRoute` the Bus Client dispatches on.

use crate::protocol::Envelope;
use rumqttc::v5::{mqttbytes::QoS, Event};
use tracing::debug;

pub struct MessageHandler;

impl MessageHandler {
    /// Translate a raw rumqttc event into a routing decision (pure).
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::Packet;
                match incoming {
                    Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                    Packet::Publish(publish) => EventRoute::MessageReceived {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.to_vec(),
                        retain: publish.retain,
                    },
                    Packet::Disconnect(_) => EventRoute::Disconnected,
                    Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                        return_codes: suback.return_codes.iter().map(|_c| 0x01).collect(),
                    },
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Decode an inbound payload as an `Envelope` and drop it if already
    /// expired, per the envelope's `expires_at` invariant.
    pub fn should_deliver(payload: &[u8]) -> bool {
        match Envelope::deserialize(payload) {
            Ok(envelope) => {
                if envelope.is_expired() {
                    debug!(message_id = %envelope.message_id, "dropping expired envelope");
                    false
                } else {
                    true
                }
            }
            // Non-envelope payloads (raw publishes) are always delivered.
            Err(_) => true,
        }
    }

    /// All publishes and subscriptions in this system use at-least-once
    /// delivery.
    pub fn delivery_qos() -> QoS {
        QoS::AtLeastOnce
    }

    pub fn validate_subscription_success(return_codes: &[u8]) -> Result<(), String> {
        if return_codes.iter().any(|&code| code >= 0x80) {
            Err(format!(
                "subscription failed with return codes: {return_codes:?}"
            ))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnected,
    SubscriptionConfirmed {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    InfrastructureEvent(String),
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Envelope, MessageType, ServiceDescriptor};
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Disconnect, Publish};

    #[test]
    fn route_mqtt_event_maps_connack() {
        let connack = Event::Incoming(rumqttc::v5::mqttbytes::v5::Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));
    }

    #[test]
    fn route_mqtt_event_maps_disconnect() {
        let disconnect = Event::Incoming(rumqttc::v5::mqttbytes::v5::Packet::Disconnect(Disconnect {
            reason_code: rumqttc::v5::mqttbytes::v5::DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));
    }

    #[test]
    fn route_mqtt_event_maps_publish_with_topic_payload_retain() {
        let publish = Event::Incoming(rumqttc::v5::mqttbytes::v5::Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("test/topic"),
            pkid: 1,
            payload: Bytes::from("test payload"),
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&publish) {
            EventRoute::MessageReceived { topic, payload, retain } => {
                assert_eq!(topic, "test/topic");
                assert_eq!(payload, b"test payload");
                assert!(!retain);
            }
            _ => panic!("expected MessageReceived route"),
        }
    }

    #[test]
    fn should_deliver_drops_expired_envelopes() {
        let source = ServiceDescriptor::new("scheduler", "scheduler-0");
        let mut envelope = Envelope::new(
            MessageType::Event,
            crate::protocol::Priority::Normal,
            source,
            serde_json::json!({}),
        );
        envelope.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(10));
        let bytes = envelope.serialize().unwrap();
        assert!(!MessageHandler::should_deliver(&bytes));
    }

    #[test]
    fn should_deliver_accepts_non_expired_envelopes() {
        let source = ServiceDescriptor::new("scheduler", "scheduler-0");
        let envelope = Envelope::new(
            MessageType::Event,
            crate::protocol::Priority::Normal,
            source,
            serde_json::json!({}),
        );
        let bytes = envelope.serialize().unwrap();
        assert!(MessageHandler::should_deliver(&bytes));
    }

    #[test]
    fn should_deliver_accepts_non_envelope_payloads() {
        assert!(MessageHandler::should_deliver(b"raw bytes, not an envelope"));
    }

    #[test]
    fn validate_subscription_success_rejects_any_failure_code() {
        assert!(MessageHandler::validate_subscription_success(&[0x00, 0x01]).is_ok());
        assert!(MessageHandler::validate_subscription_success(&[0x00, 0x80]).is_err());
    }
}
