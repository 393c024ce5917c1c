//! Broker connection lifecycle and delivery dispatch.
//!
//! One connection per node, shared by every role created from its context.
//! The connection carries a retained last-will marking the node offline, so
//! any peer can detect a crash by subscribing to the offline topic; a
//! retained `online` publication balances the will once connected.

use crate::config::Globals;
use edgebus_proto::inspect::NodeType;
use edgebus_proto::topics::{self, TopicError};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Packet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A message delivered by the broker to a local subscription.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Concrete topic the message arrived on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

struct Subscription {
    filter: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Shared broker connection for all roles of one node.
pub struct Connection {
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    closing: Arc<AtomicBool>,
    offline_topic: String,
    globals: Arc<Globals>,
}

impl Connection {
    /// Build the broker client for a node without dialing yet.
    ///
    /// The client id is `edgebus-{role}:{node_id}`; the last will publishes
    /// a retained `offline` to `nodes/offline/{role}/{node_id}`.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL or node id is malformed.
    pub fn connect(
        node_id: &str,
        role: NodeType,
        globals: Arc<Globals>,
    ) -> Result<Self, ConnectionError> {
        let (host, port) = parse_broker_url(&globals.mqtt_broker)?;
        let client_id = format!("edgebus-{role}:{node_id}");

        let mut options = MqttOptions::new(client_id.clone(), host, port);
        options.set_keep_alive(globals.mqtt_keep_alive);
        options.set_clean_session(globals.mqtt_clean_session);
        if !globals.mqtt_username.is_empty() {
            options.set_credentials(&globals.mqtt_username, &globals.mqtt_password);
        }

        let offline_topic = topics::offline(role.as_str(), node_id)?;
        options.set_last_will(LastWill::new(
            &offline_topic,
            "offline",
            globals.qos(),
            true,
        ));

        let (client, eventloop) = AsyncClient::new(options, EVENT_CHANNEL_CAPACITY);
        tracing::info!(broker = %globals.mqtt_broker, client_id = %client_id, "MQTT client created");

        Ok(Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            dispatch_task: Mutex::new(None),
            closing: Arc::new(AtomicBool::new(false)),
            offline_topic,
            globals,
        })
    }

    /// Dial the broker, retrying with linear backoff up to the configured
    /// maximum, then hand the event loop to the background dispatch task.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::RetriesExhausted`] once the retry budget
    /// is spent; a role cannot function without a broker, so this is fatal
    /// for the hosting process.
    pub async fn await_connected(&mut self) -> Result<(), ConnectionError> {
        let eventloop = self
            .eventloop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ConnectionError::AlreadyConnected)?;

        let connect_timeout = self.globals.mqtt_connect_timeout;
        let eventloop = retry_connect(
            eventloop,
            |eventloop| connect_attempt(eventloop, connect_timeout),
            self.globals.mqtt_max_retry,
            self.globals.mqtt_reconnect_interval,
        )
        .await?;

        tracing::info!(broker = %self.globals.mqtt_broker, "broker connected");

        let task = tokio::spawn(dispatch_loop(
            eventloop,
            self.client.clone(),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.closing),
            self.offline_topic.clone(),
            Arc::clone(&self.globals),
        ));
        *self
            .dispatch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        // Balance the retained offline will.
        self.publish_retained(&self.offline_topic, b"online".to_vec())
            .await?;

        Ok(())
    }

    /// Subscribe to a topic filter; matching deliveries arrive on the
    /// returned channel.
    ///
    /// # Errors
    ///
    /// Returns error if the broker rejects the subscription request.
    pub async fn subscribe(
        &self,
        filter: &str,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, ConnectionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                filter: filter.to_string(),
                tx,
            });

        tracing::info!(filter, "subscribing");
        self.client
            .subscribe(filter, self.globals.qos())
            .await
            .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;

        Ok(rx)
    }

    /// Drop a subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the broker rejects the unsubscribe request.
    pub async fn unsubscribe(&self, filter: &str) -> Result<(), ConnectionError> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|subscription| subscription.filter != filter);

        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| ConnectionError::Subscribe(e.to_string()))
    }

    /// Publish a payload with the configured quality of service.
    ///
    /// # Errors
    ///
    /// Returns error if the publish request fails.
    pub async fn publish(
        &self,
        topic: &str,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ConnectionError> {
        self.client
            .publish(topic, self.globals.qos(), retain, payload)
            .await
            .map_err(|e| ConnectionError::Publish(e.to_string()))
    }

    /// Publish a retained payload.
    ///
    /// # Errors
    ///
    /// Returns error if the publish request fails.
    pub async fn publish_retained(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<(), ConnectionError> {
        self.publish(topic, true, payload).await
    }

    /// Stop accepting work and tear the connection down after the
    /// configured grace period.
    pub async fn disconnect(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(err) = self.client.disconnect().await {
            tracing::debug!(error = %err, "disconnect request failed");
        }
        tokio::time::sleep(self.globals.mqtt_quit_grace).await;
        if let Some(task) = self
            .dispatch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        tracing::info!("broker connection closed");
    }
}

/// One bounded connect attempt: poll the event loop until the broker
/// acknowledges, a transport error surfaces, or the attempt times out.
async fn connect_attempt(
    mut eventloop: EventLoop,
    connect_timeout: Duration,
) -> Result<EventLoop, (EventLoop, String)> {
    loop {
        let polled = tokio::time::timeout(connect_timeout, eventloop.poll()).await;
        match polled {
            Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(eventloop);
                }
                return Err((eventloop, format!("broker refused connection: {:?}", ack.code)));
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err((eventloop, err.to_string())),
            Err(_) => return Err((eventloop, "connect attempt timed out".to_string())),
        }
    }
}

/// Retry an ownership-passing connect attempt with linear backoff: the wait
/// after attempt `n` is `n * interval`.
pub(crate) async fn retry_connect<T, F, Fut>(
    mut target: T,
    mut attempt: F,
    max_retry: u32,
    interval: Duration,
) -> Result<T, ConnectionError>
where
    F: FnMut(T) -> Fut,
    Fut: std::future::Future<Output = Result<T, (T, String)>>,
{
    for index in 1..=max_retry {
        match attempt(target).await {
            Ok(connected) => return Ok(connected),
            Err((returned, err)) => {
                target = returned;
                tracing::warn!(
                    attempt = index,
                    max_retry,
                    error = %err,
                    "broker connect attempt failed"
                );
                if index < max_retry {
                    tokio::time::sleep(interval * index).await;
                }
            }
        }
    }
    Err(ConnectionError::RetriesExhausted {
        attempts: max_retry,
    })
}

/// Drive the event loop forever: fan deliveries out to matching
/// subscriptions, restore state after reconnects, back off on errors.
async fn dispatch_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    closing: Arc<AtomicBool>,
    offline_topic: String,
    globals: Arc<Globals>,
) {
    loop {
        let polled = eventloop.poll().await;
        match polled {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let delivery = Delivery {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                fan_out(&subscriptions, &delivery);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Reconnected: the broker has forgotten us, so restore
                // subscriptions and clear the retained offline marker.
                tracing::info!("broker session re-established");
                let filters: Vec<String> = subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .map(|subscription| subscription.filter.clone())
                    .collect();
                for filter in filters {
                    if let Err(err) = client.subscribe(filter.clone(), globals.qos()).await {
                        tracing::warn!(filter, error = %err, "resubscribe failed");
                    }
                }
                if let Err(err) = client
                    .publish(offline_topic.clone(), globals.qos(), true, b"online".to_vec())
                    .await
                {
                    tracing::warn!(error = %err, "failed to refresh online marker");
                }
            }
            Ok(_) => {}
            Err(err) => {
                if closing.load(Ordering::SeqCst) || !globals.mqtt_auto_reconnect {
                    tracing::debug!(error = %err, "event loop stopping");
                    return;
                }
                tracing::error!(error = %err, "MQTT connection error, retrying");
                tokio::time::sleep(globals.mqtt_reconnect_interval).await;
            }
        }
    }
}

fn fan_out(subscriptions: &Mutex<Vec<Subscription>>, delivery: &Delivery) {
    let mut subscriptions = subscriptions
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    subscriptions.retain(|subscription| !subscription.tx.is_closed());
    for subscription in subscriptions.iter() {
        if topics::filter_matches(&subscription.filter, &delivery.topic) {
            // A dropped receiver is pruned on the next delivery.
            let _ = subscription.tx.send(delivery.clone());
        }
    }
}

/// Parse a broker URL into host and port. Accepts `tcp://host:port`,
/// `mqtt://host:port`, or a bare `host[:port]`; the port defaults to 1883.
fn parse_broker_url(input: &str) -> Result<(String, u16), ConnectionError> {
    if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| ConnectionError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(ConnectionError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| ConnectionError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConnectionError::InvalidBrokerUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port.parse().map_err(|_| {
            ConnectionError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'"))
        })?,
    };
    if parts.next().is_some() {
        return Err(ConnectionError::InvalidBrokerUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

/// Errors for broker connection operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// Invalid broker URL
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// Topic construction failed
    #[error(transparent)]
    Topic(#[from] TopicError),
    /// Initial connect retries exhausted
    #[error("cannot connect to broker after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made before giving up
        attempts: u32,
    },
    /// The event loop was already handed off
    #[error("connection already established")]
    AlreadyConnected,
    /// Subscribe or unsubscribe failed
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    async fn counting_attempt(
        counter: Arc<AtomicU32>,
        succeed_on: u32,
    ) -> Result<Arc<AtomicU32>, (Arc<AtomicU32>, String)> {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= succeed_on {
            Ok(counter)
        } else {
            Err((counter, "connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn retry_connect_succeeds_within_budget() {
        let counter = Arc::new(AtomicU32::new(0));
        let result = retry_connect(
            Arc::clone(&counter),
            |c| counting_attempt(c, 3),
            3,
            Duration::from_millis(1),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_connect_fails_after_exact_budget() {
        let counter = Arc::new(AtomicU32::new(0));
        let result = retry_connect(
            Arc::clone(&counter),
            |c| counting_attempt(c, 3),
            2,
            Duration::from_millis(1),
        )
        .await;

        assert!(matches!(
            result,
            Err(ConnectionError::RetriesExhausted { attempts: 2 })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn broker_url_forms() {
        assert_eq!(
            parse_broker_url("tcp://broker.example:1883").unwrap(),
            ("broker.example".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("mqtt://broker.example").unwrap(),
            ("broker.example".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("localhost:2883").unwrap(),
            ("localhost".to_string(), 2883)
        );
        assert_eq!(
            parse_broker_url("localhost").unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert!(parse_broker_url("ws://broker.example").is_err());
        assert!(parse_broker_url("localhost:abc").is_err());
        assert!(parse_broker_url("").is_err());
    }

    #[test]
    fn deliveries_fan_out_by_filter() {
        let subscriptions = Mutex::new(Vec::new());
        let (tx_requests, mut rx_requests) = mpsc::unbounded_channel();
        let (tx_events, mut rx_events) = mpsc::unbounded_channel();
        subscriptions
            .lock()
            .unwrap()
            .push(Subscription {
                filter: "edgebus/requests/doorctl/+".to_string(),
                tx: tx_requests,
            });
        subscriptions
            .lock()
            .unwrap()
            .push(Subscription {
                filter: "edgebus/events/#".to_string(),
                tx: tx_events,
            });

        fan_out(
            &subscriptions,
            &Delivery {
                topic: "edgebus/requests/doorctl/gate".to_string(),
                payload: vec![1],
            },
        );
        fan_out(
            &subscriptions,
            &Delivery {
                topic: "edgebus/events/door/main".to_string(),
                payload: vec![2],
            },
        );

        assert_eq!(rx_requests.try_recv().unwrap().payload, vec![1]);
        assert!(rx_requests.try_recv().is_err());
        assert_eq!(rx_events.try_recv().unwrap().payload, vec![2]);
    }
}
