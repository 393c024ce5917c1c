//! Reply correlation for in-flight calls.
//!
//! Concurrent calls to the same callee share one reply subscription and are
//! distinguished purely by sequence id, never by delivery order. A pending
//! call that never sees its reply ages out after enough non-matching
//! deliveries on its topic.

use edgebus_proto::Message;
use std::collections::HashMap;
use std::sync::Mutex;

/// Completion sink for one pending call.
pub type ReplySink = Box<dyn FnOnce(Message) + Send>;

struct PendingCall {
    sequence_id: u64,
    misses: u32,
    sink: Option<ReplySink>,
}

/// Matches inbound replies to outstanding calls.
///
/// One router per driver instance; never shared across roles. The single
/// lock makes register and dispatch atomic with respect to each other, so a
/// reply is delivered at most once and a registration is never lost to a
/// race.
pub struct Router {
    calls: Mutex<HashMap<String, Vec<PendingCall>>>,
    miss_threshold: u32,
}

impl Router {
    /// New router evicting pending calls after `miss_threshold`
    /// non-matching deliveries.
    #[must_use]
    pub fn new(miss_threshold: u32) -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            miss_threshold,
        }
    }

    /// Register a pending call on a reply topic.
    pub fn register(&self, topic: &str, sequence_id: u64, sink: ReplySink) {
        let mut calls = self
            .calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        calls
            .entry(topic.to_string())
            .or_default()
            .push(PendingCall {
                sequence_id,
                misses: 0,
                sink: Some(sink),
            });
    }

    /// Route a raw delivery to the matching pending call, if any.
    ///
    /// The frame is decoded once; framing errors are logged and dropped.
    /// Every non-matching pending call on the topic ages by one miss and is
    /// evicted once it reaches the threshold. Returns whether a call was
    /// completed.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> bool {
        if !Message::validate(payload) {
            tracing::warn!(topic, len = payload.len(), "discarding foreign frame");
            return false;
        }
        let message = match Message::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(topic, error = %err, "discarding undecodable frame");
                return false;
            }
        };

        let matched = {
            let mut calls = self
                .calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(pending) = calls.get_mut(topic) else {
                tracing::debug!(
                    topic,
                    sequence_id = message.sequence_id,
                    "reply without pending call"
                );
                return false;
            };

            let mut matched: Option<ReplySink> = None;
            let mut index = 0;
            while index < pending.len() {
                if matched.is_none() && pending[index].sequence_id == message.sequence_id {
                    matched = pending.remove(index).sink;
                    continue;
                }
                pending[index].misses += 1;
                if pending[index].misses >= self.miss_threshold {
                    let evicted = pending.remove(index);
                    tracing::debug!(
                        topic,
                        sequence_id = evicted.sequence_id,
                        "evicting pending call past miss threshold"
                    );
                } else {
                    index += 1;
                }
            }
            if pending.is_empty() {
                calls.remove(topic);
            }
            matched
        };

        // Fire outside the lock; the sink may run arbitrary caller code.
        match matched {
            Some(sink) => {
                sink(message);
                true
            }
            None => false,
        }
    }

    /// Number of pending calls registered on a topic.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const TOPIC: &str = "edgebus/replies/gate/doorctl";

    fn reply(sequence_id: u64, body: &[u8]) -> Vec<u8> {
        Message::data("doorctl", sequence_id, body.to_vec()).encode()
    }

    #[test]
    fn replies_match_by_id_not_order() {
        let router = Router::new(10);
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();

        router.register(TOPIC, 1, Box::new(move |m| tx_a.send(m).unwrap()));
        router.register(TOPIC, 2, Box::new(move |m| tx_b.send(m).unwrap()));

        // Replies injected in reverse order.
        assert!(router.dispatch(TOPIC, &reply(2, b"second")));
        assert!(router.dispatch(TOPIC, &reply(1, b"first")));

        assert_eq!(rx_a.recv().unwrap().body, b"first");
        assert_eq!(rx_b.recv().unwrap().body, b"second");
        assert_eq!(router.pending(TOPIC), 0);
    }

    #[test]
    fn unmatched_call_ages_out() {
        let router = Router::new(10);
        let (tx, rx) = mpsc::channel();
        router.register(TOPIC, 42, Box::new(move |m| tx.send(m).unwrap()));

        for sequence_id in 100..109 {
            assert!(!router.dispatch(TOPIC, &reply(sequence_id, b"")));
            assert_eq!(router.pending(TOPIC), 1);
        }
        // Tenth miss reaches the threshold.
        assert!(!router.dispatch(TOPIC, &reply(109, b"")));
        assert_eq!(router.pending(TOPIC), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn framing_errors_never_reach_sinks() {
        let router = Router::new(10);
        let (tx, rx) = mpsc::channel();
        router.register(TOPIC, 7, Box::new(move |m| tx.send(m).unwrap()));

        assert!(!router.dispatch(TOPIC, b"junk"));
        let mut bad_version = reply(7, b"x");
        bad_version[1] = 0x7F;
        assert!(!router.dispatch(TOPIC, &bad_version));

        // The call is still pending; garbage does not age it either way.
        assert_eq!(router.pending(TOPIC), 1);
        assert!(rx.try_recv().is_err());

        assert!(router.dispatch(TOPIC, &reply(7, b"ok")));
        assert_eq!(rx.recv().unwrap().body, b"ok");
    }

    #[test]
    fn topics_are_independent() {
        let router = Router::new(10);
        let other = "edgebus/replies/gate/lightctl";
        let (tx, _rx) = mpsc::channel();
        router.register(TOPIC, 5, Box::new(move |m| tx.send(m).unwrap()));

        assert!(!router.dispatch(other, &reply(5, b"")));
        assert_eq!(router.pending(TOPIC), 1);
    }

    #[test]
    fn register_during_dispatch_is_not_lost() {
        // The sink itself registers a follow-up call; the lock is released
        // before sinks fire, so this must not deadlock.
        let router = std::sync::Arc::new(Router::new(10));
        let inner = std::sync::Arc::clone(&router);
        let (tx, rx) = mpsc::channel();

        router.register(
            TOPIC,
            1,
            Box::new(move |_| {
                inner.register(TOPIC, 2, Box::new(move |m| tx.send(m).unwrap()));
            }),
        );

        assert!(router.dispatch(TOPIC, &reply(1, b"")));
        assert!(router.dispatch(TOPIC, &reply(2, b"done")));
        assert_eq!(rx.recv().unwrap().body, b"done");
    }
}
