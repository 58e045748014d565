//! Publish/subscribe broker.
//!
//! # Model
//!
//! A channel has one owner (a resource id plus its type), a display name
//! and any number of subscribers. Each subscriber is a resource together
//! with the [`Mailbox`] that receives what is published on the channel.
//!
//! ```text
//! Terminal ──publish(process channel)──► [Process mailbox]
//! Process  ──publish(terminal channel)─► [Terminal mailbox]
//! ```
//!
//! # Sharing
//!
//! The registry sits behind a single mutex and the broker is shared as
//! [`SharedBroker`] between the tick thread and the external process loops.
//! [`Broker::publish_to`] snapshots the subscriber list and releases the
//! lock before delivering, so a slow mailbox never blocks channel creation
//! or teardown. Delivery to a single subscriber keeps publish order.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::mailbox::{Delivery, Mailbox, MailboxError};

/// Numeric channel identifier. Never 0 while registered.
pub type ChannelId = u32;

/// Shared handle to the broker.
pub type SharedBroker = Arc<Broker>;

/// Identifier of a resource that owns or subscribes to channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of resource behind a [`ResourceId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// A terminal surface.
    Terminal,
    /// A process (task or external).
    Process,
}

/// Broker addressing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// No channel is registered under this id.
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),
    /// The resource already subscribes to the channel.
    #[error("resource {resource} already subscribes to channel {channel}")]
    DuplicateSubscriber {
        /// Channel subscribed to.
        channel: ChannelId,
        /// Resource that was already subscribed.
        resource: ResourceId,
    },
}

#[derive(Debug, Clone)]
struct Subscriber {
    resource: ResourceId,
    resource_type: ResourceType,
    mailbox: Mailbox,
}

#[derive(Debug)]
struct Channel {
    owner: ResourceId,
    owner_type: ResourceType,
    name: String,
    subscribers: Vec<Subscriber>,
}

#[derive(Debug)]
struct Registry {
    channels: HashMap<ChannelId, Channel>,
    next_channel_id: ChannelId,
}

impl Registry {
    /// Next free id. Wraps and skips 0 and ids still registered.
    fn alloc_channel_id(&mut self) -> ChannelId {
        loop {
            let id = self.next_channel_id;
            self.next_channel_id = self.next_channel_id.wrapping_add(1).max(1);
            if !self.channels.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Registry of named channels.
#[derive(Debug)]
pub struct Broker {
    registry: Mutex<Registry>,
}

impl Broker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                channels: HashMap::new(),
                next_channel_id: 1,
            }),
        }
    }

    /// Create an empty broker behind an `Arc`.
    pub fn shared() -> SharedBroker {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a channel owned by `owner` and return its id.
    pub fn create_channel(
        &self,
        owner: ResourceId,
        owner_type: ResourceType,
        name: impl Into<String>,
    ) -> ChannelId {
        let name = name.into();
        let mut registry = self.lock();
        let id = registry.alloc_channel_id();
        log::debug!("[broker] create channel {id} '{name}' owned by {owner_type:?} {owner}");
        registry.channels.insert(
            id,
            Channel {
                owner,
                owner_type,
                name,
                subscribers: Vec::new(),
            },
        );
        id
    }

    /// Subscribe `mailbox` (belonging to `resource`) to `channel`.
    pub fn add_subscriber(
        &self,
        channel: ChannelId,
        resource: ResourceId,
        resource_type: ResourceType,
        mailbox: Mailbox,
    ) -> Result<(), BrokerError> {
        let mut registry = self.lock();
        let entry = registry
            .channels
            .get_mut(&channel)
            .ok_or(BrokerError::UnknownChannel(channel))?;
        if entry
            .subscribers
            .iter()
            .any(|s| s.resource == resource && s.resource_type == resource_type)
        {
            return Err(BrokerError::DuplicateSubscriber { channel, resource });
        }
        entry.subscribers.push(Subscriber {
            resource,
            resource_type,
            mailbox,
        });
        Ok(())
    }

    /// Deliver a copy of `message` to every subscriber of `channel`.
    ///
    /// Returns how many mailboxes accepted the message. Subscribers whose
    /// mailbox is closed or stayed full are skipped and logged.
    pub fn publish_to(&self, channel: ChannelId, message: &[u8]) -> Result<usize, BrokerError> {
        let subscribers = {
            let registry = self.lock();
            let entry = registry
                .channels
                .get(&channel)
                .ok_or(BrokerError::UnknownChannel(channel))?;
            entry.subscribers.clone()
        };

        let mut delivered = 0;
        for sub in &subscribers {
            match sub.mailbox.send(message.to_vec()) {
                Ok(Delivery::Delivered) => delivered += 1,
                Ok(Delivery::Backpressure) => {
                    log::warn!(
                        "[broker] channel {channel}: {:?} {} is backpressured, dropped message",
                        sub.resource_type,
                        sub.resource
                    );
                }
                Err(MailboxError::Closed | MailboxError::AlreadyClosed) => {
                    log::debug!(
                        "[broker] channel {channel}: {:?} {} mailbox closed",
                        sub.resource_type,
                        sub.resource
                    );
                }
            }
        }
        Ok(delivered)
    }

    /// Unregister a channel and all of its subscriptions.
    pub fn remove_channel(&self, channel: ChannelId) -> Result<(), BrokerError> {
        let removed = self.lock().channels.remove(&channel);
        match removed {
            Some(entry) => {
                log::debug!("[broker] removed channel {channel} '{}'", entry.name);
                Ok(())
            }
            None => Err(BrokerError::UnknownChannel(channel)),
        }
    }

    /// Unsubscribe `resource` from `channel`. Returns whether it was subscribed.
    pub fn remove_subscriber(
        &self,
        channel: ChannelId,
        resource: ResourceId,
        resource_type: ResourceType,
    ) -> Result<bool, BrokerError> {
        let mut registry = self.lock();
        let entry = registry
            .channels
            .get_mut(&channel)
            .ok_or(BrokerError::UnknownChannel(channel))?;
        let before = entry.subscribers.len();
        entry
            .subscribers
            .retain(|s| !(s.resource == resource && s.resource_type == resource_type));
        Ok(entry.subscribers.len() != before)
    }

    /// Drop every channel owned by `resource` and every subscription it holds.
    ///
    /// Returns the number of channels removed.
    pub fn remove_resource(&self, resource: ResourceId, resource_type: ResourceType) -> usize {
        let mut registry = self.lock();
        let before = registry.channels.len();
        registry
            .channels
            .retain(|_, c| !(c.owner == resource && c.owner_type == resource_type));
        let removed = before - registry.channels.len();
        for channel in registry.channels.values_mut() {
            channel
                .subscribers
                .retain(|s| !(s.resource == resource && s.resource_type == resource_type));
        }
        if removed > 0 {
            log::debug!("[broker] {resource_type:?} {resource} released {removed} channels");
        }
        removed
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    /// Number of subscribers on `channel`, `None` if unknown.
    pub fn subscriber_count(&self, channel: ChannelId) -> Option<usize> {
        self.lock().channels.get(&channel).map(|c| c.subscribers.len())
    }

    /// Name of `channel`, `None` if unknown.
    pub fn channel_name(&self, channel: ChannelId) -> Option<String> {
        self.lock().channels.get(&channel).map(|c| c.name.clone())
    }

    /// Owner of `channel`, `None` if unknown.
    pub fn channel_owner(&self, channel: ChannelId) -> Option<(ResourceId, ResourceType)> {
        self.lock()
            .channels
            .get(&channel)
            .map(|c| (c.owner, c.owner_type))
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MailboxConfig;
    use std::time::Duration;

    const TERM: ResourceId = ResourceId(10);

    #[test]
    fn test_publish_reaches_every_subscriber_in_order() {
        let broker = Broker::new();
        let ch = broker.create_channel(TERM, ResourceType::Terminal, "t");
        let boxes: Vec<Mailbox> = (0..3).map(|_| Mailbox::default()).collect();
        for (i, mb) in boxes.iter().enumerate() {
            broker
                .add_subscriber(ch, ResourceId(100 + i as u64), ResourceType::Process, mb.clone())
                .unwrap();
        }

        assert_eq!(broker.publish_to(ch, b"one").unwrap(), 3);
        assert_eq!(broker.publish_to(ch, b"two").unwrap(), 3);

        for mb in &boxes {
            assert_eq!(mb.drain(), vec![b"one".to_vec(), b"two".to_vec()]);
        }
    }

    #[test]
    fn test_publish_with_no_subscribers_delivers_nothing() {
        let broker = Broker::new();
        let ch = broker.create_channel(TERM, ResourceType::Terminal, "empty");
        assert_eq!(broker.publish_to(ch, b"x").unwrap(), 0);
    }

    #[test]
    fn test_publish_to_unknown_channel_is_error() {
        let broker = Broker::new();
        assert_eq!(broker.publish_to(42, b"x"), Err(BrokerError::UnknownChannel(42)));
    }

    #[test]
    fn test_duplicate_subscriber_rejected() {
        let broker = Broker::new();
        let ch = broker.create_channel(TERM, ResourceType::Terminal, "t");
        let mb = Mailbox::default();
        broker
            .add_subscriber(ch, ResourceId(1), ResourceType::Process, mb.clone())
            .unwrap();
        assert!(matches!(
            broker.add_subscriber(ch, ResourceId(1), ResourceType::Process, mb),
            Err(BrokerError::DuplicateSubscriber { .. })
        ));
        // Same id, different resource type, is a different subscriber.
        broker
            .add_subscriber(ch, ResourceId(1), ResourceType::Terminal, Mailbox::default())
            .unwrap();
        assert_eq!(broker.subscriber_count(ch), Some(2));
    }

    #[test]
    fn test_channel_ids_are_unique_and_nonzero() {
        let broker = Broker::new();
        let a = broker.create_channel(TERM, ResourceType::Terminal, "a");
        let b = broker.create_channel(TERM, ResourceType::Terminal, "b");
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(broker.channel_name(b).as_deref(), Some("b"));
        assert_eq!(broker.channel_owner(a), Some((TERM, ResourceType::Terminal)));
    }

    #[test]
    fn test_channel_id_allocation_skips_registered_ids() {
        let mut registry = Registry {
            channels: HashMap::new(),
            next_channel_id: ChannelId::MAX,
        };
        registry.channels.insert(
            1,
            Channel {
                owner: TERM,
                owner_type: ResourceType::Terminal,
                name: String::new(),
                subscribers: Vec::new(),
            },
        );
        assert_eq!(registry.alloc_channel_id(), ChannelId::MAX);
        assert_eq!(registry.alloc_channel_id(), 2);
    }

    #[test]
    fn test_remove_resource_drops_owned_channels_and_subscriptions() {
        let broker = Broker::new();
        let proc_id = ResourceId(20);
        let term_ch = broker.create_channel(TERM, ResourceType::Terminal, "term");
        let proc_ch = broker.create_channel(proc_id, ResourceType::Process, "proc");
        broker
            .add_subscriber(term_ch, proc_id, ResourceType::Process, Mailbox::default())
            .unwrap();
        broker
            .add_subscriber(proc_ch, TERM, ResourceType::Terminal, Mailbox::default())
            .unwrap();

        assert_eq!(broker.remove_resource(TERM, ResourceType::Terminal), 1);
        assert_eq!(broker.channel_count(), 1);
        assert_eq!(broker.subscriber_count(proc_ch), Some(0));

        assert_eq!(broker.remove_resource(proc_id, ResourceType::Process), 1);
        assert_eq!(broker.channel_count(), 0);
    }

    #[test]
    fn test_remove_subscriber_and_channel() {
        let broker = Broker::new();
        let ch = broker.create_channel(TERM, ResourceType::Terminal, "t");
        let mb = Mailbox::default();
        broker
            .add_subscriber(ch, ResourceId(5), ResourceType::Process, mb.clone())
            .unwrap();
        assert_eq!(broker.remove_subscriber(ch, ResourceId(5), ResourceType::Process), Ok(true));
        assert_eq!(broker.remove_subscriber(ch, ResourceId(5), ResourceType::Process), Ok(false));
        assert_eq!(broker.publish_to(ch, b"x").unwrap(), 0);
        assert!(mb.is_empty());

        broker.remove_channel(ch).unwrap();
        assert_eq!(broker.remove_channel(ch), Err(BrokerError::UnknownChannel(ch)));
    }

    #[test]
    fn test_closed_or_full_subscribers_are_skipped() {
        let broker = Broker::new();
        let ch = broker.create_channel(TERM, ResourceType::Terminal, "t");
        let open = Mailbox::default();
        let closed = Mailbox::default();
        let full = Mailbox::new(MailboxConfig {
            capacity: 1,
            send_timeout: Duration::from_millis(1),
        });
        full.send(vec![0]).unwrap();
        closed.close().unwrap();
        broker.add_subscriber(ch, ResourceId(1), ResourceType::Process, open.clone()).unwrap();
        broker.add_subscriber(ch, ResourceId(2), ResourceType::Process, closed).unwrap();
        broker.add_subscriber(ch, ResourceId(3), ResourceType::Process, full.clone()).unwrap();

        assert_eq!(broker.publish_to(ch, b"m").unwrap(), 1);
        assert_eq!(open.len(), 1);
        assert_eq!(full.len(), 1);
    }

    #[test]
    fn test_concurrent_create_and_publish() {
        let broker = Broker::shared();
        let ch = broker.create_channel(TERM, ResourceType::Terminal, "t");
        let mb = Mailbox::default();
        broker.add_subscriber(ch, ResourceId(1), ResourceType::Process, mb.clone()).unwrap();

        let creator = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || {
                for i in 0..100 {
                    broker.create_channel(ResourceId(i), ResourceType::Process, format!("c{i}"));
                }
            })
        };
        for i in 0..100u8 {
            broker.publish_to(ch, &[i]).unwrap();
        }
        creator.join().unwrap();

        assert_eq!(broker.channel_count(), 101);
        assert_eq!(mb.drain(), (0..100u8).map(|i| vec![i]).collect::<Vec<_>>());
    }
}
