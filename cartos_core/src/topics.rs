// cartos_core/src/topics.rs

use crate::error::ConfigError;
use downcast_rs::{impl_downcast, DowncastSync};
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

// --- Core Topic Structs ---

/// A message stored within a Topic, wrapping the data with a unique ID.
#[derive(Clone, Debug)]
pub struct StampedMessage<T> {
    pub id: u64,
    pub message: T,
}

/// A bounded buffer of the most recent messages sent to one named sink.
/// Publishers write into it; hosts read the latest message or the buffer.
#[derive(Debug)]
pub struct Topic<T: Clone + Send + Sync + 'static> {
    name: String,
    buffer: VecDeque<StampedMessage<T>>,
    next_id: u64,
    capacity: usize,
}

impl<T: Clone + Send + Sync + 'static> Topic<T> {
    pub fn new(name: &str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.to_string(),
            buffer: VecDeque::with_capacity(capacity),
            next_id: 0,
            capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn publish(&mut self, message: T) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        let stamped_message = StampedMessage {
            id: self.next_id,
            message,
        };
        self.buffer.push_back(stamped_message);
        self.next_id += 1;
    }

    pub fn latest(&self) -> Option<&T> {
        self.buffer.back().map(|m| &m.message)
    }

    /// Total number of messages ever published, including evicted ones.
    pub fn published_count(&self) -> u64 {
        self.next_id
    }

    /// Number of messages currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StampedMessage<T>> {
        self.buffer.iter()
    }
}

/// A topic shared between the publisher that writes it and whoever reads it.
pub type SharedTopic<T> = Arc<Mutex<Topic<T>>>;

pub fn shared_topic<T: Clone + Send + Sync + 'static>(name: &str, capacity: usize) -> SharedTopic<T> {
    Arc::new(Mutex::new(Topic::new(name, capacity)))
}

// --- Trait for Type-Erased Topics ---
/// Allows storing topics of different message types in one map.
pub trait AnyTopic: DowncastSync {
    fn published_count(&self) -> u64;
    fn buffered(&self) -> usize;
}
impl_downcast!(sync AnyTopic);

impl<T: Clone + Send + Sync + 'static> AnyTopic for Mutex<Topic<T>> {
    fn published_count(&self) -> u64 {
        self.lock().published_count()
    }

    fn buffered(&self) -> usize {
        self.lock().len()
    }
}

struct TopicInfo {
    topic: Arc<dyn AnyTopic>,
    topic_type: TypeId,
}

/// Registry of every topic in a host, keyed by name.
#[derive(Default)]
pub struct TopicBus {
    topics: HashMap<String, TopicInfo>,
}

impl TopicBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_topic<T: Clone + Send + Sync + 'static>(
        &mut self,
        name: &str,
        capacity: usize,
    ) -> Result<SharedTopic<T>, ConfigError> {
        if self.topics.contains_key(name) {
            return Err(ConfigError::DuplicateTopic(name.to_string()));
        }
        let topic = shared_topic::<T>(name, capacity);
        self.topics.insert(
            name.to_string(),
            TopicInfo {
                topic: topic.clone(),
                topic_type: TypeId::of::<T>(),
            },
        );
        Ok(topic)
    }

    /// Returns the topic if it exists and carries messages of type `T`.
    pub fn get_topic<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Option<SharedTopic<T>> {
        let info = self.topics.get(name)?;
        if info.topic_type != TypeId::of::<T>() {
            return None;
        }
        info.topic.clone().downcast_arc::<Mutex<Topic<T>>>().ok()
    }

    /// `(name, published, buffered)` for every topic, sorted by name.
    pub fn summary(&self) -> Vec<(String, u64, usize)> {
        let mut rows: Vec<_> = self
            .topics
            .iter()
            .map(|(name, info)| (name.clone(), info.topic.published_count(), info.topic.buffered()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_evicts_oldest_when_full() {
        let mut topic = Topic::new("/scan", 2);
        topic.publish(1);
        topic.publish(2);
        topic.publish(3);
        assert_eq!(topic.len(), 2);
        assert_eq!(topic.published_count(), 3);
        assert_eq!(topic.latest(), Some(&3));
        let ids: Vec<u64> = topic.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn bus_hands_out_typed_topics() {
        let mut bus = TopicBus::new();
        let topic = bus.create_topic::<u32>("/cloud", 4).unwrap();
        topic.lock().publish(7);

        let same = bus.get_topic::<u32>("/cloud").expect("typed lookup");
        assert_eq!(same.lock().latest(), Some(&7));
        assert!(bus.get_topic::<String>("/cloud").is_none());
        assert!(bus.get_topic::<u32>("/missing").is_none());

        assert!(matches!(
            bus.create_topic::<u32>("/cloud", 4),
            Err(ConfigError::DuplicateTopic(_))
        ));
        assert_eq!(bus.summary(), vec![("/cloud".to_string(), 1, 1)]);
    }
}
