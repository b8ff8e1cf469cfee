use std::collections::{HashSet, VecDeque};

/// A bounded memory of recently seen `(sender, packet id)` pairs.
///
/// The mesh may deliver the same packet more than once. With a capacity of
/// zero nothing is remembered and every delivery counts as new.
#[derive(Debug, Default)]
pub struct RecentPackets {
    capacity: usize,
    seen: HashSet<(String, u32)>,
    order: VecDeque<(String, u32)>,
}

impl RecentPackets {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Record a delivery; `false` when it was already seen.
    pub fn observe(&mut self, sender: &str, packet_id: u32) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let key = (sender.to_string(), packet_id);
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }
}
