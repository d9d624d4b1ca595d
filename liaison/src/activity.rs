use std::collections::VecDeque;

use crate::models::{ActivityItem, ActivityKind};

/// Bounded admin live feed, newest first.
#[derive(Debug, Clone)]
pub struct ActivityFeed {
    capacity: usize,
    items: VecDeque<ActivityItem>,
}

impl ActivityFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, kind: ActivityKind, payload: serde_json::Value, received_at: i64) {
        if self.items.len() == self.capacity {
            self.items.pop_back();
        }
        self.items.push_front(ActivityItem {
            kind,
            payload,
            received_at,
        });
    }

    pub fn items(&self) -> impl Iterator<Item = &ActivityItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
