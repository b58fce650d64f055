//! Observer registry for push channel events.

use std::rc::Rc;

/// Something that happened on the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    /// Payload exactly as received; never parsed at this layer.
    Message(String),
    Close,
    Error(String),
}

impl ChannelEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            ChannelEvent::Open => EventCategory::Open,
            ChannelEvent::Message(_) => EventCategory::Message,
            ChannelEvent::Close => EventCategory::Close,
            ChannelEvent::Error(_) => EventCategory::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Open,
    Message,
    Close,
    Error,
}

/// Opaque token returned by `on`, used to unsubscribe exactly that handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Handler = Rc<dyn Fn(&ChannelEvent)>;

#[derive(Default)]
pub struct ObserverRegistry {
    next_id: u64,
    entries: Vec<(SubscriptionId, EventCategory, Handler)>,
}

impl ObserverRegistry {
    pub fn on(&mut self, category: EventCategory, handler: Handler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push((id, category, handler));
        id
    }

    pub fn off(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _, _)| *entry != id);
        self.entries.len() != before
    }

    /// Handlers for `category` in registration order. Returned by value so
    /// handlers can (un)register while being invoked.
    pub fn handlers_for(&self, category: EventCategory) -> Vec<Handler> {
        self.entries
            .iter()
            .filter(|(_, c, _)| *c == category)
            .map(|(_, _, handler)| handler.clone())
            .collect()
    }

    pub fn count(&self, category: EventCategory) -> usize {
        self.entries.iter().filter(|(_, c, _)| *c == category).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
