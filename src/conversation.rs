use crate::lane::LaneId;
use crate::provider::Message;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-lane message histories.
///
/// Values are never edited in place: `with_message` returns a new state and leaves
/// `self` untouched. Histories are shared between versions until one of them grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    lanes: BTreeMap<LaneId, Arc<Vec<Message>>>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// History of `lane`, oldest first. Empty for a lane that has not been used.
    pub fn history(&self, lane: LaneId) -> &[Message] {
        self.lanes.get(&lane).map(|h| h.as_slice()).unwrap_or(&[])
    }

    pub fn with_message(&self, lane: LaneId, message: Message) -> Self {
        let mut lanes = self.lanes.clone();
        let history = lanes.entry(lane).or_default();
        Arc::make_mut(history).push(message);
        Self { lanes }
    }

    pub fn lanes(&self) -> impl Iterator<Item = LaneId> + '_ {
        self.lanes.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.values().all(|h| h.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;

    #[test]
    fn append_leaves_previous_version_alone() {
        let v0 = ConversationState::new();
        let v1 = v0.with_message(LaneId::Fireworks, Message::user("hi"));
        let v2 = v1.with_message(LaneId::Fireworks, Message::assistant("hello"));

        assert!(v0.is_empty());
        assert_eq!(v1.history(LaneId::Fireworks).len(), 1);
        assert_eq!(v2.history(LaneId::Fireworks).len(), 2);
        assert_eq!(v2.history(LaneId::Fireworks)[1].role, Role::Assistant);
    }

    #[test]
    fn lanes_are_independent() {
        let s = ConversationState::new()
            .with_message(LaneId::Fireworks, Message::user("a"))
            .with_message(LaneId::Together, Message::user("b"));

        assert_eq!(s.history(LaneId::Fireworks), &[Message::user("a")]);
        assert_eq!(s.history(LaneId::Together), &[Message::user("b")]);
        assert!(s.history(LaneId::OpenAi).is_empty());
        assert_eq!(s.lanes().collect::<Vec<_>>(), vec![LaneId::Fireworks, LaneId::Together]);
    }

    #[test]
    fn untouched_lanes_share_storage() {
        let v1 = ConversationState::new()
            .with_message(LaneId::Fireworks, Message::user("a"))
            .with_message(LaneId::Together, Message::user("b"));
        let v2 = v1.with_message(LaneId::Together, Message::assistant("c"));

        assert!(Arc::ptr_eq(&v1.lanes[&LaneId::Fireworks], &v2.lanes[&LaneId::Fireworks]));
        assert!(!Arc::ptr_eq(&v1.lanes[&LaneId::Together], &v2.lanes[&LaneId::Together]));
    }
}
