use crate::command::message::OutgoingMessage;
use std::collections::VecDeque;

/// How many messages a chain holds before the oldest is dropped.
pub const MESSAGE_CHAIN_LENGTH: usize = 300;

/// Bounded history of sent or received messages, newest last.
pub struct MessageChain<T> {
    messages: VecDeque<T>,
}

impl<T> MessageChain<T> {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::with_capacity(MESSAGE_CHAIN_LENGTH),
        }
    }

    pub fn push(&mut self, message: T) {
        if self.messages.len() == MESSAGE_CHAIN_LENGTH {
            self.messages.pop_front();
        }

        self.messages.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Searches newest to oldest, so of two matches the most recently
    /// pushed one wins.
    pub fn find<F>(&self, predicate: F) -> Option<&T>
    where
        F: Fn(&T) -> bool,
    {
        self.messages.iter().rev().find(|message| predicate(message))
    }
}

impl MessageChain<OutgoingMessage> {
    pub fn find_request(&self, tr_id: u64) -> Option<&OutgoingMessage> {
        self.find(|message| message.tr_id == Some(tr_id))
    }
}

impl<T> Default for MessageChain<T> {
    fn default() -> Self {
        Self::new()
    }
}
