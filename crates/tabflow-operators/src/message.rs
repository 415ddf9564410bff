//! Messages operators emit, and the collector they emit into.

use tabflow_core::group_key::GroupKey;
use tabflow_mem::Allocator;
use tabflow_table::Table;

use crate::traits::OpError;

#[derive(Debug)]
pub enum Message {
    Process(Table),
    Finish {
        key: GroupKey,
        err: Option<OpError>,
    },
}

impl Message {
    pub fn key(&self) -> &GroupKey {
        match self {
            Message::Process(t) => t.key(),
            Message::Finish { key, .. } => key,
        }
    }
}

/// Collects what one operator call produced. The dispatcher drains it after
/// the call returns and delivers each message to every successor.
#[derive(Debug)]
pub struct Emitter {
    allocator: Allocator,
    messages: Vec<Message>,
}

impl Emitter {
    pub fn new(allocator: Allocator) -> Self {
        Self {
            allocator,
            messages: Vec::new(),
        }
    }

    /// Allocator that output builders must charge.
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn emit(&mut self, table: Table) {
        self.messages.push(Message::Process(table));
    }

    pub fn finish(&mut self, key: GroupKey, err: Option<OpError>) {
        self.messages.push(Message::Finish { key, err });
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Message> {
        self.messages.drain(..)
    }
}
