// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splitting of homogeneous message sequences into request-sized batches.
//!
//! Batches are bounded by two independent limits: the number of items and the
//! estimated serialized size. The split is greedy and order preserving: the current
//! batch keeps growing while both limits hold, and is closed as soon as the next item
//! would break one of them.
//!
//! An item that is larger than the byte limit on its own is still delivered, alone in
//! its batch, since no smaller partition exists for it.

use crate::message::{Message, MessageKind};

/// Splits `items` into consecutive batches of at most `max_item_count` items whose
/// summed `size_of` does not exceed `max_bytes`.
///
/// A `max_item_count` of zero is treated as one. Sizes are summed with saturation, so
/// `usize::MAX` disables the byte limit.
pub fn split_into_batches<T, F>(
    items: Vec<T>,
    max_item_count: usize,
    max_bytes: usize,
    size_of: F,
) -> Vec<Vec<T>>
where
    F: Fn(&T) -> usize,
{
    let max_item_count = max_item_count.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_bytes: usize = 0;

    for item in items {
        let item_bytes = size_of(&item);
        if !current.is_empty()
            && (current.len() >= max_item_count
                || current_bytes.saturating_add(item_bytes) > max_bytes)
        {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes = current_bytes.saturating_add(item_bytes);
        current.push(item);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// An ordered group of messages of a single kind, delivered in one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    kind: MessageKind,
    messages: Vec<Message>,
    estimated_bytes: usize,
}

impl Batch {
    /// Wraps a single message, whatever its size.
    #[must_use]
    pub fn singleton(message: Message) -> Self {
        Batch {
            kind: message.kind(),
            estimated_bytes: message.estimated_size(),
            messages: vec![message],
        }
    }

    /// Splits same-kind `messages` into batches honoring both limits.
    ///
    /// Callers guarantee the messages share one kind; the consumer only ever
    /// accumulates messages of the kind at the head of the queue.
    #[must_use]
    pub fn split(messages: Vec<Message>, max_item_count: usize, max_bytes: usize) -> Vec<Batch> {
        let sized: Vec<(usize, Message)> = messages
            .into_iter()
            .map(|message| (message.estimated_size(), message))
            .collect();

        split_into_batches(sized, max_item_count, max_bytes, |(size, _)| *size)
            .into_iter()
            .filter_map(|group| {
                let kind = group.first().map(|(_, message)| message.kind())?;
                let estimated_bytes = group
                    .iter()
                    .fold(0usize, |total, (size, _)| total.saturating_add(*size));
                let messages = group.into_iter().map(|(_, message)| message).collect();
                Some(Batch {
                    kind,
                    messages,
                    estimated_bytes,
                })
            })
            .collect()
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    #[must_use]
    pub fn first_id(&self) -> &str {
        self.messages.first().map_or("", Message::entity_id)
    }

    #[must_use]
    pub fn last_id(&self) -> &str {
        self.messages.last().map_or("", Message::entity_id)
    }
}
