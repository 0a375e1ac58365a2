use std::collections::HashMap;

use anyhow::Result;

use healthbridge_types::models::UserProfile;

use crate::Database;
use crate::models::MessageRow;

pub struct ConversationRow {
    pub counterpart: UserProfile,
    pub last_message: MessageRow,
}

impl Database {
    /// One entry per counterpart with the latest message exchanged, most
    /// recent conversation first.
    pub fn list_conversations(&self, user_id: i64) -> Result<Vec<ConversationRow>> {
        let rows = self.list_user_messages(user_id)?;
        Ok(aggregate(user_id, rows))
    }
}

/// Group messages by the other participant and keep the latest one of each
/// group: greatest `created_at`, then greatest id. Input order does not matter.
pub fn aggregate(user_id: i64, rows: Vec<MessageRow>) -> Vec<ConversationRow> {
    let mut latest: HashMap<i64, MessageRow> = HashMap::new();

    for row in rows {
        let counterpart_id = if row.sender_id == user_id { row.receiver_id } else { row.sender_id };
        let replace = latest
            .get(&counterpart_id)
            .is_none_or(|current| is_newer(&row, current));
        if replace {
            latest.insert(counterpart_id, row);
        }
    }

    let mut conversations: Vec<ConversationRow> = latest
        .into_values()
        .map(|last_message| {
            let counterpart = if last_message.sender_id == user_id {
                last_message.receiver.clone()
            } else {
                last_message.sender.clone()
            };
            ConversationRow { counterpart, last_message }
        })
        .collect();

    conversations.sort_by(|a, b| {
        (&b.last_message.created_at, b.last_message.id).cmp(&(&a.last_message.created_at, a.last_message.id))
    });
    conversations
}

fn is_newer(candidate: &MessageRow, current: &MessageRow) -> bool {
    (&candidate.created_at, candidate.id) > (&current.created_at, current.id)
}
