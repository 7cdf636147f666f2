use serde::{Deserialize, Serialize};

/// A user endpoint embedded in a message (sender or receiver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
}

impl UserRef {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

/// A roster user as returned by `GET /users` and `GET /user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: UserRef,
    pub receiver: UserRef,
    pub content: String,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// True iff the message's endpoint set is exactly `{a, b}` in either
    /// direction. Used to filter live events into the open conversation.
    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.sender.id == a && self.receiver.id == b)
            || (self.sender.id == b && self.receiver.id == a)
    }

    /// The endpoint that is not `self_id`, or `None` when `self_id` is not
    /// an endpoint of this message at all.
    pub fn counterpart(&self, self_id: &str) -> Option<&str> {
        if self.sender.id == self_id {
            Some(&self.receiver.id)
        } else if self.receiver.id == self_id {
            Some(&self.sender.id)
        } else {
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
