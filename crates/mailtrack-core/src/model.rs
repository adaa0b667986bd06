//! Domain identifiers and lookup records.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Create a new ID.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for a project.
    ProjectId
);
id_type!(
    /// Unique identifier for a tracker (item type).
    TrackerId
);
id_type!(
    /// Unique identifier for an item status.
    StatusId
);
id_type!(
    /// Unique identifier for a priority.
    PriorityId
);
id_type!(
    /// Unique identifier for an item category.
    CategoryId
);
id_type!(
    /// Unique identifier for a target version.
    VersionId
);
id_type!(
    /// Unique identifier for a user account.
    UserId
);
id_type!(
    /// Unique identifier for a group of users.
    GroupId
);
id_type!(
    /// Unique identifier for a custom field.
    CustomFieldId
);
id_type!(
    /// Unique identifier for a tracked item.
    ItemId
);
id_type!(
    /// Unique identifier for a discussion post.
    PostId
);
id_type!(
    /// Unique identifier for an item journal (update record).
    JournalId
);

/// Who an item is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignee {
    /// A user account.
    User(UserId),
    /// A group, when the tracker allows group assignment.
    Group(GroupId),
}

impl std::fmt::Display for Assignee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Who wrote an ingested message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    /// A registered account.
    User(UserId),
    /// The anonymous user.
    Anonymous,
}

/// Account as seen by the lookup collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserInfo {
    /// Account id.
    pub id: UserId,
    /// False for locked accounts.
    pub active: bool,
}

/// Stored item as seen by the lookup collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    /// Item id.
    pub id: ItemId,
    /// Owning project.
    pub project: ProjectId,
    /// Current tracker.
    pub tracker: TrackerId,
    /// Current subject.
    pub subject: String,
}

/// Stored discussion post as seen by the lookup collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostInfo {
    /// Post id.
    pub id: PostId,
    /// Owning project.
    pub project: ProjectId,
    /// First post of the thread; equal to `id` for a thread root.
    pub root: PostId,
    /// Post subject.
    pub subject: String,
    /// Locked threads accept no replies.
    pub locked: bool,
}

impl PostInfo {
    /// Returns true if this post starts its thread.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.root == self.id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_serde() {
        let id = ItemId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        assert_eq!(serde_json::from_str::<ItemId>("7").unwrap(), ItemId(7));
    }

    #[test]
    fn test_author_serde() {
        let json = serde_json::to_string(&Author::User(UserId(2))).unwrap();
        assert_eq!(json, r#"{"user":2}"#);
        assert_eq!(
            serde_json::to_string(&Author::Anonymous).unwrap(),
            r#""anonymous""#
        );
    }

    #[test]
    fn test_assignee_serde() {
        let json = serde_json::to_string(&Assignee::Group(GroupId(11))).unwrap();
        assert_eq!(json, r#"{"group":11}"#);
        assert_eq!(
            serde_json::from_str::<Assignee>(r#"{"user":2}"#).unwrap(),
            Assignee::User(UserId(2))
        );
        assert_eq!(Assignee::User(UserId(2)).to_string(), "2");
        assert_eq!(Assignee::Group(GroupId(11)).to_string(), "group:11");
    }

    #[test]
    fn test_post_is_root() {
        let post = PostInfo {
            id: PostId(2),
            project: ProjectId(1),
            root: PostId(1),
            subject: "Re: First post".to_string(),
            locked: false,
        };
        assert!(!post.is_root());
    }
}
