//! Collaborator interfaces.
//!
//! The pipeline never touches storage directly. Everything it reads goes
//! through [`Lookup`]; everything it writes goes through exactly one call to
//! [`Persistence`] (plus [`AccountService`] for new senders). Calls are
//! synchronous; implementations must be shareable across threads so a
//! [`crate::MailHandler`] can serve concurrent ingestions.

use crate::attributes::ResolvedAttributes;
use crate::envelope::AttachmentBlob;
use crate::error::CollaboratorResult;
use crate::identity::NewAccount;
use crate::model::{
    Author, CategoryId, CustomFieldId, GroupId, ItemId, ItemInfo, JournalId, PostId, PostInfo,
    PriorityId, ProjectId, StatusId, TrackerId, UserId, UserInfo, VersionId,
};
use serde::{Deserialize, Serialize};

/// Read-only name and record resolution.
///
/// Name lookups are case-insensitive. `Ok(None)` means "no such record";
/// `Err` means the lookup itself failed.
pub trait Lookup: Send + Sync {
    /// Project by identifier or name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn project(&self, name: &str) -> CollaboratorResult<Option<ProjectId>>;

    /// Trackers enabled on a project, in display order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn project_trackers(&self, project: ProjectId) -> CollaboratorResult<Vec<TrackerId>>;

    /// Tracker enabled on a project, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn tracker(&self, project: ProjectId, name: &str) -> CollaboratorResult<Option<TrackerId>>;

    /// Status by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn status(&self, name: &str) -> CollaboratorResult<Option<StatusId>>;

    /// Priority by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn priority(&self, name: &str) -> CollaboratorResult<Option<PriorityId>>;

    /// Category of a project, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn category(&self, project: ProjectId, name: &str) -> CollaboratorResult<Option<CategoryId>>;

    /// Version shared with a project, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn version(&self, project: ProjectId, name: &str) -> CollaboratorResult<Option<VersionId>>;

    /// User that items of the project can be assigned to, by email, login
    /// or full name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn assignable_user(&self, project: ProjectId, name: &str)
    -> CollaboratorResult<Option<UserId>>;

    /// Group that items of the project can be assigned to, by name. Only
    /// consulted when group assignment is enabled; trackers without groups
    /// keep the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn assignable_group(
        &self,
        project: ProjectId,
        name: &str,
    ) -> CollaboratorResult<Option<GroupId>> {
        let _ = (project, name);
        Ok(None)
    }

    /// Custom field available for items of the project and tracker.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn custom_field(
        &self,
        project: ProjectId,
        tracker: Option<TrackerId>,
        name: &str,
    ) -> CollaboratorResult<Option<CustomFieldId>>;

    /// Account by email address.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn user_by_email(&self, email: &str) -> CollaboratorResult<Option<UserInfo>>;

    /// Returns true if an account already uses the login.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn login_exists(&self, login: &str) -> CollaboratorResult<bool>;

    /// Item by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn item(&self, id: ItemId) -> CollaboratorResult<Option<ItemInfo>>;

    /// Post by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn post(&self, id: PostId) -> CollaboratorResult<Option<PostInfo>>;

    /// Item whose stored message id (or one of its journals') matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn item_by_message_id(&self, message_id: &str) -> CollaboratorResult<Option<ItemId>>;

    /// Post whose stored message id matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn post_by_message_id(&self, message_id: &str) -> CollaboratorResult<Option<PostId>>;
}

/// A new item to persist.
#[derive(Debug, Clone)]
pub struct ItemDraft {
    /// Destination project.
    pub project: ProjectId,
    /// Tracker of the item.
    pub tracker: TrackerId,
    /// Author.
    pub author: Author,
    /// Subject, already truncated.
    pub subject: String,
    /// Description.
    pub description: String,
    /// Resolved attributes; `tracker` is already folded into `tracker`.
    pub attributes: ResolvedAttributes,
    /// Users to add as watchers.
    pub watchers: Vec<UserId>,
    /// Attachments, in message order.
    pub attachments: Vec<AttachmentBlob>,
    /// Message id of the source email.
    pub message_id: Option<String>,
}

/// Changes to an existing item, recorded as one journal.
#[derive(Debug, Clone)]
pub struct ItemChanges {
    /// Item to update.
    pub item: ItemId,
    /// Author of the journal.
    pub author: Author,
    /// Journal notes.
    pub notes: String,
    /// Only the fields set here change.
    pub changes: ResolvedAttributes,
    /// Attachments appended to the item.
    pub attachments: Vec<AttachmentBlob>,
    /// Message id of the source email.
    pub message_id: Option<String>,
}

/// A new reply in a discussion thread.
#[derive(Debug, Clone)]
pub struct PostDraft {
    /// Project of the thread.
    pub project: ProjectId,
    /// Thread root the reply belongs to.
    pub parent: PostId,
    /// Author.
    pub author: Author,
    /// Subject, already truncated.
    pub subject: String,
    /// Content.
    pub content: String,
    /// Attachments, in message order.
    pub attachments: Vec<AttachmentBlob>,
    /// Message id of the source email.
    pub message_id: Option<String>,
}

/// Storage writes. Each method is one atomic write.
pub trait Persistence: Send + Sync {
    /// Creates an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is invalid or cannot be stored.
    fn create_item(&self, draft: ItemDraft) -> CollaboratorResult<ItemId>;

    /// Records a journal on an item and applies its changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is missing or cannot be stored.
    fn update_item(&self, changes: ItemChanges) -> CollaboratorResult<JournalId>;

    /// Creates a reply post.
    ///
    /// # Errors
    ///
    /// Returns an error if the post is invalid or cannot be stored.
    fn create_post(&self, draft: PostDraft) -> CollaboratorResult<PostId>;
}

/// Account provisioning.
pub trait AccountService: Send + Sync {
    /// Creates an active account, issues its credentials and sends the
    /// activation notice. Must be safe against concurrent duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if the account cannot be created.
    fn create_account(&self, account: &NewAccount) -> CollaboratorResult<UserId>;
}

/// Action checked against the authorization collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create items.
    AddItems,
    /// Add notes to items.
    AddItemNotes,
    /// Change item attributes.
    EditItems,
    /// Add watchers to items.
    AddItemWatchers,
    /// Reply in discussion threads.
    AddPosts,
}

impl Action {
    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "add_items" => Some(Self::AddItems),
            "add_item_notes" => Some(Self::AddItemNotes),
            "edit_items" => Some(Self::EditItems),
            "add_item_watchers" => Some(Self::AddItemWatchers),
            "add_posts" => Some(Self::AddPosts),
            _ => None,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AddItems => "add_items",
            Self::AddItemNotes => "add_item_notes",
            Self::EditItems => "edit_items",
            Self::AddItemWatchers => "add_item_watchers",
            Self::AddPosts => "add_posts",
        }
    }
}

/// Who a permission is checked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    /// An existing account.
    User(UserId),
    /// An account not created yet; it is a member of no project.
    NonMember,
    /// The anonymous user.
    Anonymous,
}

impl From<Author> for Principal {
    fn from(author: Author) -> Self {
        match author {
            Author::User(id) => Self::User(id),
            Author::Anonymous => Self::Anonymous,
        }
    }
}

/// Permission checks.
pub trait Authorization: Send + Sync {
    /// Returns true if `principal` may perform `action` on `project`.
    ///
    /// # Errors
    ///
    /// Returns an error if the check cannot be performed.
    fn is_allowed(
        &self,
        principal: Principal,
        action: Action,
        project: ProjectId,
    ) -> CollaboratorResult<bool>;
}

/// Event published after a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// An item was created.
    ItemCreated {
        /// New item.
        item: ItemId,
    },
    /// An item received a journal.
    ItemUpdated {
        /// Updated item.
        item: ItemId,
        /// New journal.
        journal: JournalId,
    },
    /// A reply was posted.
    Posted {
        /// New post.
        post: PostId,
    },
}

/// Outbound notifications. Delivery is not the pipeline's concern; a
/// failure here never undoes the write that triggered it.
pub trait Notifier: Send + Sync {
    /// Publishes an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be queued.
    fn notify(&self, event: &Event) -> CollaboratorResult<()>;
}

/// The five collaborators a [`crate::MailHandler`] works against.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Name and record resolution.
    pub lookup: &'a dyn Lookup,
    /// Storage writes.
    pub persistence: &'a dyn Persistence,
    /// Account provisioning.
    pub accounts: &'a dyn AccountService,
    /// Permission checks.
    pub authorization: &'a dyn Authorization,
    /// Outbound notifications.
    pub notifier: &'a dyn Notifier,
}

impl<'a> Collaborators<'a> {
    /// Uses one object for all five roles.
    #[must_use]
    pub fn single<T>(collaborator: &'a T) -> Self
    where
        T: Lookup + Persistence + AccountService + Authorization + Notifier,
    {
        Self {
            lookup: collaborator,
            persistence: collaborator,
            accounts: collaborator,
            authorization: collaborator,
            notifier: collaborator,
        }
    }
}

impl std::fmt::Debug for Collaborators<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
