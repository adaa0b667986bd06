//! In-memory tracker implementing every collaborator trait.
//!
//! State is a [`Snapshot`] that can be loaded from JSON fixtures and read
//! back after ingestion. Used by tests and the command-line front end.

use crate::attributes::ResolvedAttributes;
use crate::collab::{
    AccountService, Action, Authorization, Event, ItemChanges, ItemDraft, Lookup, Notifier,
    Persistence, PostDraft, Principal,
};
use crate::envelope::AttachmentBlob;
use crate::error::{CollaboratorError, CollaboratorResult, ConfigError};
use crate::identity::NewAccount;
use crate::model::{
    Author, CategoryId, CustomFieldId, GroupId, ItemId, ItemInfo, JournalId, PostId, PostInfo,
    PriorityId, ProjectId, StatusId, TrackerId, UserId, UserInfo, VersionId,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const fn yes() -> bool {
    true
}

/// Record with an id and a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Named<I> {
    /// Record id.
    pub id: I,
    /// Display name, matched case-insensitively.
    pub name: String,
}

/// A project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Project id.
    pub id: ProjectId,
    /// Short identifier.
    pub identifier: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Enabled trackers, first one is the default.
    #[serde(default)]
    pub trackers: Vec<TrackerId>,
    /// Item categories.
    #[serde(default)]
    pub categories: Vec<Named<CategoryId>>,
    /// Versions.
    #[serde(default)]
    pub versions: Vec<Named<VersionId>>,
    /// Member accounts; items can be assigned to them.
    #[serde(default)]
    pub members: Vec<UserId>,
    /// Member groups; items can be assigned to them when group assignment
    /// is enabled.
    #[serde(default)]
    pub groups: Vec<GroupId>,
}

/// A custom field definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldRecord {
    /// Field id.
    pub id: CustomFieldId,
    /// Field name.
    pub name: String,
    /// Trackers using the field; empty for all.
    #[serde(default)]
    pub trackers: Vec<TrackerId>,
    /// Projects using the field; empty for all.
    #[serde(default)]
    pub projects: Vec<ProjectId>,
}

/// An account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Account id.
    pub id: UserId,
    /// Login.
    pub login: String,
    /// Email address.
    pub email: String,
    /// First name.
    #[serde(default)]
    pub first_name: String,
    /// Last name.
    #[serde(default)]
    pub last_name: String,
    /// False for locked accounts.
    #[serde(default = "yes")]
    pub active: bool,
    /// Administrators may do anything.
    #[serde(default)]
    pub admin: bool,
}

impl UserRecord {
    fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Actions granted on a project.
///
/// `user: null` grants the anonymous user, or with `non_member: true` any
/// account that is not a member of the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    /// Grantee, `None` for anonymous or non-members.
    #[serde(default)]
    pub user: Option<UserId>,
    /// Grants accounts outside the project's members.
    #[serde(default)]
    pub non_member: bool,
    /// Project.
    pub project: ProjectId,
    /// Granted actions.
    pub actions: Vec<Action>,
}

/// Stored attachment metadata. Content is not kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    /// Attachment id.
    pub id: i64,
    /// File name.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub byte_length: u64,
    /// SHA-256 hex digest.
    pub digest: String,
}

/// A stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Item id.
    pub id: ItemId,
    /// Project.
    pub project: ProjectId,
    /// Tracker.
    pub tracker: TrackerId,
    /// Author.
    pub author: Author,
    /// Subject.
    pub subject: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Current attribute values; `tracker` is kept in [`ItemRecord::tracker`].
    #[serde(default)]
    pub attributes: ResolvedAttributes,
    /// Watchers.
    #[serde(default)]
    pub watchers: Vec<UserId>,
    /// Attachments.
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
    /// Message id of the source email.
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Kind of a journal detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailProperty {
    /// Built-in attribute; name is the attribute.
    Attr,
    /// Custom field; name is the field id.
    Cf,
    /// Added attachment; name is the attachment id.
    Attachment,
}

/// One change recorded in a journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalDetail {
    /// Kind.
    pub property: DetailProperty,
    /// Attribute name, custom field id or attachment id.
    pub name: String,
    /// Previous value.
    pub old_value: Option<String>,
    /// New value.
    pub new_value: Option<String>,
}

/// A stored journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Journal id.
    pub id: JournalId,
    /// Item.
    pub item: ItemId,
    /// Author.
    pub author: Author,
    /// Notes.
    pub notes: String,
    /// Changes.
    #[serde(default)]
    pub details: Vec<JournalDetail>,
    /// Message id of the source email.
    #[serde(default)]
    pub message_id: Option<String>,
}

/// A stored discussion post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    /// Post id.
    pub id: PostId,
    /// Project.
    pub project: ProjectId,
    /// Thread root; `None` for a root.
    #[serde(default)]
    pub parent: Option<PostId>,
    /// Author.
    pub author: Author,
    /// Subject.
    pub subject: String,
    /// Content.
    #[serde(default)]
    pub content: String,
    /// Locked threads accept no replies.
    #[serde(default)]
    pub locked: bool,
    /// Attachments.
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
    /// Message id of the source email.
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Whole tracker state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Projects.
    pub projects: Vec<ProjectRecord>,
    /// Trackers.
    pub trackers: Vec<Named<TrackerId>>,
    /// Item statuses.
    pub statuses: Vec<Named<StatusId>>,
    /// Item priorities.
    pub priorities: Vec<Named<PriorityId>>,
    /// Custom field definitions.
    pub custom_fields: Vec<CustomFieldRecord>,
    /// Accounts.
    pub users: Vec<UserRecord>,
    /// User groups.
    pub groups: Vec<Named<GroupId>>,
    /// Granted actions.
    pub permissions: Vec<PermissionRecord>,
    /// Items.
    pub items: Vec<ItemRecord>,
    /// Journals.
    pub journals: Vec<JournalRecord>,
    /// Posts.
    pub posts: Vec<PostRecord>,
    /// Published events, in order.
    pub events: Vec<Event>,
}

fn same(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn find_named<I: Copy>(records: &[Named<I>], name: &str) -> Option<I> {
    records.iter().find(|r| same(&r.name, name)).map(|r| r.id)
}

impl Snapshot {
    fn project(&self, id: ProjectId) -> Option<&ProjectRecord> {
        self.projects.iter().find(|p| p.id == id)
    }

    fn user(&self, id: UserId) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.id == id)
    }

    fn post(&self, id: PostId) -> Option<&PostRecord> {
        self.posts.iter().find(|p| p.id == id)
    }

    fn next_attachment_id(&self) -> i64 {
        self.items
            .iter()
            .flat_map(|i| &i.attachments)
            .chain(self.posts.iter().flat_map(|p| &p.attachments))
            .map(|a| a.id)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn store_attachments(&self, blobs: Vec<AttachmentBlob>) -> Vec<AttachmentRecord> {
        let first = self.next_attachment_id();
        blobs
            .into_iter()
            .zip(first..)
            .map(|(blob, id)| AttachmentRecord {
                id,
                filename: blob.filename,
                mime_type: blob.mime_type,
                byte_length: blob.byte_length,
                digest: blob.digest,
            })
            .collect()
    }
}

/// Tracker held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: Mutex<Snapshot>,
    fail_notifications: AtomicBool,
}

impl InMemoryTracker {
    /// Creates a tracker from a snapshot.
    #[must_use]
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            fail_notifications: AtomicBool::new(false),
        }
    }

    /// Parses a JSON snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not match the snapshot shape.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Reads a JSON snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Makes every following notification fail.
    pub fn fail_notifications(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::Relaxed);
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.state().clone()
    }

    /// Stored items.
    #[must_use]
    pub fn items(&self) -> Vec<ItemRecord> {
        self.state().items.clone()
    }

    /// Stored item by id.
    #[must_use]
    pub fn item_record(&self, id: ItemId) -> Option<ItemRecord> {
        self.state().items.iter().find(|i| i.id == id).cloned()
    }

    /// Stored journals.
    #[must_use]
    pub fn journals(&self) -> Vec<JournalRecord> {
        self.state().journals.clone()
    }

    /// Stored posts.
    #[must_use]
    pub fn posts(&self) -> Vec<PostRecord> {
        self.state().posts.clone()
    }

    /// Accounts.
    #[must_use]
    pub fn users(&self) -> Vec<UserRecord> {
        self.state().users.clone()
    }

    /// Published events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    fn state(&self) -> MutexGuard<'_, Snapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Lookup for InMemoryTracker {
    fn project(&self, name: &str) -> CollaboratorResult<Option<ProjectId>> {
        Ok(self
            .state()
            .projects
            .iter()
            .find(|p| same(&p.identifier, name) || same(&p.name, name))
            .map(|p| p.id))
    }

    fn project_trackers(&self, project: ProjectId) -> CollaboratorResult<Vec<TrackerId>> {
        Ok(self
            .state()
            .project(project)
            .map(|p| p.trackers.clone())
            .unwrap_or_default())
    }

    fn tracker(&self, project: ProjectId, name: &str) -> CollaboratorResult<Option<TrackerId>> {
        let state = self.state();
        let enabled = state.project(project).map(|p| p.trackers.as_slice()).unwrap_or_default();
        Ok(find_named(&state.trackers, name).filter(|id| enabled.contains(id)))
    }

    fn status(&self, name: &str) -> CollaboratorResult<Option<StatusId>> {
        Ok(find_named(&self.state().statuses, name))
    }

    fn priority(&self, name: &str) -> CollaboratorResult<Option<PriorityId>> {
        Ok(find_named(&self.state().priorities, name))
    }

    fn category(&self, project: ProjectId, name: &str) -> CollaboratorResult<Option<CategoryId>> {
        Ok(self
            .state()
            .project(project)
            .and_then(|p| find_named(&p.categories, name)))
    }

    fn version(&self, project: ProjectId, name: &str) -> CollaboratorResult<Option<VersionId>> {
        Ok(self
            .state()
            .project(project)
            .and_then(|p| find_named(&p.versions, name)))
    }

    fn assignable_user(
        &self,
        project: ProjectId,
        name: &str,
    ) -> CollaboratorResult<Option<UserId>> {
        let state = self.state();
        let Some(project) = state.project(project) else {
            return Ok(None);
        };
        Ok(project
            .members
            .iter()
            .filter_map(|&id| state.user(id))
            .filter(|u| u.active)
            .find(|u| same(&u.email, name) || same(&u.login, name) || same(&u.full_name(), name))
            .map(|u| u.id))
    }

    fn assignable_group(
        &self,
        project: ProjectId,
        name: &str,
    ) -> CollaboratorResult<Option<GroupId>> {
        let state = self.state();
        let members = state.project(project).map(|p| p.groups.as_slice()).unwrap_or_default();
        Ok(find_named(&state.groups, name).filter(|id| members.contains(id)))
    }

    fn custom_field(
        &self,
        project: ProjectId,
        tracker: Option<TrackerId>,
        name: &str,
    ) -> CollaboratorResult<Option<CustomFieldId>> {
        Ok(self
            .state()
            .custom_fields
            .iter()
            .filter(|f| f.projects.is_empty() || f.projects.contains(&project))
            .filter(|f| {
                f.trackers.is_empty() || tracker.is_some_and(|t| f.trackers.contains(&t))
            })
            .find(|f| same(&f.name, name))
            .map(|f| f.id))
    }

    fn user_by_email(&self, email: &str) -> CollaboratorResult<Option<UserInfo>> {
        Ok(self
            .state()
            .users
            .iter()
            .find(|u| same(&u.email, email))
            .map(|u| UserInfo {
                id: u.id,
                active: u.active,
            }))
    }

    fn login_exists(&self, login: &str) -> CollaboratorResult<bool> {
        Ok(self.state().users.iter().any(|u| same(&u.login, login)))
    }

    fn item(&self, id: ItemId) -> CollaboratorResult<Option<ItemInfo>> {
        Ok(self
            .state()
            .items
            .iter()
            .find(|i| i.id == id)
            .map(|i| ItemInfo {
                id: i.id,
                project: i.project,
                tracker: i.tracker,
                subject: i.subject.clone(),
            }))
    }

    fn post(&self, id: PostId) -> CollaboratorResult<Option<PostInfo>> {
        Ok(self.state().post(id).map(|p| PostInfo {
            id: p.id,
            project: p.project,
            root: p.parent.unwrap_or(p.id),
            subject: p.subject.clone(),
            locked: p.locked,
        }))
    }

    fn item_by_message_id(&self, message_id: &str) -> CollaboratorResult<Option<ItemId>> {
        let state = self.state();
        let matches = |stored: &Option<String>| stored.as_deref() == Some(message_id);
        Ok(state
            .items
            .iter()
            .find(|i| matches(&i.message_id))
            .map(|i| i.id)
            .or_else(|| {
                state
                    .journals
                    .iter()
                    .find(|j| matches(&j.message_id))
                    .map(|j| j.item)
            }))
    }

    fn post_by_message_id(&self, message_id: &str) -> CollaboratorResult<Option<PostId>> {
        Ok(self
            .state()
            .posts
            .iter()
            .find(|p| p.message_id.as_deref() == Some(message_id))
            .map(|p| p.id))
    }
}

impl Persistence for InMemoryTracker {
    fn create_item(&self, draft: ItemDraft) -> CollaboratorResult<ItemId> {
        let mut state = self.state();
        let project = state
            .project(draft.project)
            .ok_or_else(|| CollaboratorError::NotFound(format!("project {}", draft.project)))?;
        if !project.trackers.contains(&draft.tracker) {
            return Err(CollaboratorError::Validation(format!(
                "tracker {} is not enabled on project {}",
                draft.tracker, draft.project
            )));
        }
        if draft.subject.trim().is_empty() {
            return Err(CollaboratorError::Validation("subject is blank".to_string()));
        }

        let id = ItemId(state.items.iter().map(|i| i.id.0).max().unwrap_or(0) + 1);
        let mut attributes = draft.attributes;
        attributes.tracker = None;
        let attachments = state.store_attachments(draft.attachments);
        let mut watchers = draft.watchers;
        watchers.dedup();

        state.items.push(ItemRecord {
            id,
            project: draft.project,
            tracker: draft.tracker,
            author: draft.author,
            subject: draft.subject,
            description: draft.description,
            attributes,
            watchers,
            attachments,
            message_id: draft.message_id,
        });
        debug!(item = %id, "Item stored");
        Ok(id)
    }

    fn update_item(&self, changes: ItemChanges) -> CollaboratorResult<JournalId> {
        let mut state = self.state();
        let attachments = state.store_attachments(changes.attachments);
        let id = JournalId(state.journals.iter().map(|j| j.id.0).max().unwrap_or(0) + 1);

        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == changes.item)
            .ok_or_else(|| CollaboratorError::NotFound(format!("item {}", changes.item)))?;

        let mut details = apply_changes(item, &changes.changes);
        details.extend(attachments.iter().map(|a| JournalDetail {
            property: DetailProperty::Attachment,
            name: a.id.to_string(),
            old_value: None,
            new_value: Some(a.filename.clone()),
        }));
        item.attachments.extend(attachments);

        state.journals.push(JournalRecord {
            id,
            item: changes.item,
            author: changes.author,
            notes: changes.notes,
            details,
            message_id: changes.message_id,
        });
        debug!(journal = %id, "Journal stored");
        Ok(id)
    }

    fn create_post(&self, draft: PostDraft) -> CollaboratorResult<PostId> {
        let mut state = self.state();
        let parent = state
            .post(draft.parent)
            .ok_or_else(|| CollaboratorError::NotFound(format!("post {}", draft.parent)))?;
        if parent.locked {
            return Err(CollaboratorError::Validation(format!(
                "thread {} is locked",
                draft.parent
            )));
        }
        if draft.subject.trim().is_empty() {
            return Err(CollaboratorError::Validation("subject is blank".to_string()));
        }

        let id = PostId(state.posts.iter().map(|p| p.id.0).max().unwrap_or(0) + 1);
        let attachments = state.store_attachments(draft.attachments);
        state.posts.push(PostRecord {
            id,
            project: draft.project,
            parent: Some(draft.parent),
            author: draft.author,
            subject: draft.subject,
            content: draft.content,
            locked: false,
            attachments,
            message_id: draft.message_id,
        });
        debug!(post = %id, "Post stored");
        Ok(id)
    }
}

/// Applies set fields to an item and returns the changed ones.
fn apply_changes(item: &mut ItemRecord, changes: &ResolvedAttributes) -> Vec<JournalDetail> {
    let mut details = Vec::new();
    let mut record = |name: &str, old: Option<String>, new: String| {
        if old.as_deref() != Some(new.as_str()) {
            details.push(JournalDetail {
                property: DetailProperty::Attr,
                name: name.to_string(),
                old_value: old,
                new_value: Some(new),
            });
        }
    };

    if let Some(tracker) = changes.tracker {
        record("tracker_id", Some(item.tracker.to_string()), tracker.to_string());
        item.tracker = tracker;
    }

    macro_rules! change {
        ($field:ident, $name:literal) => {
            if let Some(new) = changes.$field {
                let old = item.attributes.$field.replace(new);
                record($name, old.as_ref().map(ToString::to_string), new.to_string());
            }
        };
    }
    change!(status, "status_id");
    change!(priority, "priority_id");
    change!(category, "category_id");
    change!(fixed_version, "fixed_version_id");
    change!(assigned_to, "assigned_to_id");
    change!(start_date, "start_date");
    change!(due_date, "due_date");
    change!(estimated_hours, "estimated_hours");
    change!(done_ratio, "done_ratio");

    for (field, value) in &changes.custom_fields {
        let old = item.attributes.custom_fields.insert(*field, value.clone());
        if old.as_ref() != Some(value) {
            details.push(JournalDetail {
                property: DetailProperty::Cf,
                name: field.to_string(),
                old_value: old,
                new_value: Some(value.clone()),
            });
        }
    }

    details
}

impl AccountService for InMemoryTracker {
    fn create_account(&self, account: &NewAccount) -> CollaboratorResult<UserId> {
        let mut state = self.state();
        if state.users.iter().any(|u| same(&u.login, &account.login)) {
            return Err(CollaboratorError::Conflict(format!(
                "login {} is taken",
                account.login
            )));
        }
        if state.users.iter().any(|u| same(&u.email, &account.email)) {
            return Err(CollaboratorError::Conflict(format!(
                "email {} is taken",
                account.email
            )));
        }

        let id = UserId(state.users.iter().map(|u| u.id.0).max().unwrap_or(0) + 1);
        state.users.push(UserRecord {
            id,
            login: account.login.clone(),
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            active: true,
            admin: false,
        });
        debug!(user = %id, login = %account.login, "Account stored");
        Ok(id)
    }
}

impl Authorization for InMemoryTracker {
    fn is_allowed(
        &self,
        principal: Principal,
        action: Action,
        project: ProjectId,
    ) -> CollaboratorResult<bool> {
        let state = self.state();
        let granted = |user: Option<UserId>, non_member: bool| {
            state.permissions.iter().any(|p| {
                p.user == user
                    && p.non_member == non_member
                    && p.project == project
                    && p.actions.contains(&action)
            })
        };

        Ok(match principal {
            Principal::User(id) => match state.user(id) {
                Some(user) if !user.active => false,
                Some(user) if user.admin => true,
                Some(_) => {
                    let member = state
                        .project(project)
                        .is_some_and(|p| p.members.contains(&id));
                    granted(Some(id), false) || (!member && granted(None, true))
                }
                None => false,
            },
            Principal::NonMember => granted(None, true),
            Principal::Anonymous => granted(None, false),
        })
    }
}

impl Notifier for InMemoryTracker {
    fn notify(&self, event: &Event) -> CollaboratorResult<()> {
        if self.fail_notifications.load(Ordering::Relaxed) {
            return Err(CollaboratorError::Unavailable("mail queue is down".to_string()));
        }
        self.state().events.push(*event);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "projects": [{
            "id": 1, "identifier": "ecookbook", "name": "eCookbook", "trackers": [1, 2],
            "categories": [{"id": 1, "name": "Printing"}], "members": [2, 3], "groups": [11]
        }],
        "groups": [{"id": 10, "name": "A Team"}, {"id": 11, "name": "B Team"}],
        "trackers": [{"id": 1, "name": "Bug"}, {"id": 2, "name": "Feature request"}, {"id": 3, "name": "Support request"}],
        "statuses": [{"id": 1, "name": "New"}, {"id": 2, "name": "Resolved"}],
        "custom_fields": [{"id": 2, "name": "Searchable field", "trackers": [1]}],
        "users": [
            {"id": 2, "login": "jsmith", "email": "jsmith@somenet.foo", "first_name": "John", "last_name": "Smith"},
            {"id": 3, "login": "dlopper", "email": "dlopper@somenet.foo", "first_name": "Dave", "last_name": "Lopper", "active": false},
            {"id": 1, "login": "admin", "email": "admin@somenet.foo", "admin": true},
            {"id": 5, "login": "outsider", "email": "outsider@example.org"}
        ],
        "permissions": [
            {"user": 2, "project": 1, "actions": ["add_items", "add_item_notes"]},
            {"user": null, "non_member": true, "project": 1, "actions": ["add_item_notes", "add_posts"]}
        ],
        "items": [{"id": 2, "project": 1, "tracker": 2, "author": {"user": 2}, "subject": "Add ingredients categories",
                   "attributes": {"status": 1}, "message_id": "item2@tracker"}],
        "journals": [{"id": 1, "item": 2, "author": {"user": 2}, "notes": "", "message_id": "journal1@tracker"}],
        "posts": [{"id": 1, "project": 1, "author": {"user": 2}, "subject": "First post"},
                  {"id": 2, "project": 1, "parent": 1, "author": {"user": 2}, "subject": "Re: First post"},
                  {"id": 4, "project": 1, "author": {"user": 2}, "subject": "Closed", "locked": true}]
    }"#;

    fn tracker() -> InMemoryTracker {
        InMemoryTracker::from_json_str(SNAPSHOT).unwrap()
    }

    #[test]
    fn test_lookups() {
        let t = tracker();
        assert_eq!(t.project("ECOOKBOOK").unwrap(), Some(ProjectId(1)));
        assert_eq!(t.project("eCookbook").unwrap(), Some(ProjectId(1)));
        assert_eq!(t.tracker(ProjectId(1), "feature request").unwrap(), Some(TrackerId(2)));
        assert_eq!(t.tracker(ProjectId(1), "Support request").unwrap(), None);
        assert_eq!(t.status("resolved").unwrap(), Some(StatusId(2)));
        assert_eq!(t.category(ProjectId(1), "printing").unwrap(), Some(CategoryId(1)));
        assert_eq!(t.assignable_user(ProjectId(1), "John Smith").unwrap(), Some(UserId(2)));
        assert_eq!(t.assignable_user(ProjectId(1), "dlopper").unwrap(), None);
        assert_eq!(t.assignable_group(ProjectId(1), "b team").unwrap(), Some(GroupId(11)));
        assert_eq!(t.assignable_group(ProjectId(1), "A Team").unwrap(), None);
        assert_eq!(
            t.custom_field(ProjectId(1), Some(TrackerId(1)), "searchable field").unwrap(),
            Some(CustomFieldId(2))
        );
        assert_eq!(t.custom_field(ProjectId(1), Some(TrackerId(2)), "Searchable field").unwrap(), None);
        assert!(t.login_exists("JSMITH").unwrap());
        assert_eq!(
            t.user_by_email("DLopper@somenet.foo").unwrap(),
            Some(UserInfo {
                id: UserId(3),
                active: false
            })
        );
        assert_eq!(t.item_by_message_id("journal1@tracker").unwrap(), Some(ItemId(2)));
        assert_eq!(t.post(PostId(2)).unwrap().unwrap().root, PostId(1));
    }

    #[test]
    fn test_update_records_changed_fields_only() {
        let t = tracker();
        let changes = ResolvedAttributes {
            status: Some(StatusId(1)),
            start_date: chrono::NaiveDate::from_ymd_opt(2010, 1, 1),
            ..ResolvedAttributes::default()
        };
        let journal = t
            .update_item(ItemChanges {
                item: ItemId(2),
                author: Author::User(UserId(2)),
                notes: "notes".to_string(),
                changes,
                attachments: vec![AttachmentBlob::new("a.txt", "text/plain", b"abc".to_vec())],
                message_id: None,
            })
            .unwrap();
        assert_eq!(journal, JournalId(2));

        let journal = t.journals().pop().unwrap();
        let names: Vec<_> = journal.details.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["start_date", "1"]);
        assert_eq!(journal.details[0].new_value.as_deref(), Some("2010-01-01"));
        assert_eq!(journal.details[1].property, DetailProperty::Attachment);
        assert_eq!(journal.details[1].new_value.as_deref(), Some("a.txt"));
    }

    #[test]
    fn test_create_account_conflict() {
        let t = tracker();
        let account = NewAccount {
            email: "new@example.org".to_string(),
            login: "jsmith".to_string(),
            first_name: "New".to_string(),
            last_name: "-".to_string(),
            password: "secret".to_string(),
        };
        assert!(matches!(t.create_account(&account), Err(CollaboratorError::Conflict(_))));

        let account = NewAccount {
            login: "new".to_string(),
            ..account
        };
        assert_eq!(t.create_account(&account).unwrap(), UserId(6));
    }

    #[test]
    fn test_authorization() {
        let t = tracker();
        let p = ProjectId(1);
        assert!(t.is_allowed(Principal::User(UserId(2)), Action::AddItems, p).unwrap());
        assert!(!t.is_allowed(Principal::User(UserId(2)), Action::EditItems, p).unwrap());
        assert!(t.is_allowed(Principal::User(UserId(1)), Action::EditItems, p).unwrap());
        assert!(!t.is_allowed(Principal::User(UserId(3)), Action::AddItems, p).unwrap());
        assert!(!t.is_allowed(Principal::Anonymous, Action::AddItems, p).unwrap());
        assert!(!t.is_allowed(Principal::Anonymous, Action::AddItemNotes, p).unwrap());
    }

    #[test]
    fn test_non_member_grants() {
        let t = tracker();
        let p = ProjectId(1);
        assert!(t.is_allowed(Principal::NonMember, Action::AddItemNotes, p).unwrap());
        assert!(!t.is_allowed(Principal::NonMember, Action::AddItems, p).unwrap());
        assert!(t.is_allowed(Principal::User(UserId(5)), Action::AddItemNotes, p).unwrap());
        assert!(t.is_allowed(Principal::NonMember, Action::AddPosts, p).unwrap());
        // Members only get what is granted to them.
        assert!(!t.is_allowed(Principal::User(UserId(2)), Action::AddPosts, p).unwrap());
    }

    #[test]
    fn test_locked_thread_refuses_posts() {
        let t = tracker();
        let draft = PostDraft {
            project: ProjectId(1),
            parent: PostId(4),
            author: Author::User(UserId(2)),
            subject: "Re: Closed".to_string(),
            content: String::new(),
            attachments: Vec::new(),
            message_id: None,
        };
        assert!(matches!(t.create_post(draft), Err(CollaboratorError::Validation(_))));
    }

    #[test]
    fn test_notification_failure_toggle() {
        let t = tracker();
        t.fail_notifications(true);
        assert!(t.notify(&Event::Posted { post: PostId(1) }).is_err());
        t.fail_notifications(false);
        t.notify(&Event::Posted { post: PostId(1) }).unwrap();
        assert_eq!(t.events().len(), 1);
    }
}
