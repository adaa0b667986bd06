//! # mailtrack-core
//!
//! Inbound email ingestion for issue trackers.
//!
//! A raw message goes through a fixed pipeline:
//! - **Decoding** into an [`Envelope`] (body text, attachments, headers)
//! - **Normalization** of the body (HTML conversion, quoted blocks, delimiters)
//! - **Keyword extraction** of `Field: value` lines in several locales
//! - **Attribute resolution** against the tracker vocabulary
//! - **Routing** to a new item, an item update or a discussion reply
//! - **Identity resolution** of the sender, with optional account creation
//!
//! [`MailHandler`] runs the pipeline and performs exactly one write through
//! the [`collab`] traits. [`InMemoryTracker`] implements all of them.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod attributes;
pub mod collab;
pub mod config;
mod decoder;
mod dispatch;
mod envelope;
mod error;
pub mod identity;
pub mod keywords;
pub mod memory;
pub mod model;
pub mod normalize;
pub mod routing;

pub use attributes::{
    AttributeMap, NO_SUBJECT, OverridePolicy, ResolveScope, ResolvedAttributes, Target, resolve,
    truncate_subject,
};
pub use collab::{
    AccountService, Action, Authorization, Collaborators, Event, ItemChanges, ItemDraft, Lookup,
    Notifier, Persistence, PostDraft, Principal,
};
pub use config::IngestConfig;
pub use decoder::decode;
pub use dispatch::{IgnoreReason, IngestOptions, MailHandler, Outcome};
pub use envelope::{AttachmentBlob, BodyFormat, Envelope};
pub use error::{
    CollaboratorError, CollaboratorResult, ConfigError, IdentityError, IngestError, Result,
};
pub use identity::{AccountLimits, Identity, NewAccount, UnknownUserPolicy, resolve_identity};
pub use keywords::{Extraction, Field, KeywordMap, RawValues, extract};
pub use memory::{InMemoryTracker, Snapshot};
pub use model::{
    Assignee, Author, CategoryId, CustomFieldId, GroupId, ItemId, ItemInfo, JournalId, PostId,
    PostInfo, PriorityId, ProjectId, StatusId, TrackerId, UserId, UserInfo, VersionId,
};
pub use normalize::{clean_body, html_to_text, normalize};
pub use routing::{RejectReason, RouteContext, Router, RoutingDecision};
