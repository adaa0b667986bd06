//! Dispatcher: runs the pipeline for one message and performs the single
//! write it calls for.

use crate::attributes::{
    AttributeMap, OverridePolicy, ResolveScope, ResolvedAttributes, Target, resolve,
    truncate_subject,
};
use crate::collab::{Action, Collaborators, Event, ItemChanges, ItemDraft, PostDraft, Principal};
use crate::config::IngestConfig;
use crate::decoder::decode;
use crate::envelope::Envelope;
use crate::error::{CollaboratorResult, ConfigError, IdentityError, Result};
use crate::identity::{Identity, UnknownUserPolicy, resolve_identity};
use crate::keywords::{Extraction, Field, KeywordMap, extract};
use crate::model::{Author, ItemId, JournalId, PostId, ProjectId, TrackerId, UserId};
use crate::normalize::clean_body;
use crate::routing::{RejectReason, RouteContext, Router, RoutingDecision};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Per-message options, typically set by the caller that received the mail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Values forced on new items; keyword lines for these fields are
    /// stripped but never applied.
    pub fixed_attributes: AttributeMap,
    /// Fields senders may set through keyword lines.
    pub allowed_overrides: OverridePolicy,
    /// Handling of senders without an account.
    pub unknown_user: UnknownUserPolicy,
    /// Skip authorization checks.
    pub no_permission_check: bool,
}

/// Why a message was dropped without any write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Sent from the tracker's own address.
    EmissionAddress,
    /// Marked as automatically generated.
    AutoGenerated,
    /// Sender has no account and the policy refuses it.
    UnknownSender,
    /// Sender account is locked.
    LockedSender,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EmissionAddress => "sent from the emission address",
            Self::AutoGenerated => "auto-generated message",
            Self::UnknownSender => "unknown sender",
            Self::LockedSender => "locked sender",
        })
    }
}

/// Result of an ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// A new item was created.
    CreatedItem {
        /// New item.
        item: ItemId,
        /// Its project.
        project: ProjectId,
    },
    /// An item received a journal.
    UpdatedItem {
        /// Updated item.
        item: ItemId,
        /// New journal.
        journal: JournalId,
    },
    /// A reply was posted.
    CreatedReply {
        /// New post.
        post: PostId,
        /// Thread root.
        parent: PostId,
    },
    /// Business rejection; nothing was written.
    Rejected {
        /// Why.
        reason: RejectReason,
    },
    /// Dropped before routing; nothing was written.
    Ignored {
        /// Why.
        reason: IgnoreReason,
    },
}

impl Outcome {
    const fn rejected(reason: RejectReason) -> Self {
        Self::Rejected { reason }
    }
}

/// A routed message whose sender is known but not yet provisioned.
struct Accepted {
    envelope: Envelope,
    extraction: Extraction,
    identity: Identity,
    principal: Principal,
}

/// Inbound mail handler.
///
/// Holds configuration compiled once and shared references to the
/// collaborators. Each call to [`MailHandler::ingest`] is independent.
///
/// # Example
///
/// ```
/// use mailtrack_core::{Collaborators, InMemoryTracker, IngestConfig, IngestOptions, MailHandler, Outcome};
///
/// let tracker = InMemoryTracker::from_json_str(r#"{
///     "projects": [{"id": 1, "identifier": "ecookbook", "name": "eCookbook", "trackers": [1]}],
///     "trackers": [{"id": 1, "name": "Bug"}],
///     "users": [{"id": 2, "login": "jsmith", "email": "jsmith@somenet.foo", "first_name": "John", "last_name": "Smith"}],
///     "permissions": [{"user": 2, "project": 1, "actions": ["add_items"]}]
/// }"#)?;
/// let config = IngestConfig { default_project: Some("ecookbook".into()), ..IngestConfig::default() };
/// let handler = MailHandler::new(config, Collaborators::single(&tracker))?;
///
/// let raw = b"From: jsmith@somenet.foo\r\nSubject: New ticket\r\n\r\nHello\r\n";
/// let outcome = handler.ingest(raw, &IngestOptions::default())?;
/// assert!(matches!(outcome, Outcome::CreatedItem { .. }));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct MailHandler<'a> {
    config: IngestConfig,
    keywords: KeywordMap,
    router: Router,
    collab: Collaborators<'a>,
}

impl<'a> MailHandler<'a> {
    /// Compiles the configuration into a handler.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown keyword locale or a pattern that does
    /// not compile.
    pub fn new(
        config: IngestConfig,
        collab: Collaborators<'a>,
    ) -> std::result::Result<Self, ConfigError> {
        let keywords = config.keyword_map()?;
        let router = Router::new(&config.message_id_prefix)?;
        Ok(Self {
            config,
            keywords,
            router,
            collab,
        })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingests one raw message.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IngestError::MalformedMessage`] if the message cannot
    /// be decoded and [`crate::IngestError::Collaborator`] if a collaborator
    /// call fails. Business rejections are an [`Outcome`], not an error.
    pub fn ingest(&self, raw: &[u8], options: &IngestOptions) -> Result<Outcome> {
        self.ingest_with_rng(raw, options, &mut rand::thread_rng())
    }

    /// Like [`MailHandler::ingest`] with a caller-provided random source for
    /// generated logins and passwords.
    ///
    /// # Errors
    ///
    /// See [`MailHandler::ingest`].
    pub fn ingest_with_rng<R: Rng + ?Sized>(
        &self,
        raw: &[u8],
        options: &IngestOptions,
        rng: &mut R,
    ) -> Result<Outcome> {
        let envelope = decode(raw)?;
        let outcome = self.dispatch(envelope, options, rng)?;
        match &outcome {
            Outcome::Rejected { reason } => info!(%reason, "Message rejected"),
            Outcome::Ignored { reason } => info!(%reason, "Message ignored"),
            written => info!(outcome = ?written, "Message ingested"),
        }
        Ok(outcome)
    }

    fn dispatch<R: Rng + ?Sized>(
        &self,
        envelope: Envelope,
        options: &IngestOptions,
        rng: &mut R,
    ) -> Result<Outcome> {
        if let Some(reason) = self.loop_guard(&envelope) {
            return Ok(Outcome::Ignored { reason });
        }

        let identity = match resolve_identity(
            envelope.from.as_ref(),
            options.unknown_user,
            &self.config.account,
            self.collab.lookup,
            rng,
        ) {
            Ok(identity) => identity,
            Err(IdentityError::UnknownSender) => {
                return Ok(Outcome::Ignored {
                    reason: IgnoreReason::UnknownSender,
                });
            }
            Err(IdentityError::LockedSender) => {
                return Ok(Outcome::Ignored {
                    reason: IgnoreReason::LockedSender,
                });
            }
            Err(IdentityError::LoginExhausted) => {
                return Ok(Outcome::rejected(RejectReason::Other(
                    "no login available for the new account".to_string(),
                )));
            }
            Err(IdentityError::Collaborator(e)) => return Err(e.into()),
        };

        let body = clean_body(&envelope, &self.config.delimiters);
        let extraction = extract(&body, &self.keywords);
        debug!(
            keywords = extraction.values.len(),
            attachments = envelope.attachments.len(),
            "Body cleaned"
        );

        let requested = options
            .fixed_attributes
            .get(&Field::Project)
            .map(String::as_str)
            .or_else(|| {
                extraction
                    .values
                    .get(&Field::Project)
                    .filter(|_| options.allowed_overrides.permits(&Field::Project))
            });
        let ctx = RouteContext {
            requested_project: requested,
            project_header: self.config.project_header.as_deref(),
            default_project: self.config.default_project.as_deref(),
        };
        let decision = self.router.route(&envelope, &ctx, self.collab.lookup)?;
        debug!(?decision, "Message routed");

        if let RoutingDecision::Rejected { reason } = decision {
            return Ok(Outcome::rejected(reason));
        }

        // Permissions are checked for the prospective account, so a
        // rejected message never leaves one behind.
        let principal = match &identity {
            Identity::Existing(user) => Principal::User(*user),
            Identity::Anonymous => Principal::Anonymous,
            Identity::Create(_) => Principal::NonMember,
        };
        let accepted = Accepted {
            envelope,
            extraction,
            identity,
            principal,
        };

        match decision {
            RoutingDecision::NewItem { project, tracker } => {
                self.create_item(accepted, options, project, tracker)
            }
            RoutingDecision::UpdateItem { item, project } => {
                self.update_item(accepted, options, item, project)
            }
            RoutingDecision::NewReply { parent, project } => {
                self.create_reply(accepted, options, parent, project)
            }
            RoutingDecision::Rejected { reason } => Ok(Outcome::rejected(reason)),
        }
    }

    fn loop_guard(&self, envelope: &Envelope) -> Option<IgnoreReason> {
        if envelope
            .sender_address()
            .is_some_and(|address| self.config.is_emission_address(address))
        {
            return Some(IgnoreReason::EmissionAddress);
        }

        let auto = envelope.header("Auto-Submitted")?;
        let kind = auto.split(';').next().unwrap_or_default().trim();
        (!kind.eq_ignore_ascii_case("no")).then_some(IgnoreReason::AutoGenerated)
    }

    fn provision(&self, identity: Identity) -> Result<Author> {
        Ok(match identity {
            Identity::Existing(user) => Author::User(user),
            Identity::Anonymous => Author::Anonymous,
            Identity::Create(account) => {
                let user = self.collab.accounts.create_account(&account)?;
                info!(user = %user, login = %account.login, "Account created for sender");
                Author::User(user)
            }
        })
    }

    fn allowed(
        &self,
        options: &IngestOptions,
        principal: Principal,
        action: Action,
        project: ProjectId,
    ) -> CollaboratorResult<bool> {
        if options.no_permission_check {
            return Ok(true);
        }
        self.collab.authorization.is_allowed(principal, action, project)
    }

    fn create_item(
        &self,
        accepted: Accepted,
        options: &IngestOptions,
        project: ProjectId,
        tracker: TrackerId,
    ) -> Result<Outcome> {
        let Accepted {
            envelope,
            extraction,
            identity,
            principal,
        } = accepted;
        if !self.allowed(options, principal, Action::AddItems, project)? {
            return Ok(Outcome::rejected(RejectReason::NotPermitted));
        }

        let attributes = resolve(
            &extraction.values,
            &options.allowed_overrides,
            &options.fixed_attributes,
            &self.config.default_attributes,
            self.collab.lookup,
            ResolveScope {
                project,
                tracker: Some(tracker),
                target: Target::NewItem,
                groups_assignable: self.config.group_assignment,
            },
        )?;

        let watchers = if self.allowed(options, principal, Action::AddItemWatchers, project)? {
            self.watchers(&envelope)?
        } else {
            Vec::new()
        };

        let author = self.provision(identity)?;
        let draft = ItemDraft {
            project,
            tracker: attributes.tracker.unwrap_or(tracker),
            author,
            subject: truncate_subject(&envelope.subject, self.config.subject_max_length),
            description: extraction.residual,
            attributes,
            watchers,
            attachments: envelope.attachments,
            message_id: envelope.message_id,
        };
        let item = self.collab.persistence.create_item(draft)?;
        self.notify(&Event::ItemCreated { item });
        Ok(Outcome::CreatedItem { item, project })
    }

    fn update_item(
        &self,
        accepted: Accepted,
        options: &IngestOptions,
        item: ItemId,
        project: ProjectId,
    ) -> Result<Outcome> {
        let Accepted {
            envelope,
            extraction,
            identity,
            principal,
        } = accepted;
        let can_edit = self.allowed(options, principal, Action::EditItems, project)?;
        if !can_edit && !self.allowed(options, principal, Action::AddItemNotes, project)? {
            return Ok(Outcome::rejected(RejectReason::NotPermitted));
        }

        let Some(current) = self.collab.lookup.item(item)? else {
            return Ok(Outcome::rejected(RejectReason::Other(format!(
                "item {item} not found"
            ))));
        };

        let mut changes = resolve(
            &extraction.values,
            &options.allowed_overrides,
            &options.fixed_attributes,
            &AttributeMap::new(),
            self.collab.lookup,
            ResolveScope {
                project,
                tracker: Some(current.tracker),
                target: Target::Update,
                groups_assignable: self.config.group_assignment,
            },
        )?;
        if !can_edit && !changes.is_empty() {
            warn!(item = %item, "Author may not edit attributes, keeping notes only");
            changes = ResolvedAttributes::default();
        }

        let author = self.provision(identity)?;
        let journal = self.collab.persistence.update_item(ItemChanges {
            item,
            author,
            notes: extraction.residual,
            changes,
            attachments: envelope.attachments,
            message_id: envelope.message_id,
        })?;
        self.notify(&Event::ItemUpdated { item, journal });
        Ok(Outcome::UpdatedItem { item, journal })
    }

    fn create_reply(
        &self,
        accepted: Accepted,
        options: &IngestOptions,
        parent: PostId,
        project: ProjectId,
    ) -> Result<Outcome> {
        let Accepted {
            envelope,
            extraction,
            identity,
            principal,
        } = accepted;
        if !self.allowed(options, principal, Action::AddPosts, project)? {
            return Ok(Outcome::rejected(RejectReason::NotPermitted));
        }

        let mut subject = self.router.reply_subject(&envelope.subject);
        if subject.is_empty() {
            subject = match self.collab.lookup.post(parent)? {
                Some(root) => format!("Re: {}", root.subject),
                None => String::new(),
            };
        }

        let author = self.provision(identity)?;
        let post = self.collab.persistence.create_post(PostDraft {
            project,
            parent,
            author,
            subject: truncate_subject(&subject, self.config.subject_max_length),
            content: extraction.residual,
            attachments: envelope.attachments,
            message_id: envelope.message_id,
        })?;
        self.notify(&Event::Posted { post });
        Ok(Outcome::CreatedReply { post, parent })
    }

    /// Active accounts among the `To` and `Cc` recipients.
    fn watchers(&self, envelope: &Envelope) -> CollaboratorResult<Vec<UserId>> {
        let mut watchers = Vec::new();
        for mailbox in envelope.to.iter().chain(&envelope.cc) {
            if self.config.is_emission_address(&mailbox.address) {
                continue;
            }
            if let Some(user) = self.collab.lookup.user_by_email(&mailbox.address)?
                && user.active
                && !watchers.contains(&user.id)
            {
                watchers.push(user.id);
            }
        }
        Ok(watchers)
    }

    fn notify(&self, event: &Event) {
        if let Err(e) = self.collab.notifier.notify(event) {
            warn!(?event, "Notification failed: {e}");
        }
    }
}
