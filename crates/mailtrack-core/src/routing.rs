//! Target resolution: where an inbound message goes.

use crate::collab::Lookup;
use crate::envelope::Envelope;
use crate::error::{CollaboratorResult, ConfigError};
use crate::model::{ItemId, PostId, ProjectId, TrackerId};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Why a message was not ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum RejectReason {
    /// No destination project could be determined.
    NoProject,
    /// The author may not perform the action.
    NotPermitted,
    /// Any other business rule.
    Other(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProject => f.write_str("no destination project"),
            Self::NotPermitted => f.write_str("not permitted"),
            Self::Other(message) => f.write_str(message),
        }
    }
}

/// Classification of an inbound message. Computed once, then only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum RoutingDecision {
    /// Create an item.
    NewItem {
        /// Destination project.
        project: ProjectId,
        /// First tracker of the project.
        tracker: TrackerId,
    },
    /// Add a journal to an item.
    UpdateItem {
        /// Target item.
        item: ItemId,
        /// Project of the item.
        project: ProjectId,
    },
    /// Reply in a discussion thread.
    NewReply {
        /// Thread root.
        parent: PostId,
        /// Project of the thread.
        project: ProjectId,
    },
    /// Do not ingest.
    Rejected {
        /// Why.
        reason: RejectReason,
    },
}

impl RoutingDecision {
    fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            reason: RejectReason::Other(message.into()),
        }
    }
}

/// Destination project candidates, in priority order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteContext<'a> {
    /// Forced project, or the `Project:` keyword when permitted.
    pub requested_project: Option<&'a str>,
    /// Header naming the project (e.g. `X-Mailtrack-Project`).
    pub project_header: Option<&'a str>,
    /// Configured fallback project.
    pub default_project: Option<&'a str>,
}

/// Reference kind encoded in message ids the tracker emits.
enum Emitted {
    Item(ItemId),
    Post(PostId),
}

/// Compiled routing patterns.
#[derive(Debug, Clone)]
pub struct Router {
    item_token: Regex,
    post_token: Regex,
    emitted_id: Regex,
}

impl Router {
    /// Builds a router. Message ids emitted by the tracker look like
    /// `<prefix>.item-12.20240101@host` and `<prefix>.post-3.20240101@host`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile.
    pub fn new(message_id_prefix: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            item_token: Regex::new(r"\[[^\]]*#(\d+)\]")?,
            post_token: Regex::new(r"\[[^\]]*msg(\d+)\]")?,
            emitted_id: Regex::new(&format!(
                r"^{}\.(item|post)-(\d+)\.",
                regex::escape(message_id_prefix)
            ))?,
        })
    }

    /// Routes an envelope.
    ///
    /// Replies win over updates, updates over new items: a message answering
    /// a stored post is a reply even if it names a project.
    ///
    /// # Errors
    ///
    /// Returns an error if a lookup call fails.
    pub fn route(
        &self,
        envelope: &Envelope,
        ctx: &RouteContext<'_>,
        lookup: &dyn Lookup,
    ) -> CollaboratorResult<RoutingDecision> {
        if let Some(decision) = self.route_reply(envelope, lookup)? {
            return Ok(decision);
        }
        if let Some(decision) = self.route_update(envelope, lookup)? {
            return Ok(decision);
        }
        route_new_item(envelope, ctx, lookup)
    }

    fn route_reply(
        &self,
        envelope: &Envelope,
        lookup: &dyn Lookup,
    ) -> CollaboratorResult<Option<RoutingDecision>> {
        for id in envelope.reference_ids() {
            let post = match self.emitted(id) {
                Some(Emitted::Post(post)) => Some(post),
                Some(Emitted::Item(_)) => None,
                None => lookup.post_by_message_id(id)?,
            };
            if let Some(post) = post
                && let Some(decision) = reply_to(post, lookup)?
            {
                debug!(message_id = id, "Routed by reference to a post");
                return Ok(Some(decision));
            }
        }

        if let Some(post) = capture_id(&self.post_token, &envelope.subject) {
            debug!(post, "Routed by subject post token");
            return Ok(Some(
                reply_to(PostId(post), lookup)?
                    .unwrap_or_else(|| RoutingDecision::rejected(format!("post {post} not found"))),
            ));
        }

        Ok(None)
    }

    fn route_update(
        &self,
        envelope: &Envelope,
        lookup: &dyn Lookup,
    ) -> CollaboratorResult<Option<RoutingDecision>> {
        for id in envelope.reference_ids() {
            let item = match self.emitted(id) {
                Some(Emitted::Item(item)) => Some(item),
                Some(Emitted::Post(_)) => None,
                None => lookup.item_by_message_id(id)?,
            };
            if let Some(item) = item
                && let Some(info) = lookup.item(item)?
            {
                debug!(message_id = id, item = %info.id, "Routed by reference to an item");
                return Ok(Some(RoutingDecision::UpdateItem {
                    item: info.id,
                    project: info.project,
                }));
            }
        }

        let Some(item) = capture_id(&self.item_token, &envelope.subject) else {
            return Ok(None);
        };
        debug!(item, "Routed by subject item token");
        Ok(Some(match lookup.item(ItemId(item))? {
            Some(info) => RoutingDecision::UpdateItem {
                item: info.id,
                project: info.project,
            },
            None => RoutingDecision::rejected(format!("item {item} not found")),
        }))
    }

    fn emitted(&self, message_id: &str) -> Option<Emitted> {
        let captures = self.emitted_id.captures(message_id)?;
        let id = captures.get(2)?.as_str().parse().ok()?;
        match captures.get(1)?.as_str() {
            "item" => Some(Emitted::Item(ItemId(id))),
            _ => Some(Emitted::Post(PostId(id))),
        }
    }

    /// Strips everything up to the post token and any `Re:`-style prefixes.
    #[must_use]
    pub fn reply_subject(&self, subject: &str) -> String {
        let mut rest = self
            .post_token
            .find(subject)
            .map_or(subject, |m| &subject[m.end()..])
            .trim();

        while let Some(stripped) = strip_reply_prefix(rest) {
            rest = stripped;
        }
        rest.to_string()
    }
}

fn strip_reply_prefix(subject: &str) -> Option<&str> {
    let (prefix, rest) = subject.split_once(':')?;
    let prefix = prefix.trim();
    ["re", "fw", "fwd", "aw", "sv", "tr"]
        .iter()
        .any(|p| prefix.eq_ignore_ascii_case(p))
        .then(|| rest.trim_start())
}

fn capture_id(pattern: &Regex, subject: &str) -> Option<i64> {
    pattern.captures(subject)?.get(1)?.as_str().parse().ok()
}

/// Reply decision for a post: the thread root unless it is locked.
fn reply_to(post: PostId, lookup: &dyn Lookup) -> CollaboratorResult<Option<RoutingDecision>> {
    let Some(info) = lookup.post(post)? else {
        return Ok(None);
    };
    let root = if info.is_root() {
        info
    } else {
        match lookup.post(info.root)? {
            Some(root) => root,
            None => return Ok(None),
        }
    };

    if root.locked {
        return Ok(Some(RoutingDecision::rejected(format!(
            "thread {} is locked",
            root.id
        ))));
    }
    Ok(Some(RoutingDecision::NewReply {
        parent: root.id,
        project: root.project,
    }))
}

fn route_new_item(
    envelope: &Envelope,
    ctx: &RouteContext<'_>,
    lookup: &dyn Lookup,
) -> CollaboratorResult<RoutingDecision> {
    let header = ctx.project_header.and_then(|name| envelope.header(name));
    let candidates = [
        ("request", ctx.requested_project.map(str::trim)),
        ("header", header.as_deref()),
        ("default", ctx.default_project.map(str::trim)),
    ];

    for (source, name) in candidates {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            continue;
        };
        let Some(project) = lookup.project(name)? else {
            warn!(source, project = name, "Unknown project");
            continue;
        };
        return Ok(match lookup.project_trackers(project)?.first() {
            Some(&tracker) => RoutingDecision::NewItem { project, tracker },
            None => RoutingDecision::rejected(format!("project {name} has no tracker")),
        });
    }

    Ok(RoutingDecision::Rejected {
        reason: RejectReason::NoProject,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::model::{
        CategoryId, CustomFieldId, ItemInfo, PostInfo, PriorityId, StatusId, UserId, UserInfo,
        VersionId,
    };

    /// Projects 1 (`ecookbook`) and 2 (`onlinestore`, no trackers), item 2,
    /// posts 1 (root) and 2 (reply), post 5 in locked thread 4.
    struct Store;

    impl Lookup for Store {
        fn project(&self, name: &str) -> CollaboratorResult<Option<ProjectId>> {
            Ok(match name {
                "ecookbook" => Some(ProjectId(1)),
                "onlinestore" => Some(ProjectId(2)),
                _ => None,
            })
        }
        fn project_trackers(&self, project: ProjectId) -> CollaboratorResult<Vec<TrackerId>> {
            Ok(if project == ProjectId(1) {
                vec![TrackerId(1), TrackerId(2)]
            } else {
                Vec::new()
            })
        }
        fn tracker(&self, _: ProjectId, _: &str) -> CollaboratorResult<Option<TrackerId>> {
            Ok(None)
        }
        fn status(&self, _: &str) -> CollaboratorResult<Option<StatusId>> {
            Ok(None)
        }
        fn priority(&self, _: &str) -> CollaboratorResult<Option<PriorityId>> {
            Ok(None)
        }
        fn category(&self, _: ProjectId, _: &str) -> CollaboratorResult<Option<CategoryId>> {
            Ok(None)
        }
        fn version(&self, _: ProjectId, _: &str) -> CollaboratorResult<Option<VersionId>> {
            Ok(None)
        }
        fn assignable_user(&self, _: ProjectId, _: &str) -> CollaboratorResult<Option<UserId>> {
            Ok(None)
        }
        fn custom_field(
            &self,
            _: ProjectId,
            _: Option<TrackerId>,
            _: &str,
        ) -> CollaboratorResult<Option<CustomFieldId>> {
            Ok(None)
        }
        fn user_by_email(&self, _: &str) -> CollaboratorResult<Option<UserInfo>> {
            Ok(None)
        }
        fn login_exists(&self, _: &str) -> CollaboratorResult<bool> {
            Ok(false)
        }
        fn item(&self, id: ItemId) -> CollaboratorResult<Option<ItemInfo>> {
            Ok((id == ItemId(2)).then(|| ItemInfo {
                id,
                project: ProjectId(1),
                tracker: TrackerId(2),
                subject: "Add ingredients categories".to_string(),
            }))
        }
        fn post(&self, id: PostId) -> CollaboratorResult<Option<PostInfo>> {
            let (root, locked) = match id.0 {
                1 | 2 => (PostId(1), false),
                4 | 5 => (PostId(4), true),
                _ => return Ok(None),
            };
            Ok(Some(PostInfo {
                id,
                project: ProjectId(1),
                root,
                subject: "First post".to_string(),
                locked,
            }))
        }
        fn item_by_message_id(&self, message_id: &str) -> CollaboratorResult<Option<ItemId>> {
            Ok((message_id == "item2@tracker").then_some(ItemId(2)))
        }
        fn post_by_message_id(&self, message_id: &str) -> CollaboratorResult<Option<PostId>> {
            Ok((message_id == "post2@tracker").then_some(PostId(2)))
        }
    }

    fn envelope(headers: &str) -> Envelope {
        decode(format!("From: jsmith@somenet.foo\n{headers}\n\nbody").as_bytes()).unwrap()
    }

    fn route(headers: &str, ctx: &RouteContext<'_>) -> RoutingDecision {
        Router::new("mailtrack")
            .unwrap()
            .route(&envelope(headers), ctx, &Store)
            .unwrap()
    }

    #[test]
    fn test_reply_by_in_reply_to_beats_project() {
        let ctx = RouteContext {
            requested_project: Some("ecookbook"),
            ..RouteContext::default()
        };
        let decision = route("Subject: Reply via email\nIn-Reply-To: <post2@tracker>", &ctx);
        assert_eq!(
            decision,
            RoutingDecision::NewReply {
                parent: PostId(1),
                project: ProjectId(1)
            }
        );
    }

    #[test]
    fn test_reply_by_emitted_message_id() {
        let decision = route(
            "Subject: Re: hi\nReferences: <x@y> <mailtrack.post-2.20240101@tracker>",
            &RouteContext::default(),
        );
        assert!(matches!(decision, RoutingDecision::NewReply { parent: PostId(1), .. }));
    }

    #[test]
    fn test_reply_by_subject_token() {
        let decision = route(
            "Subject: Re: [eCookbook - Help board - msg2] Reply to the first post",
            &RouteContext::default(),
        );
        assert!(matches!(decision, RoutingDecision::NewReply { parent: PostId(1), .. }));
    }

    #[test]
    fn test_locked_thread_rejected() {
        let decision = route("Subject: [Board - msg5] hi", &RouteContext::default());
        assert!(matches!(
            decision,
            RoutingDecision::Rejected { reason: RejectReason::Other(m) } if m.contains("locked")
        ));
    }

    #[test]
    fn test_update_by_subject_token() {
        let decision = route(
            "Subject: Re: [Cookbook - Feature #2] (New) Add ingredients categories",
            &RouteContext::default(),
        );
        assert_eq!(
            decision,
            RoutingDecision::UpdateItem {
                item: ItemId(2),
                project: ProjectId(1)
            }
        );
    }

    #[test]
    fn test_update_by_reference() {
        let decision = route("Subject: whatever\nIn-Reply-To: <item2@tracker>", &RouteContext::default());
        assert!(matches!(decision, RoutingDecision::UpdateItem { item: ItemId(2), .. }));

        let decision = route(
            "Subject: whatever\nReferences: <mailtrack.item-2.1@host>",
            &RouteContext::default(),
        );
        assert!(matches!(decision, RoutingDecision::UpdateItem { item: ItemId(2), .. }));
    }

    #[test]
    fn test_missing_item_token_rejected() {
        let decision = route("Subject: [Cookbook - Bug #99] gone", &RouteContext::default());
        assert!(matches!(
            decision,
            RoutingDecision::Rejected { reason: RejectReason::Other(_) }
        ));
    }

    #[test]
    fn test_new_item_project_sources() {
        let ctx = RouteContext {
            requested_project: Some("unknown"),
            project_header: Some("X-Mailtrack-Project"),
            default_project: Some("onlinestore"),
        };
        let decision = route("Subject: New\nX-Mailtrack-Project: ecookbook", &ctx);
        assert_eq!(
            decision,
            RoutingDecision::NewItem {
                project: ProjectId(1),
                tracker: TrackerId(1)
            }
        );

        let decision = route("Subject: New", &ctx);
        assert!(matches!(
            decision,
            RoutingDecision::Rejected { reason: RejectReason::Other(m) } if m.contains("no tracker")
        ));
    }

    #[test]
    fn test_no_project() {
        let decision = route("Subject: New", &RouteContext::default());
        assert_eq!(
            decision,
            RoutingDecision::Rejected {
                reason: RejectReason::NoProject
            }
        );
    }

    #[test]
    fn test_reply_subject() {
        let router = Router::new("mailtrack").unwrap();
        assert_eq!(
            router.reply_subject("Re: [eCookbook - Help board - msg2] Reply to the first post"),
            "Reply to the first post"
        );
        assert_eq!(router.reply_subject("RE: Fwd: Reply via email"), "Reply via email");
        assert_eq!(router.reply_subject("Re: [Board - msg2]"), "");
    }
}
