//! Attribute resolution: raw keyword values to typed item attributes.
//!
//! Resolution is a pure function of the raw values, the override policy,
//! the forced and default maps, and the lookup collaborator. Values that do
//! not resolve are dropped with a warning; only a failing lookup aborts.

use crate::collab::Lookup;
use crate::error::{CollaboratorResult, ConfigError};
use crate::keywords::{Field, RawValues};
use crate::model::{
    Assignee, CategoryId, CustomFieldId, PriorityId, ProjectId, StatusId, TrackerId, VersionId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Placeholder subject for messages without one.
pub const NO_SUBJECT: &str = "(no subject)";

/// Fields a sender may always set, whatever the configured policy.
const IMPLICIT_OVERRIDES: [Field; 8] = [
    Field::Project,
    Field::Status,
    Field::StartDate,
    Field::DueDate,
    Field::EstimatedHours,
    Field::DoneRatio,
    Field::AssignedTo,
    Field::FixedVersion,
];

/// Which keyword fields a sender may set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OverridePolicy {
    /// Only the implicitly overridable fields.
    #[default]
    Implicit,
    /// Every field.
    All,
    /// The implicit fields plus these.
    Fields(BTreeSet<Field>),
}

impl OverridePolicy {
    /// Returns true if a keyword value for `field` may be applied.
    ///
    /// Custom fields and the implicitly overridable fields are always
    /// permitted.
    #[must_use]
    pub fn permits(&self, field: &Field) -> bool {
        if field.is_custom() || IMPLICIT_OVERRIDES.contains(field) {
            return true;
        }
        match self {
            Self::Implicit => false,
            Self::All => true,
            Self::Fields(fields) => fields.contains(field),
        }
    }
}

impl FromStr for OverridePolicy {
    type Err = ConfigError;

    /// Parses `*` or a comma-separated list of canonical field names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::All);
        }
        let fields = s
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::parse)
            .collect::<Result<BTreeSet<Field>, _>>()?;
        Ok(if fields.is_empty() {
            Self::Implicit
        } else {
            Self::Fields(fields)
        })
    }
}

impl fmt::Display for OverridePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Implicit => Ok(()),
            Self::All => f.write_str("*"),
            Self::Fields(fields) => {
                let names: Vec<String> = fields.iter().map(ToString::to_string).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

impl TryFrom<String> for OverridePolicy {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<OverridePolicy> for String {
    fn from(policy: OverridePolicy) -> Self {
        policy.to_string()
    }
}

/// Textual field values (forced or default attributes).
pub type AttributeMap = BTreeMap<Field, String>;

/// Typed attribute set. Unset fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAttributes {
    /// Tracker.
    pub tracker: Option<TrackerId>,
    /// Status.
    pub status: Option<StatusId>,
    /// Priority.
    pub priority: Option<PriorityId>,
    /// Category.
    pub category: Option<CategoryId>,
    /// Target version.
    pub fixed_version: Option<VersionId>,
    /// Assignee.
    pub assigned_to: Option<Assignee>,
    /// Start date.
    pub start_date: Option<NaiveDate>,
    /// Due date.
    pub due_date: Option<NaiveDate>,
    /// Estimated hours.
    pub estimated_hours: Option<f64>,
    /// Percent done, 0 to 100.
    pub done_ratio: Option<u8>,
    /// Custom field values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<CustomFieldId, String>,
}

impl ResolvedAttributes {
    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn is_set(&self, field: &Field, custom: Option<CustomFieldId>) -> bool {
        match field {
            Field::Tracker => self.tracker.is_some(),
            Field::Status => self.status.is_some(),
            Field::Priority => self.priority.is_some(),
            Field::Category => self.category.is_some(),
            Field::FixedVersion => self.fixed_version.is_some(),
            Field::AssignedTo => self.assigned_to.is_some(),
            Field::StartDate => self.start_date.is_some(),
            Field::DueDate => self.due_date.is_some(),
            Field::EstimatedHours => self.estimated_hours.is_some(),
            Field::DoneRatio => self.done_ratio.is_some(),
            Field::Custom(_) => custom.is_some_and(|id| self.custom_fields.contains_key(&id)),
            Field::Project => false,
        }
    }
}

/// What the attributes are resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A new item: forced values and defaults apply.
    NewItem,
    /// An existing item: only keyword values become changes.
    Update,
}

/// Lookup scope of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveScope {
    /// Routed project.
    pub project: ProjectId,
    /// Routed (or current) tracker, used for custom fields when no tracker
    /// is resolved.
    pub tracker: Option<TrackerId>,
    /// New item or update.
    pub target: Target,
    /// Whether `assigned_to` may name a group.
    pub groups_assignable: bool,
}

/// Resolves raw keyword values into typed attributes.
///
/// Keyword values apply when the policy permits the field and it is not
/// forced. Forced values then overwrite, and defaults fill what is still
/// unset. For [`Target::Update`] forced values only block keywords and
/// defaults are ignored, so an existing item keeps its values. `project`
/// never appears in the result.
///
/// # Errors
///
/// Returns an error only if a lookup call fails.
pub fn resolve(
    raw: &RawValues,
    policy: &OverridePolicy,
    fixed: &AttributeMap,
    defaults: &AttributeMap,
    lookup: &dyn Lookup,
    scope: ResolveScope,
) -> CollaboratorResult<ResolvedAttributes> {
    let mut resolver = Resolver {
        lookup,
        scope,
        out: ResolvedAttributes::default(),
    };

    let keywords: Vec<(&Field, &str)> = raw
        .iter()
        .filter(|(field, _)| {
            if fixed.contains_key(*field) {
                debug!(%field, "Keyword ignored, field is forced");
                false
            } else if !policy.permits(field) {
                debug!(%field, "Keyword ignored, override not allowed");
                false
            } else {
                true
            }
        })
        .collect();

    let (fixed, defaults): (Vec<(&Field, &str)>, Vec<(&Field, &str)>) = match scope.target {
        Target::NewItem => (
            fixed.iter().map(|(f, v)| (f, v.as_str())).collect(),
            defaults.iter().map(|(f, v)| (f, v.as_str())).collect(),
        ),
        Target::Update => (Vec::new(), Vec::new()),
    };

    // Built-in fields first: custom fields depend on the resolved tracker.
    for custom in [false, true] {
        resolver.apply(&keywords, custom, false)?;
        resolver.apply(&fixed, custom, false)?;
        resolver.apply(&defaults, custom, true)?;
    }

    Ok(resolver.out)
}

struct Resolver<'a> {
    lookup: &'a dyn Lookup,
    scope: ResolveScope,
    out: ResolvedAttributes,
}

impl Resolver<'_> {
    fn apply(&mut self, entries: &[(&Field, &str)], custom: bool, only_unset: bool) -> CollaboratorResult<()> {
        for &(field, value) in entries {
            if field.is_custom() != custom || *field == Field::Project {
                continue;
            }
            let custom_id = match field {
                Field::Custom(name) => self.custom_field(name)?,
                _ => None,
            };
            if only_unset && self.out.is_set(field, custom_id) {
                continue;
            }
            if !self.set(field, value, custom_id)? {
                warn!(%field, value, "Dropping unresolvable attribute value");
            }
        }
        Ok(())
    }

    fn custom_field(&self, name: &str) -> CollaboratorResult<Option<CustomFieldId>> {
        let tracker = self.out.tracker.or(self.scope.tracker);
        self.lookup.custom_field(self.scope.project, tracker, name)
    }

    /// Resolves and stores one value; returns false if it did not resolve.
    fn set(&mut self, field: &Field, value: &str, custom_id: Option<CustomFieldId>) -> CollaboratorResult<bool> {
        let value = value.trim();
        let project = self.scope.project;
        let groups_assignable = self.scope.groups_assignable;
        let lookup = self.lookup;
        let out = &mut self.out;

        let resolved = match field {
            Field::Tracker => lookup.tracker(project, value)?.map(|id| out.tracker = Some(id)),
            Field::Status => lookup.status(value)?.map(|id| out.status = Some(id)),
            Field::Priority => lookup.priority(value)?.map(|id| out.priority = Some(id)),
            Field::Category => lookup.category(project, value)?.map(|id| out.category = Some(id)),
            Field::FixedVersion => lookup
                .version(project, value)?
                .map(|id| out.fixed_version = Some(id)),
            Field::AssignedTo => {
                let assignee = match lookup.assignable_user(project, value)? {
                    Some(user) => Some(Assignee::User(user)),
                    None if groups_assignable => lookup
                        .assignable_group(project, value)?
                        .map(Assignee::Group),
                    None => None,
                };
                assignee.map(|a| out.assigned_to = Some(a))
            }
            Field::StartDate => parse_date(value).map(|d| out.start_date = Some(d)),
            Field::DueDate => parse_date(value).map(|d| out.due_date = Some(d)),
            Field::EstimatedHours => parse_hours(value).map(|h| out.estimated_hours = Some(h)),
            Field::DoneRatio => parse_done_ratio(value).map(|r| out.done_ratio = Some(r)),
            Field::Custom(_) => custom_id.map(|id| {
                out.custom_fields.insert(id, value.to_string());
            }),
            Field::Project => None,
        };

        Ok(resolved.is_some())
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn parse_hours(value: &str) -> Option<f64> {
    value
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|h| h.is_finite() && *h >= 0.0)
}

fn parse_done_ratio(value: &str) -> Option<u8> {
    value
        .trim_end_matches('%')
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|r| *r <= 100)
}

/// Truncates a subject to `max` characters; blank subjects become
/// [`NO_SUBJECT`].
#[must_use]
pub fn truncate_subject(subject: &str, max: usize) -> String {
    let subject = subject.trim();
    if subject.is_empty() {
        return NO_SUBJECT.to_string();
    }
    subject.chars().take(max).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::too_many_lines, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::model::{GroupId, ItemId, ItemInfo, PostId, PostInfo, UserId, UserInfo};

    /// Lookup over a fixed vocabulary.
    struct Vocabulary;

    fn find<T>(name: &str, table: &[(&str, T)]) -> Option<T>
    where
        T: Copy,
    {
        table
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, id)| *id)
    }

    impl Lookup for Vocabulary {
        fn project(&self, name: &str) -> CollaboratorResult<Option<ProjectId>> {
            Ok(find(name, &[("onlinestore", ProjectId(2))]))
        }
        fn project_trackers(&self, _: ProjectId) -> CollaboratorResult<Vec<TrackerId>> {
            Ok(vec![TrackerId(1), TrackerId(2)])
        }
        fn tracker(&self, _: ProjectId, name: &str) -> CollaboratorResult<Option<TrackerId>> {
            Ok(find(name, &[("Bug", TrackerId(1)), ("Feature request", TrackerId(2))]))
        }
        fn status(&self, name: &str) -> CollaboratorResult<Option<StatusId>> {
            Ok(find(name, &[("New", StatusId(1)), ("Resolved", StatusId(3))]))
        }
        fn priority(&self, name: &str) -> CollaboratorResult<Option<PriorityId>> {
            Ok(find(name, &[("Normal", PriorityId(4)), ("High", PriorityId(5)), ("Urgent", PriorityId(6))]))
        }
        fn category(&self, _: ProjectId, name: &str) -> CollaboratorResult<Option<CategoryId>> {
            Ok(find(name, &[("Stock management", CategoryId(3))]))
        }
        fn version(&self, _: ProjectId, name: &str) -> CollaboratorResult<Option<VersionId>> {
            if name == "broken" {
                return Err(CollaboratorError::Unavailable("versions".into()));
            }
            Ok(find(name, &[("Alpha", VersionId(1))]))
        }
        fn assignable_user(&self, _: ProjectId, name: &str) -> CollaboratorResult<Option<UserId>> {
            Ok(find(name, &[("John Smith", UserId(2)), ("jsmith", UserId(2))]))
        }
        fn assignable_group(&self, _: ProjectId, name: &str) -> CollaboratorResult<Option<GroupId>> {
            Ok(find(name, &[("B Team", GroupId(11)), ("jsmith", GroupId(12))]))
        }
        fn custom_field(
            &self,
            _: ProjectId,
            tracker: Option<TrackerId>,
            name: &str,
        ) -> CollaboratorResult<Option<CustomFieldId>> {
            // "Bug only" exists for the Bug tracker alone.
            if name == "Bug only" {
                return Ok((tracker == Some(TrackerId(1))).then_some(CustomFieldId(9)));
            }
            Ok(find(name, &[("Searchable field", CustomFieldId(2))]))
        }
        fn user_by_email(&self, _: &str) -> CollaboratorResult<Option<UserInfo>> {
            Ok(None)
        }
        fn login_exists(&self, _: &str) -> CollaboratorResult<bool> {
            Ok(false)
        }
        fn item(&self, _: ItemId) -> CollaboratorResult<Option<ItemInfo>> {
            Ok(None)
        }
        fn post(&self, _: PostId) -> CollaboratorResult<Option<PostInfo>> {
            Ok(None)
        }
        fn item_by_message_id(&self, _: &str) -> CollaboratorResult<Option<ItemId>> {
            Ok(None)
        }
        fn post_by_message_id(&self, _: &str) -> CollaboratorResult<Option<PostId>> {
            Ok(None)
        }
    }

    fn raw(pairs: &[(Field, &str)]) -> RawValues {
        let mut values = RawValues::new();
        for (field, value) in pairs {
            values.insert(field.clone(), *value);
        }
        values
    }

    fn attrs(pairs: &[(Field, &str)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(f, v)| (f.clone(), (*v).to_string()))
            .collect()
    }

    const NEW_ITEM: ResolveScope = ResolveScope {
        project: ProjectId(2),
        tracker: Some(TrackerId(2)),
        target: Target::NewItem,
        groups_assignable: false,
    };

    #[test]
    fn test_policy_parse() {
        assert_eq!("*".parse::<OverridePolicy>().unwrap(), OverridePolicy::All);
        assert_eq!("".parse::<OverridePolicy>().unwrap(), OverridePolicy::Implicit);

        let policy: OverridePolicy = "tracker, category,priority".parse().unwrap();
        assert!(policy.permits(&Field::Tracker));
        assert!(policy.permits(&Field::Priority));
        assert_eq!(policy.to_string(), "tracker,priority,category");

        assert!("tracker,bogus".parse::<OverridePolicy>().is_err());
    }

    #[test]
    fn test_policy_implicit_fields() {
        let policy = OverridePolicy::Implicit;
        assert!(policy.permits(&Field::Status));
        assert!(policy.permits(&Field::DueDate));
        assert!(policy.permits(&Field::Custom("Anything".into())));
        assert!(!policy.permits(&Field::Tracker));
        assert!(!policy.permits(&Field::Category));
        assert!(!policy.permits(&Field::Priority));
    }

    #[test]
    fn test_resolve_full_set() {
        let values = raw(&[
            (Field::Status, "Resolved"),
            (Field::StartDate, "2010-01-01"),
            (Field::DueDate, "2010-12-31"),
            (Field::AssignedTo, "John Smith"),
            (Field::FixedVersion, "alpha"),
            (Field::EstimatedHours, "2.5"),
            (Field::DoneRatio, "30"),
            (Field::Custom("Searchable field".into()), "Value for a custom field"),
        ]);
        let out = resolve(
            &values,
            &OverridePolicy::Implicit,
            &AttributeMap::new(),
            &AttributeMap::new(),
            &Vocabulary,
            NEW_ITEM,
        )
        .unwrap();

        assert_eq!(out.status, Some(StatusId(3)));
        assert_eq!(out.start_date, NaiveDate::from_ymd_opt(2010, 1, 1));
        assert_eq!(out.due_date, NaiveDate::from_ymd_opt(2010, 12, 31));
        assert_eq!(out.assigned_to, Some(Assignee::User(UserId(2))));
        assert_eq!(out.fixed_version, Some(VersionId(1)));
        assert_eq!(out.estimated_hours, Some(2.5));
        assert_eq!(out.done_ratio, Some(30));
        assert_eq!(
            out.custom_fields.get(&CustomFieldId(2)).map(String::as_str),
            Some("Value for a custom field")
        );
        assert_eq!(out.tracker, None);
    }

    #[test]
    fn test_policy_gates_tracker_category_priority() {
        let values = raw(&[
            (Field::Tracker, "Feature request"),
            (Field::Category, "Stock management"),
            (Field::Priority, "Urgent"),
        ]);
        let denied = resolve(
            &values,
            &OverridePolicy::Implicit,
            &AttributeMap::new(),
            &AttributeMap::new(),
            &Vocabulary,
            NEW_ITEM,
        )
        .unwrap();
        assert!(denied.is_empty());

        let allowed = resolve(
            &values,
            &"tracker,category,priority".parse().unwrap(),
            &AttributeMap::new(),
            &AttributeMap::new(),
            &Vocabulary,
            NEW_ITEM,
        )
        .unwrap();
        assert_eq!(allowed.tracker, Some(TrackerId(2)));
        assert_eq!(allowed.category, Some(CategoryId(3)));
        assert_eq!(allowed.priority, Some(PriorityId(6)));
    }

    #[test]
    fn test_forced_value_wins() {
        let values = raw(&[(Field::Tracker, "Feature request"), (Field::Priority, "Urgent")]);
        let fixed = attrs(&[(Field::Priority, "High")]);
        let out = resolve(
            &values,
            &OverridePolicy::All,
            &fixed,
            &AttributeMap::new(),
            &Vocabulary,
            NEW_ITEM,
        )
        .unwrap();
        assert_eq!(out.priority, Some(PriorityId(5)));
        assert_eq!(out.tracker, Some(TrackerId(2)));
    }

    #[test]
    fn test_defaults_fill_unset_fields_only() {
        let values = raw(&[(Field::Status, "Resolved"), (Field::DueDate, "garbage")]);
        let defaults = attrs(&[
            (Field::Status, "New"),
            (Field::Priority, "Normal"),
            (Field::DueDate, "2011-01-01"),
        ]);
        let out = resolve(
            &values,
            &OverridePolicy::Implicit,
            &AttributeMap::new(),
            &defaults,
            &Vocabulary,
            NEW_ITEM,
        )
        .unwrap();
        assert_eq!(out.status, Some(StatusId(3)));
        assert_eq!(out.priority, Some(PriorityId(4)));
        assert_eq!(out.due_date, NaiveDate::from_ymd_opt(2011, 1, 1));
    }

    #[test]
    fn test_update_ignores_forced_and_defaults() {
        let values = raw(&[(Field::Status, "Resolved"), (Field::Priority, "Urgent")]);
        let fixed = attrs(&[(Field::Priority, "High"), (Field::Tracker, "Bug")]);
        let defaults = attrs(&[(Field::Category, "Stock management")]);
        let scope = ResolveScope {
            target: Target::Update,
            ..NEW_ITEM
        };
        let out = resolve(&values, &OverridePolicy::All, &fixed, &defaults, &Vocabulary, scope)
            .unwrap();
        assert_eq!(
            out,
            ResolvedAttributes {
                status: Some(StatusId(3)),
                ..ResolvedAttributes::default()
            }
        );
    }

    #[test]
    fn test_group_assignment() {
        let resolve_assignee = |name: &str, groups_assignable: bool| {
            let scope = ResolveScope {
                groups_assignable,
                ..NEW_ITEM
            };
            resolve(
                &raw(&[(Field::AssignedTo, name)]),
                &OverridePolicy::Implicit,
                &AttributeMap::new(),
                &AttributeMap::new(),
                &Vocabulary,
                scope,
            )
            .unwrap()
            .assigned_to
        };

        assert_eq!(resolve_assignee("B Team", false), None);
        assert_eq!(
            resolve_assignee("b team", true),
            Some(Assignee::Group(GroupId(11)))
        );
        // A user of the same name takes precedence.
        assert_eq!(
            resolve_assignee("jsmith", true),
            Some(Assignee::User(UserId(2)))
        );
    }

    #[test]
    fn test_invalid_values_dropped() {
        let values = raw(&[
            (Field::AssignedTo, "Nobody"),
            (Field::StartDate, "2010-13-45"),
            (Field::EstimatedHours, "-1"),
            (Field::DoneRatio, "150"),
            (Field::Status, "Nonexistent"),
        ]);
        let out = resolve(
            &values,
            &OverridePolicy::All,
            &AttributeMap::new(),
            &AttributeMap::new(),
            &Vocabulary,
            NEW_ITEM,
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_project_never_resolved() {
        let values = raw(&[(Field::Project, "onlinestore")]);
        let fixed = attrs(&[(Field::Project, "onlinestore")]);
        let out = resolve(
            &values,
            &OverridePolicy::All,
            &fixed,
            &AttributeMap::new(),
            &Vocabulary,
            NEW_ITEM,
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_custom_field_scoped_to_resolved_tracker() {
        let values = raw(&[(Field::Tracker, "Bug"), (Field::Custom("Bug only".into()), "x")]);
        let out = resolve(
            &values,
            &OverridePolicy::All,
            &AttributeMap::new(),
            &AttributeMap::new(),
            &Vocabulary,
            NEW_ITEM,
        )
        .unwrap();
        assert_eq!(out.tracker, Some(TrackerId(1)));
        assert!(out.custom_fields.contains_key(&CustomFieldId(9)));
    }

    #[test]
    fn test_lookup_failure_propagates() {
        let values = raw(&[(Field::FixedVersion, "broken")]);
        let err = resolve(
            &values,
            &OverridePolicy::Implicit,
            &AttributeMap::new(),
            &AttributeMap::new(),
            &Vocabulary,
            NEW_ITEM,
        )
        .unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)));
    }

    #[test]
    fn test_value_parsers() {
        assert_eq!(parse_hours("2,5"), Some(2.5));
        assert_eq!(parse_hours("NaN"), None);
        assert_eq!(parse_done_ratio("30 %"), Some(30));
        assert_eq!(parse_done_ratio("100"), Some(100));
        assert_eq!(parse_done_ratio("101"), None);
        assert_eq!(parse_date("2010-01-01"), NaiveDate::from_ymd_opt(2010, 1, 1));
        assert_eq!(parse_date("01/01/2010"), None);
    }

    #[test]
    fn test_truncate_subject() {
        let long = "x".repeat(300);
        assert_eq!(truncate_subject(&long, 255).chars().count(), 255);
        assert_eq!(truncate_subject("   ", 255), NO_SUBJECT);
        assert_eq!(truncate_subject(" Hello ", 255), "Hello");
        assert_eq!(truncate_subject("éééé", 2), "éé");
    }
}
