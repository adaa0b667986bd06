//! Sender identity: match an account, fall back to anonymous, or derive a
//! new account from the `From` header.

use crate::collab::Lookup;
use crate::error::IdentityError;
use crate::model::UserId;
use mailtrack_mime::Mailbox;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Generated passwords are never shorter than this.
const PASSWORD_FLOOR: usize = 12;

/// Hex digits appended to `user` for generated logins.
const LOGIN_SUFFIX_DIGITS: usize = 12;

/// Attempts at finding an unused generated login.
const LOGIN_ATTEMPTS: usize = 10;

/// What to do with a sender that has no account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownUserPolicy {
    /// Ignore the message.
    #[default]
    Ignore,
    /// Ingest as the anonymous user.
    Accept,
    /// Create an account for the sender.
    Create,
}

impl UnknownUserPolicy {
    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ignore" => Some(Self::Ignore),
            "accept" => Some(Self::Accept),
            "create" => Some(Self::Create),
            _ => None,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Accept => "accept",
            Self::Create => "create",
        }
    }
}

/// Length limits for derived accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountLimits {
    /// Maximum login length in characters.
    pub login_max_length: usize,
    /// Maximum first/last name length in characters.
    pub name_max_length: usize,
    /// Minimum password length.
    pub password_min_length: usize,
}

impl Default for AccountLimits {
    fn default() -> Self {
        Self {
            login_max_length: 30,
            name_max_length: 30,
            password_min_length: 8,
        }
    }
}

/// Account to provision for an unknown sender.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct NewAccount {
    /// Sender address.
    pub email: String,
    /// Unused login.
    pub login: String,
    /// First name.
    pub first_name: String,
    /// Last name, `-` when the display name has a single token.
    pub last_name: String,
    /// Initial password.
    #[serde(skip)]
    pub password: String,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("email", &self.email)
            .field("login", &self.login)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Who the message is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Active account matching the sender.
    Existing(UserId),
    /// Unknown sender accepted as anonymous.
    Anonymous,
    /// Unknown sender; the account still has to be created.
    Create(NewAccount),
}

/// Resolves the sender of a message.
///
/// # Errors
///
/// Returns [`IdentityError::UnknownSender`] when there is no sender address
/// or the policy refuses unknown senders, [`IdentityError::LockedSender`] for
/// a locked account, and [`IdentityError::LoginExhausted`] when no unused
/// login could be generated.
pub fn resolve_identity<R: Rng + ?Sized>(
    from: Option<&Mailbox>,
    policy: UnknownUserPolicy,
    limits: &AccountLimits,
    lookup: &dyn Lookup,
    rng: &mut R,
) -> Result<Identity, IdentityError> {
    let Some(from) = from.filter(|m| !m.address.trim().is_empty()) else {
        return Err(IdentityError::UnknownSender);
    };
    let email = from.address.trim();

    if let Some(user) = lookup.user_by_email(email)? {
        if !user.active {
            return Err(IdentityError::LockedSender);
        }
        return Ok(Identity::Existing(user.id));
    }

    debug!(email, policy = policy.as_str(), "Sender has no account");
    match policy {
        UnknownUserPolicy::Ignore => Err(IdentityError::UnknownSender),
        UnknownUserPolicy::Accept => Ok(Identity::Anonymous),
        UnknownUserPolicy::Create => {
            new_account(email, from.name.as_deref(), limits, lookup, rng).map(Identity::Create)
        }
    }
}

/// Derives account fields from an address and optional display name.
///
/// # Errors
///
/// Returns an error if the login lookup fails or no unused login is found.
pub fn new_account<R: Rng + ?Sized>(
    email: &str,
    display_name: Option<&str>,
    limits: &AccountLimits,
    lookup: &dyn Lookup,
    rng: &mut R,
) -> Result<NewAccount, IdentityError> {
    let mut tokens = display_name.unwrap_or_default().split_whitespace();
    let (first, last) = match tokens.next() {
        Some(first) => {
            let rest = tokens.collect::<Vec<_>>().join(" ");
            (first.to_string(), rest)
        }
        None => {
            let local = email.split('@').next().unwrap_or(email);
            (local.to_string(), String::new())
        }
    };
    let last = if last.is_empty() { "-".to_string() } else { last };

    Ok(NewAccount {
        email: email.to_string(),
        login: pick_login(email, limits.login_max_length, lookup, rng)?,
        first_name: truncate_chars(&first, limits.name_max_length),
        last_name: truncate_chars(&last, limits.name_max_length),
        password: password(limits.password_min_length.max(PASSWORD_FLOOR), rng),
    })
}

fn pick_login<R: Rng + ?Sized>(
    email: &str,
    max: usize,
    lookup: &dyn Lookup,
    rng: &mut R,
) -> Result<String, IdentityError> {
    let login = truncate_chars(email, max);
    if is_valid_login(&login) && !lookup.login_exists(&login)? {
        return Ok(login);
    }

    for _ in 0..LOGIN_ATTEMPTS {
        let candidate = generated_login(rng);
        if !lookup.login_exists(&candidate)? {
            debug!(login = %candidate, "Generated login for new account");
            return Ok(candidate);
        }
    }
    Err(IdentityError::LoginExhausted)
}

fn generated_login<R: Rng + ?Sized>(rng: &mut R) -> String {
    let suffix: String = (0..LOGIN_SUFFIX_DIGITS)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect();
    format!("user{suffix}")
}

fn is_valid_login(login: &str) -> bool {
    !login.is_empty()
        && login
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '@' | '.'))
}

fn password<R: Rng + ?Sized>(length: usize, rng: &mut R) -> String {
    (0..length)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
