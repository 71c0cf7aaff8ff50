//! Domain records shared by the engines, the backing seam, and the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// What kind of person owns the account. Immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccountKind {
    /// Enrolled student; carries the real name and the campus enrollment id
    /// (`BRG` + five digits, stored upper-case).
    Student { full_name: String, record_id: String },
    Visitor,
}

impl AccountKind {
    #[must_use]
    pub fn is_student(&self) -> bool {
        matches!(self, Self::Student { .. })
    }

    /// Enrollment id, present only for students.
    #[must_use]
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Student { record_id, .. } => Some(record_id),
            Self::Visitor => None,
        }
    }
}

/// A registered identity capable of authenticating.
///
/// `verification_code` and `code_expires_at` are both set or both `None`;
/// a `None` code means no pending verification challenge. A verified account
/// never holds a pending code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: AccountKind,
    pub username: String,
    pub email: String,
    pub email_verified: bool,
    pub verification_code: Option<String>,
    pub code_expires_at: Option<DateTime<Utc>>,
    pub banned: bool,
    pub ban_reason: Option<String>,
    pub last_access: Option<DateTime<Utc>>,
}

impl Account {
    /// Name used when addressing the person, e.g. in verification emails.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match &self.kind {
            AccountKind::Student { full_name, .. } => full_name,
            AccountKind::Visitor => &self.username,
        }
    }
}

/// Opaque, time-bounded proof of authentication issued by the backing
/// service. Stored and forwarded, never inspected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A session together with the account it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticated {
    pub account_id: Uuid,
    pub session: Session,
}

/// Field an existence lookup runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupField {
    Username,
    Email,
    RecordId,
}

impl LookupField {
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Email => "email",
            Self::RecordId => "record_id",
        }
    }
}

/// Partial update applied to an account record.
///
/// Nullable columns use a double `Option`: the outer one is "touch this
/// field at all", the inner one is the new value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountPatch {
    pub email_verified: Option<bool>,
    pub verification_code: Option<Option<String>>,
    pub code_expires_at: Option<Option<DateTime<Utc>>>,
    pub last_access: Option<Option<DateTime<Utc>>>,
}

impl AccountPatch {
    /// Patch that marks the email verified and clears the pending code.
    #[must_use]
    pub fn verified() -> Self {
        Self {
            email_verified: Some(true),
            verification_code: Some(None),
            code_expires_at: Some(None),
            ..Self::default()
        }
    }

    /// Patch that installs a fresh pending code, replacing any prior one.
    #[must_use]
    pub fn new_code(code: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            verification_code: Some(Some(code)),
            code_expires_at: Some(Some(expires_at)),
            ..Self::default()
        }
    }

    /// Patch that records a successful login.
    #[must_use]
    pub fn touch_last_access(now: DateTime<Utc>) -> Self {
        Self {
            last_access: Some(Some(now)),
            ..Self::default()
        }
    }

    /// Merge the touched fields into an account record.
    pub fn apply(&self, account: &mut Account) {
        if let Some(verified) = self.email_verified {
            account.email_verified = verified;
        }
        if let Some(code) = &self.verification_code {
            account.verification_code = code.clone();
        }
        if let Some(expires_at) = self.code_expires_at {
            account.code_expires_at = expires_at;
        }
        if let Some(last_access) = self.last_access {
            account.last_access = last_access;
        }
    }

    /// Wire representation containing only the touched fields.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(verified) = self.email_verified {
            map.insert("email_verified".to_string(), json!(verified));
        }
        if let Some(code) = &self.verification_code {
            map.insert("verification_code".to_string(), json!(code));
        }
        if let Some(expires_at) = self.code_expires_at {
            map.insert("code_expires_at".to_string(), json!(expires_at));
        }
        if let Some(last_access) = self.last_access {
            map.insert("last_access".to_string(), json!(last_access));
        }
        Value::Object(map)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn student() -> Account {
        Account {
            id: Uuid::new_v4(),
            kind: AccountKind::Student {
                full_name: "Ana Souza".to_string(),
                record_id: "BRG12345".to_string(),
            },
            username: "ana".to_string(),
            email: "ana@x.com".to_string(),
            email_verified: false,
            verification_code: Some("4321".to_string()),
            code_expires_at: Some(Utc::now()),
            banned: false,
            ban_reason: None,
            last_access: None,
        }
    }

    #[test]
    fn account_kind_serializes_with_tag() -> Result<()> {
        let account = student();
        let value = serde_json::to_value(&account)?;
        assert_eq!(value["kind"], "student");
        assert_eq!(value["record_id"], "BRG12345");

        let decoded: Account = serde_json::from_value(value)?;
        assert_eq!(decoded, account);
        Ok(())
    }

    #[test]
    fn display_name_prefers_full_name_for_students() {
        let account = student();
        assert_eq!(account.display_name(), "Ana Souza");

        let visitor = Account {
            kind: AccountKind::Visitor,
            ..student()
        };
        assert_eq!(visitor.display_name(), "ana");
    }

    #[test]
    fn verified_patch_clears_code_and_expiry() {
        let mut account = student();
        AccountPatch::verified().apply(&mut account);
        assert!(account.email_verified);
        assert_eq!(account.verification_code, None);
        assert_eq!(account.code_expires_at, None);
    }

    #[test]
    fn patch_json_contains_only_touched_fields() {
        let patch = AccountPatch::verified();
        let value = patch.to_json();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["email_verified"], json!(true));
        assert_eq!(object["verification_code"], Value::Null);
        assert!(!object.contains_key("last_access"));
    }

    #[test]
    fn empty_patch_reports_empty() {
        assert!(AccountPatch::default().is_empty());
        assert!(!AccountPatch::verified().is_empty());
    }
}
