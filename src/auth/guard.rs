//! Pre-insert uniqueness checks for candidate identity fields.

use tracing::instrument;

use crate::backing::{BackingError, BackingService};

use super::error::ConflictField;
use super::types::LookupField;

/// Probe the account store for an existing holder of any candidate field.
///
/// Checked in order: enrollment record id (students only), then username,
/// then email; the first hit wins. Read-only and advisory: two concurrent
/// registrations can both pass before either commits, so the backing
/// store's constraints remain the authority and insert failures are mapped
/// to conflicts by the registration engine.
#[instrument(skip(backing))]
pub async fn check_conflicts(
    backing: &dyn BackingService,
    username: &str,
    email: &str,
    record_id: Option<&str>,
) -> Result<Option<ConflictField>, BackingError> {
    if let Some(record_id) = record_id {
        if backing
            .account_exists(LookupField::RecordId, record_id)
            .await?
        {
            return Ok(Some(ConflictField::RecordId));
        }
    }
    if backing.account_exists(LookupField::Username, username).await? {
        return Ok(Some(ConflictField::Username));
    }
    if backing.account_exists(LookupField::Email, email).await? {
        return Ok(Some(ConflictField::Email));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::{Account, AccountKind};
    use crate::backing::MemoryBacking;
    use anyhow::Result;
    use uuid::Uuid;

    async fn seeded() -> Result<MemoryBacking> {
        let backing = MemoryBacking::new();
        backing
            .insert_account(&Account {
                id: Uuid::new_v4(),
                kind: AccountKind::Student {
                    full_name: "Ana Souza".to_string(),
                    record_id: "BRG12345".to_string(),
                },
                username: "ana".to_string(),
                email: "ana@x.com".to_string(),
                email_verified: true,
                verification_code: None,
                code_expires_at: None,
                banned: false,
                ban_reason: None,
                last_access: None,
            })
            .await?;
        Ok(backing)
    }

    #[tokio::test]
    async fn record_id_conflict_wins_over_later_checks() -> Result<()> {
        let backing = seeded().await?;
        let conflict =
            check_conflicts(&backing, "ana", "ana@x.com", Some("BRG12345")).await?;
        assert_eq!(conflict, Some(ConflictField::RecordId));
        Ok(())
    }

    #[tokio::test]
    async fn username_checked_before_email() -> Result<()> {
        let backing = seeded().await?;
        let conflict = check_conflicts(&backing, "ana", "ana@x.com", None).await?;
        assert_eq!(conflict, Some(ConflictField::Username));
        Ok(())
    }

    #[tokio::test]
    async fn email_conflict_detected_last() -> Result<()> {
        let backing = seeded().await?;
        let conflict = check_conflicts(&backing, "bea", "ana@x.com", None).await?;
        assert_eq!(conflict, Some(ConflictField::Email));
        Ok(())
    }

    #[tokio::test]
    async fn clean_candidate_passes() -> Result<()> {
        let backing = seeded().await?;
        let conflict = check_conflicts(&backing, "bea", "bea@x.com", Some("BRG99999")).await?;
        assert_eq!(conflict, None);
        Ok(())
    }
}
