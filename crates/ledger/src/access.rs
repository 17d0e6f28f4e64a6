//! Access ledger
//!
//! Per-user state machine over two tables:
//! - access_requests: one row per user, latest request wins
//! - approved_users: derived grant consulted by the access check
//!
//! The ledger keeps the two tables consistent inside its own transactions.

use peerlink_common::{now_epoch_ms, AuthMode, Database, Error, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("unknown request status: {}", s)),
        }
    }
}

/// An access request row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub requested_at: i64,
    pub status: RequestStatus,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<i64>,
    pub notes: Option<String>,
}

/// A granted user row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedUser {
    pub user_id: i64,
    pub username: Option<String>,
    pub approved_by: i64,
    pub approved_at: i64,
    pub notes: Option<String>,
}

/// Aggregate counters for the admin surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStats {
    pub auth_mode: AuthMode,
    pub total_requests: i64,
    pub pending_requests: i64,
    pub approved_users: i64,
    pub whitelist_users: i64,
}

/// Access ledger
#[derive(Clone)]
pub struct AccessLedger {
    db: Database,
    mode: AuthMode,
    admin_ids: Vec<i64>,
    allowed_user_ids: Vec<i64>,
}

impl AccessLedger {
    pub fn new(db: Database, mode: AuthMode, admin_ids: Vec<i64>, allowed_user_ids: Vec<i64>) -> Self {
        Self {
            db,
            mode,
            admin_ids,
            allowed_user_ids,
        }
    }

    /// Initialize access schema
    pub fn init_schema(&self) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS access_requests (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT,
                last_name TEXT,
                requested_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                reviewed_by INTEGER,
                reviewed_at INTEGER,
                notes TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_access_requests_status ON access_requests(status);

            CREATE TABLE IF NOT EXISTS approved_users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                approved_by INTEGER NOT NULL,
                approved_at INTEGER NOT NULL,
                notes TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_approved_users_approved_at ON approved_users(approved_at);
            "#,
        )?;

        info!("Access schema initialized (mode: {})", self.mode);
        Ok(())
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Whether a user may obtain a config link right now.
    ///
    /// Admins always pass, regardless of mode.
    pub fn can_get_config(&self, user_id: i64) -> Result<bool> {
        if self.is_admin(user_id) {
            return Ok(true);
        }

        match self.mode {
            AuthMode::Open => Ok(true),
            AuthMode::Whitelist => {
                Ok(self.allowed_user_ids.contains(&user_id) || self.is_user_approved(user_id)?)
            }
            AuthMode::AdminApproval => self.is_user_approved(user_id),
            AuthMode::Closed => Ok(false),
        }
    }

    pub fn is_user_approved(&self, user_id: i64) -> Result<bool> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let row: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM approved_users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    /// File a new access request.
    ///
    /// Allowed from no-prior-request or rejected; distinct failures from
    /// approved and pending so the caller can answer differently.
    pub fn request_access(
        &self,
        user_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<AccessRequest> {
        if let Some(existing) = self.get_access_request(user_id)? {
            match existing.status {
                RequestStatus::Approved => return Err(Error::AlreadyApproved),
                RequestStatus::Pending => return Err(Error::RequestAlreadyPending),
                RequestStatus::Rejected => {} // a rejected user may ask again
            }
        }

        let now = now_epoch_ms();
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO access_requests
             (user_id, username, first_name, last_name, requested_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
            params![user_id, username, first_name, last_name, now],
        )?;

        info!("Access request created: user {}", user_id);

        Ok(AccessRequest {
            user_id,
            username: username.map(String::from),
            first_name: first_name.map(String::from),
            last_name: last_name.map(String::from),
            requested_at: now,
            status: RequestStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            notes: None,
        })
    }

    pub fn get_access_request(&self, user_id: i64) -> Result<Option<AccessRequest>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.query_row(
            "SELECT user_id, username, first_name, last_name, requested_at, status, reviewed_by, reviewed_at, notes
             FROM access_requests WHERE user_id = ?1",
            params![user_id],
            map_request_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Approve a pending request and write the grant row.
    ///
    /// Compare-and-swap on status: only a request still pending at write time
    /// is approved. Returns false when no pending request matched, so a
    /// concurrent reject wins cleanly instead of last-writer-wins.
    pub fn approve_user(&self, user_id: i64, admin_id: i64, notes: Option<&str>) -> Result<bool> {
        let now = now_epoch_ms();
        let conn = self.db.connection();
        let mut conn = conn.lock();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE access_requests
             SET status = 'approved', reviewed_by = ?1, reviewed_at = ?2, notes = ?3
             WHERE user_id = ?4 AND status = 'pending'",
            params![admin_id, now, notes, user_id],
        )?;

        if changed == 0 {
            warn!("Approve skipped: user {} has no pending request", user_id);
            return Ok(false);
        }

        let username: Option<String> = tx
            .query_row(
                "SELECT username FROM access_requests WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        tx.execute(
            "INSERT OR REPLACE INTO approved_users (user_id, username, approved_by, approved_at, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, username, admin_id, now, notes],
        )?;
        tx.commit()?;

        info!("User {} approved by admin {}", user_id, admin_id);
        Ok(true)
    }

    /// Reject a request. Leaves any existing grant untouched.
    pub fn reject_user(&self, user_id: i64, admin_id: i64, notes: Option<&str>) -> Result<bool> {
        let now = now_epoch_ms();
        let conn = self.db.connection();
        let conn = conn.lock();
        let changed = conn.execute(
            "UPDATE access_requests
             SET status = 'rejected', reviewed_by = ?1, reviewed_at = ?2, notes = ?3
             WHERE user_id = ?4",
            params![admin_id, now, notes, user_id],
        )?;

        if changed > 0 {
            info!("User {} rejected by admin {}", user_id, admin_id);
        }
        Ok(changed > 0)
    }

    /// Remove the grant and rewrite the request to rejected, regardless of
    /// prior status.
    pub fn revoke_access(&self, user_id: i64, admin_id: i64) -> Result<bool> {
        let now = now_epoch_ms();
        let conn = self.db.connection();
        let mut conn = conn.lock();
        let tx = conn.transaction()?;

        let deleted = tx.execute(
            "DELETE FROM approved_users WHERE user_id = ?1",
            params![user_id],
        )?;
        let updated = tx.execute(
            "UPDATE access_requests
             SET status = 'rejected', reviewed_by = ?1, reviewed_at = ?2
             WHERE user_id = ?3",
            params![admin_id, now, user_id],
        )?;
        tx.commit()?;

        if deleted > 0 || updated > 0 {
            info!("Access revoked: user {} by admin {}", user_id, admin_id);
        }
        Ok(deleted > 0 || updated > 0)
    }

    /// Pending requests, oldest first
    pub fn get_pending_requests(&self) -> Result<Vec<AccessRequest>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, username, first_name, last_name, requested_at, status, reviewed_by, reviewed_at, notes
             FROM access_requests WHERE status = 'pending' ORDER BY requested_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map([], map_request_row)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    /// Granted users, newest first
    pub fn get_approved_users(&self) -> Result<Vec<ApprovedUser>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, username, approved_by, approved_at, notes
             FROM approved_users ORDER BY approved_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ApprovedUser {
                user_id: row.get(0)?,
                username: row.get(1)?,
                approved_by: row.get(2)?,
                approved_at: row.get(3)?,
                notes: row.get(4)?,
            })
        })?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn get_auth_stats(&self) -> Result<AuthStats> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let total_requests: i64 =
            conn.query_row("SELECT COUNT(*) FROM access_requests", [], |row| row.get(0))?;
        let pending_requests: i64 = conn.query_row(
            "SELECT COUNT(*) FROM access_requests WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        let approved_users: i64 =
            conn.query_row("SELECT COUNT(*) FROM approved_users", [], |row| row.get(0))?;

        Ok(AuthStats {
            auth_mode: self.mode,
            total_requests,
            pending_requests,
            approved_users,
            whitelist_users: self.allowed_user_ids.len() as i64,
        })
    }
}

fn map_request_row(row: &Row<'_>) -> rusqlite::Result<AccessRequest> {
    Ok(AccessRequest {
        user_id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        requested_at: row.get(4)?,
        status: row
            .get::<_, String>(5)?
            .parse()
            .unwrap_or(RequestStatus::Pending),
        reviewed_by: row.get(6)?,
        reviewed_at: row.get(7)?,
        notes: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ledger(mode: AuthMode) -> AccessLedger {
        let db = Database::open_memory().unwrap();
        let ledger = AccessLedger::new(db, mode, vec![1], vec![100]);
        ledger.init_schema().unwrap();
        ledger
    }

    #[test]
    fn test_request_then_duplicate() {
        let ledger = test_ledger(AuthMode::AdminApproval);

        let request = ledger
            .request_access(7, Some("alice"), Some("Alice"), None)
            .unwrap();
        assert_eq!(request.status, RequestStatus::Pending);

        let err = ledger.request_access(7, Some("alice"), None, None).unwrap_err();
        assert!(matches!(err, Error::RequestAlreadyPending));
    }

    #[test]
    fn test_request_after_approval_fails() {
        let ledger = test_ledger(AuthMode::AdminApproval);
        ledger.request_access(7, Some("alice"), None, None).unwrap();
        assert!(ledger.approve_user(7, 1, Some("ok")).unwrap());

        let err = ledger.request_access(7, Some("alice"), None, None).unwrap_err();
        assert!(matches!(err, Error::AlreadyApproved));
    }

    #[test]
    fn test_rejected_user_may_ask_again() {
        let ledger = test_ledger(AuthMode::AdminApproval);
        ledger.request_access(7, None, None, None).unwrap();
        assert!(ledger.reject_user(7, 1, Some("no")).unwrap());

        let request = ledger.request_access(7, None, None, None).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
    }

    #[test]
    fn test_approve_writes_grant_row() {
        let ledger = test_ledger(AuthMode::AdminApproval);
        ledger.request_access(7, Some("alice"), None, None).unwrap();

        assert!(!ledger.is_user_approved(7).unwrap());
        assert!(ledger.approve_user(7, 1, None).unwrap());
        assert!(ledger.is_user_approved(7).unwrap());

        let users = ledger.get_approved_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username.as_deref(), Some("alice"));
        assert_eq!(users[0].approved_by, 1);
    }

    #[test]
    fn test_approve_requires_pending() {
        let ledger = test_ledger(AuthMode::AdminApproval);
        // No request at all
        assert!(!ledger.approve_user(7, 1, None).unwrap());

        // Already rejected: the compare-and-swap refuses to flip it
        ledger.request_access(7, None, None, None).unwrap();
        ledger.reject_user(7, 1, None).unwrap();
        assert!(!ledger.approve_user(7, 1, None).unwrap());
        assert!(!ledger.is_user_approved(7).unwrap());
    }

    #[test]
    fn test_revoke_access() {
        let ledger = test_ledger(AuthMode::AdminApproval);
        ledger.request_access(7, None, None, None).unwrap();
        ledger.approve_user(7, 1, None).unwrap();
        assert!(ledger.can_get_config(7).unwrap());

        assert!(ledger.revoke_access(7, 1).unwrap());
        assert!(!ledger.can_get_config(7).unwrap());
        let request = ledger.get_access_request(7).unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Rejected);
    }

    #[test]
    fn test_admins_always_pass() {
        for mode in [
            AuthMode::Open,
            AuthMode::Whitelist,
            AuthMode::AdminApproval,
            AuthMode::Closed,
        ] {
            let ledger = test_ledger(mode);
            assert!(ledger.can_get_config(1).unwrap(), "admin denied in {}", mode);
        }
    }

    #[test]
    fn test_modes() {
        let ledger = test_ledger(AuthMode::Open);
        assert!(ledger.can_get_config(7).unwrap());

        let ledger = test_ledger(AuthMode::Closed);
        assert!(!ledger.can_get_config(7).unwrap());

        let ledger = test_ledger(AuthMode::Whitelist);
        assert!(ledger.can_get_config(100).unwrap()); // static allow-list
        assert!(!ledger.can_get_config(7).unwrap());
        ledger.request_access(7, None, None, None).unwrap();
        ledger.approve_user(7, 1, None).unwrap();
        assert!(ledger.can_get_config(7).unwrap()); // approved row also passes

        let ledger = test_ledger(AuthMode::AdminApproval);
        assert!(!ledger.can_get_config(100).unwrap()); // allow-list not consulted
    }

    #[test]
    fn test_pending_ordering_and_stats() {
        let ledger = test_ledger(AuthMode::AdminApproval);
        ledger.request_access(7, None, None, None).unwrap();
        ledger.request_access(8, None, None, None).unwrap();
        ledger.request_access(9, None, None, None).unwrap();
        ledger.approve_user(8, 1, None).unwrap();

        let pending = ledger.get_pending_requests().unwrap();
        assert_eq!(
            pending.iter().map(|r| r.user_id).collect::<Vec<_>>(),
            vec![7, 9]
        );

        let stats = ledger.get_auth_stats().unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.pending_requests, 2);
        assert_eq!(stats.approved_users, 1);
        assert_eq!(stats.whitelist_users, 1);
        assert_eq!(stats.auth_mode, AuthMode::AdminApproval);
    }
}
