//! Share-link ledger
//!
//! Tables:
//! - share_links: issuable, redeemable download links (soft-deactivated, never deleted)
//! - usage_logs: append-only redemption audit trail

use peerlink_common::{now_epoch_ms, Database, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// A redeemable download link for one peer's configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareLink {
    pub id: String,
    pub peer_id: String,
    pub url: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub usage_count: i64,
    pub max_usage_count: i64,
    pub is_active: bool,
    pub user_id: Option<i64>,
    pub created_by: Option<String>,
}

/// Append-only redemption record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub id: i64,
    pub link_id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub accessed_at: i64,
}

/// Outcome of a redemption attempt
#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    /// The link was valid; usage was counted and logged
    Redeemed(ShareLink),
    Expired,
    UsageExceeded,
    NotFound,
}

/// Share-link ledger
#[derive(Clone)]
pub struct LinkLedger {
    db: Database,
    link_domain: String,
}

impl LinkLedger {
    pub fn new(db: Database, link_domain: impl Into<String>) -> Self {
        Self {
            db,
            link_domain: link_domain.into(),
        }
    }

    /// Initialize share-link schema
    pub fn init_schema(&self) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute_batch(
            r#"
            -- Share links
            CREATE TABLE IF NOT EXISTS share_links (
                id TEXT PRIMARY KEY,
                peer_id TEXT NOT NULL,
                url TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                usage_count INTEGER DEFAULT 0,
                max_usage_count INTEGER DEFAULT 1,
                is_active INTEGER DEFAULT 1,
                user_id INTEGER,
                created_by TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_share_links_peer_id ON share_links(peer_id);
            CREATE INDEX IF NOT EXISTS idx_share_links_is_active ON share_links(is_active);
            CREATE INDEX IF NOT EXISTS idx_share_links_expires_at ON share_links(expires_at);

            -- Usage logs
            CREATE TABLE IF NOT EXISTS usage_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id TEXT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                accessed_at INTEGER NOT NULL,
                FOREIGN KEY (link_id) REFERENCES share_links(id)
            );
            CREATE INDEX IF NOT EXISTS idx_usage_logs_link_id ON usage_logs(link_id);
            "#,
        )?;

        info!("Share-link schema initialized");
        Ok(())
    }

    /// Issue a new active link for a peer
    pub fn create_link(
        &self,
        peer_id: &str,
        expiry_hours: i64,
        max_usage: i64,
        user_id: Option<i64>,
        created_by: Option<&str>,
    ) -> Result<ShareLink> {
        let id = Uuid::new_v4().to_string();
        let now = now_epoch_ms();
        let expires_at = now + expiry_hours * 3_600_000;
        let url = format!("{}/download/{}", self.link_domain, id);

        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO share_links (id, peer_id, url, created_at, expires_at, max_usage_count, user_id, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![id, peer_id, url, now, expires_at, max_usage, user_id, created_by],
        )?;

        info!("Share link created: {} for peer {}", id, peer_id);

        Ok(ShareLink {
            id,
            peer_id: peer_id.to_string(),
            url,
            created_at: now,
            expires_at,
            usage_count: 0,
            max_usage_count: max_usage,
            is_active: true,
            user_id,
            created_by: created_by.map(String::from),
        })
    }

    pub fn get_link(&self, id: &str) -> Result<Option<ShareLink>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        get_link_tx(&conn, id)
    }

    /// Redeem a link: evaluate quota and expiry, count the use, log the access.
    ///
    /// Evaluate-and-increment is one conditional UPDATE so two concurrent
    /// redemptions cannot both pass the quota check when one use remains.
    /// Expired or exhausted links are deactivated before returning.
    pub fn redeem(
        &self,
        id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<RedeemOutcome> {
        let now = now_epoch_ms();
        let conn = self.db.connection();
        let mut conn = conn.lock();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE share_links
             SET usage_count = usage_count + 1
             WHERE id = ?1 AND is_active = 1 AND usage_count < max_usage_count AND expires_at >= ?2",
            params![id, now],
        )?;

        if changed == 1 {
            tx.execute(
                "INSERT INTO usage_logs (link_id, ip_address, user_agent, accessed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, ip_address, user_agent, now],
            )?;
            let link = get_link_tx(&tx, id)?.ok_or_else(|| {
                peerlink_common::Error::Internal(format!("redeemed link {} vanished", id))
            })?;
            tx.commit()?;
            debug!("Link {} redeemed ({}/{})", id, link.usage_count, link.max_usage_count);
            return Ok(RedeemOutcome::Redeemed(link));
        }

        // The conditional update did not match; classify why.
        let outcome = match get_link_tx(&tx, id)? {
            None => RedeemOutcome::NotFound,
            Some(link) if !link.is_active => RedeemOutcome::NotFound,
            Some(link) if now > link.expires_at => {
                tx.execute(
                    "UPDATE share_links SET is_active = 0 WHERE id = ?1",
                    params![id],
                )?;
                RedeemOutcome::Expired
            }
            Some(_) => {
                tx.execute(
                    "UPDATE share_links SET is_active = 0 WHERE id = ?1",
                    params![id],
                )?;
                RedeemOutcome::UsageExceeded
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Soft-deactivate a link (one-way transition)
    pub fn deactivate_link(&self, id: &str) -> Result<bool> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let changed = conn.execute(
            "UPDATE share_links SET is_active = 0 WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }

    /// List active links, newest first, optionally scoped to one user
    pub fn list_active(&self, user_id: Option<i64>) -> Result<Vec<ShareLink>> {
        let conn = self.db.connection();
        let conn = conn.lock();

        let mut links = Vec::new();
        if let Some(user_id) = user_id {
            let mut stmt = conn.prepare(
                "SELECT id, peer_id, url, created_at, expires_at, usage_count, max_usage_count, is_active, user_id, created_by
                 FROM share_links WHERE is_active = 1 AND user_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![user_id], map_link_row)?;
            for row in rows {
                links.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, peer_id, url, created_at, expires_at, usage_count, max_usage_count, is_active, user_id, created_by
                 FROM share_links WHERE is_active = 1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map([], map_link_row)?;
            for row in rows {
                links.push(row?);
            }
        }
        Ok(links)
    }

    /// Deactivate every active link past its expiry; returns the count.
    ///
    /// Idempotent and safe against concurrent redemptions: the same
    /// conditional-update discipline as redeem, so a racing redemption and
    /// sweep cannot both succeed on one link.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = now_epoch_ms();
        let conn = self.db.connection();
        let conn = conn.lock();
        let count = conn.execute(
            "UPDATE share_links SET is_active = 0 WHERE is_active = 1 AND expires_at < ?1",
            params![now],
        )?;
        if count > 0 {
            info!("Expiry sweep deactivated {} links", count);
        }
        Ok(count)
    }

    /// Redemption audit trail for one link, oldest first
    pub fn get_usage_logs(&self, link_id: &str) -> Result<Vec<UsageLogEntry>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, link_id, ip_address, user_agent, accessed_at
             FROM usage_logs WHERE link_id = ?1 ORDER BY accessed_at ASC",
        )?;
        let rows = stmt.query_map(params![link_id], |row| {
            Ok(UsageLogEntry {
                id: row.get(0)?,
                link_id: row.get(1)?,
                ip_address: row.get(2)?,
                user_agent: row.get(3)?,
                accessed_at: row.get(4)?,
            })
        })?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }
}

fn get_link_tx(conn: &Connection, id: &str) -> Result<Option<ShareLink>> {
    conn.query_row(
        "SELECT id, peer_id, url, created_at, expires_at, usage_count, max_usage_count, is_active, user_id, created_by
         FROM share_links WHERE id = ?1",
        params![id],
        map_link_row,
    )
    .optional()
    .map_err(Into::into)
}

fn map_link_row(row: &Row<'_>) -> rusqlite::Result<ShareLink> {
    Ok(ShareLink {
        id: row.get(0)?,
        peer_id: row.get(1)?,
        url: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        usage_count: row.get(5)?,
        max_usage_count: row.get(6)?,
        is_active: row.get::<_, i64>(7)? != 0,
        user_id: row.get(8)?,
        created_by: row.get(9)?,
    })
}
