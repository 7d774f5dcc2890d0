use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::contact::ContactRecord;
use crate::error::StoreError;
use crate::gov_filter::{government_category, is_government_contact};
use crate::partition::{PartitionKey, PartitionState, PartitionStatus};
use crate::store::{ContactStore, ProgressStore};
use crate::summary::RunSummary;

pub const DEFAULT_DB_PATH: &str = "data/contacts.sqlite";

const MAX_LOCK_HOLD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// SQLite-backed contact and progress store. One connection, one writer.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS contacts (
                id             INTEGER PRIMARY KEY,
                email          TEXT UNIQUE NOT NULL,
                first_name     TEXT NOT NULL,
                last_name      TEXT NOT NULL,
                firm_name      TEXT NOT NULL,
                phone          TEXT NOT NULL,
                website        TEXT NOT NULL,
                practice_areas TEXT NOT NULL,
                city           TEXT NOT NULL,
                state          TEXT NOT NULL,
                source         TEXT NOT NULL,
                source_ref     TEXT NOT NULL,
                member_url     TEXT,
                -- delivery fields, owned by the campaign sender
                status         TEXT NOT NULL DEFAULT 'pending',
                sent           BOOLEAN NOT NULL DEFAULT 0,
                created_at     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_source ON contacts(source);

            CREATE TABLE IF NOT EXISTS known_identities (
                identity   TEXT PRIMARY KEY,
                source     TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS partitions (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                site         TEXT NOT NULL,
                key          TEXT NOT NULL,
                key_json     TEXT NOT NULL,
                depth        INTEGER NOT NULL,
                status       TEXT NOT NULL CHECK(status IN ('pending','in_progress','done','capped')),
                result_count INTEGER,
                children     TEXT NOT NULL DEFAULT '[]',
                note         TEXT,
                updated_at   TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(site, key)
            );
            CREATE INDEX IF NOT EXISTS idx_partitions_site_status ON partitions(site, status);

            CREATE TABLE IF NOT EXISTS crawl_runs (
                id          INTEGER PRIMARY KEY,
                site        TEXT NOT NULL,
                started_at  TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                inserted    INTEGER NOT NULL,
                summary     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_site ON crawl_runs(site);

            CREATE TABLE IF NOT EXISTS site_locks (
                site        TEXT PRIMARY KEY,
                owner       TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at  TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn row_to_state(
        site: &str,
        key_json: String,
        status: String,
        result_count: Option<u32>,
        children: String,
        note: Option<String>,
    ) -> Result<PartitionState, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            site: site.to_string(),
            key: key_json.clone(),
            reason,
        };
        let key: PartitionKey = serde_json::from_str(&key_json)?;
        let status = PartitionStatus::parse(&status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", status)))?;
        let children: Vec<PartitionKey> = serde_json::from_str(&children)?;
        Ok(PartitionState {
            key,
            status,
            result_count,
            children,
            note,
        })
    }
}

// ── Contacts ──

impl ContactStore for SqliteStore {
    fn exists(&self, email: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM contacts WHERE email = ?1 LIMIT 1",
                params![email],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert(&self, r: &ContactRecord) -> Result<bool, StoreError> {
        let areas = serde_json::to_string(&r.practice_areas)?;
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO contacts
             (email, first_name, last_name, firm_name, phone, website, practice_areas,
              city, state, source, source_ref, member_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                r.email, r.first_name, r.last_name, r.firm_name, r.phone, r.website, areas,
                r.city, r.state, r.source, r.source_ref, r.member_url, r.created_at.to_rfc3339(),
            ],
        )?;
        Ok(n > 0)
    }

    fn is_known(&self, identity: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM known_identities WHERE identity = ?1",
                params![identity],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn remember(&self, identity: &str, source: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO known_identities (identity, source) VALUES (?1, ?2)",
            params![identity, source],
        )?;
        Ok(())
    }
}

// ── Progress ──

impl ProgressStore for SqliteStore {
    fn load_pending(&self, site: &str) -> Result<Vec<PartitionState>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT key_json, status, result_count, children, note
             FROM partitions
             WHERE site = ?1 AND status IN ('pending', 'in_progress')
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![site], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<Vec<(String, String, Option<u32>, String, Option<String>)>, _>>()?;

        rows.into_iter()
            .map(|(key_json, status, count, children, note)| {
                Self::row_to_state(site, key_json, status, count, children, note)
            })
            .collect()
    }

    fn has_partitions(&self, site: &str) -> Result<bool, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM partitions WHERE site = ?1",
            params![site],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    fn load(&self, site: &str, key: &PartitionKey) -> Result<Option<PartitionState>, StoreError> {
        let row: Option<(String, String, Option<u32>, String, Option<String>)> = self
            .conn
            .query_row(
                "SELECT key_json, status, result_count, children, note
                 FROM partitions WHERE site = ?1 AND key = ?2",
                params![site, key.to_string()],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .optional()?;
        row.map(|(key_json, status, count, children, note)| {
            Self::row_to_state(site, key_json, status, count, children, note)
        })
        .transpose()
    }

    fn upsert(&self, site: &str, s: &PartitionState) -> Result<(), StoreError> {
        let key_json = serde_json::to_string(&s.key)?;
        let children = serde_json::to_string(&s.children)?;
        self.conn.execute(
            "INSERT INTO partitions (site, key, key_json, depth, status, result_count, children, note, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))
             ON CONFLICT(site, key) DO UPDATE SET
                status = excluded.status,
                result_count = excluded.result_count,
                children = excluded.children,
                note = excluded.note,
                updated_at = excluded.updated_at",
            params![
                site,
                s.key.to_string(),
                key_json,
                s.key.depth,
                s.status.as_str(),
                s.result_count,
                children,
                s.note,
            ],
        )?;
        Ok(())
    }

    fn insert_pending(&self, site: &str, key: &PartitionKey) -> Result<bool, StoreError> {
        let n = self.conn.execute(
            "INSERT INTO partitions (site, key, key_json, depth, status)
             VALUES (?1, ?2, ?3, ?4, 'pending')
             ON CONFLICT(site, key) DO NOTHING",
            params![site, key.to_string(), serde_json::to_string(key)?, key.depth],
        )?;
        Ok(n > 0)
    }

    fn reset(&self, site: &str) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .execute("DELETE FROM partitions WHERE site = ?1", params![site])?)
    }

    fn reclaim_in_progress(&self, site: &str) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE partitions SET status = 'pending', updated_at = datetime('now')
             WHERE site = ?1 AND status = 'in_progress'",
            params![site],
        )?)
    }

    fn status_counts(&self, site: &str) -> Result<Vec<(PartitionStatus, usize)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM partitions WHERE site = ?1 GROUP BY status ORDER BY status",
        )?;
        let rows = stmt
            .query_map(params![site], |row| Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(s, n)| PartitionStatus::parse(&s).map(|st| (st, n)))
            .collect())
    }

    fn try_lock(&self, site: &str, owner: &str, hold_for: Duration) -> Result<bool, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let held: Option<(String, String)> = tx
            .query_row(
                "SELECT owner, expires_at FROM site_locks WHERE site = ?1",
                params![site],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let now = Utc::now();
        if let Some((holder, expires_at)) = held {
            let expired = chrono::DateTime::parse_from_rfc3339(&expires_at)
                .map_or(true, |t| t.with_timezone(&Utc) <= now);
            if holder != owner && !expired {
                return Ok(false);
            }
        }

        let hold = chrono::Duration::from_std(hold_for.min(MAX_LOCK_HOLD))
            .unwrap_or_else(|_| chrono::Duration::days(365));
        tx.execute(
            "INSERT INTO site_locks (site, owner, acquired_at, expires_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(site) DO UPDATE SET
                owner = excluded.owner,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at",
            params![site, owner, now.to_rfc3339(), (now + hold).to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn unlock(&self, site: &str, owner: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM site_locks WHERE site = ?1 AND owner = ?2",
            params![site, owner],
        )?;
        Ok(())
    }

    fn record_run(&self, summary: &RunSummary) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO crawl_runs (site, started_at, finished_at, inserted, summary)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                summary.site,
                summary.started.to_rfc3339(),
                summary.finished.to_rfc3339(),
                summary.contacts_inserted,
                serde_json::to_string(summary)?,
            ],
        )?;
        Ok(())
    }
}

// ── Stats ──

pub struct SiteStats {
    pub site: String,
    pub contacts: usize,
    pub partitions: Vec<(PartitionStatus, usize)>,
    pub runs: usize,
    pub total_inserted: usize,
    pub last_run: Option<String>,
}

impl SqliteStore {
    pub fn sites(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT site FROM partitions
             UNION SELECT source FROM contacts
             UNION SELECT site FROM crawl_runs
             ORDER BY 1",
        )?;
        let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    pub fn site_stats(&self, site: &str) -> Result<SiteStats, StoreError> {
        let contacts: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM contacts WHERE source = ?1",
            params![site],
            |r| r.get(0),
        )?;
        let (runs, total_inserted, last_run): (usize, usize, Option<String>) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(inserted), 0), MAX(finished_at)
             FROM crawl_runs WHERE site = ?1",
            params![site],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        Ok(SiteStats {
            site: site.to_string(),
            contacts,
            partitions: self.status_counts(site)?,
            runs,
            total_inserted,
            last_run,
        })
    }

    pub fn total_contacts(&self) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |r| r.get(0))?)
    }
}

// ── Government audit ──

/// A stored contact that the government filter rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlaggedContact {
    pub id: i64,
    pub email: String,
    pub firm_name: String,
    pub source: String,
    pub category: &'static str,
}

impl SqliteStore {
    /// Stored contacts that `is_government_contact` rejects, oldest first.
    pub fn government_contacts(&self) -> Result<Vec<FlaggedContact>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, email, firm_name, source FROM contacts ORDER BY id")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
            .collect::<Result<Vec<(i64, String, String, String)>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|(_, email, firm, _)| is_government_contact(email, firm))
            .map(|(id, email, firm_name, source)| FlaggedContact {
                category: government_category(&email, &firm_name).unwrap_or("other_govt"),
                id,
                email,
                firm_name,
                source,
            })
            .collect())
    }

    /// Delete contacts by id in one transaction. Their dedup identities stay,
    /// so a later crawl does not fetch them again.
    pub fn delete_contacts(&self, ids: &[i64]) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM contacts WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::NOTE_SUPERSEDED;

    fn record(email: &str) -> ContactRecord {
        ContactRecord {
            email: email.into(),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            firm_name: "Doe Law".into(),
            phone: String::new(),
            website: String::new(),
            practice_areas: vec!["Personal Injury".into()],
            city: String::new(),
            state: "KY".into(),
            source: "kybar".into(),
            source_ref: "17".into(),
            member_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn contact_email_is_unique() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.exists("jane@doe.com").unwrap());
        assert!(store.insert(&record("jane@doe.com")).unwrap());
        assert!(store.exists("jane@doe.com").unwrap());

        let mut other_site = record("jane@doe.com");
        other_site.source = "wsba".into();
        assert!(!store.insert(&other_site).unwrap());
        assert_eq!(store.total_contacts().unwrap(), 1);
    }

    #[test]
    fn identities_are_remembered() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.is_known("ref:kybar:17").unwrap());
        store.remember("ref:kybar:17", "kybar").unwrap();
        store.remember("ref:kybar:17", "kybar").unwrap();
        assert!(store.is_known("ref:kybar:17").unwrap());
    }

    #[test]
    fn upsert_keeps_discovery_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = PartitionState::pending(PartitionKey::seed("prefix", "Aa"));
        let b = PartitionState::pending(PartitionKey::seed("prefix", "Ab"));
        store.upsert("kybar", &a).unwrap();
        store.upsert("kybar", &b).unwrap();

        // Re-upserting `a` must not move it behind `b`.
        let mut a2 = a.clone();
        a2.status = PartitionStatus::InProgress;
        store.upsert("kybar", &a2).unwrap();

        let pending = store.load_pending("kybar").unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].key, a.key);
        assert_eq!(pending[0].status, PartitionStatus::InProgress);
        assert_eq!(pending[1].key, b.key);
    }

    #[test]
    fn done_partitions_leave_pending_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut s = PartitionState::pending(PartitionKey::seed("prefix", "Ab"));
        store.upsert("kybar", &s).unwrap();
        s.status = PartitionStatus::Done;
        s.note = Some(NOTE_SUPERSEDED.into());
        s.result_count = Some(100);
        store.upsert("kybar", &s).unwrap();
        assert!(store.load_pending("kybar").unwrap().is_empty());
        assert!(store.has_partitions("kybar").unwrap());
        let loaded = store.load("kybar", &s.key).unwrap().unwrap();
        assert!(loaded.is_superseded());
        assert_eq!(loaded.result_count, Some(100));
        assert!(store.load("wsba", &s.key).unwrap().is_none());
        assert_eq!(
            store.status_counts("kybar").unwrap(),
            vec![(PartitionStatus::Done, 1)]
        );
    }

    #[test]
    fn reclaim_and_reset() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut s = PartitionState::pending(PartitionKey::seed("prefix", "Aa"));
        s.status = PartitionStatus::InProgress;
        store.upsert("kybar", &s).unwrap();
        store.upsert("wsba", &s).unwrap();

        assert_eq!(store.reclaim_in_progress("kybar").unwrap(), 1);
        assert_eq!(
            store.load_pending("kybar").unwrap()[0].status,
            PartitionStatus::Pending
        );

        assert_eq!(store.reset("kybar").unwrap(), 1);
        assert!(!store.has_partitions("kybar").unwrap());
        assert!(store.has_partitions("wsba").unwrap());
    }

    #[test]
    fn lock_is_exclusive_until_expired() {
        let store = SqliteStore::open_in_memory().unwrap();
        let hour = Duration::from_secs(3600);
        assert!(store.try_lock("kybar", "run-1", hour).unwrap());
        assert!(!store.try_lock("kybar", "run-2", hour).unwrap());
        // The holder's own window decides, not the caller's.
        assert!(!store.try_lock("kybar", "run-2", Duration::ZERO).unwrap());
        assert!(store.try_lock("kybar", "run-1", hour).unwrap());
        store.unlock("kybar", "run-1").unwrap();

        // A run that declared a zero hold has expired as soon as it locked.
        assert!(store.try_lock("kybar", "run-2", Duration::ZERO).unwrap());
        assert!(store.try_lock("kybar", "run-3", hour).unwrap());
        assert!(!store.try_lock("kybar", "run-4", hour).unwrap());
    }

    #[test]
    fn insert_pending_keeps_existing_state() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = PartitionKey::seed("prefix", "Aba");
        let mut done = PartitionState::pending(key.clone());
        done.status = PartitionStatus::Done;
        done.result_count = Some(12);
        store.upsert("kybar", &done).unwrap();

        assert!(!store.insert_pending("kybar", &key).unwrap());
        assert_eq!(store.load("kybar", &key).unwrap().unwrap(), done);

        let fresh = PartitionKey::seed("prefix", "Abb");
        assert!(store.insert_pending("kybar", &fresh).unwrap());
        let loaded = store.load("kybar", &fresh).unwrap().unwrap();
        assert_eq!(loaded, PartitionState::pending(fresh));
    }

    #[test]
    fn government_contacts_are_flagged_and_deleted() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pd = record("jdoe@firm.com");
        pd.firm_name = "Office of the Public Defender".into();
        let mut federal = record("asmith@usdoj.gov");
        federal.source = "wsba".into();
        store.insert(&record("jane@doe.com")).unwrap();
        store.insert(&pd).unwrap();
        store.insert(&federal).unwrap();

        let flagged = store.government_contacts().unwrap();
        let summary: Vec<(&str, &str, &str)> = flagged
            .iter()
            .map(|f| (f.email.as_str(), f.source.as_str(), f.category))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("jdoe@firm.com", "kybar", "public_defender"),
                ("asmith@usdoj.gov", "wsba", "federal_gov"),
            ]
        );

        let ids: Vec<i64> = flagged.iter().map(|f| f.id).collect();
        assert_eq!(store.delete_contacts(&ids).unwrap(), 2);
        assert_eq!(store.total_contacts().unwrap(), 1);
        assert!(store.exists("jane@doe.com").unwrap());
        assert!(store.government_contacts().unwrap().is_empty());
    }
}
