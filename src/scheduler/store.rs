//! Read-only collaborator queries the auto-cancel job depends on.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::widely::EndpointId;

/// A customer device whose plan end date has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredLine {
    pub customer_device_id: String,
    pub device_id: String,
    pub plan_end_date: NaiveDate,
}

/// Device record as far as the cancel job needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    /// Phone number shown in reports.
    pub device_number: Option<String>,
    /// Widely line id; unprovisioned devices have none.
    pub endpoint_id: Option<EndpointId>,
}

/// Lines whose plan ended before `today`.
#[async_trait]
pub trait ExpiredLineScanner: Send + Sync {
    async fn expired_lines(&self, today: NaiveDate) -> Result<Vec<ExpiredLine>>;
}

/// Device by id; `Ok(None)` when it does not exist.
#[async_trait]
pub trait DeviceLookup: Send + Sync {
    async fn device(&self, device_id: &str) -> Result<Option<Device>>;
}

// ── SQLite store ────────────────────────────────────────────────

/// Back-office database view over `customer_devices` and `devices`.
///
/// Queries run on the blocking pool.
pub struct SqliteLineStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLineStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store dir: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open line store: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS devices (
                 id TEXT PRIMARY KEY,
                 device_number TEXT,
                 endpoint_id TEXT
             );
             CREATE TABLE IF NOT EXISTS customer_devices (
                 id TEXT PRIMARY KEY,
                 device_id TEXT NOT NULL,
                 plan_end_date TEXT NOT NULL,
                 active INTEGER NOT NULL DEFAULT 1
             );
             CREATE INDEX IF NOT EXISTS idx_customer_devices_end
                 ON customer_devices(plan_end_date);",
        )
        .context("Failed to initialise line store schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn upsert_device(&self, device: &Device) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO devices (id, device_number, endpoint_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET device_number = ?2, endpoint_id = ?3",
            params![
                device.id,
                device.device_number,
                device.endpoint_id.as_ref().map(ToString::to_string)
            ],
        )?;
        Ok(())
    }

    pub fn upsert_customer_device(
        &self,
        id: &str,
        device_id: &str,
        plan_end_date: NaiveDate,
        active: bool,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO customer_devices (id, device_id, plan_end_date, active) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET device_id = ?2, plan_end_date = ?3, active = ?4",
            params![id, device_id, plan_end_date.to_string(), active],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ExpiredLineScanner for SqliteLineStore {
    async fn expired_lines(&self, today: NaiveDate) -> Result<Vec<ExpiredLine>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            query_expired(&conn, today)
        })
            .await
            .context("Expired-line query task failed")?
    }
}

#[async_trait]
impl DeviceLookup for SqliteLineStore {
    async fn device(&self, device_id: &str) -> Result<Option<Device>> {
        let conn = Arc::clone(&self.conn);
        let device_id = device_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            query_device(&conn, &device_id)
        })
            .await
            .context("Device lookup task failed")?
    }
}

fn query_expired(conn: &Connection, today: NaiveDate) -> Result<Vec<ExpiredLine>> {
    let mut stmt = conn.prepare(
        "SELECT id, device_id, plan_end_date FROM customer_devices
         WHERE active = 1 AND plan_end_date < ?1
         ORDER BY plan_end_date, id",
    )?;
    let rows = stmt.query_map(params![today.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut lines = Vec::new();
    for row in rows {
        let (customer_device_id, device_id, end) = row?;
        let plan_end_date = NaiveDate::parse_from_str(&end, "%Y-%m-%d").with_context(|| {
            format!("Invalid plan_end_date '{end}' for customer device {customer_device_id}")
        })?;
        lines.push(ExpiredLine {
            customer_device_id,
            device_id,
            plan_end_date,
        });
    }
    Ok(lines)
}

fn query_device(conn: &Connection, device_id: &str) -> Result<Option<Device>> {
    let device = conn
        .query_row(
            "SELECT id, device_number, endpoint_id FROM devices WHERE id = ?1",
            params![device_id],
            |row| {
                Ok(Device {
                    id: row.get(0)?,
                    device_number: row.get(1)?,
                    endpoint_id: row
                        .get::<_, Option<String>>(2)?
                        .filter(|s| !s.trim().is_empty())
                        .map(|s| match s.parse::<i64>() {
                            Ok(n) => EndpointId::Number(n),
                            Err(_) => EndpointId::Text(s),
                        }),
                })
            },
        )
        .optional()?;
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn seeded(store: &SqliteLineStore) {
        store
            .upsert_device(&Device {
                id: "d1".into(),
                device_number: Some("0501234567".into()),
                endpoint_id: Some(EndpointId::Number(1001)),
            })
            .unwrap();
        store.upsert_customer_device("cd1", "d1", date("2026-10-01"), true).unwrap();
        store.upsert_customer_device("cd2", "d2", date("2026-10-17"), true).unwrap();
        store.upsert_customer_device("cd3", "d3", date("2026-10-18"), true).unwrap();
        store.upsert_customer_device("cd4", "d4", date("2026-01-01"), false).unwrap();
    }

    #[tokio::test]
    async fn expired_lines_excludes_today_and_inactive() {
        let store = SqliteLineStore::in_memory().unwrap();
        seeded(&store);

        let lines = store.expired_lines(date("2026-10-18")).await.unwrap();
        let ids: Vec<&str> = lines.iter().map(|l| l.customer_device_id.as_str()).collect();
        assert_eq!(ids, vec!["cd1", "cd2"]);
        assert_eq!(lines[0].device_id, "d1");
        assert_eq!(lines[0].plan_end_date, date("2026-10-01"));
    }

    #[tokio::test]
    async fn device_lookup_parses_numeric_endpoint() {
        let store = SqliteLineStore::in_memory().unwrap();
        seeded(&store);

        let device = store.device("d1").await.unwrap().unwrap();
        assert_eq!(device.endpoint_id, Some(EndpointId::Number(1001)));
        assert_eq!(device.device_number.as_deref(), Some("0501234567"));
        assert!(store.device("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_endpoint_reads_as_none() {
        let store = SqliteLineStore::in_memory().unwrap();
        store
            .upsert_device(&Device {
                id: "d9".into(),
                device_number: None,
                endpoint_id: Some(EndpointId::Text(String::new())),
            })
            .unwrap();
        let device = store.device("d9").await.unwrap().unwrap();
        assert!(device.endpoint_id.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_queries_share_one_store() {
        let store = Arc::new(SqliteLineStore::in_memory().unwrap());
        seeded(&store);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let lines = store.expired_lines(date("2026-10-18")).await.unwrap();
                    let device = store.device("d1").await.unwrap();
                    (lines.len(), device.map(|d| d.id))
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), (2, Some("d1".to_string())));
        }
    }

    #[tokio::test]
    async fn bad_stored_date_surfaces_as_error() {
        let store = SqliteLineStore::in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO customer_devices (id, device_id, plan_end_date) VALUES ('cdx', 'dx', '2026-13-40')",
                [],
            )
            .unwrap();
        let err = store.expired_lines(date("2027-01-01")).await.unwrap_err();
        assert!(err.to_string().contains("Invalid plan_end_date"));
    }

    #[tokio::test]
    async fn file_store_persists_between_opens() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("backoffice.db");
        {
            let store = SqliteLineStore::open(&path).unwrap();
            seeded(&store);
        }
        let store = SqliteLineStore::open(&path).unwrap();
        assert_eq!(store.expired_lines(date("2026-10-18")).await.unwrap().len(), 2);
    }
}
