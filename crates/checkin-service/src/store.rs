use std::path::Path;

use checkin_core::{AttendanceRecord, CollabError, Group, Profile, RemoteStore};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("invalid timestamp in attendance row {id}: {value}")]
    InvalidTimestamp { id: String, value: String },
}

impl From<StoreError> for CollabError {
    fn from(e: StoreError) -> Self {
        CollabError::Store(e.to_string())
    }
}

/// SQLite-backed profile, group and attendance storage.
///
/// Stands in for the hosted relational store: the check-in flow only sees it
/// through [`RemoteStore`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at the given path and create tables.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS groups (
                     id TEXT PRIMARY KEY,
                     name TEXT NOT NULL,
                     latitude REAL NOT NULL,
                     longitude REAL NOT NULL,
                     start_time TEXT NOT NULL,
                     end_time TEXT NOT NULL,
                     radius REAL NOT NULL DEFAULT 100.0,
                     location_restricted INTEGER NOT NULL DEFAULT 1
                 );
                 CREATE TABLE IF NOT EXISTS profiles (
                     id TEXT PRIMARY KEY,
                     name TEXT,
                     email TEXT,
                     phone TEXT,
                     seating TEXT,
                     image_url TEXT,
                     role TEXT NOT NULL DEFAULT 'employee',
                     group_id TEXT REFERENCES groups(id) ON DELETE SET NULL
                 );
                 CREATE TABLE IF NOT EXISTS attendance (
                     id TEXT PRIMARY KEY,
                     user_id TEXT NOT NULL,
                     status TEXT NOT NULL,
                     image_url TEXT NOT NULL,
                     latitude REAL NOT NULL,
                     longitude REAL NOT NULL,
                     name TEXT,
                     seating TEXT,
                     timestamp TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_attendance_user ON attendance(user_id);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Insert a profile or update it in place.
    pub async fn upsert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let p = profile.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO profiles (id, name, email, phone, seating, image_url, role, group_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(id) DO UPDATE SET
                         name = excluded.name, email = excluded.email, phone = excluded.phone,
                         seating = excluded.seating, image_url = excluded.image_url,
                         role = excluded.role, group_id = excluded.group_id",
                    rusqlite::params![p.id, p.name, p.email, p.phone, p.seating, p.image_url, p.role, p.group_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert a group or update it in place. Profiles keep their assignment.
    pub async fn upsert_group(&self, group: &Group) -> Result<(), StoreError> {
        let g = group.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO groups (id, name, latitude, longitude, start_time, end_time, radius, location_restricted)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(id) DO UPDATE SET
                         name = excluded.name, latitude = excluded.latitude, longitude = excluded.longitude,
                         start_time = excluded.start_time, end_time = excluded.end_time,
                         radius = excluded.radius, location_restricted = excluded.location_restricted",
                    rusqlite::params![
                        g.id,
                        g.name,
                        g.latitude,
                        g.longitude,
                        g.start_time,
                        g.end_time,
                        g.radius,
                        g.location_restricted
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, email, phone, seating, image_url, role, group_id
                     FROM profiles WHERE id = ?1",
                )?;
                let mut rows = stmt.query_map([&user_id], |row| {
                    Ok(Profile {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        phone: row.get(3)?,
                        seating: row.get(4)?,
                        image_url: row.get(5)?,
                        role: row.get(6)?,
                        group_id: row.get(7)?,
                    })
                })?;
                let found = rows.next().transpose()?;
                Ok(found)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn get_group(&self, group_id: &str) -> Result<Option<Group>, StoreError> {
        let group_id = group_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, latitude, longitude, start_time, end_time, radius, location_restricted
                     FROM groups WHERE id = ?1",
                )?;
                let mut rows = stmt.query_map([&group_id], |row| {
                    Ok(Group {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        latitude: row.get(2)?,
                        longitude: row.get(3)?,
                        start_time: row.get(4)?,
                        end_time: row.get(5)?,
                        radius: row.get(6)?,
                        location_restricted: row.get(7)?,
                    })
                })?;
                let found = rows.next().transpose()?;
                Ok(found)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Insert an attendance row. Returns the generated UUID.
    pub async fn insert_attendance_row(&self, record: &AttendanceRecord) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let r = record.clone();
        let timestamp = r.timestamp.to_rfc3339();

        let id_clone = id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (id, user_id, status, image_url, latitude, longitude, name, seating, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        id_clone,
                        r.user_id,
                        r.status,
                        r.image_url,
                        r.latitude,
                        r.longitude,
                        r.name,
                        r.seating,
                        timestamp
                    ],
                )?;
                Ok(())
            })
            .await?;

        tracing::info!(id = %id, user = %record.user_id, "attendance recorded");
        Ok(id)
    }

    /// A user's attendance rows, oldest first.
    pub async fn attendance_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<(String, AttendanceRecord)>, StoreError> {
        let user_id = user_id.to_string();

        // Timestamps are parsed outside the closure so a bad row surfaces as a StoreError.
        let rows: Vec<(String, AttendanceRecord, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, status, image_url, latitude, longitude, name, seating, timestamp
                     FROM attendance WHERE user_id = ?1 ORDER BY timestamp",
                )?;
                let rows = stmt.query_map([&user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        AttendanceRecord {
                            user_id: row.get(1)?,
                            status: row.get(2)?,
                            image_url: row.get(3)?,
                            latitude: row.get(4)?,
                            longitude: row.get(5)?,
                            name: row.get(6)?,
                            seating: row.get(7)?,
                            timestamp: DateTime::<Utc>::default(),
                        },
                        row.get::<_, String>(8)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        rows.into_iter()
            .map(|(id, mut record, ts)| {
                record.timestamp = DateTime::parse_from_rfc3339(&ts)
                    .map_err(|_| StoreError::InvalidTimestamp {
                        id: id.clone(),
                        value: ts.clone(),
                    })?
                    .with_timezone(&Utc);
                Ok((id, record))
            })
            .collect()
    }
}

impl RemoteStore for SqliteStore {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, CollabError> {
        Ok(self.get_profile(user_id).await?)
    }

    async fn group(&self, group_id: &str) -> Result<Option<Group>, CollabError> {
        Ok(self.get_group(group_id).await?)
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<String, CollabError> {
        Ok(self.insert_attendance_row(record).await?)
    }
}
