use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use shared::{ProfileView, SubjectView};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::Mutex;

pub const DEFAULT_RATING: f64 = 1500.0;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient store failure: {0}")]
    Transient(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Transient(other.to_string()),
        }
    }
}

/// Partial profile update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub rating: Option<f64>,
    pub wins: Option<u32>,
    pub loses: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct BattleRecord {
    /// Agree-side player.
    pub player1: String,
    /// Disagree-side player.
    pub player2: String,
    pub winner_id: String,
    pub subject_id: String,
    pub log_json: String,
    pub verdict_json: String,
    pub created_at_ms: i64,
}

/// Narrow persistence surface. No business logic lives behind it.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_subject(&self, id: &str) -> Result<SubjectView, StoreError>;
    async fn list_subjects(&self) -> Result<Vec<SubjectView>, StoreError>;
    /// Auto-creates a default profile when the user is unknown.
    async fn get_profile(&self, user_id: &str) -> Result<ProfileView, StoreError>;
    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> Result<(), StoreError>;
    async fn insert_battle(&self, record: BattleRecord) -> Result<(), StoreError>;
}

fn default_profile(user_id: &str) -> ProfileView {
    ProfileView {
        user_id: user_id.to_string(),
        display_name: user_id.to_string(),
        rating: DEFAULT_RATING,
        wins: 0,
        loses: 0,
        is_admin: false,
        avatar_url: None,
    }
}

/// SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_profile (
                user_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                rating REAL NOT NULL,
                wins INTEGER NOT NULL DEFAULT 0,
                loses INTEGER NOT NULL DEFAULT 0,
                is_admin INTEGER NOT NULL DEFAULT 0,
                avatar_url TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subjects (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS battles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player1 TEXT NOT NULL,
                player2 TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                winner_id TEXT NOT NULL,
                log_json TEXT NOT NULL,
                verdict_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_profile(row: &SqliteRow) -> ProfileView {
        ProfileView {
            user_id: row.get("user_id"),
            display_name: row.get("display_name"),
            rating: row.get("rating"),
            wins: row.get::<i64, _>("wins") as u32,
            loses: row.get::<i64, _>("loses") as u32,
            is_admin: row.get::<i64, _>("is_admin") != 0,
            avatar_url: row.get("avatar_url"),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_subject(&self, id: &str) -> Result<SubjectView, StoreError> {
        let row = sqlx::query("SELECT id, title, body FROM subjects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("subject {id}")))?;
        Ok(SubjectView {
            id: row.get("id"),
            title: row.get("title"),
            body: row.get("body"),
        })
    }

    async fn list_subjects(&self) -> Result<Vec<SubjectView>, StoreError> {
        let rows = sqlx::query("SELECT id, title, body FROM subjects ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| SubjectView {
                id: row.get("id"),
                title: row.get("title"),
                body: row.get("body"),
            })
            .collect())
    }

    async fn get_profile(&self, user_id: &str) -> Result<ProfileView, StoreError> {
        let row = sqlx::query("SELECT * FROM user_profile WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(Self::row_to_profile(&row));
        }
        let profile = default_profile(user_id);
        sqlx::query(
            "INSERT INTO user_profile (user_id, display_name, rating, wins, loses, is_admin)
             VALUES (?, ?, ?, 0, 0, 0)",
        )
        .bind(&profile.user_id)
        .bind(&profile.display_name)
        .bind(profile.rating)
        .execute(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> Result<(), StoreError> {
        // Read-modify-write keeps the query simple; profile rows are only
        // touched at match end, under the match's serialisation.
        let current = self.get_profile(user_id).await?;
        sqlx::query(
            "UPDATE user_profile SET display_name = ?, rating = ?, wins = ?, loses = ?
             WHERE user_id = ?",
        )
        .bind(patch.display_name.unwrap_or(current.display_name))
        .bind(patch.rating.unwrap_or(current.rating))
        .bind(i64::from(patch.wins.unwrap_or(current.wins)))
        .bind(i64::from(patch.loses.unwrap_or(current.loses)))
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_battle(&self, record: BattleRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO battles (player1, player2, subject_id, winner_id, log_json, verdict_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.player1)
        .bind(&record.player2)
        .bind(&record.subject_id)
        .bind(&record.winner_id)
        .bind(&record.log_json)
        .bind(&record.verdict_json)
        .bind(record.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Hashmap-backed store for development boots and the test suite.
#[derive(Default)]
pub struct MemoryStore {
    subjects: Mutex<Vec<SubjectView>>,
    profiles: Mutex<HashMap<String, ProfileView>>,
    battles: Mutex<Vec<BattleRecord>>,
    /// When set, subject reads fail with `Transient` until cleared.
    fail_subjects: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_subjects(subjects: Vec<SubjectView>) -> Self {
        Self {
            subjects: Mutex::new(subjects),
            ..Self::default()
        }
    }

    pub fn set_subjects_failing(&self, failing: bool) {
        self.fail_subjects.store(failing, Ordering::SeqCst);
    }

    pub async fn seed_profile(&self, profile: ProfileView) {
        self.profiles
            .lock()
            .await
            .insert(profile.user_id.clone(), profile);
    }

    pub async fn battles(&self) -> Vec<BattleRecord> {
        self.battles.lock().await.clone()
    }

    pub async fn profile(&self, user_id: &str) -> Option<ProfileView> {
        self.profiles.lock().await.get(user_id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_subject(&self, id: &str) -> Result<SubjectView, StoreError> {
        if self.fail_subjects.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("subjects unavailable".to_string()));
        }
        self.subjects
            .lock()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("subject {id}")))
    }

    async fn list_subjects(&self) -> Result<Vec<SubjectView>, StoreError> {
        if self.fail_subjects.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("subjects unavailable".to_string()));
        }
        Ok(self.subjects.lock().await.clone())
    }

    async fn get_profile(&self, user_id: &str) -> Result<ProfileView, StoreError> {
        let mut profiles = self.profiles.lock().await;
        Ok(profiles
            .entry(user_id.to_string())
            .or_insert_with(|| default_profile(user_id))
            .clone())
    }

    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().await;
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| default_profile(user_id));
        if let Some(display_name) = patch.display_name {
            profile.display_name = display_name;
        }
        if let Some(rating) = patch.rating {
            profile.rating = rating;
        }
        if let Some(wins) = patch.wins {
            profile.wins = wins;
        }
        if let Some(loses) = patch.loses {
            profile.loses = loses;
        }
        Ok(())
    }

    async fn insert_battle(&self, record: BattleRecord) -> Result<(), StoreError> {
        self.battles.lock().await.push(record);
        Ok(())
    }
}
