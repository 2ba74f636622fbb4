pub mod models;


use anyhow::{anyhow, Result};
use rusqlite::ffi::sqlite3_auto_extension;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::Duration;
use zerocopy::AsBytes;

use crate::error::AppError;
pub use models::*;

const EMBEDDING_DIM_KEY: &str = "embedding_dim";

static VEC_EXTENSION: Once = Once::new();

/// Make `vec_f32` and `vec_distance_cosine` available on every connection opened afterwards.
fn register_vec_extension() {
    VEC_EXTENSION.call_once(|| unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *const std::os::raw::c_char,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> std::os::raw::c_int,
        >(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Writes go through the single locked connection. Reads open their own
/// read-only connection so a search never waits behind an indexing batch.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        register_vec_extension();
        let mut conn = Connection::open(db_path)?;

        // WAL lets retrieval read committed batches while indexing writes
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        conn.trace(Some(trace_sql));

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: db_path.to_path_buf(),
        };

        db.init_schema()?;

        Ok(db)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn reader(&self) -> Result<Connection> {
        let mut conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.trace(Some(trace_sql));
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL UNIQUE,
                duration REAL NOT NULL,
                fps REAL NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                summary TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS highlights (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER NOT NULL,
                timestamp REAL NOT NULL,
                description TEXT NOT NULL,
                summary TEXT NOT NULL,
                category TEXT NOT NULL,
                quality_score INTEGER NOT NULL CHECK (quality_score BETWEEN 1 AND 10),
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (video_id) REFERENCES videos(id),
                UNIQUE(video_id, timestamp)
            );

            CREATE INDEX IF NOT EXISTS idx_highlights_video ON highlights(video_id, timestamp);

            -- Store-wide facts such as the embedding width
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Videos
    // =========================================================================

    /// Insert the video unless a row with the same filename exists; returns the stored row.
    pub fn upsert_video(&self, meta: &VideoMetadata) -> Result<Video> {
        let conn = self.lock()?;
        let video_id = ensure_video(&conn, meta)?;
        query_video(&conn, video_id)?.ok_or_else(|| anyhow!("video {} vanished after insert", video_id))
    }

    pub fn get_video(&self, id: i64) -> Result<Option<Video>> {
        let conn = self.reader()?;
        query_video(&conn, id)
    }

    pub fn get_video_by_filename(&self, filename: &str) -> Result<Option<Video>> {
        let conn = self.reader()?;
        let video = conn
            .query_row(
                "SELECT id, filename, duration, fps, width, height, summary, created_at
                 FROM videos WHERE filename = ?1",
                params![filename],
                row_to_video,
            )
            .optional()?;
        Ok(video)
    }

    pub fn get_videos(&self) -> Result<Vec<Video>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, filename, duration, fps, width, height, summary, created_at
             FROM videos ORDER BY id",
        )?;
        let videos = stmt
            .query_map([], row_to_video)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }

    pub fn update_video_summary(&self, video_id: i64, summary: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE videos SET summary = ?1 WHERE id = ?2",
            params![summary, video_id],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("video {}", video_id)).into());
        }
        Ok(())
    }

    // =========================================================================
    // Highlights
    // =========================================================================

    /// Width every stored embedding has, once the first batch is committed.
    pub fn embedding_dim(&self) -> Result<Option<usize>> {
        let conn = self.reader()?;
        read_embedding_dim(&conn)
    }

    /// Persist a batch of highlights, and their video if absent, in one transaction.
    ///
    /// Any invalid row (wrong embedding width, timestamp outside the video)
    /// aborts the whole batch and nothing is written.
    pub fn commit_batch(&self, meta: &VideoMetadata, highlights: &[NewHighlight]) -> Result<BatchCommit> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let video_id = ensure_video(&tx, meta)?;
        let duration: f64 = tx.query_row(
            "SELECT duration FROM videos WHERE id = ?1",
            params![video_id],
            |row| row.get(0),
        )?;

        let mut expected_dim = read_embedding_dim(&tx)?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO highlights (video_id, timestamp, description, summary, category, quality_score, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, vec_f32(?7))
                 ON CONFLICT(video_id, timestamp) DO NOTHING",
            )?;

            for highlight in highlights {
                if !(0.0..=duration).contains(&highlight.timestamp) {
                    return Err(AppError::Validation(format!(
                        "highlight timestamp {:.2}s outside video duration {:.2}s",
                        highlight.timestamp, duration
                    ))
                    .into());
                }

                let width = highlight.embedding.len();
                match expected_dim {
                    Some(expected) if expected != width => {
                        return Err(AppError::DimensionMismatch {
                            expected,
                            actual: width,
                        }
                        .into());
                    }
                    Some(_) => {}
                    None => {
                        if width == 0 {
                            return Err(AppError::Validation("empty embedding".into()).into());
                        }
                        tx.execute(
                            "INSERT INTO index_meta (key, value) VALUES (?1, ?2)",
                            params![EMBEDDING_DIM_KEY, width.to_string()],
                        )?;
                        expected_dim = Some(width);
                    }
                }

                inserted += stmt.execute(params![
                    video_id,
                    highlight.timestamp,
                    highlight.description,
                    highlight.summary,
                    highlight.category,
                    highlight.quality_score,
                    highlight.embedding.as_bytes(),
                ])?;
            }
        }

        tx.commit()?;

        Ok(BatchCommit {
            video_id,
            inserted,
            skipped: highlights.len() - inserted,
        })
    }

    /// Highlights of one video in timestamp order.
    pub fn get_video_highlights(&self, video_id: i64) -> Result<Vec<Highlight>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, video_id, timestamp, description, summary, category, quality_score, embedding, created_at
             FROM highlights WHERE video_id = ?1 ORDER BY timestamp",
        )?;
        let highlights = stmt
            .query_map(params![video_id], row_to_highlight)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(highlights)
    }

    pub fn get_highlight(&self, id: i64) -> Result<Option<Highlight>> {
        let conn = self.reader()?;
        let highlight = conn
            .query_row(
                "SELECT id, video_id, timestamp, description, summary, category, quality_score, embedding, created_at
                 FROM highlights WHERE id = ?1",
                params![id],
                row_to_highlight,
            )
            .optional()?;
        Ok(highlight)
    }

    pub fn count_highlights(&self) -> Result<i64> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM highlights", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Exact nearest-neighbour scan by cosine similarity (`1 - vec_distance_cosine`).
    ///
    /// Results are ordered by score descending, then by id, so equal scores
    /// always come back in the same order. Zero-norm embeddings score NULL
    /// and are left out. Blocking; async callers run it on the blocking pool.
    pub fn search_similar(
        &self,
        query: &[f32],
        video_id: Option<i64>,
        exclude_id: Option<i64>,
        floor: Option<f32>,
        limit: usize,
    ) -> Result<Vec<ScoredHighlight>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, video_id, filename, description, timestamp, score FROM (
                 SELECT h.id AS id, h.video_id AS video_id, v.filename AS filename,
                        h.description AS description, h.timestamp AS timestamp,
                        1.0 - vec_distance_cosine(h.embedding, vec_f32(?1)) AS score
                 FROM highlights h
                 JOIN videos v ON v.id = h.video_id
                 WHERE (?2 IS NULL OR h.video_id = ?2)
                   AND (?3 IS NULL OR h.id != ?3)
             )
             WHERE score IS NOT NULL AND (?4 IS NULL OR score >= ?4)
             ORDER BY score DESC, id ASC
             LIMIT ?5",
        )?;

        let results = stmt
            .query_map(
                params![
                    query.as_bytes(),
                    video_id,
                    exclude_id,
                    floor.map(|f| f as f64),
                    limit as i64
                ],
                |row| {
                    Ok(ScoredHighlight {
                        id: row.get(0)?,
                        video_id: row.get(1)?,
                        video_name: row.get(2)?,
                        description: row.get(3)?,
                        timestamp: row.get(4)?,
                        similarity_score: row.get::<_, f64>(5)? as f32,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }
}

fn trace_sql(sql: &str) {
    log::trace!("sql: {}", sql);
}

fn ensure_video(conn: &Connection, meta: &VideoMetadata) -> Result<i64> {
    conn.execute(
        "INSERT INTO videos (filename, duration, fps, width, height)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(filename) DO NOTHING",
        params![meta.filename, meta.duration, meta.fps, meta.width, meta.height],
    )?;
    let id = conn.query_row(
        "SELECT id FROM videos WHERE filename = ?1",
        params![meta.filename],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn query_video(conn: &Connection, id: i64) -> Result<Option<Video>> {
    let video = conn
        .query_row(
            "SELECT id, filename, duration, fps, width, height, summary, created_at
             FROM videos WHERE id = ?1",
            params![id],
            row_to_video,
        )
        .optional()?;
    Ok(video)
}

fn read_embedding_dim(conn: &Connection) -> Result<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = ?1",
            params![EMBEDDING_DIM_KEY],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        Some(v) => Ok(Some(v.parse().map_err(|e| {
            anyhow!("corrupt embedding_dim in index_meta ({:?}): {}", v, e)
        })?)),
        None => Ok(None),
    }
}

fn row_to_video(row: &Row) -> rusqlite::Result<Video> {
    Ok(Video {
        id: row.get(0)?,
        filename: row.get(1)?,
        duration: row.get(2)?,
        fps: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        summary: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn row_to_highlight(row: &Row) -> rusqlite::Result<Highlight> {
    let blob: Vec<u8> = row.get(7)?;
    if blob.len() % 4 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            7,
            Type::Blob,
            "embedding blob length is not a multiple of 4".into(),
        ));
    }
    let embedding = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Highlight {
        id: row.get(0)?,
        video_id: row.get(1)?,
        timestamp: row.get(2)?,
        description: row.get(3)?,
        summary: row.get(4)?,
        category: row.get(5)?,
        quality_score: row.get(6)?,
        embedding,
        created_at: row.get(8)?,
    })
}
