//! SQLite persistence for header versions, spectral points and assay rows.
//!
//! Every NIR measurement is applied in its own transaction: the current
//! version of the title is read, the SCD2 decision is taken against that
//! fresh state, and the header and point writes commit or roll back together.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use thiserror::Error;

use crate::assay::AssayRow;
use crate::data::fingerprint::Fingerprint;
use crate::data::model::{ColumnKind, Header, HeaderField, SpectralPoint};
use crate::data::validate::OPEN_VALIDITY_END;
use crate::scd2::{self, Decision, VersionState};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS header_versions (
    version_id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    data_type TEXT,
    instrument_sn TEXT,
    spectrometer_sn TEXT,
    instrument_type TEXT,
    sample_description TEXT,
    smoothed TEXT,
    xunits TEXT,
    yunits TEXT,
    concentrations TEXT,
    perten_types TEXT,
    perten_repack TEXT,
    perten_repeat TEXT,
    perten_subscan TEXT,
    perten_goodrepacks TEXT,
    perten_totalrepacks TEXT,
    perten_rejected TEXT,
    perten_sampleinfo TEXT,
    xfactor REAL,
    yfactor REAL,
    firstx REAL,
    lastx REAL,
    npoints INTEGER,
    deltax REAL,
    xydata TEXT,
    source_file TEXT,
    raw_header TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    valid_from TEXT NOT NULL,
    valid_to TEXT NOT NULL,
    is_current INTEGER NOT NULL DEFAULT 1,
    UNIQUE (title, valid_from)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_header_versions_current
    ON header_versions(title) WHERE is_current = 1;

CREATE TABLE IF NOT EXISTS spectral_points (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version_id INTEGER REFERENCES header_versions(version_id),
    title TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    x REAL NOT NULL,
    y REAL NOT NULL,
    y_index INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_spectral_points_title_date_x
    ON spectral_points(title, acquired_at, x);

CREATE TABLE IF NOT EXISTS dumas_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    no INTEGER,
    hole_pos TEXT,
    weight_mg REAL,
    title TEXT NOT NULL,
    method TEXT,
    n_area REAL,
    n_percent REAL,
    n_mg REAL,
    n_factor REAL,
    n_blank REAL,
    protein_percent REAL,
    protein_mg REAL,
    protein_factor REAL,
    moisture_percent REAL,
    memo TEXT,
    info TEXT,
    date TEXT,
    time TEXT,
    datetime TEXT
);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("opening {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("creating {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("initializing schema: {0}")]
    Schema(#[source] rusqlite::Error),
    /// A failed step of one title's decision; the transaction was rolled back.
    #[error("{operation} for {title} @ {timestamp}: {source}")]
    Write {
        title: String,
        timestamp: String,
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{operation}: {source}")]
    Query {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

fn write_error<'a>(
    title: &'a str,
    timestamp: &'a str,
    operation: &'static str,
) -> impl FnOnce(rusqlite::Error) -> StoreError + 'a {
    move |source| StoreError::Write {
        title: title.to_string(),
        timestamp: timestamp.to_string(),
        operation,
        source,
    }
}

fn query_error(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |source| StoreError::Query { operation, source }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Result of applying one measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub decision: Decision,
    /// Current version of the title after the decision.
    pub version_id: i64,
    pub points_written: usize,
}

/// One persisted header version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderVersion {
    pub version_id: i64,
    pub title: String,
    pub acquired_at: String,
    pub fingerprint: String,
    pub valid_from: String,
    pub valid_to: String,
    pub is_current: bool,
    /// Every header entry under its export key.
    pub header: BTreeMap<String, String>,
}

fn column_value(kind: ColumnKind, raw: Option<&str>) -> Value {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Value::Null;
    };
    match kind {
        ColumnKind::Text => Value::Text(raw.to_string()),
        ColumnKind::Real => raw.parse::<f64>().map(Value::Real).unwrap_or(Value::Null),
        ColumnKind::Integer => raw
            .parse::<i64>()
            .ok()
            .or_else(|| {
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.fract() == 0.0)
                    .map(|v| v as i64)
            })
            .map(Value::Integer)
            .unwrap_or(Value::Null),
    }
}

fn insert_version_sql() -> String {
    let columns: Vec<&str> = HeaderField::ALL.iter().map(|f| f.column()).collect();
    let placeholders = vec!["?"; columns.len() + 6].join(", ");
    format!(
        "INSERT INTO header_versions (title, acquired_at, {}, raw_header, fingerprint, valid_from, valid_to, is_current)
         VALUES ({placeholders}, 1)",
        columns.join(", ")
    )
}

fn current_state(conn: &Connection, title: &str) -> rusqlite::Result<VersionState> {
    conn.query_row(
        "SELECT version_id, fingerprint, valid_from FROM header_versions
         WHERE title = ?1 AND is_current = 1",
        params![title],
        |row| {
            Ok(VersionState::Current {
                version_id: row.get(0)?,
                fingerprint: Fingerprint::from_hex(row.get::<_, String>(1)?),
                valid_from: row.get(2)?,
            })
        },
    )
    .optional()
    .map(|state| state.unwrap_or(VersionState::NoVersion))
}

fn insert_version(
    tx: &Transaction<'_>,
    header: &Header,
    timestamp: &str,
    fingerprint: &Fingerprint,
) -> rusqlite::Result<i64> {
    let raw_header = serde_json::to_string(&header.to_pairs())
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    let mut values = Vec::with_capacity(HeaderField::ALL.len() + 6);
    values.push(Value::Text(header.title.clone()));
    values.push(Value::Text(timestamp.to_string()));
    for field in HeaderField::ALL {
        values.push(column_value(field.column_kind(), header.get(field)));
    }
    values.push(Value::Text(raw_header));
    values.push(Value::Text(fingerprint.as_str().to_string()));
    values.push(Value::Text(timestamp.to_string()));
    values.push(Value::Text(OPEN_VALIDITY_END.to_string()));

    tx.prepare_cached(&insert_version_sql())?
        .execute(params_from_iter(values))?;
    Ok(tx.last_insert_rowid())
}

fn insert_points(
    tx: &Transaction<'_>,
    version_id: i64,
    points: &[SpectralPoint],
) -> rusqlite::Result<usize> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO spectral_points (version_id, title, acquired_at, x, y, y_index)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for p in points {
        stmt.execute(params![
            version_id,
            p.title,
            p.timestamp,
            p.x,
            p.y,
            p.index as i64
        ])?;
    }
    Ok(points.len())
}

fn row_to_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<HeaderVersion> {
    let raw: String = row.get(7)?;
    Ok(HeaderVersion {
        version_id: row.get(0)?,
        title: row.get(1)?,
        acquired_at: row.get(2)?,
        fingerprint: row.get(3)?,
        valid_from: row.get(4)?,
        valid_to: row.get(5)?,
        is_current: row.get(6)?,
        header: serde_json::from_str(&raw).unwrap_or_default(),
    })
}

const VERSION_COLUMNS: &str =
    "version_id, title, acquired_at, fingerprint, valid_from, valid_to, is_current, raw_header";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database file with the full schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let open_err = |source: rusqlite::Error| StoreError::Open {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(open_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(open_err)?;
        let store = Store { conn };
        store.init_schema()?;
        log::debug!("opened store at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".to_string(),
            source,
        })?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(StoreError::Schema)?;
        let store = Store { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(SCHEMA_SQL)
            .map_err(StoreError::Schema)
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── NIR writes ──────────────────────────────────────────────────

    /// Apply one measurement: SCD2 header decision plus its spectral points.
    ///
    /// Points are written only when none exist yet for `(title, timestamp)`,
    /// so a re-submitted block writes nothing at all. On any failure the
    /// whole transaction is rolled back.
    pub fn apply(
        &mut self,
        header: &Header,
        timestamp: &str,
        fingerprint: &Fingerprint,
        points: &[SpectralPoint],
    ) -> Result<ApplyOutcome, StoreError> {
        let title = header.title.as_str();
        let tx = self
            .conn
            .transaction()
            .map_err(write_error(title, timestamp, "begin transaction"))?;

        let state = current_state(&tx, title)
            .map_err(write_error(title, timestamp, "read current version"))?;
        let decision = scd2::decide(&state, fingerprint);

        let version_id = match &decision {
            Decision::Insert => insert_version(&tx, header, timestamp, fingerprint)
                .map_err(write_error(title, timestamp, "insert header version"))?,
            Decision::Skip { version_id } => *version_id,
            Decision::Supersede { previous_id, .. } => {
                tx.execute(
                    "UPDATE header_versions SET is_current = 0, valid_to = ?1
                     WHERE version_id = ?2 AND is_current = 1",
                    params![timestamp, previous_id],
                )
                .map_err(write_error(title, timestamp, "close current version"))?;
                insert_version(&tx, header, timestamp, fingerprint)
                    .map_err(write_error(title, timestamp, "insert header version"))?
            }
        };

        let has_points: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM spectral_points WHERE title = ?1 AND acquired_at = ?2)",
                params![title, timestamp],
                |row| row.get(0),
            )
            .map_err(write_error(title, timestamp, "check spectral points"))?;
        let points_written = if has_points {
            0
        } else {
            insert_points(&tx, version_id, points)
                .map_err(write_error(title, timestamp, "insert spectral points"))?
        };

        tx.commit()
            .map_err(write_error(title, timestamp, "commit"))?;

        Ok(ApplyOutcome {
            decision,
            version_id,
            points_written,
        })
    }

    // ── NIR reads ───────────────────────────────────────────────────

    pub fn current_version(&self, title: &str) -> Result<Option<HeaderVersion>, StoreError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {VERSION_COLUMNS} FROM header_versions
                     WHERE title = ?1 AND is_current = 1"
                ),
                params![title],
                row_to_version,
            )
            .optional()
            .map_err(query_error("read current version"))
    }

    /// All versions of a title, oldest first.
    pub fn history(&self, title: &str) -> Result<Vec<HeaderVersion>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM header_versions
                 WHERE title = ?1 ORDER BY valid_from, version_id"
            ))
            .map_err(query_error("read history"))?;
        let rows = stmt
            .query_map(params![title], row_to_version)
            .map_err(query_error("read history"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_error("read history"))
    }

    pub fn version_count(&self, title: &str) -> Result<usize, StoreError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM header_versions WHERE title = ?1",
                params![title],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(query_error("count header versions"))
    }

    /// Points of one title, ordered as written.
    pub fn spectral_points(&self, title: &str) -> Result<Vec<SpectralPoint>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT title, acquired_at, x, y, y_index FROM spectral_points
                 WHERE title = ?1 ORDER BY id",
            )
            .map_err(query_error("read spectral points"))?;
        let rows = stmt
            .query_map(params![title], |row| {
                Ok(SpectralPoint {
                    title: row.get(0)?,
                    timestamp: row.get(1)?,
                    x: row.get(2)?,
                    y: row.get(3)?,
                    index: row.get::<_, i64>(4)? as usize,
                })
            })
            .map_err(query_error("read spectral points"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_error("read spectral points"))
    }

    // ── Assay writes ────────────────────────────────────────────────

    /// Append cleaned assay rows in one transaction.
    pub fn append_assay_rows(&mut self, rows: &[AssayRow]) -> Result<usize, StoreError> {
        let tx = self
            .conn
            .transaction()
            .map_err(query_error("begin transaction"))?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO dumas_results (no, hole_pos, weight_mg, title, method,
                     n_area, n_percent, n_mg, n_factor, n_blank,
                     protein_percent, protein_mg, protein_factor, moisture_percent,
                     memo, info, date, time, datetime)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                             ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                )
                .map_err(query_error("prepare assay insert"))?;
            for r in rows {
                stmt.execute(params![
                    r.no,
                    r.hole_pos,
                    r.weight_mg,
                    r.title,
                    r.method,
                    r.n_area,
                    r.n_percent,
                    r.n_mg,
                    r.n_factor,
                    r.n_blank,
                    r.protein_percent,
                    r.protein_mg,
                    r.protein_factor,
                    r.moisture_percent,
                    r.memo,
                    r.info,
                    r.date.map(|d| d.format("%Y-%m-%d").to_string()),
                    r.time.map(|t| t.format("%H:%M:%S").to_string()),
                    r.datetime.map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string()),
                ])
                .map_err(query_error("insert assay row"))?;
            }
        }
        tx.commit().map_err(query_error("commit assay rows"))?;
        Ok(rows.len())
    }

    pub fn assay_row_count(&self) -> Result<usize, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM dumas_results", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(query_error("count assay rows"))
    }
}
