//! SQLite-backed record store.
//!
//! The store owns a single connection behind a mutex; every service operation
//! acquires it for the duration of one bounded read/write sequence and
//! releases it on every exit path. SQLite's single-statement atomicity is the
//! only consistency boundary the services rely on.
//!
//! Schema notes:
//! - `paciente_plan` carries no foreign keys or uniqueness constraint:
//!   assignments never check that the plan exists and duplicates are
//!   permitted.
//! - `medicamentos.activo` implements logical deletion; rows are never
//!   removed.

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::{ServiceError, ServiceResult};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS pacientes (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    fecha_hora_ingreso TEXT NOT NULL,
    nombre             TEXT NOT NULL,
    apellido           TEXT NOT NULL,
    rh                 TEXT NOT NULL,
    identificacion     TEXT NOT NULL,
    telefono           TEXT,
    causa_emergencia   TEXT NOT NULL,
    email              TEXT,
    estado             TEXT NOT NULL DEFAULT 'ingresado'
);

CREATE TABLE IF NOT EXISTS planes_tratamiento (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre      TEXT NOT NULL,
    descripcion TEXT
);

CREATE TABLE IF NOT EXISTS paciente_plan (
    paciente_id      INTEGER NOT NULL,
    plan_id          INTEGER NOT NULL,
    fecha_asignacion TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS historial_clinico (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    paciente_id INTEGER NOT NULL REFERENCES pacientes(id) ON DELETE CASCADE,
    fecha       TEXT NOT NULL DEFAULT (datetime('now')),
    notas       TEXT NOT NULL,
    alergias    TEXT
);

CREATE TABLE IF NOT EXISTS categorias_medicamentos (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre      TEXT NOT NULL,
    descripcion TEXT
);

CREATE TABLE IF NOT EXISTS medicamentos (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre          TEXT NOT NULL,
    nombre_generico TEXT,
    categoria_id    INTEGER REFERENCES categorias_medicamentos(id),
    descripcion     TEXT,
    presentacion    TEXT,
    stock_actual    INTEGER NOT NULL,
    stock_minimo    INTEGER NOT NULL,
    precio_unitario REAL NOT NULL,
    requiere_receta INTEGER NOT NULL DEFAULT 0,
    activo          INTEGER NOT NULL DEFAULT 1,
    updated_at      TEXT
);
";

/// Owns the SQLite connection shared by all services.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if necessary) the database at `path` and ensures the
    /// schema exists.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        Self::prepare(Connection::open(path)?)
    }

    /// Opens a fresh in-memory database. Used by tests.
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> rusqlite::Result<Self> {
        // SQLite's built-in LOWER() folds ASCII only, which breaks
        // case-insensitive matching for accented Spanish names ("GARCÍA"
        // would not match "García"). Register a Unicode-aware fold and use
        // it in every search predicate.
        conn.create_scalar_function(
            "lower_unicode",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let value: Option<String> = ctx.get(0)?;
                Ok(value.map(|v| v.to_lowercase()))
            },
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquires the connection for one bounded operation.
    ///
    /// A poisoned mutex is reported as a generic store failure rather than a
    /// panic: the caller still receives a structured error object.
    pub fn lock(&self) -> ServiceResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ServiceError::Store("Error de acceso a la base de datos"))
    }
}
