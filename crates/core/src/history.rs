//! Clinical history service.
//!
//! Appends immutable notes to a patient's timeline and derives the full
//! clinical record: the patient, all history entries newest-first, all plan
//! assignments newest-first, and the "current allergies" display value.
//!
//! The allergies derivation consults only the single newest entry; entries
//! are never consolidated across the timeline.

use std::sync::Arc;

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::patients::{fetch_patient, patient_exists, Patient};
use crate::plans::{assigned_plan_from_row, AssignedPlan, ASSIGNED_PLAN_JOIN};
use crate::store::Store;
use crate::{ServiceError, ServiceResult};

/// Sentinel shown when the newest entry carries no allergy annotation.
pub const NO_ALLERGIES_RECORDED: &str = "No registradas";

/// An append-only clinical note.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryEntry {
    pub id: i64,
    pub paciente_id: i64,
    /// Store-assigned entry timestamp.
    pub fecha: String,
    pub notas: String,
    pub alergias: Option<String>,
}

/// Request body for appending a history entry.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewHistoryEntry {
    pub notas: Option<String>,
    pub alergias: Option<String>,
}

/// The full clinical record returned by `GET /pacientes/:id/historial`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FullRecord {
    pub paciente: Patient,
    pub entradas: Vec<HistoryEntry>,
    pub planes_activos: Vec<AssignedPlan>,
    /// The newest entry's allergies, or [`NO_ALLERGIES_RECORDED`].
    pub alergias: String,
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        paciente_id: row.get(1)?,
        fecha: row.get(2)?,
        notas: row.get(3)?,
        alergias: row.get(4)?,
    })
}

/// Clinical history operations - no API concerns.
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<Store>,
}

impl HistoryService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Appends a new entry to the patient's timeline. The entry timestamp is
    /// assigned by the store. An empty-string allergy annotation is coerced
    /// to "no annotation" so it never shadows the sentinel.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the patient does not exist.
    pub fn append_entry(&self, paciente_id: i64, entry: NewHistoryEntry) -> ServiceResult<HistoryEntry> {
        let err = |e| ServiceError::store("Error al crear entrada en historial clínico", e);

        let conn = self.store.lock()?;
        if !patient_exists(&conn, paciente_id).map_err(err)? {
            return Err(ServiceError::NotFound("Paciente no encontrado"));
        }

        let alergias = entry.alergias.filter(|a| !a.is_empty());
        conn.execute(
            "INSERT INTO historial_clinico (paciente_id, notas, alergias) VALUES (?1, ?2, ?3)",
            params![paciente_id, entry.notas, alergias],
        )
        .map_err(err)?;

        conn.query_row(
            "SELECT id, paciente_id, fecha, notas, alergias FROM historial_clinico WHERE id = ?1",
            params![conn.last_insert_rowid()],
            entry_from_row,
        )
        .map_err(err)
    }

    /// Returns the full clinical record for a patient.
    ///
    /// Three independent reads against the store; best-effort consistency
    /// only (see the service model notes in `store`).
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the patient does not exist.
    pub fn full_record(&self, paciente_id: i64) -> ServiceResult<FullRecord> {
        let err = |e| ServiceError::store("Error al obtener historial clínico", e);

        let conn = self.store.lock()?;
        let paciente = fetch_patient(&conn, paciente_id)
            .map_err(err)?
            .ok_or(ServiceError::NotFound("Paciente no encontrado"))?;

        // Tie-break on id so "most recent entry" is deterministic when two
        // entries share the same second.
        let mut stmt = conn
            .prepare(
                "SELECT id, paciente_id, fecha, notas, alergias FROM historial_clinico \
                 WHERE paciente_id = ?1 ORDER BY fecha DESC, id DESC",
            )
            .map_err(err)?;
        let entradas = stmt
            .query_map(params![paciente_id], entry_from_row)
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        let mut stmt = conn
            .prepare(&format!(
                "{ASSIGNED_PLAN_JOIN} WHERE pp.paciente_id = ?1 \
                 ORDER BY pp.fecha_asignacion DESC, pp.rowid DESC"
            ))
            .map_err(err)?;
        let planes_activos = stmt
            .query_map(params![paciente_id], assigned_plan_from_row)
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        let alergias = entradas
            .first()
            .and_then(|entry| entry.alergias.clone())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| NO_ALLERGIES_RECORDED.to_string());

        Ok(FullRecord {
            paciente,
            entradas,
            planes_activos,
            alergias,
        })
    }
}
