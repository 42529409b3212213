//! Patient lifecycle service.
//!
//! Owns the patient entity: registration, edits, hard deletion, listing,
//! case-insensitive search, and lifecycle-state changes. Wire field names are
//! Spanish (`nombre`, `apellido`, `rh`, ...), so rows serialize directly into
//! the JSON the clients expect.
//!
//! The lifecycle state is a plain enumeration setter: any state is reachable
//! from any state, and no transition graph is enforced.

use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::Store;
use crate::{ServiceError, ServiceResult};

/// Lifecycle state of an admitted patient.
///
/// Wire values are Spanish: `ingresado` (admitted), `internado`
/// (hospitalized), `alta` (discharged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PatientState {
    Ingresado,
    Internado,
    Alta,
}

impl PatientState {
    pub fn as_str(self) -> &'static str {
        match self {
            PatientState::Ingresado => "ingresado",
            PatientState::Internado => "internado",
            PatientState::Alta => "alta",
        }
    }
}

impl FromStr for PatientState {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ingresado" => Ok(PatientState::Ingresado),
            "internado" => Ok(PatientState::Internado),
            "alta" => Ok(PatientState::Alta),
            _ => Err(ServiceError::Validation("Estado inválido".into())),
        }
    }
}

/// A stored patient row.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Patient {
    pub id: i64,
    pub fecha_hora_ingreso: String,
    pub nombre: String,
    pub apellido: String,
    pub rh: String,
    pub identificacion: String,
    pub telefono: Option<String>,
    pub causa_emergencia: String,
    pub email: Option<String>,
    pub estado: PatientState,
}

/// Patient fields for registration and full updates.
///
/// All fields are optional at the deserialization boundary; the store's
/// NOT-NULL constraints enforce the required set, and the service surfaces a
/// violation as a generic creation/update failure.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewPatient {
    pub fecha_hora_ingreso: Option<String>,
    pub nombre: Option<String>,
    pub apellido: Option<String>,
    pub rh: Option<String>,
    pub identificacion: Option<String>,
    pub telefono: Option<String>,
    pub causa_emergencia: Option<String>,
    pub email: Option<String>,
}

pub(crate) const PATIENT_COLUMNS: &str = "id, fecha_hora_ingreso, nombre, apellido, rh, \
     identificacion, telefono, causa_emergencia, email, estado";

pub(crate) fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    let estado: String = row.get(9)?;
    let estado = PatientState::from_str(&estado).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("estado desconocido: {estado}").into(),
        )
    })?;

    Ok(Patient {
        id: row.get(0)?,
        fecha_hora_ingreso: row.get(1)?,
        nombre: row.get(2)?,
        apellido: row.get(3)?,
        rh: row.get(4)?,
        identificacion: row.get(5)?,
        telefono: row.get(6)?,
        causa_emergencia: row.get(7)?,
        email: row.get(8)?,
        estado,
    })
}

/// Returns whether a patient row with `id` exists.
pub(crate) fn patient_exists(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM pacientes WHERE id = ?1", params![id], |_| {
        Ok(())
    })
    .optional()
    .map(|found| found.is_some())
}

pub(crate) fn fetch_patient(conn: &Connection, id: i64) -> rusqlite::Result<Option<Patient>> {
    conn.query_row(
        &format!("SELECT {PATIENT_COLUMNS} FROM pacientes WHERE id = ?1"),
        params![id],
        patient_from_row,
    )
    .optional()
}

/// Patient data operations - no API concerns.
#[derive(Clone)]
pub struct PatientService {
    store: Arc<Store>,
}

impl PatientService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Registers a new patient. The lifecycle state defaults to `ingresado`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Store` when required fields are absent (the
    /// store's NOT-NULL constraints reject the insert) or on any other store
    /// failure.
    pub fn register(&self, fields: NewPatient) -> ServiceResult<Patient> {
        let conn = self.store.lock()?;
        conn.execute(
            "INSERT INTO pacientes (fecha_hora_ingreso, nombre, apellido, rh, identificacion, \
             telefono, causa_emergencia, email) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                fields.fecha_hora_ingreso,
                fields.nombre,
                fields.apellido,
                fields.rh,
                fields.identificacion,
                fields.telefono,
                fields.causa_emergencia,
                fields.email,
            ],
        )
        .map_err(|e| ServiceError::store("Error al crear paciente", e))?;

        let id = conn.last_insert_rowid();
        fetch_patient(&conn, id)
            .map_err(|e| ServiceError::store("Error al crear paciente", e))?
            .ok_or(ServiceError::Store("Error al crear paciente"))
    }

    /// Replaces all mutable fields of an existing patient.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if no row matches `id`.
    pub fn update(&self, id: i64, fields: NewPatient) -> ServiceResult<Patient> {
        let err = |e| ServiceError::store("Error al actualizar paciente", e);

        let conn = self.store.lock()?;
        let changed = conn
            .execute(
                "UPDATE pacientes SET fecha_hora_ingreso = ?1, nombre = ?2, apellido = ?3, \
                 rh = ?4, identificacion = ?5, telefono = ?6, causa_emergencia = ?7, email = ?8 \
                 WHERE id = ?9",
                params![
                    fields.fecha_hora_ingreso,
                    fields.nombre,
                    fields.apellido,
                    fields.rh,
                    fields.identificacion,
                    fields.telefono,
                    fields.causa_emergencia,
                    fields.email,
                    id,
                ],
            )
            .map_err(err)?;

        if changed == 0 {
            return Err(ServiceError::NotFound("Paciente no encontrado"));
        }

        fetch_patient(&conn, id)
            .map_err(err)?
            .ok_or(ServiceError::NotFound("Paciente no encontrado"))
    }

    /// Hard-removes a patient row.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if zero rows were affected.
    pub fn delete(&self, id: i64) -> ServiceResult<()> {
        let conn = self.store.lock()?;
        let removed = conn
            .execute("DELETE FROM pacientes WHERE id = ?1", params![id])
            .map_err(|e| ServiceError::store("Error al eliminar paciente", e))?;

        if removed == 0 {
            return Err(ServiceError::NotFound("Paciente no encontrado"));
        }
        Ok(())
    }

    /// Returns all patients in the store's natural order.
    pub fn list(&self) -> ServiceResult<Vec<Patient>> {
        let err = |e| ServiceError::store("Error al obtener pacientes", e);

        let conn = self.store.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {PATIENT_COLUMNS} FROM pacientes"))
            .map_err(err)?;
        let patients = stmt
            .query_map([], patient_from_row)
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        Ok(patients)
    }

    /// Searches patients whose identification, given name, or family name
    /// contains `query` as a case-insensitive substring.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` if `query` is empty or
    /// whitespace-only after trimming. An empty result set is not an error.
    pub fn search(&self, query: &str) -> ServiceResult<Vec<Patient>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::Validation(
                "Debe proporcionar un parámetro de búsqueda (q)".into(),
            ));
        }

        let err = |e| ServiceError::store("Error al buscar pacientes", e);
        let pattern = format!("%{trimmed}%");

        let conn = self.store.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PATIENT_COLUMNS} FROM pacientes \
                 WHERE lower_unicode(identificacion) LIKE lower_unicode(?1) \
                    OR lower_unicode(nombre) LIKE lower_unicode(?1) \
                    OR lower_unicode(apellido) LIKE lower_unicode(?1)"
            ))
            .map_err(err)?;
        let patients = stmt
            .query_map(params![pattern], patient_from_row)
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        Ok(patients)
    }

    /// Sets the lifecycle state unconditionally. No transition graph is
    /// enforced.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for a value outside the state
    /// enumeration and `ServiceError::NotFound` if the patient does not
    /// exist.
    pub fn transition(&self, id: i64, estado: &str) -> ServiceResult<Patient> {
        let estado = PatientState::from_str(estado)?;
        let err = |e| ServiceError::store("Error al actualizar estado del paciente", e);

        let conn = self.store.lock()?;
        let changed = conn
            .execute(
                "UPDATE pacientes SET estado = ?1 WHERE id = ?2",
                params![estado.as_str(), id],
            )
            .map_err(err)?;

        if changed == 0 {
            return Err(ServiceError::NotFound("Paciente no encontrado"));
        }

        fetch_patient(&conn, id)
            .map_err(err)?
            .ok_or(ServiceError::NotFound("Paciente no encontrado"))
    }
}
