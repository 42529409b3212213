//! Treatment plan service.
//!
//! Manages the plan catalog and the many-to-many assignment of plans to
//! patients. Catalog entries are immutable once created; assignments are
//! timestamped links that are never mutated or removed, and the same plan may
//! be assigned to the same patient more than once.
//!
//! This is the only service that reads another service's records: it fetches
//! the patient row to validate existence and obtain the contact address
//! before rendering and mailing a plan.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::notifier::Notifier;
use crate::patients::{fetch_patient, Patient};
use crate::store::Store;
use crate::{ServiceError, ServiceResult};

/// A catalog treatment plan.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TreatmentPlan {
    pub id: i64,
    pub nombre: String,
    pub descripcion: Option<String>,
}

/// Request body for creating a catalog plan.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewPlan {
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
}

/// A timestamped patient-plan link.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlanAssignment {
    pub paciente_id: i64,
    pub plan_id: i64,
    pub fecha_asignacion: String,
}

/// Request body for assigning a plan to a patient.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AssignPlanReq {
    pub plan_id: Option<i64>,
}

/// A plan joined with its assignment timestamp, as listed per patient.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AssignedPlan {
    pub id: i64,
    pub nombre: String,
    pub descripcion: Option<String>,
    pub fecha_asignacion: String,
}

/// Acknowledgment returned after handing a plan to the notifier.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MailReceipt {
    pub message: String,
    pub destinatario: String,
}

pub(crate) const ASSIGNED_PLAN_JOIN: &str =
    "SELECT pt.id, pt.nombre, pt.descripcion, pp.fecha_asignacion \
     FROM paciente_plan pp JOIN planes_tratamiento pt ON pp.plan_id = pt.id";

pub(crate) fn assigned_plan_from_row(row: &Row<'_>) -> rusqlite::Result<AssignedPlan> {
    Ok(AssignedPlan {
        id: row.get(0)?,
        nombre: row.get(1)?,
        descripcion: row.get(2)?,
        fecha_asignacion: row.get(3)?,
    })
}

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<TreatmentPlan> {
    Ok(TreatmentPlan {
        id: row.get(0)?,
        nombre: row.get(1)?,
        descripcion: row.get(2)?,
    })
}

/// Renders the long-form Spanish date embedded in the plan document,
/// e.g. `30 de agosto de 2026`.
fn long_date_es(fecha: NaiveDate) -> String {
    const MESES: [&str; 12] = [
        "enero",
        "febrero",
        "marzo",
        "abril",
        "mayo",
        "junio",
        "julio",
        "agosto",
        "septiembre",
        "octubre",
        "noviembre",
        "diciembre",
    ];
    format!(
        "{} de {} de {}",
        fecha.day(),
        MESES[fecha.month0() as usize],
        fecha.year()
    )
}

/// Renders the fixed HTML document handed to the notifier.
fn render_plan_document(paciente: &Patient, plan: &AssignedPlan, fecha: NaiveDate) -> String {
    format!(
        "<html><body>\
         <h1>Plan de tratamiento</h1>\
         <p>Fecha: {fecha_larga}</p>\
         <p>Paciente: {nombre} {apellido} (Identificación: {identificacion})</p>\
         <h2>{plan_nombre}</h2>\
         <p>{descripcion}</p>\
         </body></html>",
        fecha_larga = long_date_es(fecha),
        nombre = paciente.nombre,
        apellido = paciente.apellido,
        identificacion = paciente.identificacion,
        plan_nombre = plan.nombre,
        descripcion = plan.descripcion.as_deref().unwrap_or(""),
    )
}

/// Treatment plan operations - no API concerns.
#[derive(Clone)]
pub struct PlanService {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
}

impl PlanService {
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Appends a plan to the catalog. No duplicate-name check.
    pub fn create_plan(&self, fields: NewPlan) -> ServiceResult<TreatmentPlan> {
        let err = |e| ServiceError::store("Error al crear plan de tratamiento", e);

        let conn = self.store.lock()?;
        conn.execute(
            "INSERT INTO planes_tratamiento (nombre, descripcion) VALUES (?1, ?2)",
            params![fields.nombre, fields.descripcion],
        )
        .map_err(err)?;

        conn.query_row(
            "SELECT id, nombre, descripcion FROM planes_tratamiento WHERE id = ?1",
            params![conn.last_insert_rowid()],
            plan_from_row,
        )
        .map_err(err)
    }

    /// Returns the full plan catalog.
    pub fn list_plans(&self) -> ServiceResult<Vec<TreatmentPlan>> {
        let err = |e| ServiceError::store("Error al obtener planes de tratamiento", e);

        let conn = self.store.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, nombre, descripcion FROM planes_tratamiento")
            .map_err(err)?;
        let plans = stmt
            .query_map([], plan_from_row)
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        Ok(plans)
    }

    /// Records a plan assignment. Neither the plan's existence in the catalog
    /// nor prior assignment of the pair is checked: duplicates are permitted.
    pub fn assign(&self, paciente_id: i64, plan_id: Option<i64>) -> ServiceResult<PlanAssignment> {
        let err = |e| ServiceError::store("Error al asignar plan al paciente", e);

        let conn = self.store.lock()?;
        conn.execute(
            "INSERT INTO paciente_plan (paciente_id, plan_id) VALUES (?1, ?2)",
            params![paciente_id, plan_id],
        )
        .map_err(err)?;

        conn.query_row(
            "SELECT paciente_id, plan_id, fecha_asignacion FROM paciente_plan WHERE rowid = ?1",
            params![conn.last_insert_rowid()],
            |row| {
                Ok(PlanAssignment {
                    paciente_id: row.get(0)?,
                    plan_id: row.get(1)?,
                    fecha_asignacion: row.get(2)?,
                })
            },
        )
        .map_err(err)
    }

    /// Lists the plans assigned to a patient, joined with the assignment
    /// timestamp, in the store's natural order.
    pub fn assigned_plans(&self, paciente_id: i64) -> ServiceResult<Vec<AssignedPlan>> {
        let err = |e| ServiceError::store("Error al obtener planes del paciente", e);

        let conn = self.store.lock()?;
        let mut stmt = conn
            .prepare(&format!("{ASSIGNED_PLAN_JOIN} WHERE pp.paciente_id = ?1"))
            .map_err(err)?;
        let plans = stmt
            .query_map(params![paciente_id], assigned_plan_from_row)
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        Ok(plans)
    }

    /// Renders the plan as a patient-facing document and hands it to the
    /// notifier addressed to the patient's email.
    ///
    /// # Errors
    ///
    /// - `ServiceError::NotFound` if the patient does not exist, or if the
    ///   plan is not assigned to the patient.
    /// - `ServiceError::Validation` if the patient has no email on file.
    /// - `ServiceError::Delivery` if the notifier reports failure. Delivery
    ///   is not retried.
    pub fn send_plan_by_mail(&self, paciente_id: i64, plan_id: i64) -> ServiceResult<MailReceipt> {
        let err = |e| ServiceError::store("Error al enviar el plan por correo", e);

        // Read everything first so the store lock is released before the
        // SMTP round-trip.
        let (email, paciente, asignado) = {
            let conn = self.store.lock()?;
            let paciente = fetch_patient(&conn, paciente_id)
                .map_err(err)?
                .ok_or(ServiceError::NotFound("Paciente no encontrado"))?;

            let email = paciente
                .email
                .clone()
                .filter(|e| !e.trim().is_empty())
                .ok_or_else(|| {
                    ServiceError::Validation(
                        "El paciente no tiene correo electrónico registrado".into(),
                    )
                })?;

            let asignado = conn
                .query_row(
                    &format!(
                        "{ASSIGNED_PLAN_JOIN} WHERE pp.paciente_id = ?1 AND pp.plan_id = ?2 \
                         ORDER BY pp.fecha_asignacion DESC, pp.rowid DESC LIMIT 1"
                    ),
                    params![paciente_id, plan_id],
                    assigned_plan_from_row,
                )
                .optional()
                .map_err(err)?
                .ok_or(ServiceError::NotFound("El plan no está asignado al paciente"))?;

            (email, paciente, asignado)
        };

        let asunto = format!("Plan de tratamiento: {}", asignado.nombre);
        let cuerpo = render_plan_document(&paciente, &asignado, Utc::now().date_naive());

        self.notifier.send(&email, &asunto, &cuerpo).map_err(|e| {
            tracing::error!(error = %e, paciente_id, plan_id, "Error al enviar el correo");
            ServiceError::Delivery("Error al enviar el correo")
        })?;

        tracing::info!(paciente_id, plan_id, "plan de tratamiento enviado por correo");
        Ok(MailReceipt {
            message: "Plan de tratamiento enviado".into(),
            destinatario: email,
        })
    }
}
