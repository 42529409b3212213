//! Medication inventory service.
//!
//! Catalog of medication categories and medications, stock bookkeeping, and
//! the low-stock aggregate report. Deletion is logical only: rows are marked
//! inactive and excluded from default listings and statistics, but
//! lookup-by-id deliberately ignores the active flag.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::store::Store;
use crate::{ServiceError, ServiceResult};

/// A flat medication category.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MedicationCategory {
    pub id: i64,
    pub nombre: String,
    pub descripcion: Option<String>,
}

/// Request body for creating a category. No duplicate-name check.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewCategory {
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
}

/// A stored medication, joined with its category name.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Medication {
    pub id: i64,
    pub nombre: String,
    pub nombre_generico: Option<String>,
    pub categoria_id: Option<i64>,
    pub descripcion: Option<String>,
    pub presentacion: Option<String>,
    pub stock_actual: i64,
    pub stock_minimo: i64,
    pub precio_unitario: f64,
    pub requiere_receta: bool,
    pub activo: bool,
    pub updated_at: Option<String>,
    pub categoria_nombre: Option<String>,
}

/// Medication fields for creation and full updates.
///
/// As with patients, the store's NOT-NULL constraints enforce the required
/// set; a violation surfaces as a generic failure.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewMedication {
    pub nombre: Option<String>,
    pub nombre_generico: Option<String>,
    pub categoria_id: Option<i64>,
    pub descripcion: Option<String>,
    pub presentacion: Option<String>,
    pub stock_actual: Option<i64>,
    pub stock_minimo: Option<i64>,
    pub precio_unitario: Option<f64>,
    pub requiere_receta: Option<bool>,
}

/// Optional listing filters, conjoined over the base `activo` predicate.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct MedicationFilters {
    /// Exact category id match.
    pub categoria: Option<i64>,
    /// Case-insensitive substring over commercial or generic name.
    pub busqueda: Option<String>,
    /// Low-stock predicate; triggers only on the literal `"true"`.
    pub stock_bajo: Option<String>,
}

/// Aggregate counts for the statistics endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MedicationStats {
    /// Active medications.
    pub total: i64,
    /// Active medications with `stock_actual < stock_minimo`.
    pub stock_bajo: i64,
    /// All categories, including unused ones.
    pub categorias: i64,
}

const MEDICATION_COLUMNS: &str = "m.id, m.nombre, m.nombre_generico, m.categoria_id, \
     m.descripcion, m.presentacion, m.stock_actual, m.stock_minimo, m.precio_unitario, \
     m.requiere_receta, m.activo, m.updated_at, c.nombre AS categoria_nombre";

const MEDICATION_FROM: &str =
    "FROM medicamentos m LEFT JOIN categorias_medicamentos c ON m.categoria_id = c.id";

fn medication_from_row(row: &Row<'_>) -> rusqlite::Result<Medication> {
    Ok(Medication {
        id: row.get(0)?,
        nombre: row.get(1)?,
        nombre_generico: row.get(2)?,
        categoria_id: row.get(3)?,
        descripcion: row.get(4)?,
        presentacion: row.get(5)?,
        stock_actual: row.get(6)?,
        stock_minimo: row.get(7)?,
        precio_unitario: row.get(8)?,
        requiere_receta: row.get(9)?,
        activo: row.get(10)?,
        updated_at: row.get(11)?,
        categoria_nombre: row.get(12)?,
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<MedicationCategory> {
    Ok(MedicationCategory {
        id: row.get(0)?,
        nombre: row.get(1)?,
        descripcion: row.get(2)?,
    })
}

fn fetch_medication(
    conn: &rusqlite::Connection,
    id: i64,
) -> rusqlite::Result<Option<Medication>> {
    conn.query_row(
        &format!("SELECT {MEDICATION_COLUMNS} {MEDICATION_FROM} WHERE m.id = ?1"),
        params![id],
        medication_from_row,
    )
    .optional()
}

/// Medication inventory operations - no API concerns.
#[derive(Clone)]
pub struct InventoryService {
    store: Arc<Store>,
}

impl InventoryService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Returns all categories, alphabetical by name.
    pub fn list_categories(&self) -> ServiceResult<Vec<MedicationCategory>> {
        let err = |e| ServiceError::store("Error al obtener categorías de medicamentos", e);

        let conn = self.store.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, nombre, descripcion FROM categorias_medicamentos ORDER BY nombre")
            .map_err(err)?;
        let categories = stmt
            .query_map([], category_from_row)
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        Ok(categories)
    }

    /// Appends a category to the catalog.
    pub fn create_category(&self, fields: NewCategory) -> ServiceResult<MedicationCategory> {
        let err = |e| ServiceError::store("Error al crear categoría", e);

        let conn = self.store.lock()?;
        conn.execute(
            "INSERT INTO categorias_medicamentos (nombre, descripcion) VALUES (?1, ?2)",
            params![fields.nombre, fields.descripcion],
        )
        .map_err(err)?;

        conn.query_row(
            "SELECT id, nombre, descripcion FROM categorias_medicamentos WHERE id = ?1",
            params![conn.last_insert_rowid()],
            category_from_row,
        )
        .map_err(err)
    }

    /// Lists active medications, alphabetical by commercial name, with each
    /// supplied filter conjoined onto the base predicate.
    ///
    /// The predicate set is composed with bound parameters; filter values are
    /// never interpolated into the SQL text.
    pub fn list_medications(&self, filters: &MedicationFilters) -> ServiceResult<Vec<Medication>> {
        let err = |e| ServiceError::store("Error al obtener medicamentos", e);

        let mut sql = format!("SELECT {MEDICATION_COLUMNS} {MEDICATION_FROM} WHERE m.activo = 1");
        let mut bound: Vec<&dyn ToSql> = Vec::new();

        let pattern = filters.busqueda.as_ref().map(|b| format!("%{b}%"));

        if let Some(categoria) = filters.categoria.as_ref() {
            sql.push_str(&format!(" AND m.categoria_id = ?{}", bound.len() + 1));
            bound.push(categoria);
        }
        if let Some(pattern) = pattern.as_ref() {
            let idx = bound.len() + 1;
            sql.push_str(&format!(
                " AND (lower_unicode(m.nombre) LIKE lower_unicode(?{idx}) \
                   OR lower_unicode(m.nombre_generico) LIKE lower_unicode(?{idx}))"
            ));
            bound.push(pattern);
        }
        if filters.stock_bajo.as_deref() == Some("true") {
            sql.push_str(" AND m.stock_actual < m.stock_minimo");
        }
        sql.push_str(" ORDER BY m.nombre");

        let conn = self.store.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(err)?;
        let medications = stmt
            .query_map(bound.as_slice(), medication_from_row)
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        Ok(medications)
    }

    /// Fetches one medication by id. Unlike listing, this ignores the active
    /// flag: deactivated rows remain retrievable.
    pub fn get_medication(&self, id: i64) -> ServiceResult<Medication> {
        let conn = self.store.lock()?;
        fetch_medication(&conn, id)
            .map_err(|e| ServiceError::store("Error al obtener medicamento", e))?
            .ok_or(ServiceError::NotFound("Medicamento no encontrado"))
    }

    /// Inserts a medication; `activo` defaults to true.
    pub fn create_medication(&self, fields: NewMedication) -> ServiceResult<Medication> {
        let err = |e| ServiceError::store("Error al crear medicamento", e);

        let conn = self.store.lock()?;
        conn.execute(
            "INSERT INTO medicamentos (nombre, nombre_generico, categoria_id, descripcion, \
             presentacion, stock_actual, stock_minimo, precio_unitario, requiere_receta) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                fields.nombre,
                fields.nombre_generico,
                fields.categoria_id,
                fields.descripcion,
                fields.presentacion,
                fields.stock_actual,
                fields.stock_minimo,
                fields.precio_unitario,
                fields.requiere_receta.unwrap_or(false),
            ],
        )
        .map_err(err)?;

        let id = conn.last_insert_rowid();
        fetch_medication(&conn, id)
            .map_err(err)?
            .ok_or(ServiceError::Store("Error al crear medicamento"))
    }

    /// Replaces all editable fields and stamps the modification timestamp.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if no row matches `id`.
    pub fn update_medication(&self, id: i64, fields: NewMedication) -> ServiceResult<Medication> {
        let err = |e| ServiceError::store("Error al actualizar medicamento", e);

        let conn = self.store.lock()?;
        let changed = conn
            .execute(
                "UPDATE medicamentos SET nombre = ?1, nombre_generico = ?2, categoria_id = ?3, \
                 descripcion = ?4, presentacion = ?5, stock_actual = ?6, stock_minimo = ?7, \
                 precio_unitario = ?8, requiere_receta = ?9, updated_at = datetime('now') \
                 WHERE id = ?10",
                params![
                    fields.nombre,
                    fields.nombre_generico,
                    fields.categoria_id,
                    fields.descripcion,
                    fields.presentacion,
                    fields.stock_actual,
                    fields.stock_minimo,
                    fields.precio_unitario,
                    fields.requiere_receta.unwrap_or(false),
                    id,
                ],
            )
            .map_err(err)?;

        if changed == 0 {
            return Err(ServiceError::NotFound("Medicamento no encontrado"));
        }

        fetch_medication(&conn, id)
            .map_err(err)?
            .ok_or(ServiceError::NotFound("Medicamento no encontrado"))
    }

    /// Logical deletion: marks the medication inactive and stamps the
    /// modification timestamp. The row stays in storage and remains
    /// retrievable by id.
    pub fn deactivate(&self, id: i64) -> ServiceResult<Medication> {
        let err = |e| ServiceError::store("Error al eliminar medicamento", e);

        let conn = self.store.lock()?;
        let changed = conn
            .execute(
                "UPDATE medicamentos SET activo = 0, updated_at = datetime('now') WHERE id = ?1",
                params![id],
            )
            .map_err(err)?;

        if changed == 0 {
            return Err(ServiceError::NotFound("Medicamento no encontrado"));
        }

        fetch_medication(&conn, id)
            .map_err(err)?
            .ok_or(ServiceError::NotFound("Medicamento no encontrado"))
    }

    /// Overwrites the stock counter unconditionally (no floor-at-zero check,
    /// no delta trail) and stamps the modification timestamp. Concurrent
    /// calls race with last-write-wins semantics.
    pub fn set_stock(&self, id: i64, stock_actual: Option<i64>) -> ServiceResult<Medication> {
        let err = |e| ServiceError::store("Error al actualizar stock", e);

        let conn = self.store.lock()?;
        let changed = conn
            .execute(
                "UPDATE medicamentos SET stock_actual = ?1, updated_at = datetime('now') \
                 WHERE id = ?2",
                params![stock_actual, id],
            )
            .map_err(err)?;

        if changed == 0 {
            return Err(ServiceError::NotFound("Medicamento no encontrado"));
        }

        fetch_medication(&conn, id)
            .map_err(err)?
            .ok_or(ServiceError::NotFound("Medicamento no encontrado"))
    }

    /// Returns total active medications, active low-stock medications, and
    /// total category count.
    pub fn statistics(&self) -> ServiceResult<MedicationStats> {
        let err = |e| ServiceError::store("Error al obtener estadísticas", e);

        let conn = self.store.lock()?;
        let total = conn
            .query_row(
                "SELECT COUNT(*) FROM medicamentos WHERE activo = 1",
                [],
                |row| row.get(0),
            )
            .map_err(err)?;
        let stock_bajo = conn
            .query_row(
                "SELECT COUNT(*) FROM medicamentos \
                 WHERE activo = 1 AND stock_actual < stock_minimo",
                [],
                |row| row.get(0),
            )
            .map_err(err)?;
        let categorias = conn
            .query_row("SELECT COUNT(*) FROM categorias_medicamentos", [], |row| {
                row.get(0)
            })
            .map_err(err)?;

        Ok(MedicationStats {
            total,
            stock_bajo,
            categorias,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patients::test_support::test_store;

    fn service() -> InventoryService {
        InventoryService::new(test_store())
    }

    fn sample_medication(nombre: &str, categoria_id: Option<i64>) -> NewMedication {
        NewMedication {
            nombre: Some(nombre.into()),
            nombre_generico: Some("Genérico".into()),
            categoria_id,
            descripcion: Some("Analgésico de uso general".into()),
            presentacion: Some("Caja x 20 tabletas".into()),
            stock_actual: Some(50),
            stock_minimo: Some(10),
            precio_unitario: Some(1200.50),
            requiere_receta: Some(false),
        }
    }

    #[test]
    fn test_categories_are_listed_alphabetically() {
        let service = service();
        for nombre in ["Antibióticos", "Analgésicos", "Sueros"] {
            service
                .create_category(NewCategory {
                    nombre: Some(nombre.into()),
                    descripcion: None,
                })
                .expect("create category");
        }

        let categories = service.list_categories().expect("list");
        let names: Vec<_> = categories.iter().map(|c| c.nombre.as_str()).collect();
        assert_eq!(names, ["Analgésicos", "Antibióticos", "Sueros"]);
    }

    #[test]
    fn test_create_medication_is_active_and_joined_with_category() {
        let service = service();
        let categoria = service
            .create_category(NewCategory {
                nombre: Some("Analgésicos".into()),
                descripcion: None,
            })
            .expect("create category");

        let created = service
            .create_medication(sample_medication("Acetaminofén", Some(categoria.id)))
            .expect("create medication");

        assert!(created.activo);
        assert_eq!(created.categoria_nombre.as_deref(), Some("Analgésicos"));
        assert_eq!(created.stock_actual, 50);
        assert_eq!(created.precio_unitario, 1200.50);
    }

    #[test]
    fn test_listing_is_alphabetical_and_filters_conjoin() {
        let service = service();
        let analgesicos = service
            .create_category(NewCategory {
                nombre: Some("Analgésicos".into()),
                descripcion: None,
            })
            .expect("create category");
        let antibioticos = service
            .create_category(NewCategory {
                nombre: Some("Antibióticos".into()),
                descripcion: None,
            })
            .expect("create category");

        service
            .create_medication(sample_medication("Ibuprofeno", Some(analgesicos.id)))
            .expect("create");
        service
            .create_medication(sample_medication("Acetaminofén", Some(analgesicos.id)))
            .expect("create");
        service
            .create_medication(sample_medication("Amoxicilina", Some(antibioticos.id)))
            .expect("create");

        let all = service
            .list_medications(&MedicationFilters::default())
            .expect("list");
        let names: Vec<_> = all.iter().map(|m| m.nombre.as_str()).collect();
        assert_eq!(names, ["Acetaminofén", "Amoxicilina", "Ibuprofeno"]);

        let by_category = service
            .list_medications(&MedicationFilters {
                categoria: Some(analgesicos.id),
                ..MedicationFilters::default()
            })
            .expect("list");
        assert_eq!(by_category.len(), 2);

        // Substring search is case-insensitive over commercial OR generic name.
        let by_search = service
            .list_medications(&MedicationFilters {
                busqueda: Some("AMOXI".into()),
                ..MedicationFilters::default()
            })
            .expect("list");
        assert_eq!(by_search.len(), 1);
        assert_eq!(by_search[0].nombre, "Amoxicilina");

        let conjoined = service
            .list_medications(&MedicationFilters {
                categoria: Some(antibioticos.id),
                busqueda: Some("ibuprofeno".into()),
                ..MedicationFilters::default()
            })
            .expect("list");
        assert!(conjoined.is_empty(), "filters are ANDed, not ORed");
    }

    #[test]
    fn test_search_filter_folds_accented_characters() {
        let service = service();
        service
            .create_medication(sample_medication("Acetaminofén", None))
            .expect("create");

        let found = service
            .list_medications(&MedicationFilters {
                busqueda: Some("ACETAMINOFÉN".into()),
                ..MedicationFilters::default()
            })
            .expect("list");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].nombre, "Acetaminofén");
    }

    #[test]
    fn test_low_stock_filter_and_statistics() {
        let service = service();
        service
            .create_medication(sample_medication("Acetaminofén", None))
            .expect("create");
        let low = service
            .create_medication(NewMedication {
                stock_actual: Some(2),
                stock_minimo: Some(10),
                ..sample_medication("Amoxicilina", None)
            })
            .expect("create");
        // Zero minimum: setStock(id, 0) never makes this row low-stock.
        service
            .create_medication(NewMedication {
                stock_actual: Some(0),
                stock_minimo: Some(0),
                ..sample_medication("Suero", None)
            })
            .expect("create");

        let low_stock = service
            .list_medications(&MedicationFilters {
                stock_bajo: Some("true".into()),
                ..MedicationFilters::default()
            })
            .expect("list");
        assert_eq!(low_stock.len(), 1);
        assert_eq!(low_stock[0].id, low.id);

        let stats = service.statistics().expect("statistics");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.stock_bajo, 1);
        assert_eq!(stats.categorias, 0);

        // Deactivating the low-stock row removes it from both counts.
        service.deactivate(low.id).expect("deactivate");
        let stats = service.statistics().expect("statistics");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.stock_bajo, 0);
    }

    #[test]
    fn test_stock_bajo_parameter_triggers_only_on_literal_true() {
        let service = service();
        service
            .create_medication(NewMedication {
                stock_actual: Some(2),
                stock_minimo: Some(10),
                ..sample_medication("Amoxicilina", None)
            })
            .expect("create");
        service
            .create_medication(sample_medication("Acetaminofén", None))
            .expect("create");

        let unfiltered = service
            .list_medications(&MedicationFilters {
                stock_bajo: Some("1".into()),
                ..MedicationFilters::default()
            })
            .expect("list");
        assert_eq!(unfiltered.len(), 2, "only the literal \"true\" filters");
    }

    #[test]
    fn test_deactivate_hides_from_listing_but_not_from_lookup() {
        let service = service();
        let created = service
            .create_medication(sample_medication("Acetaminofén", None))
            .expect("create");

        let deactivated = service.deactivate(created.id).expect("deactivate");
        assert!(!deactivated.activo);
        assert!(deactivated.updated_at.is_some());

        let listed = service
            .list_medications(&MedicationFilters::default())
            .expect("list");
        assert!(listed.is_empty());

        let fetched = service.get_medication(created.id).expect("lookup by id");
        assert!(!fetched.activo, "lookup-by-id ignores the active flag");
    }

    #[test]
    fn test_set_stock_overwrites_unconditionally() {
        let service = service();
        let created = service
            .create_medication(sample_medication("Acetaminofén", None))
            .expect("create");

        let updated = service
            .set_stock(created.id, Some(0))
            .expect("set stock");
        assert_eq!(updated.stock_actual, 0);
        assert!(updated.updated_at.is_some());

        // No floor-at-zero check.
        let negative = service
            .set_stock(created.id, Some(-5))
            .expect("set stock");
        assert_eq!(negative.stock_actual, -5);

        let err = service
            .set_stock(9999, Some(1))
            .expect_err("absent medication should fail");
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn test_update_medication_replaces_fields_and_stamps_timestamp() {
        let service = service();
        let created = service
            .create_medication(sample_medication("Acetaminofén", None))
            .expect("create");
        assert!(created.updated_at.is_none());

        let updated = service
            .update_medication(
                created.id,
                NewMedication {
                    precio_unitario: Some(1500.0),
                    ..sample_medication("Acetaminofén Forte", None)
                },
            )
            .expect("update");
        assert_eq!(updated.nombre, "Acetaminofén Forte");
        assert_eq!(updated.precio_unitario, 1500.0);
        assert!(updated.updated_at.is_some());

        let err = service
            .update_medication(9999, sample_medication("Nada", None))
            .expect_err("absent medication should fail");
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn test_get_missing_medication_is_not_found() {
        let err = service()
            .get_medication(9999)
            .expect_err("absent medication should fail");
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
