//! # API REST
//!
//! REST surface for the emergency-ward backend.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, status mapping)
//!
//! Domain logic lives in `urgencias-core`; every handler is a thin adapter
//! from the wire to one service call.

#![warn(rust_2018_idioms)]

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, OpenApi, ToSchema};

use urgencias_core::history::{FullRecord, HistoryEntry, NewHistoryEntry};
use urgencias_core::inventory::{
    Medication, MedicationCategory, MedicationFilters, MedicationStats, NewCategory, NewMedication,
};
use urgencias_core::notifier::Notifier;
use urgencias_core::patients::{NewPatient, Patient, PatientState};
use urgencias_core::plans::{
    AssignPlanReq, AssignedPlan, MailReceipt, NewPlan, PlanAssignment, TreatmentPlan,
};
use urgencias_core::{
    HistoryService, InventoryService, PatientService, PlanService, ServiceError, Store,
};

/// Application state shared across REST API handlers.
///
/// One instance of each domain service; all of them share the same store
/// handle, and the plan service additionally owns the notifier.
#[derive(Clone)]
pub struct AppState {
    patients: PatientService,
    history: HistoryService,
    plans: PlanService,
    inventory: InventoryService,
}

impl AppState {
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            patients: PatientService::new(store.clone()),
            history: HistoryService::new(store.clone()),
            plans: PlanService::new(store.clone(), notifier),
            inventory: InventoryService::new(store),
        }
    }
}

/// Wire form of a service failure: a status code plus `{"error": "..."}`.
struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Delivery(_) | ServiceError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(status = %status, "{}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Confirmation payload for operations that return no entity.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageRes {
    pub message: String,
}

/// Payload returned by the logical medication deletion.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeactivatedMedicationRes {
    pub message: String,
    pub medicamento: Medication,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchParams {
    /// Substring matched against identification and both name fields.
    pub q: Option<String>,
}

/// Request body for the lifecycle transition endpoint.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StateChangeReq {
    pub estado: Option<String>,
}

/// Request body for the stock overwrite endpoint.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SetStockReq {
    pub stock_actual: Option<i64>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        root,
        list_patients,
        create_patient,
        update_patient,
        delete_patient,
        search_patients,
        change_patient_state,
        full_record,
        append_history_entry,
        list_plans,
        create_plan,
        assign_plan,
        assigned_plans,
        send_plan_by_mail,
        list_categories,
        create_category,
        list_medications,
        create_medication,
        get_medication,
        update_medication,
        deactivate_medication,
        set_stock,
        medication_statistics,
    ),
    components(schemas(
        Patient,
        NewPatient,
        PatientState,
        StateChangeReq,
        FullRecord,
        HistoryEntry,
        NewHistoryEntry,
        TreatmentPlan,
        NewPlan,
        PlanAssignment,
        AssignPlanReq,
        AssignedPlan,
        MailReceipt,
        MedicationCategory,
        NewCategory,
        Medication,
        NewMedication,
        MedicationStats,
        SetStockReq,
        MessageRes,
        DeactivatedMedicationRes,
    ))
)]
pub struct ApiDoc;

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/pacientes", get(list_patients).post(create_patient))
        .route("/pacientes/buscar", get(search_patients))
        .route("/pacientes/:id", axum::routing::put(update_patient).delete(delete_patient))
        .route("/pacientes/:id/estado", patch(change_patient_state))
        .route(
            "/pacientes/:id/historial",
            get(full_record).post(append_history_entry),
        )
        .route("/pacientes/:id/asignar-plan", post(assign_plan))
        .route("/pacientes/:id/planes", get(assigned_plans))
        .route(
            "/pacientes/:id/planes/:plan_id/enviar-correo",
            post(send_plan_by_mail),
        )
        .route("/planes", get(list_plans).post(create_plan))
        .route(
            "/categorias-medicamentos",
            get(list_categories).post(create_category),
        )
        .route("/medicamentos", get(list_medications).post(create_medication))
        .route("/medicamentos-estadisticas", get(medication_statistics))
        .route(
            "/medicamentos/:id",
            get(get_medication)
                .put(update_medication)
                .delete(deactivate_medication),
        )
        .route("/medicamentos/:id/stock", patch(set_stock))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service banner", body = String))
)]
/// Service banner, useful as a liveness probe.
async fn root() -> &'static str {
    "API de Emergencias"
}

#[utoipa::path(
    get,
    path = "/pacientes",
    responses(
        (status = 200, description = "All patients in insertion order", body = [Patient]),
        (status = 500, description = "Internal server error")
    )
)]
/// Lists every patient.
async fn list_patients(State(state): State<AppState>) -> ApiResult<Json<Vec<Patient>>> {
    Ok(Json(state.patients.list()?))
}

#[utoipa::path(
    post,
    path = "/pacientes",
    request_body = NewPatient,
    responses(
        (status = 200, description = "Patient admitted", body = Patient),
        (status = 500, description = "Internal server error")
    )
)]
/// Admits a new patient. The initial lifecycle state is `ingresado`.
async fn create_patient(
    State(state): State<AppState>,
    Json(req): Json<NewPatient>,
) -> ApiResult<Json<Patient>> {
    Ok(Json(state.patients.register(req)?))
}

#[utoipa::path(
    put,
    path = "/pacientes/{id}",
    request_body = NewPatient,
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Patient updated", body = Patient),
        (status = 404, description = "Patient not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Replaces every editable patient field.
async fn update_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewPatient>,
) -> ApiResult<Json<Patient>> {
    Ok(Json(state.patients.update(id, req)?))
}

#[utoipa::path(
    delete,
    path = "/pacientes/{id}",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Patient deleted", body = MessageRes),
        (status = 404, description = "Patient not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Deletes a patient; clinical history rows cascade with it.
async fn delete_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<MessageRes>> {
    state.patients.delete(id)?;
    Ok(Json(MessageRes {
        message: "Paciente eliminado".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/pacientes/buscar",
    params(SearchParams),
    responses(
        (status = 200, description = "Matching patients", body = [Patient]),
        (status = 400, description = "Missing search parameter"),
        (status = 500, description = "Internal server error")
    )
)]
/// Searches patients by identification or either name field.
async fn search_patients(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<Patient>>> {
    Ok(Json(state.patients.search(params.q.as_deref().unwrap_or(""))?))
}

#[utoipa::path(
    patch,
    path = "/pacientes/{id}/estado",
    request_body = StateChangeReq,
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "State changed", body = Patient),
        (status = 400, description = "Invalid state"),
        (status = 404, description = "Patient not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Moves a patient to another lifecycle state.
///
/// Any of `ingresado`, `internado`, `alta` is accepted from any current
/// state; there is no transition graph.
async fn change_patient_state(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<StateChangeReq>,
) -> ApiResult<Json<Patient>> {
    let estado = req.estado.as_deref().unwrap_or("");
    Ok(Json(state.patients.transition(id, estado)?))
}

#[utoipa::path(
    get,
    path = "/pacientes/{id}/historial",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Full clinical record", body = FullRecord),
        (status = 404, description = "Patient not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Returns the full clinical record: patient, entries newest-first, plan
/// assignments newest-first, and the derived allergies display value.
async fn full_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<FullRecord>> {
    Ok(Json(state.history.full_record(id)?))
}

#[utoipa::path(
    post,
    path = "/pacientes/{id}/historial",
    request_body = NewHistoryEntry,
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Entry appended", body = HistoryEntry),
        (status = 404, description = "Patient not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Appends an immutable note to the patient's timeline.
async fn append_history_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewHistoryEntry>,
) -> ApiResult<Json<HistoryEntry>> {
    Ok(Json(state.history.append_entry(id, req)?))
}

#[utoipa::path(
    get,
    path = "/planes",
    responses(
        (status = 200, description = "Treatment plan catalog", body = [TreatmentPlan]),
        (status = 500, description = "Internal server error")
    )
)]
/// Lists the treatment plan catalog.
async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<TreatmentPlan>>> {
    Ok(Json(state.plans.list_plans()?))
}

#[utoipa::path(
    post,
    path = "/planes",
    request_body = NewPlan,
    responses(
        (status = 200, description = "Plan created", body = TreatmentPlan),
        (status = 500, description = "Internal server error")
    )
)]
/// Adds a plan to the catalog.
async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<NewPlan>,
) -> ApiResult<Json<TreatmentPlan>> {
    Ok(Json(state.plans.create_plan(req)?))
}

#[utoipa::path(
    post,
    path = "/pacientes/{id}/asignar-plan",
    request_body = AssignPlanReq,
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Plan assigned", body = PlanAssignment),
        (status = 500, description = "Internal server error")
    )
)]
/// Links a plan to a patient. Re-assigning the same plan creates a second,
/// independent assignment.
async fn assign_plan(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AssignPlanReq>,
) -> ApiResult<Json<PlanAssignment>> {
    Ok(Json(state.plans.assign(id, req.plan_id)?))
}

#[utoipa::path(
    get,
    path = "/pacientes/{id}/planes",
    params(("id" = i64, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Plans assigned to the patient", body = [AssignedPlan]),
        (status = 500, description = "Internal server error")
    )
)]
/// Lists the plans assigned to a patient.
async fn assigned_plans(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<AssignedPlan>>> {
    Ok(Json(state.plans.assigned_plans(id)?))
}

#[utoipa::path(
    post,
    path = "/pacientes/{id}/planes/{plan_id}/enviar-correo",
    params(
        ("id" = i64, Path, description = "Patient id"),
        ("plan_id" = i64, Path, description = "Plan id")
    ),
    responses(
        (status = 200, description = "Plan handed to the mail transport", body = MailReceipt),
        (status = 400, description = "Patient has no email address"),
        (status = 404, description = "Patient not found or plan not assigned"),
        (status = 500, description = "Delivery failure")
    )
)]
/// Renders the assigned plan as an HTML document and sends it to the
/// patient's registered email address.
///
/// The SMTP round-trip blocks, so the whole operation runs on the blocking
/// thread pool instead of a runtime worker.
async fn send_plan_by_mail(
    State(state): State<AppState>,
    Path((id, plan_id)): Path<(i64, i64)>,
) -> ApiResult<Json<MailReceipt>> {
    let plans = state.plans.clone();
    let receipt = tokio::task::spawn_blocking(move || plans.send_plan_by_mail(id, plan_id))
        .await
        .map_err(|_| ServiceError::Store("Error al enviar el plan por correo"))??;
    Ok(Json(receipt))
}

#[utoipa::path(
    get,
    path = "/categorias-medicamentos",
    responses(
        (status = 200, description = "Medication categories", body = [MedicationCategory]),
        (status = 500, description = "Internal server error")
    )
)]
async fn list_categories(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<MedicationCategory>>> {
    Ok(Json(state.inventory.list_categories()?))
}

#[utoipa::path(
    post,
    path = "/categorias-medicamentos",
    request_body = NewCategory,
    responses(
        (status = 200, description = "Category created", body = MedicationCategory),
        (status = 500, description = "Internal server error")
    )
)]
async fn create_category(
    State(state): State<AppState>,
    Json(req): Json<NewCategory>,
) -> ApiResult<Json<MedicationCategory>> {
    Ok(Json(state.inventory.create_category(req)?))
}

#[utoipa::path(
    get,
    path = "/medicamentos",
    params(MedicationFilters),
    responses(
        (status = 200, description = "Active medications matching the filters", body = [Medication]),
        (status = 500, description = "Internal server error")
    )
)]
/// Lists active medications; category, substring, and low-stock filters are
/// conjoined when supplied.
async fn list_medications(
    State(state): State<AppState>,
    Query(filters): Query<MedicationFilters>,
) -> ApiResult<Json<Vec<Medication>>> {
    Ok(Json(state.inventory.list_medications(&filters)?))
}

#[utoipa::path(
    post,
    path = "/medicamentos",
    request_body = NewMedication,
    responses(
        (status = 200, description = "Medication created", body = Medication),
        (status = 500, description = "Internal server error")
    )
)]
async fn create_medication(
    State(state): State<AppState>,
    Json(req): Json<NewMedication>,
) -> ApiResult<Json<Medication>> {
    Ok(Json(state.inventory.create_medication(req)?))
}

#[utoipa::path(
    get,
    path = "/medicamentos/{id}",
    params(("id" = i64, Path, description = "Medication id")),
    responses(
        (status = 200, description = "The medication, active or not", body = Medication),
        (status = 404, description = "Medication not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Fetches one medication by id, including deactivated ones.
async fn get_medication(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Medication>> {
    Ok(Json(state.inventory.get_medication(id)?))
}

#[utoipa::path(
    put,
    path = "/medicamentos/{id}",
    request_body = NewMedication,
    params(("id" = i64, Path, description = "Medication id")),
    responses(
        (status = 200, description = "Medication updated", body = Medication),
        (status = 404, description = "Medication not found"),
        (status = 500, description = "Internal server error")
    )
)]
async fn update_medication(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewMedication>,
) -> ApiResult<Json<Medication>> {
    Ok(Json(state.inventory.update_medication(id, req)?))
}

#[utoipa::path(
    delete,
    path = "/medicamentos/{id}",
    params(("id" = i64, Path, description = "Medication id")),
    responses(
        (status = 200, description = "Medication deactivated", body = DeactivatedMedicationRes),
        (status = 404, description = "Medication not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Logical deletion: the medication is marked inactive and disappears from
/// listings, but stays retrievable by id.
async fn deactivate_medication(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeactivatedMedicationRes>> {
    let medicamento = state.inventory.deactivate(id)?;
    Ok(Json(DeactivatedMedicationRes {
        message: "Medicamento desactivado".to_string(),
        medicamento,
    }))
}

#[utoipa::path(
    patch,
    path = "/medicamentos/{id}/stock",
    request_body = SetStockReq,
    params(("id" = i64, Path, description = "Medication id")),
    responses(
        (status = 200, description = "Stock overwritten", body = Medication),
        (status = 404, description = "Medication not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Overwrites the stock counter with the supplied value.
async fn set_stock(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SetStockReq>,
) -> ApiResult<Json<Medication>> {
    Ok(Json(state.inventory.set_stock(id, req.stock_actual)?))
}

#[utoipa::path(
    get,
    path = "/medicamentos-estadisticas",
    responses(
        (status = 200, description = "Inventory aggregates", body = MedicationStats),
        (status = 500, description = "Internal server error")
    )
)]
/// Inventory aggregates: active medications, low-stock count, category count.
async fn medication_statistics(
    State(state): State<AppState>,
) -> ApiResult<Json<MedicationStats>> {
    Ok(Json(state.inventory.statistics()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use urgencias_core::notifier::NotifyError;

    /// Captures delivered messages instead of talking SMTP.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .expect("lock")
                .push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    fn test_app() -> (Router, Arc<RecordingNotifier>) {
        let store = Arc::new(Store::open_in_memory().expect("open store"));
        let notifier = Arc::new(RecordingNotifier::default());
        let app = router(AppState::new(store, notifier.clone()));
        (app, notifier)
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request")
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("build request")
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("parse body")
    }

    fn sample_patient_body(identificacion: &str, email: Option<&str>) -> serde_json::Value {
        json!({
            "fecha_hora_ingreso": "2026-08-30 10:15:00",
            "nombre": "Ana",
            "apellido": "García",
            "rh": "O+",
            "identificacion": identificacion,
            "telefono": "3001234567",
            "causa_emergencia": "Trauma leve",
            "email": email,
        })
    }

    #[tokio::test]
    async fn test_root_returns_banner() {
        let (app, _) = test_app();
        let response = app.oneshot(get_request("/")).await.expect("request");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        assert_eq!(&bytes[..], b"API de Emergencias");
    }

    #[tokio::test]
    async fn test_register_and_list_patients() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/pacientes",
                sample_patient_body("CC-1001", None),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["estado"], "ingresado");
        assert!(created["id"].as_i64().is_some());

        let response = app
            .oneshot(get_request("/pacientes"))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().expect("array").len(), 1);
        assert_eq!(listed[0]["identificacion"], "CC-1001");
    }

    #[tokio::test]
    async fn test_search_without_query_is_bad_request() {
        let (app, _) = test_app();

        let response = app
            .oneshot(get_request("/pacientes/buscar"))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Debe proporcionar un parámetro de búsqueda (q)");
    }

    #[tokio::test]
    async fn test_invalid_state_is_bad_request() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/pacientes",
                sample_patient_body("CC-1001", None),
            ))
            .await
            .expect("request");
        let id = body_json(response).await["id"].as_i64().expect("id");

        let response = app
            .oneshot(json_request(
                Method::PATCH,
                &format!("/pacientes/{id}/estado"),
                json!({ "estado": "fugado" }),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Estado inválido");
    }

    #[tokio::test]
    async fn test_delete_patient_returns_confirmation() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/pacientes",
                sample_patient_body("CC-1001", None),
            ))
            .await
            .expect("request");
        let id = body_json(response).await["id"].as_i64().expect("id");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri(format!("/pacientes/{id}"))
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Paciente eliminado");

        let response = app
            .oneshot(get_request(&format!("/pacientes/{id}/historial")))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_roundtrip_with_allergies() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/pacientes",
                sample_patient_body("CC-1001", None),
            ))
            .await
            .expect("request");
        let id = body_json(response).await["id"].as_i64().expect("id");

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/pacientes/{id}/historial"),
                json!({ "notas": "Ingreso por urgencias", "alergias": "Penicilina" }),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(get_request(&format!("/pacientes/{id}/historial")))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let record = body_json(response).await;
        assert_eq!(record["alergias"], "Penicilina");
        assert_eq!(record["entradas"].as_array().expect("array").len(), 1);
        assert_eq!(record["paciente"]["id"].as_i64(), Some(id));
    }

    #[tokio::test]
    async fn test_send_plan_by_mail_flow() {
        let (app, notifier) = test_app();

        // Patient without email first: sending must fail with 400.
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/pacientes",
                sample_patient_body("CC-1001", None),
            ))
            .await
            .expect("request");
        let paciente_id = body_json(response).await["id"].as_i64().expect("id");

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/planes",
                json!({ "nombre": "Reposo", "descripcion": "Reposo absoluto 48h" }),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let plan_id = body_json(response).await["id"].as_i64().expect("id");

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/pacientes/{paciente_id}/asignar-plan"),
                json!({ "plan_id": plan_id }),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);

        let send_uri = format!("/pacientes/{paciente_id}/planes/{plan_id}/enviar-correo");
        let response = app
            .clone()
            .oneshot(json_request(Method::POST, &send_uri, json!({})))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "El paciente no tiene correo electrónico registrado");

        // Register the address and retry.
        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                &format!("/pacientes/{paciente_id}"),
                sample_patient_body("CC-1001", Some("ana.garcia@example.com")),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(json_request(Method::POST, &send_uri, json!({})))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let receipt = body_json(response).await;
        assert_eq!(receipt["message"], "Plan de tratamiento enviado");
        assert_eq!(receipt["destinatario"], "ana.garcia@example.com");

        let sent = notifier.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ana.garcia@example.com");
        assert_eq!(sent[0].1, "Plan de tratamiento: Reposo");
    }

    #[tokio::test]
    async fn test_send_unassigned_plan_is_not_found() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/pacientes",
                sample_patient_body("CC-1001", Some("ana@example.com")),
            ))
            .await
            .expect("request");
        let paciente_id = body_json(response).await["id"].as_i64().expect("id");

        let response = app
            .oneshot(json_request(
                Method::POST,
                &format!("/pacientes/{paciente_id}/planes/999/enviar-correo"),
                json!({}),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "El plan no está asignado al paciente");
    }

    #[tokio::test]
    async fn test_medication_deactivation_and_statistics() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/medicamentos",
                json!({
                    "nombre": "Acetaminofén",
                    "stock_actual": 2,
                    "stock_minimo": 10,
                    "precio_unitario": 1200.50,
                }),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let id = body_json(response).await["id"].as_i64().expect("id");

        let response = app
            .clone()
            .oneshot(get_request("/medicamentos-estadisticas"))
            .await
            .expect("request");
        let stats = body_json(response).await;
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["stock_bajo"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri(format!("/medicamentos/{id}"))
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Medicamento desactivado");
        assert_eq!(body["medicamento"]["activo"], false);

        // Hidden from listings, still retrievable by id.
        let response = app
            .clone()
            .oneshot(get_request("/medicamentos"))
            .await
            .expect("request");
        let listed = body_json(response).await;
        assert!(listed.as_array().expect("array").is_empty());

        let response = app
            .oneshot(get_request(&format!("/medicamentos/{id}")))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_low_stock_query_filter() {
        let (app, _) = test_app();

        for (nombre, stock) in [("Acetaminofén", 50), ("Amoxicilina", 2)] {
            let response = app
                .clone()
                .oneshot(json_request(
                    Method::POST,
                    "/medicamentos",
                    json!({
                        "nombre": nombre,
                        "stock_actual": stock,
                        "stock_minimo": 10,
                        "precio_unitario": 900.0,
                    }),
                ))
                .await
                .expect("request");
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(get_request("/medicamentos?stock_bajo=true"))
            .await
            .expect("request");
        let listed = body_json(response).await;
        let names: Vec<_> = listed
            .as_array()
            .expect("array")
            .iter()
            .map(|m| m["nombre"].as_str().expect("nombre"))
            .collect();
        assert_eq!(names, ["Amoxicilina"]);
    }

    #[tokio::test]
    async fn test_set_stock_via_patch() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/medicamentos",
                json!({
                    "nombre": "Acetaminofén",
                    "stock_actual": 50,
                    "stock_minimo": 10,
                    "precio_unitario": 1200.50,
                }),
            ))
            .await
            .expect("request");
        let id = body_json(response).await["id"].as_i64().expect("id");

        let response = app
            .oneshot(json_request(
                Method::PATCH,
                &format!("/medicamentos/{id}/stock"),
                json!({ "stock_actual": 7 }),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["stock_actual"], 7);
    }
}
