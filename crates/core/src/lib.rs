//! # Urgencias Core
//!
//! Domain services for the emergency-ward backend: patient admission and
//! lifecycle, treatment plan catalog and assignment, append-only clinical
//! history, and the medication inventory. Everything here is transport
//! agnostic; HTTP concerns live in `urgencias-api-rest`.
//!
//! Services share one [`store::Store`] handle and fail with the
//! [`ServiceError`] taxonomy. Outbound mail goes through the
//! [`notifier::Notifier`] seam so transports can be swapped in tests.

pub mod config;
pub mod error;
pub mod history;
pub mod inventory;
pub mod notifier;
pub mod patients;
pub mod plans;
pub mod store;

pub use config::{CoreConfig, SmtpSettings};
pub use error::{ServiceError, ServiceResult};
pub use history::HistoryService;
pub use inventory::InventoryService;
pub use notifier::{DisabledNotifier, Notifier, NotifyError, SmtpNotifier};
pub use patients::PatientService;
pub use plans::PlanService;
pub use store::Store;
