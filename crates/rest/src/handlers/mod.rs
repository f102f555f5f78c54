//! HTTP request handlers.
//!
//! - [`health`] - Health and liveness probes
//! - [`tenant`] - The context a request resolved to
//! - [`auth`] - Staff login
//! - [`patients`] - Patient records of the resolved tenant
//! - [`staff`] - Staff accounts of the resolved tenant

pub mod auth;
pub mod health;
pub mod patients;
pub mod staff;
pub mod tenant;

pub use auth::login_handler;
pub use health::{health_handler, liveness_handler};
pub use patients::{
    create_patient_handler, delete_patient_handler, get_patient_handler, search_patients_handler,
    update_patient_handler,
};
pub use staff::{
    create_staff_handler, delete_staff_handler, get_staff_handler, list_staff_handler,
    update_staff_handler,
};
pub use tenant::current_tenant_handler;
