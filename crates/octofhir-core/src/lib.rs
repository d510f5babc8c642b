pub mod error;
pub mod fhir;
pub mod id;
pub mod summary;
pub mod time;

pub use error::{CoreError, Result};
pub use fhir::{ResourceType, SUPPORTED_RESOURCE_TYPES};
pub use id::validate_patient_id;
pub use summary::{FetchState, FetchStatus, FetchSummary};
pub use time::{DateRange, fhir_date, parse_fhir_date};
