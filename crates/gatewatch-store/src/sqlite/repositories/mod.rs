//! Stateless repositories, one per table. Every method takes a
//! `&Connection` so callers control transaction scope.

pub mod admission;
pub mod checkpoint;
pub mod device;
pub mod subject;

pub use admission::{AdmissionRepo, EnrichUpdate, InsertOutcome, NewAdmission};
pub use checkpoint::CheckpointRepo;
pub use device::DeviceRepo;
pub use subject::SubjectRepo;
