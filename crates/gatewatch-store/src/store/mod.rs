//! High-level store facade.

pub mod admission_store;

pub use admission_store::AdmissionStore;
