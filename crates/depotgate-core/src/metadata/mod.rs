//! Metadata store: durable records of artifact pointers, deliverable
//! contracts, requirement marks, and shipment manifests.
//!
//! Backed by `SQLite` in WAL mode behind a mutex-guarded connection. All
//! writes are transactional; the single shipping transaction
//! ([`MetadataStore::commit_shipment`]) groups the deliverable status CAS
//! and the manifest insert so a manifest is persisted iff its deliverable
//! transitioned to `shipped`.
//!
//! Terminal-status transitions are compare-and-swap on `status =
//! 'declared'`, never a lock: a transition that affects zero rows lost the
//! race.

mod store;


pub use store::MetadataStore;
