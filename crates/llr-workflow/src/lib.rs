//! Transaction workflow engine for the land registry.
//!
//! Owns the BuyRequest entity and its allowed transitions:
//!
//! ```text
//! create ──► PENDING_SELLER_CONFIRMATION ──confirm(code)──► PENDING_ADMIN_APPROVAL
//!                      │                                        │         │
//!                      │                                    approve     reject
//!                      │                                        │         │
//!                      │                                        ▼         ▼
//!                      │                        APPROVED ──► COMPLETED  REJECTED
//!                      └────────────── cancel ──► CANCELLED
//! ```
//!
//! Every transition is guarded by a compare-and-set on `status` at the store
//! layer; a transition whose precondition state no longer matches receives an
//! explicit `WrongState` refusal, never a lost update. Every successful
//! transition appends exactly one timeline entry before returning.

pub mod adjudication;
pub mod engine;
pub mod error;
pub mod memory;
pub mod store;
pub mod traits;

pub use engine::WorkflowEngine;
pub use error::WorkflowError;
pub use memory::MemoryStore;
pub use store::{RegistryStore, StoreError};
pub use traits::{Directory, Notifier};
