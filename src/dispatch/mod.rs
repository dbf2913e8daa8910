//! Viewer admission and delivery worker dispatch
//!
//! Accepted viewer connections enter a bounded [`AdmissionQueue`]. A single
//! [`Dispatcher`] task drains it, claims a free entry in the fixed-size
//! [`SlotTable`] and spawns a delivery worker bound to that slot. When no slot
//! is free the connection is closed immediately; pending viewers never
//! accumulate.
//!
//! ```text
//!  submit() ──► AdmissionQueue (cap = max viewers) ──► Dispatcher
//!                                                         │ claim()
//!                                                         ▼
//!                                              SlotTable [0][1]..[n-1]
//!                                                         │ spawn
//!                                                         ▼
//!                                              DeliveryHandler::deliver()
//!                                                         │ exit
//!                                                         ▼
//!                                              SlotLease drop ──► release()
//! ```

pub mod client;
pub mod dispatcher;
pub mod queue;
pub mod slots;
pub mod worker;

pub use client::ClientHandle;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use queue::{admission_queue, AdmissionQueue, AdmissionReceiver, SubmitError};
pub use slots::{SlotClaim, SlotEntry, SlotLease, SlotTable};
pub use worker::{
    DeliveryHandler, RuntimeSpawner, SpawnError, WorkerContext, WorkerSpawner, WorkerTask,
};
