// ============================================================================
// READER SERVICES
// ============================================================================
pub mod debounce;
pub mod job_dispatcher;
pub mod store_service;

pub use debounce::DebounceGate;
pub use job_dispatcher::{DispatchOutcome, ExternalCommandRunner, JobDispatcher, JobReport, JobRunner, SlotReservation};
pub use store_service::{ReceiptRow, ReceiptStats, ReceiptStore, StoreCount};
