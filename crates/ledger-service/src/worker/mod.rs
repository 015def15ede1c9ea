pub mod accrual_reconciler;

pub use accrual_reconciler::{AccrualReconciler, CycleReport};
