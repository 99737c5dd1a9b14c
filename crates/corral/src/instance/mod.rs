//! Instance bookkeeping.

mod record;
mod registrar;
mod store;

pub use record::{InstanceFile, InstanceRecord};
pub use registrar::Registrar;
pub use store::InstanceStore;
