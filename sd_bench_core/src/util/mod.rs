mod device;
mod precision;

pub(crate) use device::select_device;
pub use precision::{Precision, TryIntoDType};
