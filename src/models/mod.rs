pub mod gps;
pub mod violation;
pub mod zone;

pub use gps::{FixPolicy, GpsFix};
pub use violation::{DetectionSource, ViolationRecord};
pub use zone::{Severity, Zone, ZoneId};
