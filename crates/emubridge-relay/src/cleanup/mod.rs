//! Session teardown: local release plus a best-effort backend notice.

mod coordinator;
mod delivery;

pub use coordinator::{CleanupCoordinator, CleanupTrigger, LocalRelease};
pub use delivery::{
    Beacon, CleanupRequest, CleanupSender, DeliveryError, DeliveryPath, deliver_best_effort,
};
