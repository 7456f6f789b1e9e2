//! Message transport seen from the election engine

use crate::error::WardenResult;
use crate::types::HaRole;

/// Role-based traffic registration and role broadcast
///
/// A controller is registered for role-based traffic in every role except
/// `Quiesced`.
pub trait RoleTransport: Send + Sync {
    fn register(&self) -> WardenResult<()>;

    fn unregister(&self) -> WardenResult<()>;

    /// Announce this node's new role to local clients
    fn broadcast_role(&self, role: HaRole);
}
