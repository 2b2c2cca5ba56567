//! Peer credential to role mapping

use spadesk_api::ClientRole;

/// Which local users get which dashboard role
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    /// UID the service runs as; always treated as a manager
    pub service_uid: u32,
    pub manager_uids: Vec<u32>,
    pub observer_uids: Vec<u32>,
}

impl RolePolicy {
    /// Policy for the current process
    pub fn for_current_user(manager_uids: Vec<u32>, observer_uids: Vec<u32>) -> Self {
        Self {
            service_uid: nix::unistd::getuid().as_raw(),
            manager_uids,
            observer_uids,
        }
    }

    /// Role for a peer. Unknown local users run the front desk; a peer whose
    /// credentials cannot be read only gets to watch.
    pub fn role_for(&self, uid: Option<u32>) -> ClientRole {
        match uid {
            Some(0) => ClientRole::Manager,
            Some(u) if u == self.service_uid => ClientRole::Manager,
            Some(u) if self.observer_uids.contains(&u) => ClientRole::Observer,
            Some(u) if self.manager_uids.contains(&u) => ClientRole::Manager,
            Some(_) => ClientRole::Reception,
            None => ClientRole::Observer,
        }
    }
}
