//! Side effects attached to appointment confirmation.

use std::sync::Arc;

use tracing::info;

use torque_scheduling::Appointment;

use crate::external::{CollaboratorError, IdentityDirectory};

/// Runs after an appointment has been confirmed.
///
/// Failures are reported to the caller, which logs them; they never undo the
/// confirmation.
pub trait ConfirmationHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_confirmed(&self, appointment: &Appointment) -> Result<(), CollaboratorError>;
}

/// Provisions customer portal credentials when the customer has none yet.
pub struct PortalAccessHook {
    directory: Arc<dyn IdentityDirectory>,
}

impl PortalAccessHook {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }
}

impl ConfirmationHook for PortalAccessHook {
    fn name(&self) -> &'static str {
        "portal_access"
    }

    fn on_confirmed(&self, appointment: &Appointment) -> Result<(), CollaboratorError> {
        let customer_id = appointment.customer_id();
        if self.directory.has_portal_access(customer_id)? {
            return Ok(());
        }
        self.directory.provision_portal_access(customer_id)?;
        info!(customer_id = %customer_id, "portal access provisioned");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl ConfirmationHook for NoopHook {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn on_confirmed(&self, _appointment: &Appointment) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
