use std::sync::{Arc, Mutex, MutexGuard};

use amethyst_rpc::protocol::DriverService;
use amethyst_rpc::{TrackerResult, TrackerRole, TrackerState, TrackerUpdate};
use tracing::info;

use crate::host::DriverHost;
use crate::tracker::{log_failure, TrackerTable};

/// Serves the tracker methods against a [`TrackerTable`] and a VR runtime.
pub struct TrackerDriver<H: DriverHost> {
    host: Arc<H>,
    table: Mutex<TrackerTable>,
}

impl<H: DriverHost> TrackerDriver<H> {
    pub fn new(host: Arc<H>, roles: &[TrackerRole]) -> Self {
        Self {
            host,
            table: Mutex::new(TrackerTable::new(roles)),
        }
    }

    fn table(&self) -> MutexGuard<'_, TrackerTable> {
        match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Pushes every spawned tracker's pose to the runtime.
    pub fn run_frame(&self) -> usize {
        self.table().run_frame(self.host.as_ref())
    }

    /// Copy of the current table, for diagnostics.
    pub fn snapshot(&self) -> TrackerTable {
        self.table().clone()
    }
}

impl<H: DriverHost> DriverService for TrackerDriver<H> {
    fn set_tracker_states(&self, states: Vec<TrackerState>) -> Vec<TrackerResult> {
        let mut table = self.table();
        states
            .iter()
            .map(|state| {
                let ok = match table.set_state(state, self.host.as_ref()) {
                    Ok(()) => true,
                    Err(e) => {
                        log_failure(state.role, &e);
                        false
                    }
                };
                TrackerResult::new(state.role, ok)
            })
            .collect()
    }

    fn update_trackers(&self, updates: Vec<TrackerUpdate>) -> Vec<TrackerResult> {
        let mut table = self.table();
        updates
            .iter()
            .map(|update| {
                let ok = match table.update(update) {
                    Ok(()) => true,
                    Err(e) => {
                        log_failure(update.role, &e);
                        false
                    }
                };
                TrackerResult::new(update.role, ok)
            })
            .collect()
    }

    fn request_vr_restart(&self, reason: &str) -> bool {
        info!("requesting VR restart: {}", reason);
        self.host.request_restart(reason);
        true
    }
}
