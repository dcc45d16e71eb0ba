/// The VR runtime as seen from the plugin.
///
/// Lifecycle and polling calls are made while the bridge holds its state
/// lock. [`request_restart`](Self::request_restart) is the exception: it
/// runs on the driver session's handler task without that lock, so it may
/// overlap any of the others.
pub trait VrHost: Send + Sync + 'static {
    /// Starts (or confirms) the VR runtime. `false` means it is not usable.
    fn start_vr(&self) -> bool;

    fn start_input_actions(&self) -> bool;

    /// Per-heartbeat work: input bindings and runtime events.
    fn poll_input(&self);

    /// Restart request that arrived from the driver. Called without the
    /// bridge lock.
    fn request_restart(&self, reason: &str) -> bool;

    fn shutdown_vr(&self);
}
