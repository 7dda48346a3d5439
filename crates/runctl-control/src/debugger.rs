use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use crate::breakpoint::{Breakpoint, BreakpointId, BreakpointRegistry};
use crate::error::{Error, Result};
use crate::event::ControlMode;
use crate::primitive::Platform;
use crate::process::{Process, ProcessSnapshot, ProcessState, lock};

/// Debugger entry point, creating targets and launching processes.
pub struct Debugger<P: Platform> {
    platform: P,
    mode: ControlMode,
}

impl<P: Platform> Debugger<P> {
    /// Creates a new debugger driving the given execution primitive.
    pub const fn new(platform: P) -> Self {
        Self {
            platform,
            mode: ControlMode::Synchronous,
        }
    }

    /// Returns the control mode of newly launched processes.
    pub const fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Sets the control mode of newly launched processes.
    pub fn set_mode(&mut self, mode: ControlMode) {
        self.mode = mode;
    }

    /// Loads an executable into a new target.
    #[tracing::instrument(name = "CreateTarget", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn create_target(&mut self, path: impl AsRef<Path>) -> Result<Target<P>, P::Error> {
        let path = path.as_ref();

        let image = self
            .platform
            .load(path)
            .await
            .map_err(|source| Error::Launch {
                path: path.to_owned(),
                source,
            })?;

        tracing::info!("target created");

        Ok(Target {
            path: path.to_owned(),
            image: Arc::new(image),
            registry: Arc::new(Mutex::new(BreakpointRegistry::new())),
            processes: Vec::new(),
        })
    }

    /// Launches a process from the given target.
    ///
    /// The process starts stopped at its entry point, with every enabled
    /// breakpoint of the target installed. A target runs a single live
    /// process at a time.
    #[tracing::instrument(name = "Launch", skip_all, fields(path = %target.path.display()))]
    pub async fn launch(&mut self, target: &mut Target<P>) -> Result<Process<P::Session>, P::Error> {
        target.check_idle("launch")?;

        lock(&target.registry).resolve_all(&*target.image);

        let spawned = self
            .platform
            .spawn(target.image.clone())
            .await
            .map_err(|source| Error::Launch {
                path: target.path.clone(),
                source,
            })?;

        let process = Process::start(
            spawned,
            target.path.clone(),
            target.registry.clone(),
            target.image.clone(),
            self.mode,
        )?;

        target.processes.retain(Launched::is_live);
        target.processes.push(Launched {
            lease: process.lease(),
            state: process.subscribe(),
        });

        tracing::info!(pid = process.pid(), "process launched");

        Ok(process)
    }

    /// Creates a target from the given executable, and launches it without
    /// any breakpoint.
    pub async fn launch_path(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<(Target<P>, Process<P::Session>), P::Error> {
        let mut target = self.create_target(path).await?;
        let process = self.launch(&mut target).await?;

        Ok((target, process))
    }
}

/// Loaded executable, along with its breakpoints.
///
/// Breakpoints set on a target are installed in every process later launched
/// from it. While such a process is live, its breakpoints are edited through
/// the [Process] instead.
pub struct Target<P: Platform> {
    path: PathBuf,
    image: Arc<P::Image>,
    registry: Arc<Mutex<BreakpointRegistry>>,

    /// Processes launched from this target.
    processes: Vec<Launched>,
}

/// Handle on a launched process, which does not keep it alive.
struct Launched {
    lease: Weak<()>,
    state: watch::Receiver<ProcessSnapshot>,
}

impl Launched {
    /// Returns the state of the process, unless it has exited or was
    /// dropped.
    fn live_state(&self) -> Option<ProcessState> {
        if self.lease.strong_count() == 0 {
            return None;
        }

        let state = self.state.borrow().state();
        (state != ProcessState::Exited).then_some(state)
    }

    fn is_live(&self) -> bool {
        self.live_state().is_some()
    }
}

impl<P: Platform> Target<P> {
    /// Returns the path of the executable.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the loaded image.
    pub fn image(&self) -> &P::Image {
        &self.image
    }

    /// Adds a breakpoint on a source line.
    ///
    /// The breakpoint is added even if it resolves to no location.
    pub fn set_breakpoint(&mut self, file: &str, line: u32) -> Result<Breakpoint, P::Error> {
        self.check_idle("set a target breakpoint")?;

        Ok(lock(&self.registry)
            .add(file, line, &*self.image)
            .clone())
    }

    /// Checks that a breakpoint resolved to exactly `expected` locations.
    pub fn expect_locations(&self, id: BreakpointId, expected: usize) -> Result<(), P::Error> {
        lock(&self.registry)
            .expect_locations(id, expected)
            .ok_or(Error::UnknownBreakpoint(id))??;

        Ok(())
    }

    /// Removes a breakpoint.
    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<Breakpoint, P::Error> {
        self.check_idle("remove a target breakpoint")?;

        lock(&self.registry)
            .remove(id)
            .ok_or(Error::UnknownBreakpoint(id))
    }

    /// Enables or disables a breakpoint.
    pub fn set_breakpoint_enabled(
        &mut self,
        id: BreakpointId,
        enabled: bool,
    ) -> Result<(), P::Error> {
        self.check_idle("toggle a target breakpoint")?;

        lock(&self.registry)
            .set_enabled(id, enabled)
            .ok_or(Error::UnknownBreakpoint(id))?;

        Ok(())
    }

    /// Returns the breakpoints, in creation order.
    pub fn list_breakpoints(&self) -> Vec<Breakpoint> {
        lock(&self.registry).iter().cloned().collect()
    }

    /// Fails if a process launched from this target is still live.
    fn check_idle(&self, operation: &'static str) -> Result<(), P::Error> {
        match self.processes.iter().find_map(Launched::live_state) {
            Some(state) => Err(Error::InvalidState { operation, state }),
            None => Ok(()),
        }
    }
}
