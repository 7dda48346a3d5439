use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use runctl_control::primitive::{Platform, Spawned};
use tokio::sync::mpsc;

use crate::image::Image;
use crate::machine::Machine;
use crate::session::Session;

/// Default duration of an emulator tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

/// Execution primitive running emulated program images.
///
/// The ID of the main thread of a spawned process is the process ID.
#[derive(Debug, Clone)]
pub struct Emulator {
    tick: Duration,
    next_pid: u64,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

impl Emulator {
    /// Creates a new emulator, running one instruction per thread every
    /// `tick`.
    ///
    /// A zero tick runs the threads as fast as the runtime allows.
    pub const fn new(tick: Duration) -> Self {
        Self {
            tick,
            next_pid: 4001,
        }
    }

    /// Returns the duration of a tick.
    pub const fn tick(&self) -> Duration {
        self.tick
    }
}

impl Platform for Emulator {
    type Image = Image;
    type Session = Session;
    type Error = crate::Error;

    async fn load(&mut self, path: &Path) -> Result<Self::Image, Self::Error> {
        Image::load(path).await
    }

    #[tracing::instrument(name = "Spawn", skip_all)]
    async fn spawn(&mut self, image: Arc<Self::Image>) -> Result<Spawned<Self::Session>, Self::Error> {
        let pid = self.next_pid;

        let (tx, events) = mpsc::unbounded_channel();

        let machine = Machine::new(pid, image, tx)?;
        let threads = machine.halted_threads();

        self.next_pid += 1;

        tracing::debug!(pid, "process spawned");

        Ok(Spawned {
            session: Session::start(pid, machine, self.tick),
            events,
            threads,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use runctl_control::primitive::{
        ExecutionSession, ExitStatus, Platform, ResumeRequest, StopCause, TargetEvent,
    };
    use test_log::test;

    use super::Emulator;
    use crate::Error;

    const WAIT: Duration = Duration::from_secs(5);

    #[test(tokio::test)]
    async fn spawn_and_run() {
        let mut file = tempfile::Builder::new()
            .suffix(".kdl")
            .tempfile()
            .expect("tempfile");

        file.write_all(
            indoc::indoc! {r#"
                function "main" file="main.c" {
                    nop line=3
                    nop line=4
                    exit 7 line=5
                }
            "#}
            .as_bytes(),
        )
        .expect("write image");

        let mut emulator = Emulator::new(Duration::ZERO);
        let image = Arc::new(emulator.load(file.path()).await.expect("load image"));

        let mut first = emulator.spawn(image.clone()).await.expect("spawn");
        let second = emulator.spawn(image).await.expect("spawn");

        assert_eq!(first.session.process_id(), 4001);
        assert_eq!(second.session.process_id(), 4002);
        assert_eq!(first.threads.len(), 1);
        assert_eq!(first.threads[0].id, 4001);
        assert_eq!(first.threads[0].pc, 0x1000);

        let resume = [ResumeRequest {
            thread_id: 4001,
            signal: None,
        }];

        first.session.add_breakpoint(0x1004).expect("add breakpoint");
        first.session.resume(&resume).expect("resume");

        let event = tokio::time::timeout(WAIT, first.events.recv())
            .await
            .expect("event before timeout")
            .expect("open event stream");
        assert!(matches!(
            event,
            TargetEvent::Stopped {
                thread_id: 4001,
                cause: StopCause::Breakpoint,
                ..
            }
        ));

        first.session.resume(&resume).expect("resume");

        let event = tokio::time::timeout(WAIT, first.events.recv())
            .await
            .expect("event before timeout")
            .expect("open event stream");
        assert_eq!(event, TargetEvent::Exited(ExitStatus::ExitCode(7)));

        // the second process never ran
        assert!(second.threads.iter().all(|t| t.pc == 0x1000));
    }

    #[test(tokio::test)]
    async fn load_missing_image() {
        let res = Emulator::default()
            .load(Path::new("/nonexistent/image.kdl"))
            .await;

        assert!(matches!(res, Err(Error::File(..))));
    }
}
