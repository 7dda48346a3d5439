use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};

use super::{ProcessSnapshot, lock};
use crate::breakpoint::BreakpointRegistry;
use crate::event::ProcessEvent;
use crate::primitive::{HaltedThread, LineTable, StopCause, TargetEvent};
use crate::thread::StopReason;

/// Task applying the events of the execution primitive onto the process
/// state.
pub(super) struct EventPump {
    pub(super) state: Arc<watch::Sender<ProcessSnapshot>>,
    pub(super) registry: Arc<Mutex<BreakpointRegistry>>,
    pub(super) line_table: Arc<dyn LineTable + Send + Sync>,
    pub(super) notifier: mpsc::UnboundedSender<ProcessEvent>,
}

impl EventPump {
    pub(super) async fn run(self, mut events: mpsc::UnboundedReceiver<TargetEvent>) {
        while let Some(event) = events.recv().await {
            if self.handle(event) {
                return;
            }
        }

        tracing::warn!("event stream closed before the process exited");

        self.publish(|snapshot| {
            snapshot.apply_exit(None);
            Some(ProcessEvent::Exited(None))
        });
    }

    /// Applies a single event.
    ///
    /// Returns whether the process has exited.
    fn handle(&self, event: TargetEvent) -> bool {
        match event {
            TargetEvent::Stopped {
                thread_id,
                cause,
                threads,
            } => {
                let reason = self.stop_reason(thread_id, cause, &threads);

                self.publish(|snapshot| {
                    let Some(thread) =
                        snapshot.apply_stop(thread_id, reason.clone(), &threads, &*self.line_table)
                    else {
                        tracing::warn!(thread_id, "stop reported by an unknown thread");
                        return None;
                    };

                    tracing::info!(thread, %reason, "process stopped");
                    Some(ProcessEvent::Stopped { thread, reason })
                });
            }
            TargetEvent::ThreadCreated { parent_id, thread } => {
                self.publish(|snapshot| {
                    let index = snapshot.apply_thread_created(thread, &*self.line_table);

                    tracing::debug!(parent_id, thread = index, tid = thread.id, "thread created");
                    Some(ProcessEvent::ThreadCreated { thread: index })
                });
            }
            TargetEvent::ThreadExited {
                thread_id,
                exit_code,
            } => {
                self.publish(|snapshot| {
                    let thread = snapshot.apply_thread_exited(thread_id, exit_code)?;

                    tracing::debug!(thread, exit_code, "thread exited");
                    Some(ProcessEvent::ThreadExited { thread, exit_code })
                });
            }
            TargetEvent::Exited(status) => {
                self.publish(|snapshot| {
                    snapshot.apply_exit(Some(status));

                    tracing::info!(?status, "process exited");
                    Some(ProcessEvent::Exited(Some(status)))
                });

                return true;
            }
        }

        false
    }

    fn stop_reason(&self, thread_id: u64, cause: StopCause, threads: &[HaltedThread]) -> StopReason {
        match cause {
            StopCause::Breakpoint => {
                let Some(pc) = threads.iter().find(|t| t.id == thread_id).map(|t| t.pc) else {
                    return StopReason::Other("trap".to_owned());
                };

                let mut registry = lock(&self.registry);

                match registry.find_by_addr(pc) {
                    Some((id, location)) => {
                        registry.register_hit(id);
                        StopReason::Breakpoint { id, location }
                    }
                    None => StopReason::Other(format!("trap at {pc:#x}")),
                }
            }
            StopCause::Signal(signal) => StopReason::Signal(signal),
            StopCause::Trace => StopReason::Trace,
        }
    }

    /// Applies a state change, and queues the resulting event.
    ///
    /// The event is queued before the new state is visible, so a caller
    /// woken up by the new state always finds the event.
    fn publish(&self, apply: impl FnOnce(&mut ProcessSnapshot) -> Option<ProcessEvent>) {
        self.state.send_if_modified(|snapshot| {
            let Some(event) = apply(snapshot) else {
                return false;
            };

            // the receiving end lives as long as the process
            let _ = self.notifier.send(event);
            true
        });
    }
}
