use std::io::Write;
use std::time::Duration;

use runctl_control::{Debugger, Process, Target};
use runctl_emulator::{Emulator, Session};

/// Upper bound for the asynchronous waits of the tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Program with two breakpoint lines around a spin loop on `g_test`.
pub const THREAD_STATES: &str = indoc::indoc! {r#"
    global "g_test" 0

    function "main" file="main.c" {
        nop line=5
        nop line=7
        spin-until "g_test" 1 line=9
        nop line=11
        exit 0 line=13
    }
"#};

/// Program whose worker thread blocks until `g_go` is set.
pub const WORKER: &str = indoc::indoc! {r#"
    global "g_go" 0
    global "g_count" 0

    function "main" file="main.c" {
        spawn "worker" line=3
        nop line=4
        spin-until "g_go" 1 line=5
        exit 0 line=6
    }

    function "worker" file="worker.c" {
        add "g_count" 1 line=10
        spin-until "g_go" 1 line=11
        ret line=12
    }
"#};

/// Program raising a signal right away.
pub const RAISE: &str = indoc::indoc! {r#"
    function "main" file="main.c" {
        raise "SIGUSR1" line=3
        nop line=4
    }
"#};

pub fn write_image(content: &str) -> tempfile::TempPath {
    let mut file = tempfile::Builder::new()
        .suffix(".kdl")
        .tempfile()
        .expect("tempfile");

    file.write_all(content.as_bytes()).expect("write image");

    file.into_temp_path()
}

pub async fn create_target(content: &str) -> (Debugger<Emulator>, Target<Emulator>, tempfile::TempPath) {
    let path = write_image(content);

    let mut debugger = Debugger::new(Emulator::default());
    let target = debugger.create_target(&path).await.expect("create target");

    (debugger, target, path)
}

pub async fn launch(content: &str) -> (Process<Session>, tempfile::TempPath) {
    let (mut debugger, mut target, path) = create_target(content).await;
    let process = debugger.launch(&mut target).await.expect("launch");

    (process, path)
}
