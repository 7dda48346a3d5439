#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use runctl_cli::{CliAction, CliOpts};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("RUNCTL_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let res = match cli.action {
        CliAction::Run {
            config,
            script,
            image,
        } => runctl_cli::evaluate_run(config, script, image).map(Some),
        CliAction::Lines { image } => {
            runctl_cli::evaluate_lines(&image, std::io::stdout().lock()).map(|_| None)
        }
    };

    match res {
        Ok(Some(exit_code)) => std::process::exit(exit_code),
        Ok(None) => (),
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}
