use std::path::PathBuf;

/// The runctl debugger.
#[derive(clap::Parser)]
pub struct CliOpts {
    /// The command to run.
    #[clap(subcommand)]
    pub action: CliAction,
}

/// The command to run.
#[derive(clap::Subcommand)]
pub enum CliAction {
    /// Command to load a program image and drive it with a command script.
    Run {
        /// Session configuration (KDL format).
        ///
        /// If it ends with `.kdl`, it is treated as a path to a configuration
        /// file for the session. Otherwise it is directly parsed as inline
        /// KDL-formatted configuration.
        #[clap(short, long, value_name = "CONTENT/PATH")]
        config: Option<String>,

        /// Path to the command script.
        ///
        /// Commands are read from the standard input if omitted.
        #[clap(short, long, value_name = "PATH")]
        script: Option<PathBuf>,

        /// Path to the program image.
        image: PathBuf,
    },

    /// Command to dump the line table of a program image.
    Lines {
        /// Path to the program image.
        image: PathBuf,
    },
}

impl CliOpts {
    /// Parses the CLI from the command-line.
    ///
    /// # Warning
    ///
    /// Exits on error.
    pub fn parse_from_cmdline() -> Self {
        <Self as clap::Parser>::parse()
    }
}
