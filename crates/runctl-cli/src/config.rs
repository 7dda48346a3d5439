use std::time::Duration;

use runctl_control::ControlMode;

/// Configuration of a debugging session.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct RunConfig {
    /// Initial control mode.
    #[knus(child, default = ControlMode::Synchronous, unwrap(argument, str))]
    pub mode: ControlMode,

    /// Timeout of the `wait` command, in milliseconds.
    #[knus(child, default = 5000, unwrap(argument))]
    pub wait_timeout_ms: u64,

    /// Duration of an emulator tick, in microseconds.
    #[knus(child, default = 1000, unwrap(argument))]
    pub tick_us: u64,

    /// Breakpoints set before the script runs.
    #[knus(children(name = "break"))]
    pub breakpoints: Vec<BreakpointConfig>,
}

/// Configuration of a breakpoint.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct BreakpointConfig {
    /// Source file of the breakpoint.
    #[knus(argument)]
    pub file: String,

    /// Source line of the breakpoint.
    #[knus(argument)]
    pub line: u32,

    /// Expected number of resolved locations.
    #[knus(property)]
    pub locations: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: ControlMode::Synchronous,
            wait_timeout_ms: 5000,
            tick_us: 1000,
            breakpoints: vec![],
        }
    }
}

impl RunConfig {
    /// Returns the timeout of the `wait` command.
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Returns the duration of an emulator tick.
    pub const fn tick(&self) -> Duration {
        Duration::from_micros(self.tick_us)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use runctl_control::ControlMode;

    use super::{BreakpointConfig, RunConfig};

    #[test]
    fn parse_from_kdl_no_breakpoints() {
        let config = knus::parse::<RunConfig>("<content>", "")
            .map_err(miette::Report::new)
            .expect("parse kdl");

        assert_eq!(config, RunConfig::default());
        assert_eq!(config.wait_timeout(), Duration::from_secs(5));
        assert_eq!(config.tick(), Duration::from_millis(1));

        let config = knus::parse::<RunConfig>(
            "<content>",
            indoc::indoc! {r#"
                mode "async"
                wait-timeout-ms 100
            "#},
        )
        .map_err(miette::Report::new)
        .expect("parse kdl");

        assert_eq!(
            config,
            RunConfig {
                mode: ControlMode::Asynchronous,
                wait_timeout_ms: 100,
                ..RunConfig::default()
            }
        );

        let config = knus::parse::<RunConfig>(
            "<content>",
            indoc::indoc! {r#"
                tick-us 0
            "#},
        )
        .map_err(miette::Report::new)
        .expect("parse kdl");

        assert_eq!(config.tick(), Duration::ZERO);
    }

    #[test]
    fn parse_from_kdl_with_breakpoints() {
        let config = knus::parse::<RunConfig>(
            "<content>",
            indoc::indoc! {r#"
                break "main.c" 7
                break "worker.c" 10 locations=1
            "#},
        )
        .map_err(miette::Report::new)
        .expect("parse kdl");

        assert_eq!(
            config.breakpoints,
            [
                BreakpointConfig {
                    file: "main.c".to_owned(),
                    line: 7,
                    locations: None,
                },
                BreakpointConfig {
                    file: "worker.c".to_owned(),
                    line: 10,
                    locations: Some(1),
                },
            ]
        );
    }

    #[test]
    fn parse_from_kdl_bad_mode() {
        let res = knus::parse::<RunConfig>("<content>", r#"mode "sometimes""#);
        assert!(res.is_err());
    }
}
