use clap::Parser;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Process a JSON record batch from stdin and print the identifiers of
    /// records that must be returned to the queue.
    Batch,
    /// Continuously receive from the queue and delete handled messages.
    Poll,
    /// Periodically scan the source bucket for unprocessed log files.
    Scan,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::Batch => "batch",
            Mode::Poll => "poll",
            Mode::Scan => "scan",
        })
    }
}

#[derive(Parser, Debug)]
#[command(name = "worker", about = "Multi-tenant log delivery worker", version)]
pub struct Opts {
    /// Execution mode.
    #[arg(long, value_enum, default_value_t = Mode::Poll)]
    pub mode: Mode,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[test]
    fn defaults_to_poll_mode() {
        let opts = Opts::parse_from(["worker"]);
        assert_eq!(opts.mode, Mode::Poll);
    }

    #[test]
    fn parses_every_mode() {
        for (flag, expected) in [
            ("batch", Mode::Batch),
            ("poll", Mode::Poll),
            ("scan", Mode::Scan),
        ] {
            let opts = Opts::parse_from(["worker", "--mode", flag]);
            assert_eq!(opts.mode, expected);
        }
    }
}
