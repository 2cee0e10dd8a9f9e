mod exit;
mod logging;

use clap::Parser;
use serbridge_channel::{ConsoleIn, ConsoleOut, SystemSerial};
use serbridge_engine::Session;
use tracing::{debug, error};

use crate::exit::{engine_error, SUCCESS};
use crate::logging::{init_logging, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "serbridge", version, about = "Serial bridge with a Modbus RTU engine")]
struct Cli {
    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Command buffers. Only the first is executed; later ones merely tag
    /// the process on a crowded command line.
    #[arg(value_name = "COMMANDS")]
    commands: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    for ignored in cli.commands.iter().skip(1) {
        debug!(%ignored, "ignoring extra launch argument");
    }

    let mut session = Session::new(ConsoleIn::stdin(), ConsoleOut::stdout(), SystemSerial);
    let result = session.run(cli.commands.first().map(|s| s.as_bytes()));

    // The engine surfaces fatal conditions as errors; OS-level cleanup and
    // termination happen here, keeping the core testable in-process.
    session.shutdown();

    match result {
        Ok(()) => std::process::exit(SUCCESS),
        Err(err) => {
            let err = engine_error("session failed", err);
            error!("{err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_buffer_arguments() {
        let cli = Cli::try_parse_from(["serbridge", "ottyUSB0,9600,8N1lr", "ident-tag"])
            .expect("launch arguments should parse");
        assert_eq!(cli.commands.len(), 2);
        assert_eq!(cli.commands[0], "ottyUSB0,9600,8N1lr");
    }

    #[test]
    fn parses_log_flags() {
        let cli = Cli::try_parse_from(["serbridge", "--log-level", "debug", "--log-format", "json"])
            .expect("log flags should parse");
        assert!(matches!(cli.log_level, LogLevel::Debug));
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(cli.commands.is_empty());
    }

    #[test]
    fn rejects_unknown_flags() {
        let err = Cli::try_parse_from(["serbridge", "--format", "json"])
            .expect_err("unknown flag should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
