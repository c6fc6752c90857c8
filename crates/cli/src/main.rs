use std::process::ExitCode;

fn main() -> ExitCode {
    opsflow_cli::run()
}
