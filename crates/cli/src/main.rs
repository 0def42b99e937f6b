use std::process::ExitCode;

fn main() -> ExitCode {
    claimflow_cli::run()
}
