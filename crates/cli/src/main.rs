use std::process::ExitCode;

fn main() -> ExitCode {
    relaydesk_cli::run()
}
