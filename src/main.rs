use std::process::ExitCode;

fn main() -> ExitCode {
    match ob_cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ob_cli::report_failure(&err);
            ExitCode::from(ob_cli::FAILURE_EXIT_CODE)
        }
    }
}
