use std::process::ExitCode;

use sync_patterns::{demo, logging};

fn main() -> ExitCode {
    logging::init();
    match demo::race_condition() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "race_condition failed");
            ExitCode::FAILURE
        }
    }
}
