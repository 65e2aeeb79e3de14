use std::process::ExitCode;

use sync_patterns::{demo, logging};

fn main() -> ExitCode {
    logging::init();
    match demo::dining_philosophers() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "dining_philosophers failed");
            ExitCode::FAILURE
        }
    }
}
