use std::process::ExitCode;

use sync_patterns::{demo, logging};

fn main() -> ExitCode {
    logging::init();
    match demo::producer_consumer() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "producer_consumer failed");
            ExitCode::FAILURE
        }
    }
}
