use std::process::ExitCode;

use sync_patterns::{demo, logging};

fn main() -> ExitCode {
    logging::init();
    match demo::thread_pool() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "thread_pool failed");
            ExitCode::FAILURE
        }
    }
}
