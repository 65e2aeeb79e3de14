use std::process::ExitCode;

use sync_patterns::{demo, logging};

fn main() -> ExitCode {
    logging::init();

    let scenarios: [(&str, fn() -> sync_patterns::Result<()>); 4] = [
        ("race_condition", demo::race_condition),
        ("producer_consumer", demo::producer_consumer),
        ("dining_philosophers", demo::dining_philosophers),
        ("thread_pool", demo::thread_pool),
    ];

    let mut code = ExitCode::SUCCESS;
    for (name, scenario) in scenarios {
        if let Err(err) = scenario() {
            tracing::error!(scenario = name, %err, "scenario failed");
            code = ExitCode::FAILURE;
        }
        println!();
    }
    code
}
