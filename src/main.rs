use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match market_pulse_lib::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("market-pulse: {error}");
            ExitCode::FAILURE
        }
    }
}
