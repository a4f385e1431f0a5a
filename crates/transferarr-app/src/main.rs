#![forbid(unsafe_code)]

//! Binary entrypoint: wires the Transferarr services together and runs the
//! reconciliation loop until shutdown.

use std::error::Error;

use transferarr_app::run_app;

#[tokio::main]
async fn main() {
    if let Err(err) = run_app().await {
        eprintln!("transferarr: {err}");
        let mut source = err.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(err.exit_code());
    }
}
