#![allow(non_snake_case)]

use std::process::ExitCode;

use bookingSync::{cli, runtime};

#[tokio::main]
async fn main() -> ExitCode {
    runtime::init_tracing();
    cli::cli().await
}
