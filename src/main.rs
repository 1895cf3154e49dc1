//! authsock-scope - scoped SSH agent proxy with idle auto-shutdown

use clap::Parser;

use authsock_scope::cli::{Cli, ExitCode};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    match cli.execute().await {
        Ok(()) => ExitCode::Success.into(),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from_error(&e).into()
        }
    }
}
