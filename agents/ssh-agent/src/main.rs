//! Binary entry point for the Loee SSH agent daemon. All real logic
//! lives in the library crate; this is deliberately thin.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    loee_ssh_agent::run_agent().await
}
