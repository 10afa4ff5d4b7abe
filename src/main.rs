#[tokio::main]
async fn main() -> anyhow::Result<()> {
    event_agent::run().await
}
