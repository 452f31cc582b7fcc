#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgrag_daemon::start().await
}
