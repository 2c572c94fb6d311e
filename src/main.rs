// Market pipeline service entry point

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    resale_market_pipeline::run().await?;
    Ok(())
}
