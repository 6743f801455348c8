use anyhow::Result;
use browser_pilot::{Agent, AgentConfig, Browser, BrowserConfig, LlmConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let task = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let task = if task.trim().is_empty() {
        "открой входящие и прочитай письмо".to_string()
    } else {
        task
    };

    let browser = Browser::launch(BrowserConfig { headless: false, ..Default::default() }).await?;
    let agent = Agent::new(browser, AgentConfig::default(), LlmConfig::default());
    let report = agent.run(&task).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
