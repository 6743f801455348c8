use anyhow::Result;
use browser_pilot::{Agent, AgentConfig, Browser, BrowserConfig, LlmConfig};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let browser = Browser::launch(BrowserConfig::default()).await?;
    let agent = Agent::new(browser, AgentConfig::default(), LlmConfig::default());

    println!("Browser is up. Describe a task on one line (exit to quit).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else { break };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if task.eq_ignore_ascii_case("exit") || task.eq_ignore_ascii_case("quit") {
            println!("Bye!");
            break;
        }
        match agent.run(task).await {
            Ok(report) => match report.answer {
                Some(answer) => println!("\n{answer}"),
                None => println!("\nDone in {} steps.", report.steps.len()),
            },
            Err(err) => println!("Task failed: {err}"),
        }
    }
    Ok(())
}
