use clap::Parser;
use std::io::Write;
use std::path::Path;
use tracing::{error, info};

use genie_nlq::config::{CliArgs, GenieConfig};
use genie_nlq::genie::{GenieClient, QueryRequest};
use genie_nlq::util::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match GenieConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let question = match &args.query {
        Some(question) => question.clone(),
        None => prompt_for_query()?,
    };
    if question.is_empty() {
        error!("No query provided");
        return Err("a natural-language query is required".into());
    }

    info!(instance = %config.databricks_instance, space = %config.genie_space_id, "querying Genie");
    let client = GenieClient::new(&config)?;
    let request = QueryRequest {
        natural_language_query: question,
        conversation_id: args.conversation_id.clone(),
        fetch_query_results: args.fetch_results,
        polling_interval_seconds: args.poll_interval,
        polling_timeout_seconds: args.poll_timeout,
    };

    let report = client.execute(&request).await;
    println!("{}", report);

    if let Some(path) = &args.output {
        write_report_file(path, &request.natural_language_query, &report)?;
        info!(path = %path.display(), "report written");
    }

    Ok(())
}

fn prompt_for_query() -> std::io::Result<String> {
    print!("Enter your query: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn write_report_file(path: &Path, question: &str, report: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let date = chrono::Local::now().format("%Y-%m-%d");
    let contents = format!(
        "# Genie query report ({})\n\nQuery: {}\n\n```text\n{}\n```\n",
        date, question, report
    );
    std::fs::write(path, contents)
}
