//! Development harness: loads a fixture receipt and a store config
//! directory, runs one workflow invocation, and prints the resulting
//! artifact bundle. Not the HTTP surface — that is out of scope.

mod dependency;
mod fixture;

use clap::Parser;
use receipt_app::{process_receipt, CancellationToken};
use receipt_core::store_config::StoreConfigRegistry;
use receipt_shared::config::Settings;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(about = "Runs one receipt through the staged OCR/LLM workflow against a JSON fixture")]
struct Args {
    /// Path to a demo fixture JSON document (see `fixture::DemoFixture`).
    #[arg(short, long)]
    fixture: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let settings = Settings::from_env();
    settings.ensure_output_dirs()?;

    let store_configs = Arc::new(StoreConfigRegistry::load_from_dir(&settings.store_config_dir)?);
    let demo_fixture = fixture::DemoFixture::load(&args.fixture)?;
    let services = dependency::build_services(&demo_fixture, store_configs, settings.ocr_text_budget_chars, settings.rate_limit_max_requests);

    let upload = demo_fixture.upload();
    let outcome = process_receipt(&services, &settings, upload, &CancellationToken::new()).await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
