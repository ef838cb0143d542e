use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use judgecraft_core::{
	export, generate_html_report, graph, AgentPanel, Batch, JsonlRowSource, JudgeConfig,
	OpenAiCompatClient, ReasoningService,
};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "judgecraft", about = "Judge answers with a panel of criterion agents")]
struct Cli {
	/// Emit logs as JSON lines
	#[arg(long, global = true, action = ArgAction::SetTrue)]
	json_logs: bool,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Judge every row of a JSONL file
	Run(RunArgs),
	/// Write one Graphviz file per judged row
	Graph(GraphArgs),
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// JSONL file, one object per line: { "id"?: any, "Answer": string, ... }
	#[arg(long)]
	data: PathBuf,

	/// YAML configuration (service, criteria, schema)
	#[arg(long)]
	config: Option<PathBuf>,

	/// Output JSONL; defaults to a timestamped file in the working directory
	#[arg(long)]
	out: Option<PathBuf>,

	/// Agents in flight per row
	#[arg(long)]
	workers: Option<usize>,

	/// Pause between rows in milliseconds
	#[arg(long)]
	row_delay_ms: Option<u64>,

	#[arg(long)]
	id_field: Option<String>,

	#[arg(long)]
	text_field: Option<String>,

	/// Write an HTML report
	#[arg(long)]
	html_out: Option<PathBuf>,

	/// Write call traces as JSONL
	#[arg(long)]
	traces_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Parser)]
struct GraphArgs {
	/// Output of `judgecraft run`
	#[arg(long)]
	input: PathBuf,

	/// Configuration naming the criteria and id field
	#[arg(long)]
	config: Option<PathBuf>,

	#[arg(long, default_value = "output_graphs")]
	out_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.json_logs);
	match cli.command {
		Commands::Run(args) => run(args).await?,
		Commands::Graph(args) => render_graphs(args).await?,
	}
	Ok(())
}

fn init_tracing(json: bool) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
	if json {
		tracing_subscriber::registry().with(env_filter).with(layer.json()).try_init().ok();
	} else {
		tracing_subscriber::registry().with(env_filter).with(layer).try_init().ok();
	}
}

async fn load_config(path: Option<&Path>) -> Result<JudgeConfig> {
	match path {
		Some(path) => JudgeConfig::load(path).await,
		None => Ok(JudgeConfig::default()),
	}
}

async fn run(args: RunArgs) -> Result<()> {
	let mut config = load_config(args.config.as_deref()).await?;
	if let Some(workers) = args.workers {
		config.workers = workers;
	}
	if let Some(delay) = args.row_delay_ms {
		config.row_delay_ms = delay;
	}
	if let Some(field) = args.id_field {
		config.schema.id_field = field;
	}
	if let Some(field) = args.text_field {
		config.schema.text_field = field;
	}
	config.validate()?;

	// Fail before any row is judged when the key is missing.
	let api_key = config.service.api_key_from_env()?;
	let client = OpenAiCompatClient::new(&config.service, api_key)
		.context("Failed to build the reasoning service client")?;
	let service: Arc<dyn ReasoningService> = Arc::new(client);
	let panel = AgentPanel::with_service(&config.criteria, service)?;

	let batch = Batch::builder()
		.row_source(Arc::new(JsonlRowSource::new(&args.data)))
		.panel(panel)
		.schema(config.schema.clone())
		.workers(config.workers)
		.row_delay(Duration::from_millis(config.row_delay_ms))
		.build()?;

	let result = batch.run().await?;
	println!("{}", result.summary_table());

	let out = args.out.unwrap_or_else(|| {
		PathBuf::from(format!("judged_{}.jsonl", chrono::Local::now().format("%Y%m%d_%H%M%S")))
	});
	export::write_rows(&out, &result).await?;
	info!(path = %out.display(), rows = result.rows.len(), "results written");

	if let Some(path) = args.html_out {
		tokio::fs::write(&path, generate_html_report(&result))
			.await
			.with_context(|| format!("Failed to write {:?}", path))?;
		info!(path = %path.display(), "report written");
	}

	if let Some(path) = args.traces_out {
		let lines = export::write_traces(&path, &result).await?;
		info!(path = %path.display(), lines, "traces written");
	}

	Ok(())
}

async fn render_graphs(args: GraphArgs) -> Result<()> {
	let config = load_config(args.config.as_deref()).await?;
	let criteria: Vec<String> = config.criteria.iter().map(|c| c.name.clone()).collect();

	let rows = export::read_rows(&args.input).await?;
	let written = graph::write_row_graphs(&rows, &criteria, &config.schema, &args.out_dir).await?;
	println!(
		"{} of {} row(s) had a graph; files in {}",
		written.len(),
		rows.len(),
		args.out_dir.display()
	);
	Ok(())
}
