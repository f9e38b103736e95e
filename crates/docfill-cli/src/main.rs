//! Docfill CLI - Fill DOCX templates, convert them to PDF and merge attachments.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docfill_core::{
    AppConfig, Attachment, DocumentPipeline, PdfMerger, PlaceholderMap, fill_template_file,
    read_sheet,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docfill")]
#[command(author, version, about = "Fill DOCX templates and produce PDFs", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Headless office binary (overrides config and $LIBREOFFICE)
    #[arg(long, global = true)]
    soffice: Option<PathBuf>,

    /// Merge script run by node
    #[arg(long, global = true)]
    merge_script: Option<PathBuf>,

    /// Parent directory for scratch files
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace placeholders in a DOCX template
    Fill {
        /// Template file
        template: PathBuf,

        /// JSON object of placeholder values
        #[arg(long)]
        values: PathBuf,

        /// Output DOCX file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Fill a template, convert it to PDF and append attachments
    Render {
        /// Template file
        template: PathBuf,

        /// JSON object of placeholder values
        #[arg(long)]
        values: PathBuf,

        /// PDF appended after the rendered document (repeatable)
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,

        /// Output PDF file (default: template name with .pdf)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Concatenate PDF files
    Merge {
        /// Input PDF files, in order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output PDF file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the rows of the first worksheet as JSON lines
    Sheet {
        /// Spreadsheet file
        input: PathBuf,

        /// Header columns that must be present
        #[arg(long, value_delimiter = ',')]
        require: Vec<String>,
    },
}

fn load_values(path: &Path) -> Result<PlaceholderMap> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read values file: {}", path.display()))?;
    let object: serde_json::Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("Values file must be a JSON object: {}", path.display()))?;

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, text)
        })
        .collect())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path).context("Failed to load config file")?
    } else {
        AppConfig::load()
    };

    // Override config with CLI arguments
    if let Some(soffice) = &args.soffice {
        config.converter.binary = Some(soffice.clone());
    }
    if let Some(script) = &args.merge_script {
        config.merge.script_path = script.clone();
    }
    if let Some(dir) = &args.scratch_dir {
        config.scratch_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before parsing args so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Setup logging; RUST_LOG wins over -v
    let log_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config = load_config(&args)?;

    match args.command {
        Command::Fill {
            template,
            values,
            output,
        } => {
            let values = load_values(&values)?;
            fill_template_file(&template, &output, &values)
                .with_context(|| format!("Failed to fill template: {}", template.display()))?;
            report(&format!("Filled template saved to: {}", output.display()));
        }

        Command::Render {
            template,
            values,
            attachments,
            output,
        } => {
            let values = load_values(&values)?;
            let mut loaded = Vec::with_capacity(attachments.len());
            for path in &attachments {
                loaded.push(
                    Attachment::from_path(path)
                        .await
                        .with_context(|| format!("Failed to read attachment: {}", path.display()))?,
                );
            }

            let pipeline = DocumentPipeline::new(config);
            let pdf = pipeline
                .render_pdf_with_attachments(&template, &values, &loaded)
                .await
                .with_context(|| format!("Failed to render: {}", template.display()))?;

            let output_path = output.unwrap_or_else(|| template.with_extension("pdf"));
            std::fs::write(&output_path, pdf)
                .with_context(|| format!("Failed to write output: {}", output_path.display()))?;
            report(&format!("Rendered PDF saved to: {}", output_path.display()));
        }

        Command::Merge { inputs, output } => {
            info!("Merging {} PDF files", inputs.len());
            let merger = PdfMerger::new(config.merge).with_scratch_parent(config.scratch_dir);
            merger
                .merge_paths(&inputs, &output)
                .await
                .context("Failed to merge PDF files")?;
            report(&format!("Merged PDF saved to: {}", output.display()));
        }

        Command::Sheet { input, require } => {
            let sheet = read_sheet(&input)
                .with_context(|| format!("Failed to read spreadsheet: {}", input.display()))?;

            let missing = sheet
                .header_index()
                .missing(require.iter().map(String::as_str));
            if !missing.is_empty() {
                anyhow::bail!("Missing required columns: {}", missing.join(", "));
            }

            for row in sheet.rows() {
                report(&serde_json::to_string(row)?);
            }
        }
    }

    Ok(())
}

fn report(line: &str) {
    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        println!("{line}");
    }
}
