//! ptq CLI - Post-training static quantization helpers
//!
//! Prepare tokenized calibration data, resolve model tasks and inspect
//! quantized artifacts.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use rs_ptq::{
    config::{QuantizationConfig, QUANTIZATION_CONFIG_NAME},
    data::{load_calibration_dataset, DatasetRequest, Example, FieldValue, JsonLinesSource, Preprocess},
    quantizer::{DEFAULT_FILE_NAME, DEFAULT_SEED},
    runtime::GRAPH_FILE_NAME,
    utils::{is_seq2seq_task, normalize_task, HubMetadataClient, DEFAULT_ENDPOINT},
    PtqError, RuntimeGraph,
};

#[derive(Parser)]
#[command(name = "ptq")]
#[command(author, version, about = "Post-training static quantization helpers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tokenize a text dataset into a calibration file
    Prepare {
        /// Directory holding JSON Lines datasets
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,

        /// Dataset name (directory under data_dir) or .jsonl file
        #[arg(short, long)]
        dataset: String,

        /// Dataset configuration name
        #[arg(long)]
        config: Option<String>,

        /// Split to read
        #[arg(long, default_value = "train")]
        split: String,

        /// Number of examples kept after shuffling
        #[arg(long, default_value = "100")]
        num_samples: usize,

        /// Shuffling seed
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Path to tokenizer.json
        #[arg(short, long)]
        tokenizer: PathBuf,

        /// Column holding the text to tokenize
        #[arg(long, default_value = "text")]
        text_column: String,

        /// Sequence length every example is padded or truncated to
        #[arg(long, default_value = "128")]
        max_length: usize,

        /// Output calibration file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Resolve the task of a Hub model
    Task {
        /// HuggingFace model ID
        #[arg(short, long)]
        model: String,

        /// HuggingFace token for private models
        #[arg(long, env = "HF_TOKEN")]
        hf_token: Option<String>,

        /// Hub endpoint
        #[arg(long, env = "HF_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },

    /// Show the quantization config and graph of a quantized model
    Inspect {
        /// Directory written by a quantization run
        #[arg(short, long)]
        model: PathBuf,

        /// Graph definition file name inside the directory
        #[arg(long)]
        file_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rs_ptq=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare {
            data_dir,
            dataset,
            config,
            split,
            num_samples,
            seed,
            tokenizer,
            text_column,
            max_length,
            output,
        } => {
            let mut request = DatasetRequest::new(dataset)
                .split(split)
                .num_samples(Some(num_samples));
            if let Some(config) = config {
                request = request.config_name(config);
            }
            prepare(&data_dir, &request, seed, &tokenizer, &text_column, max_length, &output)?;
        }

        Commands::Task {
            model,
            hf_token,
            endpoint,
        } => {
            resolve_task(&model, hf_token, &endpoint).await?;
        }

        Commands::Inspect { model, file_name } => {
            inspect(&model, file_name.as_deref())?;
        }
    }

    Ok(())
}

fn prepare(
    data_dir: &Path,
    request: &DatasetRequest,
    seed: u64,
    tokenizer_path: &Path,
    text_column: &str,
    max_length: usize,
    output: &Path,
) -> anyhow::Result<()> {
    let mut tokenizer = Tokenizer::from_file(tokenizer_path)
        .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("Invalid truncation: {}", e))?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::Fixed(max_length),
        ..Default::default()
    }));

    let pb = ProgressBar::new(request.num_samples.unwrap_or(0) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    pb.set_message("tokenizing");

    let column = text_column.to_string();
    let progress = pb.clone();
    let preprocess = Preprocess::batched(move |examples: Vec<Example>| {
        let texts = examples
            .iter()
            .map(|example| {
                example
                    .get(&column)
                    .and_then(FieldValue::as_text)
                    .map(str::to_string)
                    .ok_or_else(|| PtqError::DatasetError(format!("No text column '{}'", column)))
            })
            .collect::<rs_ptq::Result<Vec<_>>>()?;

        let encodings = tokenizer
            .encode_batch(texts, true)
            .map_err(|e| PtqError::DatasetError(format!("Tokenization failed: {}", e)))?;

        let mut tokenized = Vec::with_capacity(examples.len());
        for (mut example, encoding) in examples.into_iter().zip(encodings) {
            let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
            let mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| m as i64).collect();
            example.insert(
                "input_ids".to_string(),
                FieldValue::Tensor(candle_core::Tensor::new(ids.as_slice(), &candle_core::Device::Cpu)?),
            );
            example.insert(
                "attention_mask".to_string(),
                FieldValue::Tensor(candle_core::Tensor::new(mask.as_slice(), &candle_core::Device::Cpu)?),
            );
            tokenized.push(example);
            progress.inc(1);
        }
        Ok(tokenized)
    });

    let source = JsonLinesSource::new(data_dir);
    let dataset = load_calibration_dataset(&source, request, Some(&preprocess), seed)?
        .remove_columns(&[text_column.to_string()]);
    pb.finish_with_message("done");

    dataset.to_json_lines(output)?;
    println!("Wrote {} calibration examples to {:?}", dataset.len(), output);
    println!("Columns: {}", dataset.column_names().join(", "));

    Ok(())
}

async fn resolve_task(model_id: &str, hf_token: Option<String>, endpoint: &str) -> anyhow::Result<()> {
    let client = HubMetadataClient::new(endpoint, hf_token);
    let tag = client
        .pipeline_tag_async(model_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No task declared for {}; pass it explicitly", model_id))?;

    let task = normalize_task(&tag);
    if is_seq2seq_task(task) {
        anyhow::bail!("{} resolves to {}, which cannot be statically quantized", model_id, task);
    }

    println!("{}", task);
    Ok(())
}

fn inspect(model_dir: &Path, file_name: Option<&str>) -> anyhow::Result<()> {
    let config_path = model_dir.join(QUANTIZATION_CONFIG_NAME);
    if config_path.exists() {
        let config = QuantizationConfig::from_file(&config_path)?;
        println!("Quantization Config");
        println!("===================");
        println!("{}", serde_json::to_string_pretty(&config)?);
        println!();
    }

    let definition = match file_name {
        Some(name) => model_dir.join(name),
        None => [DEFAULT_FILE_NAME, GRAPH_FILE_NAME]
            .iter()
            .map(|name| model_dir.join(name))
            .find(|path| path.exists())
            .ok_or_else(|| anyhow::anyhow!("No runtime graph found in {:?}", model_dir))?,
    };
    let graph = RuntimeGraph::read(&definition)?;

    println!("Runtime Graph");
    println!("=============");
    println!("Name: {}", graph.name);
    for port in &graph.inputs {
        println!("Input: {} {:?} {}", port.name, port.shape, port.element_type);
    }
    for port in &graph.outputs {
        println!("Output: {} {:?} {}", port.name, port.shape, port.element_type);
    }
    println!("Float weights: {}", graph.weights().len());
    println!("Fake-quantized weights: {}", graph.num_fake_quantized());
    println!("Parameters: {}", graph.num_parameters());

    let compressed = graph.compressed_weights();
    if !compressed.is_empty() {
        let original: usize = compressed.values().map(|q| q.original_size()).sum();
        let stored: usize = compressed.values().map(|q| q.compressed_size()).sum();
        println!("\nCompressed Weights");
        println!("==================");
        println!("Count: {}", compressed.len());
        let block_sizes: std::collections::BTreeSet<usize> =
            compressed.values().map(|q| q.block_size).collect();
        println!("Block sizes: {:?}", block_sizes);
        println!(
            "Size: {:.1} MB -> {:.1} MB ({:.2}x)",
            original as f64 / 1e6,
            stored as f64 / 1e6,
            original as f64 / stored.max(1) as f64
        );
    }

    Ok(())
}
