//! Post-training static quantization of a model from calibration data.

use std::path::Path;

use crate::compression::{
    CompressionBackend, CompressionConfig, ModelType, QuantizationDataset, QuantizeParams,
    DEFAULT_SUBSET_SIZE,
};
use crate::config::QuantizationConfig;
use crate::data::{
    load_calibration_dataset, CalibrationDataLoader, CalibrationDataset, CalibrationLoader,
    CalibrationSource, DataCollator, DatasetRequest, Preprocess,
};
use crate::export::{
    export_compressed_model, export_opset, use_external_data_format, ExportConfigResolver,
    ExportTarget, GraphExporter, ONNX_WEIGHTS_NAME,
};
use crate::model::{DecoderModel, QuantizableModel, RuntimeModel};
use crate::runtime::{DataCache, InferRequestWrapper, InferenceRuntime};
use crate::utils::{is_seq2seq_task, normalize_task, HubMetadataClient, ModelMetadataService};
use crate::PtqError;

/// Seed used for calibration shuffling when none is given
pub const DEFAULT_SEED: u64 = 42;

/// Tokens generated per calibration batch on the decoder path
pub const DEFAULT_MAX_NEW_TOKENS: usize = 100;

/// File name of the serialized graph written by the trainable-model path
pub const DEFAULT_FILE_NAME: &str = "quantized_model.json";

/// Columns holding training targets, never passed to an exported model
const LABEL_NAMES: [&str; 3] = ["label", "labels", "label_ids"];

/// Options of a single [`Quantizer::quantize`] call.
pub struct QuantizeOptions {
    /// Quantization configuration (trainable-model path only)
    pub quantization_config: Option<QuantizationConfig>,
    /// Name of the serialized graph definition (trainable-model path only)
    pub file_name: Option<String>,
    pub batch_size: usize,
    pub data_collator: Option<Box<dyn DataCollator>>,
    /// Drop dataset columns the model does not accept
    pub remove_unused_columns: bool,
    pub model_type: Option<ModelType>,
    pub fast_bias_correction: Option<bool>,
    pub subset_size: Option<usize>,
    pub max_new_tokens: Option<usize>,
    /// Options handed to the compression backend untouched
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for QuantizeOptions {
    fn default() -> Self {
        Self {
            quantization_config: None,
            file_name: None,
            batch_size: 1,
            data_collator: None,
            remove_unused_columns: true,
            model_type: None,
            fast_bias_correction: None,
            subset_size: None,
            max_new_tokens: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl QuantizeOptions {
    pub fn quantization_config(mut self, config: QuantizationConfig) -> Self {
        self.quantization_config = Some(config);
        self
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn data_collator(mut self, collator: impl DataCollator + 'static) -> Self {
        self.data_collator = Some(Box::new(collator));
        self
    }

    pub fn remove_unused_columns(mut self, remove: bool) -> Self {
        self.remove_unused_columns = remove;
        self
    }

    pub fn model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = Some(model_type);
        self
    }

    pub fn fast_bias_correction(mut self, fast: bool) -> Self {
        self.fast_bias_correction = Some(fast);
        self
    }

    pub fn subset_size(mut self, subset_size: usize) -> Self {
        self.subset_size = Some(subset_size);
        self
    }

    pub fn max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = Some(max_new_tokens);
        self
    }

    /// Add a backend-specific option
    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Arguments of the backend's `quantize` call
    pub fn quantize_params(&self) -> QuantizeParams {
        QuantizeParams {
            model_type: self.model_type.unwrap_or_default(),
            fast_bias_correction: self.fast_bias_correction.unwrap_or(true),
            subset_size: self.subset_size.unwrap_or(DEFAULT_SUBSET_SIZE),
            extra: self.extra.clone(),
        }
    }
}

impl std::fmt::Debug for QuantizeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuantizeOptions")
            .field("quantization_config", &self.quantization_config)
            .field("file_name", &self.file_name)
            .field("batch_size", &self.batch_size)
            .field("custom_collator", &self.data_collator.is_some())
            .field("remove_unused_columns", &self.remove_unused_columns)
            .field("params", &self.quantize_params())
            .field("max_new_tokens", &self.max_new_tokens)
            .finish()
    }
}

/// External services the quantizer delegates to
struct Collaborators {
    compression: Box<dyn CompressionBackend>,
    exporter: Option<Box<dyn GraphExporter>>,
    export_configs: Option<Box<dyn ExportConfigResolver>>,
    runtime: Option<Box<dyn InferenceRuntime>>,
    metadata: Box<dyn ModelMetadataService>,
}

/// Builder for [`Quantizer`]
pub struct QuantizerBuilder {
    model: QuantizableModel,
    task: Option<String>,
    feature: Option<String>,
    seed: u64,
    compression: Option<Box<dyn CompressionBackend>>,
    exporter: Option<Box<dyn GraphExporter>>,
    export_configs: Option<Box<dyn ExportConfigResolver>>,
    runtime: Option<Box<dyn InferenceRuntime>>,
    metadata: Option<Box<dyn ModelMetadataService>>,
}

impl QuantizerBuilder {
    pub fn new(model: QuantizableModel) -> Self {
        Self {
            model,
            task: None,
            feature: None,
            seed: DEFAULT_SEED,
            compression: None,
            exporter: None,
            export_configs: None,
            runtime: None,
            metadata: None,
        }
    }

    /// Task defining the model topology used for export
    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Deprecated alias of [`task`](Self::task)
    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    /// Seed of the calibration shuffling
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn compression(mut self, backend: Box<dyn CompressionBackend>) -> Self {
        self.compression = Some(backend);
        self
    }

    pub fn exporter(mut self, exporter: Box<dyn GraphExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn export_configs(mut self, resolver: Box<dyn ExportConfigResolver>) -> Self {
        self.export_configs = Some(resolver);
        self
    }

    pub fn runtime(mut self, runtime: Box<dyn InferenceRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Service used to infer the task; defaults to the Hub client
    pub fn metadata(mut self, metadata: Box<dyn ModelMetadataService>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(self) -> crate::Result<Quantizer> {
        let compression = self.compression.ok_or_else(|| {
            PtqError::ConfigError("A compression backend is required".to_string())
        })?;

        if self.feature.is_some() {
            tracing::warn!("`feature` is deprecated and will be removed in a future version. Use `task` instead.");
        }
        let task = match (self.task, self.feature) {
            (Some(task), Some(feature)) => {
                if task != feature {
                    tracing::warn!(
                        "Both `feature` and `task` were specified. {} will be used to define the model topology for the export.",
                        task
                    );
                }
                Some(task)
            }
            (task, feature) => task.or(feature),
        };

        let signature_columns = self.model.forward_signature();
        let export_input_names = signature_columns
            .iter()
            .filter(|name| !LABEL_NAMES.contains(&name.as_str()))
            .cloned()
            .collect();

        Ok(Quantizer {
            model: self.model,
            task,
            seed: self.seed,
            signature_columns,
            export_input_names,
            input_names: None,
            collaborators: Collaborators {
                compression,
                exporter: self.exporter,
                export_configs: self.export_configs,
                runtime: self.runtime,
                metadata: self
                    .metadata
                    .unwrap_or_else(|| Box::new(HubMetadataClient::from_env())),
            },
        })
    }
}

/// Quantization path chosen from the model representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    RuntimeGraph,
    Decoder,
    Trainable,
}

/// Quantizes a model held in one of the supported representations.
///
/// The path is chosen from the model representation on every call to
/// [`quantize`](Self::quantize):
/// - a decoder that feeds back cached state is calibrated on the inputs
///   captured while generating from the calibration batches
/// - any other runtime graph is quantized directly from the batches
/// - a trainable model is compressed, exported and re-read by the runtime
pub struct Quantizer {
    model: QuantizableModel,
    task: Option<String>,
    seed: u64,
    signature_columns: Vec<String>,
    export_input_names: Vec<String>,
    input_names: Option<Vec<String>>,
    collaborators: Collaborators,
}

impl Quantizer {
    pub fn model(&self) -> &QuantizableModel {
        &self.model
    }

    pub fn into_model(self) -> QuantizableModel {
        self.model
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Parameter names of the model's forward call
    pub fn signature_columns(&self) -> &[String] {
        &self.signature_columns
    }

    /// Columns of the last calibration dataset, after filtering
    pub fn input_names(&self) -> Option<&[String]> {
        self.input_names.as_deref()
    }

    /// Quantize the model and write the result to `save_directory`.
    ///
    /// # Errors
    /// `UnsupportedModelType` when the model has no quantization path; no
    /// file is written in that case.
    pub fn quantize(
        &mut self,
        calibration_dataset: CalibrationDataset,
        save_directory: impl AsRef<Path>,
        options: QuantizeOptions,
    ) -> crate::Result<()> {
        let save_directory = save_directory.as_ref();
        let strategy = match &self.model {
            QuantizableModel::Decoder(model) if model.use_cache() => Strategy::Decoder,
            QuantizableModel::Decoder(_) | QuantizableModel::Runtime(_) => Strategy::RuntimeGraph,
            QuantizableModel::Trainable(_) => Strategy::Trainable,
            QuantizableModel::Unsupported(type_name) => {
                return Err(PtqError::UnsupportedModelType(type_name.clone()));
            }
        };
        tracing::info!("Quantizing {} model into {:?}", self.model.kind(), save_directory);

        match strategy {
            Strategy::RuntimeGraph => {
                self.quantize_runtime_graph(calibration_dataset, save_directory, options)
            }
            Strategy::Decoder => self.quantize_decoder(calibration_dataset, save_directory, options),
            Strategy::Trainable => {
                self.quantize_trainable(calibration_dataset, save_directory, options)
            }
        }
    }

    fn quantize_runtime_graph(
        &mut self,
        calibration_dataset: CalibrationDataset,
        save_directory: &Path,
        options: QuantizeOptions,
    ) -> crate::Result<()> {
        std::fs::create_dir_all(save_directory)?;
        let params = options.quantize_params();
        let mut loader = self.get_calibration_dataloader(
            calibration_dataset,
            options.batch_size,
            options.remove_unused_columns,
            options.data_collator,
        )?;
        let dataset = QuantizationDataset::identity(loader.loader_mut().iter());

        let backend = self.collaborators.compression.as_ref();
        match &mut self.model {
            QuantizableModel::Runtime(model) => {
                quantize_graph(model.as_mut(), backend, dataset, &params, save_directory)
            }
            QuantizableModel::Decoder(model) => {
                quantize_graph(model.as_mut(), backend, dataset, &params, save_directory)
            }
            other => Err(PtqError::UnsupportedModelType(other.kind().to_string())),
        }
    }

    fn quantize_decoder(
        &mut self,
        calibration_dataset: CalibrationDataset,
        save_directory: &Path,
        options: QuantizeOptions,
    ) -> crate::Result<()> {
        std::fs::create_dir_all(save_directory)?;
        let params = options.quantize_params();
        let max_new_tokens = options.max_new_tokens.unwrap_or(DEFAULT_MAX_NEW_TOKENS);
        let mut loader = self.get_calibration_dataloader(
            calibration_dataset,
            options.batch_size,
            options.remove_unused_columns,
            options.data_collator,
        )?;

        let model = match &mut self.model {
            QuantizableModel::Decoder(model) => model,
            other => return Err(PtqError::UnsupportedModelType(other.kind().to_string())),
        };

        model.compile()?;
        let request = model.take_request().ok_or_else(|| {
            PtqError::RuntimeError("Compiled model has no inference request".to_string())
        })?;
        let cache = DataCache::new();
        model.set_request(Box::new(InferRequestWrapper::new(request, cache.clone())));

        let captured = capture_inputs(
            model.as_mut(),
            loader.loader_mut(),
            &cache,
            params.subset_size,
            max_new_tokens,
        );
        let restored = restore_request(model.as_mut());
        captured?;
        restored?;

        tracing::info!("Captured {} inference inputs for calibration", cache.len());
        let dataset = QuantizationDataset::from_samples(cache.take());
        quantize_graph(
            model.as_mut(),
            self.collaborators.compression.as_ref(),
            dataset,
            &params,
            save_directory,
        )
    }

    fn quantize_trainable(
        &mut self,
        calibration_dataset: CalibrationDataset,
        save_directory: &Path,
        options: QuantizeOptions,
    ) -> crate::Result<()> {
        let task = self.resolve_task()?;

        let missing = [
            ("graph exporter", self.collaborators.exporter.is_none()),
            ("export config resolver", self.collaborators.export_configs.is_none()),
            ("inference runtime", self.collaborators.runtime.is_none()),
        ];
        if let Some((name, _)) = missing.iter().find(|(_, is_missing)| *is_missing) {
            return Err(PtqError::ConfigError(format!(
                "Quantizing a trainable model requires a {}",
                name
            )));
        }

        std::fs::create_dir_all(save_directory)?;
        let file_name = options.file_name.as_deref().unwrap_or(DEFAULT_FILE_NAME);
        let output_path = save_directory.join(file_name).with_extension("json");
        let weights_path = output_path.with_extension("safetensors");

        let mut loader = self.get_calibration_dataloader(
            calibration_dataset,
            options.batch_size,
            options.remove_unused_columns,
            options.data_collator,
        )?;
        let model_inputs = loader.loader_mut().iter().next().ok_or_else(|| {
            PtqError::DatasetError("Calibration dataset is empty".to_string())
        })??;

        let mut quantization_config = options.quantization_config.unwrap_or_else(|| {
            tracing::info!(
                "No configuration describing the quantization process was provided, a default configuration will be used."
            );
            QuantizationConfig::default()
        });
        quantization_config.add_input_info(&model_inputs);
        let compression_config = CompressionConfig::from_quantization_config(&quantization_config)?
            .register_default_init_args(Box::new(loader));

        let Collaborators {
            compression,
            exporter: Some(exporter),
            export_configs: Some(export_configs),
            runtime: Some(runtime),
            ..
        } = &self.collaborators
        else {
            return Err(PtqError::ConfigError("Missing export collaborators".to_string()));
        };

        let model = match &mut self.model {
            QuantizableModel::Trainable(model) => model,
            other => return Err(PtqError::UnsupportedModelType(other.kind().to_string())),
        };
        let (mut controller, mut compressed) =
            compression.create_compressed_model(model.as_mut(), compression_config)?;
        controller.prepare_for_export()?;

        let config = model.config();
        config.save_pretrained(save_directory)?;
        let use_past = task == "text-generation" && config.use_cache;
        let export_config =
            export_configs.resolve(&config.export_model_type(), &task, config, use_past)?;

        compressed.eval();
        let num_parameters = compressed.num_parameters();
        let save_as_external_data =
            use_external_data_format(num_parameters) || quantization_config.save_onnx_model;
        let target = if save_as_external_data {
            ExportTarget::File(save_directory.join(ONNX_WEIGHTS_NAME))
        } else {
            ExportTarget::Memory
        };
        let opset = export_opset(export_config.default_opset(), quantization_config.save_onnx_model);
        tracing::info!(
            "Exporting {} parameters with opset {} ({:?})",
            num_parameters,
            opset,
            target
        );

        let interchange = export_compressed_model(
            &**exporter,
            compressed.as_mut(),
            export_config.as_ref(),
            opset,
            target,
        )?;

        let mut graph = runtime.read_model(&interchange)?;
        runtime.compress_quantize_weights(&mut graph)?;
        runtime.serialize(&graph, &output_path, &weights_path)?;
        quantization_config.save_pretrained(save_directory)?;

        tracing::info!("Saved quantized model to {:?}", output_path);
        Ok(())
    }

    /// Resolve, alias and cache the task.
    ///
    /// Without a task the metadata service is asked for the pipeline tag of
    /// the model's stored identifier.
    fn resolve_task(&mut self) -> crate::Result<String> {
        let task = match self.task.take() {
            Some(task) => task,
            None => {
                let model_id = self
                    .model
                    .config()
                    .map(|config| config.name_or_path.clone())
                    .unwrap_or_default();
                self.collaborators
                    .metadata
                    .pipeline_tag(&model_id)?
                    .ok_or_else(|| {
                        PtqError::ConfigError(
                            "The task defining the model topology could not be extracted and needs to be specified for the export."
                                .to_string(),
                        )
                    })?
            }
        };

        let task = normalize_task(&task).to_string();
        self.task = Some(task.clone());
        tracing::info!("Using task {}", task);

        if is_seq2seq_task(&task) {
            return Err(PtqError::UnsupportedTask(
                "Seq2Seq models are currently not supported for post-training static quantization."
                    .to_string(),
            ));
        }
        Ok(task)
    }

    /// Build the seeded calibration loader.
    ///
    /// With `remove_unused_columns` only columns the exported model accepts
    /// are kept. The resulting column names are recorded as the quantizer's
    /// input names.
    pub fn get_calibration_dataloader(
        &mut self,
        calibration_dataset: CalibrationDataset,
        batch_size: usize,
        remove_unused_columns: bool,
        data_collator: Option<Box<dyn DataCollator>>,
    ) -> crate::Result<CalibrationLoader> {
        let calibration_dataset = if remove_unused_columns {
            calibration_dataset.retain_columns(&self.export_input_names)
        } else {
            calibration_dataset
        };
        self.input_names = Some(calibration_dataset.column_names().to_vec());

        let mut loader = CalibrationDataLoader::new(calibration_dataset, batch_size, self.seed)?;
        if let Some(collator) = data_collator {
            loader = loader.with_collator(collator);
        }
        Ok(CalibrationLoader::new(loader))
    }

    /// Load a calibration dataset, shuffled and capped with the quantizer seed
    pub fn get_calibration_dataset(
        &self,
        source: &dyn CalibrationSource,
        request: &DatasetRequest,
        preprocess: Option<&Preprocess>,
    ) -> crate::Result<CalibrationDataset> {
        load_calibration_dataset(source, request, preprocess, self.seed)
    }
}

impl std::fmt::Debug for Quantizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quantizer")
            .field("model", &self.model)
            .field("task", &self.task)
            .field("seed", &self.seed)
            .field("signature_columns", &self.signature_columns)
            .field("input_names", &self.input_names)
            .finish()
    }
}

/// Quantize a runtime-graph model in place and save it
fn quantize_graph<M: RuntimeModel + ?Sized>(
    model: &mut M,
    backend: &dyn CompressionBackend,
    dataset: QuantizationDataset<'_>,
    params: &QuantizeParams,
    save_directory: &Path,
) -> crate::Result<()> {
    let quantized = backend.quantize(model.graph(), dataset, params)?;
    model.set_graph(quantized);
    model.save_pretrained(save_directory)?;
    tracing::info!("Saved quantized model to {:?}", save_directory);
    Ok(())
}

/// Generate over calibration batches until `subset_size` inputs were captured
fn capture_inputs(
    model: &mut dyn DecoderModel,
    loader: &mut CalibrationDataLoader,
    cache: &DataCache,
    subset_size: usize,
    max_new_tokens: usize,
) -> crate::Result<()> {
    for batch in loader.iter() {
        model.generate(&batch?, max_new_tokens)?;
        tracing::debug!("Captured {} inference inputs", cache.len());
        if cache.len() >= subset_size {
            break;
        }
    }
    Ok(())
}

/// Put back the request wrapped for capturing
fn restore_request(model: &mut dyn DecoderModel) -> crate::Result<()> {
    let original = model
        .take_request()
        .and_then(|request| request.into_inner())
        .ok_or_else(|| {
            PtqError::RuntimeError("Capturing inference request was replaced during generation".to_string())
        })?;
    model.set_request(original);
    Ok(())
}
