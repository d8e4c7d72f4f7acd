//! End-to-end quantization runs against in-memory collaborators.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use candle_core::{DType, Device, Tensor};

use rs_ptq::compression::{
    CompressedParts, CompressionConfig, CompressionController, InitializingDataLoader,
};
use rs_ptq::data::{Example, FieldValue};
use rs_ptq::export::{DynamicAxes, ExportConfig, ExportConfigResolver, ExportRequest, GraphExporter};
use rs_ptq::model::{CompressedModel, PreTrainedModel};
use rs_ptq::runtime::{Port, GRAPH_FILE_NAME};
use rs_ptq::utils::ModelMetadataService;
use rs_ptq::{
    CalibrationDataset, CompressionBackend, DecoderModel, Features, InferRequest, InferenceRuntime,
    InterchangeGraph, ModelConfig, ModelType, PtqError, QuantizableModel, QuantizationDataset,
    QuantizeOptions, QuantizeParams, QuantizerBuilder, RuntimeGraph, RuntimeModel, TrainableModel,
};

// ---------------------------------------------------------------------------
// Shared record of collaborator calls
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Record {
    quantize_params: Vec<QuantizeParams>,
    samples_drawn: usize,
    init_batches: usize,
    compression_params: Option<serde_json::Value>,
    exports: Vec<ExportRequest>,
    resolved: Vec<(String, String, bool)>,
    generate_calls: usize,
    metadata_calls: usize,
}

type Shared = Rc<RefCell<Record>>;

fn signature(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn base_graph() -> RuntimeGraph {
    let mut graph = RuntimeGraph::new("bert")
        .with_input(Port::new("input_ids", vec![None, None], "i64"))
        .with_input(Port::new("attention_mask", vec![None, None], "i64"))
        .with_output(Port::new("logits", vec![None, Some(2)], "f32"));
    graph.add_weight(
        "classifier.weight",
        Tensor::arange(0f32, 128., &Device::Cpu).unwrap().reshape((2, 64)).unwrap(),
    );
    graph.add_weight("classifier.bias", Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap());
    graph
}

/// Dataset of `n` examples with the given columns, each a 4-element i64 row
fn dataset(n: i64, columns: &[&str]) -> CalibrationDataset {
    let examples = (0..n)
        .map(|i| {
            columns
                .iter()
                .map(|c| {
                    (
                        c.to_string(),
                        FieldValue::Tensor(Tensor::new(&[i, i, i, i], &Device::Cpu).unwrap()),
                    )
                })
                .collect::<Example>()
        })
        .collect();
    CalibrationDataset::from_examples(examples).unwrap()
}

fn text_dataset(n: i64) -> CalibrationDataset {
    dataset(n, &["input_ids", "attention_mask"])
}

// ---------------------------------------------------------------------------
// Compression backend
// ---------------------------------------------------------------------------

struct FakeBackend {
    record: Shared,
}

impl CompressionBackend for FakeBackend {
    fn quantize(
        &self,
        graph: &RuntimeGraph,
        dataset: QuantizationDataset<'_>,
        params: &QuantizeParams,
    ) -> rs_ptq::Result<RuntimeGraph> {
        let mut drawn = 0;
        for sample in dataset.take(params.subset_size) {
            sample?;
            drawn += 1;
        }

        let mut record = self.record.borrow_mut();
        record.samples_drawn = drawn;
        record.quantize_params.push(params.clone());

        let mut quantized = graph.clone();
        quantized.rt_info.insert("quantized".to_string(), "true".to_string());
        quantized.mark_fake_quantized("classifier.weight")?;
        Ok(quantized)
    }

    fn create_compressed_model(
        &self,
        model: &mut dyn TrainableModel,
        mut config: CompressionConfig,
    ) -> rs_ptq::Result<CompressedParts> {
        let loader = config
            .init_loader()
            .ok_or_else(|| PtqError::QuantizationError("missing init loader".to_string()))?;
        let mut batches = 0;
        let batch_list: Vec<Features> = loader.batches().collect::<rs_ptq::Result<_>>()?;
        for batch in batch_list {
            let inputs = loader.get_inputs(batch);
            assert!(inputs.args.is_empty());
            batches += 1;
        }

        let mut record = self.record.borrow_mut();
        record.init_batches = batches;
        record.compression_params = Some(config.params().clone());

        Ok((
            Box::new(FakeController),
            Box::new(FakeCompressed {
                signature: model.forward_signature(),
                num_parameters: model.num_parameters(),
            }),
        ))
    }
}

struct FakeController;

impl CompressionController for FakeController {
    fn prepare_for_export(&mut self) -> rs_ptq::Result<()> {
        Ok(())
    }
}

struct FakeCompressed {
    signature: Vec<String>,
    num_parameters: usize,
}

impl CompressedModel for FakeCompressed {
    fn forward_signature(&self) -> Vec<String> {
        self.signature.clone()
    }
    fn eval(&mut self) {}
    fn num_parameters(&self) -> usize {
        self.num_parameters
    }
    fn device(&self) -> Device {
        Device::Cpu
    }
    fn disable_dynamic_graph_building(&mut self) {}
    fn enable_dynamic_graph_building(&mut self) {}
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

struct FakeRuntimeModel {
    config: ModelConfig,
    graph: RuntimeGraph,
}

impl FakeRuntimeModel {
    fn new() -> Self {
        Self {
            config: ModelConfig::new("bert-base-uncased", "bert"),
            graph: base_graph(),
        }
    }
}

impl PreTrainedModel for FakeRuntimeModel {
    fn forward_signature(&self) -> Vec<String> {
        signature(&["input_ids", "attention_mask"])
    }
    fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl RuntimeModel for FakeRuntimeModel {
    fn graph(&self) -> &RuntimeGraph {
        &self.graph
    }
    fn set_graph(&mut self, graph: RuntimeGraph) {
        self.graph = graph;
    }
}

#[derive(Default)]
struct PlainRequest {
    results: Features,
}

impl InferRequest for PlainRequest {
    fn call(&mut self, inputs: Features) -> rs_ptq::Result<Features> {
        self.infer(inputs, false)
    }
    fn infer(&mut self, inputs: Features, _shared_memory: bool) -> rs_ptq::Result<Features> {
        self.results = inputs;
        Ok(self.results.clone())
    }
    fn start_async(&mut self, inputs: Features, shared_memory: bool) -> rs_ptq::Result<()> {
        self.infer(inputs, shared_memory).map(|_| ())
    }
    fn wait(&mut self) -> rs_ptq::Result<()> {
        Ok(())
    }
    fn get_tensor(&self, name: &str) -> rs_ptq::Result<Tensor> {
        self.results
            .get(name)
            .cloned()
            .ok_or_else(|| PtqError::RuntimeError(name.to_string()))
    }
    fn results(&self) -> &Features {
        &self.results
    }
    fn input_names(&self) -> Vec<String> {
        signature(&["input_ids", "attention_mask"])
    }
    fn reset_state(&mut self) -> rs_ptq::Result<()> {
        Ok(())
    }
}

/// Decoder issuing one synchronous and one asynchronous inference per generation
struct FakeDecoder {
    inner: FakeRuntimeModel,
    use_cache: bool,
    request: Option<Box<dyn InferRequest>>,
    fail_generation: bool,
    record: Shared,
}

impl FakeDecoder {
    fn new(use_cache: bool, record: Shared) -> Self {
        let mut inner = FakeRuntimeModel::new();
        inner.config = ModelConfig::new("gpt2", "gpt2");
        Self {
            inner,
            use_cache,
            request: None,
            fail_generation: false,
            record,
        }
    }
}

impl PreTrainedModel for FakeDecoder {
    fn forward_signature(&self) -> Vec<String> {
        self.inner.forward_signature()
    }
    fn config(&self) -> &ModelConfig {
        self.inner.config()
    }
}

impl RuntimeModel for FakeDecoder {
    fn graph(&self) -> &RuntimeGraph {
        self.inner.graph()
    }
    fn set_graph(&mut self, graph: RuntimeGraph) {
        self.inner.set_graph(graph);
    }
}

impl DecoderModel for FakeDecoder {
    fn use_cache(&self) -> bool {
        self.use_cache
    }
    fn compile(&mut self) -> rs_ptq::Result<()> {
        if self.request.is_none() {
            self.request = Some(Box::new(PlainRequest::default()));
        }
        Ok(())
    }
    fn take_request(&mut self) -> Option<Box<dyn InferRequest>> {
        self.request.take()
    }
    fn set_request(&mut self, request: Box<dyn InferRequest>) {
        self.request = Some(request);
    }
    fn generate(&mut self, inputs: &Features, _max_new_tokens: usize) -> rs_ptq::Result<Tensor> {
        self.record.borrow_mut().generate_calls += 1;
        let request = self
            .request
            .as_mut()
            .ok_or_else(|| PtqError::GenerationError("not compiled".to_string()))?;

        request.infer(inputs.clone(), false)?;
        if self.fail_generation {
            return Err(PtqError::GenerationError("out of memory".to_string()));
        }
        request.start_async(inputs.clone(), true)?;
        request.wait()?;
        request.get_tensor("input_ids")
    }
}

struct FakeTrainable {
    config: ModelConfig,
}

impl PreTrainedModel for FakeTrainable {
    fn forward_signature(&self) -> Vec<String> {
        signature(&["input_ids", "attention_mask", "token_type_ids", "labels"])
    }
    fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl TrainableModel for FakeTrainable {
    fn num_parameters(&self) -> usize {
        130
    }
}

// ---------------------------------------------------------------------------
// Export and runtime
// ---------------------------------------------------------------------------

struct FakeExportConfig;

impl ExportConfig for FakeExportConfig {
    fn default_opset(&self) -> u32 {
        11
    }
    fn inputs(&self) -> Vec<(String, DynamicAxes)> {
        let axes: DynamicAxes = [(0, "batch_size".to_string()), (1, "sequence_length".to_string())].into();
        vec![
            ("input_ids".to_string(), axes.clone()),
            ("attention_mask".to_string(), axes),
        ]
    }
    fn outputs(&self) -> Vec<(String, DynamicAxes)> {
        vec![("logits".to_string(), [(0, "batch_size".to_string())].into())]
    }
    fn generate_dummy_inputs(&self) -> rs_ptq::Result<Features> {
        let mut inputs = Features::new();
        for name in ["input_ids", "attention_mask"] {
            inputs.insert(name.to_string(), Tensor::ones((2, 8), DType::I64, &Device::Cpu)?);
        }
        Ok(inputs)
    }
}

struct FakeResolver {
    record: Shared,
}

impl ExportConfigResolver for FakeResolver {
    fn resolve(
        &self,
        model_type: &str,
        task: &str,
        _config: &ModelConfig,
        use_past: bool,
    ) -> rs_ptq::Result<Box<dyn ExportConfig>> {
        self.record
            .borrow_mut()
            .resolved
            .push((model_type.to_string(), task.to_string(), use_past));
        Ok(Box::new(FakeExportConfig))
    }
}

struct FakeExporter {
    record: Shared,
}

impl GraphExporter for FakeExporter {
    fn export(
        &self,
        _model: &mut dyn CompressedModel,
        request: ExportRequest,
    ) -> rs_ptq::Result<InterchangeGraph> {
        self.record.borrow_mut().exports.push(request);
        Ok(InterchangeGraph::Bytes(b"graph".to_vec()))
    }
}

struct FakeRuntime;

impl InferenceRuntime for FakeRuntime {
    fn read_model(&self, graph: &InterchangeGraph) -> rs_ptq::Result<RuntimeGraph> {
        assert_eq!(graph, &InterchangeGraph::Bytes(b"graph".to_vec()));
        let mut runtime_graph = base_graph();
        runtime_graph.mark_fake_quantized("classifier.weight")?;
        Ok(runtime_graph)
    }
}

struct FakeMetadata {
    tag: Option<String>,
    record: Shared,
}

impl ModelMetadataService for FakeMetadata {
    fn pipeline_tag(&self, _model_id: &str) -> rs_ptq::Result<Option<String>> {
        self.record.borrow_mut().metadata_calls += 1;
        Ok(self.tag.clone())
    }
}

fn builder(model: QuantizableModel, record: &Shared) -> QuantizerBuilder {
    QuantizerBuilder::new(model)
        .compression(Box::new(FakeBackend { record: record.clone() }))
        .metadata(Box::new(FakeMetadata { tag: None, record: record.clone() }))
}

fn trainable_builder(record: &Shared) -> QuantizerBuilder {
    let mut config = ModelConfig::new("distilbert-base-uncased", "distil_bert");
    config.use_cache = true;
    builder(QuantizableModel::trainable(FakeTrainable { config }), record)
        .exporter(Box::new(FakeExporter { record: record.clone() }))
        .export_configs(Box::new(FakeResolver { record: record.clone() }))
        .runtime(Box::new(FakeRuntime))
}

fn exists(dir: &Path, name: &str) -> bool {
    dir.join(name).exists()
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[test]
fn test_unsupported_model_writes_nothing() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();
    let save_dir = out.path().join("quantized");

    let mut quantizer = builder(QuantizableModel::unsupported("TFBertModel"), &record)
        .task("text-classification")
        .build()
        .unwrap();
    let err = quantizer
        .quantize(text_dataset(4), &save_dir, QuantizeOptions::default())
        .unwrap_err();

    assert!(matches!(err, PtqError::UnsupportedModelType(ref name) if name == "TFBertModel"));
    assert!(!save_dir.exists());
    assert!(record.borrow().quantize_params.is_empty());
}

#[test]
fn test_runtime_graph_path() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let mut quantizer = builder(QuantizableModel::runtime(FakeRuntimeModel::new()), &record)
        .build()
        .unwrap();
    quantizer
        .quantize(text_dataset(10), out.path(), QuantizeOptions::default())
        .unwrap();

    let record = record.borrow();
    assert!(record.samples_drawn <= 10);
    assert_eq!(record.samples_drawn, 10);
    let params = &record.quantize_params[0];
    assert_eq!(params.model_type, ModelType::Transformer);
    assert!(params.fast_bias_correction);
    assert_eq!(params.subset_size, 300);

    let graph = quantizer.model().graph().unwrap();
    assert_eq!(graph.rt_info.get("quantized").map(String::as_str), Some("true"));
    assert!(exists(out.path(), "config.json"));
    assert!(exists(out.path(), GRAPH_FILE_NAME));
}

#[test]
fn test_runtime_graph_options_are_forwarded() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let mut quantizer = builder(QuantizableModel::runtime(FakeRuntimeModel::new()), &record)
        .build()
        .unwrap();
    let options = QuantizeOptions::default()
        .batch_size(4)
        .model_type(ModelType::Generic)
        .fast_bias_correction(false)
        .subset_size(2)
        .extra("preset", serde_json::json!("performance"));
    quantizer.quantize(text_dataset(20), out.path(), options).unwrap();

    let record = record.borrow();
    let params = &record.quantize_params[0];
    assert_eq!(params.model_type, ModelType::Generic);
    assert!(!params.fast_bias_correction);
    assert_eq!(params.extra["preset"], "performance");
    assert_eq!(record.samples_drawn, 2);
}

#[test]
fn test_decoder_without_cache_uses_runtime_path() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let decoder = FakeDecoder::new(false, record.clone());
    let mut quantizer = builder(QuantizableModel::decoder(decoder), &record)
        .build()
        .unwrap();
    quantizer
        .quantize(text_dataset(6), out.path(), QuantizeOptions::default())
        .unwrap();

    let record = record.borrow();
    assert_eq!(record.generate_calls, 0);
    assert_eq!(record.samples_drawn, 6);
}

// ---------------------------------------------------------------------------
// Decoder capture
// ---------------------------------------------------------------------------

#[test]
fn test_decoder_stops_once_subset_is_captured() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let decoder = FakeDecoder::new(true, record.clone());
    let mut quantizer = builder(QuantizableModel::decoder(decoder), &record)
        .build()
        .unwrap();
    quantizer
        .quantize(
            text_dataset(50),
            out.path(),
            QuantizeOptions::default().subset_size(5).max_new_tokens(4),
        )
        .unwrap();

    let record = record.borrow();
    // two captures per generation: 2, 4, 6
    assert_eq!(record.generate_calls, 3);
    assert_eq!(record.samples_drawn, 5);
    assert!(exists(out.path(), GRAPH_FILE_NAME));
}

#[test]
fn test_decoder_exhausts_small_dataset() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let decoder = FakeDecoder::new(true, record.clone());
    let mut quantizer = builder(QuantizableModel::decoder(decoder), &record)
        .build()
        .unwrap();
    quantizer
        .quantize(text_dataset(3), out.path(), QuantizeOptions::default())
        .unwrap();

    let record = record.borrow();
    assert_eq!(record.generate_calls, 3);
    assert_eq!(record.samples_drawn, 6);
    assert_eq!(record.quantize_params[0].subset_size, 300);
}

#[test]
fn test_decoder_request_restored() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let decoder = FakeDecoder::new(true, record.clone());
    let mut quantizer = builder(QuantizableModel::decoder(decoder), &record)
        .build()
        .unwrap();
    quantizer
        .quantize(text_dataset(2), out.path(), QuantizeOptions::default())
        .unwrap();

    let QuantizableModel::Decoder(mut model) = quantizer.into_model() else {
        panic!("model representation changed");
    };
    let request = model.take_request().unwrap();
    assert!(request.into_inner().is_none());
}

#[test]
fn test_decoder_request_restored_after_failed_generation() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let mut decoder = FakeDecoder::new(true, record.clone());
    decoder.fail_generation = true;
    let mut quantizer = builder(QuantizableModel::decoder(decoder), &record)
        .build()
        .unwrap();
    let err = quantizer
        .quantize(text_dataset(2), out.path(), QuantizeOptions::default())
        .unwrap_err();
    assert!(matches!(err, PtqError::GenerationError(_)));
    assert!(record.borrow().quantize_params.is_empty());

    let QuantizableModel::Decoder(mut model) = quantizer.into_model() else {
        panic!("model representation changed");
    };
    assert!(model.take_request().unwrap().into_inner().is_none());
}

// ---------------------------------------------------------------------------
// Calibration loader
// ---------------------------------------------------------------------------

#[test]
fn test_unused_columns_filtered() {
    let record = Shared::default();
    let mut quantizer = builder(QuantizableModel::runtime(FakeRuntimeModel::new()), &record)
        .build()
        .unwrap();

    let data = dataset(4, &["input_ids", "attention_mask", "labels", "extra_meta"]);
    let loader = quantizer
        .get_calibration_dataloader(data, 2, true, None)
        .unwrap();
    assert_eq!(
        quantizer.input_names().unwrap(),
        &["attention_mask".to_string(), "input_ids".to_string()]
    );

    let filtered = loader.into_inner().dataset().clone();
    let again = quantizer
        .get_calibration_dataloader(filtered.clone(), 2, true, None)
        .unwrap();
    assert_eq!(again.loader().dataset().column_names(), filtered.column_names());
}

#[test]
fn test_columns_kept_without_filtering() {
    let record = Shared::default();
    let mut quantizer = builder(QuantizableModel::runtime(FakeRuntimeModel::new()), &record)
        .build()
        .unwrap();

    let data = dataset(4, &["input_ids", "extra_meta"]);
    quantizer.get_calibration_dataloader(data, 2, false, None).unwrap();
    assert_eq!(quantizer.input_names().unwrap().len(), 2);
}

fn batch_order(seed: u64) -> Vec<Vec<i64>> {
    let record = Shared::default();
    let mut quantizer = builder(QuantizableModel::runtime(FakeRuntimeModel::new()), &record)
        .seed(seed)
        .build()
        .unwrap();
    let mut loader = quantizer
        .get_calibration_dataloader(text_dataset(50), 8, true, None)
        .unwrap();
    loader
        .batches()
        .map(|batch| {
            batch.unwrap()["input_ids"]
                .to_vec2::<i64>()
                .unwrap()
                .into_iter()
                .map(|row| row[0])
                .collect()
        })
        .collect()
}

#[test]
fn test_same_seed_same_batches() {
    let first = batch_order(7);
    assert_eq!(first, batch_order(7));
    assert_ne!(first, batch_order(8));

    let sizes: Vec<usize> = first.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![8, 8, 8, 8, 8, 8, 2]);
}

// ---------------------------------------------------------------------------
// Trainable model
// ---------------------------------------------------------------------------

#[test]
fn test_seq2seq_task_rejected_before_export() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();
    let save_dir = out.path().join("quantized");

    let mut quantizer = trainable_builder(&record).task("summarization").build().unwrap();
    let err = quantizer
        .quantize(text_dataset(4), &save_dir, QuantizeOptions::default())
        .unwrap_err();

    assert!(matches!(err, PtqError::UnsupportedTask(_)));
    assert!(record.borrow().exports.is_empty());
    assert!(!save_dir.exists());
}

#[test]
fn test_unresolvable_task_is_config_error() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let mut quantizer = trainable_builder(&record).build().unwrap();
    let err = quantizer
        .quantize(text_dataset(4), out.path(), QuantizeOptions::default())
        .unwrap_err();

    assert!(matches!(err, PtqError::ConfigError(_)));
    assert_eq!(record.borrow().metadata_calls, 1);
    assert!(record.borrow().exports.is_empty());
}

#[test]
fn test_task_inferred_and_aliased() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let mut quantizer = trainable_builder(&record)
        .metadata(Box::new(FakeMetadata {
            tag: Some("sequence-classification".to_string()),
            record: record.clone(),
        }))
        .build()
        .unwrap();
    quantizer
        .quantize(text_dataset(4), out.path(), QuantizeOptions::default())
        .unwrap();

    assert_eq!(quantizer.task(), Some("text-classification"));
    let resolved = &record.borrow().resolved;
    assert_eq!(resolved[0], ("distil-bert".to_string(), "text-classification".to_string(), false));
}

#[test]
fn test_trainable_end_to_end() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let mut quantizer = trainable_builder(&record).task("text-generation").build().unwrap();
    let data = dataset(5, &["input_ids", "attention_mask", "token_type_ids", "labels", "idx"]);
    quantizer
        .quantize(data, out.path(), QuantizeOptions::default().batch_size(2))
        .unwrap();

    for name in [
        "config.json",
        "quantization_config.json",
        "quantized_model.json",
        "quantized_model.safetensors",
    ] {
        assert!(exists(out.path(), name), "missing {}", name);
    }
    assert!(!exists(out.path(), "model.onnx"));

    let record = record.borrow();
    assert_eq!(record.init_batches, 3);
    assert_eq!(record.resolved[0].2, true);

    let params = record.compression_params.as_ref().unwrap();
    let keywords: Vec<&str> = params["input_info"]
        .as_array()
        .unwrap()
        .iter()
        .map(|info| info["keyword"].as_str().unwrap())
        .collect();
    assert_eq!(keywords, vec!["attention_mask", "input_ids", "token_type_ids"]);

    let request = &record.exports[0];
    assert_eq!(request.opset, 11);
    assert_eq!(request.input_names, signature(&["input_ids", "attention_mask"]));
    assert_eq!(request.inputs.len(), 2);

    let graph = RuntimeGraph::read(&out.path().join("quantized_model.json")).unwrap();
    assert!(graph.compressed_weights().contains_key("classifier.weight"));
    assert!(graph.weight("classifier.bias").is_some());
}

#[test]
fn test_kept_interchange_graph_raises_opset() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let mut quantizer = trainable_builder(&record).task("fill-mask").build().unwrap();
    let config = rs_ptq::QuantizationConfig::default().with_save_onnx_model(true);
    quantizer
        .quantize(
            text_dataset(2),
            out.path(),
            QuantizeOptions::default().quantization_config(config).file_name("int8_model"),
        )
        .unwrap();

    let record = record.borrow();
    assert_eq!(record.exports[0].opset, 13);
    assert_eq!(
        record.exports[0].target,
        rs_ptq::export::ExportTarget::File(out.path().join("model.onnx"))
    );
    assert!(exists(out.path(), "int8_model.json"));
}

#[test]
fn test_empty_dataset_rejected() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let mut quantizer = trainable_builder(&record).task("fill-mask").build().unwrap();
    let empty = CalibrationDataset::from_examples(Vec::new()).unwrap();
    let err = quantizer
        .quantize(empty, out.path(), QuantizeOptions::default())
        .unwrap_err();
    assert!(matches!(err, PtqError::DatasetError(_)));
}

#[test]
fn test_feature_used_when_task_missing() {
    let record = Shared::default();
    let quantizer = trainable_builder(&record).feature("causal-lm").build().unwrap();
    assert_eq!(quantizer.task(), Some("causal-lm"));

    let quantizer = trainable_builder(&record)
        .task("fill-mask")
        .feature("causal-lm")
        .build()
        .unwrap();
    assert_eq!(quantizer.task(), Some("fill-mask"));
}

#[test]
fn test_inferred_seq2seq_task_rejected_before_export() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let mut quantizer = trainable_builder(&record)
        .metadata(Box::new(FakeMetadata {
            tag: Some("text2text-generation".to_string()),
            record: record.clone(),
        }))
        .build()
        .unwrap();
    let err = quantizer
        .quantize(text_dataset(4), out.path(), QuantizeOptions::default())
        .unwrap_err();

    assert!(matches!(err, PtqError::UnsupportedTask(_)));
    assert_eq!(record.borrow().metadata_calls, 1);
    assert!(record.borrow().exports.is_empty());
    assert!(record.borrow().compression_params.is_none());
}

#[test]
fn test_trainable_initializes_from_every_batch() {
    let record = Shared::default();
    let out = tempfile::tempdir().unwrap();

    let mut quantizer = trainable_builder(&record).task("text-classification").build().unwrap();
    quantizer
        .quantize(text_dataset(50), out.path(), QuantizeOptions::default().batch_size(8))
        .unwrap();

    assert_eq!(record.borrow().init_batches, 7);
}
