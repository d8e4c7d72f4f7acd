//! Inference requests and the capturing wrapper used during decoder calibration.

use std::cell::RefCell;
use std::rc::Rc;

use candle_core::Tensor;

use crate::data::Features;

/// Inference request of a compiled model.
///
/// Mirrors the runtime's request object: synchronous call and `infer`,
/// asynchronous `start_async`/`wait`, and access to the last results.
pub trait InferRequest {
    /// Run inference synchronously (call operator)
    fn call(&mut self, inputs: Features) -> crate::Result<Features>;

    /// Run inference synchronously
    fn infer(&mut self, inputs: Features, shared_memory: bool) -> crate::Result<Features>;

    /// Start inference without waiting for it
    fn start_async(&mut self, inputs: Features, shared_memory: bool) -> crate::Result<()>;

    /// Block until the pending inference finishes
    fn wait(&mut self) -> crate::Result<()>;

    /// Output or input tensor by name
    fn get_tensor(&self, name: &str) -> crate::Result<Tensor>;

    /// Outputs of the last completed inference
    fn results(&self) -> &Features;

    /// Names of the compiled model inputs
    fn input_names(&self) -> Vec<String>;

    /// Reset internal state of stateful models
    fn reset_state(&mut self) -> crate::Result<()>;

    /// Request wrapped by this one, if any
    fn into_inner(self: Box<Self>) -> Option<Box<dyn InferRequest>> {
        None
    }
}

/// Append-only buffer of captured inference inputs.
///
/// Cloning yields another handle on the same buffer.
#[derive(Debug, Clone, Default)]
pub struct DataCache {
    entries: Rc<RefCell<Vec<Features>>>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, inputs: Features) {
        self.entries.borrow_mut().push(inputs);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Move all captured inputs out, leaving the cache empty
    pub fn take(&self) -> Vec<Features> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }
}

/// Records the inputs of every inference before delegating to the wrapped request.
///
/// `call`, `infer` and `start_async` capture; `start_async` runs the
/// inference synchronously so `wait` has nothing left to do. All other
/// methods forward to the wrapped request.
pub struct InferRequestWrapper {
    request: Box<dyn InferRequest>,
    cache: DataCache,
}

impl InferRequestWrapper {
    pub fn new(request: Box<dyn InferRequest>, cache: DataCache) -> Self {
        Self { request, cache }
    }

    /// The wrapped request
    pub fn request(&self) -> &dyn InferRequest {
        self.request.as_ref()
    }
}

impl InferRequest for InferRequestWrapper {
    fn call(&mut self, inputs: Features) -> crate::Result<Features> {
        self.cache.push(inputs.clone());
        self.request.call(inputs)
    }

    fn infer(&mut self, inputs: Features, shared_memory: bool) -> crate::Result<Features> {
        self.cache.push(inputs.clone());
        self.request.infer(inputs, shared_memory)
    }

    fn start_async(&mut self, inputs: Features, shared_memory: bool) -> crate::Result<()> {
        self.cache.push(inputs.clone());
        self.request.infer(inputs, shared_memory)?;
        Ok(())
    }

    fn wait(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn get_tensor(&self, name: &str) -> crate::Result<Tensor> {
        self.request.results().get(name).cloned().ok_or_else(|| {
            crate::PtqError::RuntimeError(format!("No result tensor named '{}'", name))
        })
    }

    fn results(&self) -> &Features {
        self.request.results()
    }

    fn input_names(&self) -> Vec<String> {
        self.request.input_names()
    }

    fn reset_state(&mut self) -> crate::Result<()> {
        self.request.reset_state()
    }

    fn into_inner(self: Box<Self>) -> Option<Box<dyn InferRequest>> {
        Some(self.request)
    }
}
