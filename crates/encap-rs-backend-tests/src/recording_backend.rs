use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use encap_rs::backend::{
    Backend, BackendError, BackendOptions, BackendResult, BackendTensor, Executable, Placement,
};
use encap_rs::function::Function;
use encap_rs::tensor::{DType, HostTensor, TensorSpec};
use encap_rs_backend_ref_cpu::interpreter::{self, Value};

/// Counters shared between a [`RecordingBackend`] and everything it creates.
#[derive(Debug, Default)]
pub struct Counters {
    pub compiles: AtomicUsize,
    pub loads: AtomicUsize,
    pub releases: AtomicUsize,
    pub tensors_created: AtomicUsize,
    pub live_tensors: AtomicUsize,
    pub writes: AtomicUsize,
    pub bytes_written: AtomicUsize,
    pub reads: AtomicUsize,
    pub calls: AtomicUsize,
    active_compiles: AtomicUsize,
    pub max_concurrent_compiles: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// How a [`RecordingBackend`] behaves towards the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    /// Tensors alias host buffers.
    Host,
    /// Tensors own storage and need explicit copies.
    Device,
    /// Device storage, with executables pre-creating tensor groups.
    Pipelined,
}

enum Storage {
    Host(HostTensor),
    Owned(RwLock<Vec<u8>>),
}

pub struct RecordingTensor {
    spec: TensorSpec,
    storage: Storage,
    stale: AtomicBool,
    counters: Arc<Counters>,
}

impl RecordingTensor {
    fn new(spec: TensorSpec, host: Option<&HostTensor>, counters: &Arc<Counters>) -> Self {
        let storage = match host {
            Some(host) => Storage::Host(host.clone()),
            None => Storage::Owned(RwLock::new(vec![0u8; spec.byte_len()])),
        };
        counters.tensors_created.fetch_add(1, Ordering::SeqCst);
        counters.live_tensors.fetch_add(1, Ordering::SeqCst);
        Self {
            spec,
            storage,
            stale: AtomicBool::new(true),
            counters: Arc::clone(counters),
        }
    }

    pub fn aliases(&self, host: &HostTensor) -> bool {
        matches!(&self.storage, Storage::Host(bound) if bound.shares_storage(host))
    }

    pub fn contents(&self) -> Vec<u8> {
        match &self.storage {
            Storage::Host(host) => host.bytes().clone(),
            Storage::Owned(bytes) => bytes.read().expect("tensor storage poisoned").clone(),
        }
    }

    fn overwrite(&self, src: &[u8], offset: usize) -> BackendResult<()> {
        let copy = |bytes: &mut [u8]| -> BackendResult<()> {
            let dst = bytes
                .get_mut(offset..offset + src.len())
                .ok_or_else(|| BackendError::execution("write out of bounds"))?;
            dst.copy_from_slice(src);
            Ok(())
        };
        match &self.storage {
            Storage::Host(host) => copy(host.bytes_mut().as_mut_slice()),
            Storage::Owned(bytes) => {
                copy(bytes.write().expect("tensor storage poisoned").as_mut_slice())
            }
        }
    }

    fn to_value(&self) -> Option<Value> {
        (self.spec.dtype == DType::F32).then(|| Value {
            spec: self.spec.clone(),
            data: Arc::from(interpreter::f32_from_le_bytes(&self.contents())),
        })
    }
}

impl Drop for RecordingTensor {
    fn drop(&mut self) {
        self.counters.live_tensors.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BackendTensor for RecordingTensor {
    fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    fn write(&self, src: &[u8], offset: usize) -> BackendResult<()> {
        self.overwrite(src, offset)?;
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        self.counters
            .bytes_written
            .fetch_add(src.len(), Ordering::SeqCst);
        Ok(())
    }

    fn read(&self, dst: &mut [u8], offset: usize) -> BackendResult<()> {
        let contents = self.contents();
        let src = contents
            .get(offset..offset + dst.len())
            .ok_or_else(|| BackendError::execution("read out of bounds"))?;
        dst.copy_from_slice(src);
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::SeqCst);
    }
}

pub struct RecordingExecutable {
    function: Function,
    pipelined: bool,
    counters: Arc<Counters>,
}

impl RecordingExecutable {
    pub fn function(&self) -> &Function {
        &self.function
    }

    fn create_tensors(&self, spec: &TensorSpec, depth: usize) -> Vec<Arc<RecordingTensor>> {
        (0..depth)
            .map(|_| Arc::new(RecordingTensor::new(spec.clone(), None, &self.counters)))
            .collect()
    }
}

impl Executable for RecordingExecutable {
    type Tensor = RecordingTensor;

    fn parameters(&self) -> &[TensorSpec] {
        &self.function.parameters
    }

    fn results(&self) -> &[TensorSpec] {
        &self.function.results
    }

    fn call(
        &self,
        outputs: &[Option<Arc<RecordingTensor>>],
        inputs: &[Option<Arc<RecordingTensor>>],
    ) -> BackendResult<()> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let parameters: Vec<Option<Value>> = (0..self.function.parameters.len())
            .map(|idx| inputs.get(idx).cloned().flatten().and_then(|t| t.to_value()))
            .collect();
        let results = interpreter::evaluate(&self.function, &parameters)?;
        for (tensor, value) in outputs.iter().zip(results.iter()) {
            if let Some(tensor) = tensor {
                tensor.overwrite(&interpreter::f32_to_le_bytes(&value.data), 0)?;
                tensor.set_stale(false);
            }
        }
        Ok(())
    }

    fn create_input_tensors(
        &self,
        position: usize,
        depth: usize,
    ) -> BackendResult<Vec<Arc<RecordingTensor>>> {
        if !self.pipelined {
            return Err(BackendError::unimplemented(
                "create_input_tensors",
                "recording backend is not pipelined",
            ));
        }
        let spec = self
            .function
            .parameters
            .get(position)
            .ok_or_else(|| BackendError::execution(format!("no parameter {position}")))?;
        Ok(self.create_tensors(spec, depth))
    }

    fn create_output_tensors(
        &self,
        position: usize,
        depth: usize,
    ) -> BackendResult<Vec<Arc<RecordingTensor>>> {
        if !self.pipelined {
            return Err(BackendError::unimplemented(
                "create_output_tensors",
                "recording backend is not pipelined",
            ));
        }
        let spec = self
            .function
            .results
            .get(position)
            .ok_or_else(|| BackendError::execution(format!("no result {position}")))?;
        Ok(self.create_tensors(spec, depth))
    }

    fn serialize(&self) -> BackendResult<Vec<u8>> {
        bincode::serialize(&self.function).map_err(|err| BackendError::execution(err.to_string()))
    }
}

/// Test backend that runs functions through the reference interpreter while
/// counting every compile, load, allocation and copy the executor requests.
pub struct RecordingBackend {
    name: String,
    mode: RecordingMode,
    compile_delay: Duration,
    fail_next_compile: AtomicBool,
    panic_next_compile: AtomicBool,
    fail_next_tensor: AtomicBool,
    rejected_option: Option<String>,
    counters: Arc<Counters>,
    options: Mutex<BackendOptions>,
}

impl RecordingBackend {
    pub fn new(name: impl Into<String>, mode: RecordingMode) -> Self {
        Self {
            name: name.into(),
            mode,
            compile_delay: Duration::ZERO,
            fail_next_compile: AtomicBool::new(false),
            panic_next_compile: AtomicBool::new(false),
            fail_next_tensor: AtomicBool::new(false),
            rejected_option: None,
            counters: Arc::new(Counters::default()),
            options: Mutex::new(BackendOptions::new()),
        }
    }

    /// Sleep inside every compile, widening the window for overlapping calls.
    pub fn with_compile_delay(mut self, delay: Duration) -> Self {
        self.compile_delay = delay;
        self
    }

    /// Make [`Backend::set_config`] fail whenever `key` is present.
    pub fn rejecting_option(mut self, key: impl Into<String>) -> Self {
        self.rejected_option = Some(key.into());
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn fail_next_compile(&self) {
        self.fail_next_compile.store(true, Ordering::SeqCst);
    }

    pub fn panic_next_compile(&self) {
        self.panic_next_compile.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_tensor(&self) {
        self.fail_next_tensor.store(true, Ordering::SeqCst);
    }

    pub fn options(&self) -> BackendOptions {
        self.options.lock().expect("backend mutex poisoned").clone()
    }

    fn admit(&self, function: Function) -> Arc<RecordingExecutable> {
        Arc::new(RecordingExecutable {
            function,
            pipelined: self.mode == RecordingMode::Pipelined,
            counters: Arc::clone(&self.counters),
        })
    }
}

impl Backend for RecordingBackend {
    type Tensor = RecordingTensor;
    type Executable = RecordingExecutable;

    fn backend_name(&self) -> &str {
        &self.name
    }

    fn placement(&self) -> Placement {
        match self.mode {
            RecordingMode::Host => Placement::Host,
            RecordingMode::Device | RecordingMode::Pipelined => Placement::Device,
        }
    }

    fn executable_can_create_tensors(&self) -> bool {
        self.mode == RecordingMode::Pipelined
    }

    fn compile(&self, function: &Function) -> BackendResult<Arc<RecordingExecutable>> {
        let active = self.counters.active_compiles.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_concurrent_compiles
            .fetch_max(active, Ordering::SeqCst);
        if !self.compile_delay.is_zero() {
            thread::sleep(self.compile_delay);
        }
        self.counters.active_compiles.fetch_sub(1, Ordering::SeqCst);

        if self.panic_next_compile.swap(false, Ordering::SeqCst) {
            panic!("injected compile panic");
        }
        if self.fail_next_compile.swap(false, Ordering::SeqCst) {
            return Err(BackendError::execution("injected compile failure"));
        }
        self.counters.compiles.fetch_add(1, Ordering::SeqCst);
        Ok(self.admit(function.clone()))
    }

    fn load(&self, serialized: &[u8]) -> BackendResult<Arc<RecordingExecutable>> {
        let function: Function = bincode::deserialize(serialized)
            .map_err(|err| BackendError::execution(err.to_string()))?;
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.admit(function))
    }

    fn remove_compiled_function(&self, _executable: &Arc<RecordingExecutable>) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn create_tensor(
        &self,
        spec: &TensorSpec,
        host: Option<&HostTensor>,
    ) -> BackendResult<Arc<RecordingTensor>> {
        if self.fail_next_tensor.swap(false, Ordering::SeqCst) {
            return Err(BackendError::execution("injected allocation failure"));
        }
        let binding = match self.mode {
            RecordingMode::Host => host,
            RecordingMode::Device | RecordingMode::Pipelined => None,
        };
        Ok(Arc::new(RecordingTensor::new(spec.clone(), binding, &self.counters)))
    }

    fn set_config(&self, options: &BackendOptions) -> BackendResult<()> {
        if let Some(key) = self
            .rejected_option
            .as_ref()
            .filter(|key| options.contains_key(key.as_str()))
        {
            return Err(BackendError::execution(format!("unsupported option '{key}'")));
        }
        self.options
            .lock()
            .expect("backend mutex poisoned")
            .extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}
