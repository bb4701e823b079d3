use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use encap_rs::backend::{
    Backend, BackendError, BackendOptions, BackendResult, BackendTensor, Executable, Placement,
};
use encap_rs::function::Function;
use encap_rs::tensor::{DType, HostTensor, TensorSpec};
use serde::{Deserialize, Serialize};

use crate::interpreter::{self, Value};

enum Storage {
    /// Aliases a host buffer; writes land in host memory directly.
    Host(HostTensor),
    Owned(RwLock<Vec<u8>>),
}

pub struct CpuTensor {
    spec: TensorSpec,
    storage: Storage,
    stale: AtomicBool,
}

impl CpuTensor {
    fn bound(spec: TensorSpec, host: HostTensor) -> Self {
        Self {
            spec,
            storage: Storage::Host(host),
            stale: AtomicBool::new(true),
        }
    }

    fn owned(spec: TensorSpec) -> Self {
        let len = spec.byte_len();
        Self {
            spec,
            storage: Storage::Owned(RwLock::new(vec![0u8; len])),
            stale: AtomicBool::new(true),
        }
    }

    /// Whether this tensor aliases `host`'s buffer.
    pub fn aliases(&self, host: &HostTensor) -> bool {
        matches!(&self.storage, Storage::Host(bound) if bound.shares_storage(host))
    }

    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        match &self.storage {
            Storage::Host(host) => f(host.bytes().as_slice()),
            Storage::Owned(bytes) => f(bytes.read().expect("cpu tensor storage poisoned").as_slice()),
        }
    }

    fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        match &self.storage {
            Storage::Host(host) => f(host.bytes_mut().as_mut_slice()),
            Storage::Owned(bytes) => {
                f(bytes.write().expect("cpu tensor storage poisoned").as_mut_slice())
            }
        }
    }

    fn to_value(&self) -> Value {
        Value {
            spec: self.spec.clone(),
            data: Arc::from(self.with_bytes(interpreter::f32_from_le_bytes)),
        }
    }

    fn store(&self, value: &Value) -> BackendResult<()> {
        if value.data.len() != self.spec.element_count() {
            return Err(BackendError::execution(format!(
                "result has {} elements, output tensor {} expects {}",
                value.data.len(),
                self.spec,
                self.spec.element_count()
            )));
        }
        self.write(&interpreter::f32_to_le_bytes(&value.data), 0)
    }
}

impl BackendTensor for CpuTensor {
    fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    fn write(&self, src: &[u8], offset: usize) -> BackendResult<()> {
        self.with_bytes_mut(|bytes| {
            let end = offset + src.len();
            let dst = bytes.get_mut(offset..end).ok_or_else(|| {
                BackendError::execution(format!("write of {} bytes at {offset} out of bounds", src.len()))
            })?;
            dst.copy_from_slice(src);
            Ok(())
        })
    }

    fn read(&self, dst: &mut [u8], offset: usize) -> BackendResult<()> {
        self.with_bytes(|bytes| {
            let end = offset + dst.len();
            let src = bytes.get(offset..end).ok_or_else(|| {
                BackendError::execution(format!("read of {} bytes at {offset} out of bounds", dst.len()))
            })?;
            dst.copy_from_slice(src);
            Ok(())
        })
    }

    fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::Release);
    }
}

/// Compiled form of a function: the validated function itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuExecutable {
    function: Function,
}

impl CpuExecutable {
    pub fn function(&self) -> &Function {
        &self.function
    }
}

impl Executable for CpuExecutable {
    type Tensor = CpuTensor;

    fn parameters(&self) -> &[TensorSpec] {
        &self.function.parameters
    }

    fn results(&self) -> &[TensorSpec] {
        &self.function.results
    }

    fn call(
        &self,
        outputs: &[Option<Arc<CpuTensor>>],
        inputs: &[Option<Arc<CpuTensor>>],
    ) -> BackendResult<()> {
        let parameters: Vec<Option<Value>> = self
            .function
            .parameters
            .iter()
            .enumerate()
            .map(|(idx, spec)| match inputs.get(idx) {
                Some(Some(tensor)) if spec.dtype == DType::F32 => Some(tensor.to_value()),
                _ => None,
            })
            .collect();
        let results = interpreter::evaluate(&self.function, &parameters)?;
        for (tensor, value) in outputs.iter().zip(results.iter()) {
            if let Some(tensor) = tensor {
                tensor.store(value)?;
                tensor.set_stale(false);
            }
        }
        Ok(())
    }

    fn serialize(&self) -> BackendResult<Vec<u8>> {
        bincode::serialize(self).map_err(|err| BackendError::execution(err.to_string()))
    }
}

/// Host-bound reference backend.
pub struct RefCpuBackend {
    name: String,
    live_executables: AtomicUsize,
    options: Mutex<BackendOptions>,
}

impl RefCpuBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            live_executables: AtomicUsize::new(0),
            options: Mutex::new(BackendOptions::new()),
        }
    }

    /// Executables compiled or loaded and not yet released.
    pub fn live_executables(&self) -> usize {
        self.live_executables.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> BackendOptions {
        self.options.lock().expect("backend options poisoned").clone()
    }

    fn admit(&self, function: Function) -> BackendResult<Arc<CpuExecutable>> {
        function
            .validate()
            .map_err(|err| BackendError::execution(err.to_string()))?;
        for instruction in &function.body {
            if instruction.spec.dtype != DType::F32 {
                return Err(BackendError::unimplemented(
                    "compile",
                    format!("{} produces {}, only f32 is supported", instruction.op, instruction.spec),
                ));
            }
        }
        self.live_executables.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(backend = %self.name, function = %function.name, "compiled function");
        Ok(Arc::new(CpuExecutable { function }))
    }
}

impl Default for RefCpuBackend {
    fn default() -> Self {
        Self::new(crate::CPU_BACKEND_NAME)
    }
}

impl Backend for RefCpuBackend {
    type Tensor = CpuTensor;
    type Executable = CpuExecutable;

    fn backend_name(&self) -> &str {
        &self.name
    }

    fn placement(&self) -> Placement {
        Placement::Host
    }

    fn compile(&self, function: &Function) -> BackendResult<Arc<CpuExecutable>> {
        self.admit(function.clone())
    }

    fn load(&self, serialized: &[u8]) -> BackendResult<Arc<CpuExecutable>> {
        let executable: CpuExecutable = bincode::deserialize(serialized)
            .map_err(|err| BackendError::execution(format!("failed to load executable: {err}")))?;
        self.admit(executable.function)
    }

    fn remove_compiled_function(&self, _executable: &Arc<CpuExecutable>) {
        let _ = self
            .live_executables
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| live.checked_sub(1));
    }

    fn create_tensor(
        &self,
        spec: &TensorSpec,
        host: Option<&HostTensor>,
    ) -> BackendResult<Arc<CpuTensor>> {
        match host {
            Some(host) => {
                if host.spec() != spec {
                    return Err(BackendError::execution(format!(
                        "host buffer {} does not match tensor {spec}",
                        host.spec()
                    )));
                }
                Ok(Arc::new(CpuTensor::bound(spec.clone(), host.clone())))
            }
            None => Ok(Arc::new(CpuTensor::owned(spec.clone()))),
        }
    }

    fn set_config(&self, options: &BackendOptions) -> BackendResult<()> {
        self.options
            .lock()
            .expect("backend options poisoned")
            .extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}
