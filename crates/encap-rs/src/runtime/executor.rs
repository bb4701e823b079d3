//! Orchestration of one execution unit: signature, get-or-compile, tensor
//! resolution and invocation.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::cache::{Artifact, ArtifactId, CompilationCache};
use super::dump;
use super::outputs::OutputBuffers;
use super::pipeline::PipelinedGroup;
use super::slots::SlotKind;
use crate::aot::parse_unit_attributes;
use crate::backend::{
    get_backend, with_backend_lock, Backend, BackendError, BackendTensor, Executable,
};
use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, ExecutorResult};
use crate::freshness::{FreshnessTracker, NeverFresh};
use crate::function::Function;
use crate::graph::{DefaultStaticInputs, Graph, StaticInputQuery, StaticInputs};
use crate::memory::MemoryProfile;
use crate::profiling;
use crate::signature::{compute_signature, ComputedSignature, Signature};
use crate::tensor::HostTensor;
use crate::translate::Translator;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(0);

/// A clustered subgraph bound to a named backend.
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    pub instance_id: u64,
    pub cluster_id: u64,
    pub graph_id: u64,
    pub backend_name: String,
    pub graph: Graph,
    /// Raw unit attributes; `_encap_` entries are interpreted at build time.
    pub attributes: BTreeMap<String, String>,
    /// Input positions bound to external storage; they receive no tensor.
    pub external_inputs: BTreeSet<usize>,
    pub external_outputs: BTreeSet<usize>,
}

impl ExecutionUnit {
    pub fn new(cluster_id: u64, graph: Graph, backend_name: impl Into<String>) -> Self {
        Self {
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            cluster_id,
            graph_id: 0,
            backend_name: backend_name.into(),
            graph,
            attributes: BTreeMap::new(),
            external_inputs: BTreeSet::new(),
            external_outputs: BTreeSet::new(),
        }
    }

    pub fn with_graph_id(mut self, graph_id: u64) -> Self {
        self.graph_id = graph_id;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn with_external_input(mut self, position: usize) -> Self {
        self.external_inputs.insert(position);
        self
    }

    pub fn with_external_output(mut self, position: usize) -> Self {
        self.external_outputs.insert(position);
        self
    }

    pub fn name(&self) -> String {
        format!("cluster_{}", self.cluster_id)
    }
}

/// Outcome of [`Executor::get_executable`].
pub struct ExecutableLookup<E> {
    pub artifact: ArtifactId,
    pub executable: Arc<E>,
    pub signature: Signature,
    pub cache_hit: bool,
}

pub struct InputTensors<T> {
    pub tensors: Vec<Option<Arc<T>>>,
    pub created: usize,
    pub copies: usize,
    pub bytes_copied: usize,
}

pub struct OutputTensors<T> {
    pub tensors: Vec<Option<Arc<T>>>,
    pub created: usize,
}

/// Per-call summary returned by [`Executor::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub artifact: ArtifactId,
    pub signature: Signature,
    pub cache_hit: bool,
    pub tensors_created: usize,
    pub input_copies: usize,
    pub bytes_copied: usize,
    pub pipeline_index: Option<usize>,
}

/// Cumulative counters for one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub compiles: u64,
    pub loads: u64,
    pub evictions: u64,
    pub tensors_created: u64,
    pub input_copies: u64,
    pub bytes_copied: u64,
    pub executions: u64,
}

pub struct ExecutorBuilder<B: Backend> {
    unit: ExecutionUnit,
    config: Option<ExecutorConfig>,
    translator: Option<Arc<dyn Translator>>,
    freshness: Arc<dyn FreshnessTracker>,
    static_query: Arc<dyn StaticInputQuery>,
    _backend: PhantomData<fn() -> B>,
}

impl<B: Backend> ExecutorBuilder<B> {
    /// Explicit configuration; without one the environment is consulted.
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn freshness(mut self, freshness: Arc<dyn FreshnessTracker>) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn static_input_query(mut self, query: Arc<dyn StaticInputQuery>) -> Self {
        self.static_query = query;
        self
    }

    pub fn build(self) -> ExecutorResult<Executor<B>> {
        let name = self.unit.name();
        let mut config = match self.config {
            Some(config) => config,
            None => ExecutorConfig::from_env()?,
        };
        config.validate()?;

        let attributes = parse_unit_attributes(&name, &self.unit.attributes)?;
        if let Some(table) = attributes.aot {
            config.aot = Some(table);
        }
        if config.aot.is_none() && self.translator.is_none() {
            return Err(ExecutorError::config(format!(
                "unit {name} has no translator and AOT was not requested"
            )));
        }

        let backend = get_backend::<B>(&self.unit.backend_name)?;
        if !attributes.backend_options.is_empty() {
            backend
                .set_config(&attributes.backend_options)
                .map_err(|err| {
                    ExecutorError::config(format!(
                        "unit {name} could not configure backend {}: {err}",
                        self.unit.backend_name
                    ))
                })?;
        }

        let static_inputs = StaticInputs::analyze(&self.unit.graph, self.static_query.as_ref())?;
        let executable_can_create_tensors = backend.executable_can_create_tensors();
        tracing::debug!(
            instance = self.unit.instance_id,
            unit = %name,
            backend = %self.unit.backend_name,
            static_inputs = ?static_inputs.as_slice(),
            pipelined = executable_can_create_tensors,
            "created executor"
        );

        Ok(Executor {
            name,
            cache: CompilationCache::new(config.cache_depth),
            unit: self.unit,
            backend,
            translator: self.translator,
            freshness: self.freshness,
            static_inputs,
            config,
            executable_can_create_tensors,
            stats: ExecutorStats::default(),
        })
    }
}

pub struct Executor<B: Backend> {
    name: String,
    unit: ExecutionUnit,
    backend: Arc<B>,
    translator: Option<Arc<dyn Translator>>,
    freshness: Arc<dyn FreshnessTracker>,
    static_inputs: StaticInputs,
    config: ExecutorConfig,
    executable_can_create_tensors: bool,
    cache: CompilationCache<B::Executable>,
    stats: ExecutorStats,
}

impl<B: Backend> Executor<B> {
    pub fn builder(unit: ExecutionUnit) -> ExecutorBuilder<B> {
        ExecutorBuilder {
            unit,
            config: None,
            translator: None,
            freshness: Arc::new(NeverFresh),
            static_query: Arc::new(DefaultStaticInputs),
            _backend: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &ExecutionUnit {
        &self.unit
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn static_inputs(&self) -> &StaticInputs {
        &self.static_inputs
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Cached signatures, most recently used first.
    pub fn cached_signatures(&self) -> Vec<Signature> {
        self.cache.lru_order()
    }

    pub fn artifact_for(&self, signature: &Signature) -> Option<ArtifactId> {
        self.cache.peek(signature)
    }

    pub fn is_cached(&self, artifact: ArtifactId) -> bool {
        self.cache.get(artifact).is_some()
    }

    /// Cached input and output tensors of `artifact`; zero once evicted.
    pub fn slot_count(&self, artifact: ArtifactId) -> usize {
        self.cache
            .get(artifact)
            .map(Artifact::slot_count)
            .unwrap_or(0)
    }

    pub fn pipeline_in_flight(&self, artifact: ArtifactId) -> usize {
        self.cache
            .get(artifact)
            .and_then(|entry| entry.pipeline.as_ref())
            .map(|store| store.in_flight())
            .unwrap_or(0)
    }

    pub fn compute_signature(&self, inputs: &[HostTensor]) -> ExecutorResult<ComputedSignature> {
        compute_signature(inputs, &self.static_inputs)
    }

    /// Returns the cached executable for `inputs`, compiling it on a miss.
    ///
    /// On a miss the function is translated (or taken from the AOT table),
    /// compiled under the backend's named lock and inserted at the front of
    /// the LRU order, evicting the least recently used artifact when the
    /// cache is full. A failed compile leaves the cache untouched.
    pub fn get_executable(
        &mut self,
        inputs: &[HostTensor],
    ) -> ExecutorResult<ExecutableLookup<B::Executable>> {
        let computed = compute_signature(inputs, &self.static_inputs)?;
        let signature = computed.signature.clone();
        tracing::trace!(unit = %self.name, %signature, "computed signature");

        if let Some(artifact) = self.cache.lookup(&signature) {
            let executable = self.artifact(artifact)?.executable.clone();
            self.stats.cache_hits += 1;
            profiling::cache_event("executable_cache_hit");
            tracing::debug!(unit = %self.name, "compilation cache hit");
            return Ok(ExecutableLookup {
                artifact,
                executable,
                signature,
                cache_hit: true,
            });
        }

        self.stats.cache_misses += 1;
        profiling::cache_event("executable_cache_miss");
        tracing::debug!(unit = %self.name, "compilation cache miss");
        let before = MemoryProfile::current();

        let function = self.obtain_function(&computed)?;
        let function_size = function.graph_size();
        if self.config.serialize_on_compile {
            dump::write_function_best_effort(
                dump::function_path(&self.config.dump_dir, &self.name),
                &function,
            );
        }

        let executable = self.compile(&signature, &function)?;
        if self.cache.is_full() {
            self.evict_lru();
        }
        let artifact = self
            .cache
            .insert(signature.clone(), Arc::clone(&executable), Arc::new(function));

        let after = MemoryProfile::current();
        let delta = after.delta_since(&before);
        tracing::info!(
            instance = self.unit.instance_id,
            unit = %self.name,
            cache_len = self.cache.len(),
            delta_vm_kb = delta.vm_kb,
            delta_rss_kb = delta.rss_kb,
            function_size,
            rss_kb = after.rss_kb,
            vm_kb = after.vm_kb,
            "compiled executable"
        );

        Ok(ExecutableLookup {
            artifact,
            executable,
            signature,
            cache_hit: false,
        })
    }

    /// Function `artifact` was compiled from.
    pub fn function_for(&self, artifact: ArtifactId) -> ExecutorResult<Arc<Function>> {
        Ok(Arc::clone(&self.artifact(artifact)?.function))
    }

    /// Resolves a backend tensor for every input, copying stale device inputs.
    pub fn allocate_input_tensors(
        &mut self,
        artifact: ArtifactId,
        inputs: &[HostTensor],
    ) -> ExecutorResult<InputTensors<B::Tensor>> {
        let unit = &self.name;
        let entry = self
            .cache
            .get_mut(artifact)
            .ok_or_else(|| missing_artifact(unit, artifact))?;
        let host_bound = self.backend.placement().is_host_bound();

        let mut allocation = InputTensors {
            tensors: Vec::with_capacity(inputs.len()),
            created: 0,
            copies: 0,
            bytes_copied: 0,
        };
        for (position, host) in inputs.iter().enumerate() {
            if self.unit.external_inputs.contains(&position) {
                allocation.tensors.push(None);
                continue;
            }
            let resolution = entry
                .input_slots
                .resolve(
                    self.backend.as_ref(),
                    position,
                    host,
                    SlotKind::Input,
                    self.freshness.as_ref(),
                    artifact,
                )
                .map_err(|err| {
                    ExecutorError::internal(unit, format!("creating tensor for input {position}: {err}"))
                })?;
            if resolution.created {
                allocation.created += 1;
            }
            if !host_bound && resolution.stale {
                allocation.bytes_copied += write_input(unit, position, resolution.tensor.as_ref(), host)?;
                allocation.copies += 1;
                self.freshness.mark_fresh(host.host_ptr(), artifact);
            }
            allocation.tensors.push(Some(resolution.tensor));
        }

        self.stats.tensors_created += allocation.created as u64;
        self.stats.input_copies += allocation.copies as u64;
        self.stats.bytes_copied += allocation.bytes_copied as u64;
        Ok(allocation)
    }

    /// Resolves a backend tensor for every output; all of them come back stale.
    pub fn allocate_output_tensors(
        &mut self,
        artifact: ArtifactId,
        outputs: &[HostTensor],
    ) -> ExecutorResult<OutputTensors<B::Tensor>> {
        let unit = &self.name;
        let entry = self
            .cache
            .get_mut(artifact)
            .ok_or_else(|| missing_artifact(unit, artifact))?;

        let mut allocation = OutputTensors {
            tensors: Vec::with_capacity(outputs.len()),
            created: 0,
        };
        for (position, host) in outputs.iter().enumerate() {
            if self.unit.external_outputs.contains(&position) {
                allocation.tensors.push(None);
                continue;
            }
            let resolution = entry
                .output_slots
                .resolve(
                    self.backend.as_ref(),
                    position,
                    host,
                    SlotKind::Output,
                    self.freshness.as_ref(),
                    artifact,
                )
                .map_err(|err| {
                    ExecutorError::internal(unit, format!("creating tensor for output {position}: {err}"))
                })?;
            if resolution.created {
                allocation.created += 1;
            }
            allocation.tensors.push(Some(resolution.tensor));
        }

        self.stats.tensors_created += allocation.created as u64;
        Ok(allocation)
    }

    /// Acquires a free pipelined tensor group, creating the artifact's store on first use.
    pub fn tensors_from_pipeline(
        &mut self,
        artifact: ArtifactId,
    ) -> ExecutorResult<PipelinedGroup<B::Tensor>> {
        let unit = &self.name;
        if !self.executable_can_create_tensors {
            return Err(ExecutorError::internal(
                unit,
                format!(
                    "pipelined tensors requested, but executables of backend {} cannot create tensors",
                    self.unit.backend_name
                ),
            ));
        }
        let entry = self
            .cache
            .get_mut(artifact)
            .ok_or_else(|| missing_artifact(unit, artifact))?;

        if entry.pipeline.is_none() {
            let executable = Arc::clone(&entry.executable);
            let depth = self.config.pipeline_depth;
            let backend_name = &self.unit.backend_name;
            let creation_error = |kind: SlotKind, position: usize, err: BackendError| {
                ExecutorError::internal(
                    unit,
                    format!(
                        "backend {backend_name} could not create pipelined tensors for {kind} {position}: {err}"
                    ),
                )
            };
            let inputs = (0..executable.parameters().len())
                .map(|position| {
                    executable
                        .create_input_tensors(position, depth)
                        .map_err(|err| creation_error(SlotKind::Input, position, err))
                })
                .collect::<ExecutorResult<Vec<_>>>()?;
            let outputs = (0..executable.results().len())
                .map(|position| {
                    executable
                        .create_output_tensors(position, depth)
                        .map_err(|err| creation_error(SlotKind::Output, position, err))
                })
                .collect::<ExecutorResult<Vec<_>>>()?;
            let store = super::pipeline::PipelinedTensorStore::new(inputs, outputs, depth)
                .map_err(|err| ExecutorError::internal(unit, err.to_string()))?;
            tracing::debug!(unit = %unit, %artifact, depth, "initialized tensor pipeline");
            entry.pipeline = Some(store);
        }

        let store = entry
            .pipeline
            .as_mut()
            .ok_or_else(|| ExecutorError::internal(unit, "tensor pipeline missing"))?;
        store
            .get_tensors()
            .ok_or_else(|| ExecutorError::exhausted(unit, "no free tensor available"))
    }

    /// Hands a pipelined group back so its index can be reused.
    pub fn return_pipeline_group(&mut self, artifact: ArtifactId, index: usize) -> ExecutorResult<()> {
        let unit = &self.name;
        let entry = self
            .cache
            .get_mut(artifact)
            .ok_or_else(|| missing_artifact(unit, artifact))?;
        let store = entry
            .pipeline
            .as_mut()
            .ok_or_else(|| ExecutorError::internal(unit, format!("{artifact} has no tensor pipeline")))?;
        store
            .return_tensors(index)
            .map_err(|err| ExecutorError::internal(unit, err.to_string()))
    }

    /// Runs the unit on `inputs`, leaving results in `outputs`.
    pub fn execute(
        &mut self,
        inputs: &[HostTensor],
        outputs: &mut OutputBuffers,
    ) -> ExecutorResult<ExecutionReport> {
        let lookup = self.get_executable(inputs)?;
        let executable = Arc::clone(&lookup.executable);
        if inputs.len() != executable.parameters().len() {
            return Err(ExecutorError::internal(
                &self.name,
                format!(
                    "executable expects {} inputs, got {}",
                    executable.parameters().len(),
                    inputs.len()
                ),
            ));
        }
        outputs.prepare(executable.results());

        let mut report = ExecutionReport {
            artifact: lookup.artifact,
            signature: lookup.signature,
            cache_hit: lookup.cache_hit,
            tensors_created: 0,
            input_copies: 0,
            bytes_copied: 0,
            pipeline_index: None,
        };

        if self.executable_can_create_tensors {
            let group = self.tensors_from_pipeline(lookup.artifact)?;
            report.pipeline_index = Some(group.index);
            let result = self.run_pipelined(executable.as_ref(), &group, inputs, outputs, &mut report);
            self.return_pipeline_group(lookup.artifact, group.index)?;
            result?;
        } else {
            let input_tensors = self.allocate_input_tensors(lookup.artifact, inputs)?;
            let output_tensors = self.allocate_output_tensors(lookup.artifact, outputs.as_slice())?;
            report.tensors_created = input_tensors.created + output_tensors.created;
            report.input_copies = input_tensors.copies;
            report.bytes_copied = input_tensors.bytes_copied;

            executable
                .call(&output_tensors.tensors, &input_tensors.tensors)
                .map_err(|err| self.execution_error(err))?;
            if !self.backend.placement().is_host_bound() {
                for (position, tensor) in output_tensors.tensors.iter().enumerate() {
                    if let (Some(tensor), Some(host)) = (tensor, outputs.get(position)) {
                        read_output(&self.name, position, tensor.as_ref(), host)?;
                    }
                }
            }
        }

        for (position, buffer) in outputs.as_slice().iter().enumerate() {
            if !self.unit.external_outputs.contains(&position) {
                self.freshness.invalidate(buffer.host_ptr());
            }
        }
        self.stats.executions += 1;
        Ok(report)
    }

    fn run_pipelined(
        &mut self,
        executable: &B::Executable,
        group: &PipelinedGroup<B::Tensor>,
        inputs: &[HostTensor],
        outputs: &OutputBuffers,
        report: &mut ExecutionReport,
    ) -> ExecutorResult<()> {
        let unit = &self.name;
        let mut input_tensors = Vec::with_capacity(inputs.len());
        for (position, host) in inputs.iter().enumerate() {
            if self.unit.external_inputs.contains(&position) {
                input_tensors.push(None);
                continue;
            }
            let tensor = group.inputs.get(position).ok_or_else(|| {
                ExecutorError::internal(unit, format!("pipeline has no tensor for input {position}"))
            })?;
            // Group tensors rotate between calls, so content is never assumed current.
            tensor.set_stale(true);
            report.bytes_copied += write_input(unit, position, tensor.as_ref(), host)?;
            report.input_copies += 1;
            input_tensors.push(Some(Arc::clone(tensor)));
        }

        let output_tensors: Vec<Option<Arc<B::Tensor>>> = group
            .outputs
            .iter()
            .enumerate()
            .map(|(position, tensor)| {
                if self.unit.external_outputs.contains(&position) {
                    None
                } else {
                    tensor.set_stale(true);
                    Some(Arc::clone(tensor))
                }
            })
            .collect();

        executable
            .call(&output_tensors, &input_tensors)
            .map_err(|err| self.execution_error(err))?;
        for (position, tensor) in output_tensors.iter().enumerate() {
            if let (Some(tensor), Some(host)) = (tensor, outputs.get(position)) {
                read_output(unit, position, tensor.as_ref(), host)?;
            }
        }

        self.stats.input_copies += report.input_copies as u64;
        self.stats.bytes_copied += report.bytes_copied as u64;
        Ok(())
    }

    fn artifact(&self, artifact: ArtifactId) -> ExecutorResult<&Artifact<B::Executable>> {
        self.cache
            .get(artifact)
            .ok_or_else(|| missing_artifact(&self.name, artifact))
    }

    fn obtain_function(&self, computed: &ComputedSignature) -> ExecutorResult<Function> {
        if let Some(table) = &self.config.aot {
            return table.function(&computed.signature).unwrap_or_else(|| {
                Err(ExecutorError::config(format!(
                    "unit {} on backend {} expected to find AOT precompiled function of signature: {}",
                    self.name, self.unit.backend_name, computed.signature
                )))
            });
        }
        let translator = self.translator.as_ref().ok_or_else(|| {
            ExecutorError::config(format!("unit {} has no translator", self.name))
        })?;
        let _scope = profiling::compile_scope("translate");
        let mut function = translator.translate(
            &self.unit.graph,
            &computed.input_shapes,
            &computed.static_values,
        )?;
        function.name = self.name.clone();
        Ok(function)
    }

    fn compile(
        &mut self,
        signature: &Signature,
        function: &Function,
    ) -> ExecutorResult<Arc<B::Executable>> {
        let aot_bytes = match &self.config.aot {
            Some(table) => Some(table.executable(signature).ok_or_else(|| {
                ExecutorError::config(format!(
                    "unit {} on backend {} requested AOT, but could not find an executable with the signature: {signature}",
                    self.name, self.unit.backend_name
                ))
            })?),
            None => None,
        };
        let is_aot = aot_bytes.is_some();
        let backend = Arc::clone(&self.backend);

        let result = {
            let _scope = profiling::compile_scope("compile");
            with_backend_lock(&self.unit.backend_name, || {
                panic::catch_unwind(AssertUnwindSafe(|| match aot_bytes {
                    Some(bytes) => backend.load(bytes),
                    None => backend.compile(function),
                }))
                .unwrap_or_else(|payload| Err(BackendError::execution(panic_message(&*payload))))
            })?
        };

        match result {
            Ok(executable) => {
                if is_aot {
                    self.stats.loads += 1;
                } else {
                    self.stats.compiles += 1;
                }
                Ok(executable)
            }
            Err(err) => {
                let dump = dump::write_function_best_effort(
                    dump::error_function_path(&self.config.dump_dir, &self.name),
                    function,
                );
                tracing::warn!(
                    unit = %self.name,
                    backend = %self.unit.backend_name,
                    %signature,
                    error = %err,
                    "compile failed"
                );
                Err(ExecutorError::CompileFailed {
                    unit: self.name.clone(),
                    backend: self.unit.backend_name.clone(),
                    signature: signature.to_string(),
                    message: err.to_string(),
                    dump,
                })
            }
        }
    }

    fn evict_lru(&mut self) {
        let Some(mut evicted) = self.cache.evict_lru() else {
            return;
        };
        self.backend.remove_compiled_function(&evicted.executable);
        let (input_bytes, output_bytes) = evicted.release_tensors();
        self.freshness.forget_artifact(evicted.id);
        self.stats.evictions += 1;
        tracing::info!(
            instance = self.unit.instance_id,
            unit = %self.name,
            signature = %evicted.signature,
            input_mb = input_bytes / (1024 * 1024),
            output_mb = output_bytes / (1024 * 1024),
            input_bytes,
            output_bytes,
            "evicted executable"
        );
    }

    fn execution_error(&self, err: BackendError) -> ExecutorError {
        ExecutorError::internal(
            &self.name,
            format!("error executing on backend {}: {err}", self.unit.backend_name),
        )
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string payload"));
    format!("backend panicked: {detail}")
}

fn missing_artifact(unit: &str, artifact: ArtifactId) -> ExecutorError {
    ExecutorError::internal(unit, format!("{artifact} not found in the cache"))
}

/// Copies `element_count * element_size` bytes of `host` into `tensor`.
fn write_input<T: BackendTensor + ?Sized>(
    unit: &str,
    position: usize,
    tensor: &T,
    host: &HostTensor,
) -> ExecutorResult<usize> {
    let len = tensor.element_count() * host.dtype().size_in_bytes();
    let bytes = host.bytes();
    let src = bytes.get(..len).ok_or_else(|| {
        ExecutorError::internal(
            unit,
            format!(
                "input {position} holds {} bytes, backend tensor needs {len}",
                bytes.len()
            ),
        )
    })?;
    tensor.write(src, 0).map_err(|err| {
        ExecutorError::internal(unit, format!("error transferring input {position} to backend: {err}"))
    })?;
    profiling::cache_event("input_copy");
    Ok(len)
}

fn read_output<T: BackendTensor + ?Sized>(
    unit: &str,
    position: usize,
    tensor: &T,
    host: &HostTensor,
) -> ExecutorResult<()> {
    let mut bytes = host.bytes_mut();
    tensor.read(bytes.as_mut_slice(), 0).map_err(|err| {
        ExecutorError::internal(unit, format!("error reading output {position} from backend: {err}"))
    })
}
