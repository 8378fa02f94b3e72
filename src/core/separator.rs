use std::{collections::HashMap, path::Path, sync::Arc};

use crate::{
    core::{
        batch::{run_batch, BatchResult},
        device::DeviceResolver,
        executor::execute,
    },
    error::{Result, StemError},
    model::cache::ModelCache,
    types::{
        is_supported_input, source_stem_name, Device, DevicePreference, SeparationRequest,
        StemSet, SUPPORTED_INPUT_FORMATS,
    },
};

/// Drives a request through device resolution, the model cache and the executor.
#[derive(Clone)]
pub struct Separator {
    resolver: DeviceResolver,
    cache: Arc<ModelCache>,
}

impl Separator {
    pub fn new(resolver: DeviceResolver, cache: Arc<ModelCache>) -> Self {
        Self { resolver, cache }
    }

    pub fn resolver(&self) -> &DeviceResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Cheap checks run before any model is touched.
    pub fn validate(&self, request: &SeparationRequest) -> Result<()> {
        let path = request.source_path();
        if !path.is_file() {
            return Err(StemError::invalid_input(format!(
                "input file not found: {}",
                path.display()
            )));
        }
        if !is_supported_input(path) {
            return Err(StemError::invalid_input(format!(
                "unsupported input format for {} (allowed: {})",
                path.display(),
                SUPPORTED_INPUT_FORMATS.join(", ")
            )));
        }
        self.cache.resolve(request.model_name())?;
        Ok(())
    }

    /// Validates and executes one request into `output_dir`.
    ///
    /// With `auto`, an accelerator OOM is retried once on CPU. Explicit device
    /// requests surface the OOM as is.
    pub fn separate(&self, request: &SeparationRequest, output_dir: &Path) -> Result<StemSet> {
        self.validate(request)?;
        let device = self.resolver.resolve(request.device_preference())?;

        match self.run_on(request, device, output_dir) {
            Err(e)
                if e.is_retryable()
                    && device == Device::Gpu
                    && request.device_preference() == DevicePreference::Auto =>
            {
                tracing::warn!(
                    source = %request.source_path().display(),
                    error = %e,
                    "accelerator out of memory, retrying on cpu"
                );
                self.run_on(request, Device::Cpu, output_dir)
            }
            other => other,
        }
    }

    fn run_on(&self, request: &SeparationRequest, device: Device, output_dir: &Path) -> Result<StemSet> {
        let model = self.cache.get_or_load(request.model_name(), device)?;
        execute(request, model.as_ref(), output_dir)
    }

    /// Runs every request in order, each into its own `<output_root>/<source>/`.
    pub fn separate_batch(&self, requests: &[SeparationRequest], output_root: &Path) -> BatchResult {
        let mut seen: HashMap<String, usize> = HashMap::new();
        run_batch(requests, |request| {
            let base = source_stem_name(request.source_path()).to_string();
            let n = seen.entry(base.clone()).or_insert(0);
            *n += 1;
            let dir_name = if *n == 1 { base } else { format!("{base}_{n}") };
            self.separate(request, &output_root.join(dir_name))
        })
    }
}
