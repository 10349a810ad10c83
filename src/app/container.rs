use std::sync::Arc;

use crate::adapters::{AppConfig, LibavBackend, LocalFs};
use crate::app::{CompressInteractor, InspectInteractor};
use crate::error::CompressResult;
use crate::ports::CodecBackend;

/// Wires a codec backend and configuration into the interactors
pub struct AppContainer<B: CodecBackend> {
    backend: Arc<B>,
    config: AppConfig,
    fs: LocalFs,
}

impl<B: CodecBackend> AppContainer<B> {
    pub fn new(backend: B, config: AppConfig) -> Self {
        let fs = LocalFs::new(config.compressor.temp_prefix.clone());
        Self {
            backend: Arc::new(backend),
            config,
            fs,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn backend(&self) -> Arc<B> {
        Arc::clone(&self.backend)
    }

    /// Starts a worker; call from inside a tokio runtime
    pub fn compress_interactor(&self) -> CompressInteractor<B> {
        CompressInteractor::new(self.backend(), self.config.engine_config(), self.fs.clone())
    }

    pub fn inspect_interactor(&self) -> InspectInteractor<B> {
        InspectInteractor::new(self.backend(), self.fs.clone())
    }
}

impl AppContainer<LibavBackend> {
    /// Container over the FFmpeg backend
    pub fn with_libav(config: AppConfig) -> CompressResult<Self> {
        let backend = LibavBackend::new(config.compressor.decoder_threads)?;
        Ok(Self::new(backend, config))
    }
}
