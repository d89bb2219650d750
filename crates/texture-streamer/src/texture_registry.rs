//! Named texture registry
//!
//! The registry maps logical names to container paths and loads textures on
//! demand. Loading runs the whole upload pipeline: decode the container,
//! allocate the texture and its view, lay out the subresources, stage the rows
//! and submit the copies.

use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry;
use std::path::Path;

use crate::backend::UploadBackend;
use crate::copy_scheduler::stage_and_copy;
use crate::decoder::{ContainerDecoder, DecodedTexture};
use crate::job_batch::{JobBatch, JobOutcome, WorkerPool};
use crate::manifest::{ManifestFile, ManifestProvider, logical_name};
use crate::resource_allocator::allocate_texture;
use crate::staging_arena::StagingArena;
use crate::view_registry::ViewRegistry;
use crate::{LayoutLimits, LoaderConfig, Texture, TextureDesc, TextureError, compute_footprints};

/// Lifecycle of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureState {
    /// Registered but not loaded
    Unloaded,
    /// Container decoded, nothing allocated yet
    MetadataDecoded,
    /// Device resources exist and copies are being recorded
    Uploading,
    /// Copies submitted; the texture is ready to sample
    Resident,
    /// Texture dropped and entry removed
    Released,
}

struct TextureLookup<B: UploadBackend> {
    path: String,
    state: TextureState,
    texture: Option<Texture<B>>,
}

/// Result of loading several textures
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Names that are resident after the call
    pub loaded: Vec<String>,
    /// Names that failed, with the reason
    pub failed: Vec<(String, TextureError)>,
}

impl LoadReport {
    /// Whether every requested texture loaded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns every loaded texture, keyed by logical name
pub struct TextureRegistry<B: UploadBackend, D> {
    // Textures go before the arena, views and backend they were created from
    entries: HashMap<String, TextureLookup<B>>,
    arena: StagingArena<B>,
    views: ViewRegistry<B::View>,
    limits: LayoutLimits,
    config: LoaderConfig,
    decoder: D,
    backend: B,
}

impl<B: UploadBackend, D: ContainerDecoder> TextureRegistry<B, D> {
    /// Creates an empty registry
    pub fn new(backend: B, decoder: D, config: LoaderConfig) -> Self {
        let limits = LayoutLimits {
            max_subresources: config.max_subresources,
            ..backend.layout_limits()
        };

        Self {
            entries: HashMap::new(),
            arena: StagingArena::new(&limits),
            views: ViewRegistry::new(config.view_capacity),
            limits,
            config,
            decoder,
            backend,
        }
    }

    /// Creates a registry holding every path from `manifest`, then loads the
    /// names listed in `config.preload`
    ///
    /// # Errors
    /// Fails when the manifest cannot be read or a preloaded texture fails to load
    pub fn from_manifest<M: ManifestProvider + ?Sized>(backend: B, decoder: D, config: LoaderConfig, manifest: &M) -> Result<Self, TextureError> {
        let mut registry = Self::new(backend, decoder, config);
        for path in manifest.file_list()? {
            registry.register(path);
        }
        tracing::info!(textures = registry.entries.len(), "registered texture manifest");

        for name in registry.config.preload.clone() {
            registry.load(&name)?;
        }
        Ok(registry)
    }

    /// [`TextureRegistry::from_manifest`] with the manifest file named in `config`
    pub fn open(backend: B, decoder: D, config: LoaderConfig) -> Result<Self, TextureError> {
        let manifest = ManifestFile::new(&config.manifest_path);
        Self::from_manifest(backend, decoder, config, &manifest)
    }

    /// Registers a container path under its logical name
    ///
    /// When two paths share a logical name the first one is kept.
    ///
    /// # Returns
    /// Whether a new entry was added
    pub fn register(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        match self.entries.entry(logical_name(&path).to_string()) {
            Entry::Occupied(existing) => {
                tracing::warn!(name = %existing.key(), kept = %existing.get().path, ignored = %path, "duplicate texture name");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(TextureLookup {
                    path,
                    state: TextureState::Unloaded,
                    texture: None,
                });
                true
            }
        }
    }

    /// Loads the named texture if it is not resident yet
    ///
    /// # Errors
    /// [`TextureError::NotFound`] for an unregistered name, otherwise whatever
    /// pipeline stage failed. A failed load leaves the entry unloaded.
    pub fn load(&mut self, name: &str) -> Result<&Texture<B>, TextureError> {
        let path = match self.entries.get(name) {
            None => return Err(TextureError::NotFound(name.to_string())),
            Some(entry) if entry.texture.is_some() => None,
            Some(entry) => Some(entry.path.clone()),
        };

        if let Some(path) = path {
            self.retire_staging();
            let decoded = self.decoder.decode(Path::new(&path));
            self.finish_load(name, decoded)?;
        }
        self.get(name).ok_or_else(|| TextureError::NotFound(name.to_string()))
    }

    /// Loads every registered texture that is not resident, skipping failures
    pub fn load_all(&mut self) -> LoadReport {
        let mut names: Vec<String> = self.entries.iter().filter(|(_, entry)| entry.texture.is_none()).map(|(name, _)| name.clone()).collect();
        names.sort();

        let mut report = LoadReport::default();
        for name in names {
            match self.load(&name) {
                Ok(_) => report.loaded.push(name),
                Err(e) => report.failed.push((name, e)),
            }
        }

        tracing::info!(loaded = report.loaded.len(), failed = report.failed.len(), "loaded textures");
        report
    }

    /// Decodes the named containers on `pool`, then uploads them in order on
    /// the calling thread
    ///
    /// A name listed more than once is loaded and reported once.
    pub fn load_parallel<S: AsRef<str>>(&mut self, names: &[S], pool: &WorkerPool) -> LoadReport
    where
        D: Sync,
    {
        let mut report = LoadReport::default();
        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        for name in names {
            let name: &str = name.as_ref();
            if !seen.insert(name) {
                continue;
            }
            match self.entries.get(name) {
                None => report.failed.push((name.to_string(), TextureError::NotFound(name.to_string()))),
                Some(entry) if entry.texture.is_some() => report.loaded.push(name.to_string()),
                Some(entry) => pending.push((name.to_string(), entry.path.clone())),
            }
        }

        let decoder = &self.decoder;
        let mut batch = JobBatch::new();
        for (_, path) in &pending {
            batch.add(move || decoder.decode(Path::new(path)));
        }
        let outcomes = batch.run(pool);
        tracing::debug!(decoded = outcomes.len(), threads = pool.threads(), "decoded texture batch");

        self.retire_staging();
        for ((name, path), outcome) in pending.into_iter().zip(outcomes) {
            let decoded = match outcome {
                JobOutcome::Completed(decoded) => decoded,
                JobOutcome::Panicked(message) => Err(TextureError::decode(path, format!("decoder panicked: {message}"))),
            };
            match self.finish_load(&name, decoded) {
                Ok(()) => report.loaded.push(name),
                Err(e) => report.failed.push((name, e)),
            }
        }

        tracing::info!(loaded = report.loaded.len(), failed = report.failed.len(), "loaded textures in parallel");
        report
    }

    /// Uploads a decoded container and records the outcome on the entry
    fn finish_load(&mut self, name: &str, decoded: Result<DecodedTexture, TextureError>) -> Result<(), TextureError> {
        let result = decoded.and_then(|decoded| {
            self.set_state(name, TextureState::MetadataDecoded);
            self.upload(name, &decoded)
        });

        let Some(entry) = self.entries.get_mut(name) else {
            return Err(TextureError::NotFound(name.to_string()));
        };
        match result {
            Ok(texture) => {
                tracing::info!(name, path = %entry.path, format = ?texture.format(), mips = texture.mip_count(), "texture resident");
                entry.texture = Some(texture);
                entry.state = TextureState::Resident;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(name, path = %entry.path, error = %e, "texture load failed");
                entry.texture = None;
                entry.state = TextureState::Unloaded;
                Err(e)
            }
        }
    }

    fn upload(&mut self, name: &str, decoded: &DecodedTexture) -> Result<Texture<B>, TextureError> {
        let metadata = decoded.metadata();
        let desc = TextureDesc::from_metadata(metadata, self.config.force_srgb)?.with_label(name);

        let texture = allocate_texture(&self.backend, &self.views, &desc, metadata)?;
        self.set_state(name, TextureState::Uploading);

        let footprints = compute_footprints(&desc, &self.limits)?;
        let mut allocation = self.arena.allocate(&self.backend, footprints.total_size(), name)?;
        stage_and_copy(&self.backend, &texture, &footprints, decoded, &mut allocation)?;
        self.arena.submit(&self.backend, allocation)?;

        tracing::debug!(name, subresources = footprints.len(), staging_bytes = footprints.total_size(), "submitted texture upload");
        Ok(texture)
    }
}

impl<B: UploadBackend, D> TextureRegistry<B, D> {
    fn set_state(&mut self, name: &str, state: TextureState) {
        if let Some(entry) = self.entries.get_mut(name) {
            tracing::trace!(name, from = ?entry.state, to = ?state, "texture state");
            entry.state = state;
        }
    }

    /// The named texture, if it is resident
    pub fn get(&self, name: &str) -> Option<&Texture<B>> {
        self.entries.get(name).and_then(|entry| entry.texture.as_ref())
    }

    /// State of the named entry, `None` when it is not registered
    pub fn state(&self, name: &str) -> Option<TextureState> {
        self.entries.get(name).map(|entry| entry.state)
    }

    /// Container path registered under `name`
    pub fn path(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|entry| entry.path.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered logical names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of textures currently resident
    pub fn resident_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.texture.is_some()).count()
    }

    /// Drops the named texture, freeing its view slot and then its resource,
    /// and removes the entry
    ///
    /// # Errors
    /// [`TextureError::NotFound`] for an unregistered name
    pub fn release(&mut self, name: &str) -> Result<(), TextureError> {
        let entry = self.entries.remove(name).ok_or_else(|| TextureError::NotFound(name.to_string()))?;
        let was_resident = entry.texture.is_some();
        drop(entry);

        tracing::debug!(name, was_resident, state = ?TextureState::Released, "texture released");
        Ok(())
    }

    /// Frees staging buffers whose uploads have completed
    ///
    /// # Returns
    /// The number of buffers freed
    pub fn retire_staging(&mut self) -> usize {
        self.arena.retire(&self.backend)
    }

    /// Number of submitted uploads whose staging buffers are still held
    pub fn staging_in_flight(&self) -> usize {
        self.arena.in_flight()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The view table shaders index into
    pub fn views(&self) -> &ViewRegistry<B::View> {
        &self.views
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}
