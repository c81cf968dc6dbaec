//! Asset registry shared between loaders and render passes.
//!
//! Assets are reference counted and addressed by random [`AssetHandle`]s.
//! Decoding is left to [`AssetLoader`] implementations; the registry only
//! installs what a loader successfully produced.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AssetLoadError;
use crate::handle::ResourceHandle;

/// Handle to an asset stored in an [`AssetRegistry`].
pub type AssetHandle = ResourceHandle<dyn Asset>;

/// Kind of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetType {
    Texture,
    Mesh,
    Material,
    Model,
    Shader,
    ComputeShader,
    EnvironmentMap,
    Scene,
}

impl AssetType {
    pub fn name(&self) -> &'static str {
        match self {
            AssetType::Texture => "Texture",
            AssetType::Mesh => "Mesh",
            AssetType::Material => "Material",
            AssetType::Model => "Model",
            AssetType::Shader => "Shader",
            AssetType::ComputeShader => "ComputeShader",
            AssetType::EnvironmentMap => "EnvironmentMap",
            AssetType::Scene => "Scene",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A loaded asset.
pub trait Asset: Any + Send + Sync {
    fn asset_type(&self) -> AssetType;

    fn name(&self) -> &str;

    /// Access the concrete type, e.g. for `downcast_ref`.
    fn as_any(&self) -> &dyn Any;
}

/// Produces assets from files or in-memory data.
pub trait AssetLoader: Send + Sync {
    fn load_text(&self, path: &Path) -> Result<Arc<dyn Asset>, AssetLoadError>;

    fn load_binary(&self, bytes: &[u8]) -> Result<Arc<dyn Asset>, AssetLoadError>;
}

#[derive(Default)]
struct Assets {
    by_handle: HashMap<AssetHandle, Arc<dyn Asset>>,
    /// Handles per type, in insertion order.
    by_type: HashMap<AssetType, Vec<AssetHandle>>,
}

/// Thread-safe asset store.
///
/// One lock guards all lookup maps, so access is serialized.
#[derive(Default)]
pub struct AssetRegistry {
    assets: Mutex<Assets>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an asset under a fresh handle.
    pub fn insert(&self, asset: Arc<dyn Asset>) -> AssetHandle {
        let handle = AssetHandle::create();
        let mut assets = self.assets.lock();
        assets
            .by_type
            .entry(asset.asset_type())
            .or_default()
            .push(handle);
        log::trace!(
            "Registered {} asset '{}' as {}",
            asset.asset_type(),
            asset.name(),
            handle
        );
        assets.by_handle.insert(handle, asset);
        handle
    }

    pub fn get(&self, handle: AssetHandle) -> Option<Arc<dyn Asset>> {
        self.assets.lock().by_handle.get(&handle).cloned()
    }

    pub fn contains(&self, handle: AssetHandle) -> bool {
        self.assets.lock().by_handle.contains_key(&handle)
    }

    /// All assets of one type, in insertion order.
    pub fn get_assets_of_type(&self, asset_type: AssetType) -> Vec<Arc<dyn Asset>> {
        let assets = self.assets.lock();
        let Some(handles) = assets.by_type.get(&asset_type) else {
            return Vec::new();
        };
        handles
            .iter()
            .filter_map(|handle| assets.by_handle.get(handle).cloned())
            .collect()
    }

    /// Remove an asset. Unknown handles are logged and ignored.
    pub fn remove_asset(&self, handle: AssetHandle) {
        let mut assets = self.assets.lock();
        let Some(asset) = assets.by_handle.remove(&handle) else {
            log::warn!("Trying to remove invalid asset: {}", handle);
            return;
        };
        if let Some(handles) = assets.by_type.get_mut(&asset.asset_type()) {
            handles.retain(|h| *h != handle);
        }
    }

    pub fn len(&self) -> usize {
        self.assets.lock().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load an asset from a file and register it.
    ///
    /// Nothing is registered if the loader fails.
    pub fn load_text(
        &self,
        loader: &dyn AssetLoader,
        path: impl AsRef<Path>,
    ) -> Result<AssetHandle, AssetLoadError> {
        let path = path.as_ref();
        match loader.load_text(path) {
            Ok(asset) => Ok(self.insert(asset)),
            Err(e) => {
                log::error!("Failed to load asset from {}: {}", path.display(), e);
                Err(e)
            }
        }
    }

    /// Load an asset from memory and register it.
    ///
    /// Nothing is registered if the loader fails.
    pub fn load_binary(
        &self,
        loader: &dyn AssetLoader,
        bytes: &[u8],
    ) -> Result<AssetHandle, AssetLoadError> {
        match loader.load_binary(bytes) {
            Ok(asset) => Ok(self.insert(asset)),
            Err(e) => {
                log::error!("Failed to load asset from {} byte(s): {}", bytes.len(), e);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetRegistry")
            .field("assets", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ShaderSource {
        name: String,
        source: String,
    }

    impl Asset for ShaderSource {
        fn asset_type(&self) -> AssetType {
            AssetType::Shader
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct ShaderLoader;

    impl AssetLoader for ShaderLoader {
        fn load_text(&self, path: &Path) -> Result<Arc<dyn Asset>, AssetLoadError> {
            let source = std::fs::read_to_string(path).map_err(|source| AssetLoadError::Io {
                path: path.display().to_string(),
                source,
            })?;
            Ok(Arc::new(ShaderSource {
                name: path.display().to_string(),
                source,
            }))
        }

        fn load_binary(&self, bytes: &[u8]) -> Result<Arc<dyn Asset>, AssetLoadError> {
            let source = std::str::from_utf8(bytes)
                .map_err(|e| AssetLoadError::Decode(e.to_string()))?;
            Ok(Arc::new(ShaderSource {
                name: "inline".into(),
                source: source.to_string(),
            }))
        }
    }

    fn shader(name: &str) -> Arc<dyn Asset> {
        Arc::new(ShaderSource {
            name: name.into(),
            source: String::new(),
        })
    }

    #[test]
    fn test_insert_and_query_by_type() {
        let registry = AssetRegistry::new();
        let a = registry.insert(shader("a"));
        let b = registry.insert(shader("b"));
        assert_ne!(a, b);
        assert!(a.is_valid());

        let shaders = registry.get_assets_of_type(AssetType::Shader);
        let names: Vec<_> = shaders.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(registry.get_assets_of_type(AssetType::Mesh).is_empty());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let registry = AssetRegistry::new();
        let a = registry.insert(shader("a"));
        registry.remove_asset(AssetHandle::null());
        registry.remove_asset(AssetHandle::create());
        assert_eq!(registry.len(), 1);

        registry.remove_asset(a);
        assert!(registry.is_empty());
        assert!(registry.get(a).is_none());
        assert!(registry.get_assets_of_type(AssetType::Shader).is_empty());
    }

    #[test]
    fn test_failed_load_installs_nothing() {
        let registry = AssetRegistry::new();
        let err = registry
            .load_text(&ShaderLoader, "does/not/exist.wgsl")
            .unwrap_err();
        assert!(matches!(err, AssetLoadError::Io { .. }));

        let err = registry
            .load_binary(&ShaderLoader, &[0xff, 0xfe])
            .unwrap_err();
        assert!(matches!(err, AssetLoadError::Decode(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_binary_and_downcast() {
        let registry = AssetRegistry::new();
        let handle = registry
            .load_binary(&ShaderLoader, b"fn main() {}")
            .unwrap();
        let asset = registry.get(handle).unwrap();
        let shader = asset.as_any().downcast_ref::<ShaderSource>().unwrap();
        assert_eq!(shader.source, "fn main() {}");
    }

    #[test]
    fn test_concurrent_inserts() {
        let registry = Arc::new(AssetRegistry::new());
        let threads: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        registry.insert(shader(&format!("{i}-{j}")));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(registry.get_assets_of_type(AssetType::Shader).len(), 100);
    }
}
