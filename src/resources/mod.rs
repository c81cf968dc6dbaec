//! Graph resources and the name-keyed registry passes read them from.
//!
//! Resources are shared as `Arc<GraphResource>`. The registry keeps the owning
//! reference; anything else holding a [`WeakResource`] observes an expired
//! reference once the registry replaces or drops the resource.

mod buffer;
mod texture;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub use buffer::{Buffer, BufferDescriptor, BufferUsage};
pub use texture::{Texture, TextureDescriptor, TextureFormat, TextureUsage};

use crate::error::ConfigError;
use crate::handle::ResourceHandle;

/// Handle identifying a registered [`GraphResource`].
pub type ResourceId = ResourceHandle<GraphResource>;

/// A resource a pass can read or write.
#[derive(Debug)]
pub enum GraphResource {
    Texture(Texture),
    Buffer(Buffer),
}

impl GraphResource {
    pub fn as_texture(&self) -> Option<&Texture> {
        match self {
            GraphResource::Texture(texture) => Some(texture),
            GraphResource::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            GraphResource::Buffer(buffer) => Some(buffer),
            GraphResource::Texture(_) => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            GraphResource::Texture(texture) => texture.label(),
            GraphResource::Buffer(buffer) => buffer.label(),
        }
    }
}

impl From<Texture> for GraphResource {
    fn from(texture: Texture) -> Self {
        GraphResource::Texture(texture)
    }
}

impl From<Buffer> for GraphResource {
    fn from(buffer: Buffer) -> Self {
        GraphResource::Buffer(buffer)
    }
}

/// Non-owning reference to a registered resource.
#[derive(Debug, Clone)]
pub struct WeakResource(Weak<GraphResource>);

impl WeakResource {
    /// Get the resource, or `None` if it has been released.
    pub fn upgrade(&self) -> Option<Arc<GraphResource>> {
        self.0.upgrade()
    }

    pub fn is_expired(&self) -> bool {
        self.0.strong_count() == 0
    }
}

#[derive(Debug)]
struct Entry {
    id: ResourceId,
    resource: Arc<GraphResource>,
}

/// Name-keyed store of graph resources.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: HashMap<String, Entry>,
    names: HashMap<ResourceId, String>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource under `name`.
    ///
    /// A name that is already taken is rejected and the existing resource is
    /// kept.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        resource: impl Into<GraphResource>,
    ) -> Result<ResourceId, ConfigError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(ConfigError::DuplicateResource(name));
        }
        let id = ResourceId::create();
        self.names.insert(id, name.clone());
        self.entries.insert(
            name,
            Entry {
                id,
                resource: Arc::new(resource.into()),
            },
        );
        Ok(id)
    }

    /// Swap the resource registered under `name`, keeping its id.
    ///
    /// Returns the previous resource, or `None` if `name` is unknown. Weak
    /// references to the previous resource expire once every strong reference
    /// is gone.
    pub fn replace(
        &mut self,
        name: &str,
        resource: impl Into<GraphResource>,
    ) -> Option<Arc<GraphResource>> {
        let entry = self.entries.get_mut(name)?;
        Some(std::mem::replace(
            &mut entry.resource,
            Arc::new(resource.into()),
        ))
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<GraphResource>> {
        let entry = self.entries.remove(name)?;
        self.names.remove(&entry.id);
        Some(entry.resource)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<GraphResource>> {
        self.entries.get(name).map(|entry| &entry.resource)
    }

    pub fn get_by_id(&self, id: ResourceId) -> Option<&Arc<GraphResource>> {
        self.names.get(&id).and_then(|name| self.get(name))
    }

    pub fn texture(&self, name: &str) -> Option<&Texture> {
        self.get(name).and_then(|resource| resource.as_texture())
    }

    pub fn buffer(&self, name: &str) -> Option<&Buffer> {
        self.get(name).and_then(|resource| resource.as_buffer())
    }

    pub fn id(&self, name: &str) -> Option<ResourceId> {
        self.entries.get(name).map(|entry| entry.id)
    }

    pub fn weak(&self, name: &str) -> Option<WeakResource> {
        self.get(name).map(|resource| WeakResource(Arc::downgrade(resource)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererConfig;
    use crate::context::GraphicsContext;

    fn texture(ctx: &GraphicsContext, width: u32, height: u32) -> Texture {
        ctx.create_texture(&TextureDescriptor::new_2d(
            width,
            height,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        ))
        .unwrap()
    }

    #[test]
    fn test_insert_and_lookup() {
        let ctx = GraphicsContext::new(RendererConfig::new()).unwrap();
        let mut registry = ResourceRegistry::new();
        let id = registry.insert("color", texture(&ctx, 64, 64)).unwrap();

        assert!(id.is_valid());
        assert!(registry.contains("color"));
        assert_eq!(registry.id("color"), Some(id));
        assert_eq!(registry.texture("color").map(Texture::width), Some(64));
        assert!(registry.buffer("color").is_none());
        assert!(registry.get_by_id(id).is_some());
        assert!(registry.get_by_id(ResourceId::null()).is_none());
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let ctx = GraphicsContext::new(RendererConfig::new()).unwrap();
        let mut registry = ResourceRegistry::new();
        let first = registry.insert("color", texture(&ctx, 64, 64)).unwrap();
        let err = registry.insert("color", texture(&ctx, 128, 128)).unwrap_err();

        assert_eq!(err, ConfigError::DuplicateResource("color".into()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.id("color"), Some(first));
        assert_eq!(registry.texture("color").map(Texture::width), Some(64));
    }

    #[test]
    fn test_replace_expires_weak_reference() {
        let ctx = GraphicsContext::new(RendererConfig::new()).unwrap();
        let mut registry = ResourceRegistry::new();
        let id = registry.insert("color", texture(&ctx, 64, 64)).unwrap();
        let weak = registry.weak("color").unwrap();
        assert!(!weak.is_expired());

        let old = registry.replace("color", texture(&ctx, 32, 32)).unwrap();
        assert!(!weak.is_expired());
        drop(old);
        assert!(weak.is_expired());
        assert!(weak.upgrade().is_none());

        assert_eq!(registry.id("color"), Some(id));
        assert_eq!(registry.texture("color").map(Texture::width), Some(32));
        assert!(registry.replace("missing", texture(&ctx, 1, 1)).is_none());
    }

    #[test]
    fn test_remove() {
        let ctx = GraphicsContext::new(RendererConfig::new()).unwrap();
        let mut registry = ResourceRegistry::new();
        let buffer = ctx
            .create_buffer(&BufferDescriptor::new(256, BufferUsage::UNIFORM).with_label("camera"))
            .unwrap();
        let id = registry.insert("camera", buffer).unwrap();

        assert_eq!(registry.buffer("camera").map(Buffer::size), Some(256));
        assert!(registry.remove("camera").is_some());
        assert!(registry.get_by_id(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(TextureFormat::Rgba8Unorm.bytes_per_pixel(), 4);
        assert_eq!(TextureFormat::Rgba32Float.bytes_per_pixel(), 16);
        assert!(TextureFormat::Depth32Float.is_depth());
        assert!(!TextureFormat::Bgra8Unorm.is_depth());
    }
}
