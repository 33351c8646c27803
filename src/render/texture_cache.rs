//! Size/format keyed framebuffer cache
//!
//! Textures are handed out as [`TextureLease`]s. A lease is the lock: while it
//! exists nobody else can acquire that texture, and dropping it returns the
//! texture to the idle list. Because release happens in `Drop`, a slot can be
//! neither released twice nor released while still locked.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::PlayerError;
use crate::gpu_context::GpuContext;
use crate::video::FrameSize;

/// Identity of interchangeable textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub size: FrameSize,
    pub format: wgpu::TextureFormat,
}

impl TextureKey {
    pub fn new(size: FrameSize, format: wgpu::TextureFormat) -> Self {
        Self { size, format }
    }
}

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Textures waiting in idle lists
    pub idle: usize,
    /// Textures currently leased out
    pub outstanding: usize,
    /// Textures created over the cache lifetime
    pub allocated: u64,
}

type Allocator<T> = dyn Fn(&TextureKey) -> Result<T, PlayerError> + Send + Sync;

struct CacheInner<T> {
    idle: HashMap<TextureKey, Vec<Arc<T>>>,
    outstanding: usize,
    allocated: u64,
    max_idle_per_key: usize,
}

fn lock<T>(inner: &Mutex<CacheInner<T>>) -> MutexGuard<'_, CacheInner<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recycling pool of textures created by an allocator closure
pub struct FramebufferCache<T> {
    inner: Arc<Mutex<CacheInner<T>>>,
    allocator: Arc<Allocator<T>>,
}

impl<T> Clone for FramebufferCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            allocator: Arc::clone(&self.allocator),
        }
    }
}

impl<T> FramebufferCache<T> {
    pub fn new<F>(max_idle_per_key: usize, allocator: F) -> Self
    where
        F: Fn(&TextureKey) -> Result<T, PlayerError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                idle: HashMap::new(),
                outstanding: 0,
                allocated: 0,
                max_idle_per_key,
            })),
            allocator: Arc::new(allocator),
        }
    }

    /// Lease a texture for `key`, reusing an idle one when available
    pub fn acquire(&self, key: TextureKey) -> Result<TextureLease<T>, PlayerError> {
        let recycled = lock(&self.inner).idle.get_mut(&key).and_then(Vec::pop);

        let texture = match recycled {
            Some(texture) => texture,
            None => {
                // Allocate outside the lock; GPU allocation may block
                let texture = Arc::new((self.allocator)(&key)?);
                lock(&self.inner).allocated += 1;
                tracing::debug!("FramebufferCache: allocated {} {:?}", key.size, key.format);
                texture
            }
        };

        lock(&self.inner).outstanding += 1;
        Ok(TextureLease {
            key,
            texture,
            home: Arc::downgrade(&self.inner),
        })
    }

    pub fn stats(&self) -> CacheStats {
        let inner = lock(&self.inner);
        CacheStats {
            idle: inner.idle.values().map(Vec::len).sum(),
            outstanding: inner.outstanding,
            allocated: inner.allocated,
        }
    }
}

/// Exclusive use of a cached texture; returned to the cache on drop
pub struct TextureLease<T> {
    key: TextureKey,
    texture: Arc<T>,
    home: Weak<Mutex<CacheInner<T>>>,
}

impl<T> TextureLease<T> {
    pub fn key(&self) -> TextureKey {
        self.key
    }

    pub fn size(&self) -> FrameSize {
        self.key.size
    }
}

impl<T> Deref for TextureLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.texture
    }
}

impl<T> Drop for TextureLease<T> {
    fn drop(&mut self) {
        // The cache may already be gone; the texture is then simply freed
        let Some(home) = self.home.upgrade() else {
            return;
        };
        let mut inner = lock(&home);
        inner.outstanding = inner.outstanding.saturating_sub(1);
        let max_idle = inner.max_idle_per_key;
        let idle = inner.idle.entry(self.key).or_default();
        if idle.len() < max_idle {
            idle.push(Arc::clone(&self.texture));
        }
    }
}

impl<T> std::fmt::Debug for TextureLease<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureLease").field("key", &self.key).finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GPU TEXTURES
// ═══════════════════════════════════════════════════════════════════════════════

/// A GPU texture with its default view
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// Usage shared by plane uploads, render targets and readback
pub const CACHED_TEXTURE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::RENDER_ATTACHMENT)
    .union(wgpu::TextureUsages::COPY_DST)
    .union(wgpu::TextureUsages::COPY_SRC);

/// Cache of GPU textures on `gpu`
///
/// Allocation failures (out of memory, validation) are caught with error
/// scopes and reported as [`PlayerError::GpuResource`].
pub fn gpu_texture_cache(gpu: Arc<GpuContext>, max_idle_per_key: usize) -> FramebufferCache<GpuTexture> {
    FramebufferCache::new(max_idle_per_key, move |key: &TextureKey| {
        let device = &gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Cached Frame Texture"),
            size: wgpu::Extent3d {
                width: key.size.width.max(1),
                height: key.size.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: key.format,
            usage: CACHED_TEXTURE_USAGE,
            view_formats: &[],
        });

        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(error) = validation.or(out_of_memory) {
            tracing::error!("Texture allocation failed for {} {:?}: {}", key.size, key.format, error);
            return Err(PlayerError::GpuResource(format!(
                "could not create {} {:?} texture: {}",
                key.size, key.format, error
            )));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuTexture { texture, view })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_cache(max_idle: usize) -> (FramebufferCache<u32>, Arc<AtomicU32>) {
        let created = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&created);
        let cache = FramebufferCache::new(max_idle, move |_key: &TextureKey| {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        });
        (cache, created)
    }

    fn key(w: u32, h: u32) -> TextureKey {
        TextureKey::new(FrameSize::new(w, h), wgpu::TextureFormat::R8Unorm)
    }

    #[test]
    fn test_released_texture_is_reused() {
        let (cache, created) = counting_cache(4);
        let first = cache.acquire(key(64, 64)).unwrap();
        let id = *first;
        drop(first);

        let second = cache.acquire(key(64, 64)).unwrap();
        assert_eq!(*second, id);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_locked_texture_is_not_handed_out_twice() {
        let (cache, _) = counting_cache(4);
        let a = cache.acquire(key(32, 32)).unwrap();
        let b = cache.acquire(key(32, 32)).unwrap();
        assert_ne!(*a, *b);
        assert_eq!(cache.stats().outstanding, 2);
    }

    #[test]
    fn test_keys_do_not_mix() {
        let (cache, created) = counting_cache(4);
        drop(cache.acquire(key(32, 32)).unwrap());
        let other_format = TextureKey::new(FrameSize::new(32, 32), wgpu::TextureFormat::Rg8Unorm);
        drop(cache.acquire(other_format).unwrap());
        drop(cache.acquire(key(16, 16)).unwrap());
        assert_eq!(created.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().idle, 3);
    }

    #[test]
    fn test_idle_list_is_bounded() {
        let (cache, _) = counting_cache(1);
        let a = cache.acquire(key(8, 8)).unwrap();
        let b = cache.acquire(key(8, 8)).unwrap();
        drop(a);
        drop(b);
        let stats = cache.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.allocated, 2);
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let cache: FramebufferCache<u32> =
            FramebufferCache::new(2, |_key: &TextureKey| Err(PlayerError::GpuResource("oom".into())));
        let err = cache.acquire(key(8, 8)).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(cache.stats().outstanding, 0);
    }

    #[test]
    fn test_lease_outlives_cache() {
        let (cache, _) = counting_cache(2);
        let lease = cache.acquire(key(8, 8)).unwrap();
        drop(cache);
        assert_eq!(lease.size(), FrameSize::new(8, 8));
        drop(lease);
    }
}
