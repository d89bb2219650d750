//! Device resource creation for streamed textures

use crate::backend::{UploadBackend, ViewDesc};
use crate::view_registry::ViewRegistry;
use crate::{Texture, TextureDesc, TextureError, TextureMetadata};

/// Creates the device texture described by `desc` and binds its read view
///
/// The texture starts in the copy-destination state. Its view is stored in
/// `views`; cubemaps get a cube view over all faces, other textures a
/// standard view over every subresource.
///
/// # Arguments
/// * `backend` - Device used to create the resource and view
/// * `views` - Slot table that receives the view
/// * `desc` - Destination description, with any SRGB mapping already applied
/// * `metadata` - Decoded metadata, kept for the source format
///
/// # Errors
/// [`TextureError::FormatMismatch`] for a cubemap without six slices (checked
/// before anything is created) and [`TextureError::Allocation`] when the device
/// or the view table is out of space.
pub fn allocate_texture<B: UploadBackend>(backend: &B, views: &ViewRegistry<B::View>, desc: &TextureDesc, metadata: &TextureMetadata) -> Result<Texture<B>, TextureError> {
    if desc.is_cubemap && desc.array_size != 6 {
        return Err(TextureError::FormatMismatch { array_size: desc.array_size });
    }

    let resource = backend.create_texture(desc)?;
    let view = backend.create_view(&resource, &ViewDesc::for_texture(desc))?;
    let slot = views.acquire(view)?;

    tracing::debug!(
        label = desc.label.as_deref().unwrap_or_default(),
        format = ?desc.format,
        width = desc.width,
        height = desc.height,
        mips = desc.mip_count,
        slices = desc.array_size,
        view_slot = slot.index(),
        "allocated texture"
    );

    Ok(Texture::new(resource, slot, desc, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;

    #[test]
    fn test_cubemap_mismatch_creates_nothing() {
        let backend = SoftwareBackend::new();
        let views = ViewRegistry::new(16);
        let metadata = TextureMetadata::new_2d(32, 32, wgpu::TextureFormat::Rgba8Unorm, 1);
        let desc = TextureDesc {
            array_size: 5,
            is_cubemap: true,
            ..TextureDesc::from_metadata(&metadata, false).unwrap()
        };

        let err = allocate_texture(&backend, &views, &desc, &metadata).unwrap_err();
        assert!(matches!(err, TextureError::FormatMismatch { array_size: 5 }));
        assert_eq!((backend.live_textures(), backend.live_views()), (0, 0));
        assert!(views.is_empty());
    }

    #[test]
    fn test_cubemap_gets_cube_view() {
        let backend = SoftwareBackend::new();
        let views = ViewRegistry::new(16);
        let metadata = TextureMetadata {
            array_size: 6,
            is_cubemap: true,
            ..TextureMetadata::new_2d(32, 32, wgpu::TextureFormat::Rgba8Unorm, 6)
        };
        let desc = TextureDesc::from_metadata(&metadata, false).unwrap();

        let texture = allocate_texture(&backend, &views, &desc, &metadata).unwrap();
        let view = texture.view().with_view(|view| *view.desc()).unwrap();
        assert_eq!(view.dimension, wgpu::TextureViewDimension::Cube);
        assert_eq!((view.mip_count, view.slice_count), (6, 6));
        assert!(texture.is_cubemap());
    }

    #[test]
    fn test_view_exhaustion_releases_texture() {
        let backend = SoftwareBackend::new();
        let views = ViewRegistry::new(1);
        let metadata = TextureMetadata::new_2d(8, 8, wgpu::TextureFormat::Rgba8Unorm, 1);
        let desc = TextureDesc::from_metadata(&metadata, false).unwrap();

        let first = allocate_texture(&backend, &views, &desc, &metadata).unwrap();
        let err = allocate_texture(&backend, &views, &desc, &metadata).unwrap_err();
        assert!(matches!(err, TextureError::Allocation { what: "view slot", .. }));
        assert_eq!((backend.live_textures(), backend.live_views()), (1, 1));

        drop(first);
        assert_eq!((backend.live_textures(), backend.live_views()), (0, 0));
    }
}
