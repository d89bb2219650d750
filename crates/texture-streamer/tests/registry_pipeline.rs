//! End-to-end uploads through the registry on the software device

use std::path::PathBuf;

use ddsfile::{AlphaMode, D3D10ResourceDimension, Dds, DxgiFormat, NewDxgiParams};
use texture_streamer::backend::ResourceState;
use texture_streamer::backend::software::Command;
use texture_streamer::{
    DdsDecoder, DecodedTexture, LoaderConfig, MemoryDecoder, PixelSource, SoftwareBackend, TextureDesc, TextureMetadata, TextureRegistry, TextureState, UploadBackend,
    compute_footprints,
};

/// Scratch directory removed when dropped
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("texture-streamer-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// RGBA8 pixels with a distinct colour per texel and mip
fn rgba_mip_chain(width: u32, height: u32, mips: u32) -> Vec<u8> {
    let metadata = TextureMetadata::new_2d(width, height, wgpu::TextureFormat::Rgba8Unorm, mips);
    let mut texels: Vec<[u8; 4]> = Vec::new();
    for mip in 0..mips {
        let (w, h, _) = metadata.mip_extent(mip);
        for y in 0..h {
            for x in 0..w {
                texels.push([x as u8, y as u8, mip as u8, 255]);
            }
        }
    }
    bytemuck::cast_slice(&texels).to_vec()
}

fn write_dds(path: &std::path::Path, width: u32, height: u32, mips: u32) {
    let mut dds = Dds::new_dxgi(NewDxgiParams {
        height,
        width,
        depth: None,
        format: DxgiFormat::R8G8B8A8_UNorm,
        mipmap_levels: Some(mips),
        array_layers: Some(1),
        caps2: None,
        is_cubemap: false,
        resource_dimension: D3D10ResourceDimension::Texture2D,
        alpha_mode: AlphaMode::Unknown,
    })
    .unwrap();
    dds.data = rgba_mip_chain(width, height, mips);

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    dds.write(&mut std::fs::File::create(path).unwrap()).unwrap();
}

#[test]
fn mage_diffuse_fire_becomes_resident() {
    let scratch = ScratchDir::new("mage");
    write_dds(&scratch.0.join("Char/Mage/MageDiffuseFire.dds"), 256, 256, 9);
    std::fs::write(scratch.0.join("textures.yaml"), "textures:\n  - Char/Mage/MageDiffuseFire.dds\n  - Env/Sky/Skybox.dds\n").unwrap();
    std::fs::write(scratch.0.join("loader.yaml"), "manifest_path: textures.yaml\npreload: [MageDiffuseFire]\n").unwrap();

    let config = LoaderConfig::from_file(scratch.0.join("loader.yaml")).unwrap();
    let decoder = DdsDecoder::from_config(&config);
    let registry = TextureRegistry::open(SoftwareBackend::new(), decoder, config).unwrap();

    assert_eq!(registry.names(), ["MageDiffuseFire", "Skybox"]);
    assert_eq!(registry.state("MageDiffuseFire"), Some(TextureState::Resident));
    assert_eq!(registry.state("Skybox"), Some(TextureState::Unloaded));

    let texture = registry.get("MageDiffuseFire").unwrap();
    assert_eq!((texture.width(), texture.height()), (256, 256));
    assert_eq!((texture.mip_count(), texture.array_size(), texture.is_cubemap()), (9, 1, false));
    assert_eq!(texture.format(), wgpu::TextureFormat::Rgba8Unorm);

    let metadata = TextureMetadata::new_2d(256, 256, wgpu::TextureFormat::Rgba8Unorm, 9);
    let desc = TextureDesc::from_metadata(&metadata, false).unwrap();
    let footprints = compute_footprints(&desc, &registry.backend().layout_limits()).unwrap();
    assert_eq!(footprints.len(), 9);
    assert!(footprints.iter().map(|f| f.subresource).eq(0..9));

    // One recorder: nine copies in subresource order, then the transition
    let backend = registry.backend();
    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 1);
    let id = texture.resource().id();
    let expected: Vec<Command> = footprints
        .iter()
        .map(|f| Command::Copy {
            texture: id,
            subresource: f.subresource,
            src_offset: f.offset,
        })
        .chain(std::iter::once(Command::Barrier {
            texture: id,
            before: ResourceState::CopyDest,
            after: ResourceState::ShaderRead,
        }))
        .collect();
    assert_eq!(submissions[0], expected);
    assert_eq!(backend.texture_state(texture.resource()), Some(ResourceState::ShaderRead));

    let decoded = DecodedTexture::from_packed("mage", metadata, rgba_mip_chain(256, 256, 9)).unwrap();
    for mip in 0..9 {
        let expected = decoded.image(mip, 0, 0).unwrap().pixels.to_vec();
        assert_eq!(backend.read_subresource(texture.resource(), mip), Some(expected), "mip {mip}");
    }
}

#[test]
fn missing_container_stays_unloaded() {
    let scratch = ScratchDir::new("missing");
    let config = LoaderConfig {
        asset_root: Some(scratch.0.clone()),
        ..Default::default()
    };
    let decoder = DdsDecoder::from_config(&config);
    let mut registry = TextureRegistry::from_manifest(SoftwareBackend::new(), decoder, config, &vec!["Env/Sky/Skybox.dds".to_string()]).unwrap();

    let report = registry.load_all();
    assert!(report.loaded.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(registry.state("Skybox"), Some(TextureState::Unloaded));
    assert_eq!(registry.backend().live_textures(), 0);
}

#[test]
fn cubemap_faces_upload_slice_by_slice() {
    let metadata = TextureMetadata {
        array_size: 6,
        is_cubemap: true,
        ..TextureMetadata::new_2d(8, 8, wgpu::TextureFormat::Rgba8Unorm, 4)
    };
    let face = rgba_mip_chain(8, 8, 4);
    let data: Vec<u8> = (0..6u8).flat_map(|slice| face.iter().map(move |byte| byte ^ slice)).collect();
    let decoded = DecodedTexture::from_packed("Env/Sky/Skybox.dds", metadata, data).unwrap();
    let decoder = MemoryDecoder::new().with_texture("Env/Sky/Skybox.dds", decoded.clone());

    let mut registry = TextureRegistry::new(SoftwareBackend::new(), decoder, LoaderConfig::default());
    registry.register("Env/Sky/Skybox.dds");
    registry.load("Skybox").unwrap();
    let texture = registry.get("Skybox").unwrap();
    assert!(texture.is_cubemap());
    assert_eq!((texture.array_size(), texture.mip_count()), (6, 4));

    let view = texture.view().with_view(|view| *view.desc()).unwrap();
    assert_eq!(view.dimension, wgpu::TextureViewDimension::Cube);
    assert_eq!((view.base_mip, view.mip_count), (0, 4));

    let backend = registry.backend();
    assert_eq!(backend.submissions()[0].len(), 6 * 4 + 1);
    for slice in 0..6 {
        for mip in 0..4 {
            let expected = decoded.image(mip, slice, 0).unwrap().pixels.to_vec();
            assert_eq!(backend.read_subresource(texture.resource(), mip + slice * 4), Some(expected), "mip {mip}, slice {slice}");
        }
    }
}

#[test]
fn volume_layers_follow_depth() {
    let metadata = TextureMetadata {
        depth: 4,
        dimension: wgpu::TextureDimension::D3,
        ..TextureMetadata::new_2d(4, 4, wgpu::TextureFormat::R8Unorm, 3)
    };
    // 4x4x4 + 2x2x2 + 1x1x1 texels
    let data: Vec<u8> = (0..73u8).collect();
    let decoded = DecodedTexture::from_packed("Fx/Smoke.dds", metadata, data).unwrap();
    let decoder = MemoryDecoder::new().with_texture("Fx/Smoke.dds", decoded.clone());

    let mut registry = TextureRegistry::new(SoftwareBackend::new(), decoder, LoaderConfig::default());
    registry.register("Fx/Smoke.dds");
    registry.load("Smoke").unwrap();
    let texture = registry.get("Smoke").unwrap();
    assert_eq!((texture.depth(), texture.array_size()), (4, 1));

    let backend = registry.backend();
    assert_eq!(backend.read_subresource(texture.resource(), 0), Some((0..64).collect()));
    assert_eq!(backend.read_subresource(texture.resource(), 1), Some((64..72).collect()));
    assert_eq!(backend.read_subresource(texture.resource(), 2), Some(vec![72]));

    // Readback of a volume mip holds every depth layer, not just the first
    for mip in 0..3 {
        assert_eq!(backend.read_subresource(texture.resource(), mip), decoded.subresource_bytes(mip, 0), "mip {mip}");
    }
    assert_ne!(backend.read_subresource(texture.resource(), 0).map(|bytes| bytes.len()), decoded.image(0, 0, 0).map(|image| image.pixels.len()));
}

#[test]
fn block_compressed_rows_are_padded_per_block_row() {
    // 20x12 BC1: five 8-byte blocks per row, three block rows
    let metadata = TextureMetadata::new_2d(20, 12, wgpu::TextureFormat::Bc1RgbaUnorm, 1);
    let data: Vec<u8> = (0..120u8).collect();
    let decoded = DecodedTexture::from_packed("Env/Rock.dds", metadata, data.clone()).unwrap();
    let decoder = MemoryDecoder::new().with_texture("Env/Rock.dds", decoded);

    let config = LoaderConfig {
        force_srgb: true,
        ..Default::default()
    };
    let mut registry = TextureRegistry::new(SoftwareBackend::new(), decoder, config);
    registry.register("Env/Rock.dds");
    registry.load("Rock").unwrap();
    let texture = registry.get("Rock").unwrap();
    assert_eq!(texture.format(), wgpu::TextureFormat::Bc1RgbaUnormSrgb);
    assert_eq!(registry.backend().read_subresource(texture.resource(), 0), Some(data));
}
