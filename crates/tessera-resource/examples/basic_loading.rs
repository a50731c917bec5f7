//! Basic resource loading example.
//!
//! This example demonstrates:
//! - Building an archive and mounting it
//! - Registering resource types by extension
//! - Shared, reference-counted handles
//! - Prefetching dependencies with the preloader
//! - Reloading from a loose-file overlay

use std::time::Duration;

use tessera_resource::prelude::*;
use tessera_resource::{ArchiveBuilder, EntryOptions};

/// A tiny "image": 8 bytes of width/height (u32 LE) followed by RGBA pixels.
#[derive(Debug)]
struct SimpleImage {
    width: u32,
    height: u32,
    pixel_count: usize,
}

struct SimpleImageType;

impl SimpleImageType {
    fn decode(ctx: &CreateContext<'_>) -> ResourceResult<SimpleImage> {
        let bytes = ctx.bytes();
        if bytes.len() < 8 {
            return Err(ResourceError::decode(ctx.path(), "image file too small"));
        }

        let width = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let height = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(SimpleImage {
            width,
            height,
            pixel_count: (bytes.len() - 8) / 4,
        })
    }
}

impl ResourceType for SimpleImageType {
    type Resource = SimpleImage;

    fn create(&self, ctx: &mut CreateContext<'_>) -> ResourceResult<SimpleImage> {
        Self::decode(ctx)
    }

    fn destroy(&self, image: &SimpleImage) {
        println!("  destroying {}x{} image", image.width, image.height);
    }

    fn supports_recreate(&self) -> bool {
        true
    }

    fn recreate(&self, _current: &SimpleImage, ctx: &mut CreateContext<'_>) -> ResourceResult<SimpleImage> {
        Self::decode(ctx)
    }
}

/// A material names the images it samples, one `image:<path>` per line.
#[derive(Debug)]
struct Material {
    images: Vec<ResourceHandle>,
}

struct MaterialType;

fn image_refs(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter_map(|line| line.strip_prefix("image:"))
        .map(str::to_string)
        .collect()
}

impl ResourceType for MaterialType {
    type Resource = Material;

    fn create(&self, ctx: &mut CreateContext<'_>) -> ResourceResult<Material> {
        let images = image_refs(ctx.bytes())
            .iter()
            .map(|path| ctx.factory().get(path))
            .collect::<ResourceResult<Vec<_>>>()?;
        Ok(Material { images })
    }

    fn preload_hint(&self, ctx: &mut PreloadContext<'_>) {
        for path in image_refs(ctx.bytes()) {
            ctx.hint(path);
        }
    }
}

fn image_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&width.to_le_bytes());
    bytes.extend_from_slice(&height.to_le_bytes());
    bytes.resize(8 + (width * height * 4) as usize, 0xff);
    bytes
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tessera_core::logging::init();

    let temp_dir = tempfile::tempdir()?;
    let archive_path = temp_dir.path().join("content.tsra");
    let loose_root = temp_dir.path().join("loose");

    // Build the archive
    let mut builder = ArchiveBuilder::new();
    builder.add_path("images/grass.img", &image_bytes(16, 16), EntryOptions::compressed())?;
    builder.add_path("images/stone.img", &image_bytes(32, 32), EntryOptions::compressed())?;
    builder.add_path(
        "materials/ground.mat",
        b"image:images/grass.img\nimage:images/stone.img",
        EntryOptions::default(),
    )?;
    builder.write_to(std::fs::File::create(&archive_path)?)?;
    println!("Wrote archive with {} entries to {}", builder.len(), archive_path.display());

    let types = TypeRegistry::new()
        .with("img", SimpleImageType)
        .with("mat", MaterialType);
    let factory = Factory::builder(ArchiveIndex::open([&archive_path])?)
        .registry(types)
        .config(FactoryConfig::new().with_loose_root(&loose_root))
        .build();

    println!("\n=== Preloading ===\n");
    factory.preloader().request("materials/ground.mat");
    let mut ticks = 0;
    while factory.preloader().update(Duration::from_micros(50)) {
        ticks += 1;
    }
    println!(
        "Warmed {} payloads in {} extra ticks",
        factory.preloader().warm_count(),
        ticks
    );

    println!("\n=== Loading ===\n");
    let ground = factory.get("materials/ground.mat")?;
    let grass = factory.get("images/grass.img")?;
    if let Some(material) = ground.get::<Material>() {
        for image in &material.images {
            println!("{} -> {:?}", image.path(), image.get::<SimpleImage>());
        }
    }
    println!("grass ref count: {}", grass.ref_count());

    println!("\n=== Reloading ===\n");
    std::fs::create_dir_all(loose_root.join("images"))?;
    std::fs::write(loose_root.join("images").join("grass.img"), image_bytes(64, 64))?;
    HotReloader::new(factory.clone()).reload_batch(["images/grass.img"]);
    if let Some(image) = grass.get::<SimpleImage>() {
        println!("grass is now {}x{} (version {})", image.width, image.height, grass.version());
    }

    println!("\n=== Releasing ===\n");
    drop(grass);
    drop(ground);

    for event in factory.drain_events() {
        match event {
            ResourceEvent::Created { path, .. } => println!("created {path}"),
            ResourceEvent::Reloaded { path, version, .. } => {
                println!("reloaded {path} (version {version})")
            }
            ResourceEvent::Destroyed { path, .. } => println!("destroyed {path}"),
            ResourceEvent::LoadFailed { path, error, .. }
            | ResourceEvent::ReloadFailed { path, error, .. } => {
                println!("failed {path}: {error}")
            }
        }
    }
    println!("\nLive resources: {}", factory.live_count());

    Ok(())
}
