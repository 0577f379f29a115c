use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Cursor;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use glam::Vec2;
use image::ImageReader;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::asset_store::{
    blob_url, is_blob_url, parse_blob_url, GetStoreItem, PersistentAssetStore, StoreNamespace,
};
use crate::renderer::{GpuTexture, Renderer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureColorSpace {
    Srgb,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureMapping {
    Uv,
    EquirectangularReflection,
}

/// What a material uses an image for; drives the color-space policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapRole {
    BaseColor,
    Emissive,
    SheenColor,
    SpecularColor,
    Environment,
    Normal,
    Roughness,
    Metalness,
    AmbientOcclusion,
}

impl MapRole {
    pub fn wants_display_color_space(self) -> bool {
        matches!(
            self,
            MapRole::BaseColor
                | MapRole::Emissive
                | MapRole::SheenColor
                | MapRole::SpecularColor
                | MapRole::Environment
        )
    }
}

#[derive(Clone)]
pub enum TexturePixels {
    Rgba8 { width: u32, height: u32, data: Arc<Vec<u8>> },
    RgbF32 { width: u32, height: u32, data: Arc<Vec<f32>> },
}

impl TexturePixels {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            TexturePixels::Rgba8 { width, height, .. } => (*width, *height),
            TexturePixels::RgbF32 { width, height, .. } => (*width, *height),
        }
    }

    /// Float pixels are raw data textures and stay linear whatever the role.
    pub fn is_float_data(&self) -> bool {
        matches!(self, TexturePixels::RgbF32 { .. })
    }
}

#[derive(Clone)]
pub struct RealizedTexture {
    pub uuid: Uuid,
    pub pixels: TexturePixels,
    pub color_space: TextureColorSpace,
    pub mapping: TextureMapping,
    pub repeat: Vec2,
    pub rotation: f32,
    pub(crate) gpu: Option<Arc<GpuTexture>>,
}

impl RealizedTexture {
    fn new(uuid: Uuid, pixels: TexturePixels, mapping: TextureMapping) -> Self {
        Self {
            uuid,
            pixels,
            color_space: TextureColorSpace::Linear,
            mapping,
            repeat: Vec2::ONE,
            rotation: 0.0,
            gpu: None,
        }
    }
}

struct ImageRecord {
    url: String,
    blob: Rc<OnceCell<Arc<Vec<u8>>>>,
}

/// In-memory realized-texture cache plus the pending-record cache in front of
/// it. Pending records hold a source url and (eventually) its bytes; realized
/// textures are decoded pixels tagged with the logical image uuid. Concurrent
/// resolutions of one uuid share a single fetch.
pub struct TextureCache {
    store: PersistentAssetStore,
    records: RefCell<HashMap<Uuid, Rc<ImageRecord>>>,
    textures: RefCell<HashMap<Uuid, RealizedTexture>>,
}

impl TextureCache {
    pub fn new(store: PersistentAssetStore) -> Self {
        Self {
            store,
            records: RefCell::new(HashMap::new()),
            textures: RefCell::new(HashMap::new()),
        }
    }

    /// Registers or updates a pending record without fetching. Blob urls are
    /// stored as-is; everything else resolves through the asset store later.
    pub fn add_image_data(&self, uuid: Uuid, url: &str) {
        let mut records = self.records.borrow_mut();
        if let Some(existing) = records.get(&uuid) {
            if existing.url == url {
                return;
            }
        }
        records.insert(
            uuid,
            Rc::new(ImageRecord { url: url.to_string(), blob: Rc::new(OnceCell::new()) }),
        );
    }

    /// Registers an image whose bytes are already local (file import path).
    pub fn add_image_blob(&self, uuid: Uuid, bytes: Vec<u8>) {
        let cell = OnceCell::new();
        let _ = cell.set(Arc::new(bytes));
        self.records.borrow_mut().insert(
            uuid,
            Rc::new(ImageRecord {
                url: blob_url(StoreNamespace::Image, uuid),
                blob: Rc::new(cell),
            }),
        );
    }

    pub fn has_record(&self, uuid: Uuid) -> bool {
        self.records.borrow().contains_key(&uuid)
    }

    pub fn has_image(&self, uuid: Uuid) -> bool {
        self.textures.borrow().contains_key(&uuid)
    }

    pub fn get_image(&self, uuid: Uuid) -> Option<RealizedTexture> {
        self.textures.borrow().get(&uuid).cloned()
    }

    /// Resolves the pending record to concrete bytes, fetching through the
    /// asset store at most once per record however many callers race here.
    pub async fn get_canvas_image(&self, uuid: Uuid) -> Option<Arc<Vec<u8>>> {
        let record = match self.records.borrow().get(&uuid) {
            Some(record) => record.clone(),
            None => {
                log::warn!("[textures] no pending record for image {uuid}");
                return None;
            }
        };
        let store = self.store.clone();
        let url = record.url.clone();
        let result = record
            .blob
            .get_or_try_init(|| async move {
                if is_blob_url(&url) {
                    let (namespace, id) =
                        parse_blob_url(&url).unwrap_or((StoreNamespace::Image, uuid));
                    store
                        .read_local(namespace, id)
                        .await
                        .map(|record| record.data)
                        .ok_or_else(|| anyhow!("blob url '{url}' has no local data"))
                } else {
                    let fetched = store
                        .get_store_item(GetStoreItem {
                            uuid,
                            path: url.clone(),
                            namespace: StoreNamespace::Image,
                            need_await_fetch: true,
                        })
                        .await;
                    if fetched.is_empty() {
                        Err(anyhow!("fetch for '{url}' produced no data"))
                    } else {
                        Ok(fetched.data)
                    }
                }
            })
            .await;
        match result {
            Ok(data) => Some(data.clone()),
            Err(err) => {
                log::warn!("[textures] image {uuid} failed to resolve: {err}");
                None
            }
        }
    }

    /// Decodes the record into a realized LDR texture. Memoized by uuid; a
    /// repeat call returns the earlier outcome instead of redoing the work.
    pub async fn add_texture_image(&self, uuid: Uuid) -> bool {
        if self.has_image(uuid) {
            return true;
        }
        let Some(bytes) = self.get_canvas_image(uuid).await else {
            return false;
        };
        match decode_rgba8(&bytes) {
            Ok(pixels) => {
                self.textures
                    .borrow_mut()
                    .insert(uuid, RealizedTexture::new(uuid, pixels, TextureMapping::Uv));
                true
            }
            Err(err) => {
                log::warn!("[textures] decode failed for image {uuid}: {err:?}");
                false
            }
        }
    }

    /// Decodes a radiance (RGBE) record into a float texture tagged for
    /// equirectangular reflection mapping.
    pub async fn add_rgbe_texture_image(&self, uuid: Uuid) -> bool {
        if self.has_image(uuid) {
            return true;
        }
        let Some(bytes) = self.get_canvas_image(uuid).await else {
            return false;
        };
        match decode_rgb32f(&bytes) {
            Ok(pixels) => {
                self.textures.borrow_mut().insert(
                    uuid,
                    RealizedTexture::new(uuid, pixels, TextureMapping::EquirectangularReflection),
                );
                true
            }
            Err(err) => {
                log::warn!("[textures] radiance decode failed for image {uuid}: {err:?}");
                false
            }
        }
    }

    /// Applies the color-space policy for the role a material consumes the
    /// image under. Float data textures stay linear; environment maps are
    /// additionally tagged equirectangular.
    pub fn apply_role(&self, uuid: Uuid, role: MapRole) {
        let mut textures = self.textures.borrow_mut();
        let Some(texture) = textures.get_mut(&uuid) else {
            return;
        };
        if role.wants_display_color_space() && !texture.pixels.is_float_data() {
            texture.color_space = TextureColorSpace::Srgb;
            texture.gpu = None;
        }
        if role == MapRole::Environment {
            texture.mapping = TextureMapping::EquirectangularReflection;
        }
    }

    pub fn set_repeat(&self, uuid: Uuid, repeat: Vec2) {
        if let Some(texture) = self.textures.borrow_mut().get_mut(&uuid) {
            texture.repeat = repeat;
        }
    }

    pub fn set_rotation(&self, uuid: Uuid, rotation: f32) {
        if let Some(texture) = self.textures.borrow_mut().get_mut(&uuid) {
            texture.rotation = rotation;
        }
    }

    /// Drops only the realized texture; the pending record (and any persisted
    /// blob) stays for a later consumer.
    pub fn remove_realized(&self, uuid: Uuid) {
        if self.textures.borrow_mut().remove(&uuid).is_some() {
            log::info!("[textures] released realized texture {uuid}");
        }
    }

    pub fn delete_image(&self, uuid: Uuid) {
        if self.textures.borrow_mut().remove(&uuid).is_some() {
            log::info!("[textures] released realized texture {uuid}");
        }
        if self.records.borrow_mut().remove(&uuid).is_some() {
            log::info!("[textures] dropped pending image record {uuid}");
        }
    }

    pub fn ensure_gpu(&self, uuid: Uuid, renderer: &mut Renderer) -> Result<Arc<GpuTexture>> {
        let mut textures = self.textures.borrow_mut();
        let texture =
            textures.get_mut(&uuid).ok_or_else(|| anyhow!("Texture {uuid} not realized"))?;
        if let Some(gpu) = &texture.gpu {
            return Ok(gpu.clone());
        }
        let gpu = Arc::new(renderer.create_gpu_texture(texture)?);
        texture.gpu = Some(gpu.clone());
        Ok(gpu)
    }
}

fn decode_rgba8(bytes: &[u8]) -> Result<TexturePixels> {
    let decoded = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?.decode()?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(TexturePixels::Rgba8 { width, height, data: Arc::new(rgba.into_raw()) })
}

fn decode_rgb32f(bytes: &[u8]) -> Result<TexturePixels> {
    let decoded = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?.decode()?;
    let rgb = decoded.to_rgb32f();
    let (width, height) = rgb.dimensions();
    Ok(TexturePixels::RgbF32 { width, height, data: Arc::new(rgb.into_raw()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbaImage};
    use tempfile::tempdir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, image::Rgba([200, 64, 32, 255]));
        let mut cursor = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("png encodes");
        cursor.into_inner()
    }

    fn cache() -> (tempfile::TempDir, TextureCache) {
        let dir = tempdir().expect("tempdir");
        let store =
            PersistentAssetStore::open(dir.path().join("cache"), 1 << 20).expect("store opens");
        (dir, TextureCache::new(store))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn blob_backed_record_realizes_without_fetch() {
        let (_dir, cache) = cache();
        let uuid = Uuid::new_v4();
        cache.add_image_blob(uuid, png_bytes(2, 2));
        assert!(cache.add_texture_image(uuid).await);
        let image = cache.get_image(uuid).expect("realized");
        assert_eq!(image.pixels.dimensions(), (2, 2));
        assert_eq!(image.color_space, TextureColorSpace::Linear);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn repeated_resolution_shares_one_blob() {
        let (dir, cache) = cache();
        let source = dir.path().join("tex.png");
        std::fs::write(&source, png_bytes(2, 2)).expect("source written");
        let uuid = Uuid::new_v4();
        cache.add_image_data(uuid, &source.to_string_lossy());

        let first = cache.get_canvas_image(uuid).await.expect("first resolve");
        let second = cache.get_canvas_image(uuid).await.expect("second resolve");
        assert!(Arc::ptr_eq(&first, &second), "second call re-fetched the blob");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn role_policy_forces_srgb_for_display_maps() {
        let (_dir, cache) = cache();
        let uuid = Uuid::new_v4();
        cache.add_image_blob(uuid, png_bytes(1, 1));
        cache.add_texture_image(uuid).await;
        cache.apply_role(uuid, MapRole::BaseColor);
        assert_eq!(cache.get_image(uuid).expect("image").color_space, TextureColorSpace::Srgb);

        let normal = Uuid::new_v4();
        cache.add_image_blob(normal, png_bytes(1, 1));
        cache.add_texture_image(normal).await;
        cache.apply_role(normal, MapRole::Normal);
        assert_eq!(
            cache.get_image(normal).expect("image").color_space,
            TextureColorSpace::Linear
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delete_image_drops_texture_and_record() {
        let (_dir, cache) = cache();
        let uuid = Uuid::new_v4();
        cache.add_image_blob(uuid, png_bytes(1, 1));
        cache.add_texture_image(uuid).await;
        cache.delete_image(uuid);
        assert!(!cache.has_image(uuid));
        assert!(!cache.has_record(uuid));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn readd_with_same_url_keeps_resolved_blob() {
        let (dir, cache) = cache();
        let source = dir.path().join("tex.png");
        std::fs::write(&source, png_bytes(2, 2)).expect("source written");
        let url = source.to_string_lossy().into_owned();
        let uuid = Uuid::new_v4();
        cache.add_image_data(uuid, &url);
        let first = cache.get_canvas_image(uuid).await.expect("resolved");
        cache.add_image_data(uuid, &url);
        let second = cache.get_canvas_image(uuid).await.expect("still resolved");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
