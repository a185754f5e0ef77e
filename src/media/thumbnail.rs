use image::imageops::FilterType;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Size of generated thumbnails (square bounding box)
pub const THUMBNAIL_SIZE: u32 = 256;

/// Get the cached thumbnail path for an image ID (doesn't generate)
pub fn thumbnail_path(cache_dir: &Path, image_id: i64) -> PathBuf {
    cache_dir.join(format!("{}.jpg", image_id))
}

/// Return the cached thumbnail for `source`, generating it if needed.
/// Returns None if the source cannot be decoded or the cache cannot be written.
pub fn generate_thumbnail(source: &Path, cache_dir: &Path, image_id: i64) -> Option<PathBuf> {
    let target = thumbnail_path(cache_dir, image_id);
    if is_fresh(&target, source) {
        return Some(target);
    }

    let img = match image::open(source) {
        Ok(img) => img,
        Err(e) => {
            warn!("❌ Thumbnail failed for {}: {}", source.display(), e);
            return None;
        }
    };

    // Resize to thumbnail size; JPEG has no alpha channel
    let thumbnail = img
        .resize(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Lanczos3)
        .to_rgb8();

    fs::create_dir_all(cache_dir).ok()?;
    if let Err(e) = thumbnail.save(&target) {
        warn!("❌ Could not save thumbnail {}: {}", target.display(), e);
        return None;
    }

    debug!("📸 Generated thumbnail: {}", target.display());
    Some(target)
}

/// Async wrapper running the decode on the blocking pool
pub async fn load_thumbnail(source: PathBuf, cache_dir: PathBuf, image_id: i64) -> Result<PathBuf, String> {
    tokio::task::spawn_blocking(move || {
        generate_thumbnail(&source, &cache_dir, image_id)
            .ok_or_else(|| format!("No thumbnail for {}", source.display()))
    })
    .await
    .map_err(|e| format!("Task join error: {}", e))?
}

/// A cached thumbnail is fresh if it is at least as new as its source
fn is_fresh(thumbnail: &Path, source: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(thumbnail), modified(source)) {
        (Some(thumb), Some(src)) => thumb >= src,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn test_thumbnail_is_bounded_and_cached() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("wide.png");
        RgbaImage::from_pixel(1024, 512, Rgba([200, 100, 50, 128]))
            .save(&source)
            .unwrap();
        let cache = dir.path().join("cache");

        let thumb = generate_thumbnail(&source, &cache, 7).unwrap();
        assert_eq!(thumb, thumbnail_path(&cache, 7));

        let decoded = image::open(&thumb).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (256, 128));

        assert_eq!(generate_thumbnail(&source, &cache, 7), Some(thumb));
    }

    #[test]
    fn test_unreadable_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("broken.png");
        fs::write(&source, b"nope").unwrap();
        assert!(generate_thumbnail(&source, dir.path(), 1).is_none());
    }

    #[tokio::test]
    async fn test_async_load() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.png");
        RgbaImage::new(32, 32).save(&source).unwrap();

        let thumb = load_thumbnail(source, dir.path().join("cache"), 3).await.unwrap();
        assert!(thumb.exists());
    }
}
