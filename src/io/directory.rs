use crate::core::sources::ImageSourceDescriptor;
use crate::io::backend::{filter_scenes, ImageryBackend};
use crate::io::scene::SceneRecord;
use crate::types::{BoundingBox, DateRange, NdviResult, RasterImage};
use std::fs;
use std::path::{Path, PathBuf};

/// Scene catalog stored as JSON files on disk.
///
/// Layout: `<root>/<catalog id with '/' replaced by '_'>/*.json`, one
/// [`SceneRecord`] per file.
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory holding the scenes of one catalog
    pub fn catalog_dir(&self, catalog_id: &str) -> PathBuf {
        self.root.join(catalog_id.replace('/', "_"))
    }

    /// Store a scene so later queries can find it
    pub fn write_scene(&self, catalog_id: &str, scene: &RasterImage) -> NdviResult<PathBuf> {
        let dir = self.catalog_dir(catalog_id);
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.json", scene.id));
        let record = SceneRecord::from_image(scene);
        fs::write(&path, serde_json::to_vec(&record)?)?;

        log::debug!("Wrote scene {} to {}", scene.id, path.display());
        Ok(path)
    }

    fn read_catalog(&self, catalog_id: &str) -> NdviResult<Vec<RasterImage>> {
        let dir = self.catalog_dir(catalog_id);
        if !dir.exists() {
            log::debug!("No scenes stored for {} under {}", catalog_id, dir.display());
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
            .collect();
        paths.sort();

        let mut scenes = Vec::with_capacity(paths.len());
        for path in paths {
            let content = fs::read_to_string(&path)?;
            let record: SceneRecord = serde_json::from_str(&content)?;
            scenes.push(record.into_image()?);
        }
        Ok(scenes)
    }
}

impl ImageryBackend for DirectoryBackend {
    fn query(
        &self,
        source: &ImageSourceDescriptor,
        range: &DateRange,
        bounds: &BoundingBox,
    ) -> NdviResult<Vec<RasterImage>> {
        let scenes = self.read_catalog(&source.catalog_id)?;
        let matching = filter_scenes(&scenes, range, bounds);
        log::info!(
            "{}: {} of {} stored scenes match the query",
            source.catalog_id,
            matching.len(),
            scenes.len()
        );
        Ok(matching)
    }

    fn name(&self) -> &str {
        "directory backend"
    }
}
