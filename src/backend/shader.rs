// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. Blobs are read from disk at
// startup (a missing file is fatal) and kept in memory, so pipeline rebuilds
// on resize never touch the filesystem. An optional watcher picks up freshly
// compiled .spv files for hot reload.

use ash::vk;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

use super::error::{RenderError, RenderResult};
use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Read and validate a SPIR-V blob
pub fn load_spirv(path: &Path) -> RenderResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RenderError::ShaderNotFound {
            path: path.to_path_buf(),
        },
        _ => RenderError::ShaderIo {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let invalid = |reason: String| RenderError::InvalidShader {
        path: path.to_path_buf(),
        reason,
    };

    // read_spv checks word alignment and fixes up endianness
    let words = ash::util::read_spv(&mut Cursor::new(&bytes)).map_err(|e| invalid(e.to_string()))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(invalid(format!("bad magic number {other:#010x}"))),
        None => Err(invalid("empty file".to_string())),
    }
}

/// Vertex + fragment bytecode for one pipeline
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub vertex_path: PathBuf,
    pub fragment_path: PathBuf,
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderSet {
    /// Load `<dir>/<stem>.vert.spv` and `<dir>/<stem>.frag.spv`
    pub fn load(dir: &Path, stem: &str) -> RenderResult<Self> {
        let vertex_path = dir.join(format!("{stem}.vert.spv"));
        let fragment_path = dir.join(format!("{stem}.frag.spv"));

        let vertex = load_spirv(&vertex_path)?;
        let fragment = load_spirv(&fragment_path)?;

        log::info!(
            "Loaded shaders {} and {}",
            vertex_path.display(),
            fragment_path.display()
        );

        Ok(Self {
            vertex_path,
            fragment_path,
            vertex,
            fragment,
        })
    }

    /// Re-read both stages from their original paths
    pub fn reload(&self) -> RenderResult<Self> {
        Ok(Self {
            vertex: load_spirv(&self.vertex_path)?,
            fragment: load_spirv(&self.fragment_path)?,
            vertex_path: self.vertex_path.clone(),
            fragment_path: self.fragment_path.clone(),
        })
    }

    pub fn watches(&self, path: &Path) -> bool {
        let matches = |watched: &Path| {
            path == watched || (path.file_name().is_some() && path.file_name() == watched.file_name())
        };
        matches(&self.vertex_path) || matches(&self.fragment_path)
    }
}

/// Shader module destroyed when it goes out of scope
pub struct ShaderModule<'a> {
    pub handle: vk::ShaderModule,
    device: &'a VulkanDevice,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a VulkanDevice, code: &[u32]) -> RenderResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        let handle = unsafe { device.device.create_shader_module(&create_info, None) }?;
        Ok(Self { handle, device })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.handle, None);
        }
    }
}

/// Watches the shader directory and reports when compiled shaders change
pub struct ShaderWatcher {
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<notify::Event>>,
}

impl ShaderWatcher {
    pub fn new(dir: &Path) -> notify::Result<Self> {
        let (tx, events) = channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            // Receiver gone means the renderer is shutting down
            let _ = tx.send(event);
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        log::info!("Watching {} for shader changes", dir.display());
        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Drain pending events; true if any touched a file of `shaders`
    pub fn poll_changed(&self, shaders: &ShaderSet) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events.try_recv() {
            match event {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    changed |= event.paths.iter().any(|path| shaders.watches(path));
                }
                Ok(_) => {}
                Err(e) => log::warn!("Shader watcher error: {}", e),
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "triangle-renderer-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_missing_shader_is_not_found() {
        let path = Path::new("definitely/not/here.vert.spv");
        match load_spirv(path) {
            Err(RenderError::ShaderNotFound { path: reported }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unreadable_shader_keeps_io_error() {
        // A directory exists but cannot be read as a file
        let dir = std::env::temp_dir();
        match load_spirv(&dir) {
            Err(RenderError::ShaderIo { path, source }) => {
                assert_eq!(path, dir);
                assert_ne!(source.kind(), std::io::ErrorKind::NotFound);
                let error = RenderError::ShaderIo { path, source };
                assert!(std::error::Error::source(&error).is_some());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_valid_spirv_loads() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let path = temp_file("valid.spv", &words_to_bytes(&words));
        assert_eq!(load_spirv(&path).unwrap(), words.to_vec());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_misaligned_spirv_is_invalid() {
        let path = temp_file("misaligned.spv", &[0x03, 0x02, 0x23, 0x07, 0x00, 0x00]);
        assert!(matches!(load_spirv(&path), Err(RenderError::InvalidShader { .. })));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_bad_magic_is_invalid() {
        let path = temp_file("magic.spv", &words_to_bytes(&[0xdead_beef, 0]));
        match load_spirv(&path) {
            Err(RenderError::InvalidShader { reason, .. }) => assert!(reason.contains("magic")),
            other => panic!("unexpected result: {other:?}"),
        }
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_shader_set_watches_its_files() {
        let set = ShaderSet {
            vertex_path: PathBuf::from("shaders/spin.vert.spv"),
            fragment_path: PathBuf::from("shaders/spin.frag.spv"),
            vertex: vec![],
            fragment: vec![],
        };
        assert!(set.watches(Path::new("shaders/spin.vert.spv")));
        assert!(set.watches(Path::new("/abs/path/shaders/spin.frag.spv")));
        assert!(!set.watches(Path::new("shaders/triangle.vert.spv")));
        assert!(!set.watches(Path::new("shaders/spin.vert")));
    }
}
