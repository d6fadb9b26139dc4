/// Static asset manifest: root-relative paths pre-cached at install time
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StaticManifest {
    paths: Vec<String>,
}

impl StaticManifest {
    /// Build from a fixed list; paths are made root-relative and de-duplicated
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut manifest = Self::default();
        for path in paths {
            manifest.push(path.as_ref());
        }
        manifest
    }

    fn push(&mut self, path: &str) {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Build by walking a site directory: every regular, non-hidden file,
    /// plus `/` when the site has an `index.html`
    pub fn scan(site_root: &Path) -> Self {
        let mut manifest = Self::default();
        if site_root.join("index.html").is_file() {
            manifest.push("/");
        }

        let mut files: Vec<String> = WalkDir::new(site_root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            })
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(site_root).ok()?;
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(parts.join("/"))
            })
            .collect();
        files.sort();

        for file in &files {
            debug!("Manifest entry: /{}", file);
            manifest.push(file);
        }
        info!("🗂️  Scanned {} static assets from {}", manifest.len(), site_root.display());
        manifest
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
