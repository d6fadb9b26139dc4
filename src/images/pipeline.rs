/// Image delivery pipeline
///
/// Owns the per-image load tasks for one document. Elements are found by
/// selector, prepared (placeholder colour, aspect ratio, lazy hint) and
/// either watched for the viewport or loaded at once. Every load runs as
/// its own tokio task and ends in a displayed state: the loaded source or
/// a placeholder.
///
/// Locks are never held across an await point.
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::fetch::ImageFetcher;
use super::format::FormatSupport;
use super::source::{modern_variant, placeholder_url};
use super::task::{ImageLoadTask, LoadState, RetryPolicy, RetryScheduler};
use super::viewport::{IntersectionWatcher, RootMargin};
use crate::config::LoaderConfig;
use crate::dom::{ElementId, Rect, Selector, SharedDocument};
use crate::error::Result;

/// Attribute holding the real source of a deferred image
pub const DEFERRED_SOURCE: &str = "data-src";
/// Attribute holding the real background of a deferred element
pub const DEFERRED_BACKGROUND: &str = "data-bg";

/// Images handled by the lazy watcher
pub const DEFERRED_SELECTOR: &str = "img[data-src]:not(.critical-image):not(.before-after-image)";
/// Images that load without waiting for the viewport
pub const CRITICAL_SELECTOR: &str = "img.critical-image, .hero img[data-src], .navbar img[data-src]";
pub const PAIR_CONTAINER_SELECTOR: &str = ".before-after-container";
pub const BACKGROUND_SELECTOR: &str = "[data-bg]";

/// Dispatched on a pair container once all of its images have settled
pub const PAIR_READY_EVENT: &str = "beforeAfterImagesLoaded";

pub const CLASS_FADE_IN: &str = "fade-in";
pub const CLASS_LOADED: &str = "loaded";
pub const CLASS_LOAD_ERROR: &str = "img-load-error";
pub const CLASS_PAIR_IMAGE: &str = "before-after-image";
pub const CLASS_PAIR_READY: &str = "images-loaded";
pub const CLASS_BACKGROUND_LOADED: &str = "bg-loaded";
pub const CLASS_FORMAT_SUPPORTED: &str = "webp-support";
pub const CLASS_FORMAT_UNSUPPORTED: &str = "no-webp-support";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    Image,
    Background,
}

#[derive(Debug)]
struct Watch {
    kind: WatchKind,
    watcher: IntersectionWatcher,
    config: Arc<LoaderConfig>,
}

#[derive(Debug)]
struct Pair {
    images: Vec<ElementId>,
    announced: bool,
}

struct Shared {
    document: SharedDocument,
    fetcher: Arc<dyn ImageFetcher>,
    format: Arc<FormatSupport>,
    config: Arc<LoaderConfig>,
    scheduler: RetryScheduler,
    observer_supported: bool,
    watches: Mutex<Vec<Watch>>,
    tracked: Mutex<HashMap<ElementId, LoadState>>,
    /// Container of each paired image
    pair_of: Mutex<HashMap<ElementId, ElementId>>,
    pairs: Mutex<BTreeMap<ElementId, Pair>>,
}

/// Configures an `ImagePipeline`
pub struct PipelineBuilder {
    document: SharedDocument,
    fetcher: Arc<dyn ImageFetcher>,
    format: Option<Arc<FormatSupport>>,
    config: LoaderConfig,
    observer_supported: bool,
}

impl PipelineBuilder {
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a format flag (e.g. one detected at process start)
    pub fn format_support(mut self, format: Arc<FormatSupport>) -> Self {
        self.format = Some(format);
        self
    }

    /// Whether viewport observation is available. Without it every
    /// registered element loads immediately.
    pub fn intersection_observer(mut self, supported: bool) -> Self {
        self.observer_supported = supported;
        self
    }

    pub fn build(self) -> ImagePipeline {
        ImagePipeline {
            shared: Arc::new(Shared {
                document: self.document,
                fetcher: self.fetcher,
                format: self.format.unwrap_or_default(),
                config: Arc::new(self.config),
                scheduler: RetryScheduler,
                observer_supported: self.observer_supported,
                watches: Mutex::new(Vec::new()),
                tracked: Mutex::new(HashMap::new()),
                pair_of: Mutex::new(HashMap::new()),
                pairs: Mutex::new(BTreeMap::new()),
            }),
            tasks: Mutex::new(JoinSet::new()),
        }
    }
}

/// Lazy loading, format negotiation, retries and placeholders for one document
pub struct ImagePipeline {
    shared: Arc<Shared>,
    tasks: Mutex<JoinSet<()>>,
}

impl ImagePipeline {
    pub fn builder(document: SharedDocument, fetcher: Arc<dyn ImageFetcher>) -> PipelineBuilder {
        PipelineBuilder {
            document,
            fetcher,
            format: None,
            config: LoaderConfig::default(),
            observer_supported: true,
        }
    }

    pub fn new(document: SharedDocument, fetcher: Arc<dyn ImageFetcher>, config: LoaderConfig) -> Self {
        Self::builder(document, fetcher).config(config).build()
    }

    pub fn document(&self) -> &SharedDocument {
        &self.shared.document
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.shared.config
    }

    pub fn format_support(&self) -> &FormatSupport {
        &self.shared.format
    }

    /// Load state of a tracked element; `None` if it was never started
    pub fn state(&self, element: ElementId) -> Option<LoadState> {
        self.shared.tracked.lock().get(&element).copied()
    }

    /// Run the format check (once per flag) and tag the document root
    pub async fn detect_format_support(&self) -> bool {
        let supported = self
            .shared
            .format
            .detect(self.shared.config.detect_timeout())
            .await;
        self.mark_format_support();
        supported
    }

    /// Tag the document root with the current format support class
    pub fn mark_format_support(&self) {
        self.shared.mark_format_support();
    }

    /// Page start-up: detect in the background, load critical and paired
    /// images, then register the lazy images and backgrounds.
    ///
    /// Must be called from within a Tokio runtime. Returns the number of
    /// elements that were started or registered.
    pub fn start(&self) -> Result<usize> {
        let shared = self.shared.clone();
        self.tasks.lock().spawn(async move {
            shared.format.detect(shared.config.detect_timeout()).await;
            shared.mark_format_support();
        });

        let config = self.shared.config.as_ref().clone();
        let mut count = self.load_critical_images()?;
        count += self.load_paired_images()?;
        count += self.register_deferred_images(DEFERRED_SELECTOR, &config)?;
        count += self.register_background_images(&config)?;
        info!("🖼️  Image pipeline started ({} elements)", count);
        Ok(count)
    }

    /// Prepare and watch every element matching `selector` that still has
    /// a deferred source. Already tracked or watched elements are skipped,
    /// so registering twice is a no-op.
    pub fn register_deferred_images(&self, selector: &str, options: &LoaderConfig) -> Result<usize> {
        let selector = Selector::parse(selector)?;
        let margin: RootMargin = options.root_margin.parse()?;
        let options = Arc::new(options.clone());

        let candidates: Vec<ElementId> = {
            let doc = self.shared.document.lock();
            doc.query_selector_all(&selector)
                .into_iter()
                .filter(|&id| doc.has_attribute(id, DEFERRED_SOURCE))
                .collect()
        };
        let fresh: Vec<ElementId> = candidates
            .into_iter()
            .filter(|&id| !self.shared.is_tracked(id) && !self.shared.is_watched(id))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        {
            let mut doc = self.shared.document.lock();
            for &id in &fresh {
                if let (Some(w), Some(h)) = (doc.attribute(id, "width"), doc.attribute(id, "height")) {
                    let ratio = format!("{} / {}", w, h);
                    doc.set_style(id, "aspect-ratio", ratio);
                }
                doc.set_style(id, "background-color", options.placeholder_color.clone());
                if !doc.has_attribute(id, "loading") {
                    doc.set_attribute(id, "loading", "lazy");
                }
            }
        }

        if self.shared.observer_supported {
            let mut watcher = IntersectionWatcher::new(margin, options.threshold);
            for &id in &fresh {
                watcher.observe(id);
            }
            self.shared.watches.lock().push(Watch {
                kind: WatchKind::Image,
                watcher,
                config: options,
            });
        } else {
            debug!("No viewport observation, loading {} images now", fresh.len());
            for &id in &fresh {
                self.spawn_load(id, options.clone());
            }
        }
        Ok(fresh.len())
    }

    /// Watch `[data-bg]` elements; their background is applied when they
    /// come near the viewport.
    pub fn register_background_images(&self, options: &LoaderConfig) -> Result<usize> {
        let selector = Selector::parse(BACKGROUND_SELECTOR)?;
        let margin: RootMargin = options.root_margin.parse()?;

        let found = self.shared.document.lock().query_selector_all(&selector);
        let fresh: Vec<ElementId> = found
            .into_iter()
            .filter(|&id| !self.shared.is_watched(id))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        if self.shared.observer_supported {
            let mut watcher = IntersectionWatcher::new(margin, options.threshold);
            for &id in &fresh {
                watcher.observe(id);
            }
            self.shared.watches.lock().push(Watch {
                kind: WatchKind::Background,
                watcher,
                config: Arc::new(options.clone()),
            });
        } else {
            for &id in &fresh {
                self.shared.apply_background(id);
            }
        }
        Ok(fresh.len())
    }

    /// Start every watched element that intersects `viewport` (grown by its
    /// watcher's margin). Returns how many were started.
    pub fn update_viewport(&self, viewport: Rect) -> usize {
        let mut images = Vec::new();
        let mut backgrounds = Vec::new();
        {
            let mut watches = self.shared.watches.lock();
            let doc = self.shared.document.lock();
            for watch in watches.iter_mut() {
                for id in watch.watcher.take_intersecting(&doc, viewport) {
                    match watch.kind {
                        WatchKind::Image => images.push((id, watch.config.clone())),
                        WatchKind::Background => backgrounds.push(id),
                    }
                }
            }
            watches.retain(|w| !w.watcher.is_empty());
        }

        let mut started = 0;
        for (id, config) in images {
            if self.spawn_load(id, config) {
                started += 1;
            }
        }
        for id in backgrounds {
            self.shared.apply_background(id);
            started += 1;
        }
        started
    }

    /// Load hero, navigation and `.critical-image` images immediately
    pub fn load_critical_images(&self) -> Result<usize> {
        let selector = Selector::parse(CRITICAL_SELECTOR)?;
        let found: Vec<ElementId> = {
            let doc = self.shared.document.lock();
            doc.query_selector_all(&selector)
                .into_iter()
                .filter(|&id| doc.has_attribute(id, DEFERRED_SOURCE))
                .collect()
        };

        let config = self.shared.config.clone();
        Ok(found
            .into_iter()
            .filter(|&id| self.spawn_load(id, config.clone()))
            .count())
    }

    /// Load before/after image pairs with priority. Each container is
    /// announced with `beforeAfterImagesLoaded` once all its images have
    /// settled.
    pub fn load_paired_images(&self) -> Result<usize> {
        let containers = Selector::parse(PAIR_CONTAINER_SELECTOR)?;
        let imgs = Selector::parse("img")?;

        let mut deferred = Vec::new();
        let mut groups = Vec::new();
        {
            let mut doc = self.shared.document.lock();
            for container in doc.query_selector_all(&containers) {
                let images = doc.descendants_matching(container, &imgs);
                if images.is_empty() {
                    continue;
                }
                for &img in &images {
                    doc.add_class(img, CLASS_PAIR_IMAGE);
                    if doc.has_attribute(img, DEFERRED_SOURCE) {
                        deferred.push(img);
                    } else if doc.has_attribute(img, "src") {
                        // Already has its real source
                        doc.add_class(img, CLASS_LOADED);
                        doc.set_complete(img, true);
                    } else {
                        // Nothing to load; settle it so the pair is not stuck
                        warn!("⚠️  Paired image {:?} has no source", img);
                        doc.add_class(img, CLASS_LOAD_ERROR);
                        doc.set_complete(img, true);
                    }
                }
                groups.push((container, images));
            }
        }

        {
            let mut pair_of = self.shared.pair_of.lock();
            let mut pairs = self.shared.pairs.lock();
            for (container, images) in &groups {
                for &img in images {
                    pair_of.insert(img, *container);
                }
                pairs.entry(*container).or_insert_with(|| Pair {
                    images: images.clone(),
                    announced: false,
                });
            }
        }

        let config = self.shared.config.clone();
        let started = deferred
            .into_iter()
            .filter(|&id| self.spawn_load(id, config.clone()))
            .count();

        // Containers whose images were all in place already
        for (container, _) in groups {
            let shared = self.shared.clone();
            self.tasks.lock().spawn(async move {
                shared.announce_if_ready(container).await;
            });
        }
        Ok(started)
    }

    /// Window-load sweep: load every image still carrying a deferred
    /// source that is not already in flight.
    pub fn force_load_remaining(&self) -> Result<usize> {
        let selector = Selector::parse("img[data-src]")?;
        let found = self.shared.document.lock().query_selector_all(&selector);

        let mut started = 0;
        for id in found {
            let config = {
                let mut watches = self.shared.watches.lock();
                let mut config = None;
                for watch in watches.iter_mut() {
                    if watch.watcher.unobserve(id) {
                        config = Some(watch.config.clone());
                    }
                }
                watches.retain(|w| !w.watcher.is_empty());
                config
            };
            let config = config.unwrap_or_else(|| self.shared.config.clone());
            if self.spawn_load(id, config) {
                started += 1;
            }
        }
        if started > 0 {
            debug!("Forced {} remaining images", started);
        }
        Ok(started)
    }

    /// Wait for every load task, including ones started while waiting
    pub async fn settle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("⚠️  Image task ended abnormally: {}", e);
                }
            }
        }
    }

    /// Start a load task unless `element` is already tracked
    fn spawn_load(&self, element: ElementId, config: Arc<LoaderConfig>) -> bool {
        {
            let mut tracked = self.shared.tracked.lock();
            if tracked.contains_key(&element) {
                return false;
            }
            tracked.insert(element, LoadState::Pending);
        }
        let shared = self.shared.clone();
        self.tasks.lock().spawn(async move {
            shared.load(element, config).await;
        });
        true
    }
}

impl std::fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("format", &self.shared.format.state())
            .field("tracked", &self.shared.tracked.lock().len())
            .field("observer_supported", &self.shared.observer_supported)
            .finish()
    }
}

impl Shared {
    fn is_tracked(&self, element: ElementId) -> bool {
        self.tracked.lock().contains_key(&element)
    }

    fn is_watched(&self, element: ElementId) -> bool {
        self.watches
            .lock()
            .iter()
            .any(|w| w.watcher.is_observing(element))
    }

    fn set_state(&self, element: ElementId, state: LoadState) {
        self.tracked.lock().insert(element, state);
    }

    fn mark_format_support(&self) {
        let class = if self.format.is_supported() {
            CLASS_FORMAT_SUPPORTED
        } else {
            CLASS_FORMAT_UNSUPPORTED
        };
        let mut doc = self.document.lock();
        let root = doc.root();
        doc.add_class(root, class);
    }

    fn apply_background(&self, element: ElementId) {
        let mut doc = self.document.lock();
        if let Some(url) = doc.remove_attribute(element, DEFERRED_BACKGROUND) {
            doc.set_style(element, "background-image", format!("url({})", url));
            doc.add_class(element, CLASS_BACKGROUND_LOADED);
        }
    }

    /// One element, start to finish: modern variant once, then the
    /// original with retries, then the placeholder.
    async fn load(self: Arc<Self>, element: ElementId, config: Arc<LoaderConfig>) {
        let source = self
            .document
            .lock()
            .attribute(element, DEFERRED_SOURCE)
            .map(str::to_string);
        let Some(source) = source else {
            self.tracked.lock().remove(&element);
            return;
        };

        let candidate = if self.format.is_supported() {
            modern_variant(&source)
        } else {
            None
        };
        let mut task = ImageLoadTask::new(element, source, candidate, RetryPolicy::from_config(&config));
        task.begin();
        self.set_state(element, task.state());

        if let Some(candidate) = task.take_candidate() {
            match self.fetcher.fetch_image(&candidate).await {
                Ok(_) => {
                    self.finish_loaded(&mut task, &candidate);
                    self.announce_pair_of(element).await;
                    return;
                }
                Err(e) => debug!("{} unavailable ({}), using {}", candidate, e, task.source()),
            }
        }

        loop {
            match self.fetcher.fetch_image(task.source()).await {
                Ok(_) => {
                    let source = task.source().to_string();
                    self.finish_loaded(&mut task, &source);
                    break;
                }
                Err(e) => {
                    debug!("Image load failed: {} ({})", task.source(), e);
                    if !self.scheduler.next_attempt(&mut task).await {
                        self.finish_failed(&mut task, &config);
                        break;
                    }
                }
            }
        }
        self.announce_pair_of(element).await;
    }

    fn finish_loaded(&self, task: &mut ImageLoadTask, src: &str) {
        task.complete();
        let element = task.element();
        {
            let mut doc = self.document.lock();
            doc.set_attribute(element, "src", src);
            doc.remove_attribute(element, DEFERRED_SOURCE);
            doc.remove_style(element, "background-color");
            doc.add_class(element, CLASS_FADE_IN);
            if doc.has_class(element, CLASS_PAIR_IMAGE) {
                doc.add_class(element, CLASS_LOADED);
            }
            doc.set_complete(element, true);
        }
        self.set_state(element, task.state());
    }

    fn finish_failed(&self, task: &mut ImageLoadTask, config: &LoaderConfig) {
        task.fail();
        let element = task.element();
        if config.log_errors {
            warn!("⚠️  Failed to load image after retries: {}", task.source());
        }
        {
            let mut doc = self.document.lock();
            let placeholder = placeholder_url(&config.placeholder_service, doc.attribute(element, "alt"));
            doc.set_attribute(element, "src", placeholder);
            doc.remove_attribute(element, DEFERRED_SOURCE);
            doc.add_class(element, CLASS_LOAD_ERROR);
            doc.set_complete(element, true);
        }
        self.set_state(element, task.state());
    }

    async fn announce_pair_of(&self, element: ElementId) {
        let container = self.pair_of.lock().get(&element).copied();
        if let Some(container) = container {
            self.announce_if_ready(container).await;
        }
    }

    /// Mark the container ready and, after the settle delay, dispatch the
    /// readiness event. Happens at most once per container.
    async fn announce_if_ready(&self, container: ElementId) {
        let degraded = {
            let mut pairs = self.pairs.lock();
            let Some(pair) = pairs.get_mut(&container) else {
                return;
            };
            if pair.announced {
                return;
            }
            let mut doc = self.document.lock();
            if !pair.images.iter().all(|&img| doc.element(img).is_complete()) {
                return;
            }
            pair.announced = true;
            doc.add_class(container, CLASS_PAIR_READY);
            pair.images.iter().any(|&img| doc.has_class(img, CLASS_LOAD_ERROR))
        };

        tokio::time::sleep(self.config.pair_ready_delay()).await;
        debug!("Image pair {:?} ready (degraded: {})", container, degraded);
        self.document.lock().dispatch(
            PAIR_READY_EVENT,
            container,
            true,
            json!({ "container": container.index(), "degraded": degraded }),
        );
    }
}
