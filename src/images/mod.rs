/// Image delivery pipeline
///
/// - `format.rs` - one-time WebP support check
/// - `source.rs` - variant, placeholder and data URI handling
/// - `task.rs` - per-image load state and the retry scheduler
/// - `fetch.rs` - the image fetching seam
/// - `viewport.rs` - root margin and intersection watching
/// - `pipeline.rs` - registration, triggering and settling of loads

pub mod fetch;
pub mod format;
pub mod pipeline;
pub mod source;
pub mod task;
pub mod viewport;

pub use fetch::{FetchPathImages, ImageFetcher, LoadedImage};
pub use format::{FormatState, FormatSupport};
pub use pipeline::{ImagePipeline, PipelineBuilder};
pub use task::{ImageLoadTask, LoadState, RetryPolicy, RetryScheduler};
pub use viewport::{IntersectionWatcher, RootMargin};
