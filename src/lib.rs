pub mod analysis;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod extracted_image;
pub mod image;
pub mod notifier;
pub mod os_release;
pub mod output;
pub mod packages;
pub mod processor;
pub mod snapshot;
pub mod sources;
pub mod tar_extractor;

// Re-exports for easy access
pub use analyzer::AnalyzerKind;
pub use config::Config;
pub use error::{ConfigError, ExtractError};
pub use extracted_image::{ExtractedImage, ImageInfo};
pub use image::Image;
pub use notifier::Notifier;
pub use processor::ImageProcessor;
pub use sources::AutoSource;
pub use sources::DockerSource;
pub use sources::Source;
pub use sources::TarSource;
