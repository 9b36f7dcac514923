mod auto;
mod docker;
mod source;
mod tar;

pub use auto::AutoSource;
pub use docker::DockerSource;
pub use source::Source;
pub use tar::TarSource;
