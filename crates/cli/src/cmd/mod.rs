mod build;
mod dev;

pub use build::cmd_build;
pub use dev::cmd_dev;
