//! Target selection: where the camera should be, before smoothing

mod resolver;

pub use resolver::TargetResolver;
