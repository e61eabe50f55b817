pub mod one_euro;

pub use one_euro::KeypointSmoother;
