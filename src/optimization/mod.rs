pub mod homography;
pub mod linear;
pub mod ransac;

pub use homography::*;
pub use linear::*;
pub use ransac::*;
