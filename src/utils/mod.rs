//! Utility modules for the library.

mod random;

pub use random::Random;
