// Core modules: wire model, page decoding, checkpointing, output, and the run loop.
pub mod checkpoint;
pub mod cursor;
pub mod decode;
pub mod delta;
pub mod dictionary;
pub mod error;
pub mod normalize;
pub mod paginate;
pub mod sink;
pub mod wire;
