pub mod normalize;
pub mod protocol;

mod link;
pub use link::*;

mod logger;
pub use logger::*;

mod pipeline;
pub use pipeline::*;

mod queue;
pub use queue::*;

mod reader;
pub use reader::*;
