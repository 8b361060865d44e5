pub mod export;
pub mod open;
pub mod settings;
pub mod transform;
pub mod transformers;
pub mod util;
pub mod workspace;

pub use export::*;
pub use open::*;
pub use settings::*;
pub use transform::*;
pub use transformers::*;
pub use util::*;
pub use workspace::*;
