//! Programs, selectors and variants.

pub mod compose;
mod parts;
mod program;
mod selector;
mod variant;

pub use parts::PartCache;
pub use program::{IoMasks, ShaderProgram, StreamOutput, StreamOutputSlot};
pub use selector::{Selector, SelectorInner};
pub(crate) use selector::SelectorState;
pub use variant::{Classification, ShaderVariant};
