//! Tool configuration and per-instance path layout.
//!
//! - `settings` - Global settings file (`Settings`) and its lookup order
//! - `layout` - Paths derived for one instance (`InstanceLayout`)

mod layout;
mod settings;

pub use layout::*;
pub use settings::*;
