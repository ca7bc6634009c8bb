pub mod grid;
pub mod screenshot;
pub mod template;
pub mod traits;
pub mod types;
pub mod wait;
