pub mod roster;
pub mod selector;
