pub mod bucket;
pub mod climate;
pub mod observation;
pub mod resolution;
pub mod station;
