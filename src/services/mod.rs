pub mod geocode;
pub mod suggest;
