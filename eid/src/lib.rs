pub mod endpoint;

pub use endpoint::Eid;
