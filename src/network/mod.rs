pub mod discovery;

pub use discovery::scan_for_scales;
