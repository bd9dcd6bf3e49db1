pub mod runner;

pub use runner::Captioner;
