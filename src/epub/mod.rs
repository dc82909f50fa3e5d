mod builder;
mod zip;

pub use builder::EpubBuilder;
