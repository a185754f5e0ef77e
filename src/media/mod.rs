/// Image files on disk
///
/// This module handles everything about the PNGs themselves:
/// the embedded generation metadata, output naming and the thumbnail cache.
pub mod metadata;
pub mod naming;
pub mod thumbnail;
