/// State management module
///
/// This module handles all persistent application state, including:
/// - The SQLite image catalog and its rescan importer (library.rs)
/// - Characters and generation presets stored next to it (collections.rs)
/// - Shared data structures (data.rs)
/// - Generation parameters (params.rs)
/// - JSON-backed settings: session, favorites, style presets
/// - The on-disk layout of an installation (paths.rs)

pub mod collections;
pub mod data;
pub mod favorites;
pub mod library;
pub mod params;
pub mod paths;
pub mod session;
pub mod store;
pub mod styles;
