#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Configuration directory resolution and persistence. These tests change
// HOME, so they run serially.

use serial_test::serial;
use std::path::PathBuf;
use tempfile::TempDir;
use twd_search::config::{Config, resolve_config_dir};
use twd_search::search::TraitFilterMode;

struct HomeGuard {
    previous: Option<std::ffi::OsString>,
}

impl HomeGuard {
    fn set(home: &std::path::Path) -> Self {
        let previous = std::env::var_os("HOME");
        // SAFETY: tests touching HOME are #[serial], so no other thread reads it concurrently
        unsafe { std::env::set_var("HOME", home) };
        Self { previous }
    }
}

impl Drop for HomeGuard {
    fn drop(&mut self) {
        // SAFETY: see HomeGuard::set
        unsafe {
            match &self.previous {
                Some(home) => std::env::set_var("HOME", home),
                None => std::env::remove_var("HOME"),
            }
        }
    }
}

#[test]
#[serial]
fn default_dir_lives_under_home() {
    let home = TempDir::new().expect("should create temp dir");
    let _guard = HomeGuard::set(home.path());

    let dir = resolve_config_dir(None).expect("should resolve config dir");
    assert_eq!(dir, home.path().join(".twd-search"));
}

#[test]
#[serial]
fn explicit_dir_wins_over_home() {
    let home = TempDir::new().expect("should create temp dir");
    let _guard = HomeGuard::set(home.path());

    let dir = resolve_config_dir(Some(PathBuf::from("/srv/twd"))).expect("should resolve");
    assert_eq!(dir, PathBuf::from("/srv/twd"));
}

#[test]
#[serial]
fn saved_config_is_loaded_from_default_dir() {
    let home = TempDir::new().expect("should create temp dir");
    let _guard = HomeGuard::set(home.path());

    let dir = resolve_config_dir(None).expect("should resolve config dir");
    let mut config = Config::load(&dir).expect("missing config should load defaults");
    config.search.trait_filter_mode = TraitFilterMode::OverFetch;
    config.index.name = "twd-fandom".to_string();
    config.save().expect("should save config");

    let loaded = Config::load(&dir).expect("should load saved config");
    assert_eq!(loaded.search.trait_filter_mode, TraitFilterMode::OverFetch);
    assert_eq!(loaded.index.name, "twd-fandom");
    assert_eq!(loaded.vector_database_path(), dir.join("vectors"));
}
