use pmoconfig::{ButtonConfig, ConfigStore};
use serde_yaml::Value;
use std::fs;

fn load_from(dir: &tempfile::TempDir) -> ConfigStore {
    ConfigStore::load(dir.path().to_str().unwrap()).unwrap()
}

#[test]
fn test_load_without_file_writes_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let store = load_from(&dir);

    let config = store.get();
    assert_eq!(config.display.pause_timeout, 30);
    assert_eq!(config.discord.pipe_number, 0);
    assert!(store.path().exists());
}

#[test]
fn test_user_file_is_merged_over_defaults() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("config.yaml"),
        "Display:\n  show_artist: false\n  buttons:\n    - label: Profile\n      url: https://example.com\n",
    )
    .unwrap();

    let config = load_from(&dir).get();
    assert!(!config.display.show_artist);
    assert!(config.display.show_album);
    assert_eq!(config.display.buttons.len(), 1);
    assert_eq!(config.display.buttons[0].label, "Profile");
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("config.yaml"), "discord:\n  pipe_number: 12\n").unwrap();

    assert!(ConfigStore::load(dir.path().to_str().unwrap()).is_err());
}

#[test]
fn test_update_publishes_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let store = load_from(&dir);
    let mut rx = store.subscribe();

    store
        .update(|c| {
            c.display.pause_timeout = 0;
            c.display.buttons.push(ButtonConfig {
                label: "Listen".into(),
                url: "https://example.com/listen".into(),
            });
        })
        .unwrap();

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().display.pause_timeout, 0);

    let reloaded = load_from(&dir).get();
    assert_eq!(reloaded.display.pause_timeout, 0);
    assert_eq!(reloaded.display.buttons.len(), 1);
}

#[test]
fn test_rejected_update_keeps_previous_value() {
    let dir = tempfile::tempdir().unwrap();
    let store = load_from(&dir);
    let rx = store.subscribe();

    assert!(store.update(|c| c.discord.client_id = String::new()).is_err());
    assert!(!rx.has_changed().unwrap());
    assert!(!store.get().discord.client_id.is_empty());
}

#[test]
fn test_set_value_by_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = load_from(&dir);

    store
        .set_value(&["Logging", "debug"], Value::Bool(true))
        .unwrap();
    assert!(store.get().logging.debug);
    assert_eq!(
        store.get_value(&["logging", "debug"]).unwrap(),
        Value::Bool(true)
    );
}
