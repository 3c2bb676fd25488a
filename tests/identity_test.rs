//! Experiment id and workspace allocation

mod common;

use std::collections::HashSet;
use std::thread;

use reversal_lab::experiment::RunIdentity;
use tempfile::TempDir;

#[test]
fn test_thousand_identities_are_unique() {
    let temp_dir = TempDir::new().unwrap();
    let config = common::resolve(&[]);

    let mut ids = HashSet::new();
    let mut workspaces = HashSet::new();
    for _ in 0..1000 {
        let identity = RunIdentity::create(&config, temp_dir.path()).unwrap();
        assert!(identity.workspace().join("config.json").is_file());
        assert!(ids.insert(identity.experiment_id().to_string()));
        assert!(workspaces.insert(identity.workspace().to_path_buf()));
    }
    assert_eq!(ids.len(), 1000);
}

#[test]
fn test_concurrent_identities_are_unique() {
    let temp_dir = TempDir::new().unwrap();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let root = temp_dir.path().to_path_buf();
            thread::spawn(move || {
                let config = common::resolve(&[]);
                (0..50)
                    .map(|_| {
                        RunIdentity::create(&config, &root)
                            .unwrap()
                            .experiment_id()
                            .to_string()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id.clone()), "duplicate {id}");
        }
    }
    assert_eq!(ids.len(), 400);
}

#[test]
fn test_id_format() {
    let temp_dir = TempDir::new().unwrap();
    let config = common::resolve(&["experiment.name=Label T=21 / X=0.1"]);
    let identity = RunIdentity::create(&config, temp_dir.path()).unwrap();

    // slug_YYYYMMDD_HHMMSS_hash6
    let id = identity.experiment_id();
    let parts: Vec<&str> = id.rsplitn(4, '_').collect();
    assert_eq!(parts.len(), 4);
    assert_eq!(parts[3], "label-t-21-x-0-1");
    assert_eq!(parts[2].len(), 8);
    assert_eq!(parts[1].len(), 6);
    assert_eq!(parts[0].len(), 6);
    assert!(parts[0].chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(
        identity.workspace(),
        temp_dir.path().join("tests").join(id)
    );
}
