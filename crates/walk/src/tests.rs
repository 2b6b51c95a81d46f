use super::*;
use std::fs;
use std::path::{Path, PathBuf};

fn collect_relative_paths(walker: Walker) -> Vec<PathBuf> {
    walker
        .map(|entry| entry.expect("walker entry").relative_path().to_path_buf())
        .collect()
}

#[test]
fn walk_errors_when_root_missing() {
    let error = match Walker::new("/nonexistent/path/for/walker") {
        Ok(_) => panic!("missing root should fail"),
        Err(error) => error,
    };
    assert!(matches!(error.kind(), WalkErrorKind::RootMetadata { .. }));
    assert_eq!(error.path(), Path::new("/nonexistent/path/for/walker"));
}

#[test]
fn walk_rejects_file_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("file.txt");
    fs::write(&file, b"contents").expect("write");

    let error = match Walker::new(&file) {
        Ok(_) => panic!("file root should fail"),
        Err(error) => error,
    };
    assert!(matches!(error.kind(), WalkErrorKind::RootNotDirectory { .. }));
    assert_eq!(error.path(), file);
}

#[test]
fn walk_yields_deterministic_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("root");
    fs::create_dir(&root).expect("create root");
    let dir_a = root.join("a");
    let dir_b = root.join("b");
    fs::create_dir(&dir_a).expect("dir a");
    fs::create_dir(&dir_b).expect("dir b");
    fs::write(dir_a.join("inner.txt"), b"data").expect("write inner");
    fs::write(root.join("c.txt"), b"data").expect("write file");

    let walker = Walker::new(&root).expect("walker");
    let paths = collect_relative_paths(walker);
    assert_eq!(
        paths,
        vec![
            PathBuf::from("a"),
            PathBuf::from("a/inner.txt"),
            PathBuf::from("b"),
            PathBuf::from("c.txt"),
        ]
    );
}

#[test]
fn walk_reports_full_and_relative_paths() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("root");
    let nested = root.join("nested");
    fs::create_dir_all(&nested).expect("create dirs");
    fs::write(nested.join("file.bin"), b"data").expect("write");

    let entries: Vec<_> = Walker::new(&root)
        .expect("walker")
        .map(|entry| entry.expect("entry"))
        .collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].relative_path(), Path::new("nested/file.bin"));
    assert_eq!(entries[1].full_path(), nested.join("file.bin"));
    assert!(entries[0].metadata().is_dir());
    assert!(entries[1].metadata().is_file());
}

#[test]
fn walk_empty_directory_yields_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut walker = Walker::new(temp.path()).expect("walker");
    assert!(walker.next().is_none());
}

#[cfg(unix)]
#[test]
fn walk_does_not_follow_symlinks() {
    use std::os::unix::fs::symlink;

    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("root");
    let target = temp.path().join("target");
    fs::create_dir(&root).expect("create root");
    fs::create_dir(&target).expect("create target");
    fs::write(target.join("hidden.txt"), b"data").expect("write hidden");
    symlink(&target, root.join("link")).expect("symlink");

    let walker = Walker::new(&root).expect("walker");
    let paths = collect_relative_paths(walker);
    assert_eq!(paths, vec![PathBuf::from("link")]);
}

#[cfg(unix)]
#[test]
fn walk_reports_unresolvable_working_directory() {
    let previous = std::env::current_dir().expect("cwd");
    let temp = tempfile::tempdir().expect("tempdir");
    let doomed = temp.path().join("doomed");
    fs::create_dir(&doomed).expect("create doomed");
    std::env::set_current_dir(&doomed).expect("chdir");
    fs::remove_dir(&doomed).expect("remove cwd");

    let result = Walker::new("relative-root");
    std::env::set_current_dir(&previous).expect("restore cwd");

    let error = match result {
        Ok(_) => panic!("a deleted working directory should fail a relative root"),
        Err(error) => error,
    };
    assert!(matches!(error.kind(), WalkErrorKind::CurrentDir { .. }));
    assert_eq!(error.path(), Path::new("relative-root"));
}

#[cfg(unix)]
#[test]
fn walk_surfaces_unreadable_directory() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("root");
    let sealed = root.join("sealed");
    fs::create_dir_all(&sealed).expect("create dirs");
    fs::set_permissions(&sealed, fs::Permissions::from_mode(0o000)).expect("chmod");
    if fs::read_dir(&sealed).is_ok() {
        // Permission bits are not enforced for this user (e.g. root).
        return;
    }

    let result: Result<Vec<_>, _> = Walker::new(&root).expect("walker").collect();
    fs::set_permissions(&sealed, fs::Permissions::from_mode(0o755)).expect("restore");

    let error = result.expect_err("unreadable directory should fail the walk");
    assert!(matches!(error.kind(), WalkErrorKind::ReadDir { .. }));
    assert_eq!(error.path(), sealed);
}
