//! End-to-end round trips through the compiled binary: single files, whole
//! trees, the stdout sentinel, and metadata preservation.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

fn sealdir() -> Command {
    Command::cargo_bin("sealdir").expect("sealdir binary must be available")
}

/// Generates a key file and returns its path.
fn generate_key(dir: &Path) -> PathBuf {
    let path = dir.join("key.sealdir");
    sealdir()
        .args(["keygen", "-o"])
        .arg(&path)
        .assert()
        .success();
    path
}

fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, contents).expect("write");
    }
}

#[test]
fn single_file_round_trip() {
    let temp = TempDir::new().expect("tempdir");
    let key = generate_key(temp.path());
    let plain = temp.path().join("plain.txt");
    let sealed = temp.path().join("sealed.env");
    let restored = temp.path().join("restored.txt");
    fs::write(&plain, b"attack at dawn").expect("write");

    sealdir()
        .args(["encrypt", "--recipient"])
        .arg(&key)
        .arg(&plain)
        .arg(&sealed)
        .assert()
        .success();
    assert_ne!(fs::read(&sealed).expect("read"), b"attack at dawn");

    sealdir()
        .args(["decrypt", "--keyring"])
        .arg(&key)
        .arg(&sealed)
        .arg(&restored)
        .assert()
        .success();
    assert_eq!(fs::read(&restored).expect("read"), b"attack at dawn");
}

#[test]
fn recursive_round_trip_mirrors_the_tree() {
    let temp = TempDir::new().expect("tempdir");
    let key = generate_key(temp.path());
    let plain = temp.path().join("plain");
    let sealed = temp.path().join("sealed");
    let restored = temp.path().join("restored");
    write_tree(
        &plain,
        &[
            ("top.txt", b"top".as_slice()),
            ("a/b/c.txt", b"nested"),
            ("a/sibling.txt", b"sibling"),
        ],
    );

    sealdir()
        .args(["encrypt", "--recursive", "--workers", "4", "--recipient"])
        .arg(&key)
        .arg(&plain)
        .arg(&sealed)
        .assert()
        .success();
    assert!(sealed.join("a/b/c.txt").is_file());

    sealdir()
        .args(["decrypt", "--recursive", "--keyring"])
        .arg(&key)
        .arg(&sealed)
        .arg(&restored)
        .assert()
        .success();
    assert_eq!(fs::read(restored.join("top.txt")).expect("read"), b"top");
    assert_eq!(
        fs::read(restored.join("a/b/c.txt")).expect("read"),
        b"nested"
    );
    assert_eq!(
        fs::read(restored.join("a/sibling.txt")).expect("read"),
        b"sibling"
    );
}

#[test]
fn signed_round_trip() {
    let temp = TempDir::new().expect("tempdir");
    let key = generate_key(temp.path());
    let signing = temp.path().join("signing.sealdir");
    sealdir()
        .args(["keygen", "-o"])
        .arg(&signing)
        .assert()
        .success();

    let plain = temp.path().join("plain.txt");
    let sealed = temp.path().join("sealed.env");
    let restored = temp.path().join("restored.txt");
    fs::write(&plain, b"signed payload").expect("write");

    sealdir()
        .args(["encrypt", "--recipient"])
        .arg(&key)
        .args(["--sign"])
        .arg(&signing)
        .arg(&plain)
        .arg(&sealed)
        .assert()
        .success();

    sealdir()
        .args(["decrypt", "--keyring"])
        .arg(&key)
        .arg(&sealed)
        .arg(&restored)
        .assert()
        .success();
    assert_eq!(fs::read(&restored).expect("read"), b"signed payload");
}

#[test]
fn decrypt_to_stdout_sentinel() {
    let temp = TempDir::new().expect("tempdir");
    let key = generate_key(temp.path());
    let plain = temp.path().join("plain.txt");
    let sealed = temp.path().join("sealed.env");
    fs::write(&plain, b"straight to stdout").expect("write");

    sealdir()
        .args(["encrypt", "--recipient"])
        .arg(&key)
        .arg(&plain)
        .arg(&sealed)
        .assert()
        .success();

    let output = sealdir()
        .args(["decrypt", "--keyring"])
        .arg(&key)
        .arg(&sealed)
        .arg("-")
        .output()
        .expect("run sealdir");
    assert!(output.status.success());
    assert_eq!(output.stdout, b"straight to stdout");
}

#[cfg(unix)]
#[test]
fn permissions_survive_the_round_trip() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().expect("tempdir");
    let key = generate_key(temp.path());
    let plain = temp.path().join("plain.txt");
    let sealed = temp.path().join("sealed.env");
    fs::write(&plain, b"data").expect("write");
    fs::set_permissions(&plain, fs::Permissions::from_mode(0o640)).expect("chmod");

    sealdir()
        .args(["encrypt", "--recipient"])
        .arg(&key)
        .arg(&plain)
        .arg(&sealed)
        .assert()
        .success();

    let mode = fs::metadata(&sealed)
        .expect("metadata")
        .permissions()
        .mode()
        & 0o7777;
    assert_eq!(mode, 0o640);
}

#[test]
fn remove_source_consumes_the_input_tree() {
    let temp = TempDir::new().expect("tempdir");
    let key = generate_key(temp.path());
    let plain = temp.path().join("plain");
    let sealed = temp.path().join("sealed");
    write_tree(&plain, &[("a.txt", b"a".as_slice()), ("sub/b.txt", b"b")]);

    sealdir()
        .args(["encrypt", "--recursive", "--remove-source", "--recipient"])
        .arg(&key)
        .arg(&plain)
        .arg(&sealed)
        .assert()
        .success();

    assert!(!plain.join("a.txt").exists());
    assert!(!plain.join("sub/b.txt").exists());
    assert!(sealed.join("a.txt").is_file());
    assert!(sealed.join("sub/b.txt").is_file());
}

#[test]
fn multiple_recipients_can_each_decrypt() {
    let temp = TempDir::new().expect("tempdir");
    let alice = generate_key(temp.path());
    let bob = temp.path().join("bob.sealdir");
    sealdir().args(["keygen", "-o"]).arg(&bob).assert().success();

    let plain = temp.path().join("plain.txt");
    let sealed = temp.path().join("sealed.env");
    fs::write(&plain, b"for both of you").expect("write");

    sealdir()
        .args(["encrypt", "--recipient"])
        .arg(&alice)
        .args(["--recipient"])
        .arg(&bob)
        .arg(&plain)
        .arg(&sealed)
        .assert()
        .success();

    for key in [&alice, &bob] {
        let restored = temp.path().join("restored.txt");
        sealdir()
            .args(["decrypt", "--keyring"])
            .arg(key)
            .arg(&sealed)
            .arg(&restored)
            .assert()
            .success();
        assert_eq!(fs::read(&restored).expect("read"), b"for both of you");
        fs::remove_file(&restored).expect("remove");
    }
}
