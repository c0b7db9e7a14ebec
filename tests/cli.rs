use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_cli_create_list_extract_cycle() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup: Create a temporary directory and some test files
    let source_dir = tempdir()?;
    let file1_path = source_dir.path().join("index.php");
    let file2_path = source_dir.path().join("readme.txt");
    let nested_dir = source_dir.path().join("wp-content");
    fs::create_dir(&nested_dir)?;
    let nested_file_path = nested_dir.join("plugin.dat");

    let mut file1 = fs::File::create(&file1_path)?;
    writeln!(file1, "<?php echo 'hello';")?;

    let mut file2 = fs::File::create(&file2_path)?;
    writeln!(file2, "Some readme text here.")?;

    let mut nested_file = fs::File::create(&nested_file_path)?;
    nested_file.write_all(&[0, 1, 2, 3, 4, 5])?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("site.spk");

    // 2. Create archive
    let mut cmd = Command::cargo_bin("sitepack")?;
    cmd.arg("create")
        .arg("--output")
        .arg(&archive_path)
        .arg("--glob-size")
        .arg("4")
        .arg(source_dir.path());
    cmd.assert().success().stdout(predicate::str::contains("Result: success"));

    assert!(archive_path.exists());
    assert!(!archive_dir.path().join("site.spk.state.json").exists());
    assert!(!archive_dir.path().join("site.spk.scan.json").exists());

    // 3. List contents of the archive
    let mut cmd = Command::cargo_bin("sitepack")?;
    cmd.arg("list").arg(&archive_path);
    cmd.assert().success().stdout(
        predicate::str::contains("index.php")
            .and(predicate::str::contains("readme.txt"))
            .and(predicate::str::contains("wp-content/plugin.dat"))
            .and(predicate::str::contains(".sitepack/manifest.json")),
    );

    // 4. Extract archive to a new directory
    let extract_dir = tempdir()?;
    let mut cmd = Command::cargo_bin("sitepack")?;
    cmd.arg("extract").arg(&archive_path).arg("-o").arg(extract_dir.path());
    cmd.assert().success();

    // 5. Verify extracted files
    assert_eq!(fs::read(extract_dir.path().join("index.php"))?, fs::read(&file1_path)?);
    assert_eq!(fs::read(extract_dir.path().join("readme.txt"))?, fs::read(&file2_path)?);
    assert_eq!(fs::read(extract_dir.path().join("wp-content/plugin.dat"))?, fs::read(&nested_file_path)?);
    assert!(!extract_dir.path().join(".sitepack").exists());

    // 6. Validate
    let mut cmd = Command::cargo_bin("sitepack")?;
    cmd.arg("validate").arg(&archive_path).arg("--full");
    cmd.assert().success();

    Ok(())
}

#[test]
fn test_cli_resumes_across_invocations() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    fs::write(source_dir.path().join("big.bin"), vec![42u8; 10_000])?;
    fs::write(source_dir.path().join("small.txt"), b"tiny")?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("site.spk");
    let state_path = archive_dir.path().join("site.spk.state.json");

    let mut invocations = 0;
    loop {
        invocations += 1;
        assert!(invocations < 50, "build never finished");
        let output = Command::cargo_bin("sitepack")?
            .args(["create", "--glob-size", "1024", "--unit-budget", "3", "-o"])
            .arg(&archive_path)
            .arg(source_dir.path())
            .output()?;
        assert!(output.status.success());
        if !String::from_utf8_lossy(&output.stdout).contains("In progress") {
            break;
        }
        assert!(state_path.exists());
    }
    assert!(invocations > 1);
    assert!(!state_path.exists());

    let extract_dir = tempdir()?;
    let mut invocations = 0;
    loop {
        invocations += 1;
        assert!(invocations < 50, "extract never finished");
        let output = Command::cargo_bin("sitepack")?
            .args(["extract", "--unit-budget", "2", "-o"])
            .arg(extract_dir.path())
            .arg(&archive_path)
            .output()?;
        assert!(output.status.success());
        if !String::from_utf8_lossy(&output.stdout).contains("In progress") {
            break;
        }
    }
    assert!(invocations > 1);
    assert_eq!(fs::read(extract_dir.path().join("big.bin"))?, vec![42u8; 10_000]);
    assert_eq!(fs::read(extract_dir.path().join("small.txt"))?, b"tiny");
    Ok(())
}

#[test]
fn test_cli_validate_reports_corruption() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    fs::write(source_dir.path().join("page.html"), b"<html>ABCDEFGHIJ</html>")?;
    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("site.spk");

    Command::cargo_bin("sitepack")?
        .args(["create", "--no-manifest", "-o"])
        .arg(&archive_path)
        .arg(source_dir.path())
        .assert()
        .success();

    let mut bytes = fs::read(&archive_path)?;
    let at = bytes.windows(10).position(|w| w == b"ABCDEFGHIJ").expect("payload present");
    bytes[at] ^= 0xff;
    fs::write(&archive_path, bytes)?;

    Command::cargo_bin("sitepack")?
        .arg("validate")
        .arg(&archive_path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("HashMismatch"))
        .stderr(predicate::str::contains("failed validation"));
    Ok(())
}

#[test]
fn test_cli_rejects_bad_mode() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("sitepack")?;
    cmd.args(["extract", "whatever.spk", "--file-mode", "9x9"]);
    cmd.assert().failure().stderr(predicate::str::contains("octal"));
    Ok(())
}
