use std::fs;

use anyhow::Result;
use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;

const SD_ORIGINAL: &str = "#define SD_FAT_VERSION 1\nbool begin(uint8_t csPin);\nvoid end();\n";
const SD_PATCH: &str = "--- a/SD.h\n+++ b/SD.h\n@@ -1,3 +1,4 @@\n #define SD_FAT_VERSION 1\n bool begin(uint8_t csPin);\n+bool mediaPresent();\n void end();\n";
const SD_PATCHED: &str =
    "#define SD_FAT_VERSION 1\nbool begin(uint8_t csPin);\nbool mediaPresent();\nvoid end();\n";

const MTP_ORIGINAL: &str = "A\nB\nC\n";
const MTP_PATCH: &str = "@@ -1,6 +1,15 @@\n A%0AB\n+-modified\n %0AC%0A\n";

const CONFIG: &str = r#"
[vars]
framework_root = "framework"
libdeps_dir = "libdeps"

[[job]]
name = "sd"
target = "${framework_root}/libraries/SD/src/SD.h"
patch = "patches/SD.patch"

[[job]]
name = "mtp"
target = "${libdeps_dir}/${board}/MTP_Teensy/src/MTP_Teensy.h"
patch = "patches/MTP.patch"
sentinel = "${libdeps_dir}/${board}/MTP_Teensy/.patched"
require_dir = "${libdeps_dir}/${board}/MTP_Teensy"
format = "diff-match-patch"
gate = { any_flag = ["-D USB_MTPDISK_SERIAL", "-D USB_MTPDISK"] }
"#;

fn project() -> Result<TempDir> {
    let dir = TempDir::new()?;
    dir.child("patchguard.toml").write_str(CONFIG)?;
    dir.child("patches/SD.patch").write_str(SD_PATCH)?;
    dir.child("patches/MTP.patch").write_str(MTP_PATCH)?;
    dir.child("framework/libraries/SD/src/SD.h").write_str(SD_ORIGINAL)?;
    dir.child("libdeps/teensy41/MTP_Teensy/src/MTP_Teensy.h")
        .write_str(MTP_ORIGINAL)?;
    Ok(dir)
}

fn patchguard(dir: &TempDir) -> Result<Command> {
    let mut cmd = Command::cargo_bin("patchguard")?;
    cmd.current_dir(dir.path())
        .env_remove("PATCHGUARD_BUILD_FLAGS")
        .env_remove("PATCHGUARD_VAR_BOARD")
        .env("PATCHGUARD_LOG", "warn");
    Ok(cmd)
}

fn stdout(cmd: &mut Command) -> Result<String> {
    let output = cmd.assert().success().get_output().clone();
    Ok(String::from_utf8(output.stdout)?)
}

#[test]
fn run_patches_ungated_job_and_skips_closed_gate() -> Result<()> {
    let dir = project()?;

    let out = stdout(patchguard(&dir)?.args(["run", "--var", "board=teensy41"]))?;
    assert!(out.contains("sd: patched (1 hunks)"), "{out}");
    assert!(out.contains("mtp: skipped (gate closed)"), "{out}");

    assert_eq!(
        fs::read_to_string(dir.child("framework/libraries/SD/src/SD.h").path())?,
        SD_PATCHED
    );
    assert!(dir.child("framework/libraries/SD/src/.patched").path().exists());
    assert!(!dir.child("libdeps/teensy41/MTP_Teensy/.patched").path().exists());
    Ok(())
}

#[test]
fn run_is_idempotent() -> Result<()> {
    let dir = project()?;
    patchguard(&dir)?
        .args(["run", "--var", "board=teensy41"])
        .assert()
        .success();

    let out = stdout(patchguard(&dir)?.args(["run", "--var", "board=teensy41"]))?;
    assert!(out.contains("sd: already patched"), "{out}");
    assert_eq!(
        fs::read_to_string(dir.child("framework/libraries/SD/src/SD.h").path())?,
        SD_PATCHED
    );
    Ok(())
}

#[test]
fn build_flag_opens_gate() -> Result<()> {
    let dir = project()?;

    let out = stdout(patchguard(&dir)?.args([
        "run",
        "--job",
        "mtp",
        "--var",
        "board=teensy41",
        "--build-flag",
        "-DUSB_MTPDISK",
    ]))?;
    assert!(out.contains("mtp: patched"), "{out}");
    assert!(!out.contains("sd:"), "{out}");

    assert_eq!(
        fs::read_to_string(dir.child("libdeps/teensy41/MTP_Teensy/src/MTP_Teensy.h").path())?,
        "A\nB-modified\nC\n"
    );
    assert!(dir.child("libdeps/teensy41/MTP_Teensy/.patched").path().exists());
    Ok(())
}

#[test]
fn build_flags_from_environment() -> Result<()> {
    let dir = project()?;

    let out = stdout(
        patchguard(&dir)?
            .env("PATCHGUARD_BUILD_FLAGS", "-D USB_MTPDISK_SERIAL -O2")
            .args(["run", "--job", "mtp", "--var", "board=teensy41"]),
    )?;
    assert!(out.contains("mtp: patched"), "{out}");
    Ok(())
}

#[test]
fn missing_package_directory_is_skipped() -> Result<()> {
    let dir = project()?;

    let out = stdout(patchguard(&dir)?.args([
        "run",
        "--job",
        "mtp",
        "--var",
        "board=teensy40",
        "--build-flag",
        "-D USB_MTPDISK",
    ]))?;
    assert!(out.contains("mtp: skipped"), "{out}");
    assert!(out.contains("not present"), "{out}");
    Ok(())
}

#[test]
fn missing_target_fails_without_sentinel() -> Result<()> {
    let dir = project()?;
    fs::remove_file(dir.child("framework/libraries/SD/src/SD.h").path())?;

    patchguard(&dir)?
        .args(["run", "--job", "sd", "--var", "board=teensy41"])
        .assert()
        .failure()
        .code(1);
    assert!(!dir.child("framework/libraries/SD/src/.patched").path().exists());
    Ok(())
}

#[test]
fn undefined_variable_is_a_config_error() -> Result<()> {
    let dir = project()?;
    patchguard(&dir)?.arg("run").assert().failure().code(1);
    Ok(())
}

#[test]
fn check_reports_failures_and_writes_nothing() -> Result<()> {
    let dir = project()?;
    dir.child("patches/SD.patch").write_str(
        "@@ -1,3 +1,3 @@\n nothing\n-like\n+this\n here\n",
    )?;

    let output = patchguard(&dir)?
        .args(["check", "--job", "sd", "--var", "board=teensy41"])
        .assert()
        .failure()
        .code(1)
        .get_output()
        .clone();
    let out = String::from_utf8(output.stdout)?;
    assert!(out.contains("FAILED"), "{out}");

    assert_eq!(
        fs::read_to_string(dir.child("framework/libraries/SD/src/SD.h").path())?,
        SD_ORIGINAL
    );
    assert!(!dir.child("framework/libraries/SD/src/.patched").path().exists());
    Ok(())
}

#[test]
fn check_passes_on_clean_patch() -> Result<()> {
    let dir = project()?;
    let out = stdout(patchguard(&dir)?.args(["check", "--var", "board=teensy41"]))?;
    assert!(out.contains("hunk #1"), "{out}");
    assert!(out.contains("applied"), "{out}");
    assert_eq!(
        fs::read_to_string(dir.child("framework/libraries/SD/src/SD.h").path())?,
        SD_ORIGINAL
    );
    Ok(())
}

#[test]
fn status_lists_every_job() -> Result<()> {
    let dir = project()?;
    let out = stdout(patchguard(&dir)?.args(["status", "--var", "board=teensy41"]))?;
    assert!(out.contains("sd\n"), "{out}");
    assert!(out.contains("mtp\n"), "{out}");
    assert!(out.contains("gate:     closed"), "{out}");
    assert!(out.contains("not patched"), "{out}");
    Ok(())
}

#[test]
fn apply_without_config() -> Result<()> {
    let dir = TempDir::new()?;
    dir.child("SD.h").write_str(SD_ORIGINAL)?;
    dir.child("SD.patch").write_str(SD_PATCH)?;

    let out = stdout(patchguard(&dir)?.args([
        "apply",
        "--target",
        "SD.h",
        "--patch",
        "SD.patch",
        "--format",
        "unified",
    ]))?;
    assert!(out.contains("SD.h: patched"), "{out}");
    assert_eq!(fs::read_to_string(dir.child("SD.h").path())?, SD_PATCHED);
    assert_eq!(fs::metadata(dir.child(".patched").path())?.len(), 0);
    Ok(())
}

#[test]
fn strict_apply_refuses_partial_patch() -> Result<()> {
    let dir = TempDir::new()?;
    dir.child("SD.h").write_str(SD_ORIGINAL)?;
    dir.child("SD.patch").write_str(&format!(
        "{SD_PATCH}@@ -20,3 +21,3 @@\n x\n-y\n+z\n w\n"
    ))?;

    patchguard(&dir)?
        .args(["apply", "--target", "SD.h", "--patch", "SD.patch", "--strict"])
        .assert()
        .failure()
        .code(1);
    assert_eq!(fs::read_to_string(dir.child("SD.h").path())?, SD_ORIGINAL);
    assert!(!dir.child(".patched").path().exists());
    Ok(())
}
