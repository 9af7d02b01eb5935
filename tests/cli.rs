use assert_cmd::Command;
use predicates::prelude::*;

fn spice_record() -> Command {
    let mut cmd = Command::cargo_bin("spice-record").unwrap();
    // no virsh or ffmpeg reachable: anything past argument parsing fails fast
    cmd.env("PATH", "").env_remove("LIBVIRT_DEFAULT_URI").env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_flags() {
    spice_record()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("DOMAIN-NAME|ID|UUID"))
        .stdout(predicate::str::contains("--vcodec"))
        .stdout(predicate::str::contains("--framerate"));
}

#[test]
fn short_v_prints_version() {
    spice_record()
        .arg("-v")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn bad_loglevel_is_a_usage_error() {
    spice_record()
        .args(["--loglevel", "LOUD", "vm1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid value"))
        .stderr(predicate::str::contains("hypervisor").not());
}

#[test]
fn missing_machine_is_a_usage_error() {
    spice_record().assert().code(2).stderr(predicate::str::contains("DOMAIN-NAME"));
}

#[test]
fn zero_framerate_rejected() {
    spice_record().args(["-r", "0", "vm1"]).assert().code(2);
}

#[test]
fn unreachable_hypervisor_names_the_stage() {
    spice_record()
        .args(["-q", "vm1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("lookup failed"))
        .stderr(predicate::str::contains("cannot reach hypervisor"));
}
