use std::process::Command;

fn cryptcat() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cryptcat"))
}

#[test]
fn help_exits_zero() {
    let out = cryptcat().arg("--help").output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("--listen"));
    assert!(text.contains("--key"));
    assert!(text.contains("--file"));
}

#[test]
fn version_exits_zero() {
    let out = cryptcat().arg("--version").output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("cryptcat"));
}

#[test]
fn missing_key_exits_one() {
    let out = cryptcat().args(["127.0.0.1", "4444"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("passphrase"));
}

#[test]
fn empty_key_exits_one() {
    let out = cryptcat().args(["-k", "", "127.0.0.1", "4444"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn zero_port_exits_one() {
    let out = cryptcat().args(["-k", "pw", "-p", "0", "127.0.0.1"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("port"));
}

#[test]
fn shell_mode_is_a_stub() {
    let out = cryptcat()
        .args(["-k", "pw", "-e", "/bin/sh", "127.0.0.1", "4444"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not implemented"));
}

#[test]
fn p2p_mode_is_a_stub() {
    let out = cryptcat().args(["-k", "pw", "--p2p"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not implemented"));
}

#[test]
fn listen_plus_file_send_is_refused() {
    let out = cryptcat()
        .args(["-k", "pw", "-l", "-f", "somefile"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn unknown_flag_exits_one() {
    let out = cryptcat().args(["-k", "pw", "--bogus"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn connect_failure_exits_one() {
    // Port 1 on loopback refuses immediately; after the bounded retries
    // the process reports a single-line error and exits 1.
    let out = cryptcat()
        .args(["-k", "pw", "-f", "/nonexistent/xyzzy", "127.0.0.1", "1"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(String::from_utf8_lossy(&out.stderr).matches("cryptcat: ").count(), 1);
}
