use std::io::Write;
use std::process::{Command, Stdio};

const FLAGS: &[&str] = &["--threshold", "0x100000", "--block-size", "65536", "-j", "4"];

fn frag() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_frag"));
    cmd.env_remove("FRAG_CONFIG").env_remove("FRAG_LOG");
    cmd
}

fn corpus() -> Vec<u8> {
    let unit: Vec<u8> = (0u32..300_000)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 17) as u8)
        .collect();
    let mut data = unit.clone();
    data.extend_from_slice(&unit);
    data
}

#[test]
fn split_then_cat_reproduces_input() {
    let tmp = tempfile::TempDir::new().unwrap();
    let input = tmp.path().join("input.bin");
    let data = corpus();
    std::fs::write(&input, &data).unwrap();
    let dst = tmp.path().join("input.frags");

    let status = frag()
        .args(FLAGS)
        .arg("split")
        .arg(&dst)
        .arg(&input)
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert!(status.success());
    assert!(dst.join("0000000000000000").is_file());

    let out = frag().arg("cat").arg(&dst).output().unwrap();
    assert!(out.status.success());
    assert_eq!(out.stdout, data);
}

#[test]
fn hash_piped_to_count_matches_scan() {
    let tmp = tempfile::TempDir::new().unwrap();
    let input = tmp.path().join("input.bin");
    std::fs::write(&input, corpus()).unwrap();

    let hashed = frag().args(FLAGS).arg("hash").arg(&input).output().unwrap();
    assert!(hashed.status.success());

    let mut count = frag()
        .args(FLAGS)
        .arg("count")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    count.stdin.take().unwrap().write_all(&hashed.stdout).unwrap();
    let counted = count.wait_with_output().unwrap();
    assert!(counted.status.success());

    let scanned = frag().args(FLAGS).arg("scan").arg(&input).output().unwrap();
    assert!(scanned.status.success());

    let report = String::from_utf8(counted.stdout).unwrap();
    assert_eq!(report, String::from_utf8(scanned.stdout).unwrap());
    assert_eq!(report.lines().count(), 6);
    assert!(report.starts_with("fragments (total)\t"));
    assert!(report.contains(&format!("bytes (total)\t\t{:>15}\n", 600_000)));
}

#[test]
fn malformed_records_fail_with_one_line() {
    let mut count = frag()
        .arg("count")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    count.stdin.take().unwrap().write_all(b"not a record").unwrap();
    let out = count.wait_with_output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8(out.stderr).unwrap();
    assert!(stderr.starts_with("frag: "));
    assert!(stderr.contains("no newline found"));
}

#[test]
fn missing_input_is_an_error() {
    let out = frag().arg("points").arg("/nonexistent/frag-input").output().unwrap();
    assert_eq!(out.status.code(), Some(1));
}
