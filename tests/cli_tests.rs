use assert_cmd::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const PROFILES: &str = "\
START_TIME,END_TIME,L3_PROTO,L4_PROTO,SRC_IP,DST_IP,SRC_PORT,DST_PORT,PACKETS,BYTES,PACKETS_REV,BYTES_REV
1700000000000,1700000004000,4,6,192.168.1.10,10.0.0.80,40512,443,12,1800,10,9000
1700000001000,1700000001500,4,17,,,5353,53,1,70,1,250
1700000002000,1700000003000,6,58,,,0,0,3,300,3,300
1700000002500,1700000002600,6,1,,,0,0,2,100,2,100
";

fn write_profiles(dir: &Path) -> std::io::Result<String> {
    let path = dir.join("flows.csv");
    fs::write(&path, PROFILES)?;
    Ok(path.to_string_lossy().into_owned())
}

#[test]
fn pcap_and_report_are_written() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let profiles = write_profiles(dir.path())?;
    let pcap = dir.path().join("out.pcap");
    let report = dir.path().join("report.csv");

    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.arg("-p")
        .arg(&profiles)
        .arg("-o")
        .arg(&pcap)
        .arg("-s")
        .arg("7")
        .arg("-r")
        .arg(&report)
        .arg("--no-report");
    cmd.assert().success();

    assert!(fs::metadata(&pcap)?.len() > 24);
    let report = fs::read_to_string(&report)?;
    let lines: Vec<&str> = report.lines().collect();
    // the ICMP over IPv6 profile is skipped
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("SRC_IP,DST_IP,START_TIME,END_TIME"));
    let fields: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(
        &fields[..8],
        &[
            "192.168.1.10",
            "10.0.0.80",
            "1700000000000.000",
            "1700000004000.000",
            "4",
            "6",
            "40512",
            "443"
        ]
    );
    assert_eq!(fields[8], "12");
    assert_eq!(fields[10], "10");
    Ok(())
}

#[test]
fn deterministic_generation() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let profiles = write_profiles(dir.path())?;
    let mut outputs = vec![];
    for name in ["a.pcap", "b.pcap"] {
        let pcap = dir.path().join(name);
        let mut cmd = Command::cargo_bin("flowgen")?;
        cmd.arg("-p")
            .arg(&profiles)
            .arg("-o")
            .arg(&pcap)
            .arg("-s")
            .arg("0");
        cmd.assert().success();
        outputs.push(fs::read(&pcap)?);
    }
    assert_eq!(outputs[0], outputs[1]);
    Ok(())
}

#[test]
fn configuration_is_applied() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let profiles = write_profiles(dir.path())?;
    let config = dir.path().join("config.toml");
    fs::write(
        &config,
        "[[encapsulation]]\nprobability = 1.0\nlayers = [{ vlan = { id = 42 } }]\n",
    )?;
    let pcap = dir.path().join("out.pcap");

    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.arg("-p")
        .arg(&profiles)
        .arg("-o")
        .arg(&pcap)
        .arg("-c")
        .arg(&config);
    cmd.assert().success();

    let data = fs::read(&pcap)?;
    // first record: 24 bytes of file header, 16 bytes of record header, then the frame
    assert_eq!(&data[40 + 12..40 + 14], &[0x81, 0x00]);
    Ok(())
}

#[test]
fn invalid_inputs_fail() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let pcap = dir.path().join("out.pcap");

    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.arg("-p")
        .arg(dir.path().join("missing.csv"))
        .arg("-o")
        .arg(&pcap);
    cmd.assert().failure();

    let profiles = write_profiles(dir.path())?;
    let config = dir.path().join("config.toml");
    fs::write(&config, "[ipv4]\nfragmentation_probability = 2.0\n")?;
    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.arg("-p")
        .arg(&profiles)
        .arg("-o")
        .arg(&pcap)
        .arg("-c")
        .arg(&config);
    cmd.assert().failure();
    Ok(())
}
