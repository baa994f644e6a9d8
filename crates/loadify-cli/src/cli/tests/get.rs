use super::*;
use std::path::PathBuf;

#[test]
fn get_single_url_defaults() {
    match parse(&["loadify", "get", "https://example.com/a.iso"]) {
        CliCommand::Get {
            urls,
            dest,
            jobs,
            limit_kib,
            quality,
            at,
            json,
        } => {
            assert_eq!(urls, vec!["https://example.com/a.iso".to_string()]);
            assert!(dest.is_none());
            assert!(jobs.is_none());
            assert!(limit_kib.is_none());
            assert!(quality.is_none());
            assert!(at.is_none());
            assert!(!json);
        }
        other => panic!("expected Get, got {:?}", other),
    }
}

#[test]
fn get_all_flags() {
    let cmd = parse(&[
        "loadify",
        "get",
        "https://a.example/1",
        "https://youtu.be/xyz",
        "--dest",
        "/tmp/out",
        "-j",
        "2",
        "--limit-kib",
        "512",
        "-q",
        "720p",
        "--at",
        "23:30",
        "--json",
    ]);
    match cmd {
        CliCommand::Get {
            urls,
            dest,
            jobs,
            limit_kib,
            quality,
            at,
            json,
        } => {
            assert_eq!(urls.len(), 2);
            assert_eq!(dest, Some(PathBuf::from("/tmp/out")));
            assert_eq!(jobs, Some(2));
            assert_eq!(limit_kib, Some(512.0));
            assert_eq!(quality.as_deref(), Some("720p"));
            assert_eq!(at.as_deref(), Some("23:30"));
            assert!(json);
        }
        other => panic!("expected Get, got {:?}", other),
    }
}

#[test]
fn get_requires_a_url() {
    assert!(Cli::try_parse_from(["loadify", "get"]).is_err());
}

#[test]
fn get_rejects_non_numeric_jobs() {
    assert!(Cli::try_parse_from(["loadify", "get", "http://x/y", "--jobs", "many"]).is_err());
}
