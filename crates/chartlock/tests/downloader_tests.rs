//! Integration tests for chart downloads and provenance verification

mod common;

use chartlock::getter::FetchError;
use chartlock::provenance::{digest, Provenance, VerificationError, VerifyPolicy};
use chartlock::{ChartDownloader, DownloadError, Settings};
use common::{archive, index_yaml, Fixture, MemoryGetter, STABLE};
use ed25519_dalek::pkcs8::{spki::der::pem::LineEnding, EncodePublicKey};
use ed25519_dalek::SigningKey;
use std::fs;
use std::path::Path;

const ALPINE_URL: &str = "https://charts.example.com/stable/alpine-0.2.0.tgz";

fn serve_alpine(getter: &MemoryGetter) -> Vec<u8> {
    let bytes = archive("alpine", "0.2.0");
    getter.serve(ALPINE_URL, bytes.clone());
    bytes
}

fn write_keyring(settings: &Settings, key: &SigningKey) {
    let pem = key.verifying_key().to_public_key_pem(LineEnding::LF).unwrap();
    fs::create_dir_all(settings.keyring.parent().unwrap()).unwrap();
    fs::write(&settings.keyring, pem).unwrap();
}

fn sign_alpine(getter: &MemoryGetter, bytes: &[u8], key: &SigningKey) {
    let prov = Provenance::sign("alpine", "0.2.0", "alpine-0.2.0.tgz", bytes, key).unwrap();
    getter.serve(&format!("{}.prov", ALPINE_URL), prov);
}

fn with_policy(fixture: &Fixture, verify: VerifyPolicy) -> Settings {
    let mut settings = fixture.settings.clone();
    settings.verify = verify;
    settings
}

fn dest(fixture: &Fixture) -> std::path::PathBuf {
    fixture.temp.path().join("out")
}

#[test]
fn test_always_without_provenance_fails() {
    let fixture = Fixture::new();
    let getter = MemoryGetter::new();
    serve_alpine(&getter);
    let settings = with_policy(&fixture, VerifyPolicy::Always);

    let result = ChartDownloader::new(&getter, &settings).fetch_url(ALPINE_URL, None, &dest(&fixture));
    assert!(matches!(
        result,
        Err(DownloadError::Verification(VerificationError::MissingProvenance { .. }))
    ));
    assert!(!dest(&fixture).join("alpine-0.2.0.tgz").exists());
}

#[test]
fn test_never_skips_provenance() {
    let fixture = Fixture::new();
    let getter = MemoryGetter::new();
    let bytes = serve_alpine(&getter);
    let settings = with_policy(&fixture, VerifyPolicy::Never);

    let fetched = ChartDownloader::new(&getter, &settings)
        .fetch_url(ALPINE_URL, None, &dest(&fixture))
        .unwrap();

    assert_eq!(fetched.verification, None);
    assert_eq!(fetched.path, dest(&fixture).join("alpine-0.2.0.tgz"));
    assert_eq!(fs::read(&fetched.path).unwrap(), bytes);
    assert_eq!(getter.requests(), vec![ALPINE_URL.to_string()]);
}

#[test]
fn test_if_possible_without_provenance() {
    let fixture = Fixture::new();
    let getter = MemoryGetter::new();
    serve_alpine(&getter);
    let settings = with_policy(&fixture, VerifyPolicy::IfPossible);

    let fetched = ChartDownloader::new(&getter, &settings)
        .fetch_url(ALPINE_URL, None, &dest(&fixture))
        .unwrap();
    assert_eq!(fetched.verification, None);
    assert!(fetched.path.is_file());
}

#[test]
fn test_signed_provenance_verifies() {
    let fixture = Fixture::new();
    let getter = MemoryGetter::new();
    let bytes = serve_alpine(&getter);
    let key = SigningKey::from_bytes(&[11u8; 32]);
    sign_alpine(&getter, &bytes, &key);

    let settings = with_policy(&fixture, VerifyPolicy::Always);
    write_keyring(&settings, &key);

    let fetched = ChartDownloader::new(&getter, &settings)
        .fetch_url(ALPINE_URL, None, &dest(&fixture))
        .unwrap();
    assert_eq!(fetched.verification, Some(digest(&bytes)));
    assert!(dest(&fixture).join("alpine-0.2.0.tgz.prov").is_file());
}

#[test]
fn test_bad_signature_is_fatal_even_if_possible() {
    let fixture = Fixture::new();
    let getter = MemoryGetter::new();
    let bytes = serve_alpine(&getter);
    sign_alpine(&getter, &bytes, &SigningKey::from_bytes(&[12u8; 32]));

    for policy in [VerifyPolicy::IfPossible, VerifyPolicy::Always] {
        let settings = with_policy(&fixture, policy);
        write_keyring(&settings, &SigningKey::from_bytes(&[13u8; 32]));

        let result = ChartDownloader::new(&getter, &settings).fetch_url(ALPINE_URL, None, &dest(&fixture));
        assert!(
            matches!(
                result,
                Err(DownloadError::Verification(VerificationError::BadSignature))
            ),
            "policy {}",
            policy
        );
    }
    assert!(!dest(&fixture).join("alpine-0.2.0.tgz").exists());
}

#[test]
fn test_missing_keyring_is_fatal() {
    let fixture = Fixture::new();
    let getter = MemoryGetter::new();
    let bytes = serve_alpine(&getter);
    sign_alpine(&getter, &bytes, &SigningKey::from_bytes(&[14u8; 32]));

    let settings = with_policy(&fixture, VerifyPolicy::Always);
    let result = ChartDownloader::new(&getter, &settings).fetch_url(ALPINE_URL, None, &dest(&fixture));
    assert!(matches!(
        result,
        Err(DownloadError::Verification(VerificationError::Keyring { .. }))
    ));
}

#[test]
fn test_provenance_server_error_under_always() {
    let fixture = Fixture::new();
    let getter = MemoryGetter::new();
    serve_alpine(&getter);
    getter.fail(&format!("{}.prov", ALPINE_URL), 503);

    let settings = with_policy(&fixture, VerifyPolicy::Always);
    let result = ChartDownloader::new(&getter, &settings).fetch_url(ALPINE_URL, None, &dest(&fixture));
    assert!(matches!(
        result,
        Err(DownloadError::Fetch {
            source: FetchError::HttpStatus { status: 503, .. },
            ..
        })
    ));

    let settings = with_policy(&fixture, VerifyPolicy::IfPossible);
    assert!(ChartDownloader::new(&getter, &settings)
        .fetch_url(ALPINE_URL, None, &dest(&fixture))
        .is_ok());
}

#[test]
fn test_file_urls_are_rejected() {
    let fixture = Fixture::new();
    let getter = MemoryGetter::new();
    let local = fixture.temp.path().join("alpine-0.2.0.tgz");
    fs::write(&local, b"local").unwrap();
    let url = format!("file://{}", local.display());

    let downloader = ChartDownloader::new(&getter, &fixture.settings);
    assert!(matches!(
        downloader.fetch(&url, None, &dest(&fixture)),
        Err(DownloadError::Fetch {
            source: FetchError::UnsupportedScheme { .. },
            ..
        })
    ));
    assert!(getter.requests().is_empty());
}

#[test]
fn test_repo_reference_checks_index_digest() {
    let fixture = Fixture::new();
    fixture.add_repository("stable", STABLE);
    fixture.write_cache("stable", &index_yaml(&[("alpine", "0.2.0"), ("alpine", "0.1.0")]));

    let getter = MemoryGetter::new();
    serve_alpine(&getter);
    let downloader = ChartDownloader::new(&getter, &fixture.settings);

    let fetched = downloader.fetch("stable/alpine", None, &dest(&fixture)).unwrap();
    assert_eq!(fetched.path, dest(&fixture).join("alpine-0.2.0.tgz"));

    // Same URL now serves different bytes than the index advertised
    getter.serve(ALPINE_URL, b"tampered".to_vec());
    let result = downloader.fetch("stable/alpine", Some("0.2.0"), &dest(&fixture));
    assert!(matches!(result, Err(DownloadError::DigestMismatch { .. })));
    assert_eq!(fs::read(&fetched.path).unwrap(), archive("alpine", "0.2.0"));
}

#[test]
fn test_existing_file_is_overwritten() {
    let fixture = Fixture::new();
    let getter = MemoryGetter::new();
    let bytes = serve_alpine(&getter);
    let out = dest(&fixture);
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("alpine-0.2.0.tgz"), b"stale").unwrap();

    ChartDownloader::new(&getter, &fixture.settings)
        .fetch_url(ALPINE_URL, Some(&digest(&bytes)), &out)
        .unwrap();
    assert_eq!(fs::read(out.join("alpine-0.2.0.tgz")).unwrap(), bytes);
    assert_no_temp_files(&out);
}

fn assert_no_temp_files(dir: &Path) {
    for entry in fs::read_dir(dir).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        assert!(!name.contains(".tmp-"), "leftover temporary file {}", name);
    }
}
