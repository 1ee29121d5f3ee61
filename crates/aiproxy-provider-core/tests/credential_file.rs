use aiproxy_provider_core::{CredentialRecord, CredentialStore};

fn temp_store(name: &str) -> CredentialStore {
    let dir = std::env::temp_dir().join(format!("aiproxy-credfile-{name}-{}", std::process::id()));
    CredentialStore::at_path(dir.join("oauth_creds.json"))
}

/// Files written by external CLI tools carry only the epoch-ms `expiry_date`
/// field; the store must accept them and write back both expiry forms.
#[test]
fn legacy_expiry_date_only_file_is_upgraded_on_save() {
    let store = temp_store("legacy");
    let dir = store.path().parent().expect("parent dir");
    std::fs::create_dir_all(dir).expect("mkdir");
    std::fs::write(
        store.path(),
        serde_json::to_vec(&serde_json::json!({
            "access_token": "tok",
            "refresh_token": "ref",
            "expiry_date": 1_893_456_000_000i64,
            "api_key": "sk-derived",
        }))
        .expect("encode"),
    )
    .expect("write");

    let record = store.load().expect("load").expect("record");
    assert_eq!(record.expires_at_ms, Some(1_893_456_000_000));
    assert_eq!(record.api_key.as_deref(), Some("sk-derived"));

    store.save(&record).expect("save");
    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store.path()).expect("read")).expect("parse");
    assert_eq!(raw["expires_at"], "2030-01-01T00:00:00Z");
    assert_eq!(raw["expiry_date"], 1_893_456_000_000i64);

    let _ = std::fs::remove_dir_all(dir);
}

/// Unknown providers' extra fields must not break loading; known optional
/// fields round-trip untouched.
#[test]
fn kiro_sso_registration_fields_round_trip() {
    let store = temp_store("kiro");
    let record = CredentialRecord {
        access_token: "aws-token".to_string(),
        refresh_token: Some("aws-refresh".to_string()),
        expires_at_ms: Some(1_893_456_000_000),
        region: Some("eu-west-1".to_string()),
        start_url: Some("https://corp.awsapps.com/start".to_string()),
        client_id: Some("client-1".to_string()),
        client_secret: Some("secret-1".to_string()),
        registration_expires_at: Some("1900000000".to_string()),
        ..Default::default()
    };
    store.save(&record).expect("save");
    let loaded = store.load().expect("load").expect("record");
    assert_eq!(loaded, record);
    let _ = std::fs::remove_dir_all(store.path().parent().expect("parent dir"));
}
