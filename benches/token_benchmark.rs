use chrono::{Duration, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use projecthub::models::User;
use projecthub::services::{SessionManager, TokenCodec};
use std::hint::black_box;

fn sample_user() -> User {
    let now = Utc::now();
    User {
        id: "0f8fad5b-d9cb-469f-a165-70867728950e".to_string(),
        email: Some("alice@example.com".to_string()),
        first_name: Some("Alice".to_string()),
        last_name: Some("Liddell".to_string()),
        profile_image_url: None,
        username: None,
        password_hash: None,
        google_id: None,
        discord_id: None,
        facebook_id: None,
        is_blocked: false,
        is_admin: false,
        reset_token_hash: None,
        reset_token_expiry: None,
        credential_version: 0,
        created_at: now,
        updated_at: now,
    }
}

fn benchmark_identity_tokens(c: &mut Criterion) {
    let codec = TokenCodec::new(b"benchmark-secret-at-least-32-bytes!", Duration::hours(24));
    let user = sample_user();
    let token = codec.encode(&user).expect("Failed to encode token");

    // Same shape, wrong signature: exercises the rejection path
    let forged = TokenCodec::new(b"some-other-secret", Duration::hours(24))
        .encode(&user)
        .expect("Failed to encode token");

    let mut group = c.benchmark_group("identity_tokens");

    group.bench_function("encode", |b| b.iter(|| codec.encode(black_box(&user))));

    group.bench_function("decode_valid", |b| {
        b.iter(|| codec.decode(black_box(&token)))
    });

    group.bench_function("decode_forged", |b| {
        b.iter(|| codec.decode(black_box(&forged)))
    });

    group.finish();
}

fn benchmark_session_ids(c: &mut Criterion) {
    let id = "q2Vr6f1n0xkqS3o9Zk7Jv5bYw4tHcD8uLpMa1eRgTzA";

    let mut group = c.benchmark_group("session_ids");

    group.bench_function("hash_id", |b| {
        b.iter(|| SessionManager::hash_id(black_box(id)))
    });

    group.bench_function("is_well_formed", |b| {
        b.iter(|| SessionManager::is_well_formed(black_box(id)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_identity_tokens, benchmark_session_ids);
criterion_main!(benches);
