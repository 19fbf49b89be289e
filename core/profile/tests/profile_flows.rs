//! Reconciliation and upload flows over the in-memory backend.
//!
//! **Coverage:**
//! - Reconcile: create once, idempotent re-runs, concurrent callers, no session
//! - Upload: path derivation properties, session requirement, overwrite on equal timestamps

use std::sync::Arc;

use futures::future::join_all;
use profilekit_backend::{MemoryAuth, MemoryBlobStore, MemoryRecordStore, RecordKey};
use profilekit_common::{Error, Identity, MediaKind, ObjectPath, UserId};
use profilekit_profile::{
    account, ensure_profile_exists, media_object_path, upload_profile_image, FixedClock,
    ProfileContext, ProfileSettings, ReconcileOutcome,
};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    auth: Arc<MemoryAuth>,
    records: Arc<MemoryRecordStore>,
    blobs: Arc<MemoryBlobStore>,
    clock: Arc<FixedClock>,
    ctx: ProfileContext,
}

fn harness(auth: MemoryAuth) -> Harness {
    let auth = Arc::new(auth);
    let records = Arc::new(MemoryRecordStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let clock = Arc::new(FixedClock::new(1_700_000_000_000));
    let ctx = ProfileContext::from_parts(
        auth.clone(),
        records.clone(),
        blobs.clone(),
        ProfileSettings::default(),
    )
    .with_clock(clock.clone());

    Harness {
        auth,
        records,
        blobs,
        clock,
        ctx,
    }
}

fn signed_in(id: &str) -> MemoryAuth {
    MemoryAuth::signed_in(Identity::new(UserId::new(id).unwrap()))
}

fn profile_key(id: &str) -> RecordKey {
    RecordKey::new("id", id)
}

// ============================================================================
// Reconcile
// ============================================================================

#[tokio::test]
async fn test_first_reconcile_creates_exactly_one_record() {
    let h = harness(signed_in("u1"));

    assert_eq!(
        ensure_profile_exists(&h.ctx).await.unwrap(),
        ReconcileOutcome::Created
    );
    assert_eq!(h.records.count("profiles", &profile_key("u1")).await, 1);
}

#[tokio::test]
async fn test_repeated_reconcile_keeps_one_record() {
    let h = harness(signed_in("u1"));

    ensure_profile_exists(&h.ctx).await.unwrap();
    for _ in 0..5 {
        assert_eq!(
            ensure_profile_exists(&h.ctx).await.unwrap(),
            ReconcileOutcome::AlreadyExists
        );
    }
    assert_eq!(h.records.count("profiles", &profile_key("u1")).await, 1);
}

#[tokio::test]
async fn test_concurrent_reconcile_creates_one_record() {
    let h = harness(signed_in("u1"));

    let tasks = (0..8).map(|_| {
        let ctx = h.ctx.clone();
        tokio::spawn(async move { ensure_profile_exists(&ctx).await })
    });
    let outcomes: Vec<ReconcileOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let created = outcomes
        .iter()
        .filter(|o| **o == ReconcileOutcome::Created)
        .count();
    assert_eq!(created, 1);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ReconcileOutcome::Created | ReconcileOutcome::AlreadyExists)));
    assert_eq!(h.records.count("profiles", &profile_key("u1")).await, 1);
}

#[tokio::test]
async fn test_reconcile_without_session_makes_no_store_calls() {
    let h = harness(MemoryAuth::new());

    assert_eq!(
        ensure_profile_exists(&h.ctx).await.unwrap(),
        ReconcileOutcome::NoSession
    );
    assert_eq!(h.records.calls(), 0);
}

#[tokio::test]
async fn test_reconcile_after_email_sign_in() {
    let h = harness(MemoryAuth::new());

    account::sign_in_with_email_link(&h.ctx, "new@example.com")
        .await
        .unwrap();
    let token = h.auth.last_otp("new@example.com").await.unwrap();
    let identity = account::verify_email_otp(&h.ctx, "new@example.com", &token)
        .await
        .unwrap();

    assert_eq!(
        ensure_profile_exists(&h.ctx).await.unwrap(),
        ReconcileOutcome::Created
    );
    assert_eq!(
        h.records
            .count("profiles", &profile_key(identity.id.as_str()))
            .await,
        1
    );

    account::sign_out(&h.ctx).await.unwrap();
    assert_eq!(
        ensure_profile_exists(&h.ctx).await.unwrap(),
        ReconcileOutcome::NoSession
    );
}

#[tokio::test]
async fn test_reconcile_store_unavailable() {
    let h = harness(signed_in("u1"));
    h.records.set_unavailable(true);

    let result = ensure_profile_exists(&h.ctx).await;
    assert!(matches!(result, Err(Error::StoreUnavailable(_))));
}

// ============================================================================
// Upload
// ============================================================================

#[tokio::test]
async fn test_upload_photo_jpg() {
    let h = harness(signed_in("u1"));

    let url = upload_profile_image(&h.ctx, b"jpeg".to_vec(), "photo.JPG", MediaKind::Avatar)
        .await
        .unwrap();
    assert_eq!(url, "memory://profile-media/u1/avatar-1700000000000.JPG");
}

#[tokio::test]
async fn test_upload_without_extension_defaults_to_png() {
    let h = harness(signed_in("u1"));

    let url = upload_profile_image(&h.ctx, vec![0], "blob", MediaKind::Banner)
        .await
        .unwrap();
    assert_eq!(url, "memory://profile-media/u1/banner-1700000000000.png");

    let path = ObjectPath::parse("u1/banner-1700000000000.png").unwrap();
    let stored = h.blobs.get("profile-media", &path).await.unwrap();
    assert_eq!(stored.options.content_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn test_upload_without_session_makes_no_blob_calls() {
    let h = harness(MemoryAuth::new());

    let result = upload_profile_image(&h.ctx, vec![0], "a.png", MediaKind::Avatar).await;
    assert!(matches!(result, Err(Error::Unauthenticated)));
    assert_eq!(h.blobs.calls(), 0);
}

#[tokio::test]
async fn test_uploads_at_distinct_times_keep_both() {
    let h = harness(signed_in("u1"));

    let first = upload_profile_image(&h.ctx, vec![1], "a.png", MediaKind::Avatar)
        .await
        .unwrap();
    h.clock.advance(250);
    let second = upload_profile_image(&h.ctx, vec![2], "a.png", MediaKind::Avatar)
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(h.blobs.len("profile-media").await, 2);
}

#[tokio::test]
async fn test_uploads_at_same_time_overwrite() {
    let h = harness(signed_in("u1"));

    let first = upload_profile_image(&h.ctx, vec![1], "a.png", MediaKind::Avatar)
        .await
        .unwrap();
    let second = upload_profile_image(&h.ctx, vec![2], "a.png", MediaKind::Avatar)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.blobs.len("profile-media").await, 1);
    let path = ObjectPath::parse("u1/avatar-1700000000000.png").unwrap();
    assert_eq!(h.blobs.get("profile-media", &path).await.unwrap().data, vec![2]);
}

#[tokio::test]
async fn test_upload_to_configured_bucket() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let settings = ProfileSettings {
        media_bucket: "avatars".to_string(),
        cache_control_secs: 60,
        ..ProfileSettings::default()
    };
    let ctx = ProfileContext::from_parts(
        Arc::new(signed_in("u1")),
        Arc::new(MemoryRecordStore::new()),
        blobs.clone(),
        settings,
    )
    .with_clock(Arc::new(FixedClock::new(9)));

    let url = upload_profile_image(&ctx, vec![1], "a.gif", MediaKind::Avatar)
        .await
        .unwrap();
    assert_eq!(url, "memory://avatars/u1/avatar-9.gif");

    let path = ObjectPath::parse("u1/avatar-9.gif").unwrap();
    assert_eq!(
        blobs.get("avatars", &path).await.unwrap().options.cache_control_secs,
        60
    );
}

// ============================================================================
// Path derivation properties
// ============================================================================

fn media_kind() -> impl Strategy<Value = MediaKind> {
    prop_oneof![Just(MediaKind::Avatar), Just(MediaKind::Banner)]
}

proptest! {
    #[test]
    fn prop_path_layout(
        user in "[a-f0-9-]{1,36}",
        kind in media_kind(),
        millis in 0i64..4_102_444_800_000,
        stem in "[a-zA-Z0-9_ -]{0,16}",
        ext in "[a-zA-Z0-9]{1,5}",
    ) {
        let user = UserId::new(user).unwrap();
        let file_name = format!("{}.{}", stem, ext);
        let path = media_object_path(&user, kind, millis, &file_name).unwrap();

        prop_assert_eq!(path.components().len(), 2);
        prop_assert_eq!(&path.components()[0], user.as_str());
        prop_assert_eq!(path.name(), format!("{}-{}.{}", kind, millis, ext));
    }

    #[test]
    fn prop_no_extension_means_png(
        kind in media_kind(),
        millis in 0i64..4_102_444_800_000,
        name in "[a-zA-Z0-9_-]{0,16}",
    ) {
        let user = UserId::new("u1").unwrap();
        let path = media_object_path(&user, kind, millis, &name).unwrap();
        prop_assert!(path.name().ends_with(".png"));
    }

    #[test]
    fn prop_distinct_times_distinct_paths(
        kind in media_kind(),
        a in 0i64..1_000_000,
        b in 0i64..1_000_000,
    ) {
        let user = UserId::new("u1").unwrap();
        let first = media_object_path(&user, kind, a, "x.png").unwrap();
        let second = media_object_path(&user, kind, b, "x.png").unwrap();
        prop_assert_eq!(first == second, a == b);
    }
}
