//! Sign-in and sign-out wrappers.
//!
//! Thin delegation to the auth provider with logging; every result is
//! returned so callers decide whether to continue on failure.

use profilekit_backend::SignInRedirect;
use profilekit_common::{Identity, Result};

use crate::context::ProfileContext;

/// The signed-in user, if any.
pub async fn current_user(ctx: &ProfileContext) -> Result<Option<Identity>> {
    ctx.auth().current_user().await
}

/// Start an OAuth sign-in; the caller opens the returned URL.
pub async fn sign_in_with_provider(ctx: &ProfileContext, provider: &str) -> Result<SignInRedirect> {
    let redirect = ctx.auth().sign_in_with_provider(provider).await?;
    tracing::debug!(provider, "OAuth authorization URL issued");
    Ok(redirect)
}

/// Finish an OAuth sign-in with the callback code.
pub async fn complete_oauth_sign_in(ctx: &ProfileContext, code: &str) -> Result<Identity> {
    ctx.auth().complete_oauth_sign_in(code).await
}

/// Email a sign-in link and one-time code.
pub async fn sign_in_with_email_link(ctx: &ProfileContext, email: &str) -> Result<()> {
    ctx.auth().sign_in_with_email_link(email).await?;
    tracing::info!("Sign-in link sent");
    Ok(())
}

/// Exchange an emailed one-time code for a session.
pub async fn verify_email_otp(ctx: &ProfileContext, email: &str, token: &str) -> Result<Identity> {
    ctx.auth().verify_email_otp(email, token).await
}

pub async fn sign_out(ctx: &ProfileContext) -> Result<()> {
    ctx.auth().sign_out().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileSettings;
    use profilekit_backend::{MemoryAuth, MemoryBlobStore, MemoryRecordStore};
    use profilekit_common::Error;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryAuth>, ProfileContext) {
        let auth = Arc::new(MemoryAuth::new());
        let ctx = ProfileContext::from_parts(
            auth.clone(),
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryBlobStore::new()),
            ProfileSettings::default(),
        );
        (auth, ctx)
    }

    #[tokio::test]
    async fn test_email_sign_in_round() {
        let (auth, ctx) = setup();
        assert!(current_user(&ctx).await.unwrap().is_none());

        sign_in_with_email_link(&ctx, "a@example.com").await.unwrap();
        let token = auth.last_otp("a@example.com").await.unwrap();
        let identity = verify_email_otp(&ctx, "a@example.com", &token).await.unwrap();

        assert_eq!(current_user(&ctx).await.unwrap(), Some(identity));

        sign_out(&ctx).await.unwrap();
        assert!(current_user(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let (_auth, ctx) = setup();
        let result = sign_in_with_email_link(&ctx, "nobody").await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_oauth_round() {
        let (_auth, ctx) = setup();
        let redirect = sign_in_with_provider(&ctx, "google").await.unwrap();
        let code = redirect.url.rsplit("code=").next().unwrap().to_string();

        let identity = complete_oauth_sign_in(&ctx, &code).await.unwrap();
        assert_eq!(current_user(&ctx).await.unwrap(), Some(identity));
    }

    #[tokio::test]
    async fn test_sign_out_without_session() {
        let (_auth, ctx) = setup();
        sign_out(&ctx).await.unwrap();
    }
}
