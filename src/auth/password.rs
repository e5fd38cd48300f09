use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

fn is_bcrypt(digest: &str) -> bool {
    digest.starts_with("$2a$") || digest.starts_with("$2b$") || digest.starts_with("$2y$")
}

fn hash_blocking(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

fn verify_blocking(plain: &str, digest: &str) -> anyhow::Result<bool> {
    if is_bcrypt(digest) {
        return bcrypt::verify(plain, digest).map_err(|e| {
            error!(error = %e, "bcrypt verify error");
            anyhow::anyhow!(e.to_string())
        });
    }
    let parsed = PasswordHash::new(digest).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Argon2id digest of `plain` with a fresh random salt. Runs on the blocking pool.
pub async fn hash_password(plain: &str) -> anyhow::Result<String> {
    let plain = plain.to_owned();
    tokio::task::spawn_blocking(move || hash_blocking(&plain))
        .await
        .context("hash task panicked")?
}

/// Checks `plain` against an Argon2 or legacy bcrypt digest.
/// An `Err` means the digest could not be used; callers must not tell that apart
/// from a wrong password when answering the client.
pub async fn verify_password(plain: &str, digest: &str) -> anyhow::Result<bool> {
    let plain = plain.to_owned();
    let digest = digest.to_owned();
    tokio::task::spawn_blocking(move || verify_blocking(&plain, &digest))
        .await
        .context("verify task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cost of bcrypt digests carried over from the previous deployment.
    const LEGACY_BCRYPT_COST: u32 = 10;

    #[tokio::test]
    async fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).await.expect("hashing should succeed");
        assert_ne!(hash, password);
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(password, &hash).await.expect("verify should succeed"));
    }

    #[tokio::test]
    async fn verify_rejects_wrong_password() {
        let hash = hash_password("correct-horse").await.expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash)
            .await
            .expect("verify should not error"));
    }

    #[tokio::test]
    async fn same_password_gets_distinct_salts() {
        let a = hash_password("secret1").await.unwrap();
        let b = hash_password("secret1").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn verify_errors_on_malformed_hash() {
        let err = verify_password("anything", "not-a-valid-hash").await.unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn legacy_bcrypt_digest_verifies() {
        let digest = bcrypt::hash("secret1", LEGACY_BCRYPT_COST).unwrap();
        assert!(verify_password("secret1", &digest).await.unwrap());
        assert!(!verify_password("secret2", &digest).await.unwrap());
    }
}
