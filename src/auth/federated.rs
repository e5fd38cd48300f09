use tracing::{info, instrument, warn};

use super::{
    google::FederatedProfile,
    services::{is_valid_email, normalize_email, validate_name},
};
use crate::{
    error::AppError,
    users::{
        repo::{StoreError, UserStore},
        repo_types::{NewCredential, NewUser, User},
    },
};

/// Message of the error returned when the email belongs to another account.
pub const EMAIL_TAKEN: &str = "An account with this email already exists";

/// Maps an external profile to a local user, creating it on first sight.
///
/// Creation is idempotent on the provider subject: a unique-key failure on
/// insert is answered by re-reading the record the competing callback created.
#[instrument(skip(users, profile), fields(subject = %profile.subject))]
pub async fn resolve(users: &dyn UserStore, profile: &FederatedProfile) -> Result<User, AppError> {
    if let Some(user) = users.find_by_federated_id(&profile.subject).await? {
        return Ok(user);
    }

    let email = normalize_email(&profile.email);
    if !is_valid_email(&email) {
        warn!("provider email rejected by address pattern");
        return Err(AppError::validation("email", "Invalid email address"));
    }
    let name = validate_name(&profile.name).unwrap_or_else(|_| email.clone());
    let new_user = NewUser {
        email,
        name,
        credential: NewCredential::Federated(profile.subject.clone()),
    };

    match users.create(new_user).await {
        Ok(user) => {
            info!(user_id = %user.id, "federated user created");
            Ok(user)
        }
        // Either constraint may trip first when a concurrent callback won.
        Err(StoreError::Duplicate(field)) => {
            if let Some(user) = users.find_by_federated_id(&profile.subject).await? {
                warn!(duplicate = field, user_id = %user.id, "concurrent federated create; using existing record");
                return Ok(user);
            }
            if field == "email" {
                warn!("federated email already belongs to a local account");
                return Err(AppError::validation("email", EMAIL_TAKEN));
            }
            Err(AppError::Internal(anyhow::anyhow!(
                "duplicate {field} reported but no federated record found"
            )))
        }
        Err(e) => Err(e.into()),
    }
}
